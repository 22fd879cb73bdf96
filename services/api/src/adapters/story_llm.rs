//! services/api/src/adapters/story_llm.rs
//!
//! This module contains the adapter for the story-writing LLM.
//! It implements the `StoryWriter` port from the `core` crate: one multimodal
//! chat completion sees every page photo and answers with a JSON document
//! holding text and illustration notes per page position.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrl, ResponseFormat,
        ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use storyforge_core::ports::{
    DraftPage, PortError, PortResult, StoryDraft, StoryRequest, StoryWriter,
};

//=========================================================================================
// Prompt Construction
//=========================================================================================

pub fn system_prompt(request: &StoryRequest) -> String {
    let mut prompt = format!(
        "You are a children's picture book author. Write a gentle, age-appropriate story \
         titled \"{title}\" starring {child}. You will receive {count} photos in reading \
         order, numbered 1 to {count}. Write one short passage (2 to 4 sentences) for every \
         photo so the passages read as one continuous story, and describe what the \
         illustrator should draw for that page in the style: {style}.\n\n\
         Respond with a JSON object of exactly this shape and nothing else:\n\
         {{\"pages\": [{{\"position\": 1, \"text\": \"...\", \"illustration_notes\": \"...\"}}]}}\n\
         Include every position from 1 to {count} exactly once.",
        title = request.book_title,
        child = request.child_name,
        count = request.pages.len(),
        style = request.art_style.description(),
    );
    if request.is_winkify_enabled {
        prompt.push_str(&format!(
            "\nIn every illustration note, mention that {} is winking playfully.",
            request.child_name
        ));
    }
    prompt
}

pub const STORY_SCHEMA_NAME: &str = "storybook_pages";

/// Structured output the model must follow: one entry per photo position,
/// each with its passage and the illustrator's notes.
pub fn story_response_format(page_count: usize) -> ResponseFormat {
    let positions: Vec<u32> = (1..=page_count as u32).collect();
    ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            name: STORY_SCHEMA_NAME.to_string(),
            description: Some(format!(
                "Story text and illustration notes for {} photos, one entry per position.",
                page_count
            )),
            schema: Some(json!({
                "type": "object",
                "properties": {
                    "pages": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "position": { "type": "integer", "enum": positions },
                                "text": { "type": "string" },
                                "illustration_notes": { "type": "string" }
                            },
                            "required": ["position", "text", "illustration_notes"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["pages"],
                "additionalProperties": false
            })),
            strict: Some(true),
        },
    }
}

//=========================================================================================
// Response Parsing
//=========================================================================================

#[derive(Debug, Deserialize)]
struct StoryResponse {
    pages: Vec<StoryResponsePage>,
}

#[derive(Debug, Deserialize)]
struct StoryResponsePage {
    position: u32,
    #[serde(default)]
    text: String,
    #[serde(default, alias = "illustrationNotes")]
    illustration_notes: Option<String>,
}

/// Parses the model's answer. Compatible endpoints without structured output
/// support sometimes wrap JSON in a markdown fence, so a surrounding fence is
/// stripped first.
pub fn parse_story_response(raw: &str) -> PortResult<StoryDraft> {
    let fence = Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$")
        .map_err(|e| PortError::Unexpected(e.to_string()))?;
    let body = fence
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(raw);

    let parsed: StoryResponse = serde_json::from_str(body.trim()).map_err(|e| {
        PortError::Unexpected(format!("story model returned malformed JSON: {}", e))
    })?;

    Ok(StoryDraft {
        pages: parsed
            .pages
            .into_iter()
            .map(|p| DraftPage {
                position: p.position,
                text: p.text,
                illustration_notes: p.illustration_notes,
            })
            .collect(),
    })
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `StoryWriter` using an OpenAI-compatible vision model.
#[derive(Clone)]
pub struct OpenAiStoryAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiStoryAdapter {
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn build_messages(&self, request: &StoryRequest) -> PortResult<Vec<ChatCompletionRequestMessage>> {
        let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = Vec::new();
        for page in &request.pages {
            parts.push(ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: format!("Photo for position {}:", page.position),
                },
            ));
            parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                ChatCompletionRequestMessageContentPartImage {
                    image_url: ImageUrl {
                        url: page.image_url.clone(),
                        detail: Some(ImageDetail::Low),
                    },
                },
            ));
        }

        Ok(vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(request))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ])
    }
}

//=========================================================================================
// `StoryWriter` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoryWriter for OpenAiStoryAdapter {
    async fn write_story(&self, request: &StoryRequest) -> PortResult<StoryDraft> {
        if request.pages.is_empty() {
            return Err(PortError::Validation("a story needs at least one page".into()));
        }

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(self.build_messages(request)?)
            .response_format(story_response_format(request.pages.len()))
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| {
                PortError::Unexpected("Story LLM response contained no text content.".to_string())
            })?;

        parse_story_response(&content)
    }
}
