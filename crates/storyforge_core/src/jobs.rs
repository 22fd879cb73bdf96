//! crates/storyforge_core/src/jobs.rs
//!
//! Typed payloads for every queued job kind, their boundary validation, and
//! the per-stage retry envelope.

use crate::domain::ArtStyle;
use crate::ports::{PortError, PortResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;
use validator::{Validate, ValidationError};

//=========================================================================================
// Job Kinds
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    StoryGeneration,
    IllustrationGeneration,
    BookFinalization,
    PrintFulfillment,
}

impl JobKind {
    /// Queue namespace used by the broker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StoryGeneration => "storyforge::story_generation",
            Self::IllustrationGeneration => "storyforge::illustration_generation",
            Self::BookFinalization => "storyforge::book_finalization",
            Self::PrintFulfillment => "storyforge::print_fulfillment",
        }
    }
}

//=========================================================================================
// Payloads
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PromptContext {
    #[validate(length(min = 1, max = 200))]
    pub book_title: String,
    #[validate(length(min = 1, max = 100))]
    pub child_name: String,
    pub art_style: ArtStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StoryPageRef {
    pub page_id: Uuid,
    #[validate(range(min = 1))]
    pub page_number: u32,
    pub asset_id: Option<Uuid>,
    #[validate(url)]
    pub original_image_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StoryGenerationJob {
    pub user_id: Uuid,
    pub book_id: Uuid,
    #[validate(nested)]
    pub prompt_context: PromptContext,
    #[validate(length(min = 1), nested)]
    pub story_pages: Vec<StoryPageRef>,
    #[serde(default)]
    pub is_winkify_enabled: bool,
    /// Set only by the explicitly confirmed regeneration request; lets a
    /// COMPLETED or PARTIAL book be written again.
    #[serde(default)]
    pub regenerate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
#[validate(schema(function = "story_text_present"))]
pub struct IllustrationGenerationJob {
    pub book_id: Uuid,
    pub page_id: Uuid,
    pub user_id: Uuid,
    #[validate(range(min = 1))]
    pub page_number: u32,
    pub art_style: ArtStyle,
    #[serde(default)]
    pub is_winkify_enabled: bool,
    #[serde(default)]
    pub illustration_notes: Option<String>,
    #[serde(default)]
    pub is_title_page: bool,
    #[validate(length(min = 1))]
    pub book_title: String,
    #[serde(default)]
    pub text: Option<String>,
}

fn story_text_present(job: &IllustrationGenerationJob) -> Result<(), ValidationError> {
    let has_text = job
        .text
        .as_deref()
        .map(|t| !t.trim().is_empty())
        .unwrap_or(false);
    if job.is_title_page || has_text {
        Ok(())
    } else {
        Err(ValidationError::new("story_text_missing"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookFinalizationJob {
    pub book_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PrintFulfillmentJob {
    pub print_order_id: Uuid,
    pub book_id: Uuid,
    pub user_id: Uuid,
}

/// Validates a payload at the queue boundary, before any stage sees it.
pub fn validate_job<T: Validate>(job: &T) -> PortResult<()> {
    job.validate()
        .map_err(|e| PortError::Validation(e.to_string()))
}

//=========================================================================================
// Retry Policy
//=========================================================================================

/// The retry envelope of one stage. Attempts are 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff,
        }
    }

    /// Story generation: 3 attempts, exponential from 10s.
    pub const fn story() -> Self {
        Self::new(3, Duration::from_secs(10))
    }

    pub const fn illustration() -> Self {
        Self::new(3, Duration::from_secs(5))
    }

    pub const fn fulfillment() -> Self {
        Self::new(5, Duration::from_secs(30))
    }

    pub const fn finalization() -> Self {
        Self::new(5, Duration::from_secs(2))
    }

    /// Delay before `attempt` runs: nothing for the first, then
    /// `initial_backoff * 2^(attempt - 2)`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(16);
        self.initial_backoff.saturating_mul(1u32 << exponent)
    }

    pub fn is_final_attempt(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}
