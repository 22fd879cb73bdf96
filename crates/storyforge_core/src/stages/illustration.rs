//! crates/storyforge_core/src/stages/illustration.rs
//!
//! Illustration generation for a single page. Every job stands alone: it
//! re-reads its page, conditions the image model on the page photo and the
//! style reference, and persists exactly one terminal outcome.

use crate::domain::{ArtStyle, ModerationStatus, Page};
use crate::jobs::{validate_job, BookFinalizationJob, IllustrationGenerationJob, RetryPolicy};
use crate::ports::{
    AssetStore, BookRepository, IllustrationRequest, Illustrator, ImageGeneration, JobQueue,
    PortError, PortResult,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Longest diagnostic kept in `moderation_reason`.
pub const MAX_REASON_CHARS: usize = 500;

/// Where style reference images live: `{base_url}/{style}.png`.
#[derive(Debug, Clone)]
pub struct StyleReferences {
    base_url: String,
}

impl StyleReferences {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, style: ArtStyle) -> String {
        format!("{}/{}.png", self.base_url, style.as_str())
    }
}

/// The terminal result of one illustration job that did not error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IllustrationOutcome {
    Illustrated { image_url: String },
    /// The model declined the input; recorded, never retried.
    Flagged { reason: String },
    /// Retries were exhausted on an earlier delivery.
    Failed { reason: String },
}

/// Storage key for a page's generated image. Stable across retries.
pub fn generated_image_key(book_id: uuid::Uuid, page_number: u32) -> String {
    format!("book/{}/generated/page_{}", book_id, page_number)
}

pub fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_REASON_CHARS {
        return reason.to_string();
    }
    let mut truncated: String = reason.chars().take(MAX_REASON_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}

pub fn build_prompt(job: &IllustrationGenerationJob) -> String {
    let mut prompt = format!(
        "Redraw the first image as a {} in the style of the second image. \
         Keep the people, their faces, poses and the setting recognizable.",
        job.art_style.description()
    );
    if let Some(text) = job.text.as_deref().filter(|t| !t.trim().is_empty()) {
        prompt.push_str(&format!(" The page reads: \"{}\".", text.trim()));
    }
    if let Some(notes) = job
        .illustration_notes
        .as_deref()
        .filter(|n| !n.trim().is_empty())
    {
        prompt.push_str(&format!(" Scene notes: {}.", notes.trim()));
    }
    if job.is_winkify_enabled {
        prompt.push_str(" The child is giving a playful wink.");
    }
    prompt.push_str(" Do not add any text or lettering to the image.");
    prompt
}

#[derive(Clone)]
pub struct IllustrationStage {
    books: Arc<dyn BookRepository>,
    illustrator: Arc<dyn Illustrator>,
    assets: Arc<dyn AssetStore>,
    queue: Arc<dyn JobQueue>,
    styles: StyleReferences,
    policy: RetryPolicy,
}

impl IllustrationStage {
    pub fn new(
        books: Arc<dyn BookRepository>,
        illustrator: Arc<dyn Illustrator>,
        assets: Arc<dyn AssetStore>,
        queue: Arc<dyn JobQueue>,
        styles: StyleReferences,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            books,
            illustrator,
            assets,
            queue,
            styles,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs one delivery of an illustration job. `attempt` is 1-based.
    ///
    /// A soft rejection resolves as `Ok(Flagged)`. Errors mark the page FAILED
    /// only on the final attempt, or immediately when retrying cannot help.
    pub async fn run(
        &self,
        job: &IllustrationGenerationJob,
        attempt: u32,
    ) -> PortResult<IllustrationOutcome> {
        validate_job(job)?;
        let page = self.books.get_page(job.page_id).await?;
        if page.book_id != job.book_id {
            return Err(PortError::Validation(format!(
                "page {} does not belong to book {}",
                job.page_id, job.book_id
            )));
        }

        // Redelivery of a job whose outcome is already persisted.
        if let Some(outcome) = settled_outcome(&page) {
            info!(page_id = %job.page_id, attempt, "page already settled, re-signalling finalization");
            self.signal_settled(job).await?;
            return Ok(outcome);
        }

        if !job.is_title_page && !page.has_text() {
            return Err(PortError::InvalidState(format!(
                "page {} has no story text yet",
                job.page_id
            )));
        }

        match self.illustrate(job, &page).await {
            Ok(outcome) => {
                self.signal_settled(job).await?;
                Ok(outcome)
            }
            Err(e) => {
                if e.is_permanent() || self.policy.is_final_attempt(attempt) {
                    error!(
                        page_id = %job.page_id,
                        attempt,
                        error = %e,
                        "illustration failed for good"
                    );
                    self.books
                        .mark_page_moderation(
                            job.page_id,
                            ModerationStatus::Failed,
                            Some(&truncate_reason(&e.to_string())),
                        )
                        .await?;
                    self.signal_settled(job).await?;
                } else {
                    warn!(
                        page_id = %job.page_id,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "illustration attempt failed, will retry"
                    );
                }
                Err(e)
            }
        }
    }

    async fn illustrate(
        &self,
        job: &IllustrationGenerationJob,
        page: &Page,
    ) -> PortResult<IllustrationOutcome> {
        let source_url = page.original_image_url.as_deref().ok_or_else(|| {
            PortError::InvalidState(format!("page {} has no source image", page.id))
        })?;
        let source_image = self.assets.fetch(source_url).await?;
        let style_reference = self
            .assets
            .fetch(&self.styles.url_for(job.art_style))
            .await?;

        let request = IllustrationRequest {
            prompt: build_prompt(job),
            source_image,
            style_reference,
        };

        match self.illustrator.illustrate(request).await? {
            ImageGeneration::Image(bytes) => {
                let key = generated_image_key(job.book_id, job.page_number);
                let image_url = self.assets.put_object(&key, bytes, "image/png").await?;
                self.books
                    .mark_page_illustrated(job.page_id, &image_url)
                    .await?;
                info!(page_id = %job.page_id, %image_url, "page illustrated");
                Ok(IllustrationOutcome::Illustrated { image_url })
            }
            ImageGeneration::Declined { reason } => {
                let reason = truncate_reason(&reason);
                self.books
                    .mark_page_moderation(job.page_id, ModerationStatus::Flagged, Some(&reason))
                    .await?;
                warn!(page_id = %job.page_id, %reason, "illustration declined by content policy");
                Ok(IllustrationOutcome::Flagged { reason })
            }
        }
    }

    async fn signal_settled(&self, job: &IllustrationGenerationJob) -> PortResult<()> {
        self.queue
            .enqueue_finalization(BookFinalizationJob {
                book_id: job.book_id,
            })
            .await
    }
}

fn settled_outcome(page: &Page) -> Option<IllustrationOutcome> {
    match page.moderation_status {
        ModerationStatus::Ok => page
            .generated_image_url
            .clone()
            .map(|image_url| IllustrationOutcome::Illustrated { image_url }),
        ModerationStatus::Flagged => Some(IllustrationOutcome::Flagged {
            reason: page.moderation_reason.clone().unwrap_or_default(),
        }),
        ModerationStatus::Failed => Some(IllustrationOutcome::Failed {
            reason: page.moderation_reason.clone().unwrap_or_default(),
        }),
        ModerationStatus::Pending => None,
    }
}
