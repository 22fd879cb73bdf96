//! crates/storyforge_core/src/stages/story.rs
//!
//! Story generation: one model call writes every story page of a book.

use crate::domain::{BookStatus, PageTextUpdate};
use crate::jobs::{validate_job, RetryPolicy, StoryGenerationJob, StoryPageRef};
use crate::ports::{
    BookRepository, PortError, PortResult, StoryDraft, StoryPromptPage, StoryRequest, StoryWriter,
};
use crate::stages::dispatch::IllustrationDispatcher;
use crate::status::StatusService;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// What a successful story run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryOutcome {
    pub pages_written: usize,
    pub placeholders: usize,
    pub illustrations_dispatched: usize,
}

/// Deterministic text for a page the model did not write.
pub fn placeholder_text(child_name: &str, page_number: u32) -> String {
    format!(
        "{} turned the page to discover what happens next. (Page {})",
        child_name, page_number
    )
}

/// Maps the model's position-keyed answer back onto page ids. Positions are
/// 1-based in page-number order; absent, empty, or out-of-range positions get
/// a placeholder with `text_confirmed = false`. The first answer for a
/// duplicated position wins.
pub fn reconcile_draft(
    ordered_pages: &[StoryPageRef],
    draft: &StoryDraft,
    child_name: &str,
) -> Vec<PageTextUpdate> {
    let mut by_position = HashMap::new();
    for page in &draft.pages {
        if page.text.trim().is_empty() {
            continue;
        }
        by_position.entry(page.position).or_insert(page);
    }

    ordered_pages
        .iter()
        .enumerate()
        .map(|(i, page)| {
            let position = i as u32 + 1;
            match by_position.get(&position) {
                Some(written) => PageTextUpdate {
                    page_id: page.page_id,
                    text: written.text.trim().to_string(),
                    illustration_notes: written
                        .illustration_notes
                        .as_ref()
                        .map(|n| n.trim().to_string())
                        .filter(|n| !n.is_empty()),
                    text_confirmed: true,
                },
                None => PageTextUpdate {
                    page_id: page.page_id,
                    text: placeholder_text(child_name, page.page_number),
                    illustration_notes: None,
                    text_confirmed: false,
                },
            }
        })
        .collect()
}

#[derive(Clone)]
pub struct StoryStage {
    books: Arc<dyn BookRepository>,
    writer: Arc<dyn StoryWriter>,
    dispatcher: IllustrationDispatcher,
    status: StatusService,
    policy: RetryPolicy,
}

impl StoryStage {
    pub fn new(
        books: Arc<dyn BookRepository>,
        writer: Arc<dyn StoryWriter>,
        dispatcher: IllustrationDispatcher,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            books,
            writer,
            dispatcher,
            status: StatusService::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Runs one delivery of a story job. `attempt` is 1-based.
    pub async fn run(&self, job: &StoryGenerationJob, attempt: u32) -> PortResult<StoryOutcome> {
        validate_job(job)?;
        let book = self.books.get_book(job.book_id).await?;
        if book.user_id != job.user_id {
            return Err(PortError::Unauthorized);
        }

        // An earlier delivery wrote the story but died before fanning out.
        if attempt > 1 && book.status == BookStatus::StoryReady {
            info!(book_id = %job.book_id, attempt, "story already written, resuming fan-out");
            let dispatched = self.dispatcher.dispatch_all(job.book_id).await?;
            return Ok(StoryOutcome {
                pages_written: 0,
                placeholders: 0,
                illustrations_dispatched: dispatched,
            });
        }

        // Or it moved the book to ILLUSTRATING and lost the broker mid fan-out.
        if attempt > 1 && book.status == BookStatus::Illustrating {
            info!(book_id = %job.book_id, attempt, "fan-out was interrupted, re-dispatching pending pages");
            let dispatched = self.dispatcher.resume_pending(job.book_id).await?;
            return Ok(StoryOutcome {
                pages_written: 0,
                placeholders: 0,
                illustrations_dispatched: dispatched,
            });
        }

        let mut start_states: Vec<BookStatus> = if job.regenerate {
            self.status.regeneration_start_states().to_vec()
        } else {
            self.status.generation_start_states().to_vec()
        };
        // A previous delivery may have died mid-run and left the book GENERATING.
        if attempt > 1 {
            start_states.push(BookStatus::Generating);
        }

        let started = self
            .books
            .transition_book_status(job.book_id, &start_states, BookStatus::Generating)
            .await?;
        if !started {
            return Err(PortError::InvalidState(format!(
                "book {} cannot start story generation from {}",
                job.book_id, book.status
            )));
        }
        info!(book_id = %job.book_id, attempt, pages = job.story_pages.len(), "story generation started");

        match self.generate(job).await {
            Ok((pages_written, placeholders)) => {
                let dispatched = self.dispatcher.dispatch_all(job.book_id).await?;
                Ok(StoryOutcome {
                    pages_written,
                    placeholders,
                    illustrations_dispatched: dispatched,
                })
            }
            Err(e) => {
                error!(book_id = %job.book_id, attempt, error = %e, "story generation failed");
                self.mark_failed(job.book_id).await;
                Err(e)
            }
        }
    }

    async fn generate(&self, job: &StoryGenerationJob) -> PortResult<(usize, usize)> {
        let mut ordered = job.story_pages.clone();
        ordered.sort_by_key(|p| p.page_number);

        let request = StoryRequest {
            book_title: job.prompt_context.book_title.clone(),
            child_name: job.prompt_context.child_name.clone(),
            art_style: job.prompt_context.art_style,
            is_winkify_enabled: job.is_winkify_enabled,
            pages: ordered
                .iter()
                .enumerate()
                .map(|(i, p)| StoryPromptPage {
                    position: i as u32 + 1,
                    image_url: p.original_image_url.clone(),
                })
                .collect(),
        };

        let draft = self.writer.write_story(&request).await?;
        let updates = reconcile_draft(&ordered, &draft, &job.prompt_context.child_name);
        let mut placeholders = updates.iter().filter(|u| !u.text_confirmed).count();
        if placeholders > 0 {
            warn!(book_id = %job.book_id, placeholders, "model skipped pages, placeholders applied");
        }
        self.books.save_page_texts(job.book_id, &updates).await?;

        // Second pass: trust only what was persisted.
        let expected: Vec<Uuid> = ordered.iter().map(|p| p.page_id).collect();
        let stored = self.books.get_pages(job.book_id).await?;
        let fallbacks: Vec<PageTextUpdate> = ordered
            .iter()
            .filter(|p| {
                !stored
                    .iter()
                    .any(|s| s.id == p.page_id && s.has_text())
            })
            .map(|p| PageTextUpdate {
                page_id: p.page_id,
                text: placeholder_text(&job.prompt_context.child_name, p.page_number),
                illustration_notes: None,
                text_confirmed: false,
            })
            .collect();
        if !fallbacks.is_empty() {
            warn!(
                book_id = %job.book_id,
                missing = fallbacks.len(),
                "pages still missing text after write, applying fallback"
            );
            placeholders += fallbacks.len();
            self.books.save_page_texts(job.book_id, &fallbacks).await?;
        }

        let moved = self
            .books
            .transition_book_status(job.book_id, &[BookStatus::Generating], BookStatus::StoryReady)
            .await?;
        if !moved {
            return Err(PortError::InvalidState(format!(
                "book {} left GENERATING while its story was being written",
                job.book_id
            )));
        }
        info!(book_id = %job.book_id, pages = expected.len(), placeholders, "story ready");
        Ok((expected.len(), placeholders))
    }

    async fn mark_failed(&self, book_id: Uuid) {
        match self
            .books
            .transition_book_status(book_id, &[BookStatus::Generating], BookStatus::Failed)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(%book_id, "book was not GENERATING, status left unchanged"),
            Err(e) => error!(%book_id, error = %e, "could not mark book FAILED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModerationStatus;
    use crate::ports::DraftPage;
    use crate::testing::{story_job, StoryFixture};
    use assert_matches::assert_matches;

    fn draft(positions: &[u32]) -> StoryDraft {
        StoryDraft {
            pages: positions
                .iter()
                .map(|p| DraftPage {
                    position: *p,
                    text: format!("Text for position {}", p),
                    illustration_notes: Some(format!("Notes {}", p)),
                })
                .collect(),
        }
    }

    #[test]
    fn reconcile_fills_missing_positions_with_placeholders() {
        let refs: Vec<StoryPageRef> = (2..=4)
            .map(|n| StoryPageRef {
                page_id: Uuid::new_v4(),
                page_number: n,
                asset_id: None,
                original_image_url: format!("https://cdn.example.com/{}.jpg", n),
            })
            .collect();
        let updates = reconcile_draft(&refs, &draft(&[1, 3, 9]), "Mia");

        assert_eq!(updates.len(), 3);
        assert_eq!(updates[0].text, "Text for position 1");
        assert!(updates[0].text_confirmed);
        assert_eq!(updates[1].text, placeholder_text("Mia", 3));
        assert!(!updates[1].text_confirmed);
        assert_eq!(updates[2].page_id, refs[2].page_id);
        assert_eq!(updates[2].text, "Text for position 3");
    }

    #[tokio::test]
    async fn successful_story_marks_ready_and_fans_out() {
        let fx = StoryFixture::new(8, draft(&[1, 2, 3, 4, 5, 6, 7]));
        let outcome = fx.stage.run(&fx.job, 1).await.unwrap();

        assert_eq!(outcome.pages_written, 7);
        assert_eq!(outcome.placeholders, 0);
        assert_eq!(outcome.illustrations_dispatched, 7);
        let book = fx.books.get_book(fx.book.id).await.unwrap();
        assert_eq!(book.status, BookStatus::Illustrating);
        assert_eq!(fx.queue.illustrations().len(), 7);
        let pages = fx.books.get_pages(fx.book.id).await.unwrap();
        assert!(pages.iter().filter(|p| !p.is_title_page).all(|p| p.has_text()));
        assert!(pages
            .iter()
            .filter(|p| !p.is_title_page)
            .all(|p| p.moderation_status == ModerationStatus::Pending));
    }

    #[tokio::test]
    async fn missing_page_never_blocks_dispatch() {
        let fx = StoryFixture::new(4, draft(&[1, 3]));
        let outcome = fx.stage.run(&fx.job, 1).await.unwrap();

        assert_eq!(outcome.placeholders, 1);
        assert_eq!(outcome.illustrations_dispatched, 3);
        let jobs = fx.queue.illustrations();
        assert!(jobs.iter().all(|j| j.text.as_deref().map(|t| !t.is_empty()) == Some(true)));
    }

    #[tokio::test]
    async fn text_lost_on_write_gets_fallback_on_second_pass() {
        let fx = StoryFixture::new(4, draft(&[1, 2, 3]));
        let lost = fx.pages[2].id;
        fx.books.clear_page_text(lost);
        fx.books.lose_text_write(lost);

        let outcome = fx.stage.run(&fx.job, 1).await.unwrap();

        assert_eq!(outcome.placeholders, 1);
        assert_eq!(outcome.illustrations_dispatched, 3);
        let page = fx.books.get_page(lost).await.unwrap();
        assert_eq!(page.text, Some(placeholder_text("Mia", page.page_number)));
        assert!(!page.text_confirmed);
        let job = fx
            .queue
            .illustrations()
            .into_iter()
            .find(|j| j.page_id == lost)
            .unwrap();
        assert_eq!(job.text, page.text);
    }

    #[tokio::test]
    async fn writer_error_fails_book_and_propagates() {
        let fx = StoryFixture::failing(3);
        let result = fx.stage.run(&fx.job, 1).await;

        assert_matches!(result, Err(PortError::Unexpected(_)));
        let book = fx.books.get_book(fx.book.id).await.unwrap();
        assert_eq!(book.status, BookStatus::Failed);
        assert!(fx.queue.illustrations().is_empty());
    }

    #[tokio::test]
    async fn retry_after_failure_starts_again() {
        let fx = StoryFixture::failing(3);
        let _ = fx.stage.run(&fx.job, 1).await;
        fx.writer.set_draft(draft(&[1, 2]));

        let outcome = fx.stage.run(&fx.job, 2).await.unwrap();
        assert_eq!(outcome.pages_written, 2);
        let book = fx.books.get_book(fx.book.id).await.unwrap();
        assert_eq!(book.status, BookStatus::Illustrating);
    }

    #[tokio::test]
    async fn redelivery_after_interrupted_fan_out_dispatches_every_page() {
        let fx = StoryFixture::new(4, draft(&[1, 2, 3]));
        fx.queue.fail_illustration_call(2);

        let first = fx.stage.run(&fx.job, 1).await;
        assert_matches!(first, Err(PortError::Unexpected(_)));
        let book = fx.books.get_book(fx.book.id).await.unwrap();
        assert_eq!(book.status, BookStatus::Illustrating);
        assert_eq!(fx.queue.illustrations().len(), 1);

        let outcome = fx.stage.run(&fx.job, 2).await.unwrap();

        assert_eq!(outcome.pages_written, 0);
        assert_eq!(outcome.illustrations_dispatched, 3);
        let mut dispatched: Vec<Uuid> = fx.queue.illustrations().iter().map(|j| j.page_id).collect();
        dispatched.sort();
        dispatched.dedup();
        let mut expected: Vec<Uuid> = fx.pages[1..].iter().map(|p| p.id).collect();
        expected.sort();
        assert_eq!(dispatched, expected);
    }

    #[tokio::test]
    async fn first_delivery_on_illustrating_book_is_rejected() {
        let fx = StoryFixture::new(3, draft(&[1, 2]));
        fx.books.force_status(fx.book.id, BookStatus::Illustrating);
        assert_matches!(
            fx.stage.run(&fx.job, 1).await,
            Err(PortError::InvalidState(_))
        );
        assert!(fx.queue.illustrations().is_empty());
    }

    #[tokio::test]
    async fn completed_book_needs_explicit_regeneration() {
        let fx = StoryFixture::new(3, draft(&[1, 2]));
        fx.books.force_status(fx.book.id, BookStatus::Completed);

        assert_matches!(
            fx.stage.run(&fx.job, 1).await,
            Err(PortError::InvalidState(_))
        );
        let book = fx.books.get_book(fx.book.id).await.unwrap();
        assert_eq!(book.status, BookStatus::Completed);

        let regenerate = StoryGenerationJob {
            regenerate: true,
            ..fx.job.clone()
        };
        assert!(fx.stage.run(&regenerate, 1).await.is_ok());
    }

    #[tokio::test]
    async fn generating_book_rejects_concurrent_first_delivery() {
        let fx = StoryFixture::new(3, draft(&[1, 2]));
        fx.books.force_status(fx.book.id, BookStatus::Generating);
        assert_matches!(
            fx.stage.run(&fx.job, 1).await,
            Err(PortError::InvalidState(_))
        );
    }

    #[tokio::test]
    async fn story_job_for_other_user_is_rejected() {
        let fx = StoryFixture::new(3, draft(&[1, 2]));
        let job = StoryGenerationJob {
            user_id: Uuid::new_v4(),
            ..story_job(&fx.book, &fx.pages)
        };
        assert_matches!(fx.stage.run(&job, 1).await, Err(PortError::Unauthorized));
    }
}
