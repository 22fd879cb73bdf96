//! crates/storyforge_core/src/stages/finalize.rs
//!
//! Book finalization. Runs after any illustration job settles and recomputes
//! the book status from persisted page outcomes only, so redeliveries and
//! out-of-order completions all converge on the same answer.

use crate::domain::{BookStatus, ModerationStatus};
use crate::jobs::BookFinalizationJob;
use crate::ports::{BookRepository, PortResult};
use crate::status::{Rollup, StatusService};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// Pages of the current batch are still pending.
    Waiting { remaining: usize },
    /// The book moved to this terminal status.
    Finalized(BookStatus),
    /// Nothing to write; the book is left as it is.
    Unchanged(BookStatus),
}

#[derive(Clone)]
pub struct FinalizationStage {
    books: Arc<dyn BookRepository>,
    status: StatusService,
}

impl FinalizationStage {
    pub fn new(books: Arc<dyn BookRepository>) -> Self {
        Self {
            books,
            status: StatusService::new(),
        }
    }

    pub async fn run(&self, job: &BookFinalizationJob) -> PortResult<FinalizeOutcome> {
        let book = self.books.get_book(job.book_id).await?;
        let pages = self.books.get_pages(job.book_id).await?;

        if let Some(batch) = self.books.get_illustration_batch(job.book_id).await? {
            let remaining = pages
                .iter()
                .filter(|p| {
                    batch.page_ids.contains(&p.id) && p.moderation_status == ModerationStatus::Pending
                })
                .count();
            if remaining > 0 {
                info!(book_id = %job.book_id, remaining, "illustrations still running");
                return Ok(FinalizeOutcome::Waiting { remaining });
            }
        }

        let outcomes = pages
            .iter()
            .filter(|p| !p.is_title_page)
            .map(|p| p.moderation_status);
        let target = match self.status.rollup(outcomes) {
            Rollup::Pending { remaining } => return Ok(FinalizeOutcome::Waiting { remaining }),
            Rollup::Settled(target) => target,
        };

        if book.status == target {
            return Ok(FinalizeOutcome::Unchanged(target));
        }
        if !self.status.can_transition_book(book.status, target) {
            warn!(
                book_id = %job.book_id,
                current = %book.status,
                computed = %target,
                "stale finalization ignored"
            );
            return Ok(FinalizeOutcome::Unchanged(book.status));
        }

        let moved = self
            .books
            .transition_book_status(job.book_id, &[book.status], target)
            .await?;
        if moved {
            info!(book_id = %job.book_id, status = %target, "book finalized");
            Ok(FinalizeOutcome::Finalized(target))
        } else {
            // Another delivery got there first; report what is stored now.
            let current = self.books.get_book(job.book_id).await?.status;
            Ok(FinalizeOutcome::Unchanged(current))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{seeded_book, InMemoryBooks};
    use uuid::Uuid;

    async fn illustrating_book(outcomes: &[ModerationStatus]) -> (Arc<InMemoryBooks>, Uuid) {
        let (mut book, mut pages) = seeded_book(outcomes.len() + 1);
        book.status = BookStatus::Illustrating;
        let batch: Vec<Uuid> = pages[1..].iter().map(|p| p.id).collect();
        for (page, outcome) in pages[1..].iter_mut().zip(outcomes) {
            page.moderation_status = *outcome;
        }
        let books = Arc::new(InMemoryBooks::with_book(book.clone(), pages));
        books.seed_batch(book.id, batch);
        (books, book.id)
    }

    #[tokio::test]
    async fn waits_while_batch_pages_pending() {
        let (books, book_id) =
            illustrating_book(&[ModerationStatus::Ok, ModerationStatus::Pending]).await;
        let stage = FinalizationStage::new(books.clone());

        let outcome = stage.run(&BookFinalizationJob { book_id }).await.unwrap();

        assert_eq!(outcome, FinalizeOutcome::Waiting { remaining: 1 });
        assert_eq!(
            books.get_book(book_id).await.unwrap().status,
            BookStatus::Illustrating
        );
    }

    #[tokio::test]
    async fn mixed_outcomes_finalize_partial_and_rerun_is_stable() {
        let (books, book_id) = illustrating_book(&[
            ModerationStatus::Ok,
            ModerationStatus::Flagged,
            ModerationStatus::Ok,
        ])
        .await;
        let stage = FinalizationStage::new(books.clone());
        let job = BookFinalizationJob { book_id };

        let first = stage.run(&job).await.unwrap();
        let second = stage.run(&job).await.unwrap();

        assert_eq!(first, FinalizeOutcome::Finalized(BookStatus::Partial));
        assert_eq!(second, FinalizeOutcome::Unchanged(BookStatus::Partial));
        assert_eq!(
            books.get_book(book_id).await.unwrap().status,
            BookStatus::Partial
        );
    }

    #[tokio::test]
    async fn all_rejected_fails_the_book() {
        let (books, book_id) =
            illustrating_book(&[ModerationStatus::Failed, ModerationStatus::Flagged]).await;
        let stage = FinalizationStage::new(books.clone());
        let outcome = stage.run(&BookFinalizationJob { book_id }).await.unwrap();
        assert_eq!(outcome, FinalizeOutcome::Finalized(BookStatus::Failed));
    }

    #[tokio::test]
    async fn stale_delivery_does_not_override_terminal_status() {
        let (books, book_id) =
            illustrating_book(&[ModerationStatus::Ok, ModerationStatus::Flagged]).await;
        books.force_status(book_id, BookStatus::Completed);
        let stage = FinalizationStage::new(books.clone());

        let outcome = stage.run(&BookFinalizationJob { book_id }).await.unwrap();

        assert_eq!(outcome, FinalizeOutcome::Unchanged(BookStatus::Completed));
    }
}
