//! crates/storyforge_core/src/stages/dispatch.rs
//!
//! Illustration fan-out. The expected page set is recorded durably before
//! any child job is enqueued, so finalization can always tell which pages it
//! is waiting for.

use crate::domain::{Book, BookStatus, ModerationStatus, Page};
use crate::jobs::IllustrationGenerationJob;
use crate::ports::{BookRepository, JobQueue, PortError, PortResult};
use crate::status::StatusService;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct IllustrationDispatcher {
    books: Arc<dyn BookRepository>,
    queue: Arc<dyn JobQueue>,
    status: StatusService,
}

pub fn illustration_job(book: &Book, page: &Page) -> PortResult<IllustrationGenerationJob> {
    let art_style = book
        .art_style
        .ok_or_else(|| PortError::InvalidState(format!("book {} has no art style", book.id)))?;
    Ok(IllustrationGenerationJob {
        book_id: book.id,
        page_id: page.id,
        user_id: book.user_id,
        page_number: page.page_number,
        art_style,
        is_winkify_enabled: book.is_winkify_enabled,
        illustration_notes: page.illustration_notes.clone(),
        is_title_page: page.is_title_page,
        book_title: book.title.clone(),
        text: page.text.clone(),
    })
}

impl IllustrationDispatcher {
    pub fn new(books: Arc<dyn BookRepository>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            books,
            queue,
            status: StatusService::new(),
        }
    }

    /// Fans out one job per story page of a STORY_READY book.
    pub async fn dispatch_all(&self, book_id: Uuid) -> PortResult<usize> {
        let book = self.books.get_book(book_id).await?;
        let pages = self.books.get_pages(book_id).await?;
        let targets: Vec<Page> = pages.into_iter().filter(|p| !p.is_title_page).collect();
        self.fan_out(&book, targets, BookStatus::StoryReady).await
    }

    /// Re-dispatches only the FLAGGED and FAILED pages of a PARTIAL book.
    pub async fn retry_failed(&self, book_id: Uuid, user_id: Uuid) -> PortResult<usize> {
        let book = self.books.get_book(book_id).await?;
        if book.user_id != user_id {
            return Err(PortError::Unauthorized);
        }
        let pages = self.books.get_pages(book_id).await?;
        let targets: Vec<Page> = pages
            .into_iter()
            .filter(|p| {
                !p.is_title_page
                    && matches!(
                        p.moderation_status,
                        ModerationStatus::Flagged | ModerationStatus::Failed
                    )
            })
            .collect();
        if targets.is_empty() {
            return Err(PortError::InvalidState(format!(
                "book {} has no failed pages to retry",
                book_id
            )));
        }
        self.fan_out(&book, targets, BookStatus::Partial).await
    }

    /// Re-enqueues the batch pages of an ILLUSTRATING book that still have no
    /// outcome. Used when a fan-out was cut short after the status moved.
    pub async fn resume_pending(&self, book_id: Uuid) -> PortResult<usize> {
        let book = self.books.get_book(book_id).await?;
        if book.status != BookStatus::Illustrating {
            return Err(PortError::InvalidState(format!(
                "book {} is {} but resuming illustration needs ILLUSTRATING",
                book.id, book.status
            )));
        }
        let batch = self
            .books
            .get_illustration_batch(book_id)
            .await?
            .ok_or_else(|| {
                PortError::InvalidState(format!("book {} has no illustration batch", book_id))
            })?;

        let pages = self.books.get_pages(book_id).await?;
        let jobs = pages
            .iter()
            .filter(|p| {
                batch.page_ids.contains(&p.id) && p.moderation_status == ModerationStatus::Pending
            })
            .map(|page| illustration_job(&book, page))
            .collect::<PortResult<Vec<_>>>()?;
        for job in &jobs {
            crate::jobs::validate_job(job)?;
        }

        let count = jobs.len();
        for job in jobs {
            self.queue.enqueue_illustration(job).await?;
        }
        info!(%book_id, pages = count, "pending illustration jobs re-dispatched");
        Ok(count)
    }

    async fn fan_out(&self, book: &Book, targets: Vec<Page>, from: BookStatus) -> PortResult<usize> {
        if book.status != from {
            return Err(PortError::InvalidState(format!(
                "book {} is {} but illustration dispatch needs {}",
                book.id, book.status, from
            )));
        }
        self.status
            .check_book_transition(from, BookStatus::Illustrating)?;

        // Build every payload first so a bad page fails before anything is written.
        let jobs = targets
            .iter()
            .map(|page| illustration_job(book, page))
            .collect::<PortResult<Vec<_>>>()?;
        for job in &jobs {
            crate::jobs::validate_job(job)?;
        }

        let page_ids: Vec<Uuid> = targets.iter().map(|p| p.id).collect();
        self.books
            .record_illustration_batch(book.id, &page_ids)
            .await?;
        let moved = self
            .books
            .transition_book_status(book.id, &[from], BookStatus::Illustrating)
            .await?;
        if !moved {
            return Err(PortError::InvalidState(format!(
                "book {} changed status during illustration dispatch",
                book.id
            )));
        }

        for job in jobs {
            self.queue.enqueue_illustration(job).await?;
        }
        info!(book_id = %book.id, pages = page_ids.len(), "illustration jobs dispatched");
        Ok(page_ids.len())
    }
}
