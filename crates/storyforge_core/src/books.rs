//! crates/storyforge_core/src/books.rs
//!
//! Book-level requests from the HTTP surface: queue a story, poll progress,
//! retry failed pages, reset a failed book.

use crate::domain::{Book, BookStatus, Page};
use crate::jobs::{validate_job, PromptContext, StoryGenerationJob, StoryPageRef};
use crate::ports::{BookRepository, JobQueue, PortError, PortResult};
use crate::stages::dispatch::IllustrationDispatcher;
use crate::status::{Progress, StatusService};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Builds the story payload for a book from its stored rows.
pub fn story_job_for(book: &Book, pages: &[Page], regenerate: bool) -> PortResult<StoryGenerationJob> {
    let art_style = book
        .art_style
        .ok_or_else(|| PortError::Validation(format!("book {} has no art style", book.id)))?;

    let mut story_pages = Vec::new();
    for page in pages.iter().filter(|p| !p.is_title_page) {
        let original_image_url = page.original_image_url.clone().ok_or_else(|| {
            PortError::Validation(format!("page {} has no uploaded photo", page.id))
        })?;
        story_pages.push(StoryPageRef {
            page_id: page.id,
            page_number: page.page_number,
            asset_id: page.asset_id,
            original_image_url,
        });
    }

    let job = StoryGenerationJob {
        user_id: book.user_id,
        book_id: book.id,
        prompt_context: PromptContext {
            book_title: book.title.clone(),
            child_name: book.child_name.clone(),
            art_style,
        },
        story_pages,
        is_winkify_enabled: book.is_winkify_enabled,
        regenerate,
    };
    validate_job(&job)?;
    Ok(job)
}

#[derive(Clone)]
pub struct BookService {
    books: Arc<dyn BookRepository>,
    queue: Arc<dyn JobQueue>,
    dispatcher: IllustrationDispatcher,
    status: StatusService,
}

impl BookService {
    pub fn new(books: Arc<dyn BookRepository>, queue: Arc<dyn JobQueue>) -> Self {
        let dispatcher = IllustrationDispatcher::new(books.clone(), queue.clone());
        Self {
            books,
            queue,
            dispatcher,
            status: StatusService::new(),
        }
    }

    async fn owned_book(&self, book_id: Uuid, user_id: Uuid) -> PortResult<Book> {
        let book = self.books.get_book(book_id).await?;
        if book.user_id != user_id {
            return Err(PortError::Unauthorized);
        }
        Ok(book)
    }

    /// Queues story generation. Regeneration of an already generated book
    /// must be asked for explicitly and confirmed.
    pub async fn request_story(
        &self,
        book_id: Uuid,
        user_id: Uuid,
        regenerate: bool,
        confirmed: bool,
    ) -> PortResult<StoryGenerationJob> {
        let book = self.owned_book(book_id, user_id).await?;

        let allowed = if regenerate {
            if !confirmed {
                return Err(PortError::Validation(
                    "regenerating a story replaces every page; confirmation is required".into(),
                ));
            }
            self.status.regeneration_start_states()
        } else {
            self.status.generation_start_states()
        };
        if !allowed.contains(&book.status) {
            return Err(PortError::InvalidState(format!(
                "book {} is {} and cannot start story generation",
                book_id, book.status
            )));
        }

        let pages = self.books.get_pages(book_id).await?;
        let job = story_job_for(&book, &pages, regenerate)?;
        self.queue.enqueue_story(job.clone()).await?;
        info!(%book_id, regenerate, pages = job.story_pages.len(), "story generation queued");
        Ok(job)
    }

    pub async fn progress(&self, book_id: Uuid, user_id: Uuid) -> PortResult<Progress> {
        let book = self.owned_book(book_id, user_id).await?;
        let pages = self.books.get_pages(book_id).await?;
        Ok(self.status.book_progress(book.status, &pages))
    }

    /// Re-illustrates only the FLAGGED and FAILED pages of a PARTIAL book.
    pub async fn retry_failed_pages(&self, book_id: Uuid, user_id: Uuid) -> PortResult<usize> {
        self.dispatcher.retry_failed(book_id, user_id).await
    }

    /// FAILED -> DRAFT, so the owner can edit and start over.
    pub async fn reset(&self, book_id: Uuid, user_id: Uuid) -> PortResult<()> {
        let book = self.owned_book(book_id, user_id).await?;
        self.status
            .check_book_transition(book.status, BookStatus::Draft)?;
        let moved = self
            .books
            .transition_book_status(book_id, &[BookStatus::Failed], BookStatus::Draft)
            .await?;
        if !moved {
            return Err(PortError::InvalidState(format!(
                "book {} changed status before it could be reset",
                book_id
            )));
        }
        info!(%book_id, "book reset to draft");
        Ok(())
    }
}
