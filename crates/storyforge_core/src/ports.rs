//! crates/storyforge_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the pipeline's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use crate::domain::{
    ArtStyle, Book, BookStatus, FulfillmentStep, IllustrationBatch, ModerationStatus, NewPrintOrder,
    Page, PagePlacement, PageTextUpdate, PrintCostQuote, PrintOrder, PrintOrderStatus,
    PrintSubmission, ProviderJobStatus, ShippingAddress, ShippingLevel, ShippingOption,
};
use crate::jobs::{
    BookFinalizationJob, IllustrationGenerationJob, PrintFulfillmentJob, StoryGenerationJob,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

impl PortError {
    /// Validation and state errors never succeed on a retry of the same input.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::Validation(_) | Self::InvalidState(_) | Self::Unauthorized
        )
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Ports
//=========================================================================================

#[async_trait]
pub trait BookRepository: Send + Sync {
    async fn get_book(&self, book_id: Uuid) -> PortResult<Book>;

    /// All pages of a book ordered by `index`.
    async fn get_pages(&self, book_id: Uuid) -> PortResult<Vec<Page>>;

    async fn get_page(&self, page_id: Uuid) -> PortResult<Page>;

    /// Moves the book to `to` only if its current status is one of `from`.
    /// Returns `false` (and writes nothing) when the guard does not match.
    async fn transition_book_status(
        &self,
        book_id: Uuid,
        from: &[BookStatus],
        to: BookStatus,
    ) -> PortResult<bool>;

    /// Writes every page's story text in one transaction.
    async fn save_page_texts(&self, book_id: Uuid, updates: &[PageTextUpdate]) -> PortResult<()>;

    async fn mark_page_illustrated(&self, page_id: Uuid, image_url: &str) -> PortResult<()>;

    async fn mark_page_moderation(
        &self,
        page_id: Uuid,
        status: ModerationStatus,
        reason: Option<&str>,
    ) -> PortResult<()>;

    /// Replaces the book's expected illustration set and resets those pages to
    /// PENDING with no generated image, atomically.
    async fn record_illustration_batch(
        &self,
        book_id: Uuid,
        page_ids: &[Uuid],
    ) -> PortResult<IllustrationBatch>;

    async fn get_illustration_batch(&self, book_id: Uuid) -> PortResult<Option<IllustrationBatch>>;

    /// Applies a complete page layout in one transaction: deletes `removed`,
    /// rewrites index/number/title flag for every placement and sets
    /// `page_length` to the number of placements.
    async fn apply_page_layout(
        &self,
        book_id: Uuid,
        placements: &[PagePlacement],
        removed: &[Uuid],
    ) -> PortResult<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create_order(&self, order: NewPrintOrder) -> PortResult<PrintOrder>;

    async fn get_order(&self, order_id: Uuid) -> PortResult<PrintOrder>;

    /// Guarded status write, mirroring `BookRepository::transition_book_status`.
    async fn transition_order_status(
        &self,
        order_id: Uuid,
        from: &[PrintOrderStatus],
        to: PrintOrderStatus,
    ) -> PortResult<bool>;

    async fn set_progress_step(&self, order_id: Uuid, step: FulfillmentStep) -> PortResult<()>;

    async fn save_document_urls(
        &self,
        order_id: Uuid,
        interior_pdf_url: &str,
        cover_pdf_url: &str,
    ) -> PortResult<()>;

    /// Stores the provider job id, sets SUBMITTED_TO_LULU and the submission time.
    async fn mark_submitted(
        &self,
        order_id: Uuid,
        provider_job_id: &str,
        submitted_at: DateTime<Utc>,
    ) -> PortResult<()>;

    async fn save_provider_status(&self, order_id: Uuid, provider_status: &str) -> PortResult<()>;
}

//=========================================================================================
// AI Service Ports
//=========================================================================================

/// One page image handed to the story model, keyed by 1-based story position.
#[derive(Debug, Clone)]
pub struct StoryPromptPage {
    pub position: u32,
    pub image_url: String,
}

#[derive(Debug, Clone)]
pub struct StoryRequest {
    pub book_title: String,
    pub child_name: String,
    pub art_style: ArtStyle,
    pub is_winkify_enabled: bool,
    pub pages: Vec<StoryPromptPage>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftPage {
    pub position: u32,
    pub text: String,
    pub illustration_notes: Option<String>,
}

/// The model's structured answer. Positions may be missing or duplicated;
/// the story stage reconciles them.
#[derive(Debug, Clone, Default)]
pub struct StoryDraft {
    pub pages: Vec<DraftPage>,
}

#[async_trait]
pub trait StoryWriter: Send + Sync {
    /// Writes text and illustration notes for every story page in one model call.
    async fn write_story(&self, request: &StoryRequest) -> PortResult<StoryDraft>;
}

#[derive(Debug, Clone)]
pub struct IllustrationRequest {
    pub prompt: String,
    pub source_image: Bytes,
    pub style_reference: Bytes,
}

/// A declined generation is an answer, not an error.
#[derive(Debug, Clone)]
pub enum ImageGeneration {
    Image(Bytes),
    Declined { reason: String },
}

#[async_trait]
pub trait Illustrator: Send + Sync {
    async fn illustrate(&self, request: IllustrationRequest) -> PortResult<ImageGeneration>;
}

//=========================================================================================
// Storage Ports
//=========================================================================================

#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Downloads an image or document by URL.
    async fn fetch(&self, url: &str) -> PortResult<Bytes>;

    /// Writes `bytes` at `key`, overwriting any existing object, and returns its durable URL.
    async fn put_object(&self, key: &str, bytes: Bytes, content_type: &str) -> PortResult<String>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Uploads a document at `path` (overwrite) and returns a directly
    /// fetchable download URL for it.
    async fn publish_document(&self, path: &str, bytes: Bytes) -> PortResult<String>;
}

//=========================================================================================
// Print Ports
//=========================================================================================

#[derive(Debug, Clone)]
pub struct CostRequest {
    pub page_count: u32,
    pub quantity: u32,
    pub shipping_address: ShippingAddress,
    pub shipping_level: ShippingLevel,
}

#[async_trait]
pub trait PrintProvider: Send + Sync {
    async fn quote(&self, request: &CostRequest) -> PortResult<PrintCostQuote>;

    async fn shipping_options(&self, request: &CostRequest) -> PortResult<Vec<ShippingOption>>;

    /// Creates a print job and returns the provider's job id.
    async fn submit_print_job(&self, submission: &PrintSubmission) -> PortResult<String>;

    async fn get_print_job(&self, job_id: &str) -> PortResult<ProviderJobStatus>;

    async fn cancel_print_job(&self, job_id: &str) -> PortResult<()>;
}

#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render_interior(&self, book: &Book, pages: &[Page]) -> PortResult<Bytes>;

    async fn render_cover(&self, book: &Book, pages: &[Page]) -> PortResult<Bytes>;
}

//=========================================================================================
// Job Queue Port
//=========================================================================================

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue_story(&self, job: StoryGenerationJob) -> PortResult<()>;

    async fn enqueue_illustration(&self, job: IllustrationGenerationJob) -> PortResult<()>;

    async fn enqueue_finalization(&self, job: BookFinalizationJob) -> PortResult<()>;

    async fn enqueue_fulfillment(&self, job: PrintFulfillmentJob) -> PortResult<()>;
}
