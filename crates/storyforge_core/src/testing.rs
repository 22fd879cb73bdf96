//! crates/storyforge_core/src/testing.rs
//!
//! In-memory fakes for every port, plus seeded books and ready-made stage
//! fixtures shared by the unit tests.

use crate::books::story_job_for;
use crate::domain::*;
use crate::jobs::*;
use crate::layout::GlyphMetrics;
use crate::orders::{OrderRequest, OrderService};
use crate::ports::*;
use crate::stages::dispatch::{illustration_job, IllustrationDispatcher};
use crate::stages::{FulfillmentStage, IllustrationStage, StoryStage, StyleReferences};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

//=========================================================================================
// Seed Data
//=========================================================================================

pub fn photo_url(book_id: Uuid, index: u32) -> String {
    format!("https://uploads.test/{}/photo_{}.jpg", book_id, index)
}

fn blank_page(book_id: Uuid, index: u32) -> Page {
    Page {
        id: Uuid::new_v4(),
        book_id,
        index,
        page_number: index + 1,
        is_title_page: index == 0,
        asset_id: Some(Uuid::new_v4()),
        original_image_url: Some(photo_url(book_id, index)),
        text: None,
        text_confirmed: false,
        illustration_notes: None,
        generated_image_url: None,
        moderation_status: ModerationStatus::Pending,
        moderation_reason: None,
    }
}

/// A story page at `index` with text already written.
pub fn story_page(book_id: Uuid, index: u32) -> Page {
    let mut page = blank_page(book_id, index);
    page.is_title_page = false;
    page.text = Some(format!("Page {} of the adventure.", index + 1));
    page.text_confirmed = true;
    page
}

/// A DRAFT book with `total_pages` pages: a title page followed by story pages.
pub fn seeded_book(total_pages: usize) -> (Book, Vec<Page>) {
    let book = Book {
        id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        title: "Mia and the Lighthouse".into(),
        child_name: "Mia".into(),
        art_style: Some(ArtStyle::Watercolor),
        is_winkify_enabled: false,
        status: BookStatus::Draft,
        page_length: total_pages as u32,
        cover_asset_id: None,
    };
    let pages = (0..total_pages as u32)
        .map(|i| {
            if i == 0 {
                blank_page(book.id, 0)
            } else {
                story_page(book.id, i)
            }
        })
        .collect();
    (book, pages)
}

pub fn story_job(book: &Book, pages: &[Page]) -> StoryGenerationJob {
    story_job_for(book, pages, false).unwrap()
}

pub fn shipping_address() -> ShippingAddress {
    ShippingAddress {
        name: "Ada Parent".into(),
        street1: "1 Harbour Road".into(),
        street2: None,
        city: "Portland".into(),
        state_code: Some("ME".into()),
        postcode: "04101".into(),
        country_code: "US".into(),
        phone_number: "2075550100".into(),
    }
}

pub fn order_request(book_id: Uuid) -> OrderRequest {
    OrderRequest {
        book_id,
        quantity: 2,
        shipping_address: shipping_address(),
        contact_email: "parent@example.com".into(),
        shipping_level: ShippingLevel::Ground,
    }
}

/// Every glyph advances `self.0 * size` points.
pub struct FixedAdvance(pub f32);

impl GlyphMetrics for FixedAdvance {
    fn advance(&self, _c: char, size: f32) -> f32 {
        self.0 * size
    }
}

//=========================================================================================
// Repositories
//=========================================================================================

#[derive(Default)]
struct BookState {
    books: HashMap<Uuid, Book>,
    pages: HashMap<Uuid, Page>,
    batches: HashMap<Uuid, IllustrationBatch>,
    lost_text_writes: Vec<Uuid>,
}

#[derive(Default)]
pub struct InMemoryBooks {
    state: Mutex<BookState>,
}

impl InMemoryBooks {
    pub fn with_book(book: Book, pages: Vec<Page>) -> Self {
        let store = Self::default();
        {
            let mut state = store.state.lock().unwrap();
            for page in pages {
                state.pages.insert(page.id, page);
            }
            state.books.insert(book.id, book);
        }
        store
    }

    pub fn force_status(&self, book_id: Uuid, status: BookStatus) {
        let mut state = self.state.lock().unwrap();
        state.books.get_mut(&book_id).unwrap().status = status;
    }

    pub fn clear_page_text(&self, page_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        let page = state.pages.get_mut(&page_id).unwrap();
        page.text = None;
        page.text_confirmed = false;
    }

    /// The next text write for `page_id` reports success but stores nothing.
    pub fn lose_text_write(&self, page_id: Uuid) {
        self.state.lock().unwrap().lost_text_writes.push(page_id);
    }

    pub fn seed_batch(&self, book_id: Uuid, page_ids: Vec<Uuid>) {
        let mut state = self.state.lock().unwrap();
        state.batches.insert(
            book_id,
            IllustrationBatch {
                book_id,
                page_ids,
                dispatched_at: Utc::now(),
            },
        );
    }
}

fn missing(what: &str, id: Uuid) -> PortError {
    PortError::NotFound(format!("{} {}", what, id))
}

#[async_trait]
impl BookRepository for InMemoryBooks {
    async fn get_book(&self, book_id: Uuid) -> PortResult<Book> {
        let state = self.state.lock().unwrap();
        state.books.get(&book_id).cloned().ok_or_else(|| missing("book", book_id))
    }

    async fn get_pages(&self, book_id: Uuid) -> PortResult<Vec<Page>> {
        let state = self.state.lock().unwrap();
        let mut pages: Vec<Page> = state
            .pages
            .values()
            .filter(|p| p.book_id == book_id)
            .cloned()
            .collect();
        pages.sort_by_key(|p| p.index);
        Ok(pages)
    }

    async fn get_page(&self, page_id: Uuid) -> PortResult<Page> {
        let state = self.state.lock().unwrap();
        state.pages.get(&page_id).cloned().ok_or_else(|| missing("page", page_id))
    }

    async fn transition_book_status(
        &self,
        book_id: Uuid,
        from: &[BookStatus],
        to: BookStatus,
    ) -> PortResult<bool> {
        let mut state = self.state.lock().unwrap();
        let book = state.books.get_mut(&book_id).ok_or_else(|| missing("book", book_id))?;
        if !from.contains(&book.status) {
            return Ok(false);
        }
        book.status = to;
        Ok(true)
    }

    async fn save_page_texts(&self, _book_id: Uuid, updates: &[PageTextUpdate]) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        for update in updates {
            if let Some(pos) = state.lost_text_writes.iter().position(|id| *id == update.page_id) {
                state.lost_text_writes.remove(pos);
                continue;
            }
            let page = state
                .pages
                .get_mut(&update.page_id)
                .ok_or_else(|| missing("page", update.page_id))?;
            page.text = Some(update.text.clone());
            page.illustration_notes = update.illustration_notes.clone();
            page.text_confirmed = update.text_confirmed;
        }
        Ok(())
    }

    async fn mark_page_illustrated(&self, page_id: Uuid, image_url: &str) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let page = state.pages.get_mut(&page_id).ok_or_else(|| missing("page", page_id))?;
        page.generated_image_url = Some(image_url.to_string());
        page.moderation_status = ModerationStatus::Ok;
        page.moderation_reason = None;
        Ok(())
    }

    async fn mark_page_moderation(
        &self,
        page_id: Uuid,
        status: ModerationStatus,
        reason: Option<&str>,
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let page = state.pages.get_mut(&page_id).ok_or_else(|| missing("page", page_id))?;
        page.moderation_status = status;
        page.moderation_reason = reason.map(str::to_string);
        Ok(())
    }

    async fn record_illustration_batch(
        &self,
        book_id: Uuid,
        page_ids: &[Uuid],
    ) -> PortResult<IllustrationBatch> {
        let mut state = self.state.lock().unwrap();
        for id in page_ids {
            let page = state.pages.get_mut(id).ok_or_else(|| missing("page", *id))?;
            page.moderation_status = ModerationStatus::Pending;
            page.moderation_reason = None;
            page.generated_image_url = None;
        }
        let batch = IllustrationBatch {
            book_id,
            page_ids: page_ids.to_vec(),
            dispatched_at: Utc::now(),
        };
        state.batches.insert(book_id, batch.clone());
        Ok(batch)
    }

    async fn get_illustration_batch(&self, book_id: Uuid) -> PortResult<Option<IllustrationBatch>> {
        Ok(self.state.lock().unwrap().batches.get(&book_id).cloned())
    }

    async fn apply_page_layout(
        &self,
        book_id: Uuid,
        placements: &[PagePlacement],
        removed: &[Uuid],
    ) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        for id in removed {
            state.pages.remove(id);
        }
        for placement in placements {
            let page = state
                .pages
                .get_mut(&placement.page_id)
                .ok_or_else(|| missing("page", placement.page_id))?;
            page.index = placement.index;
            page.page_number = placement.page_number;
            page.is_title_page = placement.is_title_page;
        }
        let book = state.books.get_mut(&book_id).ok_or_else(|| missing("book", book_id))?;
        book.page_length = placements.len() as u32;
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryOrders {
    orders: Mutex<HashMap<Uuid, PrintOrder>>,
}

impl InMemoryOrders {
    pub fn insert(&self, order: PrintOrder) {
        self.orders.lock().unwrap().insert(order.id, order);
    }

    pub fn force_status(&self, order_id: Uuid, status: PrintOrderStatus) {
        self.orders.lock().unwrap().get_mut(&order_id).unwrap().status = status;
    }

    pub fn set_provider_job(&self, order_id: Uuid, job_id: &str) {
        self.orders
            .lock()
            .unwrap()
            .get_mut(&order_id)
            .unwrap()
            .lulu_print_job_id = Some(job_id.to_string());
    }

    fn update<F>(&self, order_id: Uuid, apply: F) -> PortResult<()>
    where
        F: FnOnce(&mut PrintOrder),
    {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&order_id).ok_or_else(|| missing("order", order_id))?;
        apply(order);
        Ok(())
    }
}

pub fn print_order(new: NewPrintOrder) -> PrintOrder {
    PrintOrder {
        id: Uuid::new_v4(),
        book_id: new.book_id,
        user_id: new.user_id,
        status: new.status,
        quantity: new.quantity,
        page_count: new.page_count,
        shipping_address: new.shipping_address,
        contact_email: new.contact_email,
        shipping_level: new.shipping_level,
        interior_pdf_url: None,
        cover_pdf_url: None,
        lulu_print_job_id: None,
        submitted_at: None,
        provider_status: None,
        progress_step: None,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrders {
    async fn create_order(&self, order: NewPrintOrder) -> PortResult<PrintOrder> {
        let order = print_order(order);
        self.insert(order.clone());
        Ok(order)
    }

    async fn get_order(&self, order_id: Uuid) -> PortResult<PrintOrder> {
        self.orders
            .lock()
            .unwrap()
            .get(&order_id)
            .cloned()
            .ok_or_else(|| missing("order", order_id))
    }

    async fn transition_order_status(
        &self,
        order_id: Uuid,
        from: &[PrintOrderStatus],
        to: PrintOrderStatus,
    ) -> PortResult<bool> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&order_id).ok_or_else(|| missing("order", order_id))?;
        if !from.contains(&order.status) {
            return Ok(false);
        }
        order.status = to;
        Ok(true)
    }

    async fn set_progress_step(&self, order_id: Uuid, step: FulfillmentStep) -> PortResult<()> {
        self.update(order_id, |o| o.progress_step = Some(step))
    }

    async fn save_document_urls(
        &self,
        order_id: Uuid,
        interior_pdf_url: &str,
        cover_pdf_url: &str,
    ) -> PortResult<()> {
        self.update(order_id, |o| {
            o.interior_pdf_url = Some(interior_pdf_url.to_string());
            o.cover_pdf_url = Some(cover_pdf_url.to_string());
        })
    }

    async fn mark_submitted(
        &self,
        order_id: Uuid,
        provider_job_id: &str,
        submitted_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut orders = self.orders.lock().unwrap();
        let order = orders.get_mut(&order_id).ok_or_else(|| missing("order", order_id))?;
        if !matches!(
            order.status,
            PrintOrderStatus::PaymentCompleted | PrintOrderStatus::Failed
        ) {
            return Err(PortError::InvalidState(format!(
                "Print order {} is no longer awaiting submission",
                order_id
            )));
        }
        order.lulu_print_job_id = Some(provider_job_id.to_string());
        order.submitted_at = Some(submitted_at);
        order.status = PrintOrderStatus::SubmittedToLulu;
        Ok(())
    }

    async fn save_provider_status(&self, order_id: Uuid, provider_status: &str) -> PortResult<()> {
        self.update(order_id, |o| o.provider_status = Some(provider_status.to_string()))
    }
}

//=========================================================================================
// Queue
//=========================================================================================

#[derive(Default)]
pub struct RecordingQueue {
    stories: Mutex<Vec<StoryGenerationJob>>,
    illustrations: Mutex<Vec<IllustrationGenerationJob>>,
    finalizations: Mutex<Vec<BookFinalizationJob>>,
    fulfillments: Mutex<Vec<PrintFulfillmentJob>>,
    illustration_calls: Mutex<usize>,
    failing_illustration_call: Mutex<Option<usize>>,
}

impl RecordingQueue {
    /// Makes the `n`th illustration enqueue (1-based) fail like a dropped broker.
    pub fn fail_illustration_call(&self, n: usize) {
        *self.failing_illustration_call.lock().unwrap() = Some(n);
    }

    pub fn stories(&self) -> Vec<StoryGenerationJob> {
        self.stories.lock().unwrap().clone()
    }

    pub fn illustrations(&self) -> Vec<IllustrationGenerationJob> {
        self.illustrations.lock().unwrap().clone()
    }

    pub fn finalizations(&self) -> Vec<BookFinalizationJob> {
        self.finalizations.lock().unwrap().clone()
    }

    pub fn fulfillments(&self) -> Vec<PrintFulfillmentJob> {
        self.fulfillments.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobQueue for RecordingQueue {
    async fn enqueue_story(&self, job: StoryGenerationJob) -> PortResult<()> {
        self.stories.lock().unwrap().push(job);
        Ok(())
    }

    async fn enqueue_illustration(&self, job: IllustrationGenerationJob) -> PortResult<()> {
        let call = {
            let mut calls = self.illustration_calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if *self.failing_illustration_call.lock().unwrap() == Some(call) {
            return Err(PortError::Unexpected("broker connection reset".into()));
        }
        self.illustrations.lock().unwrap().push(job);
        Ok(())
    }

    async fn enqueue_finalization(&self, job: BookFinalizationJob) -> PortResult<()> {
        self.finalizations.lock().unwrap().push(job);
        Ok(())
    }

    async fn enqueue_fulfillment(&self, job: PrintFulfillmentJob) -> PortResult<()> {
        self.fulfillments.lock().unwrap().push(job);
        Ok(())
    }
}

//=========================================================================================
// AI Fakes
//=========================================================================================

/// Answers with the configured draft, or fails when none is set.
#[derive(Default)]
pub struct ScriptedWriter {
    draft: Mutex<Option<StoryDraft>>,
}

impl ScriptedWriter {
    pub fn set_draft(&self, draft: StoryDraft) {
        *self.draft.lock().unwrap() = Some(draft);
    }
}

#[async_trait]
impl StoryWriter for ScriptedWriter {
    async fn write_story(&self, _request: &StoryRequest) -> PortResult<StoryDraft> {
        self.draft
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| PortError::Unexpected("story model unavailable".into()))
    }
}

#[derive(Default)]
pub struct ScriptedIllustrator {
    results: Mutex<VecDeque<PortResult<ImageGeneration>>>,
    requests: Mutex<Vec<IllustrationRequest>>,
}

impl ScriptedIllustrator {
    pub fn push(&self, result: PortResult<ImageGeneration>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<IllustrationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Illustrator for ScriptedIllustrator {
    async fn illustrate(&self, request: IllustrationRequest) -> PortResult<ImageGeneration> {
        self.requests.lock().unwrap().push(request);
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PortError::Unexpected("no scripted image result".into())))
    }
}

//=========================================================================================
// Storage Fakes
//=========================================================================================

#[derive(Default)]
pub struct InMemoryAssets {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl InMemoryAssets {
    pub fn url_for(&self, key: &str) -> String {
        format!("https://assets.test/{}", key)
    }

    pub fn seed(&self, url: &str, bytes: Bytes) {
        self.objects.lock().unwrap().insert(url.to_string(), bytes);
    }
}

#[async_trait]
impl AssetStore for InMemoryAssets {
    async fn fetch(&self, url: &str) -> PortResult<Bytes> {
        self.objects
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("asset {}", url)))
    }

    async fn put_object(&self, key: &str, bytes: Bytes, _content_type: &str) -> PortResult<String> {
        let url = self.url_for(key);
        self.seed(&url, bytes);
        Ok(url)
    }
}

/// Records every upload attempt, including ones it was told to fail.
#[derive(Default)]
pub struct InMemoryDocuments {
    uploads: Mutex<Vec<(String, Bytes)>>,
    fail_next: AtomicBool,
}

impl InMemoryDocuments {
    pub fn url_for(&self, path: &str) -> String {
        format!("https://documents.test{}?raw=1", path)
    }

    pub fn uploads(&self) -> Vec<(String, Bytes)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn fail_next_upload(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocuments {
    async fn publish_document(&self, path: &str, bytes: Bytes) -> PortResult<String> {
        self.uploads.lock().unwrap().push((path.to_string(), bytes));
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unexpected("document store timed out".into()));
        }
        Ok(self.url_for(path))
    }
}

//=========================================================================================
// Print Fakes
//=========================================================================================

pub struct FakePrintProvider {
    submissions: Mutex<Vec<PrintSubmission>>,
    cancellations: Mutex<Vec<String>>,
    fail_cancel: AtomicBool,
    job_status: Mutex<String>,
    status_lookups: Mutex<Vec<String>>,
    on_submit: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl Default for FakePrintProvider {
    fn default() -> Self {
        Self {
            submissions: Mutex::new(Vec::new()),
            cancellations: Mutex::new(Vec::new()),
            fail_cancel: AtomicBool::new(false),
            job_status: Mutex::new("CREATED".into()),
            status_lookups: Mutex::new(Vec::new()),
            on_submit: Mutex::new(None),
        }
    }
}

impl FakePrintProvider {
    pub fn submissions(&self) -> Vec<PrintSubmission> {
        self.submissions.lock().unwrap().clone()
    }

    pub fn cancellations(&self) -> Vec<String> {
        self.cancellations.lock().unwrap().clone()
    }

    pub fn fail_cancellations(&self) {
        self.fail_cancel.store(true, Ordering::SeqCst);
    }

    pub fn set_job_status(&self, status: &str) {
        *self.job_status.lock().unwrap() = status.to_string();
    }

    /// Runs `hook` after each accepted submission, before the caller hears back.
    pub fn on_submit(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_submit.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn status_lookups(&self) -> Vec<String> {
        self.status_lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrintProvider for FakePrintProvider {
    async fn quote(&self, request: &CostRequest) -> PortResult<PrintCostQuote> {
        let line_items = 4.5 * request.quantity as f64;
        Ok(PrintCostQuote {
            line_item_cost_excl_tax: format!("{:.2}", line_items),
            shipping_cost_excl_tax: "5.99".into(),
            fulfillment_cost_excl_tax: "0.75".into(),
            total_tax: "0.00".into(),
            total_cost_excl_tax: format!("{:.2}", line_items + 6.74),
            total_cost_incl_tax: format!("{:.2}", line_items + 6.74),
            currency: "USD".into(),
        })
    }

    async fn shipping_options(&self, _request: &CostRequest) -> PortResult<Vec<ShippingOption>> {
        Ok(vec![ShippingOption {
            level: "GROUND".into(),
            cost_excl_tax: "5.99".into(),
            currency: "USD".into(),
            min_delivery_date: None,
            max_delivery_date: None,
        }])
    }

    async fn submit_print_job(&self, submission: &PrintSubmission) -> PortResult<String> {
        let job_id = {
            let mut submissions = self.submissions.lock().unwrap();
            submissions.push(submission.clone());
            format!("{}", 9000 + submissions.len())
        };
        if let Some(hook) = self.on_submit.lock().unwrap().as_ref() {
            hook();
        }
        Ok(job_id)
    }

    async fn get_print_job(&self, job_id: &str) -> PortResult<ProviderJobStatus> {
        self.status_lookups.lock().unwrap().push(job_id.to_string());
        Ok(ProviderJobStatus {
            job_id: job_id.to_string(),
            status: self.job_status.lock().unwrap().clone(),
            message: None,
        })
    }

    async fn cancel_print_job(&self, job_id: &str) -> PortResult<()> {
        self.cancellations.lock().unwrap().push(job_id.to_string());
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("provider refused cancel".into()));
        }
        Ok(())
    }
}

/// Renders a textual digest of its inputs; identical inputs give identical bytes.
pub struct DigestRenderer;

impl DigestRenderer {
    fn digest(kind: &str, book: &Book, pages: &[Page]) -> Bytes {
        let mut ordered: Vec<&Page> = pages.iter().collect();
        ordered.sort_by_key(|p| p.index);
        let mut out = format!("{}|{}|{}", kind, book.id, book.title);
        for page in ordered {
            out.push_str(&format!(
                "|{}:{}:{}",
                page.index,
                page.text.as_deref().unwrap_or(""),
                page.display_image_url().unwrap_or("")
            ));
        }
        Bytes::from(out)
    }
}

#[async_trait]
impl PageRenderer for DigestRenderer {
    async fn render_interior(&self, book: &Book, pages: &[Page]) -> PortResult<Bytes> {
        Ok(Self::digest("interior", book, pages))
    }

    async fn render_cover(&self, book: &Book, pages: &[Page]) -> PortResult<Bytes> {
        Ok(Self::digest("cover", book, pages))
    }
}

//=========================================================================================
// Stage Fixtures
//=========================================================================================

pub struct StoryFixture {
    pub stage: StoryStage,
    pub job: StoryGenerationJob,
    pub book: Book,
    pub pages: Vec<Page>,
    pub books: Arc<InMemoryBooks>,
    pub queue: Arc<RecordingQueue>,
    pub writer: Arc<ScriptedWriter>,
}

impl StoryFixture {
    pub fn new(total_pages: usize, draft: StoryDraft) -> Self {
        let fx = Self::failing(total_pages);
        fx.writer.set_draft(draft);
        fx
    }

    /// A fixture whose writer errors until a draft is set.
    pub fn failing(total_pages: usize) -> Self {
        let (book, pages) = seeded_book(total_pages);
        let books = Arc::new(InMemoryBooks::with_book(book.clone(), pages.clone()));
        let queue = Arc::new(RecordingQueue::default());
        let writer = Arc::new(ScriptedWriter::default());
        let dispatcher = IllustrationDispatcher::new(books.clone(), queue.clone());
        let stage = StoryStage::new(books.clone(), writer.clone(), dispatcher, RetryPolicy::story());
        Self {
            stage,
            job: story_job(&book, &pages),
            book,
            pages,
            books,
            queue,
            writer,
        }
    }
}

pub struct IllustrationFixture {
    pub stage: IllustrationStage,
    pub job: IllustrationGenerationJob,
    pub books: Arc<InMemoryBooks>,
    pub assets: Arc<InMemoryAssets>,
    pub queue: Arc<RecordingQueue>,
    pub illustrator: Arc<ScriptedIllustrator>,
    style: Bytes,
}

impl IllustrationFixture {
    pub fn new() -> Self {
        Self::build(true)
    }

    pub fn without_style_reference() -> Self {
        Self::build(false)
    }

    pub fn style_bytes(&self) -> &[u8] {
        &self.style
    }

    fn build(with_style: bool) -> Self {
        let (mut book, pages) = seeded_book(3);
        book.status = BookStatus::Illustrating;
        let page = pages[1].clone();
        let books = Arc::new(InMemoryBooks::with_book(book.clone(), pages));
        let assets = Arc::new(InMemoryAssets::default());
        let queue = Arc::new(RecordingQueue::default());
        let illustrator = Arc::new(ScriptedIllustrator::default());
        let styles = StyleReferences::new("https://styles.test");
        let style = Bytes::from_static(b"watercolor-reference");

        if let Some(url) = page.original_image_url.as_deref() {
            assets.seed(url, Bytes::from_static(b"photo"));
        }
        if with_style {
            assets.seed(&styles.url_for(ArtStyle::Watercolor), style.clone());
        }

        let stage = IllustrationStage::new(
            books.clone(),
            illustrator.clone(),
            assets.clone(),
            queue.clone(),
            styles,
            RetryPolicy::illustration(),
        );
        Self {
            stage,
            job: illustration_job(&book, &page).unwrap(),
            books,
            assets,
            queue,
            illustrator,
            style,
        }
    }
}

pub struct FulfillmentFixture {
    pub stage: FulfillmentStage,
    pub job: PrintFulfillmentJob,
    pub order: PrintOrder,
    pub book: Book,
    pub orders: Arc<InMemoryOrders>,
    pub documents: Arc<InMemoryDocuments>,
    pub provider: Arc<FakePrintProvider>,
}

impl FulfillmentFixture {
    pub fn new(book_status: BookStatus, order_status: PrintOrderStatus) -> Self {
        let (mut book, mut pages) = seeded_book(4);
        book.status = book_status;
        for page in pages.iter_mut().skip(1) {
            page.moderation_status = ModerationStatus::Ok;
            page.generated_image_url = Some(format!("https://assets.test/generated/{}", page.index));
        }
        let books = Arc::new(InMemoryBooks::with_book(book.clone(), pages));
        let orders = Arc::new(InMemoryOrders::default());
        let documents = Arc::new(InMemoryDocuments::default());
        let provider = Arc::new(FakePrintProvider::default());

        let order = print_order(NewPrintOrder {
            book_id: book.id,
            user_id: book.user_id,
            status: order_status,
            quantity: 2,
            page_count: 7,
            shipping_address: shipping_address(),
            contact_email: "parent@example.com".into(),
            shipping_level: ShippingLevel::Ground,
        });
        orders.insert(order.clone());

        let stage = FulfillmentStage::new(
            books,
            orders.clone(),
            Arc::new(DigestRenderer),
            documents.clone(),
            provider.clone(),
            RetryPolicy::fulfillment(),
        );
        Self {
            stage,
            job: PrintFulfillmentJob {
                print_order_id: order.id,
                book_id: book.id,
                user_id: book.user_id,
            },
            order,
            book,
            orders,
            documents,
            provider,
        }
    }
}

pub struct OrderFixture {
    pub service: OrderService,
    pub book: Book,
    pub orders: Arc<InMemoryOrders>,
    pub provider: Arc<FakePrintProvider>,
    pub queue: Arc<RecordingQueue>,
    pub max_quantity: u32,
}

impl OrderFixture {
    pub fn new(book_status: BookStatus, total_pages: usize) -> Self {
        let (mut book, pages) = seeded_book(total_pages);
        book.status = book_status;
        let books = Arc::new(InMemoryBooks::with_book(book.clone(), pages));
        let orders = Arc::new(InMemoryOrders::default());
        let provider = Arc::new(FakePrintProvider::default());
        let queue = Arc::new(RecordingQueue::default());
        let max_quantity = 10;
        let service = OrderService::new(
            books,
            orders.clone(),
            provider.clone(),
            queue.clone(),
            max_quantity,
        );
        Self {
            service,
            book,
            orders,
            provider,
            queue,
            max_quantity,
        }
    }
}
