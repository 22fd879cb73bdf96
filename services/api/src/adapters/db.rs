//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `BookRepository` and `OrderRepository` ports from the `core` crate. It
//! handles all interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use storyforge_core::domain::{
    ArtStyle, Book, BookStatus, FulfillmentStep, IllustrationBatch, ModerationStatus,
    NewPrintOrder, Page, PagePlacement, PageTextUpdate, PrintOrder, PrintOrderStatus,
    ShippingAddress, ShippingLevel,
};
use storyforge_core::ports::{BookRepository, OrderRepository, PortError, PortResult};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the persistence ports.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or(what: &str, id: Uuid) -> impl FnOnce(sqlx::Error) -> PortError + '_ {
    move |e| match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} {} not found", what, id)),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn parse_column<T>(value: &str) -> PortResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| PortError::Unexpected(format!("corrupt row: {}", e)))
}

fn status_names<T: ToString>(statuses: &[T]) -> Vec<String> {
    statuses.iter().map(|s| s.to_string()).collect()
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const BOOK_COLUMNS: &str = "id, user_id, title, child_name, art_style, is_winkify_enabled, \
     status, page_length, cover_asset_id";

#[derive(FromRow)]
struct BookRecord {
    id: Uuid,
    user_id: Uuid,
    title: String,
    child_name: String,
    art_style: Option<String>,
    is_winkify_enabled: bool,
    status: String,
    page_length: i32,
    cover_asset_id: Option<Uuid>,
}
impl BookRecord {
    fn to_domain(self) -> PortResult<Book> {
        Ok(Book {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            child_name: self.child_name,
            art_style: self
                .art_style
                .as_deref()
                .map(parse_column::<ArtStyle>)
                .transpose()?,
            is_winkify_enabled: self.is_winkify_enabled,
            status: parse_column(&self.status)?,
            page_length: self.page_length.max(0) as u32,
            cover_asset_id: self.cover_asset_id,
        })
    }
}

const PAGE_COLUMNS: &str = "id, book_id, page_index, page_number, is_title_page, asset_id, \
     original_image_url, text, text_confirmed, illustration_notes, generated_image_url, \
     moderation_status, moderation_reason";

#[derive(FromRow)]
struct PageRecord {
    id: Uuid,
    book_id: Uuid,
    page_index: i32,
    page_number: i32,
    is_title_page: bool,
    asset_id: Option<Uuid>,
    original_image_url: Option<String>,
    text: Option<String>,
    text_confirmed: bool,
    illustration_notes: Option<String>,
    generated_image_url: Option<String>,
    moderation_status: String,
    moderation_reason: Option<String>,
}
impl PageRecord {
    fn to_domain(self) -> PortResult<Page> {
        Ok(Page {
            id: self.id,
            book_id: self.book_id,
            index: self.page_index.max(0) as u32,
            page_number: self.page_number.max(0) as u32,
            is_title_page: self.is_title_page,
            asset_id: self.asset_id,
            original_image_url: self.original_image_url,
            text: self.text,
            text_confirmed: self.text_confirmed,
            illustration_notes: self.illustration_notes,
            generated_image_url: self.generated_image_url,
            moderation_status: parse_column(&self.moderation_status)?,
            moderation_reason: self.moderation_reason,
        })
    }
}

#[derive(FromRow)]
struct BatchRecord {
    book_id: Uuid,
    page_ids: Vec<Uuid>,
    dispatched_at: DateTime<Utc>,
}
impl BatchRecord {
    fn to_domain(self) -> IllustrationBatch {
        IllustrationBatch {
            book_id: self.book_id,
            page_ids: self.page_ids,
            dispatched_at: self.dispatched_at,
        }
    }
}

const ORDER_COLUMNS: &str = "id, book_id, user_id, status, quantity, page_count, \
     shipping_address, contact_email, shipping_level, interior_pdf_url, cover_pdf_url, \
     lulu_print_job_id, submitted_at, provider_status, progress_step, created_at";

#[derive(FromRow)]
struct OrderRecord {
    id: Uuid,
    book_id: Uuid,
    user_id: Uuid,
    status: String,
    quantity: i32,
    page_count: i32,
    shipping_address: Json<ShippingAddress>,
    contact_email: String,
    shipping_level: String,
    interior_pdf_url: Option<String>,
    cover_pdf_url: Option<String>,
    lulu_print_job_id: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    provider_status: Option<String>,
    progress_step: Option<String>,
    created_at: DateTime<Utc>,
}
impl OrderRecord {
    fn to_domain(self) -> PortResult<PrintOrder> {
        Ok(PrintOrder {
            id: self.id,
            book_id: self.book_id,
            user_id: self.user_id,
            status: parse_column::<PrintOrderStatus>(&self.status)?,
            quantity: self.quantity.max(0) as u32,
            page_count: self.page_count.max(0) as u32,
            shipping_address: self.shipping_address.0,
            contact_email: self.contact_email,
            shipping_level: parse_column::<ShippingLevel>(&self.shipping_level)?,
            interior_pdf_url: self.interior_pdf_url,
            cover_pdf_url: self.cover_pdf_url,
            lulu_print_job_id: self.lulu_print_job_id,
            submitted_at: self.submitted_at,
            provider_status: self.provider_status,
            progress_step: self
                .progress_step
                .as_deref()
                .map(parse_column::<FulfillmentStep>)
                .transpose()?,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// `BookRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl BookRepository for DbAdapter {
    async fn get_book(&self, book_id: Uuid) -> PortResult<Book> {
        let record = sqlx::query_as::<_, BookRecord>(&format!(
            "SELECT {} FROM books WHERE id = $1",
            BOOK_COLUMNS
        ))
        .bind(book_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or("Book", book_id))?;
        record.to_domain()
    }

    async fn get_pages(&self, book_id: Uuid) -> PortResult<Vec<Page>> {
        let records = sqlx::query_as::<_, PageRecord>(&format!(
            "SELECT {} FROM pages WHERE book_id = $1 ORDER BY page_index ASC",
            PAGE_COLUMNS
        ))
        .bind(book_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(PageRecord::to_domain).collect()
    }

    async fn get_page(&self, page_id: Uuid) -> PortResult<Page> {
        let record = sqlx::query_as::<_, PageRecord>(&format!(
            "SELECT {} FROM pages WHERE id = $1",
            PAGE_COLUMNS
        ))
        .bind(page_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or("Page", page_id))?;
        record.to_domain()
    }

    async fn transition_book_status(
        &self,
        book_id: Uuid,
        from: &[BookStatus],
        to: BookStatus,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE books SET status = $1, updated_at = NOW() WHERE id = $2 AND status = ANY($3)",
        )
        .bind(to.as_str())
        .bind(book_id)
        .bind(status_names(from))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn save_page_texts(&self, book_id: Uuid, updates: &[PageTextUpdate]) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for update in updates {
            let result = sqlx::query(
                "UPDATE pages SET text = $1, illustration_notes = $2, text_confirmed = $3, \
                 updated_at = NOW() WHERE id = $4 AND book_id = $5",
            )
            .bind(&update.text)
            .bind(update.illustration_notes.as_deref())
            .bind(update.text_confirmed)
            .bind(update.page_id)
            .bind(book_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
            if result.rows_affected() != 1 {
                return Err(PortError::NotFound(format!(
                    "Page {} not found in book {}",
                    update.page_id, book_id
                )));
            }
        }
        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }

    async fn mark_page_illustrated(&self, page_id: Uuid, image_url: &str) -> PortResult<()> {
        sqlx::query(
            "UPDATE pages SET generated_image_url = $1, moderation_status = 'OK', \
             moderation_reason = NULL, updated_at = NOW() WHERE id = $2",
        )
        .bind(image_url)
        .bind(page_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn mark_page_moderation(
        &self,
        page_id: Uuid,
        status: ModerationStatus,
        reason: Option<&str>,
    ) -> PortResult<()> {
        sqlx::query(
            "UPDATE pages SET moderation_status = $1, moderation_reason = $2, updated_at = NOW() \
             WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(page_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn record_illustration_batch(
        &self,
        book_id: Uuid,
        page_ids: &[Uuid],
    ) -> PortResult<IllustrationBatch> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query(
            "UPDATE pages SET moderation_status = 'PENDING', moderation_reason = NULL, \
             generated_image_url = NULL, updated_at = NOW() WHERE book_id = $1 AND id = ANY($2)",
        )
        .bind(book_id)
        .bind(page_ids)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        let record = sqlx::query_as::<_, BatchRecord>(
            "INSERT INTO illustration_batches (book_id, page_ids, dispatched_at) \
             VALUES ($1, $2, NOW()) \
             ON CONFLICT (book_id) DO UPDATE SET page_ids = EXCLUDED.page_ids, \
             dispatched_at = EXCLUDED.dispatched_at \
             RETURNING book_id, page_ids, dispatched_at",
        )
        .bind(book_id)
        .bind(page_ids)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_illustration_batch(&self, book_id: Uuid) -> PortResult<Option<IllustrationBatch>> {
        let record = sqlx::query_as::<_, BatchRecord>(
            "SELECT book_id, page_ids, dispatched_at FROM illustration_batches WHERE book_id = $1",
        )
        .bind(book_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(BatchRecord::to_domain))
    }

    async fn apply_page_layout(
        &self,
        book_id: Uuid,
        placements: &[PagePlacement],
        removed: &[Uuid],
    ) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        if !removed.is_empty() {
            sqlx::query("DELETE FROM pages WHERE book_id = $1 AND id = ANY($2)")
                .bind(book_id)
                .bind(removed)
                .execute(&mut *tx)
                .await
                .map_err(unexpected)?;
        }

        // Clear the title flag first so the one-title index never sees two.
        sqlx::query("UPDATE pages SET is_title_page = FALSE WHERE book_id = $1")
            .bind(book_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        for placement in placements {
            let result = sqlx::query(
                "UPDATE pages SET page_index = $1, page_number = $2, is_title_page = $3, \
                 updated_at = NOW() WHERE id = $4 AND book_id = $5",
            )
            .bind(placement.index as i32)
            .bind(placement.page_number as i32)
            .bind(placement.is_title_page)
            .bind(placement.page_id)
            .bind(book_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
            if result.rows_affected() != 1 {
                return Err(PortError::NotFound(format!(
                    "Page {} not found in book {}",
                    placement.page_id, book_id
                )));
            }
        }

        sqlx::query("UPDATE books SET page_length = $1, updated_at = NOW() WHERE id = $2")
            .bind(placements.len() as i32)
            .bind(book_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `OrderRepository` Trait Implementation
//=========================================================================================

#[async_trait]
impl OrderRepository for DbAdapter {
    async fn create_order(&self, order: NewPrintOrder) -> PortResult<PrintOrder> {
        let record = sqlx::query_as::<_, OrderRecord>(&format!(
            "INSERT INTO print_orders (id, book_id, user_id, status, quantity, page_count, \
             shipping_address, contact_email, shipping_level) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(order.book_id)
        .bind(order.user_id)
        .bind(order.status.as_str())
        .bind(order.quantity as i32)
        .bind(order.page_count as i32)
        .bind(Json(&order.shipping_address))
        .bind(&order.contact_email)
        .bind(order.shipping_level.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        record.to_domain()
    }

    async fn get_order(&self, order_id: Uuid) -> PortResult<PrintOrder> {
        let record = sqlx::query_as::<_, OrderRecord>(&format!(
            "SELECT {} FROM print_orders WHERE id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_one(&self.pool)
        .await
        .map_err(not_found_or("Print order", order_id))?;
        record.to_domain()
    }

    async fn transition_order_status(
        &self,
        order_id: Uuid,
        from: &[PrintOrderStatus],
        to: PrintOrderStatus,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE print_orders SET status = $1, updated_at = NOW() \
             WHERE id = $2 AND status = ANY($3)",
        )
        .bind(to.as_str())
        .bind(order_id)
        .bind(status_names(from))
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_progress_step(&self, order_id: Uuid, step: FulfillmentStep) -> PortResult<()> {
        sqlx::query("UPDATE print_orders SET progress_step = $1, updated_at = NOW() WHERE id = $2")
            .bind(step.as_str())
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn save_document_urls(
        &self,
        order_id: Uuid,
        interior_pdf_url: &str,
        cover_pdf_url: &str,
    ) -> PortResult<()> {
        sqlx::query(
            "UPDATE print_orders SET interior_pdf_url = $1, cover_pdf_url = $2, updated_at = NOW() \
             WHERE id = $3",
        )
        .bind(interior_pdf_url)
        .bind(cover_pdf_url)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn mark_submitted(
        &self,
        order_id: Uuid,
        provider_job_id: &str,
        submitted_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE print_orders SET lulu_print_job_id = $1, submitted_at = $2, \
             status = 'SUBMITTED_TO_LULU', updated_at = NOW() \
             WHERE id = $3 AND status IN ('PAYMENT_COMPLETED', 'FAILED')",
        )
        .bind(provider_job_id)
        .bind(submitted_at)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() != 1 {
            return Err(PortError::InvalidState(format!(
                "Print order {} is no longer awaiting submission",
                order_id
            )));
        }
        Ok(())
    }

    async fn save_provider_status(&self, order_id: Uuid, provider_status: &str) -> PortResult<()> {
        sqlx::query("UPDATE print_orders SET provider_status = $1, updated_at = NOW() WHERE id = $2")
            .bind(provider_status)
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }
}
