//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{delete, get, post, put},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storyforge_core::domain::{
    PagePlacement, PrintCostQuote, PrintOrder, ShippingAddress, ShippingLevel, ShippingOption,
};
use storyforge_core::ports::PortError;
use storyforge_core::{OrderRequest, Progress};
use tracing::error;
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

type HandlerError = (StatusCode, String);

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        request_story_handler,
        book_progress_handler,
        retry_pages_handler,
        reset_book_handler,
        reorder_pages_handler,
        delete_page_handler,
        quote_handler,
        shipping_options_handler,
        create_order_handler,
        submit_order_handler,
        cancel_order_handler,
        order_progress_handler,
        sync_order_handler,
    ),
    components(
        schemas(
            StoryRequestBody, StoryQueuedResponse, ProgressResponse, RetryResponse,
            ReorderBody, PageLayoutResponse, PagePlacementBody, OrderRequestBody,
            QuoteResponse, ShippingOptionResponse, OrderResponse,
        )
    ),
    tags(
        (name = "Storyforge API", description = "Picture book generation and print ordering.")
    )
)]
pub struct ApiDoc;

/// Every REST route, with the shared state attached.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/books/{id}/story", post(request_story_handler))
        .route("/books/{id}/progress", get(book_progress_handler))
        .route("/books/{id}/retry", post(retry_pages_handler))
        .route("/books/{id}/reset", post(reset_book_handler))
        .route("/books/{id}/pages/order", put(reorder_pages_handler))
        .route("/books/{id}/pages/{page_id}", delete(delete_page_handler))
        .route("/orders", post(create_order_handler))
        .route("/orders/quote", post(quote_handler))
        .route("/orders/shipping-options", post(shipping_options_handler))
        .route("/orders/{id}/submit", post(submit_order_handler))
        .route("/orders/{id}/cancel", post(cancel_order_handler))
        .route("/orders/{id}/progress", get(order_progress_handler))
        .route("/orders/{id}/sync", post(sync_order_handler))
        .with_state(state)
}

//=========================================================================================
// Request Helpers
//=========================================================================================

/// Reads the caller's id from the `x-user-id` header.
pub fn user_id_from(headers: &HeaderMap) -> Result<Uuid, HandlerError> {
    let raw = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                "x-user-id header is required".to_string(),
            )
        })?;
    Uuid::parse_str(raw.trim()).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "Invalid x-user-id format".to_string(),
        )
    })
}

pub fn status_for(err: &PortError) -> StatusCode {
    match err {
        PortError::NotFound(_) => StatusCode::NOT_FOUND,
        PortError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PortError::InvalidState(_) => StatusCode::CONFLICT,
        PortError::Unauthorized => StatusCode::FORBIDDEN,
        PortError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Turns a core error into a response. Internal details are logged, not returned.
fn port_failure(err: PortError) -> HandlerError {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "request failed");
        return (status, "Internal server error".to_string());
    }
    (status, err.to_string())
}

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StoryRequestBody {
    /// Replace an already generated story.
    #[serde(default)]
    pub regenerate: bool,
    /// Must be true when `regenerate` is set.
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Serialize, ToSchema)]
pub struct StoryQueuedResponse {
    book_id: Uuid,
    regenerate: bool,
    story_pages: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ProgressResponse {
    percent: u8,
    message: String,
}

impl From<Progress> for ProgressResponse {
    fn from(p: Progress) -> Self {
        Self {
            percent: p.percent,
            message: p.message,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct RetryResponse {
    pages_queued: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct ReorderBody {
    /// Every page id of the book in the new reading order, title page first.
    pub page_ids: Vec<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct PagePlacementBody {
    page_id: Uuid,
    index: u32,
    page_number: u32,
    is_title_page: bool,
}

#[derive(Serialize, ToSchema)]
pub struct PageLayoutResponse {
    pages: Vec<PagePlacementBody>,
}

impl From<Vec<PagePlacement>> for PageLayoutResponse {
    fn from(placements: Vec<PagePlacement>) -> Self {
        Self {
            pages: placements
                .into_iter()
                .map(|p| PagePlacementBody {
                    page_id: p.page_id,
                    index: p.index,
                    page_number: p.page_number,
                    is_title_page: p.is_title_page,
                })
                .collect(),
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct OrderRequestBody {
    pub book_id: Uuid,
    pub quantity: u32,
    #[schema(value_type = Object)]
    pub shipping_address: ShippingAddress,
    pub contact_email: String,
    #[schema(value_type = String, example = "MAIL")]
    pub shipping_level: ShippingLevel,
}

impl From<OrderRequestBody> for OrderRequest {
    fn from(body: OrderRequestBody) -> Self {
        Self {
            book_id: body.book_id,
            quantity: body.quantity,
            shipping_address: body.shipping_address,
            contact_email: body.contact_email,
            shipping_level: body.shipping_level,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct QuoteResponse {
    line_item_cost_excl_tax: String,
    shipping_cost_excl_tax: String,
    fulfillment_cost_excl_tax: String,
    total_tax: String,
    total_cost_excl_tax: String,
    total_cost_incl_tax: String,
    currency: String,
}

impl From<PrintCostQuote> for QuoteResponse {
    fn from(q: PrintCostQuote) -> Self {
        Self {
            line_item_cost_excl_tax: q.line_item_cost_excl_tax,
            shipping_cost_excl_tax: q.shipping_cost_excl_tax,
            fulfillment_cost_excl_tax: q.fulfillment_cost_excl_tax,
            total_tax: q.total_tax,
            total_cost_excl_tax: q.total_cost_excl_tax,
            total_cost_incl_tax: q.total_cost_incl_tax,
            currency: q.currency,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ShippingOptionResponse {
    level: String,
    cost_excl_tax: String,
    currency: String,
    min_delivery_date: Option<String>,
    max_delivery_date: Option<String>,
}

impl From<ShippingOption> for ShippingOptionResponse {
    fn from(o: ShippingOption) -> Self {
        Self {
            level: o.level,
            cost_excl_tax: o.cost_excl_tax,
            currency: o.currency,
            min_delivery_date: o.min_delivery_date,
            max_delivery_date: o.max_delivery_date,
        }
    }
}

/// A print order as the owner sees it. The shipping address is not echoed back.
#[derive(Serialize, ToSchema)]
pub struct OrderResponse {
    id: Uuid,
    book_id: Uuid,
    status: String,
    quantity: u32,
    page_count: u32,
    shipping_level: String,
    interior_pdf_url: Option<String>,
    cover_pdf_url: Option<String>,
    lulu_print_job_id: Option<String>,
    provider_status: Option<String>,
    progress_step: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<PrintOrder> for OrderResponse {
    fn from(o: PrintOrder) -> Self {
        Self {
            id: o.id,
            book_id: o.book_id,
            status: o.status.as_str().to_string(),
            quantity: o.quantity,
            page_count: o.page_count,
            shipping_level: o.shipping_level.as_str().to_string(),
            interior_pdf_url: o.interior_pdf_url,
            cover_pdf_url: o.cover_pdf_url,
            lulu_print_job_id: o.lulu_print_job_id,
            provider_status: o.provider_status,
            progress_step: o.progress_step.map(|s| s.as_str().to_string()),
            submitted_at: o.submitted_at,
            created_at: o.created_at,
        }
    }
}

//=========================================================================================
// Book Handlers
//=========================================================================================

/// Queue story generation (or confirmed regeneration) for a book.
#[utoipa::path(
    post,
    path = "/books/{id}/story",
    request_body = StoryRequestBody,
    responses(
        (status = 202, description = "Story generation queued", body = StoryQueuedResponse),
        (status = 403, description = "The book belongs to another user"),
        (status = 409, description = "The book cannot start generation in its current status"),
        (status = 422, description = "Regeneration was not confirmed")
    ),
    params(
        ("id" = Uuid, Path, description = "Book id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn request_story_handler(
    State(app_state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
    headers: HeaderMap,
    body: Option<Json<StoryRequestBody>>,
) -> Result<impl IntoResponse, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let job = app_state
        .books
        .request_story(book_id, user_id, body.regenerate, body.confirmed)
        .await
        .map_err(port_failure)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StoryQueuedResponse {
            book_id,
            regenerate: job.regenerate,
            story_pages: job.story_pages.len(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/books/{id}/progress",
    responses(
        (status = 200, description = "Generation progress", body = ProgressResponse),
        (status = 404, description = "Book not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Book id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn book_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ProgressResponse>, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let progress = app_state
        .books
        .progress(book_id, user_id)
        .await
        .map_err(port_failure)?;
    Ok(Json(progress.into()))
}

/// Re-illustrate the flagged and failed pages of a partially illustrated book.
#[utoipa::path(
    post,
    path = "/books/{id}/retry",
    responses(
        (status = 202, description = "Illustration jobs queued", body = RetryResponse),
        (status = 409, description = "The book is not PARTIAL")
    ),
    params(
        ("id" = Uuid, Path, description = "Book id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn retry_pages_handler(
    State(app_state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let pages_queued = app_state
        .books
        .retry_failed_pages(book_id, user_id)
        .await
        .map_err(port_failure)?;
    Ok((StatusCode::ACCEPTED, Json(RetryResponse { pages_queued })))
}

/// Return a FAILED book to DRAFT.
#[utoipa::path(
    post,
    path = "/books/{id}/reset",
    responses(
        (status = 204, description = "Book reset to DRAFT"),
        (status = 409, description = "The book is not FAILED")
    ),
    params(
        ("id" = Uuid, Path, description = "Book id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn reset_book_handler(
    State(app_state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, HandlerError> {
    let user_id = user_id_from(&headers)?;
    app_state
        .books
        .reset(book_id, user_id)
        .await
        .map_err(port_failure)?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/books/{id}/pages/order",
    request_body = ReorderBody,
    responses(
        (status = 200, description = "New page layout", body = PageLayoutResponse),
        (status = 422, description = "The ids do not match the book's pages, or the title page moved")
    ),
    params(
        ("id" = Uuid, Path, description = "Book id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn reorder_pages_handler(
    State(app_state): State<Arc<AppState>>,
    Path(book_id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<ReorderBody>,
) -> Result<Json<PageLayoutResponse>, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let placements = app_state
        .pages
        .reorder(book_id, user_id, &body.page_ids)
        .await
        .map_err(port_failure)?;
    Ok(Json(placements.into()))
}

#[utoipa::path(
    delete,
    path = "/books/{id}/pages/{page_id}",
    responses(
        (status = 200, description = "Remaining page layout", body = PageLayoutResponse),
        (status = 404, description = "Page not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Book id"),
        ("page_id" = Uuid, Path, description = "Page id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn delete_page_handler(
    State(app_state): State<Arc<AppState>>,
    Path((book_id, page_id)): Path<(Uuid, Uuid)>,
    headers: HeaderMap,
) -> Result<Json<PageLayoutResponse>, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let placements = app_state
        .pages
        .delete(book_id, user_id, page_id)
        .await
        .map_err(port_failure)?;
    Ok(Json(placements.into()))
}

//=========================================================================================
// Order Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/orders/quote",
    request_body = OrderRequestBody,
    responses(
        (status = 200, description = "Itemized print and shipping cost", body = QuoteResponse),
        (status = 409, description = "The book is not ready to print"),
        (status = 422, description = "Invalid address or request")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn quote_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OrderRequestBody>,
) -> Result<Json<QuoteResponse>, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let quote = app_state
        .orders
        .quote_price(user_id, &body.into())
        .await
        .map_err(port_failure)?;
    Ok(Json(quote.into()))
}

#[utoipa::path(
    post,
    path = "/orders/shipping-options",
    request_body = OrderRequestBody,
    responses(
        (status = 200, description = "Available shipping levels", body = [ShippingOptionResponse]),
        (status = 422, description = "Invalid address or request")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn shipping_options_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OrderRequestBody>,
) -> Result<Json<Vec<ShippingOptionResponse>>, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let options = app_state
        .orders
        .shipping_options(user_id, &body.into())
        .await
        .map_err(port_failure)?;
    Ok(Json(options.into_iter().map(Into::into).collect()))
}

/// Create a print order awaiting payment.
#[utoipa::path(
    post,
    path = "/orders",
    request_body = OrderRequestBody,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 409, description = "The book is not ready to print"),
        (status = 422, description = "Invalid address or request")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the user."))
)]
pub async fn create_order_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<OrderRequestBody>,
) -> Result<impl IntoResponse, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let order = app_state
        .orders
        .create_order(user_id, &body.into(), false)
        .await
        .map_err(port_failure)?;
    Ok((StatusCode::CREATED, Json(OrderResponse::from(order))))
}

/// Queue fulfillment of a paid order.
#[utoipa::path(
    post,
    path = "/orders/{id}/submit",
    responses(
        (status = 202, description = "Fulfillment queued", body = OrderResponse),
        (status = 409, description = "The order is not paid")
    ),
    params(
        ("id" = Uuid, Path, description = "Print order id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn submit_order_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let order = app_state
        .orders
        .submit_order(order_id, user_id)
        .await
        .map_err(port_failure)?;
    Ok((StatusCode::ACCEPTED, Json(OrderResponse::from(order))))
}

#[utoipa::path(
    post,
    path = "/orders/{id}/cancel",
    responses(
        (status = 200, description = "Order cancelled", body = OrderResponse),
        (status = 409, description = "The order can no longer be cancelled")
    ),
    params(
        ("id" = Uuid, Path, description = "Print order id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn cancel_order_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<OrderResponse>, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let order = app_state
        .orders
        .cancel_order(order_id, user_id)
        .await
        .map_err(port_failure)?;
    Ok(Json(order.into()))
}

#[utoipa::path(
    get,
    path = "/orders/{id}/progress",
    responses(
        (status = 200, description = "Fulfillment progress", body = ProgressResponse),
        (status = 404, description = "Order not found")
    ),
    params(
        ("id" = Uuid, Path, description = "Print order id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn order_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<ProgressResponse>, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let progress = app_state
        .orders
        .progress(order_id, user_id)
        .await
        .map_err(port_failure)?;
    Ok(Json(progress.into()))
}

/// Pull the print provider's status for a submitted order.
#[utoipa::path(
    post,
    path = "/orders/{id}/sync",
    responses(
        (status = 200, description = "Order after sync", body = OrderResponse),
        (status = 409, description = "The order has not been submitted")
    ),
    params(
        ("id" = Uuid, Path, description = "Print order id"),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn sync_order_handler(
    State(app_state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<OrderResponse>, HandlerError> {
    let user_id = user_id_from(&headers)?;
    let order = app_state
        .orders
        .sync_order_status(order_id, user_id)
        .await
        .map_err(port_failure)?;
    Ok(Json(order.into()))
}
