//! crates/storyforge_core/src/orders.rs
//!
//! Synchronous print-order operations used by the HTTP surface: pricing,
//! shipping options, creation, submission, cancellation and provider sync.

use crate::domain::{
    Book, NewPrintOrder, PrintCostQuote, PrintOrder, PrintOrderStatus, ShippingAddress,
    ShippingLevel, ShippingOption,
};
use crate::jobs::PrintFulfillmentJob;
use crate::layout::interior_page_count;
use crate::ports::{
    BookRepository, CostRequest, JobQueue, OrderRepository, PortError, PortResult, PrintProvider,
};
use crate::status::StatusService;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

/// What a customer asks for when pricing or placing an order.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OrderRequest {
    pub book_id: Uuid,
    pub quantity: u32,
    #[validate(nested)]
    pub shipping_address: ShippingAddress,
    #[validate(email)]
    pub contact_email: String,
    pub shipping_level: ShippingLevel,
}

pub fn clamp_quantity(quantity: u32, max_quantity: u32) -> u32 {
    quantity.clamp(1, max_quantity.max(1))
}

/// Maps a provider job status onto the local order status it implies, if any.
pub fn provider_status_target(provider_status: &str) -> Option<PrintOrderStatus> {
    match provider_status.to_ascii_uppercase().as_str() {
        "PRODUCTION_READY" | "PRODUCTION_DELAYED" | "IN_PRODUCTION" => {
            Some(PrintOrderStatus::InProduction)
        }
        "SHIPPED" => Some(PrintOrderStatus::Shipped),
        // The money has moved; a provider-side stop goes to support.
        "REJECTED" | "CANCELED" | "CANCELLED" => Some(PrintOrderStatus::Failed),
        _ => None,
    }
}

#[derive(Clone)]
pub struct OrderService {
    books: Arc<dyn BookRepository>,
    orders: Arc<dyn OrderRepository>,
    provider: Arc<dyn PrintProvider>,
    queue: Arc<dyn JobQueue>,
    status: StatusService,
    max_quantity: u32,
}

impl OrderService {
    pub fn new(
        books: Arc<dyn BookRepository>,
        orders: Arc<dyn OrderRepository>,
        provider: Arc<dyn PrintProvider>,
        queue: Arc<dyn JobQueue>,
        max_quantity: u32,
    ) -> Self {
        Self {
            books,
            orders,
            provider,
            queue,
            status: StatusService::new(),
            max_quantity,
        }
    }

    async fn printable_book(&self, book_id: Uuid, user_id: Uuid) -> PortResult<(Book, u32)> {
        let book = self.books.get_book(book_id).await?;
        if book.user_id != user_id {
            return Err(PortError::Unauthorized);
        }
        if !book.status.is_printable() {
            return Err(PortError::InvalidState(format!(
                "book {} is {} and cannot be printed yet",
                book_id, book.status
            )));
        }
        let pages = self.books.get_pages(book_id).await?;
        Ok((book, interior_page_count(&pages)))
    }

    async fn owned_order(&self, order_id: Uuid, user_id: Uuid) -> PortResult<PrintOrder> {
        let order = self.orders.get_order(order_id).await?;
        if order.user_id != user_id {
            return Err(PortError::Unauthorized);
        }
        Ok(order)
    }

    async fn cost_request(&self, user_id: Uuid, request: &OrderRequest) -> PortResult<CostRequest> {
        request
            .validate()
            .map_err(|e| PortError::Validation(e.to_string()))?;
        let (_, page_count) = self.printable_book(request.book_id, user_id).await?;
        Ok(CostRequest {
            page_count,
            quantity: clamp_quantity(request.quantity, self.max_quantity),
            shipping_address: request.shipping_address.clone(),
            shipping_level: request.shipping_level,
        })
    }

    pub async fn quote_price(&self, user_id: Uuid, request: &OrderRequest) -> PortResult<PrintCostQuote> {
        let cost = self.cost_request(user_id, request).await?;
        self.provider.quote(&cost).await
    }

    pub async fn shipping_options(
        &self,
        user_id: Uuid,
        request: &OrderRequest,
    ) -> PortResult<Vec<ShippingOption>> {
        let cost = self.cost_request(user_id, request).await?;
        self.provider.shipping_options(&cost).await
    }

    /// Creates an order. `paid` is for flows where payment already happened
    /// upstream (including test checkouts).
    pub async fn create_order(
        &self,
        user_id: Uuid,
        request: &OrderRequest,
        paid: bool,
    ) -> PortResult<PrintOrder> {
        let cost = self.cost_request(user_id, request).await?;
        let order = self
            .orders
            .create_order(NewPrintOrder {
                book_id: request.book_id,
                user_id,
                status: if paid {
                    PrintOrderStatus::PaymentCompleted
                } else {
                    PrintOrderStatus::PendingPayment
                },
                quantity: cost.quantity,
                page_count: cost.page_count,
                shipping_address: cost.shipping_address,
                contact_email: request.contact_email.trim().to_string(),
                shipping_level: cost.shipping_level,
            })
            .await?;
        info!(print_order_id = %order.id, book_id = %order.book_id, quantity = order.quantity, "print order created");
        Ok(order)
    }

    /// Called by the payment collaborator once money has moved.
    pub async fn mark_paid(&self, order_id: Uuid) -> PortResult<PrintOrder> {
        let moved = self
            .orders
            .transition_order_status(
                order_id,
                &[PrintOrderStatus::PendingPayment],
                PrintOrderStatus::PaymentCompleted,
            )
            .await?;
        let order = self.orders.get_order(order_id).await?;
        if !moved && order.status != PrintOrderStatus::PaymentCompleted {
            return Err(PortError::InvalidState(format!(
                "order {} is {} and cannot be marked paid",
                order_id, order.status
            )));
        }
        Ok(order)
    }

    /// Queues fulfillment for a paid order.
    pub async fn submit_order(&self, order_id: Uuid, user_id: Uuid) -> PortResult<PrintOrder> {
        let order = self.owned_order(order_id, user_id).await?;
        if order.status != PrintOrderStatus::PaymentCompleted {
            return Err(PortError::InvalidState(format!(
                "order {} is {}; only paid orders can be submitted",
                order_id, order.status
            )));
        }
        self.queue
            .enqueue_fulfillment(PrintFulfillmentJob {
                print_order_id: order.id,
                book_id: order.book_id,
                user_id: order.user_id,
            })
            .await?;
        info!(print_order_id = %order.id, "print fulfillment queued");
        Ok(order)
    }

    /// Cancels an order that has not reached the printer. A provider job, if
    /// one exists, gets one best-effort cancel call whose failure is only logged.
    pub async fn cancel_order(&self, order_id: Uuid, user_id: Uuid) -> PortResult<PrintOrder> {
        let order = self.owned_order(order_id, user_id).await?;
        self.status
            .check_order_transition(order.status, PrintOrderStatus::Cancelled)?;

        let moved = self
            .orders
            .transition_order_status(
                order_id,
                &[PrintOrderStatus::PendingPayment, PrintOrderStatus::PaymentCompleted],
                PrintOrderStatus::Cancelled,
            )
            .await?;
        if !moved {
            return Err(PortError::InvalidState(format!(
                "order {} changed status before it could be cancelled",
                order_id
            )));
        }

        if let Some(job_id) = order.lulu_print_job_id.as_deref() {
            if let Err(e) = self.provider.cancel_print_job(job_id).await {
                warn!(print_order_id = %order_id, provider_job_id = job_id, error = %e, "provider cancel failed; order cancelled locally");
            }
        }
        info!(print_order_id = %order_id, "print order cancelled");
        self.orders.get_order(order_id).await
    }

    /// Pulls the provider's view of a submitted order and applies any legal move.
    /// Only the owner may trigger it; nothing reaches the provider otherwise.
    pub async fn sync_order_status(&self, order_id: Uuid, user_id: Uuid) -> PortResult<PrintOrder> {
        let order = self.owned_order(order_id, user_id).await?;
        let job_id = order.lulu_print_job_id.as_deref().ok_or_else(|| {
            PortError::InvalidState(format!("order {} has not been submitted", order_id))
        })?;

        let remote = self.provider.get_print_job(job_id).await?;
        self.orders
            .save_provider_status(order_id, &remote.status)
            .await?;

        if let Some(target) = provider_status_target(&remote.status) {
            if target != order.status && self.status.can_transition_order(order.status, target) {
                self.orders
                    .transition_order_status(order_id, &[order.status], target)
                    .await?;
                info!(print_order_id = %order_id, provider_status = %remote.status, status = %target, "order status synced");
            }
        }
        self.orders.get_order(order_id).await
    }

    pub async fn progress(&self, order_id: Uuid, user_id: Uuid) -> PortResult<crate::status::Progress> {
        let order = self.owned_order(order_id, user_id).await?;
        Ok(self.status.order_progress(&order))
    }
}
