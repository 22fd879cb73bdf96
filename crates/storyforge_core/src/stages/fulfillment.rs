//! crates/storyforge_core/src/stages/fulfillment.rs
//!
//! Print fulfillment for one paid order: render, upload, persist, submit.
//! Everything before the provider call is deterministic and overwrites in
//! place, so a retry repeats it safely; the provider call itself is keyed by
//! the order id so the provider can drop duplicates.

use crate::domain::{FulfillmentStep, PrintOrder, PrintOrderStatus, PrintSubmission};
use crate::jobs::{validate_job, PrintFulfillmentJob, RetryPolicy};
use crate::ports::{
    BookRepository, DocumentStore, OrderRepository, PageRenderer, PortError, PortResult,
    PrintProvider,
};
use crate::status::StatusService;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Submitted { provider_job_id: String },
    /// The provider already has this order; nothing was done.
    AlreadySubmitted(PrintOrderStatus),
}

/// Per-book, per-document storage path.
pub fn document_path(book_id: Uuid, kind: &str) -> String {
    format!("/books/{}/{}.pdf", book_id, kind)
}

#[derive(Clone)]
pub struct FulfillmentStage {
    books: Arc<dyn BookRepository>,
    orders: Arc<dyn OrderRepository>,
    renderer: Arc<dyn PageRenderer>,
    documents: Arc<dyn DocumentStore>,
    provider: Arc<dyn PrintProvider>,
    status: StatusService,
    policy: RetryPolicy,
}

impl FulfillmentStage {
    pub fn new(
        books: Arc<dyn BookRepository>,
        orders: Arc<dyn OrderRepository>,
        renderer: Arc<dyn PageRenderer>,
        documents: Arc<dyn DocumentStore>,
        provider: Arc<dyn PrintProvider>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            books,
            orders,
            renderer,
            documents,
            provider,
            status: StatusService::new(),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub async fn run(&self, job: &PrintFulfillmentJob, attempt: u32) -> PortResult<FulfillmentOutcome> {
        validate_job(job)?;
        let order = self.orders.get_order(job.print_order_id).await?;
        if order.book_id != job.book_id || order.user_id != job.user_id {
            return Err(PortError::Validation(format!(
                "order {} does not match the job's book and user",
                job.print_order_id
            )));
        }

        if order.status.is_with_provider() {
            info!(print_order_id = %order.id, status = %order.status, "order already with provider, skipping");
            return Ok(FulfillmentOutcome::AlreadySubmitted(order.status));
        }
        self.status
            .check_order_transition(order.status, PrintOrderStatus::SubmittedToLulu)?;

        let book = self.books.get_book(order.book_id).await?;
        if !book.status.is_printable() {
            return Err(PortError::InvalidState(format!(
                "book {} is {} and cannot be printed",
                book.id, book.status
            )));
        }

        info!(print_order_id = %order.id, attempt, "print fulfillment started");
        match self.fulfill(&order, &book).await {
            Ok(provider_job_id) => Ok(FulfillmentOutcome::Submitted { provider_job_id }),
            Err(e) => {
                error!(print_order_id = %order.id, attempt, error = %e, "print fulfillment failed");
                if let Err(mark_err) = self
                    .orders
                    .transition_order_status(
                        order.id,
                        &[PrintOrderStatus::PaymentCompleted],
                        PrintOrderStatus::Failed,
                    )
                    .await
                {
                    warn!(print_order_id = %order.id, error = %mark_err, "could not mark order FAILED");
                }
                Err(e)
            }
        }
    }

    async fn fulfill(&self, order: &PrintOrder, book: &crate::domain::Book) -> PortResult<String> {
        let pages = self.books.get_pages(book.id).await?;

        self.step(order.id, FulfillmentStep::RenderingInterior).await?;
        let interior = self.renderer.render_interior(book, &pages).await?;

        self.step(order.id, FulfillmentStep::RenderingCover).await?;
        let cover = self.renderer.render_cover(book, &pages).await?;

        self.step(order.id, FulfillmentStep::Uploading).await?;
        let interior_url = self
            .documents
            .publish_document(&document_path(book.id, "interior"), interior)
            .await?;
        let cover_url = self
            .documents
            .publish_document(&document_path(book.id, "cover"), cover)
            .await?;

        self.step(order.id, FulfillmentStep::SavingUrls).await?;
        self.orders
            .save_document_urls(order.id, &interior_url, &cover_url)
            .await?;

        self.step(order.id, FulfillmentStep::Submitting).await?;
        let submission = PrintSubmission {
            external_id: order.id.to_string(),
            title: book.title.clone(),
            contact_email: order.contact_email.clone(),
            quantity: order.quantity,
            interior_pdf_url: interior_url,
            cover_pdf_url: cover_url,
            shipping_address: order.shipping_address.clone(),
            shipping_level: order.shipping_level,
        };
        let provider_job_id = self.provider.submit_print_job(&submission).await?;

        if let Err(e) = self
            .orders
            .mark_submitted(order.id, &provider_job_id, Utc::now())
            .await
        {
            if matches!(e, PortError::InvalidState(_)) {
                self.withdraw(order.id, &provider_job_id).await;
            }
            return Err(e);
        }
        self.step(order.id, FulfillmentStep::Submitted).await?;
        info!(print_order_id = %order.id, %provider_job_id, "order submitted to print provider");
        Ok(provider_job_id)
    }

    /// The order moved on (typically cancelled) while the provider was
    /// accepting it. One cancel call; a failure is only logged.
    async fn withdraw(&self, order_id: Uuid, provider_job_id: &str) {
        warn!(print_order_id = %order_id, provider_job_id, "order changed during submission, cancelling provider job");
        if let Err(e) = self.provider.cancel_print_job(provider_job_id).await {
            error!(print_order_id = %order_id, provider_job_id, error = %e, "provider job could not be cancelled");
        }
    }

    async fn step(&self, order_id: Uuid, step: FulfillmentStep) -> PortResult<()> {
        info!(print_order_id = %order_id, step = %step, "fulfillment progress");
        self.orders.set_progress_step(order_id, step).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BookStatus;
    use crate::testing::FulfillmentFixture;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn paid_order_is_rendered_uploaded_and_submitted() {
        let fx = FulfillmentFixture::new(BookStatus::Completed, PrintOrderStatus::PaymentCompleted);

        let outcome = fx.stage.run(&fx.job, 1).await.unwrap();

        assert_matches!(outcome, FulfillmentOutcome::Submitted { .. });
        let order = fx.orders.get_order(fx.order.id).await.unwrap();
        assert_eq!(order.status, PrintOrderStatus::SubmittedToLulu);
        assert!(order.submitted_at.is_some());
        assert_eq!(order.progress_step, Some(FulfillmentStep::Submitted));
        assert_eq!(
            order.interior_pdf_url.as_deref(),
            Some(fx.documents.url_for(&document_path(fx.book.id, "interior")).as_str())
        );
        let submissions = fx.provider.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].external_id, fx.order.id.to_string());
        assert_eq!(submissions[0].quantity, fx.order.quantity);
    }

    #[tokio::test]
    async fn cancel_during_submission_withdraws_provider_job() {
        let fx = FulfillmentFixture::new(BookStatus::Completed, PrintOrderStatus::PaymentCompleted);
        let orders = fx.orders.clone();
        let order_id = fx.order.id;
        fx.provider
            .on_submit(move || orders.force_status(order_id, PrintOrderStatus::Cancelled));

        let result = fx.stage.run(&fx.job, 1).await;

        assert_matches!(result, Err(PortError::InvalidState(_)));
        let order = fx.orders.get_order(fx.order.id).await.unwrap();
        assert_eq!(order.status, PrintOrderStatus::Cancelled);
        assert_eq!(order.lulu_print_job_id, None);
        assert_eq!(fx.provider.submissions().len(), 1);
        assert_eq!(fx.provider.cancellations(), vec!["9001".to_string()]);
    }

    #[tokio::test]
    async fn failed_withdrawal_still_reports_the_guard_miss() {
        let fx = FulfillmentFixture::new(BookStatus::Completed, PrintOrderStatus::PaymentCompleted);
        let orders = fx.orders.clone();
        let order_id = fx.order.id;
        fx.provider
            .on_submit(move || orders.force_status(order_id, PrintOrderStatus::Cancelled));
        fx.provider.fail_cancellations();

        assert_matches!(fx.stage.run(&fx.job, 1).await, Err(PortError::InvalidState(_)));
        assert_eq!(fx.provider.cancellations().len(), 1);
        let order = fx.orders.get_order(fx.order.id).await.unwrap();
        assert_eq!(order.status, PrintOrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn submitted_order_is_a_no_op() {
        let fx = FulfillmentFixture::new(BookStatus::Completed, PrintOrderStatus::SubmittedToLulu);
        let outcome = fx.stage.run(&fx.job, 1).await.unwrap();
        assert_eq!(
            outcome,
            FulfillmentOutcome::AlreadySubmitted(PrintOrderStatus::SubmittedToLulu)
        );
        assert!(fx.provider.submissions().is_empty());
        assert_eq!(fx.documents.uploads().len(), 0);
    }

    #[tokio::test]
    async fn unpaid_order_is_rejected_without_side_effects() {
        let fx = FulfillmentFixture::new(BookStatus::Completed, PrintOrderStatus::PendingPayment);
        assert_matches!(fx.stage.run(&fx.job, 1).await, Err(PortError::InvalidState(_)));
        assert_eq!(fx.documents.uploads().len(), 0);
        let order = fx.orders.get_order(fx.order.id).await.unwrap();
        assert_eq!(order.status, PrintOrderStatus::PendingPayment);
    }

    #[tokio::test]
    async fn unfinished_book_cannot_be_printed() {
        let fx = FulfillmentFixture::new(BookStatus::Illustrating, PrintOrderStatus::PaymentCompleted);
        assert_matches!(fx.stage.run(&fx.job, 1).await, Err(PortError::InvalidState(_)));
    }

    #[tokio::test]
    async fn retry_after_upload_failure_reuses_path_and_bytes() {
        let fx = FulfillmentFixture::new(BookStatus::Partial, PrintOrderStatus::PaymentCompleted);
        fx.documents.fail_next_upload();

        let first = fx.stage.run(&fx.job, 1).await;
        assert!(first.is_err());
        let failed = fx.orders.get_order(fx.order.id).await.unwrap();
        assert_eq!(failed.status, PrintOrderStatus::Failed);
        assert!(fx.provider.submissions().is_empty());

        let second = fx.stage.run(&fx.job, 2).await.unwrap();
        assert_matches!(second, FulfillmentOutcome::Submitted { .. });

        let uploads = fx.documents.uploads();
        let interior: Vec<_> = uploads
            .iter()
            .filter(|(path, _)| path.ends_with("interior.pdf"))
            .collect();
        assert_eq!(interior.len(), 2);
        assert_eq!(interior[0].0, interior[1].0);
        assert_eq!(interior[0].1, interior[1].1);
        let order = fx.orders.get_order(fx.order.id).await.unwrap();
        assert_eq!(order.status, PrintOrderStatus::SubmittedToLulu);
    }
}
