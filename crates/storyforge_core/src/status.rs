//! crates/storyforge_core/src/status.rs
//!
//! The status service: which state moves are legal for books and print
//! orders, how per-page outcomes roll up into a book status, and how far
//! along a book or order is for people watching it.

use crate::domain::{
    BookStatus, FulfillmentStep, ModerationStatus, Page, PrintOrder, PrintOrderStatus,
};
use crate::ports::{PortError, PortResult};
use serde::Serialize;

/// The result of rolling up the per-page outcomes of a book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollup {
    /// Some expected pages have not settled yet.
    Pending { remaining: usize },
    Settled(BookStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub percent: u8,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusService;

impl StatusService {
    pub fn new() -> Self {
        Self
    }

    //=====================================================================================
    // Book transitions
    //=====================================================================================

    /// Transitions a stage may perform on its own.
    pub fn can_transition_book(&self, from: BookStatus, to: BookStatus) -> bool {
        use BookStatus::*;
        matches!(
            (from, to),
            (Draft, Generating)
                | (Failed, Generating)
                | (Generating, StoryReady)
                | (Generating, Failed)
                | (StoryReady, Illustrating)
                | (StoryReady, Failed)
                | (Illustrating, Completed)
                | (Illustrating, Partial)
                | (Illustrating, Failed)
                | (Partial, Illustrating)
                | (Failed, Draft)
        )
    }

    pub fn check_book_transition(&self, from: BookStatus, to: BookStatus) -> PortResult<()> {
        if self.can_transition_book(from, to) {
            Ok(())
        } else {
            Err(PortError::InvalidState(format!(
                "book cannot move from {} to {}",
                from, to
            )))
        }
    }

    /// States from which a first-time story run may start.
    pub fn generation_start_states(&self) -> &'static [BookStatus] {
        &[BookStatus::Draft, BookStatus::Failed]
    }

    /// States from which an explicitly confirmed regeneration may start.
    pub fn regeneration_start_states(&self) -> &'static [BookStatus] {
        &[BookStatus::Completed, BookStatus::Partial, BookStatus::Failed]
    }

    //=====================================================================================
    // Order transitions
    //=====================================================================================

    pub fn can_transition_order(&self, from: PrintOrderStatus, to: PrintOrderStatus) -> bool {
        use PrintOrderStatus::*;
        matches!(
            (from, to),
            (PendingPayment, PaymentCompleted)
                | (PendingPayment, Cancelled)
                | (PaymentCompleted, Cancelled)
                | (PaymentCompleted, SubmittedToLulu)
                | (PaymentCompleted, Failed)
                // a failed fulfillment attempt is retried by the broker
                | (Failed, SubmittedToLulu)
                | (SubmittedToLulu, InProduction)
                | (SubmittedToLulu, Shipped)
                | (SubmittedToLulu, Failed)
                | (InProduction, Shipped)
                | (InProduction, Failed)
        )
    }

    pub fn check_order_transition(
        &self,
        from: PrintOrderStatus,
        to: PrintOrderStatus,
    ) -> PortResult<()> {
        if self.can_transition_order(from, to) {
            Ok(())
        } else {
            Err(PortError::InvalidState(format!(
                "print order cannot move from {} to {}",
                from, to
            )))
        }
    }

    //=====================================================================================
    // Rollup
    //=====================================================================================

    /// Rolls up story-page outcomes: all OK is COMPLETED, no OK is FAILED,
    /// anything else is PARTIAL. An empty set has nothing illustrated and
    /// rolls up to FAILED.
    pub fn rollup<I>(&self, outcomes: I) -> Rollup
    where
        I: IntoIterator<Item = ModerationStatus>,
    {
        let mut ok = 0usize;
        let mut not_ok = 0usize;
        let mut pending = 0usize;
        for outcome in outcomes {
            match outcome {
                ModerationStatus::Ok => ok += 1,
                ModerationStatus::Flagged | ModerationStatus::Failed => not_ok += 1,
                ModerationStatus::Pending => pending += 1,
            }
        }

        if pending > 0 {
            return Rollup::Pending { remaining: pending };
        }
        match (ok, not_ok) {
            (0, _) => Rollup::Settled(BookStatus::Failed),
            (_, 0) => Rollup::Settled(BookStatus::Completed),
            _ => Rollup::Settled(BookStatus::Partial),
        }
    }

    //=====================================================================================
    // Progress
    //=====================================================================================

    pub fn book_progress(&self, status: BookStatus, pages: &[Page]) -> Progress {
        let (percent, message) = match status {
            BookStatus::Draft => (0, "Ready to generate your story.".to_string()),
            BookStatus::Generating => (10, "Writing your story...".to_string()),
            BookStatus::StoryReady => (30, "Story written. Preparing illustrations...".to_string()),
            BookStatus::Illustrating => {
                let story_pages: Vec<&Page> = pages.iter().filter(|p| !p.is_title_page).collect();
                let total = story_pages.len();
                let settled = story_pages
                    .iter()
                    .filter(|p| p.moderation_status.is_settled())
                    .count();
                let percent = if total == 0 {
                    30
                } else {
                    30 + (65 * settled / total) as u8
                };
                (
                    percent,
                    format!("Illustrating pages ({} of {} done)...", settled, total),
                )
            }
            BookStatus::Completed => (100, "Your book is ready!".to_string()),
            BookStatus::Partial => (
                100,
                "Some pages need another try. Review and retry the failed pages.".to_string(),
            ),
            BookStatus::Failed => (
                100,
                "We couldn't finish this book. You can try generating it again.".to_string(),
            ),
        };
        Progress { percent, message }
    }

    pub fn order_progress(&self, order: &PrintOrder) -> Progress {
        let step_percent = |step: Option<FulfillmentStep>| match step {
            None => 5,
            Some(FulfillmentStep::RenderingInterior) => 15,
            Some(FulfillmentStep::RenderingCover) => 30,
            Some(FulfillmentStep::Uploading) => 50,
            Some(FulfillmentStep::SavingUrls) => 60,
            Some(FulfillmentStep::Submitting) => 80,
            Some(FulfillmentStep::Submitted) => 100,
        };

        let (percent, message) = match order.status {
            PrintOrderStatus::PendingPayment => (0, "Waiting for payment."),
            PrintOrderStatus::PaymentCompleted => (
                step_percent(order.progress_step),
                "Preparing your book for printing...",
            ),
            PrintOrderStatus::SubmittedToLulu => (100, "Sent to the printer."),
            PrintOrderStatus::InProduction => (100, "Your book is being printed."),
            PrintOrderStatus::Shipped => (100, "Your book has shipped!"),
            PrintOrderStatus::Cancelled => (100, "This order was cancelled."),
            PrintOrderStatus::Failed => (
                100,
                "Something went wrong with this order. Please contact support.",
            ),
        };
        Progress {
            percent,
            message: message.to_string(),
        }
    }
}
