//! crates/storyforge_core/src/domain.rs
//!
//! Defines the pure, core data structures for the pipeline.
//! These structs are independent of any database driver; enums carry their
//! canonical upper-case wire names so adapters can store and parse them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use validator::Validate;

//=========================================================================================
// Enum Parsing Support
//=========================================================================================

/// Returned when a stored or transmitted string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! wire_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

//=========================================================================================
// Books and Pages
//=========================================================================================

/// Generation status of a book. See `status::StatusService` for legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookStatus {
    Draft,
    Generating,
    StoryReady,
    Illustrating,
    Completed,
    Partial,
    Failed,
}

wire_enum!(BookStatus, "book status", {
    Draft => "DRAFT",
    Generating => "GENERATING",
    StoryReady => "STORY_READY",
    Illustrating => "ILLUSTRATING",
    Completed => "COMPLETED",
    Partial => "PARTIAL",
    Failed => "FAILED",
});

impl BookStatus {
    /// Terminal generation outcomes. PARTIAL counts as done, not as an error.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial | Self::Failed)
    }

    /// Whether a print order may be placed for a book in this state.
    pub fn is_printable(&self) -> bool {
        matches!(self, Self::Completed | Self::Partial)
    }
}

/// Per-page illustration outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationStatus {
    Pending,
    Ok,
    Flagged,
    Failed,
}

wire_enum!(ModerationStatus, "moderation status", {
    Pending => "PENDING",
    Ok => "OK",
    Flagged => "FLAGGED",
    Failed => "FAILED",
});

impl ModerationStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The closed set of illustration styles a book may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtStyle {
    Watercolor,
    Cartoon,
    Storybook,
    Pencil,
    Anime,
}

impl ArtStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Watercolor => "watercolor",
            Self::Cartoon => "cartoon",
            Self::Storybook => "storybook",
            Self::Pencil => "pencil",
            Self::Anime => "anime",
        }
    }

    /// Style wording shared by the story and illustration prompts.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Watercolor => "soft watercolor painting with gentle washes and paper texture",
            Self::Cartoon => "bright, bold cartoon with clean outlines and flat colors",
            Self::Storybook => "classic children's storybook illustration with warm, detailed brushwork",
            Self::Pencil => "hand-drawn colored pencil sketch with visible strokes",
            Self::Anime => "anime-inspired illustration with expressive eyes and cel shading",
        }
    }
}

impl FromStr for ArtStyle {
    type Err = ParseEnumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "watercolor" => Ok(Self::Watercolor),
            "cartoon" => Ok(Self::Cartoon),
            "storybook" => Ok(Self::Storybook),
            "pencil" => Ok(Self::Pencil),
            "anime" => Ok(Self::Anime),
            _ => Err(ParseEnumError {
                kind: "art style",
                value: value.to_string(),
            }),
        }
    }
}

impl fmt::Display for ArtStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A picture book owned by a single user.
#[derive(Debug, Clone)]
pub struct Book {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub child_name: String,
    pub art_style: Option<ArtStyle>,
    pub is_winkify_enabled: bool,
    pub status: BookStatus,
    pub page_length: u32,
    pub cover_asset_id: Option<Uuid>,
}

/// A single page of a book. `index` is the 0-based reading order and
/// `page_number` the 1-based number shown to readers.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: Uuid,
    pub book_id: Uuid,
    pub index: u32,
    pub page_number: u32,
    pub is_title_page: bool,
    pub asset_id: Option<Uuid>,
    pub original_image_url: Option<String>,
    pub text: Option<String>,
    pub text_confirmed: bool,
    pub illustration_notes: Option<String>,
    pub generated_image_url: Option<String>,
    pub moderation_status: ModerationStatus,
    pub moderation_reason: Option<String>,
}

impl Page {
    pub fn has_text(&self) -> bool {
        self.text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false)
    }

    /// The image the renderer should place for this page: the generated
    /// illustration when one exists, otherwise the uploaded photo.
    pub fn display_image_url(&self) -> Option<&str> {
        self.generated_image_url
            .as_deref()
            .or(self.original_image_url.as_deref())
    }
}

/// The durable set of pages expected to settle before a book is finalized.
#[derive(Debug, Clone)]
pub struct IllustrationBatch {
    pub book_id: Uuid,
    pub page_ids: Vec<Uuid>,
    pub dispatched_at: DateTime<Utc>,
}

/// Text written for one page by the story stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTextUpdate {
    pub page_id: Uuid,
    pub text: String,
    pub illustration_notes: Option<String>,
    pub text_confirmed: bool,
}

/// One entry of a target page layout: where a page goes and how it is numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlacement {
    pub page_id: Uuid,
    pub index: u32,
    pub page_number: u32,
    pub is_title_page: bool,
}

//=========================================================================================
// Print Orders
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintOrderStatus {
    PendingPayment,
    PaymentCompleted,
    SubmittedToLulu,
    InProduction,
    Shipped,
    Cancelled,
    Failed,
}

wire_enum!(PrintOrderStatus, "print order status", {
    PendingPayment => "PENDING_PAYMENT",
    PaymentCompleted => "PAYMENT_COMPLETED",
    SubmittedToLulu => "SUBMITTED_TO_LULU",
    InProduction => "IN_PRODUCTION",
    Shipped => "SHIPPED",
    Cancelled => "CANCELLED",
    Failed => "FAILED",
});

impl PrintOrderStatus {
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::PendingPayment | Self::PaymentCompleted)
    }

    /// States in which the provider already holds the job.
    pub fn is_with_provider(&self) -> bool {
        matches!(self, Self::SubmittedToLulu | Self::InProduction | Self::Shipped)
    }
}

/// Shipping speed offered by the print provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingLevel {
    Mail,
    PriorityMail,
    Ground,
    Expedited,
    Express,
}

wire_enum!(ShippingLevel, "shipping level", {
    Mail => "MAIL",
    PriorityMail => "PRIORITY_MAIL",
    Ground => "GROUND",
    Expedited => "EXPEDITED",
    Express => "EXPRESS",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 200))]
    pub street1: String,
    #[serde(default)]
    pub street2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[serde(default)]
    pub state_code: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postcode: String,
    #[validate(length(equal = 2))]
    pub country_code: String,
    #[validate(length(min = 5, max = 20))]
    pub phone_number: String,
}

/// Steps of print fulfillment, persisted so callers can poll progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStep {
    RenderingInterior,
    RenderingCover,
    Uploading,
    SavingUrls,
    Submitting,
    Submitted,
}

wire_enum!(FulfillmentStep, "fulfillment step", {
    RenderingInterior => "RENDERING_INTERIOR",
    RenderingCover => "RENDERING_COVER",
    Uploading => "UPLOADING",
    SavingUrls => "SAVING_URLS",
    Submitting => "SUBMITTING",
    Submitted => "SUBMITTED",
});

#[derive(Debug, Clone)]
pub struct PrintOrder {
    pub id: Uuid,
    pub book_id: Uuid,
    pub user_id: Uuid,
    pub status: PrintOrderStatus,
    pub quantity: u32,
    pub page_count: u32,
    pub shipping_address: ShippingAddress,
    pub contact_email: String,
    pub shipping_level: ShippingLevel,
    pub interior_pdf_url: Option<String>,
    pub cover_pdf_url: Option<String>,
    pub lulu_print_job_id: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub provider_status: Option<String>,
    pub progress_step: Option<FulfillmentStep>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to insert a new order row.
#[derive(Debug, Clone)]
pub struct NewPrintOrder {
    pub book_id: Uuid,
    pub user_id: Uuid,
    pub status: PrintOrderStatus,
    pub quantity: u32,
    pub page_count: u32,
    pub shipping_address: ShippingAddress,
    pub contact_email: String,
    pub shipping_level: ShippingLevel,
}

//=========================================================================================
// Print Provider Values
//=========================================================================================

/// Itemized cost returned by the provider, amounts kept as the provider's decimal strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintCostQuote {
    pub line_item_cost_excl_tax: String,
    pub shipping_cost_excl_tax: String,
    pub fulfillment_cost_excl_tax: String,
    pub total_tax: String,
    pub total_cost_excl_tax: String,
    pub total_cost_incl_tax: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub level: String,
    pub cost_excl_tax: String,
    pub currency: String,
    pub min_delivery_date: Option<String>,
    pub max_delivery_date: Option<String>,
}

/// Everything the provider needs to print and ship one order.
#[derive(Debug, Clone)]
pub struct PrintSubmission {
    pub external_id: String,
    pub title: String,
    pub contact_email: String,
    pub quantity: u32,
    pub interior_pdf_url: String,
    pub cover_pdf_url: String,
    pub shipping_address: ShippingAddress,
    pub shipping_level: ShippingLevel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderJobStatus {
    pub job_id: String,
    pub status: String,
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_parse_back() {
        for status in [
            BookStatus::Draft,
            BookStatus::StoryReady,
            BookStatus::Partial,
        ] {
            assert_eq!(status.as_str().parse::<BookStatus>(), Ok(status));
        }
        assert!("SUBMITTED".parse::<PrintOrderStatus>().is_err());
        assert_eq!(
            "SUBMITTED_TO_LULU".parse::<PrintOrderStatus>(),
            Ok(PrintOrderStatus::SubmittedToLulu)
        );
    }

    #[test]
    fn art_style_parsing_is_case_insensitive() {
        assert_eq!(" Watercolor ".parse::<ArtStyle>(), Ok(ArtStyle::Watercolor));
        let err = "oil".parse::<ArtStyle>().unwrap_err();
        assert_eq!(err.kind, "art style");
    }

    #[test]
    fn display_image_prefers_generated_illustration() {
        let mut page = Page {
            id: Uuid::new_v4(),
            book_id: Uuid::new_v4(),
            index: 1,
            page_number: 2,
            is_title_page: false,
            asset_id: None,
            original_image_url: Some("https://img/original.jpg".into()),
            text: Some("  ".into()),
            text_confirmed: false,
            illustration_notes: None,
            generated_image_url: None,
            moderation_status: ModerationStatus::Pending,
            moderation_reason: None,
        };
        assert!(!page.has_text());
        assert_eq!(page.display_image_url(), Some("https://img/original.jpg"));
        page.generated_image_url = Some("https://img/generated.png".into());
        assert_eq!(page.display_image_url(), Some("https://img/generated.png"));
    }
}
