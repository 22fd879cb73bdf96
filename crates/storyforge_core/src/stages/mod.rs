//! crates/storyforge_core/src/stages/mod.rs
//!
//! The four asynchronous pipeline stages plus the illustration fan-out they share.

pub mod dispatch;
pub mod finalize;
pub mod fulfillment;
pub mod illustration;
pub mod story;

pub use dispatch::IllustrationDispatcher;
pub use finalize::{FinalizationStage, FinalizeOutcome};
pub use fulfillment::{FulfillmentOutcome, FulfillmentStage};
pub use illustration::{IllustrationOutcome, IllustrationStage, StyleReferences};
pub use story::{StoryOutcome, StoryStage};
