//! services/api/src/web/mod.rs
//!
//! The HTTP surface: REST handlers, their OpenAPI document and the router.

pub mod rest;
pub mod state;

pub use rest::{router, ApiDoc};
pub use state::AppState;
