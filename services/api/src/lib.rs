//! services/api/src/lib.rs
//!
//! The `api` service: adapters behind the core ports, configuration, the
//! apalis job workers and the REST surface shared by the `api` and `worker`
//! binaries.

pub mod adapters;
pub mod config;
pub mod error;
pub mod web;
pub mod worker;
