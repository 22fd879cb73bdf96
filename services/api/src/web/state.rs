//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::adapters::{DbAdapter, LuluAdapter};
use crate::config::Config;
use crate::error::ApiError;
use crate::worker::ApalisJobQueue;
use std::sync::Arc;
use storyforge_core::ports::{BookRepository, JobQueue, OrderRepository};
use storyforge_core::{BookService, OrderService, PageEditor};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub books: BookService,
    pub orders: OrderService,
    pub pages: PageEditor,
}

impl AppState {
    /// Wires the core services to the database, the job queue and the print provider.
    pub fn new(config: Arc<Config>, db: DbAdapter, queue: ApalisJobQueue) -> Result<Self, ApiError> {
        let book_repo: Arc<dyn BookRepository> = Arc::new(db.clone());
        let order_repo: Arc<dyn OrderRepository> = Arc::new(db);
        let queue: Arc<dyn JobQueue> = Arc::new(queue);
        let provider = Arc::new(LuluAdapter::new(
            reqwest::Client::new(),
            config.print_provider.clone(),
        )?);

        Ok(Self {
            books: BookService::new(book_repo.clone(), queue.clone()),
            orders: OrderService::new(
                book_repo.clone(),
                order_repo,
                provider,
                queue,
                config.max_order_quantity,
            ),
            pages: PageEditor::new(book_repo),
            config,
        })
    }
}
