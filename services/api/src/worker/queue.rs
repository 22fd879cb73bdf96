//! services/api/src/worker/queue.rs
//!
//! `JobQueue` backed by apalis Postgres storage, one namespace per job kind.

use apalis::prelude::Storage;
use apalis_sql::{postgres::PostgresStorage, Config as ApalisSqlConfig};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::PgPool;
use storyforge_core::jobs::{
    BookFinalizationJob, IllustrationGenerationJob, JobKind, PrintFulfillmentJob,
    StoryGenerationJob,
};
use storyforge_core::ports::{JobQueue, PortError, PortResult};
use tracing::debug;

pub fn storage_for<T>(pool: &PgPool, kind: JobKind) -> PostgresStorage<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static,
{
    PostgresStorage::new_with_config(pool.clone(), ApalisSqlConfig::new(kind.as_str()))
}

#[derive(Clone)]
pub struct ApalisJobQueue {
    story: PostgresStorage<StoryGenerationJob>,
    illustration: PostgresStorage<IllustrationGenerationJob>,
    finalization: PostgresStorage<BookFinalizationJob>,
    fulfillment: PostgresStorage<PrintFulfillmentJob>,
}

impl ApalisJobQueue {
    pub fn new(pool: &PgPool) -> Self {
        Self {
            story: storage_for(pool, JobKind::StoryGeneration),
            illustration: storage_for(pool, JobKind::IllustrationGeneration),
            finalization: storage_for(pool, JobKind::BookFinalization),
            fulfillment: storage_for(pool, JobKind::PrintFulfillment),
        }
    }

    /// Creates the broker's own tables.
    pub async fn setup(pool: &PgPool) -> Result<(), sqlx::Error> {
        PostgresStorage::setup(pool).await
    }
}

async fn push<T>(storage: &PostgresStorage<T>, kind: JobKind, job: T) -> PortResult<()>
where
    T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static,
{
    let mut storage = storage.clone();
    storage
        .push(job)
        .await
        .map_err(|e| PortError::Unexpected(format!("could not enqueue {}: {}", kind.as_str(), e)))?;
    debug!(job_kind = kind.as_str(), "job enqueued");
    Ok(())
}

#[async_trait]
impl JobQueue for ApalisJobQueue {
    async fn enqueue_story(&self, job: StoryGenerationJob) -> PortResult<()> {
        push(&self.story, JobKind::StoryGeneration, job).await
    }

    async fn enqueue_illustration(&self, job: IllustrationGenerationJob) -> PortResult<()> {
        push(&self.illustration, JobKind::IllustrationGeneration, job).await
    }

    async fn enqueue_finalization(&self, job: BookFinalizationJob) -> PortResult<()> {
        push(&self.finalization, JobKind::BookFinalization, job).await
    }

    async fn enqueue_fulfillment(&self, job: PrintFulfillmentJob) -> PortResult<()> {
        push(&self.fulfillment, JobKind::PrintFulfillment, job).await
    }
}
