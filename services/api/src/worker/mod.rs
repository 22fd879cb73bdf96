//! services/api/src/worker/mod.rs
//!
//! Background job processing: one apalis worker per job kind, all backed by
//! the same Postgres database as the rest of the service.

pub mod context;
pub mod handlers;
pub mod queue;

pub use context::JobWorkerContext;
pub use queue::ApalisJobQueue;

use crate::config::Config;
use crate::error::ApiError;
use apalis::{
    layers::{
        retry::{
            backoff::{ExponentialBackoff, ExponentialBackoffMaker, MakeBackoff},
            BackoffRetryPolicy, HasherRng, RetryPolicy as BrokerRetry,
        },
        WorkerBuilderExt,
    },
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use handlers::{
    process_finalization_job, process_fulfillment_job, process_illustration_job,
    process_story_job,
};
use queue::storage_for;
use sqlx::PgPool;
use std::time::Duration;
use storyforge_core::jobs::{JobKind, RetryPolicy};
use tracing::{error, info};

/// Doubling delays starting at the stage's initial backoff, without jitter.
fn stage_backoff(policy: RetryPolicy) -> Result<ExponentialBackoff, ApiError> {
    let min = policy.backoff_for(2);
    let max = policy.backoff_for(u32::MAX).max(Duration::from_millis(1));
    let mut maker = ExponentialBackoffMaker::new(min, max, 0.0, HasherRng::default())
        .map_err(|err| ApiError::Internal(format!("invalid retry backoff: {:?}", err)))?;
    Ok(maker.make_backoff())
}

/// The broker's retry envelope for a stage: `max_attempts - 1` redeliveries,
/// each preceded by the stage's backoff.
pub fn broker_retries(
    policy: RetryPolicy,
) -> Result<BackoffRetryPolicy<ExponentialBackoff>, ApiError> {
    Ok(BrokerRetry::retries(policy.max_attempts.saturating_sub(1) as usize)
        .with_backoff(stage_backoff(policy)?))
}

pub fn spawn_job_monitor(
    pool: &PgPool,
    context: JobWorkerContext,
    config: &Config,
) -> Result<tokio::task::JoinHandle<()>, ApiError> {
    let story_worker = WorkerBuilder::new("story-generation-worker")
        .retry(broker_retries(config.story_retry)?)
        .concurrency(2)
        .data(context.clone())
        .backend(storage_for(pool, JobKind::StoryGeneration))
        .build_fn(process_story_job);
    let illustration_worker = WorkerBuilder::new("illustration-generation-worker")
        .retry(broker_retries(config.illustration_retry)?)
        .concurrency(config.illustration_concurrency.max(1))
        .data(context.clone())
        .backend(storage_for(pool, JobKind::IllustrationGeneration))
        .build_fn(process_illustration_job);
    let finalization_worker = WorkerBuilder::new("book-finalization-worker")
        .retry(broker_retries(RetryPolicy::finalization())?)
        .concurrency(2)
        .data(context.clone())
        .backend(storage_for(pool, JobKind::BookFinalization))
        .build_fn(process_finalization_job);
    let fulfillment_worker = WorkerBuilder::new("print-fulfillment-worker")
        .retry(broker_retries(config.fulfillment_retry)?)
        .concurrency(1)
        .data(context)
        .backend(storage_for(pool, JobKind::PrintFulfillment))
        .build_fn(process_fulfillment_job);

    let monitor = Monitor::new()
        .register(story_worker)
        .register(illustration_worker)
        .register(finalization_worker)
        .register(fulfillment_worker);

    info!(
        illustration_concurrency = config.illustration_concurrency,
        "starting job monitor"
    );
    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::context::stage_failed;
    use crate::worker::handlers::delivery_number;
    use apalis::prelude::{Attempt, Data, Error as ApalisError, MemoryStorage, MessageQueue};
    use apalis::layers::retry::backoff::Backoff;
    use std::sync::{Arc, Mutex};
    use storyforge_core::ports::PortError;

    type Deliveries = Arc<Mutex<Vec<u32>>>;

    async fn always_unavailable(
        _page: u32,
        attempt: Attempt,
        seen: Data<Deliveries>,
    ) -> Result<(), ApalisError> {
        seen.lock().unwrap().push(delivery_number(&attempt));
        Err(stage_failed(PortError::Unexpected("image API unavailable".into())))
    }

    #[tokio::test]
    async fn worker_numbers_deliveries_from_one_and_stops_at_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(5));
        let seen: Deliveries = Arc::default();
        let mut storage = MemoryStorage::new();
        storage.enqueue(7u32).await.unwrap();

        let worker = WorkerBuilder::new("delivery-counter")
            .retry(broker_retries(policy).unwrap())
            .data(seen.clone())
            .backend(storage.clone())
            .build_fn(always_unavailable);
        let monitor = tokio::spawn(Monitor::new().register(worker).run());

        for _ in 0..200 {
            if seen.lock().unwrap().len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.abort();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn broker_backoff_doubles_from_the_stage_initial_delay() {
        let policy = RetryPolicy::story();
        let mut backoff = stage_backoff(policy).unwrap();

        for delivery in 2..=policy.max_attempts {
            let start = tokio::time::Instant::now();
            let sleep = backoff.next_backoff();
            let waited = sleep.deadline() - start;
            let expected = policy.backoff_for(delivery);
            assert!(
                waited >= expected && waited < expected + Duration::from_secs(1),
                "delivery {} waited {:?}, expected {:?}",
                delivery,
                waited,
                expected
            );
        }
    }

    #[test]
    fn zero_backoff_still_builds_a_retry_policy() {
        assert!(stage_backoff(RetryPolicy::new(2, Duration::ZERO)).is_ok());
        assert!(broker_retries(RetryPolicy::new(2, Duration::ZERO)).is_ok());
    }
}
