//! services/api/src/worker/handlers.rs
//!
//! apalis entry points. Each handler reads the broker's delivery number, runs
//! the stage and maps its error onto retry-or-abort. Delays between deliveries
//! belong to the retry layer built in `worker::broker_retries`.

use crate::worker::context::{stage_failed, JobWorkerContext};
use apalis::prelude::{Attempt, Data, Error as ApalisError};
use storyforge_core::jobs::{
    BookFinalizationJob, IllustrationGenerationJob, PrintFulfillmentJob, StoryGenerationJob,
};
use storyforge_core::stages::{FinalizeOutcome, FulfillmentOutcome, IllustrationOutcome};
use tracing::{info, warn};

/// Under a worker the tracker has already counted this delivery, so the
/// counter is 1-based by the time a handler sees it.
pub fn delivery_number(attempt: &Attempt) -> u32 {
    (attempt.current() as u32).max(1)
}

pub async fn process_story_job(
    job: StoryGenerationJob,
    attempt: Attempt,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let delivery = delivery_number(&attempt);
    let outcome = ctx.story.run(&job, delivery).await.map_err(|err| {
        warn!(book_id = %job.book_id, delivery, error = %err, "story job failed");
        stage_failed(err)
    })?;
    info!(
        book_id = %job.book_id,
        pages = outcome.pages_written,
        placeholders = outcome.placeholders,
        dispatched = outcome.illustrations_dispatched,
        "story job finished"
    );
    Ok(())
}

pub async fn process_illustration_job(
    job: IllustrationGenerationJob,
    attempt: Attempt,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let delivery = delivery_number(&attempt);
    match ctx.illustration.run(&job, delivery).await {
        Ok(IllustrationOutcome::Illustrated { image_url }) => {
            info!(book_id = %job.book_id, page_id = %job.page_id, %image_url, "page illustrated");
            Ok(())
        }
        Ok(IllustrationOutcome::Flagged { reason }) => {
            info!(book_id = %job.book_id, page_id = %job.page_id, %reason, "page flagged");
            Ok(())
        }
        Ok(IllustrationOutcome::Failed { reason }) => {
            info!(book_id = %job.book_id, page_id = %job.page_id, %reason, "page already failed, nothing to redo");
            Ok(())
        }
        Err(err) => {
            warn!(book_id = %job.book_id, page_id = %job.page_id, delivery, error = %err, "illustration job failed");
            Err(stage_failed(err))
        }
    }
}

pub async fn process_finalization_job(
    job: BookFinalizationJob,
    attempt: Attempt,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let delivery = delivery_number(&attempt);
    let outcome = ctx.finalization.run(&job).await.map_err(|err| {
        warn!(book_id = %job.book_id, delivery, error = %err, "finalization job failed");
        stage_failed(err)
    })?;
    match outcome {
        FinalizeOutcome::Waiting { remaining } => {
            info!(book_id = %job.book_id, remaining, "book not ready to finalize");
        }
        FinalizeOutcome::Finalized(status) => {
            info!(book_id = %job.book_id, status = status.as_str(), "book finalized");
        }
        FinalizeOutcome::Unchanged(status) => {
            info!(book_id = %job.book_id, status = status.as_str(), "book left unchanged");
        }
    }
    Ok(())
}

pub async fn process_fulfillment_job(
    job: PrintFulfillmentJob,
    attempt: Attempt,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let delivery = delivery_number(&attempt);
    let outcome = ctx.fulfillment.run(&job, delivery).await.map_err(|err| {
        warn!(print_order_id = %job.print_order_id, delivery, error = %err, "fulfillment job failed");
        stage_failed(err)
    })?;
    match outcome {
        FulfillmentOutcome::Submitted { provider_job_id } => {
            info!(print_order_id = %job.print_order_id, %provider_job_id, "print job submitted");
        }
        FulfillmentOutcome::AlreadySubmitted(status) => {
            info!(print_order_id = %job.print_order_id, status = status.as_str(), "order already with provider");
        }
    }
    Ok(())
}
