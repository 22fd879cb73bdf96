//! services/api/src/worker/context.rs
//!
//! Shared state handed to every job handler, and the conversion from stage
//! errors into broker errors.

use crate::adapters::{
    DbAdapter, DropboxDocumentStore, HttpAssetStore, LuluAdapter, OpenAiImageAdapter,
    OpenAiStoryAdapter, PdfRenderer, TextFace,
};
use crate::config::Config;
use crate::error::ApiError;
use crate::worker::queue::ApalisJobQueue;
use apalis::prelude::Error as ApalisError;
use async_openai::{config::OpenAIConfig, Client};
use std::sync::Arc;
use storyforge_core::ports::{
    AssetStore, BookRepository, JobQueue, OrderRepository, PortError,
};
use storyforge_core::stages::{
    FinalizationStage, FulfillmentStage, IllustrationDispatcher, IllustrationStage,
    StoryStage, StyleReferences,
};

/// Every pipeline stage, wired to its adapters.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub story: StoryStage,
    pub illustration: IllustrationStage,
    pub finalization: FinalizationStage,
    pub fulfillment: FulfillmentStage,
}

impl JobWorkerContext {
    /// Builds every external client up front so missing credentials fail at startup.
    pub fn from_config(config: &Config, db: DbAdapter, queue: ApalisJobQueue) -> Result<Self, ApiError> {
        let http = reqwest::Client::new();
        let api_key = config.openai_api_key()?.to_string();

        let openai = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(api_key.clone())
                .with_api_base(config.openai_base_url.clone()),
        );

        let document_token = config.document_store_token.clone().ok_or_else(|| {
            crate::config::ConfigError::MissingVar("DOCUMENT_STORE_TOKEN".to_string())
        })?;

        let books: Arc<dyn BookRepository> = Arc::new(db.clone());
        let orders: Arc<dyn OrderRepository> = Arc::new(db);
        let queue: Arc<dyn JobQueue> = Arc::new(queue);
        let assets: Arc<dyn AssetStore> = Arc::new(HttpAssetStore::new(
            http.clone(),
            config.asset_store_url.clone(),
            config.asset_bucket.clone(),
            config.asset_store_key.clone(),
        ));
        let face = TextFace::load(config.font_path.as_deref())?;

        let story = StoryStage::new(
            books.clone(),
            Arc::new(OpenAiStoryAdapter::new(openai, config.story_model.clone())),
            IllustrationDispatcher::new(books.clone(), queue.clone()),
            config.story_retry,
        );
        let illustration = IllustrationStage::new(
            books.clone(),
            Arc::new(OpenAiImageAdapter::new(
                http.clone(),
                config.openai_base_url.clone(),
                api_key,
                config.image_model.clone(),
            )),
            assets.clone(),
            queue,
            StyleReferences::new(config.style_reference_base_url.clone()),
            config.illustration_retry,
        );
        let fulfillment = FulfillmentStage::new(
            books.clone(),
            orders,
            Arc::new(PdfRenderer::new(assets, face)),
            Arc::new(DropboxDocumentStore::new(
                http.clone(),
                config.document_store_url.clone(),
                config.document_content_url.clone(),
                document_token,
            )),
            Arc::new(LuluAdapter::new(http, config.print_provider.clone())?),
            config.fulfillment_retry,
        );

        Ok(Self {
            story,
            illustration,
            finalization: FinalizationStage::new(books),
            fulfillment,
        })
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`].
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}

/// Convert an error that no retry can fix into an [`ApalisError::Abort`].
pub fn job_aborted<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Abort(Arc::new(boxed))
}

/// Permanent stage errors stop the retry envelope; everything else is retried.
pub fn stage_failed(err: PortError) -> ApalisError {
    if err.is_permanent() {
        job_aborted(err)
    } else {
        job_failed(err)
    }
}
