//! services/api/src/adapters/print_provider.rs
//!
//! Lulu print API client implementing the `PrintProvider` port. Requests are
//! authorized with a client-credentials token that is cached and refreshed
//! shortly before it expires.

use crate::adapters::http::{ensure_success, request_failed};
use crate::config::PrintProviderConfig;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use storyforge_core::domain::{
    PrintCostQuote, PrintSubmission, ProviderJobStatus, ShippingAddress, ShippingOption,
};
use storyforge_core::ports::{CostRequest, PortError, PortResult, PrintProvider};
use tokio::sync::Mutex;
use tracing::{debug, info};

const SERVICE: &str = "print provider";
const TOKEN_PATH: &str = "/auth/realms/glasstree/protocol/openid-connect/token";
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct CostAmount {
    total_cost_excl_tax: String,
}

#[derive(Debug, Deserialize)]
struct CostCalculation {
    #[serde(default)]
    line_item_costs: Vec<CostAmount>,
    shipping_cost: CostAmount,
    fulfillment_cost: Option<CostAmount>,
    total_tax: String,
    total_cost_excl_tax: String,
    total_cost_incl_tax: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct ShippingOptionResponse {
    level: String,
    cost_excl_tax: String,
    currency: String,
    min_delivery_date: Option<String>,
    max_delivery_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrintJobResponse {
    id: Value,
    #[serde(default)]
    status: Option<PrintJobStatusBody>,
}

#[derive(Debug, Deserialize)]
struct PrintJobStatusBody {
    name: String,
    message: Option<String>,
}

/// Lulu returns numeric job ids; we keep them as strings.
fn job_id_string(id: &Value) -> PortResult<String> {
    match id {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        other => Err(PortError::Unexpected(format!(
            "print provider returned an unusable job id: {}",
            other
        ))),
    }
}

fn line_items(config: &PrintProviderConfig, page_count: u32, quantity: u32) -> Value {
    json!([{
        "page_count": page_count,
        "pod_package_id": config.pod_package_id,
        "quantity": quantity,
    }])
}

/// Cost calculations only accept the address fields that affect pricing.
fn pricing_address(address: &ShippingAddress) -> Value {
    json!({
        "city": address.city,
        "country_code": address.country_code,
        "postcode": address.postcode,
        "state_code": address.state_code,
        "street1": address.street1,
        "phone_number": address.phone_number,
    })
}

pub fn print_job_body(config: &PrintProviderConfig, submission: &PrintSubmission) -> Value {
    json!({
        "contact_email": submission.contact_email,
        "external_id": submission.external_id,
        "line_items": [{
            "external_id": submission.external_id,
            "printable_normalization": {
                "cover": { "source_url": submission.cover_pdf_url },
                "interior": { "source_url": submission.interior_pdf_url },
                "pod_package_id": config.pod_package_id,
            },
            "quantity": submission.quantity,
            "title": submission.title,
        }],
        "shipping_address": submission.shipping_address,
        "shipping_level": submission.shipping_level.as_str(),
    })
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

#[derive(Debug)]
pub struct LuluAdapter {
    http: reqwest::Client,
    config: PrintProviderConfig,
    token: Mutex<Option<CachedToken>>,
}

impl LuluAdapter {
    /// Fails fast when the credentials are missing.
    pub fn new(http: reqwest::Client, mut config: PrintProviderConfig) -> PortResult<Self> {
        if config.client_key.trim().is_empty() || config.client_secret.trim().is_empty() {
            return Err(PortError::Validation(
                "print provider client key and secret must be configured".into(),
            ));
        }
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn access_token(&self) -> PortResult<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.is_fresh(Instant::now()) {
                return Ok(token.value.clone());
            }
        }

        debug!("requesting print provider access token");
        let response = self
            .http
            .post(self.url(TOKEN_PATH))
            .basic_auth(&self.config.client_key, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        let token: TokenResponse = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;

        let fresh = CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        };
        *cached = Some(fresh.clone());
        Ok(fresh.value)
    }

    async fn post_json<T: serde::de::DeserializeOwned>(&self, path: &str, body: &Value) -> PortResult<T> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| request_failed(SERVICE, e))
    }
}

//=========================================================================================
// `PrintProvider` Trait Implementation
//=========================================================================================

#[async_trait]
impl PrintProvider for LuluAdapter {
    async fn quote(&self, request: &CostRequest) -> PortResult<PrintCostQuote> {
        let body = json!({
            "line_items": line_items(&self.config, request.page_count, request.quantity),
            "shipping_address": pricing_address(&request.shipping_address),
            "shipping_option": request.shipping_level.as_str(),
        });
        let cost: CostCalculation = self.post_json("/print-job-cost-calculations/", &body).await?;

        let line_item_cost_excl_tax = cost
            .line_item_costs
            .first()
            .map(|c| c.total_cost_excl_tax.clone())
            .unwrap_or_else(|| "0.00".to_string());
        Ok(PrintCostQuote {
            line_item_cost_excl_tax,
            shipping_cost_excl_tax: cost.shipping_cost.total_cost_excl_tax,
            fulfillment_cost_excl_tax: cost
                .fulfillment_cost
                .map(|c| c.total_cost_excl_tax)
                .unwrap_or_else(|| "0.00".to_string()),
            total_tax: cost.total_tax,
            total_cost_excl_tax: cost.total_cost_excl_tax,
            total_cost_incl_tax: cost.total_cost_incl_tax,
            currency: cost.currency,
        })
    }

    async fn shipping_options(&self, request: &CostRequest) -> PortResult<Vec<ShippingOption>> {
        let body = json!({
            "line_items": line_items(&self.config, request.page_count, request.quantity),
            "shipping_address": pricing_address(&request.shipping_address),
        });
        let options: Vec<ShippingOptionResponse> = self.post_json("/shipping-options/", &body).await?;
        Ok(options
            .into_iter()
            .map(|o| ShippingOption {
                level: o.level,
                cost_excl_tax: o.cost_excl_tax,
                currency: o.currency,
                min_delivery_date: o.min_delivery_date,
                max_delivery_date: o.max_delivery_date,
            })
            .collect())
    }

    async fn submit_print_job(&self, submission: &PrintSubmission) -> PortResult<String> {
        let body = print_job_body(&self.config, submission);
        let job: PrintJobResponse = self.post_json("/print-jobs/", &body).await?;
        let job_id = job_id_string(&job.id)?;
        info!(external_id = %submission.external_id, print_job_id = %job_id, "print job created");
        Ok(job_id)
    }

    async fn get_print_job(&self, job_id: &str) -> PortResult<ProviderJobStatus> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(self.url(&format!("/print-jobs/{}/", job_id)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        let job: PrintJobResponse = ensure_success(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| request_failed(SERVICE, e))?;
        let status = job.status.ok_or_else(|| {
            PortError::Unexpected(format!("print job {} has no status", job_id))
        })?;
        Ok(ProviderJobStatus {
            job_id: job_id_string(&job.id)?,
            status: status.name,
            message: status.message,
        })
    }

    async fn cancel_print_job(&self, job_id: &str) -> PortResult<()> {
        let _: Value = self
            .post_json(
                &format!("/print-jobs/{}/status/", job_id),
                &json!({ "name": "CANCELED" }),
            )
            .await?;
        Ok(())
    }
}
