//! HTTP client for the pricing/payment service (`PRICING_SERVICE_URL`),
//! used to assess a bundle's posting reward and the current USD/AR rate.

use async_trait::async_trait;
use bf_capabilities::{BundleReward, PricingService};
use bf_types::{PipelineError, Result};
use serde::Deserialize;

pub struct HttpPricingService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPricingService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RewardResponse {
    reward: u64,
}

#[derive(Debug, Deserialize)]
struct RateResponse {
    rate: f64,
}

#[async_trait]
impl PricingService for HttpPricingService {
    async fn get_bundle_reward(&self, byte_count: u64) -> Result<BundleReward> {
        let url = format!("{}/price/{byte_count}", self.base_url);
        let resp: RewardResponse = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Gateway(format!("get_bundle_reward: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::Gateway(format!("get_bundle_reward: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::Gateway(format!("get_bundle_reward: {e}")))?;
        Ok(BundleReward { reward: resp.reward })
    }

    async fn get_usd_to_ar_rate(&self) -> Result<f64> {
        let url = format!("{}/rates/usd", self.base_url);
        let resp: RateResponse = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::Gateway(format!("get_usd_to_ar_rate: {e}")))?
            .error_for_status()
            .map_err(|e| PipelineError::Gateway(format!("get_usd_to_ar_rate: {e}")))?
            .json()
            .await
            .map_err(|e| PipelineError::Gateway(format!("get_usd_to_ar_rate: {e}")))?;
        Ok(resp.rate)
    }
}
