//! The `PricingService` capability: the payment/pricing collaborator used to
//! assess a bundle's reward.

use async_trait::async_trait;
use bf_types::Result;

/// Quoted pricing for a bundle about to be submitted to the gateway.
#[derive(Debug, Clone, Copy)]
pub struct BundleReward {
    /// The reward, in winston, to attach to the bundle transaction.
    pub reward: u64,
}

#[async_trait]
pub trait PricingService: Send + Sync {
    /// Returns the reward required to post a bundle transaction of `byte_count` bytes.
    async fn get_bundle_reward(&self, byte_count: u64) -> Result<BundleReward>;

    /// Returns the current USD-to-AR exchange rate, used to annotate posted
    /// bundles. A failure here is a soft failure: post
    /// still proceeds without the rate.
    async fn get_usd_to_ar_rate(&self) -> Result<f64>;
}
