#![cfg_attr(
    not(test),
    deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)
)]

//! HTTP clients for the gateway and pricing collaborators, and an Arweave
//! JWK wallet signer.

pub mod gateway;
pub mod pricing;
pub mod wallet;

pub use gateway::HttpGateway;
pub use pricing::HttpPricingService;
pub use wallet::JwkWallet;
