//! Assembles the signed transaction envelope wrapping a bundle for
//! submission to the gateway.

use bf_types::BundleId;

/// The standard ANS-104 bundle format tags, applied to every bundle
/// transaction regardless of its contents.
pub fn bundle_tags() -> Vec<(String, String)> {
    vec![
        ("Bundle-Format".to_string(), "binary".to_string()),
        ("Bundle-Version".to_string(), "2.0.0".to_string()),
    ]
}

/// Computed sizes needed to assemble a bundle's transaction envelope.
#[derive(Debug, Clone, Copy)]
pub struct BundleSizes {
    pub header_byte_count: u64,
    pub payload_byte_count: u64,
}

impl BundleSizes {
    /// The bundle's total on-chain data size: header followed by the
    /// concatenated data item payloads.
    pub fn total_data_size(&self) -> u64 {
        self.header_byte_count + self.payload_byte_count
    }
}

/// A transaction id derived from a bundle's id for logging and correlation;
/// bundle ids and transaction ids share the same id space in ANS-104.
pub fn transaction_id(bundle_id: &BundleId) -> String {
    bundle_id.to_string()
}
