//! Arweave JWK wallet: RSA-PSS/SHA-256 signing plus address derivation.
//! The owner is the wallet's RSA modulus
//! (`n`), base64url-encoded; the address is the base64url SHA-256 digest of
//! the raw modulus bytes.

use async_trait::async_trait;
use bf_capabilities::Wallet;
use bf_types::{PipelineError, Result};
use bytes::Bytes;
use rsa::pss::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{BigUint, RsaPrivateKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};

#[derive(Debug, Deserialize)]
struct ArweaveJwk {
    n: String,
    e: String,
    d: String,
    p: String,
    q: String,
}

pub struct JwkWallet {
    owner: String,
    address: String,
    signing_key: SigningKey<Sha256>,
}

impl JwkWallet {
    /// Parses an Arweave JWK (as produced by `arweave-js`'s wallet generator)
    /// from its JSON representation.
    pub fn from_jwk_json(json: &str) -> Result<Self> {
        let jwk: ArweaveJwk = serde_json::from_str(json)
            .map_err(|e| PipelineError::Fatal(format!("invalid wallet jwk: {e}")))?;

        let n_bytes = decode_b64url(&jwk.n)?;
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&decode_b64url(&jwk.e)?);
        let d = BigUint::from_bytes_be(&decode_b64url(&jwk.d)?);
        let p = BigUint::from_bytes_be(&decode_b64url(&jwk.p)?);
        let q = BigUint::from_bytes_be(&decode_b64url(&jwk.q)?);

        let private_key = RsaPrivateKey::from_components(n, e, d, vec![p, q])
            .map_err(|e| PipelineError::Fatal(format!("invalid rsa key components: {e}")))?;

        let owner = jwk.n.clone();
        let mut hasher = Sha256::new();
        hasher.update(&n_bytes);
        let address = data_encoding::BASE64URL_NOPAD.encode(&hasher.finalize());

        Ok(Self {
            owner,
            address,
            signing_key: SigningKey::<Sha256>::new(private_key),
        })
    }

    pub async fn from_file(path: &std::path::Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::Fatal(format!("reading wallet file {}: {e}", path.display())))?;
        Self::from_jwk_json(&contents)
    }
}

#[async_trait]
impl Wallet for JwkWallet {
    fn owner(&self) -> &str {
        &self.owner
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn sign(&self, message: &[u8]) -> Result<Bytes> {
        let message = message.to_vec();
        let signing_key = self.signing_key.clone();
        tokio::task::spawn_blocking(move || {
            let mut rng = rand::thread_rng();
            let signature = signing_key.sign_with_rng(&mut rng, &message);
            Bytes::from(signature.to_vec())
        })
        .await
        .map_err(|e| PipelineError::Fatal(format!("signing task panicked: {e}")))
    }
}

fn decode_b64url(s: &str) -> Result<Vec<u8>> {
    data_encoding::BASE64URL_NOPAD
        .decode(s.as_bytes())
        .map_err(|e| PipelineError::Fatal(format!("invalid base64url in jwk field: {e}")))
}
