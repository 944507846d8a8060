//! HMAC-SHA512 request signing for Kraken private endpoints.
//!
//! 1. SHA256(nonce + POST data)
//! 2. HMAC-SHA512(uri_path + sha256_digest) keyed with the base64-decoded secret
//! 3. Base64 encode the result into the `API-Sign` header

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;

type HmacSha512 = Hmac<Sha512>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Invalid base64 API secret: {0}")]
    InvalidSecret(String),

    #[error("Unusable signing key")]
    InvalidKey,
}

/// Signs private Kraken requests.
#[derive(Clone)]
pub struct KrakenSigner {
    api_key: String,
    api_secret: Vec<u8>,
}

impl std::fmt::Debug for KrakenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KrakenSigner")
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl KrakenSigner {
    pub fn new(api_key: impl Into<String>, api_secret_b64: &str) -> Result<Self, SignerError> {
        let api_secret = BASE64
            .decode(api_secret_b64.trim())
            .map_err(|e| SignerError::InvalidSecret(e.to_string()))?;

        Ok(Self {
            api_key: api_key.into(),
            api_secret,
        })
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Signature for the `API-Sign` header. `post_data` must already contain the nonce.
    pub fn sign(&self, uri_path: &str, post_data: &str, nonce: u64) -> Result<String, SignerError> {
        let mut sha256 = Sha256::new();
        sha256.update(nonce.to_string().as_bytes());
        sha256.update(post_data.as_bytes());
        let digest = sha256.finalize();

        let mut mac =
            HmacSha512::new_from_slice(&self.api_secret).map_err(|_| SignerError::InvalidKey)?;
        mac.update(uri_path.as_bytes());
        mac.update(&digest);

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }
}
