//! Kraken REST transport.
//!
//! Handles the wire contract only:
//! - Private endpoints: form-encoded POST, nonce first, `API-Key` / `API-Sign` headers
//! - Public endpoints: GET with query string
//! - Unwrapping the `{"error": [...], "result": ...}` envelope
//!
//! Retries, nonce issuance and error classification live in [`crate::exchange`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;
use url::form_urlencoded;

use crate::exchange::{ExchangeTransport, Operation, TransportError};

use super::signer::KrakenSigner;
use super::types::KrakenResponse;

/// Kraken REST API base URL
pub const KRAKEN_URL: &str = "https://api.kraken.com";

/// Transport for the Kraken REST API.
pub struct KrakenTransport {
    http: Client,
    signer: Option<KrakenSigner>,
    base_url: String,
}

impl KrakenTransport {
    /// Create a new client. Without a signer only public endpoints work.
    ///
    /// `request_timeout` is a hard ceiling per HTTP request; the exchange
    /// client applies its own, usually shorter, per-attempt timeout.
    pub fn new(
        signer: Option<KrakenSigner>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("krakenbot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            signer,
            base_url: base_url.into(),
        })
    }

    /// Whether private endpoints can be called.
    pub fn is_authenticated(&self) -> bool {
        self.signer.is_some()
    }

    /// Build the form body with the nonce as first field.
    fn encode_form(params: &[(String, String)], nonce: u64) -> String {
        let mut form = form_urlencoded::Serializer::new(String::new());
        form.append_pair("nonce", &nonce.to_string());
        form.extend_pairs(params);
        form.finish()
    }

    fn encode_query(params: &[(String, String)]) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish()
    }

    fn map_send_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(e.to_string())
        }
    }

    async fn post_private(
        &self,
        operation: Operation,
        params: &[(String, String)],
        nonce: u64,
    ) -> Result<Value, TransportError> {
        let signer = self.signer.as_ref().ok_or_else(|| {
            TransportError::Signing("API credentials not configured".to_string())
        })?;

        let path = operation.path();
        let body = Self::encode_form(params, nonce);
        let signature = signer
            .sign(path, &body, nonce)
            .map_err(|e| TransportError::Signing(e.to_string()))?;

        debug!(operation = %operation, nonce = nonce, "POST (private)");

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("API-Key", signer.api_key())
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(Self::map_send_error)?;

        Self::unwrap_envelope(resp).await
    }

    async fn get_public(
        &self,
        operation: Operation,
        params: &[(String, String)],
    ) -> Result<Value, TransportError> {
        let mut url = format!("{}{}", self.base_url, operation.path());
        if !params.is_empty() {
            url = format!("{}?{}", url, Self::encode_query(params));
        }

        debug!(url = %url, "GET (public)");

        let resp = self.http.get(&url).send().await.map_err(Self::map_send_error)?;

        Self::unwrap_envelope(resp).await
    }

    async fn unwrap_envelope(resp: reqwest::Response) -> Result<Value, TransportError> {
        let status = resp.status();
        let text = resp.text().await.map_err(Self::map_send_error)?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        parse_envelope(&text)
    }
}

/// Split a raw response body into its result payload or exchange error codes.
pub fn parse_envelope(body: &str) -> Result<Value, TransportError> {
    let envelope: KrakenResponse<Value> = serde_json::from_str(body)
        .map_err(|e| TransportError::Malformed(format!("{}: {}", e, body)))?;

    if !envelope.error.is_empty() {
        return Err(TransportError::Exchange(envelope.error));
    }

    envelope
        .result
        .ok_or_else(|| TransportError::Malformed("response carries no result".to_string()))
}

#[async_trait]
impl ExchangeTransport for KrakenTransport {
    async fn send(
        &self,
        operation: Operation,
        params: &[(String, String)],
        nonce: u64,
    ) -> Result<Value, TransportError> {
        if operation.is_private() {
            self.post_private(operation, params, nonce).await
        } else {
            self.get_public(operation, params).await
        }
    }
}

/// Helper to create a client from environment variables.
impl KrakenTransport {
    /// Create from environment variables:
    /// - KRAKEN_API_KEY
    /// - KRAKEN_API_SECRET (base64, as shown by Kraken)
    /// - KRAKEN_API_URL (defaults to the public endpoint)
    ///
    /// Missing credentials yield a public-only client.
    pub fn from_env(request_timeout: Duration) -> Result<Self> {
        let base_url = std::env::var("KRAKEN_API_URL").unwrap_or_else(|_| KRAKEN_URL.to_string());

        let signer = match (
            std::env::var("KRAKEN_API_KEY"),
            std::env::var("KRAKEN_API_SECRET"),
        ) {
            (Ok(key), Ok(secret)) => {
                Some(KrakenSigner::new(key, &secret).context("Invalid KRAKEN_API_SECRET")?)
            }
            _ => None,
        };

        Self::new(signer, base_url, request_timeout)
    }
}
