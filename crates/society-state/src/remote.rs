//! Remote flag source.
//!
//! The authoritative flag values live behind an HTTP endpoint answering with
//! a JSON object of `key -> bool`. Anything else (no network, a timeout, a
//! non-2xx status, malformed JSON, non-boolean values) is a
//! [`FlagSourceError`], and the controller treats every variant the same way.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Why a fetch produced no usable flags.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlagSourceError {
    /// Connection failure, timeout, or client construction failure.
    #[error("flag request failed: {0}")]
    Request(String),

    /// The server answered with a non-success status.
    #[error("flag endpoint returned status {0}")]
    Status(u16),

    /// The body is not a JSON object of booleans.
    #[error("malformed flag payload: {0}")]
    Malformed(String),
}

/// Something that can produce authoritative flag values.
#[async_trait]
pub trait FlagSource: Send + Sync {
    async fn fetch_flags(&self) -> Result<BTreeMap<String, bool>, FlagSourceError>;
}

/// Parse a flag payload. The body must be a JSON object whose values are all
/// booleans; a single non-boolean rejects the whole payload.
pub fn parse_flag_payload(body: &str) -> Result<BTreeMap<String, bool>, FlagSourceError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| FlagSourceError::Malformed(e.to_string()))?;

    let Value::Object(map) = value else {
        return Err(FlagSourceError::Malformed("expected a JSON object".into()));
    };

    map.into_iter()
        .map(|(key, value)| match value {
            Value::Bool(on) => Ok((key, on)),
            other => Err(FlagSourceError::Malformed(format!(
                "flag `{key}` is not a boolean: {other}"
            ))),
        })
        .collect()
}

/// [`FlagSource`] over HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpFlagSource {
    client: reqwest::Client,
    url: Url,
}

impl HttpFlagSource {
    pub fn new(url: Url, timeout: Duration) -> Result<Self, FlagSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FlagSourceError::Request(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl FlagSource for HttpFlagSource {
    async fn fetch_flags(&self) -> Result<BTreeMap<String, bool>, FlagSourceError> {
        debug!(url = %self.url, "fetching remote flags");

        let response = self
            .client
            .get(self.url.clone())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| FlagSourceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FlagSourceError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FlagSourceError::Request(e.to_string()))?;
        parse_flag_payload(&body)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
