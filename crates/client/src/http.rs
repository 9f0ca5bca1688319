//! REST bootstrap client.
//!
//! The gateway core only needs two things from the REST surface: the
//! gateway endpoint lookup that precedes every connection, and entity
//! fetches for cache misses. Failures map to typed kinds so the caller can
//! tell a retryable condition from a dead end.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use chatwire_shared::{Account, HttpError, Snowflake};

const DEFAULT_API_BASE: &str = "https://api.chatwire.net/v1";

#[derive(Debug, Deserialize)]
struct GatewayEndpoint {
    url: String,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitBody {
    retry_after: Option<f64>,
}

/// HTTP client for the chatwire REST API.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_API_BASE.to_string(),
            token: token.into(),
        }
    }

    /// Overrides the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Looks up the gateway websocket endpoint.
    pub async fn gateway_url(&self) -> Result<String, HttpError> {
        let endpoint: GatewayEndpoint = self.get_json("/gateway").await?;
        Ok(endpoint.url)
    }

    /// Fetches an account by ID. Prefer the cache for general use; this is
    /// an API call.
    pub async fn fetch_account(&self, id: Snowflake) -> Result<Account, HttpError> {
        self.get_json(&format!("/users/{id}")).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        debug!(%url, "issuing REST request");
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .map_err(|err| HttpError::Network(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| HttpError::Decode(err.to_string()));
        }

        match status.as_u16() {
            404 => Err(HttpError::NotFound),
            403 => Err(HttpError::Forbidden),
            429 => {
                let body: RateLimitBody = response.json().await.unwrap_or_default();
                let retry_after_ms = body.retry_after.map(|seconds| (seconds * 1000.0) as u64);
                Err(HttpError::RateLimited { retry_after_ms })
            }
            status if status >= 500 => Err(HttpError::Server { status }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(HttpError::Status { status, body })
            }
        }
    }
}
