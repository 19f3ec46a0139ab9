use std::fmt;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::{Config, UaaConfig};
use crate::constants::{APP_INSTANCE_HEADER, TOKEN_EXPIRY_MARGIN_SECS};
use crate::store::Rate;

#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("failed to build http client: {0}")]
    Client(String),
    #[error("nozzle request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("nozzle responded with status {status}")]
    Status { status: u16 },
    #[error("token request failed with status {status}")]
    Token { status: u16 },
}

/// HTTP client shared by every poller.
#[derive(Debug)]
pub struct NozzleClient {
    client: reqwest::Client,
    tokens: Option<TokenSource>,
}

impl NozzleClient {
    pub fn new(config: &Config) -> Result<Self, PollError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.worker.poll_timeout_secs))
            .danger_accept_invalid_certs(config.tls.insecure_skip_verify)
            .build()
            .map_err(|e| PollError::Client(e.to_string()))?;

        if config.tls.insecure_skip_verify {
            tracing::warn!("TLS certificate verification disabled for nozzle requests");
        }

        let tokens = config
            .uaa
            .as_ref()
            .map(|uaa| TokenSource::new(client.clone(), uaa));

        Ok(Self { client, tokens })
    }

    /// Fetch the bucket at `timestamp` from the nozzle at `addr`.
    ///
    /// `Ok(None)` means the nozzle has no data for that bucket yet.
    pub async fn fetch_rate(
        &self,
        addr: &str,
        instance: Option<&str>,
        timestamp: i64,
    ) -> Result<Option<Rate>, PollError> {
        let url = format!("{}/state/{}", normalize_addr(addr), timestamp);

        let mut request = self.client.get(&url);
        if let Some(instance) = instance {
            request = request.header(APP_INSTANCE_HEADER, instance);
        }
        if let Some(tokens) = &self.tokens {
            request = request.header(
                reqwest::header::AUTHORIZATION,
                format!("bearer {}", tokens.token().await?),
            );
        }

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<Rate>().await?)),
            status => {
                if status == StatusCode::UNAUTHORIZED {
                    if let Some(tokens) = &self.tokens {
                        tokens.invalidate().await;
                    }
                }
                Err(PollError::Status {
                    status: status.as_u16(),
                })
            }
        }
    }
}

/// Prefix scheme-less addresses with `https://` and drop trailing slashes.
pub fn normalize_addr(addr: &str) -> String {
    let trimmed = addr.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// OAuth client-credentials token, cached until shortly before expiry.
struct TokenSource {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    fn new(client: reqwest::Client, uaa: &UaaConfig) -> Self {
        Self {
            client,
            token_url: format!("{}/oauth/token", normalize_addr(&uaa.addr)),
            client_id: uaa.client_id.clone(),
            client_secret: uaa.client_secret.clone(),
            cached: Mutex::new(None),
        }
    }

    async fn token(&self) -> Result<String, PollError> {
        // refresh while holding the lock so concurrent pollers fetch one token
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(PollError::Token {
                status: response.status().as_u16(),
            });
        }

        let body: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(body.expires_in.saturating_sub(TOKEN_EXPIRY_MARGIN_SECS));
        tracing::debug!(expires_in = body.expires_in, "Fetched nozzle access token");

        *cached = Some(CachedToken {
            value: body.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(body.access_token)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSource")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***REDACTED***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_normalized() {
        assert_eq!(normalize_addr("nozzle.example.com"), "https://nozzle.example.com");
        assert_eq!(normalize_addr("http://127.0.0.1:8080/"), "http://127.0.0.1:8080");
        assert_eq!(normalize_addr(" https://n.example.com// "), "https://n.example.com");
    }
}
