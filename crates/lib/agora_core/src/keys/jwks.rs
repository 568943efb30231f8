// @zen-component: AGORA-KeySetCache
//
//! Fetches the identity provider's current JSON Web Key Set.
//!
//! Keys rotate, so every reconciliation cycle re-fetches; the last good set
//! is kept only for display and diagnostics.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::SigningKey;
use crate::error::AgoraError;

/// Google's published OAuth2 signing keys.
pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";

/// Default request timeout for the key endpoint.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct JwksResponse {
    keys: Vec<JwkEntry>,
}

#[derive(Deserialize)]
struct JwkEntry {
    kid: String,
    n: Option<String>,
    #[serde(default)]
    kty: Option<String>,
}

/// Key set last fetched successfully.
#[derive(Debug, Clone)]
pub struct CachedKeySet {
    pub keys: Vec<SigningKey>,
    pub fetched_at: DateTime<Utc>,
}

/// Client for the provider's key endpoint.
#[derive(Debug)]
pub struct KeySetCache {
    client: Client,
    url: String,
    timeout: Duration,
    last: Option<CachedKeySet>,
}

impl KeySetCache {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), url, DEFAULT_FETCH_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self::with_client(Client::new(), url, timeout)
    }

    pub fn with_client(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
            last: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Last successfully fetched set, if any.
    pub fn last_known(&self) -> Option<&CachedKeySet> {
        self.last.as_ref()
    }

    /// Fetch the current key set. Always goes to the network.
    pub async fn fetch_current_keys(&mut self) -> Result<Vec<SigningKey>, AgoraError> {
        let keys = match tokio::time::timeout(self.timeout, self.fetch_once()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(url = %self.url, timeout_secs = self.timeout.as_secs(), "key set fetch timed out");
                return Err(AgoraError::Timeout(format!(
                    "key set fetch from {} exceeded {:?}",
                    self.url, self.timeout
                )));
            }
        };
        debug!(url = %self.url, count = keys.len(), "fetched signing keys");
        self.last = Some(CachedKeySet {
            keys: keys.clone(),
            fetched_at: Utc::now(),
        });
        Ok(keys)
    }

    async fn fetch_once(&self) -> Result<Vec<SigningKey>, AgoraError> {
        let resp = self.client.get(&self.url).send().await.map_err(|e| {
            if e.is_timeout() {
                AgoraError::Timeout(format!("key set fetch: {e}"))
            } else {
                AgoraError::UpstreamUnavailable(format!("key set fetch failed: {e}"))
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(AgoraError::UpstreamUnavailable(format!(
                "key endpoint HTTP {status}"
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| AgoraError::UpstreamUnavailable(format!("key set body read failed: {e}")))?;
        parse_key_set(&body)
    }
}

/// Parse a JWKS document into signing keys.
///
/// Non-RSA entries are skipped; an RSA entry without a decodable modulus
/// makes the whole set malformed.
pub fn parse_key_set(body: &str) -> Result<Vec<SigningKey>, AgoraError> {
    let response: JwksResponse = serde_json::from_str(body)
        .map_err(|e| AgoraError::MalformedKeySet(format!("key set parse error: {e}")))?;

    let mut keys = Vec::with_capacity(response.keys.len());
    for entry in response.keys {
        if entry.kty.as_deref().is_some_and(|kty| kty != "RSA") {
            debug!(kid = %entry.kid, "skipping non-RSA key");
            continue;
        }
        let n = entry.n.ok_or_else(|| {
            AgoraError::MalformedKeySet(format!("key '{}' has no modulus", entry.kid))
        })?;
        let key = SigningKey::new(entry.kid, n);
        key.modulus_bytes()?;
        keys.push(key);
    }
    Ok(keys)
}
