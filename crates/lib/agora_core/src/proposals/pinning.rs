// @zen-component: AGORA-ContentPinning
//
//! Content-addressed storage for proposal metadata.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::ProposalMetadata;
use crate::error::AgoraError;

pub const PINATA_PIN_URL: &str = "https://api.pinata.cloud/pinning/pinJSONToIPFS";
pub const DEFAULT_GATEWAY: &str = "https://gateway.pinata.cloud";

/// Stores metadata and returns its content hash.
#[async_trait]
pub trait ContentPinner: Send + Sync {
    async fn pin(&self, metadata: &ProposalMetadata) -> Result<String, AgoraError>;

    async fn fetch(&self, content_hash: &str) -> Result<ProposalMetadata, AgoraError>;
}

#[derive(Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Pinata pinning API plus an IPFS HTTP gateway for reads.
#[derive(Debug, Clone)]
pub struct PinataClient {
    client: Client,
    pin_url: String,
    gateway: String,
    jwt: String,
}

impl PinataClient {
    pub fn new(jwt: impl Into<String>, gateway: impl Into<String>, timeout: Duration) -> Result<Self, AgoraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgoraError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            pin_url: PINATA_PIN_URL.to_string(),
            gateway: gateway.into().trim_end_matches('/').to_string(),
            jwt: jwt.into(),
        })
    }

    /// Point pinning at a different endpoint (self-hosted or test server).
    pub fn with_pin_url(mut self, pin_url: impl Into<String>) -> Self {
        self.pin_url = pin_url.into();
        self
    }

    fn transport_error(what: &str, e: reqwest::Error) -> AgoraError {
        if e.is_timeout() {
            AgoraError::Timeout(format!("{what}: {e}"))
        } else {
            AgoraError::UpstreamUnavailable(format!("{what}: {e}"))
        }
    }
}

#[async_trait]
impl ContentPinner for PinataClient {
    async fn pin(&self, metadata: &ProposalMetadata) -> Result<String, AgoraError> {
        let resp = self
            .client
            .post(&self.pin_url)
            .bearer_auth(&self.jwt)
            .json(&json!({ "pinataContent": metadata }))
            .send()
            .await
            .map_err(|e| Self::transport_error("pinning request failed", e))?;

        if !resp.status().is_success() {
            return Err(AgoraError::UpstreamUnavailable(format!(
                "pinning failed: HTTP {}",
                resp.status()
            )));
        }
        let body: PinResponse = resp
            .json()
            .await
            .map_err(|e| AgoraError::UpstreamUnavailable(format!("pinning response unreadable: {e}")))?;
        debug!(hash = %body.ipfs_hash, "metadata pinned");
        Ok(body.ipfs_hash)
    }

    async fn fetch(&self, content_hash: &str) -> Result<ProposalMetadata, AgoraError> {
        let url = format!("{}/ipfs/{}", self.gateway, content_hash);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error("metadata fetch failed", e))?;
        if !resp.status().is_success() {
            return Err(AgoraError::UpstreamUnavailable(format!(
                "metadata fetch for {content_hash}: HTTP {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| AgoraError::UpstreamUnavailable(format!("metadata for {content_hash} unreadable: {e}")))
    }
}

/// In-process pinner for tests and offline demos.
#[derive(Debug, Default)]
pub struct MemoryPinner {
    content: Mutex<HashMap<String, ProposalMetadata>>,
}

impl MemoryPinner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget `content_hash`, as if the pin had been garbage collected.
    pub fn unpin(&self, content_hash: &str) {
        self.content
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(content_hash);
    }
}

#[async_trait]
impl ContentPinner for MemoryPinner {
    async fn pin(&self, metadata: &ProposalMetadata) -> Result<String, AgoraError> {
        let bytes = serde_json::to_vec(metadata)
            .map_err(|e| AgoraError::Validation(format!("metadata not serialisable: {e}")))?;
        let hash = format!("Qm{}", &hex::encode(Sha256::digest(&bytes))[..44]);
        self.content
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(hash.clone(), metadata.clone());
        Ok(hash)
    }

    async fn fetch(&self, content_hash: &str) -> Result<ProposalMetadata, AgoraError> {
        self.content
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(content_hash)
            .cloned()
            .ok_or_else(|| AgoraError::UpstreamUnavailable(format!("content {content_hash} not found")))
    }
}
