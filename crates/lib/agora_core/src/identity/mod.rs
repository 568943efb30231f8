//! Wallet-to-email identity binding.
//!
//! The wallet supplies an address and a contract handle; the identity
//! provider supplies a token whose `nonce` claim is derived from that
//! address. [`flow::IdentityBindingFlow`] drives registration and login.

pub mod flow;
pub mod session;

use std::sync::Arc;

use async_trait::async_trait;

use crate::address::Address;
use crate::chain::ChainGateway;
use crate::error::AgoraError;
use crate::nonce::Nonce;

/// Result of a successful wallet connection.
#[derive(Clone)]
pub struct WalletConnection {
    pub address: Address,
    /// Contract handle signing as `address`.
    pub gateway: Arc<dyn ChainGateway>,
}

impl std::fmt::Debug for WalletConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletConnection")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Wallet provider (browser extension, hardware signer, ...).
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Request account access. The user declining is `WalletRejected`.
    async fn connect(&self) -> Result<WalletConnection, AgoraError>;
}

/// Issues identity tokens bound to a nonce.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn request_token(&self, nonce: &Nonce) -> Result<String, AgoraError>;
}

/// Provider for a token obtained out of band, e.g. pasted from a browser
/// sign-in. The nonce is checked later by the flow, not here.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn request_token(&self, _nonce: &Nonce) -> Result<String, AgoraError> {
        if self.token.trim().is_empty() {
            return Err(AgoraError::IdentityProviderError("no token supplied".into()));
        }
        Ok(self.token.trim().to_string())
    }
}
