//! # agora_core
//!
//! Wallet-bound Google identity and domain-scoped voting for Agora.
//!
//! The wallet's address becomes a nonce inside the identity token, the token
//! is checked against the provider's signing keys on-chain, and the email
//! domain then decides which proposals a voter may see and vote on.

pub mod address;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
mod guard;
pub mod identity;
pub mod keys;
pub mod nonce;
pub mod proposals;
pub mod token;

pub use address::Address;
pub use error::{AgoraError, Result};
pub use nonce::Nonce;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
