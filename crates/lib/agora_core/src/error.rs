//! Error taxonomy shared across the identity, key and voting flows.
//!
//! Every variant carries owned strings so a copy of the error can be parked in
//! the session's error slot while the original is returned to the caller.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, AgoraError>;

/// Errors surfaced by Agora operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgoraError {
    #[error("Identity provider key endpoint unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Malformed key set: {0}")]
    MalformedKeySet(String),

    #[error("Malformed identity token: {0}")]
    MalformedToken(String),

    #[error("Modulus for key '{kid}' is {bytes} bytes (maximum {max})")]
    ModulusTooLarge { kid: String, bytes: usize, max: usize },

    #[error("No wallet provider available")]
    WalletUnavailable,

    #[error("Wallet connection request was rejected")]
    WalletRejected,

    #[error("Identity provider error: {0}")]
    IdentityProviderError(String),

    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("Insufficient fee: required {required} wei, provided {provided} wei")]
    InsufficientFee { required: u128, provided: u128 },

    #[error("Parent domain not found: {0}")]
    ParentNotFound(String),

    #[error("Domain not found: {0}")]
    DomainNotFound(String),

    #[error("Contract call reverted: {0}")]
    ChainCallReverted(String),

    #[error("Chain RPC unavailable: {0}")]
    ChainUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation already in progress: {0}")]
    Busy(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgoraError {
    /// True for failures raised by local checks, before any network or chain call.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AgoraError::MalformedToken(_)
                | AgoraError::ModulusTooLarge { .. }
                | AgoraError::Validation(_)
                | AgoraError::InvalidState(_)
                | AgoraError::Busy(_)
                | AgoraError::Config(_)
        )
    }
}
