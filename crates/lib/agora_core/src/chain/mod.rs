//! Typed call surface of the voting contract.
//!
//! One method per contract call the client uses. Writes return a transaction
//! hash immediately and only take effect once
//! [`ChainGateway::wait_for_confirmation`] reports a receipt.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use crate::address::Address;
use crate::domain::DomainRecord;
use crate::error::AgoraError;
use crate::proposals::Proposal;

/// Amounts attached to payable calls.
pub type Wei = u128;

/// Gas limit the admin panel attaches to each `addModulus` call.
pub const DEFAULT_MODULUS_GAS_LIMIT: u64 = 500_000;

/// Hash of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxHash(pub String);

impl std::fmt::Display for TxHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
}

/// Contract events the client can query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    VoterRegistered {
        voter: Address,
    },
    DomainAdded {
        domain: String,
    },
    ProposalCreated {
        content_hash: String,
        title: String,
        proposer: Address,
    },
    VoteCast {
        content_hash: String,
        voter: Address,
        support: bool,
    },
}

/// Event filter, one per event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFilter {
    VoterRegistered,
    DomainAdded,
    ProposalCreated,
    VoteCast,
}

impl EventFilter {
    pub fn matches(&self, event: &ChainEvent) -> bool {
        matches!(
            (self, event),
            (EventFilter::VoterRegistered, ChainEvent::VoterRegistered { .. })
                | (EventFilter::DomainAdded, ChainEvent::DomainAdded { .. })
                | (EventFilter::ProposalCreated, ChainEvent::ProposalCreated { .. })
                | (EventFilter::VoteCast, ChainEvent::VoteCast { .. })
        )
    }
}

/// Failures reported by the gateway.
///
/// `Reverted` and the specific revert reasons mean the contract rejected the
/// call; `Unavailable` and `Timeout` mean we never got an answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("reverted: {0}")]
    Reverted(String),

    #[error("insufficient fee: required {required}, provided {provided}")]
    InsufficientFee { required: Wei, provided: Wei },

    #[error("parent domain not found: {0}")]
    ParentNotFound(String),

    #[error("domain not found: {0}")]
    DomainNotFound(String),

    #[error("rpc unavailable: {0}")]
    Unavailable(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

impl ChainError {
    /// True when the contract itself refused the call.
    pub fn is_revert(&self) -> bool {
        !matches!(self, ChainError::Unavailable(_) | ChainError::Timeout(_))
    }
}

impl From<ChainError> for AgoraError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Reverted(reason) => AgoraError::ChainCallReverted(reason),
            ChainError::InsufficientFee { required, provided } => {
                AgoraError::InsufficientFee { required, provided }
            }
            ChainError::ParentNotFound(name) => AgoraError::ParentNotFound(name),
            ChainError::DomainNotFound(name) => AgoraError::DomainNotFound(name),
            ChainError::Unavailable(msg) => AgoraError::ChainUnavailable(msg),
            ChainError::Timeout(msg) => AgoraError::Timeout(msg),
        }
    }
}

/// Contract handle bound to one signing account.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Account that signs write calls made through this handle.
    fn signer(&self) -> Address;

    async fn is_admin(&self, account: &Address) -> Result<bool, ChainError>;

    /// Raw `admins` mapping lookup.
    async fn admins(&self, account: &Address) -> Result<bool, ChainError>;

    /// Whether `account` is bound to a verified email on-chain.
    async fn is_registered(&self, account: &Address) -> Result<bool, ChainError>;

    /// Accepted moduli as hex strings.
    async fn get_all_moduli(&self) -> Result<Vec<String>, ChainError>;

    async fn add_modulus(
        &self,
        kid: &str,
        hex_modulus: &str,
        gas_limit: Option<u64>,
    ) -> Result<TxHash, ChainError>;

    async fn get_domains(&self) -> Result<Vec<String>, ChainError>;

    async fn get_domain(&self, name: &str) -> Result<Option<DomainRecord>, ChainError>;

    async fn add_domain(
        &self,
        name: &str,
        power_level: u64,
        parent_name: &str,
        fee: Wei,
    ) -> Result<TxHash, ChainError>;

    async fn renew_domain(&self, name: &str, fee: Wei) -> Result<TxHash, ChainError>;

    async fn can_access_domain(
        &self,
        user_domain: &str,
        target_domain: &str,
    ) -> Result<bool, ChainError>;

    async fn register_with_domain(
        &self,
        header: &str,
        payload: &str,
        signature_hex: &str,
    ) -> Result<TxHash, ChainError>;

    /// View call; `true` establishes the session.
    async fn login(
        &self,
        header: &str,
        payload: &str,
        signature_hex: &str,
    ) -> Result<bool, ChainError>;

    async fn create_proposal(
        &self,
        content_hash: &str,
        creator: &str,
        restrict_domain: bool,
    ) -> Result<TxHash, ChainError>;

    async fn get_all_proposals(&self) -> Result<Vec<Proposal>, ChainError>;

    async fn cast_vote(&self, content_hash: &str, support: bool) -> Result<TxHash, ChainError>;

    async fn wait_for_confirmation(&self, tx: &TxHash) -> Result<Receipt, ChainError>;

    async fn events(&self, filter: EventFilter) -> Result<Vec<ChainEvent>, ChainError>;
}

/// Wait for `tx` to confirm, giving up after `timeout`.
pub async fn confirm(
    gateway: &dyn ChainGateway,
    tx: &TxHash,
    timeout: Duration,
) -> Result<Receipt, ChainError> {
    match tokio::time::timeout(timeout, gateway.wait_for_confirmation(tx)).await {
        Ok(result) => result,
        Err(_) => {
            warn!(tx = %tx, timeout_secs = timeout.as_secs(), "confirmation wait timed out");
            Err(ChainError::Timeout(format!(
                "transaction {tx} not confirmed within {timeout:?}"
            )))
        }
    }
}
