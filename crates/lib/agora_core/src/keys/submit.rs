// @zen-component: AGORA-KeySubmitter
//
//! Admin-side push of missing signing keys, one transaction per key.
//!
//! Not atomic across keys: a failure part-way leaves earlier keys accepted
//! and later ones pending, and the report says which is which.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use super::SigningKey;
use super::reconcile::accepted_set;
use crate::chain::{self, ChainGateway, DEFAULT_MODULUS_GAS_LIMIT, Receipt};
use crate::error::AgoraError;
use crate::guard::InFlight;

/// What happened to one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted(Receipt),
    /// Already on-chain when re-checked just before submitting.
    AlreadyAccepted,
    Failed(AgoraError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySubmission {
    pub key: SigningKey,
    pub outcome: SubmitOutcome,
}

/// Per-key results of one submission run, in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub submissions: Vec<KeySubmission>,
}

impl SubmitReport {
    /// Keys that are still not trusted on-chain.
    pub fn pending(&self) -> Vec<SigningKey> {
        self.submissions
            .iter()
            .filter(|s| matches!(s.outcome, SubmitOutcome::Failed(_)))
            .map(|s| s.key.clone())
            .collect()
    }

    pub fn errors(&self) -> impl Iterator<Item = (&SigningKey, &AgoraError)> {
        self.submissions.iter().filter_map(|s| match &s.outcome {
            SubmitOutcome::Failed(e) => Some((&s.key, e)),
            _ => None,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.errors().next().is_none()
    }
}

/// Submits keys through an admin's gateway.
pub struct KeySubmitter {
    gateway: Arc<dyn ChainGateway>,
    confirm_timeout: Duration,
    gas_limit: u64,
    in_flight: AtomicBool,
}

impl KeySubmitter {
    pub fn new(gateway: Arc<dyn ChainGateway>, confirm_timeout: Duration) -> Self {
        Self {
            gateway,
            confirm_timeout,
            gas_limit: DEFAULT_MODULUS_GAS_LIMIT,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = gas_limit;
        self
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Submit each key and wait for its confirmation before the next.
    ///
    /// Errors only for conditions that stop the whole run (busy, not an
    /// admin, admin check unreachable). Per-key failures are in the report.
    pub async fn submit_missing_keys(&self, missing: &[SigningKey]) -> Result<SubmitReport, AgoraError> {
        let _guard = InFlight::acquire(&self.in_flight, "key submission")?;

        let signer = self.gateway.signer();
        if !self.gateway.is_admin(&signer).await? {
            return Err(AgoraError::ChainCallReverted("caller is not an admin".into()));
        }

        let mut report = SubmitReport::default();
        for key in missing {
            let outcome = match self.submit_one(key).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(kid = %key.key_id, error = %e, "key submission failed");
                    SubmitOutcome::Failed(e)
                }
            };
            report.submissions.push(KeySubmission {
                key: key.clone(),
                outcome,
            });
        }

        info!(
            submitted = report.submissions.len(),
            pending = report.pending().len(),
            "key submission finished"
        );
        Ok(report)
    }

    async fn submit_one(&self, key: &SigningKey) -> Result<SubmitOutcome, AgoraError> {
        key.check_size()?;
        let hex = key.modulus_hex()?;

        // Another admin may have pushed it since the batch was computed.
        let accepted = accepted_set(self.gateway.get_all_moduli().await?);
        if accepted.contains(&hex) {
            info!(kid = %key.key_id, "key already accepted");
            return Ok(SubmitOutcome::AlreadyAccepted);
        }

        let tx = self
            .gateway
            .add_modulus(&key.key_id, &hex, Some(self.gas_limit))
            .await?;
        let receipt = chain::confirm(self.gateway.as_ref(), &tx, self.confirm_timeout).await?;
        info!(kid = %key.key_id, tx = %receipt.tx_hash, "key accepted");
        Ok(SubmitOutcome::Accepted(receipt))
    }
}
