// @zen-component: AGORA-KeyReconciler
//
//! Works out which provider keys the on-chain verifier does not trust yet.

use std::collections::HashSet;

use super::{SigningKey, normalize_hex_modulus};
use crate::error::AgoraError;

/// Keys whose modulus is absent from the accepted set, in provider order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationResult {
    pub missing: Vec<SigningKey>,
}

impl ReconciliationResult {
    pub fn is_up_to_date(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Build a normalised lookup set from moduli as returned by the chain.
pub fn accepted_set<I, S>(accepted: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    accepted
        .into_iter()
        .map(|m| normalize_hex_modulus(m.as_ref()))
        .collect()
}

/// Compare `current` against the accepted moduli.
///
/// Pure: nothing is submitted. Oversized moduli are still reported as
/// missing; submission is where they get refused.
pub fn reconcile<I, S>(current: &[SigningKey], accepted: I) -> Result<ReconciliationResult, AgoraError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let accepted = accepted_set(accepted);
    let mut missing = Vec::new();

    for key in current {
        if !accepted.contains(&key.modulus_hex()?) {
            missing.push(key.clone());
        }
    }

    Ok(ReconciliationResult { missing })
}

/// Hex moduli of `keys`, in order.
pub fn hex_moduli(keys: &[SigningKey]) -> Result<Vec<String>, AgoraError> {
    keys.iter().map(SigningKey::modulus_hex).collect()
}
