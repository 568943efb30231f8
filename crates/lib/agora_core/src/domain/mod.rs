//! Email-domain hierarchy.
//!
//! Domains carry a power level and an optional parent. A domain may act on
//! behalf of its descendants when its power level is high enough.

pub mod hierarchy;
pub mod registry;

use serde::{Deserialize, Serialize};

/// One registered domain as stored by the contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainRecord {
    pub name: String,
    pub power_level: u64,
    /// Empty for root domains.
    pub parent_name: String,
    /// Unix seconds.
    pub expiry_timestamp: i64,
}

impl DomainRecord {
    pub fn is_root(&self) -> bool {
        self.parent_name.is_empty()
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry_timestamp < now
    }
}
