// @zen-component: AGORA-DomainHierarchy
//
//! In-memory domain hierarchy with power-level access checks.

use std::collections::HashMap;

use super::DomainRecord;
use crate::error::AgoraError;

/// Domain records keyed by name, in registration order.
#[derive(Debug, Clone, Default)]
pub struct DomainHierarchy {
    records: HashMap<String, DomainRecord>,
    order: Vec<String>,
}

impl DomainHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a domain. The parent, when named, must already exist.
    pub fn insert(&mut self, record: DomainRecord) -> Result<(), AgoraError> {
        if record.name.trim().is_empty() {
            return Err(AgoraError::Validation("domain name is empty".into()));
        }
        if record.power_level < 1 {
            return Err(AgoraError::Validation(format!(
                "power level of '{}' must be at least 1",
                record.name
            )));
        }
        if self.records.contains_key(&record.name) {
            return Err(AgoraError::Validation(format!(
                "domain '{}' is already registered",
                record.name
            )));
        }
        if !record.is_root() && !self.records.contains_key(&record.parent_name) {
            return Err(AgoraError::ParentNotFound(record.parent_name));
        }
        self.order.push(record.name.clone());
        self.records.insert(record.name.clone(), record);
        Ok(())
    }

    /// Move a domain's expiry to `expiry_timestamp`.
    pub fn renew(&mut self, name: &str, expiry_timestamp: i64) -> Result<(), AgoraError> {
        let record = self
            .records
            .get_mut(name)
            .ok_or_else(|| AgoraError::DomainNotFound(name.to_string()))?;
        record.expiry_timestamp = expiry_timestamp;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DomainRecord> {
        self.records.get(name)
    }

    /// Domain names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Parent chain of `name`, nearest first.
    pub fn ancestors(&self, name: &str) -> Vec<&DomainRecord> {
        let mut chain = Vec::new();
        let mut current = self.records.get(name);
        // Parents are inserted before children, so a chain is at most len() long.
        while let Some(record) = current {
            if record.is_root() || chain.len() >= self.records.len() {
                break;
            }
            current = self.records.get(&record.parent_name);
            if let Some(parent) = current {
                chain.push(parent);
            }
        }
        chain
    }

    /// Whether `user_domain` may act on behalf of `target_domain` at `now`.
    ///
    /// Holds when both are registered and unexpired, and the user domain is
    /// the target itself, or an unexpired ancestor whose power level is at
    /// least the target's. Every domain between them must be unexpired too.
    pub fn can_access(&self, user_domain: &str, target_domain: &str, now: i64) -> bool {
        let (Some(user), Some(target)) = (self.get(user_domain), self.get(target_domain)) else {
            return false;
        };
        if user.is_expired(now) || target.is_expired(now) {
            return false;
        }
        if user.name == target.name {
            return true;
        }
        for ancestor in self.ancestors(&target.name) {
            if ancestor.is_expired(now) {
                return false;
            }
            if ancestor.name == user.name {
                return user.power_level >= target.power_level;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;
    const YEAR: i64 = 365 * 24 * 3600;

    fn record(name: &str, power: u64, parent: &str, expiry: i64) -> DomainRecord {
        DomainRecord {
            name: name.into(),
            power_level: power,
            parent_name: parent.into(),
            expiry_timestamp: expiry,
        }
    }

    fn unitn() -> DomainHierarchy {
        let mut h = DomainHierarchy::new();
        h.insert(record("unitn.it", 2, "", NOW + YEAR)).unwrap();
        h.insert(record("studenti.unitn.it", 1, "unitn.it", NOW + YEAR))
            .unwrap();
        h.insert(record("lab.studenti.unitn.it", 3, "studenti.unitn.it", NOW + YEAR))
            .unwrap();
        h
    }

    #[test]
    fn insert_requires_existing_parent() {
        let mut h = DomainHierarchy::new();
        let err = h
            .insert(record("studenti.unitn.it", 1, "unitn.it", NOW))
            .unwrap_err();
        assert_eq!(err, AgoraError::ParentNotFound("unitn.it".into()));
        assert!(h.is_empty());
    }

    #[test]
    fn insert_rejects_duplicates_and_zero_power() {
        let mut h = unitn();
        assert!(matches!(
            h.insert(record("unitn.it", 1, "", NOW)),
            Err(AgoraError::Validation(_))
        ));
        assert!(matches!(
            h.insert(record("other.it", 0, "", NOW)),
            Err(AgoraError::Validation(_))
        ));
    }

    #[test]
    fn names_keep_registration_order() {
        assert_eq!(
            unitn().names(),
            vec!["unitn.it", "studenti.unitn.it", "lab.studenti.unitn.it"]
        );
    }

    #[test]
    fn ancestors_walk_to_root() {
        let h = unitn();
        let names: Vec<&str> = h
            .ancestors("lab.studenti.unitn.it")
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["studenti.unitn.it", "unitn.it"]);
        assert!(h.ancestors("unitn.it").is_empty());
    }

    #[test]
    fn ancestor_with_enough_power_can_access_child() {
        let h = unitn();
        assert!(h.can_access("unitn.it", "studenti.unitn.it", NOW));
        assert!(h.can_access("studenti.unitn.it", "studenti.unitn.it", NOW));
    }

    #[test]
    fn ancestor_with_too_little_power_is_denied() {
        let h = unitn();
        // lab requires 3, unitn.it only has 2.
        assert!(!h.can_access("unitn.it", "lab.studenti.unitn.it", NOW));
    }

    #[test]
    fn descendants_cannot_act_for_ancestors() {
        let h = unitn();
        assert!(!h.can_access("studenti.unitn.it", "unitn.it", NOW));
    }

    #[test]
    fn expired_domains_deny_access() {
        let h = unitn();
        assert!(!h.can_access("unitn.it", "studenti.unitn.it", NOW + YEAR + 1));
        assert!(!h.can_access("unknown.it", "unitn.it", NOW));
    }

    #[test]
    fn renew_extends_expiry() {
        let mut h = unitn();
        h.renew("unitn.it", NOW + 3 * YEAR).unwrap();
        h.renew("studenti.unitn.it", NOW + 3 * YEAR).unwrap();
        assert!(h.can_access("unitn.it", "studenti.unitn.it", NOW + 2 * YEAR));
        assert_eq!(
            h.renew("missing.it", NOW),
            Err(AgoraError::DomainNotFound("missing.it".into()))
        );
    }
}
