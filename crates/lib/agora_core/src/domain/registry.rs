// @zen-component: AGORA-DomainRegistry
//
//! Client side of the contract's domain calls.
//!
//! Writes attach the configured fee, wait for confirmation, and only then
//! refresh the cached domain list. A confirmed write is reported as done even
//! if that refresh fails; the cache is then marked stale.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::DomainRecord;
use crate::chain::{self, ChainGateway, Receipt, Wei};
use crate::error::AgoraError;

/// Domain calls against one gateway, with the last confirmed domain list.
pub struct DomainRegistry {
    gateway: Arc<dyn ChainGateway>,
    registration_fee: Wei,
    renewal_fee: Wei,
    confirm_timeout: Duration,
    domains: Vec<String>,
    refresh_error: Option<AgoraError>,
}

impl DomainRegistry {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        registration_fee: Wei,
        renewal_fee: Wei,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            registration_fee,
            renewal_fee,
            confirm_timeout,
            domains: Vec::new(),
            refresh_error: None,
        }
    }

    /// Domain list as of the last refresh.
    pub fn cached(&self) -> &[String] {
        &self.domains
    }

    /// Why the cached list may be behind the chain, if the last refresh failed.
    pub fn refresh_error(&self) -> Option<&AgoraError> {
        self.refresh_error.as_ref()
    }

    /// Re-read the domain list from the chain.
    pub async fn refresh(&mut self) -> Result<&[String], AgoraError> {
        match self.gateway.get_domains().await {
            Ok(domains) => {
                self.domains = domains;
                self.refresh_error = None;
                Ok(&self.domains)
            }
            Err(e) => {
                let err = AgoraError::from(e);
                self.refresh_error = Some(err.clone());
                Err(err)
            }
        }
    }

    async fn refresh_after_write(&mut self) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "domain list refresh failed; cached list is stale");
        }
    }

    pub async fn record(&self, name: &str) -> Result<Option<DomainRecord>, AgoraError> {
        Ok(self.gateway.get_domain(name).await?)
    }

    pub async fn can_access(&self, user_domain: &str, target_domain: &str) -> Result<bool, AgoraError> {
        Ok(self
            .gateway
            .can_access_domain(user_domain, target_domain)
            .await?)
    }

    /// Register `name` under `parent_name` (empty for a root domain).
    pub async fn add_domain(
        &mut self,
        name: &str,
        power_level: u64,
        parent_name: &str,
    ) -> Result<Receipt, AgoraError> {
        let name = name.trim();
        let parent_name = parent_name.trim();
        if name.is_empty() {
            return Err(AgoraError::Validation("domain name is required".into()));
        }
        if power_level < 1 {
            return Err(AgoraError::Validation("power level must be at least 1".into()));
        }
        if name == parent_name {
            return Err(AgoraError::Validation(format!(
                "domain '{name}' cannot be its own parent"
            )));
        }

        let tx = self
            .gateway
            .add_domain(name, power_level, parent_name, self.registration_fee)
            .await?;
        let receipt = chain::confirm(self.gateway.as_ref(), &tx, self.confirm_timeout).await?;
        info!(domain = name, parent = parent_name, power_level, tx = %tx, "domain added");
        self.refresh_after_write().await;
        Ok(receipt)
    }

    pub async fn renew_domain(&mut self, name: &str) -> Result<Receipt, AgoraError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AgoraError::Validation("domain name is required".into()));
        }
        let tx = self.gateway.renew_domain(name, self.renewal_fee).await?;
        let receipt = chain::confirm(self.gateway.as_ref(), &tx, self.confirm_timeout).await?;
        info!(domain = name, tx = %tx, "domain renewed");
        self.refresh_after_write().await;
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::chain::ChainError;
    use crate::chain::memory::{MemoryChain, RecordedCall};

    const FEE: Wei = 10_000_000_000_000_000;

    fn registry(chain: &MemoryChain, fee: Wei) -> DomainRegistry {
        let owner = Address::new([1; 20]);
        DomainRegistry::new(
            Arc::new(chain.bind(owner)),
            fee,
            fee,
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn add_domain_refreshes_after_confirmation() {
        let chain = MemoryChain::new(Address::new([1; 20]));
        let mut reg = registry(&chain, FEE);
        reg.add_domain("unitn.it", 2, "").await.unwrap();
        reg.add_domain("studenti.unitn.it", 1, "unitn.it")
            .await
            .unwrap();
        assert_eq!(reg.cached(), ["unitn.it", "studenti.unitn.it"]);
        assert!(reg.can_access("unitn.it", "studenti.unitn.it").await.unwrap());
    }

    #[tokio::test]
    async fn missing_parent_propagates() {
        let chain = MemoryChain::new(Address::new([1; 20]));
        let mut reg = registry(&chain, FEE);
        let err = reg
            .add_domain("studenti.unitn.it", 1, "unitn.it")
            .await
            .unwrap_err();
        assert_eq!(err, AgoraError::ParentNotFound("unitn.it".into()));
        assert!(reg.cached().is_empty());
    }

    #[tokio::test]
    async fn underpaying_is_insufficient_fee() {
        let chain = MemoryChain::new(Address::new([1; 20]));
        let mut reg = registry(&chain, FEE - 1);
        let err = reg.add_domain("unitn.it", 1, "").await.unwrap_err();
        assert_eq!(
            err,
            AgoraError::InsufficientFee {
                required: FEE,
                provided: FEE - 1
            }
        );
    }

    #[tokio::test]
    async fn renew_unknown_domain_is_not_found() {
        let chain = MemoryChain::new(Address::new([1; 20]));
        let mut reg = registry(&chain, FEE);
        let err = reg.renew_domain("ghost.it").await.unwrap_err();
        assert_eq!(err, AgoraError::DomainNotFound("ghost.it".into()));
    }

    #[tokio::test]
    async fn local_validation_happens_before_any_call() {
        let chain = MemoryChain::new(Address::new([1; 20]));
        let mut reg = registry(&chain, FEE);
        assert!(matches!(
            reg.add_domain(" ", 1, "").await,
            Err(AgoraError::Validation(_))
        ));
        assert!(matches!(
            reg.add_domain("a.it", 0, "").await,
            Err(AgoraError::Validation(_))
        ));
        assert!(matches!(
            reg.add_domain("a.it", 1, "a.it").await,
            Err(AgoraError::Validation(_))
        ));
        assert!(chain.recorded_calls().is_empty());
    }

    #[tokio::test]
    async fn confirmed_add_survives_a_failed_refresh() {
        let chain = MemoryChain::new(Address::new([1; 20]));
        let mut reg = registry(&chain, FEE);
        chain.fail_next_domain_list(ChainError::Unavailable("rpc down".into()));

        reg.add_domain("unitn.it", 2, "").await.unwrap();
        assert!(reg.cached().is_empty());
        assert_eq!(
            reg.refresh_error(),
            Some(&AgoraError::ChainUnavailable("rpc down".into()))
        );
        assert!(reg.record("unitn.it").await.unwrap().is_some());

        assert_eq!(reg.refresh().await.unwrap(), ["unitn.it"]);
        assert!(reg.refresh_error().is_none());
    }

    #[tokio::test]
    async fn confirmed_renewal_is_not_retried_after_a_failed_refresh() {
        let chain = MemoryChain::new(Address::new([1; 20]));
        let mut reg = registry(&chain, FEE);
        reg.add_domain("unitn.it", 2, "").await.unwrap();

        chain.fail_next_domain_list(ChainError::Unavailable("rpc down".into()));
        reg.renew_domain("unitn.it").await.unwrap();
        assert_eq!(reg.cached(), ["unitn.it"]);
        assert!(reg.refresh_error().is_some());

        let renewals = chain
            .recorded_calls()
            .into_iter()
            .filter(|call| matches!(call, RecordedCall::RenewDomain { .. }))
            .count();
        assert_eq!(renewals, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_confirmation_times_out() {
        let chain = MemoryChain::new(Address::new([1; 20]));
        chain.stall_confirmations(true);
        let mut reg = registry(&chain, FEE);
        let err = reg.add_domain("unitn.it", 1, "").await.unwrap_err();
        assert!(matches!(err, AgoraError::Timeout(_)), "{err:?}");
        assert!(reg.cached().is_empty());
    }
}
