// @zen-component: AGORA-ReconciliationTask
//
//! Periodic fetch → compare cycle.
//!
//! Each cycle publishes a [`CycleReport`] on a watch channel. Nothing is
//! submitted here; an admin acts on the published `missing` set through
//! [`super::submit::KeySubmitter`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use super::SigningKey;
use super::jwks::KeySetCache;
use super::reconcile::{ReconciliationResult, reconcile};
use crate::chain::ChainGateway;
use crate::error::AgoraError;

/// Outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    Updated {
        missing: Vec<SigningKey>,
        at: DateTime<Utc>,
    },
    /// The cycle could not complete; the previous report still stands.
    Skipped {
        error: AgoraError,
        at: DateTime<Utc>,
    },
}

pub struct ReconciliationTask {
    cache: Mutex<KeySetCache>,
    gateway: Arc<dyn ChainGateway>,
    reports: watch::Sender<Option<CycleReport>>,
}

impl ReconciliationTask {
    pub fn new(cache: KeySetCache, gateway: Arc<dyn ChainGateway>) -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            cache: Mutex::new(cache),
            gateway,
            reports,
        }
    }

    /// Receiver for cycle reports; starts at the latest one.
    pub fn subscribe(&self) -> watch::Receiver<Option<CycleReport>> {
        self.reports.subscribe()
    }

    pub fn latest(&self) -> Option<CycleReport> {
        self.reports.borrow().clone()
    }

    /// Fetch the current keys, read the accepted set and reconcile.
    pub async fn run_cycle(&self) -> Result<ReconciliationResult, AgoraError> {
        let result = self.compute().await;
        let report = match &result {
            Ok(r) => {
                info!(missing = r.missing.len(), "key reconciliation cycle complete");
                CycleReport::Updated {
                    missing: r.missing.clone(),
                    at: Utc::now(),
                }
            }
            Err(e) => {
                warn!(error = %e, "key reconciliation cycle skipped");
                CycleReport::Skipped {
                    error: e.clone(),
                    at: Utc::now(),
                }
            }
        };
        self.reports.send_replace(Some(report));
        result
    }

    async fn compute(&self) -> Result<ReconciliationResult, AgoraError> {
        let keys = self.cache.lock().await.fetch_current_keys().await?;
        let accepted = self.gateway.get_all_moduli().await?;
        reconcile(&keys, accepted)
    }

    /// Run a cycle every `every`, starting immediately. Abort the handle to stop.
    pub fn spawn(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let task = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                // Failures are already published; keep going.
                let _ = task.run_cycle().await;
            }
        })
    }
}
