// @zen-component: AGORA-ProposalStore
//
//! Proposal creation, listing and voting for a logged-in session.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::pinning::ContentPinner;
use super::{Proposal, ProposalMetadata, validate_proposal};
use crate::chain::{self, ChainGateway, Receipt};
use crate::error::AgoraError;
use crate::guard::InFlight;
use crate::identity::session::Session;

pub const PROPOSALS_PER_PAGE: usize = 10;

/// How long fetched metadata is reused before it is fetched again.
pub const METADATA_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// A proposal with its metadata, if the metadata could be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalView {
    pub proposal: Proposal,
    pub metadata: Option<ProposalMetadata>,
}

/// One page of proposals, in creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalPage {
    pub items: Vec<ProposalView>,
    pub page: usize,
    pub total: usize,
}

impl ProposalPage {
    pub fn has_more(&self, per_page: usize) -> bool {
        (self.page + 1).saturating_mul(per_page) < self.total
    }
}

pub struct ProposalStore {
    gateway: Arc<dyn ChainGateway>,
    pinner: Arc<dyn ContentPinner>,
    confirm_timeout: Duration,
    cache_ttl: Duration,
    metadata: RwLock<HashMap<String, (Instant, ProposalMetadata)>>,
    proposal_in_flight: AtomicBool,
    vote_in_flight: AtomicBool,
}

impl ProposalStore {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        pinner: Arc<dyn ContentPinner>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            pinner,
            confirm_timeout,
            cache_ttl: METADATA_CACHE_TTL,
            metadata: RwLock::new(HashMap::new()),
            proposal_in_flight: AtomicBool::new(false),
            vote_in_flight: AtomicBool::new(false),
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Validate, sanitize and pin the metadata, then create the proposal.
    ///
    /// Returns the content hash and the confirmation receipt.
    pub async fn create_proposal(
        &self,
        session: &Session,
        title: &str,
        description: &str,
        restrict_domain: bool,
    ) -> Result<(String, Receipt), AgoraError> {
        session.require_logged_in()?;
        validate_proposal(title, description)?;
        let creator = session
            .wallet_address()
            .ok_or_else(|| AgoraError::InvalidState("wallet not connected".into()))?
            .to_string();

        let now = Utc::now();
        let metadata = ProposalMetadata {
            title: title.to_string(),
            description: description.to_string(),
            start_time: now.timestamp(),
            creator,
            timestamp: now.timestamp_millis(),
        }
        .sanitized();
        // Markup-only input can sanitize down to nothing.
        validate_proposal(&metadata.title, &metadata.description)?;

        let _guard = InFlight::acquire(&self.proposal_in_flight, "proposal submission")?;
        let content_hash = self.pinner.pin(&metadata).await?;
        let tx = self
            .gateway
            .create_proposal(&content_hash, &metadata.creator, restrict_domain)
            .await?;
        let receipt = chain::confirm(self.gateway.as_ref(), &tx, self.confirm_timeout).await?;
        info!(hash = %content_hash, restrict_domain, tx = %receipt.tx_hash, "proposal created");
        Ok((content_hash, receipt))
    }

    /// Every proposal, with metadata fetched concurrently.
    pub async fn list(&self, session: &Session) -> Result<Vec<ProposalView>, AgoraError> {
        session.require_logged_in()?;
        let proposals = self.gateway.get_all_proposals().await?;
        Ok(self.with_metadata(proposals).await)
    }

    /// Page `page` (zero-based) of `per_page` proposals. Metadata is fetched
    /// for that page only.
    pub async fn list_page(
        &self,
        session: &Session,
        page: usize,
        per_page: usize,
    ) -> Result<ProposalPage, AgoraError> {
        session.require_logged_in()?;
        if per_page == 0 {
            return Err(AgoraError::Validation("page size must be at least 1".into()));
        }
        let proposals = self.gateway.get_all_proposals().await?;
        let total = proposals.len();
        let window: Vec<Proposal> = proposals
            .into_iter()
            .skip(page.saturating_mul(per_page))
            .take(per_page)
            .collect();
        Ok(ProposalPage {
            items: self.with_metadata(window).await,
            page,
            total,
        })
    }

    async fn with_metadata(&self, proposals: Vec<Proposal>) -> Vec<ProposalView> {
        let fetches = proposals.iter().map(|p| self.metadata_for(&p.content_hash));
        let metadata = join_all(fetches).await;

        proposals
            .into_iter()
            .zip(metadata)
            .map(|(proposal, fetched)| {
                let metadata = match fetched {
                    Ok(m) => Some(m),
                    Err(e) => {
                        debug!(hash = %proposal.content_hash, error = %e, "metadata unavailable");
                        None
                    }
                };
                ProposalView { proposal, metadata }
            })
            .collect()
    }

    /// Cached metadata while fresh, otherwise a fetch. Failures are not cached.
    async fn metadata_for(&self, content_hash: &str) -> Result<ProposalMetadata, AgoraError> {
        if let Some((fetched_at, metadata)) = self.metadata.read().await.get(content_hash)
            && fetched_at.elapsed() < self.cache_ttl
        {
            return Ok(metadata.clone());
        }
        let metadata = self.pinner.fetch(content_hash).await?;
        self.metadata
            .write()
            .await
            .insert(content_hash.to_string(), (Instant::now(), metadata.clone()));
        Ok(metadata)
    }

    /// Proposals the session's email domain may see: unrestricted ones plus
    /// restricted ones whose domain it can access.
    pub async fn visible_to(&self, session: &Session) -> Result<Vec<ProposalView>, AgoraError> {
        let user_domain = session
            .email_domain()
            .ok_or_else(|| AgoraError::InvalidState("no identity token held".into()))?;
        let user_domain = user_domain.as_str();
        let all = self.list(session).await?;

        let checks = all.iter().map(|view| async move {
            if !view.proposal.domain_restricted {
                return Ok(true);
            }
            self.gateway
                .can_access_domain(user_domain, &view.proposal.domain)
                .await
        });
        let allowed = join_all(checks).await;

        let mut visible = Vec::new();
        for (view, allowed) in all.into_iter().zip(allowed) {
            if allowed? {
                visible.push(view);
            }
        }
        Ok(visible)
    }

    /// Vote on `content_hash` and wait for the vote to confirm.
    pub async fn cast_vote(
        &self,
        session: &Session,
        content_hash: &str,
        support: bool,
    ) -> Result<Receipt, AgoraError> {
        session.require_logged_in()?;
        if content_hash.trim().is_empty() {
            return Err(AgoraError::Validation("proposal hash is required".into()));
        }
        let _guard = InFlight::acquire(&self.vote_in_flight, "vote")?;
        let tx = self.gateway.cast_vote(content_hash, support).await?;
        let receipt = chain::confirm(self.gateway.as_ref(), &tx, self.confirm_timeout).await?;
        info!(hash = content_hash, support, tx = %receipt.tx_hash, "vote cast");
        Ok(receipt)
    }
}
