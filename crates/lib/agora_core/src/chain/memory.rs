// @zen-component: AGORA-MemoryChain
//
//! In-process ledger with the voting contract's observable behaviour.
//!
//! Backs tests and offline demos. Writes are queued and applied when the
//! transaction is confirmed, so callers that skip the confirmation wait see
//! stale reads exactly as they would against a real node.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{
    ChainError, ChainEvent, ChainGateway, EventFilter, Receipt, TxHash, Wei,
};
use crate::address::Address;
use crate::domain::DomainRecord;
use crate::domain::hierarchy::DomainHierarchy;
use crate::error::AgoraError;
use crate::identity::{Wallet, WalletConnection};
use crate::keys::{MAX_MODULUS_BYTES, normalize_hex_modulus};
use crate::nonce::Nonce;
use crate::proposals::Proposal;
use crate::token::{DecodedToken, IdentityClaims};

/// 0.01 ether.
pub const DEFAULT_DOMAIN_FEE: Wei = 10_000_000_000_000_000;
pub const DOMAIN_TERM_SECS: i64 = 365 * 24 * 3600;
pub const VOTING_PERIOD_SECS: i64 = 24 * 3600;

/// RSA public exponent the contract assumes for every modulus.
const RSA_EXPONENT: [u8; 3] = [0x01, 0x00, 0x01];

/// Checks a token signature against one accepted modulus.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signing_input: &[u8], signature: &[u8], modulus: &[u8]) -> bool;
}

/// RS256 with exponent 65537.
#[derive(Debug, Default, Clone, Copy)]
pub struct Rs256Verifier;

impl SignatureVerifier for Rs256Verifier {
    fn verify(&self, signing_input: &[u8], signature: &[u8], modulus: &[u8]) -> bool {
        let key = DecodingKey::from_rsa_raw_components(modulus, &RSA_EXPONENT);
        let signature = URL_SAFE_NO_PAD.encode(signature);
        jsonwebtoken::crypto::verify(&signature, signing_input, &key, Algorithm::RS256)
            .unwrap_or(false)
    }
}

/// A write call as submitted, kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    AddModulus {
        kid: String,
        hex_modulus: String,
        gas_limit: Option<u64>,
    },
    AddDomain {
        name: String,
        power_level: u64,
        parent_name: String,
        value: Wei,
    },
    RenewDomain {
        name: String,
        value: Wei,
    },
    RegisterWithDomain {
        header: String,
        payload: String,
        signature_hex: String,
    },
    CreateProposal {
        content_hash: String,
        creator: String,
        restrict_domain: bool,
    },
    CastVote {
        content_hash: String,
        support: bool,
    },
}

#[derive(Debug, Clone)]
struct PendingTx {
    sender: Address,
    call: RecordedCall,
}

#[derive(Debug, Clone)]
struct Voter {
    email: String,
    domain: String,
}

struct Ledger {
    admins: HashSet<Address>,
    moduli: Vec<(String, String)>,
    domains: DomainHierarchy,
    voters: HashMap<Address, Voter>,
    emails: HashMap<String, Address>,
    proposals: Vec<Proposal>,
    ballots: HashSet<(String, Address)>,
    events: Vec<ChainEvent>,
    pending: HashMap<TxHash, PendingTx>,
    receipts: HashMap<TxHash, Receipt>,
    calls: Vec<RecordedCall>,
    injected_failures: VecDeque<ChainError>,
    domain_list_failures: VecDeque<ChainError>,
    registration_fee: Wei,
    verifier: Arc<dyn SignatureVerifier>,
    clock: Option<i64>,
    stall: bool,
    block: u64,
    sequence: u64,
}

impl Ledger {
    fn now(&self) -> i64 {
        self.clock.unwrap_or_else(|| Utc::now().timestamp())
    }

    fn is_admin(&self, account: &Address) -> bool {
        self.admins.contains(account)
    }

    fn submit(&mut self, sender: Address, call: RecordedCall) -> TxHash {
        self.sequence += 1;
        let mut hasher = Sha256::new();
        hasher.update(sender.as_bytes());
        hasher.update(self.sequence.to_be_bytes());
        hasher.update(format!("{call:?}").as_bytes());
        let hash = TxHash(format!("0x{}", hex::encode(hasher.finalize())));
        debug!(tx = %hash, sender = %sender, "transaction submitted");
        self.calls.push(call.clone());
        self.pending.insert(hash.clone(), PendingTx { sender, call });
        hash
    }

    fn apply(&mut self, tx: PendingTx) -> Result<(), ChainError> {
        let sender = tx.sender;
        match tx.call {
            RecordedCall::AddModulus {
                kid, hex_modulus, ..
            } => self.add_modulus(&sender, kid, &hex_modulus),
            RecordedCall::AddDomain {
                name,
                power_level,
                parent_name,
                value,
            } => self.add_domain(name, power_level, parent_name, value),
            RecordedCall::RenewDomain { name, value } => self.renew_domain(&name, value),
            RecordedCall::RegisterWithDomain {
                header,
                payload,
                signature_hex,
            } => self.register(&sender, &header, &payload, &signature_hex),
            RecordedCall::CreateProposal {
                content_hash,
                creator,
                restrict_domain,
            } => self.create_proposal(&sender, content_hash, creator, restrict_domain),
            RecordedCall::CastVote {
                content_hash,
                support,
            } => self.cast_vote(&sender, content_hash, support),
        }
    }

    fn add_modulus(&mut self, sender: &Address, kid: String, hex_modulus: &str) -> Result<(), ChainError> {
        if !self.is_admin(sender) {
            return Err(ChainError::Reverted("caller is not an admin".into()));
        }
        let modulus = normalize_hex_modulus(hex_modulus);
        if modulus.len() > 2 + 2 * MAX_MODULUS_BYTES {
            return Err(ChainError::Reverted("modulus too large".into()));
        }
        if hex::decode(&modulus[2..]).is_err() {
            return Err(ChainError::Reverted("modulus is not hex".into()));
        }
        if self.moduli.iter().any(|(_, m)| *m == modulus) {
            return Err(ChainError::Reverted("modulus already registered".into()));
        }
        self.moduli.push((kid, modulus));
        Ok(())
    }

    fn add_domain(
        &mut self,
        name: String,
        power_level: u64,
        parent_name: String,
        value: Wei,
    ) -> Result<(), ChainError> {
        if value < self.registration_fee {
            return Err(ChainError::InsufficientFee {
                required: self.registration_fee,
                provided: value,
            });
        }
        let record = DomainRecord {
            name: name.clone(),
            power_level,
            parent_name,
            expiry_timestamp: self.now() + DOMAIN_TERM_SECS,
        };
        self.domains.insert(record).map_err(revert_reason)?;
        self.events.push(ChainEvent::DomainAdded { domain: name });
        Ok(())
    }

    fn renew_domain(&mut self, name: &str, value: Wei) -> Result<(), ChainError> {
        let current = self
            .domains
            .get(name)
            .ok_or_else(|| ChainError::DomainNotFound(name.to_string()))?
            .expiry_timestamp;
        if value < self.registration_fee {
            return Err(ChainError::InsufficientFee {
                required: self.registration_fee,
                provided: value,
            });
        }
        let expiry = current.max(self.now()) + DOMAIN_TERM_SECS;
        self.domains.renew(name, expiry).map_err(revert_reason)
    }

    /// Signature, nonce and expiry checks shared by registration and login.
    fn verify_identity(
        &self,
        sender: &Address,
        header: &str,
        payload: &str,
        signature_hex: &str,
    ) -> Result<IdentityClaims, ChainError> {
        let token = DecodedToken {
            header: header.to_string(),
            payload: payload.to_string(),
            signature_hex: signature_hex.to_string(),
        };
        let signature = hex::decode(signature_hex.trim_start_matches("0x"))
            .map_err(|_| ChainError::Reverted("signature is not hex".into()))?;
        let parsed: serde_json::Value = serde_json::from_str(header)
            .map_err(|_| ChainError::Reverted("header is not valid JSON".into()))?;

        let candidates: Vec<&(String, String)> = match parsed.get("kid").and_then(|k| k.as_str()) {
            Some(kid) if self.moduli.iter().any(|(k, _)| k == kid) => {
                self.moduli.iter().filter(|(k, _)| k == kid).collect()
            }
            _ => self.moduli.iter().collect(),
        };
        let input = token.signing_input();
        let verified = candidates.iter().any(|(_, modulus)| {
            hex::decode(&modulus[2..])
                .map(|n| self.verifier.verify(input.as_bytes(), &signature, &n))
                .unwrap_or(false)
        });
        if !verified {
            return Err(ChainError::Reverted("invalid signature".into()));
        }

        let claims: IdentityClaims = serde_json::from_str(payload)
            .map_err(|_| ChainError::Reverted("payload is not valid JSON".into()))?;
        let expected = Nonce::for_address(sender);
        if !claims.nonce.as_deref().is_some_and(|n| expected.matches(n)) {
            return Err(ChainError::Reverted("nonce does not match sender".into()));
        }
        if claims.is_expired(self.now()) {
            return Err(ChainError::Reverted("token expired".into()));
        }
        Ok(claims)
    }

    fn register(
        &mut self,
        sender: &Address,
        header: &str,
        payload: &str,
        signature_hex: &str,
    ) -> Result<(), ChainError> {
        let claims = self.verify_identity(sender, header, payload, signature_hex)?;
        let domain = claims
            .email_domain()
            .ok_or_else(|| ChainError::Reverted("email has no domain".into()))?;
        match self.domains.get(&domain) {
            None => return Err(ChainError::Reverted(format!("domain not registered: {domain}"))),
            Some(record) if record.is_expired(self.now()) => {
                return Err(ChainError::Reverted(format!("domain expired: {domain}")));
            }
            Some(_) => {}
        }
        if let Some(voter) = self.voters.get(sender) {
            if voter.email != claims.email {
                return Err(ChainError::Reverted(
                    "address already bound to a different email".into(),
                ));
            }
            return Err(ChainError::Reverted("voter already registered".into()));
        }
        if self.emails.get(&claims.email).is_some_and(|a| a != sender) {
            return Err(ChainError::Reverted(
                "email already bound to another address".into(),
            ));
        }
        self.emails.insert(claims.email.clone(), *sender);
        self.voters.insert(
            *sender,
            Voter {
                email: claims.email,
                domain,
            },
        );
        self.events.push(ChainEvent::VoterRegistered { voter: *sender });
        Ok(())
    }

    fn voter(&self, sender: &Address) -> Result<&Voter, ChainError> {
        self.voters
            .get(sender)
            .ok_or_else(|| ChainError::Reverted("caller is not a registered voter".into()))
    }

    fn create_proposal(
        &mut self,
        sender: &Address,
        content_hash: String,
        creator: String,
        restrict_domain: bool,
    ) -> Result<(), ChainError> {
        let domain = self.voter(sender)?.domain.clone();
        if content_hash.is_empty() {
            return Err(ChainError::Reverted("empty content hash".into()));
        }
        if self.proposals.iter().any(|p| p.content_hash == content_hash) {
            return Err(ChainError::Reverted("proposal already exists".into()));
        }
        self.proposals.push(Proposal {
            content_hash: content_hash.clone(),
            yes_votes: 0,
            no_votes: 0,
            end_time: self.now() + VOTING_PERIOD_SECS,
            domain,
            domain_restricted: restrict_domain,
        });
        self.events.push(ChainEvent::ProposalCreated {
            content_hash,
            title: creator,
            proposer: *sender,
        });
        Ok(())
    }

    fn cast_vote(&mut self, sender: &Address, content_hash: String, support: bool) -> Result<(), ChainError> {
        let voter_domain = self.voter(sender)?.domain.clone();
        let now = self.now();
        let index = self
            .proposals
            .iter()
            .position(|p| p.content_hash == content_hash)
            .ok_or_else(|| ChainError::Reverted("unknown proposal".into()))?;
        let proposal = &self.proposals[index];
        if !proposal.is_open(now) {
            return Err(ChainError::Reverted("voting closed".into()));
        }
        if proposal.domain_restricted && !self.domains.can_access(&voter_domain, &proposal.domain, now) {
            return Err(ChainError::Reverted("domain not permitted to vote".into()));
        }
        if !self.ballots.insert((content_hash.clone(), *sender)) {
            return Err(ChainError::Reverted("already voted".into()));
        }
        let proposal = &mut self.proposals[index];
        if support {
            proposal.yes_votes += 1;
        } else {
            proposal.no_votes += 1;
        }
        self.events.push(ChainEvent::VoteCast {
            content_hash,
            voter: *sender,
            support,
        });
        Ok(())
    }
}

fn revert_reason(e: AgoraError) -> ChainError {
    match e {
        AgoraError::ParentNotFound(name) => ChainError::ParentNotFound(name),
        AgoraError::DomainNotFound(name) => ChainError::DomainNotFound(name),
        AgoraError::Validation(msg) => ChainError::Reverted(msg),
        other => ChainError::Reverted(other.to_string()),
    }
}

/// Shared ledger. Clone freely; clones see the same state.
#[derive(Clone)]
pub struct MemoryChain {
    ledger: Arc<Mutex<Ledger>>,
}

impl MemoryChain {
    /// New ledger with `owner` as the only admin.
    pub fn new(owner: Address) -> Self {
        let mut admins = HashSet::new();
        admins.insert(owner);
        Self {
            ledger: Arc::new(Mutex::new(Ledger {
                admins,
                moduli: Vec::new(),
                domains: DomainHierarchy::new(),
                voters: HashMap::new(),
                emails: HashMap::new(),
                proposals: Vec::new(),
                ballots: HashSet::new(),
                events: Vec::new(),
                pending: HashMap::new(),
                receipts: HashMap::new(),
                calls: Vec::new(),
                injected_failures: VecDeque::new(),
                domain_list_failures: VecDeque::new(),
                registration_fee: DEFAULT_DOMAIN_FEE,
                verifier: Arc::new(Rs256Verifier),
                clock: None,
                stall: false,
                block: 0,
                sequence: 0,
            })),
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        // A panic while holding the lock only happens in a failing test.
        self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_registration_fee(self, fee: Wei) -> Self {
        self.ledger().registration_fee = fee;
        self
    }

    pub fn with_verifier(self, verifier: Arc<dyn SignatureVerifier>) -> Self {
        self.ledger().verifier = verifier;
        self
    }

    pub fn add_admin(&self, account: Address) {
        self.ledger().admins.insert(account);
    }

    /// Gateway handle signing as `signer`.
    pub fn bind(&self, signer: Address) -> MemoryGateway {
        MemoryGateway {
            chain: self.clone(),
            signer,
        }
    }

    /// Pin the ledger clock to `timestamp` (unix seconds).
    pub fn set_time(&self, timestamp: i64) {
        self.ledger().clock = Some(timestamp);
    }

    pub fn advance_time(&self, secs: i64) {
        let mut ledger = self.ledger();
        let now = ledger.now();
        ledger.clock = Some(now + secs);
    }

    /// Confirmation waits started while this is set never complete.
    pub fn stall_confirmations(&self, stall: bool) {
        self.ledger().stall = stall;
    }

    /// The next confirmation fails with `error` and its call is dropped.
    pub fn fail_next_confirmation(&self, error: ChainError) {
        self.ledger().injected_failures.push_back(error);
    }

    /// The next `get_domains` read fails with `error`.
    pub fn fail_next_domain_list(&self, error: ChainError) {
        self.ledger().domain_list_failures.push_back(error);
    }

    /// Every write call submitted so far, confirmed or not.
    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.ledger().calls.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.ledger().pending.len()
    }
}

/// [`ChainGateway`] over a [`MemoryChain`].
#[derive(Clone)]
pub struct MemoryGateway {
    chain: MemoryChain,
    signer: Address,
}

impl MemoryGateway {
    fn submit(&self, call: RecordedCall) -> Result<TxHash, ChainError> {
        Ok(self.chain.ledger().submit(self.signer, call))
    }
}

#[async_trait]
impl ChainGateway for MemoryGateway {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn is_admin(&self, account: &Address) -> Result<bool, ChainError> {
        Ok(self.chain.ledger().is_admin(account))
    }

    async fn admins(&self, account: &Address) -> Result<bool, ChainError> {
        Ok(self.chain.ledger().admins.contains(account))
    }

    async fn is_registered(&self, account: &Address) -> Result<bool, ChainError> {
        Ok(self.chain.ledger().voters.contains_key(account))
    }

    async fn get_all_moduli(&self) -> Result<Vec<String>, ChainError> {
        Ok(self
            .chain
            .ledger()
            .moduli
            .iter()
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn add_modulus(
        &self,
        kid: &str,
        hex_modulus: &str,
        gas_limit: Option<u64>,
    ) -> Result<TxHash, ChainError> {
        self.submit(RecordedCall::AddModulus {
            kid: kid.to_string(),
            hex_modulus: hex_modulus.to_string(),
            gas_limit,
        })
    }

    async fn get_domains(&self) -> Result<Vec<String>, ChainError> {
        let mut ledger = self.chain.ledger();
        if let Some(error) = ledger.domain_list_failures.pop_front() {
            return Err(error);
        }
        Ok(ledger.domains.names())
    }

    async fn get_domain(&self, name: &str) -> Result<Option<DomainRecord>, ChainError> {
        Ok(self.chain.ledger().domains.get(name).cloned())
    }

    async fn add_domain(
        &self,
        name: &str,
        power_level: u64,
        parent_name: &str,
        fee: Wei,
    ) -> Result<TxHash, ChainError> {
        self.submit(RecordedCall::AddDomain {
            name: name.to_string(),
            power_level,
            parent_name: parent_name.to_string(),
            value: fee,
        })
    }

    async fn renew_domain(&self, name: &str, fee: Wei) -> Result<TxHash, ChainError> {
        self.submit(RecordedCall::RenewDomain {
            name: name.to_string(),
            value: fee,
        })
    }

    async fn can_access_domain(
        &self,
        user_domain: &str,
        target_domain: &str,
    ) -> Result<bool, ChainError> {
        let ledger = self.chain.ledger();
        Ok(ledger
            .domains
            .can_access(user_domain, target_domain, ledger.now()))
    }

    async fn register_with_domain(
        &self,
        header: &str,
        payload: &str,
        signature_hex: &str,
    ) -> Result<TxHash, ChainError> {
        self.submit(RecordedCall::RegisterWithDomain {
            header: header.to_string(),
            payload: payload.to_string(),
            signature_hex: signature_hex.to_string(),
        })
    }

    async fn login(
        &self,
        header: &str,
        payload: &str,
        signature_hex: &str,
    ) -> Result<bool, ChainError> {
        let ledger = self.chain.ledger();
        let claims = ledger.verify_identity(&self.signer, header, payload, signature_hex)?;
        Ok(ledger
            .voters
            .get(&self.signer)
            .is_some_and(|v| v.email == claims.email))
    }

    async fn create_proposal(
        &self,
        content_hash: &str,
        creator: &str,
        restrict_domain: bool,
    ) -> Result<TxHash, ChainError> {
        self.submit(RecordedCall::CreateProposal {
            content_hash: content_hash.to_string(),
            creator: creator.to_string(),
            restrict_domain,
        })
    }

    async fn get_all_proposals(&self) -> Result<Vec<Proposal>, ChainError> {
        Ok(self.chain.ledger().proposals.clone())
    }

    async fn cast_vote(&self, content_hash: &str, support: bool) -> Result<TxHash, ChainError> {
        self.submit(RecordedCall::CastVote {
            content_hash: content_hash.to_string(),
            support,
        })
    }

    async fn wait_for_confirmation(&self, tx: &TxHash) -> Result<Receipt, ChainError> {
        let stalled = self.chain.ledger().stall;
        if stalled {
            std::future::pending::<()>().await;
        }

        let mut ledger = self.chain.ledger();
        if let Some(receipt) = ledger.receipts.get(tx) {
            return Ok(receipt.clone());
        }
        let pending = ledger
            .pending
            .remove(tx)
            .ok_or_else(|| ChainError::Reverted(format!("unknown transaction {tx}")))?;
        if let Some(error) = ledger.injected_failures.pop_front() {
            return Err(error);
        }
        ledger.apply(pending)?;
        ledger.block += 1;
        let receipt = Receipt {
            tx_hash: tx.clone(),
            block_number: ledger.block,
        };
        ledger.receipts.insert(tx.clone(), receipt.clone());
        debug!(tx = %tx, block = receipt.block_number, "transaction confirmed");
        Ok(receipt)
    }

    async fn events(&self, filter: EventFilter) -> Result<Vec<ChainEvent>, ChainError> {
        Ok(self
            .chain
            .ledger()
            .events
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }
}

/// Wallet whose accounts live on a [`MemoryChain`].
#[derive(Clone)]
pub struct MemoryWallet {
    chain: MemoryChain,
    account: Address,
    reject: bool,
}

impl MemoryWallet {
    pub fn new(chain: &MemoryChain, account: Address) -> Self {
        Self {
            chain: chain.clone(),
            account,
            reject: false,
        }
    }

    /// A wallet whose user declines every connection request.
    pub fn rejecting(chain: &MemoryChain, account: Address) -> Self {
        Self {
            reject: true,
            ..Self::new(chain, account)
        }
    }
}

#[async_trait]
impl Wallet for MemoryWallet {
    async fn connect(&self) -> Result<WalletConnection, AgoraError> {
        if self.reject {
            return Err(AgoraError::WalletRejected);
        }
        Ok(WalletConnection {
            address: self.account,
            gateway: Arc::new(self.chain.bind(self.account)),
        })
    }
}
