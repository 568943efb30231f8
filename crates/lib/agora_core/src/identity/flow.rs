// @zen-component: AGORA-IdentityBindingFlow
//
//! Connect wallet → obtain nonce-bound token → register → log in.
//!
//! Each transition either lands in its target state or falls back to the
//! last stable state with the error parked in the session, so a failed step
//! can be retried without repeating the ones before it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::session::{FlowState, Session};
use super::{IdentityProvider, Wallet};
use crate::address::Address;
use crate::chain::{self, ChainError, ChainGateway};
use crate::error::AgoraError;
use crate::nonce::Nonce;
use crate::token::{self, DecodedToken};

/// Drives one user's session through the binding state machine.
pub struct IdentityBindingFlow {
    wallet: Option<Arc<dyn Wallet>>,
    identity: Arc<dyn IdentityProvider>,
    confirm_timeout: Duration,
    state: FlowState,
    session: Session,
    gateway: Option<Arc<dyn ChainGateway>>,
    nonce: Option<Nonce>,
}

impl IdentityBindingFlow {
    /// `wallet` is `None` when no wallet provider is installed.
    pub fn new(
        wallet: Option<Arc<dyn Wallet>>,
        identity: Arc<dyn IdentityProvider>,
        confirm_timeout: Duration,
    ) -> Self {
        Self {
            wallet,
            identity,
            confirm_timeout,
            state: FlowState::Disconnected,
            session: Session::default(),
            gateway: None,
            nonce: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Nonce for the connected wallet.
    pub fn nonce(&self) -> Option<&Nonce> {
        self.nonce.as_ref()
    }

    /// Contract handle of the connected wallet.
    pub fn gateway(&self) -> Option<Arc<dyn ChainGateway>> {
        self.gateway.clone()
    }

    fn begin(&mut self, state: FlowState) {
        self.state = state;
        self.session.busy = true;
    }

    fn settle(&mut self, state: FlowState) {
        self.state = state;
        self.session.busy = false;
        self.session.last_error = None;
    }

    fn fail(&mut self, back_to: FlowState, err: AgoraError) -> AgoraError {
        warn!(state = ?back_to, error = %err, "identity flow step failed");
        self.state = back_to;
        self.session.busy = false;
        self.session.last_error = Some(err.clone());
        err
    }

    fn connected(&self) -> Result<(Arc<dyn ChainGateway>, Address), AgoraError> {
        match (&self.gateway, self.session.wallet_address) {
            (Some(gateway), Some(address)) => Ok((Arc::clone(gateway), address)),
            _ => Err(AgoraError::InvalidState("wallet not connected".into())),
        }
    }

    /// Connect (or reconnect) the wallet. Any previous session is dropped.
    pub async fn connect_wallet(&mut self) -> Result<Address, AgoraError> {
        let previous = self.state;
        let Some(wallet) = self.wallet.clone() else {
            return Err(self.fail(previous, AgoraError::WalletUnavailable));
        };

        self.session.busy = true;
        let connection = match wallet.connect().await {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail(previous, e)),
        };

        let address = connection.address;
        self.session = Session::connected(address);
        self.nonce = Some(Nonce::for_address(&address));
        self.gateway = Some(connection.gateway);
        self.settle(FlowState::WalletConnected);
        info!(address = %address, "wallet connected");

        // Status flags are advisory; a failed read leaves the connection up.
        if let Err(e) = self.refresh_status().await {
            debug!(error = %e, "initial status read failed");
        }
        Ok(address)
    }

    /// Re-read admin and registration flags without moving the state machine.
    pub async fn refresh_status(&mut self) -> Result<(), AgoraError> {
        let (gateway, address) = self.connected()?;
        let result = async {
            let is_admin = gateway.is_admin(&address).await?;
            let is_registered = gateway.is_registered(&address).await?;
            Ok::<_, ChainError>((is_admin, is_registered))
        }
        .await;

        match result {
            Ok((is_admin, is_registered)) => {
                self.session.is_admin = is_admin;
                self.session.is_registered_on_chain = is_registered;
                Ok(())
            }
            Err(e) => {
                let err = AgoraError::from(e);
                self.session.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Ask the identity provider for a token bound to the wallet's nonce.
    pub async fn obtain_token(&mut self) -> Result<(), AgoraError> {
        let previous = self.state;
        if !matches!(previous, FlowState::WalletConnected | FlowState::TokenObtained) {
            return Err(AgoraError::InvalidState(format!(
                "cannot request a token while {previous:?}"
            )));
        }
        let (_, address) = self.connected()?;
        // Always derive from the current address; never reuse a stored nonce.
        let nonce = Nonce::for_address(&address);
        self.nonce = Some(nonce.clone());

        self.session.busy = true;
        let raw = match self.identity.request_token(&nonce).await {
            Ok(raw) => raw,
            Err(AgoraError::IdentityProviderError(msg)) => {
                return Err(self.fail(previous, AgoraError::IdentityProviderError(msg)));
            }
            Err(e) => {
                return Err(self.fail(previous, AgoraError::IdentityProviderError(e.to_string())));
            }
        };
        if let Err(e) = check_token(&raw, &nonce) {
            return Err(self.fail(previous, e));
        }

        self.session.raw_identity_token = Some(raw);
        self.settle(FlowState::TokenObtained);
        debug!(address = %address, "identity token obtained");
        Ok(())
    }

    /// Bind the wallet to the token's email on-chain.
    ///
    /// A wallet the contract already knows is a no-op; this is checked with
    /// a read before anything is submitted.
    pub async fn register(&mut self) -> Result<(), AgoraError> {
        match self.state {
            FlowState::Registered | FlowState::LoggedIn => return Ok(()),
            FlowState::TokenObtained => {}
            other => {
                return Err(AgoraError::InvalidState(format!(
                    "cannot register while {other:?}"
                )));
            }
        }
        let (gateway, address) = self.connected()?;
        let decoded = match self.held_token(&address) {
            Ok(decoded) => decoded,
            Err(e) => return Err(self.fail(FlowState::TokenObtained, e)),
        };

        self.session.busy = true;
        match gateway.is_registered(&address).await {
            Ok(true) => {
                info!(address = %address, "wallet already registered");
                self.session.is_registered_on_chain = true;
                self.settle(FlowState::Registered);
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => return Err(self.fail(FlowState::TokenObtained, e.into())),
        }

        self.begin(FlowState::Registering);
        let result = async {
            let tx = gateway
                .register_with_domain(&decoded.header, &decoded.payload, &decoded.signature_hex)
                .await?;
            chain::confirm(gateway.as_ref(), &tx, self.confirm_timeout).await
        }
        .await;

        match result {
            Ok(receipt) => {
                info!(address = %address, tx = %receipt.tx_hash, "wallet registered");
                self.session.is_registered_on_chain = true;
                self.settle(FlowState::Registered);
                Ok(())
            }
            Err(e) => {
                let err = classify(e, AgoraError::RegistrationFailed);
                Err(self.fail(FlowState::TokenObtained, err))
            }
        }
    }

    /// Present the token to the contract's `login` view.
    pub async fn login(&mut self) -> Result<(), AgoraError> {
        match self.state {
            FlowState::LoggedIn => return Ok(()),
            FlowState::Registered => {}
            other => {
                return Err(AgoraError::InvalidState(format!(
                    "cannot log in while {other:?}"
                )));
            }
        }
        let (gateway, address) = self.connected()?;
        let decoded = match self.held_token(&address) {
            Ok(decoded) => decoded,
            Err(e) => return Err(self.fail(FlowState::Registered, e)),
        };

        self.begin(FlowState::LoggingIn);
        let call = gateway.login(&decoded.header, &decoded.payload, &decoded.signature_hex);
        let result = match tokio::time::timeout(self.confirm_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ChainError::Timeout(format!(
                "login not answered within {:?}",
                self.confirm_timeout
            ))),
        };

        match result {
            Ok(true) => {
                info!(address = %address, "logged in");
                self.session.is_logged_in = true;
                self.settle(FlowState::LoggedIn);
                Ok(())
            }
            Ok(false) => Err(self.fail(
                FlowState::Registered,
                AgoraError::LoginFailed("contract did not accept the identity token".into()),
            )),
            Err(e) => {
                let err = classify(e, AgoraError::LoginFailed);
                Err(self.fail(FlowState::Registered, err))
            }
        }
    }

    /// Drop wallet, token and every derived flag.
    pub fn logout(&mut self) {
        info!(address = ?self.session.wallet_address, "logged out");
        self.session = Session::default();
        self.gateway = None;
        self.nonce = None;
        self.state = FlowState::Disconnected;
    }

    fn held_token(&self, address: &Address) -> Result<DecodedToken, AgoraError> {
        let raw = self
            .session
            .raw_identity_token
            .as_deref()
            .ok_or_else(|| AgoraError::InvalidState("no identity token held".into()))?;
        check_token(raw, &Nonce::for_address(address))
    }
}

/// Decode a token and check it was issued for `nonce` and is still valid.
fn check_token(raw: &str, nonce: &Nonce) -> Result<DecodedToken, AgoraError> {
    let decoded = token::decode(raw)?;
    let claims = decoded.claims()?;
    if !claims.nonce.as_deref().is_some_and(|n| nonce.matches(n)) {
        return Err(AgoraError::IdentityProviderError(
            "token nonce does not match the connected wallet".into(),
        ));
    }
    if claims.is_expired(Utc::now().timestamp()) {
        return Err(AgoraError::IdentityProviderError("identity token has expired".into()));
    }
    Ok(decoded)
}

/// Contract rejections become `wrap(reason)`; transport failures keep their kind.
fn classify(e: ChainError, wrap: fn(String) -> AgoraError) -> AgoraError {
    if e.is_revert() {
        wrap(e.to_string())
    } else {
        e.into()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    use super::*;
    use crate::chain::memory::{
        DEFAULT_DOMAIN_FEE, MemoryChain, MemoryWallet, RecordedCall, SignatureVerifier,
    };

    const OWNER: Address = Address::new([1; 20]);
    const ALICE: Address = Address::new([0xa1; 20]);

    /// Verifier that can be switched off mid-test.
    struct Toggle(AtomicBool);

    impl SignatureVerifier for Toggle {
        fn verify(&self, _: &[u8], _: &[u8], _: &[u8]) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    /// Issues unsigned tokens echoing the nonce, or a fixed nonce if set.
    struct EchoProvider {
        email: String,
        forced_nonce: Option<String>,
        fail: bool,
    }

    impl EchoProvider {
        fn new(email: &str) -> Self {
            Self {
                email: email.into(),
                forced_nonce: None,
                fail: false,
            }
        }
    }

    #[async_trait]
    impl IdentityProvider for EchoProvider {
        async fn request_token(&self, nonce: &Nonce) -> Result<String, AgoraError> {
            if self.fail {
                return Err(AgoraError::IdentityProviderError("popup closed".into()));
            }
            let nonce = self.forced_nonce.clone().unwrap_or_else(|| nonce.to_string());
            let payload = format!(r#"{{"email":"{}","nonce":"{nonce}"}}"#, self.email);
            Ok(format!(
                "{}.{}.{}",
                URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","kid":"k1"}"#),
                URL_SAFE_NO_PAD.encode(payload),
                URL_SAFE_NO_PAD.encode([0xde, 0xad])
            ))
        }
    }

    struct Fixture {
        chain: MemoryChain,
        verifier: Arc<Toggle>,
    }

    async fn fixture() -> Fixture {
        let verifier = Arc::new(Toggle(AtomicBool::new(true)));
        let chain = MemoryChain::new(OWNER).with_verifier(verifier.clone());
        let owner = chain.bind(OWNER);
        let tx = owner.add_modulus("k1", "0x0102", None).await.unwrap();
        owner.wait_for_confirmation(&tx).await.unwrap();
        let tx = owner
            .add_domain("unitn.it", 1, "", DEFAULT_DOMAIN_FEE)
            .await
            .unwrap();
        owner.wait_for_confirmation(&tx).await.unwrap();
        Fixture { chain, verifier }
    }

    fn flow(chain: &MemoryChain, provider: EchoProvider) -> IdentityBindingFlow {
        IdentityBindingFlow::new(
            Some(Arc::new(MemoryWallet::new(chain, ALICE))),
            Arc::new(provider),
            Duration::from_secs(30),
        )
    }

    fn registrations(chain: &MemoryChain) -> usize {
        chain
            .recorded_calls()
            .iter()
            .filter(|c| matches!(c, RecordedCall::RegisterWithDomain { .. }))
            .count()
    }

    #[tokio::test]
    async fn missing_wallet_is_unavailable() {
        let mut flow = IdentityBindingFlow::new(
            None,
            Arc::new(EchoProvider::new("a@unitn.it")),
            Duration::from_secs(1),
        );
        assert_eq!(flow.connect_wallet().await, Err(AgoraError::WalletUnavailable));
        assert_eq!(flow.state(), FlowState::Disconnected);
        assert_eq!(flow.session().last_error, Some(AgoraError::WalletUnavailable));
    }

    #[tokio::test]
    async fn rejected_connection_stays_disconnected() {
        let fx = fixture().await;
        let mut flow = IdentityBindingFlow::new(
            Some(Arc::new(MemoryWallet::rejecting(&fx.chain, ALICE))),
            Arc::new(EchoProvider::new("a@unitn.it")),
            Duration::from_secs(1),
        );
        assert_eq!(flow.connect_wallet().await, Err(AgoraError::WalletRejected));
        assert_eq!(flow.state(), FlowState::Disconnected);
        assert!(!flow.session().busy);
    }

    #[tokio::test]
    async fn happy_path_reaches_logged_in() {
        let fx = fixture().await;
        let mut flow = flow(&fx.chain, EchoProvider::new("alice@unitn.it"));

        flow.connect_wallet().await.unwrap();
        assert_eq!(flow.state(), FlowState::WalletConnected);
        assert_eq!(flow.nonce(), Some(&Nonce::for_address(&ALICE)));
        assert!(!flow.session().is_admin);

        flow.obtain_token().await.unwrap();
        assert_eq!(flow.state(), FlowState::TokenObtained);

        flow.register().await.unwrap();
        assert_eq!(flow.state(), FlowState::Registered);
        assert!(flow.session().is_registered_on_chain);

        flow.login().await.unwrap();
        assert_eq!(flow.state(), FlowState::LoggedIn);
        assert!(flow.session().is_logged_in);
        assert!(!flow.session().busy);
        assert_eq!(flow.session().email_domain().as_deref(), Some("unitn.it"));
    }

    #[tokio::test]
    async fn failed_registration_returns_to_token_obtained() {
        let fx = fixture().await;
        let mut flow = flow(&fx.chain, EchoProvider::new("bob@studenti.unitn.it"));
        flow.connect_wallet().await.unwrap();
        flow.obtain_token().await.unwrap();

        let err = flow.register().await.unwrap_err();
        assert!(matches!(err, AgoraError::RegistrationFailed(_)), "{err:?}");
        assert_eq!(flow.state(), FlowState::TokenObtained);
        assert_eq!(flow.session().last_error, Some(err));
        assert!(!flow.session().busy);

        // Fix the cause on-chain, then retry with the same token.
        let owner = fx.chain.bind(OWNER);
        let tx = owner
            .add_domain("studenti.unitn.it", 1, "unitn.it", DEFAULT_DOMAIN_FEE)
            .await
            .unwrap();
        owner.wait_for_confirmation(&tx).await.unwrap();

        flow.register().await.unwrap();
        assert_eq!(flow.state(), FlowState::Registered);
        assert!(flow.session().last_error.is_none());
    }

    #[tokio::test]
    async fn failed_login_returns_to_registered() {
        let fx = fixture().await;
        let mut flow = flow(&fx.chain, EchoProvider::new("alice@unitn.it"));
        flow.connect_wallet().await.unwrap();
        flow.obtain_token().await.unwrap();
        flow.register().await.unwrap();

        fx.verifier.0.store(false, Ordering::SeqCst);
        let err = flow.login().await.unwrap_err();
        assert!(matches!(err, AgoraError::LoginFailed(_)), "{err:?}");
        assert_eq!(flow.state(), FlowState::Registered);
        assert!(!flow.session().is_logged_in);

        fx.verifier.0.store(true, Ordering::SeqCst);
        flow.login().await.unwrap();
        assert_eq!(flow.state(), FlowState::LoggedIn);
        assert_eq!(registrations(&fx.chain), 1);
    }

    #[tokio::test]
    async fn already_registered_wallet_submits_nothing() {
        let fx = fixture().await;
        let mut first = flow(&fx.chain, EchoProvider::new("alice@unitn.it"));
        first.connect_wallet().await.unwrap();
        first.obtain_token().await.unwrap();
        first.register().await.unwrap();
        assert_eq!(registrations(&fx.chain), 1);

        let mut second = flow(&fx.chain, EchoProvider::new("alice@unitn.it"));
        second.connect_wallet().await.unwrap();
        assert!(second.session().is_registered_on_chain);
        second.obtain_token().await.unwrap();
        second.register().await.unwrap();
        assert_eq!(second.state(), FlowState::Registered);
        assert_eq!(registrations(&fx.chain), 1);
    }

    #[tokio::test]
    async fn token_for_another_wallet_is_refused_locally() {
        let fx = fixture().await;
        let mut provider = EchoProvider::new("alice@unitn.it");
        provider.forced_nonce = Some(Nonce::for_address(&OWNER).to_string());
        let mut flow = flow(&fx.chain, provider);
        flow.connect_wallet().await.unwrap();

        let err = flow.obtain_token().await.unwrap_err();
        assert!(matches!(err, AgoraError::IdentityProviderError(_)), "{err:?}");
        assert_eq!(flow.state(), FlowState::WalletConnected);
        assert!(flow.session().raw_identity_token.is_none());
        assert_eq!(fx.chain.recorded_calls().len(), 2);
    }

    #[tokio::test]
    async fn provider_failure_is_reported() {
        let fx = fixture().await;
        let mut provider = EchoProvider::new("alice@unitn.it");
        provider.fail = true;
        let mut flow = flow(&fx.chain, provider);
        flow.connect_wallet().await.unwrap();
        assert_eq!(
            flow.obtain_token().await,
            Err(AgoraError::IdentityProviderError("popup closed".into()))
        );
        assert_eq!(flow.state(), FlowState::WalletConnected);
    }

    #[tokio::test]
    async fn out_of_order_transitions_are_invalid() {
        let fx = fixture().await;
        let mut flow = flow(&fx.chain, EchoProvider::new("alice@unitn.it"));
        assert!(matches!(flow.obtain_token().await, Err(AgoraError::InvalidState(_))));
        flow.connect_wallet().await.unwrap();
        assert!(matches!(flow.register().await, Err(AgoraError::InvalidState(_))));
        assert!(matches!(flow.login().await, Err(AgoraError::InvalidState(_))));
        assert_eq!(flow.state(), FlowState::WalletConnected);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_registration_times_out_and_keeps_token() {
        let fx = fixture().await;
        let mut flow = flow(&fx.chain, EchoProvider::new("alice@unitn.it"));
        flow.connect_wallet().await.unwrap();
        flow.obtain_token().await.unwrap();

        fx.chain.stall_confirmations(true);
        let err = flow.register().await.unwrap_err();
        assert!(matches!(err, AgoraError::Timeout(_)), "{err:?}");
        assert_eq!(flow.state(), FlowState::TokenObtained);
        assert!(flow.session().raw_identity_token.is_some());
        assert!(!flow.session().busy);
    }

    #[tokio::test]
    async fn logout_clears_everything() {
        let fx = fixture().await;
        let mut flow = flow(&fx.chain, EchoProvider::new("alice@unitn.it"));
        flow.connect_wallet().await.unwrap();
        flow.obtain_token().await.unwrap();
        flow.register().await.unwrap();
        flow.login().await.unwrap();

        flow.logout();
        assert_eq!(flow.state(), FlowState::Disconnected);
        assert_eq!(flow.session(), &Session::default());
        assert!(flow.nonce().is_none());
        assert!(flow.gateway().is_none());
    }
}
