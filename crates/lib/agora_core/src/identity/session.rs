//! Session state owned by the identity binding flow.

use crate::address::Address;
use crate::error::AgoraError;
use crate::token::{self, IdentityClaims};

/// Position in the identity binding state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Disconnected,
    WalletConnected,
    TokenObtained,
    Registering,
    Registered,
    LoggingIn,
    LoggedIn,
}

impl FlowState {
    /// States where an async operation is in flight and triggers are disabled.
    pub fn is_transient(&self) -> bool {
        matches!(self, FlowState::Registering | FlowState::LoggingIn)
    }
}

/// What the UI knows about the connected user.
///
/// Only the flow mutates it; callers get a shared reference and read it
/// through the accessors. A session cannot be assembled outside the crate:
///
/// ```compile_fail
/// use agora_core::identity::session::Session;
///
/// let session = Session { is_logged_in: true, ..Session::default() };
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub(crate) wallet_address: Option<Address>,
    pub(crate) raw_identity_token: Option<String>,
    pub(crate) is_registered_on_chain: bool,
    pub(crate) is_logged_in: bool,
    pub(crate) is_admin: bool,
    /// Set while an operation is running; cleared on success and failure.
    pub(crate) busy: bool,
    /// Last failure, kept until the next successful transition.
    pub(crate) last_error: Option<AgoraError>,
}

impl Session {
    pub(crate) fn connected(address: Address) -> Self {
        Self {
            wallet_address: Some(address),
            ..Self::default()
        }
    }

    /// A registered, logged-in session holding `raw_token`.
    #[cfg(test)]
    pub(crate) fn logged_in(address: Address, raw_token: String) -> Self {
        Self {
            raw_identity_token: Some(raw_token),
            is_registered_on_chain: true,
            is_logged_in: true,
            ..Self::connected(address)
        }
    }

    pub fn wallet_address(&self) -> Option<Address> {
        self.wallet_address
    }

    pub fn raw_identity_token(&self) -> Option<&str> {
        self.raw_identity_token.as_deref()
    }

    pub fn is_registered_on_chain(&self) -> bool {
        self.is_registered_on_chain
    }

    pub fn is_logged_in(&self) -> bool {
        self.is_logged_in
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn last_error(&self) -> Option<&AgoraError> {
        self.last_error.as_ref()
    }

    /// Claims of the held token, if any.
    pub fn claims(&self) -> Option<IdentityClaims> {
        let raw = self.raw_identity_token.as_deref()?;
        token::decode(raw).ok()?.claims().ok()
    }

    /// Email domain of the held token.
    pub fn email_domain(&self) -> Option<String> {
        self.claims()?.email_domain()
    }

    pub fn require_logged_in(&self) -> Result<(), AgoraError> {
        if self.is_logged_in {
            Ok(())
        } else {
            Err(AgoraError::InvalidState("login required".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_session_starts_empty() {
        let session = Session::connected(Address::new([5; 20]));
        assert_eq!(session.wallet_address, Some(Address::new([5; 20])));
        assert!(session.raw_identity_token.is_none());
        assert!(!session.is_registered_on_chain);
        assert!(!session.is_logged_in);
        assert!(session.require_logged_in().is_err());
    }

    #[test]
    fn default_session_is_not_logged_in() {
        let session = Session::default();
        assert!(!session.is_logged_in());
        assert_eq!(
            session.require_logged_in(),
            Err(AgoraError::InvalidState("login required".into()))
        );
    }

    #[test]
    fn accessors_reflect_flow_owned_fields() {
        let address = Address::new([6; 20]);
        let session = Session::logged_in(address, "a.b.c".into());
        assert_eq!(session.wallet_address(), Some(address));
        assert_eq!(session.raw_identity_token(), Some("a.b.c"));
        assert!(session.is_registered_on_chain());
        assert!(session.is_logged_in());
        assert!(!session.is_admin());
        assert!(!session.is_busy());
        assert!(session.last_error().is_none());
        assert!(session.require_logged_in().is_ok());
    }

    #[test]
    fn transient_states() {
        assert!(FlowState::Registering.is_transient());
        assert!(FlowState::LoggingIn.is_transient());
        assert!(!FlowState::Registered.is_transient());
    }
}
