//! Wallet-bound nonce for identity token requests.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::address::Address;

/// Base64url (no padding) encoding of the raw address bytes.
///
/// The identity provider echoes it back in the token's `nonce` claim, which
/// ties the token to the wallet that asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Nonce(String);

impl Nonce {
    pub fn for_address(address: &Address) -> Self {
        Self(URL_SAFE_NO_PAD.encode(address.as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `claim` (as found in a token payload) matches this nonce.
    pub fn matches(&self, claim: &str) -> bool {
        self.0 == claim
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
