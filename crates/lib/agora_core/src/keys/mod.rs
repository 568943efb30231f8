//! Identity provider signing keys.
//!
//! Fetching the provider's published key set, working out which moduli the
//! on-chain verifier is missing, and pushing them as an admin.

pub mod cycle;
pub mod jwks;
pub mod reconcile;
pub mod submit;

use serde::{Deserialize, Serialize};

use crate::error::AgoraError;
use crate::token::decode_base64_lenient;

/// Largest modulus the verifier accepts: 2048-bit RSA.
pub const MAX_MODULUS_BYTES: usize = 256;

/// One RSA public key published by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SigningKey {
    #[serde(rename = "kid")]
    pub key_id: String,
    /// Base64url-encoded big-endian modulus.
    #[serde(rename = "n")]
    pub modulus_base64_url: String,
}

impl SigningKey {
    pub fn new(key_id: impl Into<String>, modulus_base64_url: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            modulus_base64_url: modulus_base64_url.into(),
        }
    }

    /// Decoded modulus bytes.
    pub fn modulus_bytes(&self) -> Result<Vec<u8>, AgoraError> {
        let bytes = decode_base64_lenient(&self.modulus_base64_url).map_err(|e| {
            AgoraError::MalformedKeySet(format!("modulus of key '{}' is not base64url: {e}", self.key_id))
        })?;
        if bytes.is_empty() {
            return Err(AgoraError::MalformedKeySet(format!(
                "modulus of key '{}' is empty",
                self.key_id
            )));
        }
        Ok(bytes)
    }

    /// Modulus as `0x`-prefixed lowercase hex, the form the contract stores.
    pub fn modulus_hex(&self) -> Result<String, AgoraError> {
        Ok(format!("0x{}", hex::encode(self.modulus_bytes()?)))
    }

    /// Fail with `ModulusTooLarge` when the modulus exceeds [`MAX_MODULUS_BYTES`].
    pub fn check_size(&self) -> Result<(), AgoraError> {
        let bytes = self.modulus_bytes()?.len();
        if bytes > MAX_MODULUS_BYTES {
            return Err(AgoraError::ModulusTooLarge {
                kid: self.key_id.clone(),
                bytes,
                max: MAX_MODULUS_BYTES,
            });
        }
        Ok(())
    }
}

/// Normalise a hex modulus read from the chain to `0x` + lowercase.
pub fn normalize_hex_modulus(raw: &str) -> String {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", digits.to_ascii_lowercase())
}
