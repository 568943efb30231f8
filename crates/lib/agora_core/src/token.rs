// @zen-component: AGORA-TokenCodec
//
//! Identity token decoding for on-chain verification.
//!
//! A compact token `header.payload.signature` is split into the raw header
//! and payload JSON text (exactly the bytes the provider signed) and the
//! signature as `0x`-prefixed lowercase hex. Header and payload are never
//! re-serialized: the verifier recomputes the signing input from them.

use base64::Engine;
use base64::alphabet;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde::Deserialize;

use crate::error::AgoraError;

/// Base64url decoder that tolerates padding and the standard alphabet.
const LENIENT_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decode base64url or standard base64, with or without padding.
pub(crate) fn decode_base64_lenient(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = input
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    LENIENT_URL_SAFE.decode(normalized)
}

/// A token split into the pieces the contract's `registerWithDomain` and
/// `login` calls take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedToken {
    /// Raw header JSON text.
    pub header: String,
    /// Raw payload JSON text.
    pub payload: String,
    /// `0x`-prefixed lowercase hex of the signature bytes.
    pub signature_hex: String,
}

/// Header fields the client cares about.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
}

/// Claims checked locally before a token is sent to the chain.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    pub email: String,
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub email_verified: Option<bool>,
}

impl IdentityClaims {
    /// Everything after the last `@` of the email, lowercased.
    pub fn email_domain(&self) -> Option<String> {
        let (_, domain) = self.email.rsplit_once('@')?;
        if domain.is_empty() {
            return None;
        }
        Some(domain.to_ascii_lowercase())
    }

    /// Whether the token has expired at `now` (unix seconds). Tokens without
    /// an `exp` claim never expire here.
    pub fn is_expired(&self, now: i64) -> bool {
        self.exp.is_some_and(|exp| exp <= now)
    }
}

/// Decode a compact three-part token.
pub fn decode(raw_token: &str) -> Result<DecodedToken, AgoraError> {
    let segments: Vec<&str> = raw_token.trim().split('.').collect();
    if segments.len() != 3 {
        return Err(AgoraError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let header = decode_text_segment("header", segments[0])?;
    let payload = decode_text_segment("payload", segments[1])?;
    let signature = decode_segment("signature", segments[2])?;

    Ok(DecodedToken {
        header,
        payload,
        signature_hex: format!("0x{}", hex::encode(signature)),
    })
}

fn decode_segment(name: &str, segment: &str) -> Result<Vec<u8>, AgoraError> {
    if segment.is_empty() {
        return Err(AgoraError::MalformedToken(format!("{name} segment is empty")));
    }
    decode_base64_lenient(segment)
        .map_err(|e| AgoraError::MalformedToken(format!("{name} segment is not base64: {e}")))
}

fn decode_text_segment(name: &str, segment: &str) -> Result<String, AgoraError> {
    let bytes = decode_segment(name, segment)?;
    String::from_utf8(bytes)
        .map_err(|_| AgoraError::MalformedToken(format!("{name} segment is not UTF-8")))
}

impl DecodedToken {
    /// Raw signature bytes.
    pub fn signature_bytes(&self) -> Vec<u8> {
        // `signature_hex` is only ever built from bytes in `decode`.
        hex::decode(self.signature_hex.trim_start_matches("0x")).unwrap_or_default()
    }

    /// The bytes an RS256 verifier checks: `b64url(header) "." b64url(payload)`.
    pub fn signing_input(&self) -> String {
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(self.header.as_bytes()),
            URL_SAFE_NO_PAD.encode(self.payload.as_bytes())
        )
    }

    pub fn parsed_header(&self) -> Result<TokenHeader, AgoraError> {
        serde_json::from_str(&self.header)
            .map_err(|e| AgoraError::MalformedToken(format!("header is not valid JSON: {e}")))
    }

    pub fn claims(&self) -> Result<IdentityClaims, AgoraError> {
        serde_json::from_str(&self.payload)
            .map_err(|e| AgoraError::MalformedToken(format!("payload claims invalid: {e}")))
    }
}
