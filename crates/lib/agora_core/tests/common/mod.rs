//! Shared fixtures: an RSA key that signs real RS256 identity tokens, an
//! identity provider built on it, and a local key endpoint serving it.

#![allow(dead_code)]

use std::net::SocketAddr;

use agora_core::AgoraError;
use agora_core::keys::SigningKey;
use agora_core::nonce::Nonce;
use agora_core::identity::IdentityProvider;
use async_trait::async_trait;
use axum::Router;
use axum::routing::get;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, EncodingKey};
use serde_json::{Value, json};

pub const KID: &str = "k1";

/// Base64url modulus of `fixtures/test_rsa.pem`.
pub const MODULUS_N: &str = "3tNe6C90HZxshC_yUx5kSd_N30eW7NNMDnddviJ4ICXo_JmOFsiM6yym9wLl9rcE1DYJDXsoP19-GrHgzjblTw0m4jCh8N4ZucmGqE7Gv367_ZgpxNsXA1k70j7cyb0UlSgCzIPRqSB5rTMFo_zThvUmlzXrqgfFrgxAPbsJG2_2Wby9K3UakjcOnL-PGPGuBzRSvWZTt6VVOoM05mzB8BWZFBO0bSijy_m7TOO1gwonk6igMHVbcDQNwQDmNp-JXJdXgLZUnF4iYRLv6VCAfq7PJPKLWX2Huqx01BtezR_qwzuJcNDJDEECIBgHLQ6DHyvgA-3bt1giQ5pNIUqipw";

const PEM: &[u8] = include_bytes!("../fixtures/test_rsa.pem");

pub fn signing_key() -> SigningKey {
    SigningKey::new(KID, MODULUS_N)
}

/// The exact header text the fixture tokens carry.
pub fn header_json() -> String {
    json!({ "alg": "RS256", "kid": KID }).to_string()
}

/// Sign `header.payload` with the fixture key and return the compact token.
pub fn sign(header: &str, payload: &str) -> String {
    let input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(header),
        URL_SAFE_NO_PAD.encode(payload)
    );
    let key = EncodingKey::from_rsa_pem(PEM).unwrap();
    let signature = jsonwebtoken::crypto::sign(input.as_bytes(), &key, Algorithm::RS256).unwrap();
    format!("{input}.{signature}")
}

pub fn token_for(claims: &Value) -> String {
    sign(&header_json(), &claims.to_string())
}

/// Issues signed tokens for a fixed email, echoing the requested nonce.
pub struct FixtureProvider {
    pub email: String,
    /// Seconds from now until `exp`; `None` leaves the claim out.
    pub expires_in: Option<i64>,
}

impl FixtureProvider {
    pub fn new(email: &str) -> Self {
        Self {
            email: email.to_string(),
            expires_in: Some(3600),
        }
    }
}

#[async_trait]
impl IdentityProvider for FixtureProvider {
    async fn request_token(&self, nonce: &Nonce) -> Result<String, AgoraError> {
        let mut claims = json!({
            "email": self.email,
            "nonce": nonce.as_str(),
            "iss": "https://accounts.google.com",
            "aud": "agora-test",
            "email_verified": true,
        });
        if let Some(secs) = self.expires_in {
            claims["exp"] = json!(chrono::Utc::now().timestamp() + secs);
        }
        Ok(token_for(&claims))
    }
}

/// Serve a JWKS document containing the fixture key; returns its URL.
pub async fn serve_jwks() -> String {
    let body = json!({
        "keys": [{
            "kid": KID,
            "n": MODULUS_N,
            "e": "AQAB",
            "alg": "RS256",
            "kty": "RSA",
            "use": "sig",
        }]
    })
    .to_string();
    let router = Router::new().route("/certs", get(move || async move { body.clone() }));
    let addr = serve(router).await;
    format!("http://{addr}/certs")
}

pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
