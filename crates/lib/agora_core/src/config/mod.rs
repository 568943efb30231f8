// @zen-component: AGORA-Config
//
//! Environment-driven configuration.

use std::env;
use std::time::Duration;

use url::Url;

use crate::address::Address;
use crate::chain::Wei;
use crate::error::AgoraError;
use crate::keys::jwks::GOOGLE_JWKS_URL;
use crate::proposals::pinning::DEFAULT_GATEWAY;

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_DOMAIN_FEE_ETHER: &str = "0.01";

const WEI_DECIMALS: usize = 18;

/// Resolved client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgoraConfig {
    pub rpc_url: Url,
    pub contract_address: Option<Address>,
    pub google_client_id: String,
    pub jwks_url: Url,
    /// Value attached to `addDomain`.
    pub domain_fee: Wei,
    /// Value attached to `renewDomain`.
    pub renewal_fee: Wei,
    pub pinata_jwt: Option<String>,
    pub pinata_gateway: Url,
    pub http_timeout: Duration,
    pub confirm_timeout: Duration,
    pub reconcile_interval: Duration,
}

impl AgoraConfig {
    /// Read `AGORA_*` variables, loading `.env` first if present.
    pub fn from_env() -> Result<Self, AgoraError> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AgoraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let domain_fee = parse_ether(
            &get("AGORA_DOMAIN_FEE").unwrap_or_else(|| DEFAULT_DOMAIN_FEE_ETHER.to_string()),
        )?;
        let renewal_fee = match get("AGORA_RENEWAL_FEE") {
            Some(v) => parse_ether(&v)?,
            None => domain_fee,
        };

        Ok(Self {
            rpc_url: parse_url("AGORA_RPC_URL", get("AGORA_RPC_URL").as_deref().unwrap_or(DEFAULT_RPC_URL))?,
            contract_address: get("AGORA_CONTRACT_ADDRESS")
                .map(|v| {
                    Address::parse(&v)
                        .map_err(|e| AgoraError::Config(format!("AGORA_CONTRACT_ADDRESS: {e}")))
                })
                .transpose()?,
            google_client_id: get("AGORA_GOOGLE_CLIENT_ID").unwrap_or_default(),
            jwks_url: parse_url("AGORA_JWKS_URL", get("AGORA_JWKS_URL").as_deref().unwrap_or(GOOGLE_JWKS_URL))?,
            domain_fee,
            renewal_fee,
            pinata_jwt: get("AGORA_PINATA_JWT"),
            pinata_gateway: parse_url(
                "AGORA_PINATA_GATEWAY",
                get("AGORA_PINATA_GATEWAY").as_deref().unwrap_or(DEFAULT_GATEWAY),
            )?,
            http_timeout: parse_secs("AGORA_HTTP_TIMEOUT_SECS", get("AGORA_HTTP_TIMEOUT_SECS"), 10)?,
            confirm_timeout: parse_secs("AGORA_CONFIRM_TIMEOUT_SECS", get("AGORA_CONFIRM_TIMEOUT_SECS"), 120)?,
            reconcile_interval: parse_secs(
                "AGORA_RECONCILE_INTERVAL_SECS",
                get("AGORA_RECONCILE_INTERVAL_SECS"),
                300,
            )?,
        })
    }
}

fn parse_url(key: &str, value: &str) -> Result<Url, AgoraError> {
    let url = Url::parse(value).map_err(|e| AgoraError::Config(format!("{key}: invalid URL '{value}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AgoraError::Config(format!("{key}: unsupported scheme '{}'", url.scheme())));
    }
    Ok(url)
}

fn parse_secs(key: &str, value: Option<String>, default: u64) -> Result<Duration, AgoraError> {
    let secs = match value {
        None => default,
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| AgoraError::Config(format!("{key}: expected whole seconds, got '{v}'")))?,
    };
    if secs == 0 {
        return Err(AgoraError::Config(format!("{key}: must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

/// Parse a decimal ether amount into wei.
pub fn parse_ether(value: &str) -> Result<Wei, AgoraError> {
    let bad = || AgoraError::Config(format!("invalid ether amount '{value}'"));
    let value = value.trim();
    let (whole, frac) = value.split_once('.').unwrap_or((value, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(bad());
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(bad());
    }
    if frac.len() > WEI_DECIMALS {
        return Err(AgoraError::Config(format!(
            "ether amount '{value}' has more than {WEI_DECIMALS} decimal places"
        )));
    }

    let scale = 10u128.pow(WEI_DECIMALS as u32);
    let whole: Wei = if whole.is_empty() { 0 } else { whole.parse().map_err(|_| bad())? };
    let frac: Wei = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<WEI_DECIMALS$}").parse().map_err(|_| bad())?
    };
    whole
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(bad)
}

/// Render wei as a decimal ether amount without trailing zeros.
pub fn format_ether(wei: Wei) -> String {
    let scale = 10u128.pow(WEI_DECIMALS as u32);
    let whole = wei / scale;
    let frac = wei % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac = format!("{frac:0>WEI_DECIMALS$}");
    format!("{whole}.{}", frac.trim_end_matches('0'))
}
