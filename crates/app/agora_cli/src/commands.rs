//! Subcommand bodies. Each writes to `out` so tests can capture it.

use std::io::Write;
use std::path::Path;

use agora_core::config::{AgoraConfig, format_ether};
use agora_core::keys::SigningKey;
use agora_core::keys::jwks::KeySetCache;
use agora_core::keys::reconcile::{accepted_set, reconcile};
use agora_core::{Address, Nonce, token};

use crate::{Error, Result};

pub fn nonce(out: &mut impl Write, address: &str) -> Result<()> {
    let address = Address::parse(address)?;
    writeln!(out, "{}", Nonce::for_address(&address))?;
    Ok(())
}

pub fn decode(out: &mut impl Write, inline: Option<&str>, file: Option<&Path>) -> Result<()> {
    let raw = match (inline, file) {
        (Some(t), _) => t.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => return Err(Error::Custom("a token or --file is required".into())),
    };
    let decoded = token::decode(raw.trim())?;

    writeln!(out, "header:    {}", decoded.header)?;
    writeln!(out, "payload:   {}", decoded.payload)?;
    writeln!(out, "signature: {}", decoded.signature_hex)?;
    if let Ok(claims) = decoded.claims() {
        writeln!(out, "email:     {}", claims.email)?;
        if let Some(domain) = claims.email_domain() {
            writeln!(out, "domain:    {domain}")?;
        }
        if let Some(nonce) = claims.nonce {
            writeln!(out, "nonce:     {nonce}")?;
        }
    }
    Ok(())
}

/// One line per key: status, kid, hex modulus. Then a summary line.
pub fn render_keys(out: &mut impl Write, keys: &[SigningKey], accepted: &[String]) -> Result<()> {
    let missing = reconcile(keys, accepted)?.missing;
    let accepted = accepted_set(accepted);

    for key in keys {
        let hex = key.modulus_hex()?;
        let status = if accepted.contains(&hex) {
            "accepted"
        } else if key.check_size().is_err() {
            "too-large"
        } else {
            "missing"
        };
        writeln!(out, "{status:<9} {} {hex}", key.key_id)?;
    }
    writeln!(out, "{} of {} keys missing", missing.len(), keys.len())?;
    Ok(())
}

pub fn keys(out: &mut impl Write, accepted: &[String], url: Option<&str>) -> Result<()> {
    let config = AgoraConfig::from_env()?;
    let url = url.map(str::to_string).unwrap_or_else(|| config.jwks_url.to_string());

    let runtime = tokio::runtime::Runtime::new()?;
    let keys = runtime.block_on(async {
        let mut cache = KeySetCache::with_timeout(url, config.http_timeout);
        cache.fetch_current_keys().await
    })?;
    render_keys(out, &keys, accepted)
}

fn mask(secret: Option<&str>) -> String {
    match secret {
        None => "(unset)".to_string(),
        Some(s) if s.chars().count() <= 8 => "****".to_string(),
        Some(s) => {
            let tail: String = s.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            format!("****{tail}")
        }
    }
}

pub fn config(out: &mut impl Write, config: &AgoraConfig) -> Result<()> {
    let contract = config
        .contract_address
        .map(|a| a.to_string())
        .unwrap_or_else(|| "(unset)".to_string());
    writeln!(out, "rpc_url             {}", config.rpc_url)?;
    writeln!(out, "contract_address    {contract}")?;
    writeln!(out, "google_client_id    {}", config.google_client_id)?;
    writeln!(out, "jwks_url            {}", config.jwks_url)?;
    writeln!(out, "domain_fee          {} ETH", format_ether(config.domain_fee))?;
    writeln!(out, "renewal_fee         {} ETH", format_ether(config.renewal_fee))?;
    writeln!(out, "pinata_jwt          {}", mask(config.pinata_jwt.as_deref()))?;
    writeln!(out, "pinata_gateway      {}", config.pinata_gateway)?;
    writeln!(out, "http_timeout        {}s", config.http_timeout.as_secs())?;
    writeln!(out, "confirm_timeout     {}s", config.confirm_timeout.as_secs())?;
    writeln!(out, "reconcile_interval  {}s", config.reconcile_interval.as_secs())?;
    Ok(())
}
