//! Proposals: on-chain records, off-chain metadata, and the store that ties
//! them together.

pub mod pinning;
pub mod store;

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::AgoraError;

/// Longest description accepted from the author.
pub const MAX_DESCRIPTION_CHARS: usize = 500;

/// Sanitized fields are cut to this many characters.
pub const MAX_SANITIZED_CHARS: usize = 1000;

/// A proposal as the contract stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    /// Content hash of the pinned metadata; also the proposal's id.
    pub content_hash: String,
    pub yes_votes: u64,
    pub no_votes: u64,
    /// Unix seconds; voting closes at this instant.
    pub end_time: i64,
    /// Creator's email domain.
    pub domain: String,
    /// Only users who can access `domain` may vote.
    pub domain_restricted: bool,
}

impl Proposal {
    pub fn is_open(&self, now: i64) -> bool {
        now < self.end_time
    }
}

/// Off-chain proposal body, pinned as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalMetadata {
    pub title: String,
    pub description: String,
    pub start_time: i64,
    pub creator: String,
    /// Milliseconds since the epoch at creation.
    pub timestamp: i64,
}

impl ProposalMetadata {
    /// Same metadata with every text field passed through [`sanitize`].
    pub fn sanitized(self) -> Self {
        Self {
            title: sanitize(&self.title),
            description: sanitize(&self.description),
            creator: sanitize(&self.creator),
            ..self
        }
    }
}

/// Check author input before anything is pinned or submitted.
pub fn validate_proposal(title: &str, description: &str) -> Result<(), AgoraError> {
    if title.trim().is_empty() {
        return Err(AgoraError::Validation("title is required".into()));
    }
    if description.trim().is_empty() {
        return Err(AgoraError::Validation("description is required".into()));
    }
    let len = description.chars().count();
    if len > MAX_DESCRIPTION_CHARS {
        return Err(AgoraError::Validation(format!(
            "description is {len} characters, limit is {MAX_DESCRIPTION_CHARS}"
        )));
    }
    Ok(())
}

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("static pattern"));
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("static pattern"));
static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)on\w+\s*=\s*["'][^"']*["']"#).expect("static pattern")
});
static CONTROL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F-\x9F]").expect("static pattern"));

/// Strip markup and control characters from user text.
///
/// Script blocks go with their contents; other tags are dropped but their
/// text kept. Result is trimmed and at most [`MAX_SANITIZED_CHARS`] long.
pub fn sanitize(input: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(input, "");
    let text = TAG.replace_all(&text, "");
    let text = EVENT_HANDLER.replace_all(&text, "");
    let text = CONTROL.replace_all(&text, "");
    let truncated: String = text.chars().take(MAX_SANITIZED_CHARS).collect();
    truncated.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_rules() {
        assert!(validate_proposal("Budget", "Approve the 2025 budget").is_ok());
        assert!(validate_proposal("  ", "d").is_err());
        assert!(validate_proposal("t", " \n").is_err());
        assert!(validate_proposal("t", &"x".repeat(500)).is_ok());
        assert!(matches!(
            validate_proposal("t", &"x".repeat(501)),
            Err(AgoraError::Validation(_))
        ));
    }

    #[test]
    fn description_limit_counts_characters_not_bytes() {
        assert!(validate_proposal("t", &"è".repeat(500)).is_ok());
    }

    #[test]
    fn sanitize_strips_markup() {
        assert_eq!(sanitize("<b>Bold</b> move"), "Bold move");
        assert_eq!(
            sanitize("hi<script>alert('x')</script> there"),
            "hi there"
        );
        assert_eq!(sanitize(r#"click onclick="steal()" me"#), "click  me");
        assert_eq!(sanitize("line\u{0}one\u{7}\n"), "lineone");
    }

    #[test]
    fn sanitize_truncates_and_trims() {
        let long = format!("  {}", "a".repeat(2000));
        let out = sanitize(&long);
        assert_eq!(out.chars().count(), MAX_SANITIZED_CHARS - 2);
        assert!(out.starts_with('a'));
    }

    #[test]
    fn sanitized_metadata_keeps_times() {
        let meta = ProposalMetadata {
            title: "<i>T</i>".into(),
            description: "D".into(),
            start_time: 10,
            creator: "0xabc".into(),
            timestamp: 10_000,
        }
        .sanitized();
        assert_eq!(meta.title, "T");
        assert_eq!(meta.start_time, 10);
        assert_eq!(meta.timestamp, 10_000);
    }

    #[test]
    fn metadata_json_uses_camel_case() {
        let meta = ProposalMetadata {
            title: "T".into(),
            description: "D".into(),
            start_time: 1,
            creator: "c".into(),
            timestamp: 2,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["startTime"], 1);
    }

    #[test]
    fn proposal_closes_at_end_time() {
        let p = Proposal {
            content_hash: "Qm".into(),
            yes_votes: 0,
            no_votes: 0,
            end_time: 100,
            domain: "unitn.it".into(),
            domain_restricted: false,
        };
        assert!(p.is_open(99));
        assert!(!p.is_open(100));
    }
}
