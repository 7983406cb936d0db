use chrono::{DateTime, Utc};
use mentor_core::types::Confidence;
use serde::{Deserialize, Serialize};

/// A memory block as read from `main` — front-matter fields plus body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub user_id: String,
    pub label: String,
    pub title: Option<String>,
    pub schema_ref: Option<String>,
    pub body: String,
    /// ISO-8601 timestamp from front-matter, when present.
    pub updated_at: Option<String>,
}

/// One entry in a block's version history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub commit_sha: String,
    /// First line of the commit message only.
    pub message: String,
    /// Extracted from the `Author: ...` footer; "unknown" when absent.
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub is_current: bool,
}

/// Metadata envelope stored as the proposal commit's subject line.
/// Parsed permissively: unknown fields are ignored, non-JSON messages are
/// treated as no-metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalEnvelope {
    #[serde(default = "unknown_agent")]
    pub agent_id: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default)]
    pub block_label: String,
    #[serde(default)]
    pub user_id: String,
}

fn unknown_agent() -> String {
    "unknown".to_string()
}

impl ProposalEnvelope {
    /// Decode a commit message as an envelope. Anything that is not a JSON
    /// object yields defaults.
    pub fn parse(message: &str) -> Self {
        serde_json::from_str(message).unwrap_or(Self {
            agent_id: unknown_agent(),
            reasoning: String::new(),
            confidence: Confidence::Medium,
            block_label: String::new(),
            user_id: String::new(),
        })
    }
}

/// A live proposal branch summary.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalInfo {
    pub branch_name: String,
    pub user_id: String,
    pub block_label: String,
    pub agent_id: String,
    pub reasoning: String,
    pub confidence: Confidence,
    pub created_at: DateTime<Utc>,
}

/// Content diff between `main` and a proposal branch, plus tip metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalDiff {
    pub branch_name: String,
    pub block_label: String,
    pub current_body: String,
    pub proposed_body: String,
    pub agent_id: String,
    pub reasoning: String,
    pub confidence: Confidence,
    pub created_at: DateTime<Utc>,
}

/// Deterministic branch name for a `(user, block)` proposal.
pub fn proposal_branch_name(user_id: &str, block_label: &str) -> String {
    format!("agent/{user_id}/{block_label}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_parses_json_and_ignores_unknown_fields() {
        let msg = r#"{"agent_id":"curator","reasoning":"why","confidence":"high","block_label":"student","user_id":"u1","extra":42}"#;
        let env = ProposalEnvelope::parse(msg);
        assert_eq!(env.agent_id, "curator");
        assert_eq!(env.confidence, Confidence::High);
        assert_eq!(env.block_label, "student");
    }

    #[test]
    fn envelope_tolerates_non_json_messages() {
        let env = ProposalEnvelope::parse("Update student block\n\nAuthor: user");
        assert_eq!(env.agent_id, "unknown");
        assert_eq!(env.reasoning, "");
    }

    #[test]
    fn branch_name_is_deterministic() {
        assert_eq!(proposal_branch_name("u1", "student"), "agent/u1/student");
    }
}
