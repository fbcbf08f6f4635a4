//! Per-turn records and the structured verdict block agents embed in replies.
//!
//! Every agent is instructed to include a JSON object of the shape
//! `{"decision": "BUY", "confidence": 72, "target_price": 184.5,
//! "summary": "...", "reasoning": "..."}` somewhere in its reply.
//! [`parse_agent_reply`] digs that block out of the surrounding prose;
//! a reply without a parseable block is treated as an invocation error and
//! recorded as a degraded turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::council::invoker::TokenUsage;

/// Panel decision for one instrument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Decision::Buy => "BUY",
            Decision::Sell => "SELL",
            Decision::Hold => "HOLD",
        };
        write!(f, "{}", label)
    }
}

/// The structured block parsed out of one model reply.
///
/// `decision`, `confidence`, `target_price` and `summary` are optional — an
/// agent may abstain — but `reasoning` is mandatory; a block without it does
/// not parse and the turn is degraded.
#[derive(Clone, Debug, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub decision: Option<Decision>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub summary: Option<String>,
    pub reasoning: String,
}

/// Scan `content` for the first JSON object that deserializes into an
/// [`AgentReply`]. Models wrap the block in prose or code fences, so we
/// brace-match every candidate object rather than feeding the whole reply to
/// the parser.
pub fn parse_agent_reply(content: &str) -> Option<AgentReply> {
    let bytes = content.as_bytes();
    let mut search_from = 0;

    while let Some(offset) = content[search_from..].find('{') {
        let start = search_from + offset;
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        let mut end = None;

        for (i, &b) in bytes.iter().enumerate().skip(start) {
            if in_string {
                if escaped {
                    escaped = false;
                } else if b == b'\\' {
                    escaped = true;
                } else if b == b'"' {
                    in_string = false;
                }
                continue;
            }
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }

        if let Some(end) = end {
            if let Ok(mut reply) = serde_json::from_str::<AgentReply>(&content[start..end]) {
                reply.confidence = reply.confidence.map(|c| c.clamp(0.0, 100.0));
                return Some(reply);
            }
            search_from = start + 1;
        } else {
            // Unbalanced braces from here on; nothing further can match.
            return None;
        }
    }

    None
}

/// One agent's contribution in one round. Append-only once recorded.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DebateTurn {
    pub session_id: Uuid,
    pub agent_id: String,
    /// The agent's specialization label, used to tag the audit trail.
    pub agent_role: String,
    /// Identifies the round, shared by every agent participating in it.
    pub turn_number: u32,
    /// The agent's argument, or the failure reason for a degraded turn.
    pub message: String,
    pub decision: Option<Decision>,
    pub confidence: Option<f64>,
    pub target_price: Option<f64>,
    pub summary: Option<String>,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

impl DebateTurn {
    /// A turn recorded from a successfully parsed reply.
    pub fn recorded(
        session_id: Uuid,
        agent_id: impl Into<String>,
        agent_role: impl Into<String>,
        turn_number: u32,
        reply: AgentReply,
        usage: &TokenUsage,
    ) -> Self {
        Self {
            session_id,
            agent_id: agent_id.into(),
            agent_role: agent_role.into(),
            turn_number,
            message: reply.reasoning,
            decision: reply.decision,
            confidence: reply.confidence,
            target_price: reply.target_price,
            summary: reply.summary,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            metadata: HashMap::new(),
            recorded_at: Utc::now(),
        }
    }

    /// A turn recorded for an agent whose invocation failed: no decision, no
    /// tokens, the failure reason in `message` and its kind under the
    /// `"failure"` metadata key.
    pub fn degraded(
        session_id: Uuid,
        agent_id: impl Into<String>,
        agent_role: impl Into<String>,
        turn_number: u32,
        reason: impl Into<String>,
        kind: &str,
    ) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert("failure".to_string(), kind.to_string());
        Self {
            session_id,
            agent_id: agent_id.into(),
            agent_role: agent_role.into(),
            turn_number,
            message: reason.into(),
            decision: None,
            confidence: None,
            target_price: None,
            summary: None,
            prompt_tokens: 0,
            completion_tokens: 0,
            metadata,
            recorded_at: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.decision.is_none()
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage::new(self.prompt_tokens, self.completion_tokens)
    }
}
