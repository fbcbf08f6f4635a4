//! Converges a completed session's turn history into one immutable verdict.
//!
//! Aggregation is deterministic: the same ordered turn history and roster
//! always produce the same decision, confidence and target price. The tally
//! weights each agent by its priority, and any tie at the top resolves to
//! HOLD, the conservative default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use uuid::Uuid;

use crate::council::invoker::TokenUsage;
use crate::council::registry::AgentProfile;
use crate::council::turn::{DebateTurn, Decision};

/// The session's final output. Created exactly once per completed session;
/// immutable thereafter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Verdict {
    pub session_id: Uuid,
    pub symbol: String,
    pub user_id: String,
    pub decision: Decision,
    pub target_price: Option<f64>,
    /// Priority-weighted mean of the contributing agents' confidence,
    /// clamped to `[0, 100]`.
    pub confidence: f64,
    /// Role-tagged concatenation of each agent's final summary, in priority
    /// order. An audit trail, not prose synthesis.
    pub reasoning: String,
    /// Snapshot of the fact sheet the panel argued over.
    pub fact_sheet: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AggregationError {
    /// Zero agents ever produced a valid decision across the session.
    NoQuorum,
}

impl fmt::Display for AggregationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationError::NoQuorum => {
                write!(f, "no agent produced a valid decision; no verdict")
            }
        }
    }
}

impl Error for AggregationError {}

fn weight_of(priority: i32) -> i64 {
    i64::from(priority.max(0))
}

/// Priority-weighted majority over turns that carry a decision. Any tie at
/// the top of the tally resolves to HOLD. Returns `None` when no turn in the
/// input carries a decision.
pub(crate) fn weighted_majority<'a, I>(
    turns: I,
    priorities: &HashMap<String, i32>,
) -> Option<Decision>
where
    I: IntoIterator<Item = &'a DebateTurn>,
{
    let mut buy = 0i64;
    let mut sell = 0i64;
    let mut hold = 0i64;
    let mut any = false;

    for turn in turns {
        let decision = match turn.decision {
            Some(decision) => decision,
            None => continue,
        };
        any = true;
        let weight = weight_of(priorities.get(&turn.agent_id).copied().unwrap_or(0));
        match decision {
            Decision::Buy => buy += weight,
            Decision::Sell => sell += weight,
            Decision::Hold => hold += weight,
        }
    }

    if !any {
        return None;
    }
    if buy > sell && buy > hold {
        Some(Decision::Buy)
    } else if sell > buy && sell > hold {
        Some(Decision::Sell)
    } else {
        Some(Decision::Hold)
    }
}

/// Max − min confidence across deciding turns that reported one. `None` when
/// no deciding turn carries a confidence.
pub(crate) fn confidence_spread<'a, I>(turns: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a DebateTurn>,
{
    let mut min: Option<f64> = None;
    let mut max: Option<f64> = None;

    for turn in turns {
        if turn.decision.is_none() {
            continue;
        }
        if let Some(confidence) = turn.confidence {
            min = Some(min.map_or(confidence, |m: f64| m.min(confidence)));
            max = Some(max.map_or(confidence, |m: f64| m.max(confidence)));
        }
    }

    match (min, max) {
        (Some(min), Some(max)) => Some(max - min),
        _ => None,
    }
}

pub struct VerdictAggregator;

impl VerdictAggregator {
    /// Aggregate the session's full turn history into a verdict.
    ///
    /// Each agent contributes its latest turn that carried a valid decision —
    /// an agent that degraded in the final round still counts with its last
    /// valid position. `totals` is the session ledger's sum over every
    /// recorded turn, degraded ones included.
    pub fn aggregate(
        session_id: Uuid,
        symbol: &str,
        user_id: &str,
        fact_sheet: &str,
        roster: &[AgentProfile],
        turns: &[DebateTurn],
        totals: &TokenUsage,
    ) -> Result<Verdict, AggregationError> {
        let priorities: HashMap<String, i32> = roster
            .iter()
            .map(|agent| (agent.agent_id.clone(), agent.priority))
            .collect();

        // Latest valid decision per agent; turns are in round order, so a
        // later valid turn overwrites an earlier one.
        let mut final_turns: HashMap<&str, &DebateTurn> = HashMap::new();
        for turn in turns {
            if turn.decision.is_some() {
                final_turns.insert(turn.agent_id.as_str(), turn);
            }
        }
        if final_turns.is_empty() {
            return Err(AggregationError::NoQuorum);
        }

        let mut contributions: Vec<&DebateTurn> = final_turns.into_iter().map(|(_, t)| t).collect();
        contributions.sort_by(|a, b| {
            let pa = priorities.get(&a.agent_id).copied().unwrap_or(0);
            let pb = priorities.get(&b.agent_id).copied().unwrap_or(0);
            pb.cmp(&pa).then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        let decision = weighted_majority(contributions.iter().copied(), &priorities)
            .unwrap_or(Decision::Hold);

        // Weighted mean over agents that reported a confidence; agents
        // without one abstain from the mean rather than dragging it to zero.
        let mut weighted_sum = 0.0f64;
        let mut weight_total = 0.0f64;
        let mut plain_sum = 0.0f64;
        let mut plain_count = 0u32;
        for turn in &contributions {
            if let Some(confidence) = turn.confidence {
                let weight = weight_of(priorities.get(&turn.agent_id).copied().unwrap_or(0)) as f64;
                weighted_sum += weight * confidence;
                weight_total += weight;
                plain_sum += confidence;
                plain_count += 1;
            }
        }
        let confidence = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else if plain_count > 0 {
            plain_sum / f64::from(plain_count)
        } else {
            0.0
        };
        let confidence = confidence.clamp(0.0, 100.0);

        let target_price = median(
            contributions
                .iter()
                .filter_map(|turn| turn.target_price)
                .collect(),
        );

        let reasoning = contributions
            .iter()
            .map(|turn| {
                let text = turn
                    .summary
                    .as_deref()
                    .unwrap_or_else(|| turn.message.as_str());
                format!("[{}] {}", turn.agent_role, text)
            })
            .collect::<Vec<_>>()
            .join("\n");

        Ok(Verdict {
            session_id,
            symbol: symbol.to_string(),
            user_id: user_id.to_string(),
            decision,
            target_price,
            confidence,
            reasoning,
            fact_sheet: fact_sheet.to_string(),
            prompt_tokens: totals.prompt_tokens,
            completion_tokens: totals.completion_tokens,
            total_tokens: totals.total_tokens,
            created_at: Utc::now(),
        })
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}
