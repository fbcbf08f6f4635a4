//! Token accounting for one debate session, stacked on the owning user's
//! pre-session usage.
//!
//! The ledger is a pure accumulator with no I/O. Charges are idempotent per
//! (agentId, turnNumber) so an at-most-once replay of a round record cannot
//! double-bill, and the interior mutex makes concurrent charges during a
//! round's fan-in lose nothing.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::council::invoker::TokenUsage;
use crate::council::turn::DebateTurn;

/// Per-user budget read once from the budget collaborator at session start.
#[derive(Clone, Debug)]
pub struct TokenBudget {
    /// Hard ceiling on the user-level token total.
    pub ceiling: usize,
    /// Tokens the user had already consumed before this session.
    pub tokens_used: usize,
    pub last_reset_at: Option<DateTime<Utc>>,
}

impl TokenBudget {
    pub fn new(ceiling: usize, tokens_used: usize) -> Self {
        Self {
            ceiling,
            tokens_used,
            last_reset_at: None,
        }
    }

    pub fn with_last_reset_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_reset_at = Some(at);
        self
    }

    /// No ceiling; sessions terminate on convergence or max turns only.
    pub fn unlimited() -> Self {
        Self::new(usize::MAX, 0)
    }
}

struct LedgerInner {
    session: TokenUsage,
    per_agent: HashMap<String, TokenUsage>,
    charged: HashSet<(String, u32)>,
}

/// Cumulative prompt/completion/total counters for one session.
pub struct UsageLedger {
    user_tokens_before: usize,
    inner: Mutex<LedgerInner>,
}

impl UsageLedger {
    pub fn new(user_tokens_before: usize) -> Self {
        Self {
            user_tokens_before,
            inner: Mutex::new(LedgerInner {
                session: TokenUsage::default(),
                per_agent: HashMap::new(),
                charged: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Record a turn's token cost and return the updated session totals.
    /// Charging the same (agentId, turnNumber) twice is a no-op.
    pub fn charge(&self, turn: &DebateTurn) -> TokenUsage {
        let mut inner = self.lock();
        let key = (turn.agent_id.clone(), turn.turn_number);
        if inner.charged.insert(key) {
            let usage = turn.usage();
            inner.session.absorb(&usage);
            inner
                .per_agent
                .entry(turn.agent_id.clone())
                .or_default()
                .absorb(&usage);
        }
        inner.session.clone()
    }

    pub fn session_usage(&self) -> TokenUsage {
        self.lock().session.clone()
    }

    pub fn agent_usage(&self, agent_id: &str) -> TokenUsage {
        self.lock()
            .per_agent
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// User-level total: pre-session usage plus everything this session has
    /// charged. Monotonically non-decreasing.
    pub fn user_total(&self) -> usize {
        self.user_tokens_before + self.lock().session.total_tokens
    }

    /// Tokens left under `ceiling`, floored at zero.
    pub fn remaining(&self, ceiling: usize) -> usize {
        ceiling.saturating_sub(self.user_total())
    }
}
