//! Session observability.
//!
//! Implement [`EventHandler`] to receive real-time notifications about a
//! debate's lifecycle: session start, round boundaries, every recorded turn,
//! budget stops and the terminal transition. All methods default to no-ops,
//! so a handler only overrides what it cares about. Attach one via
//! [`DebateSession::with_event_handler`](crate::DebateSession::with_event_handler);
//! it is shared as `Arc<dyn EventHandler>`.
//!
//! This is also the streaming half of the caller-facing progress surface: a
//! handler that forwards events to a channel gives the web layer live round
//! and turn updates without polling.

use async_trait::async_trait;
use uuid::Uuid;

use crate::council::session::SessionState;
use crate::council::turn::Decision;

/// Events emitted by a [`DebateSession`](crate::DebateSession) as it runs.
#[derive(Debug, Clone)]
pub enum DebateEvent {
    SessionStarted {
        session_id: Uuid,
        symbol: String,
        agent_count: usize,
    },

    RoundStarted {
        session_id: Uuid,
        turn_number: u32,
    },

    /// One agent's turn has been recorded and charged to the ledger.
    TurnRecorded {
        session_id: Uuid,
        turn_number: u32,
        agent_id: String,
        decision: Option<Decision>,
        degraded: bool,
    },

    /// A round's fan-in completed and the termination predicate was evaluated.
    RoundCompleted {
        session_id: Uuid,
        turn_number: u32,
        valid_turns: usize,
        degraded_turns: usize,
        majority: Option<Decision>,
        /// Max − min confidence across the round's deciding agents, when at
        /// least one reported a confidence.
        confidence_spread: Option<f64>,
    },

    /// The budget ceiling was reached; the named round never started.
    BudgetExhausted {
        session_id: Uuid,
        before_turn: u32,
        user_total_tokens: usize,
        ceiling: usize,
    },

    /// Terminal transition. `state` is one of `Converged`, `Exhausted`
    /// or `Failed`.
    SessionFinished {
        session_id: Uuid,
        state: SessionState,
        rounds_completed: u32,
        total_tokens: usize,
    },
}

/// Callback interface for debate observability.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_debate_event(&self, _event: &DebateEvent) {}
}
