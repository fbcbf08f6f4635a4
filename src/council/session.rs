//! The multi-round debate lifecycle for one (symbol, user) verdict request.
//!
//! A session freezes the active roster and prompt set at creation, then
//! drives rounds strictly in sequence: round N+1 never starts before round
//! N's fan-in has completed and the termination predicate has been evaluated.
//! The panel converges when its weighted majority holds steady across two
//! consecutive rounds with a confidence spread below the configured
//! threshold; otherwise the session runs out its turn or token budget and a
//! best-effort verdict is aggregated from whatever the panel produced.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::council::aggregator::{
    confidence_spread, weighted_majority, AggregationError, Verdict, VerdictAggregator,
};
use crate::council::config::DebateConfig;
use crate::council::coordinator::TurnCoordinator;
use crate::council::event::{DebateEvent, EventHandler};
use crate::council::invoker::{ModelInvoker, TokenUsage};
use crate::council::ledger::{TokenBudget, UsageLedger};
use crate::council::prompt::{DebateContext, PromptResolver};
use crate::council::registry::{AgentProfile, AgentRegistry};
use crate::council::turn::{DebateTurn, Decision};

/// Lifecycle state of a debate session.
///
/// `Created → Running → Converged | Exhausted | Failed`. `Exhausted` is not
/// an error — the turn or token budget ran out and aggregation proceeds on
/// the best available data. `Failed` is terminal with no verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Created,
    Running,
    Converged,
    Exhausted,
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Created => "Created",
            SessionState::Running => "Running",
            SessionState::Converged => "Converged",
            SessionState::Exhausted => "Exhausted",
            SessionState::Failed => "Failed",
        };
        write!(f, "{}", label)
    }
}

/// Whole-session failures. Per-agent failures never surface here; they are
/// absorbed as degraded turns at the round boundary.
#[derive(Debug, Clone)]
pub enum DebateError {
    /// The registry snapshot contained no active agents.
    NoAgents,
    /// Every agent in one round failed to produce a decision.
    AllAgentsFailed { turn_number: u32 },
    /// No agent produced a valid decision across the whole session.
    NoQuorum,
    /// The session's cancellation token fired mid-round.
    Cancelled,
}

impl fmt::Display for DebateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebateError::NoAgents => write!(f, "no active agents on the roster"),
            DebateError::AllAgentsFailed { turn_number } => {
                write!(f, "every agent failed in turn {}", turn_number)
            }
            DebateError::NoQuorum => write!(f, "no agent ever produced a valid decision"),
            DebateError::Cancelled => write!(f, "session cancelled"),
        }
    }
}

impl Error for DebateError {}

/// One debate instance. Owns its turn log, ledger and lifecycle exclusively.
pub struct DebateSession {
    id: Uuid,
    symbol: String,
    user_id: String,
    fact_sheet: Arc<str>,
    /// Roster snapshot, priority-ordered, frozen at creation.
    roster: Vec<AgentProfile>,
    priorities: HashMap<String, i32>,
    coordinator: TurnCoordinator,
    ledger: UsageLedger,
    budget: TokenBudget,
    config: DebateConfig,
    state: SessionState,
    turns: Vec<DebateTurn>,
    rounds_completed: u32,
    previous_majority: Option<Decision>,
    cancel: CancellationToken,
    handler: Option<Arc<dyn EventHandler>>,
    created_at: DateTime<Utc>,
}

impl DebateSession {
    /// Allocate a session for `(symbol, user)` over `fact_sheet`, snapshotting
    /// the registry's active roster and prompts. The budget is read once here;
    /// later budget-collaborator changes do not affect this session.
    pub fn new(
        symbol: impl Into<String>,
        user_id: impl Into<String>,
        fact_sheet: impl Into<String>,
        registry: &AgentRegistry,
        invoker: Arc<dyn ModelInvoker>,
        budget: TokenBudget,
        config: DebateConfig,
    ) -> Result<Self, DebateError> {
        let snapshot = registry.snapshot();
        if snapshot.agents.is_empty() {
            return Err(DebateError::NoAgents);
        }

        let priorities = snapshot
            .agents
            .iter()
            .map(|agent| (agent.agent_id.clone(), agent.priority))
            .collect();
        let resolver = Arc::new(PromptResolver::from_snapshot(&snapshot));
        let coordinator = TurnCoordinator::new(invoker, resolver, &config);
        let ledger = UsageLedger::new(budget.tokens_used);
        let fact_sheet: String = fact_sheet.into();

        Ok(Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            user_id: user_id.into(),
            fact_sheet: Arc::from(fact_sheet.as_str()),
            roster: snapshot.agents,
            priorities,
            coordinator,
            ledger,
            budget,
            config,
            state: SessionState::Created,
            turns: Vec::new(),
            rounds_completed: 0,
            previous_majority: None,
            cancel: CancellationToken::new(),
            handler: None,
            created_at: Utc::now(),
        })
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Turn number of the latest completed round; 0 before the first.
    pub fn current_turn(&self) -> u32 {
        self.rounds_completed
    }

    /// The append-only turn log recorded so far.
    pub fn turns(&self) -> &[DebateTurn] {
        &self.turns
    }

    pub fn usage(&self) -> TokenUsage {
        self.ledger.session_usage()
    }

    pub fn agent_usage(&self, agent_id: &str) -> TokenUsage {
        self.ledger.agent_usage(agent_id)
    }

    /// Clone of the session's cancellation token. Cancelling it aborts all
    /// in-flight calls of the current round and fails the session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn emit(&self, event: DebateEvent) {
        if let Some(handler) = &self.handler {
            handler.on_debate_event(&event).await;
        }
    }

    /// Drive the debate to a terminal state and aggregate the verdict.
    pub async fn run(&mut self) -> Result<Verdict, DebateError> {
        info!(
            "session {}: debating {} for user {} with {} agents (max {} turns)",
            self.id,
            self.symbol,
            self.user_id,
            self.roster.len(),
            self.config.max_turns
        );
        self.emit(DebateEvent::SessionStarted {
            session_id: self.id,
            symbol: self.symbol.clone(),
            agent_count: self.roster.len(),
        })
        .await;

        let max_turns = self.config.max_turns.max(1);

        for turn_number in 1..=max_turns {
            if self.ledger.remaining(self.budget.ceiling) == 0 {
                info!(
                    "session {}: token budget {} reached before turn {}; exhausting",
                    self.id, self.budget.ceiling, turn_number
                );
                self.emit(DebateEvent::BudgetExhausted {
                    session_id: self.id,
                    before_turn: turn_number,
                    user_total_tokens: self.ledger.user_total(),
                    ceiling: self.budget.ceiling,
                })
                .await;
                self.state = SessionState::Exhausted;
                break;
            }

            self.emit(DebateEvent::RoundStarted {
                session_id: self.id,
                turn_number,
            })
            .await;

            let context = DebateContext {
                symbol: self.symbol.clone(),
                fact_sheet: self.fact_sheet.clone(),
                previous_turns: Arc::from(self.turns.clone()),
                current_turn_number: turn_number,
            };
            let round = self
                .coordinator
                .run_round(self.id, &self.roster, &context, &self.cancel)
                .await;

            if self.cancel.is_cancelled() {
                warn!("session {}: cancelled during turn {}", self.id, turn_number);
                self.state = SessionState::Failed;
                self.finish_event().await;
                return Err(DebateError::Cancelled);
            }

            for turn in &round {
                self.ledger.charge(turn);
                self.emit(DebateEvent::TurnRecorded {
                    session_id: self.id,
                    turn_number,
                    agent_id: turn.agent_id.clone(),
                    decision: turn.decision,
                    degraded: turn.is_degraded(),
                })
                .await;
            }

            let valid_turns = round.iter().filter(|t| t.decision.is_some()).count();
            let degraded_turns = round.len() - valid_turns;
            let majority = weighted_majority(round.iter(), &self.priorities);
            let spread = confidence_spread(round.iter());

            self.turns.extend(round);
            self.rounds_completed = turn_number;
            self.state = SessionState::Running;

            self.emit(DebateEvent::RoundCompleted {
                session_id: self.id,
                turn_number,
                valid_turns,
                degraded_turns,
                majority,
                confidence_spread: spread,
            })
            .await;

            if valid_turns == 0 {
                warn!(
                    "session {}: every agent failed in turn {}; session failed",
                    self.id, turn_number
                );
                self.state = SessionState::Failed;
                self.finish_event().await;
                return Err(DebateError::AllAgentsFailed { turn_number });
            }

            if let (Some(previous), Some(current), Some(spread)) =
                (self.previous_majority, majority, spread)
            {
                if previous == current && spread <= self.config.stability_threshold {
                    info!(
                        "session {}: converged on {} after turn {} (spread {:.1})",
                        self.id, current, turn_number, spread
                    );
                    self.state = SessionState::Converged;
                    break;
                }
            }
            self.previous_majority = majority;
        }

        if self.state == SessionState::Running {
            info!(
                "session {}: {} turns exhausted without convergence",
                self.id, max_turns
            );
            self.state = SessionState::Exhausted;
        }

        let totals = self.ledger.session_usage();
        match VerdictAggregator::aggregate(
            self.id,
            &self.symbol,
            &self.user_id,
            &self.fact_sheet,
            &self.roster,
            &self.turns,
            &totals,
        ) {
            Ok(verdict) => {
                info!(
                    "session {}: {} verdict {} (confidence {:.0}, {} tokens)",
                    self.id, self.state, verdict.decision, verdict.confidence, totals.total_tokens
                );
                self.finish_event().await;
                Ok(verdict)
            }
            Err(AggregationError::NoQuorum) => {
                warn!("session {}: no quorum at aggregation; session failed", self.id);
                self.state = SessionState::Failed;
                self.finish_event().await;
                Err(DebateError::NoQuorum)
            }
        }
    }

    async fn finish_event(&self) {
        self.emit(DebateEvent::SessionFinished {
            session_id: self.id,
            state: self.state,
            rounds_completed: self.rounds_completed,
            total_tokens: self.ledger.session_usage().total_tokens,
        })
        .await;
    }
}
