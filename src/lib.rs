//! # advisory-council
//!
//! A multi-agent debate orchestration engine for financial verdicts. A
//! configurable panel of independent analyst agents argues over a shared fact
//! sheet for an instrument across multiple rounds; every round each agent
//! emits a BUY/SELL/HOLD decision with confidence and reasoning, sees the
//! full cross-agent history of earlier rounds, and may revise its position.
//! Once the panel stabilizes (or runs out of turns or tokens) the engine
//! aggregates one final [`Verdict`] with full token-cost accounting.
//!
//! The crate provides:
//!
//! * **Roster management**: [`AgentRegistry`] holds analyst personas and
//!   their versioned prompts; sessions snapshot it at creation so mid-debate
//!   roster edits never leak into a running session.
//! * **Prompt resolution**: [`PromptResolver`] renders each agent's
//!   instruction template against the round context with validated
//!   placeholder substitution.
//! * **The model boundary**: [`ModelInvoker`] is an injected trait object —
//!   bring any backend; tests bring scripted mocks.
//! * **Round execution**: [`TurnCoordinator`] fans out one bounded-
//!   concurrency, individually-deadlined call per agent and tolerates
//!   partial failure via degraded turns.
//! * **Lifecycle**: [`DebateSession`] sequences rounds, checks the
//!   convergence predicate and the token budget, and ends in
//!   `Converged`, `Exhausted` or `Failed`.
//! * **Aggregation**: [`VerdictAggregator`] tallies priority-weighted
//!   decisions (ties resolve to HOLD) into one immutable [`Verdict`].
//! * **Accounting**: [`UsageLedger`] accumulates per-turn token costs and
//!   enforces the caller-supplied budget ceiling.
//!
//! ## Quickstart
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use advisory_council::{
//!     AgentProfile, AgentPrompt, AgentRegistry, DebateConfig, DebateSession,
//!     ModelInvoker, TokenBudget,
//! };
//!
//! # async fn example(invoker: Arc<dyn ModelInvoker>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = AgentRegistry::new();
//! registry.register(
//!     AgentProfile::new("macro", "Macro Max", "Macro Strategist", "gpt-4o").with_priority(3),
//! )?;
//! registry.publish_prompt(AgentPrompt::new(
//!     "macro",
//!     1,
//!     "You argue from macro fundamentals.",
//!     "Analyze {{symbol}}.\nFacts:\n{{factSheet}}\nRound {{currentTurn}}.\n{{previousDebates}}",
//! ))?;
//!
//! let mut session = DebateSession::new(
//!     "AAPL",
//!     "user-42",
//!     "P/E 28, revenue up 6% YoY",
//!     &registry,
//!     invoker,
//!     TokenBudget::new(50_000, 0),
//!     DebateConfig::default(),
//! )?;
//!
//! let verdict = session.run().await?;
//! println!("{}: {} ({:.0}%)", verdict.symbol, verdict.decision, verdict.confidence);
//! # Ok(())
//! # }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// The helper is intentionally lightweight so that applications embedding the
/// engine can opt in to simple `RUST_LOG` driven diagnostics without having
/// to choose a logging backend upfront.
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

pub mod council;

// Re-exporting key items for easier external access.
pub use council::aggregator::{AggregationError, Verdict, VerdictAggregator};
pub use council::config::DebateConfig;
pub use council::coordinator::TurnCoordinator;
pub use council::event::{DebateEvent, EventHandler};
pub use council::invoker::{InvokeError, ModelInvoker, ModelReply, ResolvedRequest, TokenUsage};
pub use council::ledger::{TokenBudget, UsageLedger};
pub use council::prompt::{DebateContext, PromptError, PromptResolver};
pub use council::registry::{
    AgentProfile, AgentPrompt, AgentRegistry, RegistryError, RosterSnapshot,
};
pub use council::session::{DebateError, DebateSession, SessionState};
pub use council::turn::{parse_agent_reply, AgentReply, DebateTurn, Decision};
