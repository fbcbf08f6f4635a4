use advisory_council::{
    AgentProfile, AgentPrompt, AgentRegistry, DebateConfig, DebateError, DebateSession,
    InvokeError, ModelInvoker, ModelReply, ResolvedRequest, SessionState, TokenBudget, TokenUsage,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One scripted outcome for one agent call.
enum Outcome {
    /// Reply with this content and (prompt, completion) token usage.
    Reply(String, usize, usize),
    Fail(String),
    /// Never return; the per-call timeout has to fire.
    Hang,
}

/// Per-agent queues of canned outcomes, popped in call order.
struct ScriptedInvoker {
    scripts: Mutex<HashMap<String, VecDeque<Outcome>>>,
}

impl ScriptedInvoker {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
        }
    }

    async fn script(&self, agent_id: &str, outcomes: Vec<Outcome>) {
        self.scripts
            .lock()
            .await
            .insert(agent_id.to_string(), outcomes.into());
    }
}

#[async_trait]
impl ModelInvoker for ScriptedInvoker {
    async fn invoke(&self, request: &ResolvedRequest) -> Result<ModelReply, InvokeError> {
        let next = self
            .scripts
            .lock()
            .await
            .get_mut(&request.agent_id)
            .and_then(|queue| queue.pop_front());

        match next {
            Some(Outcome::Reply(content, prompt, completion)) => Ok(ModelReply {
                content: Arc::from(content.as_str()),
                usage: TokenUsage::new(prompt, completion),
            }),
            Some(Outcome::Fail(reason)) => Err(InvokeError::Invocation(reason)),
            Some(Outcome::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
            None => Err(InvokeError::Invocation("script exhausted".to_string())),
        }
    }

    fn backend_name(&self) -> &str {
        "scripted"
    }
}

/// A well-formed reply embedding the structured verdict block in prose,
/// costing 100 prompt + 40 completion tokens.
fn reply(decision: &str, confidence: f64) -> Outcome {
    let block = serde_json::json!({
        "decision": decision,
        "confidence": confidence,
        "summary": format!("{} stance at {:.0}", decision, confidence),
        "reasoning": "Weighing the fact sheet against sector positioning.",
    });
    Outcome::Reply(format!("My current position follows.\n{}", block), 100, 40)
}

/// Three-analyst panel with priorities 3/2/1 and a published prompt each.
fn three_agent_registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    let specs = [
        ("alpha", "Macro Strategist", 3),
        ("beta", "Equity Analyst", 2),
        ("gamma", "Risk Manager", 1),
    ];
    for (id, specialization, priority) in specs.iter() {
        registry
            .register(
                AgentProfile::new(*id, format!("Agent {}", id), *specialization, "gpt-4o")
                    .with_priority(*priority),
            )
            .unwrap();
        registry
            .publish_prompt(AgentPrompt::new(
                *id,
                1,
                "You are a rigorous sell-side analyst.",
                "Debate {{symbol}} in round {{currentTurn}}.\nFact sheet:\n{{factSheet}}\n\nPrior arguments:\n{{previousDebates}}",
            ))
            .unwrap();
    }
    registry
}

fn fast_config() -> DebateConfig {
    DebateConfig::default()
        .with_max_turns(5)
        .with_stability_threshold(15.0)
        .with_call_timeout(Duration::from_millis(200))
}

fn session_with(
    registry: &AgentRegistry,
    invoker: Arc<ScriptedInvoker>,
    budget: TokenBudget,
    config: DebateConfig,
) -> DebateSession {
    DebateSession::new(
        "AAPL",
        "user-42",
        "P/E 28, revenue up 6% YoY, guidance flat",
        registry,
        invoker,
        budget,
        config,
    )
    .expect("session should allocate")
}

#[tokio::test]
async fn converges_after_two_stable_rounds_not_one() {
    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    // Round 1: BUY/BUY/SELL, wide confidence spread. Round 2: same decisions,
    // tight spread. The predicate needs two rounds with the same majority.
    invoker
        .script("alpha", vec![reply("BUY", 80.0), reply("BUY", 72.0)])
        .await;
    invoker
        .script("beta", vec![reply("BUY", 60.0), reply("BUY", 70.0)])
        .await;
    invoker
        .script("gamma", vec![reply("SELL", 90.0), reply("SELL", 75.0)])
        .await;

    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::unlimited(),
        fast_config(),
    );
    let verdict = session.run().await.expect("verdict expected");

    assert_eq!(session.state(), SessionState::Converged);
    assert_eq!(session.current_turn(), 2);
    assert_eq!(session.turns().len(), 6);

    // Weighted tally: BUY carries priorities 3+2 against SELL's 1.
    assert_eq!(verdict.decision, advisory_council::Decision::Buy);
    assert_eq!(verdict.symbol, "AAPL");
    assert_eq!(verdict.user_id, "user-42");

    // Turn numbers are contiguous from 1 and shared per round.
    let numbers: Vec<u32> = session.turns().iter().map(|t| t.turn_number).collect();
    assert_eq!(numbers, vec![1, 1, 1, 2, 2, 2]);

    // (agentId, turnNumber) pairs are unique.
    let pairs: HashSet<(String, u32)> = session
        .turns()
        .iter()
        .map(|t| (t.agent_id.clone(), t.turn_number))
        .collect();
    assert_eq!(pairs.len(), session.turns().len());

    // Within each round, turns are normalized to priority order.
    let round_one: Vec<&str> = session.turns()[..3]
        .iter()
        .map(|t| t.agent_id.as_str())
        .collect();
    assert_eq!(round_one, vec!["alpha", "beta", "gamma"]);
}

#[tokio::test]
async fn exhausts_at_max_turns_and_still_yields_a_verdict() {
    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    // Same majority every round but a confidence spread far above the
    // threshold, so the panel never counts as stable.
    invoker
        .script("alpha", (0..5).map(|_| reply("BUY", 95.0)).collect())
        .await;
    invoker
        .script("beta", (0..5).map(|_| reply("BUY", 10.0)).collect())
        .await;
    invoker
        .script("gamma", (0..5).map(|_| reply("SELL", 50.0)).collect())
        .await;

    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::unlimited(),
        fast_config(),
    );
    let verdict = session.run().await.expect("best-effort verdict expected");

    assert_eq!(session.state(), SessionState::Exhausted);
    assert_eq!(session.current_turn(), 5);
    assert_eq!(session.turns().len(), 15);
    assert_eq!(verdict.decision, advisory_council::Decision::Buy);
}

#[tokio::test]
async fn all_agents_failing_in_round_one_fails_the_session() {
    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    invoker.script("alpha", vec![Outcome::Hang]).await;
    invoker
        .script("beta", vec![Outcome::Fail("backend 503".to_string())])
        .await;
    invoker
        .script(
            "gamma",
            vec![Outcome::Reply(
                "I feel bullish but forgot the format.".to_string(),
                50,
                20,
            )],
        )
        .await;

    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::unlimited(),
        fast_config(),
    );

    match session.run().await {
        Err(DebateError::AllAgentsFailed { turn_number }) => assert_eq!(turn_number, 1),
        other => panic!("expected AllAgentsFailed, got {:?}", other.map(|v| v.decision)),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(session.turns().len(), 3);
    assert!(session.turns().iter().all(|t| t.is_degraded()));
    // Degraded turns cost nothing.
    assert_eq!(session.usage().total_tokens, 0);
}

#[tokio::test]
async fn budget_ceiling_stops_the_session_before_the_next_round() {
    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    // 420 tokens per round (3 agents x 140). Ceiling 800: round 2 completes
    // at 840, so round 3 must never start.
    invoker
        .script("alpha", (0..5).map(|_| reply("BUY", 95.0)).collect())
        .await;
    invoker
        .script("beta", (0..5).map(|_| reply("BUY", 10.0)).collect())
        .await;
    invoker
        .script("gamma", (0..5).map(|_| reply("SELL", 50.0)).collect())
        .await;

    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::new(800, 0),
        fast_config(),
    );
    let verdict = session.run().await.expect("verdict from rounds 1-2");

    assert_eq!(session.state(), SessionState::Exhausted);
    assert_eq!(session.current_turn(), 2);
    assert_eq!(session.turns().len(), 6);
    assert_eq!(verdict.total_tokens, 840);
}

#[tokio::test]
async fn pre_session_usage_counts_against_the_ceiling() {
    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    // The user arrives already over budget: no round may start, and with no
    // turns at all there is no quorum.
    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::new(1_000, 1_000),
        fast_config(),
    );

    match session.run().await {
        Err(DebateError::NoQuorum) => {}
        other => panic!("expected NoQuorum, got {:?}", other.map(|v| v.decision)),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert!(session.turns().is_empty());
}

#[tokio::test]
async fn degraded_minority_tolerated_and_stale_decision_still_aggregates() {
    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    // gamma votes SELL in round 1 then times out in round 2. The session
    // still converges on the alpha/beta majority, and gamma's stale SELL
    // contributes its last valid position to the final tally.
    invoker
        .script("alpha", vec![reply("BUY", 80.0), reply("BUY", 78.0)])
        .await;
    invoker
        .script("beta", vec![reply("BUY", 76.0), reply("BUY", 75.0)])
        .await;
    invoker
        .script("gamma", vec![reply("SELL", 74.0), Outcome::Hang])
        .await;

    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::unlimited(),
        fast_config(),
    );
    let verdict = session.run().await.expect("verdict expected");

    assert_eq!(session.state(), SessionState::Converged);
    assert_eq!(session.current_turn(), 2);
    assert_eq!(verdict.decision, advisory_council::Decision::Buy);

    // gamma's round-2 turn is recorded degraded, zero-cost.
    let gamma_round_two = session
        .turns()
        .iter()
        .find(|t| t.agent_id == "gamma" && t.turn_number == 2)
        .expect("gamma turn 2 recorded");
    assert!(gamma_round_two.is_degraded());
    assert_eq!(gamma_round_two.prompt_tokens, 0);

    // Its stale SELL still shows up in the audit trail.
    assert!(verdict.reasoning.contains("[Risk Manager] SELL stance at 74"));
}

#[tokio::test]
async fn agent_without_an_active_prompt_is_skipped_not_fatal() {
    let mut registry = AgentRegistry::new();
    for (id, priority) in [("alpha", 2), ("ghost", 1)].iter() {
        registry
            .register(
                AgentProfile::new(*id, format!("Agent {}", id), "Equity Analyst", "gpt-4o")
                    .with_priority(*priority),
            )
            .unwrap();
    }
    // Only alpha gets a prompt; ghost can never participate.
    registry
        .publish_prompt(AgentPrompt::new(
            "alpha",
            1,
            "You are an analyst.",
            "Debate {{symbol}}. {{previousDebates}}",
        ))
        .unwrap();

    let invoker = Arc::new(ScriptedInvoker::new());
    invoker
        .script("alpha", vec![reply("HOLD", 55.0), reply("HOLD", 54.0)])
        .await;

    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::unlimited(),
        fast_config(),
    );
    let verdict = session.run().await.expect("verdict expected");

    assert_eq!(verdict.decision, advisory_council::Decision::Hold);
    assert!(session.turns().iter().all(|t| t.agent_id == "alpha"));
}

#[tokio::test]
async fn cancellation_aborts_in_flight_calls_and_fails_the_session() {
    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    invoker.script("alpha", vec![Outcome::Hang]).await;
    invoker.script("beta", vec![Outcome::Hang]).await;
    invoker.script("gamma", vec![Outcome::Hang]).await;

    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::unlimited(),
        // Long per-call timeout: only cancellation can end round 1 quickly.
        fast_config().with_call_timeout(Duration::from_secs(30)),
    );

    let token = session.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    match session.run().await {
        Err(DebateError::Cancelled) => {}
        other => panic!("expected Cancelled, got {:?}", other.map(|v| v.decision)),
    }
    assert_eq!(session.state(), SessionState::Failed);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn ledger_totals_equal_the_sum_of_recorded_turns() {
    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    invoker
        .script("alpha", vec![reply("BUY", 80.0), reply("BUY", 79.0)])
        .await;
    invoker
        .script("beta", vec![reply("BUY", 78.0), reply("BUY", 77.0)])
        .await;
    invoker
        .script("gamma", vec![reply("BUY", 76.0), reply("BUY", 75.0)])
        .await;

    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::unlimited(),
        fast_config(),
    );
    let verdict = session.run().await.expect("verdict expected");

    let prompt_sum: usize = session.turns().iter().map(|t| t.prompt_tokens).sum();
    let completion_sum: usize = session.turns().iter().map(|t| t.completion_tokens).sum();
    let usage = session.usage();

    assert_eq!(usage.prompt_tokens, prompt_sum);
    assert_eq!(usage.completion_tokens, completion_sum);
    assert_eq!(usage.total_tokens, prompt_sum + completion_sum);
    assert_eq!(verdict.prompt_tokens, prompt_sum);
    assert_eq!(verdict.completion_tokens, completion_sum);
    assert_eq!(verdict.total_tokens, prompt_sum + completion_sum);
    assert_eq!(session.agent_usage("alpha").total_tokens, 280);
}

#[tokio::test]
async fn events_trace_the_session_lifecycle() {
    use advisory_council::{DebateEvent, EventHandler};

    struct Collector {
        labels: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler for Collector {
        async fn on_debate_event(&self, event: &DebateEvent) {
            let label = match event {
                DebateEvent::SessionStarted { agent_count, .. } => {
                    format!("started:{}", agent_count)
                }
                DebateEvent::RoundStarted { turn_number, .. } => format!("round:{}", turn_number),
                DebateEvent::TurnRecorded {
                    agent_id, degraded, ..
                } => format!("turn:{}:{}", agent_id, degraded),
                DebateEvent::RoundCompleted {
                    turn_number,
                    valid_turns,
                    ..
                } => format!("completed:{}:{}", turn_number, valid_turns),
                DebateEvent::BudgetExhausted { before_turn, .. } => {
                    format!("budget:{}", before_turn)
                }
                DebateEvent::SessionFinished { state, .. } => format!("finished:{}", state),
            };
            self.labels.lock().await.push(label);
        }
    }

    let registry = three_agent_registry();
    let invoker = Arc::new(ScriptedInvoker::new());
    invoker
        .script("alpha", vec![reply("BUY", 70.0), reply("BUY", 70.0)])
        .await;
    invoker
        .script("beta", vec![reply("BUY", 68.0), reply("BUY", 69.0)])
        .await;
    invoker
        .script("gamma", vec![reply("BUY", 66.0), reply("BUY", 68.0)])
        .await;

    let collector = Arc::new(Collector {
        labels: Mutex::new(Vec::new()),
    });
    let mut session = session_with(
        &registry,
        invoker,
        TokenBudget::unlimited(),
        fast_config(),
    )
    .with_event_handler(collector.clone());

    session.run().await.expect("verdict expected");

    let labels = collector.labels.lock().await.clone();
    assert_eq!(
        labels,
        vec![
            "started:3",
            "round:1",
            "turn:alpha:false",
            "turn:beta:false",
            "turn:gamma:false",
            "completed:1:3",
            "round:2",
            "turn:alpha:false",
            "turn:beta:false",
            "turn:gamma:false",
            "completed:2:3",
            "finished:Converged",
        ]
    );
}

#[tokio::test]
async fn empty_roster_is_rejected_at_creation() {
    let registry = AgentRegistry::new();
    let invoker: Arc<ScriptedInvoker> = Arc::new(ScriptedInvoker::new());

    match DebateSession::new(
        "AAPL",
        "user-42",
        "facts",
        &registry,
        invoker,
        TokenBudget::unlimited(),
        DebateConfig::default(),
    ) {
        Err(DebateError::NoAgents) => {}
        Ok(_) => panic!("expected NoAgents"),
        Err(other) => panic!("expected NoAgents, got {}", other),
    }
}
