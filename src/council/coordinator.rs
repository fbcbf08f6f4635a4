//! Executes exactly one debate round: fan out one model call per active
//! agent, collect the results, normalize the ordering.
//!
//! Concurrency is bounded by a semaphore so a large panel cannot overload the
//! model backend. Every call runs under its own deadline; a timed-out or
//! failed call yields a degraded turn instead of aborting the round, and an
//! agent whose prompt cannot be resolved is skipped for the round. Completion
//! order never leaks into the recorded ordering — the round's turns are
//! sorted by agent priority before being handed back.

use futures_util::future::join_all;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::council::config::DebateConfig;
use crate::council::invoker::{InvokeError, ModelInvoker};
use crate::council::prompt::{DebateContext, PromptResolver};
use crate::council::registry::AgentProfile;
use crate::council::turn::{parse_agent_reply, DebateTurn};

pub struct TurnCoordinator {
    invoker: Arc<dyn ModelInvoker>,
    resolver: Arc<PromptResolver>,
    max_concurrency: usize,
    call_timeout: Duration,
}

impl TurnCoordinator {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        resolver: Arc<PromptResolver>,
        config: &DebateConfig,
    ) -> Self {
        Self {
            invoker,
            resolver,
            max_concurrency: config.max_concurrency.max(1),
            call_timeout: config.call_timeout,
        }
    }

    /// Run one round for `agents` against `context`, returning the round's
    /// turns in priority order. Per-agent failures are absorbed here; the
    /// caller decides what an all-degraded round means for the session.
    pub async fn run_round(
        &self,
        session_id: Uuid,
        agents: &[AgentProfile],
        context: &DebateContext,
        cancel: &CancellationToken,
    ) -> Vec<DebateTurn> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let turn_number = context.current_turn_number;
        let mut handles = Vec::with_capacity(agents.len());

        for agent in agents {
            // Resolution is pure; do it before spawning so an unavailable
            // agent is skipped without burning a worker slot.
            let request = match self.resolver.resolve(agent, context) {
                Ok(request) => request,
                Err(err) => {
                    warn!(
                        "agent {} skipped for turn {}: {}",
                        agent.agent_id, turn_number, err
                    );
                    continue;
                }
            };

            let invoker = self.invoker.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let call_timeout = self.call_timeout;
            let agent_id = agent.agent_id.clone();
            let agent_role = agent.specialization.clone();
            let priority = agent.priority;

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            priority,
                            DebateTurn::degraded(
                                session_id,
                                agent_id,
                                agent_role,
                                turn_number,
                                "worker pool closed before invocation",
                                "error",
                            ),
                        );
                    }
                };

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => {
                        Err(InvokeError::Invocation("session cancelled".to_string()))
                    }
                    result = tokio::time::timeout(call_timeout, invoker.invoke(&request)) => {
                        match result {
                            Ok(inner) => inner,
                            Err(_) => Err(InvokeError::Timeout),
                        }
                    }
                };

                let turn = match outcome {
                    Ok(reply) => match parse_agent_reply(&reply.content) {
                        Some(parsed) => {
                            debug!(
                                "agent {} turn {}: {:?} ({} tokens)",
                                agent_id, turn_number, parsed.decision, reply.usage.total_tokens
                            );
                            DebateTurn::recorded(
                                session_id,
                                agent_id,
                                agent_role,
                                turn_number,
                                parsed,
                                &reply.usage,
                            )
                        }
                        None => {
                            warn!(
                                "agent {} turn {}: malformed response, degrading",
                                agent_id, turn_number
                            );
                            DebateTurn::degraded(
                                session_id,
                                agent_id,
                                agent_role,
                                turn_number,
                                "malformed response: no parseable verdict block",
                                "malformed",
                            )
                        }
                    },
                    Err(InvokeError::Timeout) => {
                        warn!(
                            "agent {} turn {}: timed out after {:?}",
                            agent_id, turn_number, call_timeout
                        );
                        DebateTurn::degraded(
                            session_id,
                            agent_id,
                            agent_role,
                            turn_number,
                            format!("invocation timed out after {:?}", call_timeout),
                            "timeout",
                        )
                    }
                    Err(InvokeError::Invocation(reason)) => {
                        warn!(
                            "agent {} turn {}: invocation failed: {}",
                            agent_id, turn_number, reason
                        );
                        DebateTurn::degraded(
                            session_id,
                            agent_id,
                            agent_role,
                            turn_number,
                            format!("invocation failed: {}", reason),
                            "error",
                        )
                    }
                };

                (priority, turn)
            }));
        }

        let mut turns: Vec<(i32, DebateTurn)> = Vec::with_capacity(handles.len());
        for joined in join_all(handles).await {
            match joined {
                Ok(entry) => turns.push(entry),
                Err(err) => warn!("agent task join failure in turn {}: {}", turn_number, err),
            }
        }

        // Replay-stable ordering: priority descending, then agent id.
        turns.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then_with(|| a.1.agent_id.cmp(&b.1.agent_id))
        });
        turns.into_iter().map(|(_, turn)| turn).collect()
    }
}
