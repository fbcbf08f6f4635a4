//! Prompt resolution: turn an agent's active prompt plus the round context
//! into a concrete request payload.
//!
//! Substitution is total and deterministic. A template may use exactly the
//! placeholders `{{symbol}}`, `{{factSheet}}`, `{{previousDebates}}` and
//! `{{currentTurn}}`; anything else is a typed error at resolution time, not
//! a silently empty string.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::council::invoker::ResolvedRequest;
use crate::council::registry::{AgentProfile, AgentPrompt, RosterSnapshot};
use crate::council::turn::DebateTurn;

/// Everything an agent gets to see when composing its contribution for one
/// round. The turn log is an immutable snapshot passed by value — agents never
/// hold a live reference into the session.
#[derive(Clone, Debug)]
pub struct DebateContext {
    pub symbol: String,
    pub fact_sheet: Arc<str>,
    /// All prior turns across all agents, in recorded order.
    pub previous_turns: Arc<[DebateTurn]>,
    pub current_turn_number: u32,
}

#[derive(Debug, Clone)]
pub enum PromptError {
    /// The agent has no active prompt; it cannot participate in the round.
    NoActivePrompt(String),
    /// The template names a placeholder the resolver does not know.
    UnresolvedPlaceholder(String),
    /// A `{{` with no closing `}}`.
    UnterminatedPlaceholder,
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::NoActivePrompt(id) => {
                write!(f, "agent {} has no active prompt", id)
            }
            PromptError::UnresolvedPlaceholder(name) => {
                write!(f, "unknown template placeholder: {{{{{}}}}}", name)
            }
            PromptError::UnterminatedPlaceholder => {
                write!(f, "template contains an unterminated placeholder")
            }
        }
    }
}

impl Error for PromptError {}

/// Resolves requests against the prompt set frozen at session start.
pub struct PromptResolver {
    prompts: HashMap<String, AgentPrompt>,
}

impl PromptResolver {
    pub fn new(prompts: HashMap<String, AgentPrompt>) -> Self {
        Self { prompts }
    }

    pub fn from_snapshot(snapshot: &RosterSnapshot) -> Self {
        Self {
            prompts: snapshot.prompts.clone(),
        }
    }

    /// Render the agent's instruction template against the round context and
    /// compose its persona-augmented system prompt.
    pub fn resolve(
        &self,
        agent: &AgentProfile,
        context: &DebateContext,
    ) -> Result<ResolvedRequest, PromptError> {
        let prompt = self
            .prompts
            .get(&agent.agent_id)
            .ok_or_else(|| PromptError::NoActivePrompt(agent.agent_id.clone()))?;

        let instruction = substitute(&prompt.instruction_template, context)?;
        let system_prompt = augment_system_prompt(agent, &prompt.system_prompt);

        Ok(ResolvedRequest {
            agent_id: agent.agent_id.clone(),
            model: agent.model.clone(),
            temperature: agent.temperature,
            max_tokens: agent.max_tokens,
            system_prompt: Arc::from(system_prompt.as_str()),
            instruction: Arc::from(instruction.as_str()),
        })
    }
}

/// Prefix the base system prompt with the agent's persona so every panelist
/// argues from its own specialization.
fn augment_system_prompt(agent: &AgentProfile, base: &str) -> String {
    let mut prompt = String::with_capacity(base.len() + 160);
    prompt.push_str(&format!(
        "You are {}, a {} on an investment debate panel.\n",
        agent.display_name, agent.specialization
    ));
    if !agent.expertise.is_empty() {
        prompt.push_str(&format!("Your expertise: {}.\n", agent.expertise.join(", ")));
    }
    prompt.push('\n');
    prompt.push_str(base);
    prompt
}

fn substitute(template: &str, context: &DebateContext) -> Result<String, PromptError> {
    let mut out = String::with_capacity(template.len() + context.fact_sheet.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .ok_or(PromptError::UnterminatedPlaceholder)?;
        match after[..end].trim() {
            "symbol" => out.push_str(&context.symbol),
            "factSheet" => out.push_str(&context.fact_sheet),
            "previousDebates" => out.push_str(&render_previous_debates(&context.previous_turns)),
            "currentTurn" => out.push_str(&context.current_turn_number.to_string()),
            other => return Err(PromptError::UnresolvedPlaceholder(other.to_string())),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Render the full cross-agent history in turn order, so every agent argues
/// against everything said so far — including its own earlier positions.
fn render_previous_debates(turns: &[DebateTurn]) -> String {
    if turns.is_empty() {
        return "No prior debate rounds.".to_string();
    }

    let mut rendered = String::new();
    for turn in turns {
        let stance = match turn.decision {
            Some(decision) => decision.to_string(),
            None => "no decision".to_string(),
        };
        rendered.push_str(&format!(
            "[turn {}] {} — {}\n",
            turn.turn_number, turn.agent_role, stance
        ));
        if let Some(summary) = &turn.summary {
            rendered.push_str(&format!("summary: {}\n", summary));
        }
        rendered.push_str(&turn.message);
        rendered.push_str("\n\n");
    }
    rendered
}
