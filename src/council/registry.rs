//! Roster of analyst agents and their versioned prompts.
//!
//! The registry is the administrative write path; the debate engine only ever
//! reads from it, and only once — [`AgentRegistry::snapshot`] freezes the
//! active roster and the active prompt per agent at session creation, so a
//! roster edit mid-debate cannot affect a session already in flight.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

/// One analyst persona: identity, specialization, model selection, and the
/// priority weight used for deterministic turn ordering and verdict tallying.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    pub display_name: String,
    /// Specialization label, e.g. `"Macro Strategist"`. Tags the audit trail.
    pub specialization: String,
    /// Ordered expertise categories, most relevant first.
    #[serde(default)]
    pub expertise: Vec<String>,
    pub active: bool,
    /// Total order over the panel: higher priority speaks first in the
    /// recorded turn ordering and weighs more in the verdict tally.
    pub priority: i32,
    pub model: String,
    pub temperature: f32,
    /// Completion cap forwarded to the model backend.
    pub max_tokens: usize,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl AgentProfile {
    pub fn new(
        agent_id: impl Into<String>,
        display_name: impl Into<String>,
        specialization: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            specialization: specialization.into(),
            expertise: Vec::new(),
            active: true,
            priority: 0,
            model: model.into(),
            temperature: 0.7,
            max_tokens: 1024,
            metadata: HashMap::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expertise(mut self, categories: Vec<String>) -> Self {
        self.expertise = categories;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

/// A versioned prompt bound to one agent. At most one prompt per agent is
/// active at any time; versions only ever increase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentPrompt {
    pub agent_id: String,
    pub version: u32,
    pub system_prompt: String,
    /// Instruction template with `{{symbol}}`, `{{factSheet}}`,
    /// `{{previousDebates}}` and `{{currentTurn}}` placeholders.
    pub instruction_template: String,
    pub active: bool,
}

impl AgentPrompt {
    pub fn new(
        agent_id: impl Into<String>,
        version: u32,
        system_prompt: impl Into<String>,
        instruction_template: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            version,
            system_prompt: system_prompt.into(),
            instruction_template: instruction_template.into(),
            active: true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RegistryError {
    /// The agent id is absent from the active set.
    NotFound(String),
    DuplicateAgent(String),
    /// A published prompt version must exceed every existing version.
    StaleVersion {
        agent_id: String,
        version: u32,
        newest: u32,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::NotFound(id) => write!(f, "agent not found in active set: {}", id),
            RegistryError::DuplicateAgent(id) => write!(f, "agent already registered: {}", id),
            RegistryError::StaleVersion {
                agent_id,
                version,
                newest,
            } => write!(
                f,
                "prompt version {} for agent {} is not newer than {}",
                version, agent_id, newest
            ),
        }
    }
}

impl Error for RegistryError {}

/// In-memory roster. The debate engine treats it as read-only.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentProfile>,
    prompts: HashMap<String, Vec<AgentPrompt>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: AgentProfile) -> Result<(), RegistryError> {
        if self.agents.contains_key(&agent.agent_id) {
            return Err(RegistryError::DuplicateAgent(agent.agent_id));
        }
        self.agents.insert(agent.agent_id.clone(), agent);
        Ok(())
    }

    /// Publish a new prompt version for an agent. If the prompt is active it
    /// replaces the previously active one, keeping the at-most-one-active
    /// invariant at the write path.
    pub fn publish_prompt(&mut self, prompt: AgentPrompt) -> Result<(), RegistryError> {
        if !self.agents.contains_key(&prompt.agent_id) {
            return Err(RegistryError::NotFound(prompt.agent_id));
        }
        let versions = self.prompts.entry(prompt.agent_id.clone()).or_default();
        let newest = versions.iter().map(|p| p.version).max().unwrap_or(0);
        if prompt.version <= newest {
            return Err(RegistryError::StaleVersion {
                agent_id: prompt.agent_id,
                version: prompt.version,
                newest,
            });
        }
        if prompt.active {
            for existing in versions.iter_mut() {
                existing.active = false;
            }
        }
        versions.push(prompt);
        Ok(())
    }

    /// Active agents sorted by priority descending, then agent id ascending,
    /// so the ordering is total and replay-stable.
    pub fn list_active(&self) -> Vec<AgentProfile> {
        let mut active: Vec<AgentProfile> = self
            .agents
            .values()
            .filter(|a| a.active)
            .cloned()
            .collect();
        active.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        active
    }

    pub fn resolve(&self, agent_id: &str) -> Result<&AgentProfile, RegistryError> {
        self.agents
            .get(agent_id)
            .filter(|a| a.active)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))
    }

    pub fn active_prompt(&self, agent_id: &str) -> Option<&AgentPrompt> {
        self.prompts
            .get(agent_id)
            .and_then(|versions| versions.iter().find(|p| p.active))
    }

    /// Freeze the active roster and active prompts for a session's lifetime.
    pub fn snapshot(&self) -> RosterSnapshot {
        let agents = self.list_active();
        let prompts = agents
            .iter()
            .filter_map(|a| {
                self.active_prompt(&a.agent_id)
                    .map(|p| (a.agent_id.clone(), p.clone()))
            })
            .collect();
        RosterSnapshot { agents, prompts }
    }
}

/// Point-in-time copy of the active roster and the active prompt per agent.
#[derive(Clone, Debug)]
pub struct RosterSnapshot {
    /// Priority-ordered active agents.
    pub agents: Vec<AgentProfile>,
    pub prompts: HashMap<String, AgentPrompt>,
}
