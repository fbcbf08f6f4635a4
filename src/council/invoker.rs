//! The model boundary: a `ModelInvoker` sends one fully resolved request to a
//! language-model backend and returns the raw reply plus token accounting.
//!
//! The engine never talks HTTP itself. Whatever backend the host application
//! uses (a cloud provider, a local model, a replay fixture in tests) is
//! injected as an `Arc<dyn ModelInvoker>` and shared across all agents of a
//! session. Per-call deadlines are owned by the caller via
//! `tokio::time::timeout`; an invoker only has to honour task cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Accumulate another usage record into this one.
    pub fn absorb(&mut self, other: &TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A concrete, ready-to-send request for one agent's contribution in one
/// round. Produced by [`PromptResolver`](crate::PromptResolver); consumed by a
/// [`ModelInvoker`].
#[derive(Clone, Debug)]
pub struct ResolvedRequest {
    pub agent_id: String,
    /// Model identifier the agent is pinned to (e.g. `"gpt-4o"`).
    pub model: String,
    pub temperature: f32,
    /// Completion cap forwarded to the backend.
    pub max_tokens: usize,
    pub system_prompt: Arc<str>,
    /// The rendered instruction for this round, placeholders substituted.
    pub instruction: Arc<str>,
}

/// Raw reply from the model backend, before the verdict block is parsed out.
#[derive(Clone, Debug)]
pub struct ModelReply {
    pub content: Arc<str>,
    pub usage: TokenUsage,
}

/// Typed failures at the invocation boundary. Both map to a degraded turn;
/// neither aborts the round.
#[derive(Debug, Clone)]
pub enum InvokeError {
    /// The call exceeded its per-call deadline.
    Timeout,
    /// The backend rejected or failed the call.
    Invocation(String),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::Timeout => write!(f, "model invocation timed out"),
            InvokeError::Invocation(reason) => write!(f, "model invocation failed: {}", reason),
        }
    }
}

impl Error for InvokeError {}

/// Trait defining the interface to the language-model backend.
///
/// Implementations must be cheap to share (`Arc`) and safe to call
/// concurrently: one debate round fans out up to a full panel of simultaneous
/// `invoke` calls.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Send one resolved request and return the raw reply.
    async fn invoke(&self, request: &ResolvedRequest) -> Result<ModelReply, InvokeError>;

    /// Name of the backend, for logging.
    fn backend_name(&self) -> &str;
}
