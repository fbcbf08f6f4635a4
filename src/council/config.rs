//! Tuning knobs for a debate session.
//!
//! This struct is intentionally minimal and constructed by hand — no config
//! file parsing. The stabilization threshold and the concurrency cap are
//! deliberately configuration rather than constants.

use std::time::Duration;

/// Tuning for one [`DebateSession`](crate::DebateSession).
#[derive(Clone, Debug)]
pub struct DebateConfig {
    /// Maximum number of rounds before the session is `Exhausted`.
    pub max_turns: u32,
    /// Maximum confidence spread (max − min, in confidence points) across the
    /// round's deciding agents for the panel to count as stable.
    pub stability_threshold: f64,
    /// Cap on simultaneous in-flight model calls within one round.
    pub max_concurrency: usize,
    /// Independent deadline per model call.
    pub call_timeout: Duration,
}

impl DebateConfig {
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_stability_threshold(mut self, threshold: f64) -> Self {
        self.stability_threshold = threshold;
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_turns: 3,
            stability_threshold: 15.0,
            max_concurrency: 16,
            call_timeout: Duration::from_secs(60),
        }
    }
}
