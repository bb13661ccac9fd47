//! Run Lifecycle: explicit run phases and legal transition guards.
//!
//! Every run starts at `Start`, enters `Running` once per attempt and ends in
//! exactly one of `Passed`, `Exhausted` or `Aborted`. The controller calls
//! [`RunLifecycle::advance`] at each edge; the transition log is returned with
//! the run outcome.

use std::fmt;
use std::time::Instant;

use selective_retry::RetryLevel;
use serde::{Deserialize, Serialize};

/// Phases of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Created, no attempt executed yet.
    Start,
    /// An attempt is executing its stage subset.
    Running,
    /// The quality gate passed (terminal).
    Passed,
    /// Attempt budget spent (terminal).
    Exhausted,
    /// Cancelled by the caller (terminal).
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Passed | Self::Exhausted | Self::Aborted)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::Running => write!(f, "Running"),
            Self::Passed => write!(f, "Passed"),
            Self::Exhausted => write!(f, "Exhausted"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Legal edges of the run graph:
/// ```text
/// Start   → Running | Aborted
/// Running → Running | Passed | Exhausted | Aborted
/// ```
fn is_legal_transition(from: RunPhase, to: RunPhase) -> bool {
    use RunPhase::*;

    matches!(
        (from, to),
        (Start, Running)
            | (Start, Aborted)
            | (Running, Running)
            | (Running, Passed)
            | (Running, Exhausted)
            | (Running, Aborted)
    )
}

/// A single recorded phase transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RunPhase,
    pub to: RunPhase,
    /// Attempt index at the time of transition.
    pub attempt: u32,
    /// Level of the attempt being entered, for transitions into `Running`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<RetryLevel>,
    /// Milliseconds since the run started.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: RunPhase,
    pub to: RunPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal run transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Phase tracker for one run.
pub struct RunLifecycle {
    current: RunPhase,
    attempt: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl RunLifecycle {
    pub fn new() -> Self {
        Self {
            current: RunPhase::Start,
            attempt: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RunPhase {
        self.current
    }

    pub fn set_attempt(&mut self, attempt: u32) {
        self.attempt = attempt;
    }

    /// Enter `Running` for an attempt at `level`.
    pub fn begin_attempt(&mut self, level: RetryLevel) -> Result<(), IllegalTransition> {
        self.push(RunPhase::Running, Some(level), None)
    }

    /// Move to `to`, recording `reason`.
    pub fn advance(&mut self, to: RunPhase, reason: Option<&str>) -> Result<(), IllegalTransition> {
        self.push(to, None, reason)
    }

    fn push(
        &mut self,
        to: RunPhase,
        level: Option<RetryLevel>,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(
            from = %self.current,
            to = %to,
            attempt = self.attempt,
            "run transition"
        );

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            attempt: self.attempt,
            level,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    pub fn summary(&self) -> String {
        let phases: Vec<String> = self
            .transitions
            .iter()
            .map(|t| match t.level {
                Some(level) => format!("{}({})", t.to, level),
                None => t.to.to_string(),
            })
            .collect();
        format!(
            "{} → {} ({} transitions) [{}]",
            RunPhase::Start,
            self.current,
            self.transitions.len(),
            phases.join(" → "),
        )
    }
}

impl Default for RunLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
