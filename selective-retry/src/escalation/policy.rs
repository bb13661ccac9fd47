//! Retry Level Policy: deterministic mapping from a failed Assessment to a level
//!
//! Rules are evaluated in priority order, first match wins:
//!
//! ```text
//! 1. attempt >= terminal threshold            → Full
//! 2. structure, or safety (high/critical)     → Full
//! 3. motivation/hook/clue_fairness/continuity → Medium
//! 4. prose/pacing/word_count, safety(low/med) → Narrow
//! 5. nothing recognized                       → Medium
//! ```
//!
//! One high-impact issue discards all reusable work regardless of the
//! low-impact issues reported alongside it.

use crate::assessment::{Assessment, IssueType};
use crate::escalation::level::RetryLevel;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Configuration for the Retry Level Policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Attempt index (0-based) from which every decision is Full
    pub terminal_attempt_threshold: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            terminal_attempt_threshold: 2,
        }
    }
}

/// Which rule produced a decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// Attempt index reached the terminal threshold
    TerminalAttempt { attempt: u32, threshold: u32 },
    /// A structure issue invalidates the plan
    Structural,
    /// A high or critical safety issue
    SevereSafety,
    /// Content issue in the draft
    Content { issue_type: IssueType },
    /// Only polish-class issues
    Polish,
    /// No issue the policy recognizes
    Unrecognized,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TerminalAttempt { attempt, threshold } => {
                write!(f, "attempt {} reached terminal threshold {}", attempt, threshold)
            }
            Self::Structural => write!(f, "structure issue"),
            Self::SevereSafety => write!(f, "high/critical safety issue"),
            Self::Content { issue_type } => write!(f, "{} issue", issue_type),
            Self::Polish => write!(f, "polish-class issues only"),
            Self::Unrecognized => write!(f, "no recognized issue"),
        }
    }
}

/// A level together with the rule that chose it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub level: RetryLevel,
    pub reason: DecisionReason,
}

/// The Retry Level Policy. Pure and deterministic.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    config: PolicyConfig,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Level for the attempt after `attempt` failed with `assessment`
    pub fn decide(&self, assessment: &Assessment, attempt: u32) -> RetryLevel {
        self.decide_with_reason(assessment, attempt).level
    }

    pub fn decide_with_reason(&self, assessment: &Assessment, attempt: u32) -> PolicyDecision {
        let decision = self.evaluate(assessment, attempt);
        tracing::debug!(
            attempt,
            level = %decision.level,
            reason = %decision.reason,
            issues = assessment.issues.len(),
            "retry level decided"
        );
        decision
    }

    fn evaluate(&self, assessment: &Assessment, attempt: u32) -> PolicyDecision {
        let threshold = self.config.terminal_attempt_threshold;
        if attempt >= threshold {
            return PolicyDecision {
                level: RetryLevel::Full,
                reason: DecisionReason::TerminalAttempt { attempt, threshold },
            };
        }

        let issues = &assessment.issues;

        if issues.iter().any(|i| i.issue_type == IssueType::Structure) {
            return PolicyDecision {
                level: RetryLevel::Full,
                reason: DecisionReason::Structural,
            };
        }

        if issues
            .iter()
            .any(|i| i.issue_type == IssueType::Safety && i.severity.is_severe())
        {
            return PolicyDecision {
                level: RetryLevel::Full,
                reason: DecisionReason::SevereSafety,
            };
        }

        if let Some(issue) = issues.iter().find(|i| i.issue_type.is_content()) {
            return PolicyDecision {
                level: RetryLevel::Medium,
                reason: DecisionReason::Content {
                    issue_type: issue.issue_type.clone(),
                },
            };
        }

        // Safety issues that reach this point are low/medium and fold into polish
        if issues
            .iter()
            .any(|i| i.issue_type.is_polish() || i.issue_type == IssueType::Safety)
        {
            return PolicyDecision {
                level: RetryLevel::Narrow,
                reason: DecisionReason::Polish,
            };
        }

        PolicyDecision {
            level: RetryLevel::Medium,
            reason: DecisionReason::Unrecognized,
        }
    }
}
