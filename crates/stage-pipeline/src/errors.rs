//! Pipeline error taxonomy with retry classification.
//!
//! Only [`TerminalError`] ever reaches a caller, and only as a field of the
//! run outcome. Stage faults and recovery failures steer the next level.
//!
//! ## Retry categories
//!
//! | Category          | Retriable | Effect                               |
//! |-------------------|-----------|--------------------------------------|
//! | Transient         | yes       | next attempt runs Full               |
//! | Timeout           | yes       | next attempt runs Full               |
//! | ContractViolation | yes       | next attempt runs Full               |
//! | Exhausted         | no        | run ends EXHAUSTED                   |
//! | Cancelled         | no        | run ends ABORTED                     |

use std::fmt;
use std::time::Duration;

use selective_retry::{InputError, Stage};
use thiserror::Error;

/// Classification used by the controller to decide whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryCategory {
    /// Executor or backend failure.
    Transient,
    /// Stage call exceeded its time budget.
    Timeout,
    /// The controller assembled inputs that break the declared-input rules.
    ContractViolation,
    /// Attempt budget spent (terminal).
    Exhausted,
    /// Cancelled by the caller (terminal).
    Cancelled,
}

impl RetryCategory {
    pub fn is_retriable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout | Self::ContractViolation)
    }
}

impl fmt::Display for RetryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Timeout => write!(f, "timeout"),
            Self::ContractViolation => write!(f, "contract_violation"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure of one stage call. Handled inside the loop.
#[derive(Debug, Clone, Error)]
pub enum StageFault {
    /// The executor returned an error.
    #[error("{stage} failed: {message}")]
    Executor { stage: Stage, message: String },

    /// The executor did not answer within the stage timeout.
    #[error("{stage} timed out after {}s", after.as_secs())]
    Timeout { stage: Stage, after: Duration },

    /// Inputs for the stage violated the declared-input rules.
    #[error("invalid stage inputs: {0}")]
    InvalidInputs(#[from] InputError),
}

impl StageFault {
    pub fn executor(stage: Stage, err: &anyhow::Error) -> Self {
        Self::Executor {
            stage,
            message: format!("{:#}", err),
        }
    }

    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Executor { .. } => RetryCategory::Transient,
            Self::Timeout { .. } => RetryCategory::Timeout,
            Self::InvalidInputs(_) => RetryCategory::ContractViolation,
        }
    }

    pub fn is_retriable(&self) -> bool {
        self.retry_category().is_retriable()
    }

    /// Stage the fault occurred in
    pub fn stage(&self) -> Stage {
        match self {
            Self::Executor { stage, .. } | Self::Timeout { stage, .. } => *stage,
            Self::InvalidInputs(err) => match err {
                InputError::MissingInput { stage, .. }
                | InputError::ConflictingInputs { stage, .. }
                | InputError::MissingAssessment { stage } => *stage,
            },
        }
    }
}

/// Terminal condition attached to an EXHAUSTED or ABORTED outcome.
#[derive(Debug, Clone, Error)]
pub enum TerminalError {
    /// Attempt budget spent without passing the gate.
    #[error("attempt budget exhausted after {attempts} attempts{}", fault_suffix(.fault))]
    Exhausted {
        attempts: u32,
        /// Fault of the final attempt, when it ended in one
        fault: Option<StageFault>,
    },

    /// Cancellation was requested between attempts.
    #[error("run cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

fn fault_suffix(fault: &Option<StageFault>) -> String {
    match fault {
        Some(f) => format!(" (last attempt faulted: {})", f),
        None => String::new(),
    }
}

impl TerminalError {
    pub fn retry_category(&self) -> RetryCategory {
        match self {
            Self::Exhausted { .. } => RetryCategory::Exhausted,
            Self::Cancelled { .. } => RetryCategory::Cancelled,
        }
    }

    pub fn fault(&self) -> Option<&StageFault> {
        match self {
            Self::Exhausted { fault, .. } => fault.as_ref(),
            Self::Cancelled { .. } => None,
        }
    }
}
