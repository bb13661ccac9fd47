//! Run results and the per-attempt audit trail.

use chrono::{DateTime, Utc};
use selective_retry::{
    Artifact, ArtifactSlot, Assessment, GenerationState, IssueType, PolicyDecision, RetryLevel,
    Stage,
};
use serde::{Deserialize, Serialize};

use crate::errors::TerminalError;
use crate::lifecycle::TransitionRecord;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Exhausted,
    Aborted,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// One loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 0-based attempt index
    pub attempt: u32,
    /// Level chosen by the previous iteration (Full for attempt 0)
    pub planned_level: RetryLevel,
    /// Level actually executed, after the recovery guard
    pub executed_level: RetryLevel,
    /// The guard rejected a preserved artifact and forced Full
    pub forced_by_guard: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_failure: Option<String>,
    /// Stages that completed, in order
    pub stages_run: Vec<Stage>,
    /// Gate verdict; `None` when the attempt faulted first
    pub passed: Option<bool>,
    pub issue_types: Vec<IssueType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<PolicyDecision>,
    /// Level chosen for the following attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_level: Option<RetryLevel>,
    /// Policy level a streak override replaced
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_from: Option<RetryLevel>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AttemptRecord {
    pub fn escalated(&self) -> bool {
        self.escalated_from.is_some()
    }
}

/// Artifacts of the latest attempt that completed its stage subset.
///
/// A Full attempt clears the generation state before it runs; if it then
/// faults, these still hold the last complete set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BestArtifacts {
    pub plan: Option<Artifact>,
    pub draft: Option<Artifact>,
    pub refined: Option<Artifact>,
}

impl BestArtifacts {
    pub fn capture(state: &GenerationState) -> Self {
        Self {
            plan: state.plan.clone(),
            draft: state.draft.clone(),
            refined: state.refined.clone(),
        }
    }

    pub fn artifact(&self, slot: ArtifactSlot) -> Option<&Artifact> {
        match slot {
            ArtifactSlot::Plan => self.plan.as_ref(),
            ArtifactSlot::Draft => self.draft.as_ref(),
            ArtifactSlot::Refined => self.refined.as_ref(),
        }
    }

    pub fn is_complete(&self) -> bool {
        ArtifactSlot::ALL.iter().all(|slot| self.artifact(*slot).is_some())
    }
}

/// Everything a caller gets back from a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub passed: bool,
    /// Stage-subset executions performed
    pub attempts: u32,
    /// Final generation state
    pub state: GenerationState,
    /// Best-known artifacts; survive a trailing faulted attempt
    pub best: BestArtifacts,
    /// Last Assessment produced, if any
    pub assessment: Option<Assessment>,
    /// Record stage output, when it ran and succeeded
    pub record: Option<Artifact>,
    pub history: Vec<AttemptRecord>,
    pub transitions: Vec<TransitionRecord>,
    /// Set for Exhausted and Aborted runs
    pub terminal: Option<TerminalError>,
}

impl RunOutcome {
    pub fn refined(&self) -> Option<&Artifact> {
        self.best.refined.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// Executed level of every attempt, in order
    pub fn level_history(&self) -> Vec<RetryLevel> {
        self.history.iter().map(|r| r.executed_level).collect()
    }

    pub fn summary(&self) -> String {
        let levels: Vec<&str> = self.level_history().iter().map(|l| l.as_str()).collect();
        let mut line = format!(
            "{}: {} after {} attempt(s) [{}]",
            self.run_id,
            self.status,
            self.attempts,
            levels.join(" → "),
        );
        if let Some(terminal) = &self.terminal {
            line.push_str(&format!(" ({})", terminal));
        }
        line
    }

    /// Serializable view for JSON output
    pub fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id.clone(),
            status: self.status,
            passed: self.passed,
            attempts: self.attempts,
            level_history: self.level_history(),
            refined: self.refined().map(|a| a.content.clone()),
            assessment: self.assessment.clone(),
            record: self.record.as_ref().map(|a| a.content.clone()),
            terminal: self.terminal.as_ref().map(|t| t.to_string()),
            history: self.history.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    pub passed: bool,
    pub attempts: u32,
    pub level_history: Vec<RetryLevel>,
    pub refined: Option<String>,
    pub assessment: Option<Assessment>,
    pub record: Option<String>,
    pub terminal: Option<String>,
    pub history: Vec<AttemptRecord>,
}
