//! Generation State: tracks preserved artifacts, attempts and escalation streaks
//!
//! Owned by exactly one controller run. Nothing here is shared between runs.

use crate::artifact::{Artifact, ArtifactSlot};
use crate::escalation::level::RetryLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Streak lengths at which a repeated level is overridden upward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationThresholds {
    /// Consecutive Narrow decisions that turn into Medium
    pub narrow: u32,
    /// Consecutive Medium decisions that turn into Full
    pub medium: u32,
}

impl Default for EscalationThresholds {
    fn default() -> Self {
        Self {
            narrow: 2,
            medium: 2,
        }
    }
}

/// Result of applying streak escalation to a policy decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationOutcome {
    /// Level to run next (post-override)
    pub level: RetryLevel,
    /// The policy's level, when a streak overrode it
    pub escalated_from: Option<RetryLevel>,
}

impl EscalationOutcome {
    pub fn escalated(&self) -> bool {
        self.escalated_from.is_some()
    }
}

/// Per-run record of produced artifacts and retry bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationState {
    pub plan: Option<Artifact>,
    pub draft: Option<Artifact>,
    pub refined: Option<Artifact>,
    /// Completed loop iterations
    pub attempt: u32,
    /// Level chosen for the next attempt by the last iteration
    pub last_level: Option<RetryLevel>,
    /// Consecutive Narrow decisions, including the latest
    pub narrow_streak: u32,
    /// Consecutive Medium decisions, including the latest
    pub medium_streak: u32,
}

impl GenerationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifact(&self, slot: ArtifactSlot) -> Option<&Artifact> {
        match slot {
            ArtifactSlot::Plan => self.plan.as_ref(),
            ArtifactSlot::Draft => self.draft.as_ref(),
            ArtifactSlot::Refined => self.refined.as_ref(),
        }
    }

    fn slot_mut(&mut self, slot: ArtifactSlot) -> &mut Option<Artifact> {
        match slot {
            ArtifactSlot::Plan => &mut self.plan,
            ArtifactSlot::Draft => &mut self.draft,
            ArtifactSlot::Refined => &mut self.refined,
        }
    }

    pub fn has_all_artifacts(&self) -> bool {
        ArtifactSlot::ALL.iter().all(|s| self.artifact(*s).is_some())
    }

    pub fn clear_artifacts(&mut self) {
        self.plan = None;
        self.draft = None;
        self.refined = None;
    }

    /// Get ready to execute `level`. Full never forwards earlier artifacts.
    pub fn prepare_for(&mut self, level: RetryLevel) {
        if level == RetryLevel::Full {
            self.clear_artifacts();
        }
    }

    /// Artifacts `level` would reuse, restricted to those present
    pub fn to_reusable_inputs(&self, level: RetryLevel) -> BTreeMap<ArtifactSlot, Artifact> {
        level
            .preserved_artifacts()
            .iter()
            .filter_map(|slot| self.artifact(*slot).map(|a| (*slot, a.clone())))
            .collect()
    }

    /// Slots `level` expects to reuse but which are absent
    pub fn missing_for(&self, level: RetryLevel) -> Vec<ArtifactSlot> {
        level
            .preserved_artifacts()
            .iter()
            .copied()
            .filter(|slot| self.artifact(*slot).is_none())
            .collect()
    }

    /// Write back the artifacts the executed subset produced.
    ///
    /// Slots whose producing stage did not run keep their value; under Full
    /// they were already cleared by [`prepare_for`](Self::prepare_for).
    pub fn record_stage_outputs(
        &mut self,
        level: RetryLevel,
        outputs: impl IntoIterator<Item = Artifact>,
    ) {
        for artifact in outputs {
            let Some(slot) = artifact.stage.produces() else {
                continue;
            };
            if !level.required_stages().contains(&artifact.stage) {
                tracing::warn!(
                    stage = %artifact.stage,
                    level = %level,
                    "ignoring output from a stage outside the executed subset"
                );
                continue;
            }
            *self.slot_mut(slot) = Some(artifact);
        }
    }

    /// Apply streak escalation to the policy's level and record the result
    /// as `last_level`.
    pub fn apply_escalation(
        &mut self,
        raw: RetryLevel,
        thresholds: EscalationThresholds,
    ) -> EscalationOutcome {
        let mut level = raw;

        if level == RetryLevel::Narrow {
            self.narrow_streak += 1;
            if self.narrow_streak >= thresholds.narrow {
                level = RetryLevel::Medium;
                self.narrow_streak = 0;
            }
        }

        if level == RetryLevel::Medium {
            self.medium_streak += 1;
            if self.medium_streak >= thresholds.medium {
                level = RetryLevel::Full;
                self.medium_streak = 0;
            }
        }

        if level != RetryLevel::Narrow {
            self.narrow_streak = 0;
        }
        if level != RetryLevel::Medium {
            self.medium_streak = 0;
        }

        self.last_level = Some(level);

        EscalationOutcome {
            level,
            escalated_from: (level != raw).then_some(raw),
        }
    }

    /// Bookkeeping after a stage fault: the next attempt is Full
    pub fn note_fault(&mut self) -> RetryLevel {
        self.narrow_streak = 0;
        self.medium_streak = 0;
        self.last_level = Some(RetryLevel::Full);
        RetryLevel::Full
    }

    pub fn advance_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn summary(&self) -> String {
        let present: Vec<String> = ArtifactSlot::ALL
            .iter()
            .filter(|s| self.artifact(**s).is_some())
            .map(|s| s.to_string())
            .collect();
        format!(
            "attempt={} last_level={} narrow_streak={} medium_streak={} artifacts=[{}]",
            self.attempt,
            self.last_level.map(|l| l.as_str()).unwrap_or("none"),
            self.narrow_streak,
            self.medium_streak,
            present.join(","),
        )
    }
}
