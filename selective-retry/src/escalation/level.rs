//! Retry levels: which stages re-run and which artifacts are reused

use crate::artifact::{ArtifactSlot, Stage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Escalation level of a retry attempt, ordered by invalidation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryLevel {
    /// Keep plan and draft; re-run Refine + Assess
    Narrow,
    /// Keep plan; re-run Draft + Refine + Assess
    Medium,
    /// Keep nothing; re-run every stage
    Full,
}

impl RetryLevel {
    pub const ALL: [RetryLevel; 3] = [RetryLevel::Narrow, RetryLevel::Medium, RetryLevel::Full];

    /// Prior artifacts this level may reuse as input
    pub fn preserved_artifacts(self) -> &'static [ArtifactSlot] {
        match self {
            Self::Narrow => &[ArtifactSlot::Plan, ArtifactSlot::Draft],
            Self::Medium => &[ArtifactSlot::Plan],
            Self::Full => &[],
        }
    }

    /// Stages executed at this level, in order. Assess is always last.
    pub fn required_stages(self) -> &'static [Stage] {
        match self {
            Self::Narrow => &[Stage::Refine, Stage::Assess],
            Self::Medium => &[Stage::Draft, Stage::Refine, Stage::Assess],
            Self::Full => &[Stage::Plan, Stage::Draft, Stage::Refine, Stage::Assess],
        }
    }

    pub fn preserves(self, slot: ArtifactSlot) -> bool {
        self.preserved_artifacts().contains(&slot)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Narrow => "narrow",
            Self::Medium => "medium",
            Self::Full => "full",
        }
    }
}

impl fmt::Display for RetryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "narrow" => Ok(Self::Narrow),
            "medium" => Ok(Self::Medium),
            "full" => Ok(Self::Full),
            other => Err(format!(
                "unknown retry level '{}' (expected narrow, medium or full)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preserved_artifacts() {
        assert_eq!(
            RetryLevel::Narrow.preserved_artifacts(),
            &[ArtifactSlot::Plan, ArtifactSlot::Draft]
        );
        assert_eq!(RetryLevel::Medium.preserved_artifacts(), &[ArtifactSlot::Plan]);
        assert!(RetryLevel::Full.preserved_artifacts().is_empty());
    }

    #[test]
    fn test_required_stages_end_with_assess() {
        for level in RetryLevel::ALL {
            assert_eq!(level.required_stages().last(), Some(&Stage::Assess));
            assert!(!level.required_stages().contains(&Stage::Record));
        }
        assert_eq!(
            RetryLevel::Full.required_stages(),
            &[Stage::Plan, Stage::Draft, Stage::Refine, Stage::Assess]
        );
    }

    #[test]
    fn test_preserved_and_executed_are_disjoint() {
        for level in RetryLevel::ALL {
            for slot in level.preserved_artifacts() {
                assert!(!level.required_stages().contains(&slot.producer()));
            }
        }
    }

    #[test]
    fn test_ordering_and_parse() {
        assert!(RetryLevel::Full > RetryLevel::Medium);
        assert!(RetryLevel::Medium > RetryLevel::Narrow);
        assert_eq!("FULL".parse::<RetryLevel>(), Ok(RetryLevel::Full));
        assert!("partial".parse::<RetryLevel>().is_err());
    }
}
