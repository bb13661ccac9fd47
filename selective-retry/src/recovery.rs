//! Artifact Recovery Guard: validates preserved artifacts before reuse
//!
//! A preserved artifact that is missing, empty, altered since it was
//! produced, or not the shape its consumer expects must not be forwarded.
//! The controller answers any failure here by running the current attempt
//! as Full.

use crate::artifact::{Artifact, ArtifactSlot};
use crate::escalation::{GenerationState, RetryLevel};
use crate::structured;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Shape a preserved artifact must have to be reusable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpectedShape {
    /// A JSON object or array, bare or inside a fenced block
    StructuredJson,
    /// Free text with at least `min_chars` non-whitespace characters
    Text { min_chars: usize },
}

/// Why a preserved artifact was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryFailure {
    #[error("{slot} expected for reuse but not present")]
    Missing { slot: ArtifactSlot },

    #[error("{slot} is empty")]
    Empty { slot: ArtifactSlot },

    #[error("{slot} content no longer matches its recorded digest")]
    DigestMismatch { slot: ArtifactSlot },

    #[error("{slot} does not have the expected shape: {detail}")]
    Shape { slot: ArtifactSlot, detail: String },
}

impl RecoveryFailure {
    pub fn slot(&self) -> ArtifactSlot {
        match self {
            Self::Missing { slot }
            | Self::Empty { slot }
            | Self::DigestMismatch { slot }
            | Self::Shape { slot, .. } => *slot,
        }
    }
}

/// Guard configuration: the shape expected of each reusable slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactGuard {
    pub plan_shape: ExpectedShape,
    pub draft_shape: ExpectedShape,
}

impl Default for ArtifactGuard {
    fn default() -> Self {
        Self {
            plan_shape: ExpectedShape::StructuredJson,
            draft_shape: ExpectedShape::Text { min_chars: 1 },
        }
    }
}

impl ArtifactGuard {
    pub fn new(plan_shape: ExpectedShape, draft_shape: ExpectedShape) -> Self {
        Self {
            plan_shape,
            draft_shape,
        }
    }

    pub fn shape_for(&self, slot: ArtifactSlot) -> ExpectedShape {
        match slot {
            ArtifactSlot::Plan => self.plan_shape.clone(),
            ArtifactSlot::Draft => self.draft_shape.clone(),
            ArtifactSlot::Refined => ExpectedShape::Text { min_chars: 1 },
        }
    }

    /// Validate one preserved artifact
    pub fn validate<'a>(
        &self,
        slot: ArtifactSlot,
        artifact: &'a Artifact,
        shape: &ExpectedShape,
    ) -> Result<&'a Artifact, RecoveryFailure> {
        if artifact.content.trim().is_empty() {
            return Err(RecoveryFailure::Empty { slot });
        }

        if !artifact.digest_matches() {
            return Err(RecoveryFailure::DigestMismatch { slot });
        }

        match shape {
            ExpectedShape::StructuredJson => {
                if structured::parse_structured(&artifact.content).is_none() {
                    return Err(RecoveryFailure::Shape {
                        slot,
                        detail: "no JSON object or array found".to_string(),
                    });
                }
            }
            ExpectedShape::Text { min_chars } => {
                let chars = artifact
                    .content
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .count();
                if chars < *min_chars {
                    return Err(RecoveryFailure::Shape {
                        slot,
                        detail: format!("{} characters, need at least {}", chars, min_chars),
                    });
                }
            }
        }

        Ok(artifact)
    }

    /// Validate every artifact `level` would reuse from `state`.
    ///
    /// Returns the reusable inputs when all pass, or the first failure.
    pub fn check_reusable(
        &self,
        state: &GenerationState,
        level: RetryLevel,
    ) -> Result<BTreeMap<ArtifactSlot, Artifact>, RecoveryFailure> {
        if let Some(slot) = state.missing_for(level).into_iter().next() {
            return Err(RecoveryFailure::Missing { slot });
        }

        let inputs = state.to_reusable_inputs(level);
        for (slot, artifact) in &inputs {
            self.validate(*slot, artifact, &self.shape_for(*slot))?;
        }
        Ok(inputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::Stage;

    fn state_with(plan: &str, draft: &str) -> GenerationState {
        let mut state = GenerationState::new();
        state.record_stage_outputs(
            RetryLevel::Full,
            vec![
                Artifact::new(Stage::Plan, plan),
                Artifact::new(Stage::Draft, draft),
                Artifact::new(Stage::Refine, "refined"),
            ],
        );
        state
    }

    #[test]
    fn test_valid_artifacts_pass() {
        let guard = ArtifactGuard::default();
        let state = state_with("```json\n{\"scenes\": [1]}\n```", "the draft");
        let inputs = guard.check_reusable(&state, RetryLevel::Narrow).unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(guard.check_reusable(&state, RetryLevel::Full).unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_plan_rejected() {
        let guard = ArtifactGuard::default();
        let state = state_with("scene one, then scene two", "the draft");
        let err = guard.check_reusable(&state, RetryLevel::Medium).unwrap_err();
        assert!(matches!(err, RecoveryFailure::Shape { slot: ArtifactSlot::Plan, .. }));
    }

    #[test]
    fn test_altered_artifact_rejected() {
        let guard = ArtifactGuard::default();
        let mut state = state_with("{}", "the draft");
        if let Some(draft) = state.draft.as_mut() {
            draft.content = "tampered".to_string();
        }
        assert_eq!(
            guard.check_reusable(&state, RetryLevel::Narrow),
            Err(RecoveryFailure::DigestMismatch {
                slot: ArtifactSlot::Draft
            })
        );
        // Medium does not reuse the draft
        assert!(guard.check_reusable(&state, RetryLevel::Medium).is_ok());
    }

    #[test]
    fn test_missing_and_empty() {
        let guard = ArtifactGuard::default();
        let mut state = GenerationState::new();
        assert_eq!(
            guard.check_reusable(&state, RetryLevel::Medium).unwrap_err().slot(),
            ArtifactSlot::Plan
        );

        state.plan = Some(Artifact::new(Stage::Plan, "   "));
        assert_eq!(
            guard.check_reusable(&state, RetryLevel::Medium),
            Err(RecoveryFailure::Empty {
                slot: ArtifactSlot::Plan
            })
        );
    }

    #[test]
    fn test_text_shape_min_chars() {
        let guard = ArtifactGuard::new(
            ExpectedShape::Text { min_chars: 1 },
            ExpectedShape::Text { min_chars: 20 },
        );
        let state = state_with("plan as prose", "too short");
        assert!(guard.check_reusable(&state, RetryLevel::Medium).is_ok());
        let err = guard.check_reusable(&state, RetryLevel::Narrow).unwrap_err();
        assert!(err.to_string().contains("need at least 20"), "{err}");
    }

    #[test]
    fn test_shape_config_serde() {
        let shape: ExpectedShape = serde_json::from_str(r#"{"kind": "text", "min_chars": 5}"#).unwrap();
        assert_eq!(shape, ExpectedShape::Text { min_chars: 5 });
        let json = serde_json::to_string(&ExpectedShape::StructuredJson).unwrap();
        assert_eq!(json, r#"{"kind":"structured_json"}"#);
    }
}
