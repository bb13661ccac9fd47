//! Stages, artifacts and declared stage inputs
//!
//! A pipeline run moves through five fixed stages. Three of them produce an
//! artifact that downstream stages consume; Assess produces the quality
//! verdict and Record runs once when the run completes.
//!
//! ```text
//! Plan ──▶ Draft ──▶ Refine ──▶ Assess      (Record on completion)
//!  plan     draft     refined   assessment
//! ```
//!
//! Preserved artifacts are handed back to the executor under the `*Override`
//! input keys, so an executor can tell reused input from fresh output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Fixed pipeline stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Produces the structured plan
    Plan,
    /// Produces the first full draft from the plan
    Draft,
    /// Polishes the draft into the refined artifact
    Refine,
    /// Quality gate; produces the Assessment
    Assess,
    /// Completion bookkeeping over all three artifacts and the Assessment
    Record,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Plan,
        Stage::Draft,
        Stage::Refine,
        Stage::Assess,
        Stage::Record,
    ];

    /// The artifact slot this stage fills, if any
    pub fn produces(self) -> Option<ArtifactSlot> {
        match self {
            Self::Plan => Some(ArtifactSlot::Plan),
            Self::Draft => Some(ArtifactSlot::Draft),
            Self::Refine => Some(ArtifactSlot::Refined),
            Self::Assess | Self::Record => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Plan => "Plan",
            Self::Draft => "Draft",
            Self::Refine => "Refine",
            Self::Assess => "Assess",
            Self::Record => "Record",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The three artifact fields of a generation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactSlot {
    Plan,
    Draft,
    Refined,
}

impl ArtifactSlot {
    pub const ALL: [ArtifactSlot; 3] = [ArtifactSlot::Plan, ArtifactSlot::Draft, ArtifactSlot::Refined];

    /// Stage that writes this slot
    pub fn producer(self) -> Stage {
        match self {
            Self::Plan => Stage::Plan,
            Self::Draft => Stage::Draft,
            Self::Refined => Stage::Refine,
        }
    }

    /// Input key used when the artifact was produced in the current attempt
    pub fn input_key(self) -> InputKey {
        match self {
            Self::Plan => InputKey::PlanArtifact,
            Self::Draft => InputKey::DraftArtifact,
            Self::Refined => InputKey::RefinedArtifact,
        }
    }

    /// Input key used when the artifact is reused from an earlier attempt.
    ///
    /// The refined artifact is never reused, so it has no override channel.
    pub fn override_key(self) -> Option<InputKey> {
        match self {
            Self::Plan => Some(InputKey::PlanArtifactOverride),
            Self::Draft => Some(InputKey::DraftArtifactOverride),
            Self::Refined => None,
        }
    }
}

impl fmt::Display for ArtifactSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.input_key().as_str())
    }
}

/// Opaque output of a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Stage that produced this artifact
    pub stage: Stage,
    /// Raw content as returned by the executor
    pub content: String,
    /// BLAKE3 hex digest of `content` at the time the artifact was produced
    pub digest: String,
    /// Attempt index (0-based) that produced this artifact
    pub attempt: u32,
}

impl Artifact {
    pub fn new(stage: Stage, content: impl Into<String>) -> Self {
        let content = content.into();
        let digest = Self::compute_digest(&content);
        Self {
            stage,
            content,
            digest,
            attempt: 0,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn compute_digest(content: &str) -> String {
        blake3::hash(content.as_bytes()).to_hex().to_string()
    }

    /// Whether the content is still byte-identical to what was produced
    pub fn digest_matches(&self) -> bool {
        Self::compute_digest(&self.content) == self.digest
    }
}

/// Declared input keys of the stage executor interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputKey {
    PlanArtifact,
    PlanArtifactOverride,
    DraftArtifact,
    DraftArtifactOverride,
    RefinedArtifact,
}

impl InputKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlanArtifact => "planArtifact",
            Self::PlanArtifactOverride => "planArtifactOverride",
            Self::DraftArtifact => "draftArtifact",
            Self::DraftArtifactOverride => "draftArtifactOverride",
            Self::RefinedArtifact => "refinedArtifact",
        }
    }

    pub fn is_override(self) -> bool {
        matches!(self, Self::PlanArtifactOverride | Self::DraftArtifactOverride)
    }
}

impl fmt::Display for InputKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Violations of the declared-input rules
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("{stage} requires {key} or its override")]
    MissingInput { stage: Stage, key: InputKey },

    #[error("{stage} received both {primary} and {override_key}")]
    ConflictingInputs {
        stage: Stage,
        primary: InputKey,
        override_key: InputKey,
    },

    #[error("{stage} requires an Assessment")]
    MissingAssessment { stage: Stage },
}

/// Artifact inputs handed to one stage call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageInputs {
    entries: BTreeMap<InputKey, Artifact>,
}

impl StageInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: InputKey, artifact: Artifact) {
        self.entries.insert(key, artifact);
    }

    pub fn with(mut self, key: InputKey, artifact: Artifact) -> Self {
        self.insert(key, artifact);
        self
    }

    pub fn get(&self, key: InputKey) -> Option<&Artifact> {
        self.entries.get(&key)
    }

    pub fn contains(&self, key: InputKey) -> bool {
        self.entries.contains_key(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = InputKey> + '_ {
        self.entries.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (InputKey, &Artifact)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The artifact for `slot`, whether fresh or supplied as an override
    pub fn resolve(&self, slot: ArtifactSlot) -> Option<&Artifact> {
        self.get(slot.input_key())
            .or_else(|| slot.override_key().and_then(|k| self.get(k)))
    }

    /// Check the declared-input rules for `stage`.
    ///
    /// Extra upstream keys are allowed; only the declared requirements are
    /// enforced.
    pub fn validate_for(&self, stage: Stage, has_assessment: bool) -> Result<(), InputError> {
        match stage {
            Stage::Plan => Ok(()),
            Stage::Draft => self.require_one(stage, ArtifactSlot::Plan),
            Stage::Refine => self.require_one(stage, ArtifactSlot::Draft),
            Stage::Assess => self.require_one(stage, ArtifactSlot::Refined),
            Stage::Record => {
                for slot in ArtifactSlot::ALL {
                    self.require_one(stage, slot)?;
                }
                if !has_assessment {
                    return Err(InputError::MissingAssessment { stage });
                }
                Ok(())
            }
        }
    }

    fn require_one(&self, stage: Stage, slot: ArtifactSlot) -> Result<(), InputError> {
        let primary = slot.input_key();
        match (self.contains(primary), slot.override_key()) {
            (true, Some(ov)) if self.contains(ov) => Err(InputError::ConflictingInputs {
                stage,
                primary,
                override_key: ov,
            }),
            (true, _) => Ok(()),
            (false, Some(ov)) if self.contains(ov) => Ok(()),
            _ => Err(InputError::MissingInput { stage, key: primary }),
        }
    }
}
