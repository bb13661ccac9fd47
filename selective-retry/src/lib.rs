//! Selective Retry Library
//!
//! Deterministic building blocks for a staged generation pipeline that retries
//! only the stages a quality failure actually invalidates:
//!
//! - [`artifact`]: stages, artifacts and the declared stage-input keys
//! - [`assessment`]: quality-gate verdicts with a closed issue taxonomy
//! - [`escalation`]: retry levels, the level policy and per-run generation state
//! - [`recovery`]: the guard that vets preserved artifacts before reuse
//!
//! Nothing in this crate performs I/O or calls a stage executor; the async
//! controller lives in the `stage-pipeline` crate.
//!
//! # Usage
//!
//! ```rust
//! use selective_retry::{Assessment, Issue, IssueType, RetryLevel, RetryPolicy, Severity};
//!
//! let verdict = Assessment::fail(vec![Issue::new(IssueType::Prose, Severity::Medium, "flat")]);
//! assert_eq!(RetryPolicy::new().decide(&verdict, 0), RetryLevel::Narrow);
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod artifact;
pub mod assessment;
pub mod escalation;
pub mod recovery;
pub mod structured;

pub use artifact::{Artifact, ArtifactSlot, InputError, InputKey, Stage, StageInputs};

pub use assessment::{Assessment, AssessmentParseError, Issue, IssueType, Severity};

pub use escalation::{
    DecisionReason, EscalationOutcome, EscalationThresholds, GenerationState, PolicyConfig,
    PolicyDecision, RetryLevel, RetryPolicy,
};

pub use recovery::{ArtifactGuard, ExpectedShape, RecoveryFailure};
