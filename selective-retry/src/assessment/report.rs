//! Assessment: the quality-gate verdict produced by the Assess stage

use crate::assessment::issue::{Issue, IssueType, Severity};
use crate::structured;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tag used for the issue attached to an unparseable gate verdict
pub const PARSING_ERROR_TAG: &str = "parsing_error";

/// Quality-gate verdict.
///
/// Extra fields a gate may emit (scores, hard-fail flags, chapter numbers)
/// are ignored on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assessment {
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub revision_instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub strengths: Vec<String>,
}

#[derive(Debug, Error)]
#[error("no assessment found in gate output ({len} bytes)")]
pub struct AssessmentParseError {
    pub len: usize,
}

impl Assessment {
    /// A passing verdict with no issues
    pub fn pass() -> Self {
        Self {
            passed: true,
            ..Default::default()
        }
    }

    /// A failing verdict with the given issues
    pub fn fail(issues: Vec<Issue>) -> Self {
        Self {
            passed: false,
            issues,
            ..Default::default()
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = feedback.into();
        self
    }

    pub fn with_revision_instructions(mut self, instructions: Vec<String>) -> Self {
        self.revision_instructions = instructions;
        self
    }

    /// Text handed to the next attempt.
    ///
    /// Falls back to the revision instructions, one per line, when the gate
    /// left `feedback` empty.
    pub fn feedback_text(&self) -> String {
        if !self.feedback.trim().is_empty() {
            return self.feedback.clone();
        }
        self.revision_instructions.join("\n")
    }

    pub fn issue_types(&self) -> Vec<IssueType> {
        self.issues.iter().map(|i| i.issue_type.clone()).collect()
    }

    pub fn has_issue(&self, issue_type: &IssueType) -> bool {
        self.issues.iter().any(|i| &i.issue_type == issue_type)
    }

    /// Highest severity among the issues, if any
    pub fn max_severity(&self) -> Option<Severity> {
        self.issues.iter().map(|i| i.severity).max()
    }

    /// Parse a verdict out of raw gate output. Only JSON objects count.
    pub fn parse_raw(raw: &str) -> Result<Self, AssessmentParseError> {
        structured::parse_first_object::<Self>(raw).ok_or(AssessmentParseError { len: raw.len() })
    }

    /// Parse a verdict, substituting a failing verdict when nothing parses.
    ///
    /// The substitute carries a single critical `parsing_error` issue, which
    /// the policy does not recognize and therefore answers conservatively.
    pub fn from_raw(raw: &str) -> Self {
        Self::parse_raw(raw).unwrap_or_else(|e| {
            tracing::debug!(error = %e, "gate output unparseable, using fallback verdict");
            Self::unparseable()
        })
    }

    pub fn unparseable() -> Self {
        Self {
            passed: false,
            issues: vec![Issue::new(
                IssueType::Unrecognized(PARSING_ERROR_TAG.to_string()),
                Severity::Critical,
                "Failed to parse assessment",
            )],
            feedback: String::new(),
            revision_instructions: vec!["Manual review required".to_string()],
            strengths: Vec::new(),
        }
    }
}
