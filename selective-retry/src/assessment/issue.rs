//! Issue taxonomy reported by the Assess stage

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a quality issue.
///
/// Tags outside the known set are kept as `Unrecognized` so they never leak
/// into the policy as untyped strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IssueType {
    Prose,
    Pacing,
    WordCount,
    Motivation,
    Hook,
    ClueFairness,
    Continuity,
    Structure,
    Safety,
    /// Any tag the gate emitted that is not part of the taxonomy
    Unrecognized(String),
}

impl IssueType {
    pub fn parse_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "prose" => Self::Prose,
            "pacing" => Self::Pacing,
            "word_count" => Self::WordCount,
            "motivation" => Self::Motivation,
            "hook" => Self::Hook,
            "clue_fairness" => Self::ClueFairness,
            "continuity" => Self::Continuity,
            "structure" => Self::Structure,
            "safety" => Self::Safety,
            _ => Self::Unrecognized(tag.to_string()),
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Prose => "prose",
            Self::Pacing => "pacing",
            Self::WordCount => "word_count",
            Self::Motivation => "motivation",
            Self::Hook => "hook",
            Self::ClueFairness => "clue_fairness",
            Self::Continuity => "continuity",
            Self::Structure => "structure",
            Self::Safety => "safety",
            Self::Unrecognized(tag) => tag,
        }
    }

    /// Surface-level issues a polish pass can fix
    pub fn is_polish(&self) -> bool {
        matches!(self, Self::Prose | Self::Pacing | Self::WordCount)
    }

    /// Issues rooted in the draft's content rather than its surface
    pub fn is_content(&self) -> bool {
        matches!(
            self,
            Self::Motivation | Self::Hook | Self::ClueFairness | Self::Continuity
        )
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized(_))
    }
}

impl From<String> for IssueType {
    fn from(tag: String) -> Self {
        Self::parse_tag(&tag)
    }
}

impl From<IssueType> for String {
    fn from(issue_type: IssueType) -> Self {
        issue_type.tag().to_string()
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Severity attached to each issue occurrence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// High or critical
    pub fn is_severe(self) -> bool {
        self >= Self::High
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One issue reported by the quality gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: IssueType,
    pub severity: Severity,
    #[serde(default)]
    pub note: String,
    /// Scene or section reference, when the gate provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Issue {
    pub fn new(issue_type: IssueType, severity: Severity, note: impl Into<String>) -> Self {
        Self {
            issue_type,
            severity,
            note: note.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}
