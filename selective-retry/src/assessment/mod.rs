//! Assessment Module: quality-gate verdicts
//!
//! The Assess stage is the only producer of an [`Assessment`]. Issues use a
//! closed taxonomy; anything else is carried as [`IssueType::Unrecognized`].

pub mod issue;
pub mod report;

pub use issue::{Issue, IssueType, Severity};
pub use report::{Assessment, AssessmentParseError, PARSING_ERROR_TAG};
