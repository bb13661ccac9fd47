//! Stage executor seam.
//!
//! The controller never knows how a stage is carried out. It hands a
//! [`StageRequest`] to a [`StageExecutor`] and gets back the stage's raw
//! content (plus, for Assess, an optional already-parsed verdict).

use async_trait::async_trait;
use selective_retry::{Assessment, Stage, StageInputs};

/// One stage invocation.
#[derive(Debug, Clone)]
pub struct StageRequest {
    /// Run this call belongs to
    pub run_id: String,
    pub stage: Stage,
    /// 0-based attempt index
    pub attempt: u32,
    /// Upstream artifacts under their declared input keys
    pub inputs: StageInputs,
    /// Feedback from the previous failing Assessment; empty on the first attempt
    pub feedback: String,
    /// Final Assessment, set only for Record
    pub assessment: Option<Assessment>,
}

/// What a stage returned.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutput {
    pub content: String,
    /// Assess may return a parsed verdict; otherwise the controller parses
    /// `content`.
    pub assessment: Option<Assessment>,
}

impl StageOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            assessment: None,
        }
    }

    pub fn assessed(assessment: Assessment) -> Self {
        let content = serde_json::to_string(&assessment).unwrap_or_default();
        Self {
            content,
            assessment: Some(assessment),
        }
    }
}

/// Carries out individual stages.
///
/// Implementations must be safe to share between concurrent runs; the
/// controller holds no lock around a call.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, request: StageRequest) -> anyhow::Result<StageOutput>;
}
