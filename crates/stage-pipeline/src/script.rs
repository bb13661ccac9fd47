//! Scripted stage executor.
//!
//! Replays canned stage responses from a TOML scenario so runs can be driven
//! without a generative backend. A scenario holds one or more units:
//!
//! ```toml
//! [[unit]]
//! label = "chapter-1"
//!
//! [[unit.step]]
//! stage = "plan"
//! content = '{"scenes": ["arrival"]}'
//!
//! [[unit.step]]
//! stage = "assess"
//! attempt = 0
//! assessment = { passed = false, feedback = "flat", issues = [{ type = "prose", severity = "medium" }] }
//!
//! [[unit.step]]
//! stage = "assess"
//! assessment = { passed = true }
//! ```
//!
//! A step with `attempt` answers only that attempt. Steps without one are
//! consumed in order per stage, and the last of them repeats once the list
//! runs out.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use selective_retry::{Assessment, Stage};
use serde::{Deserialize, Serialize};

use crate::executor::{StageExecutor, StageOutput, StageRequest};

/// A whole scenario file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    #[serde(default, rename = "unit")]
    pub units: Vec<UnitScript>,
}

impl Script {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let script: Script = toml::from_str(raw).context("Failed to parse script TOML")?;
        if script.units.is_empty() {
            bail!("script declares no [[unit]] entries");
        }
        Ok(script)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_toml_str(&raw)
    }
}

/// Canned responses for one independent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitScript {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub initial_feedback: String,
    #[serde(default, rename = "step")]
    pub steps: Vec<ScriptedStep>,
}

/// One canned answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedStep {
    pub stage: Stage,
    /// Only answer this attempt index
    #[serde(default)]
    pub attempt: Option<u32>,
    #[serde(default)]
    pub content: Option<String>,
    /// Structured verdict for Assess
    #[serde(default)]
    pub assessment: Option<Assessment>,
    /// Fail the call with this message
    #[serde(default)]
    pub fault: Option<String>,
    /// Sleep before answering
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl ScriptedStep {
    pub fn text(stage: Stage, content: impl Into<String>) -> Self {
        Self {
            stage,
            attempt: None,
            content: Some(content.into()),
            assessment: None,
            fault: None,
            delay_ms: None,
        }
    }

    pub fn verdict(assessment: Assessment) -> Self {
        Self {
            assessment: Some(assessment),
            content: None,
            ..Self::text(Stage::Assess, "")
        }
    }

    pub fn failing(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            content: None,
            fault: Some(message.into()),
            ..Self::text(stage, "")
        }
    }

    pub fn on_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay_ms = Some(delay.as_millis() as u64);
        self
    }

    fn output(&self) -> StageOutput {
        match &self.assessment {
            Some(assessment) => StageOutput {
                content: self
                    .content
                    .clone()
                    .unwrap_or_else(|| serde_json::to_string(assessment).unwrap_or_default()),
                assessment: Some(assessment.clone()),
            },
            None => StageOutput::text(self.content.clone().unwrap_or_default()),
        }
    }
}

/// What the executor saw on one call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub stage: Stage,
    pub attempt: u32,
    pub request: StageRequest,
}

/// [`StageExecutor`] answering from a [`UnitScript`].
pub struct ScriptedExecutor {
    steps: Vec<ScriptedStep>,
    cursors: Mutex<HashMap<Stage, usize>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedExecutor {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps,
            cursors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_unit(unit: &UnitScript) -> Self {
        Self::new(unit.steps.clone())
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn calls_for(&self, stage: Stage) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| c.stage == stage).collect()
    }

    fn select(&self, stage: Stage, attempt: u32) -> Option<ScriptedStep> {
        if let Some(pinned) = self
            .steps
            .iter()
            .find(|s| s.stage == stage && s.attempt == Some(attempt))
        {
            return Some(pinned.clone());
        }

        let sequence: Vec<&ScriptedStep> = self
            .steps
            .iter()
            .filter(|s| s.stage == stage && s.attempt.is_none())
            .collect();
        let last = sequence.len().checked_sub(1)?;

        let mut cursors = self
            .cursors
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let cursor = cursors.entry(stage).or_insert(0);
        let step = sequence[(*cursor).min(last)].clone();
        *cursor += 1;
        Some(step)
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(&self, request: StageRequest) -> anyhow::Result<StageOutput> {
        let stage = request.stage;
        let attempt = request.attempt;
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(RecordedCall {
                stage,
                attempt,
                request,
            });

        let Some(step) = self.select(stage, attempt) else {
            bail!("no scripted response for {} on attempt {}", stage, attempt);
        };

        if let Some(ms) = step.delay_ms {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        if let Some(message) = &step.fault {
            bail!("{}", message);
        }
        Ok(step.output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use selective_retry::{IssueType, StageInputs};

    fn request(stage: Stage, attempt: u32) -> StageRequest {
        StageRequest {
            run_id: "t".into(),
            stage,
            attempt,
            inputs: StageInputs::new(),
            feedback: String::new(),
            assessment: None,
        }
    }

    #[test]
    fn parses_scenario_file() {
        let script = Script::from_toml_str(
            r#"
            [[unit]]
            label = "chapter-1"

            [[unit.step]]
            stage = "plan"
            content = '{"scenes": []}'

            [[unit.step]]
            stage = "assess"
            attempt = 0
            assessment = { passed = false, issues = [{ type = "hook", severity = "high" }] }

            [[unit.step]]
            stage = "refine"
            fault = "model overloaded"
            delay_ms = 10
            "#,
        )
        .unwrap();

        let unit = &script.units[0];
        assert_eq!(unit.label, "chapter-1");
        assert_eq!(unit.steps.len(), 3);
        let verdict = unit.steps[1].assessment.as_ref().unwrap();
        assert!(verdict.has_issue(&IssueType::Hook));
        assert_eq!(unit.steps[2].fault.as_deref(), Some("model overloaded"));
    }

    #[test]
    fn empty_script_rejected() {
        assert!(Script::from_toml_str("").is_err());
    }

    #[tokio::test]
    async fn sequence_repeats_last_and_pins_win() {
        let exec = ScriptedExecutor::new(vec![
            ScriptedStep::text(Stage::Draft, "first"),
            ScriptedStep::text(Stage::Draft, "second"),
            ScriptedStep::text(Stage::Draft, "pinned").on_attempt(5),
        ]);

        let mut seen = Vec::new();
        for attempt in [0, 1, 2, 5] {
            let out = exec.execute(request(Stage::Draft, attempt)).await.unwrap();
            seen.push(out.content);
        }
        assert_eq!(seen, vec!["first", "second", "second", "pinned"]);
        assert_eq!(exec.calls_for(Stage::Draft).len(), 4);
    }

    #[tokio::test]
    async fn unscripted_stage_and_faults_error() {
        let exec = ScriptedExecutor::new(vec![ScriptedStep::failing(Stage::Plan, "boom")]);
        let err = exec.execute(request(Stage::Plan, 0)).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        let err = exec.execute(request(Stage::Draft, 0)).await.unwrap_err();
        assert!(err.to_string().contains("no scripted response for Draft"));
    }

    #[tokio::test]
    async fn verdict_serialized_as_content() {
        let exec = ScriptedExecutor::new(vec![ScriptedStep::verdict(Assessment::pass())]);
        let out = exec.execute(request(Stage::Assess, 0)).await.unwrap();
        assert_eq!(out.assessment, Some(Assessment::pass()));
        assert_eq!(Assessment::from_raw(&out.content), Assessment::pass());
    }
}
