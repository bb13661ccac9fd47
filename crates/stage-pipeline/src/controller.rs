//! Pipeline Controller: drives one run through its attempt loop.
//!
//! Each attempt executes the stage subset of its retry level. A failing
//! Assessment picks the next level through the policy and the streak
//! overrides; a stage fault forces Full; the recovery guard may downgrade a
//! single attempt to Full before it executes. The run ends PASSED, EXHAUSTED
//! or ABORTED and always reports `passed` and `attempts`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use selective_retry::{
    Artifact, ArtifactGuard, ArtifactSlot, Assessment, EscalationThresholds, GenerationState,
    RetryLevel, RetryPolicy, Stage, StageInputs,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::errors::{StageFault, TerminalError};
use crate::executor::{StageExecutor, StageOutput, StageRequest};
use crate::lifecycle::{IllegalTransition, RunLifecycle, RunPhase};
use crate::outcome::{AttemptRecord, BestArtifacts, RunOutcome, RunStatus};

/// Input for one run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Used as the run id when non-empty
    pub label: String,
    /// Feedback handed to the first attempt
    pub initial_feedback: String,
}

impl RunRequest {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            initial_feedback: String::new(),
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.initial_feedback = feedback.into();
        self
    }
}

/// Per-run context shared with nothing else.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Arc<str>,
    /// Checked between attempts
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(run_id: impl Into<Arc<str>>, cancel: CancellationToken) -> Self {
        Self {
            run_id: run_id.into(),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Result of executing one stage subset.
struct SubsetRun {
    stages_run: Vec<Stage>,
    produced: Vec<Artifact>,
    assessment: Option<Assessment>,
    fault: Option<StageFault>,
}

/// Drives runs. Holds configuration only, so one controller serves any
/// number of concurrent runs.
#[derive(Debug, Clone)]
pub struct PipelineController {
    config: PipelineConfig,
    policy: RetryPolicy,
    thresholds: EscalationThresholds,
    guard: ArtifactGuard,
}

impl PipelineController {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            policy: config.policy(),
            thresholds: config.thresholds(),
            guard: config.guard(),
            config,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PipelineConfig::default())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run to completion with a fresh cancellation token.
    pub async fn run(&self, executor: &dyn StageExecutor, request: RunRequest) -> RunOutcome {
        self.run_with_cancel(executor, request, CancellationToken::new())
            .await
    }

    /// Run to completion, aborting between attempts once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        executor: &dyn StageExecutor,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let run_id = if request.label.trim().is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            request.label.clone()
        };
        let ctx = RunContext::new(run_id.as_str(), cancel);

        info!(
            run_id = %ctx.run_id,
            max_retries = self.config.max_retries,
            "pipeline run starting"
        );

        let mut state = GenerationState::new();
        let mut best = BestArtifacts::default();
        let mut lifecycle = RunLifecycle::new();
        let mut history: Vec<AttemptRecord> = Vec::new();
        let mut feedback = request.initial_feedback;
        let mut last_assessment: Option<Assessment> = None;
        let mut level = RetryLevel::Full;

        let (status, terminal) = loop {
            if ctx.is_cancelled() {
                info!(run_id = %ctx.run_id, attempt = state.attempt, "run cancelled");
                transition(&mut lifecycle, RunPhase::Aborted, "cancellation requested");
                break (
                    RunStatus::Aborted,
                    Some(TerminalError::Cancelled {
                        attempts: state.attempt,
                    }),
                );
            }

            let attempt = state.attempt;
            let started = Instant::now();
            lifecycle.set_attempt(attempt);

            // Guard: a level that reuses anything must have trustworthy inputs
            let (executed_level, reusable, guard_failure) =
                match self.guard.check_reusable(&state, level) {
                    Ok(reusable) => (level, reusable, None),
                    Err(failure) => {
                        warn!(
                            run_id = %ctx.run_id,
                            attempt,
                            planned = %level,
                            slot = %failure.slot(),
                            error = %failure,
                            "preserved artifact rejected, running full"
                        );
                        (RetryLevel::Full, BTreeMap::new(), Some(failure.to_string()))
                    }
                };

            expect_legal(lifecycle.begin_attempt(executed_level));
            info!(
                run_id = %ctx.run_id,
                attempt,
                level = %executed_level,
                stages = ?executed_level.required_stages(),
                reused = reusable.len(),
                "attempt starting"
            );

            state.prepare_for(executed_level);
            let subset = self
                .execute_subset(executor, &ctx, executed_level, &reusable, &feedback, attempt)
                .await;

            let mut record = AttemptRecord {
                attempt,
                planned_level: level,
                executed_level,
                forced_by_guard: guard_failure.is_some(),
                guard_failure,
                stages_run: subset.stages_run,
                passed: None,
                issue_types: Vec::new(),
                fault: None,
                decision: None,
                next_level: None,
                escalated_from: None,
                duration_ms: 0,
                timestamp: Utc::now(),
            };

            let mut attempt_fault = None;
            let next_level = match (subset.fault, subset.assessment) {
                (None, Some(assessment)) => {
                    state.record_stage_outputs(executed_level, subset.produced);
                    best = BestArtifacts::capture(&state);
                    record.passed = Some(assessment.passed);
                    record.issue_types = assessment.issue_types();

                    if assessment.passed {
                        record.duration_ms = started.elapsed().as_millis() as u64;
                        history.push(record);
                        last_assessment = Some(assessment);
                        info!(run_id = %ctx.run_id, attempt, "quality gate passed");
                        transition(&mut lifecycle, RunPhase::Passed, "quality gate passed");
                        state.advance_attempt();
                        break (RunStatus::Passed, None);
                    }

                    let decision = self.policy.decide_with_reason(&assessment, attempt);
                    let escalation = state.apply_escalation(decision.level, self.thresholds);
                    if let Some(from) = escalation.escalated_from {
                        warn!(
                            run_id = %ctx.run_id,
                            attempt,
                            from = %from,
                            to = %escalation.level,
                            "repeated level escalated"
                        );
                    }
                    info!(
                        run_id = %ctx.run_id,
                        attempt,
                        issues = ?record.issue_types,
                        reason = %decision.reason,
                        next = %escalation.level,
                        "quality gate failed"
                    );

                    feedback = assessment.feedback_text();
                    last_assessment = Some(assessment);
                    record.decision = Some(decision);
                    record.escalated_from = escalation.escalated_from;
                    escalation.level
                }
                (fault, _) => {
                    let fault = fault.unwrap_or_else(|| {
                        StageFault::executor(
                            Stage::Assess,
                            &anyhow::anyhow!("subset finished without an assessment"),
                        )
                    });
                    warn!(
                        run_id = %ctx.run_id,
                        attempt,
                        stage = %fault.stage(),
                        category = %fault.retry_category(),
                        error = %fault,
                        "stage fault, next attempt runs full"
                    );
                    record.fault = Some(fault.to_string());
                    attempt_fault = Some(fault);
                    state.note_fault()
                }
            };

            record.next_level = Some(next_level);
            record.duration_ms = started.elapsed().as_millis() as u64;
            history.push(record);

            let attempts = state.advance_attempt();
            if attempts > self.config.max_retries {
                warn!(
                    run_id = %ctx.run_id,
                    attempts,
                    faulted = attempt_fault.is_some(),
                    "attempt budget exhausted"
                );
                transition(&mut lifecycle, RunPhase::Exhausted, "attempt budget exhausted");
                break (
                    RunStatus::Exhausted,
                    Some(TerminalError::Exhausted {
                        attempts,
                        fault: attempt_fault,
                    }),
                );
            }

            level = next_level;
        };

        let record = match (status, &last_assessment) {
            (RunStatus::Aborted, _) => None,
            (_, Some(assessment))
                if self.config.record_on_completion && best.is_complete() =>
            {
                let attempt = state.attempt.saturating_sub(1);
                self.run_record(executor, &ctx, &best, attempt, assessment)
                    .await
            }
            _ => None,
        };

        let outcome = RunOutcome {
            run_id,
            status,
            passed: status == RunStatus::Passed,
            attempts: state.attempt,
            state,
            best,
            assessment: last_assessment,
            record,
            history,
            transitions: lifecycle.into_transitions(),
            terminal,
        };

        info!(
            run_id = %outcome.run_id,
            status = %outcome.status,
            attempts = outcome.attempts,
            levels = ?outcome.level_history(),
            "pipeline run finished"
        );
        outcome
    }

    /// Execute the stages of `level` in order, stopping at the first fault.
    async fn execute_subset(
        &self,
        executor: &dyn StageExecutor,
        ctx: &RunContext,
        level: RetryLevel,
        reusable: &BTreeMap<ArtifactSlot, Artifact>,
        feedback: &str,
        attempt: u32,
    ) -> SubsetRun {
        let mut run = SubsetRun {
            stages_run: Vec::new(),
            produced: Vec::new(),
            assessment: None,
            fault: None,
        };

        for &stage in level.required_stages() {
            let inputs = build_inputs(stage, &run.produced, reusable);
            if let Err(e) = inputs.validate_for(stage, false) {
                run.fault = Some(e.into());
                return run;
            }

            let request = StageRequest {
                run_id: ctx.run_id.to_string(),
                stage,
                attempt,
                inputs,
                feedback: feedback.to_string(),
                assessment: None,
            };
            let output = match self.call_stage(executor, request).await {
                Ok(output) => output,
                Err(fault) => {
                    run.fault = Some(fault);
                    return run;
                }
            };
            run.stages_run.push(stage);

            if stage == Stage::Assess {
                let assessment = output
                    .assessment
                    .unwrap_or_else(|| Assessment::from_raw(&output.content));
                run.assessment = Some(assessment);
            } else {
                run.produced
                    .push(Artifact::new(stage, output.content).with_attempt(attempt));
            }
        }

        run
    }

    /// One executor call bounded by the stage timeout.
    async fn call_stage(
        &self,
        executor: &dyn StageExecutor,
        request: StageRequest,
    ) -> Result<StageOutput, StageFault> {
        let stage = request.stage;
        let timeout = self.config.stage_timeout();
        debug!(
            run_id = %request.run_id,
            attempt = request.attempt,
            stage = %stage,
            inputs = ?request.inputs.keys().collect::<Vec<_>>(),
            "calling stage"
        );

        match tokio::time::timeout(timeout, executor.execute(request)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(StageFault::executor(stage, &e)),
            Err(_) => Err(StageFault::Timeout {
                stage,
                after: timeout,
            }),
        }
    }

    /// Invoke Record once with the best-known artifacts and the final
    /// Assessment.
    async fn run_record(
        &self,
        executor: &dyn StageExecutor,
        ctx: &RunContext,
        best: &BestArtifacts,
        attempt: u32,
        assessment: &Assessment,
    ) -> Option<Artifact> {
        let mut inputs = StageInputs::new();
        for slot in ArtifactSlot::ALL {
            if let Some(artifact) = best.artifact(slot) {
                inputs.insert(slot.input_key(), artifact.clone());
            }
        }
        if let Err(e) = inputs.validate_for(Stage::Record, true) {
            warn!(run_id = %ctx.run_id, error = %e, "record skipped");
            return None;
        }

        let request = StageRequest {
            run_id: ctx.run_id.to_string(),
            stage: Stage::Record,
            attempt,
            inputs,
            feedback: assessment.feedback_text(),
            assessment: Some(assessment.clone()),
        };

        match self.call_stage(executor, request).await {
            Ok(output) => Some(Artifact::new(Stage::Record, output.content).with_attempt(attempt)),
            Err(fault) => {
                warn!(run_id = %ctx.run_id, error = %fault, "record stage failed");
                None
            }
        }
    }
}

impl Default for PipelineController {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Inputs for `stage`: artifacts produced earlier in this attempt under their
/// primary keys, preserved artifacts under their override keys.
fn build_inputs(
    stage: Stage,
    produced: &[Artifact],
    reusable: &BTreeMap<ArtifactSlot, Artifact>,
) -> StageInputs {
    let mut inputs = StageInputs::new();
    for slot in ArtifactSlot::ALL {
        if slot.producer() >= stage {
            continue;
        }
        if let Some(fresh) = produced.iter().find(|a| a.stage == slot.producer()) {
            inputs.insert(slot.input_key(), fresh.clone());
        } else if let (Some(key), Some(kept)) = (slot.override_key(), reusable.get(&slot)) {
            inputs.insert(key, kept.clone());
        }
    }
    inputs
}

/// The loop only takes edges of the run graph; an error here is a bug.
fn expect_legal(result: Result<(), IllegalTransition>) {
    debug_assert!(result.is_ok(), "run lifecycle violation: {:?}", result);
}

fn transition(lifecycle: &mut RunLifecycle, to: RunPhase, reason: &str) {
    expect_legal(lifecycle.advance(to, Some(reason)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockStageExecutor;
    use selective_retry::{InputKey, Issue, IssueType, Severity};

    fn fail_with(issue_type: IssueType, severity: Severity) -> Assessment {
        Assessment::fail(vec![Issue::new(issue_type, severity, "")]).with_feedback("tighten it")
    }

    fn respond(request: &StageRequest, verdict: &Assessment) -> anyhow::Result<StageOutput> {
        Ok(match request.stage {
            Stage::Plan => StageOutput::text(r#"{"scenes": ["a", "b"]}"#),
            Stage::Draft => StageOutput::text(format!("draft {}", request.attempt)),
            Stage::Refine => StageOutput::text(format!("refined {}", request.attempt)),
            Stage::Assess => StageOutput::assessed(verdict.clone()),
            Stage::Record => StageOutput::text("recorded"),
        })
    }

    #[test]
    fn build_inputs_prefers_fresh_output() {
        let plan = Artifact::new(Stage::Plan, "{}");
        let draft = Artifact::new(Stage::Draft, "kept draft");
        let mut reusable = BTreeMap::new();
        reusable.insert(ArtifactSlot::Plan, plan.clone());
        reusable.insert(ArtifactSlot::Draft, draft.clone());

        let refine = build_inputs(Stage::Refine, &[], &reusable);
        assert_eq!(refine.get(InputKey::PlanArtifactOverride), Some(&plan));
        assert_eq!(refine.get(InputKey::DraftArtifactOverride), Some(&draft));
        assert!(refine.validate_for(Stage::Refine, false).is_ok());

        let fresh_refined = Artifact::new(Stage::Refine, "new");
        let assess = build_inputs(Stage::Assess, &[fresh_refined.clone()], &reusable);
        assert_eq!(assess.get(InputKey::RefinedArtifact), Some(&fresh_refined));
        assert!(assess.validate_for(Stage::Assess, false).is_ok());

        assert!(build_inputs(Stage::Plan, &[], &reusable).is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "run lifecycle violation")]
    fn illegal_lifecycle_edge_asserts() {
        let mut lifecycle = RunLifecycle::new();
        transition(&mut lifecycle, RunPhase::Passed, "gate passed without an attempt");
    }

    #[tokio::test]
    async fn passes_first_time_runs_full_then_record() {
        let mut mock = MockStageExecutor::new();
        mock.expect_execute()
            .times(5)
            .returning(|req| respond(&req, &Assessment::pass()));

        let outcome = PipelineController::with_defaults()
            .run(&mock, RunRequest::new("first-pass"))
            .await;

        assert!(outcome.passed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.level_history(), vec![RetryLevel::Full]);
        assert_eq!(outcome.refined().map(|a| a.content.as_str()), Some("refined 0"));
        assert_eq!(outcome.record.map(|a| a.content), Some("recorded".to_string()));
        assert_eq!(outcome.run_id, "first-pass");
    }

    #[tokio::test]
    async fn narrow_retry_skips_plan_and_draft() {
        let mut mock = MockStageExecutor::new();
        // attempt 0: full subset, prose failure
        mock.expect_execute()
            .withf(|req| req.attempt == 0)
            .times(4)
            .returning(|req| respond(&req, &fail_with(IssueType::Prose, Severity::Medium)));
        // attempt 1: only Refine and Assess, with overrides and feedback
        mock.expect_execute()
            .withf(|req| {
                req.attempt == 1
                    && matches!(req.stage, Stage::Refine | Stage::Assess)
                    && req.feedback == "tighten it"
            })
            .times(2)
            .returning(|req| respond(&req, &Assessment::pass()));
        mock.expect_execute()
            .withf(|req| req.stage == Stage::Record)
            .times(1)
            .returning(|req| respond(&req, &Assessment::pass()));

        let outcome = PipelineController::with_defaults()
            .run(&mock, RunRequest::default())
            .await;

        assert!(outcome.passed);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.level_history(),
            vec![RetryLevel::Full, RetryLevel::Narrow]
        );
        assert_eq!(outcome.state.draft.as_ref().map(|a| a.attempt), Some(0));
        assert_eq!(outcome.refined().map(|a| a.attempt), Some(1));
        assert!(uuid::Uuid::parse_str(&outcome.run_id).is_ok());
    }

    #[tokio::test]
    async fn executor_error_is_a_fault() {
        let mut mock = MockStageExecutor::new();
        mock.expect_execute()
            .returning(|_| Err(anyhow::anyhow!("backend unavailable")));

        let config = PipelineConfig {
            max_retries: 1,
            ..Default::default()
        };
        let outcome = PipelineController::new(config)
            .run(&mock, RunRequest::new("down"))
            .await;

        assert_eq!(outcome.status, RunStatus::Exhausted);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.record.is_none());
        assert!(outcome.history.iter().all(|r| r.stages_run.is_empty()));
        let fault = outcome.terminal.as_ref().and_then(|t| t.fault()).unwrap();
        assert_eq!(fault.stage(), Stage::Plan);
    }

    #[tokio::test]
    async fn cancelled_before_start_never_calls_executor() {
        let mut mock = MockStageExecutor::new();
        mock.expect_execute().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = PipelineController::with_defaults()
            .run_with_cancel(&mock, RunRequest::new("early"), cancel)
            .await;

        assert_eq!(outcome.status, RunStatus::Aborted);
        assert_eq!(outcome.attempts, 0);
        assert!(matches!(
            outcome.terminal,
            Some(TerminalError::Cancelled { attempts: 0 })
        ));
        assert_eq!(outcome.transitions.len(), 1);
    }
}
