//! Integration tests for the retry policy, streak escalation and guard
//!
//! Drives the deterministic pieces the way the controller does, without any
//! executor: decide → escalate → prepare → reuse.

use selective_retry::{
    Artifact, ArtifactGuard, ArtifactSlot, Assessment, EscalationThresholds, GenerationState,
    Issue, IssueType, RecoveryFailure, RetryLevel, RetryPolicy, Severity, Stage,
};

fn verdict(issues: &[(IssueType, Severity)]) -> Assessment {
    Assessment::fail(
        issues
            .iter()
            .map(|(t, s)| Issue::new(t.clone(), *s, ""))
            .collect(),
    )
}

fn record_full(state: &mut GenerationState, attempt: u32) {
    state.prepare_for(RetryLevel::Full);
    state.record_stage_outputs(
        RetryLevel::Full,
        vec![
            Artifact::new(Stage::Plan, r#"{"scenes": ["arrival", "discovery"]}"#).with_attempt(attempt),
            Artifact::new(Stage::Draft, "The inspector arrived at dawn.").with_attempt(attempt),
            Artifact::new(Stage::Refine, "At dawn, the inspector arrived.").with_attempt(attempt),
        ],
    );
}

/// Every combination of polish-class issues at attempt 0 is Narrow
#[test]
fn test_polish_only_combinations_are_narrow() {
    let policy = RetryPolicy::new();
    let polish = [
        (IssueType::Prose, Severity::Low),
        (IssueType::Pacing, Severity::High),
        (IssueType::WordCount, Severity::Critical),
        (IssueType::Safety, Severity::Low),
        (IssueType::Safety, Severity::Medium),
    ];
    for mask in 1u32..(1 << polish.len()) {
        let subset: Vec<_> = polish
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, issue)| issue.clone())
            .collect();
        assert_eq!(
            policy.decide(&verdict(&subset), 0),
            RetryLevel::Narrow,
            "subset {:?}",
            subset
        );
    }
}

/// A structure issue forces Full whatever else is reported
#[test]
fn test_structure_priority_invariant() {
    let policy = RetryPolicy::new();
    let others = [
        IssueType::Prose,
        IssueType::Motivation,
        IssueType::Hook,
        IssueType::Safety,
        IssueType::Unrecognized("tone".into()),
    ];
    for other in others {
        for attempt in 0..3 {
            let a = verdict(&[(other.clone(), Severity::Low), (IssueType::Structure, Severity::Low)]);
            assert_eq!(policy.decide(&a, attempt), RetryLevel::Full);
        }
    }
}

/// Two Narrow decisions in a row make the next attempt Medium
#[test]
fn test_repeated_narrow_escalates() {
    let policy = RetryPolicy::new();
    let thresholds = EscalationThresholds::default();
    let mut state = GenerationState::new();
    let prose = verdict(&[(IssueType::Prose, Severity::Medium)]);

    let raw0 = policy.decide(&prose, 0);
    let next0 = state.apply_escalation(raw0, thresholds);
    assert_eq!(next0.level, RetryLevel::Narrow);
    assert_eq!(state.narrow_streak, 1);

    let raw1 = policy.decide(&prose, 1);
    assert_eq!(raw1, RetryLevel::Narrow, "policy alone still says Narrow");
    let next1 = state.apply_escalation(raw1, thresholds);
    assert_eq!(next1.level, RetryLevel::Medium);
    assert_eq!(next1.escalated_from, Some(RetryLevel::Narrow));
}

/// After a Full attempt, Narrow reuses plan and draft but never the refined text
#[test]
fn test_narrow_never_reuses_refined() {
    let mut state = GenerationState::new();
    record_full(&mut state, 0);
    assert!(state.has_all_artifacts());

    let reusable = state.to_reusable_inputs(RetryLevel::Narrow);
    assert!(reusable.contains_key(&ArtifactSlot::Plan));
    assert!(reusable.contains_key(&ArtifactSlot::Draft));
    assert!(!reusable.contains_key(&ArtifactSlot::Refined));
}

/// A corrupted plan makes a Medium attempt unusable
#[test]
fn test_corrupted_plan_blocks_medium_reuse() {
    let guard = ArtifactGuard::default();
    let mut state = GenerationState::new();
    record_full(&mut state, 0);

    if let Some(plan) = state.plan.as_mut() {
        plan.content = "{\"scenes\": [\"arrival\"".to_string();
        plan.digest = Artifact::compute_digest(&plan.content);
    }
    let err = guard.check_reusable(&state, RetryLevel::Medium).unwrap_err();
    assert!(matches!(err, RecoveryFailure::Shape { slot: ArtifactSlot::Plan, .. }));
}

/// Full wipes all artifacts before execution
#[test]
fn test_full_forwards_nothing() {
    let mut state = GenerationState::new();
    record_full(&mut state, 0);
    state.prepare_for(RetryLevel::Full);
    assert!(state.to_reusable_inputs(RetryLevel::Narrow).is_empty());
    assert_eq!(
        state.missing_for(RetryLevel::Narrow),
        vec![ArtifactSlot::Plan, ArtifactSlot::Draft]
    );
}
