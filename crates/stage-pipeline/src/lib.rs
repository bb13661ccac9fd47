//! Stage Pipeline Runner
//!
//! Async controller that runs the Plan → Draft → Refine → Assess pipeline
//! against a pluggable [`StageExecutor`], retrying only the stages a failing
//! Assessment invalidates. Policy, escalation and artifact bookkeeping come
//! from the `selective-retry` crate; this crate adds the attempt loop,
//! timeouts, cancellation, configuration and the run audit trail.
//!
//! # Usage
//!
//! ```rust,no_run
//! use stage_pipeline::{PipelineController, RunRequest, ScriptedExecutor};
//!
//! # async fn demo(executor: ScriptedExecutor) {
//! let controller = PipelineController::with_defaults();
//! let outcome = controller.run(&executor, RunRequest::new("chapter-1")).await;
//! println!("{}", outcome.summary());
//! # }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod controller;
pub mod errors;
pub mod executor;
pub mod lifecycle;
pub mod outcome;
pub mod script;

pub use config::{ConfigError, PipelineConfig};
pub use controller::{PipelineController, RunContext, RunRequest};
pub use errors::{RetryCategory, StageFault, TerminalError};
pub use executor::{StageExecutor, StageOutput, StageRequest};
pub use lifecycle::{IllegalTransition, RunLifecycle, RunPhase, TransitionRecord};
pub use outcome::{AttemptRecord, BestArtifacts, RunOutcome, RunReport, RunStatus};
pub use script::{RecordedCall, Script, ScriptedExecutor, ScriptedStep, UnitScript};
