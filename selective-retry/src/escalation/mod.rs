//! Escalation: retry levels, the level policy and per-run generation state
//!
//! Pure state machine with no executor calls; every decision is
//! deterministic.
//!
//! # Escalation Ladder
//!
//! ```text
//! attempt 0: Full (nothing to reuse)
//!     │
//!     ├─ polish issues        → Narrow  (reuse plan + draft)
//!     ├─ content issues       → Medium  (reuse plan)
//!     ├─ structure / severe   → Full
//!     │
//!     ├─ Narrow repeated 2x   → Medium
//!     ├─ Medium repeated 2x   → Full
//!     └─ attempt ≥ threshold  → Full
//! ```

pub mod level;
pub mod policy;
pub mod state;

pub use level::RetryLevel;
pub use policy::{DecisionReason, PolicyConfig, PolicyDecision, RetryPolicy};
pub use state::{EscalationOutcome, EscalationThresholds, GenerationState};
