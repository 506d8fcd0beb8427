//! Shared data model for the sprint runner.
//!
//! Every crate in the workspace speaks these types: the sprint plan and its
//! issues, quality and review results, persisted sprint state, the huddle
//! record posted after each issue, and the wire protocol spoken with the
//! coding-assistant child process.

pub mod config;
pub mod huddle;
pub mod issue;
pub mod labels;
pub mod quality;
pub mod role;
pub mod state;
pub mod wire;

pub use config::{FeatureFlags, PhaseConfig, SprintConfig};
pub use huddle::{HuddleEntry, PrStats, WorkerOutcome, ZeroChangeDiagnostic};
pub use issue::{IssueResult, IssueStatus, PlanError, SprintIssue, SprintPlan, SprintResult};
pub use quality::{CheckCategory, CodeReviewResult, QualityCheck, QualityResult};
pub use role::AgentRole;
pub use state::{STATE_VERSION, SprintPhase, SprintState};
