//! Persisted sprint state.
//!
//! One JSON file per sprint, written after every phase transition so a crash
//! can resume without repeating work already reflected on the forge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::issue::{SprintPlan, SprintResult};

/// Current schema version for the state file. Loaders switch on this and
/// migrate forward; files are never rewritten in place without a version.
pub const STATE_VERSION: &str = "1";

/// Sprint lifecycle phase.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SprintPhase {
    Init,
    Refine,
    Plan,
    Execute,
    Review,
    Retro,
    Complete,
    Failed,
    Paused,
}

impl SprintPhase {
    /// Phases that end the sprint; nothing runs after them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// The ceremony that follows this one in a full cycle, if any.
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Refine),
            Self::Refine => Some(Self::Plan),
            Self::Plan => Some(Self::Execute),
            Self::Execute => Some(Self::Review),
            Self::Review => Some(Self::Retro),
            Self::Retro => Some(Self::Complete),
            Self::Complete | Self::Failed | Self::Paused => None,
        }
    }
}

impl std::fmt::Display for SprintPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Refine => "refine",
            Self::Plan => "plan",
            Self::Execute => "execute",
            Self::Review => "review",
            Self::Retro => "retro",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Persistent snapshot of a sprint in flight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SprintState {
    pub version: String,
    pub sprint_number: u32,
    pub phase: SprintPhase,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<SprintPlan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SprintResult>,
    /// Markdown review report, once the review ceremony has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review: Option<String>,
    /// Markdown retro report, once the retro ceremony has run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retro: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_elapsed_ms: Option<u64>,
    /// Where to resume when `phase == Paused`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_before_pause: Option<SprintPhase>,
}

impl SprintState {
    pub fn new(sprint_number: u32) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            sprint_number,
            phase: SprintPhase::Init,
            started_at: Utc::now(),
            plan: None,
            result: None,
            review: None,
            retro: None,
            final_elapsed_ms: None,
            phase_before_pause: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn phase_chain_ends_at_complete() {
        let mut phase = SprintPhase::Init;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            phase = next;
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                SprintPhase::Init,
                SprintPhase::Refine,
                SprintPhase::Plan,
                SprintPhase::Execute,
                SprintPhase::Review,
                SprintPhase::Retro,
                SprintPhase::Complete,
            ]
        );
        assert!(phase.is_terminal());
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = SprintState::new(3);
        state.phase = SprintPhase::Execute;
        state.phase_before_pause = Some(SprintPhase::Execute);

        let json = serde_json::to_string_pretty(&state).unwrap();
        let back: SprintState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert_eq!(back.version, STATE_VERSION);
    }
}
