//! Agent roles.
//!
//! Roles are abstract responsibilities; the phase configuration maps them to
//! concrete models and tool servers. Mirrors the prompt template set on disk.

use serde::{Deserialize, Serialize};

/// Role tag attached to every agent session the runner opens.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Produces the per-issue implementation plan (plan mode).
    Planner,
    /// Writes the change; the long-lived session per issue.
    Developer,
    /// Writes failing tests ahead of the developer (TDD flag).
    TestEngineer,
    /// Scores acceptance criteria after the gate passes.
    QualityReviewer,
    /// Adversarial, advisory-only review.
    Challenger,
    /// Backlog refinement ceremony.
    Refiner,
    /// Retrospective ceremony.
    Retro,
    /// Ad-hoc operator sessions (chat viewer).
    General,
}

impl AgentRole {
    /// All roles, in pipeline order.
    pub fn all() -> [Self; 8] {
        [
            Self::Planner,
            Self::Developer,
            Self::TestEngineer,
            Self::QualityReviewer,
            Self::Challenger,
            Self::Refiner,
            Self::Retro,
            Self::General,
        ]
    }

    /// Stable lowercase name, used for phase-config keys and template lookup.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Developer => "developer",
            Self::TestEngineer => "test_engineer",
            Self::QualityReviewer => "quality_reviewer",
            Self::Challenger => "challenger",
            Self::Refiner => "refiner",
            Self::Retro => "retro",
            Self::General => "general",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
