//! Forge adapter: issues, labels, milestones, and pull requests.
//!
//! The sprint runner only ever talks to the [`ForgeApi`] trait; the GitHub
//! REST implementation lives in [`github`]. Errors are surfaced as
//! [`ForgeError`] and the caller decides severity — comment and label
//! failures are warn-and-continue, milestone discovery failures are setup
//! errors.

pub mod github;

pub use github::GithubForge;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sprint_protocol::PrStats;

#[derive(Debug, thiserror::Error)]
pub enum ForgeError {
    #[error("forge HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("forge API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed forge response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// An issue as the forge reports it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForgeIssue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
    pub state: String,
}

/// Filter for [`ForgeApi::list_issues`].
#[derive(Clone, Debug, Default)]
pub struct IssueFilter {
    pub milestone: Option<u64>,
    pub state: Option<String>,
    pub labels: Vec<String>,
}

/// Payload for [`ForgeApi::create_issue`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewIssue {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// A sprint milestone, parsed from a `<prefix> <N>` title.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintMilestone {
    pub sprint_number: u32,
    pub title: String,
    pub state: String,
    /// The forge's own milestone id, needed for issue filtering.
    pub milestone_number: u64,
}

/// Flags for merging an issue's pull request.
#[derive(Clone, Copy, Debug, Default)]
pub struct MergeOptions {
    pub squash: bool,
    pub delete_branch: bool,
}

/// Outcome of a merge attempt. A refused merge (conflict, checks) is not an
/// error — `success` is false and `reason` says why.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Operations the sprint runner needs from a code forge.
#[async_trait]
pub trait ForgeApi: Send + Sync {
    async fn get_issue(&self, number: u64) -> Result<ForgeIssue, ForgeError>;

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<ForgeIssue>, ForgeError>;

    async fn add_comment(&self, number: u64, body: &str) -> Result<(), ForgeError>;

    /// Replace any existing `status:` label with `label`.
    async fn set_label(&self, number: u64, label: &str) -> Result<(), ForgeError>;

    async fn create_issue(&self, new: &NewIssue) -> Result<ForgeIssue, ForgeError>;

    async fn list_sprint_milestones(
        &self,
        prefix: &str,
    ) -> Result<Vec<SprintMilestone>, ForgeError>;

    /// Lowest-numbered open sprint milestone, if any.
    async fn next_open_milestone(
        &self,
        prefix: &str,
    ) -> Result<Option<SprintMilestone>, ForgeError> {
        let mut open: Vec<SprintMilestone> = self
            .list_sprint_milestones(prefix)
            .await?
            .into_iter()
            .filter(|m| m.state == "open")
            .collect();
        open.sort_by_key(|m| m.sprint_number);
        Ok(open.into_iter().next())
    }

    /// Stats of the pull request whose head is `branch`, if one exists.
    async fn pr_stats(&self, branch: &str) -> Result<Option<PrStats>, ForgeError>;

    /// Merge the open pull request for `branch`.
    async fn merge_issue_pr(
        &self,
        branch: &str,
        options: &MergeOptions,
    ) -> Result<MergeOutcome, ForgeError>;
}

/// Parse a milestone title of the form `<prefix> <N>`.
pub(crate) fn parse_sprint_title(prefix: &str, title: &str) -> Option<u32> {
    let rest = title.strip_prefix(prefix)?.trim();
    rest.parse().ok()
}
