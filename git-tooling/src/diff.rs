//! Diff utilities over branches.
//!
//! All comparisons use the three-dot form (`base...branch`) so only the
//! branch's own changes count, not drift on the base branch.

use serde::{Deserialize, Serialize};

use crate::{GitError, Worktrees, run_git_checked};

/// Summary of a branch diff against its base.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStat {
    pub lines_changed: u64,
    pub files_changed: u64,
    pub files: Vec<String>,
}

impl Worktrees {
    /// Aggregate numstat for `branch` relative to `base`.
    pub async fn diff_stat(&self, branch: &str, base: &str) -> Result<DiffStat, GitError> {
        let range = format!("{base}...{branch}");
        let stdout =
            run_git_checked(self.repo_root(), &["diff", "--numstat", &range]).await?;

        let mut stat = DiffStat::default();
        for line in stdout.lines() {
            let mut parts = line.split_whitespace();
            let added = parts.next().unwrap_or("0");
            let deleted = parts.next().unwrap_or("0");
            let Some(path) = parts.next() else { continue };
            // Binary files report "-"; count them as files without lines.
            stat.lines_changed +=
                added.parse::<u64>().unwrap_or(0) + deleted.parse::<u64>().unwrap_or(0);
            stat.files_changed += 1;
            stat.files.push(path.to_string());
        }
        Ok(stat)
    }

    /// Full unified diff of `branch` against `base`, for review prompts.
    pub async fn diff_text(&self, branch: &str, base: &str) -> Result<String, GitError> {
        let range = format!("{base}...{branch}");
        run_git_checked(self.repo_root(), &["diff", &range]).await
    }

    /// Paths changed on `branch` since it diverged from `base`.
    pub async fn changed_files(
        &self,
        branch: &str,
        base: &str,
    ) -> Result<Vec<String>, GitError> {
        let range = format!("{base}...{branch}");
        let stdout =
            run_git_checked(self.repo_root(), &["diff", "--name-only", &range]).await?;
        Ok(stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Whether `path` was added or modified on `branch` relative to `base`.
    pub async fn is_new_or_modified(
        &self,
        path: &str,
        branch: &str,
        base: &str,
    ) -> Result<bool, GitError> {
        Ok(self
            .changed_files(branch, base)
            .await?
            .iter()
            .any(|changed| changed == path))
    }
}
