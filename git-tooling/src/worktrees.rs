//! Worktree creation, removal, and enumeration.

use std::path::{Path, PathBuf};

use crate::{GitError, run_git, run_git_checked};

/// One active worktree, as reported by `git worktree list`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: Option<String>,
}

/// Worktree manager rooted at the main repository.
#[derive(Clone, Debug)]
pub struct Worktrees {
    repo_root: PathBuf,
}

impl Worktrees {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub async fn branch_exists(&self, branch: &str) -> bool {
        let refname = format!("refs/heads/{branch}");
        run_git(&self.repo_root, &["rev-parse", "--verify", "--quiet", &refname])
            .await
            .is_ok_and(|output| output.status.success())
    }

    /// Create an isolated working copy at `path` on a new `branch` cut from
    /// `base`. Fails if the branch or the path already exists.
    pub async fn create(&self, path: &Path, branch: &str, base: &str) -> Result<(), GitError> {
        if self.branch_exists(branch).await {
            return Err(GitError::BranchExists(branch.to_string()));
        }
        if path.exists() {
            return Err(GitError::PathExists(path.to_path_buf()));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.display().to_string();
        run_git_checked(
            &self.repo_root,
            &["worktree", "add", "-b", branch, &path_str, base],
        )
        .await?;
        tracing::debug!(branch, path = %path.display(), "created worktree");
        Ok(())
    }

    /// Delete the working copy; the branch is kept. Removal of an absent
    /// worktree is not an error — callers treat failures as warnings anyway.
    pub async fn remove(&self, path: &Path) -> Result<(), GitError> {
        if !path.exists() {
            return Ok(());
        }
        let path_str = path.display().to_string();
        run_git_checked(
            &self.repo_root,
            &["worktree", "remove", "--force", &path_str],
        )
        .await?;
        Ok(())
    }

    /// Enumerate active worktrees (the main checkout included).
    pub async fn list(&self) -> Result<Vec<WorktreeInfo>, GitError> {
        let stdout =
            run_git_checked(&self.repo_root, &["worktree", "list", "--porcelain"]).await?;

        let mut infos = Vec::new();
        let mut current_path: Option<PathBuf> = None;
        let mut current_branch: Option<String> = None;
        for line in stdout.lines().chain(std::iter::once("")) {
            if let Some(path) = line.strip_prefix("worktree ") {
                current_path = Some(PathBuf::from(path));
            } else if let Some(branch) = line.strip_prefix("branch ") {
                current_branch = Some(
                    branch
                        .strip_prefix("refs/heads/")
                        .unwrap_or(branch)
                        .to_string(),
                );
            } else if line.is_empty()
                && let Some(path) = current_path.take()
            {
                infos.push(WorktreeInfo {
                    path,
                    branch: current_branch.take(),
                });
            }
        }
        Ok(infos)
    }
}
