//! Pre-merge verification: conflict probing and scratch merges.

use std::path::{Path, PathBuf};

use crate::{GitError, Worktrees, run_git, run_git_checked};

impl Worktrees {
    /// Whether merging `branch` into `base` would conflict.
    ///
    /// Uses `git merge-tree --write-tree`, which merges in memory and never
    /// touches any checkout. Exit 0 means clean, 1 means conflicts.
    pub async fn has_conflicts(&self, branch: &str, base: &str) -> Result<bool, GitError> {
        let output = run_git(
            self.repo_root(),
            &["merge-tree", "--write-tree", base, branch],
        )
        .await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(GitError::CommandFailed {
                args: format!("merge-tree --write-tree {base} {branch}"),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }

    /// Materialise `base` with `branch` merged in, inside a disposable
    /// scratch worktree, so quality commands can spot-check the combined
    /// tree before the real PR merge. The scratch tree removes itself on
    /// drop; the main checkout is never involved.
    pub async fn scratch_merge(
        &self,
        branch: &str,
        base: &str,
    ) -> Result<ScratchMerge, GitError> {
        let tempdir = tempfile::TempDir::new()?;
        let merge_path = tempdir.path().join("merge");
        let merge_path_str = merge_path.display().to_string();

        run_git_checked(
            self.repo_root(),
            &["worktree", "add", "--detach", &merge_path_str, base],
        )
        .await?;

        let scratch = ScratchMerge {
            repo_root: self.repo_root().to_path_buf(),
            path: merge_path.clone(),
            _tempdir: tempdir,
        };

        let message = format!("scratch merge of {branch}");
        let output = run_git(
            &merge_path,
            &["merge", "--no-ff", "-m", &message, branch],
        )
        .await?;
        if !output.status.success() {
            // Scratch drop cleans up the half-merged tree.
            return Err(GitError::MergeConflict {
                branch: branch.to_string(),
                base: base.to_string(),
            });
        }

        Ok(scratch)
    }
}

/// A temporary worktree holding a completed merge. Removed on drop.
#[derive(Debug)]
pub struct ScratchMerge {
    repo_root: PathBuf,
    path: PathBuf,
    _tempdir: tempfile::TempDir,
}

impl ScratchMerge {
    /// Root of the merged tree; run verification commands here.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchMerge {
    fn drop(&mut self) {
        let _ = std::process::Command::new("git")
            .args(["worktree", "remove", "--force"])
            .arg(&self.path)
            .current_dir(&self.repo_root)
            .output();
        let _ = std::process::Command::new("git")
            .args(["worktree", "prune"])
            .current_dir(&self.repo_root)
            .output();
    }
}
