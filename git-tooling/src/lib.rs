//! Git worktree management and diff utilities.
//!
//! Each in-flight issue gets an isolated working copy on its own branch so
//! parallel issues never contend on a checkout. The user's main checkout is
//! never touched; pre-merge verification runs in a disposable scratch
//! worktree that removes itself on drop.

mod diff;
mod merge;
mod worktrees;

pub use diff::DiffStat;
pub use merge::ScratchMerge;
pub use worktrees::{WorktreeInfo, Worktrees};

use std::path::PathBuf;

/// Errors from git invocations.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("branch already exists: {0}")]
    BranchExists(String),

    #[error("worktree path already exists: {0}")]
    PathExists(PathBuf),

    #[error("merge of {branch} onto {base} has conflicts")]
    MergeConflict { branch: String, base: String },

    #[error("git {args} failed: {stderr}")]
    CommandFailed { args: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) async fn run_git(
    dir: &std::path::Path,
    args: &[&str],
) -> Result<std::process::Output, GitError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .await?;
    Ok(output)
}

/// Run git and require exit 0; returns trimmed stdout.
pub(crate) async fn run_git_checked(
    dir: &std::path::Path,
    args: &[&str],
) -> Result<String, GitError> {
    let output = run_git(dir, args).await?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
