//! The quality gate.
//!
//! Runs the configured check commands against an issue's working copy and
//! synthesizes diff-derived checks (`diff-size`, `scope_drift`,
//! `files-changed`). Every enabled check always runs — there is no early
//! exit — so the report posted back to the issue is complete. The aggregate
//! `passed` flag is the conjunction of all checks.

use std::path::Path;

use sprint_git_tooling::{GitError, Worktrees};
use sprint_protocol::config::QualityGateConfig;
use sprint_protocol::{CheckCategory, QualityCheck, QualityResult};

/// How much command output to keep in a failing check's detail.
const DETAIL_TAIL_LINES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum QualityError {
    #[error("git error while diffing: {0}")]
    Git(#[from] GitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the gate for one branch.
///
/// `worktree` is the working copy the check commands run in; the diff checks
/// compare `branch` against `base` in the main repository.
pub async fn run_quality_gate(
    config: &QualityGateConfig,
    worktree: &Path,
    branch: &str,
    base: &str,
    worktrees: &Worktrees,
) -> Result<QualityResult, QualityError> {
    let mut checks = Vec::new();

    let commands: [(&str, bool, &Option<String>, CheckCategory); 4] = [
        ("tests", config.require_tests, &config.test_command, CheckCategory::Test),
        ("lint", config.require_lint, &config.lint_command, CheckCategory::Lint),
        ("types", config.require_types, &config.typecheck_command, CheckCategory::Types),
        ("build", config.require_build, &config.build_command, CheckCategory::Build),
    ];

    for (name, required, command, category) in commands {
        if !required {
            continue;
        }
        match command {
            Some(command) => checks.push(run_check(name, category, command, worktree).await),
            None => checks.push(QualityCheck::fail(
                name,
                category,
                "check required but no command configured",
            )),
        }
    }

    let stat = worktrees.diff_stat(branch, base).await?;

    if stat.lines_changed > config.max_diff_lines {
        checks.push(QualityCheck::fail(
            "diff-size",
            CheckCategory::Diff,
            format!(
                "{} lines changed exceeds cap of {}",
                stat.lines_changed, config.max_diff_lines
            ),
        ));
    } else {
        checks.push(QualityCheck::pass("diff-size", CheckCategory::Diff));
    }

    if let Some(expected) = &config.expected_files {
        let drifted: Vec<&String> = stat
            .files
            .iter()
            .filter(|file| !within_expected(file, expected))
            .collect();
        if drifted.is_empty() {
            checks.push(QualityCheck::pass("scope_drift", CheckCategory::Diff));
        } else {
            let list = drifted
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            checks.push(QualityCheck::fail(
                "scope_drift",
                CheckCategory::Diff,
                format!("files changed outside the expected set: {list}"),
            ));
        }
    }

    if stat.files_changed == 0 {
        checks.push(QualityCheck::fail(
            "files-changed",
            CheckCategory::Diff,
            "no files changed on the branch",
        ));
    } else {
        checks.push(QualityCheck::pass("files-changed", CheckCategory::Diff));
    }

    Ok(QualityResult::from_checks(checks))
}

/// A changed path is in scope if it matches an expected file exactly or
/// lives under an expected directory. Glob syntax is not interpreted.
fn within_expected(file: &str, expected: &[String]) -> bool {
    expected.iter().any(|entry| {
        let entry = entry.trim_end_matches('/');
        file == entry || file.starts_with(&format!("{entry}/"))
    })
}

/// Run one configured command; exit 0 is a pass.
async fn run_check(
    name: &str,
    category: CheckCategory,
    command: &str,
    worktree: &Path,
) -> QualityCheck {
    let Some(argv) = shlex::split(command).filter(|argv| !argv.is_empty()) else {
        return QualityCheck::fail(name, category, format!("unparseable command: {command}"));
    };

    let output = tokio::process::Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(worktree)
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => QualityCheck::pass(name, category),
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            let tail: Vec<&str> = combined
                .lines()
                .rev()
                .take(DETAIL_TAIL_LINES)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            let code = output.status.code().unwrap_or(-1);
            QualityCheck::fail(
                name,
                category,
                format!("exit {code}: {}", tail.join("\n")),
            )
        }
        Err(err) => {
            tracing::warn!(name, "check command failed to start: {err}");
            QualityCheck::fail(name, category, format!("failed to start: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn git(dir: &Path, args: &[&str]) {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {args:?}: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    /// Repo on `main` plus a worktree on `branch` with one committed change.
    fn fixture(change_file: Option<&str>) -> (tempfile::TempDir, Worktrees, PathBuf) {
        let repo = tempfile::TempDir::new().unwrap();
        git(repo.path(), &["init", "-b", "main"]);
        git(repo.path(), &["config", "user.email", "gate@example.com"]);
        git(repo.path(), &["config", "user.name", "Gate"]);
        std::fs::write(repo.path().join("README.md"), "# fixture\n").unwrap();
        git(repo.path(), &["add", "."]);
        git(repo.path(), &["commit", "-m", "initial"]);

        let wt = repo.path().join("wt");
        let wt_str = wt.display().to_string();
        git(
            repo.path(),
            &["worktree", "add", "-b", "branch", &wt_str, "main"],
        );
        if let Some(name) = change_file {
            let full = wt.join(name);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(&full, "changed\n").unwrap();
            git(&wt, &["add", "."]);
            git(&wt, &["commit", "-m", "change"]);
        }

        let worktrees = Worktrees::new(repo.path());
        (repo, worktrees, wt)
    }

    fn base_config() -> QualityGateConfig {
        QualityGateConfig {
            require_tests: true,
            require_lint: true,
            require_types: false,
            require_build: false,
            test_command: Some("true".to_string()),
            lint_command: Some("true".to_string()),
            typecheck_command: None,
            build_command: None,
            max_diff_lines: 100,
            expected_files: None,
        }
    }

    #[tokio::test]
    async fn all_green_gate_passes() {
        let (_repo, worktrees, wt) = fixture(Some("src/x.rs"));
        let result = run_quality_gate(&base_config(), &wt, "branch", "main", &worktrees)
            .await
            .unwrap();
        assert!(result.passed);
        assert_eq!(result.passed, result.checks.iter().all(|c| c.passed));
        let names: Vec<&str> = result.checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["tests", "lint", "diff-size", "files-changed"]);
    }

    #[tokio::test]
    async fn failing_command_does_not_stop_other_checks() {
        let (_repo, worktrees, wt) = fixture(Some("src/x.rs"));
        let mut config = base_config();
        config.test_command = Some("false".to_string());

        let result = run_quality_gate(&config, &wt, "branch", "main", &worktrees)
            .await
            .unwrap();
        assert!(!result.passed);
        // The full report is still produced.
        assert_eq!(result.checks.len(), 4);
        let tests = result.checks.iter().find(|c| c.name == "tests").unwrap();
        assert!(!tests.passed);
        assert!(tests.detail.starts_with("exit 1"));
        let lint = result.checks.iter().find(|c| c.name == "lint").unwrap();
        assert!(lint.passed);
    }

    #[tokio::test]
    async fn required_check_without_command_fails() {
        let (_repo, worktrees, wt) = fixture(Some("src/x.rs"));
        let mut config = base_config();
        config.test_command = None;

        let result = run_quality_gate(&config, &wt, "branch", "main", &worktrees)
            .await
            .unwrap();
        let tests = result.checks.iter().find(|c| c.name == "tests").unwrap();
        assert!(!tests.passed);
        assert!(tests.detail.contains("no command configured"));
    }

    #[tokio::test]
    async fn oversized_diff_fails_diff_size() {
        let (_repo, worktrees, wt) = fixture(Some("src/x.rs"));
        let mut config = base_config();
        config.max_diff_lines = 0;

        let result = run_quality_gate(&config, &wt, "branch", "main", &worktrees)
            .await
            .unwrap();
        assert!(!result.passed);
        let diff = result.checks.iter().find(|c| c.name == "diff-size").unwrap();
        assert!(!diff.passed);
        assert_eq!(diff.category, CheckCategory::Diff);
    }

    #[tokio::test]
    async fn scope_drift_flags_unexpected_files() {
        let (_repo, worktrees, wt) = fixture(Some("scripts/oops.sh"));
        let mut config = base_config();
        config.expected_files = Some(vec!["src/".to_string()]);

        let result = run_quality_gate(&config, &wt, "branch", "main", &worktrees)
            .await
            .unwrap();
        let drift = result.checks.iter().find(|c| c.name == "scope_drift").unwrap();
        assert!(!drift.passed);
        assert!(drift.detail.contains("scripts/oops.sh"));
    }

    #[tokio::test]
    async fn expected_directory_covers_nested_files() {
        let (_repo, worktrees, wt) = fixture(Some("src/deep/mod.rs"));
        let mut config = base_config();
        config.expected_files = Some(vec!["src".to_string()]);

        let result = run_quality_gate(&config, &wt, "branch", "main", &worktrees)
            .await
            .unwrap();
        let drift = result.checks.iter().find(|c| c.name == "scope_drift").unwrap();
        assert!(drift.passed);
    }

    #[tokio::test]
    async fn empty_diff_fails_files_changed() {
        let (_repo, worktrees, wt) = fixture(None);
        let result = run_quality_gate(&base_config(), &wt, "branch", "main", &worktrees)
            .await
            .unwrap();
        assert!(!result.passed);
        let fc = result
            .checks
            .iter()
            .find(|c| c.name == "files-changed")
            .unwrap();
        assert!(!fc.passed);
    }
}
