//! Local commands: quality gate, metrics, drift report. No agent process.

use std::path::Path;
use std::process::ExitCode;

use sprint_core::config::ProjectConfig;
use sprint_core::metrics::{format_duration, percent};
use sprint_core::state_store::StateStore;
use sprint_git_tooling::Worktrees;
use sprint_protocol::IssueStatus;
use sprint_quality::run_quality_gate;

/// `check-quality --branch B [--base B]`: run the configured gate against a
/// branch in the main checkout. Exit 1 when the gate fails.
pub async fn check_quality(
    project: &Path,
    branch: &str,
    base: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let config = ProjectConfig::load(&project.join("sprint.toml"))?;
    let base = base.unwrap_or(&config.project.base_branch);
    let worktrees = Worktrees::new(project);

    let result = run_quality_gate(&config.quality, project, branch, base, &worktrees).await?;
    for check in &result.checks {
        let mark = if check.passed { "✓" } else { "✗" };
        if check.detail.is_empty() {
            println!("{mark} {}", check.name);
        } else {
            println!("{mark} {}: {}", check.name, check.detail);
        }
    }
    println!(
        "quality gate: {}",
        if result.passed { "passed" } else { "failed" }
    );
    Ok(if result.passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `metrics --sprint N`: summarise the persisted sprint state.
pub fn metrics(project: &Path, sprint: u32) -> anyhow::Result<ExitCode> {
    let config = ProjectConfig::load(&project.join("sprint.toml"))?;
    let store = StateStore::new(ProjectConfig::sprints_dir(project), config.slug());
    let Some(state) = store.load(sprint)? else {
        eprintln!("no persisted state for sprint {sprint}");
        return Ok(ExitCode::FAILURE);
    };

    println!("sprint {sprint}: phase {}", state.phase);
    if let Some(result) = &state.result {
        let total = result.issues.len();
        let done = result.completed_count();
        println!(
            "issues: {done}/{total} completed ({}%)",
            percent(done as u64, total as u64)
        );
        println!(
            "points completed: {}; merge conflicts: {}",
            result.completed_points(),
            result.merge_conflicts
        );
        println!(
            "parallelization ratio: {:.2}; avg worktree lifetime: {}",
            result.parallelization_ratio,
            format_duration(result.avg_worktree_lifetime_ms)
        );
    }
    if let Some(elapsed) = state.final_elapsed_ms {
        println!("cycle duration: {}", format_duration(elapsed));
    }
    Ok(ExitCode::SUCCESS)
}

/// `drift-report --sprint N [--changed-files…] [--expected-files…]`:
/// list changed files outside the expected set. Falls back to the
/// persisted sprint result and plan when lists are not supplied.
pub fn drift_report(
    project: &Path,
    sprint: u32,
    changed_files: Vec<String>,
    expected_files: Vec<String>,
) -> anyhow::Result<ExitCode> {
    let config = ProjectConfig::load(&project.join("sprint.toml"))?;
    let store = StateStore::new(ProjectConfig::sprints_dir(project), config.slug());
    let state = store.load(sprint)?;

    let changed = if changed_files.is_empty() {
        state
            .as_ref()
            .and_then(|s| s.result.as_ref())
            .map(|result| {
                result
                    .issues
                    .iter()
                    .filter(|i| i.status == IssueStatus::Completed)
                    .flat_map(|i| i.files_changed.clone())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        changed_files
    };
    let expected = if expected_files.is_empty() {
        state
            .as_ref()
            .and_then(|s| s.plan.as_ref())
            .map(|plan| {
                plan.issues
                    .iter()
                    .flat_map(|i| i.expected_files.clone())
                    .collect()
            })
            .unwrap_or_default()
    } else {
        expected_files
    };

    let drifted: Vec<&String> = changed
        .iter()
        .filter(|file| {
            !expected.iter().any(|entry| {
                let entry = entry.trim_end_matches('/');
                file.as_str() == entry || file.starts_with(&format!("{entry}/"))
            })
        })
        .collect();

    if drifted.is_empty() {
        println!("no drift: all {} changed file(s) were planned", changed.len());
    } else {
        println!("drift detected ({} of {} files):", drifted.len(), changed.len());
        for file in drifted {
            println!("  {file}");
        }
    }
    Ok(ExitCode::SUCCESS)
}
