//! `sprint` — autonomous sprint runner CLI.
//!
//! Ceremony commands (`refine`, `plan`, `execute-issue`, `review`, `retro`,
//! `full-cycle`) drive agent sessions against the configured forge;
//! `check-quality`, `metrics`, and `drift-report` are local. Invalid sprint
//! or issue numbers exit 1 with a usage message; quality failures exit 1.

mod context;
mod init_cmd;
mod local_cmd;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sprint_protocol::SprintPhase;

#[derive(Debug, Parser)]
#[command(name = "sprint", about = "Autonomous sprint runner", version)]
struct Cli {
    /// Project directory containing sprint.toml.
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the planning ceremony for a sprint.
    Plan {
        #[arg(long)]
        sprint: u32,
    },
    /// Execute a single issue through the full pipeline.
    ExecuteIssue {
        #[arg(long)]
        issue: u32,
        #[arg(long)]
        sprint: u32,
    },
    /// Run the quality gate against a branch.
    CheckQuality {
        #[arg(long)]
        branch: String,
        #[arg(long)]
        base: Option<String>,
    },
    /// Run the backlog refinement ceremony.
    Refine {
        #[arg(long)]
        sprint: u32,
    },
    /// Run refine → plan → execute → review → retro.
    FullCycle {
        #[arg(long)]
        sprint: u32,
    },
    /// Run the review ceremony.
    Review {
        #[arg(long)]
        sprint: u32,
    },
    /// Run the retrospective ceremony.
    Retro {
        #[arg(long)]
        sprint: u32,
    },
    /// Print sprint metrics from the persisted state.
    Metrics {
        #[arg(long)]
        sprint: u32,
    },
    /// Report files changed outside the planned set.
    DriftReport {
        #[arg(long)]
        sprint: u32,
        #[arg(long = "changed-files", num_args = 0..)]
        changed_files: Vec<String>,
        #[arg(long = "expected-files", num_args = 0..)]
        expected_files: Vec<String>,
    },
    /// Scaffold sprint.toml, prompts/, and docs/sprints/.
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
}

fn require_positive(name: &str, value: u32) -> Result<u32, ExitCode> {
    if value == 0 {
        eprintln!("invalid {name} number: {value}\nusage: sprint <command> --{name} <N> (N >= 1)");
        return Err(ExitCode::FAILURE);
    }
    Ok(value)
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let project = cli.project;
    match cli.command {
        Command::Init { path, force } => {
            let target = path.unwrap_or(project);
            init_cmd::run(&target, force)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::CheckQuality { branch, base } => {
            local_cmd::check_quality(&project, &branch, base.as_deref()).await
        }
        Command::Metrics { sprint } => {
            let sprint = match require_positive("sprint", sprint) {
                Ok(sprint) => sprint,
                Err(code) => return Ok(code),
            };
            local_cmd::metrics(&project, sprint)
        }
        Command::DriftReport {
            sprint,
            changed_files,
            expected_files,
        } => {
            let sprint = match require_positive("sprint", sprint) {
                Ok(sprint) => sprint,
                Err(code) => return Ok(code),
            };
            local_cmd::drift_report(&project, sprint, changed_files, expected_files)
        }
        Command::Plan { sprint } => ceremony(&project, sprint, SprintPhase::Plan).await,
        Command::Refine { sprint } => ceremony(&project, sprint, SprintPhase::Refine).await,
        Command::Review { sprint } => ceremony(&project, sprint, SprintPhase::Review).await,
        Command::Retro { sprint } => ceremony(&project, sprint, SprintPhase::Retro).await,
        Command::FullCycle { sprint } => {
            let sprint = match require_positive("sprint", sprint) {
                Ok(sprint) => sprint,
                Err(code) => return Ok(code),
            };
            let session = context::Session::start(&project).await?;
            let runner = session.runner(sprint)?;
            let state = runner.full_cycle().await?;
            session.shutdown().await;
            println!("sprint {sprint} finished in phase: {}", state.phase);
            Ok(if state.phase == SprintPhase::Complete {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::ExecuteIssue { issue, sprint } => {
            let sprint = match require_positive("sprint", sprint) {
                Ok(sprint) => sprint,
                Err(code) => return Ok(code),
            };
            let issue = match require_positive("issue", issue) {
                Ok(issue) => issue,
                Err(code) => return Ok(code),
            };
            let session = context::Session::start(&project).await?;
            let result = session.execute_issue(sprint, issue).await?;
            session.shutdown().await;
            println!(
                "issue #{}: {:?} (gate {})",
                result.issue_number,
                result.status,
                if result.quality_gate_passed { "passed" } else { "failed" }
            );
            Ok(
                if result.status == sprint_protocol::IssueStatus::Completed {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                },
            )
        }
    }
}

async fn ceremony(
    project: &std::path::Path,
    sprint: u32,
    phase: SprintPhase,
) -> anyhow::Result<ExitCode> {
    let sprint = match require_positive("sprint", sprint) {
        Ok(sprint) => sprint,
        Err(code) => return Ok(code),
    };
    let session = context::Session::start(project).await?;
    let runner = session.runner(sprint)?;
    let state = runner.run_single(phase).await?;
    session.shutdown().await;
    println!("{phase} ceremony finished; sprint {sprint} phase: {}", state.phase);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_numbers_are_rejected() {
        assert!(require_positive("sprint", 0).is_err());
        assert_eq!(require_positive("sprint", 3).unwrap(), 3);
        assert!(require_positive("issue", 0).is_err());
    }

    #[test]
    fn cli_parses_spec_surface() {
        Cli::try_parse_from(["sprint", "plan", "--sprint", "2"]).unwrap();
        Cli::try_parse_from(["sprint", "execute-issue", "--issue", "42", "--sprint", "1"])
            .unwrap();
        Cli::try_parse_from(["sprint", "check-quality", "--branch", "sprint/1/issue-2"])
            .unwrap();
        Cli::try_parse_from([
            "sprint",
            "drift-report",
            "--sprint",
            "1",
            "--changed-files",
            "a.rs",
            "b.rs",
            "--expected-files",
            "a.rs",
        ])
        .unwrap();
        Cli::try_parse_from(["sprint", "init", "--force"]).unwrap();
        assert!(Cli::try_parse_from(["sprint", "unknown"]).is_err());
    }
}
