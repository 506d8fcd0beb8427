//! `sprint-bench` — score role prompts against canned examples.
//!
//! Exits non-zero when accuracy falls below the 70% threshold, so CI can
//! gate prompt changes.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sprint_agent_client::{AgentClient, AgentClientConfig};
use sprint_bench::{persist_report, run_bench};
use sprint_core::ProjectConfig;
use sprint_core::prompt::TemplateStore;
use sprint_events::EventBus;
use sprint_protocol::AgentRole;

#[derive(Debug, Parser)]
#[command(name = "sprint-bench", about = "Score role prompts against canned examples")]
struct Cli {
    /// Role to bench (planner, developer, quality_reviewer, ...).
    #[arg(long)]
    role: String,

    /// Directory of example inputs with .expected.json sidecars.
    #[arg(long)]
    examples: PathBuf,

    /// Project directory holding sprint.toml and prompts/.
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Where reports are written.
    #[arg(long, default_value = "bench-reports")]
    out: PathBuf,

    /// Model override for the bench sessions.
    #[arg(long)]
    model: Option<String>,

    /// Per-prompt timeout in seconds.
    #[arg(long, default_value_t = 300)]
    timeout_secs: u64,
}

fn parse_role(raw: &str) -> Option<AgentRole> {
    AgentRole::all().into_iter().find(|r| r.as_str() == raw)
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
    let Some(role) = parse_role(&cli.role) else {
        eprintln!("unknown role: {} (expected one of planner, developer, test_engineer, quality_reviewer, challenger, refiner, retro, general)", cli.role);
        return ExitCode::FAILURE;
    };

    match run(cli, role).await {
        Ok(passed) => {
            if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(err) => {
            eprintln!("bench failed: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, role: AgentRole) -> anyhow::Result<bool> {
    let project = ProjectConfig::load(&cli.project.join("sprint.toml"))?;
    let templates = TemplateStore::new(project.prompts_dir(&cli.project));

    let bus = EventBus::new();
    let mut agent_config = AgentClientConfig::new(project.agent.program.clone());
    agent_config.args.clone_from(&project.agent.args);
    agent_config.permissions = project.agent.permission_policy();
    let client = Arc::new(AgentClient::new(agent_config, bus));
    client.connect().await?;

    let report = run_bench(
        client.as_ref(),
        role,
        &templates,
        &cli.examples,
        &cli.project,
        cli.model.as_deref(),
        Duration::from_secs(cli.timeout_secs),
    )
    .await?;

    let (latest, stamped) = persist_report(&report, &cli.out)?;
    println!(
        "{role}: {}/{} correct ({}%), {} false positive(s), {} false negative(s)",
        report.correct,
        report.total,
        report.accuracy_pct,
        report.false_positives,
        report.false_negatives
    );
    println!("reports: {} and {}", latest.display(), stamped.display());

    client.disconnect().await?;
    Ok(report.passed())
}
