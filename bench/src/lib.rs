//! Prompt-bench harness: score a role's prompt against canned examples.
//!
//! Each example is an input file with an `.expected.json` sidecar:
//!
//! ```json
//! {"verdict": true, "must_contain": ["tests"], "must_not_contain": ["panic"]}
//! ```
//!
//! For every example the harness opens a fresh agent session in the project
//! directory, sends the role's rendered prompt with the example bound to
//! `{{EXAMPLE}}`, parses the response into a verdict plus an issue list,
//! and compares against the expectation. `must_contain` is satisfied by any
//! match; `must_not_contain` requires all to be absent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sprint_core::agent_api::AgentSessions;
use sprint_core::prompt::TemplateStore;
use sprint_protocol::AgentRole;
use sprint_protocol::wire::SessionMode;

/// Accuracy below this percentage fails the bench run.
pub const ACCURACY_THRESHOLD: u32 = 70;

#[derive(Debug, thiserror::Error)]
pub enum BenchError {
    #[error("no examples found in {0}")]
    NoExamples(PathBuf),

    #[error("bad expected file {path}: {source}")]
    BadExpected {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("agent error: {0}")]
    Agent(#[from] sprint_agent_client::AgentClientError),

    #[error("prompt template error: {0}")]
    Prompt(#[from] sprint_core::prompt::PromptError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Expectation sidecar for one example.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Expected {
    pub verdict: bool,
    #[serde(default)]
    pub must_contain: Vec<String>,
    #[serde(default)]
    pub must_not_contain: Vec<String>,
}

/// Outcome of one example.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseOutcome {
    pub name: String,
    pub expected_verdict: bool,
    pub actual_verdict: bool,
    pub content_ok: bool,
    pub passed: bool,
    pub issues: Vec<String>,
}

/// Aggregate report persisted as `latest.json` and a timestamped copy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BenchReport {
    pub role: AgentRole,
    pub total: usize,
    pub correct: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub accuracy_pct: u32,
    pub generated_at: String,
    pub cases: Vec<CaseOutcome>,
}

impl BenchReport {
    pub fn passed(&self) -> bool {
        self.accuracy_pct >= ACCURACY_THRESHOLD
    }
}

/// Prompt template used to exercise a role.
pub fn role_template(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Planner => "planner",
        AgentRole::Developer => "worker",
        AgentRole::TestEngineer => "tdd",
        AgentRole::QualityReviewer => "code-review",
        AgentRole::Challenger => "challenger",
        AgentRole::Refiner => "refiner",
        AgentRole::Retro => "retro",
        AgentRole::General => "worker",
    }
}

/// Parse a response into (verdict, issues).
///
/// The verdict line wins when present (`VERDICT: pass|fail`); otherwise
/// approval keywords decide. Issues are the `- ` bullet lines.
pub fn parse_response(response: &str) -> (bool, Vec<String>) {
    let mut verdict = None;
    let mut issues = Vec::new();
    for line in response.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed
            .strip_prefix("VERDICT:")
            .or_else(|| trimmed.strip_prefix("Verdict:"))
        {
            let value = rest.trim().to_uppercase();
            verdict = Some(
                value.starts_with("PASS")
                    || value.starts_with("APPROVED")
                    || value.starts_with("TRUE"),
            );
        } else if let Some(item) = trimmed.strip_prefix("- ") {
            issues.push(item.to_string());
        }
    }

    let verdict = verdict.unwrap_or_else(|| {
        let upper = response.to_uppercase();
        upper.contains("APPROVED") && !upper.contains("NOT APPROVED")
    });
    (verdict, issues)
}

/// Discover `(input, expected)` pairs in a directory, sorted by name.
pub fn discover_cases(dir: &Path) -> Result<Vec<(PathBuf, Expected)>, BenchError> {
    let mut cases = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        if !path.is_file() || name.ends_with(".expected.json") {
            continue;
        }
        let stem = name
            .rsplit_once('.')
            .map(|(stem, _)| stem.to_string())
            .unwrap_or_else(|| name.to_string());
        let expected_path = dir.join(format!("{stem}.expected.json"));
        if !expected_path.exists() {
            continue;
        }
        let expected: Expected = serde_json::from_str(&std::fs::read_to_string(&expected_path)?)
            .map_err(|source| BenchError::BadExpected {
                path: expected_path,
                source,
            })?;
        cases.push((path, expected));
    }
    if cases.is_empty() {
        return Err(BenchError::NoExamples(dir.to_path_buf()));
    }
    cases.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(cases)
}

fn content_matches(response: &str, expected: &Expected) -> bool {
    let contain_ok = expected.must_contain.is_empty()
        || expected
            .must_contain
            .iter()
            .any(|needle| response.contains(needle));
    let absent_ok = expected
        .must_not_contain
        .iter()
        .all(|needle| !response.contains(needle));
    contain_ok && absent_ok
}

/// Run the bench for one role.
pub async fn run_bench(
    agent: &dyn AgentSessions,
    role: AgentRole,
    templates: &TemplateStore,
    examples_dir: &Path,
    project_dir: &Path,
    model: Option<&str>,
    timeout: Duration,
) -> Result<BenchReport, BenchError> {
    let cases = discover_cases(examples_dir)?;
    let template = role_template(role);

    let mut outcomes = Vec::new();
    for (input_path, expected) in cases {
        let name = input_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let example = std::fs::read_to_string(&input_path)?;
        let rendered = templates.render(template, &[("EXAMPLE", example.as_str())])?;

        let session = agent.open_session(role, project_dir, vec![], None).await?;
        let outcome = async {
            agent.set_mode(&session, SessionMode::Agent).await?;
            if let Some(model) = model {
                agent.set_model(&session, model).await?;
            }
            agent.prompt(&session, &rendered, timeout).await
        }
        .await;
        if let Err(err) = agent.close_session(&session).await {
            tracing::debug!("failed to close bench session: {err}");
        }
        let response = outcome?.response;

        let (actual_verdict, issues) = parse_response(&response);
        let content_ok = content_matches(&response, &expected);
        outcomes.push(CaseOutcome {
            name,
            expected_verdict: expected.verdict,
            actual_verdict,
            content_ok,
            passed: actual_verdict == expected.verdict && content_ok,
            issues,
        });
    }

    let total = outcomes.len();
    let correct = outcomes
        .iter()
        .filter(|o| o.actual_verdict == o.expected_verdict)
        .count();
    let false_positives = outcomes
        .iter()
        .filter(|o| o.actual_verdict && !o.expected_verdict)
        .count();
    let false_negatives = outcomes
        .iter()
        .filter(|o| !o.actual_verdict && o.expected_verdict)
        .count();

    Ok(BenchReport {
        role,
        total,
        correct,
        false_positives,
        false_negatives,
        accuracy_pct: sprint_core::metrics::percent(correct as u64, total as u64),
        generated_at: chrono::Utc::now().to_rfc3339(),
        cases: outcomes,
    })
}

/// Persist `latest.json` plus a timestamped copy; returns both paths.
pub fn persist_report(
    report: &BenchReport,
    out_dir: &Path,
) -> Result<(PathBuf, PathBuf), BenchError> {
    std::fs::create_dir_all(out_dir)?;
    let json = serde_json::to_string_pretty(report)
        .unwrap_or_else(|_| "{}".to_string());

    let latest = out_dir.join("latest.json");
    std::fs::write(&latest, &json)?;

    let stamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    let stamped = out_dir.join(format!("report-{stamp}.json"));
    std::fs::write(&stamped, &json)?;
    Ok((latest, stamped))
}
