//! Huddle entries — the per-issue post-mortem appended to the sprint log
//! and posted as a forge comment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::issue::IssueStatus;
use crate::quality::{CodeReviewResult, QualityResult};

/// Pull-request statistics fetched from the forge after an issue finishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrStats {
    pub pr_number: u64,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
}

/// Classification of a zero-change run, derived from the worker's output.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerOutcome {
    /// The worker hit an error (error markers found in its output).
    WorkerError,
    /// The worker finished but decided no change was needed.
    TaskNotApplicable,
}

/// Diagnostic captured when the gate reports zero changed files.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZeroChangeDiagnostic {
    /// Tail of the worker session output (up to 50 lines).
    pub last_output_lines: Vec<String>,
    pub timed_out: bool,
    pub outcome: WorkerOutcome,
}

impl ZeroChangeDiagnostic {
    /// Classify worker output: error markers mean `WorkerError`, anything
    /// else is treated as the worker judging the task not applicable.
    pub fn classify(last_output_lines: Vec<String>, timed_out: bool) -> Self {
        let looks_like_error = last_output_lines.iter().any(|line| {
            let lower = line.to_lowercase();
            lower.contains("error:")
                || lower.contains("panic")
                || lower.contains("exception")
                || lower.contains("fatal")
        });
        let outcome = if timed_out || looks_like_error {
            WorkerOutcome::WorkerError
        } else {
            WorkerOutcome::TaskNotApplicable
        };
        Self {
            last_output_lines,
            timed_out,
            outcome,
        }
    }
}

/// Everything the sprint log records about one executed issue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HuddleEntry {
    pub issue_number: u32,
    pub issue_title: String,
    pub status: IssueStatus,
    pub quality: QualityResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_review: Option<CodeReviewResult>,
    pub duration_ms: u64,
    pub files_changed: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_warning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_stats: Option<PrStats>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero_change_diagnostic: Option<ZeroChangeDiagnostic>,
}
