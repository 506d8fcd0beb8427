//! The append-only sprint log and huddle rendering.

use std::io;
use std::path::Path;

use sprint_protocol::{HuddleEntry, IssueStatus};

use crate::metrics::format_duration;

/// Render a huddle entry as the markdown block used for both the issue
/// comment and the sprint log.
pub fn render_huddle(entry: &HuddleEntry) -> String {
    let mut out = String::new();
    let status = match entry.status {
        IssueStatus::Completed => "completed",
        IssueStatus::Failed => "failed",
        IssueStatus::InProgress => "in-progress",
    };

    out.push_str(&format!(
        "## Huddle — #{} {}\n\n",
        entry.issue_number, entry.issue_title
    ));
    out.push_str(&format!(
        "- **Status:** {status}\n- **Duration:** {}\n- **Retries:** {}\n",
        format_duration(entry.duration_ms),
        entry.retry_count
    ));
    out.push_str(&format!(
        "- **Quality gate:** {}\n",
        if entry.quality.passed { "passed" } else { "failed" }
    ));
    for check in &entry.quality.checks {
        let mark = if check.passed { "✓" } else { "✗" };
        if check.detail.is_empty() {
            out.push_str(&format!("  - {mark} {}\n", check.name));
        } else {
            out.push_str(&format!("  - {mark} {}: {}\n", check.name, check.detail));
        }
    }

    if let Some(review) = &entry.code_review {
        out.push_str(&format!(
            "- **Code review:** {}\n",
            if review.approved { "approved" } else { "changes requested" }
        ));
        for concern in &review.issues {
            out.push_str(&format!("  - {concern}\n"));
        }
    }

    if entry.files_changed.is_empty() {
        out.push_str("- **Files changed:** none\n");
    } else {
        out.push_str(&format!(
            "- **Files changed:** {}\n",
            entry.files_changed.join(", ")
        ));
    }

    if let Some(stats) = &entry.pr_stats {
        out.push_str(&format!(
            "- **PR #{}:** +{} −{} across {} files\n",
            stats.pr_number, stats.additions, stats.deletions, stats.changed_files
        ));
    }

    if let Some(warning) = &entry.cleanup_warning {
        out.push_str(&format!("- **Cleanup warning:** {warning}\n"));
    }
    if let Some(error) = &entry.error_message {
        out.push_str(&format!("- **Error:** {error}\n"));
    }

    if let Some(diag) = &entry.zero_change_diagnostic {
        out.push_str(&format!(
            "- **Zero-change diagnostic:** outcome={:?}, timed_out={}\n",
            diag.outcome, diag.timed_out
        ));
        if !diag.last_output_lines.is_empty() {
            out.push_str("  ```\n");
            for line in &diag.last_output_lines {
                out.push_str(&format!("  {line}\n"));
            }
            out.push_str("  ```\n");
        }
    }

    out.push_str(&format!(
        "\n_{}_\n",
        entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out
}

/// Append one entry to the sprint log; entries are separated by blank lines.
pub fn append_entry(path: &Path, markdown: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut contents = match std::fs::read_to_string(path) {
        Ok(existing) => existing,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err),
    };
    if !contents.is_empty() && !contents.ends_with("\n\n") {
        contents.push('\n');
    }
    contents.push_str(markdown.trim_end());
    contents.push('\n');
    std::fs::write(path, contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sprint_protocol::{CheckCategory, QualityCheck, QualityResult};

    fn entry(number: u32, passed: bool) -> HuddleEntry {
        HuddleEntry {
            issue_number: number,
            issue_title: "feat: X".into(),
            status: if passed {
                IssueStatus::Completed
            } else {
                IssueStatus::Failed
            },
            quality: QualityResult::from_checks(vec![if passed {
                QualityCheck::pass("tests", CheckCategory::Test)
            } else {
                QualityCheck::fail("tests", CheckCategory::Test, "2 failed")
            }]),
            code_review: None,
            duration_ms: 61_000,
            files_changed: vec!["src/x.rs".into()],
            timestamp: Utc::now(),
            cleanup_warning: None,
            error_message: None,
            pr_stats: None,
            retry_count: 0,
            zero_change_diagnostic: None,
        }
    }

    #[test]
    fn render_includes_status_checks_and_duration() {
        let markdown = render_huddle(&entry(42, false));
        assert!(markdown.contains("## Huddle — #42 feat: X"));
        assert!(markdown.contains("**Status:** failed"));
        assert!(markdown.contains("✗ tests: 2 failed"));
        assert!(markdown.contains("**Duration:** 1m 1s"));
    }

    #[test]
    fn append_separates_entries_with_blank_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("docs/sprints/demo-1-log.md");

        append_entry(&path, &render_huddle(&entry(1, true))).unwrap();
        append_entry(&path, &render_huddle(&entry(2, true))).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("## Huddle").count(), 2);
        let first_end = contents.find("## Huddle — #2").unwrap();
        assert!(contents[..first_end].ends_with("\n\n") || contents[..first_end].ends_with('\n'));
    }
}
