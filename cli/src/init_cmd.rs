//! `init` — scaffold a project: sprint.toml, prompts/, docs/sprints/.

use std::path::Path;

const DEFAULT_CONFIG: &str = r#"[project]
name = "My Project"
repo_owner = "owner"
repo_name = "repo"
prefix = "sprint"
base_branch = "main"
milestone_prefix = "Sprint"

[run]
max_parallel_sessions = 2
max_issues_per_sprint = 8
max_retries = 2
session_timeout_ms = 600000

[flags]
challenger = false
tdd = false
auto_merge = false
squash_merge = true
delete_branch_on_merge = true

[quality]
require_tests = true
require_lint = true
require_types = false
test_command = "cargo test"
lint_command = "cargo clippy -- -D warnings"
max_diff_lines = 1500

[agent]
program = "claude"
auto_approve = false
allowed_tools = []
"#;

const TEMPLATES: &[(&str, &str)] = &[
    (
        "planner",
        "You are planning issue #{{ISSUE_NUMBER}} ({{ISSUE_TITLE}}) for \
         {{PROJECT_NAME}} on branch {{BRANCH_NAME}}.\n\nIssue body:\n\n{{ISSUE_BODY}}\n\n\
         Survey the code under {{WORKTREE_PATH}} and produce a JSON plan:\n\
         {\"summary\": \"...\", \"steps\": [{\"file\": \"path\", \"action\": \"...\"}]}\n\
         Keep the change under {{MAX_DIFF_LINES}} lines.\n",
    ),
    (
        "tdd",
        "Write failing tests for issue #{{ISSUE_NUMBER}} before any implementation.\n\n\
         Implementation plan:\n\n{{IMPLEMENTATION_PLAN}}\n\nCommit the tests.\n",
    ),
    (
        "worker",
        "Implement issue #{{ISSUE_NUMBER}} ({{ISSUE_TITLE}}) on branch \
         {{BRANCH_NAME}}.\n\nIssue body:\n\n{{ISSUE_BODY}}\n\nWork inside \
         {{WORKTREE_PATH}}, commit as you go, and stay under {{MAX_DIFF_LINES}} \
         changed lines.\n",
    ),
    (
        "code-review",
        "Review the diff for issue #{{ISSUE_NUMBER}} against {{BASE_BRANCH}}.\n\n\
         ```diff\n{{DIFF}}\n```\n\nRespond with JSON: {\"approved\": bool, \
         \"feedback\": \"...\", \"issues\": [\"blocking concern\", ...]}\n",
    ),
    (
        "acceptance-review",
        "Score each acceptance criterion for issue #{{ISSUE_NUMBER}}.\n\n\
         Criteria:\n\n{{ACCEPTANCE_CRITERIA}}\n\nDiff:\n\n```diff\n{{DIFF}}\n```\n\n\
         Respond with JSON: {\"approved\": bool, \"feedback\": \"...\", \
         \"issues\": [\"unmet criterion\", ...]}\n",
    ),
    (
        "challenger",
        "Adversarially review the diff for issue #{{ISSUE_NUMBER}}. Surface \
         risks and weaknesses; you cannot block the change.\n\n```diff\n{{DIFF}}\n```\n",
    ),
    (
        "refiner",
        "Refine backlog idea #{{ISSUE_NUMBER}} ({{ISSUE_TITLE}}).\n\n\
         {{ISSUE_BODY}}\n\nRewrite it with clear scope, acceptance criteria, \
         and an ICE score.\n",
    ),
    (
        "sprint-planner",
        "Plan sprint {{SPRINT_NUMBER}} for {{PROJECT_NAME}}. Pick at most \
         {{MAX_ISSUES}} issues from the backlog and order them by dependency.\n\n\
         Backlog:\n\n{{BACKLOG}}\n\nRespond with JSON: {\"issues\": \
         [{\"number\": N, \"title\": \"...\", \"depends_on\": [], \
         \"acceptance_criteria\": \"...\", \"expected_files\": [], \
         \"story_points\": N, \"ice_score\": N}], \"rationale\": \"...\", \
         \"estimated_points\": N}\n",
    ),
    (
        "review",
        "Write the sprint {{SPRINT_NUMBER}} review for {{PROJECT_NAME}} as \
         markdown.\n\nResults:\n\n{{SPRINT_RESULTS}}\n",
    ),
    (
        "retro",
        "Write the sprint {{SPRINT_NUMBER}} retrospective for {{PROJECT_NAME}} \
         as markdown: what went well, what did not, what to change.\n\n\
         Results:\n\n{{SPRINT_RESULTS}}\n",
    ),
];

/// Create the scaffold. Existing files are kept unless `force` is set.
pub fn run(target: &Path, force: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(target)?;

    let config_path = target.join("sprint.toml");
    if !config_path.exists() || force {
        std::fs::write(&config_path, DEFAULT_CONFIG)?;
        println!("wrote {}", config_path.display());
    } else {
        println!("kept existing {}", config_path.display());
    }

    let prompts = target.join("prompts");
    std::fs::create_dir_all(&prompts)?;
    for (name, contents) in TEMPLATES {
        let path = prompts.join(format!("{name}.md"));
        if !path.exists() || force {
            std::fs::write(&path, contents)?;
            println!("wrote {}", path.display());
        }
    }

    std::fs::create_dir_all(target.join("docs").join("sprints"))?;
    println!("initialised sprint project at {}", target.display());
    Ok(())
}
