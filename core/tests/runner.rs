//! Full-cycle runner tests: ceremonies, persistence, pause/resume.

mod common;

use std::sync::Arc;

use common::{
    RecordingEscalation, RecordingForge, Scripted, ScriptedAgent, init_repo, with_cwd,
    write_and_commit, write_templates,
};
use pretty_assertions::assert_eq;
use sprint_agent_client::SessionControl;
use sprint_core::ProjectConfig;
use sprint_core::config::{AgentSection, ProjectSection, RunSection};
use sprint_core::runner::{RunnerDeps, SprintRunner};
use sprint_events::EventBus;
use sprint_forge::{ForgeIssue, SprintMilestone};
use sprint_protocol::config::QualityGateConfig;
use sprint_protocol::{AgentRole, FeatureFlags, IssueStatus, SprintPhase};

const SPRINT_PLAN_JSON: &str = r#"```json
{
  "issues": [
    {"number": 42, "title": "feat: X", "story_points": 3, "acceptance_criteria": ""}
  ],
  "rationale": "ship X",
  "estimated_points": 3
}
```"#;

fn project_config() -> ProjectConfig {
    ProjectConfig {
        project: ProjectSection {
            name: "Demo".into(),
            repo_owner: "acme".into(),
            repo_name: "demo".into(),
            slug: Some("demo".into()),
            prefix: "sprint".into(),
            base_branch: "main".into(),
            worktree_root: ".sprint/worktrees".into(),
            prompts_dir: "prompts".into(),
            milestone_prefix: "Sprint".into(),
        },
        run: RunSection::default(),
        flags: FeatureFlags::default(),
        quality: QualityGateConfig {
            require_tests: true,
            require_lint: false,
            require_types: false,
            require_build: false,
            test_command: Some("true".into()),
            lint_command: None,
            typecheck_command: None,
            build_command: None,
            max_diff_lines: 500,
            expected_files: None,
        },
        agent: AgentSection::default(),
        phases: Default::default(),
    }
}

struct Rig {
    project: tempfile::TempDir,
    agent: Arc<ScriptedAgent>,
    forge: Arc<RecordingForge>,
    bus: EventBus,
}

impl Rig {
    fn new() -> Self {
        let project = tempfile::TempDir::new().unwrap();
        init_repo(project.path());
        write_templates(&project.path().join("prompts"));

        let forge = RecordingForge::new();
        forge.add_milestone(SprintMilestone {
            sprint_number: 1,
            title: "Sprint 1".into(),
            state: "open".into(),
            milestone_number: 7,
        });
        forge.add_issue(
            ForgeIssue {
                number: 42,
                title: "feat: X".into(),
                body: "Build the x module".into(),
                labels: vec![],
                state: "open".into(),
            },
            Some(7),
        );

        Self {
            project,
            agent: ScriptedAgent::new(),
            forge,
            bus: EventBus::new(),
        }
    }

    fn deps(&self) -> RunnerDeps {
        RunnerDeps {
            project_path: self.project.path().to_path_buf(),
            project: project_config(),
            agent: self.agent.clone(),
            forge: self.forge.clone(),
            bus: self.bus.clone(),
            control: SessionControl::new(),
            escalation: RecordingEscalation::new(),
        }
    }

    /// Script the sessions a one-issue happy-path cycle opens.
    fn script_happy_cycle(&self) {
        // Planner queue: sprint plan first, then the per-issue plan.
        self.agent
            .script(AgentRole::Planner, Scripted::Text(SPRINT_PLAN_JSON.into()));
        self.agent.script(
            AgentRole::Planner,
            Scripted::Text(r#"{"summary": "add x", "steps": [{"file": "src_x.rs"}]}"#.into()),
        );
        self.agent.script(
            AgentRole::Developer,
            with_cwd(|cwd| {
                write_and_commit(cwd, "src_x.rs", "pub fn x() {}\n");
                "implemented".to_string()
            }),
        );
        // Reviewer queue: per-issue code review, then the review ceremony.
        self.agent.script(
            AgentRole::QualityReviewer,
            Scripted::Text(r#"{"approved": true, "feedback": "", "issues": []}"#.into()),
        );
        self.agent.script(
            AgentRole::QualityReviewer,
            Scripted::Text("# Sprint 1 Review\n\nAll good.".into()),
        );
        self.agent.script(
            AgentRole::Retro,
            Scripted::Text("# Sprint 1 Retro\n\nKeep going.".into()),
        );
    }
}

#[tokio::test]
async fn full_cycle_completes_and_persists() {
    let rig = Rig::new();
    rig.script_happy_cycle();

    let runner = SprintRunner::new(rig.deps(), 1).unwrap();
    let state = runner.full_cycle().await.unwrap();

    assert_eq!(state.phase, SprintPhase::Complete);
    assert!(state.final_elapsed_ms.is_some());

    let result = state.result.unwrap();
    assert_eq!(result.issues.len(), 1);
    assert_eq!(result.issues[0].status, IssueStatus::Completed);
    assert_eq!(result.issues[0].issue_number, 42);

    // Ceremony artifacts on disk.
    let sprints = rig.project.path().join("docs/sprints");
    assert!(sprints.join("demo-1-state.json").exists());
    assert!(sprints.join("demo-1-review.md").exists());
    assert!(sprints.join("demo-1-retro.md").exists());
    assert!(sprints.join("demo-1-log.md").exists());
    let velocity = std::fs::read_to_string(sprints.join("velocity.md")).unwrap();
    assert!(velocity.lines().any(|l| l.starts_with("| 1 |")));

    // State file round-trips to the same snapshot.
    let reloaded = SprintRunner::new(rig.deps(), 1).unwrap().state();
    assert_eq!(reloaded.phase, SprintPhase::Complete);
    assert_eq!(reloaded.result, runner.state().result);

    // Phase changes flowed through the bus in order.
    let phases: Vec<String> = rig
        .bus
        .replay()
        .iter()
        .filter_map(|e| match e {
            sprint_events::SprintEvent::PhaseChange { to, .. } => Some(to.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec!["refine", "plan", "execute", "review", "retro", "complete"]
    );
}

#[tokio::test]
async fn refine_labels_open_ideas() {
    let rig = Rig::new();
    rig.forge.add_issue(
        ForgeIssue {
            number: 90,
            title: "idea: dark mode".into(),
            body: "would be nice".into(),
            labels: vec!["type:idea".into()],
            state: "open".into(),
        },
        None,
    );
    rig.script_happy_cycle();
    rig.agent.script(
        AgentRole::Refiner,
        Scripted::Text("Refined: clear scope, ICE 7".into()),
    );

    let runner = SprintRunner::new(rig.deps(), 1).unwrap();
    runner.full_cycle().await.unwrap();

    assert_eq!(rig.forge.labels_for(90), vec!["status:refined"]);
    assert!(
        rig.forge
            .comments_for(90)
            .iter()
            .any(|c| c.contains("Refinement"))
    );
}

#[tokio::test]
async fn pause_halts_before_next_phase_and_resume_restores() {
    let rig = Rig::new();
    let runner = SprintRunner::new(rig.deps(), 1).unwrap();

    runner.control().request_pause();
    let state = runner.full_cycle().await.unwrap();
    assert_eq!(state.phase, SprintPhase::Paused);
    assert_eq!(state.phase_before_pause, Some(SprintPhase::Refine));

    // Persisted in the paused state too.
    let reloaded = SprintRunner::new(rig.deps(), 1).unwrap().state();
    assert_eq!(reloaded.phase, SprintPhase::Paused);

    runner.resume().unwrap();
    assert_eq!(runner.state().phase, SprintPhase::Refine);
    assert!(runner.state().phase_before_pause.is_none());

    // The cycle can now run to completion.
    rig.script_happy_cycle();
    let state = runner.full_cycle().await.unwrap();
    assert_eq!(state.phase, SprintPhase::Complete);
}

#[tokio::test]
async fn stop_pauses_and_raises_sprint_error() {
    let rig = Rig::new();
    let runner = SprintRunner::new(rig.deps(), 1).unwrap();

    runner.control().request_stop();
    let state = runner.full_cycle().await.unwrap();
    assert_eq!(state.phase, SprintPhase::Paused);
    assert!(
        rig.bus
            .replay()
            .iter()
            .any(|e| matches!(e, sprint_events::SprintEvent::SprintError { .. }))
    );
}

#[tokio::test]
async fn resume_skips_issues_already_completed() {
    let rig = Rig::new();

    // First cycle: run to completion, recording how much work happened.
    rig.script_happy_cycle();
    let runner = SprintRunner::new(rig.deps(), 1).unwrap();
    runner.full_cycle().await.unwrap();
    let developer_sessions_after_first = rig.agent.sessions_opened(AgentRole::Developer);
    assert_eq!(developer_sessions_after_first, 1);

    // Simulate a crash right after execute: rewind the phase to execute
    // with the completed results still recorded.
    let runner = SprintRunner::new(rig.deps(), 1).unwrap();
    {
        let mut state = runner.state();
        state.phase = SprintPhase::Execute;
        let store = sprint_core::state_store::StateStore::new(
            ProjectConfig::sprints_dir(rig.project.path()),
            "demo",
        );
        store.save(&state).unwrap();
    }
    let runner = SprintRunner::new(rig.deps(), 1).unwrap();
    // Only the post-execute ceremonies need new responses.
    rig.agent.script(
        AgentRole::QualityReviewer,
        Scripted::Text("# Review again".into()),
    );
    rig.agent
        .script(AgentRole::Retro, Scripted::Text("# Retro again".into()));

    let state = runner.full_cycle().await.unwrap();
    assert_eq!(state.phase, SprintPhase::Complete);
    // No new developer session: the completed issue was not re-executed.
    assert_eq!(
        rig.agent.sessions_opened(AgentRole::Developer),
        developer_sessions_after_first
    );
}

#[tokio::test]
async fn sprint_loop_stops_when_the_milestone_stays_open() {
    let rig = Rig::new();
    rig.script_happy_cycle();

    // The recording forge never closes milestones, so the loop must run
    // exactly one cycle and then refuse to spin on the same sprint.
    sprint_core::runner::sprint_loop(|| rig.deps()).await.unwrap();

    assert_eq!(rig.agent.sessions_opened(AgentRole::Developer), 1);
}

#[tokio::test]
async fn missing_template_is_a_setup_error() {
    let rig = Rig::new();
    std::fs::remove_file(rig.project.path().join("prompts/worker.md")).unwrap();

    let runner = SprintRunner::new(rig.deps(), 1).unwrap();
    let err = runner.full_cycle().await.unwrap_err();
    assert!(err.to_string().contains("missing prompt template"));
    // Surfaced before any session was opened.
    assert_eq!(rig.agent.sessions_opened(AgentRole::Planner), 0);
}
