//! Sprint state persistence.
//!
//! One JSON file per sprint at `docs/sprints/<slug>-<N>-state.json`.
//! Writes go through a `.tmp` sibling and a rename so a crash can never
//! leave a torn state file. Loaders switch on the embedded `version`.

use std::path::{Path, PathBuf};

use sprint_protocol::{SprintState, STATE_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt state file: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("unsupported state file version: {0}")]
    UnsupportedVersion(String),
}

/// Store for one project's sprint state files.
#[derive(Clone, Debug)]
pub struct StateStore {
    dir: PathBuf,
    slug: String,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>, slug: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            slug: slug.into(),
        }
    }

    pub fn path(&self, sprint_number: u32) -> PathBuf {
        self.dir
            .join(format!("{}-{}-state.json", self.slug, sprint_number))
    }

    /// Persist atomically via `.tmp` + rename.
    pub fn save(&self, state: &SprintState) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(state.sprint_number);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Load the state for a sprint, if any was persisted.
    pub fn load(&self, sprint_number: u32) -> Result<Option<SprintState>, StateError> {
        let path = self.path(sprint_number);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;

        // Peek at the version before committing to a full parse.
        let probe: serde_json::Value = serde_json::from_str(&contents)?;
        let version = probe
            .get("version")
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string();
        if version != STATE_VERSION {
            return Err(StateError::UnsupportedVersion(version));
        }

        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// All persisted sprint numbers, ascending.
    pub fn list_sprints(&self) -> Result<Vec<u32>, StateError> {
        let mut sprints = Vec::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(sprints),
            Err(err) => return Err(err.into()),
        };
        let prefix = format!("{}-", self.slug);
        for entry in entries {
            let name = entry?.file_name().to_string_lossy().to_string();
            if let Some(rest) = name.strip_prefix(&prefix)
                && let Some(number) = rest.strip_suffix("-state.json")
                && let Ok(number) = number.parse()
            {
                sprints.push(number);
            }
        }
        sprints.sort_unstable();
        Ok(sprints)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sprint_protocol::{SprintPhase, SprintPlan};

    #[test]
    fn state_round_trips_through_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), "demo");

        let mut state = SprintState::new(3);
        state.phase = SprintPhase::Execute;
        state.plan = Some(SprintPlan {
            sprint_number: 3,
            issues: vec![],
            groups: vec![],
            estimated_points: 0,
            rationale: "empty sprint".into(),
        });
        store.save(&state).unwrap();

        let loaded = store.load(3).unwrap().unwrap();
        assert_eq!(loaded, state);
        assert!(dir.path().join("demo-3-state.json").exists());
        // No stray .tmp left behind.
        assert!(!dir.path().join("demo-3-state.json.tmp").exists());
    }

    #[test]
    fn missing_state_is_none() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), "demo");
        assert!(store.load(9).unwrap().is_none());
    }

    #[test]
    fn unknown_version_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), "demo");
        std::fs::write(
            store.path(4),
            r#"{"version":"99","sprint_number":4,"phase":"init","started_at":"2026-08-01T00:00:00Z"}"#,
        )
        .unwrap();

        let err = store.load(4).unwrap_err();
        assert!(matches!(err, StateError::UnsupportedVersion(v) if v == "99"));
    }

    #[test]
    fn list_sprints_finds_persisted_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path(), "demo");
        store.save(&SprintState::new(2)).unwrap();
        store.save(&SprintState::new(1)).unwrap();
        assert_eq!(store.list_sprints().unwrap(), vec![1, 2]);
    }
}
