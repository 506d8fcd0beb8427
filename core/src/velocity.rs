//! The velocity file: one markdown table row per sprint.
//!
//! Appending a row for a sprint that already has one updates it in place;
//! the table never grows duplicate rows for the same sprint.

use std::io;
use std::path::Path;

const HEADER: &str = "| Sprint | Date | Goal | Planned | Done | Carry | Hours | Issues/Hr | Notes |";
const SEPARATOR: &str = "|---|---|---|---|---|---|---|---|---|";

/// One row of the velocity table.
#[derive(Clone, Debug, PartialEq)]
pub struct VelocityRow {
    pub sprint: u32,
    pub date: String,
    pub goal: String,
    pub planned: u32,
    pub done: u32,
    pub carry: u32,
    pub hours: f64,
    pub issues_per_hour: f64,
    pub notes: String,
}

impl VelocityRow {
    fn render(&self) -> String {
        format!(
            "| {} | {} | {} | {} | {} | {} | {:.1} | {:.2} | {} |",
            self.sprint,
            self.date,
            self.goal,
            self.planned,
            self.done,
            self.carry,
            self.hours,
            self.issues_per_hour,
            self.notes
        )
    }
}

/// Insert or update the row for `row.sprint` in the table at `path`.
pub fn upsert_velocity_row(path: &Path, row: &VelocityRow) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let existing = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
        Err(err) => return Err(err),
    };

    let mut lines: Vec<String> = if existing.trim().is_empty() {
        vec![HEADER.to_string(), SEPARATOR.to_string()]
    } else {
        existing.lines().map(str::to_string).collect()
    };

    let rendered = row.render();
    let sprint_cell = row.sprint.to_string();
    let mut replaced = false;
    for line in lines.iter_mut().skip(2) {
        if first_cell(line) == Some(sprint_cell.as_str()) {
            *line = rendered.clone();
            replaced = true;
            break;
        }
    }
    if !replaced {
        lines.push(rendered);
    }

    std::fs::write(path, lines.join("\n") + "\n")
}

fn first_cell(line: &str) -> Option<&str> {
    line.strip_prefix('|')?.split('|').next().map(str::trim)
}
