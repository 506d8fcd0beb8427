//! Forge label vocabulary.
//!
//! Status labels are mutually exclusive: setting one replaces any other
//! `status:` label on the issue.

pub const STATUS_IN_PROGRESS: &str = "status:in-progress";
pub const STATUS_DONE: &str = "status:done";
pub const STATUS_BLOCKED: &str = "status:blocked";
pub const STATUS_REFINED: &str = "status:refined";

pub const TYPE_IDEA: &str = "type:idea";
pub const TYPE_IMPROVEMENT: &str = "type:improvement";

pub const HUMAN_DECISION_NEEDED: &str = "human-decision-needed";

/// Whether a label belongs to the exclusive `status:` group.
pub fn is_status_label(label: &str) -> bool {
    label.starts_with("status:")
}
