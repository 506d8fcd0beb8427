//! Permission policy for tool-use requests from the agent.

use serde::{Deserialize, Serialize};
use sprint_protocol::wire::{PermissionOption, PermissionOptionKind, PermissionOutcome};
use wildmatch::WildMatch;

/// Resolves `session/request_permission` without human input.
///
/// Resolution order: auto-approve flag, then the tool-name allow-list, then
/// reject. Approvals always prefer `allow_once` over `allow_always` so a
/// single noisy run cannot grant standing permissions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PermissionPolicy {
    #[serde(default)]
    pub auto_approve: bool,
    /// Wildcard patterns matched against the tool name, e.g. `mcp__git_*`.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
}

impl PermissionPolicy {
    pub fn allow_all() -> Self {
        Self {
            auto_approve: true,
            allowed_tools: Vec::new(),
        }
    }

    fn tool_allowed(&self, tool_name: &str) -> bool {
        self.allowed_tools
            .iter()
            .any(|pattern| WildMatch::new(pattern).matches(tool_name))
    }

    /// Decide the outcome for one permission request.
    pub fn resolve(&self, tool_name: &str, options: &[PermissionOption]) -> PermissionOutcome {
        let approve = self.auto_approve || self.tool_allowed(tool_name);
        let preference: &[PermissionOptionKind] = if approve {
            &[
                PermissionOptionKind::AllowOnce,
                PermissionOptionKind::AllowAlways,
            ]
        } else {
            &[
                PermissionOptionKind::RejectOnce,
                PermissionOptionKind::RejectAlways,
            ]
        };

        for kind in preference {
            if let Some(option) = options.iter().find(|o| o.kind == *kind) {
                return PermissionOutcome::Selected {
                    option_id: option.option_id.clone(),
                };
            }
        }
        PermissionOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(id: &str, kind: PermissionOptionKind) -> PermissionOption {
        PermissionOption {
            option_id: id.to_string(),
            kind,
        }
    }

    #[test]
    fn auto_approve_prefers_allow_once_over_allow_always() {
        let policy = PermissionPolicy::allow_all();
        let options = vec![
            option("aa", PermissionOptionKind::AllowAlways),
            option("ao", PermissionOptionKind::AllowOnce),
        ];
        assert_eq!(
            policy.resolve("shell", &options),
            PermissionOutcome::Selected {
                option_id: "ao".into()
            }
        );
    }

    #[test]
    fn allow_list_matches_wildcards() {
        let policy = PermissionPolicy {
            auto_approve: false,
            allowed_tools: vec!["mcp__git_*".into()],
        };
        let options = vec![
            option("ao", PermissionOptionKind::AllowOnce),
            option("ro", PermissionOptionKind::RejectOnce),
        ];
        assert_eq!(
            policy.resolve("mcp__git_commit", &options),
            PermissionOutcome::Selected {
                option_id: "ao".into()
            }
        );
        assert_eq!(
            policy.resolve("mcp__web_fetch", &options),
            PermissionOutcome::Selected {
                option_id: "ro".into()
            }
        );
    }

    #[test]
    fn unmatched_tool_rejects_once() {
        let policy = PermissionPolicy::default();
        let options = vec![
            option("ao", PermissionOptionKind::AllowOnce),
            option("ra", PermissionOptionKind::RejectAlways),
            option("ro", PermissionOptionKind::RejectOnce),
        ];
        assert_eq!(
            policy.resolve("shell", &options),
            PermissionOutcome::Selected {
                option_id: "ro".into()
            }
        );
    }

    #[test]
    fn no_suitable_option_cancels() {
        let policy = PermissionPolicy::allow_all();
        let options = vec![option("ro", PermissionOptionKind::RejectOnce)];
        assert_eq!(policy.resolve("shell", &options), PermissionOutcome::Cancelled);
    }
}
