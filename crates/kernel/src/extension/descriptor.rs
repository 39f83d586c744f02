//! Extension descriptors and catalog deltas.

use serde::{Deserialize, Serialize};

use super::ExtensionId;

/// Activation event declaring "activate as soon as the host runs".
pub const WILDCARD_EVENT: &str = "*";

/// Activation event fired once eager startup activation has settled.
pub const STARTUP_FINISHED_EVENT: &str = "onStartupFinished";

/// Prefix of workspace-content activation events, e.g.
/// `workspaceContains:**/*.go`.
pub const WORKSPACE_CONTAINS_PREFIX: &str = "workspaceContains:";

/// Static description of one extension.
///
/// Descriptors are immutable: a catalog delta replaces them wholesale, they
/// are never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionDescriptor {
    /// Globally unique identifier (case-insensitive).
    pub id: ExtensionId,

    /// Declarative triggers, matched textually (e.g. `onCommand:x`,
    /// `onStartupFinished`, `workspaceContains:*.go`, `*`).
    #[serde(default)]
    pub activation_events: Vec<String>,

    /// Reference handed to the module loader. `None` marks an empty
    /// extension: it activates without loading any code and exports nothing.
    #[serde(default)]
    pub entry_point: Option<String>,

    /// Ships with the host rather than being user-installed.
    #[serde(default)]
    pub builtin: bool,

    /// Runs in an externally owned host. Activation is delegated and the
    /// extension is represented locally only by a placeholder record.
    #[serde(default)]
    pub remote: bool,

    /// Already-resolved identifiers of extensions that must finish their own
    /// activation before this one's module initialization runs.
    #[serde(default)]
    pub dependencies: Vec<ExtensionId>,
}

impl ExtensionDescriptor {
    /// Whether `event` appears verbatim in the declared activation events.
    pub fn declares_event(&self, event: &str) -> bool {
        self.activation_events.iter().any(|e| e == event)
    }

    /// Patterns of all declared `workspaceContains:` events.
    pub fn workspace_contains_patterns(&self) -> impl Iterator<Item = &str> {
        self.activation_events
            .iter()
            .filter_map(|e| e.strip_prefix(WORKSPACE_CONTAINS_PREFIX))
    }
}

/// Incremental change to the extension catalogs.
///
/// `to_add`/`to_remove` target the global catalog, `my_to_add`/`my_to_remove`
/// the owned subset. Removing an id that is not present is a no-op: deltas
/// may race with concurrently applied deltas.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionsDelta {
    #[serde(default)]
    pub to_add: Vec<ExtensionDescriptor>,
    #[serde(default)]
    pub to_remove: Vec<ExtensionId>,
    #[serde(default)]
    pub my_to_add: Vec<ExtensionId>,
    #[serde(default)]
    pub my_to_remove: Vec<ExtensionId>,
}

impl ExtensionsDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty()
            && self.to_remove.is_empty()
            && self.my_to_add.is_empty()
            && self.my_to_remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(events: &[&str]) -> ExtensionDescriptor {
        ExtensionDescriptor {
            id: ExtensionId::new("test.ext"),
            activation_events: events.iter().map(|s| s.to_string()).collect(),
            entry_point: Some("main".into()),
            builtin: false,
            remote: false,
            dependencies: Vec::new(),
        }
    }

    #[test]
    fn event_match_is_textual() {
        let desc = descriptor(&["onCommand:x", "*"]);
        assert!(desc.declares_event("onCommand:x"));
        assert!(desc.declares_event("*"));
        assert!(!desc.declares_event("onCommand:y"));
        assert!(!desc.declares_event("oncommand:x"));
    }

    #[test]
    fn workspace_contains_patterns_strip_the_prefix() {
        let desc = descriptor(&["workspaceContains:**/*.go", "onCommand:x"]);
        let patterns: Vec<_> = desc.workspace_contains_patterns().collect();
        assert_eq!(patterns, vec!["**/*.go"]);
    }

    #[test]
    fn empty_delta_is_empty() {
        assert!(ExtensionsDelta::default().is_empty());
        let delta = ExtensionsDelta {
            to_remove: vec![ExtensionId::new("a")],
            ..Default::default()
        };
        assert!(!delta.is_empty());
    }
}
