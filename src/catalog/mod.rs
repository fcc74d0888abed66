//! Merged task catalog: the data model the engine operates on.
//!
//! A catalog is built by [`loader::load`] from a common source plus an
//! optional distro-specific overlay, filtered to the active package
//! backend. Tasks are either app installs (non-empty `install` map) or
//! tweaks (non-empty `commands` list).

pub mod loader;
pub mod schema;

use std::collections::BTreeMap;

pub use loader::{LoadError, load};

/// One shell command of a task, with an optional human description
/// shown while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStep {
    pub command: String,
    pub description: Option<String>,
}

impl CommandStep {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: None,
        }
    }

    pub fn described(command: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: Some(description.into()),
        }
    }
}

/// Idempotency probe: run `check_command`, match `success_pattern` as a
/// regex against its stdout. A match means the task's effect is already
/// present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub check_command: String,
    pub success_pattern: String,
}

/// A single installable application or system tweak.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    /// Unique within the merged catalog.
    pub id: String,
    pub name: String,
    pub description: String,
    /// Category tag carried from the source record, e.g. "performance".
    pub category: String,
    /// Free-form search tags.
    pub tags: Vec<String>,
    /// Backend key -> package names. Empty for tweaks.
    pub install: BTreeMap<String, Vec<String>>,
    /// Ordered shell commands. Empty for plain package installs.
    pub commands: Vec<CommandStep>,
    pub verification: Option<Verification>,
    /// Prerequisite task ids, in declared order.
    pub dependencies: Vec<String>,
    pub requires_restart: bool,
    /// Safe to re-apply. Tasks flagged false skip the pre-flight check
    /// and are always offered for execution.
    pub idempotent: bool,
}

impl TaskDefinition {
    /// True when this task is a package install rather than a tweak.
    pub fn is_app(&self) -> bool {
        !self.install.is_empty()
    }

    /// Package names for the given backend key, falling back to the
    /// universal key when the native one is absent.
    pub fn packages_for(&self, backend_key: &str, fallback_key: &str) -> Option<&Vec<String>> {
        self.install
            .get(backend_key)
            .or_else(|| self.install.get(fallback_key))
    }

    /// Whether any backend entry matches, i.e. the task survives
    /// filtering for the active backend.
    pub fn supports_backend(&self, backend_key: &str, fallback_key: &str) -> bool {
        self.packages_for(backend_key, fallback_key).is_some()
    }
}

/// A named, ordered group of tasks (a source "category" or "section").
#[derive(Debug, Clone)]
pub struct Category {
    pub name: String,
    pub tasks: Vec<TaskDefinition>,
}

/// The merged, filtered catalog for one run.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub categories: Vec<Category>,
    /// Distro id the target-specific overlay was authored for, if any.
    pub distro: Option<String>,
    pub compatible_versions: Vec<String>,
}

impl Catalog {
    /// All tasks in catalog insertion order.
    pub fn iter_tasks(&self) -> impl Iterator<Item = &TaskDefinition> {
        self.categories.iter().flat_map(|c| c.tasks.iter())
    }

    pub fn get(&self, id: &str) -> Option<&TaskDefinition> {
        self.iter_tasks().find(|t| t.id == id)
    }

    pub fn task_count(&self) -> usize {
        self.categories.iter().map(|c| c.tasks.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.task_count() == 0
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Bare tweak with the given id and dependencies, for resolver and
    /// orchestrator tests.
    pub fn tweak(id: &str, deps: &[&str]) -> TaskDefinition {
        TaskDefinition {
            id: id.to_string(),
            name: id.to_uppercase(),
            description: format!("test tweak {id}"),
            category: "test".to_string(),
            tags: Vec::new(),
            install: BTreeMap::new(),
            commands: vec![CommandStep::new("true")],
            verification: None,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            requires_restart: false,
            idempotent: true,
        }
    }

    pub fn catalog_of(tasks: Vec<TaskDefinition>) -> Catalog {
        Catalog {
            categories: vec![Category {
                name: "Test".to_string(),
                tasks,
            }],
            distro: None,
            compatible_versions: Vec::new(),
        }
    }
}
