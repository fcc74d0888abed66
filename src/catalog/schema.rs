//! Raw serde types for catalog source files.
//!
//! Sources come in two spellings: app files with
//! `categories[].applications[]` and tweak files with
//! `sections[].tweaks[]`. Both normalize into the same group/task shape,
//! and every optional field defaults so sparse records load cleanly.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::{Category, CommandStep, TaskDefinition, Verification};

#[derive(Debug, Default, Deserialize)]
pub struct RawSource {
    // `version` and group `icon` fields are tolerated via serde's
    // default unknown-field handling; the engine has no use for them.
    #[serde(default)]
    pub distro: Option<String>,
    #[serde(default)]
    pub compatible_versions: Vec<String>,
    #[serde(default)]
    pub categories: Vec<RawGroup>,
    #[serde(default)]
    pub sections: Vec<RawGroup>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawGroup {
    pub name: String,
    #[serde(default)]
    pub applications: Vec<RawTask>,
    #[serde(default)]
    pub tweaks: Vec<RawTask>,
}

#[derive(Debug, Deserialize)]
pub struct RawTask {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub install: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub commands: Vec<RawCommand>,
    #[serde(default)]
    pub requires_restart: bool,
    #[serde(default = "default_true")]
    pub idempotent: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub verification: Option<RawVerification>,
}

fn default_true() -> bool {
    true
}

/// A command is either a bare string or a command/description record.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawCommand {
    Plain(String),
    Described {
        command: String,
        #[serde(default)]
        description: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct RawVerification {
    pub check_command: String,
    pub success_pattern: String,
}

impl RawTask {
    /// Normalize into the engine's task shape. `group_name` supplies the
    /// category tag when the record carries none of its own.
    pub fn into_definition(self, group_name: &str) -> TaskDefinition {
        let category = if self.category.is_empty() {
            group_name.to_string()
        } else {
            self.category
        };
        let commands = self
            .commands
            .into_iter()
            .map(|c| match c {
                RawCommand::Plain(command) => CommandStep {
                    command,
                    description: None,
                },
                RawCommand::Described {
                    command,
                    description,
                } => CommandStep {
                    command,
                    description,
                },
            })
            .collect();
        TaskDefinition {
            id: self.id,
            name: self.name,
            description: self.description,
            category,
            tags: self.tags,
            install: self.install,
            commands,
            verification: self.verification.map(|v| Verification {
                check_command: v.check_command,
                success_pattern: v.success_pattern,
            }),
            dependencies: self.dependencies,
            requires_restart: self.requires_restart,
            idempotent: self.idempotent,
        }
    }
}

/// Normalized group ready for merging.
pub fn normalize(source: RawSource) -> (Vec<Category>, Option<String>, Vec<String>) {
    let distro = source.distro.clone();
    let compatible_versions = source.compatible_versions.clone();
    let mut categories = Vec::new();
    for group in source.categories.into_iter().chain(source.sections) {
        let name = group.name;
        let tasks: Vec<TaskDefinition> = group
            .applications
            .into_iter()
            .chain(group.tweaks)
            .map(|t| t.into_definition(&name))
            .collect();
        categories.push(Category { name, tasks });
    }
    (categories, distro, compatible_versions)
}
