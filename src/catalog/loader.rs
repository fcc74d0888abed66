//! Catalog loading and merging.
//!
//! The common source is required; the distro-specific overlay is
//! optional and only ever *adds* tasks - an overlay definition whose id
//! already exists in the merged catalog is skipped, since overlay files
//! arrive already distro-specific and never override common entries.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;

use super::schema::{self, RawSource};
use super::{Catalog, Category, TaskDefinition};
use crate::pm::Backend;
use crate::ui::prelude::*;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read catalog source {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed catalog source {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("duplicate task id '{id}' in {path}")]
    DuplicateId { id: String, path: PathBuf },
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    DanglingDependency { task: String, dependency: String },
    #[error("task '{task}' has an invalid verification pattern: {source}")]
    InvalidPattern {
        task: String,
        source: Box<regex::Error>,
    },
}

/// Load and merge a catalog pair for the active backend.
///
/// The target overlay may be absent on disk; the common catalog is the
/// fallback and a warning is logged. A missing or malformed common
/// source is fatal for this catalog.
pub fn load(
    common_path: &Path,
    target_path: &Path,
    backend: Backend,
) -> Result<Catalog, LoadError> {
    let common = parse_source(common_path)?;

    let target = if target_path.exists() {
        parse_source(target_path)?
    } else {
        emit(
            Level::Warn,
            "catalog.load.missing_overlay",
            &format!(
                "No distro-specific catalog at {}, using common definitions only",
                target_path.display()
            ),
            None,
        );
        RawSource::default()
    };

    merge(common, common_path, target, target_path, backend)
}

fn parse_source(path: &Path) -> Result<RawSource, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge(
    common: RawSource,
    common_path: &Path,
    target: RawSource,
    target_path: &Path,
    backend: Backend,
) -> Result<Catalog, LoadError> {
    let backend_key = backend.key();
    let fallback_key = Backend::fallback_key();

    let (common_categories, _, _) = schema::normalize(common);
    let (target_categories, distro, compatible_versions) = schema::normalize(target);

    let mut seen: HashSet<String> = HashSet::new();
    let mut categories: Vec<Category> = Vec::new();

    for category in common_categories {
        let mut tasks = Vec::new();
        for task in category.tasks {
            if !retained(&task, backend_key, fallback_key) {
                continue;
            }
            // Duplicates inside one source are an authoring bug.
            if !seen.insert(task.id.clone()) {
                return Err(LoadError::DuplicateId {
                    id: task.id,
                    path: common_path.to_path_buf(),
                });
            }
            tasks.push(task);
        }
        categories.push(Category {
            name: category.name,
            tasks,
        });
    }

    for category in target_categories {
        let mut fresh = Vec::new();
        for task in category.tasks {
            if !retained(&task, backend_key, fallback_key) {
                continue;
            }
            // Overlay adds, never overrides.
            if seen.insert(task.id.clone()) {
                fresh.push(task);
            }
        }
        match categories.iter_mut().find(|c| c.name == category.name) {
            Some(existing) => existing.tasks.extend(fresh),
            None => categories.push(Category {
                name: category.name,
                tasks: fresh,
            }),
        }
    }

    // Categories emptied by backend filtering carry no information.
    categories.retain(|c| !c.tasks.is_empty());

    let catalog = Catalog {
        categories,
        distro,
        compatible_versions,
    };
    validate(&catalog, &seen)?;

    emit(
        Level::Debug,
        "catalog.load.merged",
        &format!(
            "Merged {} tasks from {} and {}",
            catalog.task_count(),
            common_path.display(),
            target_path.display()
        ),
        None,
    );
    Ok(catalog)
}

/// Apps must carry an entry for the active backend or the universal
/// fallback; tweaks (no install map) always survive filtering.
fn retained(task: &TaskDefinition, backend_key: &str, fallback_key: &str) -> bool {
    !task.is_app() || task.supports_backend(backend_key, fallback_key)
}

fn validate(catalog: &Catalog, ids: &HashSet<String>) -> Result<(), LoadError> {
    for task in catalog.iter_tasks() {
        for dep in &task.dependencies {
            if !ids.contains(dep) {
                return Err(LoadError::DanglingDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        if let Some(verification) = &task.verification {
            if let Err(source) = Regex::new(&verification.success_pattern) {
                return Err(LoadError::InvalidPattern {
                    task: task.id.clone(),
                    source: Box::new(source),
                });
            }
        }
    }
    Ok(())
}

/// Whether the merged catalog's `compatible_versions` admits the given
/// distro version. An empty list means no restriction.
pub fn compatible_with(catalog: &Catalog, version: &str) -> bool {
    catalog.compatible_versions.is_empty()
        || version.is_empty()
        || catalog
            .compatible_versions
            .iter()
            .any(|v| v == version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const COMMON_APPS: &str = r#"
version: 1
categories:
  - name: Browsers
    applications:
      - id: firefox
        name: Firefox
        install:
          apt: [firefox]
          dnf: [firefox]
      - id: librewolf
        name: LibreWolf
        install:
          flatpak: [io.gitlab.librewolf-community]
  - name: Terminal
    applications:
      - id: htop
        name: htop
        install:
          apt: [htop]
"#;

    const UBUNTU_APPS: &str = r#"
version: 1
distro: ubuntu
categories:
  - name: Browsers
    applications:
      - id: firefox
        name: Firefox (Ubuntu build)
        install:
          apt: [firefox-esr]
      - id: chromium
        name: Chromium
        install:
          apt: [chromium-browser]
  - name: Ubuntu Extras
    applications:
      - id: ubuntu-restricted
        name: Restricted extras
        install:
          apt: [ubuntu-restricted-extras]
"#;

    fn write_pair(dir: &TempDir, common: &str, target: &str) -> (PathBuf, PathBuf) {
        let common_path = dir.path().join("common.yaml");
        let target_path = dir.path().join("ubuntu.yaml");
        fs::write(&common_path, common).unwrap();
        fs::write(&target_path, target).unwrap();
        (common_path, target_path)
    }

    #[test]
    fn test_merge_overlay_adds_but_never_overrides() {
        let dir = TempDir::new().unwrap();
        let (common, target) = write_pair(&dir, COMMON_APPS, UBUNTU_APPS);
        let catalog = load(&common, &target, Backend::Apt).unwrap();

        // The common firefox wins; the overlay's variant is skipped.
        let firefox = catalog.get("firefox").unwrap();
        assert_eq!(firefox.name, "Firefox");
        assert_eq!(firefox.install["apt"], vec!["firefox"]);

        // Overlay-only tasks are appended, new categories created.
        assert!(catalog.get("chromium").is_some());
        assert!(catalog.get("ubuntu-restricted").is_some());
        assert_eq!(
            catalog
                .categories
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>(),
            vec!["Browsers", "Terminal", "Ubuntu Extras"]
        );
    }

    #[test]
    fn test_backend_filtering_keeps_fallback() {
        let dir = TempDir::new().unwrap();
        let (common, target) = write_pair(&dir, COMMON_APPS, UBUNTU_APPS);
        let catalog = load(&common, &target, Backend::Dnf).unwrap();

        // firefox has a dnf entry, librewolf survives via flatpak fallback.
        assert!(catalog.get("firefox").is_some());
        assert!(catalog.get("librewolf").is_some());
        // htop is apt-only: filtered, and its category dropped as empty.
        assert!(catalog.get("htop").is_none());
        assert!(!catalog.categories.iter().any(|c| c.name == "Terminal"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let common_path = dir.path().join("common.yaml");
        fs::write(&common_path, COMMON_APPS).unwrap();

        // Merging a catalog with itself yields the same catalog.
        let merged = load(&common_path, &common_path, Backend::Apt).unwrap();
        let missing = dir.path().join("absent.yaml");
        let plain = load(&common_path, &missing, Backend::Apt).unwrap();
        assert_eq!(merged.task_count(), plain.task_count());
        let ids: Vec<_> = merged.iter_tasks().map(|t| t.id.as_str()).collect();
        let plain_ids: Vec<_> = plain.iter_tasks().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, plain_ids);
    }

    #[test]
    fn test_ids_unique_after_merge() {
        let dir = TempDir::new().unwrap();
        let (common, target) = write_pair(&dir, COMMON_APPS, UBUNTU_APPS);
        let catalog = load(&common, &target, Backend::Apt).unwrap();
        let mut ids: Vec<_> = catalog.iter_tasks().map(|t| t.id.clone()).collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_duplicate_in_single_source_is_error() {
        let dir = TempDir::new().unwrap();
        let bad = r#"
categories:
  - name: A
    applications:
      - id: dup
        name: One
        install: { apt: [one] }
      - id: dup
        name: Two
        install: { apt: [two] }
"#;
        let common_path = dir.path().join("common.yaml");
        fs::write(&common_path, bad).unwrap();
        let missing = dir.path().join("absent.yaml");
        let err = load(&common_path, &missing, Backend::Apt).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateId { id, .. } if id == "dup"));
    }

    #[test]
    fn test_dangling_dependency_is_error() {
        let dir = TempDir::new().unwrap();
        let bad = r#"
sections:
  - name: S
    tweaks:
      - id: child
        name: Child
        commands: [echo hi]
        dependencies: [no-such-task]
"#;
        let common_path = dir.path().join("common.yaml");
        fs::write(&common_path, bad).unwrap();
        let missing = dir.path().join("absent.yaml");
        let err = load(&common_path, &missing, Backend::Apt).unwrap_err();
        assert!(matches!(
            err,
            LoadError::DanglingDependency { dependency, .. } if dependency == "no-such-task"
        ));
    }

    #[test]
    fn test_invalid_verification_pattern_is_error() {
        let dir = TempDir::new().unwrap();
        let bad = r#"
sections:
  - name: S
    tweaks:
      - id: t
        name: T
        commands: [echo hi]
        verification:
          check_command: "true"
          success_pattern: "(["
"#;
        let common_path = dir.path().join("common.yaml");
        fs::write(&common_path, bad).unwrap();
        let missing = dir.path().join("absent.yaml");
        let err = load(&common_path, &missing, Backend::Apt).unwrap_err();
        assert!(matches!(err, LoadError::InvalidPattern { task, .. } if task == "t"));
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let common_path = dir.path().join("common.yaml");
        fs::write(&common_path, "categories: [unclosed").unwrap();
        let missing = dir.path().join("absent.yaml");
        let err = load(&common_path, &missing, Backend::Apt).unwrap_err();
        assert!(matches!(err, LoadError::Parse { .. }));
    }

    #[test]
    fn test_missing_common_is_io_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("absent.yaml");
        let err = load(&missing, &missing, Backend::Apt).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_empty_catalog_after_filtering_is_valid() {
        let dir = TempDir::new().unwrap();
        let apt_only = r#"
categories:
  - name: A
    applications:
      - id: x
        name: X
        install: { apt: [x] }
"#;
        let common_path = dir.path().join("common.yaml");
        fs::write(&common_path, apt_only).unwrap();
        let missing = dir.path().join("absent.yaml");
        let catalog = load(&common_path, &missing, Backend::Pacman).unwrap();
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_compatible_with() {
        let catalog = Catalog {
            compatible_versions: vec!["24.04".into(), "24.10".into()],
            ..Default::default()
        };
        assert!(compatible_with(&catalog, "24.04"));
        assert!(!compatible_with(&catalog, "22.04"));
        assert!(compatible_with(&Catalog::default(), "22.04"));
        assert!(compatible_with(&catalog, ""));
    }
}
