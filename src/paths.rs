use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for postup

const SYSTEM_DATA_DIR: &str = "/usr/share/postup";

/// The catalog root for this run. An explicit `--config-dir` wins;
/// otherwise the user's config directory is preferred when it holds a
/// catalog, with the system-wide data directory as fallback.
pub fn catalog_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }

    let user_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("postup");
    if user_dir.join("apps").is_dir() || user_dir.join("tweaks").is_dir() {
        return Ok(user_dir);
    }

    Ok(PathBuf::from(SYSTEM_DATA_DIR))
}

/// `<root>/apps/common.yaml` and friends.
pub fn apps_dir(root: &std::path::Path) -> PathBuf {
    root.join("apps")
}

pub fn tweaks_dir(root: &std::path::Path) -> PathBuf {
    root.join("tweaks")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_dir_wins() {
        let dir = catalog_dir(Some(PathBuf::from("/tmp/custom"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/custom"));
    }
}
