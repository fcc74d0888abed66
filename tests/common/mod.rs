use anyhow::Result;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use tempfile::TempDir;

/// A throwaway catalog directory plus helpers for driving the binary.
pub struct TestEnvironment {
    temp_dir: TempDir,
}

pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a catalog source file under the config dir, e.g.
    /// `write_catalog("tweaks/common.yaml", ...)`.
    pub fn write_catalog(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Run the postup binary against this environment's catalog dir
    /// with a closed stdin, so confirmation prompts always decline.
    pub fn run_postup(&self, args: &[&str]) -> Result<CommandOutput> {
        let output = Command::new(env!("CARGO_BIN_EXE_postup"))
            .arg("--config-dir")
            .arg(self.path())
            .arg("--backend")
            .arg("apt")
            .args(args)
            .stdin(Stdio::null())
            .output()?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
