//! Idempotency verification.
//!
//! A task's check command runs under a bounded timeout with `LC_ALL=C`
//! (success patterns are authored against English output). Any failure
//! to produce an answer - spawn error, timeout, bad pattern - counts as
//! "not applied": re-running an idempotent task is cheap, silently
//! skipping a missing one is not.

use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::catalog::{TaskDefinition, Verification};
use crate::ui::prelude::*;

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CHECK_WORKERS: usize = 8;

/// Whether the task's effect is already present on the system.
/// Tasks without a verification entry are always runnable.
pub async fn is_already_applied(task: &TaskDefinition, timeout: Duration) -> bool {
    match &task.verification {
        Some(verification) => probe(&task.id, verification.clone(), timeout).await,
        None => false,
    }
}

async fn probe(task_id: &str, verification: Verification, timeout: Duration) -> bool {
    let pattern = match Regex::new(&verification.success_pattern) {
        Ok(p) => p,
        Err(e) => {
            // The loader validates patterns, but stay fail-open for
            // catalogs assembled without it.
            emit(
                Level::Warn,
                "verify.pattern.invalid",
                &format!("Invalid verification pattern for '{task_id}': {e}"),
                None,
            );
            return false;
        }
    };

    // output() pipes stdout/stderr itself; stdin stays closed so a
    // prompting check command cannot stall the whole phase.
    let output = Command::new("sh")
        .arg("-c")
        .arg(&verification.check_command)
        .env("LC_ALL", "C")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, output).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            emit(
                Level::Warn,
                "verify.check.spawn_failed",
                &format!("Verification check for '{task_id}' could not run: {e}"),
                None,
            );
            return false;
        }
        Err(_) => {
            emit(
                Level::Warn,
                "verify.check.timeout",
                &format!(
                    "Verification check for '{task_id}' timed out after {}s",
                    timeout.as_secs()
                ),
                None,
            );
            return false;
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    pattern.is_match(&stdout)
}

/// Concurrent pre-flight pass over many tasks, bounded by a worker
/// limit. Returns the ids whose effect is already present. Only tasks
/// flagged idempotent with a verification entry are probed; checks are
/// read-only so running them side by side is safe.
pub fn check_all(tasks: &[TaskDefinition], workers: usize, timeout: Duration) -> HashSet<String> {
    let candidates: Vec<(String, Verification)> = tasks
        .iter()
        .filter(|t| t.idempotent)
        .filter_map(|t| t.verification.clone().map(|v| (t.id.clone(), v)))
        .collect();
    if candidates.is_empty() {
        return HashSet::new();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            emit(
                Level::Warn,
                "verify.runtime_failed",
                &format!("Could not start check runtime: {e}"),
                None,
            );
            return HashSet::new();
        }
    };

    runtime.block_on(async move {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut join_set = JoinSet::new();
        for (id, verification) in candidates {
            let semaphore = Arc::clone(&semaphore);
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let applied = probe(&id, verification, timeout).await;
                (id, applied)
            });
        }

        let mut applied = HashSet::new();
        while let Some(result) = join_set.join_next().await {
            if let Ok((id, true)) = result {
                applied.insert(id);
            }
        }
        applied
    })
}
