//! Drives a selection through resolution, idempotency checks and
//! execution, aggregating one outcome per reachable task.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;

use super::executor::{BatchOutcome, BatchStatus, CommandRunner};
use super::report::{Report, SkipReason, TaskOutcome, TaskReport};
use super::resolve::{self, ResolveError};
use super::verify;
use crate::catalog::{Catalog, CommandStep, TaskDefinition};
use crate::pm::Backend;
use crate::ui::prelude::*;

/// How much of a failed batch's output lands in the report.
const EXCERPT_LIMIT: usize = 400;

pub struct Orchestrator<'a, R: CommandRunner> {
    catalog: &'a Catalog,
    backend: Backend,
    runner: R,
    check_timeout: Duration,
    check_workers: usize,
}

impl<'a, R: CommandRunner> Orchestrator<'a, R> {
    pub fn new(catalog: &'a Catalog, backend: Backend, runner: R) -> Self {
        Self {
            catalog,
            backend,
            runner,
            check_timeout: verify::DEFAULT_CHECK_TIMEOUT,
            check_workers: verify::DEFAULT_CHECK_WORKERS,
        }
    }

    pub fn with_check_limits(mut self, workers: usize, timeout: Duration) -> Self {
        self.check_workers = workers;
        self.check_timeout = timeout;
        self
    }

    /// Apply the selected tasks plus their prerequisites. Resolution
    /// errors (cycles, unknown ids) are fatal; per-task failures are
    /// recorded in the report and never abort sibling tasks.
    pub fn apply_selection(&self, selected: &[String]) -> Result<Report, ResolveError> {
        let plan = resolve::resolve(selected, self.catalog)?;
        if plan.is_empty() {
            return Ok(Report::from_entries(Vec::new()));
        }

        emit(
            Level::Info,
            "orchestrator.plan",
            &format!("Execution order: {}", plan.ids().join(", ")),
            None,
        );

        // Pre-flight: probe idempotency for the whole plan concurrently
        let already_applied = verify::check_all(plan.tasks(), self.check_workers, self.check_timeout);

        let mut unsatisfied: HashSet<String> = HashSet::new();
        let mut entries = Vec::with_capacity(plan.len());

        for task in plan.into_tasks() {
            let outcome = self.run_task(&task, &already_applied, &unsatisfied);
            if !outcome.is_satisfied() {
                unsatisfied.insert(task.id.clone());
            }
            entries.push(TaskReport {
                id: task.id,
                name: task.name,
                outcome,
                requires_restart: task.requires_restart,
            });
        }

        Ok(Report::from_entries(entries))
    }

    fn run_task(
        &self,
        task: &TaskDefinition,
        already_applied: &HashSet<String>,
        unsatisfied: &HashSet<String>,
    ) -> TaskOutcome {
        if task.dependencies.iter().any(|d| unsatisfied.contains(d)) {
            return TaskOutcome::Skipped(SkipReason::PrerequisiteFailed);
        }
        if already_applied.contains(&task.id) {
            return TaskOutcome::Skipped(SkipReason::AlreadyApplied);
        }

        let (commands, elevate) = match self.task_batch(task) {
            Some(batch) => batch,
            None => {
                // App whose packages are all present: nothing to do
                return TaskOutcome::Skipped(SkipReason::AlreadyApplied);
            }
        };

        let description = if task.description.is_empty() {
            task.name.clone()
        } else {
            format!("{}: {}", task.name, task.description)
        };

        match self.runner.run(&commands, elevate, &description) {
            Ok(outcome) => map_outcome(outcome),
            Err(e) => {
                emit(
                    Level::Error,
                    "orchestrator.task.error",
                    &format!("Task '{}' could not be executed: {e}", task.id),
                    None,
                );
                TaskOutcome::Failed {
                    exit_code: -1,
                    stderr_excerpt: e.to_string(),
                }
            }
        }
    }

    /// The command batch for one task, or `None` when the task's
    /// packages are already installed.
    fn task_batch(&self, task: &TaskDefinition) -> Option<(Vec<CommandStep>, bool)> {
        if task.is_app() {
            let packages = task
                .packages_for(self.backend.key(), Backend::fallback_key())
                .cloned()
                .unwrap_or_default();
            if packages.is_empty() {
                return Some((task.commands.clone(), true));
            }
            // The backend's own database is the idempotency source for
            // plain package installs.
            let missing: Vec<String> = packages
                .into_iter()
                .filter(|p| !self.backend.is_package_installed(p))
                .collect();
            if missing.is_empty() {
                return None;
            }
            // Catalogs can mix an install map with extra setup commands
            let mut commands = vec![self.backend.install_step(&missing)];
            commands.extend(task.commands.iter().cloned());
            Some((commands, self.backend.needs_elevation()))
        } else {
            // Tweaks mutate system state; they always run elevated
            Some((task.commands.clone(), true))
        }
    }
}

fn map_outcome(outcome: BatchOutcome) -> TaskOutcome {
    match outcome.status {
        BatchStatus::Completed => TaskOutcome::Applied,
        BatchStatus::Cancelled(kind) => TaskOutcome::Cancelled(kind),
        BatchStatus::Failed => TaskOutcome::Failed {
            exit_code: outcome.exit_code,
            stderr_excerpt: excerpt(&outcome.output),
        },
    }
}

fn excerpt(output: &str) -> String {
    let trimmed = output.trim_end();
    if trimmed.len() <= EXCERPT_LIMIT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - EXCERPT_LIMIT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// Refresh the backend's package metadata through the runner, mapping
/// backend exit-code quirks onto the uniform outcome shape.
pub fn refresh_cache<R: CommandRunner>(backend: Backend, runner: &R) -> Result<BatchOutcome> {
    let commands = vec![backend.refresh_step()];
    let mut outcome = runner.run(
        &commands,
        backend.needs_elevation(),
        &format!("Refresh {} package metadata", backend.display_name()),
    )?;
    if outcome.status == BatchStatus::Failed && backend.refresh_exit_ok(outcome.exit_code) {
        outcome.status = BatchStatus::Completed;
    }
    Ok(outcome)
}

/// Upgrade every installed package through the runner.
pub fn upgrade_all<R: CommandRunner>(backend: Backend, runner: &R) -> Result<BatchOutcome> {
    let commands = backend.upgrade_steps();
    runner.run(
        &commands,
        backend.needs_elevation(),
        &format!("Upgrade all packages via {}", backend.display_name()),
    )
}
