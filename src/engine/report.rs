//! Per-task outcomes and the aggregated run report.

use serde::Serialize;

pub use super::executor::CancelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyApplied,
    PrerequisiteFailed,
}

/// Final state of one task in a run. Created once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Applied,
    Skipped(SkipReason),
    Failed {
        exit_code: i32,
        stderr_excerpt: String,
    },
    Cancelled(CancelKind),
}

impl TaskOutcome {
    /// True when the task's effect is in place (applied now or before).
    pub fn is_satisfied(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Applied | TaskOutcome::Skipped(SkipReason::AlreadyApplied)
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Applied => "applied",
            TaskOutcome::Skipped(SkipReason::AlreadyApplied) => "skipped",
            TaskOutcome::Skipped(SkipReason::PrerequisiteFailed) => "blocked",
            TaskOutcome::Failed { .. } => "failed",
            TaskOutcome::Cancelled(CancelKind::User) => "cancelled",
            TaskOutcome::Cancelled(CancelKind::Signal) => "interrupted",
        }
    }

    /// Short human-readable message for list rendering.
    pub fn message(&self) -> String {
        match self {
            TaskOutcome::Applied => "applied".to_string(),
            TaskOutcome::Skipped(SkipReason::AlreadyApplied) => {
                "already applied, skipped".to_string()
            }
            TaskOutcome::Skipped(SkipReason::PrerequisiteFailed) => {
                "prerequisite failed, not attempted".to_string()
            }
            TaskOutcome::Failed {
                exit_code,
                stderr_excerpt,
            } => {
                if stderr_excerpt.is_empty() {
                    format!("failed with exit code {exit_code}")
                } else {
                    format!("failed with exit code {exit_code}: {stderr_excerpt}")
                }
            }
            TaskOutcome::Cancelled(CancelKind::User) => "cancelled by user".to_string(),
            TaskOutcome::Cancelled(CancelKind::Signal) => "interrupted by signal".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub id: String,
    pub name: String,
    pub outcome: TaskOutcome,
    pub requires_restart: bool,
}

/// Overall classification of a run, for the caller to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunClassification {
    /// Every task applied or was already applied.
    Success,
    /// Some tasks succeeded, others failed, were cancelled or blocked.
    Partial,
    /// Nothing was applied because execution was cancelled.
    Cancelled,
    /// Tasks were attempted and none succeeded.
    Failed,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub entries: Vec<TaskReport>,
    pub classification: RunClassification,
    /// Whether any applied task wants a reboot to take effect.
    pub restart_required: bool,
}

impl Report {
    pub fn from_entries(entries: Vec<TaskReport>) -> Self {
        let classification = classify(&entries);
        let restart_required = entries
            .iter()
            .any(|e| e.requires_restart && e.outcome == TaskOutcome::Applied);
        Self {
            entries,
            classification,
            restart_required,
        }
    }

    pub fn counts(&self) -> (usize, usize, usize, usize) {
        let mut applied = 0;
        let mut skipped = 0;
        let mut failed = 0;
        let mut cancelled = 0;
        for entry in &self.entries {
            match entry.outcome {
                TaskOutcome::Applied => applied += 1,
                TaskOutcome::Skipped(_) => skipped += 1,
                TaskOutcome::Failed { .. } => failed += 1,
                TaskOutcome::Cancelled(_) => cancelled += 1,
            }
        }
        (applied, skipped, failed, cancelled)
    }
}

fn classify(entries: &[TaskReport]) -> RunClassification {
    let mut applied = 0;
    let mut failed = 0;
    let mut cancelled = 0;
    let mut blocked = 0;
    for entry in entries {
        match entry.outcome {
            TaskOutcome::Applied | TaskOutcome::Skipped(SkipReason::AlreadyApplied) => {
                applied += 1
            }
            TaskOutcome::Skipped(SkipReason::PrerequisiteFailed) => blocked += 1,
            TaskOutcome::Failed { .. } => failed += 1,
            TaskOutcome::Cancelled(_) => cancelled += 1,
        }
    }
    if failed == 0 && cancelled == 0 && blocked == 0 {
        RunClassification::Success
    } else if applied == 0 && failed == 0 && cancelled > 0 {
        RunClassification::Cancelled
    } else if applied == 0 {
        RunClassification::Failed
    } else {
        RunClassification::Partial
    }
}
