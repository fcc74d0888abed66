//! Privileged batch execution with an interactive confirmation contract.
//!
//! The executor owns the terminal for the duration of a batch: commands
//! run with inherited stdin so password prompts and sub-confirmations
//! reach the human, while stdout and stderr are teed through a bounded
//! tail buffer for error reporting. Decline, signal interruption,
//! command failure and success are four distinct outcomes.

use std::io::{self, IsTerminal, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, Stdio};

use anyhow::Result;
use colored::*;
use dialoguer::Confirm;
use nix::sys::signal::{SigHandler, Signal, signal};
use sudo::RunningAs;

use crate::catalog::CommandStep;
use crate::ui::prelude::*;

/// Exit code reported when the user declines a batch. Distinct from zero
/// and from ordinary command failures so callers can tell the three
/// apart.
pub const USER_DECLINED_CODE: i32 = 125;

/// Shells report a child killed by SIGINT as 128 + 2.
const SIGINT_EXIT_CODE: i32 = 130;

/// How much combined output the tail buffer retains per batch.
const DEFAULT_OUTPUT_LIMIT: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    User,
    Signal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Completed,
    Cancelled(CancelKind),
    Failed,
}

/// Final status, exit code of the last-run command, and the bounded
/// combined output of the batch.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub exit_code: i32,
    pub output: String,
}

impl BatchOutcome {
    pub fn declined() -> Self {
        Self {
            status: BatchStatus::Cancelled(CancelKind::User),
            exit_code: USER_DECLINED_CODE,
            output: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, BatchStatus::Completed)
    }
}

/// The seam the orchestrator talks through, substitutable in tests.
pub trait CommandRunner {
    fn run(&self, commands: &[CommandStep], elevate: bool, description: &str)
    -> Result<BatchOutcome>;
}

/// Production runner: confirmation prompt, sudo elevation, live output.
pub struct InteractiveExecutor {
    output_limit: usize,
}

impl Default for InteractiveExecutor {
    fn default() -> Self {
        Self {
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }
}

impl InteractiveExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn present(&self, commands: &[CommandStep], elevate: bool, description: &str) {
        separator();
        println!("{}", description.bold());
        separator();
        println!("\nThe following commands will be executed:\n");
        let prefix = if elevate && !running_as_root() {
            "sudo "
        } else {
            ""
        };
        for (i, step) in commands.iter().enumerate() {
            println!("  {}. {}{}", i + 1, prefix, step.command);
            if let Some(desc) = &step.description {
                println!("     {}", desc.dimmed());
            }
        }
        println!();
    }

    fn confirm(&self, count: usize) -> bool {
        if !io::stdin().is_terminal() {
            emit(
                Level::Warn,
                "executor.confirm.no_terminal",
                "No interactive terminal available, declining execution",
                None,
            );
            return false;
        }
        let prompt = if count == 1 {
            "Run this command?".to_string()
        } else {
            format!("Run these {count} commands?")
        };
        // A closed stream or any non-affirmative answer is a decline.
        Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .unwrap_or(false)
    }

    fn run_step(&self, step: &CommandStep, elevate: bool, tail: &mut Tail) -> io::Result<StepEnd> {
        if let Some(desc) = &step.description {
            println!("{}", format!("-> {desc}").dimmed());
        }
        emit(
            Level::Debug,
            "executor.step.start",
            &format!("Running: {}", step.command),
            None,
        );

        let mut child = shell_invocation(&step.command, elevate).spawn()?;
        if let Some(mut pipe) = child.stdout.take() {
            let mut buf = [0u8; 4096];
            loop {
                match pipe.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let mut out = io::stdout().lock();
                        let _ = out.write_all(&buf[..n]);
                        let _ = out.flush();
                        tail.push(&buf[..n]);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        }
        let status = child.wait()?;

        if let Some(sig) = status.signal() {
            emit(
                Level::Warn,
                "executor.step.signalled",
                &format!("Command terminated by signal {sig}"),
                None,
            );
            return Ok(StepEnd::Signalled);
        }
        let code = status.code().unwrap_or(-1);
        match code {
            0 => Ok(StepEnd::Success),
            // The shell reports an interrupted child as 130
            SIGINT_EXIT_CODE => Ok(StepEnd::Signalled),
            _ => Ok(StepEnd::Failed(code)),
        }
    }
}

enum StepEnd {
    Success,
    Failed(i32),
    Signalled,
}

impl CommandRunner for InteractiveExecutor {
    fn run(
        &self,
        commands: &[CommandStep],
        elevate: bool,
        description: &str,
    ) -> Result<BatchOutcome> {
        self.present(commands, elevate, description);

        if !self.confirm(commands.len()) {
            emit(
                Level::Warn,
                "executor.batch.declined",
                "Execution declined",
                None,
            );
            return Ok(BatchOutcome::declined());
        }

        // Keep the parent alive across Ctrl-C so an interrupt lands in
        // the running command; the child resets the handler on spawn.
        let _guard = SigintGuard::install()?;

        Ok(self.execute_batch(commands, elevate))
    }
}

impl InteractiveExecutor {
    /// Run a confirmed batch to its first failure or interruption.
    fn execute_batch(&self, commands: &[CommandStep], elevate: bool) -> BatchOutcome {
        let mut tail = Tail::new(self.output_limit);
        let mut last_code = 0;
        for step in commands {
            match self.run_step(step, elevate, &mut tail) {
                Ok(StepEnd::Success) => last_code = 0,
                Ok(StepEnd::Failed(code)) => {
                    // First failure halts the remaining commands
                    return BatchOutcome {
                        status: BatchStatus::Failed,
                        exit_code: code,
                        output: tail.into_string(),
                    };
                }
                Ok(StepEnd::Signalled) => {
                    return BatchOutcome {
                        status: BatchStatus::Cancelled(CancelKind::Signal),
                        exit_code: SIGINT_EXIT_CODE,
                        output: tail.into_string(),
                    };
                }
                Err(e) => {
                    emit(
                        Level::Error,
                        "executor.step.spawn_failed",
                        &format!("Failed to run '{}': {e}", step.command),
                        None,
                    );
                    return BatchOutcome {
                        status: BatchStatus::Failed,
                        exit_code: -1,
                        output: tail.into_string(),
                    };
                }
            }
        }

        BatchOutcome {
            status: BatchStatus::Completed,
            exit_code: last_code,
            output: tail.into_string(),
        }
    }
}

fn running_as_root() -> bool {
    matches!(sudo::check(), RunningAs::Root)
}

/// Build the `sh -c` invocation for one command, optionally under sudo.
/// Stderr is merged into the captured stream inside the shell so the
/// tail buffer sees everything the user saw.
fn shell_invocation(command: &str, elevate: bool) -> Command {
    let script = format!("exec 2>&1; {command}");
    let mut invocation = if elevate && !running_as_root() {
        let mut c = Command::new("sudo");
        c.arg("sh").arg("-c").arg(script);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(script);
        c
    };
    invocation
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit());
    unsafe {
        invocation.pre_exec(|| {
            // async-signal-safe: signal(2) only
            unsafe { signal(Signal::SIGINT, SigHandler::SigDfl) }
                .map(|_| ())
                .map_err(|e| io::Error::from_raw_os_error(e as i32))
        });
    }
    invocation
}

/// Ignores SIGINT in this process for its lifetime, restoring the
/// previous disposition on drop.
struct SigintGuard {
    previous: SigHandler,
}

impl SigintGuard {
    fn install() -> Result<Self> {
        let previous = unsafe { signal(Signal::SIGINT, SigHandler::SigIgn) }?;
        Ok(Self { previous })
    }
}

impl Drop for SigintGuard {
    fn drop(&mut self) {
        let _ = unsafe { signal(Signal::SIGINT, self.previous) };
    }
}

/// Bounded byte buffer keeping the most recent output.
struct Tail {
    limit: usize,
    buf: Vec<u8>,
}

impl Tail {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            buf: Vec::new(),
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() > self.limit * 2 {
            let start = self.buf.len() - self.limit;
            self.buf.drain(..start);
        }
    }

    fn into_string(&self) -> String {
        let slice = if self.buf.len() > self.limit {
            &self.buf[self.buf.len() - self.limit..]
        } else {
            &self.buf[..]
        };
        String::from_utf8_lossy(slice).into_owned()
    }
}
