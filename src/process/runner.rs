//! Process execution abstraction for testability.
//!
//! This module provides a trait-based abstraction over external command
//! execution (adb, fastboot), allowing the whole pool manager to depend on
//! a single narrow contract instead of reaching for `tokio::process::Command`
//! directly. Production code uses [`TokioProcessRunner`]; tests inject
//! [`mock::MockProcessRunner`].

use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Outcome of a single subprocess invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    TimedOut,
    Exception,
}

/// Full result of running a command through a [`ProcessRunner`].
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub status: RunStatus,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// Trait for executing external commands with a bounded timeout.
///
/// Every adb/fastboot invocation in this crate goes through this contract;
/// no module is permitted to call `tokio::process::Command` directly.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Runs `program args...`, waiting up to `timeout` for completion.
    async fn run(&self, program: &Path, args: &[&str], timeout: Duration) -> CommandOutcome;

    /// Spawns a long-running command (e.g. `logcat`), returning its PID
    /// immediately without waiting for completion.
    async fn spawn(&self, program: &Path, args: &[&str]) -> anyhow::Result<u32>;

    /// Sleeps for `d`, used by the recovery pipeline's settle delays; kept
    /// on the trait so tests can make time-dependent paths deterministic.
    async fn sleep(&self, d: Duration);
}

/// The real [`ProcessRunner`], backed by `tokio::process::Command`.
#[derive(Clone, Default)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, program: &Path, args: &[&str], budget: Duration) -> CommandOutcome {
        let args_vec: Vec<_> = args.iter().map(OsStr::new).collect();

        if std::env::var("RUST_LOG").unwrap_or_default().contains("debug") {
            log::debug!(
                "executing: {} {}",
                program.display(),
                args.join(" ")
            );
        }

        let child = Command::new(program).args(&args_vec).output();

        match timeout(budget, child).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                let status = if output.status.success() {
                    RunStatus::Success
                } else {
                    RunStatus::Failed
                };
                CommandOutcome {
                    status,
                    stdout,
                    stderr,
                    exit_code: output.status.code(),
                }
            }
            Ok(Err(e)) => CommandOutcome {
                status: RunStatus::Exception,
                stdout: String::new(),
                stderr: e.to_string(),
                exit_code: None,
            },
            Err(_) => CommandOutcome {
                status: RunStatus::TimedOut,
                stdout: String::new(),
                stderr: format!("command timed out after {budget:?}"),
                exit_code: None,
            },
        }
    }

    async fn spawn(&self, program: &Path, args: &[&str]) -> anyhow::Result<u32> {
        let child = Command::new(program)
            .args(args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .stdin(std::process::Stdio::null())
            .spawn()?;
        Ok(child.id().unwrap_or(0))
    }

    async fn sleep(&self, d: Duration) {
        tokio::time::sleep(d).await;
    }
}

pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Hand-rolled mock [`ProcessRunner`] matching the predecessor's
    /// `utils/command_executor.rs::mock` pattern: canned responses keyed by
    /// `"<program> <args...>"`, with call-history recording for assertions.
    pub struct MockProcessRunner {
        responses: Mutex<HashMap<String, CommandOutcome>>,
        call_history: Mutex<Vec<(String, Vec<String>)>>,
        sleeps_elided: bool,
    }

    impl Default for MockProcessRunner {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockProcessRunner {
        pub fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                call_history: Mutex::new(Vec::new()),
                sleeps_elided: true,
            }
        }

        /// Real-time sleeps, for tests that assert on wall-clock ordering.
        pub fn with_real_sleeps(mut self) -> Self {
            self.sleeps_elided = false;
            self
        }

        fn key(program: &Path, args: &[&str]) -> String {
            format!("{} {}", program.display(), args.join(" "))
        }

        pub fn with_success(self, program: &str, args: &[&str], stdout: &str) -> Self {
            self.with_outcome(
                program,
                args,
                CommandOutcome {
                    status: RunStatus::Success,
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    exit_code: Some(0),
                },
            )
        }

        pub fn with_failure(self, program: &str, args: &[&str], stderr: &str) -> Self {
            self.with_outcome(
                program,
                args,
                CommandOutcome {
                    status: RunStatus::Failed,
                    stdout: String::new(),
                    stderr: stderr.to_string(),
                    exit_code: Some(1),
                },
            )
        }

        pub fn with_timeout(self, program: &str, args: &[&str]) -> Self {
            self.with_outcome(
                program,
                args,
                CommandOutcome {
                    status: RunStatus::TimedOut,
                    stdout: String::new(),
                    stderr: "timed out".to_string(),
                    exit_code: None,
                },
            )
        }

        pub fn with_exception(self, program: &str, args: &[&str], message: &str) -> Self {
            self.with_outcome(
                program,
                args,
                CommandOutcome {
                    status: RunStatus::Exception,
                    stdout: String::new(),
                    stderr: message.to_string(),
                    exit_code: None,
                },
            )
        }

        fn with_outcome(self, program: &str, args: &[&str], outcome: CommandOutcome) -> Self {
            let key = format!("{program} {}", args.join(" "));
            self.responses.lock().unwrap().insert(key, outcome);
            self
        }

        pub fn call_history(&self) -> Vec<(String, Vec<String>)> {
            self.call_history.lock().unwrap().clone()
        }

        pub fn call_count(&self, program: &str) -> usize {
            self.call_history
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == program)
                .count()
        }
    }

    #[async_trait]
    impl ProcessRunner for MockProcessRunner {
        async fn run(&self, program: &Path, args: &[&str], _budget: Duration) -> CommandOutcome {
            let key = Self::key(program, args);
            self.call_history.lock().unwrap().push((
                program.display().to_string(),
                args.iter().map(|s| s.to_string()).collect(),
            ));

            self.responses.lock().unwrap().get(&key).cloned().unwrap_or(CommandOutcome {
                status: RunStatus::Failed,
                stdout: String::new(),
                stderr: format!("no mock response configured for: {key}"),
                exit_code: Some(1),
            })
        }

        async fn spawn(&self, program: &Path, args: &[&str]) -> anyhow::Result<u32> {
            self.call_history.lock().unwrap().push((
                program.display().to_string(),
                args.iter().map(|s| s.to_string()).collect(),
            ));
            Ok(4242)
        }

        async fn sleep(&self, d: Duration) {
            if !self.sleeps_elided {
                tokio::time::sleep(d).await;
            }
        }
    }

}
