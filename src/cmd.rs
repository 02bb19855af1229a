//! Subprocess execution
//!
//! Every Grid Engine CLI call (`qstat`, `qhost`, `qconf`, `qmod`, `qdel`) and
//! every `pipe` CLI call goes through this one abstraction, grounded on the
//! original's `CmdExecutor` class. Production code shells out via
//! `std::process::Command`; tests inject a [`FakeCmdExecutor`] instead of
//! spawning real processes.
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::Error;

/// Runs shell commands and reports their output or failure
#[async_trait]
pub trait CmdExecutor: Send + Sync {
    /// Run `command` in a shell, returning its stdout
    ///
    /// A non-zero exit is reported as [`Error::Execution`]; a failure to even
    /// launch the process is reported as [`Error::Io`].
    async fn execute(&self, command: &str) -> Result<String, Error>;

    /// Run `command` and split its stdout into non-empty, trimmed lines
    async fn execute_to_lines(&self, command: &str) -> Result<Vec<String>, Error> {
        let output = self.execute(command).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

/// The production [`CmdExecutor`], backed by `/bin/sh -c`
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellCmdExecutor;

#[async_trait]
impl CmdExecutor for ShellCmdExecutor {
    #[instrument(name = "cmd.execute", skip(self), fields(command = %command))]
    async fn execute(&self, command: &str) -> Result<String, Error> {
        debug!("executing command");
        let owned = command.to_string();
        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new("sh").arg("-c").arg(&owned).output()
        })
        .await??;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(%stderr, status = ?output.status.code(), "command execution failed");
            return Err(Error::Execution {
                command: command.to_string(),
                status: output.status.code(),
                stderr,
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[cfg(any(test, feature = "test-utilities"))]
pub mod fake {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// A scripted response for one [`FakeCmdExecutor`] call
    #[derive(Debug, Clone)]
    pub enum Scripted {
        Ok(String),
        Err(Error),
    }

    /// A [`CmdExecutor`] that returns pre-scripted responses in order and
    /// records every command it was asked to run
    #[derive(Default)]
    pub struct FakeCmdExecutor {
        responses: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeCmdExecutor {
        pub fn new() -> Self {
            FakeCmdExecutor {
                responses: Mutex::new(VecDeque::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn push_ok<T: Into<String>>(&self, output: T) {
            self.responses.lock().unwrap().push_back(Scripted::Ok(output.into()));
        }

        pub fn push_err(&self, error: Error) {
            self.responses.lock().unwrap().push_back(Scripted::Err(error));
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CmdExecutor for FakeCmdExecutor {
        async fn execute(&self, command: &str) -> Result<String, Error> {
            self.calls.lock().unwrap().push(command.to_string());
            match self.responses.lock().unwrap().pop_front() {
                Some(Scripted::Ok(output)) => Ok(output),
                Some(Scripted::Err(error)) => Err(error),
                None => Ok(String::new()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeCmdExecutor;
    use super::*;

    #[tokio::test]
    async fn execute_to_lines_drops_blank_lines() {
        let fake = FakeCmdExecutor::new();
        fake.push_ok("one\n\n  two  \nthree\n");
        let lines = fake.execute_to_lines("anything").await.unwrap();
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(fake.calls(), vec!["anything"]);
    }

    #[tokio::test]
    async fn execution_error_propagates() {
        let fake = FakeCmdExecutor::new();
        fake.push_err(Error::Execution {
            command: "qdel 1".to_string(),
            status: Some(1),
            stderr: "no such job".to_string(),
        });
        let result = fake.execute("qdel 1").await;
        assert!(matches!(result, Err(Error::Execution { .. })));
    }
}
