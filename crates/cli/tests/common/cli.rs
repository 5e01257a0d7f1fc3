//! Helpers for running the `dirwatch` binary
//!
//! One-shot commands run to completion and return their output with
//! timing; `watch` runs in the background and its stdout lines are read
//! through a channel so tests can wait on them with a timeout.

use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// CLI command builder with timing
pub struct DirwatchCommand {
    binary_path: PathBuf,
    working_dir: PathBuf,
    args: Vec<String>,
}

impl DirwatchCommand {
    /// Create a new command in the given working directory
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            binary_path: PathBuf::from(env!("CARGO_BIN_EXE_dirwatch")),
            working_dir: working_dir.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Add command arguments
    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary_path);
        command.args(&self.args).current_dir(&self.working_dir);
        command
    }

    /// Execute command and return result with timing
    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();
        let output = self
            .command()
            .output()
            .context("Failed to execute command")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    /// Execute and assert success
    pub fn assert_success(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if !result.success() {
            anyhow::bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }

        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;

        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }

        Ok(result)
    }

    /// Start the command in the background, reading stdout line by line
    pub fn spawn(&self) -> Result<RunningWatch> {
        let mut child = self
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("Failed to spawn command")?;

        let stdout = child.stdout.take().context("stdout not captured")?;
        let (tx, rx) = unbounded();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(RunningWatch { child, lines: rx })
    }
}

/// Command execution result with timing
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    /// Check if command succeeded
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Check if stdout contains text
    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    /// Check if stderr contains text
    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }
}

/// A `dirwatch watch` process running in the background
pub struct RunningWatch {
    child: Child,
    lines: Receiver<String>,
}

impl RunningWatch {
    /// Wait for the next stdout line
    pub fn next_line(&self, timeout: Duration) -> Result<String> {
        self.lines
            .recv_timeout(timeout)
            .context("No output from dirwatch within timeout")
    }

    /// Wait for the next line that parses as a JSON record of the given type
    pub fn next_record(&self, kind: &str, timeout: Duration) -> Result<serde_json::Value> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = self.next_line(remaining)?;
            let record: serde_json::Value =
                serde_json::from_str(&line).with_context(|| format!("Not JSON: {}", line))?;
            if record["type"] == kind {
                return Ok(record);
            }
        }
    }

    /// Wait for the process to exit on its own
    pub fn wait_exit(&mut self, timeout: Duration) -> Result<i32> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status.code().unwrap_or(-1));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        anyhow::bail!("dirwatch did not exit within {:?}", timeout)
    }
}

impl Drop for RunningWatch {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Macro for convenient command construction
///
/// Usage:
/// ```ignore
/// dirwatch!(dir, "limits").assert_success()?;
/// ```
#[macro_export]
macro_rules! dirwatch {
    ($dir:expr, $($arg:expr),*) => {{
        let mut cmd = $crate::common::cli::DirwatchCommand::new($dir);
        cmd.args(&[$($arg),*]);
        cmd
    }};
}
