//! The Result Model (C3): what a completed command produced.
//!
//! Grounded on `executor.rs::CommandOutput` (exit code, stdout/stderr
//! capture, `combined_output()`), generalized with duration and target
//! metadata.

use std::time::Duration;

use crate::error::{ExecError, ExecResult};

/// The outcome of one completed command.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Captured standard output, if the command's stdout sink was
    /// [`crate::command::StdioSink::Capture`].
    pub stdout: Vec<u8>,
    /// Captured standard error.
    pub stderr: Vec<u8>,
    /// Process exit code. `None` if the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// The signal that terminated the process, if it did not exit normally.
    pub signal: Option<i32>,
    /// Total wall-clock duration of the command.
    pub duration: Duration,
    /// `true` if the process exited zero, or the command was built with
    /// `.nothrow()` (in which case a non-zero `exit_code` is still visible
    /// here rather than surfacing as an error).
    pub ok: bool,
    /// The rendered, masked command string, for logging/debugging.
    pub command: String,
    /// A human-readable identifier of the target the command ran against
    /// (e.g. `"local"`, `"ssh://db-1"`, `"docker://web"`).
    pub target: String,
}

impl ExecutionResult {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout decoded as UTF-8 (lossily).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout decoded and parsed as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> ExecResult<T> {
        serde_json::from_slice(&self.stdout).map_err(|e| ExecError::serialization(e.to_string()))
    }

    /// Stdout split into lines (stripped of trailing newline characters).
    pub fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }

    /// The raw captured stdout buffer (binary-safe, unlike [`Self::text`]).
    pub fn buffer(&self) -> &[u8] {
        &self.stdout
    }

    /// The rendered, masked command string this result came from.
    pub fn render(&self) -> &str {
        &self.command
    }

    /// Combined stdout + stderr, in capture order, as a UTF-8 string.
    pub fn combined_text(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.extend_from_slice(&self.stderr);
        String::from_utf8_lossy(&combined).into_owned()
    }

    /// Convert to a `Result` that errors if the command did not exit 0.
    /// This is the check the engine applies automatically unless the
    /// command was built with `.nothrow()`.
    pub fn ok(self) -> ExecResult<Self> {
        match self.exit_code {
            Some(0) => Ok(self),
            Some(code) => Err(ExecError::command(
                code,
                truncate(&String::from_utf8_lossy(&self.stderr), 2048),
            )),
            None => Err(ExecError::cancelled("process terminated by signal")),
        }
    }

    /// Apply `mask` to every piece of captured/rendered text this result
    /// carries, so a masked literal can never leak through `stdout`,
    /// `stderr`, or the rendered `command` string (spec testable property:
    /// a masked literal never appears in captured output).
    pub fn masked(mut self, mask: impl Fn(&[u8]) -> Vec<u8>) -> Self {
        self.stdout = mask(&self.stdout);
        self.stderr = mask(&self.stderr);
        self.command = String::from_utf8(mask(self.command.as_bytes()))
            .unwrap_or_else(|_| self.command.clone());
        self
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}... (truncated)", &s[..max])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: Option<i32>, stdout: &str, stderr: &str) -> ExecutionResult {
        ExecutionResult {
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
            exit_code,
            signal: None,
            duration: Duration::from_millis(5),
            ok: exit_code == Some(0),
            command: "echo".to_string(),
            target: "local".to_string(),
        }
    }

    #[test]
    fn masked_redacts_stdout_stderr_and_command() {
        let mut r = result(Some(0), "secret=hunter2", "hunter2 leaked");
        r.command = "echo hunter2".to_string();
        let masked = r.masked(|b| {
            String::from_utf8_lossy(b)
                .replace("hunter2", "***MASKED***")
                .into_bytes()
        });
        assert!(!masked.text().contains("hunter2"));
        assert!(!String::from_utf8_lossy(&masked.stderr).contains("hunter2"));
        assert!(!masked.render().contains("hunter2"));
    }

    #[test]
    fn success_checks_exit_code_zero() {
        assert!(result(Some(0), "", "").success());
        assert!(!result(Some(1), "", "").success());
        assert!(!result(None, "", "").success());
    }

    #[test]
    fn ok_converts_nonzero_to_command_error() {
        let err = result(Some(2), "", "boom").ok().unwrap_err();
        assert_eq!(err.category(), "command");
    }

    #[test]
    fn lines_splits_on_newlines() {
        let r = result(Some(0), "a\nb\nc", "");
        assert_eq!(r.lines(), vec!["a", "b", "c"]);
    }

    #[test]
    fn json_parses_stdout() {
        let r = result(Some(0), r#"{"a":1}"#, "");
        let v: serde_json::Value = r.json().unwrap();
        assert_eq!(v["a"], 1);
    }
}
