//! The Local Adapter (C7): runs commands as direct child processes on the
//! host the engine itself is running on.
//!
//! Grounded on `executor.rs::ProcessExecutor` — same spawn/timeout/stdio-pump
//! structure, generalized from a hardcoded `docker` argv head to an
//! arbitrary [`CommandSpec`].

use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as TokioCommand;

use crate::adapter::{Adapter, EngineEvent, EventSink, OutputLine, TransferOptions};
use crate::command::{CommandSpec, ShellMode, StdioSink, StdioSource};
use crate::error::{ExecError, ExecResult};
use crate::result::ExecutionResult;

/// Executes commands via `tokio::process::Command` on the local host.
pub struct LocalAdapter {
    descriptor: String,
}

impl LocalAdapter {
    /// Create a new local adapter.
    pub fn new() -> Self {
        Self {
            descriptor: "local".to_string(),
        }
    }

    fn build_command(&self, spec: &CommandSpec) -> ExecResult<TokioCommand> {
        let mut cmd = match spec.shell() {
            ShellMode::Disabled => {
                let mut c = TokioCommand::new(&spec.argv()[0]);
                c.args(&spec.argv()[1..]);
                c
            }
            ShellMode::Default => {
                let shell = if cfg!(windows) { "cmd" } else { "sh" };
                let flag = if cfg!(windows) { "/C" } else { "-c" };
                let mut c = TokioCommand::new(shell);
                c.arg(flag).arg(spec.render_shell_string());
                c
            }
            ShellMode::Explicit(path) => {
                let mut c = TokioCommand::new(path);
                c.arg("-c").arg(spec.render_shell_string());
                c
            }
        };

        if let Some(cwd) = spec.cwd() {
            cmd.current_dir(cwd);
        }
        for (k, v) in spec.env() {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        Ok(cmd)
    }
}

impl Default for LocalAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Adapter for LocalAdapter {
    async fn execute(&self, spec: &CommandSpec, events: &EventSink) -> ExecResult<ExecutionResult> {
        let started = Instant::now();
        let mut cmd = self.build_command(spec)?;

        if !spec.is_quiet() {
            events.emit(EngineEvent::Start {
                target: self.descriptor.clone(),
                command: spec.render_shell_string(),
            });
        }

        let mut child = cmd.spawn().map_err(ExecError::from)?;

        let stdin_bytes = match &spec.stdin {
            StdioSource::Bytes(bytes) => Some(bytes.clone()),
            StdioSource::Text(text) => Some(text.clone().into_bytes()),
            StdioSource::None | StdioSource::Piped => None,
        };
        if let Some(bytes) = stdin_bytes {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(&bytes).await;
            }
        }
        drop(child.stdin.take());

        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let target = self.descriptor.clone();
        let events_out = events.clone();
        let quiet = spec.is_quiet();
        let stdout_sink = spec.stdout.clone();
        let stdout_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            let mut buf = Vec::new();
            while let Ok(Some(line)) = reader.next_line().await {
                if !quiet {
                    events_out.emit(EngineEvent::Chunk {
                        target: target.clone(),
                        line: OutputLine::Stdout(line.clone()),
                    });
                }
                match &stdout_sink {
                    StdioSink::LineCallback(callback) => callback(&line),
                    StdioSink::Capture => {
                        buf.extend_from_slice(line.as_bytes());
                        buf.push(b'\n');
                    }
                    StdioSink::Null => {}
                }
            }
            buf
        });

        let target = self.descriptor.clone();
        let events_err = events.clone();
        let stderr_sink = spec.stderr.clone();
        let stderr_task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            let mut buf = Vec::new();
            while let Ok(Some(line)) = reader.next_line().await {
                if !quiet {
                    events_err.emit(EngineEvent::Chunk {
                        target: target.clone(),
                        line: OutputLine::Stderr(line.clone()),
                    });
                }
                match &stderr_sink {
                    StdioSink::LineCallback(callback) => callback(&line),
                    StdioSink::Capture => {
                        buf.extend_from_slice(line.as_bytes());
                        buf.push(b'\n');
                    }
                    StdioSink::Null => {}
                }
            }
            buf
        });

        let wait = async {
            let status = if let Some(timeout) = spec.timeout() {
                match tokio::time::timeout(timeout, child.wait()).await {
                    Ok(status) => status.map_err(ExecError::from)?,
                    Err(_) => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        return Err(ExecError::timeout(
                            started.elapsed(),
                            spec.render_shell_string(),
                        ));
                    }
                }
            } else {
                child.wait().await.map_err(ExecError::from)?
            };
            Ok(status)
        };

        let status = match wait.await {
            Ok(status) => status,
            Err(e) => {
                events.emit(EngineEvent::Error {
                    target: self.descriptor.clone(),
                    message: e.to_string(),
                });
                return Err(e);
            }
        };

        let stdout_buf = stdout_task.await.unwrap_or_default();
        let stderr_buf = stderr_task.await.unwrap_or_default();

        if !spec.is_quiet() {
            events.emit(EngineEvent::Complete {
                target: self.descriptor.clone(),
                success: status.success(),
            });
        }

        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Ok(ExecutionResult {
            stdout: stdout_buf,
            stderr: stderr_buf,
            exit_code: status.code(),
            signal,
            duration: started.elapsed(),
            ok: status.success() || spec.is_nothrow(),
            command: spec.render_shell_string(),
            target: self.descriptor.clone(),
        })
    }

    async fn execute_streaming(
        &self,
        spec: &CommandSpec,
        events: &EventSink,
    ) -> ExecResult<Pin<Box<dyn Stream<Item = OutputLine> + Send>>> {
        let mut cmd = self.build_command(spec)?;
        let mut child = cmd.spawn().map_err(ExecError::from)?;
        drop(child.stdin.take());
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        let target = self.descriptor.clone();
        let events = events.clone();
        tokio::spawn(async move {
            let mut out = BufReader::new(stdout).lines();
            let mut err = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    line = out.next_line() => match line {
                        Ok(Some(l)) => {
                            events.emit(EngineEvent::Chunk { target: target.clone(), line: OutputLine::Stdout(l.clone()) });
                            if tx.send(OutputLine::Stdout(l)).await.is_err() { break; }
                        }
                        _ => {}
                    },
                    line = err.next_line() => match line {
                        Ok(Some(l)) => {
                            events.emit(EngineEvent::Chunk { target: target.clone(), line: OutputLine::Stderr(l.clone()) });
                            if tx.send(OutputLine::Stderr(l)).await.is_err() { break; }
                        }
                        _ => {}
                    },
                    status = child.wait() => {
                        let _ = status;
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    async fn upload(&self, local: &Path, remote: &Path, _opts: TransferOptions) -> ExecResult<()> {
        tokio::fs::copy(local, remote).await.map_err(|e| {
            ExecError::upload_failed(local.display().to_string(), remote.display().to_string(), e.to_string())
        })?;
        Ok(())
    }

    async fn download(&self, remote: &Path, local: &Path, _opts: TransferOptions) -> ExecResult<()> {
        tokio::fs::copy(remote, local).await.map_err(|e| {
            ExecError::download_failed(local.display().to_string(), remote.display().to_string(), e.to_string())
        })?;
        Ok(())
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;
    use crate::engine::EventBus;
    use std::time::Duration;

    #[tokio::test]
    async fn runs_true_and_captures_exit_code() {
        let adapter = LocalAdapter::new();
        let bus = EventBus::new();
        let spec = CommandBuilder::new("true").build().unwrap();
        let result = adapter.execute(&spec, &bus.sink()).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn captures_stdout() {
        let adapter = LocalAdapter::new();
        let bus = EventBus::new();
        let spec = CommandBuilder::new("echo").arg("hello").build().unwrap();
        let result = adapter.execute(&spec, &bus.sink()).await.unwrap();
        assert_eq!(result.text().trim(), "hello");
    }

    #[tokio::test]
    async fn timeout_kills_long_running_command() {
        let adapter = LocalAdapter::new();
        let bus = EventBus::new();
        let spec = CommandBuilder::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let result = adapter.execute(&spec, &bus.sink()).await;
        assert!(matches!(result, Err(ExecError::Timeout { .. })));
    }

    #[tokio::test]
    async fn stdout_line_callback_receives_every_line_and_skips_capture() {
        let adapter = LocalAdapter::new();
        let bus = EventBus::new();
        let lines = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let collected = lines.clone();
        let spec = CommandBuilder::new("printf")
            .arg("one\ntwo\n")
            .stdout_lines(move |line| collected.lock().unwrap().push(line.to_string()))
            .build()
            .unwrap();
        let result = adapter.execute(&spec, &bus.sink()).await.unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["one".to_string(), "two".to_string()]);
        assert!(result.stdout.is_empty());
    }
}
