//! The Docker Adapter (C9): runs commands inside an existing container via
//! `docker exec`, and moves files via `docker cp`.
//!
//! Grounded on `container.rs`'s `ContainerExecutor` exec surface (not its
//! `ContainerBuilder::run` creation surface — container lifecycle
//! management is intentionally out of scope), reimplemented as subprocess
//! calls through the same [`crate::adapter::local::LocalAdapter`] spawn
//! machinery `executor.rs::ProcessExecutor` uses, so the Docker CLI binary
//! itself is located with `which`, exactly as `find_docker_binary` does.

use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::adapter::local::LocalAdapter;
use crate::adapter::{Adapter, EventSink, OutputLine, TransferOptions};
use crate::command::{CommandBuilder, CommandSpec, ShellMode};
use crate::error::{ExecError, ExecResult};
use crate::result::ExecutionResult;

/// Locates the `docker` binary the way `executor.rs::find_docker_binary`
/// does: `which`, falling back to well-known install paths.
pub fn find_docker_binary() -> ExecResult<PathBuf> {
    if let Ok(path) = which::which("docker") {
        return Ok(path);
    }
    for candidate in ["/usr/bin/docker", "/usr/local/bin/docker", "/opt/homebrew/bin/docker"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            return Ok(path);
        }
    }
    Err(ExecError::config("docker binary not found on PATH"))
}

/// Executes commands inside a named (already-running) Docker container.
pub struct DockerAdapter {
    binary: PathBuf,
    container: String,
    user: Option<String>,
    workdir: Option<String>,
    inner: LocalAdapter,
    descriptor: String,
}

impl DockerAdapter {
    /// Create an adapter targeting `container`, auto-discovering the
    /// `docker` binary.
    pub fn new(container: impl Into<String>) -> ExecResult<Self> {
        let container = container.into();
        Ok(Self {
            binary: find_docker_binary()?,
            descriptor: format!("docker://{container}"),
            container,
            user: None,
            workdir: None,
            inner: LocalAdapter::new(),
        })
    }

    /// Run as a specific user inside the container (`docker exec -u`).
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the working directory inside the container (`docker exec -w`).
    #[must_use]
    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    fn exec_spec(&self, spec: &CommandSpec) -> ExecResult<CommandSpec> {
        let mut builder = CommandBuilder::new(self.binary.to_string_lossy().into_owned())
            .arg("exec");
        if let Some(user) = &self.user {
            builder = builder.option("user", user);
        }
        if let Some(workdir) = &self.workdir {
            builder = builder.option("workdir", workdir);
        }
        for (k, v) in spec.env() {
            builder = builder.option("env", format!("{k}={v}"));
        }
        builder = builder.arg(&self.container);

        match spec.shell() {
            ShellMode::Disabled => {
                builder = builder.args(spec.argv().iter().cloned());
            }
            _ => {
                builder = builder.args(["sh", "-c", &spec.render_shell_string()]);
            }
        }

        if let Some(timeout) = spec.timeout() {
            builder = builder.timeout(timeout);
        }
        if spec.is_nothrow() {
            builder = builder.nothrow();
        }
        builder.build()
    }
}

#[async_trait]
impl Adapter for DockerAdapter {
    async fn execute(&self, spec: &CommandSpec, events: &EventSink) -> ExecResult<ExecutionResult> {
        let exec_spec = self.exec_spec(spec)?;
        let mut result = self.inner.execute(&exec_spec, events).await?;
        result.target = self.descriptor.clone();
        Ok(result)
    }

    async fn execute_streaming(
        &self,
        spec: &CommandSpec,
        events: &EventSink,
    ) -> ExecResult<Pin<Box<dyn Stream<Item = OutputLine> + Send>>> {
        let exec_spec = self.exec_spec(spec)?;
        self.inner.execute_streaming(&exec_spec, events).await
    }

    async fn upload(&self, local: &Path, remote: &Path, _opts: TransferOptions) -> ExecResult<()> {
        let dest = format!("{}:{}", self.container, remote.display());
        let spec = CommandBuilder::new(self.binary.to_string_lossy().into_owned())
            .arg("cp")
            .arg(local.display().to_string())
            .arg(dest)
            .build()?;
        self.inner
            .execute(&spec, &EventSink::new(tokio::sync::broadcast::channel(1).0, std::sync::Arc::new(crate::engine::MaskingPolicy::default())))
            .await
            .map(|_| ())
            .map_err(|e| {
                ExecError::upload_failed(local.display().to_string(), remote.display().to_string(), e.to_string())
            })
    }

    async fn download(&self, remote: &Path, local: &Path, _opts: TransferOptions) -> ExecResult<()> {
        let src = format!("{}:{}", self.container, remote.display());
        let spec = CommandBuilder::new(self.binary.to_string_lossy().into_owned())
            .arg("cp")
            .arg(src)
            .arg(local.display().to_string())
            .build()?;
        self.inner
            .execute(&spec, &EventSink::new(tokio::sync::broadcast::channel(1).0, std::sync::Arc::new(crate::engine::MaskingPolicy::default())))
            .await
            .map(|_| ())
            .map_err(|e| {
                ExecError::download_failed(local.display().to_string(), remote.display().to_string(), e.to_string())
            })
    }

    fn descriptor(&self) -> &str {
        &self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::CommandBuilder;

    #[test]
    fn exec_spec_wraps_argv_with_docker_exec() {
        let adapter = DockerAdapter {
            binary: PathBuf::from("/usr/bin/docker"),
            container: "web".to_string(),
            user: None,
            workdir: None,
            inner: LocalAdapter::new(),
            descriptor: "docker://web".to_string(),
        };
        let spec = CommandBuilder::new("echo").arg("hi").build().unwrap();
        let exec = adapter.exec_spec(&spec).unwrap();
        assert_eq!(
            exec.argv(),
            &["/usr/bin/docker", "exec", "web", "echo", "hi"]
        );
    }

    #[test]
    fn exec_spec_adds_user_and_workdir() {
        let adapter = DockerAdapter {
            binary: PathBuf::from("/usr/bin/docker"),
            container: "web".to_string(),
            user: Some("root".to_string()),
            workdir: Some("/app".to_string()),
            inner: LocalAdapter::new(),
            descriptor: "docker://web".to_string(),
        };
        let spec = CommandBuilder::new("ls").build().unwrap();
        let exec = adapter.exec_spec(&spec).unwrap();
        assert_eq!(
            exec.argv(),
            &[
                "/usr/bin/docker",
                "exec",
                "--user",
                "root",
                "--workdir",
                "/app",
                "web",
                "ls"
            ]
        );
    }
}
