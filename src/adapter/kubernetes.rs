//! The Kubernetes Adapter (C10): runs commands inside a pod via `kubectl
//! exec`, and moves files via `kubectl cp`.
//!
//! Same "wrap an existing CLI" approach as [`crate::adapter::docker`],
//! grounded on the same `executor.rs::ProcessExecutor` subprocess pattern;
//! no API client (no `kube-rs`) is bundled, consistent with shelling out to
//! existing tooling rather than re-implementing it.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command as TokioCommand;

use crate::adapter::local::LocalAdapter;
use crate::adapter::{Adapter, EventSink, OutputLine, TransferOptions};
use crate::command::{CommandBuilder, CommandSpec, ShellMode};
use crate::error::{ExecError, ExecResult};
use crate::result::ExecutionResult;

/// Options controlling [`KubernetesAdapter::logs`].
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Keep streaming new lines as they are written (`-f`).
    pub follow: bool,
    /// Only return the last `n` lines before following.
    pub tail: Option<u32>,
    /// Include a per-line RFC3339 timestamp (`--timestamps`), as produced
    /// by the kubelet's log writer.
    pub timestamps: bool,
}

/// Locates the `kubectl` binary via `which`.
pub fn find_kubectl_binary() -> ExecResult<PathBuf> {
    which::which("kubectl").map_err(|_| ExecError::config("kubectl binary not found on PATH"))
}

/// Executes commands inside a pod (optionally a specific container within
/// a multi-container pod) via `kubectl exec`.
pub struct KubernetesAdapter {
    binary: PathBuf,
    namespace: Option<String>,
    context: Option<String>,
    pod: String,
    container: Option<String>,
    inner: LocalAdapter,
    descriptor: String,
}

impl KubernetesAdapter {
    /// Create an adapter targeting `pod`, auto-discovering `kubectl`.
    pub fn new(pod: impl Into<String>) -> ExecResult<Self> {
        let pod = pod.into();
        Ok(Self {
            binary: find_kubectl_binary()?,
            descriptor: format!("k8s://{pod}"),
            namespace: None,
            context: None,
            pod,
            container: None,
            inner: LocalAdapter::new(),
        })
    }

    /// Set the namespace (`-n`).
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the kubeconfig context (`--context`).
    #[must_use]
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Select a specific container within the pod (`-c`).
    #[must_use]
    pub fn container(mut self, container: impl Into<String>) -> Self {
        self.container = Some(container.into());
        self
    }

    fn base_builder(&self, subcommand: &str) -> CommandBuilder {
        let mut builder =
            CommandBuilder::new(self.binary.to_string_lossy().into_owned()).arg(subcommand);
        if let Some(ns) = &self.namespace {
            builder = builder.option("namespace", ns);
        }
        if let Some(ctx) = &self.context {
            builder = builder.option("context", ctx);
        }
        builder
    }

    fn exec_spec(&self, spec: &CommandSpec) -> ExecResult<CommandSpec> {
        let mut builder = self.base_builder("exec");
        if let Some(container) = &self.container {
            builder = builder.option("container", container);
        }
        builder = builder.arg(&self.pod).arg("--");

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

    /// Stream a pod/container's logs, lazily: the `kubectl logs` child is
    /// not spawned until the returned stream is first polled, and dropping
    /// the stream kills it, cancelling the follow.
    pub async fn logs(
        &self,
        options: LogOptions,
    ) -> ExecResult<Pin<Box<dyn Stream<Item = ExecResult<String>> + Send>>> {
        let mut builder = self.base_builder("logs").arg(&self.pod);
        if let Some(container) = &self.container {
            builder = builder.option("container", container);
        }
        if options.follow {
            builder = builder.flag("follow");
        }
        if options.timestamps {
            builder = builder.flag("timestamps");
        }
        if let Some(tail) = options.tail {
            builder = builder.option("tail", tail.to_string());
        }
        let spec = builder.build()?;

        let mut cmd = TokioCommand::new(&spec.argv()[0]);
        cmd.args(&spec.argv()[1..]);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| ExecError::connection(self.descriptor.clone(), e.to_string()))?;
        let stdout = child.stdout.take().expect("stdout piped");

        let (tx, rx) = tokio::sync::mpsc::channel(256);
        tokio::spawn(async move {
            // Owns `child` so dropping the receiving stream drops `tx`,
            // which ends this task's sends and lets `child` be dropped,
            // killing the follow process.
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if tx.send(Ok(line)).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(ExecError::from(e))).await;
                        break;
                    }
                }
            }
            let _ = child.kill().await;
        });

        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }
}

#[async_trait]
impl Adapter for KubernetesAdapter {
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
        let dest = format!("{}:{}", self.pod, remote.display());
        let mut builder = self
            .base_builder("cp")
            .arg(local.display().to_string())
            .arg(dest);
        if let Some(container) = &self.container {
            builder = builder.option("container", container);
        }
        let spec = builder.build()?;
        self.inner
            .execute(&spec, &EventSink::new(tokio::sync::broadcast::channel(1).0, std::sync::Arc::new(crate::engine::MaskingPolicy::default())))
            .await
            .map(|_| ())
            .map_err(|e| {
                ExecError::upload_failed(local.display().to_string(), remote.display().to_string(), e.to_string())
            })
    }

    async fn download(&self, remote: &Path, local: &Path, _opts: TransferOptions) -> ExecResult<()> {
        let src = format!("{}:{}", self.pod, remote.display());
        let spec = self
            .base_builder("cp")
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

    fn adapter() -> KubernetesAdapter {
        KubernetesAdapter {
            binary: PathBuf::from("/usr/local/bin/kubectl"),
            namespace: Some("default".to_string()),
            context: None,
            pod: "api-0".to_string(),
            container: None,
            inner: LocalAdapter::new(),
            descriptor: "k8s://api-0".to_string(),
        }
    }

    #[test]
    fn exec_spec_wraps_with_kubectl_exec() {
        let spec = CommandBuilder::new("ls").build().unwrap();
        let exec = adapter().exec_spec(&spec).unwrap();
        assert_eq!(
            exec.argv(),
            &[
                "/usr/local/bin/kubectl",
                "exec",
                "--namespace",
                "default",
                "api-0",
                "--",
                "ls"
            ]
        );
    }
}
