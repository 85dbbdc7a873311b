//! The Adapter Contract (C6): one trait implemented by every execution
//! target (local, SSH, Docker, Kubernetes).
//!
//! Grounded on `other_examples/2e070de1_adolago-rustible__src-connection-mod.rs.rs`'s
//! `Connection` trait (`async_trait`, execute/upload/download-shaped
//! methods, a `ConnectionType` enum for dispatch), generalized with a
//! dedicated streaming entry point the source trait lacked.

pub mod docker;
pub mod kubernetes;
pub mod local;
pub mod ssh;

use std::path::Path;
use std::pin::Pin;

use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast;

use crate::command::CommandSpec;
use crate::engine::MaskingPolicy;
use crate::error::ExecResult;
use crate::result::ExecutionResult;

/// One line of output from a streaming command, tagged by which stream it
/// came from.
#[derive(Debug, Clone)]
pub enum OutputLine {
    /// A line from standard output.
    Stdout(String),
    /// A line from standard error.
    Stderr(String),
}

/// Options controlling a file transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Preserve file mode bits on the destination.
    pub preserve_mode: bool,
    /// Overwrite an existing destination file.
    pub overwrite: bool,
}

/// Events an adapter reports while executing a command, consumed via
/// [`EventSink`]. Mirrors `events.rs::EventManager`'s Docker-event stream
/// but generalized to any adapter's command lifecycle instead of daemon
/// events specifically.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A command has started.
    Start {
        /// Target descriptor string (e.g. `"ssh://db-1"`).
        target: String,
        /// Rendered argv/shell string, for logging.
        command: String,
    },
    /// One line of output arrived.
    Chunk {
        /// Target descriptor string.
        target: String,
        /// The output line.
        line: OutputLine,
    },
    /// A command completed (successfully or not).
    Complete {
        /// Target descriptor string.
        target: String,
        /// Whether the process exited zero.
        success: bool,
    },
    /// A command failed before or during execution.
    Error {
        /// Target descriptor string.
        target: String,
        /// Error message (never the raw error, to avoid leaking secrets
        /// through `Debug`/`Display` impls that embed raw env/args).
        message: String,
    },
}

/// A cheap-to-clone handle for publishing [`EngineEvent`]s, held by every
/// adapter and by [`crate::handle::Handle`].
///
/// Carries the engine's [`MaskingPolicy`] so that every event it publishes,
/// and every completed [`ExecutionResult`]/error that passes back through
/// the handle that owns it, has secrets redacted before it is observable
/// outside the engine (spec: masking applies to all persisted/emitted text).
#[derive(Clone)]
pub struct EventSink {
    sender: broadcast::Sender<EngineEvent>,
    masking: Arc<MaskingPolicy>,
}

impl EventSink {
    pub(crate) fn new(sender: broadcast::Sender<EngineEvent>, masking: Arc<MaskingPolicy>) -> Self {
        Self { sender, masking }
    }

    /// Publish an event, masking every text field it carries first.
    /// Silently drops it if there are no subscribers.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(self.mask_event(event));
    }

    /// Redact every registered pattern in `text`.
    pub fn mask(&self, text: &str) -> String {
        self.masking.apply(text)
    }

    /// Redact every registered pattern in a byte buffer (used for binary-safe
    /// stdout/stderr masking on a completed [`ExecutionResult`]).
    pub fn mask_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        self.masking.apply_bytes(bytes)
    }

    /// The masking policy this sink applies.
    pub fn policy(&self) -> &MaskingPolicy {
        &self.masking
    }

    fn mask_event(&self, event: EngineEvent) -> EngineEvent {
        match event {
            EngineEvent::Start { target, command } => EngineEvent::Start {
                target,
                command: self.mask(&command),
            },
            EngineEvent::Chunk { target, line } => EngineEvent::Chunk {
                target,
                line: match line {
                    OutputLine::Stdout(s) => OutputLine::Stdout(self.mask(&s)),
                    OutputLine::Stderr(s) => OutputLine::Stderr(self.mask(&s)),
                },
            },
            EngineEvent::Complete { target, success } => EngineEvent::Complete { target, success },
            EngineEvent::Error { target, message } => EngineEvent::Error {
                target,
                message: self.mask(&message),
            },
        }
    }
}

/// The contract every execution target implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Run `spec` to completion and return its captured result.
    async fn execute(&self, spec: &CommandSpec, events: &EventSink) -> ExecResult<ExecutionResult>;

    /// Run `spec`, returning a stream of output lines as they arrive. The
    /// stream's completion carries no value; callers that need the exit
    /// code should also call [`Adapter::execute`] or inspect the final
    /// `EngineEvent::Complete`.
    async fn execute_streaming(
        &self,
        spec: &CommandSpec,
        events: &EventSink,
    ) -> ExecResult<Pin<Box<dyn Stream<Item = OutputLine> + Send>>>;

    /// Upload a local file to `remote` on this target.
    async fn upload(&self, local: &Path, remote: &Path, opts: TransferOptions) -> ExecResult<()>;

    /// Download `remote` on this target to a local file.
    async fn download(&self, remote: &Path, local: &Path, opts: TransferOptions) -> ExecResult<()>;

    /// A short, human-readable identifier for this target, used in result
    /// metadata and event tags.
    fn descriptor(&self) -> &str;
}
