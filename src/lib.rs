//! # rexec
//!
//! A universal command execution engine: build a command once and run it
//! against the local host, a remote host over SSH, a running Docker
//! container, or a Kubernetes pod, through the same typed API.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use rexec::{Engine, EngineConfig};
//! use rexec::adapter::local::LocalAdapter;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), rexec::ExecError> {
//!     let engine = Engine::new(EngineConfig::default());
//!     engine.register("local", Arc::new(LocalAdapter::new()));
//!
//!     let handle = engine.handle("local", engine.command("echo").arg("hello"))?;
//!     let result = handle.start().await?;
//!     println!("{}", result.text());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`quote`] - typed command-line interpolation and POSIX quoting (C1)
//! - [`command`] - the immutable [`command::CommandSpec`] model and its
//!   [`command::CommandBuilder`] (C2)
//! - [`result`] - [`result::ExecutionResult`], the captured outcome of a run (C3)
//! - [`error`] - the unified [`error::ExecError`] taxonomy
//! - [`handle`] - [`handle::Handle`], the deferred/awaitable execution unit (C4)
//! - [`engine`] - [`engine::Engine`], the adapter registry and event bus (C5)
//! - [`adapter`] - the [`adapter::Adapter`] trait and its local/SSH/Docker/Kubernetes
//!   implementations (C6-C10)
//! - [`forward`] - SSH port forwarding: local, remote, and SOCKS5 dynamic tunnels (C13)
//! - [`concurrency`] - parallel map, batching, retry, and process piping helpers (C11)
//! - [`secrets`] - the encrypted credential store and password utilities (C12)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod adapter;
pub mod command;
pub mod concurrency;
pub mod engine;
pub mod error;
pub mod forward;
pub mod handle;
pub mod quote;
pub mod result;

#[cfg(feature = "secrets")]
pub mod secrets;

pub use adapter::{Adapter, EngineEvent, OutputLine, TransferOptions};
pub use command::{CachePolicy, CommandBuilder, CommandSpec, RetryPolicy, ShellMode};
pub use engine::{default_engine, Engine, EngineConfig, MaskingPolicy, RuntimePreferences};
pub use error::{ExecError, ExecResult};
pub use handle::{CancelToken, Handle};
pub use quote::{canonical_json, Fragment, Interpolate, Json, Raw, Template};
pub use result::ExecutionResult;

#[cfg(feature = "docker")]
pub use adapter::docker::DockerAdapter;
#[cfg(feature = "kubernetes")]
pub use adapter::kubernetes::KubernetesAdapter;
#[cfg(feature = "ssh")]
pub use adapter::ssh::{SshAdapter, SshAuth, SshHost, SshTarget, SudoConfig};

pub use forward::{LocalForward, RemoteForward, ReconnectPolicy, SocksAuth, SocksForward, TunnelHandle, TunnelState};

/// The version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default timeout applied to a command when neither the caller nor the
/// engine's [`EngineConfig`] set one explicitly.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_timeout_constant() {
        assert!(DEFAULT_TIMEOUT > std::time::Duration::from_secs(0));
    }
}
