//! Unified error taxonomy for the execution engine.
//!
//! Every adapter and subsystem maps its own failures into [`ExecError`]
//! before returning to the caller, so callers never need to match on
//! transport-specific error types.

use std::fmt;
use std::time::Duration;

/// The result type used throughout the crate.
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors produced by the execution engine and its adapters.
///
/// `Clone`-able so that every variant (not just a flattened `State`) survives
/// a trip through a single-flight cache slot or a shared [`crate::handle::Handle`]
/// result cell: concurrent callers observing the same outcome must see the
/// same [`ExecError::category`], e.g. a cached `Timeout` must still reject as
/// `Timeout`, not as `State`.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ExecError {
    /// A command ran to completion but the caller did not opt into
    /// `nothrow` and the process exited non-zero.
    #[error("command failed with exit code {exit_code}: {message}")]
    Command {
        /// Process exit code, if the process actually exited (vs. was killed by a signal).
        exit_code: i32,
        /// Human-readable context (command, target, truncated stderr).
        message: String,
    },

    /// A command did not finish within its configured timeout.
    #[error("command timed out after {elapsed:?}: {message}")]
    Timeout {
        /// How long the command ran before being killed.
        elapsed: Duration,
        /// Context for the timed-out command.
        message: String,
    },

    /// A command or wait was cancelled before completion.
    #[error("command cancelled: {message}")]
    Cancelled {
        /// Context for the cancellation.
        message: String,
    },

    /// A value could not be interpolated or a result could not be parsed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed to serialize/deserialize.
        message: String,
    },

    /// A builder method was called after the handle had already started, or
    /// an operation was attempted in the wrong lifecycle state.
    #[error("invalid state: {message}")]
    State {
        /// Description of the state violation.
        message: String,
    },

    /// Authentication to a remote target failed.
    #[error("authentication failed for {target}: {message}")]
    Auth {
        /// The target descriptor (host, alias) the auth attempt was for.
        target: String,
        /// Underlying reason (rejected key, bad password, etc).
        message: String,
    },

    /// A transport-level connection could not be established or was lost.
    #[error("connection error to {target}: {message}")]
    Connection {
        /// The target descriptor the connection was for.
        target: String,
        /// Underlying reason.
        message: String,
    },

    /// A connection pool could not hand out a connection within its
    /// acquisition timeout.
    #[error("pool exhausted for {target} after {waited:?}")]
    PoolExhausted {
        /// The pool's target fingerprint.
        target: String,
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// A jump-host chain failed at a specific hop.
    #[error("hop {hop_index} ({hop}) failed: {message}")]
    Hop {
        /// Index of the failing hop in the chain (0-based).
        hop_index: usize,
        /// Descriptor of the failing hop.
        hop: String,
        /// Underlying reason.
        message: String,
    },

    /// The requested target (container, pod, alias) does not exist.
    #[error("target not found: {target}")]
    TargetNotFound {
        /// The identifier that could not be resolved.
        target: String,
    },

    /// A file upload/download failed.
    #[error("transfer failed ({direction}) {local} <-> {remote}: {message}")]
    Transfer {
        /// `"upload"` or `"download"`.
        direction: &'static str,
        /// Local-side path.
        local: String,
        /// Remote-side path.
        remote: String,
        /// Underlying reason.
        message: String,
    },

    /// An operation was attempted on a disposed resource (secret store,
    /// forwarded tunnel, pooled connection).
    #[error("resource disposed: {message}")]
    Disposed {
        /// Description of which resource and why it matters here.
        message: String,
    },

    /// Configuration was invalid (bad builder invariant, malformed target
    /// descriptor, conflicting options).
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the violated invariant.
        message: String,
    },

    /// An I/O error from the standard library or tokio, captured as text
    /// (rather than the underlying `std::io::Error`/`serde_json::Error`, so
    /// the whole enum stays `Clone` for cache/handle sharing).
    #[error("io error: {0}")]
    Io(String),

    /// A JSON (de)serialization error, captured as text for the same reason.
    #[error("json error: {0}")]
    Json(String),
}

impl From<std::io::Error> for ExecError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for ExecError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

impl ExecError {
    /// Construct a [`ExecError::Command`] variant.
    pub fn command(exit_code: i32, message: impl Into<String>) -> Self {
        Self::Command {
            exit_code,
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::Timeout`] variant.
    pub fn timeout(elapsed: Duration, message: impl Into<String>) -> Self {
        Self::Timeout {
            elapsed,
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::Cancelled`] variant.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::Serialization`] variant.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::State`] variant.
    pub fn state(message: impl Into<String>) -> Self {
        Self::State {
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::Auth`] variant.
    pub fn auth(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::Connection`] variant.
    pub fn connection(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::PoolExhausted`] variant.
    pub fn pool_exhausted(target: impl Into<String>, waited: Duration) -> Self {
        Self::PoolExhausted {
            target: target.into(),
            waited,
        }
    }

    /// Construct a [`ExecError::Hop`] variant.
    pub fn hop(hop_index: usize, hop: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hop {
            hop_index,
            hop: hop.into(),
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::TargetNotFound`] variant.
    pub fn target_not_found(target: impl Into<String>) -> Self {
        Self::TargetNotFound {
            target: target.into(),
        }
    }

    /// Construct a [`ExecError::Transfer`] variant for an upload.
    pub fn upload_failed(
        local: impl Into<String>,
        remote: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transfer {
            direction: "upload",
            local: local.into(),
            remote: remote.into(),
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::Transfer`] variant for a download.
    pub fn download_failed(
        local: impl Into<String>,
        remote: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Transfer {
            direction: "download",
            local: local.into(),
            remote: remote.into(),
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::Disposed`] variant.
    pub fn disposed(message: impl Into<String>) -> Self {
        Self::Disposed {
            message: message.into(),
        }
    }

    /// Construct a [`ExecError::Config`] variant.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// A short, stable category tag, useful for metrics and log fields.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled { .. } => "cancelled",
            Self::Serialization { .. } => "serialization",
            Self::State { .. } => "state",
            Self::Auth { .. } => "auth",
            Self::Connection { .. } => "connection",
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::Hop { .. } => "hop",
            Self::TargetNotFound { .. } => "target_not_found",
            Self::Transfer { .. } => "transfer",
            Self::Disposed { .. } => "disposed",
            Self::Config { .. } => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Whether retrying the same operation has a reasonable chance of
    /// succeeding. Used as the default predicate for [`crate::concurrency::retry`].
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Connection { .. }
                | Self::PoolExhausted { .. }
                | Self::Io(_)
        )
    }

    /// Run every human-readable text field of this error through `mask`,
    /// preserving its variant and non-text fields. Used so that masked
    /// secrets never leak through an error message (spec: masking applies to
    /// all persisted/emitted text including error messages).
    pub fn masked(self, mask: impl Fn(&str) -> String) -> Self {
        match self {
            Self::Command { exit_code, message } => Self::Command {
                exit_code,
                message: mask(&message),
            },
            Self::Timeout { elapsed, message } => Self::Timeout {
                elapsed,
                message: mask(&message),
            },
            Self::Cancelled { message } => Self::Cancelled {
                message: mask(&message),
            },
            Self::Serialization { message } => Self::Serialization {
                message: mask(&message),
            },
            Self::State { message } => Self::State {
                message: mask(&message),
            },
            Self::Auth { target, message } => Self::Auth {
                target,
                message: mask(&message),
            },
            Self::Connection { target, message } => Self::Connection {
                target,
                message: mask(&message),
            },
            Self::Hop {
                hop_index,
                hop,
                message,
            } => Self::Hop {
                hop_index,
                hop,
                message: mask(&message),
            },
            Self::Transfer {
                direction,
                local,
                remote,
                message,
            } => Self::Transfer {
                direction,
                local,
                remote,
                message: mask(&message),
            },
            Self::Disposed { message } => Self::Disposed {
                message: mask(&message),
            },
            Self::Config { message } => Self::Config {
                message: mask(&message),
            },
            Self::Io(message) => Self::Io(mask(&message)),
            Self::Json(message) => Self::Json(mask(&message)),
            other @ (Self::PoolExhausted { .. } | Self::TargetNotFound { .. }) => other,
        }
    }
}

/// Lightweight context that adapters attach while propagating an error up
/// through a hop chain or a pooled connection.
#[derive(Debug, Default, Clone)]
pub struct ErrorContext {
    /// Target descriptor the error occurred against, if known.
    pub target: Option<String>,
    /// Additional free-form key/value context.
    pub additional: Vec<(String, String)>,
}

impl ErrorContext {
    /// Start building context for a given target.
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            additional: Vec::new(),
        }
    }

    /// Attach a free-form key/value pair.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(target) = &self.target {
            write!(f, "target={target}")?;
        }
        for (k, v) in &self.additional {
            write!(f, " {k}={v}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_is_stable() {
        assert_eq!(ExecError::command(1, "x").category(), "command");
        assert_eq!(
            ExecError::timeout(Duration::from_secs(1), "x").category(),
            "timeout"
        );
        assert_eq!(ExecError::config("x").category(), "config");
    }

    #[test]
    fn recoverability_matches_transient_failures() {
        assert!(ExecError::timeout(Duration::from_secs(1), "x").is_recoverable());
        assert!(ExecError::connection("host", "reset").is_recoverable());
        assert!(!ExecError::command(1, "x").is_recoverable());
        assert!(!ExecError::state("x").is_recoverable());
    }

    #[test]
    fn error_context_display() {
        let ctx = ErrorContext::for_target("host-a").with("hop", "1");
        assert_eq!(ctx.to_string(), "target=host-a hop=1");
    }

    #[test]
    fn masked_redacts_command_error_message() {
        let err = ExecError::command(1, "leaked hunter2 in stderr")
            .masked(|s| s.replace("hunter2", "***MASKED***"));
        assert_eq!(err.category(), "command");
        assert!(err.to_string().contains("***MASKED***"));
        assert!(!err.to_string().contains("hunter2"));
    }
}
