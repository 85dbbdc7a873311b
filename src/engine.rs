//! The Execution Engine (C5): the root object callers construct once and
//! use to build and dispatch commands against any adapter.
//!
//! Grounded on `client.rs::DockerClient` (the teacher's single entry point
//! that holds config and hands out builders), generalized from "one Docker
//! daemon" to "a registry of adapters keyed by alias", with the event bus
//! extracted from `events.rs::EventManager` into a reusable [`EventBus`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::adapter::{Adapter, EngineEvent, EventSink};
use crate::command::CommandBuilder;
use crate::error::{ExecError, ExecResult};
use crate::handle::Handle;
use crate::result::ExecutionResult;

/// Substring masking applied to captured output and event payloads before
/// they leave the engine.
#[derive(Debug, Clone, Default)]
pub struct MaskingPolicy {
    /// Literal substrings to redact.
    pub patterns: Vec<String>,
    /// Replacement text (defaults to `***MASKED***` if empty).
    pub replacement: String,
}

impl MaskingPolicy {
    /// Apply the policy to `text`, replacing every occurrence of every
    /// pattern. A no-op if no patterns are registered.
    pub fn apply(&self, text: &str) -> String {
        if self.patterns.is_empty() {
            return text.to_string();
        }
        let replacement = if self.replacement.is_empty() {
            "***MASKED***"
        } else {
            &self.replacement
        };
        let mut masked = text.to_string();
        for pattern in &self.patterns {
            if pattern.is_empty() {
                continue;
            }
            masked = masked.replace(pattern.as_str(), replacement);
        }
        masked
    }

    /// Byte-safe equivalent of [`Self::apply`], used on captured stdout/stderr
    /// which may not be valid UTF-8. Falls back to a lossy UTF-8 round trip
    /// since the patterns being matched are themselves always text.
    pub fn apply_bytes(&self, bytes: &[u8]) -> Vec<u8> {
        if self.patterns.is_empty() {
            return bytes.to_vec();
        }
        self.apply(&String::from_utf8_lossy(bytes)).into_bytes()
    }
}

/// Runtime preference knobs that adapters may consult (currently only
/// whether a native/pure-Rust transport is preferred over shelling out,
/// relevant to [`crate::adapter::ssh`]).
#[derive(Debug, Clone, Default)]
pub struct RuntimePreferences {
    /// Prefer a native (pure-Rust) transport where an adapter offers both.
    pub prefer_native: bool,
}

/// Defaults applied to every command built through an [`Engine`] unless
/// overridden on that command.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Default working directory for new commands.
    pub default_cwd: Option<PathBuf>,
    /// Default environment variables merged under each command's own.
    pub default_env: HashMap<String, String>,
    /// Default timeout for new commands.
    pub default_timeout: Option<Duration>,
    /// Output masking applied to captured text and emitted events.
    pub masking: MaskingPolicy,
    /// Runtime preferences consulted by adapters.
    pub runtime: RuntimePreferences,
}

/// A typed wrapper around a `tokio::sync::broadcast` channel of
/// [`EngineEvent`]s, shared by the engine and every handle/adapter it hands
/// out.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
    masking: Arc<MaskingPolicy>,
}

impl EventBus {
    /// Create a new bus with a reasonably sized backlog for late
    /// subscribers (events published before a subscriber attaches are
    /// simply missed, matching `broadcast`'s semantics), and no masking.
    pub fn new() -> Self {
        Self::with_masking(MaskingPolicy::default())
    }

    /// Create a new bus whose sinks mask every pattern in `masking` before
    /// publishing events or releasing captured results.
    pub fn with_masking(masking: MaskingPolicy) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            masking: Arc::new(masking),
        }
    }

    /// A cheap-to-clone sink for publishing events, handed to adapters.
    pub fn sink(&self) -> EventSink {
        EventSink::new(self.sender.clone(), self.masking.clone())
    }

    /// Subscribe to the event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Root object: owns the adapter registry and the event bus, and is the
/// entry point for building commands.
///
/// Cheap to clone (everything behind `Arc`), so callers can freely pass
/// `Engine` by value into spawned tasks.
#[derive(Clone)]
pub struct Engine {
    config: Arc<EngineConfig>,
    adapters: Arc<DashMap<String, Arc<dyn Adapter>>>,
    events: EventBus,
    cache: Arc<CommandCache>,
}

impl Engine {
    /// Create a new engine with the given defaults and no registered
    /// adapters.
    pub fn new(config: EngineConfig) -> Self {
        let events = EventBus::with_masking(config.masking.clone());
        Self {
            config: Arc::new(config),
            adapters: Arc::new(DashMap::new()),
            events,
            cache: Arc::new(CommandCache::new()),
        }
    }

    /// The engine's configured defaults.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The engine's event bus, for subscribing to command lifecycle events
    /// across every adapter it dispatches through.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Register (or replace) an adapter under `alias`.
    pub fn register(&self, alias: impl Into<String>, adapter: Arc<dyn Adapter>) {
        self.adapters.insert(alias.into(), adapter);
    }

    /// Look up a registered adapter by alias.
    pub fn adapter(&self, alias: &str) -> ExecResult<Arc<dyn Adapter>> {
        self.adapters
            .get(alias)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ExecError::target_not_found(alias))
    }

    /// Start a new command builder, pre-seeded with the engine's defaults.
    pub fn command(&self, program: impl Into<String>) -> CommandBuilder {
        let mut builder = CommandBuilder::new(program);
        if let Some(cwd) = &self.config.default_cwd {
            builder = builder.cwd(cwd.clone());
        }
        for (k, v) in &self.config.default_env {
            builder = builder.env(k.clone(), v.clone());
        }
        if let Some(timeout) = self.config.default_timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }

    /// Build a [`Handle`] for `builder` against the adapter registered as
    /// `alias`. The command's `retry`/`cache` policies (if set) are honored
    /// automatically by wrapping the adapter in a resilience decorator.
    pub fn handle(&self, alias: &str, builder: CommandBuilder) -> ExecResult<Handle> {
        let adapter = self.adapter(alias)?;
        self.handle_with(adapter, builder)
    }

    /// Build a [`Handle`] directly against an adapter instance, bypassing
    /// the registry (useful for one-off targets that don't warrant an
    /// alias).
    pub fn handle_with(&self, adapter: Arc<dyn Adapter>, builder: CommandBuilder) -> ExecResult<Handle> {
        let spec = builder.build()?;
        let resilient: Arc<dyn Adapter> = Arc::new(ResilientAdapter {
            inner: adapter,
            cache: self.cache.clone(),
        });
        Ok(Handle::new(resilient, self.events.sink(), spec))
    }
}

/// A single cache slot: a single-flight cell shared by every concurrent
/// lookup for the same key, plus the bookkeeping needed to expire it after
/// its TTL.
struct CacheSlot {
    inserted: std::time::Instant,
    ttl: Duration,
    cell: Arc<tokio::sync::OnceCell<ExecResult<ExecutionResult>>>,
}

/// Per-engine, read-through, single-flight result cache (spec §5: "Caches
/// ... are read-through with single-flight: concurrent lookups for the same
/// key coalesce into one execution").
struct CommandCache {
    slots: DashMap<String, CacheSlot>,
}

impl CommandCache {
    fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    /// Return the single-flight cell for `key`, creating a fresh one if
    /// absent or if the existing entry's TTL has expired.
    fn slot(&self, key: &str, ttl: Duration) -> Arc<tokio::sync::OnceCell<ExecResult<ExecutionResult>>> {
        if let Some(existing) = self.slots.get(key) {
            if existing.inserted.elapsed() < existing.ttl {
                return existing.cell.clone();
            }
        }
        let cell = Arc::new(tokio::sync::OnceCell::new());
        self.slots.insert(
            key.to_string(),
            CacheSlot {
                inserted: std::time::Instant::now(),
                ttl,
                cell: cell.clone(),
            },
        );
        cell
    }
}

/// Decorates an [`Adapter`] with the per-command `retry` and `cache`
/// policies carried on a [`crate::command::CommandSpec`], so every adapter
/// (local/SSH/Docker/Kubernetes) gets this behavior uniformly instead of
/// reimplementing it per transport.
struct ResilientAdapter {
    inner: Arc<dyn Adapter>,
    cache: Arc<CommandCache>,
}

/// `ExecError` is `Clone`, so this hands every single-flight caller its own
/// owned result without collapsing a cached `Timeout`/`Connection`/etc. into
/// `ExecError::State`.
fn clone_exec_result(r: &ExecResult<ExecutionResult>) -> ExecResult<ExecutionResult> {
    r.clone()
}

#[async_trait::async_trait]
impl Adapter for ResilientAdapter {
    async fn execute(
        &self,
        spec: &crate::command::CommandSpec,
        events: &EventSink,
    ) -> ExecResult<ExecutionResult> {
        let run_with_retry = || async {
            match spec.retry_policy() {
                None => self.inner.execute(spec, events).await,
                Some(policy) => {
                    crate::concurrency::retry(
                        policy.max_attempts,
                        policy.base_delay,
                        policy.multiplier,
                        policy.max_delay,
                        ExecError::is_recoverable,
                        || self.inner.execute(spec, events),
                    )
                    .await
                }
            }
        };

        match spec.cache_policy() {
            None => run_with_retry().await,
            Some(policy) => {
                let key = spec.cache_key();
                let cell = self.cache.slot(&key, policy.ttl);
                let result = cell.get_or_init(run_with_retry).await;
                clone_exec_result(result)
            }
        }
    }

    async fn execute_streaming(
        &self,
        spec: &crate::command::CommandSpec,
        events: &EventSink,
    ) -> ExecResult<std::pin::Pin<Box<dyn futures::Stream<Item = crate::adapter::OutputLine> + Send>>> {
        self.inner.execute_streaming(spec, events).await
    }

    async fn upload(
        &self,
        local: &std::path::Path,
        remote: &std::path::Path,
        opts: crate::adapter::TransferOptions,
    ) -> ExecResult<()> {
        self.inner.upload(local, remote, opts).await
    }

    async fn download(
        &self,
        remote: &std::path::Path,
        local: &std::path::Path,
        opts: crate::adapter::TransferOptions,
    ) -> ExecResult<()> {
        self.inner.download(remote, local, opts).await
    }

    fn descriptor(&self) -> &str {
        self.inner.descriptor()
    }
}

static DEFAULT_ENGINE: OnceLock<Engine> = OnceLock::new();

/// A process-wide default engine, lazily constructed on first access with
/// empty defaults and no registered adapters. Callers wanting custom
/// defaults or adapter registrations should construct their own [`Engine`]
/// instead; this exists for quick scripts and doctests.
pub fn default_engine() -> &'static Engine {
    DEFAULT_ENGINE.get_or_init(|| Engine::new(EngineConfig::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::local::LocalAdapter;

    #[test]
    fn masking_replaces_all_occurrences() {
        let policy = MaskingPolicy {
            patterns: vec!["hunter2".to_string()],
            replacement: String::new(),
        };
        assert_eq!(policy.apply("password is hunter2 always hunter2"), "password is ***MASKED*** always ***MASKED***");
    }

    #[test]
    fn masking_is_noop_without_patterns() {
        let policy = MaskingPolicy::default();
        assert_eq!(policy.apply("plain text"), "plain text");
    }

    #[tokio::test]
    async fn unregistered_adapter_errors_target_not_found() {
        let engine = Engine::new(EngineConfig::default());
        let err = engine.adapter("ssh-prod").unwrap_err();
        assert_eq!(err.category(), "target_not_found");
    }

    #[tokio::test]
    async fn handle_dispatches_through_registered_adapter() {
        let engine = Engine::new(EngineConfig::default());
        engine.register("local", Arc::new(LocalAdapter::new()));
        let handle = engine.handle("local", engine.command("true")).unwrap();
        let result = handle.start().await.unwrap();
        assert_eq!(result.exit_code, Some(0));
    }

    #[test]
    fn default_engine_is_shared() {
        let a = default_engine() as *const Engine;
        let b = default_engine() as *const Engine;
        assert_eq!(a, b);
    }
}
