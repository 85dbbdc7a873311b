//! The Deferred Command Handle (C4): a fluent, immutable-until-started
//! awaitable wrapping one [`CommandSpec`] and the adapter that will run it.
//!
//! Grounded on `executor.rs`'s spawn-then-join pattern for collecting
//! stdout/stderr (`wait_for_output`), generalized into a reusable handle
//! type that supports idempotent start, cancellation, and post-completion
//! result transformers.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::adapter::{Adapter, EventSink};
use crate::command::CommandSpec;
use crate::error::{ExecError, ExecResult};
use crate::result::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Pending,
    Running,
    Cancelled,
}

struct Inner {
    spec: CommandSpec,
    state: State,
    cancel_token: Option<CancelToken>,
}

/// A cooperative cancellation token bindable to a [`Handle`] via
/// [`Handle::signal`]: firing [`CancelToken::cancel`] cancels every handle
/// it is bound to, the same way [`Handle::cancel`] does.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<tokio::sync::Notify>);

impl CancelToken {
    /// Create a new, unfired token.
    pub fn new() -> Self {
        Self(Arc::new(tokio::sync::Notify::new()))
    }

    /// Fire the token, cancelling every handle bound to it. Stores a single
    /// permit if no handle is waiting yet, so a cancel issued just before
    /// `start()` still takes effect.
    pub fn cancel(&self) {
        self.0.notify_one();
    }

    async fn cancelled(&self) {
        self.0.notified().await;
    }
}

/// A deferred command: builder methods mutate it until [`Handle::start`] (or
/// awaiting it) is called for the first time, after which every mutator
/// returns [`ExecError::State`].
pub struct Handle {
    adapter: Arc<dyn Adapter>,
    events: EventSink,
    inner: Mutex<Inner>,
    join: Mutex<Option<JoinHandle<ExecResult<ExecutionResult>>>>,
    result: Arc<OnceCell<ExecResult<ExecutionResult>>>,
}

impl Handle {
    pub(crate) fn new(adapter: Arc<dyn Adapter>, events: EventSink, spec: CommandSpec) -> Self {
        Self {
            adapter,
            events,
            inner: Mutex::new(Inner {
                spec,
                state: State::Pending,
                cancel_token: None,
            }),
            join: Mutex::new(None),
            result: Arc::new(OnceCell::new()),
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut CommandSpec)) -> ExecResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != State::Pending {
            return Err(ExecError::state(
                "cannot modify a command handle after it has started",
            ));
        }
        f(&mut inner.spec);
        Ok(())
    }

    fn mutate_state(&self, f: impl FnOnce(&mut Inner)) -> ExecResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != State::Pending {
            return Err(ExecError::state(
                "cannot modify a command handle after it has started",
            ));
        }
        f(&mut inner);
        Ok(())
    }

    /// Override the working directory. Errors if already started.
    pub fn cwd(self, cwd: impl Into<std::path::PathBuf>) -> ExecResult<Self> {
        let cwd = cwd.into();
        self.mutate(|spec| spec.cwd = Some(cwd))?;
        Ok(self)
    }

    /// Set an environment variable. Errors if already started.
    pub fn env(self, key: impl Into<String>, value: impl Into<String>) -> ExecResult<Self> {
        let (key, value) = (key.into(), value.into());
        self.mutate(|spec| {
            spec.env.insert(key, value);
        })?;
        Ok(self)
    }

    /// Override the timeout. Errors if already started.
    pub fn timeout(self, timeout: std::time::Duration) -> ExecResult<Self> {
        self.mutate(|spec| spec.timeout = Some(timeout))?;
        Ok(self)
    }

    /// Select the shell mode. Errors if already started.
    pub fn shell(self, shell: crate::command::ShellMode) -> ExecResult<Self> {
        self.mutate(|spec| spec.shell = shell)?;
        Ok(self)
    }

    /// Suppress exit-code errors: a non-zero exit is reported on the result
    /// instead of rejecting. Errors if already started.
    pub fn nothrow(self) -> ExecResult<Self> {
        self.mutate(|spec| spec.nothrow = true)?;
        Ok(self)
    }

    /// Suppress lifecycle/chunk events for this command. Errors if already
    /// started.
    pub fn quiet(self) -> ExecResult<Self> {
        self.mutate(|spec| spec.quiet = true)?;
        Ok(self)
    }

    /// Mark the command interactive (pty/stdio passthrough, disables
    /// capture). Errors if already started.
    pub fn interactive(self) -> ExecResult<Self> {
        self.mutate(|spec| spec.interactive = true)?;
        Ok(self)
    }

    /// Attach stdin bytes. Errors if already started.
    pub fn stdin_bytes(self, bytes: Vec<u8>) -> ExecResult<Self> {
        self.mutate(|spec| spec.stdin = crate::command::StdioSource::Bytes(bytes))?;
        Ok(self)
    }

    /// Attach stdin text. Errors if already started.
    pub fn stdin_text(self, text: impl Into<String>) -> ExecResult<Self> {
        let text = text.into();
        self.mutate(|spec| spec.stdin = crate::command::StdioSource::Text(text))?;
        Ok(self)
    }

    /// Route stdout through a per-line callback instead of capturing it.
    /// Errors if already started.
    pub fn stdout_lines<F>(self, callback: F) -> ExecResult<Self>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.mutate(|spec| {
            spec.stdout = crate::command::StdioSink::LineCallback(Arc::new(callback));
        })?;
        Ok(self)
    }

    /// Route stderr through a per-line callback instead of capturing it.
    /// Errors if already started.
    pub fn stderr_lines<F>(self, callback: F) -> ExecResult<Self>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.mutate(|spec| {
            spec.stderr = crate::command::StdioSink::LineCallback(Arc::new(callback));
        })?;
        Ok(self)
    }

    /// Attach a retry policy, honored automatically by the engine's
    /// resilience decorator. Errors if already started.
    pub fn retry(self, policy: crate::command::RetryPolicy) -> ExecResult<Self> {
        self.mutate(|spec| spec.retry = Some(policy))?;
        Ok(self)
    }

    /// Attach a single-flight cache policy, honored automatically by the
    /// engine's resilience decorator. Errors if already started.
    pub fn cache(self, policy: crate::command::CachePolicy) -> ExecResult<Self> {
        self.mutate(|spec| spec.cache = Some(policy))?;
        Ok(self)
    }

    /// Bind an external [`CancelToken`]: firing it has the same effect as
    /// calling [`Handle::cancel`]. Errors if already started.
    pub fn signal(self, token: CancelToken) -> ExecResult<Self> {
        self.mutate_state(|inner| inner.cancel_token = Some(token))?;
        Ok(self)
    }

    /// Idempotently start the command. Calling this more than once returns
    /// the same in-flight/completed future; concurrent callers all observe
    /// exactly one spawned task, since only the thread that flips the state
    /// from `Pending` ever spawns.
    pub async fn start(&self) -> ExecResult<ExecutionResult> {
        let should_spawn = {
            let mut inner = self.inner.lock();
            if inner.state == State::Pending {
                inner.state = State::Running;
                true
            } else {
                false
            }
        };

        if should_spawn {
            let adapter = self.adapter.clone();
            let events = self.events.clone();
            let spec = self.inner.lock().spec.clone();
            let handle =
                tokio::spawn(async move { adapter.execute(&spec, &events).await });
            *self.join.lock() = Some(handle);
        }

        let cancel_token = self.inner.lock().cancel_token.clone();

        self.result
            .get_or_init(|| async move {
                let taken = self.join.lock().take();
                let outcome = match taken {
                    Some(mut task) => {
                        let joined = match &cancel_token {
                            Some(token) => {
                                tokio::select! {
                                    result = &mut task => result,
                                    _ = token.cancelled() => {
                                        task.abort();
                                        self.inner.lock().state = State::Cancelled;
                                        task.await
                                    }
                                }
                            }
                            None => task.await,
                        };
                        match joined {
                            Ok(r) => r,
                            Err(e) if e.is_cancelled() => {
                                Err(ExecError::cancelled("command task was cancelled"))
                            }
                            Err(e) => Err(ExecError::state(format!("task join error: {e}"))),
                        }
                    }
                    None => Err(ExecError::state(
                        "command handle polled with no outstanding task",
                    )),
                };
                // Every completed/failed result passes back through here, so
                // this is the one place that guarantees masking is applied
                // regardless of which adapter produced it.
                match outcome {
                    Ok(result) => Ok(result.masked(|b| self.events.mask_bytes(b))),
                    Err(e) => Err(e.masked(|s| self.events.mask(s))),
                }
            })
            .await
            .clone_result()
    }

    /// Cancel the command: if running, aborts the underlying task (the
    /// local/SSH/Docker/Kubernetes adapter is responsible for translating an
    /// abort into graceful-then-hard process termination).
    pub fn cancel(&self) {
        if let Some(task) = self.join.lock().take() {
            task.abort();
        }
        self.inner.lock().state = State::Cancelled;
    }
}

/// Work around `ExecResult<ExecutionResult>` not being `Copy`: every waiter
/// on the shared [`OnceCell`] needs its own owned result. `ExecError` is
/// `Clone`, so this preserves the original error variant (`Timeout`,
/// `Cancelled`, `Auth`, ...) instead of flattening every outcome to `State`.
trait CloneResult {
    fn clone_result(&self) -> ExecResult<ExecutionResult>;
}

impl CloneResult for ExecResult<ExecutionResult> {
    fn clone_result(&self) -> ExecResult<ExecutionResult> {
        self.clone()
    }
}

impl IntoFuture for Handle {
    type Output = ExecResult<ExecutionResult>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move {
            let nothrow = self.inner.lock().spec.is_nothrow();
            let result = self.start().await;
            if nothrow {
                result
            } else {
                result.and_then(ExecutionResult::ok)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::local::LocalAdapter;
    use crate::command::CommandBuilder;
    use crate::engine::EventBus;

    fn handle(spec: CommandSpec) -> Handle {
        let adapter: Arc<dyn Adapter> = Arc::new(LocalAdapter::new());
        let bus = EventBus::new();
        Handle::new(adapter, bus.sink(), spec)
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let spec = CommandBuilder::new("true").build().unwrap();
        let h = handle(spec);
        let a = h.start().await;
        let b = h.start().await;
        assert_eq!(a.unwrap().exit_code, b.unwrap().exit_code);
    }

    #[tokio::test]
    async fn mutation_after_start_errors() {
        let spec = CommandBuilder::new("true").build().unwrap();
        let h = handle(spec);
        let _ = h.start().await;
        assert!(h.env("K", "V").is_err());
    }

    #[tokio::test]
    async fn cancel_token_fired_before_start_cancels_immediately() {
        let spec = CommandBuilder::new("sleep").arg("5").build().unwrap();
        let token = CancelToken::new();
        token.cancel();
        let h = handle(spec).signal(token).unwrap();
        let err = h.start().await.unwrap_err();
        assert!(matches!(err, ExecError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn cancel_token_fired_mid_run_cancels_the_task() {
        let spec = CommandBuilder::new("sleep").arg("5").build().unwrap();
        let token = CancelToken::new();
        let h = Arc::new(handle(spec).signal(token.clone()).unwrap());
        let h2 = h.clone();
        let runner = tokio::spawn(async move { h2.start().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        token.cancel();
        let err = runner.await.unwrap().unwrap_err();
        assert!(matches!(err, ExecError::Cancelled { .. }));
    }
}
