//! Concurrency Utilities (C11): combinators for running many [`Handle`]s
//! together.
//!
//! Grounded on `adolago-rustible`'s task-batching helpers (bounded
//! concurrency over a `Vec` of futures via a semaphore) for `parallel_map`
//! and `batch`, and on the teacher's retry-on-pull pattern in
//! `image.rs::PullOptions` (attempt counting with backoff) generalized into
//! a standalone [`retry`] combinator.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Semaphore;

use crate::adapter::{Adapter, EventSink};
use crate::command::CommandBuilder;
use crate::error::{ExecError, ExecResult};
use crate::result::ExecutionResult;

/// Run every future in `tasks` concurrently, bounded by `concurrency`,
/// preserving input order in the output.
///
/// If `fail_fast` is set and any task errors, outstanding tasks are polled
/// to completion anyway (cooperative cancellation of already-spawned
/// tokio tasks is the caller's responsibility via their own handles) but
/// the first error short-circuits the return value.
pub async fn parallel_map<T, R, F, Fut>(
    items: Vec<T>,
    concurrency: usize,
    fail_fast: bool,
    f: F,
) -> ExecResult<Vec<ExecResult<R>>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecResult<R>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let f = Arc::new(f);
    let mut join_set = tokio::task::JoinSet::new();

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let f = f.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            (index, f(item).await)
        });
    }

    let mut results: Vec<Option<ExecResult<R>>> = (0..join_set.len()).map(|_| None).collect();
    let mut first_error: Option<ExecError> = None;

    while let Some(joined) = join_set.join_next().await {
        let (index, result) = joined.map_err(|e| ExecError::state(format!("task panicked: {e}")))?;
        if fail_fast {
            if let Err(e) = &result {
                if first_error.is_none() {
                    first_error = Some(e.clone());
                }
            }
        }
        if index < results.len() {
            results[index] = Some(result);
        }
    }

    if let Some(err) = first_error {
        return Err(err);
    }

    Ok(results.into_iter().map(|r| r.expect("every index populated")).collect())
}

/// Run `tasks` concurrently bounded by `concurrency`, invoking `on_progress`
/// after each completes with the number finished so far and the total.
pub async fn batch<F, Fut>(
    count: usize,
    concurrency: usize,
    on_progress: impl Fn(usize, usize) + Send + Sync + 'static,
    task: F,
) -> ExecResult<Vec<ExecResult<()>>>
where
    F: Fn(usize) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ExecResult<()>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let task = Arc::new(task);
    let on_progress = Arc::new(on_progress);
    let done = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut join_set = tokio::task::JoinSet::new();

    for index in 0..count {
        let semaphore = semaphore.clone();
        let task = task.clone();
        let on_progress = on_progress.clone();
        let done = done.clone();
        join_set.spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            let result = task(index).await;
            let finished = done.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            on_progress(finished, count);
            (index, result)
        });
    }

    let mut results: Vec<Option<ExecResult<()>>> = (0..count).map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        let (index, result) = joined.map_err(|e| ExecError::state(format!("task panicked: {e}")))?;
        results[index] = Some(result);
    }
    Ok(results.into_iter().map(|r| r.expect("every index populated")).collect())
}

/// Retry `operation` with exponential backoff and full jitter until it
/// succeeds, `should_retry` rejects the error, or `max_attempts` is
/// exhausted. Returns the last error if every attempt is exhausted.
pub async fn retry<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    should_retry: impl Fn(&ExecError) -> bool,
    mut operation: F,
) -> ExecResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ExecResult<T>>,
{
    let mut attempt = 0;
    let mut delay = base_delay;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
                let sleep_for = Duration::from_secs_f64(delay.as_secs_f64() * jitter).min(max_delay);
                tokio::time::sleep(sleep_for).await;
                delay = Duration::from_secs_f64((delay.as_secs_f64() * multiplier).min(max_delay.as_secs_f64()));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run `builders` in sequence on `adapter`, feeding each stage's captured
/// stdout as the next stage's stdin, mirroring a shell pipeline. Returns
/// every stage's result in order; a failing stage (non-zero exit unless
/// that stage was built with `.nothrow()`) aborts the remaining stages.
pub async fn pipe(
    builders: Vec<CommandBuilder>,
    adapter: &dyn Adapter,
    events: &EventSink,
) -> ExecResult<Vec<ExecutionResult>> {
    let mut results = Vec::with_capacity(builders.len());
    let mut upstream: Option<Vec<u8>> = None;

    for builder in builders {
        let builder = match upstream.take() {
            Some(bytes) => builder.stdin_bytes(bytes),
            None => builder,
        };
        let spec = builder.build()?;
        let nothrow = spec.is_nothrow();
        let result = adapter.execute(&spec, events).await?;
        if !nothrow {
            result.clone().ok()?;
        }
        upstream = Some(result.stdout.clone());
        results.push(result);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn parallel_map_preserves_order() {
        let items = vec![3, 1, 2];
        let results = parallel_map(items, 2, false, |n: i32| async move { Ok::<_, ExecError>(n * 10) })
            .await
            .unwrap();
        let values: Vec<i32> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn batch_reports_progress_for_every_task() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let results = batch(
            5,
            2,
            move |_finished, _total| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            },
            |_index| async { Ok(()) },
        )
        .await
        .unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn pipe_feeds_stdout_into_next_stage_stdin() {
        use crate::adapter::local::LocalAdapter;
        use crate::engine::EventBus;

        let adapter = LocalAdapter::new();
        let bus = EventBus::new();
        let builders = vec![
            CommandBuilder::new("echo").arg("hello world"),
            CommandBuilder::new("cat"),
        ];
        let results = pipe(builders, &adapter, &bus.sink()).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].text().trim(), "hello world");
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let result: ExecResult<()> = retry(
            3,
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(5),
            |e| e.is_recoverable(),
            move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ExecError::connection("host", "refused"))
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_stops_immediately_on_non_retryable_error() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let result: ExecResult<()> = retry(
            5,
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(5),
            |e| e.is_recoverable(),
            move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(ExecError::config("bad args"))
                }
            },
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
