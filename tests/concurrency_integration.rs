//! Integration tests for the concurrency helpers (C11) against the local
//! adapter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rexec::adapter::local::LocalAdapter;
use rexec::concurrency::{batch, parallel_map, pipe, retry};
use rexec::engine::EventBus;
use rexec::{CommandBuilder, Engine, EngineConfig, ExecError};

fn local_engine() -> Engine {
    let engine = Engine::new(EngineConfig::default());
    engine.register("local", Arc::new(LocalAdapter::new()));
    engine
}

#[tokio::test]
async fn parallel_map_preserves_input_order_across_shelled_out_commands() {
    let engine = Arc::new(local_engine());
    let items: Vec<u32> = (0..8).collect();
    let results = parallel_map(items, 4, false, move |n| {
        let engine = engine.clone();
        async move {
            let handle = engine.handle("local", engine.command("echo").arg(n.to_string()))?;
            let result = handle.start().await?;
            Ok::<u32, ExecError>(result.text().trim().parse().unwrap())
        }
    })
    .await
    .unwrap();

    let values: Vec<u32> = results.into_iter().map(|r| r.unwrap()).collect();
    assert_eq!(values, (0..8).collect::<Vec<_>>());
}

#[tokio::test]
async fn batch_reports_progress_for_every_item() {
    let engine = Arc::new(local_engine());
    let completed = Arc::new(AtomicUsize::new(0));
    let tracker = completed.clone();

    let items = vec!["a", "b", "c"];
    let results = batch(
        items.len(),
        2,
        move |_finished, _total| {
            tracker.fetch_add(1, Ordering::SeqCst);
        },
        move |index| {
            let engine = engine.clone();
            let item = items[index].to_string();
            async move {
                let handle = engine.handle("local", engine.command("echo").arg(item))?;
                handle.start().await.map(|_| ())
            }
        },
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(completed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_succeeds_after_transient_failures() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let tracker = attempts.clone();

    let result = retry(
        5,
        Duration::from_millis(1),
        2.0,
        Duration::from_millis(10),
        |e| e.is_recoverable(),
        move || {
            let tracker = tracker.clone();
            async move {
                let n = tracker.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(ExecError::connection("flaky-host", "refused"))
                } else {
                    Ok(42)
                }
            }
        },
    )
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn pipe_chains_stdout_into_stdin() {
    let adapter = LocalAdapter::new();
    let bus = EventBus::new();
    let builders = vec![
        CommandBuilder::new("echo").arg("line1\nline2\nline1"),
        CommandBuilder::new("sort").arg("-u"),
    ];
    let results = pipe(builders, &adapter, &bus.sink()).await.unwrap();
    let mut lines: Vec<&str> = results[1].text().lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["line1", "line2"]);
}
