//! Integration tests for the engine/local-adapter dispatch path.

use std::sync::Arc;
use std::time::Duration;

use rexec::adapter::local::LocalAdapter;
use rexec::{EngineConfig, Engine, ExecError};

fn local_engine() -> Engine {
    let engine = Engine::new(EngineConfig::default());
    engine.register("local", Arc::new(LocalAdapter::new()));
    engine
}

#[tokio::test]
async fn runs_a_command_through_the_registry() {
    let engine = local_engine();
    let handle = engine
        .handle("local", engine.command("echo").arg("from rexec"))
        .unwrap();
    let result = handle.start().await.unwrap();
    assert_eq!(result.text().trim(), "from rexec");
    assert!(result.success());
}

#[tokio::test]
async fn unknown_alias_errors_target_not_found() {
    let engine = local_engine();
    let err = engine
        .handle("does-not-exist", engine.command("echo").arg("hi"))
        .unwrap_err();
    assert!(matches!(err, ExecError::TargetNotFound { .. }));
}

#[tokio::test]
async fn timeout_propagates_through_the_handle() {
    let engine = local_engine();
    let handle = engine
        .handle(
            "local",
            engine.command("sleep").arg("5").timeout(Duration::from_millis(100)),
        )
        .unwrap();
    let err = handle.start().await.unwrap_err();
    assert!(matches!(err, ExecError::Timeout { .. }));
}

#[tokio::test]
async fn engine_defaults_apply_to_every_built_command() {
    let mut config = EngineConfig::default();
    config.default_timeout = Some(Duration::from_secs(10));
    config.default_env.insert("REXEC_TEST".to_string(), "1".to_string());
    let engine = Engine::new(config);
    engine.register("local", Arc::new(LocalAdapter::new()));

    let handle = engine
        .handle("local", engine.command("sh").arg("-c").arg("echo $REXEC_TEST"))
        .unwrap();
    let result = handle.start().await.unwrap();
    assert_eq!(result.text().trim(), "1");
}

#[tokio::test]
async fn masked_pattern_never_appears_in_captured_output() {
    let mut config = EngineConfig::default();
    config.masking.patterns.push("hunter2".to_string());
    let engine = Engine::new(config);
    engine.register("local", Arc::new(LocalAdapter::new()));

    let handle = engine
        .handle("local", engine.command("echo").arg("password is hunter2"))
        .unwrap();
    let result = handle.start().await.unwrap();
    assert!(!result.text().contains("hunter2"));
    assert!(result.text().contains("***MASKED***"));
}

#[tokio::test]
async fn cache_policy_reuses_a_completed_result_across_repeated_starts() {
    let engine = local_engine();
    let cache = rexec::CachePolicy {
        key: Some("counter".to_string()),
        ttl: Duration::from_secs(60),
    };

    let counter_file = tempfile::NamedTempFile::new().unwrap();
    let counter_path = counter_file.path().display().to_string();
    // Each invocation appends one byte; if the cache is reused rather than
    // re-executing the command, every `start()` below still observes the
    // same one-byte file.
    let script = format!("printf 'x' >> {counter_path}; cat {counter_path}");

    let mut results = Vec::new();
    for _ in 0..5 {
        let handle = engine
            .handle(
                "local",
                engine
                    .command("sh")
                    .arg("-c")
                    .arg(&script)
                    .cache(cache.clone()),
            )
            .unwrap();
        results.push(handle.start().await.unwrap());
    }
    for result in &results {
        assert_eq!(result.text(), "x");
    }
}

#[tokio::test]
async fn retry_policy_retries_a_recoverable_timeout() {
    let engine = local_engine();
    let retry = rexec::RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(1),
        multiplier: 1.0,
        max_delay: Duration::from_millis(5),
    };
    let handle = engine
        .handle(
            "local",
            engine
                .command("sleep")
                .arg("2")
                .timeout(Duration::from_millis(20))
                .retry(retry),
        )
        .unwrap();
    let err = handle.start().await.unwrap_err();
    assert!(matches!(err, ExecError::Timeout { .. }));
}
