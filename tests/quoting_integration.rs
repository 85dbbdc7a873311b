//! Integration tests for typed interpolation rendering correctly through
//! the local adapter (a literal-echo round trip against the real shell).

use std::sync::Arc;

use rexec::adapter::local::LocalAdapter;
use rexec::{cmd, CommandBuilder, Engine, EngineConfig, Json, ShellMode};
use serde::Serialize;

fn local_engine() -> Engine {
    let engine = Engine::new(EngineConfig::default());
    engine.register("local", Arc::new(LocalAdapter::new()));
    engine
}

#[tokio::test]
async fn quoted_fragment_survives_a_shell_round_trip() {
    let engine = local_engine();
    let weird = "it's a \"weird\" $(value) & more";
    let template = cmd!("echo ", weird);
    let builder = CommandBuilder::new("sh")
        .arg("-c")
        .arg(template.to_shell_string())
        .shell(ShellMode::Disabled);
    let handle = engine.handle("local", builder).unwrap();
    let result = handle.start().await.unwrap();
    assert_eq!(result.text().trim(), weird);
}

#[derive(Serialize)]
struct Payload {
    name: String,
    count: u32,
}

#[tokio::test]
async fn json_wrapper_round_trips_through_the_shell() {
    let engine = local_engine();
    let payload = Payload {
        name: "rexec".to_string(),
        count: 3,
    };
    let template = cmd!("echo ", Json(payload));
    let builder = CommandBuilder::new("sh")
        .arg("-c")
        .arg(template.to_shell_string())
        .shell(ShellMode::Disabled);
    let handle = engine.handle("local", builder).unwrap();
    let result = handle.start().await.unwrap();
    assert_eq!(result.text().trim(), r#"{"count":3,"name":"rexec"}"#);
}
