//! Integration tests for the Kubernetes adapter (C10), including log
//! streaming. Skips gracefully when no cluster is reachable, mirroring the
//! Docker adapter's tests.

use std::process::Command;
use std::sync::Arc;

use futures::StreamExt;
use rexec::adapter::kubernetes::{find_kubectl_binary, KubernetesAdapter, LogOptions};
use rexec::{Engine, EngineConfig};
use serial_test::serial;

fn cluster_available() -> bool {
    let Ok(kubectl) = find_kubectl_binary() else {
        return false;
    };
    Command::new(kubectl)
        .args(["get", "nodes"])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

struct DisposablePod {
    name: String,
}

impl DisposablePod {
    fn start(name: &str) -> Option<Self> {
        let status = Command::new("kubectl")
            .args([
                "run", name, "--image=alpine:3", "--restart=Never", "--", "sleep", "60",
            ])
            .status()
            .ok()?;
        status.success().then(|| Self { name: name.to_string() })
    }
}

impl Drop for DisposablePod {
    fn drop(&mut self) {
        let _ = Command::new("kubectl")
            .args(["delete", "pod", &self.name, "--now", "--ignore-not-found"])
            .status();
    }
}

#[tokio::test]
#[serial]
async fn execs_a_command_inside_a_pod() {
    if !cluster_available() {
        eprintln!("no kubernetes cluster reachable - skipping");
        return;
    }
    let name = format!("rexec-k8s-adapter-test-{}", uuid::Uuid::new_v4());
    let Some(pod) = DisposablePod::start(&name) else {
        eprintln!("could not schedule test pod - skipping");
        return;
    };

    let adapter = KubernetesAdapter::new(pod.name.clone()).unwrap();
    let engine = Engine::new(EngineConfig::default());
    engine.register("k8s", Arc::new(adapter));

    let handle = engine
        .handle("k8s", engine.command("echo").arg("hello from pod"))
        .unwrap();
    let result = handle.start().await.unwrap();
    assert_eq!(result.text().trim(), "hello from pod");
}

#[tokio::test]
#[serial]
async fn streams_pod_logs_with_timestamps() {
    if !cluster_available() {
        eprintln!("no kubernetes cluster reachable - skipping");
        return;
    }
    let name = format!("rexec-k8s-logs-test-{}", uuid::Uuid::new_v4());
    let Some(pod) = DisposablePod::start(&name) else {
        eprintln!("could not schedule test pod - skipping");
        return;
    };

    let adapter = KubernetesAdapter::new(pod.name.clone()).unwrap();
    let mut stream = adapter
        .logs(LogOptions {
            follow: false,
            tail: Some(5),
            timestamps: true,
        })
        .await
        .unwrap();

    let mut saw_a_line = false;
    while let Some(line) = stream.next().await {
        let line = line.unwrap();
        // `--timestamps` prefixes every line with an RFC3339 stamp.
        assert!(line.splitn(2, ' ').next().unwrap().contains('T'));
        saw_a_line = true;
    }
    assert!(saw_a_line);
}
