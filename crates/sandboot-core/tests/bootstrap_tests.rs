//! Bootstrap orchestrator integration tests.
//!
//! These exercise the full transform → mount → analyze → install → start
//! sequence against a scripted mock runtime.

use sandboot_core::{
    BootstrapConfig, BootstrapEvent, BootstrapStep, Bootstrapper, ProcessRegistry, ProjectNode,
};
use sandboot_test_utils::{MockRuntime, ScriptedProcess};
use std::sync::Arc;
use std::time::Duration;

fn file(name: &str, ext: &str, content: &str) -> ProjectNode {
    ProjectNode::File {
        filename: name.to_string(),
        file_extension: ext.to_string(),
        content: content.to_string(),
    }
}

fn node_tree() -> ProjectNode {
    ProjectNode::Folder {
        folder_name: "app".to_string(),
        items: vec![file("package", "json", r#"{"scripts":{"dev":"vite"}}"#)],
    }
}

fn static_tree() -> ProjectNode {
    ProjectNode::Folder {
        folder_name: "site".to_string(),
        items: vec![file("index", "html", "<h1>hi</h1>")],
    }
}

fn fast_config() -> BootstrapConfig {
    BootstrapConfig {
        install_timeout_secs: 1,
        pre_install_timeout_secs: 1,
        install_attempts: 2,
        retry_delay_ms: 10,
    }
}

fn drain_logs(rx: &mut tokio::sync::broadcast::Receiver<BootstrapEvent>) -> Vec<String> {
    let mut logs = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let BootstrapEvent::Log(line) = event {
            logs.push(line);
        }
    }
    logs
}

#[tokio::test]
async fn static_project_boots_and_discovers_port() {
    let runtime = Arc::new(MockRuntime::new().script(
        "npx",
        ScriptedProcess::never_exits().with_output("Serving! Local: http://localhost:3000\n"),
    ));
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());

    bootstrapper.run(&static_tree()).await.unwrap();

    // Let the output-scanning task observe the port.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let tracked = registry.get_all();
    assert_eq!(tracked.len(), 1);
    assert_eq!(tracked[0].port, Some(3000));
    assert!(tracked[0].command.starts_with("npx"));
    assert_eq!(runtime.watched_ports(), vec![3000]);

    let state = bootstrapper.state();
    assert!(state.complete);
    assert!(!state.in_progress);

    // The runtime's own notification supplies the URL and wins Ready.
    runtime.emit_ready(3000, "http://localhost:3000");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let state = bootstrapper.state();
    assert_eq!(state.step, BootstrapStep::Ready);
    assert_eq!(state.url.as_deref(), Some("http://localhost:3000"));

    registry.kill_all();
}

#[tokio::test]
async fn install_failing_twice_still_starts() {
    // Both install attempts exit non-zero; the dev server must still be
    // attempted. All three spawns share the program name, so the queue
    // order is install, install, run.
    let runtime = Arc::new(
        MockRuntime::new()
            .script("npm", ScriptedProcess::exit_with(1).with_output("ERESOLVE\n"))
            .script("npm", ScriptedProcess::exit_with(1).with_output("ERESOLVE\n"))
            .script("npm", ScriptedProcess::never_exits()),
    );
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());
    let mut events = bootstrapper.subscribe();

    bootstrapper.run(&node_tree()).await.unwrap();

    assert_eq!(runtime.spawn_count("npm"), 3);
    assert_eq!(registry.get_all().len(), 1);

    let logs = drain_logs(&mut events);
    assert_eq!(
        logs.iter()
            .filter(|l| l.starts_with("Installing dependencies"))
            .count(),
        2
    );
    assert!(logs.iter().any(|l| l.contains("attempting to start anyway")));

    let state = bootstrapper.state();
    assert!(state.complete);
    assert!(state.error.is_none());

    registry.kill_all();
}

#[tokio::test]
async fn install_timeout_is_killed_and_retried() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("npm", ScriptedProcess::never_exits())
            .script("npm", ScriptedProcess::never_exits())
            .script("npm", ScriptedProcess::never_exits()),
    );
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());
    let mut events = bootstrapper.subscribe();

    bootstrapper.run(&node_tree()).await.unwrap();

    // Two install attempts timed out, then the start was attempted anyway.
    assert_eq!(runtime.spawn_count("npm"), 3);
    let logs = drain_logs(&mut events);
    assert_eq!(
        logs.iter().filter(|l| l.contains("timed out")).count(),
        2
    );

    // Both timed-out installs were killed.
    let records = runtime.spawn_records();
    for record in &records[..2] {
        let controls = record.controls.lock().unwrap();
        assert!(controls
            .iter()
            .any(|c| matches!(c, sandboot_runtime::ProcessControl::Kill)));
    }

    registry.kill_all();
}

#[tokio::test]
async fn install_env_forces_non_interactive() {
    let runtime = Arc::new(
        MockRuntime::new()
            .script("npm", ScriptedProcess::succeed())
            .script("npm", ScriptedProcess::never_exits()),
    );
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());

    bootstrapper.run(&node_tree()).await.unwrap();

    let records = runtime.spawn_records();
    let install = &records[0];
    assert_eq!(install.env.get("CI").map(String::as_str), Some("true"));
    assert!(install.env.contains_key("NO_UPDATE_NOTIFIER"));
    // The start process does not get the install environment.
    assert!(!records[1].env.contains_key("CI"));

    registry.kill_all();
}

#[tokio::test]
async fn lockfile_removed_before_install() {
    let tree = ProjectNode::Folder {
        folder_name: "app".to_string(),
        items: vec![
            file("package", "json", r#"{"scripts":{"dev":"vite"}}"#),
            file("package-lock", "json", "{}"),
        ],
    };
    let runtime = Arc::new(
        MockRuntime::new()
            .script("npm", ScriptedProcess::succeed())
            .script("npm", ScriptedProcess::never_exits()),
    );
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());

    bootstrapper.run(&tree).await.unwrap();

    assert!(!runtime.mounted_files().contains_key("package-lock.json"));
    assert!(runtime.mounted_files().contains_key("package.json"));

    registry.kill_all();
}

#[tokio::test]
async fn project_without_start_command_is_ready_immediately() {
    let tree = ProjectNode::Folder {
        folder_name: "py".to_string(),
        items: vec![file("requirements", "txt", "flask\n")],
    };
    let runtime = Arc::new(MockRuntime::new());
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());

    bootstrapper.run(&tree).await.unwrap();

    let state = bootstrapper.state();
    assert_eq!(state.step, BootstrapStep::Ready);
    assert!(state.complete);
    assert!(runtime.spawn_records().is_empty());
    assert!(registry.get_all().is_empty());
}

#[tokio::test]
async fn early_ready_notification_wins() {
    // Install takes a while; the runtime reports the server reachable
    // before the sequence gets anywhere near the starting step.
    let runtime = Arc::new(
        MockRuntime::new()
            .script(
                "npm",
                ScriptedProcess::succeed().after(Duration::from_millis(200)),
            )
            .script("npm", ScriptedProcess::never_exits()),
    );
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());

    let runner = bootstrapper.clone();
    let tree = node_tree();
    let run = tokio::spawn(async move { runner.run(&tree).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    runtime.emit_ready(5173, "http://localhost:5173");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let state = bootstrapper.state();
    assert_eq!(state.step, BootstrapStep::Ready);
    assert_eq!(state.url.as_deref(), Some("http://localhost:5173"));

    run.await.unwrap().unwrap();

    // Ready state survives the rest of the sequence.
    let state = bootstrapper.state();
    assert_eq!(state.step, BootstrapStep::Ready);
    assert_eq!(state.url.as_deref(), Some("http://localhost:5173"));
    assert!(state.complete);

    registry.kill_all();
}

#[tokio::test]
async fn completed_bootstrap_is_not_rerun_without_reset() {
    let runtime = Arc::new(MockRuntime::new().with_default_script(ScriptedProcess::never_exits()));
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());

    bootstrapper.run(&static_tree()).await.unwrap();
    assert_eq!(runtime.spawn_count("npx"), 1);

    // Idempotent no-op while complete.
    bootstrapper.run(&static_tree()).await.unwrap();
    assert_eq!(runtime.spawn_count("npx"), 1);

    // A force-reset allows a fresh run from the first step.
    bootstrapper.force_reset();
    assert_eq!(bootstrapper.state().step, BootstrapStep::Idle);
    bootstrapper.run(&static_tree()).await.unwrap();
    assert_eq!(runtime.spawn_count("npx"), 2);

    registry.kill_all();
}

#[tokio::test]
async fn malformed_tree_is_fatal() {
    let tree = ProjectNode::Folder {
        folder_name: "app".to_string(),
        items: vec![file("", "js", "x")],
    };
    let runtime = Arc::new(MockRuntime::new());
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime, registry, fast_config());

    let result = bootstrapper.run(&tree).await;
    assert!(result.is_err());

    let state = bootstrapper.state();
    assert!(!state.in_progress);
    assert!(!state.complete);
    assert!(state.error.is_some());
}

#[tokio::test]
async fn dev_server_exit_unregisters_process() {
    let runtime = Arc::new(
        MockRuntime::new().script(
            "npx",
            ScriptedProcess::exit_with(0)
                .with_output("done\n")
                .after(Duration::from_millis(30)),
        ),
    );
    let registry = ProcessRegistry::new();
    let bootstrapper = Bootstrapper::new(runtime.clone(), registry.clone(), fast_config());

    bootstrapper.run(&static_tree()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Natural exit cleaned the registry without a kill.
    assert!(registry.get_all().is_empty());
    let records = runtime.spawn_records();
    let controls = records[0].controls.lock().unwrap();
    assert!(controls.is_empty());
}
