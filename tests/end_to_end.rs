//! End-to-end orchestrator scenarios, driven against fake OS and brain
//! backends so the full cache -> heuristic -> AI -> safety -> synthesis
//! pipeline runs without a real inference endpoint or live system calls.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use umbrasol::brain::{Chunk, LlmClient};
use umbrasol::config::Config;
use umbrasol::hands::{Hands, ShellResult};
use umbrasol::internet::Internet;
use umbrasol::orchestrator::{fingerprint, Orchestrator};
use umbrasol::store::Store;

/// A scripted response table matched against the user prompt by substring,
/// first match wins. Covers both the initial THINK/SAY/ACT turn and any
/// reprompt turn issued after a failed action.
struct ScriptedBrain {
    rules: Vec<(&'static str, &'static str)>,
}

impl ScriptedBrain {
    fn new(rules: Vec<(&'static str, &'static str)>) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl LlmClient for ScriptedBrain {
    async fn think_stream(&self, _system_prompt: &str, user_prompt: &str) -> mpsc::Receiver<Chunk> {
        let (tx, rx) = mpsc::channel(4);
        let response = self
            .rules
            .iter()
            .find(|(pattern, _)| user_prompt.contains(pattern))
            .map(|(_, resp)| resp.to_string())
            .unwrap_or_default();
        tokio::spawn(async move {
            let _ = tx.send(Chunk::Text(response)).await;
        });
        rx
    }
}

/// A `Hands` double with canned per-capability responses and a call counter
/// on `execute_shell`, so a scripted command can fail on its first call and
/// succeed on a later one (scenario 6's retry path).
struct FakeHands {
    active_window: String,
    shell_calls: Mutex<HashMap<String, u32>>,
}

impl FakeHands {
    fn new() -> Self {
        Self {
            active_window: "ID: 0x1 | Title: vim - main.rs - project".to_string(),
            shell_calls: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Hands for FakeHands {
    async fn execute_shell(&self, cmd: &str) -> ShellResult {
        let mut calls = self.shell_calls.lock().await;
        let n = calls.entry(cmd.to_string()).or_insert(0);
        *n += 1;
        match cmd {
            "flaky" => ShellResult {
                exit_code: 1,
                output: "ERROR: connection refused".to_string(),
            },
            _ => ShellResult {
                exit_code: 0,
                output: format!("ok:{cmd}"),
            },
        }
    }
    async fn get_existence_stats(&self) -> String {
        "uptime 3d".to_string()
    }
    async fn get_physical_state(&self) -> String {
        "battery=50% thermal=30C".to_string()
    }
    async fn get_system_stats(&self) -> String {
        "cpu=10% mem=40%".to_string()
    }
    async fn list_dir(&self, path: &str) -> String {
        format!("a.txt b.txt in {path}")
    }
    async fn get_process_list(&self) -> String {
        "pid=1 name=init".to_string()
    }
    async fn suspend(&self, _pid: u32) -> String {
        "ok".to_string()
    }
    async fn resume(&self, _pid: u32) -> String {
        "ok".to_string()
    }
    async fn check_zombies(&self) -> String {
        "none".to_string()
    }
    async fn get_gpu_stats(&self) -> String {
        "gpu idle".to_string()
    }
    async fn get_startup_items(&self) -> String {
        "none".to_string()
    }
    async fn manage_service(&self, _name: &str, _action: &str) -> String {
        "ok".to_string()
    }
    async fn control_network(&self, _iface: &str, _up: bool) -> String {
        "ok".to_string()
    }
    async fn observe_ui_tree(&self) -> String {
        "tree".to_string()
    }
    async fn capture_screen(&self) -> String {
        "screen".to_string()
    }
    async fn ocr_screen(&self) -> String {
        "text".to_string()
    }
    async fn read_active_window(&self) -> String {
        self.active_window.clone()
    }
    async fn gui_click(&self, _x: i32, _y: i32) -> String {
        "ok".to_string()
    }
    async fn gui_type(&self, _text: &str) -> String {
        "ok".to_string()
    }
    async fn gui_scroll(&self, _direction: &str) -> String {
        "ok".to_string()
    }
    async fn speak(&self, _text: &str) -> String {
        "ok".to_string()
    }
    async fn stop_speaking(&self) -> String {
        "ok".to_string()
    }
}

fn fast_retry_config() -> Config {
    let mut config = Config::default();
    config.orchestrator.max_retries = 1;
    config
}

#[tokio::test]
async fn heuristic_hits_battery_without_a_brain_call() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let hands = Arc::new(FakeHands::new());
    // An empty rule table: if the heuristic layer didn't short-circuit, the
    // brain would return an empty response and the request would fail to
    // resolve any action at all.
    let brain: Arc<dyn LlmClient> = Arc::new(ScriptedBrain::new(vec![]));
    let orchestrator = Orchestrator::new(
        store.clone(),
        hands,
        brain,
        Arc::new(Internet::new()),
        Config::default(),
    );

    let result = orchestrator.handle_request("check battery", None).await;

    assert_eq!(result, "battery=50% thermal=30C");
    assert_eq!(store.audit_count().unwrap(), 1);
    assert_eq!(store.last_audit_risk().unwrap(), Some(umbrasol::store::Risk::Low));
    assert_eq!(store.get_cache(&fingerprint("check battery")).unwrap(), None);
}

#[tokio::test]
async fn heuristic_hits_list_files() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let hands = Arc::new(FakeHands::new());
    let brain: Arc<dyn LlmClient> = Arc::new(ScriptedBrain::new(vec![]));
    let orchestrator = Orchestrator::new(
        store.clone(),
        hands,
        brain,
        Arc::new(Internet::new()),
        Config::default(),
    );

    let result = orchestrator.handle_request("list files", None).await;

    assert_eq!(result, "a.txt b.txt in .");
    assert_eq!(store.audit_count().unwrap(), 1);
    assert_eq!(store.last_audit_risk().unwrap(), Some(umbrasol::store::Risk::Low));
}

#[tokio::test]
async fn ai_layer_handles_a_five_word_request_and_synthesizes_a_reply() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let hands = Arc::new(FakeHands::new());
    let brain: Arc<dyn LlmClient> = Arc::new(ScriptedBrain::new(vec![
        ("Request:", "SAY: The active window is project.\n"),
        (
            "what is my active window",
            "THINK: user asks window\nSAY: Checking.\nACT: see_active,\n",
        ),
    ]));
    let orchestrator = Orchestrator::new(
        store.clone(),
        hands,
        brain,
        Arc::new(Internet::new()),
        Config::default(),
    );

    let result = orchestrator
        .handle_request("what is my active window", None)
        .await;

    assert_eq!(result, "The active window is project.");
    assert_eq!(store.audit_count().unwrap(), 1);
    // A single successful LOW-risk action is learned as a fast path.
    assert_eq!(
        store.get_cache(&fingerprint("what is my active window")).unwrap(),
        Some(("see_active".to_string(), "".to_string()))
    );
}

#[tokio::test]
async fn high_risk_action_is_scrubbed_snapshotted_and_not_cached() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let hands = Arc::new(FakeHands::new());
    let brain: Arc<dyn LlmClient> = Arc::new(ScriptedBrain::new(vec![(
        "delete my temporary scratch files",
        "THINK: cleaning up\nACT: shell,rm -rf /tmp/foo\n",
    )]));
    let orchestrator = Orchestrator::new(
        store.clone(),
        hands,
        brain,
        Arc::new(Internet::new()),
        Config::default(),
    );

    let result = orchestrator
        .handle_request("delete my temporary scratch files", None)
        .await;

    // The scrubbed command is empty, so the shell double treats it as a
    // no-op success.
    assert!(!result.starts_with("ERROR"));
    assert_eq!(store.last_audit_risk().unwrap(), Some(umbrasol::store::Risk::High));
    assert_eq!(
        store
            .get_cache(&fingerprint("delete my temporary scratch files"))
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn unwhitelisted_tool_normalizes_to_stats() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let hands = Arc::new(FakeHands::new());
    let brain: Arc<dyn LlmClient> =
        Arc::new(ScriptedBrain::new(vec![("run mytool", "ACT: wizard,do-it\n")]));
    let orchestrator = Orchestrator::new(
        store.clone(),
        hands,
        brain,
        Arc::new(Internet::new()),
        Config::default(),
    );

    let result = orchestrator.handle_request("run mytool", None).await;

    assert_eq!(result, "cpu=10% mem=40%");
}

#[tokio::test]
async fn a_failed_action_retries_then_completes_on_a_different_suggestion() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let hands = Arc::new(FakeHands::new());
    let brain: Arc<dyn LlmClient> = Arc::new(ScriptedBrain::new(vec![
        ("The previous action failed with", "ACT: shell,works\n"),
        ("flaky-recover-case", "THINK: trying\nACT: shell,flaky\n"),
    ]));
    let orchestrator = Orchestrator::new(
        store.clone(),
        hands,
        brain,
        Arc::new(Internet::new()),
        fast_retry_config(),
    );

    let result = orchestrator
        .handle_request("please run the flaky-recover-case diagnostic tool now", None)
        .await;

    assert_eq!(result, "ok:works");
    assert_eq!(store.audit_count().unwrap(), 2);
}

#[tokio::test]
async fn a_circuit_breaker_aborts_on_an_identical_retried_suggestion() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let hands = Arc::new(FakeHands::new());
    let brain: Arc<dyn LlmClient> = Arc::new(ScriptedBrain::new(vec![
        ("The previous action failed with", "ACT: shell,flaky\n"),
        ("flaky-fail-case", "THINK: trying\nACT: shell,flaky\n"),
    ]));
    let orchestrator = Orchestrator::new(
        store.clone(),
        hands,
        brain,
        Arc::new(Internet::new()),
        fast_retry_config(),
    );

    let result = orchestrator
        .handle_request("please run the flaky-fail-case diagnostic tool now", None)
        .await;

    assert_eq!(result, "ERROR: connection refused");
    // Only the first attempt dispatches; the repeated suggestion is caught
    // by the circuit breaker before a second dispatch/log happens.
    assert_eq!(store.audit_count().unwrap(), 1);
}
