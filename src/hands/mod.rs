//! Capability-level OS interface ("Hands").
//!
//! One concrete implementation per OS; every method is total: unsupported
//! capabilities return an `ERROR:`-prefixed string rather than panicking.
//! Speech is the one asynchronous capability: `speak` enqueues and returns
//! immediately, a single dedicated consumer task drains the queue in order.

pub mod linux;
pub mod stub;
pub mod voice;

use async_trait::async_trait;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Action {
    pub tool: String,
    pub cmd: String,
}

#[derive(Debug, Clone, Default)]
pub struct ShellResult {
    pub exit_code: i32,
    pub output: String,
}

/// Capability set exposed by every OS backend. All methods return owned
/// strings following the `ERROR:` / `BLOCKED:` / anything-else-is-success
/// convention used throughout the orchestrator.
#[async_trait]
pub trait Hands: Send + Sync {
    async fn execute_shell(&self, cmd: &str) -> ShellResult;
    async fn get_existence_stats(&self) -> String;
    async fn get_physical_state(&self) -> String;
    async fn get_system_stats(&self) -> String;
    async fn list_dir(&self, path: &str) -> String;
    async fn get_process_list(&self) -> String;
    async fn suspend(&self, pid: u32) -> String;
    async fn resume(&self, pid: u32) -> String;
    async fn check_zombies(&self) -> String;
    async fn get_gpu_stats(&self) -> String;
    async fn get_startup_items(&self) -> String;
    async fn manage_service(&self, name: &str, action: &str) -> String;
    async fn control_network(&self, iface: &str, up: bool) -> String;
    async fn observe_ui_tree(&self) -> String;
    async fn capture_screen(&self) -> String;
    async fn ocr_screen(&self) -> String;
    async fn read_active_window(&self) -> String;
    async fn gui_click(&self, x: i32, y: i32) -> String;
    async fn gui_type(&self, text: &str) -> String;
    async fn gui_scroll(&self, direction: &str) -> String;

    /// Enqueues `text` for speech and returns immediately.
    async fn speak(&self, text: &str) -> String;
    /// Clears the voice queue and kills the currently speaking child, if any.
    async fn stop_speaking(&self) -> String;
}

pub fn unsupported(capability: &str) -> String {
    format!("ERROR: capability '{capability}' unsupported on this platform")
}

#[cfg(target_os = "linux")]
pub fn current_platform() -> std::sync::Arc<dyn Hands> {
    std::sync::Arc::new(linux::LinuxHands::new())
}

#[cfg(not(target_os = "linux"))]
pub fn current_platform() -> std::sync::Arc<dyn Hands> {
    std::sync::Arc::new(stub::StubHands::new())
}
