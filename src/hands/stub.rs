//! Fallback backend for platforms without a dedicated implementation yet
//! (Windows, Android). Every capability reports `ERROR:` rather than
//! panicking, per the Hands interface's totality requirement. Voice still
//! works since sanitization/ordering/stop semantics are platform-agnostic.

use super::voice::VoiceQueue;
use super::{unsupported, Hands, ShellResult};
use async_trait::async_trait;

pub struct StubHands {
    voice: VoiceQueue,
}

impl StubHands {
    pub fn new() -> Self {
        Self {
            voice: VoiceQueue::spawn(None),
        }
    }
}

impl Default for StubHands {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Hands for StubHands {
    async fn execute_shell(&self, _cmd: &str) -> ShellResult {
        ShellResult {
            exit_code: -1,
            output: unsupported("execute_shell"),
        }
    }
    async fn get_existence_stats(&self) -> String {
        unsupported("existence")
    }
    async fn get_physical_state(&self) -> String {
        unsupported("physical")
    }
    async fn get_system_stats(&self) -> String {
        unsupported("stats")
    }
    async fn list_dir(&self, _path: &str) -> String {
        unsupported("ls")
    }
    async fn get_process_list(&self) -> String {
        unsupported("proc_list")
    }
    async fn suspend(&self, _pid: u32) -> String {
        unsupported("suspend")
    }
    async fn resume(&self, _pid: u32) -> String {
        unsupported("resume")
    }
    async fn check_zombies(&self) -> String {
        unsupported("check_zombies")
    }
    async fn get_gpu_stats(&self) -> String {
        unsupported("gpu")
    }
    async fn get_startup_items(&self) -> String {
        unsupported("startup")
    }
    async fn manage_service(&self, _name: &str, _action: &str) -> String {
        unsupported("service")
    }
    async fn control_network(&self, _iface: &str, _up: bool) -> String {
        unsupported("net_ctl")
    }
    async fn observe_ui_tree(&self) -> String {
        unsupported("see_tree")
    }
    async fn capture_screen(&self) -> String {
        unsupported("see_raw")
    }
    async fn ocr_screen(&self) -> String {
        unsupported("ocr")
    }
    async fn read_active_window(&self) -> String {
        unsupported("see_active")
    }
    async fn gui_click(&self, _x: i32, _y: i32) -> String {
        unsupported("gui_click")
    }
    async fn gui_type(&self, _text: &str) -> String {
        unsupported("gui_type")
    }
    async fn gui_scroll(&self, _direction: &str) -> String {
        unsupported("gui_scroll")
    }
    async fn speak(&self, text: &str) -> String {
        self.voice.enqueue(text).await;
        "SUCCESS: queued".to_string()
    }
    async fn stop_speaking(&self) -> String {
        self.voice.stop().await;
        "SUCCESS: stopped".to_string()
    }
}
