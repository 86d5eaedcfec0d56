//! Linux capability backend.
//!
//! Shells out to the same small set of standard utilities the prototype
//! used (`xdotool`, `xwininfo`, `xprop`, `xwd`), falling back to
//! `/proc`-reads for system stats. Every method stays total: a missing tool
//! or a subprocess failure is reported as an `ERROR:` string, never a panic.

use super::voice::VoiceQueue;
use super::{Hands, ShellResult};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

const SHELL_TIMEOUT_SECS: u64 = 60;

/// Contraction expansions and the product's own phonetic hyphenation,
/// applied before markdown/quote sanitization so the speech backend reads
/// them naturally rather than spelling out the apostrophe or mangling the
/// name. Direct port of the prototype's `phonetic_map`.
static PHONETIC_MAP: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\bi'd\b", "I would"),
        (r"(?i)\bi've\b", "I have"),
        (r"(?i)\bi'm\b", "I am"),
        (r"(?i)\byou're\b", "you are"),
        (r"(?i)\bit's\b", "it is"),
        (r"(?i)\bdon't\b", "do not"),
        (r"(?i)\bcan't\b", "cannot"),
        (r"(?i)\bwon't\b", "will not"),
        (r"(?i)\bhe's\b", "he is"),
        (r"(?i)\bshe's\b", "she is"),
        (r"(?i)\bthey're\b", "they are"),
        (r"(?i)\bwe're\b", "we are"),
        (r"(?i)\bcouldn't\b", "could not"),
        (r"(?i)\bshouldn't\b", "should not"),
        (r"(?i)\bwouldn't\b", "would not"),
        (r"(?i)\bumbrasol\b", "Um-bra-sol"),
    ]
    .iter()
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("static phonetic pattern must compile"),
            *replacement,
        )
    })
    .collect()
});

fn humanize_for_speech(text: &str) -> String {
    let mut out = text.to_string();
    for (pattern, replacement) in PHONETIC_MAP.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}

pub struct LinuxHands {
    voice: VoiceQueue,
}

impl LinuxHands {
    pub fn new() -> Self {
        // Actual speech synthesis is an external collaborator; when
        // `spd-say` is present on the host we use it, otherwise utterances
        // are sanitized and silently dropped.
        let backend = which("spd-say").then(|| "spd-say".to_string());
        Self {
            voice: VoiceQueue::spawn(backend),
        }
    }
}

impl Default for LinuxHands {
    fn default() -> Self {
        Self::new()
    }
}

fn which(bin: &str) -> bool {
    std::process::Command::new("which")
        .arg(bin)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

async fn run_shell(cmd: &str, timeout_secs: u64) -> ShellResult {
    let fut = Command::new("sh").arg("-c").arg(cmd).output();
    match timeout(Duration::from_secs(timeout_secs), fut).await {
        Ok(Ok(output)) => ShellResult {
            exit_code: output.status.code().unwrap_or(-1),
            output: if output.status.success() {
                String::from_utf8_lossy(&output.stdout).to_string()
            } else {
                format!(
                    "ERROR: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                )
            },
        },
        Ok(Err(e)) => ShellResult {
            exit_code: -1,
            output: format!("ERROR: failed to launch: {e}"),
        },
        Err(_) => ShellResult {
            exit_code: -1,
            output: format!("ERROR: command timed out after {timeout_secs}s"),
        },
    }
}

#[async_trait]
impl Hands for LinuxHands {
    async fn execute_shell(&self, cmd: &str) -> ShellResult {
        run_shell(cmd, SHELL_TIMEOUT_SECS).await
    }

    async fn get_existence_stats(&self) -> String {
        let uptime_raw = tokio::fs::read_to_string("/proc/uptime").await;
        let uptime_seconds = uptime_raw
            .ok()
            .and_then(|s| s.split_whitespace().next().map(str::to_string))
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);
        let host = whoami::fallible::hostname().unwrap_or_else(|_| "unknown".to_string());
        let identity = whoami::username();
        format!(
            "identity={identity} host={host} os=linux uptime_seconds={uptime_seconds:.0} status=online"
        )
    }

    async fn get_physical_state(&self) -> String {
        let battery = run_shell("cat /sys/class/power_supply/BAT0/capacity 2>/dev/null", 5)
            .await
            .output;
        let battery = if battery.starts_with("ERROR") || battery.trim().is_empty() {
            "N/A".to_string()
        } else {
            format!("{}%", battery.trim())
        };
        let thermal = run_shell(
            "cat /sys/class/thermal/thermal_zone0/temp 2>/dev/null",
            5,
        )
        .await
        .output;
        let thermal = thermal
            .trim()
            .parse::<f64>()
            .map(|milli_c| format!("{:.1}C", milli_c / 1000.0))
            .unwrap_or_else(|_| "N/A".to_string());
        format!("battery={battery} thermal={thermal}")
    }

    async fn get_system_stats(&self) -> String {
        let cpu = run_shell(
            "top -bn1 | grep '%Cpu' | awk '{print $2}'",
            5,
        )
        .await
        .output;
        let ram = run_shell("free -m | awk '/Mem:/ {print $3\"/\"$2\" MB\"}'", 5)
            .await
            .output;
        let disk = run_shell("df -h / | awk 'NR==2 {print $3\"/\"$2}'", 5)
            .await
            .output;
        format!(
            "cpu={} ram={} disk={}",
            cpu.trim(),
            ram.trim(),
            disk.trim()
        )
    }

    async fn list_dir(&self, path: &str) -> String {
        match tokio::fs::read_dir(path).await {
            Ok(mut entries) => {
                let mut names = Vec::new();
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => names.push(entry.file_name().to_string_lossy().to_string()),
                        Ok(None) => break,
                        Err(e) => return format!("ERROR: {e}"),
                    }
                }
                names.join("\n")
            }
            Err(e) => format!("ERROR: {e}"),
        }
    }

    async fn get_process_list(&self) -> String {
        let result = run_shell("ps -eo pid,comm,%cpu --sort=-%cpu | head -n 16", 5).await;
        result.output
    }

    async fn suspend(&self, pid: u32) -> String {
        run_shell(&format!("kill -STOP {pid}"), 5).await.output
    }

    async fn resume(&self, pid: u32) -> String {
        run_shell(&format!("kill -CONT {pid}"), 5).await.output
    }

    async fn check_zombies(&self) -> String {
        run_shell("ps -eo stat,pid,comm | awk '$1 ~ /Z/'", 5)
            .await
            .output
    }

    async fn get_gpu_stats(&self) -> String {
        if !which("nvidia-smi") {
            return super::unsupported("gpu stats (no nvidia-smi)");
        }
        run_shell(
            "nvidia-smi --query-gpu=utilization.gpu,memory.used,memory.total --format=csv,noheader",
            5,
        )
        .await
        .output
    }

    async fn get_startup_items(&self) -> String {
        run_shell("ls /etc/xdg/autostart 2>/dev/null", 5).await.output
    }

    async fn manage_service(&self, name: &str, action: &str) -> String {
        let allowed = ["start", "stop", "restart", "status"];
        if !allowed.contains(&action) {
            return format!("BLOCKED: unsupported service action '{action}'");
        }
        run_shell(&format!("systemctl {action} {name}"), 10).await.output
    }

    async fn control_network(&self, iface: &str, up: bool) -> String {
        let state = if up { "up" } else { "down" };
        run_shell(&format!("ip link set {iface} {state}"), 5).await.output
    }

    async fn observe_ui_tree(&self) -> String {
        if !which("xwininfo") {
            return super::unsupported("ui tree (missing xwininfo)");
        }
        run_shell("xwininfo -tree -root", 10).await.output
    }

    async fn capture_screen(&self) -> String {
        if !which("xwd") {
            return super::unsupported("screen capture (missing xwd)");
        }
        let path = "/tmp/umbrasol_screen.xwd";
        let result = run_shell(&format!("xwd -root -out {path}"), 10).await;
        if result.output.starts_with("ERROR") {
            result.output
        } else {
            format!("SUCCESS: saved to {path}")
        }
    }

    async fn ocr_screen(&self) -> String {
        super::unsupported("ocr")
    }

    async fn read_active_window(&self) -> String {
        if !which("xprop") {
            return super::unsupported("active window (missing xprop)");
        }
        let id_result = run_shell("xprop -root _NET_ACTIVE_WINDOW", 5).await;
        let id = id_result
            .output
            .split_whitespace()
            .last()
            .unwrap_or("0x0")
            .to_string();
        let title_result = run_shell(&format!("xprop -id {id} WM_NAME"), 5).await;
        if title_result.output.starts_with("ERROR") {
            format!("UNKNOWN (id={id})")
        } else {
            format!("ID: {id} | Title: {}", title_result.output.trim())
        }
    }

    async fn gui_click(&self, x: i32, y: i32) -> String {
        if !which("xdotool") {
            return "ERROR: Missing 'xdotool', cannot perform gui_click".to_string();
        }
        run_shell(&format!("xdotool mousemove {x} {y} click 1"), 5)
            .await
            .output
    }

    async fn gui_type(&self, text: &str) -> String {
        if !which("xdotool") {
            return "ERROR: Missing 'xdotool', cannot perform gui_type".to_string();
        }
        let quoted = shlex::try_quote(text).unwrap_or_default();
        run_shell(&format!("xdotool type {quoted}"), 10).await.output
    }

    async fn gui_scroll(&self, direction: &str) -> String {
        if !which("xdotool") {
            return "ERROR: Missing 'xdotool', cannot perform gui_scroll".to_string();
        }
        let button = if direction == "up" { "4" } else { "5" };
        run_shell(&format!("xdotool click {button}"), 5).await.output
    }

    async fn speak(&self, text: &str) -> String {
        self.voice.enqueue(&humanize_for_speech(text)).await;
        "SUCCESS: queued".to_string()
    }

    async fn stop_speaking(&self) -> String {
        self.voice.stop().await;
        "SUCCESS: stopped".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_expands_contractions() {
        assert_eq!(humanize_for_speech("I'm not sure, I can't tell"), "I am not sure, cannot tell");
    }

    #[test]
    fn humanize_hyphenates_the_product_name() {
        assert_eq!(humanize_for_speech("Umbrasol is ready"), "Um-bra-sol is ready");
    }
}
