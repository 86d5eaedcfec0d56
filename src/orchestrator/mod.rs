//! The request orchestrator, the core of the system.
//!
//! Owns the full request lifecycle: task bookkeeping, context sensing,
//! cache → heuristic → streaming-brain gating, per-action safety and
//! self-correction retries, synthesis, learning writebacks, and crash
//! recovery. See the module's companion files for dispatch mapping, the
//! health heartbeat, and the process lock.

pub mod dispatch;
pub mod health;
pub mod lock;

use crate::brain::LlmClient;
use crate::config::Config;
use crate::errors::Result;
use crate::hands::Hands;
use crate::internet::Internet;
use crate::safety;
use crate::soul::{self, StreamEvent};
use crate::store::{ExperienceLesson, Risk, Store, TaskStatus};
use chrono::{Local, Timelike};
use md5::{Digest, Md5};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use dispatch::{dispatch, heuristic_lookup};
use health::HealthMonitor;

const SYSTEM_PROMPT: &str = "You are Umbrasol. Respond using THINK:, SAY:, and ACT: <tool>,<arg> lines.";

pub struct Orchestrator {
    store: Arc<Store>,
    hands: Arc<dyn Hands>,
    brain: Arc<dyn LlmClient>,
    internet: Arc<Internet>,
    config: Config,
    worker_permits: Semaphore,
    health: HealthMonitor,
}

impl Orchestrator {
    pub fn new(
        store: Arc<Store>,
        hands: Arc<dyn Hands>,
        brain: Arc<dyn LlmClient>,
        internet: Arc<Internet>,
        config: Config,
    ) -> Self {
        let health = HealthMonitor::start(config.orchestrator.health_check_interval_secs);
        Self {
            store,
            hands,
            brain,
            internet,
            config,
            worker_permits: Semaphore::new(config.orchestrator.max_concurrent_tasks),
            health,
        }
    }

    pub async fn liveness(&self) -> health::Liveness {
        self.health.liveness().await
    }

    /// Resumes tasks left pending by a previous run, capped at
    /// `max_task_resume`, oldest first.
    pub async fn recover_pending_tasks(&self) -> Result<()> {
        let pending = self
            .store
            .get_pending_tasks(self.config.orchestrator.max_task_resume)?;
        for task in pending {
            info!(task_id = task.id, "resuming pending task from prior run");
            let _ = self.handle_request(&task.request, Some(task.id)).await;
        }
        Ok(())
    }

    /// Drives one request through the full lifecycle and returns the
    /// best-effort assembled textual response.
    pub async fn handle_request(&self, request: &str, task_id: Option<i64>) -> String {
        let task_id = match task_id {
            Some(id) => id,
            None => match self.store.add_task(request) {
                Ok(id) => id,
                Err(e) => {
                    warn!("failed to create task: {e}");
                    let _ = self.store.log_action(request, "ERROR: persistence", Risk::Low);
                    return "ERROR: persistence".to_string();
                }
            },
        };

        let _ = self.hands.stop_speaking().await;

        let context_key = self.current_context_key().await;
        let fingerprint = fingerprint(request);

        // Cache layer.
        if let Ok(Some((tool, cmd))) = self.store.get_cache(&fingerprint) {
            let result = dispatch(self.hands.as_ref(), &self.internet, &tool, &cmd).await;
            let risk = safety::classify_risk(&cmd);
            let _ = self.store.log_action(&format!("{tool},{cmd}"), &result, risk);
            let _ = self.store.record_habit(&context_key, &tool);
            self.finish_task(task_id, TaskStatus::Completed);
            return result;
        }

        // Heuristic layer: only for short requests.
        let word_count = request.split_whitespace().count();
        if word_count < self.config.orchestrator.heuristic_word_threshold {
            if let Some((tool, cmd)) = heuristic_lookup(request) {
                let result = dispatch(self.hands.as_ref(), &self.internet, tool, cmd).await;
                let risk = safety::classify_risk(cmd);
                let _ = self.store.log_action(&format!("{tool},{cmd}"), &result, risk);
                let _ = self.store.record_habit(&context_key, tool);
                self.finish_task(task_id, TaskStatus::Completed);
                return result;
            }
        }

        // AI layer.
        let mut stream = soul::execute_task_stream(self.brain.as_ref(), SYSTEM_PROMPT, request).await;
        let mut talk_accum = String::new();
        let mut actions = Vec::new();
        let mut sentence_buffer = SentenceBuffer::new();
        while let Some(event) = stream.recv().await {
            match event {
                StreamEvent::Talk(t) => {
                    talk_accum.push_str(&t);
                    if self.config.voice_mode {
                        if let Some(chunk) = sentence_buffer
                            .push(&t, self.config.orchestrator.sentence_buffer_words)
                        {
                            let _ = self.hands.speak(&chunk).await;
                        }
                    }
                }
                StreamEvent::Reasoning(_) => {}
                StreamEvent::Action(a) => actions = a,
            }
        }
        if self.config.voice_mode {
            if let Some(residue) = sentence_buffer.flush_residue() {
                let _ = self.hands.speak(&residue).await;
            }
        }

        if actions.is_empty() {
            self.finish_task(task_id, TaskStatus::Completed);
            return if talk_accum.trim().is_empty() {
                "I didn't understand that request.".to_string()
            } else {
                talk_accum
            };
        }

        let mut last_result = String::new();
        let mut any_success = false;
        let single_action = actions.len() == 1;
        let mut executed_tool = String::new();
        let mut executed_cmd = String::new();
        let mut executed_risk = Risk::Low;

        let _permit = self.worker_permits.acquire().await;
        for action in &actions {
            let (result, tool, cmd, ok, risk) = self.execute_with_retries(request, action).await;
            last_result = result;
            executed_tool = tool;
            executed_cmd = cmd;
            executed_risk = risk;
            any_success = any_success || ok;
        }
        drop(_permit);

        if any_success {
            let mut synth_rx = soul::synthesize(self.brain.as_ref(), request, &last_result).await;
            let mut synthesized = String::new();
            let mut synth_buffer = SentenceBuffer::new();
            while let Some(event) = synth_rx.recv().await {
                if let StreamEvent::Talk(t) = event {
                    synthesized.push_str(&t);
                    if self.config.voice_mode {
                        if let Some(chunk) = synth_buffer
                            .push(&t, self.config.orchestrator.sentence_buffer_words)
                        {
                            let _ = self.hands.speak(&chunk).await;
                        }
                    }
                }
            }
            if self.config.voice_mode {
                if let Some(residue) = synth_buffer.flush_residue() {
                    let _ = self.hands.speak(&residue).await;
                }
            }
            if !synthesized.trim().is_empty() {
                talk_accum = synthesized;
            }
        }

        // A HIGH-risk action is not learned as a fast path: its scrubbed,
        // no-op-shaped cmd isn't representative of what the user actually
        // asked for, so caching it would teach the wrong shortcut.
        if single_action && any_success && executed_risk != Risk::High {
            let _ = self.store.set_cache(&fingerprint, &executed_tool, &executed_cmd);
            let _ = self.store.record_habit(&context_key, &executed_tool);
        }

        let task_key = request.to_lowercase().trim().to_string();
        let lesson = ExperienceLesson {
            tool: executed_tool,
            action: executed_cmd,
            error: if any_success {
                None
            } else {
                Some(last_result.clone())
            },
            success: any_success,
        };
        let _ = self.store.save_experience(&task_key, &lesson);

        self.finish_task(
            task_id,
            if any_success {
                TaskStatus::Completed
            } else {
                TaskStatus::Failed
            },
        );

        if talk_accum.trim().is_empty() {
            last_result
        } else {
            talk_accum
        }
    }

    /// Per-action safety classification, snapshotting, and the bounded
    /// self-correction retry loop with a per-request identical-signature
    /// circuit breaker. Risk is classified on the raw, pre-scrub command so
    /// a sensitive command is still recognized as HIGH/MEDIUM even after its
    /// argument is zeroed for dispatch.
    async fn execute_with_retries(
        &self,
        original_request: &str,
        action: &crate::hands::Action,
    ) -> (String, String, String, bool, Risk) {
        let mut tool = action.tool.clone();
        let mut raw_cmd = action.cmd.clone();

        if safety::check_whitelist(&tool).is_err() {
            let result = format!("BLOCKED: tool '{tool}' not in whitelist");
            let _ = self
                .store
                .log_action(&format!("{tool},{raw_cmd}"), &result, Risk::Low);
            return (result, tool, raw_cmd, false, Risk::Low);
        }

        let mut tried: HashSet<(String, String)> = HashSet::new();
        let max_retries = self.config.orchestrator.max_retries;
        let mut last_result = String::new();
        let mut last_risk = Risk::Low;

        for attempt in 0..=max_retries {
            let risk = safety::classify_risk(&raw_cmd);
            last_risk = risk;
            if matches!(risk, Risk::Medium | Risk::High) {
                if let Some(path_arg) = extract_path_like_arg(&raw_cmd) {
                    let path = std::path::Path::new(&path_arg);
                    if let Err(e) = safety::snapshot(path, &self.config.paths.backup_dir) {
                        warn!("snapshot failed for {path_arg}: {e}");
                    }
                }
            }
            if risk == Risk::High && self.config.voice_mode {
                let _ = self
                    .hands
                    .speak("Warning: this action is high risk.")
                    .await;
            }

            let cmd = safety::scrub_sensitive(&raw_cmd);
            tried.insert((tool.clone(), raw_cmd.clone()));
            let result = dispatch(self.hands.as_ref(), &self.internet, &tool, &cmd).await;
            let _ = self
                .store
                .log_action(&format!("{tool},{cmd}"), &result, risk);
            last_result = result.clone();

            if !result.starts_with("ERROR:") && !result.starts_with("BLOCKED:") {
                return (result, tool, cmd, true, risk);
            }

            if attempt == max_retries {
                break;
            }

            let backoff = std::time::Duration::from_secs(2u64.pow(attempt));
            tokio::time::sleep(backoff).await;

            let reprompt = format!(
                "{original_request}\n\nThe previous action failed with: {result}\nSuggest exactly one new ACT: line."
            );
            let reply = self.brain.think(SYSTEM_PROMPT, &reprompt).await;
            let mut parser = crate::soul::ProtocolParser::new();
            parser.feed(&reply);
            let (_, suggested) = parser.finish(original_request);
            let Some(next) = suggested.into_iter().next() else {
                break;
            };
            if tried.contains(&(next.tool.clone(), next.cmd.clone())) {
                break;
            }
            tool = next.tool;
            raw_cmd = next.cmd;
        }

        (
            last_result,
            tool,
            safety::scrub_sensitive(&raw_cmd),
            false,
            last_risk,
        )
    }

    fn finish_task(&self, task_id: i64, status: TaskStatus) {
        let _ = self
            .store
            .update_task_checkpoint(task_id, status, r#"{"stage":"finished"}"#);
    }

    async fn current_context_key(&self) -> String {
        let slot = time_slot(Local::now().hour());
        let window = self.hands.read_active_window().await;
        let app = app_name_from_window_title(&window);
        format!("{slot}|{app}")
    }
}

pub fn fingerprint(request: &str) -> String {
    let normalized = request.to_lowercase();
    let normalized = normalized.trim();
    let mut hasher = Md5::new();
    hasher.update(normalized.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

pub fn time_slot(hour: u32) -> &'static str {
    match hour {
        5..=11 => "Morning",
        12..=16 => "Afternoon",
        17..=21 => "Evening",
        _ => "Night",
    }
}

pub fn app_name_from_window_title(title: &str) -> String {
    if let Some(last) = title.rsplit('-').next() {
        let trimmed = last.trim();
        if trimmed != title.trim() {
            return trimmed.chars().take(20).collect();
        }
    }
    title.trim().chars().take(20).collect()
}

/// Buffers streamed talk text for voice-mode playback, flushing on a
/// sentence terminator or once the buffer exceeds a word threshold, per
/// this repo's sentence-buffer tunable.
struct SentenceBuffer {
    buf: String,
}

impl SentenceBuffer {
    fn new() -> Self {
        Self { buf: String::new() }
    }

    /// Appends `delta`; returns the buffered text to speak once a
    /// terminator appears or the word count exceeds `word_threshold`.
    fn push(&mut self, delta: &str, word_threshold: usize) -> Option<String> {
        self.buf.push_str(delta);
        let has_terminator = self.buf.contains(['.', '!', '?', ',', ';', ':', '\n']);
        let word_count = self.buf.split_whitespace().count();
        if has_terminator || word_count > word_threshold {
            Some(std::mem::take(&mut self.buf))
        } else {
            None
        }
    }

    /// Flushes whatever is left unspoken at stream end.
    fn flush_residue(&mut self) -> Option<String> {
        if self.buf.trim().is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buf))
        }
    }
}

fn extract_path_like_arg(cmd: &str) -> Option<String> {
    cmd.split_whitespace()
        .find(|tok| tok.starts_with('/') || tok.starts_with("./"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentence_buffer_flushes_on_terminator() {
        let mut buf = SentenceBuffer::new();
        assert_eq!(buf.push("Checking", 8), None);
        assert_eq!(buf.push(".", 8), Some("Checking.".to_string()));
    }

    #[test]
    fn sentence_buffer_flushes_past_word_threshold() {
        let mut buf = SentenceBuffer::new();
        assert_eq!(buf.push("one two", 3), None);
        assert_eq!(
            buf.push(" three four", 3),
            Some("one two three four".to_string())
        );
    }

    #[test]
    fn sentence_buffer_flush_residue_drains_leftovers() {
        let mut buf = SentenceBuffer::new();
        assert_eq!(buf.flush_residue(), None);
        buf.push("trailing words", 8);
        assert_eq!(buf.flush_residue(), Some("trailing words".to_string()));
        assert_eq!(buf.flush_residue(), None);
    }

    #[test]
    fn fingerprint_is_case_and_whitespace_insensitive() {
        assert_eq!(fingerprint("  Check Battery  "), fingerprint("check battery"));
        assert_ne!(fingerprint("check battery"), fingerprint("checkbattery"));
    }

    #[test]
    fn time_slot_boundaries() {
        assert_eq!(time_slot(5), "Morning");
        assert_eq!(time_slot(11), "Morning");
        assert_eq!(time_slot(12), "Afternoon");
        assert_eq!(time_slot(16), "Afternoon");
        assert_eq!(time_slot(17), "Evening");
        assert_eq!(time_slot(21), "Evening");
        assert_eq!(time_slot(22), "Night");
        assert_eq!(time_slot(4), "Night");
    }

    #[test]
    fn app_name_takes_last_dash_token_capped_at_20() {
        assert_eq!(app_name_from_window_title("ID: 0x1 | Title: vim - main.rs - project"), "project");
        let long = "a".repeat(30);
        assert_eq!(app_name_from_window_title(&long).len(), 20);
    }
}
