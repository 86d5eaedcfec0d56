//! Asynchronous speech queue shared by every OS backend.
//!
//! A single producer enqueues sanitized utterances from any task; one
//! dedicated consumer task drains them strictly in order. `stop` clears
//! whatever hasn't been spoken yet and kills the utterance in flight,
//! including its descendants, idempotently and without blocking on an idle
//! queue.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, Notify};
use tracing::warn;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Strips markdown emphasis characters and quotes, matching the prototype's
/// `gui_speak` sanitizer exactly.
pub fn sanitize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !matches!(c, '*' | '_' | '#' | '`'))
        .collect();
    stripped.replace(['\'', '"'], "")
}

struct Inner {
    queue: VecDeque<String>,
    current_child: Option<Child>,
}

pub struct VoiceQueue {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl VoiceQueue {
    /// Spawns the dedicated consumer task. `speak_backend` is the shell
    /// command template used to voice a sanitized utterance (actual speech
    /// synthesis is an external collaborator; by default this is a no-op
    /// command so the queue drains deterministically in environments with
    /// no TTS engine installed).
    pub fn spawn(speak_backend: Option<String>) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            queue: VecDeque::new(),
            current_child: None,
        }));
        let notify = Arc::new(Notify::new());

        let consumer_inner = inner.clone();
        let consumer_notify = notify.clone();
        tokio::spawn(async move {
            loop {
                let next = {
                    let mut guard = consumer_inner.lock().await;
                    guard.queue.pop_front()
                };
                let Some(text) = next else {
                    consumer_notify.notified().await;
                    continue;
                };
                speak_one(&consumer_inner, &text, speak_backend.as_deref()).await;
            }
        });

        Self { inner, notify }
    }

    /// Enqueues `text` and returns immediately.
    pub async fn enqueue(&self, text: &str) {
        let clean = sanitize(text);
        if clean.trim().is_empty() {
            return;
        }
        let mut guard = self.inner.lock().await;
        guard.queue.push_back(clean);
        drop(guard);
        self.notify.notify_one();
    }

    /// Clears pending utterances and kills the utterance currently playing,
    /// including any descendants it spawned (the shell wrapper and whatever
    /// the speech backend forks), if any. Idempotent: calling this on an
    /// idle queue is a cheap no-op.
    pub async fn stop(&self) {
        let mut guard = self.inner.lock().await;
        guard.queue.clear();
        if let Some(mut child) = guard.current_child.take() {
            kill_process_tree(&mut child);
        }
    }
}

/// On unix, the child is spawned as its own process-group leader (see
/// `speak_one`), so signalling the whole group reaches descendants the shell
/// wrapper forked, not just the immediate `sh` process. Mirrors this repo's
/// existing `nix::sys::signal::kill` graceful-shutdown pattern, widened from
/// a single pid to a process group.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    match child.id() {
        Some(pid) => {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                warn!("failed to kill speaking process group {pid}: {e}");
            }
        }
        None => {
            // Already reaped; nothing left to signal.
        }
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        warn!("failed to kill speaking child: {e}");
    }
}

async fn speak_one(inner: &Arc<Mutex<Inner>>, text: &str, backend: Option<&str>) {
    let Some(backend) = backend else {
        return;
    };
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(format!("{backend} {}", shlex::try_quote(text).unwrap_or_default()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    command.process_group(0);
    let child = command.spawn();

    let Ok(child) = child else {
        return;
    };

    {
        let mut guard = inner.lock().await;
        guard.current_child = Some(child);
    }

    let wait_result = {
        let mut guard = inner.lock().await;
        match guard.current_child.take() {
            Some(mut c) => {
                drop(guard);
                Some(c.wait().await)
            }
            None => None,
        }
    };
    let _ = wait_result;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_markdown_chars() {
        assert_eq!(sanitize("**hello** `world`_!_"), "helloworld!");
    }

    #[test]
    fn sanitize_strips_quotes() {
        assert_eq!(sanitize("She said \"hi\" and 'bye'"), "She said hi and bye");
    }

    #[tokio::test]
    async fn stop_on_idle_queue_does_not_block() {
        let vq = VoiceQueue::spawn(None);
        vq.stop().await;
    }

    #[tokio::test]
    async fn enqueue_then_stop_clears_queue() {
        let vq = VoiceQueue::spawn(None);
        vq.enqueue("hello").await;
        vq.enqueue("world").await;
        vq.stop().await;
        let guard = vq.inner.lock().await;
        assert!(guard.queue.is_empty());
    }
}
