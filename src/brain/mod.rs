//! Streaming client to the local inference endpoint.
//!
//! Wire protocol matches the prototype's `think_stream`: POST
//! `{endpoint}/api/generate` with `{model, prompt, stream: true, options}`,
//! response is newline-delimited JSON `{response, done}` objects. Chunks are
//! forwarded over an `mpsc` channel by a background task, mirroring this
//! repo's existing streaming-response-to-channel adapter, with an overall
//! stream timeout and a separate inter-chunk timeout.

use crate::config::BrainConfig;
use crate::errors::{BrainError, Result};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::warn;

#[derive(Debug, Clone)]
pub enum Chunk {
    Text(String),
    Error(String),
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
    num_thread: u32,
    num_ctx: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponseLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
}

#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Streams text chunks; the channel closes after a terminal `Chunk::Error`
    /// or at natural stream end.
    async fn think_stream(&self, system_prompt: &str, user_prompt: &str) -> mpsc::Receiver<Chunk>;

    /// Non-streaming convenience used by the retry/reprompt path: drains the
    /// stream and concatenates the text chunks.
    async fn think(&self, system_prompt: &str, user_prompt: &str) -> String {
        let mut rx = self.think_stream(system_prompt, user_prompt).await;
        let mut out = String::new();
        while let Some(chunk) = rx.recv().await {
            match chunk {
                Chunk::Text(t) => out.push_str(&t),
                Chunk::Error(e) => {
                    out.push_str(&format!("ERROR: {e}"));
                    break;
                }
            }
        }
        out
    }
}

pub struct BrainClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    config: BrainConfig,
}

impl BrainClient {
    pub fn new(endpoint: String, model: String, config: BrainConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            model,
            config,
        }
    }

    async fn open_stream(&self, prompt: &str) -> Result<reqwest::Response> {
        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
            options: GenerateOptions {
                temperature: self.config.temperature,
                num_predict: self.config.num_predict,
                num_thread: self.config.num_thread,
                num_ctx: self.config.num_ctx,
            },
        };
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrainError::Http(e.to_string()))?;
        Ok(response)
    }
}

#[async_trait::async_trait]
impl LlmClient for BrainClient {
    async fn think_stream(&self, system_prompt: &str, user_prompt: &str) -> mpsc::Receiver<Chunk> {
        let (tx, rx) = mpsc::channel(64);
        let prompt = format!("{system_prompt}\n\n{user_prompt}");
        let stream_timeout = Duration::from_secs(self.config.stream_timeout_secs);
        let chunk_timeout = Duration::from_secs(self.config.chunk_timeout_secs);

        let response = match self.open_stream(&prompt).await {
            Ok(r) => r,
            Err(e) => {
                let _ = tx.send(Chunk::Error(e.to_string())).await;
                return rx;
            }
        };

        tokio::spawn(async move {
            let started = Instant::now();
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            loop {
                if started.elapsed() > stream_timeout {
                    let _ = tx
                        .send(Chunk::Error("stream exceeded overall timeout".to_string()))
                        .await;
                    break;
                }

                let next = match timeout(chunk_timeout, byte_stream.next()).await {
                    Ok(Some(Ok(bytes))) => bytes,
                    Ok(Some(Err(e))) => {
                        let _ = tx.send(Chunk::Error(format!("stream error: {e}"))).await;
                        break;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        let _ = tx
                            .send(Chunk::Error("stream stalled past inter-chunk timeout".to_string()))
                            .await;
                        break;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&next));
                while let Some(newline_pos) = buffer.find('\n') {
                    let line = buffer[..newline_pos].trim().to_string();
                    buffer.drain(..=newline_pos);
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<GenerateResponseLine>(&line) {
                        Ok(parsed) => {
                            if !parsed.response.is_empty()
                                && tx.send(Chunk::Text(parsed.response)).await.is_err()
                            {
                                return;
                            }
                            if parsed.done {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!("malformed ndjson chunk from brain endpoint: {e}");
                        }
                    }
                }
            }
        });

        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_think_concatenates_text_chunks() {
        struct FakeClient;
        #[async_trait::async_trait]
        impl LlmClient for FakeClient {
            async fn think_stream(&self, _s: &str, _u: &str) -> mpsc::Receiver<Chunk> {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    let _ = tx.send(Chunk::Text("THINK: hi\n".to_string())).await;
                    let _ = tx.send(Chunk::Text("SAY: hello\n".to_string())).await;
                });
                rx
            }
        }
        let client = FakeClient;
        let out = client.think("sys", "user").await;
        assert_eq!(out, "THINK: hi\nSAY: hello\n");
    }

    #[tokio::test]
    async fn default_think_stops_at_error() {
        struct FakeClient;
        #[async_trait::async_trait]
        impl LlmClient for FakeClient {
            async fn think_stream(&self, _s: &str, _u: &str) -> mpsc::Receiver<Chunk> {
                let (tx, rx) = mpsc::channel(4);
                tokio::spawn(async move {
                    let _ = tx.send(Chunk::Text("partial".to_string())).await;
                    let _ = tx.send(Chunk::Error("boom".to_string())).await;
                });
                rx
            }
        }
        let client = FakeClient;
        let out = client.think("sys", "user").await;
        assert_eq!(out, "partialERROR: boom");
    }
}
