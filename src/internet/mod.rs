//! Thin internet collaborator: a TTL-cached, offline-tolerant text lookup.
//! The `net` tool is routed here rather than to Hands, since this is a
//! network-facing capability the orchestrator should be able to swap out
//! independently of the OS backend.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const DEFAULT_TTL: Duration = Duration::from_secs(4 * 60 * 60);

struct CachedResult {
    summary: String,
    fetched_at: Instant,
}

pub struct Internet {
    http: reqwest::Client,
    cache: Mutex<HashMap<String, CachedResult>>,
    ttl: Duration,
}

impl Internet {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
            ttl: DEFAULT_TTL,
        }
    }

    pub async fn swift_search(&self, query: &str) -> String {
        {
            let cache = self.cache.lock().await;
            if let Some(hit) = cache.get(query) {
                if hit.fetched_at.elapsed() < self.ttl {
                    return hit.summary.clone();
                }
            }
        }

        let summary = match self.fetch(query).await {
            Ok(s) => s,
            Err(_) => return "ERROR: offline".to_string(),
        };

        let mut cache = self.cache.lock().await;
        cache.insert(
            query.to_string(),
            CachedResult {
                summary: summary.clone(),
                fetched_at: Instant::now(),
            },
        );
        summary
    }

    async fn fetch(&self, query: &str) -> anyhow::Result<String> {
        let url = format!("https://duckduckgo.com/html/?q={}", urlencoding(query));
        let body = self.http.get(&url).send().await?.text().await?;
        let snippet: String = body.chars().take(400).collect();
        Ok(snippet)
    }
}

impl Default for Internet {
    fn default() -> Self {
        Self::new()
    }
}

fn urlencoding(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cache_hit_avoids_second_fetch() {
        let internet = Internet::new();
        {
            let mut cache = internet.cache.lock().await;
            cache.insert(
                "rust".to_string(),
                CachedResult {
                    summary: "a systems language".to_string(),
                    fetched_at: Instant::now(),
                },
            );
        }
        assert_eq!(internet.swift_search("rust").await, "a systems language");
    }
}
