//! Configuration loading.
//!
//! TOML file plus environment-variable overrides, in the same precedence
//! order the orchestrator's predecessor used: explicit path, then a default
//! search path, then built-in defaults, then env vars applied last.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub api_key: Option<String>,

    #[serde(default)]
    pub brain: BrainConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    /// Run with the voice loop active. CLI override, not persisted.
    #[serde(skip)]
    pub voice_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrainConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_num_predict")]
    pub num_predict: u32,
    #[serde(default = "default_num_thread")]
    pub num_thread: u32,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,
    #[serde(default = "default_chunk_timeout")]
    pub chunk_timeout_secs: u64,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            num_predict: default_num_predict(),
            num_thread: default_num_thread(),
            num_ctx: default_num_ctx(),
            stream_timeout_secs: default_stream_timeout(),
            chunk_timeout_secs: default_chunk_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_execution_timeout")]
    pub execution_timeout_secs: u64,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_task_resume")]
    pub max_task_resume: usize,
    #[serde(default = "default_heuristic_word_threshold")]
    pub heuristic_word_threshold: usize,
    #[serde(default = "default_sentence_buffer_words")]
    pub sentence_buffer_words: usize,
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            execution_timeout_secs: default_execution_timeout(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_task_resume: default_max_task_resume(),
            heuristic_word_threshold: default_heuristic_word_threshold(),
            sentence_buffer_words: default_sentence_buffer_words(),
            health_check_interval_secs: default_health_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            db_path: default_db_path(),
            backup_dir: default_backup_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            brain: BrainConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            paths: PathsConfig::default(),
            voice_mode: false,
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "qwen2.5:3b".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_num_predict() -> u32 {
    512
}
fn default_num_thread() -> u32 {
    4
}
fn default_num_ctx() -> u32 {
    4096
}
fn default_stream_timeout() -> u64 {
    60
}
fn default_chunk_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    2
}
fn default_execution_timeout() -> u64 {
    60
}
fn default_max_concurrent_tasks() -> usize {
    4
}
fn default_max_task_resume() -> usize {
    10
}
fn default_heuristic_word_threshold() -> usize {
    5
}
fn default_sentence_buffer_words() -> usize {
    8
}
fn default_health_check_interval() -> u64 {
    30
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("memory/umbrasol.db")
}
fn default_backup_dir() -> PathBuf {
    PathBuf::from(".umbrasol/backups")
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read config from {p}"))?;
                toml::from_str(&content).context("failed to parse config")?
            }
            None => {
                let home_config = dirs::home_dir()
                    .map(|h| h.join(".umbrasol/config.toml"))
                    .and_then(|p| p.to_str().map(String::from));

                let mut default_paths: Vec<&str> = vec!["umbrasol.toml"];
                let home_config_str: String;
                if let Some(ref hc) = home_config {
                    home_config_str = hc.clone();
                    default_paths.push(&home_config_str);
                }

                let mut loaded = None;
                for p in &default_paths {
                    if let Ok(content) = std::fs::read_to_string(p) {
                        loaded = Some(toml::from_str(&content).context("failed to parse config")?);
                        break;
                    }
                }
                loaded.unwrap_or_default()
            }
        };

        if let Ok(endpoint) = std::env::var("UMBRASOL_ENDPOINT") {
            config.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("UMBRASOL_MODEL") {
            config.model = model;
        }
        if let Ok(api_key) = std::env::var("UMBRASOL_API_KEY") {
            config.api_key = Some(api_key);
        }
        if let Ok(log_dir) = std::env::var("UMBRASOL_LOG_DIR") {
            config.paths.log_dir = PathBuf::from(log_dir);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tunables() {
        let c = Config::default();
        assert_eq!(c.orchestrator.max_retries, 2);
        assert_eq!(c.orchestrator.execution_timeout_secs, 60);
        assert_eq!(c.orchestrator.max_concurrent_tasks, 4);
        assert_eq!(c.orchestrator.max_task_resume, 10);
        assert_eq!(c.orchestrator.heuristic_word_threshold, 5);
        assert_eq!(c.orchestrator.sentence_buffer_words, 8);
        assert_eq!(c.orchestrator.health_check_interval_secs, 30);
    }

    #[test]
    fn load_missing_explicit_path_errors() {
        let result = Config::load(Some("/nonexistent/path/umbrasol.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn env_overrides_apply() {
        std::env::set_var("UMBRASOL_MODEL", "test-model");
        let config = Config::load(None).unwrap();
        assert_eq!(config.model, "test-model");
        std::env::remove_var("UMBRASOL_MODEL");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let toml_str = r#"
            endpoint = "http://test:9999"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.endpoint, "http://test:9999");
        assert_eq!(config.model, "qwen2.5:3b");
    }
}
