//! Runtime configuration, loaded from a TOML file with serde defaults
//! for every field so a missing file or section still yields a working
//! local setup.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub trace: TraceConfig,
    pub limits: LimitsConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    pub workspace: WorkspaceConfig,
}

impl Config {
    /// Load from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::InputInvalid(format!("config: {e}")))
    }

    /// Load from a file path; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }
}

// ── Server ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8787,
        }
    }
}

// ── Trace journal ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Directory for per-session journal files. `None` keeps journals
    /// in memory only.
    pub dir: Option<PathBuf>,
    /// Cap on recorded string values; longer values are truncated with
    /// a marker preserving the original length.
    pub max_value_chars: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            dir: Some(PathBuf::from("data/traces")),
            max_value_chars: 2000,
        }
    }
}

// ── Limits ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Token-bucket capacity per session.
    pub rate_tokens: u32,
    /// Tokens restored per refill window.
    pub rate_refill: u32,
    /// Refill window, seconds.
    pub rate_window_secs: u64,
    /// Wall-clock budget for one dispatched task.
    pub task_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub model_timeout_secs: u64,
    pub tool_timeout_secs: u64,
    /// Node-visit budget for one reasoning-graph run.
    pub graph_step_budget: u32,
    /// Outer-loop budget for the coding pipeline.
    pub max_iterations: u32,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            rate_tokens: 5,
            rate_refill: 5,
            rate_window_secs: 10,
            task_timeout_secs: 300,
            fetch_timeout_secs: 20,
            model_timeout_secs: 60,
            tool_timeout_secs: 30,
            graph_step_budget: 16,
            max_iterations: 3,
        }
    }
}

// ── Model provider ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible chat completions endpoint base URL.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            api_key_env: "ENSEMBLE_API_KEY".into(),
            model: "gpt-4o-mini".into(),
            temperature: 0.2,
        }
    }
}

// ── Retrieval ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Environment variable holding the web-search API key. Web
    /// retrieval is disabled when unset.
    pub search_api_key_env: String,
    /// Programmable-search engine id.
    pub search_engine_id: String,
    /// Embedding dimension for the in-memory index.
    pub embed_dim: usize,
    /// Per-evidence text cap after a page fetch.
    pub evidence_text_cap: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_api_key_env: "ENSEMBLE_SEARCH_API_KEY".into(),
            search_engine_id: String::new(),
            embed_dim: 256,
            evidence_text_cap: 2000,
        }
    }
}

// ── Workspace ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Sandbox root for the `file.write` tool and session history.
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/workspace"),
        }
    }
}
