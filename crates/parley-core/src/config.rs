use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};

/// Default token budget for the conversation context window.
pub const DEFAULT_CONTEXT_TOKENS: usize = 50_000;
/// Character ceiling for assembled persona prompts.
pub const MAX_PROMPT_CHARS: usize = 80_000;
/// Router confidence below which keyword fallback takes over.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;
/// Default per-webhook timeout for flow actions (seconds).
pub const DEFAULT_WEBHOOK_TIMEOUT_SECS: u64 = 10;

/// Top-level config (parley.toml + PARLEY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub business_hours: BusinessHoursConfig,
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            llm: LlmConfig::default(),
            knowledge: KnowledgeConfig::default(),
            database: DatabaseConfig::default(),
            routing: RoutingConfig::default(),
            business_hours: BusinessHoursConfig::default(),
        }
    }
}

impl ParleyConfig {
    /// Load config with the fallback chain:
    /// explicit path > `PARLEY_CONFIG` env > `./parley.toml` > defaults.
    ///
    /// Env vars override file values: `PARLEY_GATEWAY__PORT=9000`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = path
            .map(String::from)
            .or_else(|| std::env::var("PARLEY_CONFIG").ok())
            .unwrap_or_else(|| "parley.toml".to_string());

        Figment::new()
            .merge(Toml::file(&file))
            .merge(Env::prefixed("PARLEY_").split("__"))
            .extract()
            .map_err(|e| PlatformError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout (seconds).
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: None,
            model: default_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_root")]
    pub root: String,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            root: default_knowledge_root(),
        }
    }
}

/// Which store backend the registries use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// When set, records persist to this SQLite file; otherwise in-memory.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// LLM classification below this confidence falls back to keywords.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Handoff is forced once a conversation exceeds this many agent turns.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_turns: default_max_turns(),
        }
    }
}

/// Inclusive start hour / exclusive end hour, evaluated in local time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessHoursConfig {
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
        }
    }
}

fn default_port() -> u16 {
    8085
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout() -> u64 {
    60
}

fn default_knowledge_root() -> String {
    "./knowledge".to_string()
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_max_turns() -> u32 {
    50
}

fn default_start_hour() -> u32 {
    9
}

fn default_end_hour() -> u32 {
    18
}
