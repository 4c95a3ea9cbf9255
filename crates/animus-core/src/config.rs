use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18080;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TOPIC_PREFIX: &str = "soul";

/// Top-level config (animus.toml + ANIMUS_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AnimusConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub services: ServicesConfig,
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
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible endpoint base URL, without trailing slash.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Cheaper model for session compaction. Falls back to `model`.
    pub summarizer_model: Option<String>,
    /// Per-request timeout for the main chat path (streaming excluded).
    #[serde(default = "default_llm_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_model(),
            summarizer_model: None,
            request_timeout_secs: default_llm_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Hard cap on a single invoke RPC round-trip.
    #[serde(default = "default_invoke_timeout")]
    pub invoke_timeout_secs: u64,
    /// Budget for one terminal tool call inside a chat turn.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
    /// Advertised skills go stale this long after the last report.
    #[serde(default = "default_skill_ttl")]
    pub skill_ttl_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            topic_prefix: default_topic_prefix(),
            invoke_timeout_secs: default_invoke_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            skill_ttl_secs: default_skill_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Gate probability before affect penalties apply.
    #[serde(default = "default_base_exec_probability")]
    pub base_exec_probability: f64,
    /// Decay publisher tick. Clamped to [2, 5] seconds at use.
    #[serde(default = "default_decay_interval")]
    pub decay_interval_secs: u64,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            base_exec_probability: default_base_exec_probability(),
            decay_interval_secs: default_decay_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_compact_messages")]
    pub compact_message_threshold: i64,
    #[serde(default = "default_compact_chars")]
    pub compact_char_threshold: i64,
    #[serde(default = "default_compact_scan_limit")]
    pub compact_scan_limit: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: i64,
    #[serde(default = "default_idle_scan_interval")]
    pub idle_scan_interval_secs: u64,
    #[serde(default = "default_idle_batch")]
    pub idle_batch_size: usize,
    /// Short-term history window fed to the LLM, in messages.
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            compact_message_threshold: default_compact_messages(),
            compact_char_threshold: default_compact_chars(),
            compact_scan_limit: default_compact_scan_limit(),
            idle_timeout_secs: default_idle_timeout(),
            idle_scan_interval_secs: default_idle_scan_interval(),
            idle_batch_size: default_idle_batch(),
            history_window: default_history_window(),
        }
    }
}

/// Optional upstream services. Absent URL = feature disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Emotion analyzer endpoint. Missing → every turn reads neutral.
    pub emotion_url: Option<String>,
    /// Intent filter endpoint. Missing → no intent short-circuit.
    pub intent_url: Option<String>,
    /// Semantic memory (mem0-style) endpoint. Missing → no recall tool.
    pub mem0_url: Option<String>,
    /// Shared timeout for the ancillary HTTP client.
    #[serde(default = "default_services_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            emotion_url: None,
            intent_url: None,
            mem0_url: None,
            http_timeout_secs: default_services_timeout(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.animus/animus.db", home)
}
fn default_llm_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout() -> u64 {
    90
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_mqtt_host() -> String {
    "127.0.0.1".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "animus-server".to_string()
}
fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}
fn default_invoke_timeout() -> u64 {
    20
}
fn default_tool_timeout() -> u64 {
    8
}
fn default_skill_ttl() -> u64 {
    60
}
fn default_base_exec_probability() -> f64 {
    0.85
}
fn default_decay_interval() -> u64 {
    3
}
fn default_compact_messages() -> i64 {
    80
}
fn default_compact_chars() -> i64 {
    12_000
}
fn default_compact_scan_limit() -> usize {
    200
}
fn default_idle_timeout() -> i64 {
    180
}
fn default_idle_scan_interval() -> u64 {
    15
}
fn default_idle_batch() -> usize {
    50
}
fn default_history_window() -> usize {
    20
}
fn default_services_timeout() -> u64 {
    60
}

impl AnimusConfig {
    /// Load config from a TOML file with ANIMUS_* env var overrides.
    ///
    /// Checks in order: explicit path argument, then ~/.animus/animus.toml.
    /// A missing file yields defaults; env overrides still apply.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AnimusConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("ANIMUS_").split("_"))
            .extract()
            .map_err(|e| crate::error::AnimusError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.animus/animus.toml", home)
}
