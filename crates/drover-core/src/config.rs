use std::collections::BTreeMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default per-adapter HTTP timeout ceiling.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 90;
/// Extra wall-clock budget the resolver grants the fallback phase.
pub const FALLBACK_EXTRA_BUDGET_SECS: u64 = 5;
/// Per-hook ceiling for middleware pre/post processing.
pub const MIDDLEWARE_HOOK_TIMEOUT_SECS: u64 = 2;
/// Grace window subtracted from OAuth expiry when deciding staleness.
pub const TOKEN_EXPIRY_GRACE_SECS: i64 = 60;

/// Top-level config (drover.toml + DROVER_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DroverConfig {
    #[serde(default)]
    pub model: ModelConfig,
    /// Keyed by canonical provider id (aliases are accepted and normalized
    /// by the resolver at startup).
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderEntry>,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub content_classification: ClassifierConfig,
    #[serde(default)]
    pub prompt_guard: GuardConfig,
    #[serde(default)]
    pub output_sanitization: SanitizerConfig,
    #[serde(default)]
    pub finops: FinopsConfig,
    /// Hard daily token ceiling across all providers. `None` disables the check.
    #[serde(default)]
    pub daily_token_limit: Option<u64>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
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

fn default_db_path() -> String {
    format!("{}/drover.db", config_root())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ModelConfig {
    /// Global default model ref, e.g. "claude/claude-sonnet-4-5".
    pub name: Option<String>,
    /// Task-category routing, e.g. coding = "openai/gpt-4o".
    #[serde(default)]
    pub task_routing: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderEntry {
    /// Static API key. CLI-OAuth providers leave this empty; their
    /// credentials come from the external CLI cache.
    pub api_key: Option<String>,
    /// Override base URL. Required for scalytics-copilot and vllm.
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: String,
    pub model: Option<AgentModelSpec>,
    pub subagents: Option<SubagentSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentModelSpec {
    pub primary: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SubagentSpec {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolsConfig {
    pub subagents: Option<SubagentSpec>,
}

/// One sensitivity level or task-type rule for the content classifier.
/// Keyword matching is case-insensitive on whole-word boundaries; patterns
/// are unanchored regexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierRule {
    /// Level name (sensitivity rules) or category name (task rules).
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Optional reroute target as a model ref.
    pub route_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Evaluated in declaration order; first match wins the "sensitivity" tag.
    #[serde(default)]
    pub sensitivity: Vec<ClassifierRule>,
    /// Evaluated after sensitivity; first match wins the "task" tag.
    #[serde(default)]
    pub task_types: Vec<ClassifierRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: Vec::new(),
            task_types: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardAction {
    Warn,
    Redact,
    Block,
    Reroute,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardCategory {
    pub action: GuardAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Global action applied to detector hits without a category override.
    #[serde(default = "default_guard_mode")]
    pub mode: GuardAction,
    /// Keywords that always block, regardless of mode or overrides.
    #[serde(default)]
    pub deny_keywords: Vec<String>,
    /// Per-category action overrides.
    pub pii: Option<GuardCategory>,
    pub secrets: Option<GuardCategory>,
    /// Target for the `reroute` action, e.g. "vllm/llama-3.1-70b-instruct".
    pub private_model: Option<String>,
    #[serde(default)]
    pub custom_patterns: Vec<NamedPattern>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: GuardAction::Warn,
            deny_keywords: Vec::new(),
            pii: None,
            secrets: None,
            private_model: None,
            custom_patterns: Vec::new(),
        }
    }
}

fn default_guard_mode() -> GuardAction {
    GuardAction::Warn
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// A hit replaces the entire response with the filter notice.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    #[serde(default = "bool_true")]
    pub redact_pii: bool,
    #[serde(default = "bool_true")]
    pub redact_secrets: bool,
    /// 0 disables truncation.
    #[serde(default)]
    pub max_output_length: usize,
    #[serde(default)]
    pub custom_patterns: Vec<NamedPattern>,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deny_patterns: Vec::new(),
            redact_pii: true,
            redact_secrets: true,
            max_output_length: 0,
            custom_patterns: Vec::new(),
        }
    }
}

/// Per-1k-token rates for one provider.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Pricing {
    #[serde(default)]
    pub prompt: f64,
    #[serde(default)]
    pub completion: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinopsConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// USD. 0 disables budget warnings.
    #[serde(default)]
    pub daily_budget_usd: f64,
    /// Keyed by canonical provider id. Unconfigured providers cost zero.
    #[serde(default)]
    pub pricing: BTreeMap<String, Pricing>,
}

impl Default for FinopsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_budget_usd: 0.0,
            pricing: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn bool_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl DroverConfig {
    /// Load config from a TOML file with DROVER_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: DroverConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("DROVER_").split("__"))
            .extract()
            .map_err(|e| crate::error::DroverError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Whether a static Gemini API key is configured. Drives the `google`
    /// alias split between `gemini` and `gemini-cli`.
    pub fn has_gemini_api_key(&self) -> bool {
        self.providers
            .get("gemini")
            .and_then(|p| p.api_key.as_deref())
            .map(|k| !k.is_empty())
            .unwrap_or(false)
    }

    pub fn agent(&self, agent_id: &str) -> Option<&AgentEntry> {
        self.agents.iter().find(|a| a.id == agent_id)
    }
}

/// Root directory for credentials, sealed keys, and the local database.
pub fn config_root() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.drover")
}

fn default_config_path() -> String {
    format!("{}/drover.toml", config_root())
}
