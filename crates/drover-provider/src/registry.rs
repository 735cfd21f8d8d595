//! Built-in provider registry — the closed set of canonical backends, their
//! endpoints, auth flavors, and rate-limit header profiles.

/// Which wire dialect an adapter speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Anthropic,
    OpenAi,
    Gemini,
}

/// How the outgoing call authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlavor {
    /// `x-api-key` + `anthropic-version` headers.
    AnthropicApiKey,
    /// `Authorization: Bearer <static key>`.
    BearerApiKey,
    /// `Authorization: Bearer <token from an external CLI's OAuth cache>`.
    OAuthBearer,
    /// API key as a `key=` query parameter.
    QueryParamKey,
    /// Bearer when a key is configured, anonymous otherwise (self-hosted).
    OptionalBearer,
}

/// Which rate-limit headers to look for on responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitProfile {
    /// `anthropic-ratelimit-tokens-*`, RFC3339 reset.
    Anthropic,
    /// `x-ratelimit-remaining-tokens` / `x-ratelimit-reset-tokens`.
    OpenAiTokens,
    /// `x-ratelimit-remaining-requests` / `x-ratelimit-reset-requests`.
    OpenAiRequests,
    /// Try both OpenAI profiles; servers may set none (proxies, vllm).
    PassThrough,
    /// Backend exposes no rate-limit headers.
    None,
}

/// One canonical backend.
pub struct KnownProvider {
    pub id: &'static str,
    pub name: &'static str,
    /// `None` means the deployment must configure `api_base`.
    pub base_url: Option<&'static str>,
    /// Path appended to the base URL for chat. Gemini ignores this and
    /// builds a per-model path instead.
    pub chat_path: &'static str,
    pub dialect: Dialect,
    pub auth: AuthFlavor,
    pub ratelimit: RateLimitProfile,
    pub default_model: &'static str,
}

pub const KNOWN_PROVIDERS: &[KnownProvider] = &[
    KnownProvider {
        id: "claude",
        name: "Anthropic",
        base_url: Some("https://api.anthropic.com"),
        chat_path: "/v1/messages",
        dialect: Dialect::Anthropic,
        auth: AuthFlavor::AnthropicApiKey,
        ratelimit: RateLimitProfile::Anthropic,
        default_model: "claude-sonnet-4-5",
    },
    KnownProvider {
        id: "openai",
        name: "OpenAI",
        base_url: Some("https://api.openai.com"),
        chat_path: "/v1/chat/completions",
        dialect: Dialect::OpenAi,
        auth: AuthFlavor::BearerApiKey,
        ratelimit: RateLimitProfile::OpenAiTokens,
        default_model: "gpt-4o",
    },
    KnownProvider {
        id: "openai-codex",
        name: "OpenAI (Codex CLI)",
        base_url: Some("https://api.openai.com"),
        chat_path: "/v1/chat/completions",
        dialect: Dialect::OpenAi,
        auth: AuthFlavor::OAuthBearer,
        ratelimit: RateLimitProfile::OpenAiTokens,
        default_model: "gpt-5.3-codex",
    },
    KnownProvider {
        id: "gemini",
        name: "Google AI (Gemini)",
        base_url: Some("https://generativelanguage.googleapis.com"),
        chat_path: "",
        dialect: Dialect::Gemini,
        auth: AuthFlavor::QueryParamKey,
        ratelimit: RateLimitProfile::None,
        default_model: "gemini-2.0-flash",
    },
    KnownProvider {
        id: "gemini-cli",
        name: "Google AI (Gemini CLI)",
        base_url: Some("https://generativelanguage.googleapis.com"),
        chat_path: "",
        dialect: Dialect::Gemini,
        auth: AuthFlavor::OAuthBearer,
        ratelimit: RateLimitProfile::None,
        default_model: "gemini-2.0-flash",
    },
    KnownProvider {
        id: "xai",
        name: "xAI (Grok)",
        base_url: Some("https://api.x.ai"),
        chat_path: "/v1/chat/completions",
        dialect: Dialect::OpenAi,
        auth: AuthFlavor::BearerApiKey,
        ratelimit: RateLimitProfile::OpenAiTokens,
        default_model: "grok-2-latest",
    },
    KnownProvider {
        id: "scalytics-copilot",
        name: "Scalytics Copilot",
        base_url: None,
        chat_path: "/v1/chat/completions",
        dialect: Dialect::OpenAi,
        auth: AuthFlavor::BearerApiKey,
        ratelimit: RateLimitProfile::PassThrough,
        default_model: "copilot-default",
    },
    KnownProvider {
        id: "openrouter",
        name: "OpenRouter",
        base_url: Some("https://openrouter.ai/api"),
        chat_path: "/v1/chat/completions",
        dialect: Dialect::OpenAi,
        auth: AuthFlavor::BearerApiKey,
        ratelimit: RateLimitProfile::OpenAiRequests,
        default_model: "openai/gpt-4o",
    },
    KnownProvider {
        id: "deepseek",
        name: "DeepSeek",
        base_url: Some("https://api.deepseek.com"),
        chat_path: "/v1/chat/completions",
        dialect: Dialect::OpenAi,
        auth: AuthFlavor::BearerApiKey,
        ratelimit: RateLimitProfile::OpenAiTokens,
        default_model: "deepseek-chat",
    },
    KnownProvider {
        id: "groq",
        name: "Groq",
        base_url: Some("https://api.groq.com/openai"),
        chat_path: "/v1/chat/completions",
        dialect: Dialect::OpenAi,
        auth: AuthFlavor::BearerApiKey,
        ratelimit: RateLimitProfile::OpenAiTokens,
        default_model: "llama-3.3-70b-versatile",
    },
    KnownProvider {
        id: "vllm",
        name: "vLLM (self-hosted)",
        base_url: None,
        chat_path: "/v1/chat/completions",
        dialect: Dialect::OpenAi,
        auth: AuthFlavor::OptionalBearer,
        ratelimit: RateLimitProfile::PassThrough,
        default_model: "local-model",
    },
];

/// Look up a known provider by canonical id.
pub fn lookup(id: &str) -> Option<&'static KnownProvider> {
    KNOWN_PROVIDERS.iter().find(|p| p.id == id)
}
