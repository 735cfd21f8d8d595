use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use drover_secrets::CredentialError;

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the LLM response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Generation parameters, encoded per dialect by each adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenParams {
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

impl Default for GenParams {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
        }
    }
}

/// Request to an LLM provider. `model` is the backend model id (no provider
/// prefix); the resolver sets it and fallback retries override it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default)]
    pub params: GenParams,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            params: GenParams::default(),
        }
    }

    /// Text of the last user-role message, the classifier's scan target.
    pub fn last_user_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

/// Normalized token accounting plus whatever rate-limit signals the backend
/// exposed on this response. Missing headers stay `None`, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub remaining_tokens: Option<u64>,
    #[serde(default)]
    pub remaining_requests: Option<u64>,
    #[serde(default)]
    pub limit_tokens: Option<u64>,
    #[serde(default)]
    pub reset_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Usage {
    /// Build from per-direction counts. `total` is never less than the sum,
    /// even when a dialect reports a smaller total.
    pub fn from_counts(prompt_tokens: u64, completion_tokens: u64, reported_total: Option<u64>) -> Self {
        let sum = prompt_tokens + completion_tokens;
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: reported_total.map_or(sum, |t| t.max(sum)),
            ..Self::default()
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn has_rate_limit_signal(&self) -> bool {
        self.remaining_tokens.is_some()
            || self.remaining_requests.is_some()
            || self.limit_tokens.is_some()
            || self.reset_at.is_some()
    }
}

/// Response from an LLM provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
    pub usage: Usage,
}

/// Why a 4xx response is not worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("transient api failure (status {status}): {message}")]
    Transient { status: u16, message: String },

    #[error("terminal api failure ({kind:?}, status {status}): {message}")]
    Terminal {
        kind: TerminalKind,
        status: u16,
        message: String,
    },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl ProviderError {
    /// Transient failures feed the fallback chain; everything else is
    /// surfaced directly.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Http(_) | ProviderError::Transient { .. } | ProviderError::Parse(_)
        )
    }
}

/// Map a non-2xx status per the shared classification: 408/429/5xx are
/// transient, every other 4xx is terminal with a specific kind.
pub fn classify_status(status: u16, message: String) -> ProviderError {
    match status {
        408 | 429 => ProviderError::Transient { status, message },
        s if s >= 500 => ProviderError::Transient { status, message },
        401 => ProviderError::Terminal {
            kind: TerminalKind::Unauthorized,
            status,
            message,
        },
        403 => ProviderError::Terminal {
            kind: TerminalKind::Forbidden,
            status,
            message,
        },
        404 => ProviderError::Terminal {
            kind: TerminalKind::NotFound,
            status,
            message,
        },
        _ => ProviderError::Terminal {
            kind: TerminalKind::InvalidRequest,
            status,
            message,
        },
    }
}

/// Common interface for all LLM backends. Adapters are stateless per call;
/// credentials are injected at construction or lazily loaded from caches.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Canonical provider id, for logging and snapshot keys.
    fn id(&self) -> &str;

    /// Send one chat request. Must honor `cancel` promptly and surface
    /// transport problems as transient errors.
    async fn chat(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError>;
}

/// HTTP client shared by adapters, with the per-adapter ceiling baked in.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Run an outgoing request, racing the caller's cancellation token.
/// Client-level timeouts surface as transport errors, i.e. transient.
pub(crate) async fn send_with_cancel(
    builder: reqwest::RequestBuilder,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, ProviderError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = builder.send() => result.map_err(ProviderError::Http),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_total_is_never_below_sum() {
        let usage = Usage::from_counts(2000, 500, Some(100));
        assert_eq!(usage.total_tokens, 2500);
        let usage = Usage::from_counts(10, 5, Some(20));
        assert_eq!(usage.total_tokens, 20);
        let usage = Usage::from_counts(10, 5, None);
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn last_user_text_skips_trailing_assistant_turn() {
        let req = ChatRequest::new(
            "m",
            vec![
                ChatMessage::new(Role::System, "sys"),
                ChatMessage::new(Role::User, "first"),
                ChatMessage::new(Role::User, "second"),
                ChatMessage::new(Role::Assistant, "reply"),
            ],
        );
        assert_eq!(req.last_user_text(), Some("second"));
    }

    #[test]
    fn status_classification_matrix() {
        assert!(classify_status(408, String::new()).is_transient());
        assert!(classify_status(429, String::new()).is_transient());
        assert!(classify_status(500, String::new()).is_transient());
        assert!(classify_status(503, String::new()).is_transient());
        for (status, kind) in [
            (400, TerminalKind::InvalidRequest),
            (401, TerminalKind::Unauthorized),
            (403, TerminalKind::Forbidden),
            (404, TerminalKind::NotFound),
            (422, TerminalKind::InvalidRequest),
        ] {
            match classify_status(status, String::new()) {
                ProviderError::Terminal { kind: k, status: s, .. } => {
                    assert_eq!(k, kind);
                    assert_eq!(s, status);
                }
                other => panic!("expected terminal for {status}, got {other:?}"),
            }
        }
    }
}
