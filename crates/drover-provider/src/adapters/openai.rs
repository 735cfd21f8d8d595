use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{
    classify_status, http_client, send_with_cancel, ChatProvider, ChatRequest, ChatResponse,
    ProviderError, Role, ToolCall, Usage,
};
use crate::ratelimit;
use crate::registry::{KnownProvider, RateLimitProfile};

/// Adapter for the OpenAI chat/completions dialect and every
/// OpenAI-compatible backend (xai, scalytics-copilot, openrouter, deepseek,
/// groq, vllm). Differences are carried as data: endpoint, bearer key
/// presence, and which rate-limit headers to read.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    provider_id: String,
    api_key: Option<String>,
    base_url: String,
    chat_path: String,
    ratelimit: RateLimitProfile,
}

impl OpenAiAdapter {
    pub fn new(
        provider_id: impl Into<String>,
        api_key: Option<String>,
        base_url: String,
        chat_path: String,
        ratelimit: RateLimitProfile,
        timeout_secs: u64,
    ) -> Self {
        Self {
            client: http_client(timeout_secs),
            provider_id: provider_id.into(),
            api_key,
            base_url,
            chat_path,
            ratelimit,
        }
    }

    /// Build from a registry entry plus the deployment's overrides.
    pub fn for_known(
        known: &KnownProvider,
        api_key: Option<String>,
        base_override: Option<String>,
        timeout_secs: u64,
    ) -> Self {
        let base_url = base_override
            .or_else(|| known.base_url.map(str::to_string))
            .unwrap_or_default();
        Self::new(
            known.id,
            api_key,
            base_url,
            known.chat_path.to_string(),
            known.ratelimit,
            timeout_secs,
        )
    }
}

#[async_trait]
impl ChatProvider for OpenAiAdapter {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(provider = %self.provider_id, model = %req.model, "sending request");

        let mut builder = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = send_with_cancel(builder, cancel).await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(provider = %self.provider_id, status, "API error");
            return Err(classify_status(status, text));
        }

        let headers = resp.headers().clone();
        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let mut response = parse_response(api_resp);
        ratelimit::apply_headers(&mut response.usage, self.ratelimit, &headers);
        Ok(response)
    }
}

pub(crate) fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req
        .messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let mut msg = serde_json::json!({
                "role": role,
                "content": m.content,
            });
            if let Some(name) = &m.name {
                msg["name"] = serde_json::json!(name);
            }
            if let Some(id) = &m.tool_call_id {
                msg["tool_call_id"] = serde_json::json!(id);
            }
            msg
        })
        .collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.params.max_tokens,
    });

    if let Some(temperature) = req.params.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    if let Some(top_p) = req.params.top_p {
        body["top_p"] = serde_json::json!(top_p);
    }
    if !req.params.stop.is_empty() {
        body["stop"] = serde_json::json!(req.params.stop);
    }
    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

pub(crate) fn parse_response(resp: ApiResponse) -> ChatResponse {
    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCall> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| ToolCall {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    arguments: serde_json::from_str(&tc.function.arguments).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    let finish_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();
    let usage = resp
        .usage
        .map(|u| Usage::from_counts(u.prompt_tokens, u.completion_tokens, u.total_tokens))
        .unwrap_or_else(Usage::zero);

    ChatResponse {
        content,
        tool_calls,
        finish_reason,
        usage,
    }
}

// OpenAI API response types — pub(crate) so codex can reuse them

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    pub(crate) choices: Vec<Choice>,
    pub(crate) usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
pub(crate) struct Choice {
    pub(crate) message: ApiMessage,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ApiMessage {
    pub(crate) content: Option<String>,
    pub(crate) tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
pub(crate) struct ApiToolCall {
    pub(crate) id: String,
    pub(crate) function: ApiFunction,
}

#[derive(Deserialize)]
pub(crate) struct ApiFunction {
    pub(crate) name: String,
    pub(crate) arguments: String,
}

#[derive(Deserialize)]
pub(crate) struct ApiUsage {
    pub(crate) prompt_tokens: u64,
    pub(crate) completion_tokens: u64,
    pub(crate) total_tokens: Option<u64>,
}
