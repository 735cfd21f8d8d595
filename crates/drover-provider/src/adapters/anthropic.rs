use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{
    classify_status, http_client, send_with_cancel, ChatProvider, ChatRequest, ChatResponse,
    ProviderError, Role, ToolCall, Usage,
};
use crate::ratelimit;
use crate::registry::RateLimitProfile;

const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic Messages API adapter (`claude`). Static API key auth via
/// `x-api-key` plus the pinned `anthropic-version` header.
pub struct AnthropicAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicAdapter {
    pub fn new(api_key: String, base_url: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl ChatProvider for AnthropicAdapter {
    fn id(&self) -> &str {
        "claude"
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "sending request to Anthropic");

        let builder = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);

        let resp = send_with_cancel(builder, cancel).await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "Anthropic API error");
            return Err(classify_status(status, text));
        }

        let headers = resp.headers().clone();
        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let mut response = parse_response(api_resp);
        ratelimit::apply_headers(&mut response.usage, RateLimitProfile::Anthropic, &headers);
        Ok(response)
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    // System messages become the top-level system string; tool results become
    // tool_result content blocks inside a user turn, which is how the
    // Messages API represents them.
    let mut system_parts: Vec<&str> = Vec::new();
    let mut messages: Vec<serde_json::Value> = Vec::new();

    for m in &req.messages {
        match m.role {
            Role::System => system_parts.push(&m.content),
            Role::User => messages.push(serde_json::json!({
                "role": "user",
                "content": m.content,
            })),
            Role::Assistant => messages.push(serde_json::json!({
                "role": "assistant",
                "content": m.content,
            })),
            Role::Tool => messages.push(serde_json::json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": m.tool_call_id.as_deref().unwrap_or(""),
                    "content": m.content,
                }],
            })),
        }
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "max_tokens": req.params.max_tokens,
        "messages": messages,
    });

    if !system_parts.is_empty() {
        body["system"] = serde_json::json!(system_parts.join("\n\n"));
    }
    if let Some(temperature) = req.params.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    if let Some(top_p) = req.params.top_p {
        body["top_p"] = serde_json::json!(top_p);
    }
    if !req.params.stop.is_empty() {
        body["stop_sequences"] = serde_json::json!(req.params.stop);
    }
    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in resp.content {
        match block {
            ContentBlock::Text { text } => text_parts.push(text),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                });
            }
            ContentBlock::Unknown => {}
        }
    }

    ChatResponse {
        content: text_parts.join(""),
        tool_calls,
        finish_reason: resp.stop_reason.unwrap_or_default(),
        usage: Usage::from_counts(resp.usage.input_tokens, resp.usage.output_tokens, None),
    }
}

// Anthropic API response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: ApiUsage,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize)]
struct ApiUsage {
    input_tokens: u64,
    output_tokens: u64,
}
