use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::provider::{
    classify_status, http_client, send_with_cancel, ChatProvider, ChatRequest, ChatResponse,
    ProviderError, Role, ToolCall, Usage,
};

pub(crate) const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Generative Language adapter (`gemini`). Unlike every other
/// backend, the API key travels as a `key=` query parameter, and the
/// endpoint path embeds the model id. No rate-limit headers are exposed.
pub struct GeminiAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(api_key: String, base_url: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }
}

#[async_trait]
impl ChatProvider for GeminiAdapter {
    fn id(&self) -> &str {
        "gemini"
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = generate_content_url(&self.base_url, &req.model);

        debug!(model = %req.model, "sending request to Gemini");

        let builder = self
            .client
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .header("content-type", "application/json")
            .json(&body);

        let resp = send_with_cancel(builder, cancel).await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "Gemini API error");
            return Err(classify_status(status, text));
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parse_response(api_resp))
    }
}

pub(crate) fn generate_content_url(base_url: &str, model: &str) -> String {
    format!("{base_url}/v1beta/models/{model}:generateContent")
}

pub(crate) fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut system_parts: Vec<&str> = Vec::new();
    let mut contents: Vec<serde_json::Value> = Vec::new();

    for m in &req.messages {
        match m.role {
            Role::System => system_parts.push(&m.content),
            Role::Assistant => contents.push(serde_json::json!({
                "role": "model",
                "parts": [{"text": m.content}],
            })),
            Role::User | Role::Tool => contents.push(serde_json::json!({
                "role": "user",
                "parts": [{"text": m.content}],
            })),
        }
    }

    let mut generation_config = serde_json::json!({
        "maxOutputTokens": req.params.max_tokens,
    });
    if let Some(temperature) = req.params.temperature {
        generation_config["temperature"] = serde_json::json!(temperature);
    }
    if let Some(top_p) = req.params.top_p {
        generation_config["topP"] = serde_json::json!(top_p);
    }
    if !req.params.stop.is_empty() {
        generation_config["stopSequences"] = serde_json::json!(req.params.stop);
    }

    let mut body = serde_json::json!({
        "contents": contents,
        "generationConfig": generation_config,
    });

    if !system_parts.is_empty() {
        body["systemInstruction"] = serde_json::json!({
            "parts": [{"text": system_parts.join("\n\n")}],
        });
    }
    if !req.tools.is_empty() {
        let declarations: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                })
            })
            .collect();
        body["tools"] = serde_json::json!([{"functionDeclarations": declarations}]);
    }

    body
}

pub(crate) fn parse_response(resp: ApiResponse) -> ChatResponse {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut finish_reason = String::new();

    if let Some(candidate) = resp.candidates.into_iter().next() {
        if let Some(reason) = candidate.finish_reason {
            finish_reason = reason.to_ascii_lowercase();
        }
        if let Some(content) = candidate.content {
            for (idx, part) in content.parts.into_iter().enumerate() {
                if let Some(text) = part.text {
                    text_parts.push(text);
                }
                if let Some(call) = part.function_call {
                    tool_calls.push(ToolCall {
                        // Gemini does not assign call ids; synthesize stable ones.
                        id: format!("call_{idx}"),
                        name: call.name,
                        arguments: call.args.unwrap_or_default(),
                    });
                }
            }
        }
    }

    let usage = resp
        .usage_metadata
        .map(|u| {
            Usage::from_counts(
                u.prompt_token_count,
                u.candidates_token_count,
                u.total_token_count,
            )
        })
        .unwrap_or_else(Usage::zero);

    ChatResponse {
        content: text_parts.join(""),
        tool_calls,
        finish_reason,
        usage,
    }
}

// Gemini API response types — pub(crate) so the CLI-OAuth sibling reuses them

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    #[serde(default)]
    pub(crate) candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    pub(crate) usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
pub(crate) struct Candidate {
    pub(crate) content: Option<Content>,
    #[serde(rename = "finishReason")]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct Content {
    #[serde(default)]
    pub(crate) parts: Vec<Part>,
}

#[derive(Deserialize)]
pub(crate) struct Part {
    pub(crate) text: Option<String>,
    #[serde(rename = "functionCall")]
    pub(crate) function_call: Option<FunctionCall>,
}

#[derive(Deserialize)]
pub(crate) struct FunctionCall {
    pub(crate) name: String,
    pub(crate) args: Option<serde_json::Value>,
}

#[derive(Deserialize)]
pub(crate) struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    pub(crate) prompt_token_count: u64,
    #[serde(rename = "candidatesTokenCount", default)]
    pub(crate) candidates_token_count: u64,
    #[serde(rename = "totalTokenCount")]
    pub(crate) total_token_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatMessage;

    #[test]
    fn url_embeds_the_model_id() {
        assert_eq!(
            generate_content_url(DEFAULT_BASE_URL, "gemini-2.0-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
    }

    #[test]
    fn body_maps_assistant_to_model_role() {
        let req = ChatRequest::new(
            "gemini-2.0-flash",
            vec![
                ChatMessage::new(Role::System, "short answers"),
                ChatMessage::new(Role::User, "hello"),
                ChatMessage::new(Role::Assistant, "hi"),
            ],
        );
        let body = build_request_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "short answers");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 1024);
    }

    #[test]
    fn parses_usage_metadata_field_names() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "answer"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 120,
                "candidatesTokenCount": 40,
                "totalTokenCount": 160
            }
        });
        let resp = parse_response(serde_json::from_value(raw).unwrap());
        assert_eq!(resp.content, "answer");
        assert_eq!(resp.finish_reason, "stop");
        assert_eq!(resp.usage.prompt_tokens, 120);
        assert_eq!(resp.usage.completion_tokens, 40);
        assert_eq!(resp.usage.total_tokens, 160);
        assert!(!resp.usage.has_rate_limit_signal());
    }

    #[test]
    fn parses_function_calls() {
        let raw = serde_json::json!({
            "candidates": [{
                "content": {"parts": [
                    {"functionCall": {"name": "get_weather", "args": {"city": "Berlin"}}}
                ]},
                "finishReason": "STOP"
            }]
        });
        let resp = parse_response(serde_json::from_value(raw).unwrap());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "get_weather");
        assert_eq!(resp.tool_calls[0].arguments["city"], "Berlin");
    }
}
