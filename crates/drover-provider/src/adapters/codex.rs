//! OpenAI via Codex CLI OAuth (`openai-codex`).
//!
//! The Codex CLI owns the OAuth flow and writes its credential cache to
//! `~/.codex/auth.json`; this adapter reads the cache, keeps the token in
//! memory, and re-runs `codex auth` when the token goes stale.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drover_secrets::cli_cache::{self, ExternalCli};
use drover_secrets::OAuthToken;

use crate::adapters::openai;
use crate::provider::{
    classify_status, http_client, send_with_cancel, ChatProvider, ChatRequest, ChatResponse,
    ProviderError,
};
use crate::ratelimit;
use crate::registry::RateLimitProfile;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const CHAT_PATH: &str = "/v1/chat/completions";

pub struct CodexAdapter {
    client: reqwest::Client,
    base_url: String,
    cached: RwLock<Option<OAuthToken>>,
}

impl CodexAdapter {
    pub fn new(base_url: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            cached: RwLock::new(None),
        }
    }

    /// Current bearer token, refreshing through the CLI when stale.
    async fn ensure_token(&self) -> Result<String, ProviderError> {
        // Fast path — read lock
        {
            let cached = self.cached.read().await;
            if let Some(tok) = cached.as_ref() {
                if !tok.is_expired() {
                    return Ok(tok.access_token.clone());
                }
            }
        }

        // Slow path — write lock, double-check, reload from the CLI cache
        let mut cached = self.cached.write().await;
        if let Some(tok) = cached.as_ref() {
            if !tok.is_expired() {
                return Ok(tok.access_token.clone());
            }
        }

        info!("loading Codex CLI credential");
        let token = cli_cache::load_fresh(ExternalCli::Codex).await?;
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }
}

#[async_trait]
impl ChatProvider for CodexAdapter {
    fn id(&self) -> &str {
        "openai-codex"
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        let token = self.ensure_token().await?;
        let body = openai::build_request_body(req);
        let url = format!("{}{}", self.base_url, CHAT_PATH);

        debug!(model = %req.model, "sending request via Codex OAuth");

        let builder = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header("content-type", "application/json")
            .json(&body);

        let resp = send_with_cancel(builder, cancel).await?;

        let status = resp.status().as_u16();
        if status == 401 {
            // Stale token the expiry check missed; drop the cache so the
            // next call re-reads the CLI credential.
            self.cached.write().await.take();
            warn!("Codex bearer token rejected");
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let headers = resp.headers().clone();
        let api_resp: openai::ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let mut response = openai::parse_response(api_resp);
        ratelimit::apply_headers(&mut response.usage, RateLimitProfile::OpenAiTokens, &headers);
        Ok(response)
    }
}
