//! Gemini over CLI-delegated OAuth (`gemini-cli`).
//!
//! Same wire dialect as the API-key adapter, but authenticated with a Bearer
//! token read from the Gemini CLI's credential cache at
//! `~/.gemini/oauth_creds.json`, re-running `gemini auth` when stale.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drover_secrets::cli_cache::{self, ExternalCli};
use drover_secrets::OAuthToken;

use crate::adapters::gemini;
use crate::provider::{
    classify_status, http_client, send_with_cancel, ChatProvider, ChatRequest, ChatResponse,
    ProviderError,
};

pub struct GeminiCliAdapter {
    client: reqwest::Client,
    base_url: String,
    cached: RwLock<Option<OAuthToken>>,
}

impl GeminiCliAdapter {
    pub fn new(base_url: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client: http_client(timeout_secs),
            base_url: base_url.unwrap_or_else(|| gemini::DEFAULT_BASE_URL.to_string()),
            cached: RwLock::new(None),
        }
    }

    async fn ensure_token(&self) -> Result<String, ProviderError> {
        {
            let cached = self.cached.read().await;
            if let Some(tok) = cached.as_ref() {
                if !tok.is_expired() {
                    return Ok(tok.access_token.clone());
                }
            }
        }

        let mut cached = self.cached.write().await;
        if let Some(tok) = cached.as_ref() {
            if !tok.is_expired() {
                return Ok(tok.access_token.clone());
            }
        }

        info!("loading Gemini CLI credential");
        let token = cli_cache::load_fresh(ExternalCli::Gemini).await?;
        let access = token.access_token.clone();
        *cached = Some(token);
        Ok(access)
    }
}

#[async_trait]
impl ChatProvider for GeminiCliAdapter {
    fn id(&self) -> &str {
        "gemini-cli"
    }

    async fn chat(
        &self,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ProviderError> {
        let token = self.ensure_token().await?;
        let body = gemini::build_request_body(req);
        let url = gemini::generate_content_url(&self.base_url, &req.model);

        debug!(model = %req.model, "sending request to Gemini via CLI OAuth");

        let builder = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .header("content-type", "application/json")
            .json(&body);

        let resp = send_with_cancel(builder, cancel).await?;

        let status = resp.status().as_u16();
        if status == 401 {
            self.cached.write().await.take();
            warn!("Gemini bearer token rejected");
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, text));
        }

        let api_resp: gemini::ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(gemini::parse_response(api_resp))
    }
}
