use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use drover_core::config::{DroverConfig, MIDDLEWARE_HOOK_TIMEOUT_SECS};
use drover_core::events::EventSink;
use drover_core::types::RequestMeta;
use drover_core::DroverError;
use drover_provider::resolver::{ChatError, Resolution, Resolver};
use drover_provider::{ChatRequest, ChatResponse, Usage};

use crate::classifier::ContentClassifier;
use crate::finops::FinOpsRecorder;
use crate::guard::PromptGuard;
use crate::sanitizer::OutputSanitizer;

/// An inspector with hooks on both sides of the adapter call. Hooks must
/// finish within the 2 s budget; the chain enforces it.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn process_request(
        &self,
        _req: &mut ChatRequest,
        _meta: &mut RequestMeta,
    ) -> Result<(), String> {
        Ok(())
    }

    async fn process_response(
        &self,
        _req: &ChatRequest,
        _resp: &mut ChatResponse,
        _meta: &mut RequestMeta,
    ) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("middleware '{middleware}' exceeded its hook budget")]
    MiddlewareTimeout { middleware: String },

    #[error("middleware '{middleware}' failed: {message}")]
    Middleware { middleware: String, message: String },

    #[error(transparent)]
    Chat(ChatError),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<ChatError> for ChainError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::Cancelled => ChainError::Cancelled,
            other => ChainError::Chat(other),
        }
    }
}

impl From<DroverError> for ChainError {
    fn from(err: DroverError) -> Self {
        ChainError::Chat(ChatError::Config(err))
    }
}

/// The synthetic response returned when a pre-hook blocks the request.
pub fn blocked_response(middleware: &str, reason: &str) -> ChatResponse {
    ChatResponse {
        content: format!("[blocked by {middleware}: {reason}]"),
        tool_calls: Vec::new(),
        finish_reason: "blocked".to_string(),
        usage: Usage::zero(),
    }
}

/// Ordered middlewares plus the resolver that produced the adapter.
pub struct Chain {
    resolver: Arc<Resolver>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl Chain {
    pub fn new(resolver: Arc<Resolver>, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            resolver,
            middlewares,
        }
    }

    /// Chain with the built-in middlewares in their fixed declared order.
    pub fn with_builtins(resolver: Arc<Resolver>, sink: Arc<dyn EventSink>) -> Self {
        let middlewares = build_middlewares(resolver.config(), sink);
        Self::new(resolver, middlewares)
    }

    async fn run_pre_hook(
        mw: &Arc<dyn Middleware>,
        req: &mut ChatRequest,
        meta: &mut RequestMeta,
    ) -> Result<(), ChainError> {
        let budget = Duration::from_secs(MIDDLEWARE_HOOK_TIMEOUT_SECS);
        match tokio::time::timeout(budget, mw.process_request(req, meta)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ChainError::Middleware {
                middleware: mw.name().to_string(),
                message,
            }),
            Err(_) => {
                warn!(middleware = mw.name(), "pre-hook exceeded its budget");
                Err(ChainError::MiddlewareTimeout {
                    middleware: mw.name().to_string(),
                })
            }
        }
    }

    async fn run_post_hook(
        mw: &Arc<dyn Middleware>,
        req: &ChatRequest,
        resp: &mut ChatResponse,
        meta: &mut RequestMeta,
    ) -> Result<(), ChainError> {
        let budget = Duration::from_secs(MIDDLEWARE_HOOK_TIMEOUT_SECS);
        match tokio::time::timeout(budget, mw.process_response(req, resp, meta)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(ChainError::Middleware {
                middleware: mw.name().to_string(),
                message,
            }),
            Err(_) => {
                warn!(middleware = mw.name(), "post-hook exceeded its budget");
                Err(ChainError::MiddlewareTimeout {
                    middleware: mw.name().to_string(),
                })
            }
        }
    }

    /// Run one request through pre-hooks, the adapter (with fallbacks), and
    /// post-hooks. Pre- and post-hooks both run in declared order; a block
    /// from any pre-hook short-circuits everything after it.
    pub async fn process(
        &self,
        resolution: &Resolution,
        mut req: ChatRequest,
        meta: &mut RequestMeta,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChainError> {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }

        for mw in &self.middlewares {
            Self::run_pre_hook(mw, &mut req, meta).await?;
            if meta.blocked {
                let reason = meta.block_reason.as_deref().unwrap_or("blocked");
                debug!(middleware = mw.name(), reason, "request blocked");
                return Ok(blocked_response(mw.name(), reason));
            }
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled);
            }
        }

        // A pre-hook may have rerouted the request. Re-resolve once per
        // chain run, validating credentials at the new provider first.
        let rerouted =
            meta.provider_id != resolution.provider_id || meta.model_name != resolution.model;
        let active: Resolution = if rerouted {
            debug!(
                from = %format!("{}/{}", resolution.provider_id, resolution.model),
                to = %meta.target(),
                "re-resolving after middleware reroute"
            );
            self.resolver
                .resolve_target(&meta.provider_id, &meta.model_name)?
        } else {
            resolution.clone()
        };

        let mut resp = self.resolver.execute(&active, &req, cancel).await?;

        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        for mw in &self.middlewares {
            Self::run_post_hook(mw, &req, &mut resp, meta).await?;
        }

        Ok(resp)
    }
}

/// The built-in middlewares in their fixed declared order: classifier,
/// guard, sanitizer, FinOps. Disabled entries are left out.
pub fn build_middlewares(
    config: &DroverConfig,
    sink: Arc<dyn EventSink>,
) -> Vec<Arc<dyn Middleware>> {
    let has_gemini_key = config.has_gemini_api_key();
    let mut middlewares: Vec<Arc<dyn Middleware>> = Vec::new();
    if config.content_classification.enabled {
        middlewares.push(Arc::new(ContentClassifier::new(
            &config.content_classification,
            has_gemini_key,
            sink.clone(),
        )));
    }
    if config.prompt_guard.enabled {
        middlewares.push(Arc::new(PromptGuard::new(
            &config.prompt_guard,
            has_gemini_key,
            sink.clone(),
        )));
    }
    if config.output_sanitization.enabled {
        middlewares.push(Arc::new(OutputSanitizer::new(
            &config.output_sanitization,
            sink.clone(),
        )));
    }
    if config.finops.enabled {
        middlewares.push(Arc::new(FinOpsRecorder::new(&config.finops, sink)));
    }
    middlewares
}
