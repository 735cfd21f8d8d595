use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use drover_core::config::{DroverConfig, FALLBACK_EXTRA_BUDGET_SECS};
use drover_core::model_ref::normalize_provider;
use drover_core::types::{MessageType, RequestMeta};
use drover_core::{DroverError, ModelRef};
use drover_secrets::cli_cache::{self, ExternalCli};
use drover_secrets::CredentialStore;

use crate::adapters::{
    AnthropicAdapter, CodexAdapter, GeminiAdapter, GeminiCliAdapter, OpenAiAdapter,
};
use crate::provider::{ChatProvider, ChatRequest, ChatResponse, ProviderError};
use crate::ratelimit::SnapshotCache;
use crate::registry::{self, AuthFlavor};

/// One failed try of the primary or a fallback target.
#[derive(Debug)]
pub struct FallbackAttempt {
    pub target: String,
    pub error: ProviderError,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Config(#[from] DroverError),

    /// Terminal upstream failures are surfaced directly, never retried.
    #[error("provider '{provider_id}' failed: {source}")]
    Terminal {
        provider_id: String,
        #[source]
        source: ProviderError,
    },

    /// Primary and every fallback returned transient failures.
    #[error("all providers exhausted after {} attempts", attempts.len())]
    ExhaustedFallbacks { attempts: Vec<FallbackAttempt> },

    #[error("operation cancelled")]
    Cancelled,
}

/// Output of a resolution: the adapter to call, the backend model id, and
/// the ordered fallback targets for transient failures.
#[derive(Clone)]
pub struct Resolution {
    pub provider_id: String,
    pub model: String,
    pub fallbacks: Vec<ModelRef>,
    pub adapter: Arc<dyn ChatProvider>,
}

impl std::fmt::Debug for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolution")
            .field("provider_id", &self.provider_id)
            .field("model", &self.model)
            .field("fallbacks", &self.fallbacks)
            .finish_non_exhaustive()
    }
}

impl Resolution {
    /// Seed the per-request meta carried through the middleware chain.
    pub fn meta(
        &self,
        sender_id: impl Into<String>,
        channel: impl Into<String>,
        message_type: MessageType,
    ) -> RequestMeta {
        RequestMeta::new(
            self.provider_id.clone(),
            self.model.clone(),
            sender_id,
            channel,
            message_type,
        )
    }
}

/// Maps `(agent, task category)` to a concrete adapter + model, owns the
/// fallback state machine, and maintains the rate-limit snapshot cache.
/// Safe to share behind an `Arc` across concurrent chain invocations.
pub struct Resolver {
    config: DroverConfig,
    credentials: Option<Arc<CredentialStore>>,
    snapshots: SnapshotCache,
    adapters: DashMap<String, Arc<dyn ChatProvider>>,
    timeout_secs: u64,
}

impl Resolver {
    pub fn new(config: DroverConfig, credentials: Option<Arc<CredentialStore>>) -> Self {
        let timeout_secs = config.http.request_timeout_secs;
        Self {
            config,
            credentials,
            snapshots: SnapshotCache::new(),
            adapters: DashMap::new(),
            timeout_secs,
        }
    }

    pub fn config(&self) -> &DroverConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotCache {
        &self.snapshots
    }

    /// Override the adapter for a provider id. Embedders use this to wire
    /// instrumented adapters; tests use it for stubs.
    pub fn register_adapter(&self, provider_id: impl Into<String>, adapter: Arc<dyn ChatProvider>) {
        self.adapters.insert(provider_id.into(), adapter);
    }

    fn parse_ref(&self, raw: &str) -> Result<ModelRef, DroverError> {
        ModelRef::parse(raw, self.config.has_gemini_api_key())
    }

    /// Static API key for a provider: config entry first, then the tomb.
    pub fn api_key_for(&self, provider_id: &str) -> Option<String> {
        if let Some(entry) = self.config.providers.get(provider_id) {
            if let Some(key) = entry.api_key.as_deref() {
                if !key.is_empty() {
                    return Some(key.to_string());
                }
            }
        }
        self.credentials
            .as_ref()
            .and_then(|store| store.load_api_key(provider_id).ok())
    }

    fn api_base_for(&self, provider_id: &str) -> Option<String> {
        self.config
            .providers
            .get(provider_id)
            .and_then(|entry| entry.api_base.clone())
            .filter(|base| !base.is_empty())
            .or_else(|| {
                self.credentials
                    .as_ref()
                    .and_then(|store| store.load_api_base(provider_id))
            })
    }

    /// Adapter for a canonical provider id, built on first use and cached.
    pub fn adapter(&self, provider_id: &str) -> Result<Arc<dyn ChatProvider>, DroverError> {
        if let Some(existing) = self.adapters.get(provider_id) {
            return Ok(existing.value().clone());
        }
        let built = self.build_adapter(provider_id)?;
        self.adapters.insert(provider_id.to_string(), built.clone());
        Ok(built)
    }

    fn build_adapter(&self, provider_id: &str) -> Result<Arc<dyn ChatProvider>, DroverError> {
        let known = registry::lookup(provider_id).ok_or_else(|| DroverError::UnknownProvider {
            provider_id: provider_id.to_string(),
            remediation: format!(
                "run `drover models auth set-key --provider {provider_id}` or check providers.* in the config"
            ),
        })?;

        let base = self.api_base_for(provider_id);
        if known.base_url.is_none() && base.is_none() {
            return Err(DroverError::MissingApiBase {
                provider_id: provider_id.to_string(),
            });
        }

        let require_key = || {
            self.api_key_for(provider_id).ok_or_else(|| {
                DroverError::Config(format!(
                    "provider '{provider_id}' has no API key; run `drover models auth set-key --provider {provider_id}`"
                ))
            })
        };

        let adapter: Arc<dyn ChatProvider> = match known.auth {
            AuthFlavor::AnthropicApiKey => Arc::new(AnthropicAdapter::new(
                require_key()?,
                base,
                self.timeout_secs,
            )),
            AuthFlavor::BearerApiKey => Arc::new(OpenAiAdapter::for_known(
                known,
                Some(require_key()?),
                base,
                self.timeout_secs,
            )),
            AuthFlavor::OptionalBearer => Arc::new(OpenAiAdapter::for_known(
                known,
                self.api_key_for(provider_id),
                base,
                self.timeout_secs,
            )),
            AuthFlavor::QueryParamKey => Arc::new(GeminiAdapter::new(
                require_key()?,
                base,
                self.timeout_secs,
            )),
            AuthFlavor::OAuthBearer => match provider_id {
                "openai-codex" => Arc::new(CodexAdapter::new(base, self.timeout_secs)),
                "gemini-cli" => Arc::new(GeminiCliAdapter::new(base, self.timeout_secs)),
                other => {
                    return Err(DroverError::Internal(format!(
                        "no OAuth adapter wired for '{other}'"
                    )))
                }
            },
        };
        Ok(adapter)
    }

    /// Check that credentials exist for a provider without making a call.
    /// Key-flavored backends are covered by adapter construction; OAuth
    /// backends check the external CLI cache.
    pub fn validate_credentials(&self, provider_id: &str) -> Result<(), DroverError> {
        match provider_id {
            "openai-codex" => cli_cache::load(ExternalCli::Codex)
                .map(|_| ())
                .map_err(|e| DroverError::Config(e.to_string())),
            "gemini-cli" => cli_cache::load(ExternalCli::Gemini)
                .map(|_| ())
                .map_err(|e| DroverError::Config(e.to_string())),
            _ => self.adapter(provider_id).map(|_| ()),
        }
    }

    fn primary_for(
        &self,
        agent_id: &str,
        category: Option<&str>,
    ) -> Result<ModelRef, DroverError> {
        if let Some(agent) = self.config.agent(agent_id) {
            if let Some(spec) = &agent.model {
                return self.parse_ref(&spec.primary);
            }
        }
        if let Some(cat) = category {
            if let Some(raw) = self.config.model.task_routing.get(cat) {
                return self.parse_ref(raw);
            }
        }
        if let Some(name) = self.config.model.name.as_deref().filter(|n| !n.is_empty()) {
            return self.parse_ref(name);
        }
        // Legacy: nothing configured, but an OpenAI-family key exists.
        if self.api_key_for("openai").is_some() {
            let default = registry::lookup("openai").expect("openai in registry").default_model;
            warn!(model = default, "no model configured, synthesizing openai default (legacy compat)");
            return Ok(ModelRef::new("openai", default));
        }
        Err(DroverError::Config(format!(
            "no model configured for agent '{agent_id}'; set model.name or agents.{agent_id}.model.primary"
        )))
    }

    fn fallbacks_for(&self, agent_id: &str) -> Result<Vec<ModelRef>, DroverError> {
        let Some(agent) = self.config.agent(agent_id) else {
            return Ok(Vec::new());
        };
        let Some(spec) = &agent.model else {
            return Ok(Vec::new());
        };
        spec.fallbacks
            .iter()
            .map(|raw| self.parse_ref(raw))
            .collect()
    }

    fn resolution_for(&self, mref: ModelRef, fallbacks: Vec<ModelRef>) -> Result<Resolution, DroverError> {
        let adapter = self.adapter(mref.provider())?;
        Ok(Resolution {
            provider_id: mref.provider().to_string(),
            model: mref.model().to_string(),
            fallbacks,
            adapter,
        })
    }

    /// Resolve the primary model for an agent.
    pub fn resolve(&self, agent_id: &str) -> Result<Resolution, DroverError> {
        let primary = self.primary_for(agent_id, None)?;
        let fallbacks = self.fallbacks_for(agent_id)?;
        self.resolution_for(primary, fallbacks)
    }

    /// Resolve with a task category consulted between the agent's own spec
    /// and the global default.
    pub fn resolve_with_task(
        &self,
        agent_id: &str,
        category: &str,
    ) -> Result<Resolution, DroverError> {
        let primary = self.primary_for(agent_id, Some(category))?;
        let fallbacks = self.fallbacks_for(agent_id)?;
        self.resolution_for(primary, fallbacks)
    }

    /// Resolve the model a child task spawned by `parent_agent_id` uses.
    /// Subagents carry a single model ref and no fallback chain.
    pub fn resolve_subagent(&self, parent_agent_id: &str) -> Result<Resolution, DroverError> {
        let raw = self
            .config
            .agent(parent_agent_id)
            .and_then(|a| a.subagents.as_ref())
            .and_then(|s| s.model.clone())
            .or_else(|| {
                self.config
                    .tools
                    .subagents
                    .as_ref()
                    .and_then(|s| s.model.clone())
            });
        let mref = match raw {
            Some(raw) => self.parse_ref(&raw)?,
            None => self.primary_for(parent_agent_id, None)?,
        };
        self.resolution_for(mref, Vec::new())
    }

    /// Re-resolve after a middleware rewrote the routing target. The
    /// provider id may be an alias; credentials are validated here, before
    /// any call is made at the new provider.
    pub fn resolve_target(&self, provider_raw: &str, model: &str) -> Result<Resolution, DroverError> {
        let provider_id = normalize_provider(provider_raw, self.config.has_gemini_api_key())?;
        self.validate_credentials(&provider_id)?;
        self.resolution_for(ModelRef::new(provider_id, model), Vec::new())
    }

    /// Run one chat call through the resolved adapter, walking the fallback
    /// list on transient failures. Every fallback is tried at most once, in
    /// declared order, never recursively. Successful calls update the
    /// rate-limit snapshot for their provider before returning.
    pub async fn execute(
        &self,
        resolution: &Resolution,
        req: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse, ChatError> {
        let mut attempts: Vec<FallbackAttempt> = Vec::new();

        let mut attempt_req = req.clone();
        attempt_req.model = resolution.model.clone();
        match resolution.adapter.chat(&attempt_req, cancel).await {
            Ok(resp) => {
                self.snapshots.record(&resolution.provider_id, &resp.usage);
                return Ok(resp);
            }
            Err(ProviderError::Cancelled) => return Err(ChatError::Cancelled),
            Err(e) if !e.is_transient() => {
                return Err(ChatError::Terminal {
                    provider_id: resolution.provider_id.clone(),
                    source: e,
                })
            }
            Err(e) => {
                warn!(
                    provider = %resolution.provider_id,
                    model = %resolution.model,
                    err = %e,
                    "primary provider failed, trying fallbacks"
                );
                attempts.push(FallbackAttempt {
                    target: format!("{}/{}", resolution.provider_id, resolution.model),
                    error: e,
                });
            }
        }

        if resolution.fallbacks.is_empty() {
            return Err(ChatError::ExhaustedFallbacks { attempts });
        }

        enum Outcome {
            Done(Result<ChatResponse, ChatError>),
            Exhausted,
        }

        let budget =
            std::time::Duration::from_secs(self.timeout_secs + FALLBACK_EXTRA_BUDGET_SECS);
        let attempts_ref = &mut attempts;
        let outcome = tokio::time::timeout(budget, async {
            for mref in &resolution.fallbacks {
                let adapter = match self.adapter(mref.provider()) {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(target = %mref, err = %e, "fallback provider not usable, skipping");
                        continue;
                    }
                };
                let mut attempt_req = req.clone();
                attempt_req.model = mref.model().to_string();
                match adapter.chat(&attempt_req, cancel).await {
                    Ok(resp) => {
                        info!(target = %mref, "fallback succeeded");
                        self.snapshots.record(mref.provider(), &resp.usage);
                        return Outcome::Done(Ok(resp));
                    }
                    Err(ProviderError::Cancelled) => {
                        return Outcome::Done(Err(ChatError::Cancelled))
                    }
                    Err(e) if !e.is_transient() => {
                        return Outcome::Done(Err(ChatError::Terminal {
                            provider_id: mref.provider().to_string(),
                            source: e,
                        }))
                    }
                    Err(e) => {
                        warn!(target = %mref, err = %e, "fallback failed");
                        attempts_ref.push(FallbackAttempt {
                            target: mref.to_string(),
                            error: e,
                        });
                    }
                }
            }
            Outcome::Exhausted
        })
        .await;

        match outcome {
            Ok(Outcome::Done(result)) => result,
            Ok(Outcome::Exhausted) => Err(ChatError::ExhaustedFallbacks { attempts }),
            Err(_elapsed) => {
                warn!("fallback budget exhausted");
                Err(ChatError::ExhaustedFallbacks { attempts })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatMessage, Role, TerminalKind, Usage};
    use async_trait::async_trait;
    use figment::providers::{Format, Toml};
    use figment::Figment;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(toml: &str) -> DroverConfig {
        Figment::new().merge(Toml::string(toml)).extract().unwrap()
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            "placeholder",
            vec![ChatMessage::new(Role::User, "hello")],
        )
    }

    struct StubAdapter {
        id: &'static str,
        calls: AtomicU32,
        behavior: Behavior,
    }

    enum Behavior {
        Ok(&'static str),
        Transient,
        Terminal,
    }

    impl StubAdapter {
        fn new(id: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicU32::new(0),
                behavior,
            })
        }
    }

    #[async_trait]
    impl ChatProvider for StubAdapter {
        fn id(&self) -> &str {
            self.id
        }

        async fn chat(
            &self,
            req: &ChatRequest,
            _cancel: &CancellationToken,
        ) -> Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Ok(content) => Ok(ChatResponse {
                    content: content.to_string(),
                    tool_calls: Vec::new(),
                    finish_reason: "stop".into(),
                    usage: Usage::from_counts(10, 5, None),
                }),
                Behavior::Transient => Err(ProviderError::Transient {
                    status: 503,
                    message: format!("{} unavailable", req.model),
                }),
                Behavior::Terminal => Err(ProviderError::Terminal {
                    kind: TerminalKind::InvalidRequest,
                    status: 400,
                    message: "bad request".into(),
                }),
            }
        }
    }

    #[test]
    fn alias_primary_resolution() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "anthropic/claude-sonnet-4-5"
                [providers.claude]
                api_key = "sk-ant-test"
                "#,
            ),
            None,
        );
        let resolution = resolver.resolve("main").unwrap();
        assert_eq!(resolution.provider_id, "claude");
        assert_eq!(resolution.model, "claude-sonnet-4-5");
        assert_eq!(resolution.adapter.id(), "claude");
        assert!(resolution.fallbacks.is_empty());
    }

    #[test]
    fn agent_spec_beats_global_model() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "openai/gpt-4o"
                [providers.openai]
                api_key = "sk-test"
                [providers.groq]
                api_key = "gsk-test"
                [[agents]]
                id = "fast"
                [agents.model]
                primary = "groq/llama-3.3-70b-versatile"
                "#,
            ),
            None,
        );
        assert_eq!(resolver.resolve("fast").unwrap().provider_id, "groq");
        assert_eq!(resolver.resolve("other").unwrap().provider_id, "openai");
    }

    #[test]
    fn task_routing_sits_between_agent_and_global() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "openai/gpt-4o"
                [model.task_routing]
                coding = "deepseek/deepseek-chat"
                [providers.openai]
                api_key = "sk-test"
                [providers.deepseek]
                api_key = "sk-ds"
                "#,
            ),
            None,
        );
        let with_task = resolver.resolve_with_task("main", "coding").unwrap();
        assert_eq!(with_task.provider_id, "deepseek");
        let unknown_category = resolver.resolve_with_task("main", "poetry").unwrap();
        assert_eq!(unknown_category.provider_id, "openai");
    }

    #[test]
    fn legacy_bare_model_synthesizes_openai() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "gpt-4o-mini"
                [providers.openai]
                api_key = "sk-test"
                "#,
            ),
            None,
        );
        let resolution = resolver.resolve("main").unwrap();
        assert_eq!(resolution.provider_id, "openai");
        assert_eq!(resolution.model, "gpt-4o-mini");
    }

    #[test]
    fn no_model_and_no_key_is_a_config_error() {
        let resolver = Resolver::new(config(""), None);
        assert!(matches!(
            resolver.resolve("main"),
            Err(DroverError::Config(_))
        ));
    }

    #[test]
    fn empty_config_with_openai_key_synthesizes_default() {
        let resolver = Resolver::new(
            config(
                r#"
                [providers.openai]
                api_key = "sk-test"
                "#,
            ),
            None,
        );
        let resolution = resolver.resolve("main").unwrap();
        assert_eq!(resolution.provider_id, "openai");
        assert_eq!(resolution.model, "gpt-4o");
    }

    #[test]
    fn subagent_resolution_chain() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "openai/gpt-4o"
                [providers.openai]
                api_key = "sk-test"
                [providers.groq]
                api_key = "gsk"
                [providers.deepseek]
                api_key = "ds"
                [tools.subagents]
                model = "deepseek/deepseek-chat"
                [[agents]]
                id = "lead"
                [agents.subagents]
                model = "groq/llama-3.3-70b-versatile"
                [[agents]]
                id = "solo"
                "#,
            ),
            None,
        );
        // 1. agent's own subagent model
        assert_eq!(resolver.resolve_subagent("lead").unwrap().provider_id, "groq");
        // 2. global tools.subagents.model
        assert_eq!(
            resolver.resolve_subagent("solo").unwrap().provider_id,
            "deepseek"
        );
    }

    #[test]
    fn subagent_inherits_parent_without_any_config() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "openai/gpt-4o"
                [providers.openai]
                api_key = "sk-test"
                "#,
            ),
            None,
        );
        let resolution = resolver.resolve_subagent("main").unwrap();
        assert_eq!(resolution.provider_id, "openai");
        assert_eq!(resolution.model, "gpt-4o");
        assert!(resolution.fallbacks.is_empty());
    }

    #[test]
    fn missing_base_for_self_hosted_providers() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "vllm/llama-3.1-70b-instruct"
                "#,
            ),
            None,
        );
        assert!(matches!(
            resolver.resolve("main"),
            Err(DroverError::MissingApiBase { .. })
        ));
    }

    #[test]
    fn vllm_with_base_needs_no_key() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "vllm/llama-3.1-70b-instruct"
                [providers.vllm]
                api_base = "http://10.0.0.5:8000"
                "#,
            ),
            None,
        );
        let resolution = resolver.resolve("main").unwrap();
        assert_eq!(resolution.provider_id, "vllm");
    }

    #[test]
    fn unknown_provider_reports_remediation() {
        let resolver = Resolver::new(config("[model]\nname = \"openai/gpt-4o\""), None);
        let err = resolver.resolve_target("nonesuch", "m").unwrap_err();
        match err {
            DroverError::UnknownProvider { remediation, .. } => {
                assert!(remediation.contains("set-key"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    fn fallback_config() -> DroverConfig {
        config(
            r#"
            [[agents]]
            id = "coder"
            [agents.model]
            primary = "openai-codex/gpt-5.3-codex"
            fallbacks = ["openai/gpt-4o", "groq/llama-3.3-70b-versatile"]
            "#,
        )
    }

    #[tokio::test]
    async fn fallback_on_transient_invokes_exactly_two() {
        let resolver = Resolver::new(fallback_config(), None);
        let primary = StubAdapter::new("openai-codex", Behavior::Transient);
        let fallback = StubAdapter::new("openai", Behavior::Ok("fallback answer"));
        let unused = StubAdapter::new("groq", Behavior::Ok("never"));
        resolver.register_adapter("openai-codex", primary.clone());
        resolver.register_adapter("openai", fallback.clone());
        resolver.register_adapter("groq", unused.clone());

        let resolution = resolver.resolve("coder").unwrap();
        let resp = resolver
            .execute(&resolution, &request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resp.content, "fallback answer");
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
        assert_eq!(unused.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhaustion_carries_every_attempt_in_order() {
        let resolver = Resolver::new(fallback_config(), None);
        let a = StubAdapter::new("openai-codex", Behavior::Transient);
        let b = StubAdapter::new("openai", Behavior::Transient);
        let c = StubAdapter::new("groq", Behavior::Transient);
        resolver.register_adapter("openai-codex", a.clone());
        resolver.register_adapter("openai", b.clone());
        resolver.register_adapter("groq", c.clone());

        let resolution = resolver.resolve("coder").unwrap();
        let err = resolver
            .execute(&resolution, &request(), &CancellationToken::new())
            .await
            .unwrap_err();

        // exactly N+1 invocations, declared order
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
        assert_eq!(c.calls.load(Ordering::SeqCst), 1);
        match err {
            ChatError::ExhaustedFallbacks { attempts } => {
                let targets: Vec<&str> = attempts.iter().map(|a| a.target.as_str()).collect();
                assert_eq!(
                    targets,
                    vec![
                        "openai-codex/gpt-5.3-codex",
                        "openai/gpt-4o",
                        "groq/llama-3.3-70b-versatile"
                    ]
                );
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let resolver = Resolver::new(fallback_config(), None);
        let primary = StubAdapter::new("openai-codex", Behavior::Terminal);
        let fallback = StubAdapter::new("openai", Behavior::Ok("unused"));
        resolver.register_adapter("openai-codex", primary.clone());
        resolver.register_adapter("openai", fallback.clone());
        resolver.register_adapter("groq", StubAdapter::new("groq", Behavior::Ok("unused")));

        let resolution = resolver.resolve("coder").unwrap();
        let err = resolver
            .execute(&resolution, &request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Terminal { .. }));
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_call_updates_the_snapshot_cache() {
        let resolver = Resolver::new(
            config(
                r#"
                [model]
                name = "groq/llama-3.3-70b-versatile"
                [providers.groq]
                api_key = "gsk"
                "#,
            ),
            None,
        );
        resolver.register_adapter("groq", StubAdapter::new("groq", Behavior::Ok("hi")));

        let resolution = resolver.resolve("main").unwrap();
        assert!(resolver.snapshots().get("groq").is_none());
        resolver
            .execute(&resolution, &request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(resolver.snapshots().get("groq").is_some());
    }
}
