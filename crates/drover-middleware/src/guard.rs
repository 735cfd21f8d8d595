//! Prompt guard — scans every user-role message with the shared detector
//! set and applies the configured action per match: warn, redact, block, or
//! reroute to a private model.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use drover_core::config::{GuardAction, GuardConfig};
use drover_core::events::{EventSink, RuntimeEvent, SecuritySubtype};
use drover_core::types::RequestMeta;
use drover_core::ModelRef;
use drover_provider::{ChatRequest, Role};

use crate::chain::Middleware;
use crate::detectors::{redact, Detection, DetectorCategory, DetectorSet};

pub struct PromptGuard {
    detectors: DetectorSet,
    mode: GuardAction,
    deny_keywords: Vec<String>,
    pii_action: Option<GuardAction>,
    secrets_action: Option<GuardAction>,
    private_model: Option<ModelRef>,
    sink: Arc<dyn EventSink>,
}

impl PromptGuard {
    pub fn new(config: &GuardConfig, has_gemini_key: bool, sink: Arc<dyn EventSink>) -> Self {
        let private_model = config
            .private_model
            .as_deref()
            .and_then(|raw| ModelRef::parse(raw, has_gemini_key).ok());
        Self {
            detectors: DetectorSet::new(&config.custom_patterns),
            mode: config.mode,
            deny_keywords: config
                .deny_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            pii_action: config.pii.as_ref().map(|c| c.action),
            secrets_action: config.secrets.as_ref().map(|c| c.action),
            private_model,
            sink,
        }
    }

    /// Deny keywords always block, regardless of the global mode; category
    /// overrides beat the global mode for their detections.
    fn action_for(&self, detection: &Detection) -> GuardAction {
        match detection.category {
            DetectorCategory::Pii => self.pii_action.unwrap_or(self.mode),
            DetectorCategory::Secret => self.secrets_action.unwrap_or(self.mode),
            DetectorCategory::Custom => self.mode,
        }
    }

    fn reason_for(detection: &Detection) -> String {
        format!("{}:{}", detection.category.label(), detection.kind)
    }

    fn emit(&self, subtype: SecuritySubtype, reason: &str, meta: &RequestMeta) {
        self.sink.emit(RuntimeEvent::Security {
            subtype,
            middleware: "prompt-guard".to_string(),
            reason: reason.to_string(),
            tags: meta.tags.clone(),
        });
    }

    fn reroute(&self, meta: &mut RequestMeta, reason: &str) {
        if let Some(target) = &self.private_model {
            let before = meta.target();
            meta.provider_id = target.provider().to_string();
            meta.model_name = target.model().to_string();
            debug!(reason, from = %before, to = %meta.target(), "guard rerouting to private model");
            self.sink.emit(RuntimeEvent::Routing {
                before_model: before,
                after_model: meta.target(),
                tags: meta.tags.clone(),
            });
        }
    }
}

#[async_trait]
impl Middleware for PromptGuard {
    fn name(&self) -> &str {
        "prompt-guard"
    }

    async fn process_request(
        &self,
        req: &mut ChatRequest,
        meta: &mut RequestMeta,
    ) -> Result<(), String> {
        for message in req.messages.iter_mut().filter(|m| m.role == Role::User) {
            let lowered = message.content.to_lowercase();
            if let Some(keyword) = self.deny_keywords.iter().find(|k| lowered.contains(k.as_str())) {
                let reason = format!("deny:{keyword}");
                meta.block(reason.clone());
                self.emit(SecuritySubtype::Blocked, &reason, meta);
                return Ok(());
            }

            let detections = self.detectors.scan(&message.content);
            if detections.is_empty() {
                continue;
            }

            if let Some(blocker) = detections
                .iter()
                .find(|d| self.action_for(d) == GuardAction::Block)
            {
                let reason = Self::reason_for(blocker);
                meta.block(reason.clone());
                self.emit(SecuritySubtype::Blocked, &reason, meta);
                return Ok(());
            }

            let mut rerouted = false;
            let redactions: Vec<Detection> = detections
                .iter()
                .filter(|d| self.action_for(d) == GuardAction::Redact)
                .cloned()
                .collect();
            for detection in &detections {
                match self.action_for(detection) {
                    GuardAction::Warn => {
                        let reason = Self::reason_for(detection);
                        meta.tags.entry("guard".to_string()).or_insert(reason.clone());
                        self.emit(SecuritySubtype::Guard, &reason, meta);
                    }
                    GuardAction::Reroute if !rerouted => {
                        let reason = Self::reason_for(detection);
                        self.emit(SecuritySubtype::Guard, &reason, meta);
                        self.reroute(meta, &reason);
                        rerouted = true;
                    }
                    _ => {}
                }
            }
            if !redactions.is_empty() {
                message.content = redact(&message.content, &redactions);
                let reason = Self::reason_for(&redactions[0]);
                self.emit(SecuritySubtype::Guard, &reason, meta);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::config::GuardCategory;
    use drover_core::events::testing::RecordingSink;
    use drover_core::types::MessageType;
    use drover_provider::ChatMessage;

    fn meta() -> RequestMeta {
        RequestMeta::new("openai", "gpt-4o", "u1", "cli", MessageType::External)
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest::new("gpt-4o", vec![ChatMessage::new(Role::User, text)])
    }

    fn guard(config: GuardConfig) -> (PromptGuard, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (PromptGuard::new(&config, false, sink.clone()), sink)
    }

    #[tokio::test]
    async fn secret_block_short_circuits_with_typed_reason() {
        let (guard, sink) = guard(GuardConfig {
            secrets: Some(GuardCategory {
                action: GuardAction::Block,
            }),
            ..GuardConfig::default()
        });
        let mut m = meta();
        let mut req = request("my key is AKIA0123456789ABCDEF");
        guard.process_request(&mut req, &mut m).await.unwrap();

        assert!(m.blocked);
        assert_eq!(m.block_reason.as_deref(), Some("secrets:api_key"));
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RuntimeEvent::Security { subtype, middleware, reason, .. } => {
                assert_eq!(*subtype, SecuritySubtype::Blocked);
                assert_eq!(middleware, "prompt-guard");
                assert_eq!(reason, "secrets:api_key");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn deny_keywords_block_even_in_warn_mode() {
        let (guard, _) = guard(GuardConfig {
            mode: GuardAction::Warn,
            deny_keywords: vec!["Rm -Rf /".into()],
            ..GuardConfig::default()
        });
        let mut m = meta();
        guard
            .process_request(&mut request("please run rm -rf / now"), &mut m)
            .await
            .unwrap();
        assert!(m.blocked);
        assert_eq!(m.block_reason.as_deref(), Some("deny:rm -rf /"));
    }

    #[tokio::test]
    async fn redact_mode_rewrites_the_message_in_place() {
        let (guard, sink) = guard(GuardConfig {
            mode: GuardAction::Redact,
            ..GuardConfig::default()
        });
        let mut m = meta();
        let mut req = request("mail me at jo@example.com please");
        guard.process_request(&mut req, &mut m).await.unwrap();

        assert!(!m.blocked);
        assert_eq!(req.messages[0].content, "mail me at [REDACTED:email] please");
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn pii_override_beats_global_mode() {
        let (guard, _) = guard(GuardConfig {
            mode: GuardAction::Block,
            pii: Some(GuardCategory {
                action: GuardAction::Redact,
            }),
            ..GuardConfig::default()
        });
        let mut m = meta();
        let mut req = request("ssn 078-05-1120");
        guard.process_request(&mut req, &mut m).await.unwrap();
        assert!(!m.blocked, "pii override should downgrade the global block");
        assert_eq!(req.messages[0].content, "ssn [REDACTED:ssn]");
    }

    #[tokio::test]
    async fn warn_mode_tags_and_lets_through() {
        let (guard, sink) = guard(GuardConfig::default());
        let mut m = meta();
        let mut req = request("ip is 10.0.0.1");
        guard.process_request(&mut req, &mut m).await.unwrap();
        assert!(!m.blocked);
        assert_eq!(req.messages[0].content, "ip is 10.0.0.1");
        assert_eq!(m.tags.get("guard").map(String::as_str), Some("pii:ip_address"));
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn reroute_swaps_target_to_private_model() {
        let (guard, sink) = guard(GuardConfig {
            mode: GuardAction::Reroute,
            private_model: Some("vllm/llama-3.1-70b-instruct".into()),
            ..GuardConfig::default()
        });
        let mut m = meta();
        guard
            .process_request(&mut request("card 4111 1111 1111 1111"), &mut m)
            .await
            .unwrap();
        assert_eq!(m.provider_id, "vllm");
        assert_eq!(m.model_name, "llama-3.1-70b-instruct");
        // one GUARD event plus one ROUTING event
        assert_eq!(sink.count(), 2);
    }

    #[tokio::test]
    async fn scans_every_user_message_not_just_the_last() {
        let (guard, _) = guard(GuardConfig {
            mode: GuardAction::Redact,
            ..GuardConfig::default()
        });
        let mut m = meta();
        let mut req = ChatRequest::new(
            "gpt-4o",
            vec![
                ChatMessage::new(Role::User, "first has a@b.io"),
                ChatMessage::new(Role::Assistant, "noted c@d.io"),
                ChatMessage::new(Role::User, "second is clean"),
            ],
        );
        guard.process_request(&mut req, &mut m).await.unwrap();
        assert_eq!(req.messages[0].content, "first has [REDACTED:email]");
        // assistant messages are out of scope for the prompt guard
        assert_eq!(req.messages[1].content, "noted c@d.io");
        assert_eq!(req.messages[2].content, "second is clean");
    }

    #[tokio::test]
    async fn clean_message_emits_nothing() {
        let (guard, sink) = guard(GuardConfig::default());
        let mut m = meta();
        guard
            .process_request(&mut request("what is the weather"), &mut m)
            .await
            .unwrap();
        assert_eq!(sink.count(), 0);
        assert!(m.tags.is_empty());
    }
}
