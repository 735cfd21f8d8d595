//! Content classifier — tags requests by sensitivity and task type, and
//! reroutes them when a matched rule names a target model.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use drover_core::config::{ClassifierConfig, ClassifierRule};
use drover_core::events::{EventSink, RuntimeEvent};
use drover_core::types::RequestMeta;
use drover_core::ModelRef;
use drover_provider::ChatRequest;

use crate::chain::Middleware;

struct CompiledRule {
    name: String,
    keywords: Option<Regex>,
    patterns: Vec<Regex>,
    route_to: Option<ModelRef>,
}

impl CompiledRule {
    fn compile(rule: &ClassifierRule, has_gemini_key: bool) -> Self {
        // Whole-word, case-insensitive alternation over all keywords.
        let keywords = if rule.keywords.is_empty() {
            None
        } else {
            let escaped: Vec<String> = rule.keywords.iter().map(|k| regex::escape(k)).collect();
            match Regex::new(&format!(r"(?i)\b(?:{})\b", escaped.join("|"))) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(rule = %rule.name, err = %e, "keyword set failed to compile");
                    None
                }
            }
        };
        let patterns = rule
            .patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(rule = %rule.name, pattern = %p, err = %e, "invalid pattern, skipping");
                    None
                }
            })
            .collect();
        let route_to = rule.route_to.as_deref().and_then(|raw| {
            match ModelRef::parse(raw, has_gemini_key) {
                Ok(mref) => Some(mref),
                Err(e) => {
                    warn!(rule = %rule.name, err = %e, "invalid route_to target, ignoring");
                    None
                }
            }
        });
        Self {
            name: rule.name.clone(),
            keywords,
            patterns,
            route_to,
        }
    }

    fn matches(&self, text: &str) -> bool {
        if let Some(keywords) = &self.keywords {
            if keywords.is_match(text) {
                return true;
            }
        }
        self.patterns.iter().any(|re| re.is_match(text))
    }
}

pub struct ContentClassifier {
    sensitivity: Vec<CompiledRule>,
    task_types: Vec<CompiledRule>,
    sink: Arc<dyn EventSink>,
}

impl ContentClassifier {
    pub fn new(config: &ClassifierConfig, has_gemini_key: bool, sink: Arc<dyn EventSink>) -> Self {
        Self {
            sensitivity: config
                .sensitivity
                .iter()
                .map(|r| CompiledRule::compile(r, has_gemini_key))
                .collect(),
            task_types: config
                .task_types
                .iter()
                .map(|r| CompiledRule::compile(r, has_gemini_key))
                .collect(),
            sink,
        }
    }

    /// First matching rule wins the tag; a carried `route_to` rewrites the
    /// chain's target and emits a ROUTING event.
    fn apply(rules: &[CompiledRule], tag_key: &str, text: &str, meta: &mut RequestMeta, sink: &dyn EventSink) {
        if meta.tags.contains_key(tag_key) {
            return;
        }
        for rule in rules {
            if !rule.matches(text) {
                continue;
            }
            debug!(tag = tag_key, value = %rule.name, "classifier matched");
            meta.tags.insert(tag_key.to_string(), rule.name.clone());
            if let Some(target) = &rule.route_to {
                let before = meta.target();
                meta.provider_id = target.provider().to_string();
                meta.model_name = target.model().to_string();
                sink.emit(RuntimeEvent::Routing {
                    before_model: before,
                    after_model: meta.target(),
                    tags: meta.tags.clone(),
                });
            }
            return;
        }
    }
}

#[async_trait]
impl Middleware for ContentClassifier {
    fn name(&self) -> &str {
        "content-classifier"
    }

    async fn process_request(
        &self,
        req: &mut ChatRequest,
        meta: &mut RequestMeta,
    ) -> Result<(), String> {
        let Some(text) = req.last_user_text().map(str::to_string) else {
            return Ok(());
        };
        Self::apply(&self.sensitivity, "sensitivity", &text, meta, self.sink.as_ref());
        Self::apply(&self.task_types, "task", &text, meta, self.sink.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::config::ClassifierRule;
    use drover_core::events::testing::RecordingSink;
    use drover_core::types::MessageType;
    use drover_provider::{ChatMessage, Role};

    fn meta() -> RequestMeta {
        RequestMeta::new("openai", "gpt-4o", "u1", "cli", MessageType::External)
    }

    fn request(text: &str) -> ChatRequest {
        ChatRequest::new("gpt-4o", vec![ChatMessage::new(Role::User, text)])
    }

    fn classifier(rules: ClassifierConfig) -> (ContentClassifier, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (ContentClassifier::new(&rules, false, sink.clone()), sink)
    }

    fn pii_route_config() -> ClassifierConfig {
        ClassifierConfig {
            enabled: true,
            sensitivity: vec![
                ClassifierRule {
                    name: "pii".into(),
                    keywords: vec!["social security".into(), "passport".into()],
                    patterns: vec![],
                    route_to: Some("vllm/llama-3.1-70b-instruct".into()),
                },
                ClassifierRule {
                    name: "internal".into(),
                    keywords: vec!["roadmap".into()],
                    patterns: vec![],
                    route_to: None,
                },
            ],
            task_types: vec![ClassifierRule {
                name: "coding".into(),
                keywords: vec!["refactor".into()],
                patterns: vec![r"```\w*".into()],
                route_to: None,
            }],
        }
    }

    #[tokio::test]
    async fn sensitivity_match_tags_and_reroutes() {
        let (classifier, sink) = classifier(pii_route_config());
        let mut meta = meta();
        let mut req = request("please update my social security details");
        classifier.process_request(&mut req, &mut meta).await.unwrap();

        assert_eq!(meta.tags["sensitivity"], "pii");
        assert_eq!(meta.provider_id, "vllm");
        assert_eq!(meta.model_name, "llama-3.1-70b-instruct");
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn keywords_match_whole_words_case_insensitively() {
        let (classifier, _) = classifier(pii_route_config());

        let mut meta_hit = meta();
        classifier
            .process_request(&mut request("my PASSPORT number"), &mut meta_hit)
            .await
            .unwrap();
        assert_eq!(meta_hit.tags.get("sensitivity").map(String::as_str), Some("pii"));

        // keyword inside a longer word must not match
        let mut meta_miss = meta();
        classifier
            .process_request(&mut request("the passports-r-us brand"), &mut meta_miss)
            .await
            .unwrap();
        assert!(meta_miss.tags.get("sensitivity").is_none());
    }

    #[tokio::test]
    async fn first_match_wins_per_tag_key() {
        let (classifier, _) = classifier(pii_route_config());
        let mut m = meta();
        classifier
            .process_request(
                &mut request("roadmap for social security handling"),
                &mut m,
            )
            .await
            .unwrap();
        // declaration order: the pii rule is evaluated before internal
        assert_eq!(m.tags["sensitivity"], "pii");
    }

    #[tokio::test]
    async fn task_rules_evaluate_after_sensitivity() {
        let (classifier, _) = classifier(pii_route_config());
        let mut m = meta();
        classifier
            .process_request(&mut request("refactor the roadmap parser"), &mut m)
            .await
            .unwrap();
        assert_eq!(m.tags["sensitivity"], "internal");
        assert_eq!(m.tags["task"], "coding");
    }

    #[tokio::test]
    async fn regex_patterns_are_unanchored() {
        let (classifier, _) = classifier(pii_route_config());
        let mut m = meta();
        classifier
            .process_request(&mut request("see\n```rust\nfn main() {}\n```"), &mut m)
            .await
            .unwrap();
        assert_eq!(m.tags["task"], "coding");
    }

    #[tokio::test]
    async fn no_user_message_is_a_noop() {
        let (classifier, sink) = classifier(pii_route_config());
        let mut m = meta();
        let mut req = ChatRequest::new("gpt-4o", vec![ChatMessage::new(Role::System, "social security")]);
        classifier.process_request(&mut req, &mut m).await.unwrap();
        assert!(m.tags.is_empty());
        assert_eq!(sink.count(), 0);
    }
}
