//! Output sanitizer — post-hook only. Deny-pattern hits replace the whole
//! response; otherwise PII/secret spans are redacted and the content is
//! truncated to the configured ceiling.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, warn};

use drover_core::config::SanitizerConfig;
use drover_core::events::{EventSink, RuntimeEvent, SecuritySubtype};
use drover_core::types::RequestMeta;
use drover_provider::{ChatRequest, ChatResponse};

use crate::chain::Middleware;
use crate::detectors::{redact, Detection, DetectorCategory, DetectorSet};

const FILTER_NOTICE: &str = "[response withheld by output filter]";
const TRUNCATION_MARKER: &str = "\n[output truncated]";

pub struct OutputSanitizer {
    detectors: DetectorSet,
    deny_patterns: Vec<Regex>,
    redact_pii: bool,
    redact_secrets: bool,
    max_output_length: usize,
    sink: Arc<dyn EventSink>,
}

impl OutputSanitizer {
    pub fn new(config: &SanitizerConfig, sink: Arc<dyn EventSink>) -> Self {
        let deny_patterns = config
            .deny_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %p, err = %e, "invalid deny pattern, skipping");
                    None
                }
            })
            .collect();
        Self {
            detectors: DetectorSet::new(&config.custom_patterns),
            deny_patterns,
            redact_pii: config.redact_pii,
            redact_secrets: config.redact_secrets,
            max_output_length: config.max_output_length,
            sink,
        }
    }

    fn wants(&self, detection: &Detection) -> bool {
        match detection.category {
            DetectorCategory::Pii => self.redact_pii,
            DetectorCategory::Secret => self.redact_secrets,
            DetectorCategory::Custom => true,
        }
    }

    fn emit(&self, reason: &str, meta: &RequestMeta) {
        self.sink.emit(RuntimeEvent::Security {
            subtype: SecuritySubtype::Sanitized,
            middleware: "output-sanitizer".to_string(),
            reason: reason.to_string(),
            tags: meta.tags.clone(),
        });
    }

    /// Cut at a char boundary and append the visible marker.
    fn truncate(&self, content: &mut String) {
        if self.max_output_length == 0 || content.chars().count() <= self.max_output_length {
            return;
        }
        let cut = content
            .char_indices()
            .nth(self.max_output_length)
            .map(|(idx, _)| idx)
            .unwrap_or(content.len());
        content.truncate(cut);
        content.push_str(TRUNCATION_MARKER);
    }
}

#[async_trait]
impl Middleware for OutputSanitizer {
    fn name(&self) -> &str {
        "output-sanitizer"
    }

    async fn process_response(
        &self,
        _req: &ChatRequest,
        resp: &mut ChatResponse,
        meta: &mut RequestMeta,
    ) -> Result<(), String> {
        if let Some(pattern) = self.deny_patterns.iter().find(|re| re.is_match(&resp.content)) {
            debug!(pattern = %pattern.as_str(), "deny pattern hit, replacing response");
            resp.content = FILTER_NOTICE.to_string();
            self.emit(&format!("deny-pattern:{}", pattern.as_str()), meta);
            return Ok(());
        }

        let redactions: Vec<Detection> = self
            .detectors
            .scan(&resp.content)
            .into_iter()
            .filter(|d| self.wants(d))
            .collect();
        if !redactions.is_empty() {
            let kinds: Vec<&str> = redactions.iter().map(|d| d.kind.as_str()).collect();
            resp.content = redact(&resp.content, &redactions);
            self.emit(&format!("redacted:{}", kinds.join(",")), meta);
        }

        self.truncate(&mut resp.content);
        Ok(())
    }
}
