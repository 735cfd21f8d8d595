use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Whether a request originated inside the runtime (agent-to-agent, system
/// prompts) or from an external sender on a chat channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Internal,
    External,
}

/// Mutable context carried through a middleware chain run.
///
/// Middlewares steer the chain by mutating this: rerouting overwrites
/// `provider_id`/`model_name`, guards set `blocked`, and the FinOps recorder
/// writes `cost_usd` as the last post-hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMeta {
    pub provider_id: String,
    pub model_name: String,
    pub sender_id: String,
    pub channel: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub blocked: bool,
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub cost_usd: f64,
    /// Correlation id surfaced in opaque upstream-error messages.
    pub trace_id: String,
}

impl RequestMeta {
    pub fn new(
        provider_id: impl Into<String>,
        model_name: impl Into<String>,
        sender_id: impl Into<String>,
        channel: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            model_name: model_name.into(),
            sender_id: sender_id.into(),
            channel: channel.into(),
            message_type,
            tags: BTreeMap::new(),
            blocked: false,
            block_reason: None,
            cost_usd: 0.0,
            trace_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Mark the request blocked. The chain short-circuits on the next check.
    pub fn block(&mut self, reason: impl Into<String>) {
        self.blocked = true;
        self.block_reason = Some(reason.into());
    }

    /// Current routing target as a `provider/model` string, for ROUTING events.
    pub fn target(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_name)
    }
}
