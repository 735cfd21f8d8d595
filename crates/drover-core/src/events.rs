use std::collections::BTreeMap;

use serde::Serialize;

/// Security event subtypes emitted by the guard and sanitizer middlewares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecuritySubtype {
    Blocked,
    Guard,
    Sanitized,
}

/// Events the core emits to the surrounding runtime. The transport (message
/// bus, timeline store) is external; this crate only defines the shapes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeEvent {
    Security {
        subtype: SecuritySubtype,
        middleware: String,
        reason: String,
        tags: BTreeMap<String, String>,
    },
    #[serde(rename = "SYSTEM")]
    Routing {
        before_model: String,
        after_model: String,
        tags: BTreeMap<String, String>,
    },
    BudgetWarning {
        provider: String,
        cost_usd: f64,
        daily_total_usd: f64,
        budget_usd: f64,
    },
}

/// Sink for runtime events. The agent runtime wires its own bus; tests use a
/// recording sink.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RuntimeEvent);
}

/// Default sink: structured log lines only.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: RuntimeEvent) {
        match &event {
            RuntimeEvent::Security {
                subtype,
                middleware,
                reason,
                ..
            } => {
                tracing::warn!(?subtype, middleware = %middleware, reason = %reason, "security event");
            }
            RuntimeEvent::Routing {
                before_model,
                after_model,
                ..
            } => {
                tracing::info!(before = %before_model, after = %after_model, "routing changed");
            }
            RuntimeEvent::BudgetWarning {
                provider,
                cost_usd,
                daily_total_usd,
                budget_usd,
            } => {
                tracing::warn!(
                    provider = %provider,
                    cost_usd,
                    daily_total_usd,
                    budget_usd,
                    "budget warning"
                );
            }
        }
    }
}

/// Test support: an in-memory sink usable from any crate's tests.
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Collects emitted events for assertions.
    #[derive(Default)]
    pub struct RecordingSink {
        pub events: Mutex<Vec<RuntimeEvent>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: RuntimeEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    impl RecordingSink {
        pub fn count(&self) -> usize {
            self.events.lock().unwrap().len()
        }
    }
}
