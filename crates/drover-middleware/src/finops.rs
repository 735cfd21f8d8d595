//! FinOps recorder — the last post-hook. Computes per-request cost from the
//! provider's configured rates, writes it to the request meta, and warns
//! when a single request burns a disproportionate slice of the daily budget.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use drover_core::config::{FinopsConfig, Pricing};
use drover_core::events::{EventSink, RuntimeEvent};
use drover_core::types::RequestMeta;
use drover_provider::{ChatRequest, ChatResponse};

use crate::chain::Middleware;

/// A single request costing more than this share of the daily budget emits
/// a BUDGET_WARNING.
const BUDGET_WARN_SHARE: f64 = 0.10;

pub struct FinOpsRecorder {
    pricing: BTreeMap<String, Pricing>,
    daily_budget_usd: f64,
    /// Running spend for the current local day.
    day_total: Mutex<(NaiveDate, f64)>,
    sink: Arc<dyn EventSink>,
}

impl FinOpsRecorder {
    pub fn new(config: &FinopsConfig, sink: Arc<dyn EventSink>) -> Self {
        Self {
            pricing: config.pricing.clone(),
            daily_budget_usd: config.daily_budget_usd,
            day_total: Mutex::new((chrono::Local::now().date_naive(), 0.0)),
            sink,
        }
    }

    /// Rates are per 1k tokens; unconfigured providers cost zero.
    fn cost_for(&self, provider_id: &str, prompt_tokens: u64, completion_tokens: u64) -> f64 {
        let Some(rates) = self.pricing.get(provider_id) else {
            return 0.0;
        };
        prompt_tokens as f64 * rates.prompt / 1000.0
            + completion_tokens as f64 * rates.completion / 1000.0
    }

    fn add_to_day(&self, cost: f64) -> f64 {
        let today = chrono::Local::now().date_naive();
        let mut guard = self.day_total.lock().unwrap();
        if guard.0 != today {
            *guard = (today, 0.0);
        }
        guard.1 += cost;
        guard.1
    }
}

#[async_trait]
impl Middleware for FinOpsRecorder {
    fn name(&self) -> &str {
        "finops-recorder"
    }

    async fn process_response(
        &self,
        _req: &ChatRequest,
        resp: &mut ChatResponse,
        meta: &mut RequestMeta,
    ) -> Result<(), String> {
        let cost = self.cost_for(
            &meta.provider_id,
            resp.usage.prompt_tokens,
            resp.usage.completion_tokens,
        );
        meta.cost_usd = cost;
        let daily_total = self.add_to_day(cost);
        debug!(provider = %meta.provider_id, cost_usd = cost, daily_total_usd = daily_total, "cost attributed");

        if self.daily_budget_usd > 0.0 && cost > BUDGET_WARN_SHARE * self.daily_budget_usd {
            self.sink.emit(RuntimeEvent::BudgetWarning {
                provider: meta.provider_id.clone(),
                cost_usd: cost,
                daily_total_usd: daily_total,
                budget_usd: self.daily_budget_usd,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::events::testing::RecordingSink;
    use drover_core::types::MessageType;
    use drover_provider::Usage;

    fn config(prompt: f64, completion: f64, budget: f64) -> FinopsConfig {
        let mut pricing = BTreeMap::new();
        pricing.insert("claude".to_string(), Pricing { prompt, completion });
        FinopsConfig {
            enabled: true,
            daily_budget_usd: budget,
            pricing,
        }
    }

    fn meta(provider: &str) -> RequestMeta {
        RequestMeta::new(provider, "m", "u1", "cli", MessageType::External)
    }

    fn response(prompt_tokens: u64, completion_tokens: u64) -> ChatResponse {
        ChatResponse {
            content: "ok".into(),
            tool_calls: Vec::new(),
            finish_reason: "stop".into(),
            usage: Usage::from_counts(prompt_tokens, completion_tokens, None),
        }
    }

    #[tokio::test]
    async fn computes_cost_from_per_1k_rates() {
        let sink = Arc::new(RecordingSink::default());
        let recorder = FinOpsRecorder::new(&config(0.003, 0.015, 0.0), sink);
        let mut m = meta("claude");
        let mut resp = response(2000, 500);
        recorder
            .process_response(&ChatRequest::new("m", vec![]), &mut resp, &mut m)
            .await
            .unwrap();
        assert!((m.cost_usd - 0.0135).abs() < 1e-12);
    }

    #[tokio::test]
    async fn unconfigured_provider_costs_zero() {
        let sink = Arc::new(RecordingSink::default());
        let recorder = FinOpsRecorder::new(&config(0.003, 0.015, 0.0), sink);
        let mut m = meta("groq");
        let mut resp = response(100_000, 100_000);
        recorder
            .process_response(&ChatRequest::new("m", vec![]), &mut resp, &mut m)
            .await
            .unwrap();
        assert_eq!(m.cost_usd, 0.0);
    }

    #[tokio::test]
    async fn big_single_request_fires_budget_warning() {
        let sink = Arc::new(RecordingSink::default());
        // budget 0.10 USD; a 0.0135 USD request exceeds the 10% share
        let recorder = FinOpsRecorder::new(&config(0.003, 0.015, 0.10), sink.clone());
        let mut m = meta("claude");
        let mut resp = response(2000, 500);
        recorder
            .process_response(&ChatRequest::new("m", vec![]), &mut resp, &mut m)
            .await
            .unwrap();
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RuntimeEvent::BudgetWarning { provider, cost_usd, budget_usd, .. } => {
                assert_eq!(provider, "claude");
                assert!((cost_usd - 0.0135).abs() < 1e-12);
                assert_eq!(*budget_usd, 0.10);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn small_request_stays_quiet() {
        let sink = Arc::new(RecordingSink::default());
        let recorder = FinOpsRecorder::new(&config(0.003, 0.015, 10.0), sink.clone());
        let mut m = meta("claude");
        let mut resp = response(2000, 500);
        recorder
            .process_response(&ChatRequest::new("m", vec![]), &mut resp, &mut m)
            .await
            .unwrap();
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn daily_total_accumulates_across_requests() {
        let sink = Arc::new(RecordingSink::default());
        let recorder = FinOpsRecorder::new(&config(0.003, 0.015, 0.10), sink.clone());
        for _ in 0..2 {
            let mut m = meta("claude");
            let mut resp = response(2000, 500);
            recorder
                .process_response(&ChatRequest::new("m", vec![]), &mut resp, &mut m)
                .await
                .unwrap();
        }
        let events = sink.events.lock().unwrap();
        match events.last().unwrap() {
            RuntimeEvent::BudgetWarning { daily_total_usd, .. } => {
                assert!((daily_total_usd - 0.027).abs() < 1e-12);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
