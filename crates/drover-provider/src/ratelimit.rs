//! Rate-limit header parsing and the per-provider snapshot cache.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use reqwest::header::HeaderMap;
use serde::Serialize;
use tracing::warn;

use crate::provider::Usage;
use crate::registry::RateLimitProfile;

/// Latest known headroom for one provider. Overwritten wholesale on every
/// successful call; readers never see a torn value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitSnapshot {
    pub remaining_tokens: Option<u64>,
    pub remaining_requests: Option<u64>,
    pub limit_tokens: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    let raw = header_str(headers, name)?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(header = name, value = raw, "malformed rate-limit header, ignoring");
            None
        }
    }
}

/// Reset values come in two shapes: an integer (optionally `Ns`) meaning
/// seconds until reset, or an RFC3339 timestamp meaning an absolute instant.
fn parse_reset(headers: &HeaderMap, name: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let raw = header_str(headers, name)?.trim();
    let seconds = raw
        .parse::<i64>()
        .ok()
        .or_else(|| raw.strip_suffix('s').and_then(|n| n.parse::<i64>().ok()));
    if let Some(secs) = seconds {
        return Some(now + chrono::Duration::seconds(secs));
    }
    match DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => Some(ts.with_timezone(&Utc)),
        Err(_) => {
            warn!(header = name, value = raw, "malformed rate-limit reset header, ignoring");
            None
        }
    }
}

fn apply_openai_tokens(usage: &mut Usage, headers: &HeaderMap, now: DateTime<Utc>) {
    usage.remaining_tokens = parse_u64(headers, "x-ratelimit-remaining-tokens");
    usage.limit_tokens = parse_u64(headers, "x-ratelimit-limit-tokens");
    usage.reset_at = parse_reset(headers, "x-ratelimit-reset-tokens", now);
}

fn apply_openai_requests(usage: &mut Usage, headers: &HeaderMap, now: DateTime<Utc>) {
    usage.remaining_requests = parse_u64(headers, "x-ratelimit-remaining-requests");
    if usage.reset_at.is_none() {
        usage.reset_at = parse_reset(headers, "x-ratelimit-reset-requests", now);
    }
}

/// Extract rate-limit signals from response headers into the usage record.
/// Absent headers leave fields `None`; malformed values are logged and
/// treated as absent.
pub fn apply_headers(usage: &mut Usage, profile: RateLimitProfile, headers: &HeaderMap) {
    let now = Utc::now();
    match profile {
        RateLimitProfile::Anthropic => {
            usage.remaining_tokens = parse_u64(headers, "anthropic-ratelimit-tokens-remaining");
            usage.limit_tokens = parse_u64(headers, "anthropic-ratelimit-tokens-limit");
            usage.reset_at = parse_reset(headers, "anthropic-ratelimit-tokens-reset", now);
        }
        RateLimitProfile::OpenAiTokens => apply_openai_tokens(usage, headers, now),
        RateLimitProfile::OpenAiRequests => apply_openai_requests(usage, headers, now),
        RateLimitProfile::PassThrough => {
            // Self-hosted and proxy backends may forward either OpenAI
            // profile, or nothing at all.
            apply_openai_tokens(usage, headers, now);
            apply_openai_requests(usage, headers, now);
        }
        RateLimitProfile::None => {}
    }
}

/// A provider whose remaining headroom has dropped below the warning line.
#[derive(Debug, Clone, Serialize)]
pub struct HeadroomWarning {
    pub provider_id: String,
    pub remaining_tokens: u64,
    pub limit_tokens: u64,
}

/// Concurrent map of the latest snapshot per provider. Writers replace the
/// whole entry; within one provider the newest `observed_at` wins, so late
/// out-of-order updates from slow calls are dropped.
#[derive(Default)]
pub struct SnapshotCache {
    inner: DashMap<String, RateLimitSnapshot>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the rate-limit signals from one successful call.
    pub fn record(&self, provider_id: &str, usage: &Usage) {
        let snapshot = RateLimitSnapshot {
            remaining_tokens: usage.remaining_tokens,
            remaining_requests: usage.remaining_requests,
            limit_tokens: usage.limit_tokens,
            reset_at: usage.reset_at,
            observed_at: Utc::now(),
        };
        self.record_snapshot(provider_id, snapshot);
    }

    pub fn record_snapshot(&self, provider_id: &str, snapshot: RateLimitSnapshot) {
        match self.inner.entry(provider_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                if snapshot.observed_at > entry.get().observed_at {
                    entry.insert(snapshot);
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(snapshot);
            }
        }
    }

    pub fn get(&self, provider_id: &str) -> Option<RateLimitSnapshot> {
        self.inner.get(provider_id).map(|e| e.value().clone())
    }

    pub fn all(&self) -> Vec<(String, RateLimitSnapshot)> {
        self.inner
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }

    /// Providers whose remaining tokens are under 10% of their limit.
    pub fn headroom_warnings(&self) -> Vec<HeadroomWarning> {
        self.inner
            .iter()
            .filter_map(|entry| {
                let snap = entry.value();
                let remaining = snap.remaining_tokens?;
                let limit = snap.limit_tokens?;
                if limit > 0 && (remaining as f64) < 0.10 * (limit as f64) {
                    Some(HeadroomWarning {
                        provider_id: entry.key().clone(),
                        remaining_tokens: remaining,
                        limit_tokens: limit,
                    })
                } else {
                    None
                }
            })
            .collect()
    }
}
