//! Fixed-window rate limiting across several tiers.
//!
//! # Responsibilities
//! - Count requests per (tier, key) in fixed windows
//! - Report the remaining quota and when the window resets
//! - Keep per-tier totals and a view of live counters for the admin API
//!
//! # Design Decisions
//! - Counters live behind the [`CounterStore`] seam; the default is in-process
//! - Every store call has a deadline and fails open: a slow store never
//!   blocks traffic
//! - Each key's window opens with the first request that sees it, so no
//!   window length ever admits more than the limit

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::config::RateLimitRule;
use crate::observability::metrics;
use crate::security::counter_store::{CounterStore, WindowCount};

/// Which quota a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitTier {
    Route,
    Global,
    Ip,
    User,
    Path,
}

impl LimitTier {
    pub const ALL: [LimitTier; 5] = [
        LimitTier::Route,
        LimitTier::Global,
        LimitTier::Ip,
        LimitTier::User,
        LimitTier::Path,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LimitTier::Route => "route",
            LimitTier::Global => "global",
            LimitTier::Ip => "ip",
            LimitTier::User => "user",
            LimitTier::Path => "path",
        }
    }
}

impl fmt::Display for LimitTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window rolls over.
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Serialize)]
pub struct TierStats {
    pub tier: LimitTier,
    pub allowed: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub tier: LimitTier,
    pub key: String,
    pub limit: u32,
    pub count: u64,
    pub remaining: u64,
    pub reset_in_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStats {
    pub tiers: Vec<TierStats>,
    pub counters: Vec<CounterSnapshot>,
}

#[derive(Debug, Default)]
struct TierTotals {
    allowed: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone)]
struct CounterMeta {
    tier: LimitTier,
    key: String,
    limit: u32,
}

/// Multi-tier fixed-window limiter.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    store_timeout: Duration,
    totals: [TierTotals; 5],
    meta: DashMap<String, CounterMeta>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
            totals: Default::default(),
            meta: DashMap::new(),
        }
    }

    /// Check and count one request for `key` against `rule`.
    pub async fn allow(&self, tier: LimitTier, key: &str, rule: &RateLimitRule) -> Decision {
        self.allow_at(tier, key, rule, Instant::now()).await
    }

    pub async fn allow_at(
        &self,
        tier: LimitTier,
        key: &str,
        rule: &RateLimitRule,
        now: Instant,
    ) -> Decision {
        let window = Duration::from_millis(rule.window_ms.max(1));
        let store_key = format!("{}:{}", tier, key);
        let counted =
            tokio::time::timeout(self.store_timeout, self.store.increment(&store_key, now, window))
                .await;

        let WindowCount { count, window_start } = match counted {
            Ok(Ok(counted)) => counted,
            Ok(Err(e)) => return self.fail_open(tier, key, rule, window, &e.to_string()),
            Err(_) => return self.fail_open(tier, key, rule, window, "store call timed out"),
        };
        let reset_after = (window_start + window).saturating_duration_since(now);

        if count == 1 || !self.meta.contains_key(&store_key) {
            self.meta.insert(
                store_key,
                CounterMeta {
                    tier,
                    key: key.to_string(),
                    limit: rule.requests,
                },
            );
        }

        let totals = &self.totals[tier.index()];
        let allowed = count <= u64::from(rule.requests);
        if allowed {
            totals.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            totals.rejected.fetch_add(1, Ordering::Relaxed);
            metrics::record_rate_limited(tier.as_str());
            tracing::debug!(tier = %tier, key = %key, limit = rule.requests, "Rate limit exceeded");
        }

        Decision {
            allowed,
            limit: rule.requests,
            remaining: u64::from(rule.requests).saturating_sub(count) as u32,
            reset_after,
        }
    }

    fn fail_open(
        &self,
        tier: LimitTier,
        key: &str,
        rule: &RateLimitRule,
        reset_after: Duration,
        reason: &str,
    ) -> Decision {
        tracing::warn!(
            tier = %tier,
            key = %key,
            reason = %reason,
            "Rate limit store failed, admitting request"
        );
        metrics::record_rate_limit_store_error();
        self.totals[tier.index()].allowed.fetch_add(1, Ordering::Relaxed);
        Decision {
            allowed: true,
            limit: rule.requests,
            remaining: rule.requests,
            reset_after,
        }
    }

    /// Per-tier totals and every live counter.
    pub async fn stats(&self) -> RateLimitStats {
        let now = Instant::now();
        let tiers = LimitTier::ALL
            .iter()
            .map(|tier| {
                let totals = &self.totals[tier.index()];
                TierStats {
                    tier: *tier,
                    allowed: totals.allowed.load(Ordering::Relaxed),
                    rejected: totals.rejected.load(Ordering::Relaxed),
                }
            })
            .collect();

        let entries =
            match tokio::time::timeout(self.store_timeout, self.store.counters(now)).await {
                Ok(Ok(entries)) => entries,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Could not read rate limit counters");
                    Vec::new()
                }
                Err(_) => {
                    tracing::warn!("Timed out reading rate limit counters");
                    Vec::new()
                }
            };

        let mut counters: Vec<CounterSnapshot> = entries
            .into_iter()
            .filter_map(|entry| {
                let meta = self.meta.get(&entry.key)?;
                Some(CounterSnapshot {
                    tier: meta.tier,
                    key: meta.key.clone(),
                    limit: meta.limit,
                    count: entry.count,
                    remaining: u64::from(meta.limit).saturating_sub(entry.count),
                    reset_in_ms: entry.expires_at.saturating_duration_since(now).as_millis() as u64,
                })
            })
            .collect();
        counters.sort_by(|a, b| (a.tier.index(), &a.key).cmp(&(b.tier.index(), &b.key)));

        RateLimitStats { tiers, counters }
    }

    /// Evict counters whose window has ended. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now()).await
    }

    pub async fn purge_expired_at(&self, now: Instant) -> usize {
        match tokio::time::timeout(self.store_timeout, self.store.purge_expired(now)).await {
            Ok(Ok(removed)) => {
                for key in &removed {
                    self.meta.remove(key);
                }
                removed.len()
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Rate limit sweep failed");
                0
            }
            Err(_) => {
                tracing::warn!("Rate limit sweep timed out");
                0
            }
        }
    }
}
