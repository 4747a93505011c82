//! Multi-Source Evidence Cache: KOL activity, chat mentions with group
//! correlation, unique buyers, and scored snapshots, all keyed by token and
//! bounded by TTL.
//!
//! Every store is a `DashMap` sharded by token (or group), so pruning one
//! shard never blocks inserts into another, and `get_evidence` only ever
//! walks the entries for a single token.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::domain::{ChatMention, EvidenceView, GroupCorrelationEdge, KolActivityRecord, Snapshot, TokenId, TxKind};
use crate::error::{Error, Result};

/// Atomic counters surfaced through the `/status` summary.
#[derive(Default)]
pub struct CacheStats {
    pub kol_inserts: AtomicU64,
    pub mention_inserts: AtomicU64,
    pub correlation_edges_created: AtomicU64,
    pub snapshot_hits: AtomicU64,
    pub snapshot_misses: AtomicU64,
    pub pruned: AtomicU64,
}

struct CachedSnapshot {
    snapshot: Snapshot,
    cached_at: DateTime<Utc>,
}

impl CachedSnapshot {
    fn is_fresh(&self, freshness: ChronoDuration) -> bool {
        Utc::now() - self.cached_at < freshness
    }
}

pub struct EvidenceCache {
    config: CacheConfig,
    kol_activity: DashMap<TokenId, Vec<KolActivityRecord>>,
    chat_mentions: DashMap<TokenId, Vec<ChatMention>>,
    correlation_edges: DashMap<(String, String, TokenId, chrono::NaiveDate), ()>,
    unique_buyers: DashMap<TokenId, HashSet<String>>,
    snapshots: DashMap<TokenId, CachedSnapshot>,
    pub stats: CacheStats,
}

impl EvidenceCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            kol_activity: DashMap::new(),
            chat_mentions: DashMap::new(),
            correlation_edges: DashMap::new(),
            unique_buyers: DashMap::new(),
            snapshots: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Record a KOL buy/sell. Deduplicates on (wallet, ts) within a short window.
    /// Returns `true` if a new record was appended.
    pub fn record_kol(&self, token: &TokenId, wallet: &str, ts: DateTime<Utc>, kind: TxKind) -> bool {
        let dedup_window = ChronoDuration::seconds(self.config.kol_dedup_window_secs);
        let mut entry = self.kol_activity.entry(token.clone()).or_default();

        let duplicate = entry
            .iter()
            .any(|r| r.wallet == wallet && (r.ts - ts).abs() < dedup_window);
        if duplicate {
            return false;
        }

        if entry.len() >= self.config.kol_store_max_per_token {
            entry.remove(0);
        }
        entry.push(KolActivityRecord {
            token: token.clone(),
            wallet: wallet.to_string(),
            ts,
            kind,
            bonding_curve_pct_at_entry: None,
            usd_notional: 0.0,
        });
        self.stats.kol_inserts.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Record a chat mention, deduplicating on (group, ts) within a short window.
    /// Returns the newly created correlation edges (empty if the mention was a duplicate).
    pub fn record_mention(
        &self,
        token: &TokenId,
        group: &str,
        ts: DateTime<Utc>,
        text: &str,
    ) -> Vec<GroupCorrelationEdge> {
        let dedup_window = ChronoDuration::seconds(self.config.mention_dedup_window_secs);
        let mut entry = self.chat_mentions.entry(token.clone()).or_default();

        let duplicate = entry
            .iter()
            .any(|m| m.group == group && (m.ts - ts).abs() < dedup_window);
        if duplicate {
            return Vec::new();
        }

        entry.push(ChatMention {
            token: token.clone(),
            group: group.to_string(),
            ts,
            text: text.to_string(),
        });
        self.stats.mention_inserts.fetch_add(1, Ordering::Relaxed);

        // Correlation: any other distinct group that mentioned this token within
        // the configured window produces a deduplicated edge for today.
        let correlation_window = ChronoDuration::minutes(self.config.correlation_window_mins);
        let mut created = Vec::new();
        for prior in entry.iter() {
            if prior.group == group {
                continue;
            }
            if (ts - prior.ts).abs() > correlation_window {
                continue;
            }
            let edge = GroupCorrelationEdge::new(
                group,
                &prior.group,
                token.clone(),
                (ts - prior.ts).num_seconds(),
                ts.date_naive(),
            );
            if self.correlation_edges.insert(edge.dedup_key(), ()).is_none() {
                self.stats.correlation_edges_created.fetch_add(1, Ordering::Relaxed);
                created.push(edge);
            }
        }
        created
    }

    /// Record a unique on-chain buyer address. Returns the new set size.
    pub fn record_buyer(&self, token: &TokenId, address: &str) -> usize {
        let mut set = self.unique_buyers.entry(token.clone()).or_default();
        if set.len() < self.config.unique_buyer_cap {
            set.insert(address.to_string());
        }
        set.len()
    }

    /// Aggregated read over the trailing window, bounded to the entries for this token.
    pub fn get_evidence(&self, token: &TokenId, within: std::time::Duration) -> EvidenceView {
        let within = ChronoDuration::from_std(within).unwrap_or(ChronoDuration::hours(24));
        let cutoff = Utc::now() - within;

        let (kol_count, distinct_kols, earliest_kol_ts) = match self.kol_activity.get(token) {
            Some(records) => {
                let in_window: Vec<_> = records.iter().filter(|r| r.ts >= cutoff).collect();
                let distinct: HashSet<&str> = in_window.iter().map(|r| r.wallet.as_str()).collect();
                let earliest = in_window.iter().map(|r| r.ts).min();
                (in_window.len(), distinct.len(), earliest)
            }
            None => (0, 0, None),
        };

        let (mention_count, distinct_groups, earliest_mention_ts) = match self.chat_mentions.get(token) {
            Some(mentions) => {
                let in_window: Vec<_> = mentions.iter().filter(|m| m.ts >= cutoff).collect();
                let distinct: HashSet<&str> = in_window.iter().map(|m| m.group.as_str()).collect();
                let earliest = in_window.iter().map(|m| m.ts).min();
                (in_window.len(), distinct.len(), earliest)
            }
            None => (0, 0, None),
        };

        let unique_buyers = self.unique_buyers.get(token).map(|s| s.len()).unwrap_or(0);

        EvidenceView {
            kol_count,
            distinct_kols,
            mention_count,
            distinct_groups,
            unique_buyers,
            earliest_kol_ts,
            earliest_mention_ts,
            // Left empty here: the cache has no tier knowledge. The tracker fills
            // this in from `distinct_kol_wallets` joined against the KOL registry.
            kol_tiers: Vec::new(),
        }
    }

    /// Mention count, distinct-group count and latest timestamp within `within`,
    /// used by the tracker to build Phase 10's multi-window `SocialEvidence`.
    pub fn mention_stats_within(
        &self,
        token: &TokenId,
        within: std::time::Duration,
    ) -> (usize, usize, Option<DateTime<Utc>>) {
        let within = ChronoDuration::from_std(within).unwrap_or(ChronoDuration::hours(24));
        let cutoff = Utc::now() - within;
        match self.chat_mentions.get(token) {
            Some(mentions) => {
                let in_window: Vec<_> = mentions.iter().filter(|m| m.ts >= cutoff).collect();
                let distinct: HashSet<&str> = in_window.iter().map(|m| m.group.as_str()).collect();
                let latest = in_window.iter().map(|m| m.ts).max();
                (in_window.len(), distinct.len(), latest)
            }
            None => (0, 0, None),
        }
    }

    /// Distinct KOL wallet addresses observed for this token (earliest BUY per wallet).
    pub fn distinct_kol_wallets(&self, token: &TokenId) -> Vec<String> {
        match self.kol_activity.get(token) {
            Some(records) => {
                let mut seen = HashSet::new();
                records
                    .iter()
                    .filter(|r| matches!(r.kind, TxKind::Buy))
                    .filter(|r| seen.insert(r.wallet.clone()))
                    .map(|r| r.wallet.clone())
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// Return the cached snapshot if younger than `freshness`, otherwise fetch
    /// a new one via `fetch` and cache it.
    pub async fn get_or_fetch_snapshot<F, Fut>(&self, token: &TokenId, fetch: F) -> Result<Snapshot>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Snapshot>>,
    {
        let freshness = ChronoDuration::seconds(self.config.snapshot_freshness_secs);
        if let Some(cached) = self.snapshots.get(token) {
            if cached.is_fresh(freshness) {
                self.stats.snapshot_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.snapshot.clone());
            }
        }
        self.stats.snapshot_misses.fetch_add(1, Ordering::Relaxed);
        let snapshot = fetch().await?;
        self.snapshots.insert(
            token.clone(),
            CachedSnapshot {
                snapshot: snapshot.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(snapshot)
    }

    /// Background sweep removing entries past each store's TTL. Each token's
    /// shard is pruned independently so inserts into other tokens never wait.
    pub fn prune(&self) {
        let now = Utc::now();
        let kol_ttl = ChronoDuration::days(self.config.kol_ttl_days);
        let mention_ttl = ChronoDuration::hours(self.config.mention_ttl_hours);
        let snapshot_ttl = ChronoDuration::seconds(self.config.snapshot_ttl_secs);

        let mut pruned = 0u64;
        self.kol_activity.retain(|_, records| {
            let before = records.len();
            records.retain(|r| now - r.ts < kol_ttl);
            pruned += (before - records.len()) as u64;
            !records.is_empty()
        });
        self.chat_mentions.retain(|_, mentions| {
            let before = mentions.len();
            mentions.retain(|m| now - m.ts < mention_ttl);
            pruned += (before - mentions.len()) as u64;
            !mentions.is_empty()
        });
        self.snapshots.retain(|_, cached| now - cached.cached_at < snapshot_ttl);

        if pruned > 0 {
            debug!(pruned, "evidence cache prune pass removed stale entries");
        }
        self.stats.pruned.fetch_add(pruned, Ordering::Relaxed);
    }

    pub fn kol_store_len(&self, token: &TokenId) -> usize {
        self.kol_activity.get(token).map(|v| v.len()).unwrap_or(0)
    }

    pub fn mention_store_len(&self, token: &TokenId) -> usize {
        self.chat_mentions.get(token).map(|v| v.len()).unwrap_or(0)
    }

    pub fn total_tokens_tracked(&self) -> usize {
        self.kol_activity
            .iter()
            .map(|e| e.key().clone())
            .chain(self.chat_mentions.iter().map(|e| e.key().clone()))
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Persistence write for mentions is best-effort: failures are logged, never
/// allowed to block the in-memory path (§4.B failure semantics).
#[async_trait::async_trait]
pub trait MentionSink: Send + Sync {
    async fn persist(&self, mention: &ChatMention) -> Result<()>;
}

pub struct NoopMentionSink;

#[async_trait::async_trait]
impl MentionSink for NoopMentionSink {
    async fn persist(&self, _mention: &ChatMention) -> Result<()> {
        Ok(())
    }
}

pub async fn persist_best_effort(sink: &dyn MentionSink, mention: &ChatMention) {
    if let Err(e) = sink.persist(mention).await {
        warn!(token = %mention.token, error = %e, "mention persistence failed, continuing in-memory");
    }
}

/// Surface a persistence error without letting it propagate as a hard failure.
pub fn swallow_persistence_error(e: Error) {
    warn!(error = %e, "swallowed persistence error");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TxKind;

    fn cache() -> EvidenceCache {
        EvidenceCache::new(CacheConfig::default())
    }

    #[test]
    fn kol_dedup_within_window() {
        let c = cache();
        let token = TokenId::new("mint1");
        let ts = Utc::now();
        assert!(c.record_kol(&token, "wallet1", ts, TxKind::Buy));
        assert!(!c.record_kol(&token, "wallet1", ts + ChronoDuration::seconds(1), TxKind::Buy));
        assert_eq!(c.kol_store_len(&token), 1);
    }

    #[test]
    fn kol_store_enforces_cap() {
        let mut config = CacheConfig::default();
        config.kol_store_max_per_token = 2;
        let c = EvidenceCache::new(config);
        let token = TokenId::new("mint1");
        let base = Utc::now();
        for i in 0..5 {
            c.record_kol(&token, &format!("wallet{i}"), base + ChronoDuration::seconds(i * 10), TxKind::Buy);
        }
        assert_eq!(c.kol_store_len(&token), 2);
    }

    #[test]
    fn mention_creates_correlation_edge_for_distinct_groups() {
        let c = cache();
        let token = TokenId::new("mint1");
        let ts = Utc::now();
        let edges_a = c.record_mention(&token, "groupA", ts, "look at this");
        assert!(edges_a.is_empty());
        let edges_b = c.record_mention(&token, "groupB", ts + ChronoDuration::minutes(5), "same token");
        assert_eq!(edges_b.len(), 1);
        assert_eq!(edges_b[0].group_a, "groupA");
        assert_eq!(edges_b[0].group_b, "groupB");

        // A third mention from groupA again must not re-create the groupA/groupB edge.
        let edges_c = c.record_mention(&token, "groupA", ts + ChronoDuration::minutes(10), "again");
        assert!(edges_c.is_empty() || edges_c.iter().all(|e| e.group_b != "groupB"));
    }

    #[test]
    fn evidence_view_counts_within_window_only() {
        let c = cache();
        let token = TokenId::new("mint1");
        let old = Utc::now() - ChronoDuration::hours(2);
        c.record_kol(&token, "wallet1", old, TxKind::Buy);
        let view = c.get_evidence(&token, std::time::Duration::from_secs(60));
        assert_eq!(view.kol_count, 0);
        let view_wide = c.get_evidence(&token, std::time::Duration::from_secs(3 * 3600));
        assert_eq!(view_wide.kol_count, 1);
    }

    #[test]
    fn buyer_set_caps_at_configured_size() {
        let mut config = CacheConfig::default();
        config.unique_buyer_cap = 2;
        let c = EvidenceCache::new(config);
        let token = TokenId::new("mint1");
        assert_eq!(c.record_buyer(&token, "a"), 1);
        assert_eq!(c.record_buyer(&token, "b"), 2);
        assert_eq!(c.record_buyer(&token, "c"), 2);
    }

    #[tokio::test]
    async fn get_or_fetch_uses_cache_within_freshness() {
        let c = cache();
        let token = TokenId::new("mint1");
        let calls = std::sync::atomic::AtomicU64::new(0);
        let fetch_one = || async {
            calls.fetch_add(1, Ordering::Relaxed);
            Ok(Snapshot::stale_placeholder(TokenId::new("mint1")))
        };
        c.get_or_fetch_snapshot(&token, fetch_one).await.unwrap();
        let fetch_two = || async {
            calls.fetch_add(1, Ordering::Relaxed);
            Ok(Snapshot::stale_placeholder(TokenId::new("mint1")))
        };
        c.get_or_fetch_snapshot(&token, fetch_two).await.unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn prune_removes_expired_without_touching_other_tokens() {
        let mut config = CacheConfig::default();
        config.kol_ttl_days = 0;
        let c = EvidenceCache::new(config);
        let stale_token = TokenId::new("stale");
        let fresh_token = TokenId::new("fresh");
        c.record_kol(&stale_token, "w", Utc::now() - ChronoDuration::days(1), TxKind::Buy);
        c.record_kol(&fresh_token, "w", Utc::now(), TxKind::Buy);
        c.prune();
        assert_eq!(c.kol_store_len(&stale_token), 0);
    }
}
