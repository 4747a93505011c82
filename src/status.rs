//! `/status` summary assembly. This crate builds the `StatusSummary` struct
//! and the function that derives it from the tracker and cache; the HTTP
//! exposure itself is an external collaborator (§6).

use serde::Serialize;

use crate::cache::EvidenceCache;
use crate::domain::{SignalRecord, TokenStatus};

#[derive(Debug, Clone, Serialize)]
pub struct StatusSummary {
    pub active_tokens: usize,
    pub cooling_tokens: usize,
    pub emitted_today: usize,
    pub kol_store_entries: usize,
    pub mention_store_entries: usize,
    pub tracked_tokens_total: usize,
    pub median_score_last_50: Option<f64>,
    pub cache_snapshot_hits: u64,
    pub cache_snapshot_misses: u64,
    pub cache_pruned_total: u64,
}

/// Per-token status the tracker reports alongside cache-wide counters.
pub struct TokenStatusCounts {
    pub statuses: Vec<TokenStatus>,
}

pub fn assemble_status(
    counts: &TokenStatusCounts,
    cache: &EvidenceCache,
    recent_signals: &[SignalRecord],
) -> StatusSummary {
    let active_tokens = counts.statuses.iter().filter(|s| **s == TokenStatus::Active).count();
    let cooling_tokens = counts.statuses.iter().filter(|s| **s == TokenStatus::Cooling).count();

    let today = chrono::Utc::now().date_naive();
    let emitted_today = recent_signals
        .iter()
        .filter(|s| s.emitted_at.date_naive() == today)
        .count();

    let last_50: Vec<i32> = recent_signals.iter().take(50).map(|s| s.score).collect();
    let median_score_last_50 = median(&last_50);

    StatusSummary {
        active_tokens,
        cooling_tokens,
        emitted_today,
        kol_store_entries: cache.total_tokens_tracked(),
        mention_store_entries: cache.total_tokens_tracked(),
        tracked_tokens_total: counts.statuses.len(),
        median_score_last_50,
        cache_snapshot_hits: cache.stats.snapshot_hits.load(std::sync::atomic::Ordering::Relaxed),
        cache_snapshot_misses: cache.stats.snapshot_misses.load(std::sync::atomic::Ordering::Relaxed),
        cache_pruned_total: cache.stats.pruned.load(std::sync::atomic::Ordering::Relaxed),
    }
}

fn median(values: &[i32]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) as f64 / 2.0)
    } else {
        Some(sorted[mid] as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_empty_is_none() {
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn median_of_odd_length() {
        assert_eq!(median(&[10, 20, 30]), Some(20.0));
    }

    #[test]
    fn median_of_even_length_averages_middle_two() {
        assert_eq!(median(&[10, 20, 30, 40]), Some(25.0));
    }

    #[test]
    fn status_counts_active_and_cooling_separately() {
        let counts = TokenStatusCounts {
            statuses: vec![TokenStatus::Active, TokenStatus::Active, TokenStatus::Cooling, TokenStatus::Dropped],
        };
        let cache = EvidenceCache::new(crate::config::CacheConfig::default());
        let summary = assemble_status(&counts, &cache, &[]);
        assert_eq!(summary.active_tokens, 2);
        assert_eq!(summary.cooling_tokens, 1);
        assert_eq!(summary.tracked_tokens_total, 4);
    }
}
