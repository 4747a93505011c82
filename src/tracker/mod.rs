//! Active Token Tracker: owns the per-token lifecycle state machine
//! (ACTIVE -> EMITTED | COOLING -> DROPPED), generalizing the teacher's
//! `strategy::engine` per-token `HashMap<String, DeltaTracker>` /
//! `get_or_create_*` registry into a `DashMap` of per-token `mpsc` senders,
//! one spawned worker task per token draining its own channel in arrival
//! order so that ordering is serialised per token while different tokens
//! make progress concurrently (§5).

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::cache::EvidenceCache;
use crate::config::Config;
use crate::domain::{
    Decision, EvidenceView, KolTier, ScoreResult, SignalRecord, SocialEvidence, TokenId,
    TokenState, TokenStatus, TriggerSource, TxKind,
};
use crate::engine::{mid_total, ConvictionEngine};
use crate::error::Result;
use crate::fetcher::TokenFetcher;
use crate::ingress::{ChatMentionEvent, GraduationEvent, KolBuyEvent, PollTick};
use crate::persistence::{KolWalletStore, SignalStore};
use crate::publisher::NotificationPublisher;

/// One inbound occurrence routed to a token's worker.
#[derive(Debug, Clone)]
pub enum TrackerCommand {
    KolBuy(KolBuyEvent),
    ChatMention(ChatMentionEvent),
    Graduation(GraduationEvent),
    Poll,
}

/// Shared collaborators every per-token worker needs; cheap to clone since
/// everything inside is already behind an `Arc`.
#[derive(Clone)]
struct Collaborators {
    config: Arc<Config>,
    cache: Arc<EvidenceCache>,
    fetcher: Arc<TokenFetcher>,
    engine: Arc<ConvictionEngine>,
    kol_store: Arc<dyn KolWalletStore>,
    signal_store: Arc<dyn SignalStore>,
    publisher: Arc<dyn NotificationPublisher>,
}

pub struct Tracker {
    collaborators: Collaborators,
    senders: DashMap<TokenId, mpsc::Sender<TrackerCommand>>,
    statuses: DashMap<TokenId, TokenStatus>,
}

impl Tracker {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<EvidenceCache>,
        fetcher: Arc<TokenFetcher>,
        engine: Arc<ConvictionEngine>,
        kol_store: Arc<dyn KolWalletStore>,
        signal_store: Arc<dyn SignalStore>,
        publisher: Arc<dyn NotificationPublisher>,
    ) -> Self {
        Self {
            collaborators: Collaborators {
                config,
                cache,
                fetcher,
                engine,
                kol_store,
                signal_store,
                publisher,
            },
            senders: DashMap::new(),
            statuses: DashMap::new(),
        }
    }

    pub fn status_of(&self, token: &TokenId) -> Option<TokenStatus> {
        self.statuses.get(token).map(|s| *s)
    }

    pub fn statuses_snapshot(&self) -> Vec<TokenStatus> {
        self.statuses.iter().map(|e| *e.value()).collect()
    }

    fn is_ignored(&self, token: &TokenId) -> bool {
        self.collaborators
            .config
            .engine
            .ignore_list
            .iter()
            .any(|m| m == token.as_str())
    }

    /// Route a KOL buy. Starts a worker for an unseen token (refused if
    /// ignored); an existing worker simply receives the event.
    pub fn on_kol_buy(self: &Arc<Self>, event: KolBuyEvent) {
        if event.kind != TxKind::Buy {
            return;
        }
        self.route(event.token.clone(), TriggerSource::KolBuy, TrackerCommand::KolBuy(event));
    }

    pub fn on_chat_mention(self: &Arc<Self>, event: ChatMentionEvent) {
        self.route(event.token.clone(), TriggerSource::ChatCall, TrackerCommand::ChatMention(event));
    }

    pub fn on_graduation(self: &Arc<Self>, event: GraduationEvent) {
        self.route(event.token.clone(), TriggerSource::Graduation, TrackerCommand::Graduation(event));
    }

    /// Scheduled poll ticks only reach a token that already has a live
    /// worker; they never start tracking a new token on their own.
    pub fn on_poll_tick(&self, tick: PollTick) {
        if let Some(sender) = self.senders.get(&tick.token) {
            let _ = sender.try_send(TrackerCommand::Poll);
        }
    }

    fn route(self: &Arc<Self>, token: TokenId, trigger: TriggerSource, command: TrackerCommand) {
        if self.is_ignored(&token) {
            debug!(%token, "refusing to track ignored token");
            return;
        }

        if let Some(sender) = self.senders.get(&token) {
            if sender.try_send(command).is_ok() {
                return;
            }
            warn!(%token, "per-token queue full, dropping event");
            return;
        }

        self.spawn_worker(token, trigger, command);
    }

    fn spawn_worker(self: &Arc<Self>, token: TokenId, trigger: TriggerSource, first: TrackerCommand) {
        let capacity = self.collaborators.config.tracker.per_token_queue_capacity;
        let (tx, rx) = mpsc::channel(capacity);
        self.senders.insert(token.clone(), tx.clone());
        self.statuses.insert(token.clone(), TokenStatus::Active);

        if tx.try_send(first).is_err() {
            warn!(%token, "failed to enqueue the triggering event on a fresh worker");
        }

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            run_worker(tracker, token, trigger, rx).await;
        });
    }
}

async fn run_worker(
    tracker: Arc<Tracker>,
    token: TokenId,
    trigger: TriggerSource,
    mut rx: mpsc::Receiver<TrackerCommand>,
) {
    let collaborators = tracker.collaborators.clone();
    let mut state = TokenState::new(token.clone(), trigger);
    let mut backoff_ms = collaborators.config.tracker.backoff_base_ms;

    loop {
        let poll_interval = StdDuration::from_secs(collaborators.config.tracker.poll_interval_secs);
        let poll_armed = match state.status {
            TokenStatus::Active => state
                .last_breakdown
                .as_ref()
                .map(|b| mid_total(b) >= collaborators.config.tracker.poll_mid_total_floor)
                .unwrap_or(true),
            // Cooling and Emitted need their own internal timer to notice cooldown
            // expiry; nothing else drives a Poll command their way.
            TokenStatus::Cooling | TokenStatus::Emitted => true,
            TokenStatus::Dropped => false,
        };

        let command = if poll_armed {
            match timeout(poll_interval, rx.recv()).await {
                Ok(Some(cmd)) => cmd,
                Ok(None) => break,
                Err(_elapsed) => TrackerCommand::Poll,
            }
        } else {
            match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            }
        };

        match command {
            TrackerCommand::KolBuy(ev) => {
                collaborators.cache.record_kol(&token, &ev.wallet, ev.ts, ev.kind);
                if !state.kol_wallets_seen.contains(&ev.wallet) {
                    state.kol_wallets_seen.push(ev.wallet.clone());
                }
                collaborators.cache.record_buyer(&token, &ev.buyer_addr);
                state.touch();
                if state.status == TokenStatus::Active {
                    rescore(&collaborators, &token, &mut state).await;
                }
            }
            TrackerCommand::ChatMention(ev) => {
                collaborators.cache.record_mention(&token, &ev.group, ev.ts, &ev.text);
                if !state.chat_groups_seen.contains(&ev.group) {
                    state.chat_groups_seen.push(ev.group.clone());
                }
                state.mention_count += 1;
                state.touch();
                if state.status == TokenStatus::Active {
                    rescore(&collaborators, &token, &mut state).await;
                }
            }
            TrackerCommand::Graduation(_ev) => {
                state.graduated = true;
                state.touch();
                if state.status == TokenStatus::Active {
                    rescore(&collaborators, &token, &mut state).await;
                }
            }
            TrackerCommand::Poll => match state.status {
                TokenStatus::Active => {
                    let fetch_ok = rescore(&collaborators, &token, &mut state).await;
                    backoff_ms = if fetch_ok {
                        collaborators.config.tracker.backoff_base_ms
                    } else {
                        schedule_backoff(backoff_ms, &collaborators)
                    };
                }
                TokenStatus::Cooling => {
                    let cooldown = chrono::Duration::seconds(collaborators.config.tracker.cooling_window_secs);
                    if let Some(since) = state.cooling_since {
                        if Utc::now() - since >= cooldown {
                            state.status = TokenStatus::Dropped;
                            tracker.statuses.insert(token.clone(), TokenStatus::Dropped);
                            info!(%token, "cooldown expired, dropping token");
                        }
                    }
                }
                TokenStatus::Emitted => {
                    let cooldown = chrono::Duration::hours(collaborators.config.tracker.emit_cooldown_hours);
                    if let Some(emitted_at) = state.emitted_at {
                        if Utc::now() - emitted_at >= cooldown {
                            state.status = TokenStatus::Dropped;
                            tracker.statuses.insert(token.clone(), TokenStatus::Dropped);
                            info!(%token, "emit cooldown elapsed, dropping token");
                        }
                    }
                }
                TokenStatus::Dropped => {}
            },
        }

        if state.status == TokenStatus::Dropped {
            break;
        }
        tracker.statuses.insert(token.clone(), state.status);
    }

    tracker.senders.remove(&token);
    tracker.statuses.remove(&token);
}

fn schedule_backoff(current_ms: u64, collaborators: &Collaborators) -> u64 {
    (current_ms * 3).min(collaborators.config.tracker.backoff_max_ms)
}

/// Fetch, assemble evidence, score and apply the resulting decision.
/// Returns `false` if the snapshot fetch itself failed (used to drive the
/// exponential re-poll backoff); a scorer error cannot happen by
/// construction, but is treated as HOLD and logged if it somehow did.
async fn rescore(collaborators: &Collaborators, token: &TokenId, state: &mut TokenState) -> bool {
    let fetcher = Arc::clone(&collaborators.fetcher);
    let token_for_fetch = token.clone();
    let fetch_result = collaborators
        .cache
        .get_or_fetch_snapshot(token, || async move { fetcher.fetch_snapshot(&token_for_fetch, true).await })
        .await;

    let snapshot = match fetch_result {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(%token, error = %e, "snapshot fetch failed, scheduling backoff retry");
            return false;
        }
    };

    let evidence = build_evidence_view(collaborators, token).await;
    let social = build_social_evidence(collaborators, token).await;

    let result: ScoreResult = collaborators.engine.score(&snapshot, &evidence, &social, state);
    state.last_snapshot = Some(snapshot);
    state.last_breakdown = Some(result.breakdown.clone());
    state.poll_cycles += 1;

    match result.decision {
        Decision::Drop => {
            debug!(%token, reasons = ?result.reasons, "conviction engine dropped token");
            state.status = TokenStatus::Dropped;
        }
        Decision::Hold => {
            let mid = mid_total(&result.breakdown);
            if mid < collaborators.config.tracker.poll_mid_total_floor {
                state.low_score_streak += 1;
            } else {
                state.low_score_streak = 0;
            }
            if state.low_score_streak >= collaborators.config.tracker.low_score_streak_limit {
                info!(%token, streak = state.low_score_streak, "low-score streak exceeded, cooling down");
                state.status = TokenStatus::Cooling;
                state.cooling_since = Some(Utc::now());
            }
        }
        Decision::Emit => {
            emit(collaborators, token, state, &result).await;
            state.status = TokenStatus::Emitted;
            state.emitted = true;
            state.emitted_at = Some(Utc::now());
        }
    }

    true
}

async fn build_evidence_view(collaborators: &Collaborators, token: &TokenId) -> EvidenceView {
    let within = StdDuration::from_secs(24 * 3600);
    let mut evidence = collaborators.cache.get_evidence(token, within);

    let wallets = collaborators.cache.distinct_kol_wallets(token);
    let mut tiers = Vec::with_capacity(wallets.len());
    for address in wallets {
        match collaborators.kol_store.get(&address).await {
            Ok(Some(wallet)) => tiers.push(wallet.tier),
            Ok(None) => tiers.push(KolTier::Standard),
            Err(e) => warn!(%token, error = %e, "kol wallet lookup failed, treating as standard"),
        }
    }
    evidence.kol_tiers = tiers;
    evidence
}

async fn build_social_evidence(collaborators: &Collaborators, token: &TokenId) -> SocialEvidence {
    let (mentions_last_5m, _, _) =
        collaborators.cache.mention_stats_within(token, StdDuration::from_secs(5 * 60));
    let (mentions_10m, distinct_groups_last_10m, latest_mention_ts) =
        collaborators.cache.mention_stats_within(token, StdDuration::from_secs(10 * 60));
    let (mentions_last_30m, distinct_groups_last_30m, _) =
        collaborators.cache.mention_stats_within(token, StdDuration::from_secs(30 * 60));

    SocialEvidence {
        mentions_last_5m,
        mentions_last_10m: mentions_10m,
        distinct_groups_last_10m,
        mentions_last_30m,
        distinct_groups_last_30m,
        latest_mention_ts,
    }
}

async fn emit(collaborators: &Collaborators, token: &TokenId, state: &TokenState, result: &ScoreResult) {
    let record = SignalRecord::new(token.clone(), token.as_str().to_string(), result, state.trigger_source);
    if let Err(e) = collaborators.signal_store.insert(&record).await {
        warn!(%token, error = %e, "failed to persist signal record");
    }
    if let Err(e) = collaborators.publisher.publish(&record).await {
        warn!(%token, error = %e, "failed to publish signal, marking emit_failed");
        if let Err(e) = collaborators.signal_store.mark_publish_failed(record.id).await {
            warn!(%token, error = %e, "failed to mark emit_failed");
        }
    }
    info!(%token, total = result.total, "conviction signal emitted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FetcherConfig};
    use crate::persistence::{InMemoryKolWalletStore, InMemorySignalStore};
    use crate::publisher::NoopPublisher;

    fn build_tracker() -> Arc<Tracker> {
        let config = Arc::new(Config::default());
        let cache = Arc::new(EvidenceCache::new(config.cache.clone()));
        let fetcher = Arc::new(TokenFetcher::new(FetcherConfig::default()));
        let engine = Arc::new(ConvictionEngine::new(config.engine.clone()));
        let kol_store: Arc<dyn KolWalletStore> = Arc::new(InMemoryKolWalletStore::default());
        let signal_store: Arc<dyn SignalStore> = Arc::new(InMemorySignalStore::default());
        let publisher: Arc<dyn NotificationPublisher> = Arc::new(NoopPublisher);
        Arc::new(Tracker::new(config, cache, fetcher, engine, kol_store, signal_store, publisher))
    }

    #[tokio::test]
    async fn kol_buy_starts_a_worker_and_tracks_status() {
        let tracker = build_tracker();
        let token = TokenId::new("11111111111111111111111111111aaa");
        tracker.on_kol_buy(KolBuyEvent {
            token: token.clone(),
            wallet: "wallet1".to_string(),
            ts: Utc::now(),
            buyer_addr: "buyer1".to_string(),
            kind: TxKind::Buy,
        });

        // give the spawned worker a chance to process the first command.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(tracker.status_of(&token).is_some());
    }

    #[tokio::test]
    async fn ignored_token_never_starts_a_worker() {
        let mut config = Config::default();
        config.engine.ignore_list = vec!["ignored-mint-aaaaaaaaaaaaaaaaaaaa".to_string()];
        let cache = Arc::new(EvidenceCache::new(config.cache.clone()));
        let fetcher = Arc::new(TokenFetcher::new(FetcherConfig::default()));
        let engine = Arc::new(ConvictionEngine::new(config.engine.clone()));
        let kol_store: Arc<dyn KolWalletStore> = Arc::new(InMemoryKolWalletStore::default());
        let signal_store: Arc<dyn SignalStore> = Arc::new(InMemorySignalStore::default());
        let publisher: Arc<dyn NotificationPublisher> = Arc::new(NoopPublisher);
        let tracker = Arc::new(Tracker::new(
            Arc::new(config),
            cache,
            fetcher,
            engine,
            kol_store,
            signal_store,
            publisher,
        ));

        let token = TokenId::new("ignored-mint-aaaaaaaaaaaaaaaaaaaa");
        tracker.on_kol_buy(KolBuyEvent {
            token: token.clone(),
            wallet: "wallet1".to_string(),
            ts: Utc::now(),
            buyer_addr: "buyer1".to_string(),
            kind: TxKind::Buy,
        });
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(tracker.status_of(&token).is_none());
    }

    #[tokio::test]
    async fn poll_tick_for_unknown_token_is_a_noop() {
        let tracker = build_tracker();
        let token = TokenId::new("unknown-token-not-yet-tracked-aaaa");
        tracker.on_poll_tick(PollTick { token: token.clone() });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        assert!(tracker.status_of(&token).is_none());
    }

    #[test]
    fn schedule_backoff_caps_at_configured_max() {
        let config = Collaborators {
            config: Arc::new(Config::default()),
            cache: Arc::new(EvidenceCache::new(crate::config::CacheConfig::default())),
            fetcher: Arc::new(TokenFetcher::new(FetcherConfig::default())),
            engine: Arc::new(ConvictionEngine::new(crate::config::EngineConfig::default())),
            kol_store: Arc::new(InMemoryKolWalletStore::default()),
            signal_store: Arc::new(InMemorySignalStore::default()),
            publisher: Arc::new(NoopPublisher),
        };
        let mut backoff = config.config.tracker.backoff_base_ms;
        for _ in 0..20 {
            backoff = schedule_backoff(backoff, &config);
        }
        assert_eq!(backoff, config.config.tracker.backoff_max_ms);
    }
}
