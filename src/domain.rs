//! Shared data types for the conviction-scoring core: tokens, KOL wallets,
//! snapshots, evidence records and the per-token lifecycle state.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque token identifier (a mint address in the reference chain).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TokenId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TokenId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// KOL wallet tier, highest conviction weight first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KolTier {
    Elite,
    TopKol,
    Standard,
    Unknown,
}

impl KolTier {
    /// Phase-1 per-KOL contribution for this tier.
    pub fn base_points(&self) -> i32 {
        match self {
            KolTier::Elite => 15,
            KolTier::TopKol => 10,
            KolTier::Standard => 5,
            KolTier::Unknown => 0,
        }
    }
}

/// Immutable KOL wallet record; tier and stats may be refreshed asynchronously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KolWallet {
    pub address: String,
    pub display_name: String,
    pub tier: KolTier,
    pub win_rate: f64,
    pub pnl_estimate: f64,
    pub refreshed_at: DateTime<Utc>,
}

impl KolWallet {
    pub fn new(address: impl Into<String>, tier: KolTier) -> Self {
        Self {
            address: address.into(),
            display_name: String::new(),
            tier,
            win_rate: 0.0,
            pnl_estimate: 0.0,
            refreshed_at: Utc::now(),
        }
    }
}

/// On-chain transaction kind recorded by an ingress adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Buy,
    Sell,
}

/// Rug-risk flags populated by the fetcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RugFlags {
    pub lp_removed: bool,
    pub honeypot: bool,
    pub dev_sold: bool,
}

impl RugFlags {
    pub fn is_fatal(&self) -> bool {
        self.lp_removed || self.honeypot
    }
}

/// Social-link presence flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialFlags {
    pub website: bool,
    pub twitter: bool,
    pub telegram: bool,
    pub discord: bool,
}

impl SocialFlags {
    pub fn none(&self) -> bool {
        !self.website && !self.twitter && !self.telegram && !self.discord
    }
}

/// Buy/sell counts and volume for a single trailing window.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WindowStats {
    pub volume_usd: f64,
    pub buys: u64,
    pub sells: u64,
}

/// Token Snapshot produced by the Token Metadata Fetcher, consumed by the Conviction Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub token: TokenId,
    pub price_usd: f64,
    pub market_cap_usd: f64,
    pub liquidity_usd: f64,
    pub liquidity_base: f64,
    pub liquidity_quote: f64,
    pub window_1h: WindowStats,
    pub window_6h: WindowStats,
    pub window_24h: WindowStats,
    pub unique_buyer_estimate: u64,
    /// Position on the issuing platform's bonding curve, 0-100. `None` once graduated.
    pub bonding_curve_pct: Option<f64>,
    pub price_change_1h_pct: f64,
    pub holder_count: Option<u64>,
    pub top1_concentration_pct: Option<f64>,
    pub top5_concentration_pct: Option<f64>,
    pub top10_concentration_pct: Option<f64>,
    pub socials: SocialFlags,
    pub boosted_promotion: bool,
    pub rug_flags: RugFlags,
    pub rug_score: f64,
    pub dev_sell_pct: f64,
    pub bundle_detected: bool,
    pub bundle_size: u32,
    /// Whether holder-distribution fields (`holder_count`, `topN_concentration_pct`) were fetched.
    pub include_holders: bool,
    /// 0-100, reflects how many fields were actually populated by providers.
    pub quality: u8,
    /// Set when every provider failed and this is a synthetic placeholder.
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
}

impl Snapshot {
    /// Synthetic placeholder returned when every provider failed.
    pub fn stale_placeholder(token: TokenId) -> Self {
        Self {
            token,
            price_usd: 0.0,
            market_cap_usd: 0.0,
            liquidity_usd: 0.0,
            liquidity_base: 0.0,
            liquidity_quote: 0.0,
            window_1h: WindowStats::default(),
            window_6h: WindowStats::default(),
            window_24h: WindowStats::default(),
            unique_buyer_estimate: 0,
            bonding_curve_pct: None,
            price_change_1h_pct: 0.0,
            holder_count: None,
            top1_concentration_pct: None,
            top5_concentration_pct: None,
            top10_concentration_pct: None,
            socials: SocialFlags::default(),
            boosted_promotion: false,
            rug_flags: RugFlags::default(),
            rug_score: 0.0,
            dev_sell_pct: 0.0,
            bundle_detected: false,
            bundle_size: 0,
            include_holders: false,
            quality: 0,
            stale: true,
            fetched_at: Utc::now(),
        }
    }

    pub fn volume_ratio_1h(&self) -> f64 {
        if self.liquidity_usd <= 0.0 {
            0.0
        } else {
            self.window_1h.volume_usd / self.liquidity_usd
        }
    }

    pub fn is_pre_graduation(&self) -> bool {
        self.bonding_curve_pct.is_some()
    }
}

/// A single observed KOL buy or sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KolActivityRecord {
    pub token: TokenId,
    pub wallet: String,
    pub ts: DateTime<Utc>,
    pub kind: TxKind,
    pub bonding_curve_pct_at_entry: Option<f64>,
    pub usd_notional: f64,
}

/// A single chat-group mention of a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMention {
    pub token: TokenId,
    pub group: String,
    pub ts: DateTime<Utc>,
    pub text: String,
}

/// An unordered pair of groups that mentioned the same token within the correlation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupCorrelationEdge {
    pub group_a: String,
    pub group_b: String,
    pub token: TokenId,
    pub time_diff_seconds: i64,
    pub date: NaiveDate,
}

impl GroupCorrelationEdge {
    /// Canonical (group_a, group_b) ordering so (A, B) and (B, A) dedup identically.
    pub fn new(group_x: &str, group_y: &str, token: TokenId, time_diff_seconds: i64, date: NaiveDate) -> Self {
        let (group_a, group_b) = if group_x <= group_y {
            (group_x.to_string(), group_y.to_string())
        } else {
            (group_y.to_string(), group_x.to_string())
        };
        Self {
            group_a,
            group_b,
            token,
            time_diff_seconds,
            date,
        }
    }

    pub fn dedup_key(&self) -> (String, String, TokenId, NaiveDate) {
        (self.group_a.clone(), self.group_b.clone(), self.token.clone(), self.date)
    }
}

/// Aggregated read of the Evidence Cache for a single token over a trailing window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceView {
    pub kol_count: usize,
    pub distinct_kols: usize,
    pub mention_count: usize,
    pub distinct_groups: usize,
    pub unique_buyers: usize,
    pub earliest_kol_ts: Option<DateTime<Utc>>,
    pub earliest_mention_ts: Option<DateTime<Utc>>,
    /// Tier of each distinct KOL observed buying (one entry per wallet, earliest
    /// BUY only). Populated by the Tracker joining cache activity against the
    /// KOL wallet registry; the cache itself holds no tier information.
    pub kol_tiers: Vec<KolTier>,
}

/// Windowed chat-mention evidence feeding Phase 10 (social convergence), which
/// needs several distinct trailing windows rather than the single `within`
/// window `EvidenceView` exposes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SocialEvidence {
    pub mentions_last_5m: usize,
    pub mentions_last_10m: usize,
    pub distinct_groups_last_10m: usize,
    pub mentions_last_30m: usize,
    pub distinct_groups_last_30m: usize,
    pub latest_mention_ts: Option<DateTime<Utc>>,
}

/// Lifecycle status of a tracked token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
    Active,
    Cooling,
    Emitted,
    Dropped,
}

/// What caused a token to start being tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    KolBuy,
    ChatCall,
    Graduation,
}

/// Per-token lifecycle state, owned exclusively by the Active Token Tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenState {
    pub token: TokenId,
    pub status: TokenStatus,
    pub trigger_source: TriggerSource,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub kol_wallets_seen: Vec<String>,
    pub chat_groups_seen: Vec<String>,
    pub mention_count: usize,
    pub unique_buyers_seen: usize,
    pub last_snapshot: Option<Snapshot>,
    pub last_breakdown: Option<BTreeMap<Phase, i32>>,
    pub poll_cycles: u32,
    pub low_score_streak: u32,
    pub emitted: bool,
    pub graduated: bool,
    pub cooling_since: Option<DateTime<Utc>>,
    pub emitted_at: Option<DateTime<Utc>>,
}

impl TokenState {
    pub fn new(token: TokenId, trigger_source: TriggerSource) -> Self {
        let now = Utc::now();
        Self {
            token,
            status: TokenStatus::Active,
            trigger_source,
            first_seen: now,
            last_activity: now,
            kol_wallets_seen: Vec::new(),
            chat_groups_seen: Vec::new(),
            mention_count: 0,
            unique_buyers_seen: 0,
            last_snapshot: None,
            last_breakdown: None,
            poll_cycles: 0,
            low_score_streak: 0,
            emitted: false,
            graduated: false,
            cooling_since: None,
            emitted_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    pub fn prior_top10_concentration(&self) -> Option<f64> {
        self.last_snapshot.as_ref().and_then(|s| s.top10_concentration_pct)
    }
}

/// The engine's phase identifiers, used as breakdown keys. Ordered to match §4.C's phase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    SmartWalletActivity,
    BaseSanity,
    BundleDistribution,
    UniqueBuyers,
    VolumeMomentumVelocity,
    SocialVerification,
    BuySellPressure,
    HolderDistribution,
    RugRiskPenalty,
    SocialConvergence,
}

/// Final decision the Conviction Engine returns for a single scoring pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Emit,
    Hold,
    Drop,
}

/// Output of a single Conviction Engine scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreResult {
    pub total: i32,
    pub breakdown: BTreeMap<Phase, i32>,
    pub decision: Decision,
    pub reasons: Vec<String>,
}

impl ScoreResult {
    pub fn drop_with_reason(reason: impl Into<String>, breakdown: BTreeMap<Phase, i32>) -> Self {
        let total = breakdown.values().sum();
        Self {
            total,
            breakdown,
            decision: Decision::Drop,
            reasons: vec![reason.into()],
        }
    }
}

/// Later-filled outcome fields for a persisted signal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalOutcome {
    pub peak_multiple: Option<f64>,
    pub final_category: Option<String>,
    pub rug_flag: bool,
}

/// A persisted trading signal: the engine's EMIT decision plus identifying context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: Uuid,
    pub token: TokenId,
    pub symbol: String,
    pub score: i32,
    pub breakdown: BTreeMap<Phase, i32>,
    pub trigger_source: TriggerSource,
    pub emitted_at: DateTime<Utc>,
    pub outcome: SignalOutcome,
    pub outcome_updated_at: Option<DateTime<Utc>>,
    pub emit_failed: bool,
}

impl SignalRecord {
    pub fn new(
        token: TokenId,
        symbol: String,
        score_result: &ScoreResult,
        trigger_source: TriggerSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            symbol,
            score: score_result.total,
            breakdown: score_result.breakdown.clone(),
            trigger_source,
            emitted_at: Utc::now(),
            outcome: SignalOutcome::default(),
            outcome_updated_at: None,
            emit_failed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_points_follow_spec_caps() {
        assert_eq!(KolTier::Elite.base_points(), 15);
        assert_eq!(KolTier::TopKol.base_points(), 10);
        assert_eq!(KolTier::Standard.base_points(), 5);
        assert_eq!(KolTier::Unknown.base_points(), 0);
    }

    #[test]
    fn correlation_edge_canonicalizes_group_order() {
        let token = TokenId::new("mint1");
        let date = Utc::now().date_naive();
        let e1 = GroupCorrelationEdge::new("groupB", "groupA", token.clone(), 10, date);
        let e2 = GroupCorrelationEdge::new("groupA", "groupB", token, -10, date);
        assert_eq!(e1.group_a, e2.group_a);
        assert_eq!(e1.group_b, e2.group_b);
        assert_eq!(e1.dedup_key(), e2.dedup_key());
    }

    #[test]
    fn stale_placeholder_has_zero_quality() {
        let s = Snapshot::stale_placeholder(TokenId::new("mint1"));
        assert_eq!(s.quality, 0);
        assert!(s.stale);
    }

    #[test]
    fn rug_flags_fatal_on_lp_removed_or_honeypot() {
        let mut flags = RugFlags::default();
        assert!(!flags.is_fatal());
        flags.lp_removed = true;
        assert!(flags.is_fatal());
    }
}
