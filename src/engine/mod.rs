//! Conviction Engine: a deterministic, side-effect-free multi-phase scoring
//! pipeline. `score()` takes fully materialised inputs (a `Snapshot`, an
//! `EvidenceView`, a windowed `SocialEvidence`, and the relevant slice of
//! `TokenState`) and returns a `ScoreResult`; no IO happens here, which is
//! what makes phase arithmetic trivially unit-testable against the fixtures
//! in `tests::scenarios` below.

use std::collections::BTreeMap;

use chrono::{Duration as ChronoDuration, Utc};

use crate::config::EngineConfig;
use crate::domain::{Decision, EvidenceView, Phase, ScoreResult, SocialEvidence, Snapshot, TokenState};

pub struct ConvictionEngine {
    config: EngineConfig,
}

impl ConvictionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Run the full phase pipeline. Pure function of its inputs.
    pub fn score(
        &self,
        snapshot: &Snapshot,
        evidence: &EvidenceView,
        social: &SocialEvidence,
        state: &TokenState,
    ) -> ScoreResult {
        let mut breakdown = BTreeMap::new();
        let mut reasons = Vec::new();

        // Phase 1 — Smart Wallet Activity (0..+40)
        let phase1 = self.phase1_smart_wallet_activity(evidence);
        breakdown.insert(Phase::SmartWalletActivity, phase1);

        // Phase 2 — Base snapshot sanity (hard gate)
        if let Some(reason) = self.phase2_gate(snapshot) {
            breakdown.insert(Phase::BaseSanity, 0);
            return ScoreResult::drop_with_reason(reason, breakdown);
        }
        breakdown.insert(Phase::BaseSanity, 0);

        // Phase 3 — Bundle & early distribution (-40..0)
        let phase3 = self.phase3_bundle(snapshot);
        breakdown.insert(Phase::BundleDistribution, phase3);

        // Phase 4 — Unique buyers (0..+15)
        let phase4 = self.phase4_unique_buyers(evidence);
        breakdown.insert(Phase::UniqueBuyers, phase4);

        // Phase 5 — Volume, momentum, velocity (0..+30)
        let phase5 = self.phase5_volume_momentum_velocity(snapshot, state);
        breakdown.insert(Phase::VolumeMomentumVelocity, phase5);

        let mid_total = phase1 + phase3 + phase4 + phase5;

        if mid_total < self.config.mid_gate {
            reasons.push(format!(
                "mid_total {} below mid_gate {}",
                mid_total, self.config.mid_gate
            ));
            return ScoreResult {
                total: breakdown.values().sum(),
                breakdown,
                decision: Decision::Hold,
                reasons,
            };
        }

        // §7: StaleSnapshot causes HOLD without scoring phases 6-10.
        if snapshot.stale {
            reasons.push("snapshot is stale, holding before social/holder phases".to_string());
            return ScoreResult {
                total: breakdown.values().sum(),
                breakdown,
                decision: Decision::Hold,
                reasons,
            };
        }

        // Phase 6 — Social verification (-25..+16)
        let phase6 = self.phase6_social_verification(snapshot);
        breakdown.insert(Phase::SocialVerification, phase6);

        // Phase 7 — Buy/sell pressure (0..+20)
        let phase7 = self.phase7_buy_sell_pressure(snapshot);
        breakdown.insert(Phase::BuySellPressure, phase7);

        // Phase 8 — Holder distribution (-40..+5)
        let phase8 = if self.config.holder_distribution_enabled {
            if snapshot.include_holders {
                self.phase8_holder_distribution(snapshot, state)
            } else {
                reasons.push("phase 8 skipped: holder data unavailable".to_string());
                0
            }
        } else {
            0
        };
        breakdown.insert(Phase::HolderDistribution, phase8);

        // Phase 9 — Rug-risk penalty (-40..0)
        let phase9 = self.phase9_rug_risk(snapshot);
        breakdown.insert(Phase::RugRiskPenalty, phase9);

        // Phase 10 — Social convergence (0..+25), gated on mid_total + phases 6-9
        let gate10 = mid_total + phase6 + phase7 + phase8 + phase9;
        let phase10 = if self.config.social_convergence_enabled && gate10 >= self.config.mid_gate {
            self.phase10_social_convergence(social)
        } else {
            if self.config.social_convergence_enabled {
                reasons.push(format!("phase 10 skipped: gate total {} below {}", gate10, self.config.mid_gate));
            }
            0
        };
        breakdown.insert(Phase::SocialConvergence, phase10);

        let total: i32 = breakdown.values().sum();
        let threshold = if state.graduated {
            self.config.threshold_post_grad
        } else {
            self.config.threshold_pre_grad
        };

        let decision = if total >= threshold && !state.emitted {
            Decision::Emit
        } else {
            Decision::Hold
        };

        ScoreResult {
            total,
            breakdown,
            decision,
            reasons,
        }
    }

    fn phase1_smart_wallet_activity(&self, evidence: &EvidenceView) -> i32 {
        let mut points: i32 = evidence.kol_tiers.iter().map(|t| t.base_points()).sum();
        let n = evidence.kol_tiers.len();
        if n >= 2 {
            points += 15;
            if n > 2 {
                points += 5 * (n as i32 - 2);
            }
        }
        points.min(40)
    }

    fn phase2_gate(&self, snapshot: &Snapshot) -> Option<String> {
        if snapshot.quality < self.config.min_quality {
            return Some(format!(
                "snapshot quality {} below floor {}",
                snapshot.quality, self.config.min_quality
            ));
        }
        if snapshot.liquidity_usd < self.config.liquidity_floor_usd {
            return Some(format!(
                "liquidity ${:.2} below floor ${:.2}",
                snapshot.liquidity_usd, self.config.liquidity_floor_usd
            ));
        }
        if self.config.ignore_list.iter().any(|m| m == snapshot.token.as_str()) {
            return Some("token is on the ignore list".to_string());
        }
        if snapshot.rug_flags.is_fatal() {
            return Some("rug flags include LP_REMOVED or HONEYPOT".to_string());
        }
        None
    }

    fn phase3_bundle(&self, snapshot: &Snapshot) -> i32 {
        if !snapshot.bundle_detected {
            return 0;
        }
        -(((snapshot.bundle_size as i32) * 5).min(40))
    }

    fn phase4_unique_buyers(&self, evidence: &EvidenceView) -> i32 {
        match evidence.unique_buyers {
            0 => 0,
            1..=4 => 3,
            5..=14 => 6,
            15..=29 => 10,
            _ => 15,
        }
    }

    fn phase5_volume_momentum_velocity(&self, snapshot: &Snapshot, state: &TokenState) -> i32 {
        let volume_ratio = snapshot.volume_ratio_1h();
        let volume_points = if volume_ratio >= 2.0 {
            10
        } else if volume_ratio >= 1.25 {
            7
        } else if volume_ratio >= 1.0 {
            3
        } else {
            0
        };

        let momentum = snapshot.price_change_1h_pct;
        let momentum_points = if momentum >= 50.0 {
            10
        } else if momentum >= 30.0 {
            7
        } else if momentum >= 10.0 {
            3
        } else if momentum < -20.0 {
            -5
        } else {
            0
        };

        let velocity_points = self.velocity_points(snapshot, state);

        volume_points + momentum_points + velocity_points
    }

    /// Bonding-curve percent per minute, pre-graduation only. Derived from the
    /// delta against the prior snapshot stored on `TokenState`, since a single
    /// snapshot carries no rate information on its own.
    fn velocity_points(&self, snapshot: &Snapshot, state: &TokenState) -> i32 {
        let Some(current_pct) = snapshot.bonding_curve_pct else {
            return 0;
        };
        let Some(prior) = state.last_snapshot.as_ref() else {
            return 0;
        };
        let Some(prior_pct) = prior.bonding_curve_pct else {
            return 0;
        };
        let elapsed_minutes = (snapshot.fetched_at - prior.fetched_at).num_seconds() as f64 / 60.0;
        if elapsed_minutes <= 0.0 {
            return 0;
        }
        let velocity = (current_pct - prior_pct) / elapsed_minutes;
        if velocity >= 30.0 {
            10
        } else if velocity >= 20.0 {
            8
        } else if velocity >= 10.0 {
            5
        } else if velocity >= 5.0 {
            3
        } else if velocity >= 2.0 {
            1
        } else {
            0
        }
    }

    fn phase6_social_verification(&self, snapshot: &Snapshot) -> i32 {
        if snapshot.boosted_promotion {
            return -25;
        }
        let s = snapshot.socials;
        if s.none() {
            return -15;
        }
        let mut points = 0;
        if s.twitter && s.telegram {
            points += 8;
        } else if s.twitter || s.telegram {
            points += 4;
        }
        if s.website {
            points += 5;
        }
        if s.discord {
            points += 3;
        }
        points
    }

    fn phase7_buy_sell_pressure(&self, snapshot: &Snapshot) -> i32 {
        let buys = snapshot.window_24h.buys;
        let sells = snapshot.window_24h.sells;
        let total = buys + sells;
        if total < 20 {
            return 8;
        }
        let ratio = buys as f64 / total as f64;
        if ratio >= 0.80 {
            18
        } else if ratio >= 0.70 {
            14
        } else if ratio >= 0.50 {
            10
        } else if ratio >= 0.30 {
            6
        } else {
            2
        }
    }

    fn phase8_holder_distribution(&self, snapshot: &Snapshot, state: &TokenState) -> i32 {
        let top10 = snapshot.top10_concentration_pct.unwrap_or(0.0);
        let mut points = if top10 >= 70.0 {
            -40
        } else if top10 >= 50.0 {
            -20
        } else if top10 >= 30.0 {
            -10
        } else {
            0
        };
        if let Some(prior) = state.prior_top10_concentration() {
            if top10 < prior {
                points += 5;
            }
        }
        points
    }

    fn phase9_rug_risk(&self, snapshot: &Snapshot) -> i32 {
        let mut points = 0;
        if snapshot.rug_score > 3.0 {
            points -= 10;
        }
        if snapshot.dev_sell_pct > 20.0 {
            points -= 20;
        }
        points
    }

    fn phase10_social_convergence(&self, social: &SocialEvidence) -> i32 {
        let growing = social.mentions_last_5m >= 2;
        let base = if social.mentions_last_10m >= 6 || social.distinct_groups_last_10m >= 3 {
            15
        } else if social.mentions_last_10m >= 3 || growing {
            10
        } else if social.mentions_last_10m >= 1 {
            5
        } else {
            0
        };

        let stale = social
            .latest_mention_ts
            .map(|ts| Utc::now() - ts > ChronoDuration::hours(2))
            .unwrap_or(false);
        let base = if stale { base / 2 } else { base };

        let mut multi_call_bonus = 0;
        if social.mentions_last_30m >= 3 {
            multi_call_bonus += 10;
        }
        if social.distinct_groups_last_30m >= 3 {
            multi_call_bonus += 15;
        }
        let multi_call_bonus = multi_call_bonus.min(20);

        (base + multi_call_bonus).min(25)
    }
}

/// Exact point bounds declared in §4.C, used by the score-bounds property test.
pub fn phase_bounds(phase: Phase) -> (i32, i32) {
    match phase {
        Phase::SmartWalletActivity => (0, 40),
        Phase::BaseSanity => (0, 0),
        Phase::BundleDistribution => (-40, 0),
        Phase::UniqueBuyers => (0, 15),
        Phase::VolumeMomentumVelocity => (-5, 30),
        Phase::SocialVerification => (-25, 16),
        Phase::BuySellPressure => (0, 20),
        Phase::HolderDistribution => (-40, 5),
        Phase::RugRiskPenalty => (-40, 0),
        Phase::SocialConvergence => (0, 25),
    }
}

/// Sum of the four mid-gate phases (§4.C), used outside the engine to decide
/// whether a HELD token's poll timer stays armed (§4.D).
pub fn mid_total(breakdown: &std::collections::BTreeMap<Phase, i32>) -> i32 {
    [
        Phase::SmartWalletActivity,
        Phase::BundleDistribution,
        Phase::UniqueBuyers,
        Phase::VolumeMomentumVelocity,
    ]
    .iter()
    .map(|p| breakdown.get(p).copied().unwrap_or(0))
    .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KolTier, RugFlags, SocialFlags, TokenId, TriggerSource};

    fn base_snapshot(token: &str) -> Snapshot {
        let mut s = Snapshot::stale_placeholder(TokenId::new(token));
        s.stale = false;
        s.quality = 90;
        s
    }

    fn engine() -> ConvictionEngine {
        ConvictionEngine::new(EngineConfig::default())
    }

    // S1 "Single elite KOL, low liquidity": DROP at phase 2 (liquidity floor).
    #[test]
    fn s1_single_elite_kol_low_liquidity_drops() {
        let mut snapshot = base_snapshot("T1");
        snapshot.liquidity_usd = 3_000.0;
        let evidence = EvidenceView {
            kol_tiers: vec![KolTier::Elite],
            ..Default::default()
        };
        let social = SocialEvidence::default();
        let state = TokenState::new(TokenId::new("T1"), TriggerSource::KolBuy);

        let result = engine().score(&snapshot, &evidence, &social, &state);
        assert_eq!(result.decision, Decision::Drop);
        assert!(!result.breakdown.contains_key(&Phase::BundleDistribution));
    }

    // S2 "Elite + Top KOL, good distribution": EMIT with total 96.
    #[test]
    fn s2_elite_and_top_kol_good_distribution_emits() {
        let mut snapshot = base_snapshot("T2");
        snapshot.liquidity_usd = 25_000.0;
        snapshot.window_1h.volume_usd = 40_000.0;
        snapshot.price_change_1h_pct = 35.0;
        snapshot.window_24h.buys = 75;
        snapshot.window_24h.sells = 25;
        snapshot.socials = SocialFlags {
            website: true,
            twitter: true,
            telegram: true,
            discord: false,
        };
        snapshot.include_holders = true;
        snapshot.top10_concentration_pct = Some(25.0);

        let evidence = EvidenceView {
            kol_tiers: vec![KolTier::Elite, KolTier::TopKol],
            unique_buyers: 40,
            ..Default::default()
        };
        let social = SocialEvidence::default();
        let state = TokenState::new(TokenId::new("T2"), TriggerSource::KolBuy);

        let result = engine().score(&snapshot, &evidence, &social, &state);
        assert_eq!(*result.breakdown.get(&Phase::SmartWalletActivity).unwrap(), 40);
        assert_eq!(*result.breakdown.get(&Phase::UniqueBuyers).unwrap(), 15);
        assert_eq!(*result.breakdown.get(&Phase::VolumeMomentumVelocity).unwrap(), 14);
        assert_eq!(*result.breakdown.get(&Phase::SocialVerification).unwrap(), 13);
        assert_eq!(*result.breakdown.get(&Phase::BuySellPressure).unwrap(), 14);
        assert_eq!(*result.breakdown.get(&Phase::HolderDistribution).unwrap(), 0);
        assert_eq!(result.total, 96);
        assert_eq!(result.decision, Decision::Emit);
    }

    // S3 "Bundle-heavy": mid_total = -6, HOLD.
    #[test]
    fn s3_bundle_heavy_holds() {
        let mut snapshot = base_snapshot("T3");
        snapshot.liquidity_usd = 20_000.0;
        snapshot.bundle_detected = true;
        snapshot.bundle_size = 6;
        snapshot.window_1h.volume_usd = 1.0 * snapshot.liquidity_usd; // volume ratio 1.0 -> +3

        let evidence = EvidenceView {
            kol_tiers: vec![KolTier::TopKol], // +10, single KOL so no multi-wallet bonus
            unique_buyers: 6, // -> +6
            ..Default::default()
        };
        let social = SocialEvidence::default();
        let state = TokenState::new(TokenId::new("T3"), TriggerSource::KolBuy);

        let result = engine().score(&snapshot, &evidence, &social, &state);
        assert_eq!(result.decision, Decision::Hold);
        let mid_total = result.breakdown[&Phase::SmartWalletActivity]
            + result.breakdown[&Phase::BundleDistribution]
            + result.breakdown[&Phase::UniqueBuyers]
            + result.breakdown[&Phase::VolumeMomentumVelocity];
        assert!(mid_total < 60);
    }

    // S4 "Chat convergence without KOL": no KOLs -> phase1=0 -> mid_total well below gate -> HOLD, social phase never runs.
    #[test]
    fn s4_chat_convergence_without_kol_holds_social_never_runs() {
        let mut snapshot = base_snapshot("T4");
        snapshot.liquidity_usd = 20_000.0;
        let evidence = EvidenceView::default();
        let social = SocialEvidence {
            mentions_last_10m: 4,
            distinct_groups_last_10m: 4,
            ..Default::default()
        };
        let state = TokenState::new(TokenId::new("T4"), TriggerSource::ChatCall);

        let result = engine().score(&snapshot, &evidence, &social, &state);
        assert_eq!(result.decision, Decision::Hold);
        assert!(!result.breakdown.contains_key(&Phase::SocialConvergence));
    }

    // S5 "Late emission": already emitted state never re-emits regardless of score.
    #[test]
    fn s5_already_emitted_token_never_reemits() {
        let mut snapshot = base_snapshot("T5");
        snapshot.liquidity_usd = 50_000.0;
        snapshot.window_1h.volume_usd = 100_000.0;
        snapshot.price_change_1h_pct = 60.0;
        snapshot.window_24h.buys = 90;
        snapshot.window_24h.sells = 10;
        snapshot.socials = SocialFlags {
            website: true,
            twitter: true,
            telegram: true,
            discord: true,
        };

        let evidence = EvidenceView {
            kol_tiers: vec![KolTier::Elite, KolTier::Elite, KolTier::TopKol],
            unique_buyers: 40,
            ..Default::default()
        };
        let social = SocialEvidence::default();
        let mut state = TokenState::new(TokenId::new("T5"), TriggerSource::KolBuy);
        state.emitted = true;

        let result = engine().score(&snapshot, &evidence, &social, &state);
        assert_eq!(result.decision, Decision::Hold);
    }

    // S6 "Graduation switch": total score 54 emits at the default post-grad
    // threshold (50) but holds once post-grad threshold is raised to 75.
    #[test]
    fn s6_graduation_switches_threshold() {
        let mut snapshot = base_snapshot("T6");
        snapshot.liquidity_usd = 30_000.0;
        snapshot.window_1h.volume_usd = 1.1 * snapshot.liquidity_usd; // ratio 1.1 -> +3
        snapshot.price_change_1h_pct = 15.0; // +3
        snapshot.window_24h.buys = 5;
        snapshot.window_24h.sells = 3; // total < 20 -> +8
        snapshot.socials = SocialFlags::default(); // no socials -> -15

        let evidence = EvidenceView {
            kol_tiers: vec![KolTier::Elite, KolTier::Elite], // 15+15=30, +15 bonus, capped at 40
            unique_buyers: 35, // +15
            ..Default::default()
        };
        let social = SocialEvidence::default();
        let mut state = TokenState::new(TokenId::new("T6"), TriggerSource::Graduation);
        state.graduated = true;

        let result = engine().score(&snapshot, &evidence, &social, &state);
        assert_eq!(result.total, 54);
        assert_eq!(result.decision, Decision::Emit);

        let mut strict_config = EngineConfig::default();
        strict_config.threshold_post_grad = 75;
        let strict_engine = ConvictionEngine::new(strict_config);
        let strict_result = strict_engine.score(&snapshot, &evidence, &social, &state);
        assert_eq!(strict_result.decision, Decision::Hold);
    }

    #[test]
    fn gate_correctness_honeypot_always_drops() {
        let mut snapshot = base_snapshot("T7");
        snapshot.liquidity_usd = 100_000.0;
        snapshot.rug_flags = RugFlags {
            lp_removed: false,
            honeypot: true,
            dev_sold: false,
        };
        let evidence = EvidenceView {
            kol_tiers: vec![KolTier::Elite, KolTier::Elite, KolTier::Elite],
            ..Default::default()
        };
        let social = SocialEvidence::default();
        let state = TokenState::new(TokenId::new("T7"), TriggerSource::KolBuy);

        let result = engine().score(&snapshot, &evidence, &social, &state);
        assert_eq!(result.decision, Decision::Drop);
        assert_eq!(result.breakdown.len(), 2);
    }

    #[test]
    fn score_bounds_hold_for_extreme_inputs() {
        let mut snapshot = base_snapshot("T8");
        snapshot.liquidity_usd = 1_000_000.0;
        snapshot.window_1h.volume_usd = 10_000_000.0;
        snapshot.price_change_1h_pct = 500.0;
        snapshot.window_24h.buys = 1000;
        snapshot.window_24h.sells = 0;
        snapshot.include_holders = true;
        snapshot.top10_concentration_pct = Some(10.0);
        snapshot.socials = SocialFlags {
            website: true,
            twitter: true,
            telegram: true,
            discord: true,
        };

        let evidence = EvidenceView {
            kol_tiers: vec![KolTier::Elite; 10],
            unique_buyers: 1000,
            ..Default::default()
        };
        let social = SocialEvidence {
            mentions_last_10m: 100,
            distinct_groups_last_10m: 50,
            mentions_last_30m: 100,
            distinct_groups_last_30m: 50,
            ..Default::default()
        };
        let state = TokenState::new(TokenId::new("T8"), TriggerSource::KolBuy);

        let result = engine().score(&snapshot, &evidence, &social, &state);
        let mut min_total = 0;
        let mut max_total = 0;
        for (phase, value) in &result.breakdown {
            let (lo, hi) = phase_bounds(*phase);
            assert!(*value >= lo && *value <= hi, "{:?} = {} out of bounds", phase, value);
            min_total += lo;
            max_total += hi;
        }
        assert!(result.total >= min_total && result.total <= max_total);
    }
}
