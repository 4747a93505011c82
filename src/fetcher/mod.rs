//! Token Metadata Fetcher: a stateless facade over remote market-data
//! providers, in the shape of the teacher's `DexScreenerClient`. Concurrent
//! callers for the same token within a short window are coalesced into a
//! single outbound request via a per-token semaphore.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::config::FetcherConfig;
use crate::domain::{RugFlags, SocialFlags, Snapshot, TokenId, WindowStats};
use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceChange {
    h1: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TxnCount {
    buys: u64,
    sells: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Txns {
    h1: Option<TxnCount>,
    h6: Option<TxnCount>,
    h24: Option<TxnCount>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiquidityInfo {
    usd: Option<f64>,
    base: Option<f64>,
    quote: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeInfo {
    h1: Option<f64>,
    h6: Option<f64>,
    h24: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DexPair {
    price_usd: Option<String>,
    price_change: Option<PriceChange>,
    txns: Option<Txns>,
    volume: Option<VolumeInfo>,
    liquidity: Option<LiquidityInfo>,
    market_cap: Option<f64>,
    boosts: Option<BoostsInfo>,
    info: Option<PairInfo>,
}

#[derive(Debug, Clone, Deserialize)]
struct BoostsInfo {
    active: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct PairInfo {
    websites: Option<Vec<serde_json::Value>>,
    socials: Option<Vec<SocialLink>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SocialLink {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenPairsResponse {
    pairs: Option<Vec<DexPair>>,
}

/// Holder-distribution data, fetched only when `include_holders` is requested
/// since it is comparatively expensive to retrieve.
#[derive(Debug, Clone, Deserialize, Default)]
struct HolderInfo {
    holder_count: Option<u64>,
    top1_pct: Option<f64>,
    top5_pct: Option<f64>,
    top10_pct: Option<f64>,
}

/// Rug-risk data from a secondary provider.
#[derive(Debug, Clone, Deserialize, Default)]
struct RugInfo {
    lp_removed: Option<bool>,
    honeypot: Option<bool>,
    dev_sold: Option<bool>,
    rug_score: Option<f64>,
    dev_sell_pct: Option<f64>,
    bundle_detected: Option<bool>,
    bundle_size: Option<u32>,
    bonding_curve_pct: Option<f64>,
    unique_buyer_estimate: Option<u64>,
}

pub struct TokenFetcher {
    config: FetcherConfig,
    client: Client,
    inflight: DashMap<TokenId, Arc<Semaphore>>,
    recent: DashMap<TokenId, (Instant, Snapshot)>,
}

impl TokenFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            inflight: DashMap::new(),
            recent: DashMap::new(),
        }
    }

    /// Fetch a fresh snapshot. Concurrent calls for the same token within the
    /// coalesce window share the permit; whichever caller arrives second
    /// reads back the snapshot the first just wrote instead of issuing its
    /// own HTTP round trip.
    pub async fn fetch_snapshot(&self, token: &TokenId, include_holders: bool) -> Result<Snapshot> {
        let _permit_guard = self.acquire_coalescing_permit(token).await;

        let window = Duration::from_millis(self.config.coalesce_window_ms);
        if let Some(entry) = self.recent.get(token) {
            let (written_at, snapshot) = entry.value();
            if written_at.elapsed() < window {
                debug!(token = %token, "coalesced onto snapshot fetched by a concurrent caller");
                return Ok(snapshot.clone());
            }
        }

        let result = self.fetch_snapshot_uncoalesced(token, include_holders).await;
        if let Ok(snapshot) = &result {
            self.recent.insert(token.clone(), (Instant::now(), snapshot.clone()));
        }
        result
    }

    async fn acquire_coalescing_permit(&self, token: &TokenId) -> tokio::sync::OwnedSemaphorePermit {
        let semaphore = self
            .inflight
            .entry(token.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();
        semaphore
            .acquire_owned()
            .await
            .expect("fetcher semaphore never closed")
    }

    async fn fetch_snapshot_uncoalesced(&self, token: &TokenId, include_holders: bool) -> Result<Snapshot> {
        let timeout = Duration::from_millis(self.config.timeout_ms);

        let pair = match tokio::time::timeout(timeout, self.fetch_pair(token)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                warn!(token = %token, error = %e, "provider call failed, returning stale snapshot");
                return Ok(Snapshot::stale_placeholder(token.clone()));
            }
            Err(_) => {
                warn!(token = %token, timeout_ms = self.config.timeout_ms, "provider call timed out");
                return Ok(Snapshot::stale_placeholder(token.clone()));
            }
        };

        let Some(pair) = pair else {
            debug!(token = %token, "no pairs found for token");
            return Ok(Snapshot::stale_placeholder(token.clone()));
        };

        let rug = match tokio::time::timeout(timeout, self.fetch_rug_info(token)).await {
            Ok(Ok(r)) => r,
            _ => {
                debug!(token = %token, "rug-risk provider unavailable, degrading quality");
                RugInfo::default()
            }
        };

        let holders = if include_holders {
            match tokio::time::timeout(timeout, self.fetch_holder_info(token)).await {
                Ok(Ok(h)) => Some(h),
                _ => {
                    debug!(token = %token, "holder provider unavailable, degrading quality");
                    None
                }
            }
        } else {
            None
        };

        Ok(self.assemble_snapshot(token, pair, rug, holders, include_holders))
    }

    async fn fetch_pair(&self, token: &TokenId) -> Result<Option<DexPair>> {
        let url = format!("{}/latest/dex/tokens/{}", self.config.base_url, token.as_str());
        let resp = self.client.get(&url).send().await?;
        let data: TokenPairsResponse = resp.json().await?;
        Ok(data.pairs.and_then(|p| p.into_iter().next()))
    }

    /// Secondary rug-risk provider. Not part of DexScreener's public API; a
    /// dedicated endpoint is assumed under the same base URL for simplicity.
    async fn fetch_rug_info(&self, token: &TokenId) -> Result<RugInfo> {
        let url = format!("{}/rug-check/{}", self.config.base_url, token.as_str());
        let resp = self.client.get(&url).send().await?;
        Ok(resp.json().await.unwrap_or_default())
    }

    async fn fetch_holder_info(&self, token: &TokenId) -> Result<HolderInfo> {
        let url = format!("{}/holders/{}", self.config.base_url, token.as_str());
        let resp = self.client.get(&url).send().await?;
        Ok(resp.json().await.unwrap_or_default())
    }

    fn assemble_snapshot(
        &self,
        token: &TokenId,
        pair: DexPair,
        rug: RugInfo,
        holders: Option<HolderInfo>,
        include_holders: bool,
    ) -> Snapshot {
        let mut populated_fields = 0u32;
        let mut total_fields = 0u32;

        macro_rules! count {
            ($opt:expr) => {{
                total_fields += 1;
                if $opt.is_some() {
                    populated_fields += 1;
                }
            }};
        }

        let price_usd = pair.price_usd.as_ref().and_then(|p| p.parse::<f64>().ok());
        count!(price_usd);
        let liquidity_usd = pair.liquidity.as_ref().and_then(|l| l.usd);
        count!(liquidity_usd);
        let market_cap_usd = pair.market_cap;
        count!(market_cap_usd);

        let window_1h = WindowStats {
            volume_usd: pair.volume.as_ref().and_then(|v| v.h1).unwrap_or(0.0),
            buys: pair.txns.as_ref().and_then(|t| t.h1.as_ref()).map(|t| t.buys).unwrap_or(0),
            sells: pair.txns.as_ref().and_then(|t| t.h1.as_ref()).map(|t| t.sells).unwrap_or(0),
        };
        let window_6h = WindowStats {
            volume_usd: pair.volume.as_ref().and_then(|v| v.h6).unwrap_or(0.0),
            buys: pair.txns.as_ref().and_then(|t| t.h6.as_ref()).map(|t| t.buys).unwrap_or(0),
            sells: pair.txns.as_ref().and_then(|t| t.h6.as_ref()).map(|t| t.sells).unwrap_or(0),
        };
        let window_24h = WindowStats {
            volume_usd: pair.volume.as_ref().and_then(|v| v.h24).unwrap_or(0.0),
            buys: pair.txns.as_ref().and_then(|t| t.h24.as_ref()).map(|t| t.buys).unwrap_or(0),
            sells: pair.txns.as_ref().and_then(|t| t.h24.as_ref()).map(|t| t.sells).unwrap_or(0),
        };

        let price_change_1h_pct = pair.price_change.as_ref().and_then(|pc| pc.h1).unwrap_or(0.0);

        let socials = pair
            .info
            .as_ref()
            .map(|i| {
                let has = |k: &str| {
                    i.socials
                        .as_ref()
                        .map(|s| s.iter().any(|l| l.kind == k))
                        .unwrap_or(false)
                };
                SocialFlags {
                    website: i.websites.as_ref().map(|w| !w.is_empty()).unwrap_or(false),
                    twitter: has("twitter"),
                    telegram: has("telegram"),
                    discord: has("discord"),
                }
            })
            .unwrap_or_default();

        let boosted_promotion = pair.boosts.as_ref().and_then(|b| b.active).unwrap_or(0) > 0;

        count!(rug.rug_score);

        let include_holders = include_holders && holders.is_some();
        if include_holders {
            total_fields += 4;
            if let Some(h) = &holders {
                populated_fields += [h.holder_count.is_some(), h.top1_pct.is_some(), h.top5_pct.is_some(), h.top10_pct.is_some()]
                    .iter()
                    .filter(|p| **p)
                    .count() as u32;
            }
        }

        let quality = if total_fields == 0 {
            0
        } else {
            ((populated_fields as f64 / total_fields as f64) * 100.0) as u8
        };

        Snapshot {
            token: token.clone(),
            price_usd: price_usd.unwrap_or(0.0),
            market_cap_usd: market_cap_usd.unwrap_or(0.0),
            liquidity_usd: liquidity_usd.unwrap_or(0.0),
            liquidity_base: pair.liquidity.as_ref().and_then(|l| l.base).unwrap_or(0.0),
            liquidity_quote: pair.liquidity.as_ref().and_then(|l| l.quote).unwrap_or(0.0),
            window_1h,
            window_6h,
            window_24h,
            unique_buyer_estimate: rug.unique_buyer_estimate.unwrap_or(0),
            bonding_curve_pct: rug.bonding_curve_pct,
            price_change_1h_pct,
            holder_count: holders.as_ref().and_then(|h| h.holder_count),
            top1_concentration_pct: holders.as_ref().and_then(|h| h.top1_pct),
            top5_concentration_pct: holders.as_ref().and_then(|h| h.top5_pct),
            top10_concentration_pct: holders.as_ref().and_then(|h| h.top10_pct),
            socials,
            boosted_promotion,
            rug_flags: RugFlags {
                lp_removed: rug.lp_removed.unwrap_or(false),
                honeypot: rug.honeypot.unwrap_or(false),
                dev_sold: rug.dev_sold.unwrap_or(false),
            },
            rug_score: rug.rug_score.unwrap_or(0.0),
            dev_sell_pct: rug.dev_sell_pct.unwrap_or(0.0),
            bundle_detected: rug.bundle_detected.unwrap_or(false),
            bundle_size: rug.bundle_size.unwrap_or(0),
            include_holders,
            quality,
            stale: false,
            fetched_at: chrono::Utc::now(),
        }
    }
}
