//! Configuration loading and validation
//!
//! Loaded once at process start; read-only thereafter. Hot updates require a restart.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure, one sub-struct per component.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    #[serde(default)]
    pub backpressure: BackpressureConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_fetch_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_coalesce_window_ms")]
    pub coalesce_window_ms: u64,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_fetch_timeout_ms(),
            coalesce_window_ms: default_coalesce_window_ms(),
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_kol_store_max")]
    pub kol_store_max_per_token: usize,
    #[serde(default = "default_kol_ttl_days")]
    pub kol_ttl_days: i64,
    #[serde(default = "default_mention_ttl_hours")]
    pub mention_ttl_hours: i64,
    #[serde(default = "default_unique_buyer_cap")]
    pub unique_buyer_cap: usize,
    #[serde(default = "default_snapshot_freshness_secs")]
    pub snapshot_freshness_secs: i64,
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: i64,
    #[serde(default = "default_correlation_window_mins")]
    pub correlation_window_mins: i64,
    #[serde(default = "default_kol_dedup_window_secs")]
    pub kol_dedup_window_secs: i64,
    #[serde(default = "default_mention_dedup_window_secs")]
    pub mention_dedup_window_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            kol_store_max_per_token: default_kol_store_max(),
            kol_ttl_days: default_kol_ttl_days(),
            mention_ttl_hours: default_mention_ttl_hours(),
            unique_buyer_cap: default_unique_buyer_cap(),
            snapshot_freshness_secs: default_snapshot_freshness_secs(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            correlation_window_mins: default_correlation_window_mins(),
            kol_dedup_window_secs: default_kol_dedup_window_secs(),
            mention_dedup_window_secs: default_mention_dedup_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_threshold_pre_grad")]
    pub threshold_pre_grad: i32,
    #[serde(default = "default_threshold_post_grad")]
    pub threshold_post_grad: i32,
    #[serde(default = "default_mid_gate")]
    pub mid_gate: i32,
    #[serde(default = "default_liquidity_floor")]
    pub liquidity_floor_usd: f64,
    #[serde(default = "default_mcap_ceiling")]
    pub mcap_ceiling_usd: f64,
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,
    #[serde(default = "default_true")]
    pub social_convergence_enabled: bool,
    #[serde(default = "default_true")]
    pub holder_distribution_enabled: bool,
    #[serde(default)]
    pub ignore_list: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            threshold_pre_grad: default_threshold_pre_grad(),
            threshold_post_grad: default_threshold_post_grad(),
            mid_gate: default_mid_gate(),
            liquidity_floor_usd: default_liquidity_floor(),
            mcap_ceiling_usd: default_mcap_ceiling(),
            min_quality: default_min_quality(),
            social_convergence_enabled: true,
            holder_distribution_enabled: true,
            ignore_list: default_ignore_list(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_poll_mid_total_floor")]
    pub poll_mid_total_floor: i32,
    #[serde(default = "default_low_score_streak_limit")]
    pub low_score_streak_limit: u32,
    #[serde(default = "default_cooling_window_secs")]
    pub cooling_window_secs: i64,
    #[serde(default = "default_emit_cooldown_hours")]
    pub emit_cooldown_hours: i64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_per_token_queue_capacity")]
    pub per_token_queue_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            poll_mid_total_floor: default_poll_mid_total_floor(),
            low_score_streak_limit: default_low_score_streak_limit(),
            cooling_window_secs: default_cooling_window_secs(),
            emit_cooldown_hours: default_emit_cooldown_hours(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            per_token_queue_capacity: default_per_token_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    #[serde(default = "default_mint_min_len")]
    pub mint_min_len: usize,
    #[serde(default = "default_mint_max_len")]
    pub mint_max_len: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            mint_min_len: default_mint_min_len(),
            mint_max_len: default_mint_max_len(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackpressureConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            high_watermark: default_high_watermark(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_publish_url")]
    pub url: String,
    #[serde(default = "default_publish_retries")]
    pub retry_attempts: u32,
    #[serde(default = "default_publish_backoff_base_ms")]
    pub retry_base_delay_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            url: default_publish_url(),
            retry_attempts: default_publish_retries(),
            retry_base_delay_ms: default_publish_backoff_base_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout_ms() -> u64 {
    5_000
}
fn default_coalesce_window_ms() -> u64 {
    500
}
fn default_base_url() -> String {
    "https://api.dexscreener.com".to_string()
}

fn default_kol_store_max() -> usize {
    200
}
fn default_kol_ttl_days() -> i64 {
    30
}
fn default_mention_ttl_hours() -> i64 {
    4
}
fn default_unique_buyer_cap() -> usize {
    500
}
fn default_snapshot_freshness_secs() -> i64 {
    60
}
fn default_snapshot_ttl_secs() -> i64 {
    300
}
fn default_correlation_window_mins() -> i64 {
    30
}
fn default_kol_dedup_window_secs() -> i64 {
    2
}
fn default_mention_dedup_window_secs() -> i64 {
    30
}

fn default_threshold_pre_grad() -> i32 {
    45
}
fn default_threshold_post_grad() -> i32 {
    50
}
fn default_mid_gate() -> i32 {
    60
}
fn default_liquidity_floor() -> f64 {
    8_000.0
}
fn default_mcap_ceiling() -> f64 {
    10_000_000.0
}
fn default_min_quality() -> u8 {
    50
}
fn default_ignore_list() -> Vec<String> {
    vec![
        "So11111111111111111111111111111111111111112".to_string(), // wrapped SOL
        "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(), // USDC
        "Es9vMFrzaCERmJfrF4H2FYD4KCoNkY11McCe8BenwNYB".to_string(), // USDT
    ]
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_poll_mid_total_floor() -> i32 {
    50
}
fn default_low_score_streak_limit() -> u32 {
    6
}
fn default_cooling_window_secs() -> i64 {
    1_800
}
fn default_emit_cooldown_hours() -> i64 {
    24
}
fn default_backoff_base_ms() -> u64 {
    5_000
}
fn default_backoff_max_ms() -> u64 {
    120_000
}
fn default_per_token_queue_capacity() -> usize {
    64
}

fn default_mint_min_len() -> usize {
    32
}
fn default_mint_max_len() -> usize {
    44
}

fn default_channel_capacity() -> usize {
    10_000
}
fn default_high_watermark() -> usize {
    8_000
}

fn default_publish_url() -> String {
    "http://localhost:9000/notify".to_string()
}
fn default_publish_retries() -> u32 {
    3
}
fn default_publish_backoff_base_ms() -> u64 {
    500
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Config {
    /// Load configuration from an optional file plus environment variables.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if present
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SENTRY_)
            .add_source(
                config::Environment::with_prefix("SENTRY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.engine.threshold_pre_grad <= 0 || self.engine.threshold_post_grad <= 0 {
            anyhow::bail!("engine thresholds must be positive");
        }

        if self.engine.liquidity_floor_usd < 0.0 {
            anyhow::bail!("liquidity_floor_usd cannot be negative");
        }

        if self.engine.min_quality > 100 {
            anyhow::bail!("min_quality must be within 0..=100");
        }

        for mint in &self.engine.ignore_list {
            if mint.len() < self.ingress.mint_min_len || mint.len() > self.ingress.mint_max_len {
                anyhow::bail!("Invalid ignore-list mint address: {}", mint);
            }
        }

        if self.tracker.low_score_streak_limit == 0 {
            anyhow::bail!("low_score_streak_limit must be at least 1");
        }

        if self.cache.unique_buyer_cap == 0 || self.cache.kol_store_max_per_token == 0 {
            anyhow::bail!("cache caps must be positive");
        }

        if self.backpressure.high_watermark > self.backpressure.channel_capacity {
            anyhow::bail!("backpressure high_watermark cannot exceed channel_capacity");
        }

        Ok(())
    }

    /// Masked configuration for display (hide secrets/credentials in URLs)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Fetcher:
    base_url: {}
    timeout: {}ms
    coalesce_window: {}ms
  Engine:
    threshold_pre_grad: {}
    threshold_post_grad: {}
    mid_gate: {}
    liquidity_floor: ${}
    ignore_list: {} entries
  Tracker:
    poll_interval: {}s
    cooling_window: {}s
    emit_cooldown: {}h
  Backpressure:
    channel_capacity: {}
    high_watermark: {}
  Publisher:
    url: {}
    retry_attempts: {}
  Server:
    bind_addr: {}
"#,
            mask_url(&self.fetcher.base_url),
            self.fetcher.timeout_ms,
            self.fetcher.coalesce_window_ms,
            self.engine.threshold_pre_grad,
            self.engine.threshold_post_grad,
            self.engine.mid_gate,
            self.engine.liquidity_floor_usd,
            self.engine.ignore_list.len(),
            self.tracker.poll_interval_secs,
            self.tracker.cooling_window_secs,
            self.tracker.emit_cooldown_hours,
            self.backpressure.channel_capacity,
            self.backpressure.high_watermark,
            mask_url(&self.publisher.url),
            self.publisher.retry_attempts,
            self.server.bind_addr,
        )
    }
}

/// Mask query-string portion of a URL for display (hides API keys passed as params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fetcher: FetcherConfig::default(),
            cache: CacheConfig::default(),
            engine: EngineConfig::default(),
            tracker: TrackerConfig::default(),
            ingress: IngressConfig::default(),
            backpressure: BackpressureConfig::default(),
            publisher: PublisherConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_match_spec_numbers() {
        let config = Config::default();
        assert_eq!(config.engine.threshold_pre_grad, 45);
        assert_eq!(config.engine.threshold_post_grad, 50);
        assert_eq!(config.engine.mid_gate, 60);
        assert_eq!(config.engine.liquidity_floor_usd, 8_000.0);
        assert_eq!(config.cache.kol_store_max_per_token, 200);
        assert_eq!(config.cache.unique_buyer_cap, 500);
        assert_eq!(config.cache.snapshot_freshness_secs, 60);
    }

    #[test]
    fn rejects_non_positive_thresholds() {
        let mut config = Config::default();
        config.engine.threshold_post_grad = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_watermark_above_capacity() {
        let mut config = Config::default();
        config.backpressure.high_watermark = config.backpressure.channel_capacity + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn mask_url_strips_query_string() {
        assert_eq!(mask_url("https://host/path?key=secret"), "https://host/path?***");
        assert_eq!(mask_url("https://host/path"), "https://host/path");
    }
}
