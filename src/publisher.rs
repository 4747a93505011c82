//! Notification publisher: fire-and-forget delivery of EMIT signals to an
//! external collaborator, with the retry/backoff wrapper implemented here
//! in the shape of the teacher's `trading::jito` bundle-submission retry.

use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use tracing::{error, warn};

use crate::config::PublisherConfig;
use crate::domain::SignalRecord;
use crate::error::{Error, Result};

#[async_trait]
pub trait NotificationPublisher: Send + Sync {
    async fn publish(&self, signal: &SignalRecord) -> Result<()>;
}

pub struct HttpNotificationPublisher {
    config: PublisherConfig,
    client: Client,
}

impl HttpNotificationPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn send_once(&self, signal: &SignalRecord) -> Result<()> {
        let resp = self
            .client
            .post(&self.config.url)
            .json(signal)
            .send()
            .await
            .map_err(|e| Error::PublishFailure {
                token: signal.token.to_string(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else if resp.status().is_server_error() || resp.status().as_u16() == 429 {
            Err(Error::PublishFailure {
                token: signal.token.to_string(),
                reason: format!("server returned {}", resp.status()),
            })
        } else {
            Err(Error::PublishFailure {
                token: signal.token.to_string(),
                reason: format!("server rejected signal with {}", resp.status()),
            })
        }
    }
}

#[async_trait]
impl NotificationPublisher for HttpNotificationPublisher {
    /// Retries up to `retry_attempts` with exponential backoff; permanent
    /// failure (after exhausting retries) surfaces as `Error::PublishFailure`
    /// so the caller can mark the signal record `emit_failed=true` without
    /// blocking the EMITTED state transition.
    async fn publish(&self, signal: &SignalRecord) -> Result<()> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.retry_base_delay_ms),
            max_interval: Duration::from_millis(self.config.retry_base_delay_ms * 8),
            max_elapsed_time: Some(Duration::from_millis(
                self.config.retry_base_delay_ms * self.config.retry_attempts as u64 * 8,
            )),
            ..Default::default()
        };

        retry(backoff, || async {
            match self.send_once(signal).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_retryable() => {
                    warn!(token = %signal.token, error = %e, "retryable publish failure");
                    Err(backoff::Error::transient(e))
                }
                Err(e) => {
                    error!(token = %signal.token, error = %e, "permanent publish failure");
                    Err(backoff::Error::permanent(e))
                }
            }
        })
        .await
    }
}

/// Default used by components that do not care about outbound delivery
/// (unit tests, dry-run CLI invocations).
pub struct NoopPublisher;

#[async_trait]
impl NotificationPublisher for NoopPublisher {
    async fn publish(&self, _signal: &SignalRecord) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decision, ScoreResult, TokenId, TriggerSource};
    use std::collections::BTreeMap;

    fn sample_signal() -> SignalRecord {
        let result = ScoreResult {
            total: 80,
            breakdown: BTreeMap::new(),
            decision: Decision::Emit,
            reasons: vec![],
        };
        SignalRecord::new(TokenId::new("mint1"), "MINT".to_string(), &result, TriggerSource::KolBuy)
    }

    #[tokio::test]
    async fn noop_publisher_always_succeeds() {
        let publisher = NoopPublisher;
        assert!(publisher.publish(&sample_signal()).await.is_ok());
    }

    #[tokio::test]
    async fn http_publisher_fails_against_unreachable_host() {
        let mut config = PublisherConfig::default();
        config.url = "http://127.0.0.1:1/notify".to_string();
        config.retry_attempts = 1;
        config.retry_base_delay_ms = 5;
        let publisher = HttpNotificationPublisher::new(config);
        let result = publisher.publish(&sample_signal()).await;
        assert!(result.is_err());
    }
}
