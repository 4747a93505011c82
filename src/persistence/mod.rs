//! Persistence trait boundaries and in-memory default implementations.
//!
//! A real relational backing (e.g. via `sqlx`) is explicitly out of scope;
//! these traits exist so the tracker and engine depend on an interface, not
//! a storage technology, and so tests can exercise the full pipeline without
//! a database.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ChatMention, GroupCorrelationEdge, KolWallet, SignalOutcome, SignalRecord, TokenId};
use crate::error::Result;

#[async_trait]
pub trait SignalStore: Send + Sync {
    async fn insert(&self, signal: &SignalRecord) -> Result<()>;
    async fn update_outcome(&self, id: uuid::Uuid, outcome: SignalOutcome) -> Result<()>;
    async fn mark_publish_failed(&self, id: uuid::Uuid) -> Result<()>;
    /// Most recently emitted signals, newest first, bounded to `limit`.
    async fn recent(&self, limit: usize) -> Result<Vec<SignalRecord>>;
    async fn count_emitted_since(&self, since: DateTime<Utc>) -> Result<u64>;
    async fn last_emission_for(&self, token: &TokenId) -> Result<Option<DateTime<Utc>>>;
}

#[async_trait]
pub trait MentionStore: Send + Sync {
    async fn persist(&self, mention: &ChatMention) -> Result<()>;
    async fn persist_correlation_edge(&self, edge: &GroupCorrelationEdge) -> Result<()>;
}

#[async_trait]
pub trait KolWalletStore: Send + Sync {
    async fn upsert(&self, wallet: KolWallet) -> Result<()>;
    async fn get(&self, address: &str) -> Result<Option<KolWallet>>;
    async fn all(&self) -> Result<Vec<KolWallet>>;
}

#[derive(Default)]
pub struct InMemorySignalStore {
    signals: RwLock<Vec<SignalRecord>>,
}

#[async_trait]
impl SignalStore for InMemorySignalStore {
    async fn insert(&self, signal: &SignalRecord) -> Result<()> {
        self.signals.write().unwrap().push(signal.clone());
        Ok(())
    }

    async fn update_outcome(&self, id: uuid::Uuid, outcome: SignalOutcome) -> Result<()> {
        let mut signals = self.signals.write().unwrap();
        if let Some(signal) = signals.iter_mut().find(|s| s.id == id) {
            signal.outcome = outcome;
            signal.outcome_updated_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_publish_failed(&self, id: uuid::Uuid) -> Result<()> {
        let mut signals = self.signals.write().unwrap();
        if let Some(signal) = signals.iter_mut().find(|s| s.id == id) {
            signal.emit_failed = true;
        }
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<SignalRecord>> {
        let signals = self.signals.read().unwrap();
        Ok(signals.iter().rev().take(limit).cloned().collect())
    }

    async fn count_emitted_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let signals = self.signals.read().unwrap();
        Ok(signals.iter().filter(|s| s.emitted_at >= since).count() as u64)
    }

    async fn last_emission_for(&self, token: &TokenId) -> Result<Option<DateTime<Utc>>> {
        let signals = self.signals.read().unwrap();
        Ok(signals
            .iter()
            .filter(|s| &s.token == token)
            .map(|s| s.emitted_at)
            .max())
    }
}

#[derive(Default)]
pub struct InMemoryMentionStore {
    mentions: RwLock<Vec<ChatMention>>,
    edges: RwLock<Vec<GroupCorrelationEdge>>,
}

#[async_trait]
impl MentionStore for InMemoryMentionStore {
    async fn persist(&self, mention: &ChatMention) -> Result<()> {
        self.mentions.write().unwrap().push(mention.clone());
        Ok(())
    }

    async fn persist_correlation_edge(&self, edge: &GroupCorrelationEdge) -> Result<()> {
        self.edges.write().unwrap().push(edge.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryKolWalletStore {
    wallets: RwLock<HashMap<String, KolWallet>>,
}

#[async_trait]
impl KolWalletStore for InMemoryKolWalletStore {
    async fn upsert(&self, wallet: KolWallet) -> Result<()> {
        self.wallets.write().unwrap().insert(wallet.address.clone(), wallet);
        Ok(())
    }

    async fn get(&self, address: &str) -> Result<Option<KolWallet>> {
        Ok(self.wallets.read().unwrap().get(address).cloned())
    }

    async fn all(&self) -> Result<Vec<KolWallet>> {
        Ok(self.wallets.read().unwrap().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{KolTier, TriggerSource};
    use crate::engine::ConvictionEngine;
    use crate::domain::{EvidenceView, SocialEvidence, Snapshot, TokenState};

    #[tokio::test]
    async fn signal_store_round_trips_and_counts_since() {
        let store = InMemorySignalStore::default();
        let snapshot = Snapshot::stale_placeholder(TokenId::new("mint1"));
        let engine = ConvictionEngine::new(crate::config::EngineConfig::default());
        let state = TokenState::new(TokenId::new("mint1"), TriggerSource::KolBuy);
        let result = engine.score(&snapshot, &EvidenceView::default(), &SocialEvidence::default(), &state);
        let record = SignalRecord::new(TokenId::new("mint1"), "MINT".to_string(), &result, TriggerSource::KolBuy);
        let id = record.id;

        store.insert(&record).await.unwrap();
        assert_eq!(store.count_emitted_since(Utc::now() - chrono::Duration::hours(1)).await.unwrap(), 1);

        store
            .update_outcome(id, SignalOutcome { peak_multiple: Some(2.5), final_category: Some("winner".into()), rug_flag: false })
            .await
            .unwrap();
        let recent = store.recent(10).await.unwrap();
        assert_eq!(recent[0].outcome.peak_multiple, Some(2.5));
    }

    #[tokio::test]
    async fn kol_wallet_store_upserts_by_address() {
        let store = InMemoryKolWalletStore::default();
        store.upsert(KolWallet::new("addr1", KolTier::Elite)).await.unwrap();
        store.upsert(KolWallet::new("addr1", KolTier::TopKol)).await.unwrap();
        let wallet = store.get("addr1").await.unwrap().unwrap();
        assert_eq!(wallet.tier, KolTier::TopKol);
        assert_eq!(store.all().await.unwrap().len(), 1);
    }
}
