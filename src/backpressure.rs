//! Inbound event backpressure: a bounded, priority-ranked queue generalizing
//! the teacher's `BackpressureChannel`/`PriorityQueue` (`stream::backpressure`)
//! from a two-tier priority flag to the four ranked tiers this system needs.
//!
//! Drop order under a full queue: `PollTick` first, then over-quota
//! `ChatMentionEvent`s, then non-elite `KOLBuyEvent`s. Elite-KOL buys are
//! never dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

/// Rank of an inbound event for queue admission under pressure. Ordered
/// lowest-dropped-first: `PollTick` drops before `ChatMentionOverQuota`,
/// which drops before `KolBuyStandard`. `KolBuyElite` is never dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EventPriority {
    PollTick,
    ChatMentionOverQuota,
    KolBuyStandard,
    KolBuyElite,
}

pub struct PrioritizedEvent<T> {
    pub event: T,
    pub priority: EventPriority,
}

impl<T> PrioritizedEvent<T> {
    pub fn new(event: T, priority: EventPriority) -> Self {
        Self { event, priority }
    }
}

/// Bounded, priority-ranked inbound queue. Backed by one `VecDeque` per tier
/// rather than a single ordered structure, so admission and drop decisions
/// never need to re-sort the buffer.
pub struct BackpressureChannel<T> {
    capacity: usize,
    high_watermark: usize,
    buffer: Arc<Mutex<Tiers<T>>>,
    notify_tx: mpsc::Sender<()>,
    notify_rx: Arc<Mutex<mpsc::Receiver<()>>>,
    dropped_count: Arc<Mutex<u64>>,
}

struct Tiers<T> {
    poll_tick: VecDeque<T>,
    chat_mention: VecDeque<T>,
    kol_standard: VecDeque<T>,
    kol_elite: VecDeque<T>,
}

impl<T> Tiers<T> {
    fn new() -> Self {
        Self {
            poll_tick: VecDeque::new(),
            chat_mention: VecDeque::new(),
            kol_standard: VecDeque::new(),
            kol_elite: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        self.poll_tick.len() + self.chat_mention.len() + self.kol_standard.len() + self.kol_elite.len()
    }

    fn tier_mut(&mut self, priority: EventPriority) -> &mut VecDeque<T> {
        match priority {
            EventPriority::PollTick => &mut self.poll_tick,
            EventPriority::ChatMentionOverQuota => &mut self.chat_mention,
            EventPriority::KolBuyStandard => &mut self.kol_standard,
            EventPriority::KolBuyElite => &mut self.kol_elite,
        }
    }

    /// Drop one item from the lowest non-empty tier below `KolBuyElite`.
    /// Returns `true` if something was dropped.
    fn drop_lowest(&mut self) -> bool {
        if self.poll_tick.pop_front().is_some() {
            return true;
        }
        if self.chat_mention.pop_front().is_some() {
            return true;
        }
        if self.kol_standard.pop_front().is_some() {
            return true;
        }
        false
    }

    fn pop_highest(&mut self) -> Option<T> {
        self.kol_elite
            .pop_front()
            .or_else(|| self.kol_standard.pop_front())
            .or_else(|| self.chat_mention.pop_front())
            .or_else(|| self.poll_tick.pop_front())
    }
}

impl<T: Send + 'static> BackpressureChannel<T> {
    pub fn new(capacity: usize, high_watermark: usize) -> Self {
        let (notify_tx, notify_rx) = mpsc::channel(capacity.max(1));
        Self {
            capacity,
            high_watermark,
            buffer: Arc::new(Mutex::new(Tiers::new())),
            notify_tx,
            notify_rx: Arc::new(Mutex::new(notify_rx)),
            dropped_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Enqueue an event. `KolBuyElite` events are always admitted, growing
    /// the buffer past `capacity` if necessary rather than being dropped.
    pub fn send(&self, event: T, priority: EventPriority) {
        let mut buffer = self.buffer.lock().unwrap();

        if buffer.len() >= self.high_watermark && priority != EventPriority::KolBuyElite {
            if !buffer.drop_lowest() {
                // Every queued item outranks or matches the incoming one; drop
                // the incoming event itself instead of growing unbounded.
                *self.dropped_count.lock().unwrap() += 1;
                debug!(?priority, "dropped incoming event, queue saturated with higher-priority items");
                return;
            }
            *self.dropped_count.lock().unwrap() += 1;
            debug!(?priority, "dropped lowest-tier queued event to admit new arrival");
        }

        buffer.tier_mut(priority).push_back(event);
        let _ = self.notify_tx.try_send(());
    }

    pub async fn recv(&self) -> Option<T> {
        {
            let mut rx = self.notify_rx.lock().ok()?;
            rx.recv().await?;
        }
        let mut buffer = self.buffer.lock().ok()?;
        buffer.pop_highest()
    }

    pub fn try_recv(&self) -> Option<T> {
        let mut buffer = self.buffer.lock().ok()?;
        buffer.pop_highest()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        *self.dropped_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elite_kol_buys_are_never_dropped() {
        let channel: BackpressureChannel<i32> = BackpressureChannel::new(10, 2);
        channel.send(1, EventPriority::KolBuyElite);
        channel.send(2, EventPriority::KolBuyElite);
        channel.send(3, EventPriority::KolBuyElite);
        assert_eq!(channel.len(), 3);
        assert_eq!(channel.dropped_count(), 0);
    }

    #[test]
    fn poll_tick_drops_before_chat_mention() {
        let channel: BackpressureChannel<&str> = BackpressureChannel::new(10, 2);
        channel.send("tick", EventPriority::PollTick);
        channel.send("mention", EventPriority::ChatMentionOverQuota);
        channel.send("standard-buy", EventPriority::KolBuyStandard);

        assert_eq!(channel.dropped_count(), 1);
        assert_eq!(channel.try_recv(), Some("standard-buy"));
        assert_eq!(channel.try_recv(), Some("mention"));
        assert_eq!(channel.try_recv(), None);
    }

    #[test]
    fn highest_priority_is_received_first() {
        let channel: BackpressureChannel<&str> = BackpressureChannel::new(10, 10);
        channel.send("tick", EventPriority::PollTick);
        channel.send("elite", EventPriority::KolBuyElite);
        channel.send("mention", EventPriority::ChatMentionOverQuota);

        assert_eq!(channel.try_recv(), Some("elite"));
        assert_eq!(channel.try_recv(), Some("mention"));
        assert_eq!(channel.try_recv(), Some("tick"));
    }
}
