//! Subscription router: maps symbols to subscribers and delivers each
//! accepted tick once per interested subscriber under backpressure.
//!
//! The router is the single owner of subscriber records; peers hold only a
//! [`SubscriberHandle`]. Delivery is the hot path: the interest index is
//! read-locked just long enough to collect target ids, and each outbox
//! enqueue is a non-blocking `try_send`/push.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::metrics;
use crate::tick::{SharedTick, SubscriberKind};

/// What happens when a subscriber's outbox is full. Chosen at registration,
/// fixed for the subscriber's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DropPolicy {
    /// Discard the incoming tick for that subscriber only.
    #[default]
    DropNewest,
    /// Keep at most one pending tick per symbol, replaced on arrival.
    CoalesceLatest,
}

/// Why a subscriber was cancelled. WebSocket peers translate this into a
/// close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Peer went away or an in-process caller dropped its subscription.
    Disconnect,
    /// Lagged past the eviction timeout.
    LagEviction,
    /// Engine is shutting down.
    Shutdown,
}

impl CancelReason {
    pub fn close_code(&self) -> u16 {
        match self {
            CancelReason::Disconnect => 1000,
            CancelReason::LagEviction => 4001,
            CancelReason::Shutdown => 4003,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Disconnect => "disconnect",
            CancelReason::LagEviction => "lag_eviction",
            CancelReason::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

enum Interests {
    All,
    Symbols(HashSet<String>),
}

/// State shared between the router-owned record and the peer-held handle.
struct SubscriberShared {
    dropped: AtomicU64,
    lagging: AtomicBool,
    /// Wall-clock ms of the lagging transition; 0 when not lagging.
    lagging_since_ms: AtomicI64,
    /// Set when the peer-held handle is dropped without an explicit cancel;
    /// the router reaps the record on the next publish or sweep.
    detached: AtomicBool,
    cancel_reason: Mutex<Option<CancelReason>>,
}

impl SubscriberShared {
    fn new() -> Self {
        Self {
            dropped: AtomicU64::new(0),
            lagging: AtomicBool::new(false),
            lagging_since_ms: AtomicI64::new(0),
            detached: AtomicBool::new(false),
            cancel_reason: Mutex::new(None),
        }
    }

    fn mark_dropped(&self, kind: SubscriberKind) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        if !self.lagging.swap(true, Ordering::Relaxed) {
            self.lagging_since_ms
                .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
        }
        metrics::inc_dropped_tick(kind);
    }

    fn clear_lagging(&self) {
        if self.lagging.swap(false, Ordering::Relaxed) {
            self.lagging_since_ms.store(0, Ordering::Relaxed);
        }
    }
}

enum Outbox {
    Channel(mpsc::Sender<SharedTick>),
    Coalesce(Arc<CoalesceQueue>),
}

struct Subscriber {
    id: SubscriberId,
    kind: SubscriberKind,
    interests: Interests,
    outbox: Outbox,
    shared: Arc<SubscriberShared>,
}

impl Subscriber {
    /// Returns false when the receiving handle is gone and the record
    /// should be reaped.
    fn enqueue(&self, tick: SharedTick) -> bool {
        if self.shared.detached.load(Ordering::Relaxed) {
            return false;
        }
        match &self.outbox {
            Outbox::Channel(tx) => match tx.try_send(tick) {
                Ok(()) => self.shared.clear_lagging(),
                Err(mpsc::error::TrySendError::Full(_)) => self.shared.mark_dropped(self.kind),
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            },
            Outbox::Coalesce(q) => match q.push(tick) {
                CoalescePush::Queued => self.shared.clear_lagging(),
                CoalescePush::Replaced => {}
                CoalescePush::Full => self.shared.mark_dropped(self.kind),
                CoalescePush::Closed => {}
            },
        }
        true
    }

    fn close_outbox(&self) {
        if let Outbox::Coalesce(q) = &self.outbox {
            q.close();
        }
        // Channel senders close by being dropped with the record.
    }
}

enum CoalescePush {
    Queued,
    Replaced,
    Full,
    Closed,
}

struct CoalesceInner {
    order: VecDeque<String>,
    pending: HashMap<String, SharedTick>,
    closed: bool,
}

/// Bounded queue with at most one pending tick per symbol, replaced in
/// place on arrival. Capacity bounds the number of distinct pending
/// symbols.
struct CoalesceQueue {
    inner: Mutex<CoalesceInner>,
    notify: Notify,
    capacity: usize,
}

impl CoalesceQueue {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CoalesceInner {
                order: VecDeque::new(),
                pending: HashMap::new(),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn push(&self, tick: SharedTick) -> CoalescePush {
        let mut inner = self.inner.lock().expect("coalesce queue lock poisoned");
        if inner.closed {
            return CoalescePush::Closed;
        }
        if inner.pending.contains_key(&tick.symbol) {
            inner.pending.insert(tick.symbol.clone(), tick);
            self.notify.notify_one();
            return CoalescePush::Replaced;
        }
        if inner.order.len() >= self.capacity {
            return CoalescePush::Full;
        }
        inner.order.push_back(tick.symbol.clone());
        inner.pending.insert(tick.symbol.clone(), tick);
        self.notify.notify_one();
        CoalescePush::Queued
    }

    async fn pop(&self) -> Option<SharedTick> {
        loop {
            // Arm the waiter before checking so a push between the check and
            // the await cannot be missed.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().expect("coalesce queue lock poisoned");
                if let Some(symbol) = inner.order.pop_front() {
                    return inner.pending.remove(&symbol);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    fn try_pop(&self) -> Option<SharedTick> {
        let mut inner = self.inner.lock().expect("coalesce queue lock poisoned");
        let symbol = inner.order.pop_front()?;
        inner.pending.remove(&symbol)
    }

    fn close(&self) {
        let mut inner = self.inner.lock().expect("coalesce queue lock poisoned");
        inner.closed = true;
        self.notify.notify_waiters();
    }
}

#[derive(Default)]
struct InterestIndex {
    by_symbol: HashMap<String, HashSet<u64>>,
    all: HashSet<u64>,
}

pub struct Router {
    next_id: AtomicU64,
    index: RwLock<InterestIndex>,
    subscribers: DashMap<u64, Subscriber>,
    outbox_capacity: usize,
}

impl Router {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            index: RwLock::new(InterestIndex::default()),
            subscribers: DashMap::new(),
            outbox_capacity,
        }
    }

    /// Register a subscriber with no interests and an empty outbox of the
    /// router's default capacity.
    pub fn register(&self, kind: SubscriberKind, policy: DropPolicy) -> SubscriberHandle {
        self.register_with_capacity(kind, policy, self.outbox_capacity)
    }

    pub fn register_with_capacity(
        &self,
        kind: SubscriberKind,
        policy: DropPolicy,
        capacity: usize,
    ) -> SubscriberHandle {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let shared = Arc::new(SubscriberShared::new());

        let (outbox, receiver) = match policy {
            DropPolicy::DropNewest => {
                let (tx, rx) = mpsc::channel(capacity);
                (Outbox::Channel(tx), OutboxReceiver::Channel(rx))
            }
            DropPolicy::CoalesceLatest => {
                let queue = Arc::new(CoalesceQueue::new(capacity));
                (
                    Outbox::Coalesce(Arc::clone(&queue)),
                    OutboxReceiver::Coalesce(queue),
                )
            }
        };

        self.subscribers.insert(
            id.0,
            Subscriber {
                id,
                kind,
                interests: Interests::Symbols(HashSet::new()),
                outbox,
                shared: Arc::clone(&shared),
            },
        );
        metrics::inc_subscribers(kind);
        tracing::debug!(subscriber = %id, kind = kind.as_str(), ?policy, "subscriber registered");

        SubscriberHandle {
            id,
            kind,
            shared,
            receiver,
        }
    }

    /// Add interest in one symbol. Idempotent; returns false for an unknown
    /// subscriber.
    pub fn subscribe(&self, id: SubscriberId, symbol: &str) -> bool {
        let mut index = self.index.write().expect("interest index lock poisoned");
        let Some(mut sub) = self.subscribers.get_mut(&id.0) else {
            return false;
        };
        match &mut sub.interests {
            // ALL already covers every symbol.
            Interests::All => true,
            Interests::Symbols(set) => {
                if set.insert(symbol.to_string()) {
                    index
                        .by_symbol
                        .entry(symbol.to_string())
                        .or_default()
                        .insert(id.0);
                }
                true
            }
        }
    }

    /// Remove interest in one symbol. A no-op (not an error) when the
    /// subscriber never held that interest.
    pub fn unsubscribe(&self, id: SubscriberId, symbol: &str) -> bool {
        let mut index = self.index.write().expect("interest index lock poisoned");
        let Some(mut sub) = self.subscribers.get_mut(&id.0) else {
            return false;
        };
        if let Interests::Symbols(set) = &mut sub.interests {
            if set.remove(symbol) {
                if let Some(ids) = index.by_symbol.get_mut(symbol) {
                    ids.remove(&id.0);
                    if ids.is_empty() {
                        index.by_symbol.remove(symbol);
                    }
                }
            }
        }
        true
    }

    /// Switch the subscriber to ALL interests. Its per-symbol entries are
    /// retired so no tick is ever delivered twice.
    pub fn subscribe_all(&self, id: SubscriberId) -> bool {
        let mut index = self.index.write().expect("interest index lock poisoned");
        let Some(mut sub) = self.subscribers.get_mut(&id.0) else {
            return false;
        };
        if let Interests::Symbols(set) = &sub.interests {
            for symbol in set {
                if let Some(ids) = index.by_symbol.get_mut(symbol) {
                    ids.remove(&id.0);
                    if ids.is_empty() {
                        index.by_symbol.remove(symbol);
                    }
                }
            }
        }
        sub.interests = Interests::All;
        index.all.insert(id.0);
        true
    }

    /// Deliver one accepted tick to every interested subscriber.
    pub fn publish(&self, tick: &SharedTick) {
        // Collect ids under the read lock, enqueue outside it.
        let targets: Vec<u64> = {
            let index = self.index.read().expect("interest index lock poisoned");
            let symbol_ids = index.by_symbol.get(&tick.symbol);
            index
                .all
                .iter()
                .chain(symbol_ids.into_iter().flatten())
                .copied()
                .collect()
        };

        let mut stale = Vec::new();
        for target in targets {
            if let Some(sub) = self.subscribers.get(&target) {
                if !sub.enqueue(Arc::clone(tick)) {
                    stale.push(target);
                }
            }
        }
        // Dashmap refs are released; now the stale records can come out.
        for target in stale {
            self.cancel(SubscriberId(target), CancelReason::Disconnect);
        }
    }

    /// Cancel a subscriber. Cost is bounded by its own interest set; the
    /// symbol universe is never scanned. Safe to call twice.
    pub fn cancel(&self, id: SubscriberId, reason: CancelReason) -> bool {
        let Some((_, sub)) = self.subscribers.remove(&id.0) else {
            return false;
        };
        {
            let mut index = self.index.write().expect("interest index lock poisoned");
            match &sub.interests {
                Interests::All => {
                    index.all.remove(&id.0);
                }
                Interests::Symbols(set) => {
                    for symbol in set {
                        if let Some(ids) = index.by_symbol.get_mut(symbol) {
                            ids.remove(&id.0);
                            if ids.is_empty() {
                                index.by_symbol.remove(symbol);
                            }
                        }
                    }
                }
            }
        }
        *sub.shared
            .cancel_reason
            .lock()
            .expect("cancel reason lock poisoned") = Some(reason);
        sub.close_outbox();
        metrics::dec_subscribers(sub.kind);
        if reason == CancelReason::LagEviction {
            metrics::inc_eviction(sub.kind);
        }
        tracing::debug!(subscriber = %id, reason = reason.as_str(), "subscriber cancelled");
        // Dropping the record here drops the channel sender, which wakes the
        // handle with end-of-stream.
        true
    }

    /// Cancel every subscriber, e.g. at shutdown.
    pub fn cancel_all(&self, reason: CancelReason) {
        let ids: Vec<u64> = self.subscribers.iter().map(|s| s.id.0).collect();
        for id in ids {
            self.cancel(SubscriberId(id), reason);
        }
    }

    /// Evict subscribers that have been lagging longer than `timeout`, and
    /// reap records whose handle was dropped without an explicit cancel.
    /// Called periodically by the engine's sweeper task. Returns the number
    /// of lag evictions.
    pub fn evict_lagging(&self, timeout: Duration) -> usize {
        let now = chrono::Utc::now().timestamp_millis();
        let cutoff = timeout.as_millis() as i64;
        let mut expired = Vec::new();
        let mut detached = Vec::new();
        for sub in self.subscribers.iter() {
            if sub.shared.detached.load(Ordering::Relaxed) {
                detached.push(sub.id);
                continue;
            }
            let since = sub.shared.lagging_since_ms.load(Ordering::Relaxed);
            if since > 0 && now - since >= cutoff {
                expired.push(sub.id);
            }
        }

        for id in detached {
            self.cancel(id, CancelReason::Disconnect);
        }
        let count = expired.len();
        for id in expired {
            tracing::warn!(subscriber = %id, "evicting lagging subscriber");
            self.cancel(id, CancelReason::LagEviction);
        }
        count
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

enum OutboxReceiver {
    Channel(mpsc::Receiver<SharedTick>),
    Coalesce(Arc<CoalesceQueue>),
}

/// The peer-facing half of a subscription. Dropping the handle discards any
/// undelivered outbox items, so a disconnect completes even when the outbox
/// is full; the router reaps the orphaned record on the next publish or
/// sweep.
pub struct SubscriberHandle {
    id: SubscriberId,
    kind: SubscriberKind,
    shared: Arc<SubscriberShared>,
    receiver: OutboxReceiver,
}

impl SubscriberHandle {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn kind(&self) -> SubscriberKind {
        self.kind
    }

    /// Receive the next tick; `None` means the subscription was cancelled
    /// (see [`SubscriberHandle::cancel_reason`]) and the outbox is drained.
    pub async fn recv(&mut self) -> Option<SharedTick> {
        match &mut self.receiver {
            OutboxReceiver::Channel(rx) => rx.recv().await,
            OutboxReceiver::Coalesce(q) => q.pop().await,
        }
    }

    /// Non-blocking receive, mainly for tests and polling consumers.
    pub fn try_recv(&mut self) -> Option<SharedTick> {
        match &mut self.receiver {
            OutboxReceiver::Channel(rx) => rx.try_recv().ok(),
            OutboxReceiver::Coalesce(q) => q.try_pop(),
        }
    }

    /// Ticks discarded for this subscriber under backpressure.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn is_lagging(&self) -> bool {
        self.shared.lagging.load(Ordering::Relaxed)
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        *self
            .shared
            .cancel_reason
            .lock()
            .expect("cancel reason lock poisoned")
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.shared.detached.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::Tick;

    fn tick(symbol: &str, price: f64, seq: u64) -> SharedTick {
        Arc::new(Tick {
            symbol: symbol.to_string(),
            name: String::new(),
            last_price: price,
            change_percent: 0.0,
            volume: 0.0,
            amount: 0.0,
            upstream_time: String::new(),
            ingest_seq: seq,
            ingest_time_ms: seq as i64,
            raw: String::new(),
        })
    }

    #[tokio::test]
    async fn test_two_subscribers_same_symbol_fifo() {
        let router = Router::new(16);
        let mut a = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        let mut b = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        router.subscribe(a.id(), "SZ000001");
        router.subscribe(b.id(), "SZ000001");

        for (i, price) in [10.0, 10.1, 10.2].iter().enumerate() {
            router.publish(&tick("SZ000001", *price, i as u64 + 1));
        }

        for handle in [&mut a, &mut b] {
            let prices: Vec<f64> = (0..3).map(|_| handle.try_recv().unwrap().last_price).collect();
            assert_eq!(prices, vec![10.0, 10.1, 10.2]);
            assert!(handle.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_drop_newest_on_full_outbox() {
        let router = Router::new(16);
        let mut sub =
            router.register_with_capacity(SubscriberKind::Local, DropPolicy::DropNewest, 1);
        router.subscribe(sub.id(), "SH600000");

        router.publish(&tick("SH600000", 10.0, 1));
        router.publish(&tick("SH600000", 10.1, 2));
        router.publish(&tick("SH600000", 10.2, 3));

        assert_eq!(sub.try_recv().unwrap().last_price, 10.0);
        assert!(sub.try_recv().is_none());
        assert_eq!(sub.dropped(), 2);
        assert!(sub.is_lagging());
    }

    #[tokio::test]
    async fn test_lagging_clears_after_drain() {
        let router = Router::new(16);
        let mut sub =
            router.register_with_capacity(SubscriberKind::Local, DropPolicy::DropNewest, 1);
        router.subscribe(sub.id(), "SH600000");

        router.publish(&tick("SH600000", 10.0, 1));
        router.publish(&tick("SH600000", 10.1, 2));
        assert!(sub.is_lagging());

        sub.try_recv();
        router.publish(&tick("SH600000", 10.2, 3));
        assert!(!sub.is_lagging());
        assert_eq!(sub.try_recv().unwrap().last_price, 10.2);
    }

    #[tokio::test]
    async fn test_coalesce_latest_replaces_per_symbol() {
        let router = Router::new(16);
        let mut sub =
            router.register_with_capacity(SubscriberKind::Local, DropPolicy::CoalesceLatest, 8);
        router.subscribe_all(sub.id());

        router.publish(&tick("SH600000", 10.0, 1));
        router.publish(&tick("SZ300750", 200.0, 2));
        router.publish(&tick("SH600000", 10.5, 3));

        // First-arrival order per symbol, latest value per symbol.
        let first = sub.try_recv().unwrap();
        assert_eq!(first.symbol, "SH600000");
        assert_eq!(first.last_price, 10.5);
        let second = sub.try_recv().unwrap();
        assert_eq!(second.symbol, "SZ300750");
        assert!(sub.try_recv().is_none());
        assert_eq!(sub.dropped(), 0);
    }

    #[tokio::test]
    async fn test_coalesce_full_on_distinct_symbols() {
        let router = Router::new(16);
        let mut sub =
            router.register_with_capacity(SubscriberKind::Local, DropPolicy::CoalesceLatest, 2);
        router.subscribe_all(sub.id());

        router.publish(&tick("SH600000", 1.0, 1));
        router.publish(&tick("SH600001", 2.0, 2));
        router.publish(&tick("SH600002", 3.0, 3));

        assert_eq!(sub.dropped(), 1);
        assert!(sub.is_lagging());
        assert_eq!(sub.try_recv().unwrap().symbol, "SH600000");
        assert_eq!(sub.try_recv().unwrap().symbol, "SH600001");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_subscribe_is_idempotent() {
        let router = Router::new(16);
        let mut sub = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        router.subscribe(sub.id(), "SH600000");
        router.subscribe(sub.id(), "SH600000");

        router.publish(&tick("SH600000", 10.0, 1));
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none(), "no duplicate delivery");
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_symbol_is_noop() {
        let router = Router::new(16);
        let sub = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        assert!(router.unsubscribe(sub.id(), "SH600000"));
    }

    #[tokio::test]
    async fn test_all_subscriber_no_duplicates_with_symbol_interest() {
        let router = Router::new(16);
        let mut sub = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        router.subscribe(sub.id(), "SH600000");
        router.subscribe_all(sub.id());

        router.publish(&tick("SH600000", 10.0, 1));
        assert!(sub.try_recv().is_some());
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_all_subscriber_then_cancel() {
        let router = Router::new(16);
        let ws_before = metrics::subscriber_count(SubscriberKind::WebSocket);
        let mut sub = router.register(SubscriberKind::WebSocket, DropPolicy::DropNewest);
        router.subscribe_all(sub.id());

        for (i, symbol) in ["SH600000", "SH600519", "SZ300750", "SZ002594", "SH601318"]
            .iter()
            .enumerate()
        {
            router.publish(&tick(symbol, 1.0, i as u64 + 1));
        }
        for _ in 0..5 {
            assert!(sub.try_recv().is_some());
        }

        assert!(router.cancel(sub.id(), CancelReason::Disconnect));
        assert_eq!(
            metrics::subscriber_count(SubscriberKind::WebSocket),
            ws_before
        );

        // Further publishes find no trace of the cancelled subscriber.
        router.publish(&tick("SH600000", 2.0, 10));
        assert!(sub.try_recv().is_none());
        assert_eq!(sub.cancel_reason(), Some(CancelReason::Disconnect));
        assert_eq!(router.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_twice_is_safe() {
        let router = Router::new(16);
        let sub = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        assert!(router.cancel(sub.id(), CancelReason::Disconnect));
        assert!(!router.cancel(sub.id(), CancelReason::Disconnect));
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_cancel() {
        let router = Router::new(16);
        let mut sub = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        router.subscribe(sub.id(), "SH600000");
        router.publish(&tick("SH600000", 10.0, 1));
        router.cancel(sub.id(), CancelReason::Shutdown);

        // Buffered item is still delivered, then end-of-stream.
        assert!(sub.recv().await.is_some());
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.cancel_reason(), Some(CancelReason::Shutdown));
    }

    #[tokio::test]
    async fn test_coalesce_recv_returns_none_after_cancel() {
        let router = Router::new(16);
        let mut sub = router.register(SubscriberKind::Local, DropPolicy::CoalesceLatest);
        router.cancel(sub.id(), CancelReason::Shutdown);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_evict_lagging_after_timeout() {
        let router = Router::new(16);
        let sub =
            router.register_with_capacity(SubscriberKind::Local, DropPolicy::DropNewest, 1);
        router.subscribe(sub.id(), "SH600000");

        router.publish(&tick("SH600000", 10.0, 1));
        router.publish(&tick("SH600000", 10.1, 2));
        assert!(sub.is_lagging());

        // Not yet past the timeout.
        assert_eq!(router.evict_lagging(Duration::from_secs(60)), 0);

        // Zero timeout: anything lagging is overdue.
        assert_eq!(router.evict_lagging(Duration::ZERO), 1);
        assert_eq!(sub.cancel_reason(), Some(CancelReason::LagEviction));
        assert_eq!(router.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_handle_is_reaped_on_publish() {
        let router = Router::new(16);
        let sub = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        router.subscribe(sub.id(), "SH600000");
        drop(sub);

        router.publish(&tick("SH600000", 10.0, 1));
        assert_eq!(router.subscriber_count(), 0, "record must not outlive its handle");
    }

    #[tokio::test]
    async fn test_dropped_handle_is_reaped_by_sweep() {
        let router = Router::new(16);
        let sub = router.register(SubscriberKind::Local, DropPolicy::CoalesceLatest);
        router.subscribe(sub.id(), "SH600000");
        drop(sub);

        // Reaping an orphan is a disconnect, not a lag eviction.
        assert_eq!(router.evict_lagging(Duration::from_secs(60)), 0);
        assert_eq!(router.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_uninterested_subscriber_receives_nothing() {
        let router = Router::new(16);
        let mut a = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        let mut b = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        router.subscribe(a.id(), "SH600000");
        router.subscribe(b.id(), "SZ300750");

        router.publish(&tick("SH600000", 10.0, 1));
        assert!(a.try_recv().is_some());
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_cancel_all_for_shutdown() {
        let router = Router::new(16);
        let a = router.register(SubscriberKind::WebSocket, DropPolicy::DropNewest);
        let b = router.register(SubscriberKind::Local, DropPolicy::DropNewest);
        router.cancel_all(CancelReason::Shutdown);
        assert_eq!(router.subscriber_count(), 0);
        assert_eq!(a.cancel_reason(), Some(CancelReason::Shutdown));
        assert_eq!(b.cancel_reason(), Some(CancelReason::Shutdown));
    }
}
