//! Fan-out of change events to many independent subscribers.
//!
//! Every subscriber owns a bounded queue. [`Notifier::broadcast`] pushes each
//! event into every queue; a subscriber whose queue stays full for longer
//! than the configured send timeout is evicted, so one stalled client can
//! delay the producer by at most one timeout per broadcast.

mod subscription;

pub use subscription::QueueHandle;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{DEFAULT_QUEUE_CAPACITY, DEFAULT_SEND_TIMEOUT_MS};
use crate::error::StreamError;
use subscription::SubscriptionEntry;

/// Notifier tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifierConfig {
    /// Capacity of each subscriber queue.
    pub queue_capacity: usize,
    /// How long a broadcast waits on a full queue before evicting it.
    pub send_timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
        }
    }
}

/// Delivery counters since the notifier was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifierStats {
    /// Broadcast calls.
    pub broadcasts: u64,
    /// Events placed into a subscriber queue.
    pub delivered: u64,
    /// Subscribers dropped for staying full past the send timeout.
    pub evicted: u64,
    /// Deliveries skipped because the subscriber was already closing.
    pub skipped: u64,
    /// Subscribers removed because their consumer dropped its queue.
    pub abandoned: u64,
}

#[derive(Default)]
struct StatsCounters {
    broadcasts: AtomicU64,
    delivered: AtomicU64,
    evicted: AtomicU64,
    skipped: AtomicU64,
    abandoned: AtomicU64,
}

/// What happened to one event for one subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// The event is in the queue.
    Delivered,
    /// The queue stayed full for the whole send timeout.
    TimedOut,
    /// The subscription was closed while waiting.
    Closed,
    /// The consumer dropped its queue handle.
    Abandoned,
}

/// Per-call summary returned by [`Notifier::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub evicted: usize,
    pub skipped: usize,
    pub abandoned: usize,
}

struct Inner<T> {
    subscribers: Mutex<HashMap<String, SubscriptionEntry<T>>>,
    config: NotifierConfig,
    stats: StatsCounters,
}

/// Registry of subscribers and broadcaster of events.
///
/// Cheap to clone; clones share the same registry.
pub struct Notifier<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Notifier<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Default for Notifier<T> {
    fn default() -> Self {
        Self::new(NotifierConfig::default())
    }
}

impl<T: Clone + Send + 'static> Notifier<T> {
    /// Create a notifier with the given tuning.
    pub fn new(config: NotifierConfig) -> Self {
        let config = NotifierConfig {
            queue_capacity: config.queue_capacity.max(1),
            ..config
        };

        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                config,
                stats: StatsCounters::default(),
            }),
        }
    }

    /// The effective configuration.
    pub fn config(&self) -> NotifierConfig {
        self.inner.config
    }

    /// Register a subscriber under the given id.
    ///
    /// Entries whose queue handle was dropped are removed first, so their ids
    /// can be reused.
    pub fn subscribe(&self, id: impl Into<String>) -> Result<QueueHandle<T>, StreamError> {
        let id = id.into();
        let mut subscribers = self.inner.subscribers.lock();

        let before = subscribers.len();
        subscribers.retain(|_, entry| !entry.is_abandoned());
        let abandoned = before - subscribers.len();
        if abandoned > 0 {
            self.inner
                .stats
                .abandoned
                .fetch_add(abandoned as u64, Ordering::Relaxed);
            tracing::debug!(count = abandoned, "removed abandoned subscriptions");
        }

        if subscribers.contains_key(&id) {
            return Err(StreamError::DuplicateSubscriber(id));
        }

        let (entry, handle) = SubscriptionEntry::new(id.clone(), self.inner.config.queue_capacity);
        subscribers.insert(id.clone(), entry);
        tracing::debug!(subscriber_id = %id, "subscription created");

        Ok(handle)
    }

    /// Register a subscriber under a freshly minted random id.
    pub fn subscribe_fresh(&self) -> Result<QueueHandle<T>, StreamError> {
        self.subscribe(Uuid::new_v4().to_string())
    }

    /// Remove a subscriber and close its queue.
    ///
    /// Unknown ids are ignored. Returns whether a subscription was removed.
    pub fn unsubscribe(&self, id: &str) -> bool {
        let entry = self.inner.subscribers.lock().remove(id);

        match entry {
            Some(entry) => {
                entry.close();
                tracing::debug!(
                    subscriber_id = %id,
                    lifetime_ms = entry.created_at.elapsed().as_millis() as u64,
                    "subscription removed"
                );
                true
            }
            None => false,
        }
    }

    /// Deliver an event to every current subscriber.
    ///
    /// Full queues are waited on concurrently for up to the send timeout;
    /// those still full afterwards are evicted. Subscribers whose queue handle
    /// was dropped are removed. Callers must await one broadcast before
    /// starting the next to keep per-subscriber order.
    pub async fn broadcast(&self, event: T) -> BroadcastReport {
        self.inner.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<(String, mpsc::Sender<T>, CancellationToken)> = {
            let subscribers = self.inner.subscribers.lock();
            subscribers
                .iter()
                .map(|(id, entry)| (id.clone(), entry.sender.clone(), entry.closed.clone()))
                .collect()
        };

        let mut report = BroadcastReport::default();
        let mut stalled = Vec::new();

        for (id, sender, closed) in targets {
            if closed.is_cancelled() {
                report.skipped += 1;
                continue;
            }
            match sender.try_send(event.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(event)) => stalled.push((id, sender, closed, event)),
                Err(TrySendError::Closed(_)) => {
                    if self.remove_abandoned(&id, &sender) {
                        report.abandoned += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
            }
        }

        if !stalled.is_empty() {
            let send_timeout = self.inner.config.send_timeout;
            let waits = stalled.into_iter().map(|(id, sender, closed, event)| async move {
                let delivery = deliver_within(&sender, &closed, event, send_timeout).await;
                (id, sender, delivery)
            });

            for (id, sender, delivery) in join_all(waits).await {
                match delivery {
                    Delivery::Delivered => report.delivered += 1,
                    Delivery::Closed => report.skipped += 1,
                    Delivery::Abandoned => {
                        if self.remove_abandoned(&id, &sender) {
                            report.abandoned += 1;
                        } else {
                            report.skipped += 1;
                        }
                    }
                    Delivery::TimedOut => {
                        if self.evict(&id, &sender) {
                            report.evicted += 1;
                        } else {
                            report.skipped += 1;
                        }
                    }
                }
            }
        }

        let stats = &self.inner.stats;
        stats.delivered.fetch_add(report.delivered as u64, Ordering::Relaxed);
        stats.evicted.fetch_add(report.evicted as u64, Ordering::Relaxed);
        stats.skipped.fetch_add(report.skipped as u64, Ordering::Relaxed);
        stats.abandoned.fetch_add(report.abandoned as u64, Ordering::Relaxed);

        report
    }

    /// Close every subscription.
    pub fn close_all(&self) {
        let drained: Vec<(String, SubscriptionEntry<T>)> =
            self.inner.subscribers.lock().drain().collect();

        for (_, entry) in &drained {
            entry.close();
        }
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "closed all subscriptions");
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// Check whether a subscriber is registered.
    pub fn is_subscribed(&self, id: &str) -> bool {
        self.inner.subscribers.lock().contains_key(id)
    }

    /// Snapshot of the delivery counters.
    pub fn stats(&self) -> NotifierStats {
        let stats = &self.inner.stats;
        NotifierStats {
            broadcasts: stats.broadcasts.load(Ordering::Relaxed),
            delivered: stats.delivered.load(Ordering::Relaxed),
            evicted: stats.evicted.load(Ordering::Relaxed),
            skipped: stats.skipped.load(Ordering::Relaxed),
            abandoned: stats.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Remove a stalled subscriber, unless it was replaced in the meantime.
    fn evict(&self, id: &str, sender: &mpsc::Sender<T>) -> bool {
        let Some(entry) = self.remove_if_current(id, sender) else {
            return false;
        };
        entry.evict();

        tracing::warn!(subscriber_id = %id, "evicted subscriber with a full queue");
        true
    }

    /// Remove a subscriber whose queue handle was dropped.
    fn remove_abandoned(&self, id: &str, sender: &mpsc::Sender<T>) -> bool {
        let Some(entry) = self.remove_if_current(id, sender) else {
            return false;
        };
        entry.close();

        tracing::debug!(subscriber_id = %id, "removed abandoned subscription");
        true
    }

    /// Remove the entry for `id` if it still owns the channel behind `sender`.
    fn remove_if_current(
        &self,
        id: &str,
        sender: &mpsc::Sender<T>,
    ) -> Option<SubscriptionEntry<T>> {
        let mut subscribers = self.inner.subscribers.lock();
        let current = subscribers
            .get(id)
            .is_some_and(|entry| entry.sender.same_channel(sender));
        if current {
            subscribers.remove(id)
        } else {
            None
        }
    }
}

/// Wait for queue space, giving up on timeout or when the subscriber closes.
async fn deliver_within<T>(
    sender: &mpsc::Sender<T>,
    closed: &CancellationToken,
    event: T,
    send_timeout: Duration,
) -> Delivery {
    tokio::select! {
        _ = closed.cancelled() => Delivery::Closed,
        sent = tokio::time::timeout(send_timeout, sender.send(event)) => match sent {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(_)) => Delivery::Abandoned,
            Err(_) => Delivery::TimedOut,
        },
    }
}
