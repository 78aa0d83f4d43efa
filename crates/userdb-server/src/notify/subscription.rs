//! One subscriber's queue as seen by the registry and by the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Registry entry for one subscriber.
pub(crate) struct SubscriptionEntry<T> {
    /// Producer side of the bounded queue.
    pub(crate) sender: mpsc::Sender<T>,
    /// Cancelled when the subscription is removed or evicted.
    pub(crate) closed: CancellationToken,
    /// Set before `closed` is cancelled when the subscriber fell behind.
    evicted: Arc<AtomicBool>,
    /// When the subscription was created.
    pub(crate) created_at: Instant,
}

impl<T> SubscriptionEntry<T> {
    pub(crate) fn new(id: String, capacity: usize) -> (Self, QueueHandle<T>) {
        let (sender, receiver) = mpsc::channel(capacity);
        let closed = CancellationToken::new();
        let evicted = Arc::new(AtomicBool::new(false));
        let entry = Self {
            sender,
            closed: closed.clone(),
            evicted: evicted.clone(),
            created_at: Instant::now(),
        };
        let handle = QueueHandle {
            id,
            receiver,
            closed,
            evicted,
        };
        (entry, handle)
    }

    /// Close the queue.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    /// Close the queue, marking the subscriber as evicted.
    pub(crate) fn evict(&self) {
        self.evicted.store(true, Ordering::Release);
        self.closed.cancel();
    }

    /// True once the consumer dropped its [`QueueHandle`].
    pub(crate) fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer side of a subscription.
///
/// Once the subscription is removed from the notifier, [`recv`](Self::recv)
/// returns `None` even if events are still buffered: a closed subscription
/// delivers nothing further.
pub struct QueueHandle<T> {
    id: String,
    receiver: mpsc::Receiver<T>,
    closed: CancellationToken,
    evicted: Arc<AtomicBool>,
}

impl<T> QueueHandle<T> {
    /// The subscriber id this queue belongs to.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the next event, or `None` once the subscription is closed.
    ///
    /// Cancel safe: if the future is dropped before completing, no event is
    /// lost.
    pub async fn recv(&mut self) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => None,
            item = self.receiver.recv() => item,
        }
    }

    /// True once the notifier has removed this subscription.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// True when the subscription was closed because its queue stayed full.
    pub fn was_evicted(&self) -> bool {
        self.evicted.load(Ordering::Acquire)
    }

    /// Number of events currently buffered.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl<T> std::fmt::Debug for QueueHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("evicted", &self.was_evicted())
            .finish_non_exhaustive()
    }
}
