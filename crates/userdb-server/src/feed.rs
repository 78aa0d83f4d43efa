//! Feed processing: drains the store's change feed into the notifier.

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use userdb_proto::ChangeEvent;

use crate::error::StreamError;
use crate::notify::Notifier;

/// Lifecycle of the feed processor, as reported by the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum FeedState {
    /// Created, not yet consuming.
    Starting,
    /// Forwarding events.
    Streaming,
    /// Stopped by shutdown.
    Stopped,
    /// The upstream failed; no more events will arrive.
    Failed(String),
}

impl FeedState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, FeedState::Starting | FeedState::Streaming)
    }
}

/// Forwards every upstream change to the notifier, one broadcast at a time.
pub struct FeedProcessor<S> {
    source: S,
    notifier: Notifier<ChangeEvent>,
    state: watch::Sender<FeedState>,
    shutdown: CancellationToken,
}

impl<S> FeedProcessor<S>
where
    S: Stream<Item = Result<ChangeEvent, userdb_core::Error>> + Send + Unpin + 'static,
{
    /// Create a new feed processor.
    pub fn new(source: S, notifier: Notifier<ChangeEvent>, shutdown: CancellationToken) -> Self {
        let (state, _) = watch::channel(FeedState::Starting);
        Self {
            source,
            notifier,
            state,
            shutdown,
        }
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Consume the source until it fails or shutdown is requested.
    ///
    /// Sessions are left alone when the upstream fails: they stay open and
    /// simply receive nothing more.
    pub async fn run(mut self) -> Result<(), StreamError> {
        self.state.send_replace(FeedState::Streaming);
        info!("feed processor started");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.state.send_replace(FeedState::Stopped);
                    info!("feed processor stopped");
                    return Ok(());
                }
                next = self.source.next() => next,
            };

            match next {
                Some(Ok(event)) => {
                    debug!(
                        change_type = event.change_type.as_str(),
                        user_id = %event.user.id,
                        "broadcasting change"
                    );
                    let report = self.notifier.broadcast(event).await;
                    if report.evicted > 0 {
                        debug!(evicted = report.evicted, "broadcast evicted subscribers");
                    }
                }
                Some(Err(e)) => return Err(self.fail(e.to_string())),
                None => return Err(self.fail("change feed ended".to_string())),
            }
        }
    }

    fn fail(&self, reason: String) -> StreamError {
        error!(error = %reason, "change source unavailable");
        self.state.send_replace(FeedState::Failed(reason.clone()));
        StreamError::UpstreamUnavailable(reason)
    }
}

/// Spawn a feed processor and return its task and state.
pub fn start_processor<S>(
    source: S,
    notifier: Notifier<ChangeEvent>,
    shutdown: CancellationToken,
) -> (JoinHandle<Result<(), StreamError>>, watch::Receiver<FeedState>)
where
    S: Stream<Item = Result<ChangeEvent, userdb_core::Error>> + Send + Unpin + 'static,
{
    let processor = FeedProcessor::new(source, notifier, shutdown);
    let state = processor.state();
    (tokio::spawn(processor.run()), state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;
    use std::time::Duration;

    use crate::notify::NotifierConfig;

    fn notifier() -> Notifier<ChangeEvent> {
        Notifier::new(NotifierConfig {
            queue_capacity: 10,
            send_timeout: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_forwards_events_in_order() {
        let notifier = notifier();
        let mut queue = notifier.subscribe("watcher").unwrap();
        let (tx, rx) = mpsc::unbounded();
        let shutdown = CancellationToken::new();

        let (task, mut state) = start_processor(rx, notifier.clone(), shutdown.clone());

        for id in ["a", "b", "c"] {
            tx.unbounded_send(Ok(ChangeEvent::delete(id))).unwrap();
        }
        for id in ["a", "b", "c"] {
            assert_eq!(queue.recv().await.unwrap().user.id, id);
        }
        state
            .wait_for(|s| *s == FeedState::Streaming)
            .await
            .unwrap();

        shutdown.cancel();
        assert!(task.await.unwrap().is_ok());
        assert_eq!(*state.borrow(), FeedState::Stopped);
    }

    #[tokio::test]
    async fn test_upstream_error_fails_without_closing_sessions() {
        let notifier = notifier();
        let mut queue = notifier.subscribe("watcher").unwrap();
        let source = stream::iter(vec![
            Ok(ChangeEvent::delete("a")),
            Err(userdb_core::Error::FeedClosed),
            Ok(ChangeEvent::delete("never")),
        ]);

        let processor = FeedProcessor::new(source, notifier.clone(), CancellationToken::new());
        let state = processor.state();
        let err = processor.run().await.unwrap_err();

        assert!(matches!(err, StreamError::UpstreamUnavailable(_)));
        assert!(matches!(*state.borrow(), FeedState::Failed(_)));
        assert!(!state.borrow().is_healthy());

        // The session is still subscribed and got what arrived before the failure.
        assert!(notifier.is_subscribed("watcher"));
        assert_eq!(queue.recv().await.unwrap().user.id, "a");
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_source_end_is_a_failure() {
        let processor = FeedProcessor::new(
            stream::empty::<Result<ChangeEvent, userdb_core::Error>>(),
            notifier(),
            CancellationToken::new(),
        );
        let state = processor.state();

        assert!(processor.run().await.is_err());
        assert_eq!(
            *state.borrow(),
            FeedState::Failed("change feed ended".into())
        );
    }

    #[test]
    fn test_feed_state_json() {
        assert_eq!(
            serde_json::to_value(FeedState::Streaming).unwrap(),
            serde_json::json!({ "state": "streaming" })
        );
        assert_eq!(
            serde_json::to_value(FeedState::Failed("gone".into())).unwrap(),
            serde_json::json!({ "state": "failed", "reason": "gone" })
        );
    }
}
