//! Watch sessions: one client stream bound to one notifier subscription.
//!
//! A [`WatchSession`] subscribes when it starts and unsubscribes when it is
//! dropped, whatever the exit path. While streaming, each step races the
//! transport's done signal against the next queued event, favouring the done
//! signal so a departed client is never written to.

pub mod ws;

use std::future::Future;

use tracing::{debug, info, warn};
use userdb_proto::{ChangeEvent, WatchFrame};

use crate::error::StreamError;
use crate::notify::{Notifier, QueueHandle};

/// Why a transport's done signal fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DoneReason {
    /// Client hung up or the server is shutting down.
    Canceled,
    /// The connection broke.
    Failed(String),
}

/// Failure to write a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer is gone.
    Closed,
    /// The write failed for another reason.
    Failed(String),
}

/// Per-client outbound channel.
///
/// `done` must be cancel safe: it is raced against the queue on every step
/// and dropped when an event wins.
pub trait WatchTransport: Send {
    /// Write one frame to the client.
    fn send(
        &mut self,
        frame: WatchFrame,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Resolve once the client is gone or the stream must stop.
    fn done(&mut self) -> impl Future<Output = DoneReason> + Send;
}

/// Why a session ended normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// The client cancelled the stream.
    ClientCanceled,
    /// The client connection broke. Logged, not propagated.
    ClientError(String),
    /// The notifier closed the subscription.
    SubscriptionClosed,
    /// The notifier evicted the subscription because its queue stayed full.
    Evicted,
    /// A send found the peer already gone.
    TransportClosed,
}

/// Final result of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Closed(CloseCause),
    SendFailed(String),
}

impl WatchOutcome {
    /// Only a failed send is an error for the caller.
    pub fn into_result(self) -> Result<(), StreamError> {
        match self {
            WatchOutcome::Closed(_) => Ok(()),
            WatchOutcome::SendFailed(reason) => Err(StreamError::TransportSendFailed(reason)),
        }
    }
}

/// Result of one streaming step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A frame was written; keep going.
    Continue,
    /// The session is over.
    Done(WatchOutcome),
}

enum Next {
    Done(DoneReason),
    Event(Option<ChangeEvent>),
}

/// Unsubscribes when dropped.
struct Unsubscribe {
    notifier: Notifier<ChangeEvent>,
    id: String,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.notifier.unsubscribe(&self.id);
    }
}

/// A live watch stream.
pub struct WatchSession {
    queue: QueueHandle<ChangeEvent>,
    seq: u64,
    _unsubscribe: Unsubscribe,
}

impl WatchSession {
    /// Subscribe under a fresh id.
    pub fn start(notifier: &Notifier<ChangeEvent>) -> Result<Self, StreamError> {
        let queue = notifier.subscribe_fresh()?;
        let unsubscribe = Unsubscribe {
            notifier: notifier.clone(),
            id: queue.id().to_string(),
        };
        info!(subscriber_id = %queue.id(), "watch session started");

        Ok(Self {
            queue,
            seq: 0,
            _unsubscribe: unsubscribe,
        })
    }

    /// The subscriber id of this session.
    pub fn id(&self) -> &str {
        self.queue.id()
    }

    /// Wait for the next event or the end of the stream, and forward it.
    pub async fn step<Tr: WatchTransport>(&mut self, transport: &mut Tr) -> Step {
        let next = tokio::select! {
            biased;
            reason = transport.done() => Next::Done(reason),
            event = self.queue.recv() => Next::Event(event),
        };

        match next {
            Next::Done(DoneReason::Canceled) => {
                Step::Done(WatchOutcome::Closed(CloseCause::ClientCanceled))
            }
            Next::Done(DoneReason::Failed(reason)) => {
                Step::Done(WatchOutcome::Closed(CloseCause::ClientError(reason)))
            }
            Next::Event(None) if self.queue.was_evicted() => {
                Step::Done(WatchOutcome::Closed(CloseCause::Evicted))
            }
            Next::Event(None) => Step::Done(WatchOutcome::Closed(CloseCause::SubscriptionClosed)),
            Next::Event(Some(event)) => {
                let frame = WatchFrame::new(self.seq + 1, &event);
                match transport.send(frame).await {
                    Ok(()) => {
                        self.seq += 1;
                        Step::Continue
                    }
                    Err(TransportError::Closed) => {
                        Step::Done(WatchOutcome::Closed(CloseCause::TransportClosed))
                    }
                    Err(TransportError::Failed(reason)) => {
                        Step::Done(WatchOutcome::SendFailed(reason))
                    }
                }
            }
        }
    }

    /// Stream until the session ends, then unsubscribe.
    pub async fn run<Tr: WatchTransport>(mut self, transport: &mut Tr) -> WatchOutcome {
        let outcome = loop {
            if let Step::Done(outcome) = self.step(transport).await {
                break outcome;
            }
        };

        let id = self.id();
        let frames = self.seq;
        match &outcome {
            WatchOutcome::Closed(CloseCause::ClientCanceled) => {
                info!(subscriber_id = %id, frames, "client disconnected");
            }
            WatchOutcome::Closed(CloseCause::ClientError(e)) => {
                warn!(subscriber_id = %id, frames, error = %e, "client disconnected with error");
            }
            WatchOutcome::Closed(CloseCause::SubscriptionClosed) => {
                info!(subscriber_id = %id, frames, "subscription closed");
            }
            WatchOutcome::Closed(CloseCause::Evicted) => {
                warn!(subscriber_id = %id, frames, "subscriber fell behind and was evicted");
            }
            WatchOutcome::Closed(CloseCause::TransportClosed) => {
                debug!(subscriber_id = %id, frames, "transport closed during send");
            }
            WatchOutcome::SendFailed(e) => {
                warn!(subscriber_id = %id, frames, error = %e, "failed to send change");
            }
        }

        outcome
    }
}

/// Run a complete watch over `transport`.
pub async fn watch<Tr: WatchTransport>(
    notifier: &Notifier<ChangeEvent>,
    transport: &mut Tr,
) -> Result<WatchOutcome, StreamError> {
    let session = WatchSession::start(notifier)?;
    Ok(session.run(transport).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::sync::{mpsc, watch as signal};
    use userdb_proto::ChangeType;

    use crate::notify::NotifierConfig;

    /// In-memory transport: frames go to a channel, `done` follows a flag.
    struct MockTransport {
        frames: mpsc::UnboundedSender<WatchFrame>,
        done: signal::Receiver<Option<DoneReason>>,
        fail_sends: Option<TransportError>,
    }

    struct MockClient {
        frames: mpsc::UnboundedReceiver<WatchFrame>,
        done: signal::Sender<Option<DoneReason>>,
    }

    fn mock() -> (MockTransport, MockClient) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = signal::channel(None);
        (
            MockTransport {
                frames: frames_tx,
                done: done_rx,
                fail_sends: None,
            },
            MockClient {
                frames: frames_rx,
                done: done_tx,
            },
        )
    }

    impl WatchTransport for MockTransport {
        async fn send(&mut self, frame: WatchFrame) -> Result<(), TransportError> {
            if let Some(err) = self.fail_sends.clone() {
                return Err(err);
            }
            self.frames.send(frame).map_err(|_| TransportError::Closed)
        }

        async fn done(&mut self) -> DoneReason {
            match self.done.wait_for(|reason| reason.is_some()).await {
                Ok(reason) => reason.clone().unwrap_or(DoneReason::Canceled),
                Err(_) => DoneReason::Canceled,
            }
        }
    }

    fn notifier() -> Notifier<ChangeEvent> {
        Notifier::new(NotifierConfig {
            queue_capacity: 10,
            send_timeout: Duration::from_millis(50),
        })
    }

    fn event(n: u32) -> ChangeEvent {
        ChangeEvent::delete(n.to_string())
    }

    async fn wait_until_subscribed(notifier: &Notifier<ChangeEvent>, count: usize) {
        for _ in 0..200 {
            if notifier.subscriber_count() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {count} subscribers");
    }

    #[tokio::test]
    async fn test_session_forwards_events_in_order() {
        let notifier = notifier();
        let (mut transport, mut client) = mock();

        let n = notifier.clone();
        let task = tokio::spawn(async move { watch(&n, &mut transport).await });
        wait_until_subscribed(&notifier, 1).await;

        for i in 1..=3 {
            notifier.broadcast(event(i)).await;
        }
        for i in 1..=3u32 {
            let frame = client.frames.recv().await.unwrap();
            assert_eq!(frame.seq, u64::from(i));
            assert_eq!(frame.change_type, ChangeType::Delete);
            assert_eq!(frame.user.id, i.to_string());
        }

        client.done.send(Some(DoneReason::Canceled)).unwrap();
        let outcome = task.await.unwrap().unwrap();

        assert_eq!(outcome, WatchOutcome::Closed(CloseCause::ClientCanceled));
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_discards_queued_events() {
        let notifier = notifier();
        let (mut transport, mut client) = mock();

        let mut session = WatchSession::start(&notifier).unwrap();
        let id = session.id().to_string();

        notifier.broadcast(event(1)).await;
        notifier.broadcast(event(2)).await;
        client.done.send(Some(DoneReason::Canceled)).unwrap();

        // The done signal wins over queued events.
        let step = session.step(&mut transport).await;
        assert_eq!(
            step,
            Step::Done(WatchOutcome::Closed(CloseCause::ClientCanceled))
        );
        assert!(client.frames.try_recv().is_err());

        drop(session);
        assert!(!notifier.is_subscribed(&id));
    }

    #[tokio::test]
    async fn test_client_error_is_a_normal_close() {
        let notifier = notifier();
        let (mut transport, client) = mock();

        client
            .done
            .send(Some(DoneReason::Failed("connection reset".into())))
            .unwrap();
        let outcome = watch(&notifier, &mut transport).await.unwrap();

        assert_eq!(
            outcome,
            WatchOutcome::Closed(CloseCause::ClientError("connection reset".into()))
        );
        assert!(outcome.into_result().is_ok());
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_ends_session_normally() {
        let notifier = notifier();
        let (mut transport, _client) = mock();

        let session = WatchSession::start(&notifier).unwrap();
        let id = session.id().to_string();
        notifier.unsubscribe(&id);

        let outcome = session.run(&mut transport).await;
        assert_eq!(outcome, WatchOutcome::Closed(CloseCause::SubscriptionClosed));
        assert!(outcome.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_evicted_session_reports_eviction() {
        let notifier = Notifier::new(NotifierConfig {
            queue_capacity: 1,
            send_timeout: Duration::from_millis(20),
        });
        let (mut transport, mut client) = mock();

        let session = WatchSession::start(&notifier).unwrap();
        notifier.broadcast(event(1)).await;
        let report = notifier.broadcast(event(2)).await;
        assert_eq!(report.evicted, 1);

        let outcome = session.run(&mut transport).await;
        assert_eq!(outcome, WatchOutcome::Closed(CloseCause::Evicted));
        assert!(outcome.into_result().is_ok());
        assert!(client.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let notifier = notifier();
        let (mut transport, _client) = mock();
        transport.fail_sends = Some(TransportError::Failed("broken pipe".into()));

        let session = WatchSession::start(&notifier).unwrap();
        notifier.broadcast(event(1)).await;

        let outcome = session.run(&mut transport).await;
        assert_eq!(outcome, WatchOutcome::SendFailed("broken pipe".into()));
        assert_eq!(
            outcome.into_result(),
            Err(StreamError::TransportSendFailed("broken pipe".into()))
        );
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_transport_is_a_normal_close() {
        let notifier = notifier();
        let (mut transport, _client) = mock();
        transport.fail_sends = Some(TransportError::Closed);

        let session = WatchSession::start(&notifier).unwrap();
        notifier.broadcast(event(1)).await;

        let outcome = session.run(&mut transport).await;
        assert_eq!(outcome, WatchOutcome::Closed(CloseCause::TransportClosed));
        assert!(outcome.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_aborted_session_still_unsubscribes() {
        let notifier = notifier();
        let (mut transport, _client) = mock();

        let n = notifier.clone();
        let task = tokio::spawn(async move { watch(&n, &mut transport).await });
        wait_until_subscribed(&notifier, 1).await;

        task.abort();
        let _ = task.await;
        assert_eq!(notifier.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_are_isolated() {
        let notifier = notifier();
        let (mut t1, mut c1) = mock();
        let (mut t2, mut c2) = mock();

        let n1 = notifier.clone();
        let s1 = tokio::spawn(async move { watch(&n1, &mut t1).await });
        let n2 = notifier.clone();
        let s2 = tokio::spawn(async move { watch(&n2, &mut t2).await });
        wait_until_subscribed(&notifier, 2).await;

        notifier.broadcast(event(1)).await;
        assert_eq!(c1.frames.recv().await.unwrap().user.id, "1");
        assert_eq!(c2.frames.recv().await.unwrap().user.id, "1");

        c1.done.send(Some(DoneReason::Canceled)).unwrap();
        s1.await.unwrap().unwrap();
        wait_until_subscribed(&notifier, 1).await;

        notifier.broadcast(event(2)).await;
        assert_eq!(c2.frames.recv().await.unwrap().user.id, "2");

        c2.done.send(Some(DoneReason::Canceled)).unwrap();
        s2.await.unwrap().unwrap();
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
