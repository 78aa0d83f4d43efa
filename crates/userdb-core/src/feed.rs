//! Change feed over the users tree.
//!
//! sled's watch subscriber is a blocking iterator. [`ChangeFeed`] drains it
//! on a dedicated thread and exposes the events as an async [`Stream`].

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use userdb_proto::ChangeEvent;

use crate::error::Error;
use crate::storage::{user_id_from_key, UserRecord, UserStore};

/// How long the pump waits for an event before checking for a dropped feed.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Events buffered between the pump thread and the consumer.
const FEED_BUFFER: usize = 256;

/// Stream of changes made to a [`UserStore`].
///
/// Yields `Err(Error::FeedClosed)` once if the store goes away, then ends.
/// Dropping the feed stops the pump thread within one poll interval.
pub struct ChangeFeed {
    rx: mpsc::Receiver<Result<ChangeEvent, Error>>,
}

impl ChangeFeed {
    /// Start watching the store.
    pub fn start(store: &UserStore, poll_interval: Duration) -> Result<Self, Error> {
        let subscriber = store.subscribe();
        let (tx, rx) = mpsc::channel(FEED_BUFFER);

        std::thread::Builder::new()
            .name("userdb-change-feed".into())
            .spawn(move || pump(subscriber, tx, poll_interval))?;

        Ok(Self { rx })
    }
}

impl Stream for ChangeFeed {
    type Item = Result<ChangeEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

fn pump(
    mut subscriber: sled::Subscriber,
    tx: mpsc::Sender<Result<ChangeEvent, Error>>,
    poll_interval: Duration,
) {
    use std::sync::mpsc::RecvTimeoutError;

    loop {
        if tx.is_closed() {
            debug!("change feed dropped, stopping pump");
            return;
        }

        match subscriber.next_timeout(poll_interval) {
            Ok(event) => match to_change_event(event) {
                Ok(change) => {
                    if tx.blocking_send(Ok(change)).is_err() {
                        return;
                    }
                }
                Err(e) => warn!(error = %e, "skipping undecodable change"),
            },
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("store watch ended");
                let _ = tx.blocking_send(Err(Error::FeedClosed));
                return;
            }
        }
    }
}

/// Translate a raw sled event into a change event.
fn to_change_event(event: sled::Event) -> Result<ChangeEvent, Error> {
    match event {
        sled::Event::Insert { value, .. } => {
            let record = UserRecord::from_bytes(&value)?;
            let user = record.to_user();
            if record.is_new() {
                Ok(ChangeEvent::insert(user))
            } else {
                Ok(ChangeEvent::update(user))
            }
        }
        sled::Event::Remove { key } => user_id_from_key(&key)
            .map(ChangeEvent::delete)
            .ok_or_else(|| Error::Deserialization("malformed user key".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageConfig;
    use futures::StreamExt;
    use userdb_proto::{ChangeType, NewUser, UpdateUser};

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: email.into(),
            password: "password123".into(),
            ..Default::default()
        }
    }

    async fn next(feed: &mut ChangeFeed) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(5), feed.next())
            .await
            .expect("timed out waiting for change")
            .expect("feed ended")
            .expect("feed error")
    }

    #[tokio::test]
    async fn test_feed_classifies_changes() {
        let store = UserStore::open(StorageConfig::temporary()).unwrap();
        let mut feed = ChangeFeed::start(&store, Duration::from_millis(50)).unwrap();

        let user = store.insert(&new_user("a@example.com"), "h".into()).unwrap();
        let changes = UpdateUser {
            nickname: Some("al".into()),
            ..Default::default()
        };
        store.update(&user.id, &changes, None).unwrap();
        store.delete(&user.id).unwrap();

        let inserted = next(&mut feed).await;
        assert_eq!(inserted.change_type, ChangeType::Insert);
        assert_eq!(inserted.user.email, "a@example.com");

        let updated = next(&mut feed).await;
        assert_eq!(updated.change_type, ChangeType::Update);
        assert_eq!(updated.user.nickname, "al");

        let deleted = next(&mut feed).await;
        assert_eq!(deleted.change_type, ChangeType::Delete);
        assert_eq!(deleted.user.id, user.id);
        assert!(deleted.user.email.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_writes_emit_nothing() {
        let store = UserStore::open(StorageConfig::temporary()).unwrap();
        let mut feed = ChangeFeed::start(&store, Duration::from_millis(50)).unwrap();

        store.insert(&new_user("a@example.com"), "h".into()).unwrap();
        assert!(store.insert(&new_user("a@example.com"), "h".into()).is_err());
        store.insert(&new_user("b@example.com"), "h".into()).unwrap();

        assert_eq!(next(&mut feed).await.user.email, "a@example.com");
        assert_eq!(next(&mut feed).await.user.email, "b@example.com");
    }
}
