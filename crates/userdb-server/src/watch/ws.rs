//! WebSocket transport for watch sessions.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::io;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use userdb_proto::WatchFrame;

use super::{CloseCause, DoneReason, TransportError, WatchOutcome, WatchTransport};

/// Messages of the websocket errors that mean the peer is gone. axum only
/// hands out the boxed error, so these are matched on their display text.
const PEER_GONE: &[&str] = &[
    "Connection closed normally",
    "Trying to work with closed connection",
    "Connection reset without closing handshake",
    "Sending after closing is not allowed",
];

/// Close reasons must fit in a control frame.
const MAX_CLOSE_REASON: usize = 123;

/// Whether a websocket error only says the client went away.
fn is_disconnect(err: &axum::Error) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(e) = current {
        if let Some(io) = e.downcast_ref::<io::Error>() {
            if matches!(
                io.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        let message = e.to_string();
        if PEER_GONE.iter().any(|gone| message.contains(gone)) {
            return true;
        }
        current = e.source();
    }
    false
}

/// How the server closes a watch socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The stream ended normally (1000).
    Normal,
    /// The subscriber fell behind and was evicted (1013, try again later).
    FellBehind,
    /// The stream ended on a server side error (1011).
    Error(String),
}

impl CloseReason {
    /// The close to send after a session ended with `outcome`.
    pub fn for_outcome(outcome: &WatchOutcome) -> Self {
        match outcome {
            WatchOutcome::Closed(CloseCause::Evicted) => CloseReason::FellBehind,
            WatchOutcome::Closed(_) => CloseReason::Normal,
            WatchOutcome::SendFailed(reason) => CloseReason::Error(reason.clone()),
        }
    }

    fn into_frame(self) -> CloseFrame<'static> {
        match self {
            CloseReason::Normal => CloseFrame {
                code: close_code::NORMAL,
                reason: Cow::Borrowed(""),
            },
            CloseReason::FellBehind => CloseFrame {
                code: close_code::AGAIN,
                reason: Cow::Borrowed("subscriber fell behind"),
            },
            CloseReason::Error(reason) => CloseFrame {
                code: close_code::ERROR,
                reason: Cow::Owned(truncate_reason(reason)),
            },
        }
    }
}

fn truncate_reason(mut reason: String) -> String {
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// A watch stream carried over a WebSocket.
///
/// Frames go out as JSON text messages. Anything the client sends is ignored
/// except a close; the server shutdown token also counts as a cancel.
pub struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
    stream: SplitStream<WebSocket>,
    shutdown: CancellationToken,
    peer_closed: bool,
}

impl WsTransport {
    pub fn new(socket: WebSocket, shutdown: CancellationToken) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink,
            stream,
            shutdown,
            peer_closed: false,
        }
    }

    /// Close the socket, unless the client is already gone.
    pub async fn close(mut self, reason: CloseReason) {
        if self.peer_closed {
            return;
        }

        let frame = reason.into_frame();
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "failed to send close frame");
        }
    }
}

impl WatchTransport for WsTransport {
    async fn send(&mut self, frame: WatchFrame) -> Result<(), TransportError> {
        if self.peer_closed {
            return Err(TransportError::Closed);
        }

        let text = frame
            .to_text()
            .map_err(|e| TransportError::Failed(e.to_string()))?;

        match self.sink.send(Message::Text(text)).await {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => {
                self.peer_closed = true;
                Err(TransportError::Closed)
            }
            Err(e) => Err(TransportError::Failed(e.to_string())),
        }
    }

    async fn done(&mut self) -> DoneReason {
        if self.peer_closed {
            return DoneReason::Canceled;
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return DoneReason::Canceled,
                message = self.stream.next() => match message {
                    None | Some(Ok(Message::Close(_))) => {
                        self.peer_closed = true;
                        return DoneReason::Canceled;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        self.peer_closed = true;
                        if is_disconnect(&e) {
                            return DoneReason::Canceled;
                        }
                        return DoneReason::Failed(e.to_string());
                    }
                },
            }
        }
    }
}
