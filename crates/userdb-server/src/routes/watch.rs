//! WebSocket watch endpoint.

use axum::{
    extract::{ws::WebSocket, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::state::AppState;
use crate::watch::ws::{CloseReason, WsTransport};
use crate::watch::WatchSession;

/// Watch routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/users/watch", get(watch_users))
}

/// Upgrade to a WebSocket carrying every user change from now on.
async fn watch_users(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_watch(socket, state))
}

async fn serve_watch(socket: WebSocket, state: AppState) {
    let mut transport = WsTransport::new(socket, state.shutdown.clone());

    let session = match WatchSession::start(&state.notifier) {
        Ok(session) => session,
        Err(e) => {
            tracing::warn!(error = %e, "failed to start watch session");
            transport.close(CloseReason::Error(e.to_string())).await;
            return;
        }
    };

    let outcome = session.run(&mut transport).await;
    let reason = CloseReason::for_outcome(&outcome);
    if let Err(e) = outcome.into_result() {
        tracing::warn!(error = %e, "watch stream ended with an error");
    }
    transport.close(reason).await;
}
