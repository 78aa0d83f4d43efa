//! userdb server library.
//!
//! This crate hosts the change distribution layer and the HTTP surface:
//!
//! - [`notify`] - the fan-out [`Notifier`] with bounded per-subscriber queues
//! - [`watch`] - watch sessions binding one client stream to one subscription
//! - [`feed`] - the task that drains the store's change feed into the notifier
//! - [`routes`] - user CRUD, the WebSocket watch endpoint and health

pub mod config;
pub mod error;
pub mod feed;
pub mod notify;
pub mod routes;
pub mod state;
pub mod watch;

pub use config::{Args, ServerConfig};
pub use error::{ApiError, Error, StreamError};
pub use feed::{FeedProcessor, FeedState};
pub use notify::{Notifier, NotifierConfig, NotifierStats, QueueHandle};
pub use state::AppState;
pub use watch::{WatchOutcome, WatchSession, WatchTransport};

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use userdb_core::{StorageConfig, UserService, UserStore};

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::users::routes())
        .merge(routes::watch::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// A running server: open store, live feed processor, shared state.
pub struct Server {
    state: AppState,
    feed: JoinHandle<Result<(), StreamError>>,
}

impl Server {
    /// Open the store and start the feed processor.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: ServerConfig, shutdown: CancellationToken) -> Result<Self, Error> {
        let store = UserStore::open(StorageConfig::new(config.data_path.clone()))?;
        Self::with_store(store, config, shutdown)
    }

    /// Start serving on an already opened store.
    pub fn with_store(
        store: UserStore,
        config: ServerConfig,
        shutdown: CancellationToken,
    ) -> Result<Self, Error> {
        let service =
            UserService::new(Arc::new(store)).with_password_cost(config.password_cost);
        let notifier = Notifier::new(NotifierConfig {
            queue_capacity: config.queue_capacity,
            send_timeout: config.send_timeout,
        });

        let changes = service.watch(config.feed_poll_interval)?;
        let (feed, feed_state) =
            feed::start_processor(changes, notifier.clone(), shutdown.child_token());

        let state = AppState::new(service, notifier, feed_state, shutdown, config);
        Ok(Self { state, feed })
    }

    /// Shared state.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Router serving this server's state.
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Serve until the shutdown token is cancelled.
    pub async fn serve(self, listener: TcpListener) -> Result<(), Error> {
        let shutdown = self.state.shutdown.clone();
        let notifier = self.state.notifier.clone();

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                notifier.close_all();
            })
            .await?;

        match self.feed.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "feed processor had stopped"),
            Err(e) => tracing::error!(error = %e, "feed processor panicked"),
        }

        self.state.service.store().flush()?;
        Ok(())
    }
}
