//! Shared application state.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use userdb_core::UserService;
use userdb_proto::ChangeEvent;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::feed::FeedState;
use crate::notify::Notifier;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// User operations.
    pub service: UserService,
    /// Change fan-out to watch sessions.
    pub notifier: Notifier<ChangeEvent>,
    /// Current feed processor state.
    pub feed_state: watch::Receiver<FeedState>,
    /// Cancelled when the server shuts down.
    pub shutdown: CancellationToken,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Create new application state.
    pub fn new(
        service: UserService,
        notifier: Notifier<ChangeEvent>,
        feed_state: watch::Receiver<FeedState>,
        shutdown: CancellationToken,
        config: ServerConfig,
    ) -> Self {
        Self {
            service,
            notifier,
            feed_state,
            shutdown,
            config: Arc::new(config),
        }
    }

    /// Run a service call on the blocking pool.
    ///
    /// sled IO and bcrypt both block, so handlers never call the service
    /// directly.
    pub async fn run_blocking<F, R>(&self, f: F) -> Result<R, ApiError>
    where
        F: FnOnce(&UserService) -> Result<R, userdb_core::Error> + Send + 'static,
        R: Send + 'static,
    {
        let service = self.service.clone();
        let result = tokio::task::spawn_blocking(move || f(&service)).await?;
        result.map_err(ApiError::from)
    }
}
