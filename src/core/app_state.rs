//! Application state shared across the admin HTTP surface.

use std::sync::Arc;

use crate::core::config::EngineConfig;
use crate::db::client::Client;

/// Shared state handed to every axum handler: the engine client and the
/// configuration it was built from.
#[derive(Clone)]
pub struct AppState {
    /// The engine client, cheap to clone - handlers grab a [`crate::db::database::Database`]
    /// from it per request.
    pub client: Arc<Client>,

    /// The configuration the client was built from, kept alongside it for
    /// handlers that need to report settings (e.g. `/health`).
    pub config: EngineConfig,
}

impl AppState {
    /// Build application state around an already-connected client.
    pub fn new(client: Client, config: EngineConfig) -> Self {
        Self {
            client: Arc::new(client),
            config,
        }
    }
}
