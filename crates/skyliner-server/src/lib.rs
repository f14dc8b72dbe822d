//! Skyliner real-time server.
//!
//! Distributes booking-system events (price ticks, seat map changes and
//! booking status transitions) to WebSocket clients that subscribe to named
//! channels.
//!
//! # Modules
//!
//! - [`hub`]: Coordinator task, connection registry and the [`Publisher`] surface
//! - [`connection`]: Per-client session with its outbound buffer
//! - [`routes`]: `/health` and `/ws` HTTP handlers
//! - [`config`]: Server configuration and command-line arguments
//! - [`error`]: Server error types

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod routes;

pub use config::{Args, ServerConfig};
pub use connection::{Connection, ConnectionId, ConnectionState, Disconnect, Frame, Inbound, Outbound};
pub use error::Error;
pub use hub::{spawn_hub, Hub, HubHandle, HubStats, Publisher};

use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running hub.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: ServerConfig,
}

impl AppState {
    /// Create new application state.
    pub fn new(hub: HubHandle, config: ServerConfig) -> Self {
        Self { hub, config }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origins(&state.config.cors_origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health::routes())
        .merge(routes::ws::routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn allowed_origins(origins: &[String]) -> AllowOrigin {
    if origins.is_empty() {
        return Any.into();
    }

    let values = origins.iter().filter_map(|origin| match HeaderValue::from_str(origin) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
            None
        }
    });
    AllowOrigin::list(values)
}
