//! API Router and Application State
//!
//! Central routing configuration and shared state.

use axum::{extract::DefaultBodyLimit, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{config::Config, ingress, queue::MessageQueue};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Queue receiving accepted messages
    pub queue: Arc<dyn MessageQueue>,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, queue: Arc<dyn MessageQueue>) -> Self {
        Self {
            config: Arc::new(config),
            queue,
        }
    }
}

/// Create the main application router.
///
/// Routing is not discriminated: every path and method reaches the ingress
/// handler, which rejects anything but POST itself.
pub fn create_router(state: AppState) -> Router {
    let max_body_size = state.config.max_body_size;

    Router::new()
        .fallback(ingress::ingest_message)
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_body_size))
        // State
        .with_state(state)
}
