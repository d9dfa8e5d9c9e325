//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the board registry, the board store behind it, and the parsed
//! config. Per-board live state lives inside each `Board`; the state here
//! only routes to it.

use std::sync::Arc;

use crate::config::Config;
use crate::services::persistence::BoardStore;
use crate::services::registry::BoardRegistry;

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<BoardRegistry>,
    pub store: Arc<dyn BoardStore>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config, store: Arc<dyn BoardStore>) -> Self {
        let registry = Arc::new(BoardRegistry::new(store.clone(), config.history_limit));
        Self { registry, store, config: Arc::new(config) }
    }
}
