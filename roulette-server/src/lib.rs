pub mod config;
pub mod deactivation;
pub mod engine;
pub mod http;
pub mod store;

use std::sync::Arc;

use roulette_core::ReviewerSelector;

use engine::AssignmentEngine;
use store::DirectoryStore;

/// Shared state for the HTTP handlers.
pub struct AppState {
    pub store: Arc<dyn DirectoryStore>,
    pub engine: AssignmentEngine,
}

impl AppState {
    pub fn new(store: Arc<dyn DirectoryStore>, selector: Arc<dyn ReviewerSelector>) -> Self {
        Self {
            engine: AssignmentEngine::new(store.clone(), selector),
            store,
        }
    }
}
