//! Application state shared across handlers.

use crate::store::LocalStore;
use crate::supervisor::StatusBoard;

/// State for the HTTP handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: LocalStore,
    pub status: StatusBoard,
}

impl AppState {
    pub fn new(store: LocalStore, status: StatusBoard) -> Self {
        Self { store, status }
    }
}
