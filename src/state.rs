//! Shared handler state.

use crate::{services::registry::MediaRegistry, storage::LocalObjectStore};

#[derive(Clone)]
pub struct AppState {
    pub registry: MediaRegistry,
    /// Set when objects live on local disk; enables `GET /objects/...`.
    pub local: Option<LocalObjectStore>,
}

impl AppState {
    pub fn new(registry: MediaRegistry, local: Option<LocalObjectStore>) -> Self {
        Self { registry, local }
    }
}
