//! Shared application state for the Axum API server.

use std::sync::Arc;

use recruit_common::config::FhirSystems;
use recruit_engine::{EngineContext, Orchestrator};

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub systems: FhirSystems,
}

impl AppState {
    pub fn new(ctx: &EngineContext, systems: FhirSystems) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(ctx)),
            systems,
        }
    }
}
