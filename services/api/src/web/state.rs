//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and its save-on-mutation
//! persistence hooks.

use crate::config::Config;
use std::sync::Arc;
use study_session_core::orchestrator::Orchestrator;
use study_session_core::ports::StorageService;
use tracing::error;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The study-session state machine; every write to session state goes
    /// through it.
    pub orchestrator: Arc<Orchestrator>,
    pub storage: Arc<dyn StorageService>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Replaces the persisted workspaces collection with the current store
    /// contents. Persistence failures are logged, never fatal to a request.
    pub async fn persist_workspaces(&self) {
        let snapshot = self
            .orchestrator
            .with_store(|s| s.workspaces_snapshot())
            .await;
        if let Err(e) = self.storage.save_workspaces(&snapshot).await {
            error!("Failed to persist workspaces: {e}");
        }
    }

    pub async fn persist_attempts(&self) {
        let snapshot = self
            .orchestrator
            .with_store(|s| s.attempts_snapshot())
            .await;
        if let Err(e) = self.storage.save_attempts(&snapshot).await {
            error!("Failed to persist quiz attempts: {e}");
        }
    }

    pub async fn persist_activity(&self) {
        let snapshot = self
            .orchestrator
            .with_store(|s| s.activity_snapshot())
            .await;
        if let Err(e) = self.storage.save_activity(&snapshot).await {
            error!("Failed to persist the activity feed: {e}");
        }
    }
}
