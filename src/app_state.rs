use std::path::PathBuf;
use std::sync::Arc;

use crate::db::store::JobStore;
use crate::services::{artifacts::ArtifactStore, scheduler::Scheduler};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub scheduler: Arc<Scheduler>,
    pub artifacts: Arc<ArtifactStore>,
    pub workspace_root: Arc<PathBuf>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<Scheduler>,
        artifacts: ArtifactStore,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            scheduler,
            artifacts: Arc::new(artifacts),
            workspace_root: Arc::new(workspace_root.into()),
        }
    }
}
