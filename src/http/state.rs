use crate::session::{SessionConfig, SessionDeps, SessionHandle};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The current (or most recent) session; one at a time
    pub session: Arc<RwLock<Option<SessionHandle>>>,

    /// Template for new sessions (languages, mode, capture settings)
    pub defaults: Arc<SessionConfig>,

    /// Connector, audio factory and player handed to every session
    pub deps: SessionDeps,
}

impl AppState {
    pub fn new(defaults: SessionConfig, deps: SessionDeps) -> Self {
        Self {
            session: Arc::new(RwLock::new(None)),
            defaults: Arc::new(defaults),
            deps,
        }
    }

    pub async fn current(&self) -> Option<SessionHandle> {
        self.session.read().await.clone()
    }
}
