use crate::session::SessionHandle;
use async_trait::async_trait;
use callrelay_core::{CallConfig, RelayError, RelayResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Owns the live sessions, one per call id.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Register a new session. Fails if `call_id` is already registered.
    async fn create(&self, call_id: &str, config: CallConfig) -> RelayResult<Arc<SessionHandle>>;
    /// Look up a session.
    async fn get(&self, call_id: &str) -> RelayResult<Option<Arc<SessionHandle>>>;
    /// Remove a session, returning it if it was registered.
    async fn delete(&self, call_id: &str) -> RelayResult<Option<Arc<SessionHandle>>>;
    /// Ids of all registered sessions.
    async fn list(&self) -> RelayResult<Vec<String>>;
}

/// Process-local registry. Sessions are never shared across processes.
pub struct InMemorySessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl InMemorySessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn create(&self, call_id: &str, config: CallConfig) -> RelayResult<Arc<SessionHandle>> {
        config.validate()?;
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(call_id) {
            return Err(RelayError::DuplicateSession(call_id.to_string()));
        }
        let handle = SessionHandle::new(call_id, config);
        sessions.insert(call_id.to_string(), handle.clone());
        info!(call_id = %call_id, "Session created");
        Ok(handle)
    }

    async fn get(&self, call_id: &str) -> RelayResult<Option<Arc<SessionHandle>>> {
        Ok(self.sessions.read().await.get(call_id).cloned())
    }

    async fn delete(&self, call_id: &str) -> RelayResult<Option<Arc<SessionHandle>>> {
        let removed = self.sessions.write().await.remove(call_id);
        if removed.is_some() {
            info!(call_id = %call_id, "Session removed");
        }
        Ok(removed)
    }

    async fn list(&self) -> RelayResult<Vec<String>> {
        Ok(self.sessions.read().await.keys().cloned().collect())
    }
}
