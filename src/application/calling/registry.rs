//! Registry of live call sessions
//!
//! The registry lock guards map membership only. Teardown of a removed
//! session runs after the lock is released.

use super::error::{CallingError, CallingResult};
use super::session::CallSession;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
pub struct CallSessionRegistry {
    sessions: RwLock<HashMap<String, Arc<CallSession>>>,
}

impl CallSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session; a call id can only be registered once
    pub async fn create(&self, session: Arc<CallSession>) -> CallingResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.call_id) {
            return Err(CallingError::SessionExists(session.call_id.clone()));
        }
        info!("Registered call session {}", session.call_id);
        sessions.insert(session.call_id.clone(), session);
        metrics::gauge!("calling_active_sessions").set(sessions.len() as f64);
        Ok(())
    }

    pub async fn get(&self, call_id: &str) -> Option<Arc<CallSession>> {
        self.sessions.read().await.get(call_id).cloned()
    }

    pub async fn get_by_call_log_id(&self, call_log_id: Uuid) -> Option<Arc<CallSession>> {
        self.sessions
            .read()
            .await
            .values()
            .find(|s| s.call_log_id == call_log_id)
            .cloned()
    }

    /// Remove a session and tear it down. Returns whether it was registered.
    pub async fn delete(&self, call_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            let removed = sessions.remove(call_id);
            metrics::gauge!("calling_active_sessions").set(sessions.len() as f64);
            removed
        };

        match removed {
            Some(session) => {
                session.teardown().await;
                true
            }
            None => {
                debug!("Call session {} already removed", call_id);
                false
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn call_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Tear down every session, used on shutdown
    pub async fn clear(&self) {
        let drained: Vec<Arc<CallSession>> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        metrics::gauge!("calling_active_sessions").set(0.0);
        for session in drained {
            session.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::calling::session::tests::session;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let registry = CallSessionRegistry::new();
        let s = Arc::new(session("wacid.1"));
        let call_log_id = s.call_log_id;
        registry.create(s.clone()).await.unwrap();

        assert!(registry.get("wacid.1").await.is_some());
        assert!(registry.get("wacid.2").await.is_none());
        assert_eq!(
            registry.get_by_call_log_id(call_log_id).await.unwrap().call_id,
            "wacid.1"
        );
        assert!(matches!(
            registry.create(s).await,
            Err(CallingError::SessionExists(_))
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_tears_down() {
        let registry = CallSessionRegistry::new();
        let s = Arc::new(session("wacid.1"));
        registry.create(s.clone()).await.unwrap();

        assert!(registry.delete("wacid.1").await);
        assert!(!registry.delete("wacid.1").await);
        assert!(s.is_torn_down());
        assert!(s.dtmf.is_closed());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_deletes_tear_down_once() {
        let registry = Arc::new(CallSessionRegistry::new());
        registry.create(Arc::new(session("wacid.1"))).await.unwrap();

        let a = tokio::spawn({
            let registry = registry.clone();
            async move { registry.delete("wacid.1").await }
        });
        let b = tokio::spawn({
            let registry = registry.clone();
            async move { registry.delete("wacid.1").await }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a ^ b);
    }
}
