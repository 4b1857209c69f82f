use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tokio::sync::OwnedMutexGuard;

use crate::config::{AppConfig, HotelProfile};
use crate::services::ai::LlmProvider;
use crate::services::alerts::OpsNotifier;
use crate::services::knowledge::Retriever;
use crate::services::location::LocationResolver;
use crate::services::messaging::MessagingProvider;
use crate::services::pms::BookingApi;
use crate::services::texts::TextCatalog;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub hotel: HotelProfile,
    pub texts: TextCatalog,
    pub llm: Box<dyn LlmProvider>,
    pub retriever: Retriever,
    pub locations: LocationResolver,
    pub booking_api: Box<dyn BookingApi>,
    pub messaging: Box<dyn MessagingProvider>,
    pub notifier: Box<dyn OpsNotifier>,
    pub session_locks: SessionLocks,
}

impl AppState {
    pub fn db(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| anyhow::anyhow!("database mutex poisoned"))
    }
}

/// One async lock per conversation id, so events of the same call are
/// processed one after another while other calls run in parallel.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

pub struct SessionGuard<'a> {
    locks: &'a SessionLocks,
    id: String,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLocks {
    pub async fn acquire(&self, id: &str) -> SessionGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(id.to_string()).or_default().clone()
        };
        SessionGuard {
            locks: self,
            id: id.to_string(),
            _guard: lock.lock_owned().await,
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        // The map and this guard hold the only references when nobody waits.
        if locks
            .get(&self.id)
            .map(|lock| Arc::strong_count(lock) <= 2)
            .unwrap_or(false)
        {
            locks.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_session_is_serialized() {
        let locks = Arc::new(SessionLocks::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let guard = locks.acquire("c1").await;
        let task = {
            let locks = locks.clone();
            let order = order.clone();
            tokio::spawn(async move {
                let _g = locks.acquire("c1").await;
                order.lock().unwrap().push("second");
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        order.lock().unwrap().push("first");
        drop(guard);
        task.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_sessions_do_not_block() {
        let locks = SessionLocks::default();
        let _a = locks.acquire("a").await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.acquire("b"))
            .await
            .expect("independent sessions must not wait");
        assert_eq!(locks.len(), 2);
    }
}
