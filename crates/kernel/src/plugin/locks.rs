//! Per-plugin mutual exclusion for lifecycle and config writes.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per plugin id, created on first use.
#[derive(Clone, Default)]
pub struct PluginLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PluginLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `plugin_id`. Held until the guard drops.
    pub async fn acquire(&self, plugin_id: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc so the map shard is released before awaiting.
        let lock = Arc::clone(self.locks.entry(plugin_id.to_string()).or_default().value());
        lock.lock_owned().await
    }

    /// Exclusive access if nobody holds it right now.
    pub fn try_acquire(&self, plugin_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = Arc::clone(self.locks.entry(plugin_id.to_string()).or_default().value());
        lock.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_id_is_exclusive() {
        let locks = PluginLocks::new();
        let guard = locks.acquire("payment/stripe").await;
        assert!(locks.try_acquire("payment/stripe").is_none());
        drop(guard);
        assert!(locks.try_acquire("payment/stripe").is_some());
    }

    #[tokio::test]
    async fn different_ids_do_not_contend() {
        let locks = PluginLocks::new();
        let _stripe = locks.acquire("payment/stripe").await;
        assert!(locks.try_acquire("payment/alipay").is_some());
    }

    #[tokio::test]
    async fn waiters_run_after_release() {
        let locks = PluginLocks::new();
        let guard = locks.acquire("sms/aliyun").await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire("sms/aliyun").await;
        });

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        drop(guard);
        assert!(waiter.await.is_ok());
    }
}
