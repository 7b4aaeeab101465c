//! Per-processor mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// One async mutex per processor id, created on first use. A second caller
/// for the same processor waits until the first releases its guard.
#[derive(Debug, Default)]
pub struct ProcessorLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProcessorLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `processor_id`.
    pub async fn acquire(&self, processor_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(processor_id.to_owned()).or_default())
        };
        lock.lock_owned().await
    }

    #[cfg(test)]
    fn try_acquire(&self, processor_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(processor_id.to_owned()).or_default())
        };
        lock.try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_processor_is_exclusive() {
        let locks = ProcessorLocks::new();

        let guard = locks.acquire("archive").await;

        assert!(locks.try_acquire("archive").is_none());
        drop(guard);
        assert!(locks.try_acquire("archive").is_some());
    }

    #[tokio::test]
    async fn test_different_processors_are_independent() {
        let locks = ProcessorLocks::new();

        let _archive = locks.acquire("archive").await;

        assert!(locks.try_acquire("w9").is_some());
    }
}
