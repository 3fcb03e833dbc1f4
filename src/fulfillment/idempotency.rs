//! Idempotency keys for order submission.
//!
//! The first request for a key runs; concurrent duplicates wait on the same
//! slot and then replay its outcome. Later duplicates replay immediately.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

struct Slot<T> {
    fingerprint: u64,
    outcome: tokio::sync::Mutex<Option<T>>,
    completed_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdempotencyError {
    #[error("idempotency key {0} was already used for a different request")]
    KeyReused(String),
    #[error("idempotency registry poisoned")]
    Poisoned,
}

pub struct IdempotencyRegistry<T> {
    slots: Mutex<HashMap<String, Arc<Slot<T>>>>,
}

impl<T: Clone> IdempotencyRegistry<T> {
    pub fn new() -> Self { Self { slots: Mutex::new(HashMap::new()) } }

    /// Runs `op` once per key. `fingerprint` identifies the request payload so a
    /// key cannot be replayed against a different order.
    pub async fn run<F, Fut>(&self, key: &str, fingerprint: u64, op: F) -> Result<T, IdempotencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| IdempotencyError::Poisoned)?;
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Slot { fingerprint, outcome: tokio::sync::Mutex::new(None), completed_at: Mutex::new(None) }))
                .clone()
        };
        if slot.fingerprint != fingerprint {
            return Err(IdempotencyError::KeyReused(key.to_string()));
        }

        let mut outcome = slot.outcome.lock().await;
        if let Some(previous) = outcome.as_ref() {
            debug!(key, "replaying idempotent outcome");
            return Ok(previous.clone());
        }
        let value = op().await;
        *outcome = Some(value.clone());
        *slot.completed_at.lock().map_err(|_| IdempotencyError::Poisoned)? = Some(Utc::now());
        Ok(value)
    }

    /// Forgets keys that completed before `cutoff`. In-flight keys are kept.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, IdempotencyError> {
        let mut slots = self.slots.lock().map_err(|_| IdempotencyError::Poisoned)?;
        let before = slots.len();
        slots.retain(|_, slot| match slot.completed_at.lock() {
            Ok(done) => done.map_or(true, |at| at >= cutoff),
            Err(_) => true,
        });
        Ok(before - slots.len())
    }

    pub fn len(&self) -> usize { self.slots.lock().map(|s| s.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T: Clone> Default for IdempotencyRegistry<T> {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_replays_completed_outcome() {
        let registry = IdempotencyRegistry::<u32>::new();
        let counter = AtomicU32::new(0);
        let runs = &counter;
        let first = registry.run("key-1", 7, move || async move { runs.fetch_add(1, Ordering::SeqCst) + 100 }).await.unwrap();
        let second = registry.run("key-1", 7, move || async move { runs.fetch_add(1, Ordering::SeqCst) + 200 }).await.unwrap();
        assert_eq!(first, 100);
        assert_eq!(second, 100);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejects_different_payload() {
        let registry = IdempotencyRegistry::<u32>::new();
        registry.run("key-1", 7, || async { 1 }).await.unwrap();
        let err = registry.run("key-1", 8, || async { 2 }).await.unwrap_err();
        assert_eq!(err, IdempotencyError::KeyReused("key-1".into()));
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_run_once() {
        let registry = Arc::new(IdempotencyRegistry::<u32>::new());
        let runs = Arc::new(AtomicU32::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let runs = Arc::clone(&runs);
                tokio::spawn(async move {
                    registry
                        .run("key-1", 1, || async move {
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            runs.fetch_add(1, Ordering::SeqCst)
                        })
                        .await
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 0);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prune_drops_old_completed_keys() {
        let registry = IdempotencyRegistry::<u32>::new();
        registry.run("key-1", 1, || async { 1 }).await.unwrap();
        assert_eq!(registry.prune(Utc::now() - Duration::hours(1)).unwrap(), 0);
        assert_eq!(registry.prune(Utc::now() + Duration::seconds(1)).unwrap(), 1);
        assert!(registry.is_empty());
    }
}
