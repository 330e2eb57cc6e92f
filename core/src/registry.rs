//! Registry of in-flight de-duplicated requests.
//!
//! # Design
//! Each entry pairs a request id with the request's cancellation token.
//! Registering a key that is already present cancels the older request, so
//! for any key only the most recently issued request survives. Settlement
//! only removes the caller's own entry: a superseded request finishing late
//! must not evict the request that replaced it.
//!
//! The map sits behind a `std::sync::Mutex`. Every operation is a short
//! read-modify-write with no `.await` while the lock is held.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::descriptor::DedupKey;

#[derive(Debug)]
struct Entry {
    id: Uuid,
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

/// Handle held by a registered request until it settles.
#[derive(Debug)]
pub struct PendingHandle {
    key: DedupKey,
    id: Uuid,
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl PendingHandle {
    pub fn key(&self) -> &DedupKey {
        &self.key
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Reason recorded when the request was cancelled, if it was.
    pub fn cancel_reason(&self) -> Option<String> {
        lock(&self.reason).clone()
    }
}

/// Process-local table of pending requests keyed by `DedupKey`.
#[derive(Debug, Default)]
pub struct PendingRegistry {
    entries: Mutex<HashMap<DedupKey, Entry>>,
}

impl PendingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a request under `key`, cancelling any in-flight request that
    /// shares it.
    pub fn register(&self, key: DedupKey, reason: &str) -> PendingHandle {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let cancel_reason = Arc::new(Mutex::new(None));

        let previous = lock(&self.entries).insert(
            key.clone(),
            Entry {
                id,
                token: token.clone(),
                reason: Arc::clone(&cancel_reason),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(key = %key, superseded = %previous.id, "cancelling duplicate request");
            cancel(&previous, reason);
        }

        PendingHandle {
            key,
            id,
            token,
            reason: cancel_reason,
        }
    }

    /// Remove the handle's entry if it is still the current one for its key.
    pub fn settle(&self, handle: &PendingHandle) {
        let mut entries = lock(&self.entries);
        if entries.get(&handle.key).is_some_and(|entry| entry.id == handle.id) {
            entries.remove(&handle.key);
        }
    }

    /// Cancel and forget every pending request. Returns how many were cancelled.
    pub fn cancel_all(&self, reason: &str) -> usize {
        let drained: Vec<Entry> = lock(&self.entries).drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            cancel(entry, reason);
        }
        drained.len()
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn cancel(entry: &Entry, reason: &str) {
    *lock(&entry.reason) = Some(reason.to_string());
    entry.token.cancel();
}

// A panic while holding one of these locks cannot leave the map half-updated,
// so a poisoned lock is still safe to use.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::RequestDescriptor;
    use crate::http::HttpMethod;

    fn key(url: &str) -> DedupKey {
        RequestDescriptor::new(HttpMethod::Get, url).dedup_key()
    }

    #[test]
    fn register_then_settle_empties_registry() {
        let registry = PendingRegistry::new();
        let handle = registry.register(key("/a"), "dup");
        assert!(registry.contains(handle.key()));
        registry.settle(&handle);
        assert!(registry.is_empty());
        assert!(!handle.token().is_cancelled());
    }

    #[test]
    fn duplicate_cancels_previous() {
        let registry = PendingRegistry::new();
        let first = registry.register(key("/a"), "dup");
        let second = registry.register(key("/a"), "dup");

        assert!(first.token().is_cancelled());
        assert_eq!(first.cancel_reason().as_deref(), Some("dup"));
        assert!(!second.token().is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn superseded_settlement_keeps_successor() {
        let registry = PendingRegistry::new();
        let first = registry.register(key("/a"), "dup");
        let second = registry.register(key("/a"), "dup");

        registry.settle(&first);
        assert!(registry.contains(second.key()));

        registry.settle(&second);
        assert!(registry.is_empty());
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let registry = PendingRegistry::new();
        let a = registry.register(key("/a"), "dup");
        let b = registry.register(key("/b"), "dup");
        assert!(!a.token().is_cancelled());
        assert!(!b.token().is_cancelled());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn cancel_all_cancels_everything() {
        let registry = PendingRegistry::new();
        let a = registry.register(key("/a"), "dup");
        let b = registry.register(key("/b"), "dup");

        assert_eq!(registry.cancel_all("navigated away"), 2);
        assert!(a.token().is_cancelled());
        assert!(b.token().is_cancelled());
        assert_eq!(b.cancel_reason().as_deref(), Some("navigated away"));
        assert!(registry.is_empty());
    }
}
