//! Registry of in-flight requests, keyed by session and message.
//!
//! Every streaming request registers its [`CancellationToken`] here before
//! the request is issued, so the UI can stop one request or all of them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

/// Cloneable registry of cancellation tokens for in-flight requests.
#[derive(Debug, Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

fn key(session_id: i64, message_id: i64) -> String {
    format!("{session_id},{message_id}")
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a request. Replaces any stale entry.
    pub fn add(&self, session_id: i64, message_id: i64, token: CancellationToken) {
        let mut map = self.inner.lock().expect("mutex poisoned");
        map.insert(key(session_id, message_id), token);
    }

    /// Remove a finished request. No-op if it was never registered.
    pub fn remove(&self, session_id: i64, message_id: i64) {
        let mut map = self.inner.lock().expect("mutex poisoned");
        map.remove(&key(session_id, message_id));
    }

    /// Cancel one request and drop its registration. No-op if absent.
    pub fn cancel_one(&self, session_id: i64, message_id: i64) {
        let token = {
            let mut map = self.inner.lock().expect("mutex poisoned");
            map.remove(&key(session_id, message_id))
        };
        if let Some(token) = token {
            token.cancel();
        }
    }

    /// Cancel every in-flight request and clear the registry.
    pub fn cancel_all(&self) {
        let tokens: Vec<CancellationToken> = {
            let mut map = self.inner.lock().expect("mutex poisoned");
            map.drain().map(|(_, token)| token).collect()
        };
        for token in tokens {
            token.cancel();
        }
    }

    /// Whether any request is currently registered.
    pub fn has_pending(&self) -> bool {
        let map = self.inner.lock().expect("mutex poisoned");
        !map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_cancel_one() {
        let registry = CancelRegistry::new();
        let token = CancellationToken::new();
        registry.add(1, 2, token.clone());
        assert!(registry.has_pending());

        registry.cancel_one(1, 2);
        assert!(token.is_cancelled());
        assert!(!registry.has_pending());
    }

    #[test]
    fn cancel_missing_is_noop() {
        let registry = CancelRegistry::new();
        registry.cancel_one(9, 9);
        registry.remove(9, 9);
        assert!(!registry.has_pending());
    }

    #[test]
    fn cancel_all_drains_registry() {
        let registry = CancelRegistry::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        registry.add(1, 10, first.clone());
        registry.add(2, 20, second.clone());

        registry.cancel_all();
        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
        assert!(!registry.has_pending());
    }

    #[test]
    fn remove_does_not_cancel() {
        let registry = CancelRegistry::new();
        let token = CancellationToken::new();
        registry.add(1, 2, token.clone());
        registry.remove(1, 2);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn same_message_id_in_different_sessions() {
        let registry = CancelRegistry::new();
        let first = CancellationToken::new();
        let second = CancellationToken::new();
        registry.add(1, 5, first.clone());
        registry.add(2, 5, second.clone());

        registry.cancel_one(1, 5);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
