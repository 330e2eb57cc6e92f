//! Session collaborator: supplies the bearer token and handles expiry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Source of the caller's credentials.
pub trait Session: Send + Sync {
    /// Bearer token to attach, if logged in.
    fn token(&self) -> Option<String>;

    /// Drop all session state.
    fn logout(&self);

    /// Force the host to reload, sending the user back through login.
    fn reload(&self);
}

/// Session kept in memory. Counts logouts and reloads.
#[derive(Debug, Default)]
pub struct MemorySession {
    token: Mutex<Option<String>>,
    logouts: AtomicUsize,
    reloads: AtomicUsize,
}

impl MemorySession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
            ..Self::default()
        }
    }

    pub fn set_token(&self, token: Option<String>) {
        *lock(&self.token) = token;
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

impl Session for MemorySession {
    fn token(&self) -> Option<String> {
        lock(&self.token).clone().filter(|token| !token.is_empty())
    }

    fn logout(&self) {
        *lock(&self.token) = None;
        self.logouts.fetch_add(1, Ordering::SeqCst);
    }

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_clears_token() {
        let session = MemorySession::with_token("abc");
        assert_eq!(session.token().as_deref(), Some("abc"));
        session.logout();
        assert!(session.token().is_none());
        assert_eq!(session.logouts(), 1);
        assert_eq!(session.reloads(), 0);
    }

    #[test]
    fn empty_token_counts_as_logged_out() {
        let session = MemorySession::with_token("");
        assert!(session.token().is_none());
    }
}
