//! One-shot notification signal.
//!
//! A `Signal` fires exactly once. Waiters that arrive before resolution
//! suspend until the value is available; waiters that arrive afterwards
//! observe it immediately. Resolving twice is a programming error and
//! fails loudly.
//!
//! Built on `tokio::sync::watch` rather than a hand-rolled replay queue so
//! the waking semantics are the runtime's own.

use thiserror::Error;
use tokio::sync::watch;

/// Signal errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalError {
    /// The signal was already resolved.
    #[error("Signal already resolved")]
    AlreadyResolved,
}

/// A single-fire notification carrying a value of type `T`.
#[derive(Debug)]
pub struct Signal<T> {
    tx: watch::Sender<Option<T>>,
}

impl<T: Clone> Signal<T> {
    /// Create an unresolved signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Resolve the signal, waking every pending waiter.
    ///
    /// # Errors
    ///
    /// Returns `SignalError::AlreadyResolved` if the signal was resolved
    /// before; the stored value is left untouched in that case.
    pub fn resolve(&self, value: T) -> Result<(), SignalError> {
        let mut slot = Some(value);
        let mut already_resolved = false;

        self.tx.send_modify(|current| {
            if current.is_some() {
                already_resolved = true;
            } else {
                *current = slot.take();
            }
        });

        if already_resolved {
            Err(SignalError::AlreadyResolved)
        } else {
            Ok(())
        }
    }

    /// Wait for the resolved value.
    ///
    /// Returns immediately when the signal is already resolved.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        let guard = rx
            .wait_for(Option::is_some)
            .await
            // The sender lives in self, so it cannot drop mid-wait.
            .expect("signal sender dropped while waiting");
        guard.clone().expect("checked by wait_for")
    }

    /// Get the resolved value without waiting, if there is one.
    #[must_use]
    pub fn peek(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Whether the signal has been resolved.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().is_some()
    }
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_double_resolve_fails() {
        let signal = Signal::new();
        assert!(signal.resolve(1).is_ok());
        assert_eq!(signal.resolve(2), Err(SignalError::AlreadyResolved));

        // The first value wins.
        assert_eq!(signal.peek(), Some(1));
    }

    #[tokio::test]
    async fn test_waiters_before_resolution() {
        let signal = Arc::new(Signal::new());

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let signal = signal.clone();
            waiters.push(tokio::spawn(async move { signal.wait().await }));
        }

        tokio::task::yield_now().await;
        signal.resolve("ready").unwrap();

        for waiter in waiters {
            assert_eq!(waiter.await.unwrap(), "ready");
        }
    }

    #[tokio::test]
    async fn test_late_waiters_observe_immediately() {
        let signal = Signal::new();
        signal.resolve(42).unwrap();

        for _ in 0..3 {
            assert_eq!(signal.wait().await, 42);
        }
    }

    #[tokio::test]
    async fn test_peek_unresolved() {
        let signal: Signal<u32> = Signal::new();
        assert_eq!(signal.peek(), None);
        assert!(!signal.is_resolved());
    }
}
