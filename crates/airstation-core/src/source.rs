//! Reading source abstraction and cancellable subscriptions.
//!
//! A [`ReadingSource`] pushes [`RawSensorEvent`]s to a handler from whatever
//! execution context it owns. Subscribing returns a [`Subscription`]; dropping
//! or cancelling it releases the registration.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use airstation_types::RawSensorEvent;

use crate::error::Result;

/// Callback invoked by a source for every raw event.
///
/// Handlers must not block: they run on the producer's context.
pub type EventHandler = Arc<dyn Fn(RawSensorEvent) + Send + Sync>;

type Release = Box<dyn FnOnce() + Send>;

/// A push-based producer of raw sensor events.
pub trait ReadingSource: Send + Sync {
    /// Register `handler` for every subsequent event.
    ///
    /// Per-kind delivery order is preserved. The returned [`Subscription`]
    /// unregisters the handler when cancelled or dropped.
    fn subscribe(&self, handler: EventHandler) -> Result<Subscription>;

    /// Human-readable name for logs.
    fn name(&self) -> &str {
        "source"
    }
}

/// Handle for an active source registration.
///
/// [`cancel`](Self::cancel) is idempotent and safe to call during teardown;
/// the release hook runs at most once.
pub struct Subscription {
    token: CancellationToken,
    release: Mutex<Option<Release>>,
}

impl Subscription {
    /// A subscription whose only effect on cancel is tripping its token.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            release: Mutex::new(None),
        }
    }

    /// A subscription that runs `release` once when cancelled.
    pub fn with_release<F>(token: CancellationToken, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            token,
            release: Mutex::new(Some(Box::new(release))),
        }
    }

    /// Token tripped on cancellation, for producers to select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether the subscription has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the subscription and release the registration.
    pub fn cancel(&self) {
        self.token.cancel();
        let release = self
            .release
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(release) = release {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_cancel_is_idempotent() {
        let released = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&released);
        let sub = Subscription::with_release(CancellationToken::new(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!sub.is_cancelled());
        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());
        assert_eq!(released.load(Ordering::SeqCst), 1);

        drop(sub);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_releases() {
        let released = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&released);
        let token = CancellationToken::new();
        let sub = Subscription::with_release(token.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(sub);
        assert!(token.is_cancelled());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
