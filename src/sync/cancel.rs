//! Cooperative cancellation with an optional deadline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Inner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// A cloneable cancellation signal.
///
/// Clones share the same flag, so cancelling any clone cancels all of them.
/// A deadline belongs to the handle it was set on: [`with_timeout`] derives a
/// handle that also expires on its own, without affecting the original.
///
/// [`with_timeout`]: Cancel::with_timeout
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    inner: Arc<Inner>,
    deadline: Option<Instant>,
}

impl Cancel {
    /// A token that fires only when [`cancel`](Self::cancel) is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh token that also fires once `timeout` has elapsed.
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::new().with_timeout(timeout)
    }

    /// Derive a handle sharing this token's flag that additionally expires
    /// after `timeout`. An earlier existing deadline is kept.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a handle sharing this token's flag that additionally expires
    /// at `deadline`. An earlier existing deadline is kept.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Self {
            inner: Arc::clone(&self.inner),
            deadline: Some(deadline),
        }
    }

    /// Fire the token, waking every task waiting on it.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Whether the token has fired or its deadline has passed.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolves once the token fires or its deadline passes.
    ///
    /// Cancel safe.
    pub async fn cancelled(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent `cancel` is not missed.
        notified.as_mut().enable();
        if self.is_cancelled() {
            return;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = &mut notified => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => notified.await,
        }
    }
}
