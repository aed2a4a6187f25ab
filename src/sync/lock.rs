//! An async mutex whose acquisition can be abandoned.

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::sync::Cancel;

/// Mutual exclusion that gives up when the caller cancels or the owning
/// connection closes.
///
/// Giving up never leaves the lock held: a guard only exists once the
/// acquisition has won.
#[derive(Debug, Default)]
pub struct CancellableLock<T> {
    inner: Mutex<T>,
}

impl<T> CancellableLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Wait for the lock.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed(None)` if `closed` fires first
    /// - `Error::Cancelled` if `cancel` fires or its deadline passes first
    pub async fn lock(&self, cancel: &Cancel, closed: &Cancel) -> Result<MutexGuard<'_, T>> {
        if closed.is_cancelled() {
            return Err(Error::ConnectionClosed(None));
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            biased;
            () = closed.cancelled() => Err(Error::ConnectionClosed(None)),
            () = cancel.cancelled() => Err(Error::Cancelled),
            guard = self.inner.lock() => Ok(guard),
        }
    }

    /// Take the lock only if it is free right now.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        self.inner.try_lock().ok()
    }
}
