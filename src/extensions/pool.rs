//! Process-wide pools of compression codecs.
//!
//! A deflate stream carries a large internal state, so connections borrow a
//! codec for the duration of one message and hand it back afterwards. The
//! [`Pooled`] guard owns the borrowed codec; dropping it resets the codec and
//! returns it, on success, error or cancellation alike. A codec can be
//! returned at most once because the guard gives it up when dropped.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

use flate2::{Compress, Decompress};

/// Idle codecs kept per pool. Extras are dropped on return.
const MAX_IDLE: usize = 64;

/// A codec that can be reset to a freshly constructed state.
pub trait Recycle {
    fn recycle(&mut self);
}

impl Recycle for Compress {
    fn recycle(&mut self) {
        self.reset();
    }
}

impl Recycle for Decompress {
    fn recycle(&mut self) {
        self.reset(false);
    }
}

/// A pool of idle codecs shared by every connection in the process.
#[derive(Debug)]
pub struct CodecPool<T> {
    idle: Mutex<Vec<T>>,
}

impl<T> CodecPool<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Borrow an idle codec, or build one with `make` if none is idle.
    pub fn acquire(&'static self, make: impl FnOnce() -> T) -> Pooled<T>
    where
        T: Recycle + 'static,
    {
        let reused = self.lock().pop();
        let item = match reused {
            Some(item) => item,
            None => {
                tracing::debug!("codec pool miss");
                make()
            }
        };
        Pooled {
            item: Some(item),
            pool: self,
        }
    }

    /// Number of codecs currently waiting to be borrowed.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.lock().len()
    }

    fn release(&self, item: T) {
        let mut idle = self.lock();
        if idle.len() < MAX_IDLE {
            idle.push(item);
        }
    }

    // The idle list stays consistent across a panic, so poisoning is ignored.
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Default for CodecPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive loan of a pooled codec.
pub struct Pooled<T: Recycle + 'static> {
    item: Option<T>,
    pool: &'static CodecPool<T>,
}

impl<T: Recycle + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `Drop` takes the item out.
        match &self.item {
            Some(item) => item,
            None => unreachable!("pooled codec used after release"),
        }
    }
}

impl<T: Recycle + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("pooled codec used after release"),
        }
    }
}

impl<T: Recycle + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(mut item) = self.item.take() {
            item.recycle();
            self.pool.release(item);
        }
    }
}

impl<T: Recycle + 'static> std::fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").finish_non_exhaustive()
    }
}
