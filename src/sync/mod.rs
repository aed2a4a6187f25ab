//! Cancellation tokens and the lock that honours them.
//!
//! Every blocking call on a connection takes a [`Cancel`]. Waiting for a lock
//! ends when the lock is acquired, the caller's token fires or its deadline
//! passes, or the connection closes, whichever happens first.

pub mod cancel;
pub mod lock;

pub use cancel::Cancel;
pub use lock::CancellableLock;
