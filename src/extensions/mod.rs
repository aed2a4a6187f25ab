//! Permessage-deflate support (RFC 7692).
//!
//! Negotiation happens outside this crate. The handshake layer hands over the
//! agreed parameters as [`CompressionOptions`] (or the symmetric shorthand
//! [`CompressionMode`]), and each connection derives from them whether its
//! write side and its read side keep their compression context across
//! messages.
//!
//! Compressors and decompressors are drawn from process-wide pools
//! ([`pool`]), so a codec never carries history from one message to the
//! next. Context takeover is rebuilt on every message from a
//! [`SlidingWindow`] of recent plaintext ([`deflate`]).

pub mod deflate;
pub mod pool;
pub mod window;

pub use deflate::{CompressionContext, DEFLATE_TRAILER, deflate_idle_count, inflate_idle_count};
pub use pool::{CodecPool, Pooled, Recycle};
pub use window::{SlidingWindow, WINDOW_SIZE};

use crate::connection::Role;

/// Negotiated compression mode, fixed for the lifetime of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionMode {
    /// No permessage-deflate. RSV1 on any frame is a protocol error.
    #[default]
    Disabled,
    /// Both peers keep their LZ77 window across messages.
    ContextTakeover,
    /// Every message is compressed from an empty dictionary.
    NoContextTakeover,
}

impl CompressionMode {
    /// Symmetric options for this mode, `None` when disabled.
    #[must_use]
    pub const fn options(self) -> Option<CompressionOptions> {
        match self {
            CompressionMode::Disabled => None,
            CompressionMode::ContextTakeover => Some(CompressionOptions {
                client_no_context_takeover: false,
                server_no_context_takeover: false,
            }),
            CompressionMode::NoContextTakeover => Some(CompressionOptions {
                client_no_context_takeover: true,
                server_no_context_takeover: true,
            }),
        }
    }

    /// Default single-shot compression threshold for this mode.
    ///
    /// Without context takeover a small message has no history to draw on,
    /// so the bar is higher.
    #[must_use]
    pub const fn default_threshold(self) -> usize {
        match self {
            CompressionMode::Disabled => 0,
            CompressionMode::ContextTakeover => 128,
            CompressionMode::NoContextTakeover => 512,
        }
    }
}

/// Negotiated permessage-deflate parameters.
///
/// The maximum window size is fixed at 32 KiB, the largest window the
/// deflate format allows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CompressionOptions {
    /// The client resets its compressor after every message.
    pub client_no_context_takeover: bool,
    /// The server resets its compressor after every message.
    pub server_no_context_takeover: bool,
}

impl CompressionOptions {
    /// Symmetric view of the options.
    ///
    /// Mixed options report [`CompressionMode::ContextTakeover`], since at
    /// least one direction keeps its window.
    #[must_use]
    pub const fn mode(&self) -> CompressionMode {
        if self.client_no_context_takeover && self.server_no_context_takeover {
            CompressionMode::NoContextTakeover
        } else {
            CompressionMode::ContextTakeover
        }
    }

    /// Whether the side playing `role` keeps its compressor history.
    #[must_use]
    pub const fn write_takeover(&self, role: Role) -> bool {
        match role {
            Role::Client => !self.client_no_context_takeover,
            Role::Server => !self.server_no_context_takeover,
        }
    }

    /// Whether the side playing `role` must keep the peer's history when
    /// decompressing.
    #[must_use]
    pub const fn read_takeover(&self, role: Role) -> bool {
        match role {
            Role::Client => !self.server_no_context_takeover,
            Role::Server => !self.client_no_context_takeover,
        }
    }
}
