//! # wsflate - WebSocket frame engine with permessage-deflate
//!
//! `wsflate` drives an already upgraded WebSocket stream: framing, masking,
//! fragmentation, control frames, the close handshake and RFC 7692
//! compression. The HTTP upgrade and extension negotiation happen elsewhere;
//! their outcome is passed in through [`Config`].
//!
//! ## Features
//!
//! - **Concurrent access** - read, write, ping and close from separate tasks
//!   over a shared `&Connection`
//! - **Cancellation** - every blocking call takes a [`Cancel`] token with an
//!   optional deadline
//! - **Context takeover over pooled codecs** - compressors are borrowed per
//!   message from a process-wide pool and primed from a 32 KiB window
//! - **Resource limits** on frame size, message size and fragment count
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsflate::{Cancel, Config, Connection, MessageType, Role};
//!
//! let conn = Connection::new(stream, Role::Client, Config::client())?;
//! conn.write(&Cancel::new(), MessageType::Text, b"hello").await?;
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod message;
pub mod protocol;
pub mod sync;

pub use config::{Config, Limits};
pub use connection::{Connection, ConnectionState, MessageWriter, Role};
pub use error::{Error, Result};
pub use extensions::{CompressionMode, CompressionOptions};
pub use message::{CloseCode, CloseFrame, MessageType};
pub use protocol::{FrameHeader, OpCode};
pub use sync::Cancel;
