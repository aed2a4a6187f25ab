//! WebSocket connections over an upgraded duplex stream.
//!
//! ## Connection Lifecycle
//!
//! 1. **Open** - the stream has been upgraded and options negotiated
//! 2. **Closing** - close frame sent, waiting for the peer's close
//! 3. **Closed** - closed normally or failed
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsflate::{Cancel, CloseCode, Config, Connection, MessageType, Role};
//! use wsflate::extensions::CompressionMode;
//!
//! let config = Config::client().with_compression(CompressionMode::ContextTakeover);
//! let conn = Connection::new(stream, Role::Client, config)?;
//!
//! let cancel = Cancel::timeout(Duration::from_secs(5));
//! conn.write(&cancel, MessageType::Text, b"Hello").await?;
//! let (typ, payload) = conn.read(&cancel).await?;
//! conn.close(&cancel, CloseCode::Normal, "done").await?;
//! ```

mod role;
mod state;
mod writer;

#[allow(clippy::module_inception)]
mod connection;

pub use connection::Connection;
pub use role::Role;
pub use state::ConnectionState;
pub use writer::MessageWriter;
