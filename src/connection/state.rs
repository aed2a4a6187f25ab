//! Lifecycle of an established connection.

/// Connection state.
///
/// A connection starts `Open` because it is only built once the upgrade
/// handshake has finished elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Data flows in both directions.
    #[default]
    Open,
    /// A close frame has been sent; waiting for the peer's.
    Closing,
    /// Closed normally or failed. Every call fails fast.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}
