//! Configuration and limits for WebSocket connections.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::extensions::{CompressionMode, CompressionOptions};

/// Configuration limits for WebSocket connections.
///
/// These limits prevent resource exhaustion and bound memory usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum size of a single incoming frame in bytes.
    ///
    /// Default: 16 MB (16 * 1024 * 1024)
    pub max_frame_size: usize,

    /// Maximum size of a complete incoming message in bytes.
    ///
    /// Applies to the reassembled payload and, for compressed messages, to
    /// the decompressed output as well.
    ///
    /// Default: 64 MB (64 * 1024 * 1024)
    pub max_message_size: usize,

    /// Maximum number of fragments in a single message.
    ///
    /// Default: 128
    pub max_fragment_count: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,   // 16 MB
            max_message_size: 64 * 1024 * 1024, // 64 MB
            max_fragment_count: 128,
        }
    }
}

impl Limits {
    /// Create new limits with custom values.
    #[must_use]
    pub const fn new(
        max_frame_size: usize,
        max_message_size: usize,
        max_fragment_count: usize,
    ) -> Self {
        Self {
            max_frame_size,
            max_message_size,
            max_fragment_count,
        }
    }

    /// Set the maximum frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum message size.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Validate that message size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_message_size(&self, size: usize) -> Result<()> {
        if size > self.max_message_size {
            Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that frame size is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FrameTooLarge`] if `size` exceeds the configured maximum.
    pub const fn check_frame_size(&self, size: u64) -> Result<()> {
        if size > self.max_frame_size as u64 {
            Err(Error::FrameTooLarge {
                size,
                max: self.max_frame_size,
            })
        } else {
            Ok(())
        }
    }

    /// Validate that fragment count is within limits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyFragments`] if `count` exceeds the configured maximum.
    pub const fn check_fragment_count(&self, count: usize) -> Result<()> {
        if count > self.max_fragment_count {
            Err(Error::TooManyFragments {
                count,
                max: self.max_fragment_count,
            })
        } else {
            Ok(())
        }
    }
}

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Resource limits for incoming data.
    pub limits: Limits,

    /// Number of buffered payload bytes after which a streaming writer emits
    /// a fragment.
    ///
    /// Default: 4 KB (4096)
    pub fragment_size: usize,

    /// Negotiated permessage-deflate parameters, `None` when compression is off.
    ///
    /// Default: None
    pub compression: Option<CompressionOptions>,

    /// Deflate level used for outgoing messages (0-9).
    ///
    /// Default: 6
    pub compression_level: u32,

    /// Minimum payload length eligible for compression in single-shot writes.
    ///
    /// `None` picks the default for the negotiated mode: 128 bytes with
    /// context takeover, 512 without.
    pub flate_threshold: Option<usize>,

    /// Accept unmasked frames from clients (server only).
    ///
    /// RFC 6455 requires clients to mask all frames. Only useful against
    /// test peers that skip masking.
    ///
    /// Default: false
    pub accept_unmasked_frames: bool,

    /// Read buffer size (in bytes).
    ///
    /// Default: 8 KB (8192)
    pub read_buffer_size: usize,

    /// Write buffer size (in bytes).
    ///
    /// Default: 8 KB (8192)
    pub write_buffer_size: usize,

    /// Upper bound on the close handshake, and on the close frame written
    /// when a protocol error tears the connection down.
    ///
    /// Default: 5 seconds
    pub close_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            fragment_size: 4096,
            compression: None,
            compression_level: 6,
            flate_threshold: None,
            accept_unmasked_frames: false,
            read_buffer_size: 8192,
            write_buffer_size: 8192,
            close_timeout: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Create a new configuration with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for the client side of a connection.
    #[must_use]
    pub fn client() -> Self {
        Self::default()
    }

    /// Configuration for the server side of a connection.
    #[must_use]
    pub fn server() -> Self {
        Self {
            accept_unmasked_frames: false,
            ..Default::default()
        }
    }

    /// Set custom limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Set fragment size for streamed messages.
    #[must_use]
    pub const fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size;
        self
    }

    /// Apply the negotiated compression mode symmetrically.
    #[must_use]
    pub fn with_compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode.options();
        self
    }

    /// Apply negotiated compression parameters that may differ per direction.
    #[must_use]
    pub fn with_compression_options(mut self, options: CompressionOptions) -> Self {
        self.compression = Some(options);
        self
    }

    /// Set the deflate level for outgoing messages.
    #[must_use]
    pub const fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }

    /// Set the minimum payload length that single-shot writes compress.
    #[must_use]
    pub const fn with_flate_threshold(mut self, threshold: usize) -> Self {
        self.flate_threshold = Some(threshold);
        self
    }

    /// Set read buffer size.
    #[must_use]
    pub const fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    /// Set write buffer size.
    #[must_use]
    pub const fn with_write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Set the close handshake timeout.
    #[must_use]
    pub const fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Threshold in effect once defaults for the compression mode are applied.
    #[must_use]
    pub fn effective_flate_threshold(&self) -> usize {
        match (self.flate_threshold, self.compression) {
            (Some(threshold), _) => threshold,
            (None, Some(options)) => options.mode().default_threshold(),
            (None, None) => 0,
        }
    }

    /// Check values that cannot be expressed in the types.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a compression level above 9, a
    /// zero fragment size, or zero-sized I/O buffers.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(Error::InvalidConfig(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        if self.fragment_size == 0 {
            return Err(Error::InvalidConfig("fragment_size must be non-zero".into()));
        }
        if self.read_buffer_size == 0 || self.write_buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer sizes must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_default() {
        let limits = Limits::default();
        assert_eq!(limits.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(limits.max_message_size, 64 * 1024 * 1024);
        assert_eq!(limits.max_fragment_count, 128);
    }

    #[test]
    fn test_limits_checks() {
        let limits = Limits::new(64 * 1024, 256 * 1024, 16);
        assert!(limits.check_message_size(1024).is_ok());
        assert!(limits.check_message_size(300 * 1024).is_err());
        assert!(limits.check_frame_size(64 * 1024).is_ok());
        assert!(limits.check_frame_size(u64::MAX >> 1).is_err());
        assert!(limits.check_fragment_count(16).is_ok());
        assert!(limits.check_fragment_count(17).is_err());
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.fragment_size, 4096);
        assert!(config.compression.is_none());
        assert!(!config.accept_unmasked_frames);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::new()
            .with_limits(Limits::new(64 * 1024, 256 * 1024, 16))
            .with_fragment_size(1024)
            .with_read_buffer_size(1024)
            .with_write_buffer_size(2048);

        assert_eq!(config.fragment_size, 1024);
        assert_eq!(config.limits.max_frame_size, 64 * 1024);
        assert_eq!(config.read_buffer_size, 1024);
        assert_eq!(config.write_buffer_size, 2048);
    }

    #[test]
    fn test_default_threshold_follows_mode() {
        let takeover = Config::new().with_compression(CompressionMode::ContextTakeover);
        assert_eq!(takeover.effective_flate_threshold(), 128);

        let no_takeover = Config::new().with_compression(CompressionMode::NoContextTakeover);
        assert_eq!(no_takeover.effective_flate_threshold(), 512);

        let explicit = no_takeover.with_flate_threshold(64);
        assert_eq!(explicit.effective_flate_threshold(), 64);

        let disabled = Config::new().with_compression(CompressionMode::Disabled);
        assert!(disabled.compression.is_none());
    }

    #[test]
    fn test_config_validate() {
        assert!(Config::new().with_compression_level(9).validate().is_ok());
        assert!(matches!(
            Config::new().with_compression_level(10).validate(),
            Err(Error::InvalidConfig(_))
        ));
        assert!(Config::new().with_fragment_size(0).validate().is_err());
    }
}
