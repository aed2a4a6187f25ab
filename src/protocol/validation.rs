//! Per-connection validation of incoming frame headers.
//!
//! Header decoding already rejects malformed control frames. This layer adds
//! the checks that depend on the connection: which side must mask, whether
//! permessage-deflate was negotiated, and the configured frame size limit.

use crate::config::Limits;
use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::FrameHeader;

/// Frame validator for incoming WebSocket frames.
#[derive(Debug, Clone)]
pub struct FrameValidator {
    role: Role,
    limits: Limits,
    accept_unmasked_frames: bool,
    compression_negotiated: bool,
}

impl FrameValidator {
    /// Create a validator for a connection playing `role`.
    pub fn new(role: Role, limits: Limits) -> Self {
        Self {
            role,
            limits,
            accept_unmasked_frames: false,
            compression_negotiated: false,
        }
    }

    /// Accept unmasked frames from clients (non-RFC compliant, for testing).
    #[must_use]
    pub fn with_accept_unmasked(mut self, accept: bool) -> Self {
        self.accept_unmasked_frames = accept;
        self
    }

    /// Allow RSV1 on data frames because permessage-deflate was negotiated.
    #[must_use]
    pub fn with_compression(mut self, negotiated: bool) -> Self {
        self.compression_negotiated = negotiated;
        self
    }

    /// Validate an incoming frame header.
    ///
    /// # Errors
    ///
    /// - `Error::UnmaskedClientFrame` - Server received unmasked frame from client
    /// - `Error::MaskedServerFrame` - Client received masked frame from server
    /// - `Error::ReservedBitsSet` - RSV bits set without negotiated extension
    /// - `Error::FrameTooLarge` - Frame exceeds size limit
    pub fn validate(&self, header: &FrameHeader) -> Result<()> {
        self.validate_masking(header.is_masked())?;
        self.validate_rsv_bits(header)?;
        self.limits.check_frame_size(header.payload_len)
    }

    fn validate_masking(&self, masked: bool) -> Result<()> {
        match self.role {
            Role::Server if !masked && !self.accept_unmasked_frames => {
                Err(Error::UnmaskedClientFrame)
            }
            Role::Client if masked => Err(Error::MaskedServerFrame),
            _ => Ok(()),
        }
    }

    fn validate_rsv_bits(&self, header: &FrameHeader) -> Result<()> {
        if header.rsv2 || header.rsv3 {
            return Err(Error::ReservedBitsSet);
        }
        if header.rsv1 && (!self.compression_negotiated || header.opcode.is_control()) {
            return Err(Error::ReservedBitsSet);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OpCode;

    fn data_header(masked: bool) -> FrameHeader {
        FrameHeader::new(true, OpCode::Text, 10).with_mask(masked.then_some([1, 2, 3, 4]))
    }

    #[test]
    fn test_server_rejects_unmasked_client_frame() {
        let validator = FrameValidator::new(Role::Server, Limits::default());
        assert!(matches!(
            validator.validate(&data_header(false)),
            Err(Error::UnmaskedClientFrame)
        ));
        assert!(validator.validate(&data_header(true)).is_ok());
    }

    #[test]
    fn test_client_rejects_masked_server_frame() {
        let validator = FrameValidator::new(Role::Client, Limits::default());
        assert!(matches!(
            validator.validate(&data_header(true)),
            Err(Error::MaskedServerFrame)
        ));
        assert!(validator.validate(&data_header(false)).is_ok());
    }

    #[test]
    fn test_server_accepts_unmasked_when_configured() {
        let validator =
            FrameValidator::new(Role::Server, Limits::default()).with_accept_unmasked(true);
        assert!(validator.validate(&data_header(false)).is_ok());
    }

    #[test]
    fn test_rsv1_requires_compression() {
        let header = data_header(false).with_rsv1(true);

        let plain = FrameValidator::new(Role::Client, Limits::default());
        assert!(matches!(plain.validate(&header), Err(Error::ReservedBitsSet)));

        let deflate = FrameValidator::new(Role::Client, Limits::default()).with_compression(true);
        assert!(deflate.validate(&header).is_ok());
    }

    #[test]
    fn test_rsv2_rsv3_always_rejected() {
        let validator =
            FrameValidator::new(Role::Client, Limits::default()).with_compression(true);
        let mut header = data_header(false);
        header.rsv2 = true;
        assert!(matches!(validator.validate(&header), Err(Error::ReservedBitsSet)));

        let mut header = data_header(false);
        header.rsv3 = true;
        assert!(matches!(validator.validate(&header), Err(Error::ReservedBitsSet)));
    }

    #[test]
    fn test_frame_size_limit() {
        let limits = Limits::default().with_max_frame_size(100);
        let validator = FrameValidator::new(Role::Client, limits);

        let ok = FrameHeader::new(true, OpCode::Binary, 100);
        assert!(validator.validate(&ok).is_ok());

        let big = FrameHeader::new(true, OpCode::Binary, 101);
        assert!(matches!(
            validator.validate(&big),
            Err(Error::FrameTooLarge { size: 101, max: 100 })
        ));
    }
}
