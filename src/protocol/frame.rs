//! WebSocket frame header parsing and serialization (RFC 6455 Section 5.2).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! ```

use crate::error::{Error, Result};
use crate::protocol::OpCode;

/// Maximum payload size for control frames (RFC 6455).
pub const MAX_CONTROL_FRAME_PAYLOAD: usize = 125;

/// Longest possible encoded header: 2 fixed bytes, 8 length bytes, 4 mask bytes.
pub const MAX_HEADER_LEN: usize = 14;

const FIN_BIT: u8 = 0x80;
const RSV1_BIT: u8 = 0x40;
const RSV2_BIT: u8 = 0x20;
const RSV3_BIT: u8 = 0x10;
const MASK_BIT: u8 = 0x80;

/// A decoded frame header.
///
/// `rsv1` marks a permessage-deflate compressed message and is only
/// meaningful on the first fragment. The mask key is present iff the frame
/// is masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1 (permessage-deflate "compressed" flag).
    pub rsv1: bool,
    /// Reserved bit 2. Never negotiated.
    pub rsv2: bool,
    /// Reserved bit 3. Never negotiated.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: OpCode,
    /// Payload length. Always below 2^63.
    pub payload_len: u64,
    /// Masking key, if the frame is masked.
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Header for an unmasked frame with all reserved bits clear.
    #[must_use]
    pub const fn new(fin: bool, opcode: OpCode, payload_len: u64) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            payload_len,
            mask: None,
        }
    }

    /// Builder-style setter for the compressed flag.
    #[must_use]
    pub const fn with_rsv1(mut self, rsv1: bool) -> Self {
        self.rsv1 = rsv1;
        self
    }

    /// Builder-style setter for the masking key.
    #[must_use]
    pub const fn with_mask(mut self, mask: Option<[u8; 4]>) -> Self {
        self.mask = mask;
        self
    }

    /// Whether the frame carries a masking key.
    #[inline]
    #[must_use]
    pub const fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Decode a header from the start of `buf`.
    ///
    /// Returns the header and the number of bytes it occupied.
    ///
    /// # Errors
    ///
    /// - `Error::IncompleteFrame` if `buf` ends before the header does
    /// - `Error::ReservedOpcode` for opcodes 0x3-0x7 and 0xB-0xF
    /// - `Error::ProtocolViolation` if a 64-bit length has its top bit set
    /// - `Error::ReservedBitsSet`, `Error::FragmentedControlFrame` or
    ///   `Error::ControlFrameTooLarge` for malformed control frames
    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        if buf.len() < 2 {
            return Err(Error::IncompleteFrame {
                needed: 2 - buf.len(),
            });
        }

        let byte0 = buf[0];
        let byte1 = buf[1];
        let masked = byte1 & MASK_BIT != 0;
        let len_field = byte1 & 0x7F;

        let ext_len = match len_field {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let header_len = 2 + ext_len + if masked { 4 } else { 0 };
        if buf.len() < header_len {
            return Err(Error::IncompleteFrame {
                needed: header_len - buf.len(),
            });
        }

        let opcode = OpCode::from_u8(byte0 & 0x0F)?;
        let payload_len = match len_field {
            126 => u64::from(u16::from_be_bytes([buf[2], buf[3]])),
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(Error::ProtocolViolation(
                        "most significant bit of 64-bit payload length is set".into(),
                    ));
                }
                len
            }
            short => u64::from(short),
        };

        let mask = masked.then(|| {
            let at = 2 + ext_len;
            [buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]
        });

        let header = Self {
            fin: byte0 & FIN_BIT != 0,
            rsv1: byte0 & RSV1_BIT != 0,
            rsv2: byte0 & RSV2_BIT != 0,
            rsv3: byte0 & RSV3_BIT != 0,
            opcode,
            payload_len,
            mask,
        };
        header.check_control()?;

        Ok((header, header_len))
    }

    /// Control frames are final, at most 125 bytes and never compressed.
    fn check_control(&self) -> Result<()> {
        if !self.opcode.is_control() {
            return Ok(());
        }
        if !self.fin {
            return Err(Error::FragmentedControlFrame);
        }
        if self.payload_len > MAX_CONTROL_FRAME_PAYLOAD as u64 {
            return Err(Error::ControlFrameTooLarge(self.payload_len));
        }
        if self.rsv1 {
            return Err(Error::ReservedBitsSet);
        }
        Ok(())
    }

    /// Number of bytes [`encode`](Self::encode) will produce.
    #[must_use]
    pub const fn encoded_len(&self) -> usize {
        let ext_len = if self.payload_len <= 125 {
            0
        } else if self.payload_len <= u16::MAX as u64 {
            2
        } else {
            8
        };
        let mask_len = if self.mask.is_some() { 4 } else { 0 };
        2 + ext_len + mask_len
    }

    /// Encode into `buf` using the shortest length form for the payload length.
    ///
    /// Returns the number of bytes written.
    pub fn encode(&self, buf: &mut [u8; MAX_HEADER_LEN]) -> usize {
        let mut byte0 = self.opcode.as_u8();
        if self.fin {
            byte0 |= FIN_BIT;
        }
        if self.rsv1 {
            byte0 |= RSV1_BIT;
        }
        if self.rsv2 {
            byte0 |= RSV2_BIT;
        }
        if self.rsv3 {
            byte0 |= RSV3_BIT;
        }
        buf[0] = byte0;

        let mask_bit = if self.mask.is_some() { MASK_BIT } else { 0 };
        let mut offset = 2;
        if self.payload_len <= 125 {
            buf[1] = mask_bit | self.payload_len as u8;
        } else if self.payload_len <= u16::MAX as u64 {
            buf[1] = mask_bit | 126;
            buf[2..4].copy_from_slice(&(self.payload_len as u16).to_be_bytes());
            offset += 2;
        } else {
            buf[1] = mask_bit | 127;
            buf[2..10].copy_from_slice(&self.payload_len.to_be_bytes());
            offset += 8;
        }

        if let Some(mask) = self.mask {
            buf[offset..offset + 4].copy_from_slice(&mask);
            offset += 4;
        }

        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(header: &FrameHeader) -> Vec<u8> {
        let mut buf = [0u8; MAX_HEADER_LEN];
        let n = header.encode(&mut buf);
        buf[..n].to_vec()
    }

    #[test]
    fn test_decode_unmasked_text_header() {
        // FIN=1, opcode=1 (text), unmasked, len=5
        let (header, len) = FrameHeader::decode(&[0x81, 0x05]).unwrap();
        assert_eq!(len, 2);
        assert!(header.fin);
        assert!(!header.rsv1);
        assert_eq!(header.opcode, OpCode::Text);
        assert_eq!(header.payload_len, 5);
        assert!(!header.is_masked());
    }

    #[test]
    fn test_decode_masked_header() {
        let data = [0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d];
        let (header, len) = FrameHeader::decode(&data).unwrap();
        assert_eq!(len, 6);
        assert_eq!(header.mask, Some([0x37, 0xfa, 0x21, 0x3d]));
        assert_eq!(header.payload_len, 5);
    }

    #[test]
    fn test_decode_compressed_fragment() {
        // FIN=0, RSV1=1, opcode=2
        let (header, _) = FrameHeader::decode(&[0x42, 0x10]).unwrap();
        assert!(!header.fin);
        assert!(header.rsv1);
        assert_eq!(header.opcode, OpCode::Binary);
    }

    #[test]
    fn test_decode_extended_length_16() {
        let (header, len) = FrameHeader::decode(&[0x82, 0x7e, 0x01, 0x00]).unwrap();
        assert_eq!(len, 4);
        assert_eq!(header.payload_len, 256);
    }

    #[test]
    fn test_decode_extended_length_64() {
        let data = [0x82, 0x7f, 0, 0, 0, 0, 0, 1, 0, 0];
        let (header, len) = FrameHeader::decode(&data).unwrap();
        assert_eq!(len, 10);
        assert_eq!(header.payload_len, 65536);
    }

    #[test]
    fn test_decode_rejects_top_bit_length() {
        let data = [0x82, 0x7f, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            FrameHeader::decode(&data),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_decode_incomplete() {
        assert!(matches!(
            FrameHeader::decode(&[0x81]),
            Err(Error::IncompleteFrame { needed: 1 })
        ));
        assert!(matches!(
            FrameHeader::decode(&[0x82, 0x7f, 0, 0]),
            Err(Error::IncompleteFrame { needed: 6 })
        ));
        assert!(matches!(
            FrameHeader::decode(&[0x81, 0x85, 0x37]),
            Err(Error::IncompleteFrame { needed: 3 })
        ));
    }

    #[test]
    fn test_decode_reserved_opcode() {
        assert!(matches!(
            FrameHeader::decode(&[0x83, 0x00]),
            Err(Error::ReservedOpcode(0x3))
        ));
    }

    #[test]
    fn test_decode_control_frame_rules() {
        // Ping with FIN=0
        assert!(matches!(
            FrameHeader::decode(&[0x09, 0x00]),
            Err(Error::FragmentedControlFrame)
        ));
        // Ping with 126-byte payload
        assert!(matches!(
            FrameHeader::decode(&[0x89, 0x7e, 0x00, 0x7e]),
            Err(Error::ControlFrameTooLarge(126))
        ));
        // Close with RSV1
        assert!(matches!(
            FrameHeader::decode(&[0xc8, 0x00]),
            Err(Error::ReservedBitsSet)
        ));
        // Ping at the limit is fine
        assert!(FrameHeader::decode(&[0x89, 0x7d]).is_ok());
    }

    #[test]
    fn test_encode_minimal_length_forms() {
        let short = FrameHeader::new(true, OpCode::Text, 125);
        assert_eq!(encode(&short), vec![0x81, 125]);

        let medium = FrameHeader::new(true, OpCode::Binary, 126);
        assert_eq!(encode(&medium), vec![0x82, 126, 0x00, 0x7e]);

        let max16 = FrameHeader::new(true, OpCode::Binary, 65535);
        assert_eq!(encode(&max16), vec![0x82, 126, 0xff, 0xff]);

        let long = FrameHeader::new(false, OpCode::Binary, 65536);
        assert_eq!(encode(&long), vec![0x02, 127, 0, 0, 0, 0, 0, 1, 0, 0]);
    }

    #[test]
    fn test_encode_flags_and_mask() {
        let header = FrameHeader::new(true, OpCode::Text, 5)
            .with_rsv1(true)
            .with_mask(Some([1, 2, 3, 4]));
        let bytes = encode(&header);
        assert_eq!(bytes, vec![0xc1, 0x85, 1, 2, 3, 4]);
        assert_eq!(bytes.len(), header.encoded_len());
        assert_eq!(FrameHeader::decode(&bytes).unwrap(), (header, 6));
    }
}
