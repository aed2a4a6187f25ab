//! Message reassembly for WebSocket (RFC 6455 Section 5.4).
//!
//! The assembler sees each data frame header before its payload is read, so
//! sequencing and size limits are enforced without buffering an offending
//! frame. Payload bytes are appended by the reader through [`buffer_mut`].
//!
//! [`buffer_mut`]: MessageAssembler::buffer_mut

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::frame::FrameHeader;

/// Reassembles fragmented WebSocket messages.
#[derive(Debug)]
pub struct MessageAssembler {
    buffer: Vec<u8>,
    fragment_count: usize,
    opcode: Option<OpCode>,
    compressed: bool,
    limits: Limits,
}

impl MessageAssembler {
    pub fn new(limits: Limits) -> Self {
        Self {
            buffer: Vec::new(),
            fragment_count: 0,
            opcode: None,
            compressed: false,
            limits,
        }
    }

    /// Admit the next data frame of the current message.
    ///
    /// A text or binary frame starts a message, a continuation frame extends
    /// one. RSV1 is only meaningful on the first fragment.
    ///
    /// # Errors
    ///
    /// - `Error::ProtocolViolation` on a continuation with no message in
    ///   progress, a new message before the previous one finished, or RSV1
    ///   on a continuation frame
    /// - `Error::TooManyFragments` / `Error::MessageTooLarge` when the frame
    ///   would push the message past the configured limits
    pub fn accept(&mut self, header: &FrameHeader) -> Result<()> {
        if header.opcode.is_control() {
            return Ok(());
        }

        if header.opcode == OpCode::Continuation {
            if self.opcode.is_none() {
                return Err(Error::ProtocolViolation(
                    "Unexpected continuation frame".into(),
                ));
            }
            if header.rsv1 {
                return Err(Error::ProtocolViolation(
                    "RSV1 set on continuation frame".into(),
                ));
            }
        } else if self.opcode.is_some() {
            return Err(Error::ProtocolViolation(
                "Expected continuation frame".into(),
            ));
        }

        self.limits
            .check_fragment_count(self.fragment_count + 1)?;

        let frame_len = usize::try_from(header.payload_len).map_err(|_| Error::MessageTooLarge {
            size: usize::MAX,
            max: self.limits.max_message_size,
        })?;
        let new_size = self.buffer.len().saturating_add(frame_len);
        self.limits.check_message_size(new_size)?;

        if header.opcode != OpCode::Continuation {
            self.opcode = Some(header.opcode);
            self.compressed = header.rsv1;
        }
        self.fragment_count += 1;
        self.buffer.reserve(frame_len);
        Ok(())
    }

    /// Destination for the payload of the frame most recently accepted.
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    pub fn is_assembling(&self) -> bool {
        self.opcode.is_some()
    }

    /// Take the completed message after its final fragment has been read.
    ///
    /// # Errors
    ///
    /// Returns `Error::ProtocolViolation` if no message is in progress.
    pub fn finish(&mut self) -> Result<AssembledMessage> {
        let opcode = self
            .opcode
            .take()
            .ok_or_else(|| Error::ProtocolViolation("No message in progress".into()))?;
        let message = AssembledMessage {
            opcode,
            compressed: self.compressed,
            payload: std::mem::take(&mut self.buffer),
        };
        self.fragment_count = 0;
        self.compressed = false;
        Ok(message)
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.fragment_count = 0;
        self.opcode = None;
        self.compressed = false;
    }
}

/// A fully assembled WebSocket message, still compressed if `compressed` is set.
#[derive(Debug)]
pub struct AssembledMessage {
    pub opcode: OpCode,
    pub compressed: bool,
    pub payload: Vec<u8>,
}
