use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::connection::Role;
use crate::error::{Error, Result};
use crate::protocol::frame::{FrameHeader, MAX_HEADER_LEN};
use crate::protocol::mask::{apply_mask, mask_into};
use crate::protocol::validation::FrameValidator;

/// Generate a random seed for the fallback mask generator.
/// Falls back to system time if getrandom fails.
fn random_mask_seed() -> u32 {
    let mut buf = [0u8; 4];
    if getrandom::getrandom(&mut buf).is_ok() {
        u32::from_le_bytes(buf)
    } else {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u32)
            .unwrap_or(0x1234_5678)
    }
}

/// Reads frame headers and payloads from the inbound half of a stream.
pub struct FrameReader<R> {
    io: R,
    read_buf: BytesMut,
    chunk_size: usize,
    validator: FrameValidator,
}

impl<R> FrameReader<R> {
    #[must_use]
    pub fn new(io: R, validator: FrameValidator, buffer_size: usize) -> Self {
        Self {
            io,
            read_buf: BytesMut::with_capacity(buffer_size),
            chunk_size: buffer_size.max(MAX_HEADER_LEN),
            validator,
        }
    }

    /// Bytes received but not yet consumed.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.read_buf.len()
    }

    #[must_use]
    pub fn into_inner(self) -> R {
        self.io
    }
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Read and validate the next frame header.
    ///
    /// Cancel safe: nothing is consumed until a whole header is buffered, so
    /// a dropped call loses no bytes.
    ///
    /// # Errors
    ///
    /// Header decoding and validation errors, I/O errors, and
    /// `Error::ConnectionClosed(None)` if the stream ends.
    pub async fn read_header(&mut self) -> Result<FrameHeader> {
        loop {
            match FrameHeader::decode(&self.read_buf) {
                Ok((header, len)) => {
                    self.validator.validate(&header)?;
                    self.read_buf.advance(len);
                    return Ok(header);
                }
                Err(Error::IncompleteFrame { .. }) => self.fill().await?,
                Err(e) => return Err(e),
            }
        }
    }

    /// Append the payload of `header` to `dst`, unmasking it if needed.
    ///
    /// Not cancel safe: a dropped call leaves the stream mid-frame.
    ///
    /// # Errors
    ///
    /// I/O errors, and `Error::ConnectionClosed(None)` if the stream ends
    /// before the payload does.
    pub async fn read_payload(&mut self, header: &FrameHeader, dst: &mut Vec<u8>) -> Result<()> {
        let mut remaining = usize::try_from(header.payload_len).map_err(|_| {
            Error::FrameTooLarge {
                size: header.payload_len,
                max: usize::MAX,
            }
        })?;
        dst.reserve(remaining);

        let mut offset = 0;
        while remaining > 0 {
            if self.read_buf.is_empty() {
                self.fill().await?;
            }
            let n = remaining.min(self.read_buf.len());
            let start = dst.len();
            dst.extend_from_slice(&self.read_buf[..n]);
            self.read_buf.advance(n);
            if let Some(mask) = header.mask {
                offset = apply_mask(&mut dst[start..], mask, offset);
            }
            remaining -= n;
        }
        Ok(())
    }

    async fn fill(&mut self) -> Result<()> {
        self.read_buf.reserve(self.chunk_size);
        let n = self.io.read_buf(&mut self.read_buf).await?;
        if n == 0 {
            return Err(Error::ConnectionClosed(None));
        }
        Ok(())
    }
}

/// Serializes frames onto the outbound half of a stream.
///
/// Each frame is encoded into one buffer and written with a single
/// `write_all`, so callers holding the frame lock never interleave bytes.
pub struct FrameWriter<W> {
    io: W,
    write_buf: BytesMut,
    role: Role,
    mask_counter: u32,
}

impl<W> FrameWriter<W> {
    #[must_use]
    pub fn new(io: W, role: Role, buffer_size: usize) -> Self {
        Self {
            io,
            write_buf: BytesMut::with_capacity(buffer_size),
            role,
            mask_counter: random_mask_seed(),
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn get_ref(&self) -> &W {
        &self.io
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.io
    }

    #[must_use]
    pub fn into_inner(self) -> W {
        self.io
    }

    /// Fresh key per frame. The OS generator is preferred; the counter mix
    /// only covers the case where it is unavailable.
    fn next_mask(&mut self) -> [u8; 4] {
        let mut key = [0u8; 4];
        if getrandom::getrandom(&mut key).is_ok() {
            return key;
        }
        self.mask_counter = self.mask_counter.wrapping_add(0x9E37_79B9);
        let a = self.mask_counter;
        let b = a.wrapping_mul(0x85EB_CA6B);
        let c = b ^ (b >> 13);
        let d = c.wrapping_mul(0xC2B2_AE35);
        d.to_le_bytes()
    }
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// Write one frame carrying `payload`.
    ///
    /// The length and mask in `header` are filled in here: the length from
    /// `payload`, the mask freshly for clients and never for servers. The
    /// payload is masked into an internal buffer and left untouched.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn write_frame(&mut self, mut header: FrameHeader, payload: &[u8]) -> Result<()> {
        header.payload_len = payload.len() as u64;
        header.mask = if self.role.must_mask() {
            Some(self.next_mask())
        } else {
            None
        };

        let mut head = [0u8; MAX_HEADER_LEN];
        let head_len = header.encode(&mut head);

        self.write_buf.clear();
        self.write_buf.reserve(head_len + payload.len());
        self.write_buf.extend_from_slice(&head[..head_len]);
        match header.mask {
            Some(mask) => {
                let start = self.write_buf.len();
                self.write_buf.resize(start + payload.len(), 0);
                mask_into(&mut self.write_buf[start..], payload, mask, 0);
            }
            None => self.write_buf.extend_from_slice(payload),
        }

        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;

        tracing::trace!(
            opcode = %header.opcode,
            fin = header.fin,
            rsv1 = header.rsv1,
            len = payload.len(),
            "wrote frame"
        );
        Ok(())
    }

    /// Shut down the outbound half.
    ///
    /// # Errors
    ///
    /// I/O errors from the underlying stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }
}
