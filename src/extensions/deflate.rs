//! Per-direction permessage-deflate state (RFC 7692 Section 7).
//!
//! A codec is borrowed from the pool for exactly one message. Context
//! takeover is emulated by priming each borrowed codec with the last 32 KiB
//! of plaintext this direction has carried, which is the same dictionary a
//! never-reset codec would be working from. This is sound because every
//! message ends with a sync flush, so the next message always starts on a
//! fresh deflate block.
//!
//! Output goes to a sink passed on each call rather than a stored writer,
//! so single-shot and streamed messages cannot leave a redirected
//! destination behind for each other.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};
use crate::extensions::pool::{CodecPool, Pooled, Recycle};
use crate::extensions::window::{SlidingWindow, WINDOW_SIZE};

/// Bytes a sync flush ends with. Senders strip them, receivers append them.
pub const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Empty stored block with BFINAL set. Only decodes as the end of the stream
/// when the inflater sits on a block boundary.
const FINAL_EMPTY_BLOCK: [u8; 5] = [0x01, 0x00, 0x00, 0xff, 0xff];

static DEFLATE_POOLS: [CodecPool<Compress>; 10] = [const { CodecPool::new() }; 10];
static INFLATE_POOL: CodecPool<Decompress> = CodecPool::new();

/// Idle compressors pooled for `level`.
#[must_use]
pub fn deflate_idle_count(level: u32) -> usize {
    deflate_pool(level).idle_count()
}

/// Idle decompressors pooled process-wide.
#[must_use]
pub fn inflate_idle_count() -> usize {
    INFLATE_POOL.idle_count()
}

fn deflate_pool(level: u32) -> &'static CodecPool<Compress> {
    &DEFLATE_POOLS[level.min(9) as usize]
}

/// Compression state for one direction of one connection.
///
/// `window` is present only when this direction keeps context across
/// messages. `active` holds the codec of an in-flight streamed message.
#[derive(Debug)]
pub struct CompressionContext<C: Recycle + 'static> {
    window: Option<SlidingWindow>,
    active: Option<Pooled<C>>,
    level: u32,
}

impl<C: Recycle + 'static> CompressionContext<C> {
    /// Whether this direction keeps its dictionary across messages.
    #[must_use]
    pub fn context_takeover(&self) -> bool {
        self.window.is_some()
    }

    /// Whether a message is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Return the borrowed codec, if any, abandoning the message in progress.
    ///
    /// Part of an abandoned message may already be in the window while the
    /// peer never saw it, so the window is cleared. Compressing without
    /// history is always decodable by the peer.
    pub fn abort(&mut self) {
        if self.active.take().is_some() {
            self.forget_history();
        }
    }

    /// Clear the window, e.g. after a compressed message could not be sent.
    pub fn forget_history(&mut self) {
        if let Some(window) = self.window.as_mut() {
            window.reset();
        }
    }

    /// History the next message will be primed with.
    #[must_use]
    pub fn window(&self) -> Option<&SlidingWindow> {
        self.window.as_ref()
    }
}

impl CompressionContext<Compress> {
    /// Write-side context compressing at `level` (0-9).
    #[must_use]
    pub fn deflater(level: u32, context_takeover: bool) -> Self {
        Self {
            window: context_takeover.then(|| SlidingWindow::new(WINDOW_SIZE)),
            active: None,
            level: level.min(9),
        }
    }

    /// Start a message: borrow a compressor and prime it with the window.
    ///
    /// # Errors
    ///
    /// Returns `Error::Compression` if the dictionary cannot be installed;
    /// the codec has already been returned by then.
    pub fn begin(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Ok(());
        }
        let level = self.level;
        let mut codec = deflate_pool(level).acquire(|| Compress::new(Compression::new(level), false));
        if let Some(window) = self.window.as_ref().filter(|w| !w.is_empty()) {
            codec.set_dictionary(window.as_slice())?;
        }
        self.active = Some(codec);
        Ok(())
    }

    /// Compress the next chunk of the current message into `sink`.
    ///
    /// Output is not flushed, so `sink` may receive fewer bytes than the
    /// chunk is worth until [`finish`](Self::finish).
    ///
    /// # Errors
    ///
    /// Returns `Error::Compression` on codec failure, after returning the codec.
    pub fn write(&mut self, chunk: &[u8], sink: &mut Vec<u8>) -> Result<()> {
        self.begin()?;
        let Some(codec) = self.active.as_mut() else {
            return Err(Error::Internal("no compressor borrowed".into()));
        };
        if let Err(err) = deflate_into(codec, chunk, sink, FlushCompress::None) {
            self.abort();
            return Err(err);
        }
        if let Some(window) = self.window.as_mut() {
            window.write(chunk);
        }
        Ok(())
    }

    /// Flush the current message into `sink`, drop the trailing
    /// `00 00 ff ff`, and return the codec to the pool.
    ///
    /// `sink` must already hold at least the last four compressed bytes
    /// produced for the message so the trailer can be recognised.
    ///
    /// # Errors
    ///
    /// Returns `Error::Compression` on codec failure.
    pub fn finish(&mut self, sink: &mut Vec<u8>) -> Result<()> {
        self.begin()?;
        let result = match self.active.as_mut() {
            Some(codec) => deflate_into(codec, &[], sink, FlushCompress::Sync),
            None => Err(Error::Internal("no compressor borrowed".into())),
        };
        if result.is_err() {
            self.abort();
        }
        self.active = None;
        result?;
        if sink.ends_with(&DEFLATE_TRAILER) {
            sink.truncate(sink.len() - DEFLATE_TRAILER.len());
        }
        Ok(())
    }

    /// Compress a whole message into `sink` in one go.
    ///
    /// # Errors
    ///
    /// Returns `Error::Compression` on codec failure. The codec is returned
    /// to the pool on every path.
    pub fn compress_message(&mut self, payload: &[u8], sink: &mut Vec<u8>) -> Result<()> {
        let result = self.compress_steps(payload, sink);
        if result.is_err() {
            self.abort();
        }
        tracing::trace!(input = payload.len(), output = sink.len(), "compressed message");
        result
    }

    fn compress_steps(&mut self, payload: &[u8], sink: &mut Vec<u8>) -> Result<()> {
        self.begin()?;
        self.write(payload, sink)?;
        self.finish(sink)
    }
}

impl CompressionContext<Decompress> {
    /// Read-side context.
    #[must_use]
    pub fn inflater(context_takeover: bool) -> Self {
        Self {
            window: context_takeover.then(|| SlidingWindow::new(WINDOW_SIZE)),
            active: None,
            level: 0,
        }
    }

    /// Decompress one complete message body into `out`.
    ///
    /// `input` is the reassembled payload without its trailer.
    ///
    /// # Errors
    ///
    /// - `Error::Compression` for malformed deflate data
    /// - `Error::MessageTooLarge` if the output would exceed `limit` bytes
    pub fn decompress_message(
        &mut self,
        input: &[u8],
        out: &mut Vec<u8>,
        limit: usize,
    ) -> Result<()> {
        let mut codec = INFLATE_POOL.acquire(|| Decompress::new(false));
        if let Some(window) = self.window.as_ref().filter(|w| !w.is_empty()) {
            codec.set_dictionary(window.as_slice())?;
        }

        let start = out.len();
        let mut ended = inflate_into(&mut codec, input, out, start, limit)?;
        if !ended {
            ended = inflate_into(&mut codec, &DEFLATE_TRAILER, out, start, limit)?;
        }
        // A body cut off mid-block swallows the final block as data.
        if !ended {
            ended = inflate_into(&mut codec, &FINAL_EMPTY_BLOCK, out, start, limit)?;
        }
        drop(codec);
        if !ended {
            return Err(Error::Compression("compressed message is truncated".into()));
        }

        if let Some(window) = self.window.as_mut() {
            window.write(&out[start..]);
        }
        tracing::trace!(input = input.len(), output = out.len() - start, "decompressed message");
        Ok(())
    }
}

fn deflate_into(
    codec: &mut Compress,
    mut input: &[u8],
    out: &mut Vec<u8>,
    flush: FlushCompress,
) -> Result<()> {
    loop {
        if out.capacity() - out.len() < 64 {
            out.reserve(input.len().max(256));
        }
        let before_in = codec.total_in();
        codec.compress_vec(input, out, flush)?;
        let consumed = (codec.total_in() - before_in) as usize;
        input = &input[consumed..];

        if input.is_empty() && out.len() < out.capacity() {
            return Ok(());
        }
    }
}

/// Inflate `input` into `out`. Returns `true` once the stream has ended.
fn inflate_into(
    codec: &mut Decompress,
    mut input: &[u8],
    out: &mut Vec<u8>,
    start: usize,
    limit: usize,
) -> Result<bool> {
    loop {
        if out.len() == out.capacity() {
            out.reserve((input.len() * 4).clamp(1024, 64 * 1024));
        }
        let before_in = codec.total_in();
        let before_out = out.len();
        let status = codec.decompress_vec(input, out, FlushDecompress::Sync)?;
        let consumed = (codec.total_in() - before_in) as usize;
        input = &input[consumed..];

        let size = out.len() - start;
        if size > limit {
            return Err(Error::MessageTooLarge { size, max: limit });
        }

        match status {
            Status::StreamEnd => return Ok(true),
            _ if input.is_empty() && out.len() < out.capacity() => return Ok(false),
            _ if consumed == 0 && out.len() == before_out && out.len() < out.capacity() => {
                return Err(Error::Compression("inflate made no progress".into()));
            }
            _ => {}
        }
    }
}
