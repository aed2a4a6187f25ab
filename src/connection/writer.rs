use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::MutexGuard;

use super::connection::WriteState;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::extensions::DEFLATE_TRAILER;
use crate::message::MessageType;
use crate::protocol::{FrameHeader, OpCode};
use crate::sync::Cancel;

/// A message written in pieces.
///
/// Bytes are buffered (compressed first, if compression is negotiated) and
/// sent as a fragment whenever more than `config.fragment_size` bytes are
/// pending. [`close`](Self::close) sends the final fragment. Control frames
/// from other tasks can go out between fragments.
///
/// Streamed messages are always compressed when compression is negotiated,
/// whatever their size.
///
/// Dropping the writer before `close` abandons the message. If fragments
/// were already sent the peer is left mid-message, so the connection is
/// torn down.
pub struct MessageWriter<'a, T> {
    conn: &'a Connection<T>,
    state: MutexGuard<'a, WriteState>,
    cancel: Cancel,
    typ: MessageType,
    frames_sent: usize,
    done: bool,
}

impl<'a, T> MessageWriter<'a, T> {
    pub(super) fn new(
        conn: &'a Connection<T>,
        state: MutexGuard<'a, WriteState>,
        cancel: Cancel,
        typ: MessageType,
    ) -> Self {
        Self {
            conn,
            state,
            cancel,
            typ,
            frames_sent: 0,
            done: false,
        }
    }

    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.typ
    }

    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.state.deflate.is_some()
    }

    /// Fragments sent so far.
    #[must_use]
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    fn next_header(&self, fin: bool) -> FrameHeader {
        if self.frames_sent == 0 {
            FrameHeader::new(fin, self.typ.opcode(), 0).with_rsv1(self.is_compressed())
        } else {
            FrameHeader::new(fin, OpCode::Continuation, 0)
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> MessageWriter<'_, T> {
    /// Append `data` to the message. Returns the number of bytes taken,
    /// which is always all of them.
    ///
    /// # Errors
    ///
    /// `Error::Cancelled` if the writer's cancel fires while a fragment is
    /// being sent. The connection is failed as well, even when no byte of
    /// that fragment was written. Otherwise the terminal error once the
    /// connection has ended.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.conn.check_writable()?;

        let fragment_size = self.conn.config().fragment_size;
        let ready = {
            let WriteState { deflate, scratch } = &mut *self.state;
            // The last bytes may turn out to be the sync-flush trailer, which
            // must not reach the wire.
            let hold = match deflate {
                Some(ctx) => {
                    if let Err(e) = ctx.write(data, scratch) {
                        return Err(self.conn.fail(e).await);
                    }
                    DEFLATE_TRAILER.len()
                }
                None => {
                    scratch.extend_from_slice(data);
                    0
                }
            };
            (scratch.len() >= fragment_size + hold).then(|| scratch.len() - hold)
        };

        if let Some(len) = ready {
            self.send(len, false).await?;
        }
        Ok(data.len())
    }

    /// Finish the message by sending its final fragment.
    ///
    /// # Errors
    ///
    /// As for [`write`](Self::write).
    pub async fn close(mut self) -> Result<()> {
        self.conn.check_writable()?;

        {
            let WriteState { deflate, scratch } = &mut *self.state;
            if let Some(ctx) = deflate {
                if let Err(e) = ctx.finish(scratch) {
                    return Err(self.conn.fail(e).await);
                }
            }
        }

        let len = self.state.scratch.len();
        self.send(len, true).await?;
        self.done = true;
        tracing::trace!(typ = %self.typ, frames = self.frames_sent, "streamed message sent");
        Ok(())
    }

    async fn send(&mut self, len: usize, fin: bool) -> Result<()> {
        let header = self.next_header(fin);
        self.conn
            .write_frame(&self.cancel, header, &self.state.scratch[..len])
            .await?;
        self.state.scratch.drain(..len);
        self.frames_sent += 1;
        Ok(())
    }
}

impl<T> Drop for MessageWriter<'_, T> {
    fn drop(&mut self) {
        self.state.scratch.clear();
        if self.done {
            return;
        }
        if let Some(ctx) = self.state.deflate.as_mut() {
            ctx.abort();
            ctx.forget_history();
        }
        if self.frames_sent > 0 {
            self.conn.teardown(Error::Io(
                "message writer dropped after partial message".into(),
            ));
        }
    }
}

impl<T> std::fmt::Debug for MessageWriter<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageWriter")
            .field("typ", &self.typ)
            .field("frames_sent", &self.frames_sent)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}
