use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flate2::{Compress, Decompress};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::config::Config;
use crate::connection::{ConnectionState, MessageWriter, Role};
use crate::error::{Error, Result};
use crate::extensions::CompressionContext;
use crate::message::{CloseCode, CloseFrame, MessageType};
use crate::protocol::{FrameHeader, FrameValidator, MAX_CONTROL_FRAME_PAYLOAD, MessageAssembler, OpCode};
use crate::sync::{Cancel, CancellableLock};

/// Everything owned by the single active reader.
struct ReadState<T> {
    frames: FrameReader<ReadHalf<T>>,
    assembler: MessageAssembler,
    inflate: Option<CompressionContext<Decompress>>,
    control: Vec<u8>,
}

/// Everything owned by the single active message writer.
pub(super) struct WriteState {
    pub(super) deflate: Option<CompressionContext<Compress>>,
    /// Sink for compressed or buffered payload bytes awaiting a frame.
    pub(super) scratch: Vec<u8>,
}

#[derive(Default)]
struct Shared {
    state: ConnectionState,
    terminal: Option<Error>,
    close_sent: bool,
    close_received: Option<CloseFrame>,
    read_suppressed: bool,
    pings: HashMap<u64, oneshot::Sender<()>>,
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes an outstanding ping when the waiting call goes away.
struct PendingPing<'a> {
    shared: &'a Mutex<Shared>,
    id: u64,
}

impl Drop for PendingPing<'_> {
    fn drop(&mut self) {
        lock_shared(self.shared).pings.remove(&self.id);
    }
}

/// A WebSocket connection over an already upgraded duplex stream.
///
/// All operations take `&self`, so one task may read while others write,
/// ping or close. Three locks order the work:
///
/// - the **read lock** admits one reader at a time,
/// - the **write lock** admits one message writer at a time,
/// - the **frame lock** serializes individual frames, so control frames can
///   slip in between the fragments of a streamed message.
///
/// Every blocking operation takes a [`Cancel`]. Giving up while waiting for a
/// lock or for the next frame header leaves the connection usable. Giving up
/// halfway through a frame cannot be undone and fails the connection.
///
/// Any fatal error is recorded once; from then on every operation reports
/// that same error.
pub struct Connection<T> {
    role: Role,
    config: Config,
    flate_threshold: usize,
    reader: CancellableLock<ReadState<T>>,
    writer: CancellableLock<WriteState>,
    frames: CancellableLock<FrameWriter<WriteHalf<T>>>,
    closed: Cancel,
    shared: Mutex<Shared>,
    next_ping: AtomicU64,
}

impl<T> Connection<T> {
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared().state
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Whether permessage-deflate was negotiated for this connection.
    #[must_use]
    pub fn compression_enabled(&self) -> bool {
        self.config.compression.is_some()
    }

    /// Smallest payload that single-shot writes compress.
    #[must_use]
    pub fn flate_threshold(&self) -> usize {
        self.flate_threshold
    }

    /// The close frame the peer sent, once one has been received.
    #[must_use]
    pub fn close_frame(&self) -> Option<CloseFrame> {
        self.shared().close_received.clone()
    }

    /// The error that ended the connection, if it has ended.
    #[must_use]
    pub fn terminal_error(&self) -> Option<Error> {
        self.shared().terminal.clone()
    }

    /// Tear the connection down without a close handshake.
    ///
    /// Pending and future operations fail with `ConnectionClosed(None)`.
    pub fn close_now(&self) {
        self.teardown(Error::ConnectionClosed(None));
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    fn stored_error(&self) -> Error {
        self.shared()
            .terminal
            .clone()
            .unwrap_or(Error::ConnectionClosed(None))
    }

    /// Mark the connection closed and wake everything blocked on it.
    ///
    /// Keeps an earlier terminal error if there is one.
    pub(super) fn teardown(&self, err: Error) {
        let mut shared = self.shared();
        if shared.state != ConnectionState::Closed {
            tracing::debug!(role = %self.role, reason = %err, "connection closed");
        }
        if shared.terminal.is_none() {
            shared.terminal = Some(err);
        }
        shared.state = ConnectionState::Closed;
        // Dropping the senders wakes ping waiters.
        shared.pings.clear();
        drop(shared);
        self.closed.cancel();
    }

    pub(super) fn check_writable(&self) -> Result<()> {
        let shared = self.shared();
        if let Some(err) = &shared.terminal {
            return Err(err.clone());
        }
        if shared.close_sent {
            return Err(Error::ConnectionClosed(None));
        }
        Ok(())
    }

    fn check_readable(&self) -> Result<()> {
        let shared = self.shared();
        if let Some(err) = &shared.terminal {
            return Err(err.clone());
        }
        if shared.read_suppressed {
            return Err(Error::PolicyViolation(
                "reads are suppressed by close_read".into(),
            ));
        }
        Ok(())
    }

    async fn acquire<'a, S>(
        &self,
        lock: &'a CancellableLock<S>,
        cancel: &Cancel,
    ) -> Result<tokio::sync::MutexGuard<'a, S>> {
        match lock.lock(cancel, &self.closed).await {
            Err(Error::ConnectionClosed(None)) => Err(self.stored_error()),
            other => other,
        }
    }

    /// Run `fut` unless the caller cancels or the connection ends first.
    async fn guarded<R>(&self, cancel: &Cancel, fut: impl Future<Output = Result<R>>) -> Result<R> {
        tokio::select! {
            biased;
            res = fut => res,
            () = self.closed.cancelled() => Err(self.stored_error()),
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Connection<T> {
    /// Wrap an upgraded stream.
    ///
    /// `config.compression` carries the permessage-deflate parameters agreed
    /// during the handshake; `None` disables compression entirely.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if `config` does not validate.
    pub fn new(io: T, role: Role, config: Config) -> Result<Self> {
        config.validate()?;

        let (read_half, write_half) = tokio::io::split(io);
        let compression = config.compression;
        let validator = FrameValidator::new(role, config.limits.clone())
            .with_accept_unmasked(config.accept_unmasked_frames)
            .with_compression(compression.is_some());

        let reader = ReadState {
            frames: FrameReader::new(read_half, validator, config.read_buffer_size),
            assembler: MessageAssembler::new(config.limits.clone()),
            inflate: compression.map(|o| CompressionContext::inflater(o.read_takeover(role))),
            control: Vec::with_capacity(MAX_CONTROL_FRAME_PAYLOAD),
        };
        let writer = WriteState {
            deflate: compression.map(|o| {
                CompressionContext::deflater(config.compression_level, o.write_takeover(role))
            }),
            scratch: Vec::new(),
        };
        let frames = FrameWriter::new(write_half, role, config.write_buffer_size);

        tracing::debug!(
            %role,
            compression = ?compression.map(|o| o.mode()),
            "connection opened"
        );

        Ok(Self {
            role,
            flate_threshold: config.effective_flate_threshold(),
            config,
            reader: CancellableLock::new(reader),
            writer: CancellableLock::new(writer),
            frames: CancellableLock::new(frames),
            closed: Cancel::new(),
            shared: Mutex::new(Shared::default()),
            next_ping: AtomicU64::new(0),
        })
    }

    /// Send a complete message as a single frame.
    ///
    /// With compression negotiated, payloads of at least
    /// [`flate_threshold`](Self::flate_threshold) bytes are compressed.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` if `cancel` fires before the frame lock is
    ///   taken. Once the frame write has started, a cancel also fails the
    ///   connection, even if backpressure kept every byte from going out.
    /// - `Error::Internal` if the compressor fails
    /// - the terminal error once the connection has ended
    pub async fn write(&self, cancel: &Cancel, typ: MessageType, payload: &[u8]) -> Result<()> {
        self.check_writable()?;
        let mut guard = self.acquire(&self.writer, cancel).await?;
        self.check_writable()?;

        let WriteState { deflate, scratch } = &mut *guard;
        let header = FrameHeader::new(true, typ.opcode(), 0);
        match deflate {
            Some(ctx) if payload.len() >= self.flate_threshold => {
                scratch.clear();
                if let Err(e) = ctx.compress_message(payload, scratch) {
                    return Err(self.fail(e).await);
                }
                let result = self.write_frame(cancel, header.with_rsv1(true), scratch).await;
                scratch.clear();
                if result.is_err() {
                    // The peer never saw this message.
                    ctx.forget_history();
                }
                result
            }
            _ => self.write_frame(cancel, header, payload).await,
        }
    }

    /// Start a streamed message.
    ///
    /// The returned writer holds the write lock until it is closed or
    /// dropped. Its writes observe `cancel`.
    ///
    /// # Errors
    ///
    /// `Error::Cancelled` if `cancel` fires while waiting for another writer,
    /// or the terminal error once the connection has ended.
    pub async fn writer(&self, cancel: &Cancel, typ: MessageType) -> Result<MessageWriter<'_, T>> {
        self.check_writable()?;
        let mut guard = self.acquire(&self.writer, cancel).await?;
        self.check_writable()?;

        guard.scratch.clear();
        if let Some(ctx) = guard.deflate.as_mut() {
            if let Err(e) = ctx.begin() {
                return Err(self.fail(e).await);
            }
        }
        Ok(MessageWriter::new(self, guard, cancel.clone(), typ))
    }

    /// Read the next data message.
    ///
    /// Control frames arriving in between are handled here: pings are
    /// answered, pongs resolve [`ping`](Self::ping) calls, and a close frame
    /// completes the close handshake.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled` if `cancel` fires. Between frames this is
    ///   harmless and the next read resumes where this one stopped; mid-frame
    ///   it fails the connection.
    /// - `Error::ConnectionClosed(Some(code))` once the peer's close frame
    ///   arrives
    /// - the terminal error once the connection has ended
    pub async fn read(&self, cancel: &Cancel) -> Result<(MessageType, Vec<u8>)> {
        self.check_readable()?;
        let mut state = self.acquire(&self.reader, cancel).await?;
        self.check_readable()?;
        self.read_message(&mut state, cancel).await
    }

    /// Send a ping and wait for the matching pong.
    ///
    /// Pongs are only seen while some task is reading, so a concurrent
    /// [`read`](Self::read) or [`close_read`](Self::close_read) is needed.
    ///
    /// # Errors
    ///
    /// `Error::Cancelled` if `cancel` fires first, or the terminal error if
    /// the connection ends.
    pub async fn ping(&self, cancel: &Cancel) -> Result<()> {
        self.check_writable()?;
        let id = self.next_ping.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared().pings.insert(id, tx);
        let _pending = PendingPing {
            shared: &self.shared,
            id,
        };

        self.write_frame(cancel, FrameHeader::new(true, OpCode::Ping, 0), &id.to_be_bytes())
            .await?;
        tracing::trace!(id, "ping sent");

        tokio::select! {
            biased;
            res = rx => res.map_err(|_| self.stored_error()),
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Run the close handshake.
    ///
    /// Sends a close frame, then waits for the peer's close frame, reading
    /// and discarding data messages if no other task is reading. The wait is
    /// bounded by `config.close_timeout` as well as `cancel`.
    ///
    /// Closing an already closed connection succeeds.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidCloseCode` for codes that must not be sent
    /// - `Error::Cancelled` if the handshake did not finish in time; the
    ///   connection is torn down regardless
    /// - the terminal error if the connection had already failed
    pub async fn close(&self, cancel: &Cancel, code: CloseCode, reason: &str) -> Result<()> {
        if code.is_reserved() || !code.is_valid() {
            return Err(Error::InvalidCloseCode(code.as_u16()));
        }

        let already_sent = {
            let mut shared = self.shared();
            if let Some(err) = &shared.terminal {
                return match err {
                    Error::ConnectionClosed(_) => Ok(()),
                    other => Err(other.clone()),
                };
            }
            shared.state = ConnectionState::Closing;
            std::mem::replace(&mut shared.close_sent, true)
        };

        let cancel = cancel.with_timeout(self.config.close_timeout);
        tracing::debug!(role = %self.role, code = code.as_u16(), reason, "close handshake started");

        if !already_sent {
            let payload = CloseFrame::new(code, reason).to_payload();
            let header = FrameHeader::new(true, OpCode::Close, 0);
            if let Err(e) = self.write_frame(&cancel, header, &payload).await {
                self.teardown(Error::ConnectionClosed(None));
                return Err(e);
            }
        }

        let result = self.await_peer_close(&cancel).await;
        self.shutdown_writer().await;
        self.teardown(Error::ConnectionClosed(Some(code.as_u16())));
        tracing::debug!(role = %self.role, ok = result.is_ok(), "close handshake finished");
        result
    }

    async fn await_peer_close(&self, cancel: &Cancel) -> Result<()> {
        if let Some(mut state) = self.reader.try_lock() {
            loop {
                match self.read_message(&mut state, cancel).await {
                    Ok((typ, payload)) => {
                        tracing::trace!(%typ, len = payload.len(), "discarded message while closing");
                    }
                    Err(Error::ConnectionClosed(_)) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        }

        // Another task is reading and will see the close frame.
        tokio::select! {
            () = self.closed.cancelled() => Ok(()),
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Write one frame under the frame lock.
    pub(super) async fn write_frame(
        &self,
        cancel: &Cancel,
        header: FrameHeader,
        payload: &[u8],
    ) -> Result<()> {
        let mut frames = self.acquire(&self.frames, cancel).await?;
        let result = tokio::select! {
            biased;
            res = frames.write_frame(header, payload) => res,
            () = self.closed.cancelled() => Err(self.stored_error()),
            () = cancel.cancelled() => Err(Error::Cancelled),
        };
        drop(frames);

        match result {
            Ok(()) => Ok(()),
            Err(Error::Cancelled) => {
                self.fail(Error::Io("write cancelled mid-frame".into())).await;
                Err(Error::Cancelled)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Record `err` as the terminal error and tear the connection down.
    ///
    /// If the error has a close code and no close frame went out yet, one is
    /// sent first, bounded by `config.close_timeout`. Only the first call
    /// has any effect; every call returns the stored error.
    pub(super) async fn fail(&self, err: Error) -> Error {
        let code = {
            let mut shared = self.shared();
            if let Some(existing) = &shared.terminal {
                return existing.clone();
            }
            shared.terminal = Some(err.clone());
            let code = if shared.close_sent { None } else { err.close_code() };
            if code.is_some() {
                shared.close_sent = true;
                shared.state = ConnectionState::Closing;
            }
            code
        };
        tracing::debug!(role = %self.role, error = %err, "connection failed");

        if let Some(code) = code {
            let payload = CloseFrame::new(code, err.to_string()).to_payload();
            let deadline = Cancel::timeout(self.config.close_timeout);
            if let Ok(mut frames) = self.frames.lock(&deadline, &Cancel::new()).await {
                tokio::select! {
                    res = frames.write_frame(FrameHeader::new(true, OpCode::Close, 0), &payload) => {
                        if let Err(e) = res {
                            tracing::trace!(error = %e, "close frame not delivered");
                        }
                    }
                    () = deadline.cancelled() => {}
                }
                tokio::select! {
                    _ = frames.shutdown() => {}
                    () = deadline.cancelled() => {}
                }
            }
        }

        self.teardown(err.clone());
        err
    }

    async fn shutdown_writer(&self) {
        let deadline = Cancel::timeout(self.config.close_timeout);
        if let Ok(mut frames) = self.frames.lock(&deadline, &Cancel::new()).await {
            tokio::select! {
                _ = frames.shutdown() => {}
                () = deadline.cancelled() => {}
            }
        }
    }

    async fn read_message(
        &self,
        state: &mut ReadState<T>,
        cancel: &Cancel,
    ) -> Result<(MessageType, Vec<u8>)> {
        loop {
            let ReadState {
                frames,
                assembler,
                inflate,
                control,
            } = &mut *state;

            // Cancellation here is harmless: no bytes of the header are lost.
            let header = match self.guarded(cancel, frames.read_header()).await {
                Ok(header) => header,
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => return Err(self.fail(e).await),
            };
            tracing::trace!(
                opcode = %header.opcode,
                fin = header.fin,
                rsv1 = header.rsv1,
                len = header.payload_len,
                "read frame header"
            );

            if header.opcode.is_control() {
                control.clear();
                self.read_payload(cancel, frames, &header, control).await?;
                self.handle_control(cancel, &header, control).await?;
                continue;
            }

            if let Err(e) = assembler.accept(&header) {
                return Err(self.fail(e).await);
            }
            self.read_payload(cancel, frames, &header, assembler.buffer_mut())
                .await?;
            if !header.fin {
                continue;
            }

            let message = match assembler.finish() {
                Ok(message) => message,
                Err(e) => return Err(self.fail(e).await),
            };
            let Some(typ) = MessageType::from_opcode(message.opcode) else {
                let err = Error::ProtocolViolation(format!(
                    "unexpected data opcode {}",
                    message.opcode
                ));
                return Err(self.fail(err).await);
            };
            if !message.compressed {
                return Ok((typ, message.payload));
            }

            let Some(ctx) = inflate.as_mut() else {
                return Err(self.fail(Error::ReservedBitsSet).await);
            };
            let mut out = Vec::with_capacity(message.payload.len() * 2);
            if let Err(e) =
                ctx.decompress_message(&message.payload, &mut out, self.config.limits.max_message_size)
            {
                return Err(self.fail(e).await);
            }
            return Ok((typ, out));
        }
    }

    async fn read_payload(
        &self,
        cancel: &Cancel,
        frames: &mut FrameReader<ReadHalf<T>>,
        header: &FrameHeader,
        dst: &mut Vec<u8>,
    ) -> Result<()> {
        match self.guarded(cancel, frames.read_payload(header, dst)).await {
            Ok(()) => Ok(()),
            Err(Error::Cancelled) => {
                self.fail(Error::Io("read cancelled mid-frame".into())).await;
                Err(Error::Cancelled)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn handle_control(&self, cancel: &Cancel, header: &FrameHeader, payload: &[u8]) -> Result<()> {
        match header.opcode {
            OpCode::Ping => {
                tracing::trace!(len = payload.len(), "answering ping");
                self.write_frame(cancel, FrameHeader::new(true, OpCode::Pong, 0), payload)
                    .await
            }
            OpCode::Pong => {
                // Pongs we did not ask for are ignored.
                if let Ok(id) = <[u8; 8]>::try_from(payload) {
                    let waiter = self.shared().pings.remove(&u64::from_be_bytes(id));
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(());
                    }
                }
                Ok(())
            }
            OpCode::Close => {
                let frame = match CloseFrame::parse(payload) {
                    Ok(frame) => frame,
                    Err(e) => return Err(self.fail(e).await),
                };
                let code = frame.code;
                tracing::debug!(code = code.as_u16(), reason = %frame.reason, "close frame received");

                let echo = {
                    let mut shared = self.shared();
                    shared.close_received = Some(frame);
                    shared.state = ConnectionState::Closing;
                    !std::mem::replace(&mut shared.close_sent, true)
                };
                if echo {
                    let reply = if code == CloseCode::NoStatus {
                        Vec::new()
                    } else {
                        CloseFrame::new(code, "").to_payload()
                    };
                    let cancel = cancel.with_timeout(self.config.close_timeout);
                    let header = FrameHeader::new(true, OpCode::Close, 0);
                    if let Err(e) = self.write_frame(&cancel, header, &reply).await {
                        tracing::trace!(error = %e, "close echo not delivered");
                    }
                }
                self.shutdown_writer().await;

                let err = Error::ConnectionClosed(Some(code.as_u16()));
                self.teardown(err.clone());
                Err(err)
            }
            _ => Ok(()),
        }
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Connection<T> {
    /// Stop accepting data messages and keep servicing control frames in the
    /// background.
    ///
    /// Later [`read`](Self::read) calls fail with `Error::PolicyViolation`.
    /// A data message from the peer fails the connection with status 1008.
    /// The background task ends when the connection closes; if `cancel`
    /// fires first, it tears the connection down.
    pub fn close_read(self: &Arc<Self>, cancel: Cancel) -> JoinHandle<()> {
        self.shared().read_suppressed = true;
        let conn = Arc::clone(self);
        tokio::spawn(async move {
            let result = match conn.acquire(&conn.reader, &cancel).await {
                Ok(mut state) => conn.read_message(&mut state, &cancel).await,
                Err(e) => Err(e),
            };
            match result {
                Ok((typ, _)) => {
                    let err = Error::PolicyViolation(format!("unexpected {typ} message after close_read"));
                    conn.fail(err).await;
                }
                Err(Error::Cancelled) => conn.close_now(),
                Err(e) => tracing::trace!(error = %e, "suppressed reader finished"),
            }
        })
    }
}

impl<T> std::fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state())
            .field("compression", &self.config.compression)
            .finish_non_exhaustive()
    }
}
