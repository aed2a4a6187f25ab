//! Shared helpers for the integration tests.
//!
//! Connections run over in-memory duplex pipes, so tests need no sockets.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex};
use tokio::task::JoinHandle;
use wsflate::codec::{FrameReader, FrameWriter};
use wsflate::protocol::FrameValidator;
use wsflate::{Cancel, CompressionMode, Config, Connection, Error, Limits, Role};

pub type Conn = Connection<DuplexStream>;

/// A pipe large enough that writers never wait on the peer in these tests.
pub const PIPE_CAPACITY: usize = 1 << 20;

pub fn soon() -> Cancel {
    Cancel::timeout(Duration::from_secs(10))
}

pub fn pair_with(client: Config, server: Config) -> (Arc<Conn>, Arc<Conn>) {
    let (a, b) = duplex(PIPE_CAPACITY);
    (
        Arc::new(Connection::new(a, Role::Client, client).unwrap()),
        Arc::new(Connection::new(b, Role::Server, server).unwrap()),
    )
}

pub fn pair() -> (Arc<Conn>, Arc<Conn>) {
    pair_with(Config::client(), Config::server())
}

pub fn compressed_pair(mode: CompressionMode) -> (Arc<Conn>, Arc<Conn>) {
    pair_with(
        Config::client().with_compression(mode),
        Config::server().with_compression(mode),
    )
}

/// The far end of a server connection, speaking raw frames as a client.
pub struct RawClient {
    pub reader: FrameReader<ReadHalf<DuplexStream>>,
    pub writer: FrameWriter<WriteHalf<DuplexStream>>,
}

impl RawClient {
    /// Read the next frame, returning its header and unmasked payload.
    pub async fn next_frame(&mut self) -> (wsflate::FrameHeader, Vec<u8>) {
        let header = self.reader.read_header().await.unwrap();
        let mut payload = Vec::new();
        self.reader.read_payload(&header, &mut payload).await.unwrap();
        (header, payload)
    }
}

pub fn server_with_raw_client(config: Config) -> (Arc<Conn>, RawClient) {
    let (a, b) = duplex(PIPE_CAPACITY);
    let server = Arc::new(Connection::new(a, Role::Server, config).unwrap());
    let (rd, wr) = tokio::io::split(b);
    let validator = FrameValidator::new(Role::Client, Limits::default()).with_compression(true);
    let raw = RawClient {
        reader: FrameReader::new(rd, validator, 8192),
        writer: FrameWriter::new(wr, Role::Client, 8192),
    };
    (server, raw)
}

/// A client connection plus the raw server end it talks to.
pub fn client_with_raw_server(config: Config) -> (Arc<Conn>, RawServer) {
    let (a, b) = duplex(PIPE_CAPACITY);
    let client = Arc::new(Connection::new(a, Role::Client, config).unwrap());
    let (rd, _wr) = tokio::io::split(b);
    let validator = FrameValidator::new(Role::Server, Limits::default()).with_compression(true);
    (client, RawServer { reader: FrameReader::new(rd, validator, 8192) })
}

/// Reads and unmasks the frames a client connection sends.
pub struct RawServer {
    pub reader: FrameReader<ReadHalf<DuplexStream>>,
}

impl RawServer {
    pub async fn next_frame(&mut self) -> (wsflate::FrameHeader, Vec<u8>) {
        let header = self.reader.read_header().await.unwrap();
        assert!(header.is_masked(), "client frames must be masked");
        let mut payload = Vec::new();
        self.reader.read_payload(&header, &mut payload).await.unwrap();
        (header, payload)
    }
}

/// Echo every data message back until the connection ends.
pub fn spawn_echo(conn: Arc<Conn>) -> JoinHandle<Error> {
    tokio::spawn(async move {
        loop {
            let (typ, payload) = match conn.read(&Cancel::new()).await {
                Ok(message) => message,
                Err(e) => return e,
            };
            if let Err(e) = conn.write(&Cancel::new(), typ, &payload).await {
                return e;
            }
        }
    })
}

/// Keep reading and counting data messages until the connection ends.
pub fn spawn_sink(conn: Arc<Conn>, received: Arc<AtomicUsize>) -> JoinHandle<Error> {
    tokio::spawn(async move {
        loop {
            match conn.read(&Cancel::new()).await {
                Ok(_) => {
                    received.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => return e,
            }
        }
    })
}
