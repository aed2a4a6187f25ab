//! permessage-deflate behaviour as seen on the wire and end to end.

mod harness;

use harness::{client_with_raw_server, compressed_pair, server_with_raw_client, soon};
use wsflate::extensions::WINDOW_SIZE;
use wsflate::{CompressionMode, Config, Error, FrameHeader, Limits, MessageType, OpCode};

fn compressed_server(mode: CompressionMode) -> Config {
    Config::server().with_compression(mode)
}

#[tokio::test]
async fn test_threshold_decides_rsv1() {
    let (server, mut raw) = server_with_raw_client(compressed_server(CompressionMode::ContextTakeover));
    assert_eq!(server.flate_threshold(), 128);

    server.write(&soon(), MessageType::Text, b"small message").await.unwrap();
    let (header, payload) = raw.next_frame().await;
    assert!(!header.rsv1);
    assert_eq!(payload, b"small message");

    let large = "x".repeat(1200);
    server.write(&soon(), MessageType::Text, large.as_bytes()).await.unwrap();
    let (header, payload) = raw.next_frame().await;
    assert!(header.rsv1);
    assert!(header.fin);
    assert!(payload.len() < 1200);
}

#[tokio::test]
async fn test_no_takeover_uses_higher_threshold() {
    let (server, mut raw) = server_with_raw_client(compressed_server(CompressionMode::NoContextTakeover));
    assert_eq!(server.flate_threshold(), 512);

    let medium = "y".repeat(300);
    server.write(&soon(), MessageType::Binary, medium.as_bytes()).await.unwrap();
    let (header, _) = raw.next_frame().await;
    assert!(!header.rsv1);
}

#[tokio::test]
async fn test_client_frames_with_low_threshold() {
    let config = Config::client()
        .with_compression(CompressionMode::ContextTakeover)
        .with_flate_threshold(64);
    let (client, mut raw) = client_with_raw_server(config);

    client.write(&soon(), MessageType::Text, b"small message").await.unwrap();
    let (header, payload) = raw.next_frame().await;
    assert_eq!(header.opcode, OpCode::Text);
    assert!(header.fin);
    assert!(!header.rsv1);
    assert_eq!(payload, b"small message");

    let phrase = "a repeated phrase, ".repeat(64);
    let large = &phrase.as_bytes()[..1200];
    client.write(&soon(), MessageType::Text, large).await.unwrap();
    let (header, payload) = raw.next_frame().await;
    assert!(header.rsv1);
    assert!(header.fin);
    assert!(header.payload_len < 1200);
    assert_eq!(payload.len() as u64, header.payload_len);
}

#[tokio::test]
async fn test_takeover_shrinks_repeated_messages() {
    let message = "the quick brown fox jumps over the lazy dog, ".repeat(20);

    let mut sizes = Vec::new();
    for mode in [CompressionMode::ContextTakeover, CompressionMode::NoContextTakeover] {
        let (server, mut raw) = server_with_raw_client(compressed_server(mode));
        let mut frame_sizes = Vec::new();
        for _ in 0..3 {
            server.write(&soon(), MessageType::Text, message.as_bytes()).await.unwrap();
            let (header, payload) = raw.next_frame().await;
            assert!(header.rsv1);
            frame_sizes.push(payload.len());
        }
        sizes.push(frame_sizes);
    }

    let (takeover, fresh) = (&sizes[0], &sizes[1]);
    // Later messages can point back into earlier ones.
    assert!(takeover[1] <= takeover[0]);
    assert!(takeover[2] <= takeover[0]);
    assert!(takeover[2] < fresh[2]);
    // Without takeover each message starts over.
    assert_eq!(fresh[0], fresh[1]);
    assert_eq!(fresh[1], fresh[2]);
}

#[tokio::test]
async fn test_single_shot_and_streamed_interleave() {
    let (client, server) = compressed_pair(CompressionMode::ContextTakeover);

    let messages: Vec<String> = (0..6).map(|i| format!("payload number {i}; ").repeat(40)).collect();
    for (i, msg) in messages.iter().enumerate() {
        if i % 2 == 0 {
            client.write(&soon(), MessageType::Text, msg.as_bytes()).await.unwrap();
        } else {
            let mut writer = client.writer(&soon(), MessageType::Text).await.unwrap();
            for chunk in msg.as_bytes().chunks(50) {
                writer.write(chunk).await.unwrap();
            }
            writer.close().await.unwrap();
        }
    }

    for msg in &messages {
        let (typ, payload) = server.read(&soon()).await.unwrap();
        assert_eq!(typ, MessageType::Text);
        assert_eq!(payload, msg.as_bytes());
    }
}

#[tokio::test]
async fn test_round_trip_edge_sizes() {
    for mode in [CompressionMode::ContextTakeover, CompressionMode::NoContextTakeover] {
        let (client, server) = compressed_pair(mode);

        // Empty streamed message: the compressed body is a lone stored block.
        let writer = client.writer(&soon(), MessageType::Binary).await.unwrap();
        writer.close().await.unwrap();
        let (_, payload) = server.read(&soon()).await.unwrap();
        assert!(payload.is_empty());

        // Larger than the window, so the history must be trimmed.
        let big: Vec<u8> = (0..WINDOW_SIZE * 3).map(|i| (i % 251) as u8).collect();
        for _ in 0..3 {
            client.write(&soon(), MessageType::Binary, &big).await.unwrap();
            let (_, payload) = server.read(&soon()).await.unwrap();
            assert_eq!(payload, big);
        }
    }
}

#[tokio::test]
async fn test_empty_single_shot_writes() {
    for mode in [CompressionMode::ContextTakeover, CompressionMode::NoContextTakeover] {
        let config = |c: Config| c.with_compression(mode).with_flate_threshold(0);
        let (client, server) = harness::pair_with(config(Config::client()), config(Config::server()));

        client.write(&soon(), MessageType::Text, b"").await.unwrap();
        client.write(&soon(), MessageType::Text, b"after").await.unwrap();

        let (typ, payload) = server.read(&soon()).await.unwrap();
        assert_eq!(typ, MessageType::Text);
        assert!(payload.is_empty());
        let (_, payload) = server.read(&soon()).await.unwrap();
        assert_eq!(payload, b"after");
    }
}

#[tokio::test]
async fn test_server_to_client_direction() {
    let (client, server) = compressed_pair(CompressionMode::ContextTakeover);
    for i in 0..10 {
        let msg = format!("from the server {i} ").repeat(30);
        server.write(&soon(), MessageType::Text, msg.as_bytes()).await.unwrap();
        let (_, payload) = client.read(&soon()).await.unwrap();
        assert_eq!(payload, msg.as_bytes());
    }
}

#[tokio::test]
async fn test_decompression_bomb_is_rejected() {
    let limits = Limits::default().with_max_message_size(64 * 1024);
    let config = compressed_server(CompressionMode::NoContextTakeover).with_limits(limits);
    let (server, mut raw) = server_with_raw_client(config);

    // A megabyte of zeros deflates to about a kilobyte.
    let mut body = Vec::new();
    let mut ctx = wsflate::extensions::CompressionContext::deflater(9, false);
    ctx.compress_message(&vec![0u8; 1 << 20], &mut body).unwrap();
    assert!(body.len() < 64 * 1024);

    raw.writer
        .write_frame(FrameHeader::new(true, OpCode::Binary, 0).with_rsv1(true), &body)
        .await
        .unwrap();

    assert!(matches!(
        server.read(&soon()).await,
        Err(Error::MessageTooLarge { .. })
    ));
    let (close, _) = raw.next_frame().await;
    assert_eq!(close.opcode, OpCode::Close);
}

#[tokio::test]
async fn test_garbage_compressed_payload_is_protocol_error() {
    let (server, mut raw) = server_with_raw_client(compressed_server(CompressionMode::ContextTakeover));

    raw.writer
        .write_frame(
            FrameHeader::new(true, OpCode::Text, 0).with_rsv1(true),
            &[0xff, 0xff, 0xff, 0xff, 0xff],
        )
        .await
        .unwrap();

    let err = server.read(&soon()).await.unwrap_err();
    assert!(matches!(err, Error::Compression(_)));
    let (close, payload) = raw.next_frame().await;
    assert_eq!(close.opcode, OpCode::Close);
    assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1002);
}

#[tokio::test]
async fn test_truncated_compressed_payload_is_protocol_error() {
    let (server, mut raw) = server_with_raw_client(compressed_server(CompressionMode::NoContextTakeover));

    let text: String = (0..200).map(|i| format!("entry {i}: user logged in\n")).collect();
    let mut body = Vec::new();
    let mut ctx = wsflate::extensions::CompressionContext::deflater(6, false);
    ctx.compress_message(text.as_bytes(), &mut body).unwrap();

    raw.writer
        .write_frame(
            FrameHeader::new(true, OpCode::Text, 0).with_rsv1(true),
            &body[..body.len() / 2],
        )
        .await
        .unwrap();

    let err = server.read(&soon()).await.unwrap_err();
    assert!(matches!(err, Error::Compression(_)));
    let (close, payload) = raw.next_frame().await;
    assert_eq!(close.opcode, OpCode::Close);
    assert_eq!(u16::from_be_bytes([payload[0], payload[1]]), 1002);
}
