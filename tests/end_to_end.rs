//! Integration tests driving the public surface (`server::accept` /
//! `client::connect` / `Connection`) over an in-memory duplex pipe,
//! mirroring the end-to-end scenarios in the spec's testable-properties
//! section: echo round-trip, fragmented reassembly with an interleaved
//! ping, oversize rejection, and the closing handshake.

use std::time::Duration;
use tokio::io::{duplex, DuplexStream};
use wsendpoint::assembler::Message;
use wsendpoint::client::{self, RequestTarget};
use wsendpoint::frame::{Frame, OpCode};
use wsendpoint::handshake::{ClientHandshakeOptions, ServerHandshakeOptions};
use wsendpoint::{server, Connection, Side, WebSocketConfig, WsError};

fn test_config() -> WebSocketConfig {
    WebSocketConfig {
        max_size: Some(1024),
        max_queue: Some(8),
        ping_interval: None,
        ping_timeout: None,
        close_timeout: Duration::from_secs(1),
    }
}

async fn handshake_pair(
    config: WebSocketConfig,
) -> (Connection<DuplexStream>, Connection<DuplexStream>) {
    let (client_io, server_io) = duplex(1 << 16);
    let target = RequestTarget::new("example.com", 80, "/chat", false);

    let client_fut = client::connect(
        client_io,
        &target,
        &config,
        ClientHandshakeOptions::new("", ""),
    );
    let server_fut = server::accept(server_io, &config, &ServerHandshakeOptions::default());

    let (client_result, server_result) = tokio::join!(client_fut, server_fut);
    let client = client_result.unwrap();
    let (server, path) = server_result.unwrap();
    assert_eq!(path, "/chat");
    (client, server)
}

#[tokio::test]
async fn echo_round_trip_of_multibyte_text() {
    let (client, server) = handshake_pair(test_config()).await;

    client.send(Message::Text("héllo".to_string())).await.unwrap();
    let received = server.recv().await.unwrap();
    assert_eq!(received, Message::Text("héllo".to_string()));

    server.send(received).await.unwrap();
    let echoed = client.recv().await.unwrap();
    assert_eq!(echoed, Message::Text("héllo".to_string()));
}

#[tokio::test]
async fn binary_message_round_trips_through_a_real_connection() {
    let (client, server) = handshake_pair(test_config()).await;

    client
        .send(Message::Binary(vec![1, 2, 3, 4, 5]))
        .await
        .unwrap();
    let received = server.recv().await.unwrap();
    assert_eq!(received, Message::Binary(vec![1, 2, 3, 4, 5]));
}

/// Fragmentation and control-frame interleaving at the wire level (the
/// frame codec's contract the coordinator is built on): two CONT frames
/// with a PING sandwiched between them must preserve both the ping's
/// payload and the exact byte sequence of the fragmented message, matching
/// spec scenario #2/#3.
#[tokio::test]
async fn ping_interleaved_between_continuation_frames_preserves_both_streams() {
    let (mut writer, mut reader) = duplex(4096);

    let mut first = Frame::new(OpCode::Binary, vec![1, 2]);
    first.fin = false;
    let mut second = Frame::new(OpCode::Continuation, vec![3]);
    second.fin = false;
    let ping = Frame::ping(vec![0xab]);
    let third = Frame::new(OpCode::Continuation, vec![4, 5]);

    first.write(&mut writer, false, &mut []).await.unwrap();
    second.write(&mut writer, false, &mut []).await.unwrap();
    ping.write(&mut writer, false, &mut []).await.unwrap();
    third.write(&mut writer, false, &mut []).await.unwrap();
    drop(writer);

    let f1 = Frame::read(&mut reader, false, None, &mut []).await.unwrap();
    let f2 = Frame::read(&mut reader, false, None, &mut []).await.unwrap();
    let fp = Frame::read(&mut reader, false, None, &mut []).await.unwrap();
    let f3 = Frame::read(&mut reader, false, None, &mut []).await.unwrap();

    assert_eq!(f1.data, vec![1, 2]);
    assert_eq!(f2.data, vec![3]);
    assert_eq!(fp.opcode, OpCode::Ping);
    assert_eq!(fp.data, vec![0xab]);
    assert_eq!(f3.data, vec![4, 5]);
}

#[tokio::test]
async fn oversize_frame_is_rejected_before_the_payload_is_read() {
    let (mut writer, mut reader) = duplex(4096);
    let big = Frame::binary(vec![0u8; 2048]);
    big.write(&mut writer, false, &mut []).await.unwrap();

    let err = Frame::read(&mut reader, false, Some(1024), &mut [])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WsError::PayloadTooBig { size: 2048, max: 1024 }
    ));
    assert_eq!(err.close_code(), Some(1009));
}

#[tokio::test]
async fn closing_handshake_surfaces_connection_closed_ok() {
    let (client, server) = handshake_pair(test_config()).await;

    client.close(1000, "bye").await.unwrap();
    let err = server.recv().await.unwrap_err();
    assert!(matches!(err, WsError::ConnectionClosedOk { code: 1000, .. }));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.state(), wsendpoint::ConnectionState::Closed);
    assert_eq!(server.state(), wsendpoint::ConnectionState::Closed);
}

#[tokio::test]
async fn protocol_error_from_an_unmasked_client_frame_closes_with_1002() {
    // A server expects masked client frames; feed it an unmasked one
    // directly and confirm the reader maps it to a 1002 close via the
    // live coordinator, not just the frame codec in isolation.
    let (mut bad_client, server_io) = duplex(4096);
    let config = test_config();
    let server = Connection::spawn(server_io, Side::Server, &config, Vec::new());

    let frame = Frame::text("hi");
    frame.write(&mut bad_client, false, &mut []).await.unwrap();

    let err = server.recv().await.unwrap_err();
    assert!(matches!(
        err,
        WsError::ConnectionClosedError { code: Some(1002), .. }
    ));
}

#[tokio::test]
async fn keepalive_timeout_fails_the_connection_with_1011() {
    let config = WebSocketConfig {
        max_size: Some(1 << 20),
        max_queue: Some(8),
        ping_interval: Some(Duration::from_millis(30)),
        ping_timeout: Some(Duration::from_millis(30)),
        close_timeout: Duration::from_millis(100),
    };
    let (_unresponsive_peer, client_io) = duplex(4096);
    let client = Connection::spawn(client_io, Side::Client, &config, Vec::new());

    tokio::time::sleep(Duration::from_millis(150)).await;
    let err = client.recv().await.unwrap_err();
    assert!(matches!(
        err,
        WsError::ConnectionClosedError { code: Some(1011), .. }
    ));
}
