//! End-to-end tests driving the connection engine against a hand-rolled
//! fake HTTP/2 peer over `tokio::io::duplex`, the same fake-transport
//! technique the crate's own unit tests use, just from outside the crate
//! boundary so the full `Connector`/`Connection` surface is exercised.
//!
//! `frame::split_payload` is crate-private, so frames are parsed here with
//! nothing but `Head::parse` plus manual `BytesMut` bookkeeping — exactly
//! what an independent peer implementation would have to do.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use h2mux_core::client::Connector;
use h2mux_core::config::Config;
use h2mux_core::frame::{
    self, Flags, GoAway, Head, Headers, Kind, Ping, PseudoHeaders, Reason, RstStream, Settings,
    StreamId, WindowUpdate,
};
use h2mux_core::hpack::{HpackDecoder, HpackEncoder};
use h2mux_core::keepalive::KeepAlivePolicy;
use h2mux_core::{OperationError, StreamAttributes, StreamEvent};

/// A fake peer's side of the duplex pipe: owns the transport and a small
/// read-ahead buffer, and knows just enough framing to read whatever the
/// client under test wrote and write back whatever the test wants to send.
struct FakePeer {
    io: DuplexStream,
    buf: BytesMut,
}

impl FakePeer {
    fn new(io: DuplexStream) -> FakePeer {
        FakePeer {
            io,
            buf: BytesMut::new(),
        }
    }

    async fn fill(&mut self, n: usize) {
        while self.buf.len() < n {
            let mut chunk = [0u8; 8192];
            let read = self.io.read(&mut chunk).await.expect("peer read failed");
            assert!(read > 0, "client closed the connection unexpectedly");
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    async fn read_preface(&mut self) {
        self.fill(frame::PREFACE.len()).await;
        assert_eq!(&self.buf[..frame::PREFACE.len()], frame::PREFACE);
        self.buf.advance(frame::PREFACE.len());
    }

    async fn next_frame(&mut self) -> (Head, Bytes) {
        self.fill(frame::HEADER_LEN).await;
        let (head, len) = Head::parse(&self.buf).unwrap();
        let len = len as usize;
        self.fill(frame::HEADER_LEN + len).await;
        self.buf.advance(frame::HEADER_LEN);
        let payload = self.buf.split_to(len).freeze();
        (head, payload)
    }

    async fn write_frame(&mut self, bytes: &[u8]) {
        self.io.write_all(bytes).await.expect("peer write failed");
    }

    /// Reads the client's preface plus initial SETTINGS/WINDOW_UPDATE pair
    /// and replies with a plain SETTINGS frame, leaving `configure` a
    /// chance to set whatever parameters the test cares about.
    async fn complete_handshake(&mut self, configure: impl FnOnce(&mut Settings)) {
        self.read_preface().await;

        let (head, payload) = self.next_frame().await;
        assert_eq!(head.kind(), Kind::Settings);
        Settings::load(head, payload).unwrap();

        let (head, payload) = self.next_frame().await;
        assert_eq!(head.kind(), Kind::WindowUpdate);
        WindowUpdate::load(head, &payload).unwrap();

        let mut settings = Settings::default();
        configure(&mut settings);
        let mut buf = BytesMut::new();
        settings.encode(&mut buf);
        self.write_frame(&buf).await;
    }

    /// Reads the SETTINGS ACK the client sends in response to our SETTINGS.
    async fn read_settings_ack(&mut self) {
        let (head, _payload) = self.next_frame().await;
        assert_eq!(head.kind(), Kind::Settings);
        assert!(head.flags().contains(Flags::ACK));
    }

    /// Reads one request's HEADERS and, if the body isn't already done,
    /// every DATA frame up to END_STREAM. Returns the stream id.
    async fn read_request(&mut self) -> StreamId {
        let (head, _payload) = self.next_frame().await;
        assert_eq!(head.kind(), Kind::Headers);
        let stream_id = head.stream_id();
        if head.flags().contains(Flags::END_STREAM) {
            return stream_id;
        }
        loop {
            let (head, _payload) = self.next_frame().await;
            assert_eq!(head.kind(), Kind::Data);
            assert_eq!(head.stream_id(), stream_id);
            if head.flags().contains(Flags::END_STREAM) {
                return stream_id;
            }
        }
    }

    async fn respond_200(&mut self, encoder: &mut HpackEncoder, stream_id: StreamId) {
        let pseudo = PseudoHeaders {
            status: Some(200),
            ..Default::default()
        };
        let block = encoder.encode_request(&pseudo, &[]);
        let mut buf = BytesMut::new();
        Headers::encode(stream_id, &block, true, true, &mut buf);
        self.write_frame(&buf).await;
    }
}

#[tokio::test]
async fn happy_get_returns_status_200_with_an_empty_body() {
    let (client, server) = tokio::io::duplex(1 << 16);
    let mut peer = FakePeer::new(server);

    let server_task = tokio::spawn(async move {
        peer.complete_handshake(|_| {}).await;
        peer.read_settings_ack().await;

        let (head, payload) = peer.next_frame().await;
        assert_eq!(head.kind(), Kind::Headers);
        assert!(head.flags().contains(Flags::END_HEADERS));
        assert!(head.flags().contains(Flags::END_STREAM));
        let stream_id = head.stream_id();
        assert_eq!(stream_id, StreamId::new(1));

        let mut decoder = HpackDecoder::new(16 * 1024);
        let decoded = decoder.decode(&payload).unwrap();
        assert_eq!(decoded.pseudo.method.as_deref(), Some("GET"));
        assert_eq!(decoded.pseudo.scheme.as_deref(), Some("https"));
        assert_eq!(decoded.pseudo.path.as_deref(), Some("/index"));

        let mut encoder = HpackEncoder::new();
        peer.respond_200(&mut encoder, stream_id).await;
        peer
    });

    let connection = Connector::new(Config::default())
        .connect_stream(client)
        .await
        .unwrap();

    let pseudo = PseudoHeaders::request("GET", "https", "example.com", "/index");
    let (_coordinator, mut response) = connection
        .send_request(pseudo, vec![], StreamAttributes::default(), true)
        .await
        .unwrap();

    let mut status = None;
    let mut body = Vec::new();
    loop {
        match response.recv().await.expect("response stream ended early") {
            StreamEvent::Headers(h) => status = h.pseudo.status,
            StreamEvent::Data(chunk) => body.extend_from_slice(&chunk),
            StreamEvent::Eof => break,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    assert_eq!(status, Some(200));
    assert!(body.is_empty());

    server_task.await.unwrap();
}

#[tokio::test]
async fn concurrent_posts_are_bounded_by_max_concurrent_streams() {
    let (client, server) = tokio::io::duplex(1 << 20);
    let mut peer = FakePeer::new(server);

    let server_task = tokio::spawn(async move {
        peer.complete_handshake(|s| {
            s.set_max_concurrent_streams(Some(2));
        })
        .await;
        peer.read_settings_ack().await;

        let first = peer.read_request().await;
        let second = peer.read_request().await;
        assert_eq!(first, StreamId::new(1));
        assert_eq!(second, StreamId::new(3));

        // Nothing else should show up: the third POST has no free slot.
        let premature = tokio::time::timeout(Duration::from_millis(150), peer.next_frame()).await;
        assert!(premature.is_err(), "third POST should still be waiting on a free stream slot");

        let mut encoder = HpackEncoder::new();
        peer.respond_200(&mut encoder, first).await;

        let third = peer.read_request().await;
        assert_eq!(third, StreamId::new(5));

        peer.respond_200(&mut encoder, second).await;
        peer.respond_200(&mut encoder, third).await;
        peer
    });

    let connection = std::sync::Arc::new(
        Connector::new(Config::default())
            .connect_stream(client)
            .await
            .unwrap(),
    );

    // Give the reader task a moment to process the peer's SETTINGS lowering
    // max_concurrent_streams to 2 before racing three requests against it.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut tasks = Vec::new();
    for _ in 0..3 {
        let connection = connection.clone();
        tasks.push(tokio::spawn(async move {
            let pseudo = PseudoHeaders::request("POST", "https", "example.com", "/upload");
            let (coordinator, mut response) = connection
                .send_request(pseudo, vec![], StreamAttributes::default(), false)
                .await
                .unwrap();
            coordinator
                .send_data(Bytes::from(vec![b'x'; 100 * 1024]), true)
                .await
                .unwrap();

            let mut status = None;
            loop {
                match response.recv().await.expect("response stream ended early") {
                    StreamEvent::Headers(h) => status = h.pseudo.status,
                    StreamEvent::Eof => break,
                    other => panic!("unexpected event: {other:?}"),
                }
            }
            status
        }));
    }

    for task in tasks {
        assert_eq!(task.await.unwrap(), Some(200));
    }

    server_task.await.unwrap();
}

#[tokio::test]
async fn backpressure_stalls_a_send_until_cancelled_then_resets() {
    let (client, server) = tokio::io::duplex(1 << 16);
    let mut peer = FakePeer::new(server);

    let server_task = tokio::spawn(async move {
        peer.complete_handshake(|s| {
            s.set_initial_window_size(Some(1024));
        })
        .await;
        peer.read_settings_ack().await;

        let (head, _payload) = peer.next_frame().await;
        assert_eq!(head.kind(), Kind::Headers);
        assert!(!head.flags().contains(Flags::END_STREAM));
        let stream_id = head.stream_id();

        let (head, payload) = peer.next_frame().await;
        assert_eq!(head.kind(), Kind::Data);
        assert_eq!(head.stream_id(), stream_id);
        assert_eq!(payload.len(), 1024);
        assert!(!head.flags().contains(Flags::END_STREAM));

        // The client has no more credit and we never grant any more.
        let premature = tokio::time::timeout(Duration::from_millis(150), peer.next_frame()).await;
        assert!(premature.is_err(), "no further DATA before cancellation");

        let (head, payload) = peer.next_frame().await;
        assert_eq!(head.kind(), Kind::RstStream);
        assert_eq!(head.stream_id(), stream_id);
        let rst = RstStream::load(head, &payload).unwrap();
        assert_eq!(rst.reason(), Reason::CANCEL);
        peer
    });

    let connection = Connector::new(Config::default())
        .connect_stream(client)
        .await
        .unwrap();

    // Give the reader task a moment to process the peer's SETTINGS before
    // opening a stream whose window must start at the negotiated 1024.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let pseudo = PseudoHeaders::request("POST", "https", "example.com", "/upload");
    let (coordinator, _response) = connection
        .send_request(pseudo, vec![], StreamAttributes::default(), false)
        .await
        .unwrap();

    let cancel = coordinator.cancellation_token();
    let send = coordinator.send_data(Bytes::from(vec![b'x'; 5000]), true);
    tokio::pin!(send);

    let stalled = tokio::time::timeout(Duration::from_millis(150), &mut send).await;
    assert!(stalled.is_err(), "send_data should still be parked on credit");

    cancel.cancel();
    let result = send.await;
    assert!(matches!(result, Err(OperationError::Cancelled)));

    coordinator.reset(Reason::CANCEL).unwrap();
    assert_eq!(connection.open_stream_count(), 0);

    server_task.await.unwrap();
}

#[tokio::test]
async fn goaway_drains_in_flight_streams_and_refuses_the_rest() {
    let (client, server) = tokio::io::duplex(1 << 16);
    let mut peer = FakePeer::new(server);

    let server_task = tokio::spawn(async move {
        peer.complete_handshake(|_| {}).await;
        peer.read_settings_ack().await;

        let first = peer.read_request().await;
        let second = peer.read_request().await;
        let third = peer.read_request().await;
        assert_eq!((first, second, third), (StreamId::new(1), StreamId::new(3), StreamId::new(5)));

        let mut goaway = BytesMut::new();
        GoAway::new(Reason::NO_ERROR)
            .set_last_stream_id(second)
            .encode(&mut goaway);
        peer.write_frame(&goaway).await;

        let mut encoder = HpackEncoder::new();
        peer.respond_200(&mut encoder, first).await;
        peer.respond_200(&mut encoder, second).await;
        peer
    });

    let connection = Connector::new(Config::default())
        .connect_stream(client)
        .await
        .unwrap();

    let mut responses = Vec::new();
    for _ in 0..3 {
        let pseudo = PseudoHeaders::request("GET", "https", "example.com", "/r");
        let (_coordinator, response) = connection
            .send_request(pseudo, vec![], StreamAttributes::default(), true)
            .await
            .unwrap();
        responses.push(response);
    }

    let mut outcomes = Vec::new();
    for mut response in responses {
        let mut status = None;
        let mut reset = None;
        loop {
            match response.recv().await.expect("response stream ended early") {
                StreamEvent::Headers(h) => status = h.pseudo.status,
                StreamEvent::Reset(reason) => reset = Some(reason),
                StreamEvent::Eof => break,
                other => panic!("unexpected event: {other:?}"),
            }
        }
        outcomes.push((status, reset));
    }

    assert_eq!(outcomes[0].0, Some(200));
    assert_eq!(outcomes[1].0, Some(200));
    assert!(outcomes[2].1.expect("third stream should have been reset").can_retry());

    // Draining refuses new work outright, without ever touching the wire.
    let pseudo = PseudoHeaders::request("GET", "https", "example.com", "/late");
    let late = connection
        .send_request(pseudo, vec![], StreamAttributes::default(), true)
        .await;
    assert!(matches!(late, Err(OperationError::Unavailable)));

    server_task.await.unwrap();
}

// Not `start_paused`: the idle/timeout clocks in `keepalive.rs` are driven
// by `std::time::Instant`, which a paused tokio clock does not advance, so
// this has to run against the real clock with small durations instead.
#[tokio::test]
async fn an_unanswered_keepalive_ping_aborts_the_connection_retryably() {
    let (client, server) = tokio::io::duplex(1 << 16);
    let mut peer = FakePeer::new(server);

    let server_task = tokio::spawn(async move {
        peer.complete_handshake(|_| {}).await;
        peer.read_settings_ack().await;

        let stream_id = peer.read_request().await;
        assert_eq!(stream_id, StreamId::new(1));

        // Never ACKs this: the client should give up after `ping_timeout`.
        let (head, payload) = peer.next_frame().await;
        assert_eq!(head.kind(), Kind::Ping);
        assert!(!head.flags().contains(Flags::ACK));
        Ping::load(head, &payload).unwrap();
        peer
    });

    let mut config = Config::default();
    config.keep_alive_policy = KeepAlivePolicy::Always;
    config.keep_alive_ping_delay = Duration::from_millis(100);
    config.keep_alive_ping_timeout = Duration::from_millis(150);

    let connection = Connector::new(config).connect_stream(client).await.unwrap();

    let pseudo = PseudoHeaders::request("GET", "https", "example.com", "/r");
    let (_coordinator, mut response) = connection
        .send_request(pseudo, vec![], StreamAttributes::default(), true)
        .await
        .unwrap();

    match response.recv().await.expect("response stream ended without an event") {
        StreamEvent::Reset(reason) => assert!(reason.can_retry(), "a connection abort must be retryable"),
        other => panic!("expected a retryable reset from the aborted connection, got {other:?}"),
    }

    server_task.await.unwrap();
}

#[test]
fn idle_stack_pop_never_hands_out_the_same_entry_twice_under_contention() {
    let stack: std::sync::Arc<h2mux_core::idle_stack::IdleStack<u32>> =
        std::sync::Arc::new(h2mux_core::idle_stack::IdleStack::new());
    let mut indices = Vec::new();
    for i in 0..16u32 {
        let idx = stack.register();
        stack.push(idx, i);
        indices.push(idx);
    }
    assert_eq!(indices.len(), 16);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let stack = stack.clone();
        handles.push(std::thread::spawn(move || stack.pop()));
    }

    let mut seen = std::collections::HashSet::new();
    for h in handles {
        if let Some(v) = h.join().unwrap() {
            assert!(seen.insert(v), "value {v} was popped more than once");
        }
    }
    assert_eq!(seen.len(), 16, "every pushed value must be popped exactly once");
    assert_eq!(stack.pop(), None);
}
