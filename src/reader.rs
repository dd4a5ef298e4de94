//! The reader loop.
//!
//! A single task owns the transport's read half. It enforces that the
//! very first frame from the peer is an unacknowledged SETTINGS frame
//! (RFC 7540 §3.5), reassembles HEADERS/CONTINUATION sequences before
//! handing a complete block to HPACK, and folds SETTINGS/WINDOW_UPDATE/
//! PING/GOAWAY/RST_STREAM into the shared connection state. Everything it
//! learns that the writer loop needs to react to (a SETTINGS ack, a PING
//! reply, a WINDOW_UPDATE grant) goes out over the same `WriterCommand`
//! channel every other producer uses, keeping the single-writer
//! invariant intact.

use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::error::{ConnectionError, ProtocolError, StreamError};
use crate::flow::CreditManager;
use crate::frame::{self, Frame, Head, Kind, StreamId};
use crate::hpack::HpackDecoder;
use crate::registry::Registry;
use crate::stream::StreamEvent;
use crate::writer::WriterCommand;

/// Connection window is replenished once the reader has accumulated this
/// much DATA debt, rather than on every single frame.
fn window_update_threshold(window_size: u32) -> u32 {
    window_size / 8
}

struct HeaderAssembly {
    stream_id: StreamId,
    buffer: BytesMut,
    end_stream: bool,
}

pub struct ReaderLoop<R> {
    transport: R,
    registry: Arc<Registry>,
    connection_window: Arc<CreditManager>,
    stream_windows: Arc<dyn Fn(StreamId) -> Option<Arc<CreditManager>> + Send + Sync>,
    hpack: HpackDecoder,
    to_writer: mpsc::UnboundedSender<WriterCommand>,
    read_buf: BytesMut,
    max_frame_size: u32,
    /// The peer's current `SETTINGS_INITIAL_WINDOW_SIZE`, shared with
    /// `Connection` so a stream opened after a renegotiation starts with
    /// the window the peer actually just advertised, not a stale default.
    peer_initial_window_size: Arc<AtomicU32>,
    connection_window_size: u32,
    received_settings: bool,
    assembling: Option<HeaderAssembly>,
    connection_window_debt: u32,
    keep_alive: Arc<parking_lot::Mutex<crate::keepalive::KeepAlive>>,
    /// Tag and send time of an outstanding RTT probe ping, tracked here
    /// rather than in `KeepAlive` so RTT sampling keeps running even when
    /// `keep_alive`'s own ping/pong cycle is disabled.
    rtt_probe: Option<(i64, Instant)>,
    last_rtt_probe_at: Instant,
}

impl<R: tokio::io::AsyncRead + Unpin> ReaderLoop<R> {
    pub fn new(
        transport: R,
        registry: Arc<Registry>,
        connection_window: Arc<CreditManager>,
        stream_windows: Arc<dyn Fn(StreamId) -> Option<Arc<CreditManager>> + Send + Sync>,
        hpack: HpackDecoder,
        to_writer: mpsc::UnboundedSender<WriterCommand>,
        max_frame_size: u32,
        peer_initial_window_size: Arc<AtomicU32>,
        connection_window_size: u32,
        keep_alive: Arc<parking_lot::Mutex<crate::keepalive::KeepAlive>>,
    ) -> ReaderLoop<R> {
        ReaderLoop {
            transport,
            registry,
            connection_window,
            stream_windows,
            hpack,
            to_writer,
            read_buf: BytesMut::with_capacity(16 * 1024),
            max_frame_size,
            peer_initial_window_size,
            connection_window_size,
            received_settings: false,
            assembling: None,
            connection_window_debt: 0,
            keep_alive,
            rtt_probe: None,
            last_rtt_probe_at: Instant::now(),
        }
    }

    /// Keep-alive checks are polled on this cadence rather than computed
    /// exactly from `ping_delay`/`ping_timeout` — cheap enough relative to
    /// frame I/O and simpler than re-arming a precise timer every time
    /// either value changes. RTT probes reuse the same tick.
    const KEEPALIVE_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

    /// RTT is sampled on this cadence regardless of keep-alive policy, so
    /// `Connection::rtt()` reports something even when pinging an
    /// otherwise-idle connection is disabled.
    const RTT_PROBE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

    pub async fn run(mut self) -> ConnectionError {
        let mut next_check = tokio::time::Instant::now();
        loop {
            tokio::select! {
                frame = self.read_one_frame() => {
                    match frame {
                        Ok(Some(frame)) => {
                            self.keep_alive.lock().note_activity(Instant::now());
                            if let Err(e) = self.dispatch(frame) {
                                let _ = self.to_writer.send(WriterCommand::GoAway {
                                    last_stream_id: StreamId::ZERO,
                                    reason: e.reason(),
                                });
                                return ConnectionError::Protocol(e);
                            }
                            if self.registry.is_shutting_down() && self.registry.open_count() == 0 {
                                let _ = self.to_writer.send(WriterCommand::Shutdown);
                                return ConnectionError::GracefulShutdown;
                            }
                        }
                        Ok(None) => return ConnectionError::GracefulShutdown,
                        Err(e) => return e,
                    }
                }
                _ = tokio::time::sleep_until(next_check) => {
                    let now = Instant::now();
                    let mut ka = self.keep_alive.lock();
                    if ka.is_timed_out(now) {
                        drop(ka);
                        let _ = self.to_writer.send(WriterCommand::GoAway {
                            last_stream_id: StreamId::ZERO,
                            reason: crate::frame::Reason::NO_ERROR,
                        });
                        return ConnectionError::Protocol(ProtocolError::KeepaliveTimeout);
                    }
                    if ka.should_ping(self.registry.open_count() > 0, now) {
                        let payload = ka.send_keepalive(now);
                        drop(ka);
                        let _ = self.to_writer.send(WriterCommand::Ping { payload, ack: false });
                    } else {
                        drop(ka);
                    }
                    if self.rtt_probe.is_none()
                        && now.saturating_duration_since(self.last_rtt_probe_at) >= Self::RTT_PROBE_INTERVAL
                    {
                        self.last_rtt_probe_at = now;
                        let tag = self.keep_alive.lock().next_rtt_tag();
                        self.rtt_probe = Some((tag, now));
                        let _ = self.to_writer.send(WriterCommand::Ping {
                            payload: tag.to_be_bytes(),
                            ack: false,
                        });
                    }
                    next_check = tokio::time::Instant::now() + Self::KEEPALIVE_POLL_INTERVAL;
                }
            }
        }
    }

    async fn fill(&mut self, n: usize) -> Result<bool, ConnectionError> {
        while self.read_buf.len() < n {
            let mut chunk = [0u8; 8192];
            let read = self
                .transport
                .read(&mut chunk)
                .await
                .map_err(|e| ConnectionError::Io(Arc::new(e)))?;
            if read == 0 {
                return Ok(false);
            }
            self.read_buf.extend_from_slice(&chunk[..read]);
        }
        Ok(true)
    }

    async fn read_one_frame(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if !self.fill(frame::HEADER_LEN).await? {
            return Ok(None);
        }
        let (head, len) = Head::parse(&self.read_buf)
            .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?;
        let len = len as usize;

        if len > self.max_frame_size as usize {
            return Err(ConnectionError::Protocol(ProtocolError::Frame(
                crate::error::FrameError::TooLarge,
            )));
        }

        if !self.fill(frame::HEADER_LEN + len).await? {
            return Ok(None);
        }
        self.read_buf.advance(frame::HEADER_LEN);
        let payload = frame::split_payload(&mut self.read_buf, len)
            .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?;

        if !self.received_settings {
            if !matches!(head.kind(), Kind::Settings) || head.flags().contains(frame::Flags::ACK) {
                return Err(ConnectionError::Protocol(
                    ProtocolError::MissingInitialSettings,
                ));
            }
            self.received_settings = true;
        }

        let decoded = match head.kind() {
            Kind::Data => Frame::Data(
                crate::frame::Data::load(head, payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::Headers => Frame::Headers(
                crate::frame::Headers::load(head, payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::Priority => Frame::Priority(
                crate::frame::Priority::load(head, &payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::RstStream => Frame::RstStream(
                crate::frame::RstStream::load(head, &payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::Settings => Frame::Settings(
                crate::frame::Settings::load(head, payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::Ping => Frame::Ping(
                crate::frame::Ping::load(head, &payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::GoAway => Frame::GoAway(
                crate::frame::GoAway::load(head, &payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::WindowUpdate => Frame::WindowUpdate(
                crate::frame::WindowUpdate::load(head, &payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::Continuation => Frame::Continuation(
                crate::frame::headers::Continuation::load(head, payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::AltSvc => Frame::AltSvc(
                crate::frame::AltSvc::load(head, payload)
                    .map_err(|e| ConnectionError::Protocol(ProtocolError::Frame(e)))?,
            ),
            Kind::PushPromise => {
                return Err(ConnectionError::Protocol(
                    ProtocolError::UnsupportedPushPromise,
                ));
            }
            Kind::Unknown(b) => {
                log::debug!("ignoring unknown frame type {b}");
                return Box::pin(self.read_one_frame()).await;
            }
        };

        Ok(Some(decoded))
    }

    fn dispatch(&mut self, frame: Frame) -> Result<(), ProtocolError> {
        // Any frame other than CONTINUATION arriving mid-header-block is a
        // protocol error (RFC 7540 §6.10).
        if self.assembling.is_some() && !matches!(frame, Frame::Continuation(_)) {
            return Err(ProtocolError::InterleavedHeaderBlock);
        }

        match frame {
            Frame::Headers(h) => self.on_headers(h),
            Frame::Continuation(c) => self.on_continuation(c),
            Frame::Data(d) => self.on_data(d),
            Frame::RstStream(r) => self.on_rst_stream(r),
            Frame::Settings(s) => self.on_settings(s),
            Frame::Ping(p) => self.on_ping(p),
            Frame::GoAway(g) => self.on_goaway(g),
            Frame::WindowUpdate(w) => self.on_window_update(w),
            Frame::Priority(_) => Ok(()), // priority signaling isn't implemented; ignored per RFC 7540 §5.3.
            Frame::AltSvc(_) => Ok(()),
        }
    }

    fn on_headers(&mut self, h: crate::frame::Headers) -> Result<(), ProtocolError> {
        let stream_id = h.stream_id();
        // A stream id the registry has never heard of is a protocol error
        // only if it hasn't been issued yet; headers for an id that was
        // issued and has since closed and been released still need to run
        // through the HPACK decoder to keep the peer's compression state
        // in sync, they just have nowhere to be delivered. `finish_header_block`
        // already handles that drop — `registry.get` returning `None` there
        // is exactly that case.
        if self.registry.get(stream_id).is_none() && stream_id >= self.registry.next_stream_id() {
            return Err(ProtocolError::StreamIdNotYetIssued(stream_id));
        }

        if h.is_end_headers() {
            self.finish_header_block(stream_id, h.into_header_block_fragment(), h.is_end_stream())
        } else {
            self.assembling = Some(HeaderAssembly {
                stream_id,
                buffer: BytesMut::from(&h.into_header_block_fragment()[..]),
                end_stream: h.is_end_stream(),
            });
            Ok(())
        }
    }

    fn on_continuation(&mut self, c: crate::frame::headers::Continuation) -> Result<(), ProtocolError> {
        let Some(mut assembly) = self.assembling.take() else {
            return Err(ProtocolError::UnexpectedContinuation);
        };
        if assembly.stream_id != c.stream_id() {
            return Err(ProtocolError::UnexpectedContinuation);
        }
        let end_headers = c.is_end_headers();
        assembly.buffer.extend_from_slice(&c.into_header_block_fragment());

        if end_headers {
            let stream_id = assembly.stream_id;
            let end_stream = assembly.end_stream;
            self.finish_header_block(stream_id, assembly.buffer.freeze(), end_stream)
        } else {
            self.assembling = Some(assembly);
            Ok(())
        }
    }

    fn finish_header_block(
        &mut self,
        stream_id: StreamId,
        block: bytes::Bytes,
        end_stream: bool,
    ) -> Result<(), ProtocolError> {
        let decoded = self.hpack.decode(&block)?;
        if let Some(slot) = self.registry.get(stream_id) {
            slot.deliver(StreamEvent::Headers(decoded));
            if end_stream {
                slot.on_remote_end_stream();
                slot.deliver(StreamEvent::Eof);
                if slot.is_closed() {
                    self.registry.release_stream(stream_id);
                }
            }
        }
        Ok(())
    }

    fn on_data(&mut self, d: crate::frame::Data) -> Result<(), ProtocolError> {
        let stream_id = d.stream_id();
        let len = d.payload().len() as u32;
        let end_stream = d.is_end_stream();

        if let Some(slot) = self.registry.get(stream_id) {
            slot.deliver(StreamEvent::Data(d.into_payload()));
            if end_stream {
                slot.on_remote_end_stream();
                slot.deliver(StreamEvent::Eof);
                if slot.is_closed() {
                    self.registry.release_stream(stream_id);
                }
            }
        }

        self.connection_window_debt += len;
        if self.connection_window_debt >= window_update_threshold(self.connection_window_size) {
            let increment = self.connection_window_debt;
            self.connection_window_debt = 0;
            self.connection_window.adjust_credit(increment as i64);
            let _ = self.to_writer.send(WriterCommand::WindowUpdate {
                stream_id: StreamId::ZERO,
                increment,
            });
        }

        Ok(())
    }

    fn on_rst_stream(&mut self, r: crate::frame::RstStream) -> Result<(), ProtocolError> {
        // Delivering `StreamEvent::Reset` to the stream's receiver is the
        // registered `on_reset` callback's job, so every path that ends a
        // stream early — a peer RST_STREAM here, a GOAWAY drain, or a
        // connection-wide abort — notifies the caller the same way.
        self.registry
            .reset_stream(r.stream_id(), StreamError::Reset(r.reason()));
        Ok(())
    }

    fn on_settings(&mut self, s: crate::frame::Settings) -> Result<(), ProtocolError> {
        if s.is_ack() {
            return Ok(());
        }

        if let Some(new_max_concurrent) = s.max_concurrent_streams() {
            self.registry.set_max_concurrent(new_max_concurrent as usize);
        }
        if let Some(new_max_header_list_size) = s.max_header_list_size() {
            self.hpack.set_max_header_list_size(new_max_header_list_size as usize);
        }
        if let Some(new_max_frame_size) = s.max_frame_size() {
            self.max_frame_size = new_max_frame_size;
        }
        if let Some(new_initial_window_size) = s.initial_window_size() {
            let previous = self
                .peer_initial_window_size
                .swap(new_initial_window_size, AtomicOrdering::AcqRel);
            let delta = new_initial_window_size as i64 - previous as i64;
            for stream_id in self.registry.stream_ids() {
                if let Some(window) = (self.stream_windows)(stream_id) {
                    window.adjust_credit(delta);
                }
            }
        }

        let _ = self.to_writer.send(WriterCommand::SettingsAck);
        Ok(())
    }

    fn on_ping(&mut self, p: crate::frame::Ping) -> Result<(), ProtocolError> {
        if p.is_ack() {
            let tag = p.tag();
            let now = Instant::now();
            if let Some((probe_tag, sent_at)) = self.rtt_probe {
                if probe_tag == tag {
                    self.rtt_probe = None;
                    self.keep_alive
                        .lock()
                        .on_rtt_pong(now.saturating_duration_since(sent_at));
                    return Ok(());
                }
            }
            self.keep_alive.lock().on_pong(tag, now);
            return Ok(());
        }
        let _ = self.to_writer.send(WriterCommand::Ping {
            payload: *p.payload(),
            ack: true,
        });
        Ok(())
    }

    /// GOAWAY drains rather than kills the connection outright: streams
    /// at or below `last_stream_id`
    /// keep running, anything past it was never processed by the peer and
    /// is refused as retryable so the caller can redo it elsewhere. `run`
    /// notices once the registry is both draining and empty and stops the
    /// reader loop then.
    fn on_goaway(&mut self, g: crate::frame::GoAway) -> Result<(), ProtocolError> {
        let refused = self
            .registry
            .shutdown_and_drain(g.reason(), g.last_stream_id());
        for stream_id in refused {
            self.registry
                .reset_stream(stream_id, StreamError::Reset(crate::frame::Reason::REFUSED_STREAM));
        }
        Ok(())
    }

    fn on_window_update(&mut self, w: crate::frame::WindowUpdate) -> Result<(), ProtocolError> {
        let increment = w.size_increment();
        if w.stream_id().is_zero() {
            self.connection_window.adjust_credit(increment as i64);
        } else if let Some(window) = (self.stream_windows)(w.stream_id()) {
            window.adjust_credit(increment as i64);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::HpackEncoder;
    use crate::stream::{StreamAttributes, StreamSlot};
    use bytes::BytesMut as Bm;

    fn encode_frame_settings_only() -> Bm {
        let mut buf = Bm::new();
        crate::frame::Settings::default().encode(&mut buf);
        buf
    }

    #[tokio::test]
    async fn rejects_non_settings_first_frame() {
        let mut wire = Bm::new();
        crate::frame::Ping::new([0; 8]).encode(&mut wire);
        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = server.write_all(&wire).await;
        });

        let registry = Arc::new(Registry::new(100));
        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_window = Arc::new(CreditManager::new(1 << 20));
        let keep_alive = Arc::new(parking_lot::Mutex::new(crate::keepalive::KeepAlive::new(
            crate::keepalive::KeepAlivePolicy::Disabled,
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )));
        let reader = ReaderLoop::new(
            client,
            registry,
            connection_window,
            Arc::new(|_| None),
            HpackDecoder::new(16 * 1024),
            tx,
            16384,
            Arc::new(AtomicU32::new(65535)),
            1 << 20,
            keep_alive,
        );

        let err = reader.run().await;
        assert!(matches!(
            err,
            ConnectionError::Protocol(ProtocolError::MissingInitialSettings)
        ));
    }

    #[tokio::test]
    async fn decodes_headers_and_delivers_to_stream() {
        let mut wire = encode_frame_settings_only();

        let mut encoder = HpackEncoder::new();
        let pseudo = crate::frame::PseudoHeaders {
            method: None,
            scheme: None,
            authority: None,
            path: None,
            protocol: None,
            status: Some(200),
        };
        let block = encoder.encode_request(&pseudo, &[("content-type".into(), "text/plain".into())]);
        crate::frame::Headers::encode(StreamId::new(1), &block, true, true, &mut wire);

        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = server.write_all(&wire).await;
        });

        let registry = Arc::new(Registry::new(100));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let slot = Arc::new(StreamSlot::reserved(StreamAttributes::default(), event_tx));
        slot.assign_id(StreamId::new(1));
        registry.add_stream(StreamId::new(1), slot, |_| {});

        let (tx, _rx) = mpsc::unbounded_channel();
        let connection_window = Arc::new(CreditManager::new(1 << 20));
        let keep_alive = Arc::new(parking_lot::Mutex::new(crate::keepalive::KeepAlive::new(
            crate::keepalive::KeepAlivePolicy::Disabled,
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )));
        let reader = ReaderLoop::new(
            client,
            registry,
            connection_window,
            Arc::new(|_| None),
            HpackDecoder::new(16 * 1024),
            tx,
            16384,
            Arc::new(AtomicU32::new(65535)),
            1 << 20,
            keep_alive,
        );

        let handle = tokio::spawn(reader.run());

        let first = event_rx.recv().await.unwrap();
        assert!(matches!(first, StreamEvent::Headers(_)));
        let second = event_rx.recv().await.unwrap();
        assert!(matches!(second, StreamEvent::Eof));

        handle.abort();
    }

    #[tokio::test]
    async fn headers_for_an_issued_but_released_stream_are_dropped_not_fatal() {
        let mut wire = encode_frame_settings_only();

        let mut encoder = HpackEncoder::new();
        let pseudo = crate::frame::PseudoHeaders {
            method: None,
            scheme: None,
            authority: None,
            path: None,
            protocol: None,
            status: Some(200),
        };
        let block = encoder.encode_request(&pseudo, &[]);
        // stream 1 was issued and has since closed/released: the registry
        // has no entry for it, but it's below next_stream_id.
        crate::frame::Headers::encode(StreamId::new(1), &block, true, true, &mut wire);
        crate::frame::Ping::new([7; 8]).encode(&mut wire);

        let (client, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            let _ = server.write_all(&wire).await;
        });

        let registry = Arc::new(Registry::new(100));
        assert_eq!(registry.try_reserve_stream(), Some(StreamId::new(1)));
        registry.release_stream(StreamId::new(1));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection_window = Arc::new(CreditManager::new(1 << 20));
        let keep_alive = Arc::new(parking_lot::Mutex::new(crate::keepalive::KeepAlive::new(
            crate::keepalive::KeepAlivePolicy::Disabled,
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
        )));
        let reader = ReaderLoop::new(
            client,
            registry,
            connection_window,
            Arc::new(|_| None),
            HpackDecoder::new(16 * 1024),
            tx,
            16384,
            Arc::new(AtomicU32::new(65535)),
            1 << 20,
            keep_alive,
        );

        let handle = tokio::spawn(reader.run());

        // The PING after the dropped HEADERS still gets acked, proving
        // on_headers didn't treat the released stream id as fatal.
        match rx.recv().await.unwrap() {
            WriterCommand::Ping { payload, ack } => {
                assert!(ack);
                assert_eq!(payload, [7; 8]);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        handle.abort();
    }
}
