//! Ties components A–L together into the connection engine a caller
//! actually holds: preface exchange, initial SETTINGS, the startup
//! connection-window bump, stream id issuance, and the reader/writer
//! task pair.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ClientError, OperationError};
use crate::flow::CreditManager;
use crate::frame::{self, PseudoHeaders, Reason, StreamId};
use crate::hpack::{HpackDecoder, HpackEncoder};
use crate::keepalive::KeepAlive;
use crate::registry::Registry;
use crate::stream::coordinator::WriteCoordinator;
use crate::stream::{StreamAttributes, StreamEvent, StreamSlot};
use crate::writer::{WriterCommand, WriterLoop};

/// A caller's handle onto one stream's response: header list, body
/// chunks and trailers as the reader loop decodes them, in wire order.
pub struct ResponseStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ResponseStream {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }
}

struct StreamWindows {
    windows: parking_lot::Mutex<HashMap<StreamId, Arc<CreditManager>>>,
}

impl StreamWindows {
    fn new() -> StreamWindows {
        StreamWindows {
            windows: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, id: StreamId, window: Arc<CreditManager>) {
        self.windows.lock().insert(id, window);
    }

    fn remove(&self, id: StreamId) {
        self.windows.lock().remove(&id);
    }

    fn get(&self, id: StreamId) -> Option<Arc<CreditManager>> {
        self.windows.lock().get(&id).cloned()
    }
}

/// A live HTTP/2 client connection over an already-established transport.
/// Dropping it cancels the reader and writer tasks.
pub struct Connection {
    registry: Arc<Registry>,
    connection_window: Arc<CreditManager>,
    stream_windows: Arc<StreamWindows>,
    to_writer: mpsc::UnboundedSender<WriterCommand>,
    hpack_encoder: parking_lot::Mutex<HpackEncoder>,
    peer_initial_window_size: Arc<AtomicU32>,
    config: Config,
    keep_alive: Arc<parking_lot::Mutex<KeepAlive>>,
    reader_task: tokio::task::JoinHandle<crate::error::ConnectionError>,
    writer_task: tokio::task::JoinHandle<crate::error::ConnectionError>,
}

impl Connection {
    /// Performs the client preface exchange and spawns the reader/writer
    /// loops. `transport` must already be an established, ordered byte
    /// stream (e.g. a TCP socket after ALPN negotiated "h2").
    pub async fn handshake<T>(mut transport: T, config: Config) -> Result<Connection, ClientError>
    where
        T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        transport
            .write_all(frame::PREFACE)
            .await
            .map_err(ClientError::Io)?;

        let mut settings = frame::Settings::default();
        settings
            .set_enable_push(Some(0))
            .set_initial_window_size(Some(config.initial_stream_window_size))
            .set_max_concurrent_streams(Some(config.max_concurrent_streams))
            .set_max_header_list_size(Some(config.max_response_headers_bytes as u32));

        let mut preface_buf = bytes::BytesMut::new();
        settings.encode(&mut preface_buf);

        let window_bump = config
            .initial_connection_window_size
            .saturating_sub(frame::DEFAULT_INITIAL_WINDOW_SIZE);
        if window_bump > 0 {
            crate::frame::WindowUpdate::new(StreamId::ZERO, window_bump).encode(&mut preface_buf);
        }

        transport
            .write_all(&preface_buf)
            .await
            .map_err(ClientError::Io)?;
        transport.flush().await.map_err(ClientError::Io)?;

        let (read_half, write_half) = tokio::io::split(transport);

        let registry = Arc::new(Registry::new(config.max_concurrent_streams as usize));
        let connection_window = Arc::new(CreditManager::new(config.initial_connection_window_size as i32));
        let stream_windows = Arc::new(StreamWindows::new());
        let pool = Arc::new(crate::buffer::BufferPool::new());
        let keep_alive = Arc::new(parking_lot::Mutex::new(KeepAlive::new(
            config.keep_alive_policy,
            config.keep_alive_ping_delay,
            config.keep_alive_ping_timeout,
        )));

        let (to_writer, writer_rx) = mpsc::unbounded_channel();

        let writer = WriterLoop::new(write_half, writer_rx, pool, config.max_frame_size);
        let writer_task = tokio::spawn(writer.run());

        let peer_initial_window_size = Arc::new(AtomicU32::new(frame::DEFAULT_INITIAL_WINDOW_SIZE));

        let stream_windows_for_reader = stream_windows.clone();
        let reader = crate::reader::ReaderLoop::new(
            read_half,
            registry.clone(),
            connection_window.clone(),
            Arc::new(move |id| stream_windows_for_reader.get(id)),
            HpackDecoder::new(config.max_response_headers_bytes),
            to_writer.clone(),
            config.max_frame_size,
            peer_initial_window_size.clone(),
            config.initial_connection_window_size,
            keep_alive.clone(),
        );

        // Nobody else watches the reader's exit, so it supervises its own
        // fatal shutdown: a connection-level error (as opposed to a plain
        // graceful close) fails every open stream and every parked credit
        // waiter, then asks the writer to flush and stop.
        let registry_for_supervisor = registry.clone();
        let connection_window_for_supervisor = connection_window.clone();
        let to_writer_for_supervisor = to_writer.clone();
        let reader_task = tokio::spawn(async move {
            let result = reader.run().await;
            if !matches!(result, crate::error::ConnectionError::GracefulShutdown) {
                let reason = crate::error::StreamError::ConnectionAborted;
                connection_window_for_supervisor.fail_all(reason);
                registry_for_supervisor.abort(reason);
                let _ = to_writer_for_supervisor.send(WriterCommand::Shutdown);
            }
            result
        });

        Ok(Connection {
            registry,
            connection_window,
            stream_windows,
            to_writer,
            hpack_encoder: parking_lot::Mutex::new(HpackEncoder::new()),
            peer_initial_window_size,
            config,
            keep_alive,
            reader_task,
            writer_task,
        })
    }

    pub fn rtt(&self) -> Option<Duration> {
        self.keep_alive.lock().rtt()
    }

    pub fn open_stream_count(&self) -> usize {
        self.registry.open_count()
    }

    pub async fn wait_for_available_stream(&self) -> Result<(), OperationError> {
        self.registry.wait_for_available_streams().await
    }

    /// Sends a request. Returns a write coordinator for the body (if any)
    /// and a handle to read the response as it arrives.
    pub async fn send_request(
        &self,
        pseudo: PseudoHeaders,
        headers: Vec<(String, String)>,
        attributes: StreamAttributes,
        end_stream: bool,
    ) -> Result<(WriteCoordinator, ResponseStream), OperationError> {
        // Loops rather than checking once: several callers can wake from
        // the same `notify_waiters` and race for the one freed slot, so a
        // lost race just means going back to sleep instead of a spurious
        // `Unavailable`.
        let stream_id = loop {
            self.registry.wait_for_available_streams().await?;
            if let Some(id) = self.registry.try_reserve_stream() {
                break id;
            }
        };

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let slot = Arc::new(StreamSlot::reserved(attributes, event_tx));
        slot.assign_id(stream_id);

        // A stream opened after the peer has renegotiated
        // SETTINGS_INITIAL_WINDOW_SIZE starts at that value, not this
        // client's own static config default.
        let initial_window = self.peer_initial_window_size.load(AtomicOrdering::Acquire);
        let stream_window = Arc::new(CreditManager::new(initial_window as i32));
        self.stream_windows.insert(stream_id, stream_window.clone());

        let stream_windows = self.stream_windows.clone();
        let callback_slot = slot.clone();
        let callback_window = stream_window.clone();
        self.registry.add_stream(stream_id, slot.clone(), move |reason| {
            stream_windows.remove(stream_id);
            callback_window.fail_all(reason);
            callback_slot.deliver(StreamEvent::Reset(reason));
            callback_slot.deliver(StreamEvent::Eof);
        });

        let fragment = {
            let mut encoder = self.hpack_encoder.lock();
            encoder.encode_request(&pseudo, &headers)
        };

        let coordinator = WriteCoordinator::new(
            stream_id,
            slot,
            stream_window,
            self.connection_window.clone(),
            self.to_writer.clone(),
            CancellationToken::new(),
            self.registry.clone(),
        );
        coordinator.send_headers(Bytes::from(fragment), end_stream)?;

        Ok((coordinator, ResponseStream { events: event_rx }))
    }

    /// Sends a GOAWAY and stops accepting new streams, letting existing
    /// ones run to completion.
    pub fn shutdown(&self, reason: Reason) {
        self.registry.shutdown(reason);
        let _ = self.to_writer.send(WriterCommand::GoAway {
            last_stream_id: StreamId::ZERO,
            reason,
        });
    }

    /// Tears the connection down immediately: aborts the reader/writer
    /// tasks and resets every open stream and parked credit waiter.
    pub fn abort(&self, reason: crate::error::StreamError) {
        self.reader_task.abort();
        self.writer_task.abort();
        self.connection_window.fail_all(reason);
        self.registry.abort(reason);
    }
}
