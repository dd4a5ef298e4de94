//! The writer loop.
//!
//! A single task owns the transport's write half and the outgoing buffer;
//! every other task reaches it only through `WriterCommand`s on an
//! unbounded channel, so only one task ever writes to the socket.
//! HEADERS/DATA bodies larger than the negotiated max frame size are split
//! here, not by callers, so callers only ever think in terms of whole
//! header blocks and whole credit grants.

use bytes::{BufMut, Bytes};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::buffer::{BufferPool, OutgoingBuffer};
use crate::error::ConnectionError;
use crate::frame::{
    Continuation, Data, Flags, GoAway, Head, Headers, Kind, Ping, Reason, RstStream, Settings,
    StreamId, WindowUpdate,
};

/// Once the buffer holds this many unflushed bytes, the writer stops
/// accepting more frames into it and issues a transport write first, so a
/// burst of small commands can't grow the buffer without bound while the
/// transport is slow to drain.
const UNFLUSHED_THRESHOLD: usize = 32 * 1024;

#[derive(Debug)]
pub enum WriterCommand {
    Headers {
        stream_id: StreamId,
        fragment: Bytes,
        end_stream: bool,
    },
    Data {
        stream_id: StreamId,
        bytes: Bytes,
        end_stream: bool,
    },
    RstStream {
        stream_id: StreamId,
        reason: Reason,
    },
    WindowUpdate {
        stream_id: StreamId,
        increment: u32,
    },
    Settings(Settings),
    SettingsAck,
    Ping {
        payload: [u8; 8],
        ack: bool,
    },
    GoAway {
        last_stream_id: StreamId,
        reason: Reason,
    },
    Flush,
    Shutdown,
}

pub struct WriterLoop<W> {
    transport: W,
    rx: mpsc::UnboundedReceiver<WriterCommand>,
    buffer: OutgoingBuffer,
    pool: std::sync::Arc<BufferPool>,
    max_frame_size: u32,
}

impl<W: tokio::io::AsyncWrite + Unpin> WriterLoop<W> {
    pub fn new(
        transport: W,
        rx: mpsc::UnboundedReceiver<WriterCommand>,
        pool: std::sync::Arc<BufferPool>,
        max_frame_size: u32,
    ) -> WriterLoop<W> {
        WriterLoop {
            transport,
            rx,
            buffer: pool.rent(),
            pool,
            max_frame_size,
        }
    }

    /// Drains commands until the channel closes or a transport error
    /// forces the connection down, returning whatever ended the loop so
    /// `Connection::abort` can act on it.
    pub async fn run(mut self) -> ConnectionError {
        loop {
            let cmd = match self.rx.recv().await {
                Some(cmd) => cmd,
                None => return ConnectionError::GracefulShutdown,
            };

            if matches!(cmd, WriterCommand::Shutdown) {
                if let Err(e) = self.flush_to_transport().await {
                    return e;
                }
                return ConnectionError::GracefulShutdown;
            }

            self.encode(cmd);

            let should_flush =
                self.buffer.len() >= UNFLUSHED_THRESHOLD || self.rx.is_empty();
            if should_flush {
                if let Err(e) = self.flush_to_transport().await {
                    return e;
                }
            }
        }
    }

    fn encode(&mut self, cmd: WriterCommand) {
        match cmd {
            WriterCommand::Headers {
                stream_id,
                fragment,
                end_stream,
            } => self.encode_header_block(stream_id, &fragment, end_stream),
            WriterCommand::Data {
                stream_id,
                bytes,
                end_stream,
            } => self.encode_data(stream_id, bytes, end_stream),
            WriterCommand::RstStream { stream_id, reason } => {
                RstStream::new(stream_id, reason).encode(self.buffer.writer());
            }
            WriterCommand::WindowUpdate {
                stream_id,
                increment,
            } => {
                WindowUpdate::new(stream_id, increment).encode(self.buffer.writer());
            }
            WriterCommand::Settings(settings) => {
                settings.encode(self.buffer.writer());
            }
            WriterCommand::SettingsAck => {
                let head = Head::new(Kind::Settings, Flags::ACK, StreamId::ZERO);
                head.encode(0, self.buffer.writer());
            }
            WriterCommand::Ping { payload, ack } => {
                let ping = if ack { Ping::pong(payload) } else { Ping::new(payload) };
                ping.encode(self.buffer.writer());
            }
            WriterCommand::GoAway {
                last_stream_id,
                reason,
            } => {
                GoAway::new(reason)
                    .set_last_stream_id(last_stream_id)
                    .encode(self.buffer.writer());
            }
            WriterCommand::Flush | WriterCommand::Shutdown => {}
        }
    }

    fn encode_header_block(&mut self, stream_id: StreamId, fragment: &[u8], end_stream: bool) {
        let max = self.max_frame_size as usize;
        if fragment.len() <= max {
            Headers::encode(stream_id, fragment, true, end_stream, self.buffer.writer());
            return;
        }

        let (first, rest) = fragment.split_at(max);
        Headers::encode(stream_id, first, false, end_stream, self.buffer.writer());

        let mut chunks = rest.chunks(max).peekable();
        while let Some(chunk) = chunks.next() {
            let end_headers = chunks.peek().is_none();
            Continuation::encode(stream_id, chunk, end_headers, self.buffer.writer());
        }
    }

    fn encode_data(&mut self, stream_id: StreamId, bytes: Bytes, end_stream: bool) {
        let max = self.max_frame_size as usize;
        if bytes.len() <= max || bytes.is_empty() {
            Data::encode(stream_id, &bytes, end_stream, self.buffer.writer());
            return;
        }

        let mut offset = 0;
        while offset < bytes.len() {
            let end = (offset + max).min(bytes.len());
            let is_last = end == bytes.len();
            Data::encode(
                stream_id,
                &bytes[offset..end],
                is_last && end_stream,
                self.buffer.writer(),
            );
            offset = end;
        }
    }

    async fn flush_to_transport(&mut self) -> Result<(), ConnectionError> {
        while !self.buffer.is_empty() {
            let span = self.buffer.active_span();
            let n = self
                .transport
                .write(span)
                .await
                .map_err(|e| ConnectionError::Io(std::sync::Arc::new(e)))?;
            if n == 0 {
                return Err(ConnectionError::Io(std::sync::Arc::new(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "transport accepted zero bytes",
                ))));
            }
            self.buffer.discard(n);
        }
        self.transport
            .flush()
            .await
            .map_err(|e| ConnectionError::Io(std::sync::Arc::new(e)))?;
        self.buffer.clear_and_return(&self.pool);
        Ok(())
    }
}
