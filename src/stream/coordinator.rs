//! The per-stream write coordinator.
//!
//! Owns the decision of *when* a stream's bytes are allowed onto the wire:
//! gates a `send_data` call on both the stream window and the connection
//! window, decrementing both under lock before handing the frame to the
//! writer loop so two streams racing for the last bytes of connection
//! credit can't both believe they got it.
//!
//! Cancellation is a race between a caller's `CancellationToken` firing
//! and a `CreditManager` granting credit in the same instant, and must
//! resolve to exactly one outcome. We resolve it with a single
//! `tokio::select!` in `wait_for_credit`, plus the "try disable
//! cancellation" flag on `CreditRequest` so a grant that wins the race
//! can't be silently dropped on the floor.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{OperationError, StreamError};
use crate::flow::{CreditManager, CreditRequestOutcome};
use crate::frame::StreamId;
use crate::registry::Registry;
use crate::stream::StreamSlot;
use crate::writer::WriterCommand;

/// One stream's link to the writer loop. Cheap to clone; every clone
/// shares the same underlying window and cancellation state.
pub struct WriteCoordinator {
    stream_id: StreamId,
    slot: Arc<StreamSlot>,
    stream_window: Arc<CreditManager>,
    connection_window: Arc<CreditManager>,
    to_writer: mpsc::UnboundedSender<WriterCommand>,
    cancel: CancellationToken,
    registry: Arc<Registry>,
}

impl WriteCoordinator {
    pub fn new(
        stream_id: StreamId,
        slot: Arc<StreamSlot>,
        stream_window: Arc<CreditManager>,
        connection_window: Arc<CreditManager>,
        to_writer: mpsc::UnboundedSender<WriterCommand>,
        cancel: CancellationToken,
        registry: Arc<Registry>,
    ) -> WriteCoordinator {
        WriteCoordinator {
            stream_id,
            slot,
            stream_window,
            connection_window,
            to_writer,
            cancel,
            registry,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Sends the request header block. Headers aren't flow-controlled;
    /// this just hands the fragment to the writer loop, which is
    /// responsible for splitting it across HEADERS + CONTINUATION frames
    /// at the negotiated max frame size.
    pub fn send_headers(
        &self,
        fragment: Bytes,
        end_stream: bool,
    ) -> Result<(), OperationError> {
        if end_stream {
            self.slot.on_local_end_stream();
        }
        self.to_writer
            .send(WriterCommand::Headers {
                stream_id: self.stream_id,
                fragment,
                end_stream,
            })
            .map_err(|_| OperationError::Unavailable)
    }

    /// Sends `data`, waiting for both stream and connection credit first.
    /// Splits at whatever the credit grant allows, issuing one writer
    /// command per granted chunk so a single oversized body doesn't need
    /// to pre-allocate its own framing.
    pub async fn send_data(&self, mut data: Bytes, end_stream: bool) -> Result<(), OperationError> {
        while !data.is_empty() {
            let n = data.len() as u32;
            let granted = self.wait_for_credit(&self.stream_window, n).await?;
            let granted = self.wait_for_credit(&self.connection_window, granted).await?;

            let chunk = data.split_to(granted as usize);
            let is_last = data.is_empty();
            self.to_writer
                .send(WriterCommand::Data {
                    stream_id: self.stream_id,
                    bytes: chunk,
                    end_stream: is_last && end_stream,
                })
                .map_err(|_| OperationError::Unavailable)?;
        }

        if data.is_empty() && end_stream {
            // Body was empty to begin with; still need to signal END_STREAM.
            self.slot.on_local_end_stream();
            self.to_writer
                .send(WriterCommand::Data {
                    stream_id: self.stream_id,
                    bytes: Bytes::new(),
                    end_stream: true,
                })
                .map_err(|_| OperationError::Unavailable)?;
        } else if end_stream {
            self.slot.on_local_end_stream();
        }

        Ok(())
    }

    async fn wait_for_credit(&self, window: &Arc<CreditManager>, n: u32) -> Result<u32, OperationError> {
        match window.request_credit(n) {
            CreditRequestOutcome::Granted(granted) => Ok(granted),
            CreditRequestOutcome::Pending(req) => {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        req.cancel();
                        Err(OperationError::Cancelled)
                    }
                    result = req.wait() => Ok(result?),
                }
            }
        }
    }

    pub fn flush(&self) -> Result<(), OperationError> {
        self.to_writer
            .send(WriterCommand::Flush)
            .map_err(|_| OperationError::Unavailable)
    }

    /// Resets the stream locally: tells the writer to put an RST_STREAM
    /// on the wire, then releases the registry's own bookkeeping for it
    /// (stream window, concurrency slot, and delivering `Reset`/`Eof` to
    /// the response stream) the same way a peer-initiated RST_STREAM or a
    /// GOAWAY drain does. Without this the stream would keep occupying a
    /// `max_concurrent_streams` slot forever unless the peer happened to
    /// also send its own RST_STREAM back.
    pub fn reset(&self, reason: crate::frame::Reason) -> Result<(), OperationError> {
        self.slot.transition(crate::stream::StreamState::Closed);
        let result = self
            .to_writer
            .send(WriterCommand::RstStream {
                stream_id: self.stream_id,
                reason,
            })
            .map_err(|_| OperationError::Unavailable);
        self.registry
            .reset_stream(self.stream_id, StreamError::LocalReset(reason));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamAttributes;

    fn harness() -> (WriteCoordinator, mpsc::UnboundedReceiver<WriterCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = Arc::new(StreamSlot::reserved(StreamAttributes::default(), mpsc::unbounded_channel().0));
        slot.assign_id(StreamId::new(1));
        let registry = Arc::new(Registry::new(100));
        registry.add_stream(StreamId::new(1), slot.clone(), |_| {});
        let coordinator = WriteCoordinator::new(
            StreamId::new(1),
            slot,
            Arc::new(CreditManager::new(1 << 20)),
            Arc::new(CreditManager::new(1 << 20)),
            tx,
            CancellationToken::new(),
            registry,
        );
        (coordinator, rx)
    }

    #[test]
    fn reset_releases_the_registry_slot() {
        let (coordinator, _rx) = harness();
        assert_eq!(coordinator.registry.open_count(), 1);
        coordinator.reset(crate::frame::Reason::CANCEL).unwrap();
        assert_eq!(coordinator.registry.open_count(), 0);
    }

    #[tokio::test]
    async fn send_data_splits_on_available_credit() {
        let (coordinator, mut rx) = harness();
        coordinator
            .send_data(Bytes::from_static(b"hello world"), true)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            WriterCommand::Data { bytes, end_stream, .. } => {
                assert_eq!(&bytes[..], b"hello world");
                assert!(end_stream);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_wins_a_parked_request() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let slot = Arc::new(StreamSlot::reserved(StreamAttributes::default(), mpsc::unbounded_channel().0));
        slot.assign_id(StreamId::new(1));
        let registry = Arc::new(Registry::new(100));
        registry.add_stream(StreamId::new(1), slot.clone(), |_| {});
        let cancel = CancellationToken::new();
        let coordinator = WriteCoordinator::new(
            StreamId::new(1),
            slot,
            Arc::new(CreditManager::new(0)),
            Arc::new(CreditManager::new(1 << 20)),
            tx,
            cancel.clone(),
            registry,
        );

        cancel.cancel();
        let result = coordinator.send_data(Bytes::from_static(b"x"), false).await;
        assert!(matches!(result, Err(OperationError::Cancelled)));
    }
}
