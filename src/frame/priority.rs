use super::{Head, StreamId};
use crate::error::FrameError;

/// A parsed PRIORITY frame. This client does not implement priority
/// reordering, so this carries no weight/dependency fields a caller could
/// act on — it exists only so the reader loop can acknowledge the frame was
/// consumed and move on.
#[derive(Debug)]
pub struct Priority {
    stream_id: StreamId,
}

impl Priority {
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Priority, FrameError> {
        if payload.len() != 5 {
            return Err(FrameError::Short);
        }
        Ok(Priority {
            stream_id: head.stream_id(),
        })
    }
}
