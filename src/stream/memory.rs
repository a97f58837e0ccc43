//! Memory-backed frame stream for frames that are already rendered.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{Budget, CancelToken, FrameStream, RenderedFrame, StreamError, StreamStatus};

/// A frame stream that just buffers rendered frames in memory.
///
/// There is no worker: every queued frame is immediately ready, the status is
/// always [`StreamStatus::Stopped`] and budget requests are ignored.
#[derive(Debug, Default)]
pub struct MemoryFrameStream {
    frames: Mutex<VecDeque<RenderedFrame>>,
}

impl MemoryFrameStream {
    pub fn new() -> Self {
        Self::default()
    }

    fn frames(&self) -> MutexGuard<'_, VecDeque<RenderedFrame>> {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<Vec<RenderedFrame>> for MemoryFrameStream {
    fn from(frames: Vec<RenderedFrame>) -> Self {
        Self {
            frames: Mutex::new(frames.into()),
        }
    }
}

impl FrameStream for MemoryFrameStream {
    type Item = RenderedFrame;

    fn status(&self) -> StreamStatus {
        StreamStatus::Stopped
    }

    fn count(&self) -> usize {
        self.frames().len()
    }

    fn ready_count(&self) -> usize {
        self.count()
    }

    fn budget(&self) -> Budget {
        Budget::Unset
    }

    fn add(&self, items: Vec<RenderedFrame>) {
        self.frames().extend(items);
    }

    fn add_and_run(&self, items: Vec<RenderedFrame>) {
        self.add(items);
    }

    fn try_get(&self) -> Result<Option<RenderedFrame>, StreamError> {
        Ok(self.frames().pop_front())
    }

    fn get(&self, cancel: &CancelToken) -> Result<RenderedFrame, StreamError> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        // Every queued frame is ready, so an empty buffer can never fill itself.
        self.frames().pop_front().ok_or(StreamError::Exhausted)
    }

    fn get_all_remaining(&self, _cancel: &CancelToken) -> Result<Vec<RenderedFrame>, StreamError> {
        Ok(self.frames().drain(..).collect())
    }

    fn safely_process_more(&self, _items: usize) {}

    fn safely_process_all(&self) {}

    fn run(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(n: usize) -> Vec<RenderedFrame> {
        (0..n).map(|i| RenderedFrame::new(format!("{}", i))).collect()
    }

    #[test]
    fn test_memory_stream_fifo() {
        let stream = MemoryFrameStream::from(frames(3));
        assert_eq!(stream.count(), 3);
        assert_eq!(stream.ready_count(), 3);

        let cancel = CancelToken::new();
        assert_eq!(stream.get(&cancel).unwrap().as_str(), "0");
        assert_eq!(stream.try_get().unwrap().unwrap().as_str(), "1");
        assert_eq!(stream.count(), 1);
        assert_eq!(stream.get_all_remaining(&cancel).unwrap(), frames(3)[2..]);
        assert_eq!(stream.count(), 0);
    }

    #[test]
    fn test_memory_stream_exhausted() {
        let stream = MemoryFrameStream::new();
        assert!(stream.try_get().unwrap().is_none());
        assert!(matches!(
            stream.get(&CancelToken::new()),
            Err(StreamError::Exhausted)
        ));
    }

    #[test]
    fn test_memory_stream_ignores_budget() {
        let stream = MemoryFrameStream::new();
        stream.safely_process_more(4);
        stream.add_and_run(frames(2));
        assert_eq!(stream.budget(), Budget::Unset);
        assert_eq!(stream.status(), StreamStatus::Stopped);
        assert_eq!(stream.ready_count(), 2);
    }
}
