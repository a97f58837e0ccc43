//! Frame streams - Backpressure-controlled delivery of rendered frames.
//!
//! A [`FrameStream`] owns an input queue of items and an output queue of
//! [`RenderedFrame`]s. Consumers pull frames in enqueue order while the
//! producer side is throttled through a conversion [`Budget`].
//!
//! Two implementations are provided:
//!
//! - [`ConvFrameStream`]: converts descriptors on a background worker that fans
//!   each batch out to a bounded thread pool.
//! - [`MemoryFrameStream`]: buffers frames that are already rendered (for
//!   example frames restored from a CVID container).

mod conv;
mod frame;
mod memory;

pub use conv::*;
pub use frame::*;
pub use memory::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Default number of parallel conversion tasks per stream.
pub const DEFAULT_CONVERSION_THREADS: usize = 8;

/// Default number of descriptors pulled per worker batch.
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Interval at which suspended callers re-check their cancellation token.
pub(crate) const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Worker status of a frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamStatus {
    /// Not running or finished.
    #[default]
    Stopped,
    /// Currently converting frames.
    Working,
    /// Parked until the budget is replenished.
    Idle,
}

/// Conversion budget of a frame stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Budget {
    /// No cap has been requested yet. The worker runs uncapped.
    #[default]
    Unset,
    /// Uncapped until the end of the run cycle.
    Unlimited,
    /// Number of further conversions permitted before the worker idles.
    Limited(usize),
}

impl Budget {
    /// Signed view of the budget: -1 for unlimited, otherwise the remaining count.
    pub fn as_i64(self) -> i64 {
        match self {
            Budget::Unset | Budget::Unlimited => -1,
            Budget::Limited(n) => n as i64,
        }
    }

    /// Extend the budget by `items`. Unlimited stays unlimited.
    pub fn extend(&mut self, items: usize) {
        *self = match *self {
            Budget::Unlimited => Budget::Unlimited,
            Budget::Unset => Budget::Limited(items),
            Budget::Limited(n) => Budget::Limited(n.saturating_add(items)),
        };
    }

    /// Reserve up to `wanted` conversions, returning how many were granted.
    pub fn reserve(&mut self, wanted: usize) -> usize {
        match self {
            Budget::Unset | Budget::Unlimited => wanted,
            Budget::Limited(n) => {
                let granted = wanted.min(*n);
                *n -= granted;
                granted
            }
        }
    }

    /// Whether the budget currently permits no further conversions.
    pub fn is_exhausted(self) -> bool {
        self == Budget::Limited(0)
    }
}

/// Cooperative cancellation signal shared between a caller and suspended operations.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Errors surfaced by frame streams.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Conversion of frame {position} failed: {source}")]
    Conversion {
        position: usize,
        #[source]
        source: ConvertError,
    },

    #[error("Frame stream is exhausted")]
    Exhausted,

    #[error("Frame stream operation was cancelled")]
    Cancelled,

    #[error("Failed to build conversion thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// A stream that provides rendered frames on demand to a consumer.
///
/// All methods take `&self`; implementations synchronise internally so a
/// producer thread and a consumer can share one stream.
pub trait FrameStream: Send + Sync {
    /// Item accepted by [`FrameStream::add`].
    type Item: Send;

    /// Current worker status.
    fn status(&self) -> StreamStatus;

    /// Items not yet delivered to a consumer (queued + in-flight + ready).
    fn count(&self) -> usize;

    /// Items that can be retrieved right now without suspending.
    fn ready_count(&self) -> usize;

    /// Current conversion budget.
    fn budget(&self) -> Budget;

    /// Enqueue items. Does not start conversion.
    fn add(&self, items: Vec<Self::Item>);

    /// Enqueue items and start processing if not already running.
    fn add_and_run(&self, items: Vec<Self::Item>) {
        self.add(items);
        self.run();
    }

    /// Take a ready frame without suspending.
    fn try_get(&self) -> Result<Option<RenderedFrame>, StreamError>;

    /// Take the next frame, suspending until one is ready.
    fn get(&self, cancel: &CancelToken) -> Result<RenderedFrame, StreamError>;

    /// Wait for the worker to stop, then drain every ready frame in order.
    ///
    /// A conversion failure is returned by the first call that finds no
    /// ready frames left.
    fn get_all_remaining(&self, cancel: &CancelToken) -> Result<Vec<RenderedFrame>, StreamError>;

    /// Permit `items` more conversions before the worker idles again.
    fn safely_process_more(&self, items: usize);

    /// Lift the conversion cap for the rest of the run cycle.
    fn safely_process_all(&self);

    /// Start the background worker. No-op unless the stream is stopped.
    fn run(&self);
}
