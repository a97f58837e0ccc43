//! Converting frame stream - Parallel, budget-throttled frame conversion.
//!
//! A single background worker pulls batches of descriptors from the input
//! queue and converts each batch on a dedicated thread pool. Results are
//! written into a buffer indexed by position within the batch, so the output
//! queue always matches enqueue order no matter how the pool schedules work.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{
    Budget, CANCEL_POLL, CancelToken, ConvertError, DEFAULT_BATCH_SIZE,
    DEFAULT_CONVERSION_THREADS, FrameConverter, FrameStream, RenderedFrame, StreamError,
    StreamStatus,
};

/// Tuning for a [`ConvFrameStream`].
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    /// Parallel conversion tasks per batch.
    pub conversion_threads: usize,
    /// Maximum descriptors pulled per batch.
    pub batch_size: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            conversion_threads: DEFAULT_CONVERSION_THREADS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// State shared between the worker and consumers.
struct Queues<D> {
    inbox: VecDeque<D>,
    outbox: VecDeque<RenderedFrame>,
    /// Queued + in-flight + ready.
    count: usize,
    status: StreamStatus,
    budget: Budget,
    /// Absolute position of the next descriptor handed to the worker.
    next_position: usize,
    failure: Option<StreamError>,
    failed: bool,
    shutdown: bool,
}

struct Shared<D> {
    queues: Mutex<Queues<D>>,
    /// Signalled on every change to output, status, budget or input.
    changed: Condvar,
}

impl<D> Shared<D> {
    fn lock(&self) -> MutexGuard<'_, Queues<D>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Queues<D>>) -> MutexGuard<'a, Queues<D>> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_briefly<'a>(&self, guard: MutexGuard<'a, Queues<D>>) -> MutexGuard<'a, Queues<D>> {
        self.changed
            .wait_timeout(guard, CANCEL_POLL)
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    /// Block until a batch may be converted, or return `None` once the worker
    /// should stop.
    fn next_batch(&self, batch_size: usize) -> Option<(Vec<D>, usize)> {
        let mut q = self.lock();
        loop {
            if q.shutdown || q.inbox.is_empty() {
                q.status = StreamStatus::Stopped;
                self.changed.notify_all();
                return None;
            }

            let wanted = batch_size.min(q.inbox.len());
            let granted = q.budget.reserve(wanted);
            if granted == 0 {
                if q.status != StreamStatus::Idle {
                    debug!("Frame stream idle with {} queued", q.inbox.len());
                    q.status = StreamStatus::Idle;
                    self.changed.notify_all();
                }
                q = self.wait(q);
                continue;
            }

            q.status = StreamStatus::Working;
            let batch: Vec<D> = q.inbox.drain(..granted).collect();
            let first = q.next_position;
            q.next_position += granted;
            return Some((batch, first));
        }
    }

    /// Publish the frames converted before `failure`, if any. Returns false
    /// if the stream has failed.
    fn finish_batch(&self, frames: Vec<RenderedFrame>, failure: Option<StreamError>) -> bool {
        let mut q = self.lock();
        q.outbox.extend(frames);
        let keep_going = match failure {
            None => true,
            Some(err) => {
                warn!("Frame stream failed: {}", err);
                q.inbox.clear();
                q.count = q.outbox.len();
                q.failure = Some(err);
                q.failed = true;
                q.status = StreamStatus::Stopped;
                false
            }
        };
        self.changed.notify_all();
        keep_going
    }
}

/// Frame stream that converts descriptors on a background worker.
///
/// Usage:
/// ```ignore
/// let stream = ConvFrameStream::new(HalfBlockConverter::new())?;
/// stream.safely_process_more(32);
/// stream.add_and_run(paths);
/// let frame = stream.get(&CancelToken::new())?;
/// ```
pub struct ConvFrameStream<C: FrameConverter> {
    shared: Arc<Shared<C::Descriptor>>,
    converter: Arc<C>,
    pool: Arc<ThreadPool>,
    batch_size: usize,
}

impl<C: FrameConverter> ConvFrameStream<C> {
    /// Create an empty stream with default options.
    pub fn new(converter: C) -> Result<Self, StreamError> {
        Self::with_options(converter, StreamOptions::default())
    }

    /// Create an empty stream with explicit pool and batch sizes.
    pub fn with_options(converter: C, options: StreamOptions) -> Result<Self, StreamError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.conversion_threads.max(1))
            .thread_name(|i| format!("frame-convert-{}", i))
            .build()?;

        Ok(Self {
            shared: Arc::new(Shared {
                queues: Mutex::new(Queues {
                    inbox: VecDeque::new(),
                    outbox: VecDeque::new(),
                    count: 0,
                    status: StreamStatus::Stopped,
                    budget: Budget::Unset,
                    next_position: 0,
                    failure: None,
                    failed: false,
                    shutdown: false,
                }),
                changed: Condvar::new(),
            }),
            converter: Arc::new(converter),
            pool: Arc::new(pool),
            batch_size: options.batch_size.max(1),
        })
    }

    /// Number of parallel conversion tasks.
    pub fn conversion_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

fn worker_loop<C: FrameConverter>(
    shared: Arc<Shared<C::Descriptor>>,
    converter: Arc<C>,
    pool: Arc<ThreadPool>,
    batch_size: usize,
) {
    while let Some((batch, first)) = shared.next_batch(batch_size) {
        let len = batch.len();
        let mut slots: Vec<Option<Result<RenderedFrame, ConvertError>>> =
            std::iter::repeat_with(|| None).take(len).collect();

        // install() returns only once every task in the batch has finished.
        pool.install(|| {
            slots
                .par_iter_mut()
                .zip(batch.into_par_iter())
                .for_each(|(slot, descriptor)| *slot = Some(converter.convert(&descriptor)));
        });

        // Frames ahead of the first failure in the batch are still delivered.
        let mut frames = Vec::with_capacity(len);
        let mut failure = None;
        for (i, slot) in slots.into_iter().enumerate() {
            match slot.unwrap_or_else(|| Err(ConvertError::Other("conversion task did not run".into()))) {
                Ok(frame) => frames.push(frame),
                Err(source) => {
                    failure = Some(StreamError::Conversion {
                        position: first + i,
                        source,
                    });
                    break;
                }
            }
        }

        debug!("Converted frames {}..{}", first, first + frames.len());

        if !shared.finish_batch(frames, failure) {
            return;
        }
    }
    debug!("Frame stream worker stopped");
}

impl<C: FrameConverter> FrameStream for ConvFrameStream<C> {
    type Item = C::Descriptor;

    fn status(&self) -> StreamStatus {
        self.shared.lock().status
    }

    fn count(&self) -> usize {
        self.shared.lock().count
    }

    fn ready_count(&self) -> usize {
        self.shared.lock().outbox.len()
    }

    fn budget(&self) -> Budget {
        self.shared.lock().budget
    }

    fn add(&self, items: Vec<C::Descriptor>) {
        let mut q = self.shared.lock();
        q.count += items.len();
        q.inbox.extend(items);
        self.shared.changed.notify_all();
    }

    fn try_get(&self) -> Result<Option<RenderedFrame>, StreamError> {
        let mut q = self.shared.lock();
        if let Some(frame) = q.outbox.pop_front() {
            q.count -= 1;
            return Ok(Some(frame));
        }
        match q.failure.take() {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    fn get(&self, cancel: &CancelToken) -> Result<RenderedFrame, StreamError> {
        let mut q = self.shared.lock();
        loop {
            if let Some(frame) = q.outbox.pop_front() {
                q.count -= 1;
                return Ok(frame);
            }
            if let Some(err) = q.failure.take() {
                return Err(err);
            }
            if q.count == 0 {
                return Err(StreamError::Exhausted);
            }
            if cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            q = self.shared.wait_briefly(q);
        }
    }

    fn get_all_remaining(&self, cancel: &CancelToken) -> Result<Vec<RenderedFrame>, StreamError> {
        let mut q = self.shared.lock();
        while q.status != StreamStatus::Stopped {
            if cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            q = self.shared.wait_briefly(q);
        }
        // A failure is reported only once the frames before it are drained.
        if q.outbox.is_empty() {
            if let Some(err) = q.failure.take() {
                return Err(err);
            }
        }
        let frames: Vec<RenderedFrame> = q.outbox.drain(..).collect();
        q.count -= frames.len();
        Ok(frames)
    }

    fn safely_process_more(&self, items: usize) {
        let mut q = self.shared.lock();
        q.budget.extend(items);
        if items > 0 && q.status == StreamStatus::Idle {
            q.status = StreamStatus::Working;
        }
        self.shared.changed.notify_all();
    }

    fn safely_process_all(&self) {
        let mut q = self.shared.lock();
        q.budget = Budget::Unlimited;
        // The idle worker resumes as soon as it reacquires the lock.
        if q.status == StreamStatus::Idle {
            q.status = StreamStatus::Working;
        }
        self.shared.changed.notify_all();
    }

    fn run(&self) {
        let mut q = self.shared.lock();
        if q.status != StreamStatus::Stopped || q.failed || q.inbox.is_empty() {
            return;
        }
        q.status = StreamStatus::Working;
        info!(
            "Starting frame stream: {} queued, budget {}",
            q.inbox.len(),
            q.budget.as_i64()
        );
        drop(q);

        let shared = Arc::clone(&self.shared);
        let converter = Arc::clone(&self.converter);
        let pool = Arc::clone(&self.pool);
        let batch_size = self.batch_size;

        let spawned = thread::Builder::new()
            .name("frame-stream".into())
            .spawn(move || worker_loop(shared, converter, pool, batch_size));

        if let Err(e) = spawned {
            warn!("Failed to spawn frame stream worker: {}", e);
            self.shared.lock().status = StreamStatus::Stopped;
            self.shared.changed.notify_all();
        }
    }
}

impl<C: FrameConverter> Drop for ConvFrameStream<C> {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::converter_fn;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn jittery_converter() -> impl FrameConverter<Descriptor = usize> {
        converter_fn(|n: &usize| {
            // Later items finish first within a batch.
            thread::sleep(Duration::from_micros(((n * 7919) % 13) as u64 * 100));
            Ok(RenderedFrame::new(format!("frame-{}", n)))
        })
    }

    fn counting_converter(calls: Arc<AtomicUsize>) -> impl FrameConverter<Descriptor = usize> {
        converter_fn(move |n: &usize| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(RenderedFrame::new(n.to_string()))
        })
    }

    fn expected(n: usize) -> Vec<RenderedFrame> {
        (0..n)
            .map(|i| RenderedFrame::new(format!("frame-{}", i)))
            .collect()
    }

    #[test]
    fn test_output_order_matches_input() {
        let stream = ConvFrameStream::new(jittery_converter()).unwrap();
        stream.add_and_run((0..100).collect());

        let frames = stream.get_all_remaining(&CancelToken::new()).unwrap();
        assert_eq!(frames, expected(100));
        assert_eq!(stream.count(), 0);
        assert_eq!(stream.status(), StreamStatus::Stopped);
    }

    #[test]
    fn test_get_decrements_count_by_one() {
        let stream = ConvFrameStream::new(jittery_converter()).unwrap();
        stream.add_and_run((0..40).collect());
        let cancel = CancelToken::new();

        let mut received = Vec::new();
        while stream.count() > 0 {
            let before = stream.count();
            assert!(stream.ready_count() <= before);
            received.push(stream.get(&cancel).unwrap());
            assert_eq!(stream.count(), before - 1);
            assert!(stream.ready_count() <= stream.count());
        }
        assert_eq!(received, expected(40));
    }

    #[test]
    fn test_try_get_without_run() {
        let stream = ConvFrameStream::new(jittery_converter()).unwrap();
        stream.add(vec![1, 2, 3]);
        assert_eq!(stream.count(), 3);
        assert_eq!(stream.ready_count(), 0);
        assert!(stream.try_get().unwrap().is_none());
        assert_eq!(stream.status(), StreamStatus::Stopped);
    }

    #[test]
    fn test_process_more_caps_conversions() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = ConvFrameStream::new(counting_converter(Arc::clone(&calls))).unwrap();
        stream.safely_process_more(5);
        stream.add_and_run((0..40).collect());

        assert!(wait_until(Duration::from_secs(5), || {
            stream.status() == StreamStatus::Idle
        }));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(stream.ready_count(), 5);
        assert_eq!(stream.budget(), Budget::Limited(0));

        stream.safely_process_more(3);
        assert!(wait_until(Duration::from_secs(5), || {
            stream.ready_count() == 8 && stream.status() == StreamStatus::Idle
        }));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(stream.count(), 40);
    }

    #[test]
    fn test_process_all_never_idles_again() {
        let stream = ConvFrameStream::new(jittery_converter()).unwrap();
        stream.safely_process_more(2);
        stream.add_and_run((0..10).collect());
        assert!(wait_until(Duration::from_secs(5), || {
            stream.status() == StreamStatus::Idle
        }));

        stream.add((10..60).collect());
        stream.safely_process_all();
        assert_eq!(stream.budget(), Budget::Unlimited);

        let start = Instant::now();
        while stream.status() != StreamStatus::Stopped {
            assert_ne!(stream.status(), StreamStatus::Idle);
            assert!(start.elapsed() < Duration::from_secs(5));
        }

        stream.safely_process_more(4);
        assert_eq!(stream.budget(), Budget::Unlimited);

        let frames = stream.get_all_remaining(&CancelToken::new()).unwrap();
        assert_eq!(frames, expected(60));
    }

    #[test]
    fn test_run_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stream = ConvFrameStream::new(counting_converter(Arc::clone(&calls))).unwrap();
        stream.add((0..30).collect());
        stream.run();
        stream.run();
        stream.run();

        let frames = stream.get_all_remaining(&CancelToken::new()).unwrap();
        assert_eq!(frames.len(), 30);
        assert_eq!(calls.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn test_conversion_failure_is_fatal() {
        let converter = converter_fn(|n: &usize| {
            if *n == 3 {
                Err(ConvertError::Other("bad frame".into()))
            } else {
                Ok(RenderedFrame::new(n.to_string()))
            }
        });
        let stream = ConvFrameStream::new(converter).unwrap();
        stream.add_and_run((0..20).collect());
        let cancel = CancelToken::new();

        // Frames converted ahead of the failure in the same batch survive.
        let frames = stream.get_all_remaining(&cancel).unwrap();
        assert_eq!(
            frames,
            vec![
                RenderedFrame::new("0"),
                RenderedFrame::new("1"),
                RenderedFrame::new("2")
            ]
        );
        assert_eq!(stream.count(), 0);

        let err = stream.get_all_remaining(&cancel).unwrap_err();
        assert!(matches!(err, StreamError::Conversion { position: 3, .. }));
        assert!(stream.get_all_remaining(&cancel).unwrap().is_empty());

        // Pending input is discarded and the stream cannot be restarted.
        stream.add(vec![100]);
        stream.run();
        assert_eq!(stream.status(), StreamStatus::Stopped);
    }

    #[test]
    fn test_failure_reported_after_ready_frames() {
        let converter = converter_fn(|n: &usize| {
            if *n == 7 {
                Err(ConvertError::Other("bad frame".into()))
            } else {
                Ok(RenderedFrame::new(n.to_string()))
            }
        });
        let options = StreamOptions {
            conversion_threads: 2,
            batch_size: 4,
        };
        let stream = ConvFrameStream::with_options(converter, options).unwrap();
        stream.add_and_run((0..12).collect());
        let cancel = CancelToken::new();

        for i in 0..7 {
            assert_eq!(stream.get(&cancel).unwrap().as_str(), i.to_string());
        }
        let err = stream.get(&cancel).unwrap_err();
        assert!(matches!(err, StreamError::Conversion { position: 7, .. }));
        assert!(matches!(stream.get(&cancel), Err(StreamError::Exhausted)));
        assert!(stream.try_get().unwrap().is_none());
    }

    #[test]
    fn test_get_on_empty_stream_is_exhausted() {
        let stream = ConvFrameStream::new(jittery_converter()).unwrap();
        let err = stream.get(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, StreamError::Exhausted));
    }

    #[test]
    fn test_get_honours_cancellation() {
        let stream = ConvFrameStream::new(jittery_converter()).unwrap();
        stream.add(vec![1, 2, 3]);
        let cancel = CancelToken::new();

        let canceller = cancel.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });

        let err = stream.get(&cancel).unwrap_err();
        assert!(matches!(err, StreamError::Cancelled));
        handle.join().unwrap();
    }

    #[test]
    fn test_custom_pool_size() {
        let options = StreamOptions {
            conversion_threads: 3,
            batch_size: 5,
        };
        let stream = ConvFrameStream::with_options(jittery_converter(), options).unwrap();
        assert_eq!(stream.conversion_threads(), 3);
        stream.add_and_run((0..23).collect());
        let frames = stream.get_all_remaining(&CancelToken::new()).unwrap();
        assert_eq!(frames, expected(23));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_order_independent_of_pool(n in 0usize..80, threads in 1usize..9, batch in 1usize..20) {
            let options = StreamOptions { conversion_threads: threads, batch_size: batch };
            let stream = ConvFrameStream::with_options(jittery_converter(), options).unwrap();
            stream.add_and_run((0..n).collect());
            let frames = stream.get_all_remaining(&CancelToken::new()).unwrap();
            prop_assert_eq!(frames, expected(n));
        }
    }
}
