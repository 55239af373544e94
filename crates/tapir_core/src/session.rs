//! Capture Session Facade
//!
//! [`ProcessCapture`] is the whole public lifecycle: construct idle,
//! `start()` to acquire OS resources and spawn the worker, consume via
//! callback / `read` / [`ChunkStream`], `stop()` to tear down. Stopping
//! is idempotent and never fails observably; dropping the session stops
//! it, so a `ProcessCapture` binding is the scoped-use form - normal or
//! unwinding scope exit releases the OS capture handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use tapir_convert::CanonicalFormat;

use crate::config::CaptureConfig;
use crate::error::{CaptureError, CaptureResult};
use crate::queue::{delivery_queue, QueueItem};
use crate::stream::ChunkStream;
use crate::worker::{self, AdapterFactory, CallbackSlot, WorkerSetup};

pub use crate::worker::AudioCallback;

/// How long `stop` waits for the worker before detaching it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// How long `start` waits for the worker's open/start handshake.
const START_TIMEOUT: Duration = Duration::from_secs(5);

/// A capture session against one target process.
pub struct ProcessCapture {
    pid: u32,
    config: CaptureConfig,
    callback: CallbackSlot,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    queue_rx: Option<Receiver<QueueItem>>,
    factory: AdapterFactory,
}

impl ProcessCapture {
    /// New idle session with default configuration. No OS resources are
    /// touched until [`start`](Self::start).
    pub fn new(pid: u32) -> Self {
        Self::with_config(pid, CaptureConfig::default())
    }

    /// New idle session with explicit configuration.
    pub fn with_config(pid: u32, config: CaptureConfig) -> Self {
        Self::build(
            pid,
            config,
            Arc::new(|pid, options| tapir_platform::open_adapter(pid, options)),
        )
    }

    /// Test seam: a session whose adapter comes from `factory`.
    pub(crate) fn build(pid: u32, config: CaptureConfig, factory: AdapterFactory) -> Self {
        Self {
            pid,
            config,
            callback: Arc::new(RwLock::new(None)),
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
            queue_rx: None,
            factory,
        }
    }

    /// Acquire the OS capture path and spawn the worker.
    ///
    /// No-op when already running. Open/start failures from the adapter
    /// surface here; the session stays idle and may be started again.
    pub fn start(&mut self) -> CaptureResult<()> {
        if self.is_running() {
            debug!("start() on a running session is a no-op");
            return Ok(());
        }
        // A previously stopped worker handle is stale by now
        self.worker = None;

        self.stop_flag.store(false, Ordering::Release);
        let (producer, rx) = delivery_queue(self.config.queue_capacity);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let setup = WorkerSetup {
            pid: self.pid,
            options: self.config.adapter,
            quality: self.config.quality,
            stop: Arc::clone(&self.stop_flag),
            callback: Arc::clone(&self.callback),
            producer,
            ready: ready_tx,
            factory: Arc::clone(&self.factory),
        };

        let handle = thread::Builder::new()
            .name("tapir-capture".into())
            .spawn(move || worker::run(setup))
            .map_err(|e| CaptureError::WorkerStart(e.to_string()))?;

        match ready_rx.recv_timeout(START_TIMEOUT) {
            Ok(Ok(native)) => {
                info!("Capture started for PID {} (native {})", self.pid, native);
                self.worker = Some(handle);
                self.queue_rx = Some(rx);
                Ok(())
            }
            Ok(Err(e)) => {
                // Worker reported the failure and is already exiting
                let _ = handle.join();
                Err(e.into())
            }
            Err(_) => {
                self.stop_flag.store(true, Ordering::Release);
                let _ = handle.join();
                Err(CaptureError::WorkerStart(
                    "adapter open timed out".into(),
                ))
            }
        }
    }

    /// Signal the worker, join it (bounded), release OS resources.
    ///
    /// Idempotent; teardown problems are logged, never returned. The
    /// worker closes the adapter itself after observing the stop flag,
    /// so a detach on join timeout leaves teardown to the worker rather
    /// than racing it.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);

        let Some(handle) = self.worker.take() else {
            return;
        };

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        if handle.is_finished() {
            if handle.join().is_err() {
                warn!("capture worker panicked during shutdown");
            }
            debug!("Capture stopped for PID {}", self.pid);
        } else {
            warn!(
                "capture worker for PID {} did not stop within {:?}; detaching",
                self.pid, JOIN_TIMEOUT
            );
        }
    }

    /// Alias for [`stop`](Self::stop), matching scoped-use teardown.
    pub fn close(&mut self) {
        self.stop();
    }

    /// Blocking read of the next queued buffer.
    ///
    /// Returns `Ok(None)` on timeout or when the stream has ended.
    pub fn read(&self, timeout: Duration) -> CaptureResult<Option<Vec<u8>>> {
        if !self.is_running() {
            return Err(CaptureError::NotRunning);
        }
        let rx = self.queue_rx.as_ref().ok_or(CaptureError::NotRunning)?;

        match rx.recv_timeout(timeout) {
            Ok(QueueItem::Chunk(data)) => Ok(Some(data)),
            Ok(QueueItem::End) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    /// Async iterator over queued buffers; ends at the sentinel.
    pub fn chunks(&self) -> CaptureResult<ChunkStream> {
        let rx = self.queue_rx.as_ref().ok_or(CaptureError::NotRunning)?;
        Ok(ChunkStream::new(rx.clone()))
    }

    /// Install, replace, or clear the synchronous callback.
    ///
    /// Takes effect from the next buffer; callable at any time, running
    /// or not. Each buffer goes to exactly one callback.
    pub fn set_callback(&self, callback: Option<AudioCallback>) {
        *self.callback.write() = callback;
    }

    /// The fixed output format of every delivered buffer.
    pub fn format(&self) -> CanonicalFormat {
        CanonicalFormat::default()
    }

    /// Whether a capture worker is currently live.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Target process identifier.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

impl Drop for ProcessCapture {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::test_support::{fake_factory, failing_factory, tagged_frame};
    use std::sync::Mutex;
    use tapir_platform::AdapterError;

    fn session_with(buffers: Vec<Vec<u8>>, interleave_empty: bool, capacity: usize) -> ProcessCapture {
        let config = CaptureConfig {
            queue_capacity: capacity,
            ..CaptureConfig::default()
        };
        ProcessCapture::build(42, config, fake_factory(buffers, interleave_empty))
    }

    #[test]
    fn test_start_surfaces_open_error() {
        let mut capture = ProcessCapture::build(
            42,
            CaptureConfig::default(),
            failing_factory(AdapterError::ProcessNotFound(42)),
        );
        let err = capture.start().unwrap_err();
        assert!(matches!(
            err,
            CaptureError::Adapter(AdapterError::ProcessNotFound(42))
        ));
        assert!(!capture.is_running());
    }

    #[test]
    fn test_read_errors_when_not_running() {
        let capture = session_with(vec![], false, 4);
        let err = capture.read(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, CaptureError::NotRunning));
    }

    #[test]
    fn test_silent_target_delivers_nothing() {
        // A target producing only empty reads: no callbacks, no queued
        // bytes, and stop returns promptly.
        let calls = Arc::new(Mutex::new(0usize));
        let mut capture = session_with(vec![], false, 16);
        {
            let calls = Arc::clone(&calls);
            capture.set_callback(Some(Arc::new(move |_bytes, _frames| {
                *calls.lock().unwrap() += 1;
            })));
        }

        capture.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(capture.read(Duration::from_millis(20)).unwrap(), None);

        let begun = Instant::now();
        capture.stop();
        assert!(begun.elapsed() < Duration::from_millis(1100));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_start_is_idempotent_while_running() {
        let mut capture = session_with(vec![], false, 4);
        capture.start().unwrap();
        capture.start().unwrap();
        assert!(capture.is_running());
        capture.stop();
    }

    #[test]
    fn test_stop_and_close_are_idempotent() {
        let mut capture = session_with(vec![], false, 4);
        capture.start().unwrap();
        capture.stop();
        capture.stop();
        capture.close();
        capture.close();
        assert!(!capture.is_running());
    }

    #[test]
    fn test_restart_after_stop() {
        let mut capture = session_with(vec![tagged_frame(1)], false, 4);
        capture.start().unwrap();
        capture.stop();
        capture.start().unwrap();
        assert!(capture.is_running());
        capture.stop();
    }

    #[test]
    fn test_buffers_reach_queue_in_order() {
        let buffers: Vec<_> = (0..5u8).map(tagged_frame).collect();
        let mut capture = session_with(buffers, false, 16);
        capture.start().unwrap();

        let mut seen = Vec::new();
        for _ in 0..5 {
            if let Some(data) = capture.read(Duration::from_millis(500)).unwrap() {
                seen.push(data[0]);
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        capture.stop();
    }

    #[test]
    fn test_overflow_keeps_newest_buffers() {
        // Capacity 4, ten buffers, no consumer until the worker is done:
        // the queue must hold exactly the last four, in order.
        let buffers: Vec<_> = (0..10u8).map(tagged_frame).collect();
        let mut capture = session_with(buffers, false, 4);
        capture.start().unwrap();
        thread::sleep(Duration::from_millis(200));

        let mut seen = Vec::new();
        while let Some(data) = capture.read(Duration::from_millis(20)).unwrap() {
            seen.push(data[0]);
        }
        assert_eq!(seen, vec![6, 7, 8, 9]);
        capture.stop();
    }

    #[test]
    fn test_callback_receives_bytes_and_frames() {
        let received = Arc::new(Mutex::new(Vec::<(usize, usize)>::new()));
        // Two frames per buffer
        let buffer = [tagged_frame(0), tagged_frame(1)].concat();
        let mut capture = session_with(vec![buffer], false, 4);
        {
            let received = Arc::clone(&received);
            capture.set_callback(Some(Arc::new(move |bytes, frames| {
                received.lock().unwrap().push((bytes.len(), frames));
            })));
        }

        capture.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        capture.stop();

        assert_eq!(*received.lock().unwrap(), vec![(16, 2)]);
    }

    #[test]
    fn test_callback_panic_does_not_kill_session() {
        let buffers: Vec<_> = (0..3u8).map(tagged_frame).collect();
        let mut capture = session_with(buffers, false, 8);
        capture.set_callback(Some(Arc::new(|_bytes, _frames| {
            panic!("consumer bug");
        })));

        capture.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(capture.is_running());

        // All three buffers still reached the queue
        let mut count = 0;
        while capture.read(Duration::from_millis(20)).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        capture.stop();
    }

    #[test]
    fn test_callback_swap_partitions_stream() {
        // Register A, swap to B mid-stream: A sees a contiguous prefix,
        // B the contiguous suffix, every buffer exactly once.
        let total = 30u8;
        let buffers: Vec<_> = (0..total).map(tagged_frame).collect();
        // Interleaved empties pace the worker at ~10 ms per buffer
        let mut capture = session_with(buffers, true, 64);

        let a_seen = Arc::new(Mutex::new(Vec::<u8>::new()));
        let b_seen = Arc::new(Mutex::new(Vec::<u8>::new()));

        {
            let a_seen = Arc::clone(&a_seen);
            capture.set_callback(Some(Arc::new(move |bytes, _| {
                a_seen.lock().unwrap().push(bytes[0]);
            })));
        }
        capture.start().unwrap();
        thread::sleep(Duration::from_millis(100));

        {
            let b_seen = Arc::clone(&b_seen);
            capture.set_callback(Some(Arc::new(move |bytes, _| {
                b_seen.lock().unwrap().push(bytes[0]);
            })));
        }
        thread::sleep(Duration::from_millis(500));
        capture.stop();

        let a = a_seen.lock().unwrap().clone();
        let b = b_seen.lock().unwrap().clone();

        assert!(!a.is_empty(), "A should see the prefix");
        assert!(!b.is_empty(), "B should see the suffix");

        // Exactly one recipient per buffer, in order, no gaps
        let combined: Vec<u8> = a.iter().chain(b.iter()).copied().collect();
        let expected: Vec<u8> = (0..combined.len() as u8).collect();
        assert_eq!(combined, expected);
    }

    #[test]
    fn test_no_callbacks_after_stop_returns() {
        let buffers: Vec<_> = (0..200u8).map(tagged_frame).collect();
        let mut capture = session_with(buffers, true, 512);

        let calls = Arc::new(Mutex::new(0usize));
        {
            let calls = Arc::clone(&calls);
            capture.set_callback(Some(Arc::new(move |_, _| {
                *calls.lock().unwrap() += 1;
            })));
        }

        capture.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        capture.stop();

        let after_stop = *calls.lock().unwrap();
        thread::sleep(Duration::from_millis(150));
        assert_eq!(*calls.lock().unwrap(), after_stop);
    }

    #[test]
    fn test_stop_enqueues_single_sentinel() {
        let mut capture = session_with(vec![tagged_frame(9)], false, 4);
        capture.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        let rx = capture.queue_rx.as_ref().unwrap().clone();
        capture.stop();

        let mut chunks = 0;
        let mut sentinels = 0;
        while let Ok(item) = rx.try_recv() {
            match item {
                QueueItem::Chunk(_) => chunks += 1,
                QueueItem::End => sentinels += 1,
            }
        }
        assert_eq!(chunks, 1);
        assert_eq!(sentinels, 1);
    }

    #[test]
    fn test_format_reports_canonical() {
        let capture = session_with(vec![], false, 4);
        let format = capture.format();
        assert_eq!(format.rate, 48_000);
        assert_eq!(format.channels, 2);
        assert_eq!(format.sample_format, "f32");
        assert_eq!(format.bits_per_sample, 32);
        assert_eq!(capture.pid(), 42);
    }
}
