//! Capture Worker
//!
//! The per-session thread that drives adapter -> converter -> fan-out.
//! The worker owns the adapter outright: it opens it, reads from it, and
//! closes it on the way out. `stop()` on the facade only flips the stop
//! flag and joins - there is no cross-thread handle teardown to race.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::RwLock;
use tracing::{debug, warn};

use tapir_convert::{Converter, NativeFormat, ResampleQuality, BYTES_PER_FRAME};
use tapir_platform::{AdapterError, AdapterOptions, CaptureAdapter};

use crate::queue::QueueProducer;

/// Callback invoked synchronously with (canonical bytes, frame count).
pub type AudioCallback = Arc<dyn Fn(&[u8], usize) + Send + Sync + 'static>;

/// Swappable callback slot; written by the facade, read per buffer by
/// the worker. The RwLock read is the publish/acquire point.
pub(crate) type CallbackSlot = Arc<RwLock<Option<AudioCallback>>>;

/// Opens the platform adapter; swapped for a fake in tests.
pub(crate) type AdapterFactory =
    Arc<dyn Fn(u32, &AdapterOptions) -> Result<Box<dyn CaptureAdapter>, AdapterError> + Send + Sync>;

/// Pause between empty reads.
const IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Everything the worker needs, moved onto its thread.
pub(crate) struct WorkerSetup {
    pub pid: u32,
    pub options: AdapterOptions,
    pub quality: ResampleQuality,
    pub stop: Arc<AtomicBool>,
    pub callback: CallbackSlot,
    pub producer: QueueProducer,
    /// Startup handshake: the open/start outcome, exactly one send
    pub ready: Sender<Result<NativeFormat, AdapterError>>,
    pub factory: AdapterFactory,
}

/// Worker thread entry point.
pub(crate) fn run(setup: WorkerSetup) {
    let WorkerSetup {
        pid,
        options,
        quality,
        stop,
        callback,
        producer,
        ready,
        factory,
    } = setup;

    let mut adapter = match factory(pid, &options) {
        Ok(adapter) => adapter,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = adapter.start() {
        adapter.close();
        let _ = ready.send(Err(e));
        return;
    }

    let native = adapter.native_format();
    let _ = ready.send(Ok(native));

    debug!("Capture worker running for PID {} ({})", pid, native);
    let mut converter = Converter::new(native, quality);

    while !stop.load(Ordering::Acquire) {
        let data = match adapter.read() {
            Ok(data) => data,
            Err(e) => {
                // Transient subsystem errors never end the session
                warn!("adapter read error (continuing): {}", e);
                thread::sleep(IDLE_SLEEP);
                continue;
            }
        };

        if data.is_empty() {
            thread::sleep(IDLE_SLEEP);
            continue;
        }

        let converted = match converter.convert(&data) {
            Ok(converted) => converted,
            Err(e) => {
                warn!("conversion error (buffer dropped): {}", e);
                continue;
            }
        };
        if converted.is_empty() {
            // Resampler warm-up can swallow a very short first buffer
            continue;
        }

        let frames = converted.len() / BYTES_PER_FRAME;

        let current = callback.read().clone();
        if let Some(cb) = current {
            let result = catch_unwind(AssertUnwindSafe(|| cb(&converted, frames)));
            if let Err(payload) = result {
                warn!("audio callback panicked: {}", panic_message(&payload));
            }
        }

        producer.push_chunk(converted);
    }

    // Exit path: sentinel first so consumers unblock, then OS teardown
    producer.push_end();
    adapter.stop();
    adapter.close();
    debug!("Capture worker for PID {} exited", pid);
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Scriptable fake adapter for delivery-engine tests.

    use super::*;
    use std::sync::Mutex;

    /// What the fake yields on successive (non-empty) reads.
    pub(crate) struct FakeScript {
        pub buffers: Vec<Vec<u8>>,
        /// Interleave an empty read after every buffer, forcing the
        /// worker onto its 10 ms idle cadence
        pub interleave_empty: bool,
    }

    pub(crate) struct FakeAdapter {
        buffers: Mutex<std::vec::IntoIter<Vec<u8>>>,
        interleave_empty: bool,
        reads: Mutex<u64>,
        started: bool,
    }

    impl FakeAdapter {
        pub(crate) fn new(script: FakeScript) -> Self {
            Self {
                buffers: Mutex::new(script.buffers.into_iter()),
                interleave_empty: script.interleave_empty,
                reads: Mutex::new(0),
                started: false,
            }
        }
    }

    impl CaptureAdapter for FakeAdapter {
        fn native_format(&self) -> NativeFormat {
            // Canonical: the converter passes bytes through untouched
            NativeFormat::new(48_000, 2, tapir_convert::SampleLayout::F32Le).unwrap()
        }

        fn start(&mut self) -> Result<(), AdapterError> {
            self.started = true;
            Ok(())
        }

        fn read(&mut self) -> Result<Vec<u8>, AdapterError> {
            let mut reads = self.reads.lock().unwrap();
            *reads += 1;
            if self.interleave_empty && *reads % 2 == 0 {
                return Ok(Vec::new());
            }
            Ok(self.buffers.lock().unwrap().next().unwrap_or_default())
        }

        fn stop(&mut self) {
            self.started = false;
        }

        fn close(&mut self) {}
    }

    /// A factory producing fresh fakes with the same script each start.
    pub(crate) fn fake_factory(
        buffers: Vec<Vec<u8>>,
        interleave_empty: bool,
    ) -> AdapterFactory {
        Arc::new(move |_pid, _options| {
            Ok(Box::new(FakeAdapter::new(FakeScript {
                buffers: buffers.clone(),
                interleave_empty,
            })) as Box<dyn CaptureAdapter>)
        })
    }

    /// A factory whose open always fails.
    pub(crate) fn failing_factory(error: AdapterError) -> AdapterFactory {
        Arc::new(move |_pid, _options| Err(error.clone()))
    }

    /// One canonical frame tagged with an index in its first byte.
    pub(crate) fn tagged_frame(index: u8) -> Vec<u8> {
        let mut frame = vec![0u8; BYTES_PER_FRAME];
        frame[0] = index;
        frame
    }
}
