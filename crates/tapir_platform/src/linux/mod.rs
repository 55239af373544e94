//! Linux Adapter - PulseAudio Sink-Input Monitor
//!
//! Works against a native PulseAudio daemon or PipeWire's pulse server.
//! The target process shows up as a *sink input* (its playback stream
//! into some sink); we record from that sink's monitor source with the
//! record stream pinned to the matched sink input, so other clients on
//! the same sink stay out of the capture.
//!
//! ```text
//! target app ──► sink input ──► sink ──► speakers
//!                    │            │
//!                    │            └─ monitor source
//!                    └──────────────────┴─► record stream (pinned)
//! ```
//!
//! If the server refuses to pin the monitor to one sink input, we fall
//! back to recording the whole sink's monitor and log the caveat: other
//! clients playing into the same sink will bleed into the capture.
//!
//! PulseAudio objects are reference-counted and not `Send`; the adapter
//! is created and driven entirely on the capture worker thread, which is
//! why [`CaptureAdapter`](crate::CaptureAdapter) has no `Send` bound.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info, warn};

use libpulse_binding as pulse;
use pulse::callbacks::ListResult;
use pulse::context::{Context, FlagSet as ContextFlagSet, State as ContextState};
use pulse::def::BufferAttr;
use pulse::mainloop::standard::{IterateResult, Mainloop};
use pulse::operation::{Operation, State as OperationState};
use pulse::proplist::{properties, Proplist};
use pulse::sample::{Format, Spec};
use pulse::stream::{FlagSet as StreamFlagSet, PeekResult, State as StreamState, Stream};
use pulse::time::MicroSeconds;

use tapir_convert::{NativeFormat, SampleLayout};

use crate::error::AdapterError;
use crate::traits::CaptureAdapter;

/// Upper bound one read spends waiting on the server.
const READ_WAIT: MicroSeconds = MicroSeconds(10_000);

/// The sink input owned by the target process, as the server reports it.
struct SinkInputMatch {
    index: u32,
    sink: u32,
    spec: Spec,
}

/// Record stream on the target's sink monitor.
pub struct PulseMonitorCapture {
    // Drop order: stream before context before mainloop.
    stream: Stream,
    context: Context,
    mainloop: Mainloop,
    native: NativeFormat,
    /// Whole-sink fallback active (server refused per-sink-input pinning)
    whole_sink: bool,
    started: bool,
    closed: bool,
}

impl PulseMonitorCapture {
    /// Connect to the pulse server and wire a monitor record stream to
    /// `pid`'s sink input.
    pub fn open(pid: u32) -> Result<Self, AdapterError> {
        let mut mainloop = Mainloop::new().ok_or_else(|| {
            AdapterError::SubsystemUnavailable("pulse mainloop allocation failed".into())
        })?;

        let mut proplist = Proplist::new().ok_or_else(|| {
            AdapterError::SubsystemUnavailable("pulse proplist allocation failed".into())
        })?;
        let _ = proplist.set_str(properties::APPLICATION_NAME, "tapir");

        let mut context = Context::new_with_proplist(&mainloop, "tapir", &proplist)
            .ok_or_else(|| {
                AdapterError::SubsystemUnavailable("pulse context allocation failed".into())
            })?;

        // No autospawn: a missing server is SubsystemUnavailable, not a
        // daemon we should be starting
        context
            .connect(None, ContextFlagSet::NOAUTOSPAWN, None)
            .map_err(|e| {
                AdapterError::SubsystemUnavailable(format!("pulse connect: {}", e))
            })?;

        // Wait for the server handshake
        loop {
            iterate(&mut mainloop, true)?;
            match context.get_state() {
                ContextState::Ready => break,
                ContextState::Failed | ContextState::Terminated => {
                    return Err(AdapterError::SubsystemUnavailable(
                        "pulse server refused the connection".into(),
                    ));
                }
                _ => {}
            }
        }

        let matched = find_sink_input(&mut mainloop, &context, pid)?
            .ok_or(AdapterError::NoAudioOutput(pid))?;

        debug!(
            "PID {} owns sink input #{} on sink #{} ({:?})",
            pid, matched.index, matched.sink, matched.spec
        );

        let monitor = monitor_source_name(&mut mainloop, &context, matched.sink)?
            .ok_or_else(|| {
                AdapterError::SubsystemError(format!("sink #{} has no monitor source", matched.sink))
            })?;

        // Record in the sink input's own spec where we can decode it;
        // otherwise let the server convert to s16.
        let (spec, native) = record_spec(&matched.spec);

        let mut stream = Stream::new(&mut context, "tapir capture", &spec, None)
            .ok_or_else(|| {
                AdapterError::SubsystemError("pulse stream allocation failed".into())
            })?;

        let whole_sink = match stream.set_monitor_stream(matched.index) {
            Ok(()) => false,
            Err(e) => {
                warn!(
                    "Server rejected per-sink-input monitoring ({}); falling back to the whole \
                     sink monitor - other clients on sink #{} will be audible in the capture",
                    e, matched.sink
                );
                true
            }
        };

        // ~10 ms fragments keep read latency aligned with the worker cadence
        let fragsize = (native.rate / 100) * native.frame_size() as u32;
        let attr = BufferAttr {
            maxlength: u32::MAX,
            tlength: u32::MAX,
            prebuf: u32::MAX,
            minreq: u32::MAX,
            fragsize,
        };

        stream
            .connect_record(
                Some(&monitor),
                Some(&attr),
                StreamFlagSet::START_CORKED | StreamFlagSet::ADJUST_LATENCY,
            )
            .map_err(|e| AdapterError::SubsystemError(format!("connect_record: {}", e)))?;

        loop {
            iterate(&mut mainloop, true)?;
            match stream.get_state() {
                StreamState::Ready => break,
                StreamState::Failed | StreamState::Terminated => {
                    return Err(AdapterError::SubsystemError(
                        "record stream failed to connect".into(),
                    ));
                }
                _ => {}
            }
        }

        info!(
            "Pulse monitor open for PID {} via '{}' ({}){}",
            pid,
            monitor,
            native,
            if whole_sink { " [whole-sink fallback]" } else { "" }
        );

        Ok(Self {
            stream,
            context,
            mainloop,
            native,
            whole_sink,
            started: false,
            closed: false,
        })
    }

    /// Whether the capture fell back to the whole sink's monitor.
    pub fn is_whole_sink_fallback(&self) -> bool {
        self.whole_sink
    }
}

impl CaptureAdapter for PulseMonitorCapture {
    fn native_format(&self) -> NativeFormat {
        self.native
    }

    fn start(&mut self) -> Result<(), AdapterError> {
        if self.started {
            return Err(AdapterError::AlreadyStarted);
        }
        let op = self.stream.uncork(None);
        wait_for_operation(&mut self.mainloop, op)?;
        self.started = true;
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, AdapterError> {
        if !self.started || self.closed {
            return Ok(Vec::new());
        }

        // One bounded pump, then drain whatever arrived
        pump(&mut self.mainloop, READ_WAIT)?;

        let mut out = Vec::new();
        loop {
            // Copy out before discard: peek borrows the stream
            let chunk = match self.stream.peek() {
                Ok(PeekResult::Empty) => None,
                Ok(PeekResult::Hole(_)) => Some(Vec::new()),
                Ok(PeekResult::Data(data)) => Some(data.to_vec()),
                Err(e) => {
                    return Err(AdapterError::SubsystemError(format!("stream peek: {}", e)))
                }
            };
            match chunk {
                None => break,
                Some(data) => {
                    out.extend_from_slice(&data);
                    let _ = self.stream.discard();
                }
            }
        }
        Ok(out)
    }

    fn stop(&mut self) {
        if self.started && !self.closed {
            let op = self.stream.cork(None);
            if let Err(e) = wait_for_operation(&mut self.mainloop, op) {
                warn!("cork on stop: {}", e);
            }
            self.started = false;
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.stop();
        if let Err(e) = self.stream.disconnect() {
            debug!("stream disconnect: {}", e);
        }
        self.context.disconnect();
        self.closed = true;
        debug!("Pulse monitor closed");
    }
}

impl Drop for PulseMonitorCapture {
    fn drop(&mut self) {
        self.close();
    }
}

/// One blocking or non-blocking mainloop turn.
fn iterate(mainloop: &mut Mainloop, block: bool) -> Result<(), AdapterError> {
    match mainloop.iterate(block) {
        IterateResult::Success(_) => Ok(()),
        IterateResult::Quit(_) => Err(AdapterError::SubsystemError("pulse mainloop quit".into())),
        IterateResult::Err(e) => {
            Err(AdapterError::SubsystemError(format!("pulse mainloop: {}", e)))
        }
    }
}

/// One mainloop turn that waits at most `timeout` for server events.
fn pump(mainloop: &mut Mainloop, timeout: MicroSeconds) -> Result<(), AdapterError> {
    mainloop
        .prepare(Some(timeout))
        .map_err(|e| AdapterError::SubsystemError(format!("mainloop prepare: {}", e)))?;
    mainloop
        .poll()
        .map_err(|e| AdapterError::SubsystemError(format!("mainloop poll: {}", e)))?;
    mainloop
        .dispatch()
        .map_err(|e| AdapterError::SubsystemError(format!("mainloop dispatch: {}", e)))?;
    Ok(())
}

/// Block until a server operation settles.
fn wait_for_operation<T: ?Sized>(
    mainloop: &mut Mainloop,
    op: Operation<T>,
) -> Result<(), AdapterError> {
    loop {
        iterate(mainloop, true)?;
        match op.get_state() {
            OperationState::Done => return Ok(()),
            OperationState::Cancelled => {
                return Err(AdapterError::SubsystemError(
                    "pulse operation cancelled".into(),
                ));
            }
            OperationState::Running => {}
        }
    }
}

/// Enumerate sink inputs and pick the one whose owning process is `pid`.
fn find_sink_input(
    mainloop: &mut Mainloop,
    context: &Context,
    pid: u32,
) -> Result<Option<SinkInputMatch>, AdapterError> {
    let found: Rc<RefCell<Option<SinkInputMatch>>> = Rc::new(RefCell::new(None));

    let op = {
        let found = Rc::clone(&found);
        context.introspect().get_sink_input_info_list(move |res| {
            if let ListResult::Item(info) = res {
                let owner = info
                    .proplist
                    .get_str(properties::APPLICATION_PROCESS_ID)
                    .and_then(|s| s.parse::<u32>().ok());
                if owner == Some(pid) && found.borrow().is_none() {
                    *found.borrow_mut() = Some(SinkInputMatch {
                        index: info.index,
                        sink: info.sink,
                        spec: info.sample_spec,
                    });
                }
            }
        })
    };
    wait_for_operation(mainloop, op)?;

    let result = found.borrow_mut().take();
    Ok(result)
}

/// Resolve a sink's monitor source name.
fn monitor_source_name(
    mainloop: &mut Mainloop,
    context: &Context,
    sink: u32,
) -> Result<Option<String>, AdapterError> {
    let name: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));

    let op = {
        let name = Rc::clone(&name);
        context.introspect().get_sink_info_by_index(sink, move |res| {
            if let ListResult::Item(info) = res {
                *name.borrow_mut() = info.monitor_source_name.as_ref().map(|n| n.to_string());
            }
        })
    };
    wait_for_operation(mainloop, op)?;

    let result = name.borrow_mut().take();
    Ok(result)
}

/// Pick the record spec: the sink input's own format when we can decode
/// it, otherwise s16 at the same rate/channels with server conversion.
fn record_spec(source: &Spec) -> (Spec, NativeFormat) {
    let layout = match source.format {
        Format::S16le => Some(SampleLayout::I16Le),
        Format::S24le => Some(SampleLayout::I24Le),
        Format::S24_32le => Some(SampleLayout::I24In32Le),
        Format::S32le => Some(SampleLayout::I32Le),
        Format::F32le => Some(SampleLayout::F32Le),
        _ => None,
    };

    let (format, layout) = match layout {
        Some(l) => (source.format, l),
        None => (Format::S16le, SampleLayout::I16Le),
    };
    let channels = if (1..=8).contains(&source.channels) {
        source.channels
    } else {
        2
    };

    let spec = Spec {
        format,
        channels,
        rate: source.rate,
    };
    // Spec validated by construction; NativeFormat::new cannot fail here
    let native = NativeFormat::new(source.rate, channels as u16, layout)
        .expect("record spec is always in range");
    (spec, native)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_spec_keeps_decodable_formats() {
        let spec = Spec {
            format: Format::F32le,
            channels: 2,
            rate: 44_100,
        };
        let (rec, native) = record_spec(&spec);
        assert_eq!(rec.format, Format::F32le);
        assert_eq!(native.layout, SampleLayout::F32Le);
        assert_eq!(native.rate, 44_100);
    }

    #[test]
    fn test_record_spec_falls_back_to_s16() {
        let spec = Spec {
            format: Format::ULaw,
            channels: 1,
            rate: 8_000,
        };
        let (rec, native) = record_spec(&spec);
        assert_eq!(rec.format, Format::S16le);
        assert_eq!(native.layout, SampleLayout::I16Le);
        assert_eq!(native.channels, 1);
    }

    #[test]
    fn test_record_spec_clamps_channel_count() {
        let spec = Spec {
            format: Format::S16le,
            channels: 12,
            rate: 48_000,
        };
        let (rec, _native) = record_spec(&spec);
        assert_eq!(rec.channels, 2);
    }
}
