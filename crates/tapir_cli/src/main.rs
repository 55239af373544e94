//! tapir - capture one process's audio to stdout.
//!
//! ```text
//! tapir --pid 12345 --stdout | ffmpeg -f f32le -ar 48000 -ac 2 -i pipe:0 out.mp3
//! tapir --name vlc   --stdout | ffmpeg -f f32le -ar 48000 -ac 2 -i pipe:0 out.flac
//! ```
//!
//! Stdout carries nothing but raw canonical PCM; every diagnostic goes
//! to stderr. A closed pipe (the encoder finished) is a normal way to
//! end, not an error.

use std::io::{self, ErrorKind, Write};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context};
use clap::{ArgGroup, Parser};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use tapir_core::ProcessCapture;

#[derive(Parser, Debug)]
#[command(
    name = "tapir",
    about = "Capture audio from a specific process",
    group(ArgGroup::new("target").required(true).args(["pid", "name"]))
)]
struct Args {
    /// Process ID to capture audio from
    #[arg(long)]
    pid: Option<u32>,

    /// Process name to capture audio from (e.g. 'vlc' or 'VRChat.exe')
    #[arg(long)]
    name: Option<String>,

    /// Output raw PCM to stdout (for piping to an encoder)
    #[arg(long)]
    stdout: bool,

    /// Capture duration in seconds (runs until a signal if omitted)
    #[arg(long)]
    duration: Option<f64>,

    /// Verbose logging to stderr
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if !args.stdout {
        bail!("--stdout is required (raw PCM is the only output mode)");
    }

    let pid = match (&args.pid, &args.name) {
        (Some(pid), _) => *pid,
        (None, Some(name)) => {
            let pid = pid_by_name(name)?;
            info!("Resolved '{}' to PID {}", name, pid);
            pid
        }
        (None, None) => unreachable!("clap enforces the target group"),
    };

    // SIGINT / SIGTERM request a graceful stop
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Release);
        })
        .context("installing signal handler")?;
    }

    let mut capture = ProcessCapture::new(pid);
    let format = capture.format();
    info!(
        "Output format: {} Hz, {} ch, {} - decoder args: -f f32le -ar {} -ac {}",
        format.rate, format.channels, format.sample_format, format.rate, format.channels
    );

    // Stdout writer; a broken pipe flips the stop flag instead of erroring
    {
        let stop = Arc::clone(&stop);
        capture.set_callback(Some(Arc::new(move |pcm, frames| {
            let mut out = io::stdout().lock();
            if let Err(e) = out.write_all(pcm).and_then(|()| out.flush()) {
                if e.kind() == ErrorKind::BrokenPipe {
                    debug!("stdout pipe closed by consumer; stopping");
                } else {
                    warn!("stdout write failed: {}", e);
                }
                stop.store(true, Ordering::Release);
            } else {
                debug!("wrote {} bytes ({} frames)", pcm.len(), frames);
            }
        })));
    }

    capture.start().context("starting capture")?;
    match args.duration {
        Some(limit) => info!("Capturing for {} s", limit),
        None => info!("Capturing until Ctrl+C"),
    }

    let started = Instant::now();
    while !stop.load(Ordering::Acquire) {
        if duration_elapsed(args.duration, started.elapsed()) {
            info!("Duration limit reached");
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("Stopping capture");
    capture.stop();
    Ok(())
}

fn duration_elapsed(limit: Option<f64>, elapsed: Duration) -> bool {
    match limit {
        Some(limit) => elapsed.as_secs_f64() >= limit,
        None => false,
    }
}

/// First process whose name equals `name`, case-insensitively, with or
/// without a trailing `.exe`.
fn pid_by_name(name: &str) -> anyhow::Result<u32> {
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::All, true);

    for (pid, process) in system.processes() {
        let candidate = process.name().to_string_lossy();
        if name_matches(&candidate, name) {
            return Ok(pid.as_u32());
        }
    }
    Err(anyhow!("process '{}' not found", name))
}

fn name_matches(candidate: &str, wanted: &str) -> bool {
    let candidate = candidate.to_ascii_lowercase();
    let wanted = wanted.to_ascii_lowercase();
    candidate == wanted
        || candidate == format!("{}.exe", wanted)
        || wanted == format!("{}.exe", candidate)
}
