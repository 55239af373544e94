//! Tapir Core - Per-Process Capture Engine
//!
//! One [`ProcessCapture`] owns one capture session against one target
//! process and fans the normalized stream out three ways:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Capture Worker Thread                   │
//! │  adapter.read() ──► Converter ──► callback (sync)        │
//! │                          │                               │
//! │                          └──► bounded queue (drop-oldest)│
//! └──────────────────────────┬───────────────────────────────┘
//!                            │
//!          read(timeout) ◄───┴───► ChunkStream (async)
//! ```
//!
//! The queue favors freshness: when a slow consumer lets it fill, the
//! oldest buffer is dropped so the newest always fits. Stopping the
//! session enqueues one terminal sentinel so async consumers end
//! cleanly.

mod config;
mod error;
mod queue;
mod session;
mod stream;
mod worker;

pub use config::CaptureConfig;
pub use error::CaptureError;
pub use session::{AudioCallback, ProcessCapture};
pub use stream::ChunkStream;

// Re-export the pieces embedders need to talk about formats and errors
pub use tapir_convert::{CanonicalFormat, ConvertError, NativeFormat, ResampleQuality, SampleLayout};
pub use tapir_platform::{AdapterError, AdapterOptions};
