//! Audio capture and playback pipeline.
//!
//! Capture runs on a dedicated OS thread owning the cpal input stream, pushes
//! raw device-rate samples into a lock-free ring, and the async chunker turns
//! them into exact wire-format frames (mono i16, 24 kHz, 480 samples).
//! Playback mirrors it: the engine feeds a ring, a second OS thread owns the
//! output stream and drains it, padding underruns with silence.

pub mod capture;
pub mod chunker;
pub mod device;
pub mod frame_reader;
pub mod playback;
pub mod resampler;
pub mod ring_buffer;

use std::sync::Arc;
use std::time::Instant;

pub use capture::{CaptureConfig, CaptureStats, CaptureThread, DeviceConfig};
pub use chunker::{AudioChunker, ChunkerConfig};
pub use device::DeviceManager;
pub use frame_reader::{CapturedChunk, FrameReader};
pub use playback::{PlaybackConfig, PlaybackStats, PlaybackThread, PlaybackWriter};
pub use resampler::{ResamplerQuality, StreamResampler};
pub use ring_buffer::{FrameRing, RingConsumer, RingProducer};

/// One wire-format frame: mono 16-bit PCM at 24 kHz, 480 samples (20 ms).
///
/// Samples are shared, not copied, so a frame can sit in the prefix ring and
/// be forwarded to the transport at the same time.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Arc<[i16]>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Milliseconds since capture start.
    pub timestamp_ms: u64,
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / (self.sample_rate as u64 * self.channels as u64)
    }
}

/// Where decoded assistant audio goes. The production implementation is
/// [`PlaybackWriter`]; tests substitute an in-memory sink.
pub trait PlaybackSink: Send {
    /// Queue samples at the wire rate. Returns how many were accepted.
    fn write(&mut self, samples: &[i16]) -> usize;
    /// Discard everything queued but not yet played.
    fn flush(&mut self);
    fn buffered_samples(&self) -> usize;
}
