pub mod config;
pub mod constants;
pub mod detector;
pub mod energy;
pub mod threshold;
pub mod types;
pub mod window;

pub use config::VadConfig;
pub use constants::{CHANNELS_MONO, FRAME_DURATION_MS, FRAME_SIZE_SAMPLES, SAMPLE_RATE_HZ};
pub use detector::EnergyVad;
pub use types::{VadError, VadMetricsSnapshot, VadPhase, VadSignal};

/// Main VAD trait for processing audio frames.
pub trait VadProcessor: Send {
    fn process(&mut self, frame: &[i16]) -> Result<VadSignal, VadError>;
    fn reset(&mut self);
    fn phase(&self) -> VadPhase;
    fn noise_floor_db(&self) -> f32;
}
