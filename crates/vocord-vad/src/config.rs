use serde::{Deserialize, Serialize};

use crate::constants::{FRAME_SIZE_SAMPLES, SAMPLE_RATE_HZ};
use crate::types::VadError;

/// Publicly-typed detector tuning, injected at construction time so tests can
/// exercise every threshold without reaching into private state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    /// Noise floor the detector starts from on every session (dBFS).
    pub initial_floor_db: f32,
    /// How far above the noise floor a frame must be to count as speech (dB).
    pub margin_db: f32,
    /// Absolute gate a candidate frame must also clear (dBFS). Keeps very
    /// quiet rooms from producing false positives off a low adapted floor.
    pub absolute_gate_db: f32,
    /// EMA smoothing factor for noise floor adaptation, (0, 1].
    pub ema_alpha: f32,
    /// Maximum per-frame floor movement (dB). Caps how fast sustained loud
    /// noise can drag the floor upward.
    pub max_step_db: f32,
    /// Continuity window length in frames.
    pub window: usize,
    /// Candidate frames required within the window to confirm onset.
    pub trigger: usize,
    /// Trailing silence before a segment closes (ms).
    pub hangover_ms: u32,
    pub frame_size_samples: usize,
    pub sample_rate_hz: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            initial_floor_db: -60.0,
            margin_db: 10.0,
            absolute_gate_db: -35.0,
            ema_alpha: 0.05,
            max_step_db: 0.5,
            window: 5,
            trigger: 3,
            hangover_ms: 1500,
            frame_size_samples: FRAME_SIZE_SAMPLES,
            sample_rate_hz: SAMPLE_RATE_HZ,
        }
    }
}

impl VadConfig {
    pub fn frame_duration_ms(&self) -> f32 {
        (self.frame_size_samples as f32 * 1000.0) / self.sample_rate_hz as f32
    }

    pub fn validate(&self) -> Result<(), VadError> {
        if self.window == 0 {
            return Err(VadError::InvalidConfig("window must be non-zero".into()));
        }
        if self.trigger == 0 || self.trigger > self.window {
            return Err(VadError::InvalidConfig(format!(
                "trigger {} must be in 1..={}",
                self.trigger, self.window
            )));
        }
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(VadError::InvalidConfig(format!(
                "ema_alpha {} must be in (0, 1]",
                self.ema_alpha
            )));
        }
        if !self.max_step_db.is_finite() || self.max_step_db <= 0.0 {
            return Err(VadError::InvalidConfig("max_step_db must be positive".into()));
        }
        if !self.initial_floor_db.is_finite()
            || !self.margin_db.is_finite()
            || !self.absolute_gate_db.is_finite()
        {
            return Err(VadError::InvalidConfig("thresholds must be finite".into()));
        }
        if self.hangover_ms == 0 {
            return Err(VadError::InvalidConfig("hangover_ms must be non-zero".into()));
        }
        if self.frame_size_samples == 0 || self.sample_rate_hz == 0 {
            return Err(VadError::InvalidConfig(
                "frame size and sample rate must be non-zero".into(),
            ));
        }
        Ok(())
    }
}
