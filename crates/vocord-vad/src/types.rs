use thiserror::Error;

/// Per-frame classification produced by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadSignal {
    /// No speech in progress.
    Silence,
    /// Speech onset confirmed on this frame. Emitted exactly once per segment.
    SpeechStart,
    /// Speech in progress (including mid-sentence pauses inside the hangover).
    SpeechContinuing,
    /// Trailing silence exceeded the hangover; segment closed.
    SpeechStop,
}

/// Internal detector phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadPhase {
    Silence,
    /// Candidate frames seen, continuity window not yet satisfied.
    PossibleSpeech,
    Speech,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VadError {
    #[error("expected {expected} samples, got {got}")]
    FrameSize { expected: usize, got: usize },

    #[error("invalid VAD configuration: {0}")]
    InvalidConfig(String),
}

/// Point-in-time snapshot of detector counters, safe to copy out for display.
#[derive(Debug, Clone, Copy, Default)]
pub struct VadMetricsSnapshot {
    pub frames_processed: u64,
    pub speech_segments: u64,
    pub noise_floor_db: f32,
    pub last_level_db: f32,
}
