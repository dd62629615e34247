/// Wire-format sample rate expected by the realtime endpoint.
pub const SAMPLE_RATE_HZ: u32 = 24_000;

/// Frame size in samples: 20 ms at 24 kHz.
pub const FRAME_SIZE_SAMPLES: usize = 480;

/// Duration of one frame in milliseconds.
pub const FRAME_DURATION_MS: f32 = 1000.0 * FRAME_SIZE_SAMPLES as f32 / SAMPLE_RATE_HZ as f32;

pub const CHANNELS_MONO: u16 = 1;
