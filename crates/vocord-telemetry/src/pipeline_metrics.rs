use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared metrics for cross-thread pipeline monitoring.
///
/// Every field is an atomic (or a read-mostly lock) so the audio callback,
/// the network task, and the engine task can all update counters without
/// contending on a lock.
#[derive(Clone)]
pub struct PipelineMetrics {
    // Audio level monitoring
    pub current_peak: Arc<AtomicI16>, // Peak sample value in current window
    pub current_rms: Arc<AtomicU64>,  // RMS * 1000 for precision
    pub audio_level_db: Arc<AtomicI16>, // Current level in dB * 10

    // Capture / chunker counters
    pub capture_frames: Arc<AtomicU64>,
    pub capture_dropped: Arc<AtomicU64>,
    pub chunker_frames: Arc<AtomicU64>,
    pub chunker_dropped: Arc<AtomicU64>,

    // Engine frame gating
    pub frames_forwarded: Arc<AtomicU64>,
    pub frames_discarded: Arc<AtomicU64>,

    // VAD activity
    pub vad_segments: Arc<AtomicU64>,
    pub is_speaking: Arc<AtomicBool>,
    pub last_speech_time: Arc<RwLock<Option<Instant>>>,

    // Transport counters
    pub transport_sent: Arc<AtomicU64>,
    pub transport_received: Arc<AtomicU64>,
    pub transport_malformed: Arc<AtomicU64>,
    pub transport_inbound_dropped: Arc<AtomicU64>,
    pub reconnect_attempts: Arc<AtomicU64>,

    // Playback
    pub playback_samples: Arc<AtomicU64>,
    pub playback_underruns: Arc<AtomicU64>,

    // Frame rate tracking
    pub capture_fps: Arc<AtomicU64>, // Frames per second * 10
    pub chunker_fps: Arc<AtomicU64>, // Chunks per second * 10
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            current_peak: Arc::new(AtomicI16::new(0)),
            current_rms: Arc::new(AtomicU64::new(0)),
            audio_level_db: Arc::new(AtomicI16::new(-900)),

            capture_frames: Arc::new(AtomicU64::new(0)),
            capture_dropped: Arc::new(AtomicU64::new(0)),
            chunker_frames: Arc::new(AtomicU64::new(0)),
            chunker_dropped: Arc::new(AtomicU64::new(0)),

            frames_forwarded: Arc::new(AtomicU64::new(0)),
            frames_discarded: Arc::new(AtomicU64::new(0)),

            vad_segments: Arc::new(AtomicU64::new(0)),
            is_speaking: Arc::new(AtomicBool::new(false)),
            last_speech_time: Arc::new(RwLock::new(None)),

            transport_sent: Arc::new(AtomicU64::new(0)),
            transport_received: Arc::new(AtomicU64::new(0)),
            transport_malformed: Arc::new(AtomicU64::new(0)),
            transport_inbound_dropped: Arc::new(AtomicU64::new(0)),
            reconnect_attempts: Arc::new(AtomicU64::new(0)),

            playback_samples: Arc::new(AtomicU64::new(0)),
            playback_underruns: Arc::new(AtomicU64::new(0)),

            capture_fps: Arc::new(AtomicU64::new(0)),
            chunker_fps: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl PipelineMetrics {
    pub fn update_audio_level(&self, samples: &[i16]) {
        if samples.is_empty() {
            return;
        }

        let peak = samples.iter().map(|&s| s.saturating_abs()).max().unwrap_or(0);
        self.current_peak.store(peak, Ordering::Relaxed);

        let sum: i64 = samples.iter().map(|&s| s as i64 * s as i64).sum();
        let rms = ((sum as f64 / samples.len() as f64).sqrt() * 1000.0) as u64;
        self.current_rms.store(rms, Ordering::Relaxed);

        let db = if peak > 0 {
            (20.0 * (peak as f64 / 32768.0).log10() * 10.0) as i16
        } else {
            -900
        };
        self.audio_level_db.store(db, Ordering::Relaxed);
    }

    pub fn mark_speaking(&self, speaking: bool) {
        self.is_speaking.store(speaking, Ordering::Relaxed);
        if speaking {
            *self.last_speech_time.write() = Some(Instant::now());
        }
    }

    pub fn update_capture_fps(&self, fps: f64) {
        self.capture_fps.store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn update_chunker_fps(&self, fps: f64) {
        self.chunker_fps.store((fps * 10.0) as u64, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct FpsTracker {
    last_update: Instant,
    frame_count: u64,
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.frame_count = 0;
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}
