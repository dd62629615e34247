use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};

use super::frame_reader::{CapturedChunk, FrameReader};
use super::resampler::{ResamplerQuality, StreamResampler};
use super::AudioFrame;
use vocord_telemetry::{FpsTracker, PipelineMetrics};

pub struct ChunkerConfig {
    /// Output frame size: 480 samples = 20 ms at the wire rate.
    pub frame_size_samples: usize,
    /// Wire sample rate the realtime endpoint expects.
    pub sample_rate_hz: u32,
    pub resampler_quality: ResamplerQuality,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            frame_size_samples: 480,
            sample_rate_hz: 24_000,
            resampler_quality: ResamplerQuality::Balanced,
        }
    }
}

/// Turns variable-sized device-rate chunks into exact wire-format frames:
/// downmix to mono, resample to the wire rate, re-frame.
pub struct AudioChunker {
    frame_reader: FrameReader,
    output_tx: mpsc::Sender<AudioFrame>,
    cfg: ChunkerConfig,
    running: Arc<AtomicBool>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl AudioChunker {
    pub fn new(
        frame_reader: FrameReader,
        output_tx: mpsc::Sender<AudioFrame>,
        cfg: ChunkerConfig,
    ) -> Self {
        Self {
            frame_reader,
            output_tx,
            cfg,
            running: Arc::new(AtomicBool::new(false)),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn spawn(self) -> (JoinHandle<()>, Arc<AtomicBool>) {
        let mut worker = ChunkerWorker::new(self.frame_reader, self.output_tx, self.cfg, self.metrics);
        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let running_out = self.running;

        let handle = tokio::spawn(async move {
            worker.run(running).await;
        });
        (handle, running_out)
    }
}

struct ChunkerWorker {
    frame_reader: FrameReader,
    output_tx: mpsc::Sender<AudioFrame>,
    cfg: ChunkerConfig,
    buffer: VecDeque<i16>,
    samples_emitted: u64,
    resampler: Option<StreamResampler>,
    current_input_rate: Option<u32>,
    current_input_channels: Option<u16>,
    metrics: Option<Arc<PipelineMetrics>>,
    capture_fps: FpsTracker,
    chunker_fps: FpsTracker,
    start_time: Instant,
}

impl ChunkerWorker {
    fn new(
        frame_reader: FrameReader,
        output_tx: mpsc::Sender<AudioFrame>,
        cfg: ChunkerConfig,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Self {
        let cap = cfg.frame_size_samples * 4;
        Self {
            frame_reader,
            output_tx,
            cfg,
            buffer: VecDeque::with_capacity(cap),
            samples_emitted: 0,
            resampler: None,
            current_input_rate: None,
            current_input_channels: None,
            metrics,
            capture_fps: FpsTracker::new(),
            chunker_fps: FpsTracker::new(),
            start_time: Instant::now(),
        }
    }

    async fn run(&mut self, running: Arc<AtomicBool>) {
        tracing::info!("Audio chunker started");

        while running.load(Ordering::SeqCst) {
            if let Some(chunk) = self.frame_reader.read_chunk(4096) {
                if let Some(m) = &self.metrics {
                    m.capture_frames.fetch_add(1, Ordering::Relaxed);
                    if let Some(fps) = self.capture_fps.tick() {
                        m.update_capture_fps(fps);
                    }
                    m.update_audio_level(&chunk.samples);
                }

                if self.current_input_rate != Some(chunk.sample_rate)
                    || self.current_input_channels != Some(chunk.channels)
                {
                    self.reconfigure_for_device(&chunk);
                }

                let processed = self.process_chunk(&chunk);
                self.buffer.extend(processed);
                self.flush_ready_frames();

                if self.output_tx.is_closed() {
                    tracing::info!("Frame receiver dropped; chunker exiting");
                    break;
                }
            } else {
                // Poll at roughly twice the frame rate when the ring is idle.
                time::sleep(Duration::from_millis(10)).await;
            }
        }

        tracing::info!("Audio chunker stopped");
    }

    fn flush_ready_frames(&mut self) {
        let fs = self.cfg.frame_size_samples;
        while self.buffer.len() >= fs {
            let out: Vec<i16> = self.buffer.drain(..fs).collect();

            let timestamp_ms =
                (self.samples_emitted as u128 * 1000 / self.cfg.sample_rate_hz as u128) as u64;

            let frame = AudioFrame {
                samples: Arc::from(out),
                sample_rate: self.cfg.sample_rate_hz,
                channels: 1,
                timestamp_ms,
                captured_at: self.start_time + Duration::from_millis(timestamp_ms),
            };

            // Bounded channel; a full queue means downstream fell behind and
            // the frame is dropped to keep latency bounded.
            match self.output_tx.try_send(frame) {
                Ok(()) => {
                    if let Some(m) = &self.metrics {
                        m.chunker_frames.fetch_add(1, Ordering::Relaxed);
                        if let Some(fps) = self.chunker_fps.tick() {
                            m.update_chunker_fps(fps);
                        }
                    }
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    if let Some(m) = &self.metrics {
                        m.chunker_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::trace!("Frame channel full; dropping frame");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return,
            }

            self.samples_emitted += fs as u64;
        }
    }

    fn reconfigure_for_device(&mut self, chunk: &CapturedChunk) {
        if chunk.sample_rate != self.cfg.sample_rate_hz {
            tracing::info!(
                "Configuring resampler: {}Hz {} ch -> {}Hz mono",
                chunk.sample_rate,
                chunk.channels,
                self.cfg.sample_rate_hz
            );
            self.resampler = StreamResampler::new(
                chunk.sample_rate,
                self.cfg.sample_rate_hz,
                self.cfg.resampler_quality,
            )
            .map_err(|e| tracing::error!("Failed to create resampler: {}", e))
            .ok();
        } else {
            tracing::info!(
                "Device already at target rate {}Hz, no resampling needed",
                chunk.sample_rate
            );
            self.resampler = None;
        }

        self.current_input_rate = Some(chunk.sample_rate);
        self.current_input_channels = Some(chunk.channels);
    }

    fn process_chunk(&mut self, chunk: &CapturedChunk) -> Vec<i16> {
        let mono = if chunk.channels == 1 {
            chunk.samples.clone()
        } else {
            // Multi-channel to mono by averaging
            let channels = chunk.channels as usize;
            chunk
                .samples
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        match &mut self.resampler {
            Some(resampler) => resampler.process(&mono),
            None => mono,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::FrameRing;

    fn test_worker(sample_rate: u32, channels: u16) -> (ChunkerWorker, mpsc::Receiver<AudioFrame>) {
        let ring = FrameRing::with_capacity(1024);
        let (_producer, consumer) = ring.split();
        let reader = FrameReader::new(consumer, sample_rate, channels, 1024, None);
        let (tx, rx) = mpsc::channel(8);
        let worker = ChunkerWorker::new(reader, tx, ChunkerConfig::default(), None);
        (worker, rx)
    }

    #[test]
    fn stereo_downmix_averages_pairs() {
        let (mut worker, _rx) = test_worker(24_000, 2);
        let chunk = CapturedChunk {
            samples: vec![1000, -1000, 900, -900, 800, -800, 700, -700],
            sample_rate: 24_000,
            channels: 2,
            timestamp_ms: 0,
        };
        worker.reconfigure_for_device(&chunk);
        assert_eq!(worker.process_chunk(&chunk), vec![0, 0, 0, 0]);
    }

    #[test]
    fn resampler_created_only_when_rates_differ() {
        let (mut worker, _rx) = test_worker(48_000, 1);
        let chunk48 = CapturedChunk {
            samples: vec![0i16; 480],
            sample_rate: 48_000,
            channels: 1,
            timestamp_ms: 0,
        };
        worker.reconfigure_for_device(&chunk48);
        assert!(worker.resampler.is_some());

        let chunk24 = CapturedChunk {
            samples: vec![0i16; 480],
            sample_rate: 24_000,
            channels: 1,
            timestamp_ms: 0,
        };
        worker.reconfigure_for_device(&chunk24);
        assert!(worker.resampler.is_none());
    }

    #[test]
    fn exact_frames_emitted_at_wire_rate() {
        let (mut worker, mut rx) = test_worker(24_000, 1);
        let chunk = CapturedChunk {
            samples: vec![7i16; 1000],
            sample_rate: 24_000,
            channels: 1,
            timestamp_ms: 0,
        };
        worker.reconfigure_for_device(&chunk);
        let processed = worker.process_chunk(&chunk);
        worker.buffer.extend(processed);
        worker.flush_ready_frames();

        // 1000 samples = two full 480-sample frames, 40 left buffered
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(first.samples.len(), 480);
        assert_eq!(first.timestamp_ms, 0);
        assert_eq!(second.timestamp_ms, 20);
        assert_eq!(worker.buffer.len(), 40);
    }
}
