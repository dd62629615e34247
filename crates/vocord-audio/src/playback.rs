use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::device::{classify_build_error, DeviceManager};
use super::ring_buffer::{FrameRing, RingConsumer, RingProducer};
use super::resampler::{ResamplerQuality, StreamResampler};
use super::PlaybackSink;
use vocord_foundation::AudioError;
use vocord_telemetry::PipelineMetrics;

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    pub device: Option<String>,
    /// Ring capacity in device-rate samples. Two seconds at 48 kHz default.
    pub buffer_capacity_samples: usize,
    /// Wire rate of incoming assistant audio.
    pub source_rate_hz: u32,
    pub resampler_quality: ResamplerQuality,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            buffer_capacity_samples: 96_000,
            source_rate_hz: 24_000,
            resampler_quality: ResamplerQuality::Balanced,
        }
    }
}

#[derive(Debug, Default)]
pub struct PlaybackStats {
    pub samples_played: AtomicU64,
    pub underruns: AtomicU64,
}

struct PlaybackShared {
    flush_requested: AtomicBool,
}

/// Dedicated playback thread owning the cpal output stream. The output
/// callback pops mono samples from its ring and fans them out across device
/// channels; underruns produce silence, never a stall.
pub struct PlaybackThread {
    pub handle: JoinHandle<()>,
    pub shutdown: Arc<AtomicBool>,
    pub stats: Arc<PlaybackStats>,
}

impl PlaybackThread {
    pub fn spawn(
        config: PlaybackConfig,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Result<(Self, PlaybackWriter), AudioError> {
        let ring = FrameRing::with_capacity(config.buffer_capacity_samples);
        let (producer, consumer) = ring.split();
        let shared = Arc::new(PlaybackShared {
            flush_requested: AtomicBool::new(false),
        });

        let running = Arc::new(AtomicBool::new(true));
        let shutdown = running.clone();
        let stats = Arc::new(PlaybackStats::default());
        let stats_out = stats.clone();
        let device_config = Arc::new(RwLock::new(None::<Result<u32, String>>));
        let device_config_clone = device_config.clone();
        let shared_cb = shared.clone();
        let metrics_cb = metrics;
        let device_name = config.device.clone();

        let handle = thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let mut owner = match OutputStreamOwner::new(
                    consumer,
                    running.clone(),
                    stats,
                    shared_cb,
                    metrics_cb,
                ) {
                    Ok(o) => o,
                    Err(e) => {
                        *device_config_clone.write() = Some(Err(e.to_string()));
                        return;
                    }
                };

                match owner.start(device_name.as_deref()) {
                    Ok(rate) => {
                        *device_config_clone.write() = Some(Ok(rate));
                    }
                    Err(e) => {
                        tracing::error!("Failed to start playback: {}", e);
                        *device_config_clone.write() = Some(Err(e.to_string()));
                        return;
                    }
                }

                while running.load(Ordering::Relaxed) {
                    if owner.restart_needed.load(Ordering::SeqCst) {
                        tracing::warn!("Playback restart triggered by stream error");
                        owner.stop();
                        owner.restart_needed.store(false, Ordering::SeqCst);
                        if let Err(e) = owner.start(device_name.as_deref()) {
                            tracing::error!("Failed to restart playback: {}", e);
                        }
                    }
                    thread::sleep(Duration::from_millis(100));
                }

                tracing::info!("Audio playback thread shutting down");
                owner.stop();
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn playback thread: {}", e)))?;

        // Wait for the device rate so the writer's resampler can be built
        let start = Instant::now();
        let device_rate = loop {
            if let Some(result) = device_config.read().clone() {
                break result;
            }
            if start.elapsed() > Duration::from_secs(10) {
                break Err("timed out waiting for output device".to_string());
            }
            thread::sleep(Duration::from_millis(50));
        };
        let device_rate = device_rate.map_err(AudioError::Fatal)?;

        let writer = PlaybackWriter {
            producer,
            resampler: StreamResampler::new(
                config.source_rate_hz,
                device_rate,
                config.resampler_quality,
            )?,
            shared,
        };

        Ok((
            Self {
                handle,
                shutdown,
                stats: stats_out,
            },
            writer,
        ))
    }

    pub fn stop(self) {
        self.shutdown.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

/// Engine-side handle feeding the playback ring. Non-blocking: a full ring
/// drops the excess and reports how much was taken.
pub struct PlaybackWriter {
    producer: RingProducer,
    resampler: StreamResampler,
    shared: Arc<PlaybackShared>,
}

impl PlaybackSink for PlaybackWriter {
    fn write(&mut self, samples: &[i16]) -> usize {
        let resampled = self.resampler.process(samples);
        if resampled.is_empty() {
            return samples.len();
        }
        self.producer.push(&resampled)
    }

    fn flush(&mut self) {
        self.resampler.clear();
        self.shared.flush_requested.store(true, Ordering::SeqCst);
    }

    fn buffered_samples(&self) -> usize {
        self.producer.buffered()
    }
}

struct OutputStreamOwner {
    device_manager: DeviceManager,
    stream: Option<Stream>,
    consumer: Arc<Mutex<RingConsumer>>,
    running: Arc<AtomicBool>,
    stats: Arc<PlaybackStats>,
    shared: Arc<PlaybackShared>,
    metrics: Option<Arc<PipelineMetrics>>,
    restart_needed: Arc<AtomicBool>,
}

impl OutputStreamOwner {
    fn new(
        consumer: RingConsumer,
        running: Arc<AtomicBool>,
        stats: Arc<PlaybackStats>,
        shared: Arc<PlaybackShared>,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Result<Self, AudioError> {
        Ok(Self {
            device_manager: DeviceManager::new()?,
            stream: None,
            consumer: Arc::new(Mutex::new(consumer)),
            running,
            stats,
            shared,
            metrics,
            restart_needed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn start(&mut self, device_name: Option<&str>) -> Result<u32, AudioError> {
        let device = self.device_manager.open_output_device(device_name)?;
        if let Ok(n) = device.name() {
            tracing::info!("Selected output device: {}", n);
        }
        let (config, sample_format) = self.device_manager.negotiate_output_config(&device)?;
        let sample_rate = config.sample_rate;

        let stream = self.build_stream(device, config, sample_format)?;
        stream.play()?;
        self.stream = Some(stream);
        Ok(sample_rate)
    }

    fn build_stream(
        &mut self,
        device: cpal::Device,
        config: StreamConfig,
        sample_format: SampleFormat,
    ) -> Result<Stream, AudioError> {
        let consumer = Arc::clone(&self.consumer);
        let stats = Arc::clone(&self.stats);
        let shared = Arc::clone(&self.shared);
        let metrics = self.metrics.clone();
        let running = Arc::clone(&self.running);
        let restart_needed = Arc::clone(&self.restart_needed);
        let channels = config.channels as usize;

        let err_fn = move |err: cpal::StreamError| {
            tracing::error!("Playback stream error: {}", err);
            restart_needed.store(true, Ordering::SeqCst);
        };

        // Owns the mono scratch buffer so the callback never allocates.
        let mut source = MonoSource {
            consumer,
            shared,
            scratch: vec![0i16; 8192],
        };

        let stream = match sample_format {
            SampleFormat::F32 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &_| {
                        if !running.load(Ordering::SeqCst) {
                            data.fill(0.0);
                            return;
                        }
                        let frames = data.len() / channels;
                        let got = source.fill(frames);
                        for (i, frame) in data.chunks_mut(channels).enumerate() {
                            let s = if i < got {
                                source.scratch[i] as f32 / 32768.0
                            } else {
                                0.0
                            };
                            frame.fill(s);
                        }
                        stats.samples_played.fetch_add(got as u64, Ordering::Relaxed);
                        if got < frames {
                            stats.underruns.fetch_add(1, Ordering::Relaxed);
                            if let Some(m) = &metrics {
                                m.playback_underruns.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        if let Some(m) = &metrics {
                            m.playback_samples.fetch_add(got as u64, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(classify_build_error)?,
            SampleFormat::I16 => device
                .build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &_| {
                        if !running.load(Ordering::SeqCst) {
                            data.fill(0);
                            return;
                        }
                        let frames = data.len() / channels;
                        let got = source.fill(frames);
                        for (i, frame) in data.chunks_mut(channels).enumerate() {
                            let s = if i < got { source.scratch[i] } else { 0 };
                            frame.fill(s);
                        }
                        stats.samples_played.fetch_add(got as u64, Ordering::Relaxed);
                        if got < frames {
                            stats.underruns.fetch_add(1, Ordering::Relaxed);
                            if let Some(m) = &metrics {
                                m.playback_underruns.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        if let Some(m) = &metrics {
                            m.playback_samples.fetch_add(got as u64, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
                .map_err(classify_build_error)?,
            other => {
                return Err(AudioError::FormatNotSupported {
                    format: format!("{:?}", other),
                });
            }
        };

        Ok(stream)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
    }
}

/// Pops mono samples for the output callback. A pending flush discards
/// everything buffered before the read, so barge-in cuts playback within one
/// callback period.
struct MonoSource {
    consumer: Arc<Mutex<RingConsumer>>,
    shared: Arc<PlaybackShared>,
    scratch: Vec<i16>,
}

impl MonoSource {
    fn fill(&mut self, frames: usize) -> usize {
        if self.scratch.len() < frames {
            self.scratch.resize(frames, 0);
        }
        let mut consumer = self.consumer.lock();
        if self.shared.flush_requested.swap(false, Ordering::SeqCst) {
            let pending = consumer.slots();
            consumer.discard(pending);
        }
        consumer.pop(&mut self.scratch[..frames])
    }
}
