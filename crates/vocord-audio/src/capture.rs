use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::device::{classify_build_error, DeviceManager};
use super::ring_buffer::RingProducer;
use vocord_foundation::AudioError;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Requested input device; falls back through the candidate list.
    pub device: Option<String>,
    /// How long to wait for the first frame before declaring a device dead.
    pub preflight_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            preflight_timeout: Duration::from_secs(3),
        }
    }
}

/// Negotiated device format, needed downstream for resampling.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub callbacks: AtomicU64,
    pub samples_captured: AtomicU64,
    pub samples_dropped: AtomicU64,
    pub restarts: AtomicU64,
}

/// Handle to the dedicated capture thread. The cpal stream is `!Send`, so the
/// thread that opens it also owns it for its whole life.
pub struct CaptureThread {
    pub handle: JoinHandle<()>,
    pub shutdown: Arc<AtomicBool>,
    pub stats: Arc<CaptureStats>,
}

impl CaptureThread {
    pub fn spawn(
        config: CaptureConfig,
        producer: RingProducer,
    ) -> Result<(Self, DeviceConfig), AudioError> {
        let running = Arc::new(AtomicBool::new(false));
        let shutdown = running.clone();
        let stats = Arc::new(CaptureStats::default());
        let stats_out = stats.clone();
        let device_config = Arc::new(RwLock::new(None::<Result<DeviceConfig, String>>));
        let device_config_clone = device_config.clone();

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut capture = match InputStreamOwner::new(producer, running.clone(), stats) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!("Failed to create capture: {}", e);
                        *device_config_clone.write() = Some(Err(e.to_string()));
                        return;
                    }
                };

                // Preflight with fallback: requested device first, then the
                // candidate list, finally the host default.
                let mut attempts: Vec<Option<String>> = Vec::new();
                if let Some(d) = config.device.clone() {
                    attempts.push(Some(d));
                }
                for name in capture.device_manager.candidate_device_names() {
                    attempts.push(Some(name));
                }
                attempts.push(None);

                let mut dev_cfg: Option<DeviceConfig> = None;
                let mut last_err = String::from("no candidate devices");
                for attempt in attempts {
                    match capture.start(attempt.as_deref()) {
                        Ok(cfg) => {
                            tracing::info!("Audio stream started on device: {:?}", attempt);
                            if capture.wait_for_frames(config.preflight_timeout) {
                                dev_cfg = Some(cfg);
                                break;
                            }
                            tracing::warn!(
                                "No audio frames within preflight timeout; trying next candidate"
                            );
                            capture.stop();
                            thread::sleep(Duration::from_millis(200));
                        }
                        Err(e) => {
                            tracing::warn!("Failed to start on {:?}: {}", attempt, e);
                            if matches!(e, AudioError::PermissionDenied) {
                                // No point trying other devices without permission
                                *device_config_clone.write() = Some(Err(e.to_string()));
                                return;
                            }
                            last_err = e.to_string();
                        }
                    }
                }
                let Some(dev_cfg) = dev_cfg else {
                    tracing::error!("All device candidates failed to produce audio");
                    *device_config_clone.write() = Some(Err(last_err));
                    return;
                };

                *device_config_clone.write() = Some(Ok(dev_cfg));

                // Monitor for error-triggered restarts
                while running.load(Ordering::Relaxed) {
                    if capture.restart_needed.load(Ordering::SeqCst) {
                        tracing::warn!("Capture restart triggered by stream error");
                        capture.stop();
                        capture.restart_needed.store(false, Ordering::SeqCst);
                        capture.stats.restarts.fetch_add(1, Ordering::Relaxed);

                        let mut attempts: Vec<Option<String>> = capture
                            .device_manager
                            .candidate_device_names()
                            .into_iter()
                            .map(Some)
                            .collect();
                        attempts.push(None);

                        let mut restarted = false;
                        for attempt in attempts {
                            match capture.start(attempt.as_deref()) {
                                Ok(_) => {
                                    tracing::info!("Capture restarted on device: {:?}", attempt);
                                    restarted = true;
                                    break;
                                }
                                Err(e) => {
                                    tracing::warn!("Restart failed on {:?}: {}", attempt, e);
                                }
                            }
                        }
                        if !restarted {
                            tracing::error!("Failed to restart capture on any candidate device");
                        }
                    }
                    thread::sleep(Duration::from_millis(100));
                }

                tracing::info!("Audio capture thread shutting down");
                capture.stop();
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn audio thread: {}", e)))?;

        // Wait for the thread to negotiate a device config
        let start = Instant::now();
        let cfg = loop {
            if let Some(result) = device_config.read().clone() {
                break result;
            }
            if start.elapsed() > Duration::from_secs(10) {
                break Err("timed out waiting for device configuration".to_string());
            }
            thread::sleep(Duration::from_millis(50));
        };

        let cfg = cfg.map_err(|e| {
            if e.contains("permission") {
                AudioError::PermissionDenied
            } else {
                AudioError::Fatal(e)
            }
        })?;

        Ok((
            Self {
                handle,
                shutdown,
                stats: stats_out,
            },
            cfg,
        ))
    }

    pub fn stop(self) {
        self.shutdown.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

struct InputStreamOwner {
    device_manager: DeviceManager,
    stream: Option<Stream>,
    producer: Arc<Mutex<RingProducer>>,
    stats: Arc<CaptureStats>,
    running: Arc<AtomicBool>,
    restart_needed: Arc<AtomicBool>,
}

impl InputStreamOwner {
    fn new(
        producer: RingProducer,
        running: Arc<AtomicBool>,
        stats: Arc<CaptureStats>,
    ) -> Result<Self, AudioError> {
        Ok(Self {
            device_manager: DeviceManager::new()?,
            stream: None,
            producer: Arc::new(Mutex::new(producer)),
            stats,
            running,
            restart_needed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn wait_for_frames(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.stats.callbacks.load(Ordering::Relaxed) > 0 {
                return true;
            }
            thread::sleep(Duration::from_millis(50));
        }
        false
    }

    fn start(&mut self, device_name: Option<&str>) -> Result<DeviceConfig, AudioError> {
        self.running.store(true, Ordering::SeqCst);

        let device = self.device_manager.open_input_device(device_name)?;
        if let Ok(n) = device.name() {
            tracing::info!(
                "Selected input device: {} (host: {:?})",
                n,
                self.device_manager.host_id()
            );
        }
        let (config, sample_format) = self.device_manager.negotiate_input_config(&device)?;

        let device_config = DeviceConfig {
            sample_rate: config.sample_rate,
            channels: config.channels,
        };

        let stream = self.build_stream(device, config, sample_format)?;
        stream.play()?;
        self.stream = Some(stream);
        Ok(device_config)
    }

    fn build_stream(
        &mut self,
        device: cpal::Device,
        config: StreamConfig,
        sample_format: SampleFormat,
    ) -> Result<Stream, AudioError> {
        let producer = Arc::clone(&self.producer);
        let stats = Arc::clone(&self.stats);
        let running = Arc::clone(&self.running);
        let restart_needed = Arc::clone(&self.restart_needed);

        let err_fn = move |err: cpal::StreamError| {
            tracing::error!("Audio stream error: {}", err);
            restart_needed.store(true, Ordering::SeqCst);
        };

        // Common handler after converting to i16. Ring push plus atomics only;
        // this runs on the hardware callback.
        let handle_i16 = move |i16_data: &[i16]| {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            stats.callbacks.fetch_add(1, Ordering::Relaxed);
            let written = producer.lock().push(i16_data);
            stats
                .samples_captured
                .fetch_add(written as u64, Ordering::Relaxed);
            if written < i16_data.len() {
                stats
                    .samples_dropped
                    .fetch_add((i16_data.len() - written) as u64, Ordering::Relaxed);
            }
        };

        // Thread-local scratch buffer so format conversion never allocates in
        // the audio callback.
        thread_local! {
            static CONVERT_BUFFER: std::cell::RefCell<Vec<i16>> =
                const { std::cell::RefCell::new(Vec::new()) };
        }

        let stream = match sample_format {
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &_| {
                        handle_i16(data);
                    },
                    err_fn,
                    None,
                )
                .map_err(classify_build_error)?,
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &_| {
                        CONVERT_BUFFER.with(|buf| {
                            let mut converted = buf.borrow_mut();
                            converted.clear();
                            converted.reserve(data.len());
                            for &s in data {
                                let clamped = s.clamp(-1.0, 1.0);
                                converted.push((clamped * 32767.0).round() as i16);
                            }
                            handle_i16(&converted);
                        });
                    },
                    err_fn,
                    None,
                )
                .map_err(classify_build_error)?,
            SampleFormat::U16 => device
                .build_input_stream(
                    &config,
                    move |data: &[u16], _: &_| {
                        CONVERT_BUFFER.with(|buf| {
                            let mut converted = buf.borrow_mut();
                            converted.clear();
                            converted.reserve(data.len());
                            // Unsigned [0, 65535] to signed [-32768, 32767]
                            for &s in data {
                                converted.push((s as i32 - 32768) as i16);
                            }
                            handle_i16(&converted);
                        });
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
