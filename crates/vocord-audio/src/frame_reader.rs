use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::ring_buffer::RingConsumer;
use vocord_telemetry::PipelineMetrics;

/// Raw device-rate audio pulled off the capture ring, before downmix and
/// resampling.
#[derive(Debug, Clone)]
pub struct CapturedChunk {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Milliseconds since capture start, reconstructed from the sample count.
    pub timestamp_ms: u64,
}

/// Reads audio from the ring on the async side and reconstructs timestamps.
///
/// Enforces the bounded-latency policy: when the backlog exceeds the
/// high-water mark the oldest samples are discarded before reading, so a slow
/// consumer trades completeness for latency, never the other way around.
pub struct FrameReader {
    consumer: RingConsumer,
    sample_rate: u32,
    channels: u16,
    high_water_samples: usize,
    samples_read: u64,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl FrameReader {
    pub fn new(
        consumer: RingConsumer,
        sample_rate: u32,
        channels: u16,
        high_water_samples: usize,
        metrics: Option<Arc<PipelineMetrics>>,
    ) -> Self {
        Self {
            consumer,
            sample_rate,
            channels,
            high_water_samples,
            samples_read: 0,
            metrics,
        }
    }

    pub fn update_device_config(&mut self, sample_rate: u32, channels: u16) {
        self.sample_rate = sample_rate;
        self.channels = channels;
    }

    /// Read the next chunk, up to `max_samples`. Returns None when the ring
    /// is empty.
    pub fn read_chunk(&mut self, max_samples: usize) -> Option<CapturedChunk> {
        let backlog = self.consumer.slots();
        if backlog > self.high_water_samples {
            let discarded = self.consumer.discard(backlog - self.high_water_samples);
            self.samples_read += discarded as u64;
            if let Some(m) = &self.metrics {
                m.capture_dropped
                    .fetch_add(discarded as u64, Ordering::Relaxed);
            }
            tracing::debug!("Discarded {} stale samples from capture ring", discarded);
        }

        let mut buffer = vec![0i16; max_samples];
        let read = self.consumer.pop(&mut buffer);
        if read == 0 {
            return None;
        }
        buffer.truncate(read);

        // Timestamp derives from the running sample count: per-channel frames
        // at the device rate.
        let frames_elapsed = self.samples_read / self.channels.max(1) as u64;
        let timestamp_ms = frames_elapsed * 1000 / self.sample_rate as u64;
        self.samples_read += read as u64;

        Some(CapturedChunk {
            samples: buffer,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_ms,
        })
    }

    pub fn available_samples(&self) -> usize {
        self.consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::FrameRing;

    #[test]
    fn reads_what_was_written() {
        let ring = FrameRing::with_capacity(1024);
        let (mut producer, consumer) = ring.split();
        let mut reader = FrameReader::new(consumer, 48_000, 1, 1024, None);

        producer.push(&[1, 2, 3, 4]);
        let chunk = reader.read_chunk(16).unwrap();
        assert_eq!(chunk.samples, vec![1, 2, 3, 4]);
        assert_eq!(chunk.sample_rate, 48_000);
        assert_eq!(chunk.timestamp_ms, 0);
    }

    #[test]
    fn empty_ring_returns_none() {
        let ring = FrameRing::with_capacity(64);
        let (_producer, consumer) = ring.split();
        let mut reader = FrameReader::new(consumer, 48_000, 1, 64, None);
        assert!(reader.read_chunk(16).is_none());
    }

    #[test]
    fn backlog_over_high_water_drops_oldest() {
        let ring = FrameRing::with_capacity(64);
        let (mut producer, consumer) = ring.split();
        let mut reader = FrameReader::new(consumer, 48_000, 1, 8, None);

        let samples: Vec<i16> = (0..32).collect();
        producer.push(&samples);

        let chunk = reader.read_chunk(64).unwrap();
        // Only the newest 8 samples survive the high-water trim.
        assert_eq!(chunk.samples, (24..32).collect::<Vec<i16>>());
    }

    #[test]
    fn timestamps_advance_with_samples() {
        let ring = FrameRing::with_capacity(4096);
        let (mut producer, consumer) = ring.split();
        let mut reader = FrameReader::new(consumer, 1000, 1, 4096, None);

        producer.push(&vec![0i16; 500]);
        let first = reader.read_chunk(500).unwrap();
        assert_eq!(first.timestamp_ms, 0);

        producer.push(&vec![0i16; 500]);
        let second = reader.read_chunk(500).unwrap();
        // 500 samples at 1 kHz = 500 ms
        assert_eq!(second.timestamp_ms, 500);
    }
}
