use rtrb::{Consumer, Producer, RingBuffer};

/// Audio ring buffer over rtrb (real-time safe, lock-free SPSC).
pub struct FrameRing {
    producer: Producer<i16>,
    consumer: Consumer<i16>,
    capacity: usize,
}

impl FrameRing {
    pub fn with_capacity(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self {
            producer,
            consumer,
            capacity,
        }
    }

    /// Split into producer and consumer for separate threads.
    pub fn split(self) -> (RingProducer, RingConsumer) {
        (
            RingProducer {
                producer: self.producer,
                capacity: self.capacity,
            },
            RingConsumer {
                consumer: self.consumer,
            },
        )
    }
}

/// Producer half, owned by the audio callback. Never blocks.
pub struct RingProducer {
    producer: Producer<i16>,
    capacity: usize,
}

impl RingProducer {
    /// Write as many samples as fit; returns the number written. A short
    /// write means the consumer fell behind and the remainder is dropped.
    pub fn push(&mut self, samples: &[i16]) -> usize {
        let writable = samples.len().min(self.producer.slots());
        if writable == 0 {
            return 0;
        }

        let mut chunk = match self.producer.write_chunk(writable) {
            Ok(chunk) => chunk,
            Err(_) => return 0,
        };

        // Write may wrap; fill both slices
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        if !second.is_empty() {
            second.copy_from_slice(&samples[split..split + second.len()]);
        }
        chunk.commit_all();
        writable
    }

    /// Free space in samples.
    pub fn free_slots(&self) -> usize {
        self.producer.slots()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples currently queued.
    pub fn buffered(&self) -> usize {
        self.capacity - self.producer.slots()
    }
}

/// Consumer half, owned by the processing side.
pub struct RingConsumer {
    consumer: Consumer<i16>,
}

impl RingConsumer {
    /// Read up to `buffer.len()` samples (non-blocking).
    pub fn pop(&mut self, buffer: &mut [i16]) -> usize {
        let available = self.consumer.slots().min(buffer.len());
        if available == 0 {
            return 0;
        }

        let chunk = match self.consumer.read_chunk(available) {
            Ok(chunk) => chunk,
            Err(_) => return 0,
        };

        let len = chunk.len();
        let (first, second) = chunk.as_slices();
        let split = first.len();
        buffer[..split].copy_from_slice(first);
        if !second.is_empty() {
            buffer[split..split + second.len()].copy_from_slice(second);
        }
        chunk.commit_all();
        len
    }

    /// Throw away up to `count` of the oldest samples without copying.
    /// Returns the number discarded.
    pub fn discard(&mut self, count: usize) -> usize {
        let available = self.consumer.slots().min(count);
        if available == 0 {
            return 0;
        }
        match self.consumer.read_chunk(available) {
            Ok(chunk) => {
                let len = chunk.len();
                chunk.commit_all();
                len
            }
            Err(_) => 0,
        }
    }

    /// Samples available to read.
    pub fn slots(&self) -> usize {
        self.consumer.slots()
    }
}
