use rtrb::{Consumer, Producer, RingBuffer};

/// Lock-free sample ring between the device callback and the framer.
///
/// Float samples go in on the real-time side and come out on the async
/// side. Neither half blocks; when the ring is full the writer keeps what
/// fits and reports how much it took so the caller can count the loss.
pub struct SampleRing {
    producer: Producer<f32>,
    consumer: Consumer<f32>,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        let (producer, consumer) = RingBuffer::new(capacity);
        Self { producer, consumer }
    }

    /// Split into halves for the capture and framer threads.
    pub fn split(self) -> (SampleProducer, SampleConsumer) {
        (
            SampleProducer {
                producer: self.producer,
            },
            SampleConsumer {
                consumer: self.consumer,
            },
        )
    }
}

/// Writer half, owned by the device callback.
pub struct SampleProducer {
    producer: Producer<f32>,
}

impl SampleProducer {
    /// Writes as many samples as fit, returning how many were taken.
    /// The tail of `samples` past the return value is lost.
    pub fn write(&mut self, samples: &[f32]) -> usize {
        let take = samples.len().min(self.producer.slots());
        if take == 0 {
            return 0;
        }
        // Single producer, so `take <= slots()` cannot race.
        let mut chunk = match self.producer.write_chunk(take) {
            Ok(chunk) => chunk,
            Err(_) => return 0,
        };
        let (first, second) = chunk.as_mut_slices();
        let split = first.len();
        first.copy_from_slice(&samples[..split]);
        if !second.is_empty() {
            second.copy_from_slice(&samples[split..take]);
        }
        chunk.commit_all();
        take
    }

    /// Free slots remaining.
    pub fn free(&self) -> usize {
        self.producer.slots()
    }
}

/// Reader half, owned by the framer.
pub struct SampleConsumer {
    consumer: Consumer<f32>,
}

impl SampleConsumer {
    /// Reads up to `buffer.len()` samples, returning how many were read.
    pub fn read(&mut self, buffer: &mut [f32]) -> usize {
        let chunk = match self.consumer.read_chunk(buffer.len()) {
            Ok(chunk) => chunk,
            Err(rtrb::chunks::ChunkError::TooFewSlots(available)) => {
                if available == 0 {
                    return 0;
                }
                self.consumer.read_chunk(available).unwrap()
            }
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

    /// Samples waiting to be read.
    pub fn available(&self) -> usize {
        self.consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let (mut producer, mut consumer) = SampleRing::new(64).split();

        assert_eq!(producer.write(&[0.1, 0.2, 0.3]), 3);
        assert_eq!(consumer.available(), 3);

        let mut buffer = [0.0f32; 8];
        assert_eq!(consumer.read(&mut buffer), 3);
        assert_eq!(&buffer[..3], &[0.1, 0.2, 0.3]);
        assert_eq!(consumer.read(&mut buffer), 0);
    }

    #[test]
    fn full_ring_takes_what_fits() {
        let (mut producer, mut consumer) = SampleRing::new(16).split();

        let samples = vec![0.5f32; 20];
        assert_eq!(producer.write(&samples), 16);
        assert_eq!(producer.write(&samples), 0);
        assert_eq!(producer.free(), 0);

        let mut buffer = [0.0f32; 16];
        assert_eq!(consumer.read(&mut buffer), 16);
        assert_eq!(producer.write(&samples[..4]), 4);
    }

    #[test]
    fn wrapping_writes_preserve_order() {
        let (mut producer, mut consumer) = SampleRing::new(8).split();
        let mut buffer = [0.0f32; 8];

        // Advance the ring so the next write wraps the physical end.
        assert_eq!(producer.write(&[1.0; 6]), 6);
        assert_eq!(consumer.read(&mut buffer[..6]), 6);

        let samples = [0.1f32, 0.2, 0.3, 0.4, 0.5];
        assert_eq!(producer.write(&samples), 5);
        let read = consumer.read(&mut buffer);
        assert_eq!(read, 5);
        assert_eq!(&buffer[..5], &samples);
    }
}
