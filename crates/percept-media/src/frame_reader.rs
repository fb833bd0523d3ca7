use std::time::{Duration, Instant};

use crate::ring_buffer::SampleConsumer;

/// A chunk of raw device audio as it came off the microphone.
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    /// Interleaved samples at the device rate.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Instant,
}

/// Pulls captured samples off the ring and rebuilds their timestamps.
///
/// The device callback cannot carry timestamps through the ring, so they
/// are reconstructed here from the running sample count and the stream
/// start time.
pub struct FrameReader {
    consumer: SampleConsumer,
    sample_rate: u32,
    channels: u16,
    samples_read: u64,
    start_time: Instant,
}

impl FrameReader {
    pub fn new(consumer: SampleConsumer, sample_rate: u32, channels: u16) -> Self {
        Self {
            consumer,
            sample_rate,
            channels,
            samples_read: 0,
            start_time: Instant::now(),
        }
    }

    /// Reads up to `max_samples` interleaved samples, or `None` when the
    /// ring is empty.
    pub fn read(&mut self, max_samples: usize) -> Option<CapturedAudio> {
        let mut buffer = vec![0.0f32; max_samples];
        let samples_read = self.consumer.read(&mut buffer);
        if samples_read == 0 {
            return None;
        }
        buffer.truncate(samples_read);

        let frames_elapsed = self.samples_read / self.channels.max(1) as u64;
        let elapsed_ms = frames_elapsed * 1000 / self.sample_rate as u64;
        let timestamp = self.start_time + Duration::from_millis(elapsed_ms);
        self.samples_read += samples_read as u64;

        Some(CapturedAudio {
            samples: buffer,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Samples currently buffered in the ring.
    pub fn available(&self) -> usize {
        self.consumer.available()
    }
}
