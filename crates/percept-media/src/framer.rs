use std::collections::VecDeque;
use std::time::Duration;

use percept_codec::{MediaFrame, CAPTURE_SAMPLE_RATE, FRAME_SAMPLES};
use percept_telemetry::{EventLog, FpsTracker, PipelineMetrics, Subsystem};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use crate::frame_reader::FrameReader;
use crate::resampler::StreamResampler;

/// Interleaved samples pulled from the ring per iteration.
const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy)]
pub struct FramerConfig {
    /// Samples per uplink frame at `target_rate`.
    pub frame_samples: usize,
    pub target_rate: u32,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            frame_samples: FRAME_SAMPLES,
            target_rate: CAPTURE_SAMPLE_RATE,
        }
    }
}

/// Turns raw device audio into fixed-size uplink frames.
///
/// Downmixes to mono, resamples to the uplink rate, and cuts the stream
/// into `frame_samples` chunks. Until the session reports open the framer
/// stays disarmed: it keeps draining the ring so the capture callback
/// never stalls, but the samples are discarded rather than framed.
pub struct AudioFramer {
    reader: FrameReader,
    armed: watch::Receiver<bool>,
    frame_tx: mpsc::Sender<MediaFrame>,
    cfg: FramerConfig,
    log: EventLog,
    metrics: PipelineMetrics,
}

impl AudioFramer {
    pub fn new(
        reader: FrameReader,
        armed: watch::Receiver<bool>,
        frame_tx: mpsc::Sender<MediaFrame>,
        cfg: FramerConfig,
        log: EventLog,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            reader,
            armed,
            frame_tx,
            cfg,
            log,
            metrics,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!(
            "Audio framer started: {} samples per frame at {} Hz",
            self.cfg.frame_samples, self.cfg.target_rate
        );

        let mut resampler = if self.reader.sample_rate() != self.cfg.target_rate {
            Some(StreamResampler::new(
                self.reader.sample_rate(),
                self.cfg.target_rate,
            ))
        } else {
            None
        };
        let mut buffer: VecDeque<f32> = VecDeque::with_capacity(self.cfg.frame_samples * 4);
        let mut fps_tracker = FpsTracker::new();
        let mut dropped: u64 = 0;

        loop {
            let Some(captured) = self.reader.read(READ_CHUNK) else {
                // At 16 kHz a full frame spans 256 ms; polling every 25 ms
                // keeps latency low without spinning.
                time::sleep(Duration::from_millis(25)).await;
                continue;
            };

            if let Some(fps) = fps_tracker.tick() {
                self.metrics.update_capture_fps(fps);
            }

            if !*self.armed.borrow() {
                // Session not open yet. Drop what we read and start clean
                // when arming happens.
                buffer.clear();
                if let Some(rs) = resampler.as_mut() {
                    rs.reset();
                }
                continue;
            }

            let mono = downmix(&captured.samples, captured.channels);
            match resampler.as_mut() {
                Some(rs) => buffer.extend(rs.process(&mono)),
                None => buffer.extend(mono),
            }

            while buffer.len() >= self.cfg.frame_samples {
                let samples: Vec<f32> = buffer.drain(..self.cfg.frame_samples).collect();
                self.metrics.update_mic_volume(rms(&samples));

                let frame = MediaFrame::audio(&samples, self.cfg.target_rate);
                match self.frame_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        dropped += 1;
                        warn!("Frame queue full, dropped audio frame ({} total)", dropped);
                        if dropped == 1 {
                            self.log
                                .warn(Subsystem::Audio, "Uplink congested, dropping audio frames");
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        info!("Frame queue closed, audio framer exiting");
                        return;
                    }
                }
            }
        }
    }
}

/// Averages interleaved channels down to mono.
fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Root mean square level of one frame.
fn rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_squares / samples.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::SampleRing;

    #[test]
    fn downmix_averages_channel_pairs() {
        let interleaved = [0.5f32, -0.5, 0.8, 0.2, -0.3, -0.7];
        assert_eq!(downmix(&interleaved, 2), vec![0.0, 0.5, -0.5]);
        assert_eq!(downmix(&interleaved, 1), interleaved.to_vec());
    }

    #[test]
    fn rms_of_constant_signal_is_its_magnitude() {
        assert!((rms(&[0.1; 4096]) - 0.1).abs() < 1e-6);
        assert!((rms(&[-0.25; 100]) - 0.25).abs() < 1e-6);
        assert_eq!(rms(&[0.0; 4096]), 0.0);
        assert_eq!(rms(&[]), 0.0);
    }

    fn small_cfg() -> FramerConfig {
        FramerConfig {
            frame_samples: 256,
            target_rate: 16_000,
        }
    }

    #[tokio::test]
    async fn armed_framer_emits_fixed_frames_and_volume() {
        let (mut producer, consumer) = SampleRing::new(65_536).split();
        let reader = FrameReader::new(consumer, 16_000, 1);
        let (_armed_tx, armed_rx) = watch::channel(true);
        let (frame_tx, mut frame_rx) = mpsc::channel(16);
        let log = EventLog::new();
        let metrics = PipelineMetrics::default();

        producer.write(&vec![0.1f32; 256 * 2 + 50]);
        let handle = AudioFramer::new(
            reader,
            armed_rx,
            frame_tx,
            small_cfg(),
            log,
            metrics.clone(),
        )
        .spawn();

        for _ in 0..2 {
            let frame = time::timeout(Duration::from_secs(2), frame_rx.recv())
                .await
                .expect("frame within deadline")
                .expect("channel open");
            assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        }
        // 0.1 RMS amplifies to 50 percent.
        assert!((metrics.mic_volume_percent() - 50.0).abs() < 1.0);

        handle.abort();
    }

    #[tokio::test]
    async fn disarmed_framer_discards_instead_of_buffering() {
        let (mut producer, consumer) = SampleRing::new(65_536).split();
        let reader = FrameReader::new(consumer, 16_000, 1);
        let (armed_tx, armed_rx) = watch::channel(false);
        let (frame_tx, mut frame_rx) = mpsc::channel(16);
        let log = EventLog::new();
        let metrics = PipelineMetrics::default();

        producer.write(&vec![0.2f32; 1024]);
        let handle = AudioFramer::new(
            reader,
            armed_rx,
            frame_tx,
            small_cfg(),
            log,
            metrics.clone(),
        )
        .spawn();

        // Give the framer time to drain the pre-arm audio.
        time::sleep(Duration::from_millis(200)).await;
        assert!(frame_rx.try_recv().is_err());

        armed_tx.send(true).unwrap();
        producer.write(&vec![0.2f32; 256]);
        let frame = time::timeout(Duration::from_secs(2), frame_rx.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");

        // Only the post-arm audio was framed.
        time::sleep(Duration::from_millis(100)).await;
        assert!(frame_rx.try_recv().is_err());
        handle.abort();
    }

    #[tokio::test]
    async fn stereo_input_downmixes_before_framing() {
        let (mut producer, consumer) = SampleRing::new(65_536).split();
        let reader = FrameReader::new(consumer, 16_000, 2);
        let (_armed_tx, armed_rx) = watch::channel(true);
        let (frame_tx, mut frame_rx) = mpsc::channel(16);

        // Opposite-phase stereo cancels to silence after downmix.
        let interleaved: Vec<f32> = (0..1024).flat_map(|_| [0.4f32, -0.4]).collect();
        producer.write(&interleaved);

        let metrics = PipelineMetrics::default();
        let handle = AudioFramer::new(
            reader,
            armed_rx,
            frame_tx,
            small_cfg(),
            EventLog::new(),
            metrics.clone(),
        )
        .spawn();

        let frame = time::timeout(Duration::from_secs(2), frame_rx.recv())
            .await
            .expect("frame within deadline")
            .expect("channel open");
        assert_eq!(frame.mime_type, "audio/pcm;rate=16000");
        assert!(metrics.mic_volume_percent() < 0.5);
        handle.abort();
    }
}
