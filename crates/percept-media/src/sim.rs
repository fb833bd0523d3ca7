//! Simulated capture devices for tests and `--simulate` runs.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use percept_foundation::MediaError;
use percept_telemetry::PipelineMetrics;
use tracing::info;

use crate::devices::{
    CaptureConstraints, MediaDevices, MediaStreamHandles, OpenedAudio, TrackControl,
    VideoSourceFactory,
};
use crate::video::VideoSource;
use crate::frame_reader::FrameReader;
use crate::ring_buffer::{SampleProducer, SampleRing};

/// What the simulated microphone produces.
#[derive(Debug, Clone, Copy)]
pub enum SimAudio {
    /// Steady sine tone.
    Tone { hz: f64, amplitude: f32 },
    Silence,
    /// `open` fails as if no microphone exists.
    Unavailable,
}

/// [`MediaDevices`] implementation with no hardware behind it.
///
/// The microphone is a thread writing a tone into the ring in real time
/// at a typical device rate, so the resampler and framer run exactly as
/// they would against hardware. The camera is a [`TestPatternSource`].
pub struct SimMediaDevices {
    audio: SimAudio,
    device_rate: u32,
    channels: u16,
    camera_available: bool,
    video_warmup_polls: u32,
}

impl SimMediaDevices {
    /// A 440 Hz tone at a comfortable level.
    pub fn tone() -> Self {
        Self {
            audio: SimAudio::Tone {
                hz: 440.0,
                amplitude: 0.2,
            },
            device_rate: 48_000,
            channels: 1,
            camera_available: true,
            video_warmup_polls: 0,
        }
    }

    pub fn silence() -> Self {
        Self {
            audio: SimAudio::Silence,
            ..Self::tone()
        }
    }

    pub fn no_microphone() -> Self {
        Self {
            audio: SimAudio::Unavailable,
            ..Self::tone()
        }
    }

    pub fn with_device_rate(mut self, rate: u32) -> Self {
        self.device_rate = rate;
        self
    }

    pub fn with_channels(mut self, channels: u16) -> Self {
        self.channels = channels;
        self
    }

    pub fn without_camera(mut self) -> Self {
        self.camera_available = false;
        self
    }

    /// Makes the camera return `None` for the first few polls, as real
    /// cameras do while their exposure settles.
    pub fn with_video_warmup(mut self, polls: u32) -> Self {
        self.video_warmup_polls = polls;
        self
    }
}

impl MediaDevices for SimMediaDevices {
    fn open(
        &self,
        constraints: &CaptureConstraints,
        metrics: &PipelineMetrics,
    ) -> Result<MediaStreamHandles, MediaError> {
        let mut handles = MediaStreamHandles::new();

        if constraints.video {
            if !self.camera_available {
                return Err(MediaError::DeviceUnavailable {
                    reason: "no camera (simulated)".to_string(),
                });
            }
            let source =
                TestPatternSource::new(constraints).with_warmup(self.video_warmup_polls);
            handles.set_video(Box::new(source), Box::new(StaticTrack));
        }

        if constraints.audio {
            match self.audio {
                SimAudio::Unavailable => {
                    return Err(MediaError::DeviceUnavailable {
                        reason: "no microphone (simulated)".to_string(),
                    });
                }
                signal => {
                    let (producer, consumer) =
                        SampleRing::new(self.device_rate as usize * 2).split();
                    let control = SimMicThread::spawn(
                        producer,
                        signal,
                        self.device_rate,
                        self.channels,
                        metrics.clone(),
                    )?;
                    let reader = FrameReader::new(consumer, self.device_rate, self.channels);
                    handles.set_audio(
                        OpenedAudio {
                            reader,
                            sample_rate: self.device_rate,
                            channels: self.channels,
                        },
                        Box::new(control),
                    );
                }
            }
        }

        Ok(handles)
    }
}

struct StaticTrack;

impl TrackControl for StaticTrack {
    fn stop(self: Box<Self>) {}
}

/// Thread that feeds the capture ring the way a device callback would:
/// a burst of samples every 10 ms.
struct SimMicThread {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl SimMicThread {
    fn spawn(
        mut producer: SampleProducer,
        signal: SimAudio,
        device_rate: u32,
        channels: u16,
        metrics: PipelineMetrics,
    ) -> Result<Self, MediaError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let burst_frames = (device_rate / 100) as usize;
        let channels = channels.max(1) as usize;

        let handle = thread::Builder::new()
            .name("sim-mic".to_string())
            .spawn(move || {
                let mut phase = 0.0f64;
                let mut burst = vec![0.0f32; burst_frames * channels];
                while thread_running.load(Ordering::Relaxed) {
                    if let SimAudio::Tone { hz, amplitude } = signal {
                        let step = TAU * hz / device_rate as f64;
                        for frame in burst.chunks_exact_mut(channels) {
                            let sample = (phase.sin() * amplitude as f64) as f32;
                            frame.fill(sample);
                            phase = (phase + step) % TAU;
                        }
                    }
                    let written = producer.write(&burst);
                    metrics
                        .audio_frames_captured
                        .fetch_add(1, Ordering::Relaxed);
                    if written < burst.len() {
                        metrics.audio_frames_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    *metrics.last_capture_time.write() = Some(Instant::now());
                    thread::sleep(Duration::from_millis(10));
                }
                info!("Simulated microphone stopped");
            })
            .map_err(|e| MediaError::Fatal(format!("Failed to spawn sim mic thread: {e}")))?;

        Ok(Self { running, handle })
    }
}

impl TrackControl for SimMicThread {
    fn stop(self: Box<Self>) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

/// Still source producing JPEG-framed synthetic payloads.
///
/// The bytes carry real SOI/EOI markers and a payload whose size follows
/// the requested scale and quality, so sizing behavior downstream is
/// observable without a camera stack.
pub struct TestPatternSource {
    scaled_width: u16,
    scaled_height: u16,
    quality: f64,
    counter: u32,
    warmup_polls: u32,
}

impl TestPatternSource {
    pub fn new(constraints: &CaptureConstraints) -> Self {
        Self {
            scaled_width: (constraints.width as f64 * constraints.scale) as u16,
            scaled_height: (constraints.height as f64 * constraints.scale) as u16,
            quality: constraints.jpeg_quality,
            counter: 0,
            warmup_polls: 0,
        }
    }

    pub fn with_warmup(mut self, polls: u32) -> Self {
        self.warmup_polls = polls;
        self
    }
}

impl VideoSource for TestPatternSource {
    fn poll_frame(&mut self) -> Option<Vec<u8>> {
        if self.warmup_polls > 0 {
            self.warmup_polls -= 1;
            return None;
        }
        self.counter += 1;

        let pixels = self.scaled_width as usize * self.scaled_height as usize;
        let payload_len = (pixels as f64 * self.quality / 8.0) as usize;
        let mut bytes = Vec::with_capacity(payload_len + 24);
        bytes.extend_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        bytes.extend_from_slice(b"PERCEPT");
        bytes.extend_from_slice(&self.counter.to_be_bytes());
        bytes.extend_from_slice(&self.scaled_width.to_le_bytes());
        bytes.extend_from_slice(&self.scaled_height.to_le_bytes());
        for i in 0..payload_len {
            bytes.push((self.counter as usize).wrapping_add(i.wrapping_mul(31)) as u8);
        }
        bytes.extend_from_slice(&[0xFF, 0xD9]);
        Some(bytes)
    }
}

/// Factory handing [`TestPatternSource`]s to [`CpalMediaDevices`] when no
/// camera stack is wired in.
pub struct TestPatternFactory;

impl VideoSourceFactory for TestPatternFactory {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn VideoSource>, MediaError> {
        Ok(Box::new(TestPatternSource::new(constraints)))
    }
}
