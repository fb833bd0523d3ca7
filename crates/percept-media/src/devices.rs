use percept_foundation::MediaError;
use percept_telemetry::PipelineMetrics;

use crate::capture::MicCaptureThread;
use crate::frame_reader::FrameReader;
use crate::ring_buffer::SampleRing;
use crate::video::VideoSource;

/// Capture ring sized for roughly two thirds of a second at 48 kHz,
/// far more than the framer's 25 ms poll needs.
const CAPTURE_RING_SAMPLES: usize = 65_536;

/// What to open and how to shape the captured media.
///
/// The audio fields describe the uplink format the pipeline wants, not
/// what the hardware must natively support; capture negotiates the
/// device's own rate and the framer converts.
#[derive(Debug, Clone)]
pub struct CaptureConstraints {
    pub audio: bool,
    pub video: bool,
    /// Uplink audio rate.
    pub sample_rate: u32,
    pub channel_count: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    /// Requested camera resolution and cadence.
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Downscale applied to stills before compression.
    pub scale: f64,
    /// JPEG quality in [0, 1].
    pub jpeg_quality: f64,
    /// Specific input device name, or the host default.
    pub device: Option<String>,
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
            sample_rate: 16_000,
            channel_count: 1,
            echo_cancellation: true,
            noise_suppression: true,
            width: 640,
            height: 480,
            frame_rate: 15,
            scale: 0.5,
            jpeg_quality: 0.6,
            device: None,
        }
    }
}

/// Stops one opened track. Consumed on stop; stopping twice is
/// impossible by construction.
pub trait TrackControl: Send {
    fn stop(self: Box<Self>);
}

struct NoopTrack;

impl TrackControl for NoopTrack {
    fn stop(self: Box<Self>) {}
}

impl TrackControl for MicCaptureThread {
    fn stop(self: Box<Self>) {
        MicCaptureThread::stop(*self);
    }
}

/// Everything `MediaDevices::open` produced.
///
/// The session controller takes the reader and source out to hand them
/// to workers, then keeps the handle around solely to stop the tracks at
/// teardown. `stop_all_tracks` may be called any number of times.
pub struct MediaStreamHandles {
    audio: Option<OpenedAudio>,
    video: Option<Box<dyn VideoSource>>,
    controls: Vec<Box<dyn TrackControl>>,
}

impl std::fmt::Debug for MediaStreamHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStreamHandles")
            .field("has_audio", &self.audio.is_some())
            .field("has_video", &self.video.is_some())
            .field("controls", &self.controls.len())
            .finish()
    }
}

/// Opened microphone track: the reader plus its negotiated shape.
pub struct OpenedAudio {
    pub reader: FrameReader,
    pub sample_rate: u32,
    pub channels: u16,
}

impl MediaStreamHandles {
    pub fn new() -> Self {
        Self {
            audio: None,
            video: None,
            controls: Vec::new(),
        }
    }

    pub fn set_audio(&mut self, audio: OpenedAudio, control: Box<dyn TrackControl>) {
        self.audio = Some(audio);
        self.controls.push(control);
    }

    pub fn set_video(&mut self, source: Box<dyn VideoSource>, control: Box<dyn TrackControl>) {
        self.video = Some(source);
        self.controls.push(control);
    }

    pub fn take_audio(&mut self) -> Option<OpenedAudio> {
        self.audio.take()
    }

    pub fn take_video(&mut self) -> Option<Box<dyn VideoSource>> {
        self.video.take()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    /// Stops every track this handle still owns.
    pub fn stop_all_tracks(&mut self) {
        self.audio = None;
        self.video = None;
        for control in self.controls.drain(..) {
            control.stop();
        }
    }
}

impl Default for MediaStreamHandles {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MediaStreamHandles {
    fn drop(&mut self) {
        self.stop_all_tracks();
    }
}

/// Seam between the pipeline and concrete capture hardware.
pub trait MediaDevices: Send + Sync {
    fn open(
        &self,
        constraints: &CaptureConstraints,
        metrics: &PipelineMetrics,
    ) -> Result<MediaStreamHandles, MediaError>;
}

/// Opens camera-side still sources for [`CpalMediaDevices`].
pub trait VideoSourceFactory: Send + Sync {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn VideoSource>, MediaError>;
}

/// Real devices: cpal microphone plus a pluggable still source.
pub struct CpalMediaDevices {
    video_factory: Box<dyn VideoSourceFactory>,
}

impl CpalMediaDevices {
    pub fn new(video_factory: Box<dyn VideoSourceFactory>) -> Self {
        Self { video_factory }
    }
}

impl MediaDevices for CpalMediaDevices {
    fn open(
        &self,
        constraints: &CaptureConstraints,
        metrics: &PipelineMetrics,
    ) -> Result<MediaStreamHandles, MediaError> {
        let mut handles = MediaStreamHandles::new();

        if constraints.video {
            let source = self.video_factory.open(constraints)?;
            handles.set_video(source, Box::new(NoopTrack));
        }

        if constraints.audio {
            let (producer, consumer) = SampleRing::new(CAPTURE_RING_SAMPLES).split();
            let (thread, config) =
                MicCaptureThread::spawn(producer, constraints.device.clone(), metrics.clone())?;
            let reader = FrameReader::new(consumer, config.sample_rate, config.channels);
            handles.set_audio(
                OpenedAudio {
                    reader,
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                },
                Box::new(thread),
            );
        }

        Ok(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTrack {
        stops: Arc<AtomicUsize>,
    }

    impl TrackControl for CountingTrack {
        fn stop(self: Box<Self>) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct NullSource;

    impl VideoSource for NullSource {
        fn poll_frame(&mut self) -> Option<Vec<u8>> {
            None
        }
    }

    #[test]
    fn default_constraints_match_the_dashboard_capture_shape() {
        let constraints = CaptureConstraints::default();
        assert!(constraints.audio && constraints.video);
        assert_eq!(constraints.sample_rate, 16_000);
        assert_eq!(constraints.channel_count, 1);
        assert!(constraints.echo_cancellation && constraints.noise_suppression);
        assert_eq!((constraints.width, constraints.height), (640, 480));
        assert_eq!(constraints.frame_rate, 15);
        assert_eq!(constraints.scale, 0.5);
        assert_eq!(constraints.jpeg_quality, 0.6);
        assert!(constraints.device.is_none());
    }

    #[test]
    fn stop_all_tracks_is_idempotent_and_drops_takeables() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut handles = MediaStreamHandles::new();
        handles.set_video(
            Box::new(NullSource),
            Box::new(CountingTrack {
                stops: stops.clone(),
            }),
        );
        assert!(handles.has_video());

        handles.stop_all_tracks();
        assert!(!handles.has_video());
        assert!(handles.take_video().is_none());
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        handles.stop_all_tracks();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_handles_stops_remaining_tracks() {
        let stops = Arc::new(AtomicUsize::new(0));
        {
            let mut handles = MediaStreamHandles::new();
            handles.set_video(
                Box::new(NullSource),
                Box::new(CountingTrack {
                    stops: stops.clone(),
                }),
            );
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn taken_sources_survive_stop() {
        let mut handles = MediaStreamHandles::new();
        handles.set_video(Box::new(NullSource), Box::new(NoopTrack));
        let mut source = handles.take_video().expect("video source");
        handles.stop_all_tracks();
        // The worker that took the source keeps polling it.
        assert!(source.poll_frame().is_none());
    }
}
