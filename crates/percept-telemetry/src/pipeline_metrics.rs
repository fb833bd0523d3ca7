use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared counters for cross-thread pipeline monitoring.
///
/// Everything here is advisory: consumers read a snapshot, writers never
/// block on each other. Volume is stored as percent * 10 for one decimal
/// of precision without floats in the atomics.
#[derive(Clone)]
pub struct PipelineMetrics {
    // Capture side
    pub mic_volume: Arc<AtomicU64>, // percent * 10, clamped to 100.0
    pub audio_frames_captured: Arc<AtomicU64>,
    pub audio_frames_dropped: Arc<AtomicU64>,
    pub video_frames_captured: Arc<AtomicU64>,
    pub capture_fps: Arc<AtomicU64>, // frames per second * 10
    pub last_capture_time: Arc<RwLock<Option<Instant>>>,

    // Transmit side
    pub audio_frames_sent: Arc<AtomicU64>,
    pub video_frames_sent: Arc<AtomicU64>,
    pub send_failures: Arc<AtomicU64>,
    pub frames_abandoned: Arc<AtomicU64>,

    // Playback side
    pub playback_chunks: Arc<AtomicU64>,
    pub playback_units_active: Arc<AtomicUsize>,
    pub decode_errors: Arc<AtomicU64>,
    pub interruptions: Arc<AtomicU64>,
    pub is_speaking: Arc<AtomicBool>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self {
            mic_volume: Arc::new(AtomicU64::new(0)),
            audio_frames_captured: Arc::new(AtomicU64::new(0)),
            audio_frames_dropped: Arc::new(AtomicU64::new(0)),
            video_frames_captured: Arc::new(AtomicU64::new(0)),
            capture_fps: Arc::new(AtomicU64::new(0)),
            last_capture_time: Arc::new(RwLock::new(None)),

            audio_frames_sent: Arc::new(AtomicU64::new(0)),
            video_frames_sent: Arc::new(AtomicU64::new(0)),
            send_failures: Arc::new(AtomicU64::new(0)),
            frames_abandoned: Arc::new(AtomicU64::new(0)),

            playback_chunks: Arc::new(AtomicU64::new(0)),
            playback_units_active: Arc::new(AtomicUsize::new(0)),
            decode_errors: Arc::new(AtomicU64::new(0)),
            interruptions: Arc::new(AtomicU64::new(0)),
            is_speaking: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl PipelineMetrics {
    /// Store the display volume for an RMS level of a capture frame.
    /// The UI amplification curve maps RMS into 0..=100.
    pub fn update_mic_volume(&self, rms: f64) {
        let volume = (rms * 500.0).min(100.0);
        self.mic_volume
            .store((volume * 10.0) as u64, Ordering::Relaxed);
        *self.last_capture_time.write() = Some(Instant::now());
    }

    pub fn mic_volume_percent(&self) -> f64 {
        self.mic_volume.load(Ordering::Relaxed) as f64 / 10.0
    }

    pub fn update_capture_fps(&self, fps: f64) {
        self.capture_fps.store((fps * 10.0) as u64, Ordering::Relaxed);
    }

    pub fn increment_audio_captured(&self) {
        self.audio_frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_video_captured(&self) {
        self.video_frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.is_speaking.store(speaking, Ordering::Relaxed);
    }

    pub fn speaking(&self) -> bool {
        self.is_speaking.load(Ordering::Relaxed)
    }

    pub fn set_active_units(&self, count: usize) {
        self.playback_units_active.store(count, Ordering::Relaxed);
    }

    pub fn reset_session_counters(&self) {
        self.mic_volume.store(0, Ordering::Relaxed);
        self.capture_fps.store(0, Ordering::Relaxed);
        self.playback_units_active.store(0, Ordering::Relaxed);
        self.is_speaking.store(false, Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct FpsTracker {
    last_update: Instant,
    frame_count: u64,
}

impl FpsTracker {
    pub fn new() -> Self {
        Self {
            last_update: Instant::now(),
            frame_count: 0,
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.frame_count += 1;
        let elapsed = self.last_update.elapsed();

        if elapsed >= Duration::from_secs(1) {
            let fps = self.frame_count as f64 / elapsed.as_secs_f64();
            self.last_update = Instant::now();
            self.frame_count = 0;
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_is_amplified_and_clamped() {
        let m = PipelineMetrics::default();

        m.update_mic_volume(0.1);
        assert!((m.mic_volume_percent() - 50.0).abs() < 0.11);

        // 0.5 RMS would map to 250; must clamp to 100.
        m.update_mic_volume(0.5);
        assert!((m.mic_volume_percent() - 100.0).abs() < f64::EPSILON);

        m.update_mic_volume(0.0);
        assert_eq!(m.mic_volume_percent(), 0.0);
    }

    #[test]
    fn session_reset_clears_live_indicators_only() {
        let m = PipelineMetrics::default();
        m.increment_audio_captured();
        m.set_speaking(true);
        m.update_mic_volume(0.1);

        m.reset_session_counters();

        assert!(!m.speaking());
        assert_eq!(m.mic_volume_percent(), 0.0);
        // Cumulative counters survive across sessions.
        assert_eq!(m.audio_frames_captured.load(Ordering::Relaxed), 1);
    }
}
