use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use parking_lot::{Mutex, RwLock};
use percept_foundation::MediaError;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::playback::{OpenedOutput, OutputControl, OutputDevice, OutputSink, UnitId};

/// One chunk of response audio queued on the device.
struct ActiveUnit {
    id: UnitId,
    /// Mono samples at the source rate.
    samples: Vec<f32>,
    /// Start position in seconds on the output clock.
    start: f64,
    /// Fractional read position into `samples`.
    pos: f64,
}

/// State shared between the device callback and the [`DeviceSink`].
///
/// The callback owns the clock: it counts frames it has written, which
/// makes `now` monotone and tied to what the listener actually hears.
pub struct OutputShared {
    device_rate: u32,
    source_rate: u32,
    frames_written: AtomicU64,
    queue: Mutex<Vec<ActiveUnit>>,
    ended_tx: mpsc::UnboundedSender<UnitId>,
}

impl OutputShared {
    fn new(device_rate: u32, source_rate: u32, ended_tx: mpsc::UnboundedSender<UnitId>) -> Self {
        Self {
            device_rate,
            source_rate,
            frames_written: AtomicU64::new(0),
            queue: Mutex::new(Vec::new()),
            ended_tx,
        }
    }

    fn clock_secs(&self) -> f64 {
        self.frames_written.load(Ordering::Relaxed) as f64 / self.device_rate as f64
    }

    /// Mixes every due unit into `data`, interpolating from the source
    /// rate to the device rate, and reports units that finished.
    fn fill(&self, data: &mut [f32], channels: usize) {
        let frames = data.len() / channels.max(1);
        let rate = self.device_rate as f64;
        let ratio = self.source_rate as f64 / rate;
        let frame_base = self.frames_written.load(Ordering::Relaxed);

        let mut queue = self.queue.lock();
        for fi in 0..frames {
            let t = (frame_base + fi as u64) as f64 / rate;
            let mut acc = 0.0f32;
            for unit in queue.iter_mut() {
                if t < unit.start {
                    continue;
                }
                let idx = unit.pos as usize;
                let len = unit.samples.len();
                if idx >= len {
                    continue;
                }
                let sample = if idx + 1 < len {
                    let frac = (unit.pos - idx as f64) as f32;
                    unit.samples[idx] * (1.0 - frac) + unit.samples[idx + 1] * frac
                } else {
                    unit.samples[idx]
                };
                acc += sample;
                unit.pos += ratio;
            }
            let mixed = acc.clamp(-1.0, 1.0);
            for ch in 0..channels {
                data[fi * channels + ch] = mixed;
            }
        }
        self.frames_written.fetch_add(frames as u64, Ordering::Relaxed);

        queue.retain(|unit| {
            if unit.pos as usize >= unit.samples.len() {
                let _ = self.ended_tx.send(unit.id);
                false
            } else {
                true
            }
        });
    }
}

/// [`OutputSink`] backed by the cpal output callback.
pub struct DeviceSink {
    shared: Arc<OutputShared>,
}

impl OutputSink for DeviceSink {
    fn now(&self) -> f64 {
        self.shared.clock_secs()
    }

    fn schedule(&mut self, id: UnitId, samples: Vec<f32>, start: f64) {
        self.shared.queue.lock().push(ActiveUnit {
            id,
            samples,
            start,
            pos: 0.0,
        });
    }

    fn stop(&mut self, id: UnitId) {
        self.shared.queue.lock().retain(|unit| unit.id != id);
    }
}

/// How long `spawn` waits for the output thread to open a stream.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Dedicated thread holding the cpal output stream.
pub struct AudioOutputThread {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl AudioOutputThread {
    /// Opens the default output device and starts mixing. `source_rate`
    /// is the rate of the samples the timeline will schedule.
    pub fn spawn(
        source_rate: u32,
    ) -> Result<(Self, DeviceSink, mpsc::UnboundedReceiver<UnitId>), MediaError> {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(true));
        let outcome: Arc<RwLock<Option<Result<Arc<OutputShared>, MediaError>>>> =
            Arc::new(RwLock::new(None));

        let thread_running = running.clone();
        let thread_outcome = outcome.clone();
        let handle = thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let stream = match open_output(source_rate, ended_tx) {
                    Ok((stream, shared)) => {
                        *thread_outcome.write() = Some(Ok(shared));
                        stream
                    }
                    Err(err) => {
                        *thread_outcome.write() = Some(Err(err));
                        return;
                    }
                };

                while thread_running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(100));
                }
                drop(stream);
                info!("Audio output thread shutting down");
            })
            .map_err(|e| MediaError::Fatal(format!("Failed to spawn output thread: {e}")))?;

        let started = Instant::now();
        loop {
            if let Some(result) = outcome.write().take() {
                match result {
                    Ok(shared) => {
                        let sink = DeviceSink { shared };
                        return Ok((Self { handle, running }, sink, ended_rx));
                    }
                    Err(err) => {
                        let _ = handle.join();
                        return Err(err);
                    }
                }
            }
            if started.elapsed() > OPEN_TIMEOUT {
                running.store(false, Ordering::Relaxed);
                return Err(MediaError::Fatal(
                    "No output configuration within open timeout".to_string(),
                ));
            }
            thread::sleep(Duration::from_millis(10));
        }
    }
}

impl OutputControl for AudioOutputThread {
    fn stop(self: Box<Self>) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

fn open_output(
    source_rate: u32,
    ended_tx: mpsc::UnboundedSender<UnitId>,
) -> Result<(cpal::Stream, Arc<OutputShared>), MediaError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| MediaError::PlaybackUnavailable {
            reason: "no default output device".to_string(),
        })?;
    if let Ok(name) = device.name() {
        info!("Selected output device: {}", name);
    }

    let default_config = device
        .default_output_config()
        .map_err(|e| MediaError::PlaybackUnavailable {
            reason: e.to_string(),
        })?;
    let sample_format = default_config.sample_format();
    let config = cpal::StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Default,
    };
    let channels = config.channels as usize;
    let shared = Arc::new(OutputShared::new(
        config.sample_rate.0,
        source_rate,
        ended_tx,
    ));

    let err_fn = |err: cpal::StreamError| {
        error!("Output stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let cb_shared = shared.clone();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &_| {
                    cb_shared.fill(data, channels);
                },
                err_fn,
                None,
            )?
        }
        SampleFormat::I16 => {
            let cb_shared = shared.clone();
            // Mix in float, then quantize for the device.
            thread_local! {
                static MIX_BUFFER: std::cell::RefCell<Vec<f32>> =
                    const { std::cell::RefCell::new(Vec::new()) };
            }
            device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &_| {
                    MIX_BUFFER.with(|buf| {
                        let mut mixed = buf.borrow_mut();
                        mixed.clear();
                        mixed.resize(data.len(), 0.0);
                        cb_shared.fill(&mut mixed, channels);
                        for (out, &sample) in data.iter_mut().zip(mixed.iter()) {
                            *out = (sample * 32_767.0).round() as i16;
                        }
                    });
                },
                err_fn,
                None,
            )?
        }
        other => {
            return Err(MediaError::FormatNotSupported {
                format: format!("{other:?}"),
            });
        }
    };
    stream.play()?;
    info!(
        "Output stream running at {} Hz, {} channel(s)",
        config.sample_rate.0, config.channels
    );
    Ok((stream, shared))
}

/// [`OutputDevice`] for real hardware.
pub struct CpalOutputDevice;

impl OutputDevice for CpalOutputDevice {
    fn open(&self, sample_rate: u32) -> Result<OpenedOutput, MediaError> {
        let (thread, sink, ended_rx) = AudioOutputThread::spawn(sample_rate)?;
        Ok(OpenedOutput {
            sink: Box::new(sink),
            ended_rx,
            control: Box::new(thread),
        })
    }
}
