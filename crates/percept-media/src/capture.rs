use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use parking_lot::{Mutex, RwLock};
use percept_foundation::MediaError;
use percept_telemetry::PipelineMetrics;
use tracing::{error, info, warn};

use crate::ring_buffer::SampleProducer;

/// Negotiated microphone stream parameters.
#[derive(Debug, Clone, Copy)]
pub struct MicConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

/// How long `spawn` waits for the capture thread to open a stream.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Handle to the dedicated microphone thread.
///
/// The cpal stream is not `Send`, so it is built and held on its own
/// thread. The callback pushes float samples straight into the ring;
/// everything else happens downstream on the async side.
pub struct MicCaptureThread {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl MicCaptureThread {
    /// Spawns the capture thread and blocks until the stream is up or the
    /// open fails.
    pub fn spawn(
        producer: SampleProducer,
        device_name: Option<String>,
        metrics: PipelineMetrics,
    ) -> Result<(Self, MicConfig), MediaError> {
        let running = Arc::new(AtomicBool::new(true));
        let outcome: Arc<RwLock<Option<Result<MicConfig, MediaError>>>> =
            Arc::new(RwLock::new(None));

        let thread_running = running.clone();
        let thread_outcome = outcome.clone();
        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match open_stream(producer, device_name.as_deref(), &metrics) {
                    Ok((stream, config)) => {
                        *thread_outcome.write() = Some(Ok(config));
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
                info!("Microphone capture thread shutting down");
            })
            .map_err(|e| MediaError::Fatal(format!("Failed to spawn capture thread: {e}")))?;

        // The stream opens on the capture thread; poll for its verdict.
        let started = Instant::now();
        loop {
            if let Some(result) = outcome.write().take() {
                match result {
                    Ok(config) => return Ok((Self { handle, running }, config)),
                    Err(err) => {
                        let _ = handle.join();
                        return Err(err);
                    }
                }
            }
            if started.elapsed() > OPEN_TIMEOUT {
                // The thread may be wedged inside the host API; tell it to
                // stop but do not wait on it.
                running.store(false, Ordering::Relaxed);
                return Err(MediaError::Fatal(
                    "No device configuration within open timeout".to_string(),
                ));
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    /// Stops the stream and joins the thread.
    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

fn open_stream(
    producer: SampleProducer,
    device_name: Option<&str>,
    metrics: &PipelineMetrics,
) -> Result<(cpal::Stream, MicConfig), MediaError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| MediaError::DeviceUnavailable {
                reason: e.to_string(),
            })?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| MediaError::DeviceUnavailable {
                reason: format!("input device '{wanted}' not found"),
            })?,
        None => host
            .default_input_device()
            .ok_or_else(|| MediaError::DeviceUnavailable {
                reason: "no default input device".to_string(),
            })?,
    };

    if let Ok(name) = device.name() {
        info!("Selected input device: {}", name);
    }

    let (config, sample_format) = negotiate_config(&device)?;
    let mic_config = MicConfig {
        sample_rate: config.sample_rate.0,
        channels: config.channels,
    };
    let stream = build_stream(&device, &config, sample_format, producer, metrics.clone())?;
    stream.play()?;
    info!(
        "Microphone stream running at {} Hz, {} channel(s)",
        mic_config.sample_rate, mic_config.channels
    );
    Ok((stream, mic_config))
}

fn negotiate_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), MediaError> {
    if let Ok(default_config) = device.default_input_config() {
        return Ok((
            StreamConfig {
                channels: default_config.channels(),
                sample_rate: default_config.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            },
            default_config.sample_format(),
        ));
    }

    // Fall back to the first advertised config at its top rate.
    if let Some(config) = device.supported_input_configs()?.next() {
        return Ok((config.with_max_sample_rate().into(), config.sample_format()));
    }

    Err(MediaError::FormatNotSupported {
        format: "no supported input formats".to_string(),
    })
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    producer: SampleProducer,
    metrics: PipelineMetrics,
) -> Result<cpal::Stream, MediaError> {
    let producer = Arc::new(Mutex::new(producer));

    let err_fn = |err: cpal::StreamError| {
        error!("Microphone stream error: {}", err);
    };

    // Common path once samples are floats.
    let handle_f32 = move |data: &[f32]| {
        let written = producer.lock().write(data);
        metrics
            .audio_frames_captured
            .fetch_add(1, Ordering::Relaxed);
        if written < data.len() {
            metrics.audio_frames_dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Capture ring full, dropped {} of {} samples",
                data.len() - written,
                data.len()
            );
        }
        *metrics.last_capture_time.write() = Some(Instant::now());
    };

    // Conversion buffer lives per callback thread to keep the real-time
    // path allocation-free.
    thread_local! {
        static CONVERT_BUFFER: std::cell::RefCell<Vec<f32>> =
            const { std::cell::RefCell::new(Vec::new()) };
    }

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _: &_| {
                handle_f32(data);
            },
            err_fn,
            None,
        )?,
        SampleFormat::I16 => device.build_input_stream(
            config,
            move |data: &[i16], _: &_| {
                CONVERT_BUFFER.with(|buf| {
                    let mut converted = buf.borrow_mut();
                    converted.clear();
                    converted.reserve(data.len());
                    converted.extend(data.iter().map(|&s| s as f32 / 32_768.0));
                    handle_f32(&converted);
                });
            },
            err_fn,
            None,
        )?,
        SampleFormat::U16 => device.build_input_stream(
            config,
            move |data: &[u16], _: &_| {
                CONVERT_BUFFER.with(|buf| {
                    let mut converted = buf.borrow_mut();
                    converted.clear();
                    converted.reserve(data.len());
                    // Center unsigned samples before scaling.
                    converted.extend(data.iter().map(|&s| (s as i32 - 32_768) as f32 / 32_768.0));
                    handle_f32(&converted);
                });
            },
            err_fn,
            None,
        )?,
        other => {
            return Err(MediaError::FormatNotSupported {
                format: format!("{other:?}"),
            });
        }
    };

    Ok(stream)
}
