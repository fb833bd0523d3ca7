use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use percept_codec::decode_frame;
use percept_foundation::MediaError;
use percept_telemetry::{EventLog, PipelineMetrics, Subsystem};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Identifier for one scheduled chunk of response audio.
pub type UnitId = u64;

/// Playback clock and scheduler seam.
///
/// The timeline schedules decoded chunks against this clock; real devices
/// and the virtual test sink both live behind it. A stopped unit must not
/// report `ended` afterwards.
pub trait OutputSink: Send {
    /// Current position of the playback clock, in seconds.
    fn now(&self) -> f64;
    /// Queues samples to begin at `start` seconds on the playback clock.
    fn schedule(&mut self, id: UnitId, samples: Vec<f32>, start: f64);
    /// Cancels a unit whether it is playing or still pending.
    fn stop(&mut self, id: UnitId);
}

/// Ways to tear down whatever is producing the playback clock.
pub trait OutputControl: Send {
    fn stop(self: Box<Self>);
}

/// A sink plus its completion feed and teardown handle.
pub struct OpenedOutput {
    pub sink: Box<dyn OutputSink>,
    pub ended_rx: mpsc::UnboundedReceiver<UnitId>,
    pub control: Box<dyn OutputControl>,
}

/// Opens playback sinks. Implemented by the cpal device and by
/// [`VirtualOutput`] for tests and simulated runs.
pub trait OutputDevice: Send + Sync {
    fn open(&self, sample_rate: u32) -> Result<OpenedOutput, MediaError>;
}

/// Commands from the downlink router.
#[derive(Debug, Clone)]
pub enum PlaybackCommand {
    /// Base64 PCM16 chunk from a model turn.
    Chunk { data: String },
    /// Barge-in: drop everything scheduled and start over.
    Interrupt,
}

/// Keeps response audio gapless.
///
/// Chunks are scheduled back to back on the sink clock: each one starts
/// where the previous ends, unless the clock has already passed that
/// point, in which case it starts now. A barge-in stops every live unit
/// and resets the timeline to zero so the next turn schedules fresh.
pub struct OutputTimeline {
    sink: Box<dyn OutputSink>,
    sample_rate: u32,
    next_start: f64,
    active: HashSet<UnitId>,
    next_id: UnitId,
    log: EventLog,
    metrics: PipelineMetrics,
}

impl OutputTimeline {
    pub fn new(
        sink: Box<dyn OutputSink>,
        sample_rate: u32,
        log: EventLog,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            sink,
            sample_rate,
            next_start: 0.0,
            active: HashSet::new(),
            next_id: 0,
            log,
            metrics,
        }
    }

    /// Decodes one chunk and schedules it after whatever is queued.
    pub fn enqueue(&mut self, data: &str) {
        let buffer = match decode_frame(data, self.sample_rate) {
            Ok(buffer) => buffer,
            Err(err) => {
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                self.log
                    .error(Subsystem::Audio, format!("Audio decode failed: {err}"));
                return;
            }
        };
        if buffer.samples.is_empty() {
            debug!("Empty audio chunk, nothing to schedule");
            return;
        }

        self.next_start = self.next_start.max(self.sink.now());
        let id = self.next_id;
        self.next_id += 1;
        let duration = buffer.duration_secs();
        self.sink.schedule(id, buffer.samples, self.next_start);
        self.next_start += duration;
        self.active.insert(id);

        self.metrics.playback_chunks.fetch_add(1, Ordering::Relaxed);
        self.metrics.set_active_units(self.active.len());
        self.metrics.set_speaking(true);
    }

    /// A unit finished on its own.
    pub fn on_ended(&mut self, id: UnitId) {
        self.active.remove(&id);
        self.metrics.set_active_units(self.active.len());
        if self.active.is_empty() {
            self.metrics.set_speaking(false);
        }
    }

    /// User talked over the model: stop everything and reset the clock.
    pub fn interrupt(&mut self) {
        let ids: Vec<UnitId> = self.active.drain().collect();
        for id in ids {
            self.sink.stop(id);
        }
        self.next_start = 0.0;
        self.metrics.set_active_units(0);
        self.metrics.set_speaking(false);
        self.metrics.interruptions.fetch_add(1, Ordering::Relaxed);
        self.log.warn(Subsystem::Brain, "Interrupted by user");
    }

    /// Stops live units without the barge-in bookkeeping. Used when the
    /// session is going away.
    pub fn silence_all(&mut self) {
        let ids: Vec<UnitId> = self.active.drain().collect();
        for id in ids {
            self.sink.stop(id);
        }
        self.metrics.set_active_units(0);
        self.metrics.set_speaking(false);
    }

    pub fn active_units(&self) -> usize {
        self.active.len()
    }
}

/// Drives an [`OutputTimeline`] from the command and completion feeds.
pub struct PlaybackScheduler {
    cmd_rx: mpsc::Receiver<PlaybackCommand>,
    ended_rx: mpsc::UnboundedReceiver<UnitId>,
    timeline: OutputTimeline,
}

impl PlaybackScheduler {
    pub fn new(
        cmd_rx: mpsc::Receiver<PlaybackCommand>,
        ended_rx: mpsc::UnboundedReceiver<UnitId>,
        timeline: OutputTimeline,
    ) -> Self {
        Self {
            cmd_rx,
            ended_rx,
            timeline,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let Self {
            mut cmd_rx,
            mut ended_rx,
            mut timeline,
        } = self;

        info!("Playback scheduler started");
        loop {
            tokio::select! {
                maybe_cmd = cmd_rx.recv() => match maybe_cmd {
                    Some(PlaybackCommand::Chunk { data }) => timeline.enqueue(&data),
                    Some(PlaybackCommand::Interrupt) => timeline.interrupt(),
                    None => break,
                },
                maybe_id = ended_rx.recv() => match maybe_id {
                    Some(id) => timeline.on_ended(id),
                    None => break,
                },
            }
        }
        timeline.silence_all();
        info!("Playback scheduler stopped");
    }
}

/// Record of one `schedule` call on a [`VirtualSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    pub start: f64,
    pub duration: f64,
    pub samples: usize,
}

struct VirtualSinkState {
    now: f64,
    sample_rate: u32,
    scheduled: Vec<ScheduledUnit>,
    /// Units that have not finished: (id, end time).
    pending: Vec<(UnitId, f64)>,
    stopped: Vec<UnitId>,
    ended_tx: mpsc::UnboundedSender<UnitId>,
}

/// Sink with a manually advanced clock.
pub struct VirtualSink {
    state: Arc<Mutex<VirtualSinkState>>,
}

/// Test-side handle to a [`VirtualSink`].
#[derive(Clone)]
pub struct VirtualSinkProbe {
    state: Arc<Mutex<VirtualSinkState>>,
}

impl VirtualSink {
    pub fn new(
        sample_rate: u32,
    ) -> (Self, VirtualSinkProbe, mpsc::UnboundedReceiver<UnitId>) {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(VirtualSinkState {
            now: 0.0,
            sample_rate,
            scheduled: Vec::new(),
            pending: Vec::new(),
            stopped: Vec::new(),
            ended_tx,
        }));
        (
            Self {
                state: state.clone(),
            },
            VirtualSinkProbe { state },
            ended_rx,
        )
    }
}

impl OutputSink for VirtualSink {
    fn now(&self) -> f64 {
        self.state.lock().now
    }

    fn schedule(&mut self, id: UnitId, samples: Vec<f32>, start: f64) {
        let mut state = self.state.lock();
        let duration = samples.len() as f64 / state.sample_rate as f64;
        state.scheduled.push(ScheduledUnit {
            id,
            start,
            duration,
            samples: samples.len(),
        });
        let end = start.max(state.now) + duration;
        state.pending.push((id, end));
    }

    fn stop(&mut self, id: UnitId) {
        let mut state = self.state.lock();
        state.pending.retain(|(pending_id, _)| *pending_id != id);
        state.stopped.push(id);
    }
}

impl VirtualSinkProbe {
    /// Moves the clock forward and emits `ended` for every unit whose end
    /// time has passed, in end-time order.
    pub fn advance(&self, seconds: f64) {
        let mut state = self.state.lock();
        state.now += seconds;
        let now = state.now;

        let mut finished: Vec<(UnitId, f64)> = state
            .pending
            .iter()
            .filter(|(_, end)| *end <= now)
            .copied()
            .collect();
        finished.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap().then(a.0.cmp(&b.0)));
        state.pending.retain(|(_, end)| *end > now);
        for (id, _) in finished {
            let _ = state.ended_tx.send(id);
        }
    }

    pub fn now(&self) -> f64 {
        self.state.lock().now
    }

    pub fn schedules(&self) -> Vec<ScheduledUnit> {
        self.state.lock().scheduled.clone()
    }

    pub fn stops(&self) -> Vec<UnitId> {
        self.state.lock().stopped.clone()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }
}

/// [`OutputDevice`] built on virtual sinks.
///
/// In manual mode the test drives time through the probe. In realtime
/// mode a thread advances the clock with wall time, which is what
/// simulated runs use so response audio "plays" for its real duration.
pub struct VirtualOutput {
    realtime: bool,
    probes: Mutex<Vec<VirtualSinkProbe>>,
}

impl VirtualOutput {
    pub fn manual() -> Self {
        Self {
            realtime: false,
            probes: Mutex::new(Vec::new()),
        }
    }

    pub fn realtime() -> Self {
        Self {
            realtime: true,
            probes: Mutex::new(Vec::new()),
        }
    }

    /// Probe for the most recently opened sink.
    pub fn probe(&self) -> Option<VirtualSinkProbe> {
        self.probes.lock().last().cloned()
    }
}

struct NoopControl;

impl OutputControl for NoopControl {
    fn stop(self: Box<Self>) {}
}

struct AdvancerControl {
    running: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

impl OutputControl for AdvancerControl {
    fn stop(self: Box<Self>) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}

impl OutputDevice for VirtualOutput {
    fn open(&self, sample_rate: u32) -> Result<OpenedOutput, MediaError> {
        let (sink, probe, ended_rx) = VirtualSink::new(sample_rate);
        self.probes.lock().push(probe.clone());

        let control: Box<dyn OutputControl> = if self.realtime {
            let running = Arc::new(AtomicBool::new(true));
            let thread_running = running.clone();
            let handle = thread::Builder::new()
                .name("virtual-clock".to_string())
                .spawn(move || {
                    while thread_running.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                        probe.advance(0.01);
                    }
                })
                .map_err(|e| MediaError::Fatal(format!("Failed to spawn clock thread: {e}")))?;
            Box::new(AdvancerControl { running, handle })
        } else {
            Box::new(NoopControl)
        };

        Ok(OpenedOutput {
            sink: Box::new(sink),
            ended_rx,
            control,
        })
    }
}
