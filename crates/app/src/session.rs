//! Session lifecycle controller.
//!
//! One controller owns the whole streaming pipeline: it opens capture
//! devices and the playback sink, wires the framer, video poller,
//! transmit gate, downlink router, and playback scheduler together, and
//! walks the Idle/Initializing/Running/Error state machine as the remote
//! session comes up, fails, or closes. At most one session is live at a
//! time; `connect` while one is active is a no-op.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use percept_codec::RESPONSE_SAMPLE_RATE;
use percept_foundation::{AppError, LinkError, MediaError, SessionState, StateManager};
use percept_link::{
    LiveConnector, LiveSession, ServerEvent, SessionConfig, TransmitGate, FRAME_QUEUE_CAPACITY,
};
use percept_media::{
    AudioFramer, CaptureConstraints, FramerConfig, MediaDevices, MediaStreamHandles,
    OutputControl, OutputDevice, OutputTimeline, PlaybackCommand, PlaybackScheduler, VideoPoller,
};
use percept_telemetry::{
    EventLog, PipelineMetrics, Subsystem, SyntheticStats, SystemMetrics,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// How long the downlink may stay silent before the handshake counts as
/// failed. The remote side gives no bound of its own.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Rolling window of synthetic load samples kept for the dashboard charts.
pub const STATS_WINDOW: usize = 20;

const PLAYBACK_QUEUE_CAPACITY: usize = 64;
const SERVER_EVENT_CAPACITY: usize = 64;
const CONTROL_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct SessionOptions {
    /// Service credential. Connect refuses to start without one.
    pub api_key: Option<String>,
    /// Capture device name, or the host default.
    pub device: Option<String>,
    pub session: SessionConfig,
    pub connect_timeout: Duration,
    pub video_poll_period: Duration,
    pub stats_period: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            device: None,
            session: SessionConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            video_poll_period: Duration::from_secs(1),
            stats_period: Duration::from_secs(1),
        }
    }
}

/// Lifecycle notifications flowing from the connect task and the downlink
/// router back to the controller.
enum ControlEvent {
    SessionReady(Arc<dyn LiveSession>),
    ConnectFailed { message: String },
    OpenTimedOut,
    LinkOpened,
    LinkError { message: String },
    LinkClosed { reason: String },
}

/// Everything belonging to one live session, torn down as a unit.
struct ActiveSession {
    handles: MediaStreamHandles,
    armed_tx: watch::Sender<bool>,
    playback_tx: mpsc::Sender<PlaybackCommand>,
    session: Option<Arc<dyn LiveSession>>,
    output_control: Option<Box<dyn OutputControl>>,
    framer: JoinHandle<()>,
    video: Option<JoinHandle<()>>,
    gate: JoinHandle<()>,
    scheduler: JoinHandle<()>,
    router: JoinHandle<()>,
    connector_task: JoinHandle<()>,
    stats_task: Option<JoinHandle<()>>,
}

pub struct SessionController {
    state: StateManager,
    log: EventLog,
    metrics: PipelineMetrics,
    connector: Arc<dyn LiveConnector>,
    devices: Arc<dyn MediaDevices>,
    output: Arc<dyn OutputDevice>,
    opts: SessionOptions,
    active: Mutex<Option<ActiveSession>>,
    stats: Arc<Mutex<VecDeque<SystemMetrics>>>,
}

impl SessionController {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        devices: Arc<dyn MediaDevices>,
        output: Arc<dyn OutputDevice>,
        opts: SessionOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: StateManager::new(),
            log: EventLog::new(),
            metrics: PipelineMetrics::default(),
            connector,
            devices,
            output,
            opts,
            active: Mutex::new(None),
            stats: Arc::new(Mutex::new(VecDeque::with_capacity(STATS_WINDOW))),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn model(&self) -> &str {
        &self.opts.session.model
    }

    /// Synthetic load samples, oldest first.
    pub fn stats_window(&self) -> Vec<SystemMetrics> {
        self.stats.lock().iter().copied().collect()
    }

    pub fn latest_stats(&self) -> SystemMetrics {
        self.stats.lock().back().copied().unwrap_or_default()
    }

    /// Brings the pipeline up.
    ///
    /// Returns once devices are open and the connect attempt is in
    /// flight; the Running transition happens when the remote side
    /// reports open. Ignored unless the state is Idle or Error.
    pub async fn connect(self: &Arc<Self>) -> Result<(), AppError> {
        match self.state.current() {
            SessionState::Idle | SessionState::Error => {}
            state => {
                debug!(?state, "Connect ignored, session already active");
                return Ok(());
            }
        }
        if self.opts.api_key.as_deref().map_or(true, str::is_empty) {
            self.log.error(Subsystem::Core, "API Key not found");
            return Err(AppError::MissingCredential);
        }

        self.state.transition(SessionState::Initializing)?;
        self.log.info(Subsystem::Core, "Initializing subsystems...");

        if let Err(err) = self.bring_up().await {
            self.log
                .error(Subsystem::Core, format!("Initialization failed: {err}"));
            self.state.transition(SessionState::Error)?;
            return Err(err);
        }
        Ok(())
    }

    /// Tears everything down and returns to Idle. Idempotent: a second
    /// call with nothing running does nothing at all.
    pub async fn disconnect(&self) {
        let was_active = self.active.lock().is_some();
        if !was_active && self.state.current() == SessionState::Idle {
            return;
        }

        self.teardown().await;
        if self.state.current() != SessionState::Idle {
            if let Err(err) = self.state.transition(SessionState::Idle) {
                warn!("Disconnect transition rejected: {err}");
            }
        }
        self.log.info(Subsystem::Core, "System shut down");
    }

    async fn bring_up(self: &Arc<Self>) -> Result<(), AppError> {
        let constraints = CaptureConstraints {
            device: self.opts.device.clone(),
            ..CaptureConstraints::default()
        };
        let mut handles = self.devices.open(&constraints, &self.metrics)?;
        if handles.has_video() {
            self.log.info(Subsystem::Video, "Camera stream active");
        }
        if handles.has_audio() {
            self.log.info(Subsystem::Audio, "Microphone stream active");
        }
        let audio = handles
            .take_audio()
            .ok_or_else(|| MediaError::DeviceUnavailable {
                reason: "no audio track in capture handles".to_string(),
            })?;

        let opened = self.output.open(RESPONSE_SAMPLE_RATE)?;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let (armed_tx, armed_rx) = watch::channel(false);
        let (session_tx, session_rx) = oneshot::channel();
        let (playback_tx, playback_rx) = mpsc::channel(PLAYBACK_QUEUE_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(SERVER_EVENT_CAPACITY);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);

        let framer = AudioFramer::new(
            audio.reader,
            armed_rx,
            frame_tx.clone(),
            FramerConfig::default(),
            self.log.clone(),
            self.metrics.clone(),
        )
        .spawn();

        let video = handles.take_video().map(|source| {
            VideoPoller::new(
                source,
                frame_tx,
                self.opts.video_poll_period,
                self.log.clone(),
                self.metrics.clone(),
            )
            .spawn()
        });

        let gate =
            TransmitGate::new(frame_rx, session_rx, self.log.clone(), self.metrics.clone())
                .spawn();

        let timeline = OutputTimeline::new(
            opened.sink,
            RESPONSE_SAMPLE_RATE,
            self.log.clone(),
            self.metrics.clone(),
        );
        let scheduler = PlaybackScheduler::new(playback_rx, opened.ended_rx, timeline).spawn();

        let router = tokio::spawn(route_server_events(
            event_rx,
            playback_tx.clone(),
            control_tx.clone(),
            self.opts.connect_timeout,
        ));

        let connector = Arc::clone(&self.connector);
        let config = self.opts.session.clone();
        let connect_control = control_tx.clone();
        let connector_task = tokio::spawn(async move {
            match connector.connect(config, event_tx).await {
                Ok(session) => {
                    let _ = connect_control
                        .send(ControlEvent::SessionReady(session.clone()))
                        .await;
                    if session_tx.send(Ok(session)).is_err() {
                        debug!("Transmit gate gone before the session resolved");
                    }
                }
                Err(err) => {
                    let _ = connect_control
                        .send(ControlEvent::ConnectFailed {
                            message: err.to_string(),
                        })
                        .await;
                    if session_tx.send(Err(err)).is_err() {
                        debug!("Transmit gate gone before the connect failure was delivered");
                    }
                }
            }
        });
        drop(control_tx);

        *self.active.lock() = Some(ActiveSession {
            handles,
            armed_tx,
            playback_tx,
            session: None,
            output_control: Some(opened.control),
            framer,
            video,
            gate,
            scheduler,
            router,
            connector_task,
            stats_task: None,
        });

        // Spawned only after the active slot is filled, so every control
        // event observes a populated session.
        tokio::spawn(Arc::clone(self).control_loop(control_rx));
        Ok(())
    }

    async fn control_loop(self: Arc<Self>, mut control_rx: mpsc::Receiver<ControlEvent>) {
        while let Some(event) = control_rx.recv().await {
            match event {
                ControlEvent::SessionReady(session) => {
                    let orphaned = {
                        let mut guard = self.active.lock();
                        match guard.as_mut() {
                            Some(active) => {
                                active.session = Some(session);
                                None
                            }
                            None => Some(session),
                        }
                    };
                    // Resolved after teardown; close it rather than leaving
                    // the remote side waiting.
                    if let Some(session) = orphaned {
                        tokio::spawn(async move {
                            let _ = session.close().await;
                        });
                    }
                }
                ControlEvent::LinkOpened => self.handle_opened(),
                ControlEvent::LinkError { message } => {
                    self.log
                        .error(Subsystem::Core, format!("Session error: {message}"));
                }
                ControlEvent::LinkClosed { reason } => {
                    debug!(%reason, "Remote closed the session");
                    self.log.info(Subsystem::Core, "Session closed");
                    self.teardown().await;
                    if self.state.current() != SessionState::Idle {
                        if let Err(err) = self.state.transition(SessionState::Idle) {
                            warn!("Idle transition after remote close rejected: {err}");
                        }
                    }
                }
                ControlEvent::ConnectFailed { message } => {
                    self.fail_connect(message).await;
                }
                ControlEvent::OpenTimedOut => {
                    let err = LinkError::OpenTimeout {
                        timeout_ms: self.opts.connect_timeout.as_millis() as u64,
                    };
                    self.fail_connect(err.to_string()).await;
                }
            }
        }
    }

    fn handle_opened(&self) {
        if let Err(err) = self.state.transition(SessionState::Running) {
            debug!("Open event ignored: {err}");
            return;
        }
        self.log.info(Subsystem::Core, "Connected to live network");

        let mut guard = self.active.lock();
        if let Some(active) = guard.as_mut() {
            // Arming starts the uplink audio flow; until now the framer
            // has been discarding capture.
            let _ = active.armed_tx.send(true);
            active.stats_task = Some(self.spawn_stats_task());
        }
    }

    async fn fail_connect(&self, message: String) {
        self.log
            .error(Subsystem::Core, format!("Initialization failed: {message}"));
        self.teardown().await;
        match self.state.current() {
            SessionState::Initializing | SessionState::Running => {
                if let Err(err) = self.state.transition(SessionState::Error) {
                    warn!("Error transition after connect failure rejected: {err}");
                }
            }
            _ => {}
        }
    }

    fn spawn_stats_task(&self) -> JoinHandle<()> {
        let metrics = self.metrics.clone();
        let stats = Arc::clone(&self.stats);
        let period = self.opts.stats_period;
        tokio::spawn(async move {
            let mut sampler = SyntheticStats::new();
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let sample = sampler.sample(metrics.speaking());
                let mut window = stats.lock();
                window.push_back(sample);
                while window.len() > STATS_WINDOW {
                    window.pop_front();
                }
            }
        })
    }

    /// Stops capture, drains playback, closes the session, releases the
    /// output. Safe to call with nothing active.
    async fn teardown(&self) {
        let taken = self.active.lock().take();
        let Some(mut active) = taken else {
            return;
        };

        let _ = active.armed_tx.send(false);
        active.handles.stop_all_tracks();

        active.framer.abort();
        if let Some(video) = &active.video {
            video.abort();
        }
        active.connector_task.abort();
        active.router.abort();
        active.gate.abort();
        if let Some(stats) = &active.stats_task {
            stats.abort();
        }

        let _ = active.framer.await;
        if let Some(video) = active.video {
            let _ = video.await;
        }
        let _ = active.connector_task.await;
        let _ = active.router.await;
        let _ = active.gate.await;
        if let Some(stats) = active.stats_task {
            let _ = stats.await;
        }

        // With every sender gone the scheduler drains and silences the
        // timeline before exiting.
        drop(active.playback_tx);
        let _ = active.scheduler.await;

        if let Some(session) = active.session.take() {
            if let Err(err) = session.close().await {
                debug!("Session close reported: {err}");
            }
        }
        if let Some(control) = active.output_control.take() {
            control.stop();
        }

        self.metrics.reset_session_counters();
        self.stats.lock().clear();
    }
}

/// Translates downlink events into playback commands and lifecycle
/// notifications. Until the open event arrives each wait is bounded by
/// the connect timeout.
async fn route_server_events(
    mut event_rx: mpsc::Receiver<ServerEvent>,
    playback_tx: mpsc::Sender<PlaybackCommand>,
    control_tx: mpsc::Sender<ControlEvent>,
    open_timeout: Duration,
) {
    let mut open = false;
    loop {
        let event = if open {
            event_rx.recv().await
        } else {
            match tokio::time::timeout(open_timeout, event_rx.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    let _ = control_tx.send(ControlEvent::OpenTimedOut).await;
                    return;
                }
            }
        };
        let Some(event) = event else { return };

        match event {
            ServerEvent::Opened => {
                open = true;
                let _ = control_tx.send(ControlEvent::LinkOpened).await;
            }
            ServerEvent::Message(message) => {
                // One message can carry both a chunk and the interrupt
                // flag; the chunk is scheduled first.
                if let Some(data) = message.audio_chunk() {
                    if playback_tx
                        .send(PlaybackCommand::Chunk {
                            data: data.to_string(),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                if message.is_interrupted() {
                    if playback_tx.send(PlaybackCommand::Interrupt).await.is_err() {
                        return;
                    }
                }
            }
            ServerEvent::Error { message } => {
                let _ = control_tx.send(ControlEvent::LinkError { message }).await;
            }
            ServerEvent::Closed { reason } => {
                let _ = control_tx.send(ControlEvent::LinkClosed { reason }).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_a_bounded_handshake() {
        let opts = SessionOptions::default();
        assert_eq!(opts.connect_timeout, Duration::from_secs(10));
        assert_eq!(opts.video_poll_period, Duration::from_secs(1));
        assert!(opts.api_key.is_none());
    }
}
