//! Detection session lifecycle.
//!
//! `SessionController` is the single synchronization point for session state,
//! the voice toggle, the alert clock and the camera handle. Control commands
//! (`start`, `stop`, `toggle_voice`, `stream`) and the frame pipeline all go
//! through it.
//!
//! A running session has two worker threads:
//! - capture: reads frames from the camera handle and forwards them over a
//!   small bounded channel,
//! - analysis: detect, process, arbitrate alerts, annotate, encode, and offer
//!   the chunk to the streaming client.
//!
//! Every start bumps a generation counter. Workers carry the generation they
//! were started with and stop touching shared state once it no longer matches.
//!
//! Lock order is `core` then `camera`. Workers never take `core` while holding
//! `camera`.

use std::fmt;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;

use crate::alert::{AlertArbiter, VoiceReadiness, DEFAULT_COOLDOWN_BASE};
use crate::config::NearsightConfig;
use crate::detect::{self, ClassNames, Detector, DetectorFactory, DetectorResources};
use crate::error::SessionError;
use crate::frame::{CaptureError, CaptureHandle, Frame, FrameSource};
use crate::ingest;
use crate::overlay;
use crate::processor::{DetectionParams, DetectionProcessor};
use crate::stream::{self, FrameStream};
use crate::voice::{self, VoiceSink, VoiceWorker};

const CAPTURE_QUEUE_DEPTH: usize = 2;
/// Upper bound on how long the analysis thread waits before rechecking state.
const ANALYSIS_POLL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why the last session left `Running`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Termination {
    StopRequested,
    EndOfStream,
    CaptureFailed { detail: String },
    ClientDisconnected,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::StopRequested => f.write_str("stop requested"),
            Termination::EndOfStream => f.write_str("end of stream"),
            Termination::CaptureFailed { detail } => write!(f, "capture failed: {}", detail),
            Termination::ClientDisconnected => f.write_str("stream client disconnected"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub voice_enabled: bool,
    pub frames_processed: u64,
    pub alerts_emitted: u64,
    pub last_termination: Option<Termination>,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub device_index: u32,
    pub detection: DetectionParams,
    pub cooldown_base: Duration,
    pub voice_enabled: bool,
    pub jpeg_quality: u8,
    pub stream_queue_depth: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            device_index: 0,
            detection: DetectionParams::default(),
            cooldown_base: DEFAULT_COOLDOWN_BASE,
            voice_enabled: true,
            jpeg_quality: 80,
            stream_queue_depth: 2,
        }
    }
}

impl SessionOptions {
    pub fn from_config(cfg: &NearsightConfig) -> Self {
        Self {
            device_index: cfg.camera.device_index,
            detection: cfg.detection.clone(),
            cooldown_base: cfg.cooldown_base,
            voice_enabled: cfg.voice.enabled,
            jpeg_quality: cfg.stream.jpeg_quality,
            stream_queue_depth: cfg.stream.queue_depth,
        }
    }
}

/// Collaborators a controller drives.
pub struct SessionParts {
    pub source: Arc<dyn FrameSource>,
    pub detector: Arc<dyn DetectorFactory>,
    pub resources: DetectorResources,
    pub voice: Box<dyn VoiceSink>,
}

#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

struct Shared {
    core: Mutex<Core>,
    camera: Mutex<Option<ActiveCamera>>,
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn DetectorFactory>,
    resources: DetectorResources,
    options: SessionOptions,
    voice: VoiceWorker,
}

struct Core {
    state: SessionState,
    voice_enabled: bool,
    /// Survives stop/start so a restart cannot re-announce immediately.
    arbiter: AlertArbiter,
    generation: u64,
    /// Set while `start` loads the detector and opens the camera unlocked.
    starting: bool,
    /// Receiving end of the current session's stream until a client claims it.
    stream_rx: Option<Receiver<Vec<u8>>>,
    frames_processed: u64,
    alerts_emitted: u64,
    last_termination: Option<Termination>,
}

struct ActiveCamera {
    generation: u64,
    handle: Box<dyn CaptureHandle>,
}

struct Prepared {
    classes: ClassNames,
    detector: Box<dyn Detector>,
    handle: Box<dyn CaptureHandle>,
}

enum CaptureEvent {
    Frame(Frame),
    Ended(Termination),
}

impl SessionController {
    pub fn new(parts: SessionParts, options: SessionOptions) -> Result<Self> {
        let voice = VoiceWorker::spawn(parts.voice)?;
        let core = Core {
            state: SessionState::Idle,
            voice_enabled: options.voice_enabled,
            arbiter: AlertArbiter::new(options.cooldown_base),
            generation: 0,
            starting: false,
            stream_rx: None,
            frames_processed: 0,
            alerts_emitted: 0,
            last_termination: None,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                camera: Mutex::new(None),
                source: parts.source,
                detector: parts.detector,
                resources: parts.resources,
                options,
                voice,
            }),
        })
    }

    pub fn from_config(cfg: &NearsightConfig) -> Result<Self> {
        let parts = SessionParts {
            source: ingest::source_from_config(&cfg.camera)?,
            detector: detect::factory_from_config(&cfg.detector)?,
            resources: cfg.resources(),
            voice: voice::sink_from_config(&cfg.voice),
        };
        Self::new(parts, SessionOptions::from_config(cfg))
    }

    /// Begin a session: verify resources, load the detector, open the camera,
    /// then start the workers.
    ///
    /// Any failure before the workers start leaves the state unchanged.
    /// Starting while running, or while another start is still loading,
    /// returns `AlreadyRunning` without touching the camera. The detector is
    /// loaded and the camera opened without holding the session lock, so
    /// `status`, `toggle_voice` and `stop` stay responsive meanwhile.
    pub fn start(&self) -> Result<SessionState, SessionError> {
        let shared = &self.shared;
        {
            let mut core = shared.lock_core();
            if core.state == SessionState::Running || core.starting {
                return Err(SessionError::AlreadyRunning);
            }
            core.starting = true;
        }

        let prepared = shared.prepare();
        let mut core = shared.lock_core();
        core.starting = false;
        let Prepared {
            classes,
            detector,
            handle,
        } = prepared?;
        let device_index = shared.options.device_index;

        let previous = core.state;
        core.generation += 1;
        let generation = core.generation;
        *shared.lock_camera() = Some(ActiveCamera { generation, handle });

        let (frame_tx, frame_rx) = mpsc::sync_channel(CAPTURE_QUEUE_DEPTH);
        let (stream_tx, stream_rx) = mpsc::sync_channel(shared.options.stream_queue_depth.max(1));
        let analysis = Analysis {
            shared: shared.clone(),
            generation,
            detector,
            processor: DetectionProcessor::new(shared.options.detection.clone(), classes),
            stream_tx,
        };

        let previous_termination = core.last_termination.take();
        core.state = SessionState::Running;
        core.stream_rx = Some(stream_rx);
        core.frames_processed = 0;
        core.alerts_emitted = 0;

        if let Err(err) = spawn_workers(shared, generation, frame_tx, frame_rx, analysis) {
            core.state = previous;
            core.stream_rx = None;
            core.last_termination = previous_termination;
            shared.release_camera(generation);
            return Err(err.into());
        }

        log::info!(
            "session {} started: {} on device {}",
            generation,
            shared.source.name(),
            device_index
        );
        Ok(SessionState::Running)
    }

    /// End the running session. A no-op in any other state; the camera is
    /// released at most once however often this is called.
    pub fn stop(&self) -> SessionState {
        let mut core = self.shared.lock_core();
        if core.state == SessionState::Running {
            self.shared.terminate(&mut core, Termination::StopRequested);
        }
        core.state
    }

    /// Flip the voice toggle. Legal in every state; returns the new value.
    pub fn toggle_voice(&self) -> bool {
        let mut core = self.shared.lock_core();
        core.voice_enabled = !core.voice_enabled;
        log::info!(
            "voice alerts {}",
            if core.voice_enabled { "enabled" } else { "disabled" }
        );
        core.voice_enabled
    }

    /// Claim the running session's chunk stream. Each session yields one stream.
    pub fn stream(&self) -> Result<FrameStream, SessionError> {
        let mut core = self.shared.lock_core();
        if core.state != SessionState::Running {
            return Err(SessionError::StreamUnavailable(core.state));
        }
        match core.stream_rx.take() {
            Some(rx) => Ok(FrameStream::new(rx)),
            None => Err(SessionError::StreamUnavailable(core.state)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock_core().state
    }

    pub fn status(&self) -> SessionStatus {
        let core = self.shared.lock_core();
        SessionStatus {
            state: core.state,
            voice_enabled: core.voice_enabled,
            frames_processed: core.frames_processed,
            alerts_emitted: core.alerts_emitted,
            last_termination: core.last_termination.clone(),
        }
    }
}

fn spawn_workers(
    shared: &Arc<Shared>,
    generation: u64,
    frame_tx: SyncSender<CaptureEvent>,
    frame_rx: Receiver<CaptureEvent>,
    analysis: Analysis,
) -> std::io::Result<()> {
    let capture_shared = shared.clone();
    std::thread::Builder::new()
        .name(format!("nearsight-capture-{}", generation))
        .spawn(move || capture_loop(capture_shared, generation, frame_tx))?;
    std::thread::Builder::new()
        .name(format!("nearsight-analysis-{}", generation))
        .spawn(move || analysis.run(frame_rx))?;
    Ok(())
}

/// Keeps state reachable after a worker panic so `stop` still works.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        lock(&self.core)
    }

    fn lock_camera(&self) -> MutexGuard<'_, Option<ActiveCamera>> {
        lock(&self.camera)
    }

    /// Load class names and the detector, then open the camera.
    fn prepare(&self) -> Result<Prepared, SessionError> {
        self.resources.verify()?;
        let classes = self
            .resources
            .load_class_names()
            .map_err(SessionError::Detector)?;
        let mut detector = self
            .detector
            .build(&self.resources)
            .map_err(SessionError::Detector)?;
        detector.warm_up().map_err(SessionError::Detector)?;
        let handle = self.source.open(self.options.device_index)?;
        Ok(Prepared {
            classes,
            detector,
            handle,
        })
    }

    fn is_current(&self, generation: u64) -> bool {
        let core = self.lock_core();
        core.generation == generation && core.state == SessionState::Running
    }

    /// Worker-initiated end of session. Ignored for stale generations and for
    /// sessions already stopped, so each session terminates once.
    fn finish(&self, generation: u64, reason: Termination) {
        let mut core = self.lock_core();
        if core.generation != generation || core.state != SessionState::Running {
            return;
        }
        self.terminate(&mut core, reason);
    }

    fn terminate(&self, core: &mut Core, reason: Termination) {
        core.state = SessionState::Stopped;
        core.stream_rx = None;
        self.release_camera(core.generation);
        match &reason {
            Termination::CaptureFailed { .. } => {
                log::warn!("session {} stopped: {}", core.generation, reason)
            }
            _ => log::info!("session {} stopped: {}", core.generation, reason),
        }
        core.last_termination = Some(reason);
    }

    fn release_camera(&self, generation: u64) {
        let taken = {
            let mut camera = self.lock_camera();
            let current = camera
                .as_ref()
                .is_some_and(|active| active.generation == generation);
            if current {
                camera.take()
            } else {
                None
            }
        };
        if let Some(mut active) = taken {
            active.handle.release();
        }
    }
}

fn capture_loop(shared: Arc<Shared>, generation: u64, frames: SyncSender<CaptureEvent>) {
    loop {
        let read = {
            let mut camera = shared.lock_camera();
            match camera.as_mut() {
                Some(active) if active.generation == generation => active.handle.read(),
                _ => return,
            }
        };
        let event = match read {
            Ok(frame) => CaptureEvent::Frame(frame),
            Err(CaptureError::EndOfStream) => CaptureEvent::Ended(Termination::EndOfStream),
            Err(err) => CaptureEvent::Ended(Termination::CaptureFailed {
                detail: err.to_string(),
            }),
        };
        let ended = matches!(event, CaptureEvent::Ended(_));
        if frames.send(event).is_err() || ended {
            return;
        }
    }
}

struct Analysis {
    shared: Arc<Shared>,
    generation: u64,
    detector: Box<dyn Detector>,
    processor: DetectionProcessor,
    stream_tx: SyncSender<Vec<u8>>,
}

impl Analysis {
    fn run(mut self, frames: Receiver<CaptureEvent>) {
        loop {
            match frames.recv_timeout(ANALYSIS_POLL) {
                Ok(CaptureEvent::Frame(frame)) => {
                    if !self.analyze(frame) {
                        return;
                    }
                }
                Ok(CaptureEvent::Ended(reason)) => {
                    self.shared.finish(self.generation, reason);
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !self.shared.is_current(self.generation) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.shared.finish(
                        self.generation,
                        Termination::CaptureFailed {
                            detail: "capture worker exited".to_string(),
                        },
                    );
                    return;
                }
            }
        }
    }

    /// One pipeline cycle. Returns `false` once the session is over.
    fn analyze(&mut self, frame: Frame) -> bool {
        let raw = match self.detector.infer(&frame) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!(
                    "{} detector failed on frame {}: {:#}",
                    self.detector.name(),
                    frame.sequence,
                    err
                );
                Vec::new()
            }
        };
        let detections = self.processor.process(&raw, frame.width, frame.height);

        let voice_enabled = {
            let mut core = self.shared.lock_core();
            if core.generation != self.generation || core.state != SessionState::Running {
                return false;
            }
            core.frames_processed += 1;
            let readiness = if !core.voice_enabled {
                VoiceReadiness::Disabled
            } else if self.shared.voice.is_busy() {
                VoiceReadiness::Busy
            } else {
                VoiceReadiness::Ready
            };
            if let Some(decision) = core.arbiter.decide(&detections, Instant::now(), readiness) {
                if !decision.emit {
                    log::debug!("alert held ({:?}): {}", readiness, decision.message);
                } else if self.shared.voice.try_speak(decision.message.clone()) {
                    core.alerts_emitted += 1;
                    log::info!("alert: {}", decision.message);
                } else {
                    log::warn!("voice worker unavailable, alert dropped: {}", decision.message);
                }
            }
            core.voice_enabled
        };

        let sequence = frame.sequence;
        let jpeg = match overlay::annotate(frame, &detections, voice_enabled)
            .and_then(|image| stream::encode_jpeg(&image, self.shared.options.jpeg_quality))
        {
            Ok(jpeg) => jpeg,
            Err(err) => {
                log::warn!("frame {} dropped: {:#}", sequence, err);
                return true;
            }
        };

        match self.stream_tx.try_send(stream::frame_part(&jpeg)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::debug!("stream client behind, frame {} dropped", sequence);
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                self.shared
                    .finish(self.generation, Termination::ClientDisconnected);
                false
            }
        }
    }
}
