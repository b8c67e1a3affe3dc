//! Nearsight
//!
//! Live obstacle detection sessions: a camera feed runs through an object
//! detector, detections become proximity-based voice alerts, and the annotated
//! video is streamed to a client as MJPEG. Start, stop and voice toggling arrive
//! as independent, concurrent commands.
//!
//! # Architecture
//!
//! The session controller is the only place shared session state lives:
//!
//! 1. **One session per process**: a second start while running fails fast.
//! 2. **Exclusive camera ownership**: the controller opens and releases the
//!    capture handle, exactly once per session.
//! 3. **Bounded alerting**: one alert per frame at most, behind a shared
//!    cooldown clock and a single in-flight utterance.
//! 4. **Non-blocking video path**: speech runs on its own thread and slow
//!    stream clients drop frames instead of stalling capture.
//!
//! # Module Structure
//!
//! - `frame`: frames and the capture-device seam (`FrameSource`, `CaptureHandle`)
//! - `ingest`: synthetic and V4L2 frame sources
//! - `detect`: detector seam, resources and backends
//! - `processor`: confidence filter, NMS, distance, severity
//! - `alert`: cooldown arbitration and alert text
//! - `voice`: speech sinks and the voice worker
//! - `overlay` / `stream`: annotation, JPEG encoding, multipart framing
//! - `session`: lifecycle state machine and frame pipeline
//! - `api`: HTTP control surface
//! - `config`: file and environment configuration

pub mod alert;
pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod overlay;
pub mod processor;
pub mod session;
pub mod stream;
pub mod voice;

pub use alert::{AlertArbiter, AlertDecision, AlertTier, VoiceReadiness};
pub use api::{ApiConfig, ApiHandle, ApiServer};
pub use config::NearsightConfig;
pub use detect::{
    BoundingBox, ClassNames, Detector, DetectorFactory, DetectorResources, RawDetection,
    ScriptedDetector,
};
pub use error::SessionError;
pub use frame::{CaptureError, CaptureHandle, Frame, FrameSource};
pub use ingest::{SyntheticConfig, SyntheticSource};
pub use processor::{DetectionParams, DetectionProcessor, ProcessedDetection, Severity};
pub use session::{
    SessionController, SessionOptions, SessionParts, SessionState, SessionStatus, Termination,
};
pub use stream::FrameStream;
pub use voice::{CommandVoice, LogVoice, VoiceError, VoiceSink, VoiceWorker};
