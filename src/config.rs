use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::alert::DEFAULT_COOLDOWN_BASE;
use crate::detect::DetectorResources;
use crate::processor::DetectionParams;

const DEFAULT_API_ADDR: &str = "127.0.0.1:8800";
const DEFAULT_DEVICE_TEMPLATE: &str = "/dev/video{index}";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_DETECTOR_CONFIG: &str = "yolov3.cfg";
const DEFAULT_DETECTOR_WEIGHTS: &str = "yolov3.weights";
const DEFAULT_CLASS_NAMES: &str = "coco.names";
const DEFAULT_VOICE_COMMAND: &str = "espeak -s 150";
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_STREAM_QUEUE_DEPTH: usize = 2;

#[derive(Debug, Deserialize, Default)]
struct NearsightConfigFile {
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    detection: Option<DetectionConfigFile>,
    alerts: Option<AlertConfigFile>,
    voice: Option<VoiceConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    backend: Option<String>,
    device_index: Option<u32>,
    device_template: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    frame_limit: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    config_path: Option<PathBuf>,
    weights_path: Option<PathBuf>,
    classes_path: Option<PathBuf>,
    script_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    confidence_threshold: Option<f32>,
    nms_threshold: Option<f32>,
    reference_object_height: Option<f64>,
    focal_length: Option<f64>,
    min_distance: Option<f64>,
    important_classes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    cooldown_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VoiceConfigFile {
    enabled: Option<bool>,
    command: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    queue_depth: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct NearsightConfig {
    pub api_addr: String,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub detection: DetectionParams,
    pub cooldown_base: Duration,
    pub voice: VoiceSettings,
    pub stream: StreamSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    /// `synthetic` or `v4l2`.
    pub backend: String,
    pub device_index: u32,
    /// Device path with an `{index}` placeholder, v4l2 only.
    pub device_template: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Synthetic only: end the stream after this many frames.
    pub frame_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorSettings {
    /// `scripted` or `tract`.
    pub backend: String,
    pub config_path: PathBuf,
    pub weights_path: PathBuf,
    pub classes_path: PathBuf,
    /// JSON detection script for the scripted backend.
    pub script_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceSettings {
    /// Initial voice toggle for a fresh controller.
    pub enabled: bool,
    /// TTS command line; `None` logs alerts instead of speaking them.
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    pub jpeg_quality: u8,
    /// Encoded frames buffered for the streaming client before new ones are dropped.
    pub queue_depth: usize,
}

impl Default for NearsightConfig {
    fn default() -> Self {
        Self::from_file(NearsightConfigFile::default())
    }
}

impl NearsightConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("NEARSIGHT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn resources(&self) -> DetectorResources {
        DetectorResources {
            config_path: self.detector.config_path.clone(),
            weights_path: self.detector.weights_path.clone(),
            classes_path: self.detector.classes_path.clone(),
        }
    }

    fn from_file(file: NearsightConfigFile) -> Self {
        let api_addr = file
            .api
            .and_then(|api| api.addr)
            .unwrap_or_else(|| DEFAULT_API_ADDR.to_string());

        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            backend: camera_file
                .backend
                .unwrap_or_else(|| default_camera_backend().to_string()),
            device_index: camera_file.device_index.unwrap_or(0),
            device_template: camera_file
                .device_template
                .unwrap_or_else(|| DEFAULT_DEVICE_TEMPLATE.to_string()),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            frame_limit: camera_file.frame_limit,
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| default_detector_backend().to_string()),
            config_path: detector_file
                .config_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTOR_CONFIG)),
            weights_path: detector_file
                .weights_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DETECTOR_WEIGHTS)),
            classes_path: detector_file
                .classes_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASS_NAMES)),
            script_path: detector_file.script_path,
        };

        let defaults = DetectionParams::default();
        let detection_file = file.detection.unwrap_or_default();
        let detection = DetectionParams {
            confidence_threshold: detection_file
                .confidence_threshold
                .unwrap_or(defaults.confidence_threshold),
            nms_threshold: detection_file
                .nms_threshold
                .unwrap_or(defaults.nms_threshold),
            reference_object_height: detection_file
                .reference_object_height
                .unwrap_or(defaults.reference_object_height),
            focal_length: detection_file.focal_length.unwrap_or(defaults.focal_length),
            min_distance: detection_file.min_distance.unwrap_or(defaults.min_distance),
            important_classes: detection_file
                .important_classes
                .unwrap_or(defaults.important_classes),
        };

        let cooldown_base = file
            .alerts
            .and_then(|alerts| alerts.cooldown_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_COOLDOWN_BASE);

        let voice_file = file.voice.unwrap_or_default();
        let voice = VoiceSettings {
            enabled: voice_file.enabled.unwrap_or(true),
            command: match voice_file.command {
                Some(command) => parse_voice_command(&command),
                None => Some(DEFAULT_VOICE_COMMAND.to_string()),
            },
        };

        let stream_file = file.stream.unwrap_or_default();
        let stream = StreamSettings {
            jpeg_quality: stream_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            queue_depth: stream_file
                .queue_depth
                .unwrap_or(DEFAULT_STREAM_QUEUE_DEPTH),
        };

        Self {
            api_addr,
            camera,
            detector,
            detection,
            cooldown_base,
            voice,
            stream,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(addr) = env_string("NEARSIGHT_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(backend) = env_string("NEARSIGHT_CAMERA_BACKEND") {
            self.camera.backend = backend;
        }
        if let Some(index) = env_parse::<u32>("NEARSIGHT_CAMERA_INDEX", "a device index")? {
            self.camera.device_index = index;
        }
        if let Some(backend) = env_string("NEARSIGHT_DETECTOR_BACKEND") {
            self.detector.backend = backend;
        }
        if let Some(path) = env_string("NEARSIGHT_DETECTOR_CONFIG") {
            self.detector.config_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("NEARSIGHT_DETECTOR_WEIGHTS") {
            self.detector.weights_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("NEARSIGHT_DETECTOR_CLASSES") {
            self.detector.classes_path = PathBuf::from(path);
        }
        if let Some(path) = env_string("NEARSIGHT_DETECTOR_SCRIPT") {
            self.detector.script_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_parse::<f32>("NEARSIGHT_CONFIDENCE_THRESHOLD", "a number")? {
            self.detection.confidence_threshold = value;
        }
        if let Some(value) = env_parse::<f32>("NEARSIGHT_NMS_THRESHOLD", "a number")? {
            self.detection.nms_threshold = value;
        }
        if let Some(value) = env_parse::<f64>("NEARSIGHT_FOCAL_LENGTH", "a number")? {
            self.detection.focal_length = value;
        }
        if let Some(value) = env_parse::<f64>("NEARSIGHT_OBJECT_HEIGHT", "a number")? {
            self.detection.reference_object_height = value;
        }
        if let Some(value) = env_parse::<f64>("NEARSIGHT_MIN_DISTANCE", "a number")? {
            self.detection.min_distance = value;
        }
        if let Ok(classes) = std::env::var("NEARSIGHT_IMPORTANT_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.detection.important_classes = parsed;
            }
        }
        if let Some(ms) = env_parse::<u64>(
            "NEARSIGHT_COOLDOWN_MS",
            "an integer number of milliseconds",
        )? {
            self.cooldown_base = Duration::from_millis(ms);
        }
        if let Ok(command) = std::env::var("NEARSIGHT_VOICE_COMMAND") {
            self.voice.command = parse_voice_command(&command);
        }
        if let Some(enabled) = env_string("NEARSIGHT_VOICE_ENABLED") {
            self.voice.enabled = parse_bool(&enabled)
                .ok_or_else(|| anyhow!("NEARSIGHT_VOICE_ENABLED must be true or false"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        let detection = &self.detection;
        if !(0.0..=1.0).contains(&detection.confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&detection.nms_threshold) {
            return Err(anyhow!("nms threshold must be within [0, 1]"));
        }
        if !positive(detection.focal_length) {
            return Err(anyhow!("focal length must be greater than zero"));
        }
        if !positive(detection.reference_object_height) {
            return Err(anyhow!("reference object height must be greater than zero"));
        }
        if !(detection.min_distance == 0.0 || positive(detection.min_distance)) {
            return Err(anyhow!("minimum distance must not be negative"));
        }
        if self.cooldown_base.is_zero() {
            return Err(anyhow!("alert cooldown must be greater than zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera width and height must be greater than zero"));
        }
        if !(1..=100).contains(&self.stream.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be within 1..=100"));
        }
        if self.stream.queue_depth == 0 {
            return Err(anyhow!("stream queue depth must be greater than zero"));
        }
        self.camera.backend = self.camera.backend.trim().to_lowercase();
        self.detector.backend = self.detector.backend.trim().to_lowercase();
        Ok(())
    }
}

fn positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn default_camera_backend() -> &'static str {
    if cfg!(feature = "ingest-v4l2") {
        "v4l2"
    } else {
        "synthetic"
    }
}

fn default_detector_backend() -> &'static str {
    if cfg!(feature = "backend-tract") {
        "tract"
    } else {
        "scripted"
    }
}

fn read_config_file(path: &Path) -> Result<NearsightConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw).map_err(|e| anyhow!("invalid config {}: {}", path.display(), e))
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str, expected: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be {}", key, expected)),
        None => Ok(None),
    }
}

/// Empty or `log` means "log alerts instead of speaking".
fn parse_voice_command(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("log") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_setup() {
        let cfg = NearsightConfig::default();
        assert_eq!(cfg.api_addr, "127.0.0.1:8800");
        assert_eq!(cfg.detector.config_path, PathBuf::from("yolov3.cfg"));
        assert_eq!(cfg.detector.classes_path, PathBuf::from("coco.names"));
        assert_eq!(cfg.detection, DetectionParams::default());
        assert_eq!(cfg.cooldown_base, Duration::from_secs(2));
        assert_eq!(cfg.voice.command.as_deref(), Some("espeak -s 150"));
        assert!(cfg.voice.enabled);
        assert_eq!(cfg.stream.jpeg_quality, 80);
    }

    #[test]
    fn voice_command_parsing() {
        assert_eq!(parse_voice_command("  say -r 180 "), Some("say -r 180".to_string()));
        assert_eq!(parse_voice_command(""), None);
        assert_eq!(parse_voice_command("LOG"), None);
    }

    #[test]
    fn csv_and_bool_helpers() {
        assert_eq!(split_csv(" person, ,dog "), vec!["person", "dog"]);
        assert_eq!(parse_bool("Off"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut cfg = NearsightConfig::default();
        cfg.detection.nms_threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = NearsightConfig::default();
        cfg.detection.focal_length = f64::NAN;
        assert!(cfg.validate().is_err());

        let mut cfg = NearsightConfig::default();
        cfg.stream.jpeg_quality = 0;
        assert!(cfg.validate().is_err());
    }
}
