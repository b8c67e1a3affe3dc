use anyhow::{anyhow, Result};
use std::path::Path;

use crate::detect::backend::Detector;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Scripted backend. Replays a fixed per-frame detection list, cycling when the
/// script runs out. With an empty script every frame yields no detections.
///
/// Script files are JSON: an array of frames, each an array of raw detections
/// (`{"class_id": 0, "confidence": 0.9, "box": {"x":0,"y":0,"w":10,"h":100}}`).
#[derive(Clone, Debug, Default)]
pub struct ScriptedDetector {
    frames: Vec<Vec<RawDetection>>,
    cursor: usize,
}

impl ScriptedDetector {
    pub fn new(frames: Vec<Vec<RawDetection>>) -> Self {
        Self { frames, cursor: 0 }
    }

    /// Every frame yields the same detections.
    pub fn repeating(detections: Vec<RawDetection>) -> Self {
        Self::new(vec![detections])
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read detection script {}: {}", path.display(), e))?;
        let frames: Vec<Vec<RawDetection>> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detection script {}: {}", path.display(), e))?;
        Ok(Self::new(frames))
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn infer(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        let detections = self.frames[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.frames.len();
        Ok(detections)
    }
}
