use anyhow::Result;

use crate::detect::resources::DetectorResources;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

/// Object detector trait.
///
/// Detectors are black boxes: one frame in, raw detections out. Boxes are in
/// frame pixel coordinates and confidences in `[0, 1]`. Deduplication and
/// filtering happen downstream.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run inference on one frame.
    fn infer(&mut self, frame: &Frame) -> Result<Vec<RawDetection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Builds a detector for each new session from verified resource files.
pub trait DetectorFactory: Send + Sync {
    fn build(&self, resources: &DetectorResources) -> Result<Box<dyn Detector>>;
}

impl<F> DetectorFactory for F
where
    F: Fn(&DetectorResources) -> Result<Box<dyn Detector>> + Send + Sync,
{
    fn build(&self, resources: &DetectorResources) -> Result<Box<dyn Detector>> {
        self(resources)
    }
}
