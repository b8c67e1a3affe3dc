//! Frame sources.
//!
//! This module provides the capture devices a detection session can open:
//! - Synthetic source (`synthetic` backend, testing and demos)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! Sources only acquire, read and release. They MUST NOT:
//! - Retain frames after handing them to the session
//! - Retry a failed device on their own
//! - Log raw frame content

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::CameraSettings;
use crate::frame::FrameSource;

pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Build the frame source named by `settings.backend`.
pub fn source_from_config(settings: &CameraSettings) -> Result<Arc<dyn FrameSource>> {
    match settings.backend.as_str() {
        "synthetic" => Ok(Arc::new(SyntheticSource::new(SyntheticConfig {
            width: settings.width,
            height: settings.height,
            target_fps: settings.target_fps,
            device_count: 1,
            frame_limit: settings.frame_limit,
        }))),
        #[cfg(feature = "ingest-v4l2")]
        "v4l2" => Ok(Arc::new(V4l2Source::new(V4l2Config {
            device_template: settings.device_template.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        }))),
        #[cfg(not(feature = "ingest-v4l2"))]
        "v4l2" => Err(anyhow!("camera backend v4l2 requires the ingest-v4l2 feature")),
        other => Err(anyhow!("unknown camera backend '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(backend: &str) -> CameraSettings {
        CameraSettings {
            backend: backend.to_string(),
            device_index: 0,
            device_template: "/dev/video{index}".to_string(),
            width: 64,
            height: 48,
            target_fps: 30,
            frame_limit: Some(2),
        }
    }

    #[test]
    fn builds_synthetic_source() -> Result<()> {
        let source = source_from_config(&settings("synthetic"))?;
        assert_eq!(source.name(), "synthetic");
        Ok(())
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(source_from_config(&settings("gopro")).is_err());
    }
}
