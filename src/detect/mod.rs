mod backend;
pub mod backends;
mod resources;
mod result;

use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::{Detector, DetectorFactory};
pub use backends::ScriptedDetector;
pub use resources::{ClassNames, DetectorResources};
pub use result::{BoundingBox, RawDetection};

/// Build the detector factory named by `settings.backend`.
///
/// Resource files are verified by the session before the factory runs.
pub fn factory_from_config(settings: &DetectorSettings) -> Result<Arc<dyn DetectorFactory>> {
    match settings.backend.as_str() {
        "scripted" => {
            let script = settings.script_path.clone();
            Ok(Arc::new(
                move |_resources: &DetectorResources| -> Result<Box<dyn Detector>> {
                    let detector = match &script {
                        Some(path) => ScriptedDetector::from_file(path)?,
                        None => ScriptedDetector::default(),
                    };
                    Ok(Box::new(detector))
                },
            ))
        }
        #[cfg(feature = "backend-tract")]
        "tract" => Ok(Arc::new(
            |resources: &DetectorResources| -> Result<Box<dyn Detector>> {
                Ok(Box::new(backends::TractDetector::from_resources(resources)?))
            },
        )),
        #[cfg(not(feature = "backend-tract"))]
        "tract" => Err(anyhow!(
            "detector backend tract requires the backend-tract feature"
        )),
        other => Err(anyhow!("unknown detector backend '{}'", other)),
    }
}
