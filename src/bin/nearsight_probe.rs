//! nearsight_probe - run one synthetic detection session end to end
//!
//! Drives the real session pipeline with a synthetic camera and a scripted
//! detector, consumes the MJPEG stream until the source runs out, and prints
//! the final session status. Alerts go to the log instead of a speaker.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use nearsight::{
    BoundingBox, Detector, DetectorResources, LogVoice, RawDetection, ScriptedDetector,
    SessionController, SessionOptions, SessionParts, SyntheticConfig, SyntheticSource,
};

const PROBE_CLASSES: &str = "person\nbicycle\ncar\nmotorbike\naeroplane\nbus\ntrain\ntruck\nboat\ntraffic light\nfire hydrant\nstop sign\nparking meter\nbench\nbird\ncat\ndog\n";

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration in seconds of synthetic video.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Frames per second for the synthetic source.
    #[arg(long, default_value_t = 10)]
    fps: u32,
    /// JSON detection script (array of per-frame detection arrays).
    #[arg(long)]
    script: Option<PathBuf>,
    /// Class names file, one per line.
    #[arg(long)]
    classes: Option<PathBuf>,
    /// Write the last streamed frame here as JPEG.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Start with voice alerts disabled.
    #[arg(long)]
    mute: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if args.seconds == 0 {
        return Err(anyhow!("seconds must be >= 1"));
    }

    let work_dir = std::env::temp_dir().join(format!("nearsight-probe-{}", std::process::id()));
    fs::create_dir_all(&work_dir)
        .with_context(|| format!("failed to create {}", work_dir.display()))?;
    let result = run(&args, &work_dir);
    if let Err(err) = fs::remove_dir_all(&work_dir) {
        log::warn!("failed to remove {}: {}", work_dir.display(), err);
    }
    result
}

fn run(args: &Args, work_dir: &Path) -> Result<()> {
    let resources = probe_resources(args, work_dir)?;
    let detector = match &args.script {
        Some(path) => ScriptedDetector::from_file(path)?,
        None => approaching_pedestrian(),
    };
    let detector = Arc::new(Mutex::new(Some(detector)));
    let factory = move |_: &DetectorResources| -> Result<Box<dyn Detector>> {
        let detector = detector
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?
            .take()
            .ok_or_else(|| anyhow!("probe runs a single session"))?;
        Ok(Box::new(detector))
    };

    let source = SyntheticSource::new(SyntheticConfig {
        target_fps: args.fps,
        frame_limit: Some(args.seconds * u64::from(args.fps)),
        ..SyntheticConfig::default()
    });
    let controller = SessionController::new(
        SessionParts {
            source: Arc::new(source),
            detector: Arc::new(factory),
            resources,
            voice: Box::new(LogVoice),
        },
        SessionOptions {
            voice_enabled: !args.mute,
            ..SessionOptions::default()
        },
    )?;

    controller.start()?;
    let stream = controller.stream()?;
    let mut chunks = 0u64;
    let mut bytes = 0usize;
    let mut last = None;
    for chunk in stream {
        chunks += 1;
        bytes += chunk.len();
        last = Some(chunk);
    }
    controller.stop();

    if let (Some(path), Some(chunk)) = (&args.out, &last) {
        let jpeg = jpeg_payload(chunk).ok_or_else(|| anyhow!("malformed stream chunk"))?;
        fs::write(path, jpeg).with_context(|| format!("failed to write {}", path.display()))?;
        println!("last frame written to {}", path.display());
    }

    println!("streamed {} chunks ({} bytes)", chunks, bytes);
    println!("{}", serde_json::to_string_pretty(&controller.status())?);
    Ok(())
}

/// Detector files are not read by the scripted backend, but the session
/// still requires them to exist.
fn probe_resources(args: &Args, work_dir: &Path) -> Result<DetectorResources> {
    let config_path = work_dir.join("probe.cfg");
    let weights_path = work_dir.join("probe.weights");
    fs::write(&config_path, "{}\n")?;
    fs::write(&weights_path, b"")?;
    let classes_path = match &args.classes {
        Some(path) => path.clone(),
        None => {
            let path = work_dir.join("probe.names");
            fs::write(&path, PROBE_CLASSES)?;
            path
        }
    };
    Ok(DetectorResources {
        config_path,
        weights_path,
        classes_path,
    })
}

/// A person walking toward the camera past a parked car.
fn approaching_pedestrian() -> ScriptedDetector {
    let car = RawDetection::new(2, 0.82, BoundingBox::new(420, 260, 160, 120));
    let frames = [80u32, 100, 130, 160, 200, 240, 260, 300, 340]
        .iter()
        .map(|&h| {
            let person = RawDetection::new(0, 0.9, BoundingBox::new(200, 400 - h as i32, h / 3, h));
            vec![person, car]
        })
        .collect();
    ScriptedDetector::new(frames)
}

fn jpeg_payload(chunk: &[u8]) -> Option<&[u8]> {
    let start = chunk.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let end = chunk.len().checked_sub(2)?;
    chunk.get(start..end)
}
