//! Synthetic frame source.
//!
//! Produces a drifting gradient at a fixed pace. Used by tests, the probe tool,
//! and deployments without a camera. Optionally ends after `frame_limit` frames
//! to exercise end-of-stream handling.

use rand::Rng;
use std::time::{Duration, Instant};

use crate::error::SessionError;
use crate::frame::{CaptureError, CaptureHandle, Frame, FrameSource};

/// Configuration for the synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Frames per second. Reads block to hold this pace.
    pub target_fps: u32,
    /// Number of valid device indices (`0..device_count`).
    pub device_count: u32,
    /// Report end-of-stream after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 10,
            device_count: 1,
            frame_limit: None,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn open(&self, device_index: u32) -> Result<Box<dyn CaptureHandle>, SessionError> {
        if device_index >= self.config.device_count {
            return Err(SessionError::DeviceUnavailable {
                index: device_index,
                reason: format!(
                    "synthetic source exposes {} device(s)",
                    self.config.device_count
                ),
            });
        }
        log::info!(
            "SyntheticSource: opened device {} ({}x{} @ {} fps)",
            device_index,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        Ok(Box::new(SyntheticCapture {
            config: self.config.clone(),
            device_index,
            frame_count: 0,
            scene_state: 0,
            last_frame_at: None,
            released: false,
        }))
    }
}

struct SyntheticCapture {
    config: SyntheticConfig,
    device_index: u32,
    frame_count: u64,
    /// Drift offset, bumped every 50 frames.
    scene_state: u8,
    last_frame_at: Option<Instant>,
    released: bool,
}

impl SyntheticCapture {
    fn frame_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.config.target_fps.max(1)))
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.config.width as usize;
        let pixel_count = width * self.config.height as usize;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let noise: u8 = rand::thread_rng().gen_range(0..8);
        let offset = self.frame_count as usize + self.scene_state as usize;
        let mut pixels = vec![0u8; pixel_count * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + offset) % 256) as u8;
            px[1] = ((y + offset) % 256) as u8;
            px[2] = noise.wrapping_mul(16);
        }
        pixels
    }
}

impl CaptureHandle for SyntheticCapture {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        if self.released {
            return Err(CaptureError::Device(format!(
                "synthetic device {} already released",
                self.device_index
            )));
        }
        if self
            .config
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Err(CaptureError::EndOfStream);
        }

        if let Some(last) = self.last_frame_at {
            let interval = self.frame_interval();
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        let pixels = self.generate_pixels();
        Ok(Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )?)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            log::info!(
                "SyntheticSource: released device {} after {} frames",
                self.device_index,
                self.frame_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> SyntheticConfig {
        SyntheticConfig {
            width: 32,
            height: 24,
            target_fps: 200,
            device_count: 1,
            frame_limit: Some(3),
        }
    }

    #[test]
    fn synthetic_source_produces_frames_then_ends() {
        let source = SyntheticSource::new(stub_config());
        let mut handle = source.open(0).expect("open device 0");

        for expected in 1..=3 {
            let frame = handle.read().expect("frame");
            assert_eq!(frame.sequence, expected);
            assert_eq!(frame.width, 32);
            assert_eq!(frame.height, 24);
        }
        assert!(matches!(handle.read(), Err(CaptureError::EndOfStream)));
    }

    #[test]
    fn synthetic_source_rejects_invalid_index() {
        let source = SyntheticSource::new(stub_config());
        assert!(matches!(
            source.open(1),
            Err(SessionError::DeviceUnavailable { index: 1, .. })
        ));
    }

    #[test]
    fn released_handle_refuses_reads() {
        let source = SyntheticSource::new(stub_config());
        let mut handle = source.open(0).expect("open device 0");
        handle.release();
        handle.release();
        assert!(matches!(handle.read(), Err(CaptureError::Device(_))));
    }
}
