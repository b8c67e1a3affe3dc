//! Captured frames and the capture-device seam.
//!
//! - `Frame`: owned RGB8 pixels plus dimensions and a capture sequence number.
//! - `FrameSource`: opens a capture device by index.
//! - `CaptureHandle`: reads frames from an opened device and releases it.
//!
//! The session controller is the only owner of a `CaptureHandle`. Sources hold no
//! logic beyond acquire/read/release.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::time::Instant;
use thiserror::Error;

use crate::error::SessionError;

/// A single RGB8 frame. Pixel bytes are row-major, 3 bytes per pixel.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic per-handle capture counter, starting at 1.
    pub sequence: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, sequence: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            sequence,
            captured_at: Instant::now(),
        })
    }

    /// Solid-color frame, handy for sources that have nothing better to show.
    pub fn filled(width: u32, height: u32, sequence: u64, rgb: [u8; 3]) -> Result<Self> {
        let pixel_count = (width as usize) * (height as usize);
        let data = rgb.iter().copied().cycle().take(pixel_count * 3).collect();
        Self::new(data, width, height, sequence)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Convert into an owned image for drawing. Consumes the frame.
    pub fn into_image(self) -> Result<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data)
            .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))
    }
}

/// Why a capture handle stopped producing frames.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("end of stream")]
    EndOfStream,
    #[error("capture device failed: {0}")]
    Device(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// An opened capture device.
pub trait CaptureHandle: Send {
    /// Block until the next frame is available.
    fn read(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device. Calling this more than once is harmless.
    fn release(&mut self);
}

/// Factory for capture handles.
pub trait FrameSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open the device at `device_index`. An absent or invalid device is a
    /// `SessionError::DeviceUnavailable`.
    fn open(&self, device_index: u32) -> Result<Box<dyn CaptureHandle>, SessionError>;
}
