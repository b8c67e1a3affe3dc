//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing from local V4L2 devices
//! (`/dev/video{index}`). Frames are captured in-memory via mmap streaming and
//! normalized to RGB8 before they leave the handle.

use anyhow::{Context, Result};
use ouroboros::self_referencing;
use std::path::Path;

use super::normalize::{normalize_to_rgb, PixelFormat};
use crate::error::SessionError;
use crate::frame::{CaptureError, CaptureHandle, Frame, FrameSource};

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path with an `{index}` placeholder (e.g., "/dev/video{index}").
    pub device_template: String,
    /// Requested frame rate.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device_template: "/dev/video{index}".to_string(),
            target_fps: 10,
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Source {
    config: V4l2Config,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self { config }
    }

    fn device_path(&self, index: u32) -> String {
        self.config
            .device_template
            .replace("{index}", &index.to_string())
    }
}

impl FrameSource for V4l2Source {
    fn name(&self) -> &'static str {
        "v4l2"
    }

    fn open(&self, device_index: u32) -> Result<Box<dyn CaptureHandle>, SessionError> {
        let path = self.device_path(device_index);
        if !Path::new(&path).exists() {
            return Err(SessionError::DeviceUnavailable {
                index: device_index,
                reason: format!("{} does not exist", path),
            });
        }
        let capture = DeviceCapture::connect(&self.config, &path).map_err(|err| {
            SessionError::DeviceUnavailable {
                index: device_index,
                reason: format!("{:#}", err),
            }
        })?;
        Ok(Box::new(capture))
    }
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

struct DeviceCapture {
    path: String,
    state: Option<DeviceState>,
    format: PixelFormat,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl DeviceCapture {
    fn connect(config: &V4l2Config, path: &str) -> Result<Self> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device =
            v4l::Device::with_path(path).with_context(|| format!("open v4l2 device {}", path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = config.width;
        format.height = config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set RGB3 on {}: {}", path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        let pixel_format = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelFormat::Rgb24
        } else if format.fourcc == v4l::FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else {
            anyhow::bail!("unsupported v4l2 pixel format {}", format.fourcc);
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            path,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            path: path.to_string(),
            state: Some(state),
            format: pixel_format,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl CaptureHandle for DeviceCapture {
    fn read(&mut self) -> Result<Frame, CaptureError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| CaptureError::Device(format!("{} already released", self.path)))?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .map_err(|err| CaptureError::Device(format!("capture {}: {}", self.path, err)))?;
        let rgb = normalize_to_rgb(buf, self.width, self.height, self.format)?;

        self.frame_count += 1;
        Ok(Frame::new(rgb, self.width, self.height, self.frame_count)?)
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!(
                "V4l2Source: released {} after {} frames",
                self.path,
                self.frame_count
            );
        }
    }
}
