//! MJPEG streaming over `multipart/x-mixed-replace`.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};
use std::sync::mpsc::Receiver;

pub const BOUNDARY: &str = "frame";
pub const CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::Rgb8,
        )
        .context("failed to encode frame as JPEG")?;
    Ok(jpeg)
}

/// One multipart chunk: boundary line, part header, JPEG bytes, CRLF.
pub fn frame_part(jpeg: &[u8]) -> Vec<u8> {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    part
}

/// Lazy sequence of multipart chunks for one session.
///
/// Ends when the session stops or its source is exhausted. Dropping the stream
/// tells the session the client went away.
pub struct FrameStream {
    rx: Receiver<Vec<u8>>,
}

impl FrameStream {
    pub(crate) fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self { rx }
    }
}

impl Iterator for FrameStream {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}
