//! Frame annotation: boxes, distance labels, warnings and a voice-off banner.
//!
//! Text uses a built-in 5x7 bitmap font (upper-case letters, digits and a few
//! symbols); lower-case input is rendered upper-case.

use anyhow::Result;
use image::{Rgb, RgbImage};

use crate::frame::Frame;
use crate::processor::{ProcessedDetection, Severity};

const WARNING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const BANNER_COLOR: Rgb<u8> = Rgb([255, 200, 0]);
const BOX_THICKNESS: i32 = 2;
const GLYPH_WIDTH: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

/// Draw overlays for every processed detection onto `frame`.
pub fn annotate(
    frame: Frame,
    detections: &[ProcessedDetection],
    voice_enabled: bool,
) -> Result<RgbImage> {
    let mut image = frame.into_image()?;

    for det in detections {
        let Some(bbox) = det.display_box else {
            continue;
        };
        let warning = det.severity == Severity::Warning;
        let color = if warning {
            WARNING_COLOR
        } else {
            class_color(det.raw.class_id)
        };
        draw_box(
            &mut image,
            bbox.x,
            bbox.y,
            bbox.x + bbox.w.max(1) as i32 - 1,
            bbox.y + bbox.h.max(1) as i32 - 1,
            color,
        );
        let text = label_text(det);
        let label_y = (bbox.y - GLYPH_HEIGHT - 3).max(0);
        fill_rect(
            &mut image,
            bbox.x,
            label_y,
            bbox.x + text_width(&text),
            label_y + GLYPH_HEIGHT + 1,
            TEXT_BACKGROUND,
        );
        draw_text(&mut image, bbox.x + 1, label_y + 1, &text, color);
    }

    if !voice_enabled {
        let text = "VOICE OFF";
        let y = image.height() as i32 - GLYPH_HEIGHT - 4;
        fill_rect(&mut image, 2, y - 1, 4 + text_width(text), y + GLYPH_HEIGHT, TEXT_BACKGROUND);
        draw_text(&mut image, 4, y, text, BANNER_COLOR);
    }

    Ok(image)
}

/// Overlay caption for a detection.
pub fn label_text(det: &ProcessedDetection) -> String {
    match det.distance_m {
        Some(distance) if det.severity == Severity::Warning => {
            format!("WARNING: {}: {:.2}m", det.label, distance)
        }
        Some(distance) => format!("{}: {:.2}m", det.label, distance),
        None => det.label.clone(),
    }
}

fn class_color(class_id: usize) -> Rgb<u8> {
    let h = (class_id as u32).wrapping_add(1).wrapping_mul(2_654_435_761);
    // Keep channels bright enough to read on dark scenes, and away from pure red.
    Rgb([
        ((h >> 24) as u8 & 0x7f) | 0x40,
        ((h >> 16) as u8) | 0x60,
        ((h >> 8) as u8) | 0x60,
    ])
}

fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_WIDTH + 1
}

fn put_pixel(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_box(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    for t in 0..BOX_THICKNESS {
        for x in left..=right {
            put_pixel(image, x, top + t, color);
            put_pixel(image, x, bottom - t, color);
        }
        for y in top..=bottom {
            put_pixel(image, left + t, y, color);
            put_pixel(image, right - t, y, color);
        }
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    for y in top..=bottom {
        for x in left..=right {
            put_pixel(image, x, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, color: Rgb<u8>) {
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(rows) = glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..5 {
                    if (bits >> (4 - col)) & 1 == 1 {
                        put_pixel(image, x + col, y + row as i32, color);
                    }
                }
            }
        }
        x += GLYPH_WIDTH;
    }
}

#[rustfmt::skip]
fn glyph(ch: char) -> Option<[u8; 7]> {
    let rows = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '!' => [0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00000, 0b00100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, RawDetection};

    fn detection(severity: Severity, distance: Option<f64>, bbox: BoundingBox) -> ProcessedDetection {
        ProcessedDetection {
            raw: RawDetection::new(0, 0.9, bbox),
            label: "person".to_string(),
            distance_m: distance,
            severity,
            display_box: bbox.clipped(64, 48),
        }
    }

    #[test]
    fn warning_box_is_drawn_in_red() -> Result<()> {
        let frame = Frame::filled(64, 48, 1, [0, 0, 0])?;
        let bbox = BoundingBox::new(10, 20, 20, 20);
        let image = annotate(frame, &[detection(Severity::Warning, Some(1.5), bbox)], true)?;
        assert_eq!(image.dimensions(), (64, 48));
        assert_eq!(image.get_pixel(10, 30), &WARNING_COLOR);
        assert_eq!(image.get_pixel(29, 39), &WARNING_COLOR);
        // Interior untouched.
        assert_eq!(image.get_pixel(20, 30).0, [0, 0, 0]);
        Ok(())
    }

    #[test]
    fn off_frame_detection_is_skipped() -> Result<()> {
        let frame = Frame::filled(64, 48, 1, [0, 0, 0])?;
        let bbox = BoundingBox::new(500, 500, 20, 20);
        let image = annotate(frame, &[detection(Severity::Informational, Some(5.0), bbox)], true)?;
        assert!(image.pixels().all(|p| p.0 == [0, 0, 0]));
        Ok(())
    }

    #[test]
    fn zero_height_detection_is_drawn() -> Result<()> {
        let frame = Frame::filled(64, 48, 1, [0, 0, 0])?;
        let bbox = BoundingBox::new(10, 30, 20, 0);
        let det = detection(Severity::Suppressed, None, bbox);
        assert!(det.display_box.is_some());
        let image = annotate(frame, &[det], true)?;
        let line = class_color(0);
        assert_eq!(image.get_pixel(10, 30), &line);
        assert_eq!(image.get_pixel(29, 30), &line);
        // Plain label above the line.
        assert!(image
            .enumerate_pixels()
            .any(|(_, y, p)| y < 30 && *p == line));
        Ok(())
    }

    #[test]
    fn voice_off_banner_is_drawn() -> Result<()> {
        let frame = Frame::filled(64, 48, 1, [0, 0, 0])?;
        let image = annotate(frame, &[], false)?;
        assert!(image.pixels().any(|p| *p == BANNER_COLOR));
        Ok(())
    }

    #[test]
    fn label_text_variants() {
        let bbox = BoundingBox::new(0, 0, 10, 10);
        assert_eq!(
            label_text(&detection(Severity::Warning, Some(1.92), bbox)),
            "WARNING: person: 1.92m"
        );
        assert_eq!(
            label_text(&detection(Severity::Informational, Some(5.0), bbox)),
            "person: 5.00m"
        );
        assert_eq!(label_text(&detection(Severity::Suppressed, None, bbox)), "person");
    }

    #[test]
    fn font_covers_alert_vocabulary() {
        for ch in "WARNING: PERSON: 1.92M VOICE OFF".chars() {
            assert!(glyph(ch).is_some(), "missing glyph {:?}", ch);
        }
    }
}
