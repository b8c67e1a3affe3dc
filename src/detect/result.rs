use serde::{Deserialize, Serialize};

/// Axis-aligned box in frame pixel coordinates. `x`/`y` is the top-left corner
/// and may be negative when a detection hangs off the frame edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn area(&self) -> f32 {
        self.w as f32 * self.h as f32
    }

    /// Intersection-over-union with another box. Zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x.max(other.x) as i64;
        let iy1 = self.y.max(other.y) as i64;
        let ix2 = (self.x as i64 + self.w as i64).min(other.x as i64 + other.w as i64);
        let iy2 = (self.y as i64 + self.h as i64).min(other.y as i64 + other.h as i64);
        let inter = ((ix2 - ix1).max(0) * (iy2 - iy1).max(0)) as f32;
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Clip to a `width` x `height` frame. Returns `None` when the box lies
    /// outside the frame. Zero-width or zero-height boxes inside the frame are
    /// kept as lines.
    pub fn clipped(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let x1 = (self.x as i64).clamp(0, width as i64);
        let y1 = (self.y as i64).clamp(0, height as i64);
        let x2 = (self.x as i64 + self.w as i64).clamp(0, width as i64);
        let y2 = (self.y as i64 + self.h as i64).clamp(0, height as i64);
        let visible_x2 = (self.x as i64 + self.w.max(1) as i64).clamp(0, width as i64);
        let visible_y2 = (self.y as i64 + self.h.max(1) as i64).clamp(0, height as i64);
        if visible_x2 <= x1 || visible_y2 <= y1 {
            return None;
        }
        Some(BoundingBox {
            x: x1 as i32,
            y: y1 as i32,
            w: (x2 - x1) as u32,
            h: (y2 - y1) as u32,
        })
    }
}

/// Detector output for one object, before filtering and deduplication.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: usize,
    /// In `[0, 1]`.
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(class_id: usize, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(10, 10, 20, 20);
        assert!((a.iou(&a) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 10, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 10, 10);
        // 50 / (100 + 100 - 50)
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn iou_with_empty_box_is_zero() {
        let a = BoundingBox::new(0, 0, 10, 0);
        let b = BoundingBox::new(0, 0, 10, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn clipping_trims_to_frame() {
        let b = BoundingBox::new(-5, 90, 20, 20);
        assert_eq!(b.clipped(100, 100), Some(BoundingBox::new(0, 90, 15, 10)));
        assert_eq!(BoundingBox::new(200, 0, 5, 5).clipped(100, 100), None);
    }

    #[test]
    fn clipping_keeps_flat_boxes_inside_frame() {
        assert_eq!(
            BoundingBox::new(10, 30, 20, 0).clipped(64, 48),
            Some(BoundingBox::new(10, 30, 20, 0))
        );
        assert_eq!(BoundingBox::new(-30, 30, 20, 0).clipped(64, 48), None);
        assert_eq!(BoundingBox::new(10, 48, 20, 0).clipped(64, 48), None);
        assert_eq!(BoundingBox::new(10, -1, 20, 0).clipped(64, 48), None);
    }

    #[test]
    fn raw_detection_uses_box_key_in_json() {
        let det: RawDetection = serde_json::from_str(
            r#"{"class_id":0,"confidence":0.9,"box":{"x":1,"y":2,"w":3,"h":4}}"#,
        )
        .unwrap();
        assert_eq!(det.bbox, BoundingBox::new(1, 2, 3, 4));
    }
}
