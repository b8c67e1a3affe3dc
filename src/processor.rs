//! Detection post-processing.
//!
//! Turns one frame's raw detections into `ProcessedDetection`s:
//! 1. drop detections at or below the confidence threshold,
//! 2. greedy non-max suppression (confidence descending, ties keep input order),
//! 3. monocular distance estimate from the box height,
//! 4. severity classification against `min_distance` and the important classes.

use serde::{Deserialize, Serialize};

use crate::detect::{BoundingBox, ClassNames, RawDetection};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
pub const DEFAULT_REFERENCE_OBJECT_HEIGHT_M: f64 = 0.5;
pub const DEFAULT_FOCAL_LENGTH_PX: f64 = 1000.0;
pub const DEFAULT_MIN_DISTANCE_M: f64 = 2.0;
pub const DEFAULT_IMPORTANT_CLASSES: [&str; 5] = ["person", "car", "bicycle", "dog", "cat"];

#[derive(Clone, Debug, PartialEq)]
pub struct DetectionParams {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    /// Real-world height of the reference object, meters.
    pub reference_object_height: f64,
    /// Calibrated focal length, pixels.
    pub focal_length: f64,
    /// Objects strictly closer than this are warnings, meters.
    pub min_distance: f64,
    pub important_classes: Vec<String>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
            reference_object_height: DEFAULT_REFERENCE_OBJECT_HEIGHT_M,
            focal_length: DEFAULT_FOCAL_LENGTH_PX,
            min_distance: DEFAULT_MIN_DISTANCE_M,
            important_classes: DEFAULT_IMPORTANT_CLASSES
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Informational,
    Suppressed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedDetection {
    pub raw: RawDetection,
    pub label: String,
    /// `None` when the box has no height.
    pub distance_m: Option<f64>,
    pub severity: Severity,
    /// Box clipped to the frame, `None` if it lies entirely outside.
    pub display_box: Option<BoundingBox>,
}

/// `reference_height * focal_length / h` rounded to two decimals, half to even.
/// `None` for `h == 0`.
pub fn estimate_distance(box_height: u32, reference_height: f64, focal_length: f64) -> Option<f64> {
    if box_height == 0 {
        return None;
    }
    let distance = reference_height * focal_length / f64::from(box_height);
    Some((distance * 100.0).round_ties_even() / 100.0)
}

/// Greedy NMS over `detections`, returning kept input indices in keep order.
pub fn non_max_suppression(detections: &[RawDetection], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..detections.len()).collect();
    // `sort_by` is stable, so equal confidences keep their input order.
    order.sort_by(|&a, &b| {
        detections[b]
            .confidence
            .total_cmp(&detections[a].confidence)
    });

    let mut kept: Vec<usize> = Vec::new();
    for idx in order {
        let bbox = &detections[idx].bbox;
        if kept
            .iter()
            .all(|&k| detections[k].bbox.iou(bbox) <= iou_threshold)
        {
            kept.push(idx);
        }
    }
    kept
}

pub struct DetectionProcessor {
    params: DetectionParams,
    classes: ClassNames,
}

impl DetectionProcessor {
    pub fn new(params: DetectionParams, classes: ClassNames) -> Self {
        Self { params, classes }
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    pub fn process(
        &self,
        raw: &[RawDetection],
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<ProcessedDetection> {
        let confident: Vec<RawDetection> = raw
            .iter()
            .filter(|det| det.confidence > self.params.confidence_threshold)
            .copied()
            .collect();

        non_max_suppression(&confident, self.params.nms_threshold)
            .into_iter()
            .map(|idx| self.classify(confident[idx], frame_width, frame_height))
            .collect()
    }

    fn classify(&self, raw: RawDetection, frame_width: u32, frame_height: u32) -> ProcessedDetection {
        let label = self.classes.label(raw.class_id);
        let distance_m = estimate_distance(
            raw.bbox.h,
            self.params.reference_object_height,
            self.params.focal_length,
        );
        let severity = match distance_m {
            None => Severity::Suppressed,
            Some(d) if d < self.params.min_distance => Severity::Warning,
            Some(_) if self.params.important_classes.iter().any(|c| *c == label) => {
                Severity::Informational
            }
            Some(_) => Severity::Suppressed,
        };
        ProcessedDetection {
            raw,
            label,
            distance_m,
            severity,
            display_box: raw.bbox.clipped(frame_width, frame_height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coco() -> ClassNames {
        ClassNames::from_names(["person", "bicycle", "car", "motorbike", "chair"])
    }

    fn processor() -> DetectionProcessor {
        DetectionProcessor::new(DetectionParams::default(), coco())
    }

    fn det(class_id: usize, confidence: f32, x: i32, h: u32) -> RawDetection {
        RawDetection::new(class_id, confidence, BoundingBox::new(x, 10, 40, h))
    }

    #[test]
    fn low_confidence_is_dropped_before_dedup() {
        // The 0.5 box would suppress nothing anyway, but it must not survive.
        let out = processor().process(&[det(0, 0.5, 0, 100), det(0, 0.49, 200, 100)], 640, 480);
        assert!(out.is_empty());

        // A low-confidence box overlapping a kept one must not affect the result.
        let out = processor().process(&[det(0, 0.3, 0, 100), det(2, 0.8, 5, 100)], 640, 480);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "car");
    }

    #[test]
    fn nms_keeps_highest_confidence_per_cluster() {
        let detections = [
            det(0, 0.7, 0, 100),
            det(0, 0.9, 2, 100),
            det(2, 0.8, 300, 100),
        ];
        let kept = non_max_suppression(&detections, 0.4);
        assert_eq!(kept, vec![1, 2]);
    }

    #[test]
    fn nms_ties_keep_input_order() {
        let detections = [
            det(0, 0.8, 0, 100),
            det(1, 0.8, 300, 100),
            det(2, 0.8, 2, 100),
        ];
        assert_eq!(non_max_suppression(&detections, 0.4), vec![0, 1]);
    }

    #[test]
    fn kept_boxes_never_overlap_beyond_threshold() {
        let detections: Vec<RawDetection> = (0..20)
            .map(|i| det(0, 0.51 + i as f32 * 0.02, i * 7, 100))
            .collect();
        let kept = non_max_suppression(&detections, 0.4);
        for (n, &a) in kept.iter().enumerate() {
            for &b in &kept[n + 1..] {
                assert!(detections[a].bbox.iou(&detections[b].bbox) <= 0.4);
            }
        }
    }

    #[test]
    fn distance_formula_and_zero_height() {
        assert_eq!(estimate_distance(100, 0.5, 1000.0), Some(5.0));
        assert_eq!(estimate_distance(250, 0.5, 1000.0), Some(2.0));
        assert_eq!(estimate_distance(260, 0.5, 1000.0), Some(1.92));
        assert_eq!(estimate_distance(3, 0.5, 1000.0), Some(166.67));
        assert_eq!(estimate_distance(160, 0.5, 1000.0), Some(3.12));
        assert_eq!(estimate_distance(32, 0.5, 1000.0), Some(15.62));
        assert_eq!(estimate_distance(800, 0.5, 1000.0), Some(0.62));
        assert_eq!(estimate_distance(0, 0.5, 1000.0), None);
    }

    #[test]
    fn person_at_five_meters_is_informational() {
        let out = processor().process(&[det(0, 0.9, 0, 100)], 640, 480);
        assert_eq!(out[0].distance_m, Some(5.0));
        assert_eq!(out[0].severity, Severity::Informational);
    }

    #[test]
    fn exactly_min_distance_is_not_a_warning() {
        let out = processor().process(&[det(0, 0.9, 0, 250)], 640, 480);
        assert_eq!(out[0].distance_m, Some(2.0));
        assert_eq!(out[0].severity, Severity::Informational);

        let out = processor().process(&[det(4, 0.9, 0, 250)], 640, 480);
        assert_eq!(out[0].severity, Severity::Suppressed);
    }

    #[test]
    fn closer_than_min_distance_is_a_warning() {
        // Chairs are not important, but proximity wins.
        let out = processor().process(&[det(4, 0.9, 0, 260)], 640, 480);
        assert_eq!(out[0].distance_m, Some(1.92));
        assert_eq!(out[0].severity, Severity::Warning);
    }

    #[test]
    fn zero_height_box_is_suppressed_but_kept() {
        let out = processor().process(&[det(0, 0.9, 0, 0)], 640, 480);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].distance_m, None);
        assert_eq!(out[0].severity, Severity::Suppressed);
    }

    #[test]
    fn output_follows_confidence_order() {
        let out = processor().process(&[det(2, 0.6, 0, 100), det(0, 0.95, 300, 100)], 640, 480);
        let labels: Vec<&str> = out.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["person", "car"]);
    }
}
