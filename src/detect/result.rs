use serde::Deserialize;

use crate::frame::BoundingBox;

/// One detected object in frame pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    /// Objectness score in (0, 1].
    pub confidence: f32,
}

/// Filtering thresholds applied before and during suppression.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    /// Minimum objectness for a candidate row.
    pub confidence: f32,
    /// Minimum best-class score for a candidate row.
    pub class_score: f32,
    /// Score threshold inside non-max suppression.
    pub nms_score: f32,
    /// IoU above which a lower-scored box is suppressed.
    pub nms_iou: f32,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            confidence: 0.4,
            class_score: 0.2,
            nms_score: 0.5,
            nms_iou: 0.5,
        }
    }
}

/// First detection carrying `label`, in the order the detector produced them.
///
/// Confidence and box size play no part in the choice.
pub fn select_target<'a>(detections: &'a [Detection], label: &str) -> Option<&'a Detection> {
    detections.iter().find(|d| d.label == label)
}
