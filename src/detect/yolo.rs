//! YOLOv5-style output decoding.
//!
//! The raw model output is a `[rows, 5 + classes]` matrix per image:
//! `cx, cy, w, h, objectness, class scores...`, with box coordinates in the
//! model's square input space.

use crate::detect::nms::non_max_suppression;
use crate::detect::result::{Detection, DetectionThresholds};
use crate::frame::BoundingBox;

/// Row that survived the objectness and class-score filters.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub bbox: BoundingBox,
    pub class_id: usize,
    /// Objectness of the row (used as the suppression score).
    pub confidence: f32,
}

/// Decode raw output rows into frame-space candidates.
///
/// A row is kept when objectness is above `thresholds.confidence` and its best
/// class score is above `thresholds.class_score`. The first maximum wins when
/// class scores tie. Coordinates are scaled and truncated toward zero.
pub fn decode_yolo_rows(
    output: &[f32],
    row_len: usize,
    thresholds: &DetectionThresholds,
    x_scale: f32,
    y_scale: f32,
) -> Vec<Candidate> {
    if row_len < 6 {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for row in output.chunks_exact(row_len) {
        let objectness = row[4];
        if objectness <= thresholds.confidence {
            continue;
        }

        let class_scores = &row[5..];
        let mut class_id = 0;
        for (i, score) in class_scores.iter().enumerate() {
            if *score > class_scores[class_id] {
                class_id = i;
            }
        }
        if class_scores[class_id] <= thresholds.class_score {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let bbox = BoundingBox::new(
            ((cx - w / 2.0) * x_scale) as i32,
            ((cy - h / 2.0) * y_scale) as i32,
            (w * x_scale) as i32,
            (h * y_scale) as i32,
        );
        candidates.push(Candidate {
            bbox,
            class_id,
            confidence: objectness,
        });
    }
    candidates
}

/// Turns raw model output into suppressed, labelled detections.
#[derive(Clone, Debug)]
pub struct YoloDecoder {
    classes: Vec<String>,
    thresholds: DetectionThresholds,
    input_size: u32,
}

impl YoloDecoder {
    pub fn new(classes: Vec<String>, thresholds: DetectionThresholds, input_size: u32) -> Self {
        Self {
            classes,
            thresholds,
            input_size,
        }
    }

    pub fn input_size(&self) -> u32 {
        self.input_size
    }

    pub fn row_len(&self) -> usize {
        5 + self.classes.len()
    }

    fn label(&self, class_id: usize) -> String {
        self.classes
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class{}", class_id))
    }

    /// Decode output rows for a frame of the given size.
    ///
    /// Boxes are clipped to the frame; boxes left empty by clipping are
    /// dropped before suppression.
    pub fn decode(
        &self,
        output: &[f32],
        row_len: usize,
        frame_width: u32,
        frame_height: u32,
    ) -> Vec<Detection> {
        let x_scale = frame_width as f32 / self.input_size as f32;
        let y_scale = frame_height as f32 / self.input_size as f32;
        let candidates: Vec<Candidate> =
            decode_yolo_rows(output, row_len, &self.thresholds, x_scale, y_scale)
                .into_iter()
                .filter_map(|c| {
                    let bbox = c.bbox.clipped_to(frame_width, frame_height)?;
                    Some(Candidate { bbox, ..c })
                })
                .collect();
        if candidates.is_empty() {
            return Vec::new();
        }

        let boxes: Vec<BoundingBox> = candidates.iter().map(|c| c.bbox).collect();
        let scores: Vec<f32> = candidates.iter().map(|c| c.confidence).collect();
        non_max_suppression(
            &boxes,
            &scores,
            self.thresholds.nms_score,
            self.thresholds.nms_iou,
        )
        .into_iter()
        .map(|i| Detection {
            bbox: candidates[i].bbox,
            label: self.label(candidates[i].class_id),
            confidence: candidates[i].confidence,
        })
        .collect()
    }
}
