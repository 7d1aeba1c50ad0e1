//! Template-matching tracker.
//!
//! Keeps a grayscale patch of the object and, on each frame, searches a window
//! around the previous position for the offset with the smallest mean absolute
//! difference. A poor best match reports the track as lost.

use anyhow::{anyhow, Result};
use serde::Deserialize;

use super::{Track, TrackerFactory};
use crate::frame::{BoundingBox, Frame};

/// Longest template side, in samples, after striding.
const MAX_TEMPLATE_SAMPLES: i32 = 32;

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Pixels searched around the last position in each direction.
    pub search_margin: u32,
    /// Coarse search step in pixels (refined to 1 around the best offset).
    pub step: u32,
    /// Mean absolute luma difference above which the track is lost.
    pub max_mean_diff: f32,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            search_margin: 24,
            step: 2,
            max_mean_diff: 40.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TemplateTrackerFactory {
    settings: TrackerSettings,
}

impl TemplateTrackerFactory {
    pub fn new(settings: TrackerSettings) -> Self {
        Self { settings }
    }
}

impl TrackerFactory for TemplateTrackerFactory {
    fn init(&self, frame: &Frame, bbox: BoundingBox) -> Result<Box<dyn Track>> {
        Ok(Box::new(TemplateTracker::new(frame, bbox, self.settings)?))
    }
}

pub struct TemplateTracker {
    settings: TrackerSettings,
    bbox: BoundingBox,
    stride: i32,
    template: Vec<u8>,
    frame_size: (u32, u32),
}

impl TemplateTracker {
    pub fn new(frame: &Frame, bbox: BoundingBox, settings: TrackerSettings) -> Result<Self> {
        if !frame.contains(&bbox) {
            return Err(anyhow!(
                "initial box {} is outside the {}x{} frame",
                bbox,
                frame.width,
                frame.height
            ));
        }
        let stride = (bbox.width.max(bbox.height) / MAX_TEMPLATE_SAMPLES).max(1);
        let template = sample_patch(frame, &bbox, stride);
        Ok(Self {
            settings,
            bbox,
            stride,
            template,
            frame_size: (frame.width, frame.height),
        })
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Mean absolute difference at `candidate`, or `None` once it exceeds
    /// `give_up` (pruned).
    fn score(&self, frame: &Frame, candidate: &BoundingBox, give_up: f32) -> Option<f32> {
        let budget = (give_up * self.template.len() as f32) as u64;
        let mut total = 0u64;
        let mut i = 0;
        let mut y = 0;
        while y < candidate.height {
            let mut x = 0;
            while x < candidate.width {
                let luma = frame.luma((candidate.x + x) as u32, (candidate.y + y) as u32);
                total += (luma as i32 - self.template[i] as i32).unsigned_abs() as u64;
                if total > budget {
                    return None;
                }
                i += 1;
                x += self.stride;
            }
            y += self.stride;
        }
        Some(total as f32 / self.template.len().max(1) as f32)
    }

    fn search(
        &self,
        frame: &Frame,
        center: (i32, i32),
        radius: i32,
        step: i32,
        mut best: (f32, BoundingBox),
    ) -> (f32, BoundingBox) {
        let mut dy = -radius;
        while dy <= radius {
            let mut dx = -radius;
            while dx <= radius {
                let candidate = BoundingBox {
                    x: center.0 + dx,
                    y: center.1 + dy,
                    ..self.bbox
                };
                if frame.contains(&candidate) {
                    if let Some(diff) = self.score(frame, &candidate, best.0) {
                        if diff < best.0 {
                            best = (diff, candidate);
                        }
                    }
                }
                dx += step;
            }
            dy += step;
        }
        best
    }
}

impl Track for TemplateTracker {
    fn update(&mut self, frame: &Frame) -> Option<BoundingBox> {
        if (frame.width, frame.height) != self.frame_size {
            return None;
        }

        let margin = self.settings.search_margin as i32;
        let step = self.settings.step.max(1) as i32;
        let start = (f32::INFINITY, self.bbox);

        let coarse = self.search(frame, (self.bbox.x, self.bbox.y), margin, step, start);
        let (diff, found) = if step > 1 && coarse.0.is_finite() {
            let origin = (coarse.1.x, coarse.1.y);
            self.search(frame, origin, step - 1, 1, coarse)
        } else {
            coarse
        };

        if !diff.is_finite() || diff > self.settings.max_mean_diff {
            return None;
        }

        self.bbox = found;
        self.template = sample_patch(frame, &found, self.stride);
        Some(found)
    }

    fn name(&self) -> &'static str {
        "template"
    }
}

fn sample_patch(frame: &Frame, bbox: &BoundingBox, stride: i32) -> Vec<u8> {
    let mut patch = Vec::new();
    let mut y = 0;
    while y < bbox.height {
        let mut x = 0;
        while x < bbox.width {
            patch.push(frame.luma((bbox.x + x) as u32, (bbox.y + y) as u32));
            x += stride;
        }
        y += stride;
    }
    patch
}
