use anyhow::Result;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::{BoundingBox, Frame};

/// Luma above which a pixel counts as part of the object.
const BRIGHT_LUMA: u8 = 200;
/// Fewer bright pixels than this is treated as noise.
const MIN_BRIGHT_PIXELS: usize = 16;

/// Stub backend for synthetic streams and tests.
///
/// Reports the bounding box of all bright pixels as a single object. Paired
/// with the `stub://` stream, which renders the obstacle as a bright square.
pub struct StubBackend {
    label: String,
}

impl StubBackend {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new("obstacle")
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let mut count = 0usize;
        let (mut min_x, mut min_y) = (u32::MAX, u32::MAX);
        let (mut max_x, mut max_y) = (0u32, 0u32);

        for y in 0..frame.height {
            for x in 0..frame.width {
                if frame.luma(x, y) >= BRIGHT_LUMA {
                    count += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if count < MIN_BRIGHT_PIXELS {
            return Ok(Vec::new());
        }

        let bbox = BoundingBox::new(
            min_x as i32,
            min_y as i32,
            (max_x - min_x + 1) as i32,
            (max_y - min_y + 1) as i32,
        );
        // Fill ratio of the box stands in for a confidence score.
        let confidence = (count as f32 / bbox.area() as f32).clamp(f32::EPSILON, 1.0);

        Ok(vec![Detection {
            bbox,
            label: self.label.clone(),
            confidence,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_square(x0: u32, y0: u32, size: u32) -> Frame {
        let (w, h) = (64u32, 48u32);
        let mut pixels = vec![20u8; (w * h * 3) as usize];
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                let idx = ((y * w + x) * 3) as usize;
                pixels[idx..idx + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        Frame::new(pixels, w, h).unwrap()
    }

    #[test]
    fn stub_backend_finds_bright_square() {
        let mut backend = StubBackend::default();
        let dets = backend.detect(&frame_with_square(10, 5, 8)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(10, 5, 8, 8));
        assert_eq!(dets[0].label, "obstacle");
        assert_eq!(dets[0].confidence, 1.0);
    }

    #[test]
    fn stub_backend_ignores_dark_frames_and_noise() {
        let mut backend = StubBackend::default();
        let dark = Frame::filled(32, 32, [10, 10, 10]).unwrap();
        assert!(backend.detect(&dark).unwrap().is_empty());
        // 3x3 = 9 bright pixels, below the noise floor
        assert!(backend.detect(&frame_with_square(0, 0, 3)).unwrap().is_empty());
    }
}
