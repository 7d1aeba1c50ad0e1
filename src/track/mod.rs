//! Single-object visual tracking.
//!
//! A tracker is seeded from one detection and then advanced frame by frame.
//! The control loop only depends on the two traits below; the concrete
//! algorithm is chosen once at construction time.

mod template;

use anyhow::Result;

use crate::frame::{BoundingBox, Frame};

pub use template::{TemplateTracker, TemplateTrackerFactory, TrackerSettings};

/// An active track on one object.
pub trait Track: Send {
    /// Advance to `frame`. `None` means the track is lost and must be dropped.
    fn update(&mut self, frame: &Frame) -> Option<BoundingBox>;

    /// Algorithm identifier.
    fn name(&self) -> &'static str;
}

/// Creates tracks from an initial box.
pub trait TrackerFactory: Send {
    fn init(&self, frame: &Frame, bbox: BoundingBox) -> Result<Box<dyn Track>>;
}
