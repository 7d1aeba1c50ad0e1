use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Implementations return detections for a single frame:
/// - confidence-filtered and class-score-filtered,
/// - reduced by non-max suppression,
/// - ordered as the suppression step emits them.
///
/// An empty vector is a normal outcome, not an error. Errors are reserved for
/// inference failures and are fatal to the control loop.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
