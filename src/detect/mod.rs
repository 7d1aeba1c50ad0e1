//! Object detection.
//!
//! The control loop only sees `DetectorBackend`: run inference on a frame, get
//! back detections that are already threshold-filtered and reduced by
//! non-max suppression, in suppression-output order.

mod backend;
mod backends;
mod nms;
mod result;
mod yolo;

use anyhow::{anyhow, Result};

use crate::config::DetectorSettings;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use nms::non_max_suppression;
pub use result::{select_target, Detection, DetectionThresholds};
pub use yolo::{decode_yolo_rows, Candidate, YoloDecoder};

/// Build the detector named in the settings.
pub fn build_backend(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend.as_str() {
        "stub" => Ok(Box::new(StubBackend::new(&settings.target_label))),
        "tract" => build_tract(settings),
        other => Err(anyhow!(
            "unknown detector backend '{}' (expected stub or tract)",
            other
        )),
    }
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    let decoder = YoloDecoder::new(
        settings.classes.clone(),
        settings.thresholds,
        settings.input_size,
    );
    Ok(Box::new(TractBackend::new(&settings.model_path, decoder)?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn DetectorBackend>> {
    Err(anyhow!("the tract detector requires the backend-tract feature"))
}
