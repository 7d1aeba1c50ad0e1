//! Frame ingestion.
//!
//! - `RtspSource`: camera stream (GStreamer, or synthetic for `stub://` URLs)
//! - `FrameGrabber`: background thread that keeps only the newest frame
//!
//! Live decoders produce frames in bursts and at their own pace. The grabber
//! drains the source continuously into a single-slot mailbox, so the control
//! loop never works through a backlog of stale frames.

mod grabber;
pub mod rtsp;

use anyhow::Result;

use crate::frame::Frame;

pub use grabber::FrameGrabber;
pub use rtsp::{RtspConfig, RtspSource, RtspStats};

/// A blocking source of frames.
pub trait FrameSource: Send {
    /// Open the underlying stream.
    fn connect(&mut self) -> Result<()>;

    /// Block until the next decoded frame is available.
    fn next_frame(&mut self) -> Result<Frame>;

    /// False once the source cannot recover (stream ended, pipeline error).
    fn is_healthy(&self) -> bool;

    /// Human-readable source name for logs.
    fn describe(&self) -> String;
}
