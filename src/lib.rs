//! Obstacle Pilot
//!
//! Remote-control client for a camera vehicle. Frames pulled from the
//! vehicle's RTSP stream are searched for an obstacle; once found, the
//! obstacle is tracked, and every processed frame produces one steering
//! decision sent back to the vehicle over TCP.
//!
//! # Architecture
//!
//! Two threads share a single-slot frame mailbox:
//!
//! 1. **Grabber** (`ingest`): reads frames from the stream and publishes the
//!    newest one, overwriting frames the control loop has not consumed.
//! 2. **Control loop** (`controller`): detects while idle, tracks once a
//!    target is found, maps the box to a `Decision` (`guidance`) and sends it
//!    (`transport`).
//!
//! # Module Structure
//!
//! - `frame`: Frame, BoundingBox, LatestFrame mailbox
//! - `ingest`: frame sources (RTSP, synthetic `stub://`) and the grabber thread
//! - `detect`: detector backends, YOLO decoding, non-max suppression
//! - `track`: single-object tracker
//! - `guidance`: box position to steering decision
//! - `controller`: detect/track state machine and run loop
//! - `transport`: outbound command channel
//! - `config`: layered configuration
//! - `ui`: startup stages and live status line

pub mod config;
pub mod controller;
pub mod detect;
pub mod frame;
pub mod guidance;
pub mod ingest;
pub mod track;
pub mod transport;
pub mod ui;

pub use config::{parse_host, ConfigOverrides, PilotConfig};
pub use controller::{Controller, ControllerStats, FrameOutcome, TrackSource, TrackState};
pub use detect::{build_backend, Detection, DetectorBackend, StubBackend};
pub use frame::{BoundingBox, Frame, FrameWait, LatestFrame};
pub use guidance::{decide, Decision, DEAD_ZONE_PX};
pub use ingest::{FrameGrabber, FrameSource, RtspConfig, RtspSource};
pub use track::{TemplateTrackerFactory, Track, TrackerFactory};
pub use transport::{ChannelError, CommandChannel, DecisionSink, Framing};
