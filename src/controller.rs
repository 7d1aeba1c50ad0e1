//! Detect/track control loop.
//!
//! While idle the controller runs the detector on each frame; the first
//! detection carrying the target label seeds a tracker. While tracking only
//! the tracker runs. A lost track returns the controller to idle and the
//! detector gets the *next* frame. Every processed frame yields exactly one
//! decision, sent through the sink in frame order.

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::detect::{select_target, DetectorBackend};
use crate::frame::{BoundingBox, Frame, FrameWait, LatestFrame};
use crate::guidance::{decide, Decision};
use crate::track::{Track, TrackerFactory};
use crate::transport::DecisionSink;

/// How long `run` waits for a new frame before re-checking the stop flag.
const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub enum TrackState {
    Idle,
    Tracking {
        track: Box<dyn Track>,
        last_box: BoundingBox,
        /// Label and confidence of the detection that seeded the track.
        label: String,
        confidence: f32,
    },
}

impl fmt::Debug for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackState::Idle => f.write_str("Idle"),
            TrackState::Tracking {
                track,
                last_box,
                label,
                confidence,
            } => f
                .debug_struct("Tracking")
                .field("tracker", &track.name())
                .field("last_box", last_box)
                .field("label", label)
                .field("confidence", confidence)
                .finish(),
        }
    }
}

/// Where a frame's box (or its absence) came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackSource {
    /// The detector found the target and a track was started.
    Detected,
    /// The detector found the target but no tracker could be started on it;
    /// the controller stays idle and detects again on the next frame.
    DetectedUntracked,
    /// An existing track followed the target.
    Tracked,
    /// The track was lost on this frame.
    TrackLost,
    /// The detector ran and found no target.
    NothingDetected,
}

impl TrackSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackSource::Detected => "detected",
            TrackSource::DetectedUntracked => "detected (untracked)",
            TrackSource::Tracked => "tracked",
            TrackSource::TrackLost => "track lost",
            TrackSource::NothingDetected => "searching",
        }
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameOutcome {
    pub seq: u64,
    pub bbox: Option<BoundingBox>,
    pub decision: Decision,
    pub source: TrackSource,
    /// Confidence of the detection behind the current track, if any.
    pub confidence: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub frames: u64,
    pub detector_runs: u64,
    pub tracks_started: u64,
    pub tracks_lost: u64,
}

/// Owns the detector, tracker factory, tracking state and decision sink.
pub struct Controller<S: DecisionSink> {
    detector: Box<dyn DetectorBackend>,
    trackers: Box<dyn TrackerFactory>,
    target_label: String,
    sink: S,
    state: TrackState,
    stats: ControllerStats,
}

impl<S: DecisionSink> Controller<S> {
    pub fn new(
        detector: Box<dyn DetectorBackend>,
        trackers: Box<dyn TrackerFactory>,
        target_label: &str,
        sink: S,
    ) -> Self {
        Self {
            detector,
            trackers,
            target_label: target_label.to_string(),
            sink,
            state: TrackState::Idle,
            stats: ControllerStats::default(),
        }
    }

    pub fn state(&self) -> &TrackState {
        &self.state
    }

    pub fn is_tracking(&self) -> bool {
        matches!(self.state, TrackState::Tracking { .. })
    }

    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Advance the state machine by one frame without deciding or sending.
    pub fn step(&mut self, frame: &Frame) -> Result<(Option<BoundingBox>, TrackSource)> {
        if let TrackState::Tracking {
            track, last_box, ..
        } = &mut self.state
        {
            match track.update(frame) {
                Some(bbox) if frame.contains(&bbox) => {
                    *last_box = bbox;
                    return Ok((Some(bbox), TrackSource::Tracked));
                }
                Some(bbox) => {
                    log::debug!(
                        "frame {}: tracker box {} left the {}x{} frame",
                        frame.seq,
                        bbox,
                        frame.width,
                        frame.height
                    );
                }
                None => {
                    log::debug!("frame {}: {} tracker lost the target", frame.seq, track.name());
                }
            }
            self.state = TrackState::Idle;
            self.stats.tracks_lost += 1;
            return Ok((None, TrackSource::TrackLost));
        }

        self.stats.detector_runs += 1;
        let detections = self
            .detector
            .detect(frame)
            .with_context(|| format!("{} detector failed on frame {}", self.detector.name(), frame.seq))?;

        let Some(target) = select_target(&detections, &self.target_label) else {
            return Ok((None, TrackSource::NothingDetected));
        };

        let seeded = target
            .bbox
            .clipped_to(frame.width, frame.height)
            .ok_or_else(|| anyhow!("detection {} lies outside the frame", target.bbox))
            .and_then(|seed| self.trackers.init(frame, seed).map(|track| (seed, track)));
        match seeded {
            Ok((seed, track)) => {
                log::debug!(
                    "frame {}: tracking {} at {} (confidence {:.2})",
                    frame.seq,
                    target.label,
                    seed,
                    target.confidence
                );
                self.stats.tracks_started += 1;
                self.state = TrackState::Tracking {
                    track,
                    last_box: seed,
                    label: target.label.clone(),
                    confidence: target.confidence,
                };
                Ok((Some(target.bbox), TrackSource::Detected))
            }
            Err(err) => {
                log::warn!("frame {}: could not start tracker: {:#}", frame.seq, err);
                Ok((Some(target.bbox), TrackSource::DetectedUntracked))
            }
        }
    }

    /// Process one frame: advance the state machine, decide, send.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let (bbox, source) = self.step(frame)?;
        let decision = decide(bbox.as_ref(), frame.width);
        self.stats.frames += 1;

        self.sink
            .send(decision)
            .with_context(|| format!("send decision for frame {}", frame.seq))?;
        log::debug!("frame {}: {} ({})", frame.seq, decision, source);

        let confidence = match &self.state {
            TrackState::Tracking { confidence, .. } if bbox.is_some() => Some(*confidence),
            _ => None,
        };
        Ok(FrameOutcome {
            seq: frame.seq,
            bbox,
            decision,
            source,
            confidence,
        })
    }

    /// Process frames from `mailbox` until `stop` is set.
    ///
    /// Frames published while a frame is being processed are skipped in
    /// favour of the newest one. A closed mailbox means the stream ended and
    /// is reported as an error.
    pub fn run<F>(&mut self, mailbox: &LatestFrame, stop: &AtomicBool, mut on_outcome: F) -> Result<()>
    where
        F: FnMut(&FrameOutcome),
    {
        let mut last_seq = None;
        while !stop.load(Ordering::SeqCst) {
            match mailbox.wait_newer(last_seq, FRAME_POLL_INTERVAL) {
                FrameWait::Frame(frame) => {
                    last_seq = Some(frame.seq);
                    let outcome = self.process_frame(&frame)?;
                    on_outcome(&outcome);
                }
                FrameWait::TimedOut => continue,
                FrameWait::Closed => {
                    return Err(anyhow!(
                        "video stream ended after {} frames",
                        self.stats.frames
                    ));
                }
            }
        }
        log::info!("control loop stopped after {} frames", self.stats.frames);
        Ok(())
    }
}
