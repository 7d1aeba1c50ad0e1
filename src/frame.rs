//! Frame types and the latest-frame mailbox.
//!
//! - `Frame`: immutable RGB8 image shared between threads without copying.
//! - `BoundingBox`: integer pixel rectangle in a frame's coordinate space.
//! - `LatestFrame`: single-slot mailbox written by the grabber thread and read
//!   by the control loop. Publishing overwrites any frame the reader has not
//!   consumed yet, so the reader always works on the newest image.

use anyhow::{anyhow, Result};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Packed RGB8 frame. Pixels are never mutated after construction.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    /// Capture sequence number assigned by the grabber (0 until published).
    pub seq: u64,
}

impl Frame {
    /// Build a frame from tightly packed RGB bytes.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels: pixels.into(),
            width,
            height,
            seq: 0,
        })
    }

    /// Solid-colour frame, mostly useful for tests and synthetic sources.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let count = (width as usize) * (height as usize);
        let mut pixels = Vec::with_capacity(count * 3);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height)
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB triple at (x, y). Caller guarantees the coordinate is in range.
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 3;
        [self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]]
    }

    /// Integer BT.601 luma at (x, y).
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let [r, g, b] = self.rgb(x, y);
        ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
    }

    /// True when `bbox` is a valid box inside this frame.
    pub fn contains(&self, bbox: &BoundingBox) -> bool {
        bbox.is_within(self.width, self.height)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// BoundingBox
// ----------------------------------------------------------------------------

/// Axis-aligned box in integer pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Horizontal centre, integer division.
    pub fn center_x(&self) -> i32 {
        self.x.saturating_add(self.width / 2)
    }

    pub fn center_y(&self) -> i32 {
        self.y.saturating_add(self.height / 2)
    }

    pub fn right(&self) -> i32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> i64 {
        if self.width <= 0 || self.height <= 0 {
            return 0;
        }
        self.width as i64 * self.height as i64
    }

    /// Non-empty and fully inside `[0, width) x [0, height)`.
    pub fn is_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x >= 0
            && self.y >= 0
            && self.right() as i64 <= width as i64
            && self.bottom() as i64 <= height as i64
    }

    /// Intersection with `[0, width) x [0, height)`, or `None` when empty.
    pub fn clipped_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let left = (self.x as i64).max(0);
        let top = (self.y as i64).max(0);
        let right = (self.x as i64 + self.width as i64).min(width as i64);
        let bottom = (self.y as i64 + self.height as i64).min(height as i64);
        if right <= left || bottom <= top {
            return None;
        }
        Some(BoundingBox::new(
            left as i32,
            top as i32,
            (right - left) as i32,
            (bottom - top) as i32,
        ))
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> i64 {
        let l = self.x.max(other.x) as i64;
        let r = self.right().min(other.right()) as i64;
        let t = self.y.max(other.y) as i64;
        let b = self.bottom().min(other.bottom()) as i64;
        (r - l).max(0) * (b - t).max(0)
    }

    /// Intersection over union; 0 when both boxes are empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0 {
            return 0.0;
        }
        inter as f32 / union as f32
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[x={} y={} w={} h={}]",
            self.x, self.y, self.width, self.height
        )
    }
}

// ----------------------------------------------------------------------------
// LatestFrame: single-slot mailbox
// ----------------------------------------------------------------------------

/// Outcome of waiting on the mailbox.
#[derive(Debug)]
pub enum FrameWait {
    Frame(Frame),
    TimedOut,
    Closed,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    published: u64,
    closed: bool,
}

/// Single-producer, single-consumer "latest frame" cell.
///
/// The slot is swapped under a mutex, so a reader observes either the previous
/// frame or the new one, never a partial write.
#[derive(Default)]
pub struct LatestFrame {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl LatestFrame {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // A panicking writer cannot leave a half-written frame behind; the
        // slot only ever holds whole values.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current frame. Returns false once the mailbox is closed.
    pub fn publish(&self, frame: Frame) -> bool {
        let mut slot = self.lock();
        if slot.closed {
            return false;
        }
        slot.frame = Some(frame);
        slot.published += 1;
        drop(slot);
        self.ready.notify_all();
        true
    }

    /// Newest frame, or `None` before the first frame arrives.
    pub fn latest(&self) -> Option<Frame> {
        self.lock().frame.clone()
    }

    /// Total number of frames ever published.
    pub fn published(&self) -> u64 {
        self.lock().published
    }

    /// Block until a frame newer than `after_seq` is available.
    ///
    /// `after_seq = None` accepts any frame. A closed mailbox still hands out
    /// a pending newer frame before reporting `Closed`.
    pub fn wait_newer(&self, after_seq: Option<u64>, timeout: Duration) -> FrameWait {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            if let Some(frame) = &slot.frame {
                if after_seq.map_or(true, |seen| frame.seq > seen) {
                    return FrameWait::Frame(frame.clone());
                }
            }
            if slot.closed {
                return FrameWait::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return FrameWait::TimedOut;
            }
            let (guard, _) = self
                .ready
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            slot = guard;
        }
    }

    /// Close the mailbox and wake all waiters.
    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(seq: u64) -> Frame {
        Frame::filled(4, 4, [10, 20, 30]).unwrap().with_seq(seq)
    }

    #[test]
    fn frame_rejects_wrong_buffer_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
        assert!(Frame::new(Vec::new(), 0, 2).is_err());
    }

    #[test]
    fn frame_exposes_pixels_and_luma() {
        let f = Frame::filled(2, 2, [255, 255, 255]).unwrap();
        assert_eq!(f.rgb(1, 1), [255, 255, 255]);
        assert_eq!(f.luma(0, 0), 255);
        assert_eq!(f.pixels().len(), 12);
    }

    #[test]
    fn bounding_box_within_frame() {
        assert!(BoundingBox::new(0, 0, 640, 480).is_within(640, 480));
        assert!(!BoundingBox::new(1, 0, 640, 480).is_within(640, 480));
        assert!(!BoundingBox::new(-1, 0, 10, 10).is_within(640, 480));
        assert!(!BoundingBox::new(10, 10, 0, 10).is_within(640, 480));
    }

    #[test]
    fn bounding_box_clips_to_frame() {
        assert_eq!(
            BoundingBox::new(-10, -5, 30, 20).clipped_to(640, 480),
            Some(BoundingBox::new(0, 0, 20, 15))
        );
        assert_eq!(
            BoundingBox::new(600, 470, 100, 100).clipped_to(640, 480),
            Some(BoundingBox::new(600, 470, 40, 10))
        );
        assert_eq!(BoundingBox::new(700, 0, 30, 20).clipped_to(640, 480), None);
        assert_eq!(
            BoundingBox::new(i32::MAX, 0, i32::MAX, 10).clipped_to(640, 480),
            None
        );
    }

    #[test]
    fn bounding_box_edges_saturate() {
        let huge = BoundingBox::new(i32::MAX, i32::MAX, i32::MAX, i32::MAX);
        assert_eq!(huge.right(), i32::MAX);
        assert_eq!(huge.bottom(), i32::MAX);
        assert_eq!(huge.center_x(), i32::MAX);
        assert!(!huge.is_within(640, 480));
        assert_eq!(huge.intersection_area(&BoundingBox::new(0, 0, 10, 10)), 0);
    }

    #[test]
    fn bounding_box_iou() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 10, 10);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20, 20, 5, 5)), 0.0);
        assert_eq!(a.iou(&a), 1.0);
    }

    #[test]
    fn latest_frame_is_empty_until_published() {
        let mailbox = LatestFrame::new();
        assert!(mailbox.latest().is_none());
        mailbox.publish(frame(1));
        mailbox.publish(frame(2));
        assert_eq!(mailbox.latest().map(|f| f.seq), Some(2));
        assert_eq!(mailbox.published(), 2);
    }

    #[test]
    fn wait_newer_skips_seen_frames() {
        let mailbox = LatestFrame::new();
        mailbox.publish(frame(3));
        assert!(matches!(
            mailbox.wait_newer(Some(3), Duration::from_millis(20)),
            FrameWait::TimedOut
        ));
        match mailbox.wait_newer(Some(2), Duration::from_millis(20)) {
            FrameWait::Frame(f) => assert_eq!(f.seq, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn wait_newer_wakes_on_publish() {
        let mailbox = LatestFrame::new();
        let writer = mailbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.publish(frame(1));
        });
        match mailbox.wait_newer(None, Duration::from_secs(5)) {
            FrameWait::Frame(f) => assert_eq!(f.seq, 1),
            other => panic!("unexpected {:?}", other),
        }
        handle.join().unwrap();
    }

    #[test]
    fn close_wakes_waiters_and_rejects_publish() {
        let mailbox = LatestFrame::new();
        let closer = mailbox.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            closer.close();
        });
        assert!(matches!(
            mailbox.wait_newer(None, Duration::from_secs(5)),
            FrameWait::Closed
        ));
        handle.join().unwrap();
        assert!(!mailbox.publish(frame(1)));
        assert!(mailbox.is_closed());
    }
}
