use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::{Frame, FrameWait, LatestFrame};

/// Pause after a transient read error before retrying.
const READ_RETRY_DELAY: Duration = Duration::from_millis(50);
/// How often the first-frame wait re-checks the quit flag.
const QUIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Background frame acquisition.
///
/// Reads the source as fast as it delivers and overwrites the mailbox slot
/// with every frame, numbering them from 1. Stops when asked, when the source
/// turns unhealthy, or when the mailbox is closed; the mailbox is always
/// closed on exit and the source is dropped, releasing the stream.
pub struct FrameGrabber {
    mailbox: Arc<LatestFrame>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl FrameGrabber {
    pub fn spawn<S: FrameSource + 'static>(source: S, mailbox: Arc<LatestFrame>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread_mailbox = mailbox.clone();
        let join = std::thread::Builder::new()
            .name("frame-grabber".to_string())
            .spawn(move || run_grabber(source, thread_mailbox, thread_stop))
            .map_err(|e| anyhow!("failed to spawn frame grabber: {}", e))?;
        Ok(Self {
            mailbox,
            stop,
            join: Some(join),
        })
    }

    pub fn mailbox(&self) -> &Arc<LatestFrame> {
        &self.mailbox
    }

    /// Wait up to `timeout` for the first frame.
    ///
    /// Expiry or an early stream failure means the stream is unavailable.
    /// `Ok(None)` means `quit` was raised before a frame arrived.
    pub fn wait_for_first_frame(
        &self,
        timeout: Duration,
        quit: &AtomicBool,
    ) -> Result<Option<Frame>> {
        let deadline = Instant::now() + timeout;
        loop {
            if quit.load(Ordering::SeqCst) {
                return Ok(None);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(anyhow!(
                    "stream unavailable: no frame received within {}ms",
                    timeout.as_millis()
                ));
            }
            match self.mailbox.wait_newer(None, remaining.min(QUIT_POLL_INTERVAL)) {
                FrameWait::Frame(frame) => return Ok(Some(frame)),
                FrameWait::TimedOut => continue,
                FrameWait::Closed => {
                    return Err(anyhow!(
                        "stream unavailable: source failed before the first frame"
                    ))
                }
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Signal the thread to stop and wait for it.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        self.mailbox.close();
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("frame grabber thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for FrameGrabber {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("{}", err);
        }
    }
}

fn run_grabber<S: FrameSource>(mut source: S, mailbox: Arc<LatestFrame>, stop: Arc<AtomicBool>) {
    let name = source.describe();
    let mut seq = 0u64;
    let mut read_errors = 0u64;
    log::debug!("frame grabber started for {}", name);

    while !stop.load(Ordering::SeqCst) {
        match source.next_frame() {
            Ok(frame) => {
                seq += 1;
                if !mailbox.publish(frame.with_seq(seq)) {
                    break;
                }
            }
            Err(err) => {
                if !source.is_healthy() {
                    log::error!("frame source {} failed: {:#}", name, err);
                    break;
                }
                read_errors += 1;
                log::warn!("frame read from {} failed: {:#}", name, err);
                std::thread::sleep(READ_RETRY_DELAY);
            }
        }
    }

    mailbox.close();
    log::debug!(
        "frame grabber for {} stopped after {} frames ({} read errors)",
        name,
        seq,
        read_errors
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Yields scripted results, then blocks briefly and reports unhealthy.
    struct ScriptedSource {
        script: VecDeque<Result<Frame>>,
        healthy: bool,
    }

    impl FrameSource for ScriptedSource {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }

        fn next_frame(&mut self) -> Result<Frame> {
            match self.script.pop_front() {
                Some(item) => item,
                None => {
                    self.healthy = false;
                    Err(anyhow!("end of script"))
                }
            }
        }

        fn is_healthy(&self) -> bool {
            self.healthy
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn frame() -> Result<Frame> {
        Frame::filled(8, 8, [0, 0, 0])
    }

    #[test]
    fn grabber_numbers_frames_and_closes_at_end() {
        let mailbox = LatestFrame::new();
        let source = ScriptedSource {
            script: VecDeque::from(vec![frame(), Err(anyhow!("glitch")), frame(), frame()]),
            healthy: true,
        };
        let grabber = FrameGrabber::spawn(source, mailbox.clone()).unwrap();
        let first = grabber
            .wait_for_first_frame(Duration::from_secs(5), &AtomicBool::new(false))
            .unwrap()
            .expect("first frame");
        assert!(first.seq >= 1);

        // Source ends, mailbox closes, the last frame stays readable.
        loop {
            if mailbox.is_closed() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(mailbox.latest().map(|f| f.seq), Some(3));
        assert_eq!(mailbox.published(), 3);
        grabber.stop().unwrap();
    }

    #[test]
    fn first_frame_wait_fails_when_source_dies() {
        let source = ScriptedSource {
            script: VecDeque::new(),
            healthy: true,
        };
        let grabber = FrameGrabber::spawn(source, LatestFrame::new()).unwrap();
        let err = grabber
            .wait_for_first_frame(Duration::from_secs(5), &AtomicBool::new(false))
            .unwrap_err();
        assert!(err.to_string().contains("stream unavailable"));
    }

    /// Never produces a frame.
    struct Silent;

    impl FrameSource for Silent {
        fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        fn next_frame(&mut self) -> Result<Frame> {
            std::thread::sleep(Duration::from_millis(10));
            Err(anyhow!("no data yet"))
        }
        fn is_healthy(&self) -> bool {
            true
        }
        fn describe(&self) -> String {
            "silent".to_string()
        }
    }

    #[test]
    fn first_frame_wait_times_out_on_a_silent_stream() {
        let grabber = FrameGrabber::spawn(Silent, LatestFrame::new()).unwrap();
        let err = grabber
            .wait_for_first_frame(Duration::from_millis(250), &AtomicBool::new(false))
            .unwrap_err();
        assert!(err.to_string().contains("no frame received within 250ms"));
        grabber.stop().unwrap();
    }

    #[test]
    fn first_frame_wait_returns_promptly_on_quit() {
        let grabber = FrameGrabber::spawn(Silent, LatestFrame::new()).unwrap();
        let quit = Arc::new(AtomicBool::new(false));
        let raiser = {
            let quit = quit.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                quit.store(true, Ordering::SeqCst);
            })
        };

        let started = Instant::now();
        let waited = grabber
            .wait_for_first_frame(Duration::from_secs(30), &quit)
            .unwrap();
        assert!(waited.is_none());
        assert!(started.elapsed() < Duration::from_secs(5));

        raiser.join().unwrap();
        grabber.stop().unwrap();
    }

    #[test]
    fn stop_joins_a_live_grabber() {
        struct Endless;
        impl FrameSource for Endless {
            fn connect(&mut self) -> Result<()> {
                Ok(())
            }
            fn next_frame(&mut self) -> Result<Frame> {
                std::thread::sleep(Duration::from_millis(1));
                Frame::filled(4, 4, [1, 2, 3])
            }
            fn is_healthy(&self) -> bool {
                true
            }
            fn describe(&self) -> String {
                "endless".to_string()
            }
        }

        let mailbox = LatestFrame::new();
        let grabber = FrameGrabber::spawn(Endless, mailbox.clone()).unwrap();
        grabber
            .wait_for_first_frame(Duration::from_secs(5), &AtomicBool::new(false))
            .unwrap();
        assert!(grabber.is_running());
        grabber.stop().unwrap();
        assert!(mailbox.is_closed());
    }
}
