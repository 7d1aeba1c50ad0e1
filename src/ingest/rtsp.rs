//! RTSP frame source.
//!
//! `RtspSource` decodes camera streams with GStreamer (feature
//! `rtsp-gstreamer`). URLs starting with `stub://` select a synthetic scene
//! instead: a textured bright square sweeping left and right over a dark
//! background, periodically leaving the scene. It needs no camera and drives
//! the whole detect/track/decide path end to end.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::config::StreamSettings;
use crate::frame::Frame;

/// Configuration for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspConfig {
    /// Stream URL (e.g. "rtsp://192.168.1.100:8554/video_stream").
    pub url: String,
    /// Target frame rate. Only paces synthetic streams; 0 disables pacing.
    pub target_fps: u32,
    /// Frame width (synthetic streams).
    pub width: u32,
    /// Frame height (synthetic streams).
    pub height: u32,
}

impl Default for RtspConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

impl From<&StreamSettings> for RtspConfig {
    fn from(settings: &StreamSettings) -> Self {
        Self {
            url: settings.url.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        }
    }
}

/// RTSP frame source.
pub struct RtspSource {
    backend: RtspBackend,
}

enum RtspBackend {
    Synthetic(SyntheticRtspSource),
    #[cfg(feature = "rtsp-gstreamer")]
    Gstreamer(GstreamerRtspSource),
}

impl RtspSource {
    pub fn new(config: RtspConfig) -> Result<Self> {
        if config.url.starts_with("stub://") {
            Ok(Self {
                backend: RtspBackend::Synthetic(SyntheticRtspSource::new(config)),
            })
        } else {
            #[cfg(feature = "rtsp-gstreamer")]
            {
                Ok(Self {
                    backend: RtspBackend::Gstreamer(GstreamerRtspSource::new(config)?),
                })
            }
            #[cfg(not(feature = "rtsp-gstreamer"))]
            {
                anyhow::bail!(
                    "RTSP url {} requires the rtsp-gstreamer feature (stub:// urls work without it)",
                    config.url
                )
            }
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> RtspStats {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.stats(),
        }
    }
}

impl FrameSource for RtspSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            RtspBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.next_frame(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            RtspBackend::Synthetic(source) => source.is_healthy(),
            #[cfg(feature = "rtsp-gstreamer")]
            RtspBackend::Gstreamer(source) => source.is_healthy(),
        }
    }

    fn describe(&self) -> String {
        self.stats().url
    }
}

/// Statistics for an RTSP source.
#[derive(Clone, Debug)]
pub struct RtspStats {
    pub frames_captured: u64,
    pub url: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

const OBSTACLE_SIZE: u32 = 48;
const OBSTACLE_SPEED_PX: u64 = 4;
/// The obstacle is visible for 3 of every 4 phases of this many frames.
const VISIBILITY_PHASE_FRAMES: u64 = 90;
const BACKGROUND_LUMA: u8 = 30;

struct SyntheticRtspSource {
    config: RtspConfig,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticRtspSource {
    fn new(config: RtspConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            last_frame_at: None,
        }
    }

    /// Synthetic sources are always "connected".
    fn connect(&mut self) -> Result<()> {
        log::info!("RtspSource: connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.pace();
        self.frame_count += 1;
        let pixels = self.render(self.frame_count);
        Frame::new(pixels, self.config.width, self.config.height)
    }

    /// Sleep so frames arrive at roughly `target_fps`.
    fn pace(&mut self) {
        if self.config.target_fps > 0 {
            let interval = Duration::from_secs(1) / self.config.target_fps;
            if let Some(last) = self.last_frame_at {
                let elapsed = last.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    /// Top-left corner of the obstacle in frame `n`, or `None` while hidden.
    fn obstacle_origin(&self, n: u64) -> Option<(u32, u32)> {
        if (n / VISIBILITY_PHASE_FRAMES) % 4 == 3 {
            return None;
        }
        let size = OBSTACLE_SIZE.min(self.config.width).min(self.config.height);
        let range = (self.config.width - size) as u64;
        let x = if range == 0 {
            0
        } else {
            let pos = (n * OBSTACLE_SPEED_PX) % (2 * range);
            if pos > range {
                2 * range - pos
            } else {
                pos
            }
        };
        let y = (self.config.height - size) / 2;
        Some((x as u32, y))
    }

    fn render(&self, n: u64) -> Vec<u8> {
        let (w, h) = (self.config.width, self.config.height);
        let mut pixels = vec![BACKGROUND_LUMA; (w * h * 3) as usize];

        if let Some((x0, y0)) = self.obstacle_origin(n) {
            let size = OBSTACLE_SIZE.min(w).min(h);
            for y in 0..size {
                for x in 0..size {
                    // Texture keeps template matching unambiguous; all values
                    // stay bright enough for the stub detector.
                    let v = 200 + ((x * 3 + y * 5) % 55) as u8;
                    let idx = (((y0 + y) * w + x0 + x) * 3) as usize;
                    pixels[idx..idx + 3].copy_from_slice(&[v, v, v]);
                }
            }
        }
        pixels
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> RtspStats {
        RtspStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production RTSP source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "rtsp-gstreamer")]
struct GstreamerRtspSource {
    config: RtspConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    last_error: Option<String>,
}

#[cfg(feature = "rtsp-gstreamer")]
impl GstreamerRtspSource {
    /// Build `rtspsrc ! decodebin ! videoconvert ! appsink` with RGB output.
    ///
    /// The appsink holds at most one buffer and drops older ones, so decoder
    /// latency never accumulates.
    fn new(config: RtspConfig) -> Result<Self> {
        use gstreamer::prelude::*;

        gstreamer::init().context("initialize gstreamer")?;

        let pipeline_description = format!(
            "rtspsrc location={} latency=0 ! decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=appsink sync=false max-buffers=1 drop=true",
            config.url
        );
        let pipeline = gstreamer::parse::launch(&pipeline_description)
            .context("build RTSP pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow::anyhow!("RTSP pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name("appsink")
            .context("appsink element missing from pipeline")?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow::anyhow!("appsink element has unexpected type"))?;

        let caps = gstreamer::Caps::builder("video/x-raw")
            .field("format", "RGB")
            .build();
        appsink.set_caps(Some(&caps));
        appsink.set_max_buffers(1);
        appsink.set_drop(true);
        appsink.set_sync(false);

        Ok(Self {
            config,
            pipeline,
            appsink,
            frame_count: 0,
            last_frame_at: None,
            connected_at: None,
            last_error: None,
        })
    }

    fn connect(&mut self) -> Result<()> {
        use gstreamer::prelude::*;

        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set RTSP pipeline to Playing")?;
        self.connected_at = Some(Instant::now());
        log::info!("RtspSource: connecting to {}", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        self.poll_bus();
        if let Some(err) = &self.last_error {
            anyhow::bail!("{}", err);
        }

        let sample = self
            .appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(
                self.frame_timeout().as_millis() as u64,
            ))
            .ok_or_else(|| anyhow::anyhow!("RTSP stream stalled"))?;

        let (pixels, width, height) = sample_to_pixels(&sample)?;
        if self.frame_count == 0 {
            log::info!(
                "RtspSource: first frame from {} ({}x{})",
                self.config.url,
                width,
                height
            );
        }

        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Frame::new(pixels, width, height)
    }

    fn is_healthy(&self) -> bool {
        if self.last_error.is_some() {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= self.health_grace()
    }

    fn stats(&self) -> RtspStats {
        RtspStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }

    fn frame_timeout(&self) -> Duration {
        Duration::from_millis(500)
    }

    fn health_grace(&self) -> Duration {
        Duration::from_secs(2)
    }

    fn poll_bus(&mut self) {
        use gstreamer::prelude::*;

        let Some(bus) = self.pipeline.bus() else {
            return;
        };
        while let Some(message) = bus.pop() {
            use gstreamer::MessageView;
            match message.view() {
                MessageView::Error(err) => {
                    self.last_error = Some(format!(
                        "gstreamer error from {:?}: {}",
                        err.src().map(|s| s.path_string()),
                        err.error()
                    ));
                }
                MessageView::Eos(..) => {
                    self.last_error = Some("gstreamer reached EOS".to_string());
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "rtsp-gstreamer")]
impl Drop for GstreamerRtspSource {
    fn drop(&mut self) {
        use gstreamer::prelude::*;

        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("RtspSource: failed to stop pipeline: {}", err);
        }
        log::info!(
            "RtspSource: released {} after {} frames",
            self.config.url,
            self.frame_count
        );
    }
}

#[cfg(feature = "rtsp-gstreamer")]
fn sample_to_pixels(sample: &gstreamer::Sample) -> Result<(Vec<u8>, u32, u32)> {
    let buffer = sample.buffer().context("RTSP sample missing buffer")?;
    let caps = sample.caps().context("RTSP sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse RTSP caps as video info")?;

    let width = info.width();
    let height = info.height();
    let stride = info.stride()[0] as usize;

    let map = buffer.map_readable().context("map RTSP buffer")?;
    let pixels = pack_rows(map.as_slice(), width, height, stride)?;
    Ok((pixels, width, height))
}

/// Copy `height` rows of packed RGB out of a buffer whose rows are `stride`
/// bytes apart. Short buffers are an error.
#[cfg_attr(not(feature = "rtsp-gstreamer"), allow(dead_code))]
fn pack_rows(data: &[u8], width: u32, height: u32, stride: usize) -> Result<Vec<u8>> {
    let row_bytes = (width as usize) * 3;
    let total = row_bytes * height as usize;

    if stride == row_bytes {
        return Ok(data
            .get(..total)
            .context("RTSP buffer is shorter than its caps")?
            .to_vec());
    }

    let mut pixels = Vec::with_capacity(total);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("RTSP buffer row is out of bounds")?,
        );
    }
    Ok(pixels)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
