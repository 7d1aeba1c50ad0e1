use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectionThresholds;
use crate::track::TrackerSettings;
use crate::transport::Framing;

pub const DEFAULT_STREAM_PORT: u16 = 8554;
pub const DEFAULT_STREAM_PATH: &str = "video_stream";
pub const DEFAULT_COMMAND_PORT: u16 = 65432;
const DEFAULT_FIRST_FRAME_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SYNTHETIC_WIDTH: u32 = 640;
const DEFAULT_SYNTHETIC_HEIGHT: u32 = 480;
const DEFAULT_SYNTHETIC_FPS: u32 = 30;
const DEFAULT_DETECTOR: &str = "tract";
const DEFAULT_MODEL_PATH: &str = "best.onnx";
const DEFAULT_TARGET_LABEL: &str = "obstacle";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_SEND_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
struct PilotConfigFile {
    stream: Option<StreamConfigFile>,
    detector: Option<DetectorConfigFile>,
    tracker: Option<TrackerConfigFile>,
    command: Option<CommandConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    url: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    first_frame_timeout_ms: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    target_label: Option<String>,
    classes: Option<Vec<String>>,
    input_size: Option<u32>,
    thresholds: Option<DetectionThresholds>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    search_margin: Option<u32>,
    step: Option<u32>,
    max_mean_diff: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CommandConfigFile {
    port: Option<u16>,
    framing: Option<Framing>,
    connect_timeout_ms: Option<u64>,
    send_timeout_ms: Option<u64>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct PilotConfig {
    pub host: IpAddr,
    pub stream: StreamSettings,
    pub detector: DetectorSettings,
    pub tracker: TrackerSettings,
    pub command: CommandSettings,
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub url: String,
    pub first_frame_timeout: Duration,
    /// Frame size and rate for `stub://` streams.
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// `stub` or `tract`.
    pub backend: String,
    pub model_path: PathBuf,
    pub target_label: String,
    /// Model class names, indexed by class id.
    pub classes: Vec<String>,
    pub input_size: u32,
    pub thresholds: DetectionThresholds,
}

#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub addr: SocketAddr,
    pub framing: Framing,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
}

/// Command-line overrides, applied after file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub stream_url: Option<String>,
    pub model_path: Option<PathBuf>,
    pub detector: Option<String>,
    pub framing: Option<Framing>,
}

/// Parse the controller host. IPv4 or IPv6 literals only.
pub fn parse_host(raw: &str) -> Result<IpAddr> {
    raw.parse::<IpAddr>()
        .map_err(|_| anyhow!("invalid IP address: {}", raw))
}

/// `rtsp://<host>:<port>/<path>`, with IPv6 hosts bracketed.
pub fn stream_url(host: IpAddr, port: u16, path: &str) -> String {
    format!(
        "rtsp://{}/{}",
        SocketAddr::new(host, port),
        path.trim_start_matches('/')
    )
}

impl PilotConfig {
    /// Resolve configuration: defaults, then the JSON file (`config_path` or
    /// `PILOT_CONFIG`), then `PILOT_*` environment variables, then `overrides`.
    pub fn load(
        host: IpAddr,
        config_path: Option<&Path>,
        overrides: &ConfigOverrides,
    ) -> Result<Self> {
        let env_path = std::env::var("PILOT_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        let file_cfg = match config_path.map(Path::to_path_buf).or(env_path) {
            Some(path) => read_config_file(&path)?,
            None => PilotConfigFile::default(),
        };
        let mut cfg = Self::from_file(host, file_cfg);
        cfg.apply_env()?;
        cfg.apply_overrides(overrides);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults only.
    pub fn defaults(host: IpAddr) -> Self {
        Self::from_file(host, PilotConfigFile::default())
    }

    fn from_file(host: IpAddr, file: PilotConfigFile) -> Self {
        let stream_file = file.stream.unwrap_or_default();
        let stream_port = stream_file.port.unwrap_or(DEFAULT_STREAM_PORT);
        let stream_path = stream_file
            .path
            .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string());
        let stream = StreamSettings {
            url: stream_file
                .url
                .unwrap_or_else(|| stream_url(host, stream_port, &stream_path)),
            first_frame_timeout: Duration::from_millis(
                stream_file
                    .first_frame_timeout_ms
                    .unwrap_or(DEFAULT_FIRST_FRAME_TIMEOUT_MS),
            ),
            width: stream_file.width.unwrap_or(DEFAULT_SYNTHETIC_WIDTH),
            height: stream_file.height.unwrap_or(DEFAULT_SYNTHETIC_HEIGHT),
            target_fps: stream_file.target_fps.unwrap_or(DEFAULT_SYNTHETIC_FPS),
        };

        let detector_file = file.detector.unwrap_or_default();
        let target_label = detector_file
            .target_label
            .unwrap_or_else(|| DEFAULT_TARGET_LABEL.to_string());
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            model_path: detector_file
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            classes: detector_file
                .classes
                .unwrap_or_else(|| vec![target_label.clone()]),
            target_label,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            thresholds: detector_file.thresholds.unwrap_or_default(),
        };

        let tracker_file = file.tracker.unwrap_or_default();
        let tracker_defaults = TrackerSettings::default();
        let tracker = TrackerSettings {
            search_margin: tracker_file
                .search_margin
                .unwrap_or(tracker_defaults.search_margin),
            step: tracker_file.step.unwrap_or(tracker_defaults.step),
            max_mean_diff: tracker_file
                .max_mean_diff
                .unwrap_or(tracker_defaults.max_mean_diff),
        };

        let command_file = file.command.unwrap_or_default();
        let command = CommandSettings {
            addr: SocketAddr::new(host, command_file.port.unwrap_or(DEFAULT_COMMAND_PORT)),
            framing: command_file.framing.unwrap_or_default(),
            connect_timeout: Duration::from_millis(
                command_file
                    .connect_timeout_ms
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            ),
            send_timeout: Duration::from_millis(
                command_file
                    .send_timeout_ms
                    .unwrap_or(DEFAULT_SEND_TIMEOUT_MS),
            ),
        };

        Self {
            host,
            stream,
            detector,
            tracker,
            command,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(url) = non_empty_env("PILOT_STREAM_URL") {
            self.stream.url = url;
        }
        if let Some(path) = non_empty_env("PILOT_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(backend) = non_empty_env("PILOT_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(framing) = non_empty_env("PILOT_FRAMING") {
            self.command.framing = framing.parse()?;
        }
        if let Some(timeout) = non_empty_env("PILOT_SEND_TIMEOUT_MS") {
            let ms: u64 = timeout.parse().map_err(|_| {
                anyhow!("PILOT_SEND_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.command.send_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(url) = &overrides.stream_url {
            self.stream.url = url.clone();
        }
        if let Some(path) = &overrides.model_path {
            self.detector.model_path = path.clone();
        }
        if let Some(backend) = &overrides.detector {
            self.detector.backend = backend.clone();
        }
        if let Some(framing) = overrides.framing {
            self.command.framing = framing;
        }
    }

    fn validate(&mut self) -> Result<()> {
        self.detector.backend = self.detector.backend.trim().to_ascii_lowercase();
        if !matches!(self.detector.backend.as_str(), "stub" | "tract") {
            return Err(anyhow!(
                "detector backend must be stub or tract, got '{}'",
                self.detector.backend
            ));
        }
        if self.detector.target_label.trim().is_empty() {
            return Err(anyhow!("detector target_label must not be empty"));
        }
        if !self.detector.classes.contains(&self.detector.target_label) {
            return Err(anyhow!(
                "detector classes {:?} do not include target label '{}'",
                self.detector.classes,
                self.detector.target_label
            ));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        let t = &self.detector.thresholds;
        for (name, value) in [
            ("confidence", t.confidence),
            ("class_score", t.class_score),
            ("nms_score", t.nms_score),
            ("nms_iou", t.nms_iou),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("threshold {} must be within 0..=1", name));
            }
        }
        if self.tracker.step == 0 {
            return Err(anyhow!("tracker step must be greater than zero"));
        }
        if self.tracker.max_mean_diff <= 0.0 {
            return Err(anyhow!("tracker max_mean_diff must be positive"));
        }
        if self.stream.first_frame_timeout.is_zero() {
            return Err(anyhow!("stream first_frame_timeout must be greater than zero"));
        }
        if self.command.connect_timeout.is_zero() || self.command.send_timeout.is_zero() {
            return Err(anyhow!("command timeouts must be greater than zero"));
        }
        Ok(())
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<PilotConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
