use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use obstacle_pilot::config::{ConfigOverrides, PilotConfig};
use obstacle_pilot::Framing;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PILOT_CONFIG",
        "PILOT_STREAM_URL",
        "PILOT_MODEL_PATH",
        "PILOT_DETECTOR",
        "PILOT_FRAMING",
        "PILOT_SEND_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

fn host() -> IpAddr {
    "192.168.1.100".parse().unwrap()
}

#[test]
fn defaults_point_at_the_vehicle() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PilotConfig::load(host(), None, &ConfigOverrides::default()).expect("load config");

    assert_eq!(cfg.stream.url, "rtsp://192.168.1.100:8554/video_stream");
    assert_eq!(
        cfg.command.addr,
        "192.168.1.100:65432".parse::<SocketAddr>().unwrap()
    );
    assert_eq!(cfg.command.framing, Framing::Raw);
    assert_eq!(cfg.detector.model_path, PathBuf::from("best.onnx"));
    assert_eq!(cfg.detector.target_label, "obstacle");
    assert_eq!(cfg.stream.first_frame_timeout, Duration::from_secs(10));
}

#[test]
fn ipv6_hosts_are_bracketed() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PilotConfig::load("::1".parse().unwrap(), None, &ConfigOverrides::default())
        .expect("load config");
    assert_eq!(cfg.stream.url, "rtsp://[::1]:8554/video_stream");
    assert_eq!(cfg.command.addr.port(), 65432);
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "stream": { "port": 9554, "path": "/cam", "first_frame_timeout_ms": 2500 },
        "detector": {
            "backend": "stub",
            "classes": ["cone", "obstacle"],
            "thresholds": { "confidence": 0.6 }
        },
        "tracker": { "search_margin": 12 },
        "command": { "port": 7000, "framing": "newline", "send_timeout_ms": 500 }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("PILOT_CONFIG", file.path());
    std::env::set_var("PILOT_MODEL_PATH", "/models/obstacle.onnx");
    std::env::set_var("PILOT_SEND_TIMEOUT_MS", "750");

    let cfg = PilotConfig::load(host(), None, &ConfigOverrides::default()).expect("load config");

    assert_eq!(cfg.stream.url, "rtsp://192.168.1.100:9554/cam");
    assert_eq!(cfg.stream.first_frame_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.detector.classes, vec!["cone", "obstacle"]);
    assert_eq!(cfg.detector.thresholds.confidence, 0.6);
    assert_eq!(cfg.detector.thresholds.class_score, 0.2);
    assert_eq!(cfg.detector.model_path, PathBuf::from("/models/obstacle.onnx"));
    assert_eq!(cfg.tracker.search_margin, 12);
    assert_eq!(cfg.tracker.step, 2);
    assert_eq!(cfg.command.addr.port(), 7000);
    assert_eq!(cfg.command.framing, Framing::Newline);
    assert_eq!(cfg.command.send_timeout, Duration::from_millis(750));

    clear_env();
}

#[test]
fn cli_overrides_win_over_environment() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PILOT_STREAM_URL", "rtsp://10.0.0.2:8554/other");
    std::env::set_var("PILOT_DETECTOR", "tract");
    let overrides = ConfigOverrides {
        stream_url: Some("stub://camera".to_string()),
        detector: Some("STUB".to_string()),
        framing: Some(Framing::Newline),
        ..ConfigOverrides::default()
    };

    let cfg = PilotConfig::load(host(), None, &overrides).expect("load config");
    assert_eq!(cfg.stream.url, "stub://camera");
    assert_eq!(cfg.detector.backend, "stub");
    assert_eq!(cfg.command.framing, Framing::Newline);

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let bad_backend = ConfigOverrides {
        detector: Some("yolo9000".to_string()),
        ..ConfigOverrides::default()
    };
    assert!(PilotConfig::load(host(), None, &bad_backend).is_err());

    std::env::set_var("PILOT_SEND_TIMEOUT_MS", "soon");
    assert!(PilotConfig::load(host(), None, &ConfigOverrides::default()).is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "detector": { "classes": ["cone"] } }"#)
        .expect("write config");
    let err = PilotConfig::load(host(), Some(file.path()), &ConfigOverrides::default())
        .unwrap_err();
    assert!(err.to_string().contains("target label"));
}
