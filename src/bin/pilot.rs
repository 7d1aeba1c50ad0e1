//! pilot - obstacle-following remote control client
//!
//! This client:
//! 1. Pulls frames from the vehicle's RTSP stream on a background thread
//! 2. Detects the obstacle, then tracks it frame to frame
//! 3. Sends one steering decision per frame to the vehicle over TCP
//!
//! Quit with Ctrl-C or by typing `q` and Enter.
//!
//! A camera deployment needs both optional backends:
//!
//! ```text
//! cargo run --release --features rtsp-gstreamer,backend-tract --bin pilot -- 192.168.1.100
//! ```
//!
//! Without them only the synthetic pipeline works:
//! `pilot 127.0.0.1 --stream-url stub://camera --detector stub`.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use obstacle_pilot::{
    build_backend, config::ConfigOverrides, parse_host, ui, CommandChannel, Controller,
    FrameGrabber, FrameSource, Framing, LatestFrame, PilotConfig, RtspConfig, RtspSource,
    TemplateTrackerFactory,
};

#[derive(Parser, Debug)]
#[command(
    name = "pilot",
    author,
    version,
    about = "Steer a camera vehicle toward the obstacle it sees",
    after_help = "Real RTSP streams need the rtsp-gstreamer feature and the ONNX detector \
                  needs backend-tract. Without them, use --stream-url stub://camera --detector stub."
)]
struct Args {
    /// Vehicle IP address (IPv4 or IPv6)
    host: String,

    /// JSON config file (defaults to $PILOT_CONFIG when set)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// ONNX model path
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Detector backend (stub|tract)
    #[arg(long, value_name = "NAME")]
    detector: Option<String>,

    /// Command framing on the wire (raw|newline)
    #[arg(long, value_name = "MODE")]
    framing: Option<String>,

    /// Override the stream URL (e.g. stub://camera)
    #[arg(long, value_name = "URL")]
    stream_url: Option<String>,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let host = parse_host(&args.host)?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let overrides = ConfigOverrides {
        stream_url: args.stream_url.clone(),
        model_path: args.model.clone(),
        detector: args.detector.clone(),
        framing: args
            .framing
            .as_deref()
            .map(str::parse::<Framing>)
            .transpose()?,
    };
    let config = PilotConfig::load(host, args.config.as_deref(), &overrides)?;
    log::info!(
        "pilot starting: stream={}, detector={}, controller={}",
        config.stream.url,
        config.detector.backend,
        config.command.addr
    );

    let stop = Arc::new(AtomicBool::new(false));
    install_quit_handlers(stop.clone())?;

    let grabber = {
        let _stage = ui.stage("Connect video stream");
        let mut source = RtspSource::new(RtspConfig::from(&config.stream))?;
        source.connect()?;
        log::info!("frame source: {}", source.describe());
        let grabber = FrameGrabber::spawn(source, LatestFrame::new())?;
        match grabber.wait_for_first_frame(config.stream.first_frame_timeout, &stop)? {
            Some(first) => {
                log::info!("first frame received ({}x{})", first.width, first.height)
            }
            None => return quit_during_startup(grabber),
        }
        grabber
    };

    if stop.load(Ordering::SeqCst) {
        return quit_during_startup(grabber);
    }
    let detector = {
        let _stage = ui.stage("Load detector");
        let mut detector = build_backend(&config.detector)?;
        detector.warm_up()?;
        log::info!("detector ready: {}", detector.name());
        detector
    };

    if stop.load(Ordering::SeqCst) {
        return quit_during_startup(grabber);
    }
    let channel = {
        let _stage = ui.stage("Connect to vehicle controller");
        CommandChannel::connect(config.command.addr, &config.command)?
    };

    let mut controller = Controller::new(
        detector,
        Box::new(TemplateTrackerFactory::new(config.tracker)),
        &config.detector.target_label,
        channel,
    );

    let mut status = ui.status();
    let result = controller.run(grabber.mailbox(), &stop, |outcome| status.update(outcome));

    let stats = controller.stats();
    let summary = format!(
        "{} frames, {} detector runs, {} tracks started, {} lost",
        stats.frames, stats.detector_runs, stats.tracks_started, stats.tracks_lost
    );
    status.finish(&summary);

    let mut channel = controller.into_sink();
    channel.close();
    if let Err(err) = grabber.stop() {
        log::warn!("frame grabber did not stop cleanly: {:#}", err);
    }

    match result {
        Ok(()) => {
            log::info!("pilot stopped: {}", summary);
            Ok(())
        }
        Err(err) => {
            log::error!("pilot failed: {:#}", err);
            Err(err)
        }
    }
}

/// Release the stream and exit cleanly after a quit before the loop started.
fn quit_during_startup(grabber: FrameGrabber) -> Result<()> {
    log::info!("quit requested during startup");
    grabber.stop()
}

/// Ctrl-C and a `q` line on stdin both request a clean stop.
fn install_quit_handlers(stop: Arc<AtomicBool>) -> Result<()> {
    let on_signal = stop.clone();
    ctrlc::set_handler(move || {
        on_signal.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    std::thread::Builder::new()
        .name("quit-key".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) if line.trim().eq_ignore_ascii_case("q") => {
                        log::info!("quit requested");
                        stop.store(true, Ordering::SeqCst);
                        return;
                    }
                    Ok(_) => {}
                    Err(_) => return,
                }
            }
        })
        .context("failed to spawn quit-key thread")?;
    Ok(())
}
