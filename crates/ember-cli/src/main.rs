use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use ember_ctrl::status::StatusRx;
use ember_ctrl::{ControlConfig, ControlLoop};
use ember_hw::bench;
use ember_vision::camera::{self, CameraConfig, LatestFrame};
use ember_vision::{Detector, VisionConfig};

#[cfg(feature = "vision-tflite")]
use ember_vision::tflite::TfliteDetector;

#[derive(Debug, Parser)]
#[command(name = "ember", version, about = "EMBER - Autonomous Fire-Suppression Ground Robot")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the configuration and the vision model path.
    Doctor,
    /// Run the capture + control + status roles until ctrl-c.
    Run,
    Vision {
        #[command(subcommand)]
        cmd: VisionCmd,
    },
}

#[derive(Debug, Subcommand)]
enum VisionCmd {
    /// Print the model's tensor shapes for bring-up.
    Inspect,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    control: ControlConfig,
    camera: Option<CameraConfig>,
    vision: Option<VisionConfig>,
    bench: Option<BenchCfg>,
}

/// Fixed ADC values for the bench rig sensors.
#[derive(Debug, Clone, serde::Deserialize)]
struct BenchCfg {
    gas_adc: u16,
    flame_adc: u16,
    water_adc: u16,
}

impl Default for BenchCfg {
    fn default() -> Self {
        Self { gas_adc: 0, flame_adc: 0, water_adc: 100 }
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    Ok(toml::from_str(&s).context("parse config toml")?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg),
        Command::Run => run(&cfg).await,
        Command::Vision { cmd } => vision_cmd(&cfg, cmd),
    }
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let c = &cfg.control;
    anyhow::ensure!(c.loop_hz >= 1.0 && c.loop_hz <= 120.0, "control.loop_hz should be 1..120");
    anyhow::ensure!(c.infer_every_n >= 1, "control.infer_every_n must be >= 1");
    anyhow::ensure!(
        c.max_speed > 0.0 && c.max_speed <= 100.0,
        "control.max_speed out of range"
    );

    let s = &c.servo;
    anyhow::ensure!(s.pan_gain > 0.0 && s.tilt_gain > 0.0, "servo gains must be positive");
    anyhow::ensure!(
        s.trim_limit > 0.0 && s.trim_limit <= 0.5,
        "servo.trim_limit should be 0..0.5"
    );
    anyhow::ensure!(s.trim_step > 0.0, "servo.trim_step must be positive");

    anyhow::ensure!(c.pump.shot_duration_s > 0.0, "pump.shot_duration_s must be positive");
    anyhow::ensure!(
        c.sensors.water_empty_adc > c.sensors.water_full_adc,
        "sensors.water_empty_adc must exceed water_full_adc"
    );
    anyhow::ensure!(
        c.patrol.forward_s > 0.0 && c.patrol.turn_s > 0.0,
        "patrol phase times must be positive"
    );

    if let Some(v) = &cfg.vision {
        if v.enable {
            anyhow::ensure!(
                v.conf_threshold > 0.0 && v.conf_threshold < 1.0,
                "vision.conf_threshold out of range"
            );
            anyhow::ensure!(
                v.iou_threshold > 0.0 && v.iou_threshold < 1.0,
                "vision.iou_threshold out of range"
            );
            anyhow::ensure!(v.input_size > 0, "vision.input_size invalid");
            anyhow::ensure!(
                v.num_classes >= 1 && v.class_names.len() == v.num_classes,
                "vision.class_names must match num_classes"
            );
            anyhow::ensure!(
                std::path::Path::new(&v.model_path).exists(),
                "vision.model_path not found: {}",
                v.model_path
            );
            anyhow::ensure!(cfg.camera.is_some(), "vision enabled but no [camera] section");
        }
    }

    info!("doctor: OK");
    Ok(())
}

fn vision_cmd(cfg: &Config, cmd: VisionCmd) -> Result<()> {
    let _ = cfg;
    match cmd {
        VisionCmd::Inspect => {
            #[cfg(feature = "vision-tflite")]
            {
                let v = cfg.vision.clone().context("no [vision] config section")?;
                let mut det = TfliteDetector::new(v)?;
                print!("{}", det.inspect()?);
                return Ok(());
            }
            #[allow(unreachable_code)]
            {
                anyhow::bail!("vision backend not available; build with --features vision-tflite");
            }
        }
    }
}

async fn run(cfg: &Config) -> Result<()> {
    info!("run: starting");

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c: stopping");
            let _ = stop_tx.send(true);
        }
    });

    // Capture role: only if a camera is configured; the control role runs
    // blind otherwise (still mobile and alarm-capable).
    let frames = LatestFrame::default();
    if let Some(cam) = cfg.camera.clone() {
        camera::spawn_capture(cam, frames.clone(), stop_rx.clone());
    } else {
        warn!("no [camera] section: running without vision input");
    }

    let detector = init_detector(cfg);

    // Status display role: independent consumer of the per-cycle snapshot.
    let (status_tx, status_rx) = ember_ctrl::status::channel();
    spawn_status_display(status_rx, stop_rx.clone());

    // The GPIO rigs live outside this workspace; the binary drives the
    // bench rig so the whole stack runs on a desk.
    let bench_cfg = cfg.bench.clone().unwrap_or_default();
    let actuators = bench::actuators();
    let sensors = bench::sensors(bench_cfg.gas_adc, bench_cfg.flame_adc, bench_cfg.water_adc);
    let joystick = Box::new(bench::IdleJoystick);

    let control = ControlLoop::new(
        cfg.control.clone(),
        actuators,
        sensors,
        joystick,
        detector,
        frames,
        status_tx,
        stop_rx,
    );
    control.run().await
}

fn spawn_status_display(status: StatusRx, stop: watch::Receiver<bool>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        while !*stop.borrow() {
            tick.tick().await;
            let s = status.borrow().clone();
            info!(
                "status: mode={:?} alarm={:?} pump={} vision={} flame={} gas={} water={:.0}% pan={:.0} tilt={:.0}",
                s.mode,
                s.alarm,
                s.pump_on,
                s.fire_vision,
                s.flame_sensor,
                s.gas_alarm,
                s.water_pct,
                s.pan_deg,
                s.tilt_deg,
            );
        }
    });
}

fn init_detector(cfg: &Config) -> Option<Box<dyn Detector>> {
    let v = cfg.vision.as_ref()?;
    if !v.enable {
        return None;
    }

    #[cfg(not(feature = "vision-tflite"))]
    {
        warn!("vision enabled but binary built without --features vision-tflite; running blind");
        None
    }

    #[cfg(feature = "vision-tflite")]
    {
        // A missing or corrupt model is not fatal: the robot stays mobile
        // and alarm-capable with zero detections.
        match TfliteDetector::new(v.clone()) {
            Ok(d) => Some(Box::new(d)),
            Err(e) => {
                warn!("vision: model load failed, running blind: {:#}", e);
                None
            }
        }
    }
}
