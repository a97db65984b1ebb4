use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// One captured frame, RGB8. Owned by whichever stage holds it; the capture
/// task publishes a fresh copy, it is never shared in place.
#[derive(Debug, Clone)]
pub struct Frame {
    pub w: u32,
    pub h: u32,
    pub rgb: Vec<u8>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    pub mode: String,   // "libcamera-jpeg" | "v4l2-mjpeg"
    pub device: String, // /dev/video0 (v4l2)
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

/// Single-slot overwrite buffer between the capture task and the control
/// loop. The newest frame replaces the previous one; staleness is fine,
/// backlog is not. The lock is held only for the swap or the copy-out,
/// never across decode or inference.
#[derive(Clone, Default)]
pub struct LatestFrame(Arc<Mutex<Option<Frame>>>);

impl LatestFrame {
    pub fn publish(&self, frame: Frame) {
        *self.0.lock().unwrap() = Some(frame);
    }

    /// Copy out the most recent frame, or None if nothing was captured yet.
    /// Non-blocking beyond the copy itself.
    pub fn latest(&self) -> Option<Frame> {
        self.0.lock().unwrap().clone()
    }
}

/// Pragmatic capture:
/// - libcamera-jpeg: `libcamera-still -n -t 1 --width ... --height ... -o -`
///   returns a JPEG frame on stdout (simple, robust on Pi)
/// - v4l2-mjpeg: `ffmpeg` grabs a single MJPEG frame (keeps Rust
///   dependencies small)
pub async fn capture_jpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    match cfg.mode.as_str() {
        "libcamera-jpeg" => capture_libcamera(cfg).await,
        "v4l2-mjpeg" => capture_v4l2_ffmpeg(cfg).await,
        other => anyhow::bail!("unknown camera.mode: {}", other),
    }
}

async fn capture_libcamera(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("libcamera-still");
    cmd.args([
        "-n",                 // no preview
        "-t", "1",            // 1ms
        "--width", &cfg.width.to_string(),
        "--height", &cfg.height.to_string(),
        "-o", "-",            // stdout
    ]);

    debug!("capture: libcamera-still");
    let out = cmd.output().await.context("run libcamera-still")?;
    anyhow::ensure!(out.status.success(), "libcamera-still failed");
    Ok(out.stdout)
}

async fn capture_v4l2_ffmpeg(cfg: &CameraConfig) -> Result<Vec<u8>> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args([
        "-hide_banner", "-loglevel", "error",
        "-f", "video4linux2",
        "-input_format", "mjpeg",
        "-video_size", &format!("{}x{}", cfg.width, cfg.height),
        "-i", &cfg.device,
        "-vframes", "1",
        "-f", "image2pipe",
        "-vcodec", "mjpeg",
        "-",
    ]);

    debug!("capture: ffmpeg v4l2");
    let out = cmd.output().await.context("run ffmpeg capture")?;
    anyhow::ensure!(out.status.success(), "ffmpeg capture failed");
    Ok(out.stdout)
}

pub async fn capture_frame(cfg: &CameraConfig) -> Result<Frame> {
    let jpeg = capture_jpeg(cfg).await?;
    let img = image::load_from_memory(&jpeg).context("decode jpeg")?.to_rgb8();
    Ok(Frame { w: img.width(), h: img.height(), rgb: img.into_raw() })
}

/// Capture role: grab frames until the stop channel flips, overwriting the
/// shared slot. Grab failures are logged and retried at frame cadence; the
/// control loop just sees a stale or missing frame.
pub fn spawn_capture(
    cfg: CameraConfig,
    slot: LatestFrame,
    stop: tokio::sync::watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let gap = Duration::from_millis(1000 / cfg.fps.max(1) as u64);
        while !*stop.borrow() {
            match capture_frame(&cfg).await {
                Ok(f) => slot.publish(f),
                Err(e) => warn!("camera grab failed: {:#}", e),
            }
            tokio::time::sleep(gap).await;
        }
        debug!("capture task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_frame_overwrites_and_copies_out() {
        let slot = LatestFrame::default();
        assert!(slot.latest().is_none());

        slot.publish(Frame { w: 2, h: 1, rgb: vec![0; 6] });
        slot.publish(Frame { w: 4, h: 2, rgb: vec![1; 24] });

        let f = slot.latest().unwrap();
        assert_eq!((f.w, f.h), (4, 2));
        // copy-out leaves the newest frame in place for the next reader
        assert!(slot.latest().is_some());
    }
}
