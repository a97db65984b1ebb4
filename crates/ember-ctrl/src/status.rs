use serde::Serialize;
use tokio::sync::watch;

use crate::mode::Mode;
use ember_hw::AlarmPattern;

/// One-per-cycle snapshot for the status display. Published fire-and-forget
/// with overwrite semantics: a slow reader sees the newest state, never a
/// backlog, and the control loop never waits on it.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub ts_unix_ms: i64,
    pub mode: Mode,
    pub alarm: AlarmPattern,
    pub pump_on: bool,
    pub fire_vision: bool,
    pub flame_sensor: bool,
    pub gas_alarm: bool,
    pub water_pct: f32,
    pub pan_deg: f32,
    pub tilt_deg: f32,
}

impl StatusSnapshot {
    pub fn initial() -> Self {
        Self {
            ts_unix_ms: 0,
            mode: Mode::Auto,
            alarm: AlarmPattern::None,
            pump_on: false,
            fire_vision: false,
            flame_sensor: false,
            gas_alarm: false,
            water_pct: 0.0,
            pan_deg: 90.0,
            tilt_deg: 90.0,
        }
    }
}

pub type StatusTx = watch::Sender<StatusSnapshot>;
pub type StatusRx = watch::Receiver<StatusSnapshot>;

pub fn channel() -> (StatusTx, StatusRx) {
    watch::channel(StatusSnapshot::initial())
}

pub fn now_unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
