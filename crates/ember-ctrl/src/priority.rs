use std::time::{Duration, Instant};

use serde::Deserialize;

use crate::mode::Mode;
use ember_hw::AlarmPattern;

#[derive(Debug, Clone, Deserialize)]
pub struct PumpCfg {
    /// Continuous firing time per qualifying confirmation.
    pub shot_duration_s: f32,
}

impl Default for PumpCfg {
    fn default() -> Self {
        Self { shot_duration_s: 3.0 }
    }
}

/// Continuous firing window. A qualifying confirmation opens or refreshes
/// it; the pump then holds on for the full duration even if the detection
/// flickers out for a few frames.
#[derive(Debug)]
pub struct ShotWindow {
    started: Option<Instant>,
    duration: Duration,
}

impl ShotWindow {
    pub fn new(duration: Duration) -> Self {
        Self { started: None, duration }
    }

    pub fn refresh(&mut self, now: Instant) {
        self.started = Some(now);
    }

    pub fn cancel(&mut self) {
        self.started = None;
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.started
            .map(|t| now.duration_since(t) < self.duration)
            .unwrap_or(false)
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.started
            .map(|t| self.duration.saturating_sub(now.duration_since(t)))
            .unwrap_or(Duration::ZERO)
    }
}

/// Sensor/vision picture for one control cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleInputs {
    pub mode: Mode,
    pub gas_alarm: bool,
    pub flame_sensor: bool,
    pub vision_found: bool,
    pub water_empty: bool,
    pub manual_pump_held: bool,
}

/// What the resolver decided for this cycle. Exactly one alarm pattern.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actuation {
    pub alarm: AlarmPattern,
    pub pump_on: bool,
    pub halt_drive: bool,
}

/// Strict precedence: gas beats everything, an empty tank disarms the pump,
/// only then may a confirmed fire open the shot window. Vision alone never
/// discharges — the flame sensor must corroborate.
pub fn resolve(inputs: CycleInputs, window: &mut ShotWindow, now: Instant) -> Actuation {
    if inputs.gas_alarm {
        window.cancel();
        return Actuation { alarm: AlarmPattern::GasSiren, pump_on: false, halt_drive: true };
    }

    if inputs.water_empty {
        window.cancel();
        let fire_seen = inputs.vision_found || inputs.flame_sensor;
        let alarm = if fire_seen { AlarmPattern::NoWater } else { idle_pattern(inputs.mode) };
        return Actuation { alarm, pump_on: false, halt_drive: false };
    }

    match inputs.mode {
        Mode::Auto => {
            if inputs.vision_found && inputs.flame_sensor {
                window.refresh(now);
            }
            if window.is_open(now) {
                return Actuation {
                    alarm: AlarmPattern::PumpActive,
                    pump_on: true,
                    halt_drive: false,
                };
            }
        }
        Mode::Manual => {
            if inputs.manual_pump_held {
                return Actuation {
                    alarm: AlarmPattern::PumpActive,
                    pump_on: true,
                    halt_drive: false,
                };
            }
        }
    }

    Actuation { alarm: idle_pattern(inputs.mode), pump_on: false, halt_drive: false }
}

fn idle_pattern(mode: Mode) -> AlarmPattern {
    match mode {
        Mode::Manual => AlarmPattern::IdleManual,
        Mode::Auto => AlarmPattern::IdleAuto,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHOT: Duration = Duration::from_secs(3);

    fn auto_inputs() -> CycleInputs {
        CycleInputs {
            mode: Mode::Auto,
            gas_alarm: false,
            flame_sensor: false,
            vision_found: false,
            water_empty: false,
            manual_pump_held: false,
        }
    }

    #[test]
    fn gas_overrides_a_confirmed_fire() {
        let mut win = ShotWindow::new(SHOT);
        let now = Instant::now();
        let act = resolve(
            CycleInputs {
                gas_alarm: true,
                flame_sensor: true,
                vision_found: true,
                ..auto_inputs()
            },
            &mut win,
            now,
        );
        assert_eq!(act.alarm, AlarmPattern::GasSiren);
        assert!(!act.pump_on);
        assert!(act.halt_drive);
        // the window must not have been opened behind the siren
        assert!(!win.is_open(now));
    }

    #[test]
    fn empty_tank_keeps_pump_off_across_reconfirmations() {
        let mut win = ShotWindow::new(SHOT);
        let t0 = Instant::now();
        for i in 0..10 {
            let now = t0 + Duration::from_millis(i * 33);
            let act = resolve(
                CycleInputs {
                    flame_sensor: true,
                    vision_found: true,
                    water_empty: true,
                    ..auto_inputs()
                },
                &mut win,
                now,
            );
            assert!(!act.pump_on, "cycle {i}");
            assert_eq!(act.alarm, AlarmPattern::NoWater);
        }
    }

    #[test]
    fn window_holds_for_full_duration_after_one_confirmation() {
        let mut win = ShotWindow::new(SHOT);
        let t0 = Instant::now();

        let act = resolve(
            CycleInputs { flame_sensor: true, vision_found: true, ..auto_inputs() },
            &mut win,
            t0,
        );
        assert!(act.pump_on);
        assert_eq!(act.alarm, AlarmPattern::PumpActive);

        // vision drops out; the pump holds until the window closes
        let act = resolve(auto_inputs(), &mut win, t0 + Duration::from_millis(2_900));
        assert!(act.pump_on);
        let act = resolve(auto_inputs(), &mut win, t0 + Duration::from_millis(3_100));
        assert!(!act.pump_on);
        assert_eq!(act.alarm, AlarmPattern::IdleAuto);
    }

    #[test]
    fn persistent_fire_refreshes_the_window() {
        let mut win = ShotWindow::new(SHOT);
        let t0 = Instant::now();
        for i in 0..5 {
            let now = t0 + Duration::from_secs(i);
            let act = resolve(
                CycleInputs { flame_sensor: true, vision_found: true, ..auto_inputs() },
                &mut win,
                now,
            );
            assert!(act.pump_on, "second {i}");
        }
    }

    #[test]
    fn vision_without_flame_sensor_never_fires() {
        let mut win = ShotWindow::new(SHOT);
        let now = Instant::now();
        let act = resolve(CycleInputs { vision_found: true, ..auto_inputs() }, &mut win, now);
        assert!(!act.pump_on);
        assert_eq!(act.alarm, AlarmPattern::IdleAuto);

        let act =
            resolve(CycleInputs { flame_sensor: true, ..auto_inputs() }, &mut win, now);
        assert!(!act.pump_on);
    }

    #[test]
    fn manual_pump_is_direct_but_gated() {
        let mut win = ShotWindow::new(SHOT);
        let now = Instant::now();
        let manual = CycleInputs { mode: Mode::Manual, manual_pump_held: true, ..auto_inputs() };

        let act = resolve(manual, &mut win, now);
        assert!(act.pump_on);
        assert_eq!(act.alarm, AlarmPattern::PumpActive);

        let act = resolve(CycleInputs { water_empty: true, ..manual }, &mut win, now);
        assert!(!act.pump_on);

        let act = resolve(CycleInputs { gas_alarm: true, ..manual }, &mut win, now);
        assert!(!act.pump_on);
        assert_eq!(act.alarm, AlarmPattern::GasSiren);
    }

    #[test]
    fn idle_pattern_tracks_the_mode() {
        let mut win = ShotWindow::new(SHOT);
        let now = Instant::now();
        let act = resolve(auto_inputs(), &mut win, now);
        assert_eq!(act.alarm, AlarmPattern::IdleAuto);
        let act = resolve(CycleInputs { mode: Mode::Manual, ..auto_inputs() }, &mut win, now);
        assert_eq!(act.alarm, AlarmPattern::IdleManual);
    }
}
