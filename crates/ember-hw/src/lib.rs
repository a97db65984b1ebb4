//! Hardware boundary of the robot. The GPIO-level drivers (TB6612FNG motor
//! bridges, servo PWM, pump, buzzer + RGB indicator, MCP3208 ADC channels,
//! gamepad) live outside this workspace; these traits are the seam they
//! plug into. Setters are idempotent and best-effort: retries, PWM detail
//! and pin mapping belong to the driver behind the trait.

pub mod bench;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorSide {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoAxis {
    Pan,
    Tilt,
}

/// Combined buzzer + indicator pattern. The control loop commands exactly
/// one pattern per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmPattern {
    None,
    /// Gas leak: siren + red/blue flash. Overrides everything.
    GasSiren,
    /// Fire seen but the tank is dry: distinct warning until refill.
    NoWater,
    /// Pump discharging: steady tone + red blink.
    PumpActive,
    /// Idle, manual mode (solid blue).
    IdleManual,
    /// Idle, auto mode (solid green).
    IdleAuto,
}

/// Differential drive, signed speeds in -100..=100.
pub trait Drive: Send {
    fn set_motor(&mut self, side: MotorSide, speed: f32);
    fn stop_all(&mut self);
}

/// Pan/tilt nozzle turret, degrees in 0..=180.
pub trait Turret: Send {
    fn set_angle(&mut self, axis: ServoAxis, degrees: f32);
}

pub trait Pump: Send {
    fn set_pump(&mut self, on: bool);
}

pub trait Alarm: Send {
    fn set_alarm(&mut self, pattern: AlarmPattern);
}

/// Raw polled ADC reads. Thresholding happens in the control layer against
/// calibrated config values; the electronics keep no state.
pub trait GasSense: Send {
    fn read(&mut self) -> u16;
}

pub trait FlameSense: Send {
    fn read(&mut self) -> u16;
}

pub trait WaterSense: Send {
    fn read(&mut self) -> u16;
}

pub trait Joystick: Send {
    fn axis(&mut self, i: u8) -> f32;
    fn button(&mut self, i: u8) -> bool;
}

pub struct Actuators {
    pub drive: Box<dyn Drive>,
    pub turret: Box<dyn Turret>,
    pub pump: Box<dyn Pump>,
    pub alarm: Box<dyn Alarm>,
}

pub struct Sensors {
    pub gas: Box<dyn GasSense>,
    pub flame: Box<dyn FlameSense>,
    pub water: Box<dyn WaterSense>,
}
