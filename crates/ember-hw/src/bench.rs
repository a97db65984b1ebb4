//! Bench-rig stand-ins: actuator writes go to the log, sensors return fixed
//! configured values, the joystick is idle. Lets the whole control stack run
//! on a desk without the robot attached.

use tracing::debug;

use crate::{
    Actuators, Alarm, AlarmPattern, Drive, FlameSense, GasSense, Joystick, MotorSide, Pump,
    Sensors, ServoAxis, Turret, WaterSense,
};

pub struct LogDrive {
    left: f32,
    right: f32,
}

impl Drive for LogDrive {
    fn set_motor(&mut self, side: MotorSide, speed: f32) {
        let slot = match side {
            MotorSide::Left => &mut self.left,
            MotorSide::Right => &mut self.right,
        };
        if *slot != speed {
            *slot = speed;
            debug!("drive: {:?} -> {:.0}", side, speed);
        }
    }

    fn stop_all(&mut self) {
        self.set_motor(MotorSide::Left, 0.0);
        self.set_motor(MotorSide::Right, 0.0);
    }
}

pub struct LogTurret {
    pan: f32,
    tilt: f32,
}

impl Turret for LogTurret {
    fn set_angle(&mut self, axis: ServoAxis, degrees: f32) {
        let slot = match axis {
            ServoAxis::Pan => &mut self.pan,
            ServoAxis::Tilt => &mut self.tilt,
        };
        if *slot != degrees {
            *slot = degrees;
            debug!("turret: {:?} -> {:.1}deg", axis, degrees);
        }
    }
}

pub struct LogPump {
    on: bool,
}

impl Pump for LogPump {
    fn set_pump(&mut self, on: bool) {
        if self.on != on {
            self.on = on;
            debug!("pump: {}", if on { "ON" } else { "off" });
        }
    }
}

pub struct LogAlarm {
    pattern: AlarmPattern,
}

impl Alarm for LogAlarm {
    fn set_alarm(&mut self, pattern: AlarmPattern) {
        if self.pattern != pattern {
            self.pattern = pattern;
            debug!("alarm: {:?}", pattern);
        }
    }
}

/// One fixed ADC value, usable for any of the three sensor channels.
pub struct FixedSensor(pub u16);

impl GasSense for FixedSensor {
    fn read(&mut self) -> u16 {
        self.0
    }
}

impl FlameSense for FixedSensor {
    fn read(&mut self) -> u16 {
        self.0
    }
}

impl WaterSense for FixedSensor {
    fn read(&mut self) -> u16 {
        self.0
    }
}

pub struct IdleJoystick;

impl Joystick for IdleJoystick {
    fn axis(&mut self, _i: u8) -> f32 {
        0.0
    }

    fn button(&mut self, _i: u8) -> bool {
        false
    }
}

pub fn actuators() -> Actuators {
    Actuators {
        drive: Box::new(LogDrive { left: 0.0, right: 0.0 }),
        turret: Box::new(LogTurret { pan: 90.0, tilt: 90.0 }),
        pump: Box::new(LogPump { on: false }),
        alarm: Box::new(LogAlarm { pattern: AlarmPattern::None }),
    }
}

pub fn sensors(gas_adc: u16, flame_adc: u16, water_adc: u16) -> Sensors {
    Sensors {
        gas: Box::new(FixedSensor(gas_adc)),
        flame: Box::new(FixedSensor(flame_adc)),
        water: Box::new(FixedSensor(water_adc)),
    }
}
