use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::watch;
use tracing::{info, warn};

use ember_hw::{Actuators, AlarmPattern, Joystick, MotorSide, Sensors, ServoAxis};
use ember_vision::camera::{Frame, LatestFrame};
use ember_vision::{select_target, AimTarget, Detector, Letterbox};

use crate::mode::{Mode, ModeSwitch};
use crate::patrol::Patrol;
use crate::priority::{self, Actuation, CycleInputs, ShotWindow};
use crate::servo::{ServoPose, VisualServo};
use crate::status::{self, StatusSnapshot, StatusTx};
use crate::{water_percent, ControlConfig};

/// Inference dominates the cycle time; run it every Nth cycle and reuse
/// the previous result in between.
#[derive(Debug)]
struct InferGate {
    every_n: u32,
    counter: u64,
}

impl InferGate {
    fn new(every_n: u32) -> Self {
        Self { every_n: every_n.max(1), counter: 0 }
    }

    fn tick(&mut self) -> bool {
        self.counter += 1;
        self.counter % self.every_n as u64 == 0
    }
}

/// The control role. All loop state is owned here; the only things shared
/// with other roles are the frame slot, the status channel and the stop
/// signal.
pub struct ControlLoop {
    cfg: ControlConfig,
    actuators: Actuators,
    sensors: Sensors,
    joystick: Box<dyn Joystick>,
    detector: Option<Box<dyn Detector>>,
    frames: LatestFrame,
    status: StatusTx,
    stop: watch::Receiver<bool>,

    mode: ModeSwitch,
    servo: VisualServo,
    window: ShotWindow,
    patrol: Patrol,
    gate: InferGate,
    last_target: AimTarget,
}

impl ControlLoop {
    pub fn new(
        cfg: ControlConfig,
        actuators: Actuators,
        sensors: Sensors,
        joystick: Box<dyn Joystick>,
        detector: Option<Box<dyn Detector>>,
        frames: LatestFrame,
        status: StatusTx,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let now = Instant::now();
        let window = ShotWindow::new(Duration::from_secs_f32(cfg.pump.shot_duration_s));
        let patrol = Patrol::new(cfg.patrol.clone(), now);
        let servo = VisualServo::new(cfg.servo.clone());
        let gate = InferGate::new(cfg.infer_every_n);
        Self {
            cfg,
            actuators,
            sensors,
            joystick,
            detector,
            frames,
            status,
            stop,
            mode: ModeSwitch::new(Mode::Auto),
            servo,
            window,
            patrol,
            gate,
            last_target: AimTarget::default(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let period = Duration::from_secs_f32(1.0 / self.cfg.loop_hz.max(1.0));
        let mut tick = tokio::time::interval(period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            "control loop: {:.0}Hz, inference every {} cycles, vision {}",
            self.cfg.loop_hz,
            self.cfg.infer_every_n,
            if self.detector.is_some() { "on" } else { "off" },
        );

        loop {
            tick.tick().await;
            if *self.stop.borrow() {
                self.safe_stop();
                info!("control loop: stop signal, actuators safed");
                return Ok(());
            }
            self.cycle(Instant::now());
        }
    }

    /// One fixed-cadence control cycle.
    fn cycle(&mut self, now: Instant) {
        // Mode toggle, debounced on the rising edge. A transition is a
        // settling cycle: everything stops, nothing crosses the boundary,
        // the new mode's path starts on the next tick.
        let toggle_held = self.joystick.button(self.cfg.buttons.mode_toggle);
        if let Some(mode) = self.mode.poll(toggle_held) {
            self.safe_stop();
            self.window.cancel();
            if mode == Mode::Auto {
                self.servo.recenter();
                self.apply_pose(self.servo.pose());
                self.patrol.reset(now);
            }
            info!("mode switched: {:?}", mode);
            return;
        }
        let mode = self.mode.mode();

        // Sensor picture for this cycle.
        let gas_alarm = self.sensors.gas.read() > self.cfg.sensors.gas_threshold;
        let flame = self.sensors.flame.read() > self.cfg.sensors.flame_threshold;
        let water_pct = water_percent(self.sensors.water.read(), &self.cfg.sensors);
        let water_empty = water_pct <= self.cfg.sensors.water_min_pct;

        // Vision: newest frame only, inference rate-limited by the gate and
        // run outside the frame lock. No frame is a transient condition; the
        // previous detections carry over either way.
        if self.gate.tick() {
            if let Some(frame) = self.frames.latest() {
                self.run_inference(&frame);
            }
        }
        let target = self.last_target;

        let manual_pump_held =
            mode == Mode::Manual && self.joystick.button(self.cfg.buttons.pump);
        let act = priority::resolve(
            CycleInputs {
                mode,
                gas_alarm,
                flame_sensor: flame,
                vision_found: target.found,
                water_empty,
                manual_pump_held,
            },
            &mut self.window,
            now,
        );

        // Drive path, gated by mode unless the resolver halted it.
        if act.halt_drive {
            self.actuators.drive.stop_all();
        } else {
            match mode {
                Mode::Manual => self.manual_drive(),
                Mode::Auto => self.auto_drive(target, act, now),
            }
        }

        self.actuators.pump.set_pump(act.pump_on);
        self.actuators.alarm.set_alarm(act.alarm);

        self.publish_status(mode, act, target, flame, gas_alarm, water_pct);
    }

    fn run_inference(&mut self, frame: &Frame) {
        let Some(det) = self.detector.as_mut() else {
            self.last_target = AimTarget::default();
            return;
        };
        match det.detect(frame) {
            Ok(dets) => {
                let lb = Letterbox::new(frame.w, frame.h, det.input_size());
                self.last_target = select_target(&dets, &lb);
            }
            Err(e) => {
                // Vision failure degrades to patrol; it never takes the
                // loop down.
                warn!("inference failed: {:#}", e);
                self.last_target = AimTarget::default();
            }
        }
    }

    fn manual_drive(&mut self) {
        let x = self.joystick.axis(0);
        let y = -self.joystick.axis(1); // stick up = forward
        let max = self.cfg.max_speed;
        let base = y * max;
        let turn = x * max;
        self.actuators.drive.set_motor(MotorSide::Left, (base + turn).clamp(-max, max));
        self.actuators.drive.set_motor(MotorSide::Right, (base - turn).clamp(-max, max));

        // Turret nudges, fixed degrees per held cycle.
        let (dpan, dtilt) = self.button_deltas();
        if dpan != 0.0 || dtilt != 0.0 {
            let pose = self.servo.nudge_manual(dpan, dtilt);
            self.apply_pose(pose);
        }
    }

    fn auto_drive(&mut self, target: AimTarget, act: Actuation, now: Instant) {
        // Same buttons adjust the aim trim in auto.
        let (dx, dy) = self.button_deltas();
        if dx != 0.0 || dy != 0.0 {
            self.servo.nudge_trim(dx, dy);
        }

        if target.found {
            // Stop to aim; the servo takes one proportional step per cycle.
            self.actuators.drive.stop_all();
            let pose = self.servo.track(target);
            self.apply_pose(pose);
            self.patrol.reset(now);
        } else if act.pump_on {
            // Mid-shot with the target flickered out: hold position and
            // pose until the window closes.
            self.actuators.drive.stop_all();
        } else {
            let (l, r) = self.patrol.tick(now);
            self.actuators.drive.set_motor(MotorSide::Left, l);
            self.actuators.drive.set_motor(MotorSide::Right, r);
        }
    }

    /// A/B/X/Y as a signed pair: pan/trim-x from X and B, tilt/trim-y from
    /// Y and A.
    fn button_deltas(&mut self) -> (f32, f32) {
        let b = self.cfg.buttons.clone();
        let mut dx = 0.0;
        let mut dy = 0.0;
        if self.joystick.button(b.x) {
            dx -= 1.0;
        }
        if self.joystick.button(b.b) {
            dx += 1.0;
        }
        if self.joystick.button(b.y) {
            dy += 1.0;
        }
        if self.joystick.button(b.a) {
            dy -= 1.0;
        }
        (dx, dy)
    }

    fn apply_pose(&mut self, pose: ServoPose) {
        self.actuators.turret.set_angle(ServoAxis::Pan, pose.pan);
        self.actuators.turret.set_angle(ServoAxis::Tilt, pose.tilt);
    }

    fn safe_stop(&mut self) {
        self.actuators.drive.stop_all();
        self.actuators.pump.set_pump(false);
        self.actuators.alarm.set_alarm(AlarmPattern::None);
    }

    fn publish_status(
        &self,
        mode: Mode,
        act: Actuation,
        target: AimTarget,
        flame: bool,
        gas: bool,
        water_pct: f32,
    ) {
        let pose = self.servo.pose();
        self.status.send_replace(StatusSnapshot {
            ts_unix_ms: status::now_unix_ms(),
            mode,
            alarm: act.alarm,
            pump_on: act.pump_on,
            fire_vision: target.found,
            flame_sensor: flame,
            gas_alarm: gas,
            water_pct,
            pan_deg: pose.pan,
            tilt_deg: pose.tilt,
        });
    }
}
