use std::time::{Duration, Instant};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct PatrolCfg {
    pub forward_s: f32,
    pub turn_s: f32,
    pub speed: f32,
}

impl Default for PatrolCfg {
    fn default() -> Self {
        Self { forward_s: 2.0, turn_s: 1.0, speed: 20.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Forward,
    Turn,
}

/// Default search behavior for AUTO with no target: creep forward, pivot,
/// repeat.
#[derive(Debug)]
pub struct Patrol {
    cfg: PatrolCfg,
    phase: Phase,
    phase_start: Instant,
}

impl Patrol {
    pub fn new(cfg: PatrolCfg, now: Instant) -> Self {
        Self { cfg, phase: Phase::Forward, phase_start: now }
    }

    pub fn reset(&mut self, now: Instant) {
        self.phase = Phase::Forward;
        self.phase_start = now;
    }

    /// Differential speeds (left, right) for this cycle.
    pub fn tick(&mut self, now: Instant) -> (f32, f32) {
        let elapsed = now.duration_since(self.phase_start);
        match self.phase {
            Phase::Forward if elapsed >= Duration::from_secs_f32(self.cfg.forward_s) => {
                self.phase = Phase::Turn;
                self.phase_start = now;
            }
            Phase::Turn if elapsed >= Duration::from_secs_f32(self.cfg.turn_s) => {
                self.phase = Phase::Forward;
                self.phase_start = now;
            }
            _ => {}
        }
        match self.phase {
            Phase::Forward => (self.cfg.speed, self.cfg.speed),
            Phase::Turn => (self.cfg.speed, -self.cfg.speed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycles_through_forward_and_turn() {
        let t0 = Instant::now();
        let mut p = Patrol::new(PatrolCfg { forward_s: 2.0, turn_s: 1.0, speed: 20.0 }, t0);

        assert_eq!(p.tick(t0 + Duration::from_millis(100)), (20.0, 20.0));
        assert_eq!(p.tick(t0 + Duration::from_millis(1_900)), (20.0, 20.0));
        // forward phase expires -> pivot
        assert_eq!(p.tick(t0 + Duration::from_millis(2_100)), (20.0, -20.0));
        // turn phase expires -> forward again
        assert_eq!(p.tick(t0 + Duration::from_millis(3_200)), (20.0, 20.0));
    }

    #[test]
    fn reset_restarts_the_forward_phase() {
        let t0 = Instant::now();
        let mut p = Patrol::new(PatrolCfg::default(), t0);
        p.tick(t0 + Duration::from_secs(10)); // deep into some phase
        p.reset(t0 + Duration::from_secs(10));
        assert_eq!(p.tick(t0 + Duration::from_secs(10)), (20.0, 20.0));
    }
}
