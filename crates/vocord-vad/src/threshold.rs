use crate::config::VadConfig;

const FLOOR_MIN_DB: f32 = -90.0;
const FLOOR_MAX_DB: f32 = -20.0;

/// Adaptive noise floor with a clamped EMA update.
///
/// The floor only moves while the detector is in its silence phase, so a long
/// stretch of speech cannot drag the baseline up underneath itself.
pub struct AdaptiveThreshold {
    floor_db: f32,
    initial_floor_db: f32,
    margin_db: f32,
    absolute_gate_db: f32,
    ema_alpha: f32,
    max_step_db: f32,
}

impl AdaptiveThreshold {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            floor_db: config.initial_floor_db,
            initial_floor_db: config.initial_floor_db,
            margin_db: config.margin_db,
            absolute_gate_db: config.absolute_gate_db,
            ema_alpha: config.ema_alpha,
            max_step_db: config.max_step_db,
        }
    }

    /// Candidate test: above the adapted floor by the margin AND above the
    /// absolute gate.
    pub fn is_candidate(&self, level_db: f32) -> bool {
        level_db > self.floor_db + self.margin_db && level_db > self.absolute_gate_db
    }

    /// Feed one frame level. `adapting` is true only in the silence phase.
    pub fn update(&mut self, level_db: f32, adapting: bool) {
        if !adapting {
            return;
        }
        let target = self.ema_alpha * level_db + (1.0 - self.ema_alpha) * self.floor_db;
        let step = (target - self.floor_db).clamp(-self.max_step_db, self.max_step_db);
        self.floor_db = (self.floor_db + step).clamp(FLOOR_MIN_DB, FLOOR_MAX_DB);
    }

    pub fn current_floor(&self) -> f32 {
        self.floor_db
    }

    pub fn reset(&mut self) {
        self.floor_db = self.initial_floor_db;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold() -> AdaptiveThreshold {
        AdaptiveThreshold::new(&VadConfig::default())
    }

    #[test]
    fn candidate_requires_margin_and_gate() {
        let t = threshold();
        // floor -60, margin 10, gate -35
        assert!(!t.is_candidate(-55.0)); // above floor, below margin and gate
        assert!(!t.is_candidate(-40.0)); // clears margin, not the gate
        assert!(t.is_candidate(-20.0));
    }

    #[test]
    fn floor_does_not_move_during_speech() {
        let mut t = threshold();
        let before = t.current_floor();
        for _ in 0..100 {
            t.update(-20.0, false);
        }
        assert_eq!(t.current_floor(), before);
    }

    #[test]
    fn floor_adapts_during_silence() {
        let mut t = threshold();
        for _ in 0..100 {
            t.update(-50.0, true);
        }
        assert!(t.current_floor() > -60.0);
    }

    #[test]
    fn adaptation_step_is_clamped() {
        let mut t = threshold();
        let before = t.current_floor();
        t.update(0.0, true); // absurdly loud frame
        assert!((t.current_floor() - before).abs() <= 0.5 + f32::EPSILON);
    }

    #[test]
    fn floor_is_clamped_to_sane_range() {
        let mut t = threshold();
        for _ in 0..10_000 {
            t.update(0.0, true);
        }
        assert!(t.current_floor() <= FLOOR_MAX_DB);
        for _ in 0..10_000 {
            t.update(-120.0, true);
        }
        assert!(t.current_floor() >= FLOOR_MIN_DB);
    }

    #[test]
    fn reset_restores_baseline() {
        let mut t = threshold();
        for _ in 0..50 {
            t.update(-40.0, true);
        }
        assert_ne!(t.current_floor(), -60.0);
        t.reset();
        assert_eq!(t.current_floor(), -60.0);
    }
}
