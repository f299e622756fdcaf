//! The discrete fatigue update.
//!
//! Over a timestep `dt` with intensity `I` (0 for a background tick,
//! the batch message count for a processed batch):
//!
//! ```text
//! momentum ← max(0, momentum·(1 − β·dt) + α·I·dt)
//! consume  ← k·I^p·dt
//! recover  ← (r·(1 − current/S_max) − γ·momentum)·dt
//! current  ← clamp(current − consume + recover, 0, S_max)
//! ```
//!
//! Rest mode suspends cost and recovery; momentum still decays.

use chattermill_core::stamina::StaminaLevel;
use serde::{Deserialize, Serialize};

/// Model parameters. All configurable; see the configuration crate for
/// the deployed defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaminaParams {
    /// S_max — the cap
    pub max: f64,
    /// k — base cost per message unit
    pub base_cost: f64,
    /// p — non-linearity exponent on intensity
    pub exponent: f64,
    /// α — momentum accrual
    pub momentum_gain: f64,
    /// β — momentum decay
    pub momentum_decay: f64,
    /// γ — momentum → recovery suppression
    pub momentum_drag: f64,
    /// r — base recovery rate
    pub recovery_rate: f64,
    /// Warn boundary, in stamina units
    pub low_threshold: f64,
    /// Strictly below this, level is critical; in stamina units
    pub critical_threshold: f64,
}

/// The mutable model state. One instance per process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaminaState {
    /// Current stamina in `[0, max]`
    pub current: f64,
    /// Accumulated activity pressure, never negative
    pub momentum: f64,
    /// Suspends cost and recovery; momentum still decays
    pub rest_mode: bool,
}

impl StaminaState {
    /// Start at full stamina.
    pub fn full(params: &StaminaParams, rest_mode: bool) -> Self {
        Self {
            current: params.max,
            momentum: 0.0,
            rest_mode,
        }
    }

    /// Apply one discrete update.
    pub fn update(&mut self, params: &StaminaParams, intensity: f64, dt: f64) {
        if dt <= 0.0 {
            return;
        }

        self.momentum = (self.momentum * (1.0 - params.momentum_decay * dt)
            + params.momentum_gain * intensity * dt)
            .max(0.0);

        if self.rest_mode {
            return;
        }

        let consume = params.base_cost * intensity.powf(params.exponent) * dt;
        let recover = (params.recovery_rate * (1.0 - self.current / params.max)
            - params.momentum_drag * self.momentum)
            * dt;
        self.current = (self.current - consume + recover).clamp(0.0, params.max);
    }

    /// Ratio of current to cap, in `[0, 1]`.
    pub fn ratio(&self, params: &StaminaParams) -> f64 {
        self.current / params.max
    }

    /// Derive the level label. The critical boundary is strict: a value
    /// sitting exactly on the threshold is still `low`.
    pub fn level(&self, params: &StaminaParams) -> StaminaLevel {
        let ratio = self.ratio(params);
        if ratio >= 0.70 {
            StaminaLevel::High
        } else if ratio >= 0.50 {
            StaminaLevel::Medium
        } else if self.current >= params.critical_threshold {
            StaminaLevel::Low
        } else {
            StaminaLevel::Critical
        }
    }

    /// Whether a reply can be afforded: not resting, at least one message
    /// unit of stamina available, and not critically drained.
    pub fn can_reply(&self, params: &StaminaParams) -> bool {
        !self.rest_mode
            && self.current >= params.base_cost
            && self.level(params) != StaminaLevel::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> StaminaParams {
        StaminaParams {
            max: 100.0,
            base_cost: 1.0,
            exponent: 1.0,
            momentum_gain: 0.5,
            momentum_decay: 0.1,
            momentum_drag: 0.4,
            recovery_rate: 2.0,
            low_threshold: 30.0,
            critical_threshold: 10.0,
        }
    }

    #[test]
    fn bounds_hold_across_updates() {
        let p = params();
        let mut state = StaminaState::full(&p, false);
        for _ in 0..500 {
            state.update(&p, 10.0, 1.0);
            assert!(state.current >= 0.0 && state.current <= p.max);
            assert!(state.momentum >= 0.0);
        }
        for _ in 0..5000 {
            state.update(&p, 0.0, 1.0);
            assert!(state.current >= 0.0 && state.current <= p.max);
            assert!(state.momentum >= 0.0);
        }
    }

    #[test]
    fn batches_cost_and_build_momentum() {
        let p = params();
        let mut state = StaminaState::full(&p, false);
        state.update(&p, 5.0, 1.0);
        assert!(state.current < p.max);
        assert!(state.momentum > 0.0);
    }

    #[test]
    fn momentum_suppresses_recovery_after_a_burst() {
        let p = params();
        let mut burst = StaminaState::full(&p, false);
        for _ in 0..10 {
            burst.update(&p, 8.0, 1.0);
        }
        let drained = burst.current;
        let with_momentum = burst.momentum;
        assert!(with_momentum > 0.0);

        // Same drain level, no momentum: recovery is faster.
        let mut calm = StaminaState {
            current: drained,
            momentum: 0.0,
            rest_mode: false,
        };
        burst.update(&p, 0.0, 1.0);
        calm.update(&p, 0.0, 1.0);
        assert!(calm.current > burst.current);
    }

    #[test]
    fn idle_ticks_recover_toward_cap() {
        let p = params();
        let mut state = StaminaState {
            current: 40.0,
            momentum: 0.0,
            rest_mode: false,
        };
        for _ in 0..200 {
            state.update(&p, 0.0, 1.0);
        }
        assert!(state.current > 95.0);
    }

    #[test]
    fn rest_mode_freezes_current_but_decays_momentum() {
        let p = params();
        let mut state = StaminaState {
            current: 42.0,
            momentum: 3.0,
            rest_mode: true,
        };
        state.update(&p, 0.0, 1.0);
        assert_eq!(state.current, 42.0);
        assert!(state.momentum < 3.0);
    }

    #[test]
    fn level_thresholds() {
        let p = params();
        let at = |current: f64| StaminaState {
            current,
            momentum: 0.0,
            rest_mode: false,
        };
        assert_eq!(at(70.0).level(&p), StaminaLevel::High);
        assert_eq!(at(69.9).level(&p), StaminaLevel::Medium);
        assert_eq!(at(50.0).level(&p), StaminaLevel::Medium);
        assert_eq!(at(49.9).level(&p), StaminaLevel::Low);
        // Exactly on the critical threshold is still low.
        assert_eq!(at(10.0).level(&p), StaminaLevel::Low);
        assert_eq!(at(9.9).level(&p), StaminaLevel::Critical);
    }

    #[test]
    fn reply_gate() {
        let p = params();
        let healthy = StaminaState {
            current: 60.0,
            momentum: 0.0,
            rest_mode: false,
        };
        assert!(healthy.can_reply(&p));

        let critical = StaminaState {
            current: 5.0,
            momentum: 0.0,
            rest_mode: false,
        };
        assert!(!critical.can_reply(&p));

        let resting = StaminaState {
            current: 90.0,
            momentum: 0.0,
            rest_mode: true,
        };
        assert!(!resting.can_reply(&p));
    }

    #[test]
    fn nonlinear_exponent_amplifies_large_batches() {
        let mut p = params();
        p.exponent = 2.0;
        let mut small = StaminaState::full(&p, false);
        let mut large = StaminaState::full(&p, false);
        small.update(&p, 2.0, 1.0);
        large.update(&p, 4.0, 1.0);
        let small_cost = p.max - small.current;
        let large_cost = p.max - large.current;
        // Quadratic cost: doubling intensity should much more than double it.
        assert!(large_cost > small_cost * 3.0);
    }
}
