//! PID controller with conditional-integration anti-windup and a
//! rate-limited integral increment.
//!
//! The controller is a pure function over carried state: callers pass the
//! previous [`PidState`] and store the returned one. Nothing here touches
//! a clock or shared storage, which keeps every loop trivially testable.

use serde::{Deserialize, Serialize};

/// Output band within which the previous output counts as saturated.
const SATURATION_BAND: f64 = 1.0;

/// Per-tick cap on the integral increment. Bounds integral growth across
/// sensor dropouts and setpoint jumps without sacrificing steady-state
/// tracking.
const INTEGRAL_RATE_LIMIT: f64 = 0.5;

/// Setpoint jump beyond which the integral is reset (bumpless transfer).
const BUMPLESS_THRESHOLD: f64 = 0.5;

/// Tuning parameters for one named controller (e.g. `heating`, `cooling`,
/// `outdoorDamper`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Lower output clamp. Invariant: `output_min <= output_max`.
    pub output_min: f64,
    /// Upper output clamp.
    pub output_max: f64,
    /// Reverse-acting loops (heating) compute error as setpoint − input;
    /// direct-acting (cooling) as input − setpoint.
    pub reverse_acting: bool,
    /// Absolute bound on the integral accumulator. Invariant: `>= 0`.
    pub max_integral: f64,
    /// Disabled controllers emit `output_min` and leave state untouched.
    pub enabled: bool,
}

impl Default for PidParams {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.1,
            kd: 0.0,
            output_min: 0.0,
            output_max: 100.0,
            reverse_acting: false,
            max_integral: 20.0,
            enabled: true,
        }
    }
}

impl PidParams {
    /// Clamp-order and sign sanity. Call at config-load time; a bad
    /// parameter set is a configuration error, not a tick error.
    pub fn validate(&self) -> Result<(), String> {
        if !self.output_min.is_finite() || !self.output_max.is_finite() {
            return Err("output clamps must be finite".to_string());
        }
        if self.output_min > self.output_max {
            return Err(format!(
                "output_min {} exceeds output_max {}",
                self.output_min, self.output_max
            ));
        }
        if self.max_integral < 0.0 {
            return Err(format!("max_integral {} is negative", self.max_integral));
        }
        Ok(())
    }
}

/// Carried state for one controller, created on first call and mutated
/// (by replacement) each tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PidState {
    pub integral: f64,
    pub previous_error: f64,
    pub last_output: f64,
    pub last_setpoint: f64,
}

impl PidState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Output of one PID evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidOutput {
    pub output: f64,
    pub state: PidState,
}

/// Evaluate one PID tick.
///
/// Non-finite inputs degrade instead of poisoning state: a NaN `input`
/// repeats the previous error, a NaN `setpoint` falls back to the carried
/// `last_setpoint`, and if neither is usable the controller holds
/// `last_output`.
pub fn pid_compute(
    input: f64,
    setpoint: f64,
    params: &PidParams,
    dt: f64,
    state: &PidState,
) -> PidOutput {
    if !params.enabled {
        return PidOutput {
            output: params.output_min,
            state: *state,
        };
    }

    let setpoint = if setpoint.is_finite() {
        setpoint
    } else if state.last_setpoint.is_finite() {
        state.last_setpoint
    } else {
        // No usable setpoint at all: hold the last output.
        return PidOutput {
            output: state.last_output.clamp(params.output_min, params.output_max),
            state: *state,
        };
    };

    let error = if input.is_finite() {
        if params.reverse_acting {
            setpoint - input
        } else {
            input - setpoint
        }
    } else {
        state.previous_error
    };

    let p_term = params.kp * error;

    // Anti-windup: conditional integration. The previous output counts as
    // saturated within SATURATION_BAND of either clamp; a saturated loop
    // only integrates when the new increment pushes back toward the
    // interior of the output range.
    let increment =
        (params.ki * error * dt).clamp(-INTEGRAL_RATE_LIMIT, INTEGRAL_RATE_LIMIT);
    let saturated_high = state.last_output >= params.output_max - SATURATION_BAND;
    let saturated_low = state.last_output <= params.output_min + SATURATION_BAND;
    let integrate = if saturated_high {
        increment < 0.0
    } else if saturated_low {
        increment > 0.0
    } else {
        true
    };
    let integral = if integrate {
        (state.integral + increment).clamp(-params.max_integral, params.max_integral)
    } else {
        state.integral
    };

    let d_term = params.kd * (error - state.previous_error) / dt.max(0.1);

    let output = (p_term + integral + d_term).clamp(params.output_min, params.output_max);

    PidOutput {
        output,
        state: PidState {
            integral,
            previous_error: error,
            last_output: output,
            last_setpoint: setpoint,
        },
    }
}

/// [`pid_compute`] with bumpless transfer: a setpoint jump larger than
/// 0.5 units resets the integral before evaluation. Algorithms call this;
/// the raw function exists for callers that manage resets themselves.
pub fn pid_run(
    input: f64,
    setpoint: f64,
    params: &PidParams,
    dt: f64,
    state: &PidState,
) -> PidOutput {
    let mut state = *state;
    if setpoint.is_finite()
        && state.last_setpoint != 0.0
        && (setpoint - state.last_setpoint).abs() > BUMPLESS_THRESHOLD
    {
        state.integral = 0.0;
    }
    pid_compute(input, setpoint, params, dt, &state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PidParams {
        PidParams {
            kp: 2.0,
            ki: 0.1,
            kd: 0.0,
            output_min: 0.0,
            output_max: 100.0,
            reverse_acting: false,
            max_integral: 10.0,
            enabled: true,
        }
    }

    #[test]
    fn proportional_only_reduces_to_clamped_kp_e() {
        let p = PidParams {
            ki: 0.0,
            kd: 0.0,
            ..params()
        };
        let out = pid_compute(80.0, 72.0, &p, 1.0, &PidState::default());
        assert!((out.output - 16.0).abs() < 1e-12);

        // Clamp side
        let out = pid_compute(200.0, 72.0, &p, 1.0, &PidState::default());
        assert!((out.output - 100.0).abs() < 1e-12);
        let out = pid_compute(60.0, 72.0, &p, 1.0, &PidState::default());
        assert!((out.output - 0.0).abs() < 1e-12);
    }

    #[test]
    fn reverse_acting_flips_error_sign() {
        let direct = pid_compute(77.0, 72.0, &params(), 1.0, &PidState::default());
        let p = PidParams {
            reverse_acting: true,
            ..params()
        };
        let reverse = pid_compute(67.0, 72.0, &p, 1.0, &PidState::default());
        assert!((direct.state.previous_error - 5.0).abs() < 1e-12);
        assert!((reverse.state.previous_error - 5.0).abs() < 1e-12);
    }

    #[test]
    fn integral_increment_is_rate_limited() {
        // ki * e * dt = 0.1 * 20 * 1 = 2.0, clamped to 0.5 per tick.
        let out = pid_compute(92.0, 72.0, &params(), 1.0, &PidState::default());
        assert!((out.state.integral - 0.5).abs() < 1e-12);
    }

    #[test]
    fn integral_is_bounded_by_max_integral() {
        let p = params();
        let mut state = PidState::default();
        for _ in 0..100 {
            // Keep last_output away from the clamps so integration runs.
            state.last_output = 50.0;
            let out = pid_compute(73.0, 72.0, &p, 1.0, &state);
            state = out.state;
            assert!(state.integral.abs() <= p.max_integral + 1e-12);
        }
    }

    #[test]
    fn saturated_high_stops_upward_integration() {
        let p = params();
        let state = PidState {
            integral: 5.0,
            previous_error: 20.0,
            last_output: 100.0,
            last_setpoint: 72.0,
        };
        // Positive error while pinned at output_max: integral must hold.
        let out = pid_compute(92.0, 72.0, &p, 1.0, &state);
        assert!((out.state.integral - 5.0).abs() < 1e-12);

        // Negative error while pinned high opposes saturation: integral moves.
        let out = pid_compute(62.0, 72.0, &p, 1.0, &state);
        assert!(out.state.integral < 5.0);
    }

    #[test]
    fn saturated_low_stops_downward_integration() {
        let p = params();
        let state = PidState {
            integral: -3.0,
            previous_error: -10.0,
            last_output: 0.5,
            last_setpoint: 72.0,
        };
        let out = pid_compute(62.0, 72.0, &p, 1.0, &state);
        assert!((out.state.integral - (-3.0)).abs() < 1e-12);

        let out = pid_compute(82.0, 72.0, &p, 1.0, &state);
        assert!(out.state.integral > -3.0);
    }

    #[test]
    fn derivative_uses_dt_floor() {
        let p = PidParams {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
            ..params()
        };
        // dt below the 0.1 floor must not blow up the derivative.
        let state = PidState::default();
        let out = pid_compute(73.0, 72.0, &p, 0.01, &state);
        assert!((out.output - 1.0 / 0.1).abs() < 1e-9);
    }

    #[test]
    fn output_always_within_clamps() {
        let p = params();
        let mut state = PidState::default();
        for input in [-500.0, -50.0, 0.0, 72.0, 150.0, 5000.0] {
            let out = pid_compute(input, 72.0, &p, 1.0, &state);
            assert!(out.output >= p.output_min && out.output <= p.output_max);
            state = out.state;
        }
    }

    #[test]
    fn nan_input_repeats_previous_error() {
        let p = params();
        let state = PidState {
            integral: 1.0,
            previous_error: 4.0,
            last_output: 9.0,
            last_setpoint: 72.0,
        };
        let out = pid_compute(f64::NAN, 72.0, &p, 1.0, &state);
        assert!((out.state.previous_error - 4.0).abs() < 1e-12);
        assert!(out.output.is_finite());
    }

    #[test]
    fn nan_setpoint_falls_back_to_last_setpoint() {
        let p = params();
        let state = PidState {
            last_setpoint: 72.0,
            ..PidState::default()
        };
        let out = pid_compute(77.0, f64::NAN, &p, 1.0, &state);
        assert!((out.state.previous_error - 5.0).abs() < 1e-12);
        assert_eq!(out.state.last_setpoint, 72.0);
    }

    #[test]
    fn bumpless_transfer_resets_integral_on_setpoint_jump() {
        let p = params();
        let state = PidState {
            integral: 6.0,
            previous_error: 2.0,
            last_output: 40.0,
            last_setpoint: 72.0,
        };
        let out = pid_run(77.0, 65.0, &p, 1.0, &state);
        // Integral restarted from zero, then one rate-limited increment.
        assert!(out.state.integral.abs() <= 0.5 + 1e-12);

        // Small adjustment within the threshold keeps the integral.
        let out = pid_run(77.0, 72.4, &p, 1.0, &state);
        assert!(out.state.integral > 5.0);
    }

    #[test]
    fn disabled_controller_emits_output_min() {
        let p = PidParams {
            enabled: false,
            ..params()
        };
        let state = PidState {
            integral: 3.0,
            ..PidState::default()
        };
        let out = pid_compute(90.0, 72.0, &p, 1.0, &state);
        assert_eq!(out.output, p.output_min);
        assert_eq!(out.state, state);
    }

    #[test]
    fn validate_rejects_inverted_clamps() {
        let p = PidParams {
            output_min: 10.0,
            output_max: 0.0,
            ..params()
        };
        assert!(p.validate().is_err());
        let p = PidParams {
            max_integral: -1.0,
            ..params()
        };
        assert!(p.validate().is_err());
        assert!(params().validate().is_ok());
    }
}
