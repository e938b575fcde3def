//! Hysteresis latch
//!
//! Two-threshold on/off latch preventing short-cycling around a single
//! setpoint. The latch direction depends on service: hot-water equipment
//! engages as the input falls, chilled-water as it rises.

use serde::{Deserialize, Serialize};

/// Which input direction engages the latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LatchDirection {
    /// Engage when the input drops to `on_threshold` or below, release
    /// when it climbs to `off_threshold` or above (hot-water service:
    /// on ≤ 74°F, off ≥ 75°F).
    OnFalling,
    /// Engage when the input rises to `on_threshold` or above, release
    /// when it drops to `off_threshold` or below (chilled-water service:
    /// on ≥ 37°F, off ≤ 36°F).
    OnRising,
}

/// Hysteresis thresholds for one latch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HysteresisBand {
    pub direction: LatchDirection,
    pub on_threshold: f64,
    pub off_threshold: f64,
}

impl HysteresisBand {
    pub const fn on_falling(on_threshold: f64, off_threshold: f64) -> Self {
        Self {
            direction: LatchDirection::OnFalling,
            on_threshold,
            off_threshold,
        }
    }

    pub const fn on_rising(on_threshold: f64, off_threshold: f64) -> Self {
        Self {
            direction: LatchDirection::OnRising,
            on_threshold,
            off_threshold,
        }
    }

    /// Advance the latch one tick. `engaged` is the carried latch state;
    /// the return value is the new state. A non-finite input holds the
    /// latch where it is.
    pub fn update(&self, engaged: bool, input: f64) -> bool {
        if !input.is_finite() {
            return engaged;
        }
        match self.direction {
            LatchDirection::OnFalling => {
                if input <= self.on_threshold {
                    true
                } else if input >= self.off_threshold {
                    false
                } else {
                    engaged
                }
            }
            LatchDirection::OnRising => {
                if input >= self.on_threshold {
                    true
                } else if input <= self.off_threshold {
                    false
                } else {
                    engaged
                }
            }
        }
    }

    /// The on/off thresholds must be distinct and ordered so a dead zone
    /// exists between them.
    pub fn validate(&self) -> Result<(), String> {
        let ordered = match self.direction {
            LatchDirection::OnFalling => self.on_threshold < self.off_threshold,
            LatchDirection::OnRising => self.on_threshold > self.off_threshold,
        };
        if !ordered {
            return Err(format!(
                "hysteresis thresholds on={} off={} leave no dead zone ({:?})",
                self.on_threshold, self.off_threshold, self.direction
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hot-water pumps: on at ≤74°F, off at ≥75°F.
    const HW: HysteresisBand = HysteresisBand::on_falling(74.0, 75.0);
    // Chilled-water pumps: on at ≥37°F, off at ≤36°F.
    const CW: HysteresisBand = HysteresisBand::on_rising(37.0, 36.0);

    #[test]
    fn hw_pump_sequence_latches_and_releases() {
        let mut engaged = false;
        let mut observed = Vec::new();
        for oat in [76.0, 74.0, 73.0, 75.0, 76.0] {
            engaged = HW.update(engaged, oat);
            observed.push(engaged);
        }
        assert_eq!(observed, vec![false, true, true, false, false]);
    }

    #[test]
    fn latch_holds_inside_dead_zone() {
        // 74 < input < 75 keeps whatever state was carried in.
        assert!(HW.update(true, 74.5));
        assert!(!HW.update(false, 74.5));
    }

    #[test]
    fn thresholds_are_inclusive() {
        assert!(HW.update(false, 74.0));
        assert!(!HW.update(true, 75.0));
        assert!(CW.update(false, 37.0));
        assert!(!CW.update(true, 36.0));
    }

    #[test]
    fn cw_direction_engages_on_rising() {
        let mut engaged = false;
        engaged = CW.update(engaged, 30.0);
        assert!(!engaged);
        engaged = CW.update(engaged, 38.0);
        assert!(engaged);
        engaged = CW.update(engaged, 36.5);
        assert!(engaged);
        engaged = CW.update(engaged, 35.0);
        assert!(!engaged);
    }

    #[test]
    fn non_finite_input_holds_state() {
        assert!(HW.update(true, f64::NAN));
        assert!(!HW.update(false, f64::NAN));
    }

    #[test]
    fn validate_requires_dead_zone() {
        assert!(HysteresisBand::on_falling(75.0, 75.0).validate().is_err());
        assert!(HysteresisBand::on_rising(36.0, 37.0).validate().is_err());
        assert!(HW.validate().is_ok());
        assert!(CW.validate().is_ok());
    }
}
