//! Outdoor-air-reset curve
//!
//! Piecewise-linear schedule from outdoor temperature to a water or air
//! setpoint: full setpoint at the cold endpoint, minimum at the warm
//! endpoint, linear in between, clamped outside.

use serde::{Deserialize, Serialize};

/// One reset schedule, e.g. 32°F→155°F down to 72°F→80°F.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResetCurve {
    /// Outdoor temperature at (and below) which `max_setpoint` applies.
    pub min_oat: f64,
    /// Outdoor temperature at (and above) which `min_setpoint` applies.
    pub max_oat: f64,
    /// Setpoint at the cold end.
    pub max_setpoint: f64,
    /// Setpoint at the warm end.
    pub min_setpoint: f64,
}

impl ResetCurve {
    pub const fn new(min_oat: f64, max_setpoint: f64, max_oat: f64, min_setpoint: f64) -> Self {
        Self {
            min_oat,
            max_oat,
            max_setpoint,
            min_setpoint,
        }
    }

    /// Interpolated setpoint for the given outdoor temperature.
    ///
    /// Endpoints are exact; out-of-range outdoor temperatures clamp to the
    /// endpoint setpoints. A degenerate curve (`min_oat == max_oat`)
    /// returns `max_setpoint`.
    pub fn setpoint_for(&self, outdoor_temp: f64) -> f64 {
        if !outdoor_temp.is_finite() || outdoor_temp <= self.min_oat {
            return self.max_setpoint;
        }
        if outdoor_temp >= self.max_oat {
            return self.min_setpoint;
        }
        let span = self.max_oat - self.min_oat;
        if span <= 0.0 {
            return self.max_setpoint;
        }
        let fraction = (outdoor_temp - self.min_oat) / span;
        self.max_setpoint - fraction * (self.max_setpoint - self.min_setpoint)
    }

    /// Endpoint ordering sanity, for the config validation pass.
    pub fn validate(&self) -> Result<(), String> {
        if self.min_oat >= self.max_oat {
            return Err(format!(
                "reset curve min_oat {} must be below max_oat {}",
                self.min_oat, self.max_oat
            ));
        }
        if self.min_setpoint > self.max_setpoint {
            return Err(format!(
                "reset curve min_setpoint {} exceeds max_setpoint {}",
                self.min_setpoint, self.max_setpoint
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Heritage boiler schedule.
    const CURVE: ResetCurve = ResetCurve::new(32.0, 155.0, 72.0, 80.0);

    #[test]
    fn endpoints_are_exact() {
        assert_eq!(CURVE.setpoint_for(32.0), 155.0);
        assert_eq!(CURVE.setpoint_for(72.0), 80.0);
    }

    #[test]
    fn midpoint_is_arithmetic_mean() {
        let mid = CURVE.setpoint_for((32.0 + 72.0) / 2.0);
        assert!((mid - (155.0 + 80.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn interpolates_linearly() {
        // 52°F is 20/40 of the way across: 155 − 0.5·75 = 117.5.
        assert!((CURVE.setpoint_for(52.0) - 117.5).abs() < 1e-12);
    }

    #[test]
    fn clamps_outside_range() {
        assert_eq!(CURVE.setpoint_for(-20.0), 155.0);
        assert_eq!(CURVE.setpoint_for(95.0), 80.0);
    }

    #[test]
    fn non_finite_outdoor_falls_to_cold_endpoint() {
        assert_eq!(CURVE.setpoint_for(f64::NAN), 155.0);
    }

    #[test]
    fn validate_rejects_inverted_endpoints() {
        assert!(ResetCurve::new(72.0, 155.0, 32.0, 80.0).validate().is_err());
        assert!(ResetCurve::new(32.0, 80.0, 72.0, 155.0).validate().is_err());
        assert!(CURVE.validate().is_ok());
    }
}
