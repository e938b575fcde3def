//! Occupancy scheduling
//!
//! Time-of-day occupancy windows, evaluated against site-local time. The
//! clock is passed in by the processor so algorithm evaluation stays a
//! pure function of its inputs.

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Occupancy schedule for a location (or a single air handler).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum OccupancySchedule {
    /// Equipment that conditions around the clock.
    Always,
    /// Daily window; `start > end` wraps past midnight.
    Window { start: NaiveTime, end: NaiveTime },
}

impl OccupancySchedule {
    /// Standard business-hours window.
    pub fn business_hours() -> Self {
        OccupancySchedule::Window {
            start: NaiveTime::from_hms_opt(6, 30, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(20, 30, 0).unwrap_or_default(),
        }
    }

    /// Whether the location is occupied at the given site-local time.
    pub fn is_occupied(&self, local: NaiveTime) -> bool {
        match self {
            OccupancySchedule::Always => true,
            OccupancySchedule::Window { start, end } => {
                if start <= end {
                    local >= *start && local < *end
                } else {
                    // Overnight window, e.g. 22:00–06:00.
                    local >= *start || local < *end
                }
            }
        }
    }
}

/// Unoccupied fan cycling: within each hour the fan runs for the first
/// `run_minutes` and rests for the remainder.
pub fn fan_cycle_active(local: NaiveTime, run_minutes: u32) -> bool {
    local.minute() < run_minutes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).expect("valid time")
    }

    #[test]
    fn always_is_always_occupied() {
        assert!(OccupancySchedule::Always.is_occupied(t(3, 0)));
    }

    #[test]
    fn window_bounds() {
        let sched = OccupancySchedule::business_hours();
        assert!(!sched.is_occupied(t(6, 29)));
        assert!(sched.is_occupied(t(6, 30)));
        assert!(sched.is_occupied(t(14, 0)));
        assert!(!sched.is_occupied(t(20, 30)));
    }

    #[test]
    fn overnight_window_wraps_midnight() {
        let sched = OccupancySchedule::Window {
            start: t(22, 0),
            end: t(6, 0),
        };
        assert!(sched.is_occupied(t(23, 30)));
        assert!(sched.is_occupied(t(2, 0)));
        assert!(!sched.is_occupied(t(12, 0)));
    }

    #[test]
    fn fan_cycles_first_quarter_of_each_hour() {
        assert!(fan_cycle_active(t(9, 0), 15));
        assert!(fan_cycle_active(t(9, 14), 15));
        assert!(!fan_cycle_active(t(9, 15), 15));
        assert!(!fan_cycle_active(t(9, 59), 15));
    }
}
