//! Control primitives
//!
//! The numeric building blocks shared by every equipment algorithm: PID
//! with anti-windup, the outdoor-air-reset curve, hysteresis latches, and
//! occupancy schedules. Everything in this module is a pure function over
//! explicit state; no clocks, no I/O.

pub mod hysteresis;
pub mod oar;
pub mod occupancy;
pub mod pid;

pub use hysteresis::{HysteresisBand, LatchDirection};
pub use oar::ResetCurve;
pub use occupancy::{fan_cycle_active, OccupancySchedule};
pub use pid::{pid_compute, pid_run, PidOutput, PidParams, PidState};
