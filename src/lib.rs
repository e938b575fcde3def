//! Atrium BMS: Building Operational Control Engine
//!
//! Periodically reads sensor telemetry and operator setpoints for HVAC
//! equipment across multiple locations, evaluates per-equipment control
//! algorithms, and writes actionable command values to a time-series
//! store for downstream actuation.
//!
//! ## Architecture
//!
//! - **Supervisor**: owns the runtime, starts one processor per location
//! - **Location processor**: one periodic task per equipment type,
//!   skip-tick scheduling
//! - **Dispatcher**: `(equipment type, location)` → control algorithm
//! - **Control primitives**: PID with anti-windup, OAR curves, hysteresis
//!   latches, occupancy schedules
//! - **Lead-lag coordinator**: rotation and failover for redundant groups
//! - **TSDB gateway**: SQL reads and line-protocol writes with bounded
//!   retry

pub mod config;
pub mod control;
pub mod coordination;
pub mod equipment;
pub mod metadata;
pub mod processor;
pub mod runtime;
pub mod state;
pub mod supervisor;
pub mod tsdb;
pub mod types;

// Re-export the configuration surfaces
pub use config::{EngineConfig, SiteConfig};

// Re-export commonly used types
pub use types::{
    CommandBag, CommandRecord, CommandType, CommandValue, ControlSettings, Equipment,
    EquipmentType, MetricSnapshot, MetricValue, PumpKind, SettingsLayer,
};

// Re-export the control primitives
pub use control::{pid_compute, pid_run, PidParams, PidState, ResetCurve};

// Re-export the engine surfaces
pub use equipment::{Algorithm, AlgorithmInput, AlgorithmOutput, Dispatcher};
pub use runtime::Runtime;
pub use supervisor::Supervisor;
