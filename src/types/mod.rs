//! Core data model
//!
//! Shared types crossing component boundaries: equipment identity, metric
//! snapshots, command bags, and merged control settings.

pub mod command;
pub mod equipment;
pub mod metrics;
pub mod settings;

pub use command::{CommandBag, CommandRecord, CommandType, CommandValue};
pub use equipment::{Equipment, EquipmentType, PumpKind};
pub use metrics::{MetricSnapshot, MetricValue};
pub use settings::{canonical_key, ControlSettings, SettingsLayer};
