//! Command types
//!
//! Each tick produces a command bag: a map from command type to value.
//! Before write, the bag is filtered to the allowed command set for the
//! equipment type; anything outside the set is dropped with a debug log.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::equipment::EquipmentType;

/// Every command the engine can emit, across all equipment types.
///
/// The wire names (used in line-protocol measurements and the UI command
/// store) are the camelCase strings from [`CommandType::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CommandType {
    // Shared
    UnitEnable,
    TemperatureSetpoint,
    SafetyShutoff,
    SafetyReason,
    IsLead,
    LeadLagGroupId,
    LeadEquipmentId,
    LeadLagReason,

    // Fan coil / air handler
    FanEnabled,
    FanSpeed,
    FanMode,
    OutdoorDamperPosition,
    HeatingValvePosition,
    CoolingValvePosition,
    HeatingValveMode,
    CoolingValveMode,
    OperationMode,

    // Boiler
    Firing,
    WaterTempSetpoint,
    OutdoorTemp,
    SupplyTemp,

    // Pump
    PumpType,
    PumpRuntime,
    OutdoorTemperature,
    PumpAmps,
    PumpStatus,
    TemperatureSource,
    FailureCount,

    // Air handler
    SupplyAirTempSetpoint,
    IsOccupied,
    DxEnabled,
    CwCircPumpEnabled,
    ChillerEnabled,
    HeatingStage1Command,
    HeatingStage2Command,

    // Steam bundle
    PrimaryValvePosition,
    SecondaryValvePosition,
    SafetyStatus,
}

impl CommandType {
    /// Wire name (camelCase), as the UI store and downstream actuation see it.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::UnitEnable => "unitEnable",
            CommandType::TemperatureSetpoint => "temperatureSetpoint",
            CommandType::SafetyShutoff => "safetyShutoff",
            CommandType::SafetyReason => "safetyReason",
            CommandType::IsLead => "isLead",
            CommandType::LeadLagGroupId => "leadLagGroupId",
            CommandType::LeadEquipmentId => "leadEquipmentId",
            CommandType::LeadLagReason => "leadLagReason",
            CommandType::FanEnabled => "fanEnabled",
            CommandType::FanSpeed => "fanSpeed",
            CommandType::FanMode => "fanMode",
            CommandType::OutdoorDamperPosition => "outdoorDamperPosition",
            CommandType::HeatingValvePosition => "heatingValvePosition",
            CommandType::CoolingValvePosition => "coolingValvePosition",
            CommandType::HeatingValveMode => "heatingValveMode",
            CommandType::CoolingValveMode => "coolingValveMode",
            CommandType::OperationMode => "operationMode",
            CommandType::Firing => "firing",
            CommandType::WaterTempSetpoint => "waterTempSetpoint",
            CommandType::OutdoorTemp => "outdoorTemp",
            CommandType::SupplyTemp => "supplyTemp",
            CommandType::PumpType => "pumpType",
            CommandType::PumpRuntime => "pumpRuntime",
            CommandType::OutdoorTemperature => "outdoorTemperature",
            CommandType::PumpAmps => "pumpAmps",
            CommandType::PumpStatus => "pumpStatus",
            CommandType::TemperatureSource => "temperatureSource",
            CommandType::FailureCount => "failureCount",
            CommandType::SupplyAirTempSetpoint => "supplyAirTempSetpoint",
            CommandType::IsOccupied => "isOccupied",
            CommandType::DxEnabled => "dxEnabled",
            CommandType::CwCircPumpEnabled => "cwCircPumpEnabled",
            CommandType::ChillerEnabled => "chillerEnabled",
            CommandType::HeatingStage1Command => "heatingStage1Command",
            CommandType::HeatingStage2Command => "heatingStage2Command",
            CommandType::PrimaryValvePosition => "primaryValvePosition",
            CommandType::SecondaryValvePosition => "secondaryValvePosition",
            CommandType::SafetyStatus => "safetyStatus",
        }
    }

    /// Commands whose wire encoding is the literal `true`/`false`.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            CommandType::UnitEnable
                | CommandType::FanEnabled
                | CommandType::IsOccupied
                | CommandType::DxEnabled
                | CommandType::CwCircPumpEnabled
                | CommandType::ChillerEnabled
                | CommandType::SafetyShutoff
        )
    }

    /// Allowed command set per equipment type; anything outside the set is
    /// filtered before write.
    pub fn allowed_for(equipment_type: EquipmentType) -> &'static [CommandType] {
        use CommandType::*;
        match equipment_type {
            EquipmentType::FanCoil => &[
                FanEnabled,
                OutdoorDamperPosition,
                HeatingValvePosition,
                CoolingValvePosition,
                TemperatureSetpoint,
                UnitEnable,
                FanSpeed,
                FanMode,
                HeatingValveMode,
                CoolingValveMode,
                OperationMode,
            ],
            EquipmentType::Boiler => &[
                UnitEnable,
                Firing,
                WaterTempSetpoint,
                TemperatureSetpoint,
                IsLead,
                LeadLagGroupId,
                LeadEquipmentId,
                LeadLagReason,
                OutdoorTemp,
                SupplyTemp,
                SafetyShutoff,
                SafetyReason,
            ],
            EquipmentType::Pump => &[
                UnitEnable,
                IsLead,
                PumpType,
                PumpRuntime,
                LeadLagGroupId,
                LeadEquipmentId,
                LeadLagReason,
                OutdoorTemperature,
                PumpAmps,
                PumpStatus,
                TemperatureSource,
                FailureCount,
            ],
            EquipmentType::Chiller => &[UnitEnable, WaterTempSetpoint],
            EquipmentType::AirHandler => &[
                HeatingValvePosition,
                CoolingValvePosition,
                FanEnabled,
                FanSpeed,
                OutdoorDamperPosition,
                SupplyAirTempSetpoint,
                TemperatureSetpoint,
                UnitEnable,
                IsOccupied,
                DxEnabled,
                CwCircPumpEnabled,
                ChillerEnabled,
                HeatingStage1Command,
                HeatingStage2Command,
            ],
            EquipmentType::SteamBundle => &[
                PrimaryValvePosition,
                SecondaryValvePosition,
                TemperatureSetpoint,
                UnitEnable,
                PumpStatus,
                SafetyStatus,
            ],
        }
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single command value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandValue {
    Float(f64),
    Bool(bool),
    Text(String),
}

impl CommandValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CommandValue::Float(v) => Some(*v),
            CommandValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            CommandValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CommandValue::Bool(b) => Some(*b),
            CommandValue::Float(v) => Some(*v != 0.0),
            CommandValue::Text(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
        }
    }
}

impl From<f64> for CommandValue {
    fn from(v: f64) -> Self {
        CommandValue::Float(v)
    }
}

impl From<bool> for CommandValue {
    fn from(v: bool) -> Self {
        CommandValue::Bool(v)
    }
}

impl From<&str> for CommandValue {
    fn from(v: &str) -> Self {
        CommandValue::Text(v.to_string())
    }
}

impl From<String> for CommandValue {
    fn from(v: String) -> Self {
        CommandValue::Text(v)
    }
}

/// The output of one algorithm tick: command type → value.
///
/// `BTreeMap` keeps iteration (and therefore write and log order)
/// deterministic, which the idempotence tests rely on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandBag {
    commands: BTreeMap<CommandType, CommandValue>,
}

impl CommandBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, command: CommandType, value: impl Into<CommandValue>) -> &mut Self {
        self.commands.insert(command, value.into());
        self
    }

    pub fn get(&self, command: CommandType) -> Option<&CommandValue> {
        self.commands.get(&command)
    }

    pub fn get_f64(&self, command: CommandType) -> Option<f64> {
        self.get(command).and_then(CommandValue::as_f64)
    }

    pub fn get_bool(&self, command: CommandType) -> Option<bool> {
        self.get(command).and_then(CommandValue::as_bool)
    }

    pub fn get_str(&self, command: CommandType) -> Option<&str> {
        match self.get(command) {
            Some(CommandValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CommandType, &CommandValue)> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Drop every command outside the allowed set for `equipment_type`.
    /// Returns the number of commands removed.
    pub fn retain_allowed(&mut self, equipment_type: EquipmentType) -> usize {
        let allowed = CommandType::allowed_for(equipment_type);
        let before = self.commands.len();
        self.commands.retain(|cmd, _| allowed.contains(cmd));
        before - self.commands.len()
    }
}

/// A filtered command ready for the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub equipment_id: String,
    pub location_id: String,
    pub equipment_type: EquipmentType,
    pub command_type: CommandType,
    pub value: CommandValue,
    /// Epoch nanoseconds assigned at write time.
    pub timestamp_ns: i64,
}
