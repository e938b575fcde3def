//! Equipment identity types

use serde::{Deserialize, Serialize};

/// Pump service classification.
///
/// Hot-water and chilled-water pumps share one control algorithm but carry
/// opposite outdoor-temperature hysteresis thresholds, so the subkind rides
/// along on the equipment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpKind {
    /// Hot-water circulation pump (`hwpump`).
    #[serde(alias = "hwpump", alias = "hw")]
    HotWater,
    /// Chilled-water circulation pump (`cwpump`).
    #[serde(alias = "cwpump", alias = "cw")]
    ChilledWater,
}

impl PumpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PumpKind::HotWater => "hwpump",
            PumpKind::ChilledWater => "cwpump",
        }
    }
}

/// Canonical equipment type.
///
/// Pump subkinds (`hwpump`, `cwpump`) collapse to [`EquipmentType::Pump`]
/// for dispatch; the subkind is preserved separately on [`Equipment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EquipmentType {
    FanCoil,
    Boiler,
    Pump,
    Chiller,
    AirHandler,
    SteamBundle,
}

impl EquipmentType {
    /// Canonical lowercase-hyphenated name used in dispatch keys, line
    /// protocol tags, and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentType::FanCoil => "fan-coil",
            EquipmentType::Boiler => "boiler",
            EquipmentType::Pump => "pump",
            EquipmentType::Chiller => "chiller",
            EquipmentType::AirHandler => "air-handler",
            EquipmentType::SteamBundle => "steam-bundle",
        }
    }

    /// Normalise a raw type string to the canonical type.
    ///
    /// Accepts any casing, spaces or underscores for hyphens, and the pump
    /// subkind names. Returns `None` for unknown types (the caller reports
    /// the error; unknown types are never dispatched).
    pub fn parse(raw: &str) -> Option<Self> {
        let canonical: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();
        match canonical.as_str() {
            "fan-coil" | "fancoil" => Some(EquipmentType::FanCoil),
            "boiler" => Some(EquipmentType::Boiler),
            "pump" | "hwpump" | "cwpump" | "hw-pump" | "cw-pump" => Some(EquipmentType::Pump),
            "chiller" => Some(EquipmentType::Chiller),
            "air-handler" | "ahu" | "air-handling-unit" => Some(EquipmentType::AirHandler),
            "steam-bundle" | "steambundle" => Some(EquipmentType::SteamBundle),
            _ => None,
        }
    }

    /// All canonical types, in dispatch order.
    pub const ALL: [EquipmentType; 6] = [
        EquipmentType::FanCoil,
        EquipmentType::Boiler,
        EquipmentType::Pump,
        EquipmentType::Chiller,
        EquipmentType::AirHandler,
        EquipmentType::SteamBundle,
    ];
}

impl std::fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static equipment metadata, immutable during a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equipment {
    /// Opaque equipment id (canonical spelling).
    pub id: String,
    /// Human-readable name, if the metadata source provides one.
    #[serde(default)]
    pub name: Option<String>,
    /// Canonical equipment type.
    #[serde(rename = "type")]
    pub equipment_type: EquipmentType,
    /// Pump subkind; only meaningful when `equipment_type == Pump`.
    #[serde(default)]
    pub pump_kind: Option<PumpKind>,
    /// Location key this equipment belongs to.
    pub location_id: String,
    /// Lead-lag cohort id, for boilers/pumps/chillers that rotate.
    #[serde(default)]
    pub group_id: Option<String>,
    /// Subrole within the location (e.g. AHU number).
    #[serde(default)]
    pub subrole: Option<String>,
    /// Alternate spellings of this id seen in upstream systems.
    /// Lookups match these with a warning; writes always use `id`.
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl Equipment {
    /// Shorthand constructor for ungrouped equipment.
    pub fn new(id: &str, equipment_type: EquipmentType, location_id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: None,
            equipment_type,
            pump_kind: None,
            location_id: location_id.to_string(),
            group_id: None,
            subrole: None,
            aliases: Vec::new(),
        }
    }

    pub fn with_group(mut self, group_id: &str) -> Self {
        self.group_id = Some(group_id.to_string());
        self
    }

    pub fn with_pump_kind(mut self, kind: PumpKind) -> Self {
        self.pump_kind = Some(kind);
        self
    }

    pub fn with_subrole(mut self, subrole: &str) -> Self {
        self.subrole = Some(subrole.to_string());
        self
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalises_casing_and_separators() {
        assert_eq!(EquipmentType::parse("Fan Coil"), Some(EquipmentType::FanCoil));
        assert_eq!(EquipmentType::parse("fan_coil"), Some(EquipmentType::FanCoil));
        assert_eq!(EquipmentType::parse("AIR-HANDLER"), Some(EquipmentType::AirHandler));
        assert_eq!(EquipmentType::parse("steam_bundle"), Some(EquipmentType::SteamBundle));
    }

    #[test]
    fn pump_subkinds_collapse_to_pump() {
        assert_eq!(EquipmentType::parse("hwpump"), Some(EquipmentType::Pump));
        assert_eq!(EquipmentType::parse("cwpump"), Some(EquipmentType::Pump));
        assert_eq!(EquipmentType::parse("CW-Pump"), Some(EquipmentType::Pump));
    }

    #[test]
    fn unknown_type_is_none() {
        assert_eq!(EquipmentType::parse("cooling-tower"), None);
        assert_eq!(EquipmentType::parse(""), None);
    }
}
