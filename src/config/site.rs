//! Site configuration
//!
//! Everything the engine knows about the controlled site that is not
//! derivable from telemetry: locations, equipment inventory, per-task
//! cadences, outdoor-air-reset schedules, temperature-source candidate
//! lists, occupancy windows, pump hysteresis thresholds, damper
//! strategies, chiller lockouts, and lead-lag group definitions.
//!
//! Loading order: explicit path (CLI), `SITE_CONFIG` env var,
//! `site_config.toml` in the working directory, then built-in defaults.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::control::{HysteresisBand, OccupancySchedule, ResetCurve};
use crate::types::{Equipment, EquipmentType, PumpKind};

/// Which semantic input a location's control loops track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TempControlSource {
    Supply,
    Space,
    Mixed,
}

/// Ordered candidate metric field names per semantic input, with the
/// numeric fallback used when every candidate is absent or non-finite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempSources {
    /// Which input drives temperature control at this location.
    pub control: TempControlSource,
    pub supply: Vec<String>,
    pub space: Vec<String>,
    pub mixed: Vec<String>,
    pub outdoor: Vec<String>,
    /// Fallback control temperature when the candidate list is exhausted.
    pub fallback_f: f64,
}

impl Default for TempSources {
    fn default() -> Self {
        Self {
            control: TempControlSource::Supply,
            supply: strings(&[
                "SupplyTemp",
                "supplyTemperature",
                "Supply_Air_Temp",
                "DischargeTemp",
                "SAT",
            ]),
            space: strings(&["SpaceTemp", "spaceTemperature", "ZoneTemp", "RoomTemp"]),
            mixed: strings(&["MixedAirTemp", "mixedAirTemperature", "MAT"]),
            outdoor: strings(&[
                "OutdoorAirTemp",
                "outdoorTemperature",
                "OutsideAirTemp",
                "OAT",
            ]),
            fallback_f: 72.0,
        }
    }
}

impl TempSources {
    /// Candidate list for the location's configured control source.
    pub fn control_candidates(&self) -> &[String] {
        match self.control {
            TempControlSource::Supply => &self.supply,
            TempControlSource::Space => &self.space,
            TempControlSource::Mixed => &self.mixed,
        }
    }
}

/// Outdoor-damper behaviour, fixed per location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum DamperStrategy {
    /// Open fully above the threshold, closed at or below it.
    BinaryAt { threshold_f: f64 },
    /// Open inside the economizer window, closed outside.
    Window { min_f: f64, max_f: f64 },
}

impl Default for DamperStrategy {
    fn default() -> Self {
        DamperStrategy::BinaryAt { threshold_f: 40.0 }
    }
}

impl DamperStrategy {
    /// Damper position [0..100] for the given outdoor temperature.
    pub fn position_for(&self, outdoor_temp: f64) -> f64 {
        if !outdoor_temp.is_finite() {
            return 0.0;
        }
        match self {
            DamperStrategy::BinaryAt { threshold_f } => {
                if outdoor_temp > *threshold_f {
                    100.0
                } else {
                    0.0
                }
            }
            DamperStrategy::Window { min_f, max_f } => {
                if outdoor_temp > *min_f && outdoor_temp <= *max_f {
                    100.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Pump enable hysteresis per service.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PumpThresholds {
    /// Hot water: on at or below, off at or above.
    pub hw_on_f: f64,
    pub hw_off_f: f64,
    /// Chilled water: on at or above, off at or below.
    pub cw_on_f: f64,
    pub cw_off_f: f64,
}

impl Default for PumpThresholds {
    fn default() -> Self {
        Self {
            hw_on_f: 74.0,
            hw_off_f: 75.0,
            cw_on_f: 37.0,
            cw_off_f: 36.0,
        }
    }
}

impl PumpThresholds {
    pub fn band_for(&self, kind: PumpKind) -> HysteresisBand {
        match kind {
            PumpKind::HotWater => HysteresisBand::on_falling(self.hw_on_f, self.hw_off_f),
            PumpKind::ChilledWater => HysteresisBand::on_rising(self.cw_on_f, self.cw_off_f),
        }
    }
}

/// One controlled location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Site-local offset from UTC, for occupancy windows and fan cycling.
    #[serde(default)]
    pub utc_offset_hours: i32,
    #[serde(default = "OccupancySchedule::business_hours")]
    pub occupancy: OccupancySchedule,
    /// Task cadence in seconds, keyed by canonical equipment type.
    #[serde(default)]
    pub cadence_secs: BTreeMap<String, u64>,
    #[serde(default)]
    pub temp_sources: TempSources,
    /// OAR schedules keyed by consumer (`boiler`, `steam-bundle`,
    /// `air-handler`).
    #[serde(default)]
    pub reset_curves: BTreeMap<String, ResetCurve>,
    /// Space/zone setpoint when no override or schedule applies.
    #[serde(default = "default_setpoint")]
    pub default_setpoint_f: f64,
    #[serde(default)]
    pub damper: DamperStrategy,
    /// Chiller outdoor lockout.
    #[serde(default = "default_chiller_lockout")]
    pub chiller_lockout_f: f64,
    #[serde(default)]
    pub pump_thresholds: PumpThresholds,
    /// Unoccupied fan cycling: minutes of each hour the fan runs.
    #[serde(default)]
    pub fan_cycle_run_minutes: Option<u32>,
}

fn default_setpoint() -> f64 {
    72.0
}

fn default_chiller_lockout() -> f64 {
    50.0
}

impl LocationConfig {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            utc_offset_hours: 0,
            occupancy: OccupancySchedule::business_hours(),
            cadence_secs: BTreeMap::new(),
            temp_sources: TempSources::default(),
            reset_curves: BTreeMap::new(),
            default_setpoint_f: default_setpoint(),
            damper: DamperStrategy::default(),
            chiller_lockout_f: default_chiller_lockout(),
            pump_thresholds: PumpThresholds::default(),
            fan_cycle_run_minutes: None,
        }
    }

    /// Cadence for one equipment type; fast loops default to 30 s, slow
    /// systems to longer periods.
    pub fn cadence_for(&self, equipment_type: EquipmentType) -> u64 {
        if let Some(secs) = self.cadence_secs.get(equipment_type.as_str()) {
            return *secs;
        }
        match equipment_type {
            EquipmentType::FanCoil | EquipmentType::Pump | EquipmentType::AirHandler => 30,
            EquipmentType::Boiler => 120,
            EquipmentType::SteamBundle => 180,
            EquipmentType::Chiller => 300,
        }
    }

    /// OAR schedule for a consumer, if the location defines one.
    pub fn reset_curve(&self, consumer: &str) -> Option<ResetCurve> {
        self.reset_curves.get(consumer).copied()
    }
}

/// Lead-lag group definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub id: String,
    pub location_id: String,
    pub equipment_type: EquipmentType,
    /// Members in rotation order.
    pub member_ids: Vec<String>,
    #[serde(default = "default_true")]
    pub auto_failover: bool,
    #[serde(default = "default_true")]
    pub use_lead_lag: bool,
    #[serde(default = "default_changeover_days")]
    pub changeover_interval_days: f64,
}

fn default_true() -> bool {
    true
}

fn default_changeover_days() -> f64 {
    7.0
}

/// The whole site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub locations: Vec<LocationConfig>,
    pub equipment: Vec<Equipment>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl SiteConfig {
    /// Load with the standard fallback chain. A missing file is not an
    /// error (defaults apply); an unreadable or invalid file is.
    pub fn load(explicit_path: Option<&Path>) -> anyhow::Result<Self> {
        let candidate = explicit_path
            .map(|p| p.to_path_buf())
            .or_else(|| std::env::var("SITE_CONFIG").ok().map(Into::into))
            .unwrap_or_else(|| "site_config.toml".into());

        if candidate.exists() {
            let raw = std::fs::read_to_string(&candidate)?;
            let config: SiteConfig = toml::from_str(&raw)?;
            config.validate().map_err(|e| anyhow::anyhow!(e))?;
            info!("Site config loaded from {}", candidate.display());
            Ok(config)
        } else {
            info!("No site config file found; using built-in site definition");
            let config = Self::default();
            config.validate().map_err(|e| anyhow::anyhow!(e))?;
            Ok(config)
        }
    }

    pub fn location(&self, id: &str) -> Option<&LocationConfig> {
        self.locations.iter().find(|l| l.id == id)
    }

    /// Groups for one (location, type) pair.
    pub fn groups_at(
        &self,
        location_id: &str,
        equipment_type: EquipmentType,
    ) -> Vec<&GroupConfig> {
        self.groups
            .iter()
            .filter(|g| g.location_id == location_id && g.equipment_type == equipment_type)
            .collect()
    }

    /// Reject configurations that cannot control safely: inverted reset
    /// curves, collapsed hysteresis bands, empty candidate lists, unknown
    /// references, non-positive cadences.
    pub fn validate(&self) -> Result<(), String> {
        if self.locations.is_empty() {
            return Err("site config defines no locations".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        for location in &self.locations {
            if !seen.insert(&location.id) {
                return Err(format!("duplicate location id {}", location.id));
            }
            for (consumer, curve) in &location.reset_curves {
                curve
                    .validate()
                    .map_err(|e| format!("{} / {consumer}: {e}", location.id))?;
            }
            for kind in [PumpKind::HotWater, PumpKind::ChilledWater] {
                location
                    .pump_thresholds
                    .band_for(kind)
                    .validate()
                    .map_err(|e| format!("{}: {e}", location.id))?;
            }
            if location.temp_sources.control_candidates().is_empty() {
                return Err(format!(
                    "{}: empty temperature candidate list for control source",
                    location.id
                ));
            }
            if location.temp_sources.outdoor.is_empty() {
                return Err(format!("{}: empty outdoor candidate list", location.id));
            }
            for (type_name, secs) in &location.cadence_secs {
                if *secs == 0 {
                    return Err(format!("{}: zero cadence for {type_name}", location.id));
                }
                if EquipmentType::parse(type_name).is_none() {
                    return Err(format!("{}: unknown cadence type {type_name}", location.id));
                }
            }
        }
        for equipment in &self.equipment {
            if self.location(&equipment.location_id).is_none() {
                return Err(format!(
                    "equipment {} references unknown location {}",
                    equipment.id, equipment.location_id
                ));
            }
        }
        for group in &self.groups {
            if group.member_ids.is_empty() {
                return Err(format!("group {} has no members", group.id));
            }
            for member in &group.member_ids {
                if !self.equipment.iter().any(|e| e.id == *member) {
                    return Err(format!(
                        "group {} references unknown equipment {member}",
                        group.id
                    ));
                }
            }
        }
        Ok(())
    }
}

fn strings(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn window(start_h: u32, start_m: u32, end_h: u32, end_m: u32) -> OccupancySchedule {
    OccupancySchedule::Window {
        start: NaiveTime::from_hms_opt(start_h, start_m, 0).unwrap_or_default(),
        end: NaiveTime::from_hms_opt(end_h, end_m, 0).unwrap_or_default(),
    }
}

impl Default for SiteConfig {
    /// Built-in site definition: the three managed properties with their
    /// known equipment, schedules, and control parameters.
    fn default() -> Self {
        // Heritage: hot-water plant (two boilers, paired HW/CW pumps),
        // steam bundle, fan coils, single chiller. Supply-temp control,
        // binary damper at 40F.
        let mut heritage = LocationConfig::new("heritage", "Heritage Commons");
        heritage.utc_offset_hours = -5;
        heritage.occupancy = window(5, 30, 21, 30);
        heritage.damper = DamperStrategy::BinaryAt { threshold_f: 40.0 };
        heritage
            .reset_curves
            .insert("boiler".to_string(), ResetCurve::new(32.0, 155.0, 72.0, 80.0));
        heritage.reset_curves.insert(
            "steam-bundle".to_string(),
            ResetCurve::new(32.0, 155.0, 70.0, 80.0),
        );

        // Warren: fan coils on space-temp control with an economizer
        // window, one air handler with unoccupied fan cycling, one boiler.
        let mut warren = LocationConfig::new("warren", "Warren Professional Building");
        warren.utc_offset_hours = -5;
        warren.occupancy = window(6, 30, 20, 30);
        warren.temp_sources.control = TempControlSource::Space;
        warren.damper = DamperStrategy::Window {
            min_f: 40.0,
            max_f: 80.0,
        };
        warren
            .reset_curves
            .insert("boiler".to_string(), ResetCurve::new(30.0, 150.0, 70.0, 90.0));
        warren.reset_curves.insert(
            "air-handler".to_string(),
            ResetCurve::new(30.0, 75.0, 75.0, 55.0),
        );
        warren.fan_cycle_run_minutes = Some(15);

        // Hopebridge: two air handlers (chilled-water AHU-1, DX AHU-2),
        // dual chillers on weekly changeover, paired CW pumps. One-minute
        // air-handler cadence drives the pump warmup counter.
        let mut hopebridge = LocationConfig::new("hopebridge", "Hopebridge Center");
        hopebridge.utc_offset_hours = -5;
        hopebridge.occupancy = window(6, 0, 21, 0);
        hopebridge.default_setpoint_f = 55.0;
        hopebridge.damper = DamperStrategy::Window {
            min_f: 40.0,
            max_f: 80.0,
        };
        hopebridge
            .cadence_secs
            .insert("air-handler".to_string(), 60);
        hopebridge.reset_curves.insert(
            "air-handler".to_string(),
            ResetCurve::new(32.0, 68.0, 75.0, 52.0),
        );

        let equipment = vec![
            // Heritage plant
            Equipment::new("heritage-boiler-1", EquipmentType::Boiler, "heritage")
                .with_group("heritage-boilers"),
            Equipment::new("boiler-qgT8", EquipmentType::Boiler, "heritage")
                .with_group("heritage-boilers")
                .with_alias("boiler-qqT8"),
            Equipment::new("heritage-hwpump-1", EquipmentType::Pump, "heritage")
                .with_pump_kind(PumpKind::HotWater)
                .with_group("heritage-hwpumps"),
            Equipment::new("heritage-hwpump-2", EquipmentType::Pump, "heritage")
                .with_pump_kind(PumpKind::HotWater)
                .with_group("heritage-hwpumps"),
            Equipment::new("heritage-cwpump-1", EquipmentType::Pump, "heritage")
                .with_pump_kind(PumpKind::ChilledWater)
                .with_group("heritage-cwpumps"),
            Equipment::new("heritage-cwpump-2", EquipmentType::Pump, "heritage")
                .with_pump_kind(PumpKind::ChilledWater)
                .with_group("heritage-cwpumps"),
            Equipment::new("heritage-fc-101", EquipmentType::FanCoil, "heritage"),
            Equipment::new("heritage-fc-102", EquipmentType::FanCoil, "heritage"),
            Equipment::new("heritage-fc-103", EquipmentType::FanCoil, "heritage"),
            Equipment::new("heritage-steam-1", EquipmentType::SteamBundle, "heritage"),
            Equipment::new("heritage-chiller-1", EquipmentType::Chiller, "heritage"),
            // Warren
            Equipment::new("warren-fc-201", EquipmentType::FanCoil, "warren"),
            Equipment::new("warren-fc-202", EquipmentType::FanCoil, "warren"),
            Equipment::new("warren-fc-203", EquipmentType::FanCoil, "warren"),
            Equipment::new("warren-ahu-1", EquipmentType::AirHandler, "warren")
                .with_subrole("1"),
            Equipment::new("warren-boiler-1", EquipmentType::Boiler, "warren"),
            Equipment::new("warren-hwpump-1", EquipmentType::Pump, "warren")
                .with_pump_kind(PumpKind::HotWater)
                .with_group("warren-hwpumps"),
            Equipment::new("warren-hwpump-2", EquipmentType::Pump, "warren")
                .with_pump_kind(PumpKind::HotWater)
                .with_group("warren-hwpumps"),
            // Hopebridge
            Equipment::new("hopebridge-ahu-1", EquipmentType::AirHandler, "hopebridge")
                .with_subrole("1"),
            Equipment::new("hopebridge-ahu-2", EquipmentType::AirHandler, "hopebridge")
                .with_subrole("2"),
            Equipment::new("hopebridge-chiller-1", EquipmentType::Chiller, "hopebridge")
                .with_group("hopebridge-chillers"),
            Equipment::new("hopebridge-chiller-2", EquipmentType::Chiller, "hopebridge")
                .with_group("hopebridge-chillers"),
            Equipment::new("hopebridge-cwpump-1", EquipmentType::Pump, "hopebridge")
                .with_pump_kind(PumpKind::ChilledWater)
                .with_group("hopebridge-cwpumps"),
            Equipment::new("hopebridge-cwpump-2", EquipmentType::Pump, "hopebridge")
                .with_pump_kind(PumpKind::ChilledWater)
                .with_group("hopebridge-cwpumps"),
        ];

        let groups = vec![
            GroupConfig {
                id: "heritage-boilers".to_string(),
                location_id: "heritage".to_string(),
                equipment_type: EquipmentType::Boiler,
                member_ids: strings(&["heritage-boiler-1", "boiler-qgT8"]),
                auto_failover: true,
                use_lead_lag: true,
                changeover_interval_days: 7.0,
            },
            GroupConfig {
                id: "heritage-hwpumps".to_string(),
                location_id: "heritage".to_string(),
                equipment_type: EquipmentType::Pump,
                member_ids: strings(&["heritage-hwpump-1", "heritage-hwpump-2"]),
                auto_failover: true,
                use_lead_lag: true,
                changeover_interval_days: 7.0,
            },
            GroupConfig {
                id: "heritage-cwpumps".to_string(),
                location_id: "heritage".to_string(),
                equipment_type: EquipmentType::Pump,
                member_ids: strings(&["heritage-cwpump-1", "heritage-cwpump-2"]),
                auto_failover: true,
                use_lead_lag: true,
                changeover_interval_days: 7.0,
            },
            GroupConfig {
                id: "warren-hwpumps".to_string(),
                location_id: "warren".to_string(),
                equipment_type: EquipmentType::Pump,
                member_ids: strings(&["warren-hwpump-1", "warren-hwpump-2"]),
                auto_failover: true,
                use_lead_lag: true,
                changeover_interval_days: 7.0,
            },
            GroupConfig {
                id: "hopebridge-chillers".to_string(),
                location_id: "hopebridge".to_string(),
                equipment_type: EquipmentType::Chiller,
                member_ids: strings(&["hopebridge-chiller-1", "hopebridge-chiller-2"]),
                auto_failover: true,
                use_lead_lag: true,
                changeover_interval_days: 7.0,
            },
            GroupConfig {
                id: "hopebridge-cwpumps".to_string(),
                location_id: "hopebridge".to_string(),
                equipment_type: EquipmentType::Pump,
                member_ids: strings(&["hopebridge-cwpump-1", "hopebridge-cwpump-2"]),
                auto_failover: true,
                use_lead_lag: true,
                changeover_interval_days: 7.0,
            },
        ];

        Self {
            locations: vec![heritage, warren, hopebridge],
            equipment,
            groups,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_site_validates() {
        let site = SiteConfig::default();
        assert!(site.validate().is_ok());
        assert_eq!(site.locations.len(), 3);
    }

    #[test]
    fn cadence_defaults_by_type() {
        let site = SiteConfig::default();
        let heritage = site.location("heritage").expect("heritage");
        assert_eq!(heritage.cadence_for(EquipmentType::FanCoil), 30);
        assert_eq!(heritage.cadence_for(EquipmentType::Boiler), 120);
        assert_eq!(heritage.cadence_for(EquipmentType::Chiller), 300);
        let hopebridge = site.location("hopebridge").expect("hopebridge");
        assert_eq!(hopebridge.cadence_for(EquipmentType::AirHandler), 60);
    }

    #[test]
    fn validation_rejects_inverted_curve() {
        let mut site = SiteConfig::default();
        site.locations[0]
            .reset_curves
            .insert("boiler".to_string(), ResetCurve::new(72.0, 155.0, 32.0, 80.0));
        assert!(site.validate().is_err());
    }

    #[test]
    fn validation_rejects_unknown_group_member() {
        let mut site = SiteConfig::default();
        site.groups[0].member_ids.push("ghost".to_string());
        assert!(site.validate().is_err());
    }

    #[test]
    fn validation_rejects_collapsed_hysteresis() {
        let mut site = SiteConfig::default();
        site.locations[0].pump_thresholds.hw_off_f = site.locations[0].pump_thresholds.hw_on_f;
        assert!(site.validate().is_err());
    }

    #[test]
    fn damper_strategies() {
        let binary = DamperStrategy::BinaryAt { threshold_f: 40.0 };
        assert_eq!(binary.position_for(40.0), 0.0);
        assert_eq!(binary.position_for(40.5), 100.0);
        let win = DamperStrategy::Window {
            min_f: 40.0,
            max_f: 80.0,
        };
        assert_eq!(win.position_for(40.0), 0.0);
        assert_eq!(win.position_for(60.0), 100.0);
        assert_eq!(win.position_for(80.0), 100.0);
        assert_eq!(win.position_for(80.1), 0.0);
        assert_eq!(win.position_for(f64::NAN), 0.0);
    }

    #[test]
    fn toml_round_trip() {
        let site = SiteConfig::default();
        let raw = toml::to_string(&site).expect("serialize");
        let parsed: SiteConfig = toml::from_str(&raw).expect("parse");
        assert_eq!(parsed, site);
    }
}
