//! Control scenario tests
//!
//! Exercises the equipment algorithms end to end through the dispatcher
//! with the built-in site definition: fan-coil cooling, boiler OAR and
//! safety shutoff, pump hysteresis, and the Hopebridge AHU-1 pump warmup
//! sequence.

use atrium_bms::config::{LocationConfig, SiteConfig};
use atrium_bms::equipment::common::LeadAssignment;
use atrium_bms::equipment::{Algorithm, AlgorithmInput, AlgorithmOutput, Dispatcher};
use atrium_bms::state::EquipmentState;
use atrium_bms::types::{
    CommandType, CommandValue, ControlSettings, Equipment, EquipmentType, MetricSnapshot,
    PumpKind, SettingsLayer,
};
use chrono::NaiveTime;

fn site() -> SiteConfig {
    SiteConfig::default()
}

fn location(site: &SiteConfig, id: &str) -> LocationConfig {
    site.location(id).expect("known location").clone()
}

fn noon() -> NaiveTime {
    NaiveTime::from_hms_opt(12, 0, 0).expect("time")
}

/// Run one equipment type through the dispatcher the way the processor
/// does, with explicit state and settings.
#[allow(clippy::too_many_arguments)]
fn run_tick(
    dispatcher: &Dispatcher,
    equipment: &Equipment,
    location: &LocationConfig,
    metrics: &MetricSnapshot,
    settings: &ControlSettings,
    state: &EquipmentState,
    dt_secs: f64,
    lead: Option<LeadAssignment>,
) -> AlgorithmOutput {
    let algorithm = dispatcher
        .resolve(equipment.equipment_type, &location.id)
        .expect("algorithm registered");
    let current_temp = metrics
        .first_finite(location.temp_sources.control_candidates())
        .unwrap_or(location.temp_sources.fallback_f);
    let input = AlgorithmInput {
        equipment,
        location,
        metrics,
        settings,
        current_temp,
        state,
        dt_secs,
        local_time: noon(),
        now_epoch: 1_700_000_000,
        lead,
    };
    algorithm.evaluate(&input)
}

fn ui_setpoint(setpoint: f64) -> ControlSettings {
    let mut ui = SettingsLayer::new();
    ui.insert(
        "temperature_setpoint".to_string(),
        CommandValue::Float(setpoint),
    );
    ControlSettings::merge(&ui, &SettingsLayer::new(), &SettingsLayer::new())
}

#[test]
fn fan_coil_cooling_scenario() {
    let site = site();
    let dispatcher = Dispatcher::standard();
    let location = location(&site, "heritage");
    let equipment = Equipment::new("heritage-fc-101", EquipmentType::FanCoil, "heritage");
    let mut metrics = MetricSnapshot::new();
    metrics.set("SupplyTemp", 77.0);
    metrics.set("OutdoorAirTemp", 85.0);

    let out = run_tick(
        &dispatcher,
        &equipment,
        &location,
        &metrics,
        &ui_setpoint(72.0),
        &EquipmentState::new(),
        1.0,
        None,
    );

    // P = 3.5·5 = 17.5, I = one rate-limited increment of 0.5,
    // D = 0.02·5 = 0.1 → 18.1.
    let cooling = out
        .commands
        .get_f64(CommandType::CoolingValvePosition)
        .expect("cooling valve");
    assert!((cooling - 18.1).abs() < 1e-9, "cooling = {cooling}");
    assert_eq!(
        out.commands.get_f64(CommandType::HeatingValvePosition),
        Some(0.0)
    );
    assert_eq!(out.commands.get_bool(CommandType::FanEnabled), Some(true));
}

#[test]
fn boiler_oar_setpoint_scenario() {
    let site = site();
    let dispatcher = Dispatcher::standard();
    let location = location(&site, "heritage");
    let equipment = Equipment::new("heritage-boiler-1", EquipmentType::Boiler, "heritage");
    let mut metrics = MetricSnapshot::new();
    metrics.set("SupplyTemp", 110.0);
    metrics.set("OutdoorAirTemp", 52.0);

    let out = run_tick(
        &dispatcher,
        &equipment,
        &location,
        &metrics,
        &ControlSettings::default(),
        &EquipmentState::new(),
        120.0,
        None,
    );

    // 155 − (20/40)·(155−80) = 117.5.
    let setpoint = out
        .commands
        .get_f64(CommandType::WaterTempSetpoint)
        .expect("water setpoint");
    assert!((setpoint - 117.5).abs() < 1e-9, "setpoint = {setpoint}");
}

#[test]
fn boiler_safety_shutoff_scenario() {
    let site = site();
    let dispatcher = Dispatcher::standard();
    let location = location(&site, "heritage");
    let equipment = Equipment::new("heritage-boiler-1", EquipmentType::Boiler, "heritage")
        .with_group("heritage-boilers");
    let mut metrics = MetricSnapshot::new();
    metrics.set("SupplyTemp", 172.0);
    metrics.set("OutdoorAirTemp", 30.0);

    let lead = LeadAssignment {
        group_id: "heritage-boilers".to_string(),
        leader_id: equipment.id.clone(),
        is_lead: true,
        reason: "normal".to_string(),
    };
    let out = run_tick(
        &dispatcher,
        &equipment,
        &location,
        &metrics,
        &ControlSettings::default(),
        &EquipmentState::new(),
        120.0,
        Some(lead),
    );

    assert_eq!(out.commands.get_bool(CommandType::UnitEnable), Some(false));
    assert_eq!(out.commands.get_f64(CommandType::Firing), Some(0.0));
    assert_eq!(out.commands.get_bool(CommandType::SafetyShutoff), Some(true));
    let reason = out
        .commands
        .get_str(CommandType::SafetyReason)
        .expect("safety reason");
    assert!(reason.contains("supply") || reason.contains("172"));
    assert!(reason.contains("170"));
}

#[test]
fn hw_pump_hysteresis_scenario() {
    let site = site();
    let dispatcher = Dispatcher::standard();
    let location = location(&site, "heritage");
    let equipment = Equipment::new("heritage-hwpump-1", EquipmentType::Pump, "heritage")
        .with_pump_kind(PumpKind::HotWater)
        .with_group("heritage-hwpumps");

    let lead = LeadAssignment {
        group_id: "heritage-hwpumps".to_string(),
        leader_id: equipment.id.clone(),
        is_lead: true,
        reason: "normal".to_string(),
    };

    let mut state = EquipmentState::new();
    let mut observed = Vec::new();
    for oat in [76.0, 74.0, 73.0, 75.0, 76.0] {
        let mut metrics = MetricSnapshot::new();
        metrics.set("OutdoorAirTemp", oat);
        metrics.set("PumpAmps", 5.5);
        metrics.set("PumpStatus", "running");
        let out = run_tick(
            &dispatcher,
            &equipment,
            &location,
            &metrics,
            &ControlSettings::default(),
            &state,
            30.0,
            Some(lead.clone()),
        );
        state = out.state.clone();
        observed.push(
            out.commands
                .get_bool(CommandType::UnitEnable)
                .expect("enable"),
        );
    }
    assert_eq!(observed, vec![false, true, true, false, false]);
}

#[test]
fn hopebridge_ahu1_pump_warmup_scenario() {
    let site = site();
    let dispatcher = Dispatcher::standard();
    let location = location(&site, "hopebridge");
    let equipment = Equipment::new("hopebridge-ahu-1", EquipmentType::AirHandler, "hopebridge")
        .with_subrole("1");

    let mut metrics = MetricSnapshot::new();
    metrics.set("OutdoorAirTemp", 78.0);
    metrics.set("MixedAirTemp", 72.0);
    metrics.set("SupplyTemp", 62.0);
    metrics.set("FanAmps", 4.2);

    let mut state = EquipmentState::new();
    // One-minute ticks. t=0 and t=1: pump on, chiller off.
    for tick in 0..2 {
        let out = run_tick(
            &dispatcher,
            &equipment,
            &location,
            &metrics,
            &ControlSettings::default(),
            &state,
            60.0,
            None,
        );
        state = out.state.clone();
        assert_eq!(
            out.commands.get_bool(CommandType::CwCircPumpEnabled),
            Some(true),
            "tick {tick}"
        );
        assert_eq!(
            out.commands.get_bool(CommandType::ChillerEnabled),
            Some(false),
            "tick {tick}"
        );
    }
    // t=2: two minutes elapsed, chiller enables.
    let out = run_tick(
        &dispatcher,
        &equipment,
        &location,
        &metrics,
        &ControlSettings::default(),
        &state,
        60.0,
        None,
    );
    assert_eq!(
        out.commands.get_bool(CommandType::CwCircPumpEnabled),
        Some(true)
    );
    assert_eq!(out.commands.get_bool(CommandType::ChillerEnabled), Some(true));
}

#[test]
fn every_tick_bag_is_within_the_allowed_set() {
    let site = site();
    let dispatcher = Dispatcher::standard();

    for equipment in &site.equipment {
        let location = location(&site, &equipment.location_id);
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 72.0);
        metrics.set("MixedAirTemp", 70.0);
        metrics.set("OutdoorAirTemp", 60.0);
        metrics.set("PumpAmps", 5.0);
        metrics.set("HWPump1Amps", 12.0);
        metrics.set("FanAmps", 3.0);
        metrics.set("ChilledWaterTemp", 45.0);

        let out = run_tick(
            &dispatcher,
            equipment,
            &location,
            &metrics,
            &ControlSettings::default(),
            &EquipmentState::new(),
            30.0,
            None,
        );
        let mut bag = out.commands.clone();
        let removed = bag.retain_allowed(equipment.equipment_type);
        assert_eq!(
            removed, 0,
            "{} emitted commands outside its allowed set",
            equipment.id
        );
    }
}

#[test]
fn identical_ticks_are_idempotent() {
    let site = site();
    let dispatcher = Dispatcher::standard();

    for equipment in &site.equipment {
        let location = location(&site, &equipment.location_id);
        let mut metrics = MetricSnapshot::new();
        metrics.set("SupplyTemp", 75.0);
        metrics.set("MixedAirTemp", 71.0);
        metrics.set("OutdoorAirTemp", 64.0);
        metrics.set("PumpAmps", 5.0);
        metrics.set("HWPump1Amps", 12.0);
        metrics.set("FanAmps", 3.0);
        metrics.set("ChilledWaterTemp", 46.0);
        let settings = ControlSettings::default();
        let state = EquipmentState::new();

        let a = run_tick(
            &dispatcher, equipment, &location, &metrics, &settings, &state, 30.0, None,
        );
        let b = run_tick(
            &dispatcher, equipment, &location, &metrics, &settings, &state, 30.0, None,
        );
        assert_eq!(a.commands, b.commands, "{} commands differ", equipment.id);
        assert_eq!(a.state, b.state, "{} state differs", equipment.id);
    }
}

#[test]
fn sensor_fallback_uses_candidate_order_then_default() {
    let site = site();
    let dispatcher = Dispatcher::standard();
    let location = location(&site, "heritage");
    let equipment = Equipment::new("heritage-fc-101", EquipmentType::FanCoil, "heritage");

    // Primary candidate NaN: the next field name in the list wins.
    let mut metrics = MetricSnapshot::new();
    metrics.set("SupplyTemp", f64::NAN);
    metrics.set("supplyTemperature", 77.0);
    let out = run_tick(
        &dispatcher,
        &equipment,
        &location,
        &metrics,
        &ui_setpoint(72.0),
        &EquipmentState::new(),
        1.0,
        None,
    );
    assert!(
        out.commands
            .get_f64(CommandType::CoolingValvePosition)
            .expect("cooling")
            > 0.0
    );

    // Everything out: the configured fallback (72F) leaves the loop
    // satisfied at a 72F setpoint.
    let metrics = MetricSnapshot::new();
    let out = run_tick(
        &dispatcher,
        &equipment,
        &location,
        &metrics,
        &ui_setpoint(72.0),
        &EquipmentState::new(),
        1.0,
        None,
    );
    assert_eq!(
        out.commands.get_f64(CommandType::CoolingValvePosition),
        Some(0.0)
    );
    assert_eq!(
        out.commands.get_f64(CommandType::HeatingValvePosition),
        Some(0.0)
    );
}
