//! Equipment algorithms and dispatch
//!
//! One algorithm per equipment type, with location-specific variants where
//! a site's mechanical layout demands different logic. The dispatcher is
//! the single registry mapping `(equipment type, location)` to the
//! algorithm that runs: a location-specific variant always wins over the
//! base variant for the type.

pub mod air_handler;
pub mod boiler;
pub mod chiller;
pub mod common;
pub mod fan_coil;
pub mod hopebridge_ahu;
pub mod pump;
pub mod steam_bundle;

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::EquipmentType;

pub use common::{
    resolve_control_temp, resolve_setpoint, AlgorithmInput, AlgorithmOutput, LeadAssignment,
    SafetyTrip, SetpointSource, BOILER_SHUTOFF_F, FREEZESTAT_TRIP_F, HI_LIMIT_TRIP_F,
    STEAM_SHUTOFF_F,
};

/// One equipment control algorithm.
///
/// Implementations are pure with respect to their inputs and synchronous:
/// no I/O, no clocks, no shared mutation. The processor owns everything
/// around the call.
pub trait Algorithm: Send + Sync {
    /// Algorithm name for logs (e.g. `fan-coil/base`,
    /// `air-handler/hopebridge`).
    fn name(&self) -> &str;

    /// Evaluate one tick.
    fn evaluate(&self, input: &AlgorithmInput) -> AlgorithmOutput;
}

/// The dispatch table: base algorithm per type plus location overrides.
pub struct Dispatcher {
    base: HashMap<EquipmentType, Arc<dyn Algorithm>>,
    variants: HashMap<(String, EquipmentType), Arc<dyn Algorithm>>,
}

impl Dispatcher {
    /// Empty table, for tests that register their own algorithms.
    pub fn empty() -> Self {
        Self {
            base: HashMap::new(),
            variants: HashMap::new(),
        }
    }

    /// The production table: every base algorithm plus the known
    /// location-specific variants.
    pub fn standard() -> Self {
        let mut dispatcher = Self::empty();
        dispatcher.register_base(EquipmentType::FanCoil, Arc::new(fan_coil::FanCoil));
        dispatcher.register_base(EquipmentType::Boiler, Arc::new(boiler::Boiler));
        dispatcher.register_base(EquipmentType::Pump, Arc::new(pump::Pump));
        dispatcher.register_base(EquipmentType::Chiller, Arc::new(chiller::Chiller));
        dispatcher.register_base(EquipmentType::AirHandler, Arc::new(air_handler::AirHandler));
        dispatcher.register_base(
            EquipmentType::SteamBundle,
            Arc::new(steam_bundle::SteamBundle),
        );
        // Hopebridge air handlers embed their own subsystem state machines
        // (chilled-water pump warmup / DX staging).
        dispatcher.register_variant(
            "hopebridge",
            EquipmentType::AirHandler,
            Arc::new(hopebridge_ahu::HopebridgeAirHandler),
        );
        dispatcher
    }

    pub fn register_base(&mut self, equipment_type: EquipmentType, algorithm: Arc<dyn Algorithm>) {
        self.base.insert(equipment_type, algorithm);
    }

    pub fn register_variant(
        &mut self,
        location_id: &str,
        equipment_type: EquipmentType,
        algorithm: Arc<dyn Algorithm>,
    ) {
        self.variants
            .insert((location_id.to_string(), equipment_type), algorithm);
    }

    /// Resolve the algorithm for a `(type, location)` pair. A missing
    /// location entry is not an error; a missing base variant is (`None`,
    /// and the caller reports it).
    pub fn resolve(
        &self,
        equipment_type: EquipmentType,
        location_id: &str,
    ) -> Option<Arc<dyn Algorithm>> {
        self.variants
            .get(&(location_id.to_string(), equipment_type))
            .or_else(|| self.base.get(&equipment_type))
            .cloned()
    }

    /// Resolve from a raw type string (normalised first; pump subkinds
    /// collapse to `pump`). Unknown type names resolve to `None`.
    pub fn resolve_raw(&self, raw_type: &str, location_id: &str) -> Option<Arc<dyn Algorithm>> {
        let equipment_type = EquipmentType::parse(raw_type)?;
        self.resolve(equipment_type, location_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_variant_wins_over_base() {
        let dispatcher = Dispatcher::standard();
        let base = dispatcher
            .resolve(EquipmentType::AirHandler, "warren")
            .expect("base air handler");
        assert_eq!(base.name(), "air-handler/base");
        let variant = dispatcher
            .resolve(EquipmentType::AirHandler, "hopebridge")
            .expect("hopebridge variant");
        assert_eq!(variant.name(), "air-handler/hopebridge");
    }

    #[test]
    fn missing_location_falls_back_to_base() {
        let dispatcher = Dispatcher::standard();
        let algorithm = dispatcher
            .resolve(EquipmentType::Boiler, "somewhere-new")
            .expect("base boiler");
        assert_eq!(algorithm.name(), "boiler/base");
    }

    #[test]
    fn unknown_raw_type_is_none() {
        let dispatcher = Dispatcher::standard();
        assert!(dispatcher.resolve_raw("cooling-tower", "heritage").is_none());
    }

    #[test]
    fn pump_subkinds_resolve_to_pump_algorithm() {
        let dispatcher = Dispatcher::standard();
        let algorithm = dispatcher
            .resolve_raw("hwpump", "heritage")
            .expect("pump algorithm");
        assert_eq!(algorithm.name(), "pump/base");
    }

    #[test]
    fn every_base_type_is_registered() {
        let dispatcher = Dispatcher::standard();
        for equipment_type in EquipmentType::ALL {
            assert!(
                dispatcher.resolve(equipment_type, "anywhere").is_some(),
                "no base algorithm for {equipment_type}"
            );
        }
    }
}
