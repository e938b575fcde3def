//! Equipment metadata provider
//!
//! Resolves `equipmentId → {type, locationId, groupId}` from the site
//! inventory. Read-mostly: lookups share a read lock, inventory updates
//! take the write lock. Known alternate spellings of an id resolve to the
//! canonical record with a warning.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use crate::types::{Equipment, EquipmentType};

/// Errors from metadata resolution.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("Unknown equipment id: {0}")]
    UnknownEquipment(String),
}

/// The equipment metadata contract: a key-value lookup by equipment id.
///
/// The engine ships one in-memory implementation seeded from the site
/// inventory; deployments backed by an external metadata service
/// implement this seam instead.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Resolve an equipment id to its record.
    async fn lookup(&self, equipment_id: &str) -> Result<Equipment, MetadataError>;
}

#[async_trait]
impl MetadataSource for MetadataProvider {
    async fn lookup(&self, equipment_id: &str) -> Result<Equipment, MetadataError> {
        self.resolve(equipment_id).await
    }
}

/// In-memory metadata registry.
#[derive(Clone)]
pub struct MetadataProvider {
    inner: Arc<RwLock<Registry>>,
}

#[derive(Default)]
struct Registry {
    /// Canonical id → record.
    equipment: HashMap<String, Equipment>,
    /// Alias → canonical id.
    aliases: HashMap<String, String>,
}

impl MetadataProvider {
    pub fn new(inventory: Vec<Equipment>) -> Self {
        let mut registry = Registry::default();
        for equipment in inventory {
            for alias in &equipment.aliases {
                registry
                    .aliases
                    .insert(alias.clone(), equipment.id.clone());
            }
            registry.equipment.insert(equipment.id.clone(), equipment);
        }
        Self {
            inner: Arc::new(RwLock::new(registry)),
        }
    }

    /// Resolve an equipment id, tolerating known alternate spellings.
    pub async fn resolve(&self, equipment_id: &str) -> Result<Equipment, MetadataError> {
        let registry = self.inner.read().await;
        if let Some(equipment) = registry.equipment.get(equipment_id) {
            return Ok(equipment.clone());
        }
        if let Some(canonical) = registry.aliases.get(equipment_id) {
            warn!(
                "Equipment id {} resolved via alias; canonical spelling is {}",
                equipment_id, canonical
            );
            if let Some(equipment) = registry.equipment.get(canonical) {
                return Ok(equipment.clone());
            }
        }
        Err(MetadataError::UnknownEquipment(equipment_id.to_string()))
    }

    /// All equipment of one type at one location, in id order (the order
    /// the processor iterates each tick).
    pub async fn equipment_at(
        &self,
        location_id: &str,
        equipment_type: EquipmentType,
    ) -> Vec<Equipment> {
        let registry = self.inner.read().await;
        let mut result: Vec<Equipment> = registry
            .equipment
            .values()
            .filter(|e| e.location_id == location_id && e.equipment_type == equipment_type)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        result
    }

    /// Equipment types present at a location (drives task creation).
    pub async fn types_at(&self, location_id: &str) -> Vec<EquipmentType> {
        let registry = self.inner.read().await;
        let mut types: Vec<EquipmentType> = EquipmentType::ALL
            .iter()
            .copied()
            .filter(|t| {
                registry
                    .equipment
                    .values()
                    .any(|e| e.location_id == location_id && e.equipment_type == *t)
            })
            .collect();
        types.dedup();
        types
    }

    /// Register or replace a record (on-demand metadata refresh).
    pub async fn register(&self, equipment: Equipment) {
        let mut registry = self.inner.write().await;
        for alias in &equipment.aliases {
            registry
                .aliases
                .insert(alias.clone(), equipment.id.clone());
        }
        registry.equipment.insert(equipment.id.clone(), equipment);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.equipment.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PumpKind;

    fn provider() -> MetadataProvider {
        MetadataProvider::new(vec![
            Equipment::new("qgT8-boiler-1", EquipmentType::Boiler, "heritage")
                .with_group("heritage-boilers")
                .with_alias("qqT8-boiler-1"),
            Equipment::new("hw-pump-1", EquipmentType::Pump, "heritage")
                .with_pump_kind(PumpKind::HotWater),
            Equipment::new("fc-201", EquipmentType::FanCoil, "warren"),
        ])
    }

    #[tokio::test]
    async fn resolves_canonical_id() {
        let p = provider();
        let e = p.resolve("hw-pump-1").await.expect("resolve");
        assert_eq!(e.location_id, "heritage");
        assert_eq!(e.pump_kind, Some(PumpKind::HotWater));
    }

    #[tokio::test]
    async fn resolves_alias_to_canonical_record() {
        let p = provider();
        let e = p.resolve("qqT8-boiler-1").await.expect("resolve alias");
        assert_eq!(e.id, "qgT8-boiler-1");
    }

    #[tokio::test]
    async fn unknown_id_is_an_error() {
        let p = provider();
        assert!(p.resolve("nope").await.is_err());
    }

    #[tokio::test]
    async fn equipment_at_filters_location_and_type() {
        let p = provider();
        let boilers = p.equipment_at("heritage", EquipmentType::Boiler).await;
        assert_eq!(boilers.len(), 1);
        assert!(p
            .equipment_at("warren", EquipmentType::Boiler)
            .await
            .is_empty());
        let types = p.types_at("heritage").await;
        assert!(types.contains(&EquipmentType::Boiler));
        assert!(types.contains(&EquipmentType::Pump));
        assert!(!types.contains(&EquipmentType::FanCoil));
    }
}
