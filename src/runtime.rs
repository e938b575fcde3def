//! Engine runtime
//!
//! The supervisor builds one [`Runtime`] and passes it explicitly to every
//! processor: gateway, metadata, state store, dispatcher, and both config
//! layers. There are no ambient singletons; anything a tick needs arrives
//! through this value.

use std::sync::Arc;

use crate::config::{EngineConfig, SiteConfig};
use crate::equipment::Dispatcher;
use crate::metadata::MetadataProvider;
use crate::state::StateStore;
use crate::tsdb::TsdbGateway;

/// Shared engine context.
pub struct Runtime {
    pub engine: EngineConfig,
    pub site: SiteConfig,
    pub gateway: TsdbGateway,
    pub metadata: MetadataProvider,
    pub store: Arc<StateStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Runtime {
    /// Assemble a runtime from configuration. The metadata registry is
    /// seeded from the site inventory.
    pub fn new(engine: EngineConfig, site: SiteConfig) -> Self {
        let gateway = TsdbGateway::new(&engine);
        let metadata = MetadataProvider::new(site.equipment.clone());
        Self {
            engine,
            site,
            gateway,
            metadata,
            store: Arc::new(StateStore::new()),
            dispatcher: Arc::new(Dispatcher::standard()),
        }
    }
}
