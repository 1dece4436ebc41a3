use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

/// Data-source connector contract as seen by the lowering pass.
pub trait Connector: Send + Sync {
    /// Id that table handles in plan nodes refer to.
    fn connector_id(&self) -> &str;

    /// Whether this connector's data sources emit accelerator-resident batches.
    fn produces_accelerator_batches(&self) -> bool {
        false
    }
}

/// Registry resolving connector ids to connector instances.
#[derive(Default)]
pub struct ConnectorRegistry {
    inner: RwLock<HashMap<String, Arc<dyn Connector>>>,
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorRegistry")
            .field("connectors", &self.inner.read().len())
            .finish()
    }
}

impl ConnectorRegistry {
    /// Register or replace a connector.
    ///
    /// Returns `true` when an existing connector with the same id was replaced.
    pub fn register(&self, connector: Arc<dyn Connector>) -> bool {
        self.inner
            .write()
            .insert(connector.connector_id().to_string(), connector)
            .is_some()
    }

    /// Returns `true` when an existing connector was removed.
    pub fn deregister(&self, connector_id: &str) -> bool {
        self.inner.write().remove(connector_id).is_some()
    }

    pub fn get(&self, connector_id: &str) -> Option<Arc<dyn Connector>> {
        self.inner.read().get(connector_id).cloned()
    }
}

fn global_registry() -> &'static Arc<ConnectorRegistry> {
    static REGISTRY: OnceLock<Arc<ConnectorRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(ConnectorRegistry::default()))
}

/// Return the process-wide connector registry.
pub fn global_connector_registry() -> Arc<ConnectorRegistry> {
    Arc::clone(global_registry())
}
