//! Pipeline-compilation hook: adapters that may rewrite a pipeline before it runs.

use std::sync::{Arc, OnceLock};

use accelq_common::Result;
use parking_lot::RwLock;
use tracing::debug;

use crate::pipeline::Pipeline;

/// Adapter invoked on every pipeline at compilation time.
pub trait PipelineAdapter: Send + Sync {
    /// Label identifying the adapter; unregistration matches on it.
    fn label(&self) -> &str;

    /// Rewrite `pipeline` in place. Returns `true` when the pipeline was modified.
    fn adapt(&self, pipeline: &mut Pipeline) -> Result<bool>;
}

/// Ordered list of registered pipeline adapters.
#[derive(Default)]
pub struct AdapterRegistry {
    inner: RwLock<Vec<Arc<dyn PipelineAdapter>>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("labels", &self.labels())
            .finish()
    }
}

impl AdapterRegistry {
    /// Append an adapter; adapters run in registration order.
    pub fn register(&self, adapter: Arc<dyn PipelineAdapter>) {
        self.inner.write().push(adapter);
    }

    /// Remove every adapter carrying `label`, returning how many were removed.
    pub fn unregister(&self, label: &str) -> usize {
        let mut adapters = self.inner.write();
        let before = adapters.len();
        adapters.retain(|a| a.label() != label);
        before - adapters.len()
    }

    pub fn labels(&self) -> Vec<String> {
        self.inner
            .read()
            .iter()
            .map(|a| a.label().to_string())
            .collect()
    }

    /// Run all adapters over `pipeline`. Returns `true` when any adapter modified it.
    pub fn adapt(&self, pipeline: &mut Pipeline) -> Result<bool> {
        let adapters = self.inner.read().clone();
        let mut modified = false;
        for adapter in adapters {
            let changed = adapter.adapt(pipeline)?;
            debug!(
                adapter = adapter.label(),
                changed,
                operator = "PipelineAdapter",
                "adapter applied"
            );
            modified |= changed;
        }
        Ok(modified)
    }
}

fn global_registry() -> &'static Arc<AdapterRegistry> {
    static REGISTRY: OnceLock<Arc<AdapterRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Arc::new(AdapterRegistry::default()))
}

/// Return the process-wide adapter registry the host compiler consults.
pub fn global_adapter_registry() -> Arc<AdapterRegistry> {
    Arc::clone(global_registry())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, bool);

    impl PipelineAdapter for Named {
        fn label(&self) -> &str {
            self.0
        }

        fn adapt(&self, _pipeline: &mut Pipeline) -> Result<bool> {
            Ok(self.1)
        }
    }

    #[test]
    fn unregister_removes_only_matching_label() {
        let r = AdapterRegistry::default();
        r.register(Arc::new(Named("a", false)));
        r.register(Arc::new(Named("b", true)));
        assert_eq!(r.unregister("a"), 1);
        assert_eq!(r.unregister("a"), 0);
        assert_eq!(r.labels(), vec!["b".to_string()]);
    }

    #[test]
    fn adapt_reports_any_modification() {
        let r = AdapterRegistry::default();
        r.register(Arc::new(Named("a", false)));
        let mut p = Pipeline::new(vec![], vec![]);
        assert!(!r.adapt(&mut p).expect("adapt"));
        r.register(Arc::new(Named("b", true)));
        assert!(r.adapt(&mut p).expect("adapt"));
    }
}
