//! Activation and deactivation of the accelerator subsystem.
//!
//! Activation builds an [`AcceleratorContext`] (memory resource, registries, built-ins) and
//! installs one pipeline adapter labelled [`ADAPTER_LABEL`]. Deactivation removes exactly
//! that adapter and drops the context, releasing the memory resource once in-flight
//! rewrites finish. Both are idempotent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use accelq_common::config::query_enabled;
use accelq_common::{AcceleratorConfig, LoweringMetrics, Result, global_metrics};
use accelq_execution::{
    AdapterRegistry, ConnectorRegistry, DeviceContext, DeviceMemoryResource, DeviceStream,
    Pipeline, PipelineAdapter, create_memory_resource, global_adapter_registry,
    global_connector_registry,
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::ast::register_ast_evaluator;
use crate::evaluator::EvaluatorRegistry;
use crate::expression::ExpressionCompiler;
use crate::functions::{FunctionRegistry, register_builtin_functions};
use crate::rewriter::PlanRewriter;

/// Label of the pipeline adapter this subsystem installs.
pub const ADAPTER_LABEL: &str = "accelerator";

/// Everything one activation owns.
#[derive(Debug)]
pub struct AcceleratorContext {
    config: AcceleratorConfig,
    memory_resource: Arc<DeviceMemoryResource>,
    functions: Arc<FunctionRegistry>,
    evaluators: Arc<EvaluatorRegistry>,
    connectors: Arc<ConnectorRegistry>,
    metrics: LoweringMetrics,
}

impl AcceleratorContext {
    pub fn new(config: AcceleratorConfig, connectors: Arc<ConnectorRegistry>) -> Result<Self> {
        Self::with_metrics(config, connectors, global_metrics().clone())
    }

    pub fn with_metrics(
        config: AcceleratorConfig,
        connectors: Arc<ConnectorRegistry>,
        metrics: LoweringMetrics,
    ) -> Result<Self> {
        let memory_resource =
            create_memory_resource(&config.memory_resource, config.memory_percent)?;
        let functions = Arc::new(FunctionRegistry::new());
        register_builtin_functions(&functions, &config.function_name_prefix);
        let evaluators = Arc::new(EvaluatorRegistry::new());
        evaluators.ensure_builtin_evaluators(&functions);
        if config.ast_expression_enabled {
            register_ast_evaluator(
                &evaluators,
                config.ast_expression_priority,
                &config.function_name_prefix,
            );
        }
        Ok(Self {
            config,
            memory_resource,
            functions,
            evaluators,
            connectors,
            metrics,
        })
    }

    pub fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn evaluators(&self) -> &Arc<EvaluatorRegistry> {
        &self.evaluators
    }

    pub fn connectors(&self) -> &Arc<ConnectorRegistry> {
        &self.connectors
    }

    pub fn memory_resource(&self) -> &Arc<DeviceMemoryResource> {
        &self.memory_resource
    }

    pub fn metrics(&self) -> &LoweringMetrics {
        &self.metrics
    }

    pub fn compiler(&self) -> ExpressionCompiler {
        ExpressionCompiler::new(Arc::clone(&self.functions), Arc::clone(&self.evaluators))
            .with_log_fallback(self.config.log_fallback)
            .with_metrics(self.metrics.clone())
    }

    pub fn rewriter(&self) -> PlanRewriter {
        PlanRewriter::new(self.compiler(), Arc::clone(&self.connectors))
            .with_allow_cpu_fallback(self.config.allow_cpu_fallback)
            .with_debug(self.config.debug_enabled)
            .with_metrics(self.metrics.clone())
    }

    pub fn rewrite(&self, pipeline: &mut Pipeline) -> Result<bool> {
        self.rewriter().rewrite(pipeline)
    }

    /// Context for per-batch evaluation on the default stream.
    pub fn device_context(&self) -> DeviceContext {
        DeviceContext::new(
            DeviceStream::default_stream(),
            Arc::clone(&self.memory_resource),
        )
    }
}

/// Pipeline adapter that runs the rewrite for every compiled pipeline.
#[derive(Debug)]
pub struct AcceleratorPipelineAdapter {
    context: Arc<AcceleratorContext>,
}

impl AcceleratorPipelineAdapter {
    pub fn new(context: Arc<AcceleratorContext>) -> Self {
        Self { context }
    }
}

impl PipelineAdapter for AcceleratorPipelineAdapter {
    fn label(&self) -> &str {
        ADAPTER_LABEL
    }

    fn adapt(&self, pipeline: &mut Pipeline) -> Result<bool> {
        let config = self.context.config();
        let enabled = query_enabled(pipeline.query_config(), config.enabled)?;
        // Without CPU fallback every pipeline must go through the checks.
        if !enabled && config.allow_cpu_fallback {
            debug!(
                operator = "AcceleratorPipelineAdapter",
                "accelerator disabled for query"
            );
            return Ok(false);
        }
        self.context.rewrite(pipeline)
    }
}

/// Activation state bound to one adapter registry and one connector registry.
#[derive(Debug)]
pub struct Accelerator {
    adapters: Arc<AdapterRegistry>,
    connectors: Arc<ConnectorRegistry>,
    active: AtomicBool,
    context: Mutex<Option<Arc<AcceleratorContext>>>,
}

impl Accelerator {
    pub fn new(adapters: Arc<AdapterRegistry>, connectors: Arc<ConnectorRegistry>) -> Self {
        Self {
            adapters,
            connectors,
            active: AtomicBool::new(false),
            context: Mutex::new(None),
        }
    }

    /// Activate with the given configuration map.
    ///
    /// Returns `false` when already active; the running configuration is kept. Invalid
    /// configuration leaves the subsystem inactive.
    pub fn activate(&self, config: &HashMap<String, String>) -> Result<bool> {
        let mut slot = self.context.lock();
        if slot.is_some() {
            return Ok(false);
        }
        let config = AcceleratorConfig::from_map(config)?;
        let context = Arc::new(AcceleratorContext::new(config, Arc::clone(&self.connectors))?);
        self.adapters
            .register(Arc::new(AcceleratorPipelineAdapter::new(Arc::clone(&context))));
        info!(
            operator = "Accelerator",
            enabled = context.config().enabled,
            memory_resource = %context.config().memory_resource,
            memory_percent = context.config().memory_percent,
            function_name_prefix = %context.config().function_name_prefix,
            ast_expression_enabled = context.config().ast_expression_enabled,
            "accelerator activated"
        );
        *slot = Some(context);
        self.active.store(true, Ordering::Release);
        Ok(true)
    }

    /// Returns `false` when already inactive.
    pub fn deactivate(&self) -> bool {
        let mut slot = self.context.lock();
        let Some(context) = slot.take() else {
            return false;
        };
        let removed = self.adapters.unregister(ADAPTER_LABEL);
        self.active.store(false, Ordering::Release);
        info!(
            operator = "Accelerator",
            adapters_removed = removed,
            allocated_bytes = context.memory_resource().allocated_bytes(),
            "accelerator deactivated"
        );
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn context(&self) -> Option<Arc<AcceleratorContext>> {
        self.context.lock().clone()
    }
}

fn global_accelerator() -> &'static Accelerator {
    static ACCELERATOR: OnceLock<Accelerator> = OnceLock::new();
    ACCELERATOR
        .get_or_init(|| Accelerator::new(global_adapter_registry(), global_connector_registry()))
}

/// Activate the process-wide subsystem against the global host registries.
pub fn activate(config: &HashMap<String, String>) -> Result<bool> {
    global_accelerator().activate(config)
}

pub fn deactivate() -> bool {
    global_accelerator().deactivate()
}

pub fn is_active() -> bool {
    global_accelerator().is_active()
}

/// Context of the process-wide subsystem while it is active.
pub fn active_context() -> Option<Arc<AcceleratorContext>> {
    global_accelerator().context()
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelq_common::AccelError;
    use accelq_common::config::{AST_EXPRESSION_ENABLED, FUNCTION_NAME_PREFIX, MEMORY_RESOURCE};

    use crate::ast::AST_EVALUATOR;
    use crate::evaluator::FUNCTION_EVALUATOR;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn accelerator() -> Accelerator {
        Accelerator::new(
            Arc::new(AdapterRegistry::default()),
            Arc::new(ConnectorRegistry::default()),
        )
    }

    #[test]
    fn activation_installs_prefixed_builtins_and_ast() {
        let a = accelerator();
        let activated = a
            .activate(&map(&[
                (FUNCTION_NAME_PREFIX, "presto.default."),
                (AST_EXPRESSION_ENABLED, "true"),
            ]))
            .expect("activate");
        assert!(activated);
        assert!(a.is_active());
        let ctx = a.context().expect("context");
        assert!(ctx.functions().contains("presto.default.substr"));
        assert!(ctx.functions().contains("presto.default.cast"));
        assert!(!ctx.functions().contains("cast"));
        assert_eq!(
            ctx.evaluators().names(),
            vec![AST_EVALUATOR.to_string(), FUNCTION_EVALUATOR.to_string()]
        );
    }

    #[test]
    fn second_activation_is_a_noop() {
        let a = accelerator();
        assert!(a.activate(&HashMap::new()).expect("activate"));
        assert!(!a.activate(&HashMap::new()).expect("activate"));
        assert_eq!(a.adapters.labels(), vec![ADAPTER_LABEL.to_string()]);
    }

    #[test]
    fn invalid_memory_mode_leaves_subsystem_inactive() {
        let a = accelerator();
        let err = a.activate(&map(&[(MEMORY_RESOURCE, "gpu")])).unwrap_err();
        assert!(matches!(err, AccelError::InvalidConfig(_)));
        assert!(!a.is_active());
        assert!(a.adapters.labels().is_empty());
    }
}
