use std::sync::{Arc, OnceLock};

use prometheus::{CounterVec, Encoder, Opts, Registry, TextEncoder};

/// Counters describing what the lowering pass did to host pipelines.
#[derive(Clone, Debug)]
pub struct LoweringMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    stages_replaced: CounterVec,
    boundary_stages: CounterVec,
    fallbacks: CounterVec,
}

impl LoweringMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// A host stage of `kind` was swapped for an accelerator stage.
    pub fn record_replacement(&self, kind: &str) {
        self.inner.stages_replaced.with_label_values(&[kind]).inc();
    }

    /// A boundary-conversion stage was inserted; `direction` is `to_accelerator` or `to_host`.
    pub fn record_boundary(&self, direction: &str) {
        self.inner
            .boundary_stages
            .with_label_values(&[direction])
            .inc();
    }

    /// Something stayed on the host; `reason` is `expression` or `policy`.
    pub fn record_fallback(&self, reason: &str) {
        self.inner.fallbacks.with_label_values(&[reason]).inc();
    }

    pub fn fallback_count(&self, reason: &str) -> u64 {
        self.inner.fallbacks.with_label_values(&[reason]).get() as u64
    }

    pub fn replacement_count(&self, kind: &str) -> u64 {
        self.inner.stages_replaced.with_label_values(&[kind]).get() as u64
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for LoweringMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();
        let stages_replaced = counter_vec(
            &registry,
            "accelq_stages_replaced_total",
            "Host stages replaced by accelerator stages",
            &["kind"],
        );
        let boundary_stages = counter_vec(
            &registry,
            "accelq_boundary_stages_total",
            "Boundary-conversion stages inserted",
            &["direction"],
        );
        let fallbacks = counter_vec(
            &registry,
            "accelq_fallbacks_total",
            "Expressions or stages kept on the host path",
            &["reason"],
        );
        Self {
            registry,
            stages_replaced,
            boundary_stages,
            fallbacks,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

static GLOBAL_METRICS: OnceLock<LoweringMetrics> = OnceLock::new();

pub fn global_metrics() -> &'static LoweringMetrics {
    GLOBAL_METRICS.get_or_init(LoweringMetrics::new)
}
