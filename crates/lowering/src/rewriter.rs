//! Single-pass rewrite of a host pipeline into a mixed host/accelerator pipeline.
//!
//! Per stage, in pipeline order:
//! 1. read the neighbours' support from the snapshot taken before the pass;
//! 2. put a host-to-accelerator boundary in front when the predecessor stays on the host
//!    and this stage consumes accelerator batches;
//! 3. replace the stage with its accelerator counterpart, or keep it;
//! 4. put an accelerator-to-host boundary behind when this stage emits accelerator batches
//!    and the successor stays on the host, or the stage ends the output pipeline;
//! 5. check that the outcome is consistent with the stage kind (see [`PlanRewriter`]);
//! 6. splice the result over the original stage in one `replace_stages` call.

use std::sync::Arc;

use accelq_common::{AccelError, LoweringMetrics, Result, global_metrics};
use accelq_execution::{ConnectorRegistry, Pipeline, Stage, StageKind};
use accelq_planner::{PartitionScheme, PlanNodeRef};
use tracing::{debug, info, warn};

use crate::classifier::{StageClassifier, StageSupport};
use crate::expression::ExpressionCompiler;
use crate::stages::{AcceleratedFilterProject, AcceleratedStage, BoundaryStage};

/// Kinds that must leave the rewrite replaced by an accelerator stage.
const REPLACEABLE_KINDS: &[StageKind] = &[
    StageKind::OrderBy,
    StageKind::TopN,
    StageKind::HashAggregation,
    StageKind::HashProbe,
    StageKind::HashBuild,
    StageKind::StreamingAggregation,
    StageKind::Limit,
    StageKind::LocalPartition,
    StageKind::LocalExchange,
    StageKind::FilterProject,
    StageKind::AssignUniqueId,
];

/// Kinds that stay as host stages on the accelerator path.
const RETAINED_KINDS: &[StageKind] = &[
    StageKind::Values,
    StageKind::LocalExchange,
    StageKind::CallbackSink,
];

/// Outcome of step 3 for one stage.
struct Replacement {
    stages: Vec<Arc<dyn Stage>>,
    keep: bool,
    /// Kept on purpose although the kind is normally replaced.
    retained: bool,
}

impl Replacement {
    fn keep() -> Self {
        Self {
            stages: vec![],
            keep: true,
            retained: false,
        }
    }

    fn retain() -> Self {
        Self {
            retained: true,
            ..Self::keep()
        }
    }

    fn with(stage: Arc<dyn Stage>) -> Self {
        Self {
            stages: vec![stage],
            keep: false,
            retained: false,
        }
    }
}

/// Rewrites host pipelines against one set of registries.
///
/// A stage whose kind is in the replaceable set must end up replaced; a stage in the
/// retained set (plain values, local exchange, sinks, supported data sources, non-hash
/// local partitions) must end up kept with no replacement. Every other outcome, including
/// any stage in neither set, is a policy violation: fatal when CPU fallback is forbidden,
/// otherwise the stage stays on the host and a warning is logged.
#[derive(Debug, Clone)]
pub struct PlanRewriter {
    compiler: ExpressionCompiler,
    connectors: Arc<ConnectorRegistry>,
    allow_cpu_fallback: bool,
    debug_enabled: bool,
    metrics: LoweringMetrics,
}

impl PlanRewriter {
    pub fn new(compiler: ExpressionCompiler, connectors: Arc<ConnectorRegistry>) -> Self {
        Self {
            compiler,
            connectors,
            allow_cpu_fallback: true,
            debug_enabled: false,
            metrics: global_metrics().clone(),
        }
    }

    pub fn with_allow_cpu_fallback(mut self, allow: bool) -> Self {
        self.allow_cpu_fallback = allow;
        self
    }

    pub fn with_debug(mut self, enabled: bool) -> Self {
        self.debug_enabled = enabled;
        self
    }

    pub fn with_metrics(mut self, metrics: LoweringMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn allow_cpu_fallback(&self) -> bool {
        self.allow_cpu_fallback
    }

    /// Classify every stage of `pipeline` without modifying it.
    pub fn classify(&self, pipeline: &Pipeline) -> Result<Vec<StageSupport>> {
        let classifier = StageClassifier::new(pipeline, &self.compiler, &self.connectors);
        pipeline
            .stages()
            .iter()
            .map(|stage| StageSupport::classify(&classifier, stage.as_ref()))
            .collect()
    }

    /// Rewrite `pipeline` in place. Returns `true` when any stage was inserted or replaced.
    pub fn rewrite(&self, pipeline: &mut Pipeline) -> Result<bool> {
        let support = self.classify(pipeline)?;
        let original = pipeline.stages().to_vec();
        let count = original.len();
        if self.debug_enabled {
            info!(
                operator = "PlanRewriter",
                stages = count,
                "pipeline before accelerator rewrite:\n{}",
                pipeline.explain()
            );
        }

        let mut modified = false;
        // Net number of stages added in front of the current original stage.
        let mut offset = 0usize;
        for (index, stage) in original.iter().enumerate() {
            let this = support[index];
            let previous_on_host = index > 0 && !support[index - 1].supported;
            let next_on_host = index + 1 < count && !support[index + 1].supported;
            let ends_output = pipeline.is_output() && index + 1 == count;

            let mut spliced: Vec<Arc<dyn Stage>> = Vec::new();
            if previous_on_host && this.accepts_input {
                let boundary = BoundaryStage::to_accelerator(stage.as_ref());
                self.metrics.record_boundary(boundary.direction().label());
                spliced.push(Arc::new(boundary));
            }

            let replacement = self.replace(pipeline, stage, &this)?;
            let replaced = !replacement.stages.is_empty();
            if replacement.keep {
                spliced.push(Arc::clone(stage));
            }
            spliced.extend(replacement.stages.iter().cloned());
            if replaced {
                self.metrics.record_replacement(stage.kind().name());
            }

            if this.produces_output && (next_on_host || ends_output) {
                let boundary = BoundaryStage::to_host(stage.as_ref());
                self.metrics.record_boundary(boundary.direction().label());
                spliced.push(Arc::new(boundary));
            }

            if self.debug_enabled {
                info!(
                    operator = "PlanRewriter",
                    stage_id = %stage.stage_id(),
                    stage = %stage.describe(),
                    keep = replacement.keep,
                    replacements = replacement.stages.len(),
                    "stage classified"
                );
            }
            self.check_consistency(stage.as_ref(), &this, &replacement)?;

            let unchanged = replacement.keep && spliced.len() == 1;
            if unchanged {
                continue;
            }
            let at = index + offset;
            let added = spliced.len();
            pipeline.replace_stages(at, at + 1, spliced)?;
            offset += added - 1;
            modified = true;
        }

        if self.debug_enabled {
            info!(
                operator = "PlanRewriter",
                stages = pipeline.len(),
                modified,
                "pipeline after accelerator rewrite:\n{}",
                pipeline.explain()
            );
        }
        Ok(modified)
    }

    fn replace(
        &self,
        pipeline: &Pipeline,
        stage: &Arc<dyn Stage>,
        support: &StageSupport,
    ) -> Result<Replacement> {
        let host = stage.as_ref();
        if support.data_source {
            return Ok(Replacement::retain());
        }
        if support.join {
            let node = pipeline.plan_node(host.plan_node_id())?;
            return Ok(Replacement::with(Arc::new(AcceleratedStage::new(host, node))));
        }
        let replacement = match host.kind() {
            StageKind::OrderBy => {
                let node = self.typed_node(pipeline, host, |n| n.as_order_by().is_some())?;
                Replacement::with(Arc::new(AcceleratedStage::new(host, node)))
            }
            StageKind::HashAggregation => {
                let node = self.typed_node(pipeline, host, |n| n.as_aggregation().is_some())?;
                Replacement::with(Arc::new(AcceleratedStage::new(host, node)))
            }
            StageKind::FilterProject if support.filter_project => {
                let node = pipeline.plan_node(host.plan_node_id())?;
                let project = node.as_project().is_some().then_some(node);
                Replacement::with(Arc::new(AcceleratedFilterProject::try_new(
                    host,
                    project,
                    &self.compiler,
                )?))
            }
            StageKind::Limit => {
                let node = self.typed_node(pipeline, host, |n| n.as_limit().is_some())?;
                Replacement::with(Arc::new(AcceleratedStage::new(host, node)))
            }
            StageKind::LocalPartition => {
                let node = self.typed_node(pipeline, host, |n| n.as_local_partition().is_some())?;
                let hashed = node
                    .as_local_partition()
                    .is_some_and(|p| matches!(p.scheme, PartitionScheme::Hash { .. }));
                if hashed {
                    Replacement::with(Arc::new(AcceleratedStage::new(host, node)))
                } else {
                    // Round-robin and gather run on the host stage, which accepts accelerator batches.
                    Replacement::retain()
                }
            }
            StageKind::LocalExchange => Replacement::retain(),
            StageKind::AssignUniqueId => {
                let node =
                    self.typed_node(pipeline, host, |n| n.as_assign_unique_id().is_some())?;
                Replacement::with(Arc::new(AcceleratedStage::new(host, node)))
            }
            StageKind::Values | StageKind::CallbackSink => Replacement::retain(),
            _ => Replacement::keep(),
        };
        Ok(replacement)
    }

    fn typed_node(
        &self,
        pipeline: &Pipeline,
        stage: &dyn Stage,
        matches: impl Fn(&PlanNodeRef) -> bool,
    ) -> Result<PlanNodeRef> {
        let node = pipeline.plan_node(stage.plan_node_id())?;
        if !matches(&node) {
            return Err(AccelError::Planning(format!(
                "{} stage {} points at {} plan node {}",
                stage.kind(),
                stage.stage_id(),
                node.kind_name(),
                node.id()
            )));
        }
        Ok(node)
    }

    fn check_consistency(
        &self,
        stage: &dyn Stage,
        support: &StageSupport,
        replacement: &Replacement,
    ) -> Result<()> {
        let kind = stage.kind();
        let replaceable = kind.is_any_of(REPLACEABLE_KINDS);
        let retained = kind.is_any_of(RETAINED_KINDS)
            || (kind == StageKind::DataSource && support.data_source)
            || (kind == StageKind::LocalPartition && replacement.retained);
        let replaced = !replacement.stages.is_empty();
        let consistent = (replaceable && replaced && !replacement.keep)
            || (retained && !replaced && replacement.keep);
        debug!(
            operator = "PlanRewriter",
            stage_id = %stage.stage_id(),
            kind = kind.name(),
            replaceable,
            retained,
            consistent,
            "replacement check"
        );
        if consistent {
            return Ok(());
        }
        if !self.allow_cpu_fallback {
            return Err(AccelError::Planning(format!(
                "accelerator replacement failed for {} and CPU fallback is disabled",
                stage.describe()
            )));
        }
        self.metrics.record_fallback("policy");
        warn!(
            operator = "PlanRewriter",
            stage_id = %stage.stage_id(),
            stage = %stage.describe(),
            "accelerator replacement failed; stage stays on the host"
        );
        Ok(())
    }
}
