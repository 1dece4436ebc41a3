//! Per-stage accelerator support predicates.
//!
//! Predicates only read the stage, its plan node and the registries. Expression checks log a
//! fallback diagnostic for the first unsupported node they meet, so the rewriter classifies
//! each stage exactly once through [`StageSupport::classify`] and reuses the snapshot.

use accelq_common::{AccelError, Result};
use accelq_execution::{ConnectorRegistry, Pipeline, Stage, StageKind};
use accelq_planner::{JoinType, PlanNodeRef};

use crate::expression::ExpressionCompiler;

/// Kinds supported without inspecting the plan node.
const GENERIC_KINDS: &[StageKind] = &[
    StageKind::OrderBy,
    StageKind::HashAggregation,
    StageKind::Limit,
    StageKind::LocalPartition,
    StageKind::LocalExchange,
    StageKind::AssignUniqueId,
];

/// Generic kinds that consume accelerator-resident batches.
const ACCEPTING_KINDS: &[StageKind] = &[
    StageKind::OrderBy,
    StageKind::HashAggregation,
    StageKind::Limit,
    StageKind::LocalPartition,
    StageKind::AssignUniqueId,
];

/// Generic kinds that emit accelerator-resident batches.
const PRODUCING_KINDS: &[StageKind] = &[
    StageKind::OrderBy,
    StageKind::HashAggregation,
    StageKind::Limit,
    StageKind::LocalExchange,
    StageKind::AssignUniqueId,
];

/// Join types with an accelerator hash join.
pub const SUPPORTED_JOIN_TYPES: &[JoinType] = &[
    JoinType::Inner,
    JoinType::Left,
    JoinType::Right,
    JoinType::Anti,
    JoinType::LeftSemiFilter,
    JoinType::RightSemiFilter,
];

/// Support predicates over the stages of one pipeline.
#[derive(Debug)]
pub struct StageClassifier<'a> {
    pipeline: &'a Pipeline,
    compiler: &'a ExpressionCompiler,
    connectors: &'a ConnectorRegistry,
}

impl<'a> StageClassifier<'a> {
    pub fn new(
        pipeline: &'a Pipeline,
        compiler: &'a ExpressionCompiler,
        connectors: &'a ConnectorRegistry,
    ) -> Self {
        Self {
            pipeline,
            compiler,
            connectors,
        }
    }

    fn plan_node(&self, stage: &dyn Stage) -> Result<PlanNodeRef> {
        self.pipeline.plan_node(stage.plan_node_id())
    }

    /// A data source whose connector emits accelerator batches.
    ///
    /// Only the connector's capability is consulted. Whether the connector can serve this
    /// particular table handle is not asked, so a capable connector that would fall back
    /// to host batches for some handles is still reported as supported.
    pub fn is_data_source_supported(&self, stage: &dyn Stage) -> Result<bool> {
        if stage.kind() != StageKind::DataSource {
            return Ok(false);
        }
        let node = self.plan_node(stage)?;
        let scan = node.as_table_scan().ok_or_else(|| {
            AccelError::Planning(format!(
                "data source stage {} points at {} instead of a table scan",
                stage.stage_id(),
                node.kind_name()
            ))
        })?;
        Ok(self
            .connectors
            .get(&scan.connector_id)
            .is_some_and(|c| c.produces_accelerator_batches()))
    }

    /// Every projection and the fused filter predicate compile for the accelerator.
    pub fn is_filter_project_supported(&self, stage: &dyn Stage) -> Result<bool> {
        if stage.kind() != StageKind::FilterProject {
            return Ok(false);
        }
        let node = self.plan_node(stage)?;
        if let Some(project) = node.as_project() {
            if !self.compiler.can_evaluate_all(&project.projections) {
                return Ok(false);
            }
        }
        let filter = stage
            .filter_node()
            .and_then(|n| n.as_filter())
            .or_else(|| node.as_filter());
        Ok(filter.map_or(true, |f| self.compiler.can_evaluate(&f.predicate)))
    }

    /// Hash build or probe of a supported join type.
    pub fn is_join_supported(&self, stage: &dyn Stage) -> Result<bool> {
        if !stage.kind().is_any_of(&[StageKind::HashBuild, StageKind::HashProbe]) {
            return Ok(false);
        }
        let node = self.plan_node(stage)?;
        let Some(join) = node.as_hash_join() else {
            return Ok(false);
        };
        if !SUPPORTED_JOIN_TYPES.contains(&join.join_type) {
            return Ok(false);
        }
        // Null-aware anti join with a residual filter is not lowered yet.
        if join.join_type == JoinType::Anti && join.null_aware && join.filter.is_some() {
            return Ok(false);
        }
        Ok(true)
    }

    pub fn is_generic_supported(&self, stage: &dyn Stage) -> bool {
        stage.kind().is_any_of(GENERIC_KINDS)
    }

    pub fn accepts_accelerator_input(&self, stage: &dyn Stage) -> Result<bool> {
        Ok(StageSupport::classify(self, stage)?.accepts_input)
    }

    pub fn produces_accelerator_output(&self, stage: &dyn Stage) -> Result<bool> {
        Ok(StageSupport::classify(self, stage)?.produces_output)
    }

    pub fn is_accelerator_capable(&self, stage: &dyn Stage) -> Result<bool> {
        Ok(StageSupport::classify(self, stage)?.supported)
    }
}

/// Classification of one stage, computed once before the rewrite pass touches anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSupport {
    pub data_source: bool,
    pub filter_project: bool,
    pub join: bool,
    pub generic: bool,
    pub supported: bool,
    pub accepts_input: bool,
    pub produces_output: bool,
}

impl StageSupport {
    pub fn classify(classifier: &StageClassifier<'_>, stage: &dyn Stage) -> Result<Self> {
        let kind = stage.kind();
        let data_source = classifier.is_data_source_supported(stage)?;
        let filter_project = classifier.is_filter_project_supported(stage)?;
        let join = classifier.is_join_supported(stage)?;
        let generic = classifier.is_generic_supported(stage);
        Ok(Self {
            data_source,
            filter_project,
            join,
            generic,
            supported: generic || filter_project || join || data_source,
            accepts_input: kind.is_any_of(ACCEPTING_KINDS) || filter_project || join,
            produces_output: kind.is_any_of(PRODUCING_KINDS)
                || filter_project
                || (kind == StageKind::HashProbe && join)
                || data_source,
        })
    }
}
