//! Host stage contract and the generic host stage descriptor.

use std::any::Any;
use std::fmt;

use accelq_common::{PlanNodeId, StageId};
use accelq_planner::PlanNodeRef;
use arrow_schema::SchemaRef;

/// Closed set of stage kinds the lowering pass distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    DataSource,
    Values,
    FilterProject,
    HashBuild,
    HashProbe,
    OrderBy,
    TopN,
    HashAggregation,
    StreamingAggregation,
    Limit,
    LocalPartition,
    LocalExchange,
    AssignUniqueId,
    CallbackSink,
    /// Any host stage the lowering pass has no knowledge of.
    Other,
    /// Boundary stage moving host batches into accelerator memory.
    HostToAccelerator,
    /// Boundary stage moving accelerator batches back into host memory.
    AcceleratorToHost,
    /// Accelerator-native replacement of a host stage.
    Accelerated,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::DataSource => "DataSource",
            StageKind::Values => "Values",
            StageKind::FilterProject => "FilterProject",
            StageKind::HashBuild => "HashBuild",
            StageKind::HashProbe => "HashProbe",
            StageKind::OrderBy => "OrderBy",
            StageKind::TopN => "TopN",
            StageKind::HashAggregation => "HashAggregation",
            StageKind::StreamingAggregation => "StreamingAggregation",
            StageKind::Limit => "Limit",
            StageKind::LocalPartition => "LocalPartition",
            StageKind::LocalExchange => "LocalExchange",
            StageKind::AssignUniqueId => "AssignUniqueId",
            StageKind::CallbackSink => "CallbackSink",
            StageKind::Other => "Other",
            StageKind::HostToAccelerator => "HostToAccelerator",
            StageKind::AcceleratorToHost => "AcceleratorToHost",
            StageKind::Accelerated => "Accelerated",
        }
    }

    /// Check membership in a set of kinds.
    pub fn is_any_of(self, kinds: &[StageKind]) -> bool {
        kinds.contains(&self)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One runtime unit of a pipeline.
///
/// Stages are shared as `Arc<dyn Stage>` so a pipeline splice can re-insert a kept stage
/// next to newly created ones.
pub trait Stage: Send + Sync + fmt::Debug {
    fn stage_id(&self) -> StageId;

    /// Plan node this stage was compiled from.
    fn plan_node_id(&self) -> &PlanNodeId;

    fn kind(&self) -> StageKind;

    fn input_schema(&self) -> SchemaRef;

    fn output_schema(&self) -> SchemaRef;

    /// Stable one-line rendering used in diagnostics.
    fn describe(&self) -> String;

    /// Filter node fused into a filter/project stage.
    ///
    /// When a stage fuses a filter and a projection its plan-node id is the projection's,
    /// so the filter node is reported separately.
    fn filter_node(&self) -> Option<&PlanNodeRef> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

/// Descriptor of a host-engine stage.
///
/// The host's own operator implementations live elsewhere; lowering only needs identity,
/// kind and schemas.
#[derive(Debug, Clone)]
pub struct HostStage {
    id: StageId,
    kind: StageKind,
    plan_node_id: PlanNodeId,
    input_schema: SchemaRef,
    output_schema: SchemaRef,
    filter_node: Option<PlanNodeRef>,
}

impl HostStage {
    pub fn new(
        id: u32,
        kind: StageKind,
        plan_node_id: impl Into<PlanNodeId>,
        input_schema: SchemaRef,
        output_schema: SchemaRef,
    ) -> Self {
        Self {
            id: StageId(id),
            kind,
            plan_node_id: plan_node_id.into(),
            input_schema,
            output_schema,
            filter_node: None,
        }
    }

    pub fn with_filter_node(mut self, node: PlanNodeRef) -> Self {
        self.filter_node = Some(node);
        self
    }
}

impl Stage for HostStage {
    fn stage_id(&self) -> StageId {
        self.id
    }

    fn plan_node_id(&self) -> &PlanNodeId {
        &self.plan_node_id
    }

    fn kind(&self) -> StageKind {
        self.kind
    }

    fn input_schema(&self) -> SchemaRef {
        self.input_schema.clone()
    }

    fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    fn describe(&self) -> String {
        format!("{}[id={}, node={}]", self.kind, self.id, self.plan_node_id)
    }

    fn filter_node(&self) -> Option<&PlanNodeRef> {
        self.filter_node.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
