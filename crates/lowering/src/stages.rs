//! Stages the rewriter splices into host pipelines.

use std::any::Any;
use std::sync::Arc;

use accelq_common::{AccelError, PlanNodeId, Result, StageId};
use accelq_execution::{DeviceContext, Stage, StageKind};
use accelq_planner::PlanNodeRef;
use arrow::array::{Array, ArrayRef, BooleanArray};
use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use arrow_schema::SchemaRef;

use crate::expression::{CompiledExpression, ExpressionCompiler};

/// Direction of a boundary-conversion stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryDirection {
    ToAccelerator,
    ToHost,
}

impl BoundaryDirection {
    /// Metric label.
    pub fn label(self) -> &'static str {
        match self {
            BoundaryDirection::ToAccelerator => "to_accelerator",
            BoundaryDirection::ToHost => "to_host",
        }
    }
}

/// Moves batches between host memory and accelerator memory.
///
/// Boundary stages share the stage id and plan-node id of the stage they were inserted for.
#[derive(Debug)]
pub struct BoundaryStage {
    id: StageId,
    plan_node_id: PlanNodeId,
    direction: BoundaryDirection,
    schema: SchemaRef,
}

impl BoundaryStage {
    /// Boundary in front of `stage`, converting its input.
    pub fn to_accelerator(stage: &dyn Stage) -> Self {
        Self {
            id: stage.stage_id(),
            plan_node_id: stage.plan_node_id().clone(),
            direction: BoundaryDirection::ToAccelerator,
            schema: stage.input_schema(),
        }
    }

    /// Boundary behind `stage`, converting its output.
    pub fn to_host(stage: &dyn Stage) -> Self {
        Self {
            id: stage.stage_id(),
            plan_node_id: stage.plan_node_id().clone(),
            direction: BoundaryDirection::ToHost,
            schema: stage.output_schema(),
        }
    }

    pub fn direction(&self) -> BoundaryDirection {
        self.direction
    }
}

impl Stage for BoundaryStage {
    fn stage_id(&self) -> StageId {
        self.id
    }

    fn plan_node_id(&self) -> &PlanNodeId {
        &self.plan_node_id
    }

    fn kind(&self) -> StageKind {
        match self.direction {
            BoundaryDirection::ToAccelerator => StageKind::HostToAccelerator,
            BoundaryDirection::ToHost => StageKind::AcceleratorToHost,
        }
    }

    fn input_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn output_schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn describe(&self) -> String {
        format!("{}[id={}, node={}]", self.kind(), self.id, self.plan_node_id)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Accelerator-native counterpart of a host stage without expressions of its own.
#[derive(Debug)]
pub struct AcceleratedStage {
    id: StageId,
    replaces: StageKind,
    plan_node: PlanNodeRef,
    input_schema: SchemaRef,
}

impl AcceleratedStage {
    pub fn new(host: &dyn Stage, plan_node: PlanNodeRef) -> Self {
        Self {
            id: host.stage_id(),
            replaces: host.kind(),
            plan_node,
            input_schema: host.input_schema(),
        }
    }

    /// Host stage kind this stage stands in for.
    pub fn replaces(&self) -> StageKind {
        self.replaces
    }

    pub fn plan_node(&self) -> &PlanNodeRef {
        &self.plan_node
    }
}

impl Stage for AcceleratedStage {
    fn stage_id(&self) -> StageId {
        self.id
    }

    fn plan_node_id(&self) -> &PlanNodeId {
        self.plan_node.id()
    }

    fn kind(&self) -> StageKind {
        StageKind::Accelerated
    }

    fn input_schema(&self) -> SchemaRef {
        self.input_schema.clone()
    }

    fn output_schema(&self) -> SchemaRef {
        self.plan_node.output_schema().clone()
    }

    fn describe(&self) -> String {
        format!("Accelerated{}[id={}, node={}]", self.replaces, self.id, self.plan_node.id())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Accelerator filter/project with expressions compiled once at construction.
#[derive(Debug)]
pub struct AcceleratedFilterProject {
    id: StageId,
    plan_node_id: PlanNodeId,
    input_schema: SchemaRef,
    output_schema: SchemaRef,
    filter_node: Option<PlanNodeRef>,
    filter: Option<Arc<dyn CompiledExpression>>,
    projections: Option<Vec<Arc<dyn CompiledExpression>>>,
}

impl AcceleratedFilterProject {
    /// Compile the filter predicate and projections of `host` against its input schema.
    ///
    /// `project` is the stage's own plan node when it is a projection; a filter-only stage
    /// passes the filtered input through.
    pub fn try_new(
        host: &dyn Stage,
        project: Option<PlanNodeRef>,
        compiler: &ExpressionCompiler,
    ) -> Result<Self> {
        let input_schema = host.input_schema();
        let filter_node = host.filter_node().cloned();
        let filter = match filter_node.as_ref().and_then(|n| n.as_filter()) {
            Some(f) => Some(compiler.compile_typed(&f.predicate, &input_schema)?),
            None => None,
        };
        let projections = match project.as_ref().and_then(|n| n.as_project()) {
            Some(p) => Some(
                p.projections
                    .iter()
                    .map(|e| compiler.compile_typed(e, &input_schema))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        if filter.is_none() && projections.is_none() {
            return Err(AccelError::Planning(format!(
                "filter/project stage {} has neither a filter nor a projection",
                host.stage_id()
            )));
        }
        Ok(Self {
            id: host.stage_id(),
            plan_node_id: host.plan_node_id().clone(),
            input_schema,
            output_schema: host.output_schema(),
            filter_node,
            filter,
            projections,
        })
    }

    pub fn projection_count(&self) -> usize {
        self.projections.as_ref().map_or(0, Vec::len)
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    /// Apply the filter, then evaluate the projections over the surviving rows.
    pub fn evaluate(&self, batch: &RecordBatch, ctx: &DeviceContext) -> Result<RecordBatch> {
        let batch = match &self.filter {
            Some(filter) => {
                let mask = filter
                    .eval(batch.columns(), batch.num_rows(), ctx, true)?
                    .into_column();
                let mask = mask
                    .as_any()
                    .downcast_ref::<BooleanArray>()
                    .ok_or_else(|| {
                        AccelError::Execution(format!(
                            "filter produced {} instead of boolean",
                            mask.data_type()
                        ))
                    })?;
                filter_record_batch(batch, mask)
                    .map_err(|e| AccelError::Execution(format!("filter failed: {e}")))?
            }
            None => batch.clone(),
        };
        let Some(projections) = &self.projections else {
            return Ok(batch);
        };
        let columns = projections
            .iter()
            .map(|p| {
                p.eval(batch.columns(), batch.num_rows(), ctx, true)
                    .map(|c| c.into_column())
            })
            .collect::<Result<Vec<ArrayRef>>>()?;
        RecordBatch::try_new(self.output_schema.clone(), columns)
            .map_err(|e| AccelError::Execution(format!("project failed: {e}")))
    }
}

impl Stage for AcceleratedFilterProject {
    fn stage_id(&self) -> StageId {
        self.id
    }

    fn plan_node_id(&self) -> &PlanNodeId {
        &self.plan_node_id
    }

    fn kind(&self) -> StageKind {
        StageKind::Accelerated
    }

    fn input_schema(&self) -> SchemaRef {
        self.input_schema.clone()
    }

    fn output_schema(&self) -> SchemaRef {
        self.output_schema.clone()
    }

    fn describe(&self) -> String {
        format!(
            "AcceleratedFilterProject[id={}, node={}, filter={}, projections={}]",
            self.id,
            self.plan_node_id,
            self.filter.is_some(),
            self.projection_count()
        )
    }

    fn filter_node(&self) -> Option<&PlanNodeRef> {
        self.filter_node.as_ref()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
