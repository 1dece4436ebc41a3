#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;

use accelq_common::LoweringMetrics;
use accelq_execution::{Connector, ConnectorRegistry, HostStage, Pipeline, Stage, StageKind};
use accelq_lowering::{EvaluatorRegistry, ExpressionCompiler, FunctionRegistry, PlanRewriter};
use accelq_lowering::register_builtin_functions;
use accelq_planner::{
    AggregationNode, AggregationStep, AssignUniqueIdNode, FilterNode, HashJoinNode, JoinType,
    LimitNode, LiteralValue, LocalPartitionNode, OrderByNode, PartitionScheme, PlanNode,
    PlanNodeKind, PlanNodeRef, ProjectNode, SortKey, TableScanNode, TypedExpr,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parking_lot::Mutex;

pub const ACCEL_CONNECTOR: &str = "accel-hive";
pub const HOST_CONNECTOR: &str = "hive";

pub struct TestConnector {
    id: &'static str,
    accelerated: bool,
}

impl Connector for TestConnector {
    fn connector_id(&self) -> &str {
        self.id
    }

    fn produces_accelerator_batches(&self) -> bool {
        self.accelerated
    }
}

pub fn connectors() -> Arc<ConnectorRegistry> {
    let registry = Arc::new(ConnectorRegistry::default());
    registry.register(Arc::new(TestConnector {
        id: ACCEL_CONNECTOR,
        accelerated: true,
    }));
    registry.register(Arc::new(TestConnector {
        id: HOST_CONNECTOR,
        accelerated: false,
    }));
    registry
}

pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("x", DataType::Int64, true),
        Field::new("s", DataType::Utf8, true),
    ]))
}

pub fn x() -> TypedExpr {
    TypedExpr::col("x", DataType::Int64)
}

pub fn int(v: i64) -> TypedExpr {
    TypedExpr::lit(LiteralValue::Int64(v))
}

pub fn gt(left: TypedExpr, right: TypedExpr) -> TypedExpr {
    TypedExpr::call("gt", vec![left, right], DataType::Boolean)
}

/// `f(x)`, a call no registry knows.
pub fn unknown_f() -> TypedExpr {
    TypedExpr::call("f", vec![x()], DataType::Int64)
}

/// Builds a host pipeline one stage at a time; stage `i` points at plan node `n{i}`.
#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
    nodes: Vec<PlanNodeRef>,
    output: bool,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> String {
        format!("n{}", self.stages.len())
    }

    fn push(mut self, kind: StageKind, node: Option<PlanNodeKind>) -> Self {
        let id = self.next_id();
        let stage = HostStage::new(self.stages.len() as u32, kind, id.as_str(), schema(), schema());
        self.stages.push(Arc::new(stage));
        if let Some(node) = node {
            self.nodes.push(PlanNode::new(id.as_str(), schema(), node));
        }
        self
    }

    pub fn source(self, connector: &str) -> Self {
        self.push(
            StageKind::DataSource,
            Some(PlanNodeKind::TableScan(TableScanNode {
                connector_id: connector.into(),
                table: "lineitem".into(),
            })),
        )
    }

    pub fn values(self) -> Self {
        self.push(StageKind::Values, Some(PlanNodeKind::Values { rows: 3 }))
    }

    /// Filter-only stage: the plan node is the filter itself.
    pub fn filter(mut self, predicate: TypedExpr) -> Self {
        let id = self.next_id();
        let node = PlanNode::new(
            id.as_str(),
            schema(),
            PlanNodeKind::Filter(FilterNode { predicate }),
        );
        let stage = HostStage::new(
            self.stages.len() as u32,
            StageKind::FilterProject,
            id.as_str(),
            schema(),
            schema(),
        )
        .with_filter_node(Arc::clone(&node));
        self.stages.push(Arc::new(stage));
        self.nodes.push(node);
        self
    }

    pub fn project(self, projections: Vec<TypedExpr>) -> Self {
        let names = (0..projections.len()).map(|i| format!("p{i}")).collect();
        self.push(
            StageKind::FilterProject,
            Some(PlanNodeKind::Project(ProjectNode { names, projections })),
        )
    }

    pub fn aggregation(self) -> Self {
        self.push(
            StageKind::HashAggregation,
            Some(PlanNodeKind::Aggregation(AggregationNode {
                step: AggregationStep::Single,
                grouping_keys: vec!["s".into()],
                aggregates: vec![("cnt".into(), TypedExpr::call("count", vec![], DataType::Int64))],
            })),
        )
    }

    pub fn order_by(self) -> Self {
        self.push(
            StageKind::OrderBy,
            Some(PlanNodeKind::OrderBy(OrderByNode {
                keys: vec![SortKey {
                    column: "x".into(),
                    ascending: true,
                    nulls_first: false,
                }],
                is_partial: false,
            })),
        )
    }

    pub fn top_n(self) -> Self {
        self.push(StageKind::TopN, Some(PlanNodeKind::TopN { count: 10 }))
    }

    pub fn limit(self) -> Self {
        self.push(
            StageKind::Limit,
            Some(PlanNodeKind::Limit(LimitNode {
                offset: 0,
                count: 5,
                is_partial: false,
            })),
        )
    }

    pub fn local_partition(self, scheme: PartitionScheme) -> Self {
        self.push(
            StageKind::LocalPartition,
            Some(PlanNodeKind::LocalPartition(LocalPartitionNode { scheme })),
        )
    }

    pub fn local_exchange(self) -> Self {
        self.push(StageKind::LocalExchange, None)
    }

    pub fn assign_unique_id(self) -> Self {
        self.push(
            StageKind::AssignUniqueId,
            Some(PlanNodeKind::AssignUniqueId(AssignUniqueIdNode {
                id_column: "row_id".into(),
                task_unique_id: 7,
                unique_id_counter: Arc::new(AtomicI64::new(0)),
            })),
        )
    }

    pub fn hash_probe(self, join_type: JoinType) -> Self {
        self.push(
            StageKind::HashProbe,
            Some(PlanNodeKind::HashJoin(HashJoinNode {
                join_type,
                null_aware: false,
                left_keys: vec!["x".into()],
                right_keys: vec!["x".into()],
                filter: None,
            })),
        )
    }

    /// A host stage kind lowering knows nothing about.
    pub fn other(self) -> Self {
        self.push(StageKind::Other, None)
    }

    pub fn sink(self) -> Self {
        self.push(StageKind::CallbackSink, None)
    }

    pub fn output(mut self) -> Self {
        self.output = true;
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline::new(self.stages, self.nodes).with_output(self.output)
    }
}

pub fn compiler(metrics: &LoweringMetrics) -> ExpressionCompiler {
    let functions = Arc::new(FunctionRegistry::new());
    register_builtin_functions(&functions, "");
    ExpressionCompiler::new(functions, Arc::new(EvaluatorRegistry::new()))
        .with_metrics(metrics.clone())
}

pub fn rewriter(allow_cpu_fallback: bool, metrics: &LoweringMetrics) -> PlanRewriter {
    PlanRewriter::new(compiler(metrics), connectors())
        .with_allow_cpu_fallback(allow_cpu_fallback)
        .with_metrics(metrics.clone())
}

/// Stage kinds of `pipeline` in order.
pub fn kinds(pipeline: &Pipeline) -> Vec<StageKind> {
    pipeline.stages().iter().map(|s| s.kind()).collect()
}

#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).to_string()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a thread-local subscriber writing plain-text logs into a buffer.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, buffer.contents())
}
