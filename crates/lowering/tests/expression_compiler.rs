mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use accelq_common::{AccelError, LoweringMetrics};
use accelq_execution::{
    ColumnOrView, DeviceContext, DeviceStream, HostExpr, HostStage, Stage, StageKind,
    create_memory_resource,
};
use accelq_lowering::{
    AcceleratedFilterProject, CompiledExpression, EvaluatorRegistry, ExpressionCompiler,
    FunctionRegistry,
};
use accelq_planner::{FilterNode, LiteralValue, PlanNode, PlanNodeKind, ProjectNode, TypedExpr};
use arrow::array::{Array, ArrayRef, Int32Array, Int64Array, StringArray};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use support::*;

fn device() -> DeviceContext {
    DeviceContext::new(
        DeviceStream::default_stream(),
        create_memory_resource("pool", 25).expect("mr"),
    )
}

fn counting_evaluator(
    registry: &EvaluatorRegistry,
    name: &'static str,
    priority: i32,
    checks: Arc<AtomicUsize>,
) -> bool {
    registry.register(
        name,
        priority,
        Arc::new(|_: &TypedExpr| true),
        Arc::new(move |_: &HostExpr| {
            checks.fetch_add(1, Ordering::SeqCst);
            true
        }),
        Arc::new(
            move |_: &Arc<HostExpr>,
                  _: &SchemaRef,
                  _: &ExpressionCompiler|
                  -> accelq_common::Result<Arc<dyn CompiledExpression>> {
                Err(AccelError::Unsupported(format!("picked {name}")))
            },
        ),
        false,
    )
}

#[test]
fn field_reference_resolves_by_schema_without_any_registry() {
    let functions = Arc::new(FunctionRegistry::new());
    let evaluators = Arc::new(EvaluatorRegistry::new());
    let checks = Arc::new(AtomicUsize::new(0));
    counting_evaluator(&evaluators, "greedy", 1_000, Arc::clone(&checks));
    let compiler = ExpressionCompiler::new(functions, evaluators)
        .with_metrics(LoweringMetrics::new());

    let compiled = compiler
        .compile(&HostExpr::field("s", DataType::Utf8), &schema(), None)
        .expect("compile");
    assert_eq!(checks.load(Ordering::SeqCst), 0);

    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![1, 2])),
        Arc::new(StringArray::from(vec!["a", "b"])),
    ];
    let out = compiled.eval(&columns, 2, &device(), false).expect("eval");
    assert!(out.is_view());
    assert!(Arc::ptr_eq(out.as_array(), &columns[schema().index_of("s").expect("s")]));
}

#[test]
fn unknown_field_is_a_planning_error() {
    let compiler = compiler(&LoweringMetrics::new());
    let err = compiler
        .compile(&HostExpr::field("missing", DataType::Int64), &schema(), None)
        .unwrap_err();
    assert!(matches!(err, AccelError::Planning(_)));
}

#[test]
fn highest_priority_matching_strategy_builds_the_node() {
    let evaluators = Arc::new(EvaluatorRegistry::new());
    let checks = Arc::new(AtomicUsize::new(0));
    counting_evaluator(&evaluators, "low", 10, Arc::clone(&checks));
    counting_evaluator(&evaluators, "high", 90, Arc::clone(&checks));
    assert!(!counting_evaluator(&evaluators, "high", 5, Arc::clone(&checks)));
    let compiler = ExpressionCompiler::new(Arc::new(FunctionRegistry::new()), evaluators)
        .with_metrics(LoweringMetrics::new());

    let call = HostExpr::call("f", vec![HostExpr::field("x", DataType::Int64)], DataType::Int64);
    let err = compiler.compile(&call, &schema(), None).unwrap_err();
    assert!(err.to_string().contains("picked high"), "{err}");
    let err = compiler.compile(&call, &schema(), Some("high")).unwrap_err();
    assert!(err.to_string().contains("picked low"), "{err}");
}

#[test]
fn malformed_call_fails_at_construction() {
    let compiler = compiler(&LoweringMetrics::new());
    let split = TypedExpr::call(
        "split",
        vec![TypedExpr::col("s", DataType::Utf8), TypedExpr::col("s", DataType::Utf8)],
        DataType::List(Arc::new(Field::new("item", DataType::Utf8, true))),
    );
    let err = compiler.compile_typed(&split, &schema()).unwrap_err();
    assert!(matches!(err, AccelError::MalformedExpression(_)), "{err}");
}

fn filter_project_stage() -> (HostStage, accelq_planner::PlanNodeRef, SchemaRef) {
    let out = Arc::new(Schema::new(vec![
        Field::new("x", DataType::Int64, true),
        Field::new("len", DataType::Int32, true),
        Field::new("half", DataType::Float64, true),
    ]));
    let filter = PlanNode::new(
        "filter",
        schema(),
        PlanNodeKind::Filter(FilterNode {
            predicate: gt(x(), int(2)),
        }),
    );
    let project = PlanNode::new(
        "project",
        out.clone(),
        PlanNodeKind::Project(ProjectNode {
            names: vec!["x".into(), "len".into(), "half".into()],
            projections: vec![
                x(),
                TypedExpr::call("length", vec![TypedExpr::col("s", DataType::Utf8)], DataType::Int32),
                TypedExpr::call(
                    "divide",
                    vec![x(), TypedExpr::lit(LiteralValue::Int64(2))],
                    DataType::Float64,
                ),
            ],
        }),
    );
    let stage = HostStage::new(4, StageKind::FilterProject, "project", schema(), out.clone())
        .with_filter_node(filter);
    (stage, project, out)
}

#[test]
fn accelerated_filter_project_filters_then_projects() {
    let compiler = compiler(&LoweringMetrics::new());
    let (host, project, out_schema) = filter_project_stage();
    let stage = AcceleratedFilterProject::try_new(&host, Some(project), &compiler).expect("stage");
    assert!(stage.has_filter());
    assert_eq!(stage.projection_count(), 3);
    assert_eq!(stage.kind(), StageKind::Accelerated);
    assert_eq!(stage.filter_node().map(|n| n.id().as_str()), Some("filter"));

    let batch = RecordBatch::try_new(
        schema(),
        vec![
            Arc::new(Int64Array::from(vec![1, 3, 8])),
            Arc::new(StringArray::from(vec!["a", "héllo", "xyz"])),
        ],
    )
    .expect("batch");
    let ctx = device();
    let out = stage.evaluate(&batch, &ctx).expect("evaluate");
    assert_eq!(out.schema(), out_schema);
    assert_eq!(out.num_rows(), 2);
    let len = out.column(1).as_any().downcast_ref::<Int32Array>().expect("len");
    assert_eq!(len.values(), &[5, 3]);
    assert_eq!(out.column(2).data_type(), &DataType::Float64);
    assert!(ctx.mr.allocated_bytes() > 0);
}

#[test]
fn compiled_children_skip_constants() {
    let compiler = compiler(&LoweringMetrics::new());
    let expr = HostExpr::call(
        "substr",
        vec![
            HostExpr::field("s", DataType::Utf8),
            HostExpr::constant(LiteralValue::Int64(2)),
        ],
        DataType::Utf8,
    );
    let compiled = compiler.compile(&expr, &schema(), None).expect("compile");
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![0])),
        Arc::new(StringArray::from(vec!["abc"])),
    ];
    let out = compiled.eval(&columns, 1, &device(), true).expect("eval");
    let out = match out {
        ColumnOrView::Column(c) => c,
        ColumnOrView::View(_) => panic!("substr produces a new column"),
    };
    let out = out.as_any().downcast_ref::<StringArray>().expect("utf8");
    assert_eq!(out.value(0), "bc");
}
