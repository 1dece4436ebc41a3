mod support;

use accelq_common::{AccelError, LoweringMetrics};
use accelq_execution::StageKind;
use accelq_lowering::PlanRewriter;
use support::*;

const EXPRESSION_FALLBACK: &str = "falling back to host execution";
const POLICY_FALLBACK: &str = "accelerator replacement failed";

fn unknown_call_pipeline() -> accelq_execution::Pipeline {
    PipelineBuilder::new()
        .source(HOST_CONNECTOR)
        .filter(gt(unknown_f(), int(5)))
        .aggregation()
        .build()
}

#[test]
fn unknown_call_keeps_filter_on_host_with_one_diagnostic() {
    let metrics = LoweringMetrics::new();
    let mut p = unknown_call_pipeline();
    let filter_stage = p.stages()[1].clone();

    let (result, logs) = capture_logs(|| rewriter(true, &metrics).rewrite(&mut p));
    result.expect("fallback allowed");

    assert_eq!(logs.matches(EXPRESSION_FALLBACK).count(), 1, "{logs}");
    let line = logs
        .lines()
        .find(|l| l.contains(EXPRESSION_FALLBACK))
        .expect("fallback line");
    assert!(line.contains("f(x)"), "{line}");
    assert!(line.contains("WARN"), "{line}");
    assert!(logs.contains(POLICY_FALLBACK), "{logs}");
    assert_eq!(metrics.fallback_count("expression"), 1);
    // The host-only data source and the filter both stay behind.
    assert_eq!(metrics.fallback_count("policy"), 2);

    // The filter stage is the same host stage; the aggregation moves to the accelerator.
    assert!(std::sync::Arc::ptr_eq(&p.stages()[1], &filter_stage));
    assert_eq!(
        kinds(&p),
        vec![
            StageKind::DataSource,
            StageKind::FilterProject,
            StageKind::HostToAccelerator,
            StageKind::Accelerated,
        ]
    );
}

#[test]
fn unknown_call_is_fatal_without_cpu_fallback() {
    let metrics = LoweringMetrics::new();
    let mut p = unknown_call_pipeline();
    let err = rewriter(false, &metrics).rewrite(&mut p).unwrap_err();
    assert!(matches!(err, AccelError::Planning(_)));
    assert!(err.to_string().contains("CPU fallback is disabled"), "{err}");
}

#[test]
fn fallback_diagnostic_can_be_silenced() {
    let metrics = LoweringMetrics::new();
    let rewriter = PlanRewriter::new(compiler(&metrics).with_log_fallback(false), connectors())
        .with_metrics(metrics.clone());
    let mut p = unknown_call_pipeline();
    let (result, logs) = capture_logs(|| rewriter.rewrite(&mut p));
    result.expect("rewrite");
    assert!(!logs.contains(EXPRESSION_FALLBACK), "{logs}");
    // Still counted.
    assert_eq!(metrics.fallback_count("expression"), 1);
}

#[test]
fn kinds_without_accelerator_counterpart_trip_the_check() {
    let metrics = LoweringMetrics::new();
    let mut p = PipelineBuilder::new().source(ACCEL_CONNECTOR).top_n().build();
    let (result, logs) = capture_logs(|| rewriter(true, &metrics).rewrite(&mut p));
    result.expect("fallback allowed");
    assert!(logs.contains(POLICY_FALLBACK), "{logs}");
    assert_eq!(
        kinds(&p),
        vec![StageKind::DataSource, StageKind::AcceleratorToHost, StageKind::TopN]
    );

    let mut p = PipelineBuilder::new().source(ACCEL_CONNECTOR).top_n().build();
    assert!(rewriter(false, &metrics).rewrite(&mut p).is_err());
}

#[test]
fn host_only_stages_violate_the_policy() {
    let host_only = || PipelineBuilder::new().source(HOST_CONNECTOR).other().sink().build();

    let metrics = LoweringMetrics::new();
    let mut p = host_only();
    let err = rewriter(false, &metrics).rewrite(&mut p).unwrap_err();
    assert!(matches!(err, AccelError::Planning(_)));
    assert!(err.to_string().contains("DataSource"), "{err}");

    let mut p = host_only();
    let (result, logs) = capture_logs(|| rewriter(true, &metrics).rewrite(&mut p));
    assert!(!result.expect("fallback allowed"));
    assert_eq!(logs.matches(POLICY_FALLBACK).count(), 2, "{logs}");
    // The sink is retained on purpose and passes the check.
    assert_eq!(metrics.fallback_count("policy"), 2);
    assert_eq!(
        kinds(&p),
        vec![StageKind::DataSource, StageKind::Other, StageKind::CallbackSink]
    );

    let mut p = PipelineBuilder::new().source(ACCEL_CONNECTOR).sink().build();
    assert!(rewriter(false, &metrics).rewrite(&mut p).expect("rewrite"));
}

#[test]
fn fallback_checks_walk_every_argument() {
    let metrics = LoweringMetrics::new();
    let compiler = compiler(&metrics);
    let supported = compiler.can_evaluate_all(&[x(), gt(x(), int(1))]);
    assert!(supported);
    assert!(!compiler.can_evaluate(&gt(unknown_f(), int(5))));
    assert_eq!(metrics.fallback_count("expression"), 1);
}
