//! Accelerator lowering of host execution pipelines.
//!
//! Architecture role:
//! - decides per host stage whether an accelerator implementation can take its place
//! - splices accelerator stages and host/accelerator boundary stages into the pipeline
//! - compiles stage expressions into accelerator-evaluable trees
//!
//! Key modules:
//! - [`functions`]: Function Registry and built-in Functions
//! - [`evaluator`]: priority-ordered evaluator strategies
//! - [`expression`]: expression compiler and compiled nodes
//! - [`ast`]: fused comparison/arithmetic strategy
//! - [`classifier`]: stage support predicates
//! - [`rewriter`]: the rewrite pass
//! - [`lifecycle`]: activation/deactivation

pub mod ast;
pub mod classifier;
pub mod evaluator;
pub mod expression;
pub mod functions;
pub mod lifecycle;
pub mod rewriter;
pub mod stages;

pub use ast::{AST_EVALUATOR, AstExpression, register_ast_evaluator};
pub use classifier::{StageClassifier, StageSupport};
pub use evaluator::{EvaluatorEntry, EvaluatorRegistry, FUNCTION_EVALUATOR};
pub use expression::{CompiledExpression, ExpressionCompiler, FunctionExpression};
pub use functions::{Function, FunctionFactory, FunctionRegistry, register_builtin_functions};
pub use lifecycle::{
    ADAPTER_LABEL, Accelerator, AcceleratorContext, AcceleratorPipelineAdapter, activate,
    active_context, deactivate, is_active,
};
pub use rewriter::PlanRewriter;
pub use stages::{AcceleratedFilterProject, AcceleratedStage, BoundaryDirection, BoundaryStage};
