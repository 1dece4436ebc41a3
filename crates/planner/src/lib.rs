//! Logical plan descriptors consumed by the plan-lowering layer.
//!
//! Stages in a host pipeline each point back at one [`PlanNode`]; classification reads
//! kind-specific payloads (join type, projections, partitioning scheme) through the
//! narrowing accessors on [`PlanNode`]. Expressions are [`TypedExpr`] trees.

pub mod expr;
pub mod plan_node;

pub use expr::*;
pub use plan_node::*;
