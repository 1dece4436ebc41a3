//! Fused evaluator strategy for comparison, arithmetic and boolean subtrees.
//!
//! The `ast` strategy claims a subtree only when every node of it is one of its operators,
//! a field reference or a non-null constant. The whole subtree then compiles into one
//! [`AstExpression`] that is evaluated without per-node Function dispatch.

use std::fmt;
use std::sync::Arc;

use accelq_common::{AccelError, Result};
use accelq_execution::{ColumnOrView, DeviceContext, DeviceScalar, HostExpr, HostExprKind};
use accelq_planner::{LiteralValue, TypedExpr};
use arrow::array::{Array, ArrayRef, BooleanArray, Datum, Scalar};
use arrow::compute::kernels::{boolean, cmp, numeric};
use arrow_schema::{DataType, SchemaRef};

use crate::evaluator::EvaluatorRegistry;
use crate::expression::{CompiledExpression, ExpressionCompiler, finalize_result};

/// Name of the fused strategy in the Evaluator Registry.
pub const AST_EVALUATOR: &str = "ast";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AstOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    And,
    Or,
    Not,
}

impl AstOp {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "eq" => AstOp::Eq,
            "neq" => AstOp::NotEq,
            "lt" => AstOp::Lt,
            "lte" => AstOp::LtEq,
            "gt" => AstOp::Gt,
            "gte" => AstOp::GtEq,
            "plus" => AstOp::Plus,
            "minus" => AstOp::Minus,
            "multiply" => AstOp::Multiply,
            "divide" => AstOp::Divide,
            "and" => AstOp::And,
            "or" => AstOp::Or,
            "not" => AstOp::Not,
            _ => return None,
        })
    }

    fn arity(self) -> usize {
        if self == AstOp::Not { 1 } else { 2 }
    }

    fn is_logical(self) -> bool {
        matches!(self, AstOp::And | AstOp::Or | AstOp::Not)
    }
}

/// Operator names accepted, with the configured function-name prefix.
#[derive(Debug, Clone)]
struct AstDialect {
    prefix: String,
}

impl AstDialect {
    fn op(&self, name: &str) -> Option<AstOp> {
        AstOp::from_name(name.strip_prefix(self.prefix.as_str())?)
    }

    /// Operand types must match; logical operators take booleans only.
    fn operands_fit(op: AstOp, types: &[DataType]) -> bool {
        if types.len() != op.arity() {
            return false;
        }
        if op.is_logical() {
            return types.iter().all(|t| *t == DataType::Boolean);
        }
        types.windows(2).all(|w| w[0] == w[1])
    }

    fn accepts_logical(&self, expr: &TypedExpr) -> bool {
        match expr {
            TypedExpr::FieldAccess { .. } => true,
            TypedExpr::Dereference { input, .. } => matches!(input.as_ref(), TypedExpr::Input { .. }),
            TypedExpr::Constant(v) => *v != LiteralValue::Null,
            TypedExpr::Call { name, args, .. } => {
                let Some(op) = self.op(name) else {
                    return false;
                };
                let types = args.iter().map(TypedExpr::data_type).collect::<Vec<_>>();
                Self::operands_fit(op, &types) && args.iter().all(|a| self.accepts_logical(a))
            }
            _ => false,
        }
    }

    fn accepts_compiled(&self, expr: &HostExpr) -> bool {
        match expr.kind() {
            HostExprKind::FieldReference { .. } => expr.inputs().is_empty(),
            HostExprKind::Constant(v) => *v != LiteralValue::Null,
            HostExprKind::Call { name } => {
                let Some(op) = self.op(name) else {
                    return false;
                };
                let types = expr
                    .inputs()
                    .iter()
                    .map(|i| i.data_type().clone())
                    .collect::<Vec<_>>();
                Self::operands_fit(op, &types)
                    && expr.inputs().iter().all(|i| self.accepts_compiled(i))
            }
        }
    }

    fn build(&self, expr: &HostExpr, schema: &SchemaRef) -> Result<AstNode> {
        match expr.kind() {
            HostExprKind::FieldReference { name } => {
                let index = schema.index_of(name).map_err(|_| {
                    AccelError::Planning(format!("unknown column in accelerator expression: {name}"))
                })?;
                Ok(AstNode::Column(index))
            }
            HostExprKind::Constant(v) => Ok(AstNode::Literal(DeviceScalar::from_literal(
                v,
                Some(expr.data_type()),
            )?)),
            HostExprKind::Call { name } => {
                let op = self
                    .op(name)
                    .ok_or_else(|| AccelError::Unsupported(format!("ast operator {name}")))?;
                let children = expr
                    .inputs()
                    .iter()
                    .map(|i| self.build(i, schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(AstNode::Op { op, children })
            }
        }
    }
}

#[derive(Debug)]
enum AstNode {
    Column(usize),
    Literal(DeviceScalar),
    Op { op: AstOp, children: Vec<AstNode> },
}

/// Intermediate result: a full column or a single value not yet broadcast.
enum Operand {
    Array(ArrayRef),
    Scalar(ArrayRef),
}

impl Operand {
    fn datum(&self) -> Box<dyn Datum> {
        match self {
            Operand::Array(a) => Box::new(Arc::clone(a)),
            Operand::Scalar(s) => Box::new(Scalar::new(Arc::clone(s))),
        }
    }

    fn into_array(self, num_rows: usize) -> Result<ArrayRef> {
        match self {
            Operand::Array(a) => Ok(a),
            Operand::Scalar(s) => broadcast(&s, num_rows),
        }
    }
}

fn broadcast(value: &ArrayRef, num_rows: usize) -> Result<ArrayRef> {
    let indices = arrow::array::UInt32Array::from(vec![0u32; num_rows]);
    arrow::compute::take(value.as_ref(), &indices, None)
        .map_err(|e| AccelError::Execution(format!("broadcast failed: {e}")))
}

fn as_boolean(array: &ArrayRef) -> Result<&BooleanArray> {
    array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .ok_or_else(|| AccelError::Execution(format!("expected boolean operand, got {}", array.data_type())))
}

/// One fused subtree compiled by the `ast` strategy.
#[derive(Debug)]
pub struct AstExpression {
    root: AstNode,
    data_type: DataType,
    rendering: String,
}

impl AstExpression {
    fn eval_node(&self, node: &AstNode, columns: &[ArrayRef], num_rows: usize) -> Result<Operand> {
        match node {
            AstNode::Column(index) => columns
                .get(*index)
                .cloned()
                .map(Operand::Array)
                .ok_or_else(|| AccelError::Execution(format!("column index {index} missing from input batch"))),
            AstNode::Literal(s) => Ok(Operand::Scalar(Arc::clone(s.value()))),
            AstNode::Op { op, children } => {
                let mut values = Vec::with_capacity(children.len());
                for child in children {
                    values.push(self.eval_node(child, columns, num_rows)?);
                }
                let all_scalar = values.iter().all(|v| matches!(v, Operand::Scalar(_)));
                let out = self.apply(*op, values, num_rows)?;
                // Scalar-only inputs stay a single value until the root.
                Ok(if all_scalar && out.len() == 1 {
                    Operand::Scalar(out)
                } else {
                    Operand::Array(out)
                })
            }
        }
    }

    fn apply(&self, op: AstOp, values: Vec<Operand>, num_rows: usize) -> Result<ArrayRef> {
        let err = |e: arrow::error::ArrowError| AccelError::Execution(format!("{}: {e}", self.rendering));
        if op.is_logical() {
            let mut arrays = Vec::with_capacity(values.len());
            for v in values {
                arrays.push(v.into_array(num_rows)?);
            }
            let out = match (op, arrays.as_slice()) {
                (AstOp::Not, [a]) => boolean::not(as_boolean(a)?),
                (AstOp::And, [l, r]) => boolean::and_kleene(as_boolean(l)?, as_boolean(r)?),
                (AstOp::Or, [l, r]) => boolean::or_kleene(as_boolean(l)?, as_boolean(r)?),
                _ => return Err(AccelError::Execution(format!("bad operands for {op:?}"))),
            };
            return out.map(|a| Arc::new(a) as ArrayRef).map_err(err);
        }
        let [l, r] = values.as_slice() else {
            return Err(AccelError::Execution(format!("bad operands for {op:?}")));
        };
        let (l, r) = (l.datum(), r.datum());
        let (l, r) = (l.as_ref(), r.as_ref());
        let cmp_result = |res: std::result::Result<BooleanArray, arrow::error::ArrowError>| {
            res.map(|a| Arc::new(a) as ArrayRef).map_err(err)
        };
        match op {
            AstOp::Eq => cmp_result(cmp::eq(l, r)),
            AstOp::NotEq => cmp_result(cmp::neq(l, r)),
            AstOp::Lt => cmp_result(cmp::lt(l, r)),
            AstOp::LtEq => cmp_result(cmp::lt_eq(l, r)),
            AstOp::Gt => cmp_result(cmp::gt(l, r)),
            AstOp::GtEq => cmp_result(cmp::gt_eq(l, r)),
            AstOp::Plus => numeric::add(l, r).map_err(err),
            AstOp::Minus => numeric::sub(l, r).map_err(err),
            AstOp::Multiply => numeric::mul(l, r).map_err(err),
            AstOp::Divide => numeric::div(l, r).map_err(err),
            AstOp::And | AstOp::Or | AstOp::Not => {
                Err(AccelError::Execution(format!("bad operands for {op:?}")))
            }
        }
    }
}

impl CompiledExpression for AstExpression {
    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn eval<'a>(
        &self,
        columns: &'a [ArrayRef],
        num_rows: usize,
        ctx: &DeviceContext,
        finalize: bool,
    ) -> Result<ColumnOrView<'a>> {
        let out = self.eval_node(&self.root, columns, num_rows)?.into_array(num_rows)?;
        ctx.mr.record_allocation(out.get_array_memory_size());
        let out = ColumnOrView::Column(out);
        if finalize {
            return finalize_result(out, &self.data_type, ctx);
        }
        Ok(out)
    }
}

impl fmt::Display for AstExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ast({})", self.rendering)
    }
}

/// Register the `ast` strategy. Operator names are matched after stripping `prefix`.
pub fn register_ast_evaluator(registry: &EvaluatorRegistry, priority: i32, prefix: &str) -> bool {
    let dialect = Arc::new(AstDialect {
        prefix: prefix.to_string(),
    });
    let logical = Arc::clone(&dialect);
    let compiled = Arc::clone(&dialect);
    registry.register(
        AST_EVALUATOR,
        priority,
        Arc::new(move |expr: &TypedExpr| logical.accepts_logical(expr)),
        Arc::new(move |expr: &HostExpr| compiled.accepts_compiled(expr)),
        Arc::new(
            move |expr: &Arc<HostExpr>, schema: &SchemaRef, _: &ExpressionCompiler| {
                let root = dialect.build(expr, schema)?;
                Ok(Arc::new(AstExpression {
                    root,
                    data_type: expr.data_type().clone(),
                    rendering: expr.to_string(),
                }) as Arc<dyn CompiledExpression>)
            },
        ),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelq_common::LoweringMetrics;
    use accelq_execution::{DeviceStream, create_memory_resource};
    use arrow::array::Int64Array;
    use arrow_schema::{Field, Schema};

    use crate::functions::{FunctionRegistry, register_builtin_functions};

    fn compiler(prefix: &str) -> ExpressionCompiler {
        let functions = Arc::new(FunctionRegistry::new());
        register_builtin_functions(&functions, prefix);
        let evaluators = Arc::new(crate::evaluator::EvaluatorRegistry::new());
        register_ast_evaluator(&evaluators, 100, prefix);
        ExpressionCompiler::new(functions, evaluators).with_metrics(LoweringMetrics::new())
    }

    fn x() -> Arc<HostExpr> {
        HostExpr::field("x", DataType::Int64)
    }

    fn int(v: i64) -> Arc<HostExpr> {
        HostExpr::constant(LiteralValue::Int64(v))
    }

    fn schema() -> SchemaRef {
        Arc::new(Schema::new(vec![Field::new("x", DataType::Int64, true)]))
    }

    fn ctx() -> DeviceContext {
        DeviceContext::new(
            DeviceStream::default_stream(),
            create_memory_resource("async", 50).expect("mr"),
        )
    }

    #[test]
    fn fused_predicate_evaluates() {
        let c = compiler("");
        // (x + 1 > 3) and not (x == 5)
        let expr = HostExpr::call(
            "and",
            vec![
                HostExpr::call(
                    "gt",
                    vec![HostExpr::call("plus", vec![x(), int(1)], DataType::Int64), int(3)],
                    DataType::Boolean,
                ),
                HostExpr::call(
                    "not",
                    vec![HostExpr::call("eq", vec![x(), int(5)], DataType::Boolean)],
                    DataType::Boolean,
                ),
            ],
            DataType::Boolean,
        );
        let compiled = c.compile(&expr, &schema(), None).expect("compile");
        assert!(format!("{compiled:?}").contains("AstExpression"));
        let columns: Vec<ArrayRef> = vec![Arc::new(Int64Array::from(vec![1, 3, 5, 6]))];
        let out = compiled.eval(&columns, 4, &ctx(), true).expect("eval");
        let out = out.as_array().as_any().downcast_ref::<BooleanArray>().expect("bool");
        assert_eq!(
            out.iter().collect::<Vec<_>>(),
            vec![Some(false), Some(true), Some(false), Some(true)]
        );
    }

    #[test]
    fn mixed_operand_types_are_left_to_functions() {
        let c = compiler("");
        let mixed = HostExpr::call(
            "gt",
            vec![x(), HostExpr::constant(LiteralValue::Int32(1))],
            DataType::Boolean,
        );
        let best = c.evaluators().best(&mixed, None).expect("function strategy");
        assert_eq!(best.name(), crate::evaluator::FUNCTION_EVALUATOR);
    }

    #[test]
    fn subtree_with_foreign_call_is_not_claimed() {
        let c = compiler("");
        let expr = HostExpr::call(
            "gt",
            vec![HostExpr::call("length", vec![HostExpr::field("s", DataType::Utf8)], DataType::Int32), HostExpr::constant(LiteralValue::Int32(2))],
            DataType::Boolean,
        );
        let best = c.evaluators().best(&expr, None).expect("match");
        assert_ne!(best.name(), AST_EVALUATOR);
    }

    #[test]
    fn prefix_is_stripped_before_matching() {
        let c = compiler("presto.default.");
        let expr = HostExpr::call("presto.default.lt", vec![x(), int(2)], DataType::Boolean);
        assert_eq!(c.evaluators().best(&expr, None).expect("match").name(), AST_EVALUATOR);
        let bare = HostExpr::call("lt", vec![x(), int(2)], DataType::Boolean);
        assert!(c.evaluators().best(&bare, None).is_none());
    }

    #[test]
    fn logical_check_matches_compiled_check() {
        let c = compiler("");
        let logical = TypedExpr::call(
            "lte",
            vec![
                TypedExpr::col("x", DataType::Int64),
                TypedExpr::lit(LiteralValue::Int64(9)),
            ],
            DataType::Boolean,
        );
        let host = HostExpr::instantiate(&logical).expect("instantiate");
        let ast = c
            .evaluators()
            .snapshot()
            .iter()
            .find(|e| e.name() == AST_EVALUATOR)
            .cloned()
            .expect("ast entry");
        assert!(ast.can_evaluate(&logical));
        assert!(ast.can_evaluate_compiled(&host));
    }
}
