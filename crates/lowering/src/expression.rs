//! Expression compiler: host expression trees into accelerator-evaluable node trees.
//!
//! Input contract:
//! - field references resolve by name against the stage's input row schema;
//! - calls resolve through the Evaluator Registry, then the Function Registry.
//!
//! Output contract:
//! - evaluating a compiled tree over a batch's columns yields one column (or a view of an
//!   input column) aligned with the batch row count.

use std::fmt;
use std::sync::Arc;

use accelq_common::{AccelError, LoweringMetrics, Result, global_metrics};
use accelq_execution::{ColumnOrView, DeviceContext, DeviceScalar, HostExpr, HostExprKind};
use accelq_planner::TypedExpr;
use arrow::array::{Array, ArrayRef};
use arrow::compute::cast;
use arrow_schema::{DataType, SchemaRef};
use tracing::warn;

use crate::evaluator::EvaluatorRegistry;
use crate::functions::{Function, FunctionRegistry};

/// Accelerator-evaluable form of one host expression.
pub trait CompiledExpression: Send + Sync + fmt::Debug {
    /// Statically expected result type.
    fn data_type(&self) -> &DataType;

    /// Evaluate over the columns of one input batch.
    ///
    /// Children are evaluated depth-first, left to right. With `finalize` set the result
    /// is cast to [`CompiledExpression::data_type`] when the produced type differs.
    fn eval<'a>(
        &self,
        columns: &'a [ArrayRef],
        num_rows: usize,
        ctx: &DeviceContext,
        finalize: bool,
    ) -> Result<ColumnOrView<'a>>;
}

/// Cast `result` to `expected` when its type differs.
pub fn finalize_result<'a>(
    result: ColumnOrView<'a>,
    expected: &DataType,
    ctx: &DeviceContext,
) -> Result<ColumnOrView<'a>> {
    if result.data_type() == expected {
        return Ok(result);
    }
    let out = cast(result.as_array(), expected)
        .map_err(|e| AccelError::Execution(format!("finalize cast to {expected} failed: {e}")))?;
    ctx.mr.record_allocation(out.get_array_memory_size());
    Ok(ColumnOrView::Column(out))
}

/// Schema-indexed lookup of an input column.
#[derive(Debug)]
pub struct FieldNode {
    name: String,
    index: usize,
    data_type: DataType,
}

impl FieldNode {
    pub fn resolve(expr: &HostExpr, schema: &SchemaRef) -> Result<Self> {
        if !expr.inputs().is_empty() {
            return Err(AccelError::Unsupported(format!(
                "nested field reference {expr}"
            )));
        }
        let name = expr.name();
        let index = schema.index_of(name).map_err(|_| {
            AccelError::Planning(format!("unknown column in accelerator expression: {name}"))
        })?;
        Ok(Self {
            name: name.to_string(),
            index,
            data_type: expr.data_type().clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl CompiledExpression for FieldNode {
    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn eval<'a>(
        &self,
        columns: &'a [ArrayRef],
        _num_rows: usize,
        ctx: &DeviceContext,
        finalize: bool,
    ) -> Result<ColumnOrView<'a>> {
        let column = columns.get(self.index).ok_or_else(|| {
            AccelError::Execution(format!(
                "column {} (index {}) missing from input batch",
                self.name, self.index
            ))
        })?;
        let view = ColumnOrView::View(column);
        if finalize {
            return finalize_result(view, &self.data_type, ctx);
        }
        Ok(view)
    }
}

/// Constant materialized once and broadcast per batch.
#[derive(Debug)]
pub struct ConstantNode {
    scalar: DeviceScalar,
    data_type: DataType,
}

impl ConstantNode {
    pub fn new(expr: &HostExpr) -> Result<Self> {
        let value = expr.as_constant().ok_or_else(|| {
            AccelError::MalformedExpression(format!("{expr} is not a constant"))
        })?;
        Ok(Self {
            scalar: DeviceScalar::from_literal(value, Some(expr.data_type()))?,
            data_type: expr.data_type().clone(),
        })
    }
}

impl CompiledExpression for ConstantNode {
    fn data_type(&self) -> &DataType {
        &self.data_type
    }

    fn eval<'a>(
        &self,
        _columns: &'a [ArrayRef],
        num_rows: usize,
        ctx: &DeviceContext,
        _finalize: bool,
    ) -> Result<ColumnOrView<'a>> {
        let out = self.scalar.broadcast(num_rows)?;
        ctx.mr.record_allocation(out.get_array_memory_size());
        Ok(ColumnOrView::Column(out))
    }
}

/// Call node backed by a Function from the Function Registry.
#[derive(Debug)]
pub struct FunctionExpression {
    expr: Arc<HostExpr>,
    function: Arc<dyn Function>,
    children: Vec<Arc<dyn CompiledExpression>>,
}

impl FunctionExpression {
    /// Build the call node for `expr`, compiling every non-constant input.
    pub fn create(
        expr: &Arc<HostExpr>,
        schema: &SchemaRef,
        compiler: &ExpressionCompiler,
    ) -> Result<Arc<dyn CompiledExpression>> {
        match expr.kind() {
            HostExprKind::FieldReference { .. } => {
                return Ok(Arc::new(FieldNode::resolve(expr, schema)?));
            }
            HostExprKind::Constant(_) => return Ok(Arc::new(ConstantNode::new(expr)?)),
            HostExprKind::Call { .. } => {}
        }
        let function = compiler.functions().create(expr)?.ok_or_else(|| {
            AccelError::Unsupported(format!(
                "no accelerator function registered for call {}",
                expr.name()
            ))
        })?;
        // Constant inputs are cached by the Function itself.
        let children = expr
            .inputs()
            .iter()
            .filter(|input| !input.is_constant())
            .map(|input| compiler.compile(input, schema, None))
            .collect::<Result<Vec<_>>>()?;
        Ok(Arc::new(Self {
            expr: Arc::clone(expr),
            function,
            children,
        }))
    }

    /// Root check over a logical expression.
    pub fn can_evaluate(expr: &TypedExpr, functions: &FunctionRegistry) -> bool {
        match expr {
            TypedExpr::FieldAccess { .. } | TypedExpr::Input { .. } | TypedExpr::Constant(_) => {
                true
            }
            // Only a dereference of the row input instantiates to a plain field reference.
            TypedExpr::Dereference { input, .. } => matches!(input.as_ref(), TypedExpr::Input { .. }),
            TypedExpr::Call { .. } | TypedExpr::Cast { .. } => expr
                .call_name()
                .is_some_and(|name| functions.contains(name)),
            TypedExpr::Concat { .. } | TypedExpr::Lambda { .. } => false,
        }
    }

    /// Root check over an instantiated host expression.
    pub fn can_evaluate_compiled(expr: &HostExpr, functions: &FunctionRegistry) -> bool {
        match expr.kind() {
            HostExprKind::FieldReference { .. } => expr.inputs().is_empty(),
            HostExprKind::Constant(_) => true,
            HostExprKind::Call { name } => functions.contains(name),
        }
    }
}

impl CompiledExpression for FunctionExpression {
    fn data_type(&self) -> &DataType {
        self.expr.data_type()
    }

    fn eval<'a>(
        &self,
        columns: &'a [ArrayRef],
        num_rows: usize,
        ctx: &DeviceContext,
        finalize: bool,
    ) -> Result<ColumnOrView<'a>> {
        let mut inputs = Vec::with_capacity(self.children.len());
        for child in &self.children {
            inputs.push(child.eval(columns, num_rows, ctx, false)?);
        }
        let result = self.function.eval(inputs, num_rows, ctx)?;
        if let ColumnOrView::Column(c) = &result {
            ctx.mr.record_allocation(c.get_array_memory_size());
        }
        if finalize {
            return finalize_result(result, self.expr.data_type(), ctx);
        }
        Ok(result)
    }
}

/// Compiles host expressions against the registries of one accelerator context.
#[derive(Debug, Clone)]
pub struct ExpressionCompiler {
    functions: Arc<FunctionRegistry>,
    evaluators: Arc<EvaluatorRegistry>,
    log_fallback: bool,
    metrics: LoweringMetrics,
}

impl ExpressionCompiler {
    /// Create a compiler; registers the built-in function strategy on first use.
    pub fn new(functions: Arc<FunctionRegistry>, evaluators: Arc<EvaluatorRegistry>) -> Self {
        evaluators.ensure_builtin_evaluators(&functions);
        Self {
            functions,
            evaluators,
            log_fallback: true,
            metrics: global_metrics().clone(),
        }
    }

    pub fn with_log_fallback(mut self, log_fallback: bool) -> Self {
        self.log_fallback = log_fallback;
        self
    }

    pub fn with_metrics(mut self, metrics: LoweringMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn functions(&self) -> &Arc<FunctionRegistry> {
        &self.functions
    }

    pub fn evaluators(&self) -> &Arc<EvaluatorRegistry> {
        &self.evaluators
    }

    /// Whether every node of the logical `expr` can be lowered.
    ///
    /// Stops at the first unsupported node and reports it as a fallback.
    pub fn can_evaluate(&self, expr: &TypedExpr) -> bool {
        if !self.evaluators.any_can_evaluate(expr) {
            self.fallback(expr);
            return false;
        }
        expr.inputs().into_iter().all(|input| self.can_evaluate(input))
    }

    pub fn can_evaluate_all<'e>(&self, exprs: impl IntoIterator<Item = &'e TypedExpr>) -> bool {
        exprs.into_iter().all(|e| self.can_evaluate(e))
    }

    /// Whether every node of the instantiated `expr` can be lowered.
    ///
    /// Same walk and reporting as [`ExpressionCompiler::can_evaluate`].
    pub fn can_evaluate_compiled(&self, expr: &HostExpr) -> bool {
        if !self.evaluators.any_can_evaluate_compiled(expr) {
            self.fallback(expr);
            return false;
        }
        expr.inputs()
            .iter()
            .all(|input| self.can_evaluate_compiled(input))
    }

    /// Compile `expr` against `schema`.
    ///
    /// Field references become schema-indexed lookups without consulting any registry.
    /// Otherwise the highest-priority strategy accepting `expr` (other than `except`)
    /// builds the node; with no match the Function Registry is used directly.
    pub fn compile(
        &self,
        expr: &Arc<HostExpr>,
        schema: &SchemaRef,
        except: Option<&str>,
    ) -> Result<Arc<dyn CompiledExpression>> {
        if expr.is_field_reference() {
            return Ok(Arc::new(FieldNode::resolve(expr, schema)?));
        }
        match self.evaluators.best(expr, except) {
            Some(entry) => entry.create(expr, schema, self),
            None => FunctionExpression::create(expr, schema, self),
        }
    }

    /// Instantiate a logical expression and compile it.
    pub fn compile_typed(
        &self,
        expr: &TypedExpr,
        schema: &SchemaRef,
    ) -> Result<Arc<dyn CompiledExpression>> {
        let host = HostExpr::instantiate(expr)?;
        self.compile(&host, schema, None)
    }

    fn fallback(&self, node: &dyn fmt::Display) {
        self.metrics.record_fallback("expression");
        if self.log_fallback {
            warn!(
                expression = %node,
                operator = "ExpressionCompiler",
                "falling back to host execution"
            );
        }
    }
}
