//! Priority-ordered registry of expression evaluation strategies.
//!
//! Entries are keyed by descending priority and then registration order, so selection is
//! deterministic. Lookups walk the skip list without taking a lock; writers serialize among
//! themselves only.

use std::cmp::Reverse;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use accelq_common::Result;
use accelq_execution::HostExpr;
use accelq_planner::TypedExpr;
use arrow_schema::SchemaRef;
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;

use crate::expression::{CompiledExpression, ExpressionCompiler, FunctionExpression};
use crate::functions::FunctionRegistry;

/// Name of the built-in strategy backed by the Function Registry.
pub const FUNCTION_EVALUATOR: &str = "function";
/// Priority of the built-in function strategy.
pub const FUNCTION_EVALUATOR_PRIORITY: i32 = 50;

/// Predicate over a logical expression, checked before any stage exists.
pub type CanEvaluate = Arc<dyn Fn(&TypedExpr) -> bool + Send + Sync>;
/// Predicate over an instantiated host expression.
pub type CanEvaluateCompiled = Arc<dyn Fn(&HostExpr) -> bool + Send + Sync>;
/// Builds the compiled node for an expression the strategy accepted.
pub type CreateCompiled = Arc<
    dyn Fn(&Arc<HostExpr>, &SchemaRef, &ExpressionCompiler) -> Result<Arc<dyn CompiledExpression>>
        + Send
        + Sync,
>;

/// One registered strategy.
#[derive(Clone)]
pub struct EvaluatorEntry {
    name: String,
    priority: i32,
    can_evaluate: CanEvaluate,
    can_evaluate_compiled: CanEvaluateCompiled,
    create: CreateCompiled,
}

impl fmt::Debug for EvaluatorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorEntry")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

impl EvaluatorEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn can_evaluate(&self, expr: &TypedExpr) -> bool {
        (self.can_evaluate)(expr)
    }

    pub fn can_evaluate_compiled(&self, expr: &HostExpr) -> bool {
        (self.can_evaluate_compiled)(expr)
    }

    pub fn create(
        &self,
        expr: &Arc<HostExpr>,
        schema: &SchemaRef,
        compiler: &ExpressionCompiler,
    ) -> Result<Arc<dyn CompiledExpression>> {
        (self.create)(expr, schema, compiler)
    }
}

#[derive(Default)]
pub struct EvaluatorRegistry {
    entries: SkipMap<(Reverse<i32>, u64), EvaluatorEntry>,
    writer: Mutex<()>,
    next_seq: AtomicU64,
    bootstrapped: OnceLock<()>,
}

impl fmt::Debug for EvaluatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatorRegistry")
            .field("entries", &self.names())
            .finish()
    }
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy.
    ///
    /// Returns `false` and keeps the existing entry when `name` is taken and `overwrite` is
    /// not set. An overwritten entry is ordered as if newly registered.
    pub fn register(
        &self,
        name: &str,
        priority: i32,
        can_evaluate: CanEvaluate,
        can_evaluate_compiled: CanEvaluateCompiled,
        create: CreateCompiled,
        overwrite: bool,
    ) -> bool {
        let _writer = self.writer.lock();
        let existing = self.key_of(name);
        if existing.is_some() && !overwrite {
            return false;
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            (Reverse(priority), seq),
            EvaluatorEntry {
                name: name.to_string(),
                priority,
                can_evaluate,
                can_evaluate_compiled,
                create,
            },
        );
        // The replacement is visible before the old entry goes away.
        if let Some(key) = existing {
            self.entries.remove(&key);
        }
        true
    }

    /// Returns `true` when an entry was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let _writer = self.writer.lock();
        match self.key_of(name) {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    fn key_of(&self, name: &str) -> Option<(Reverse<i32>, u64)> {
        self.entries
            .iter()
            .find(|e| e.value().name == name)
            .map(|e| *e.key())
    }

    /// Register the built-in function strategy once; later calls are no-ops.
    pub fn ensure_builtin_evaluators(&self, functions: &Arc<FunctionRegistry>) {
        self.bootstrapped.get_or_init(|| {
            let logical = Arc::clone(functions);
            let compiled = Arc::clone(functions);
            self.register(
                FUNCTION_EVALUATOR,
                FUNCTION_EVALUATOR_PRIORITY,
                Arc::new(move |expr: &TypedExpr| FunctionExpression::can_evaluate(expr, &logical)),
                Arc::new(move |expr: &HostExpr| {
                    FunctionExpression::can_evaluate_compiled(expr, &compiled)
                }),
                Arc::new(
                    |expr: &Arc<HostExpr>, schema: &SchemaRef, compiler: &ExpressionCompiler| {
                        FunctionExpression::create(expr, schema, compiler)
                    },
                ),
                false,
            );
        });
    }

    /// Current entries in selection order.
    pub fn snapshot(&self) -> Vec<EvaluatorEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.value().name.clone()).collect()
    }

    /// Highest-priority entry accepting `expr`, skipping the entry named `except`.
    pub fn best(&self, expr: &HostExpr, except: Option<&str>) -> Option<EvaluatorEntry> {
        self.entries
            .iter()
            .map(|e| e.value().clone())
            .filter(|e| except != Some(e.name.as_str()))
            .find(|e| e.can_evaluate_compiled(expr))
    }

    /// Whether any entry accepts the root of `expr`.
    pub fn any_can_evaluate(&self, expr: &TypedExpr) -> bool {
        self.entries.iter().any(|e| e.value().can_evaluate(expr))
    }

    /// Whether any entry accepts the root of the instantiated `expr`.
    pub fn any_can_evaluate_compiled(&self, expr: &HostExpr) -> bool {
        self.entries
            .iter()
            .any(|e| e.value().can_evaluate_compiled(expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelq_common::AccelError;

    fn always(_: &TypedExpr) -> bool {
        true
    }

    fn entry_named(
        registry: &EvaluatorRegistry,
        name: &'static str,
        priority: i32,
        accepts: bool,
        overwrite: bool,
    ) -> bool {
        registry.register(
            name,
            priority,
            Arc::new(always),
            Arc::new(move |_: &HostExpr| accepts),
            Arc::new(move |_: &Arc<HostExpr>, _: &SchemaRef, _: &ExpressionCompiler| {
                Err(AccelError::Unsupported(name.to_string()))
            }),
            overwrite,
        )
    }

    fn expr() -> Arc<HostExpr> {
        HostExpr::call("f", vec![], arrow_schema::DataType::Int32)
    }

    #[test]
    fn best_prefers_highest_matching_priority() {
        let r = EvaluatorRegistry::new();
        entry_named(&r, "low", 10, true, false);
        entry_named(&r, "high", 90, true, false);
        entry_named(&r, "highest_but_declines", 200, false, false);
        let best = r.best(&expr(), None).expect("match");
        assert_eq!(best.name(), "high");
        assert_eq!(best.priority(), 90);
        assert_eq!(r.names(), vec!["highest_but_declines", "high", "low"]);
    }

    #[test]
    fn except_skips_the_named_entry() {
        let r = EvaluatorRegistry::new();
        entry_named(&r, "low", 10, true, false);
        entry_named(&r, "high", 90, true, false);
        assert_eq!(r.best(&expr(), Some("high")).expect("match").name(), "low");
        assert!(r.best(&expr(), Some("low")).is_some());
    }

    #[test]
    fn duplicate_names_need_overwrite() {
        let r = EvaluatorRegistry::new();
        assert!(entry_named(&r, "a", 10, true, false));
        assert!(!entry_named(&r, "a", 99, true, false));
        assert_eq!(r.snapshot()[0].priority(), 10);
        assert!(entry_named(&r, "a", 99, true, true));
        assert_eq!(r.snapshot().len(), 1);
        assert_eq!(r.snapshot()[0].priority(), 99);
        assert!(r.unregister("a"));
        assert!(!r.unregister("a"));
    }

    #[test]
    fn lookups_proceed_while_a_writer_is_registering() {
        let r = EvaluatorRegistry::new();
        entry_named(&r, "low", 10, true, false);
        let _writer = r.writer.lock();
        assert_eq!(r.best(&expr(), None).expect("match").name(), "low");
        assert!(r.any_can_evaluate_compiled(&expr()));
    }

    #[test]
    fn overwrite_moves_entry_behind_equal_priorities() {
        let r = EvaluatorRegistry::new();
        entry_named(&r, "a", 10, true, false);
        entry_named(&r, "b", 10, true, false);
        assert_eq!(r.best(&expr(), None).expect("match").name(), "a");
        entry_named(&r, "a", 10, true, true);
        assert_eq!(r.names(), vec!["b", "a"]);
    }

    #[test]
    fn builtin_bootstrap_is_idempotent() {
        let r = EvaluatorRegistry::new();
        let functions = Arc::new(FunctionRegistry::new());
        r.ensure_builtin_evaluators(&functions);
        r.ensure_builtin_evaluators(&functions);
        assert_eq!(r.names(), vec![FUNCTION_EVALUATOR.to_string()]);
    }
}
