//! Name-keyed registry of accelerator Function factories.
//!
//! A Function is built once per compiled expression occurrence and caches every value that
//! can be derived from the expression's constant children. Per-batch evaluation only sees
//! the results of the non-constant children, in argument order.

use std::fmt;
use std::sync::Arc;

use accelq_common::Result;
use accelq_execution::{ColumnOrView, DeviceContext, HostExpr};
use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;

pub mod builtin;

pub use builtin::register_builtin_functions;

/// Accelerator implementation of one scalar or boolean function.
pub trait Function: Send + Sync + fmt::Debug {
    /// Evaluate over the results of the non-constant children.
    ///
    /// `num_rows` is the row count of the batch being evaluated; functions whose inputs
    /// are all cached scalars use it to size their output.
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        num_rows: usize,
        ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>>;
}

/// Builds a Function from the name it was looked up under and the call node.
pub type FunctionFactory =
    Arc<dyn Fn(&str, &Arc<HostExpr>) -> Result<Arc<dyn Function>> + Send + Sync>;

/// Registry mapping call names to Function factories. Several names may share a factory.
///
/// Lookups do not lock; registrations serialize on `writer`.
#[derive(Default)]
pub struct FunctionRegistry {
    functions: SkipMap<String, FunctionFactory>,
    writer: Mutex<()>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `name`.
    ///
    /// Returns `false` and keeps the existing factory when `name` is taken and `overwrite`
    /// is not set.
    pub fn register(&self, name: &str, factory: FunctionFactory, overwrite: bool) -> bool {
        let _writer = self.writer.lock();
        if !overwrite && self.functions.contains_key(name) {
            return false;
        }
        self.functions.insert(name.to_string(), factory);
        true
    }

    /// Register one factory under every alias. Returns `true` when all aliases registered.
    pub fn register_aliases<S: AsRef<str>>(
        &self,
        names: &[S],
        factory: FunctionFactory,
        overwrite: bool,
    ) -> bool {
        names.iter().fold(true, |all, name| {
            self.register(name.as_ref(), Arc::clone(&factory), overwrite) && all
        })
    }

    /// Returns `true` when an existing factory was removed.
    pub fn deregister(&self, name: &str) -> bool {
        let _writer = self.writer.lock();
        self.functions.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<FunctionFactory> {
        self.functions.get(name).map(|e| Arc::clone(e.value()))
    }

    /// Build the Function registered for `expr`'s call name.
    ///
    /// `Ok(None)` means no factory is registered; construction errors propagate.
    pub fn create(&self, expr: &Arc<HostExpr>) -> Result<Option<Arc<dyn Function>>> {
        let name = expr.name();
        match self.get(name) {
            Some(factory) => factory(name, expr).map(Some),
            None => Ok(None),
        }
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.functions.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accelq_common::AccelError;
    use arrow_schema::DataType;

    #[derive(Debug)]
    struct Tagged(&'static str);

    impl Function for Tagged {
        fn eval<'a>(
            &self,
            mut args: Vec<ColumnOrView<'a>>,
            _num_rows: usize,
            _ctx: &DeviceContext,
        ) -> Result<ColumnOrView<'a>> {
            args.pop()
                .ok_or_else(|| AccelError::Execution(self.0.to_string()))
        }
    }

    fn factory(tag: &'static str) -> FunctionFactory {
        Arc::new(move |_: &str, _: &Arc<HostExpr>| {
            Ok(Arc::new(Tagged(tag)) as Arc<dyn Function>)
        })
    }

    fn tag_of(registry: &FunctionRegistry, name: &str) -> String {
        let expr = HostExpr::call(name, vec![], DataType::Int32);
        let f = registry.create(&expr).expect("create").expect("registered");
        format!("{f:?}")
    }

    #[test]
    fn second_registration_needs_overwrite() {
        let r = FunctionRegistry::new();
        assert!(r.register("f", factory("first"), false));
        assert!(!r.register("f", factory("second"), false));
        assert_eq!(tag_of(&r, "f"), "Tagged(\"first\")");
        assert!(r.register("f", factory("third"), true));
        assert_eq!(tag_of(&r, "f"), "Tagged(\"third\")");
    }

    #[test]
    fn aliases_share_one_factory() {
        let r = FunctionRegistry::new();
        assert!(r.register_aliases(&["substr", "substring"], factory("s"), false));
        assert_eq!(r.names(), vec!["substr".to_string(), "substring".to_string()]);
        assert!(!r.register_aliases(&["substr", "mid"], factory("t"), false));
        assert!(r.contains("mid"));
        assert_eq!(tag_of(&r, "substr"), "Tagged(\"s\")");
    }

    #[test]
    fn lookups_do_not_wait_for_writers() {
        let r = FunctionRegistry::new();
        r.register("f", factory("f"), false);
        let _writer = r.writer.lock();
        assert!(r.contains("f"));
        assert_eq!(tag_of(&r, "f"), "Tagged(\"f\")");
    }

    #[test]
    fn unknown_name_creates_nothing() {
        let r = FunctionRegistry::new();
        let expr = HostExpr::call("nope", vec![], DataType::Int32);
        assert!(r.create(&expr).expect("create").is_none());
        assert!(!r.deregister("nope"));
    }
}
