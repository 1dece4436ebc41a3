use thiserror::Error;

/// Error taxonomy shared by the plan-lowering crates.
///
/// Classification guidance:
/// - [`AccelError::InvalidConfig`]: configuration map values that cannot be parsed
/// - [`AccelError::Planning`]: host plan/pipeline contract violations and fatal lowering
///   policy violations
/// - [`AccelError::Unsupported`]: valid expressions or stages the accelerator cannot lower
/// - [`AccelError::MalformedExpression`]: expressions that break a Function's construction
///   contract
/// - [`AccelError::Execution`]: accelerator kernel failures while evaluating a batch
#[derive(Debug, Error)]
pub enum AccelError {
    /// Invalid or inconsistent configuration.
    ///
    /// Examples:
    /// - `accelerator.memory_percent=abc`
    /// - unknown memory resource mode
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Host plan contract violations and policy failures.
    ///
    /// Examples:
    /// - a stage whose plan-node id resolves to no plan node
    /// - a replaceable stage left on the host while CPU fallback is forbidden
    #[error("planning error: {0}")]
    Planning(String),

    /// Capability gap: the shape is valid but has no accelerator implementation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// An expression violates the construction contract of an accelerator Function.
    ///
    /// Examples:
    /// - wrong arity
    /// - a non-constant argument where a constant is required
    /// - a cast between types the accelerator cannot convert
    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    /// Per-batch evaluation failures.
    #[error("execution error: {0}")]
    Execution(String),
}

/// Standard result alias.
pub type Result<T> = std::result::Result<T, AccelError>;
