//! Typed identifiers shared by the host pipeline and the lowering pass.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable stage (operator) identifier within a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId(
    /// Raw numeric id value.
    pub u32,
);

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the logical plan node a stage was compiled from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanNodeId(
    /// Raw id string, unique within one query plan.
    pub String,
);

impl PlanNodeId {
    /// Build an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlanNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlanNodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
