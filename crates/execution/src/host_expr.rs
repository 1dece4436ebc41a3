//! Instantiated host expression objects.
//!
//! A stage turns the [`TypedExpr`] trees of its plan node into [`HostExpr`] trees before
//! evaluating anything. Accelerator compilation works on this instantiated form.

use std::fmt;
use std::sync::Arc;

use accelq_common::{AccelError, Result};
use accelq_planner::{LiteralValue, TypedExpr};
use arrow_schema::DataType;

/// Name reported by constant nodes.
pub const LITERAL_NAME: &str = "literal";

#[derive(Debug, Clone, PartialEq)]
pub enum HostExprKind {
    FieldReference { name: String },
    Constant(LiteralValue),
    Call { name: String },
}

/// Host expression node: a field reference, a constant or a named call with inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct HostExpr {
    kind: HostExprKind,
    data_type: DataType,
    inputs: Vec<Arc<HostExpr>>,
}

impl HostExpr {
    pub fn field(name: impl Into<String>, data_type: DataType) -> Arc<Self> {
        Arc::new(Self {
            kind: HostExprKind::FieldReference { name: name.into() },
            data_type,
            inputs: vec![],
        })
    }

    pub fn constant(value: LiteralValue) -> Arc<Self> {
        Arc::new(Self {
            data_type: value.data_type(),
            kind: HostExprKind::Constant(value),
            inputs: vec![],
        })
    }

    /// Constant whose declared type differs from the value's natural type.
    pub fn typed_constant(value: LiteralValue, data_type: DataType) -> Arc<Self> {
        Arc::new(Self {
            kind: HostExprKind::Constant(value),
            data_type,
            inputs: vec![],
        })
    }

    pub fn call(
        name: impl Into<String>,
        inputs: Vec<Arc<HostExpr>>,
        data_type: DataType,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind: HostExprKind::Call { name: name.into() },
            data_type,
            inputs,
        })
    }

    /// Instantiate a logical expression the way the host engine does before evaluation.
    pub fn instantiate(expr: &TypedExpr) -> Result<Arc<Self>> {
        match expr {
            TypedExpr::FieldAccess { name, data_type } => Ok(Self::field(name, data_type.clone())),
            TypedExpr::Dereference {
                input,
                field,
                data_type,
            } => match input.as_ref() {
                TypedExpr::Input { .. } => Ok(Self::field(field, data_type.clone())),
                other => Ok(Arc::new(Self {
                    kind: HostExprKind::FieldReference {
                        name: field.clone(),
                    },
                    data_type: data_type.clone(),
                    inputs: vec![Self::instantiate(other)?],
                })),
            },
            TypedExpr::Constant(v) => Ok(Self::constant(v.clone())),
            TypedExpr::Call {
                name,
                args,
                data_type,
            } => Ok(Self::call(
                name,
                args.iter().map(Self::instantiate).collect::<Result<Vec<_>>>()?,
                data_type.clone(),
            )),
            TypedExpr::Cast {
                input, data_type, ..
            } => {
                let name = expr.call_name().unwrap_or("cast");
                Ok(Self::call(
                    name,
                    vec![Self::instantiate(input)?],
                    data_type.clone(),
                ))
            }
            TypedExpr::Concat { args, data_type } => Ok(Self::call(
                "row_constructor",
                args.iter().map(Self::instantiate).collect::<Result<Vec<_>>>()?,
                data_type.clone(),
            )),
            TypedExpr::Input { .. } | TypedExpr::Lambda { .. } => Err(AccelError::Unsupported(
                format!("cannot instantiate {} as a host expression", expr.kind().name()),
            )),
        }
    }

    pub fn kind(&self) -> &HostExprKind {
        &self.kind
    }

    /// Call name, field name, or [`LITERAL_NAME`] for constants.
    pub fn name(&self) -> &str {
        match &self.kind {
            HostExprKind::FieldReference { name } | HostExprKind::Call { name } => name,
            HostExprKind::Constant(_) => LITERAL_NAME,
        }
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }

    pub fn inputs(&self) -> &[Arc<HostExpr>] {
        &self.inputs
    }

    pub fn is_field_reference(&self) -> bool {
        matches!(self.kind, HostExprKind::FieldReference { .. })
    }

    pub fn as_constant(&self) -> Option<&LiteralValue> {
        match &self.kind {
            HostExprKind::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }
}

impl fmt::Display for HostExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            HostExprKind::FieldReference { name } => f.write_str(name),
            HostExprKind::Constant(v) => write!(f, "{v}"),
            HostExprKind::Call { name } => {
                write!(f, "{name}(")?;
                for (i, input) in self.inputs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{input}")?;
                }
                f.write_str(")")
            }
        }
    }
}
