use std::fmt;

use arrow_schema::DataType;
use serde::{Deserialize, Serialize};

/// Constant values carried by logical expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    /// Days since the unix epoch.
    Date32(i32),
    Null,
}

impl LiteralValue {
    pub fn data_type(&self) -> DataType {
        match self {
            LiteralValue::Boolean(_) => DataType::Boolean,
            LiteralValue::Int32(_) => DataType::Int32,
            LiteralValue::Int64(_) => DataType::Int64,
            LiteralValue::Float64(_) => DataType::Float64,
            LiteralValue::Utf8(_) => DataType::Utf8,
            LiteralValue::Date32(_) => DataType::Date32,
            LiteralValue::Null => DataType::Null,
        }
    }

    /// Integral view of the value, used by functions that take constant sizes or offsets.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            LiteralValue::Int32(v) | LiteralValue::Date32(v) => Some(i64::from(*v)),
            LiteralValue::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for LiteralValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LiteralValue::Boolean(v) => write!(f, "{v}"),
            LiteralValue::Int32(v) | LiteralValue::Date32(v) => write!(f, "{v}"),
            LiteralValue::Int64(v) => write!(f, "{v}"),
            LiteralValue::Float64(v) => write!(f, "{v}"),
            LiteralValue::Utf8(v) => write!(f, "'{v}'"),
            LiteralValue::Null => f.write_str("null"),
        }
    }
}

/// Discriminant of [`TypedExpr`], used by capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExprKind {
    FieldAccess,
    Dereference,
    Input,
    Constant,
    Call,
    Cast,
    Concat,
    Lambda,
}

impl ExprKind {
    pub fn name(self) -> &'static str {
        match self {
            ExprKind::FieldAccess => "FIELD_ACCESS",
            ExprKind::Dereference => "DEREFERENCE",
            ExprKind::Input => "INPUT",
            ExprKind::Constant => "CONSTANT",
            ExprKind::Call => "CALL",
            ExprKind::Cast => "CAST",
            ExprKind::Concat => "CONCAT",
            ExprKind::Lambda => "LAMBDA",
        }
    }
}

/// Immutable, typed logical expression attached to plan nodes.
///
/// This is the form the classifier inspects before any stage exists; stages later
/// instantiate it into host expression objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypedExpr {
    /// Named column of the input row.
    FieldAccess { name: String, data_type: DataType },
    /// Named child of a struct-typed input.
    Dereference {
        input: Box<TypedExpr>,
        field: String,
        data_type: DataType,
    },
    /// The whole input row.
    Input { data_type: DataType },
    Constant(LiteralValue),
    Call {
        name: String,
        args: Vec<TypedExpr>,
        data_type: DataType,
    },
    Cast {
        input: Box<TypedExpr>,
        data_type: DataType,
        /// `try_cast` semantics: failures produce null instead of an error.
        is_try: bool,
    },
    Concat { args: Vec<TypedExpr>, data_type: DataType },
    Lambda {
        params: Vec<String>,
        body: Box<TypedExpr>,
        data_type: DataType,
    },
}

impl TypedExpr {
    pub fn col(name: impl Into<String>, data_type: DataType) -> Self {
        TypedExpr::FieldAccess {
            name: name.into(),
            data_type,
        }
    }

    pub fn lit(value: LiteralValue) -> Self {
        TypedExpr::Constant(value)
    }

    pub fn call(name: impl Into<String>, args: Vec<TypedExpr>, data_type: DataType) -> Self {
        TypedExpr::Call {
            name: name.into(),
            args,
            data_type,
        }
    }

    pub fn cast(input: TypedExpr, data_type: DataType) -> Self {
        TypedExpr::Cast {
            input: Box::new(input),
            data_type,
            is_try: false,
        }
    }

    pub fn kind(&self) -> ExprKind {
        match self {
            TypedExpr::FieldAccess { .. } => ExprKind::FieldAccess,
            TypedExpr::Dereference { .. } => ExprKind::Dereference,
            TypedExpr::Input { .. } => ExprKind::Input,
            TypedExpr::Constant(_) => ExprKind::Constant,
            TypedExpr::Call { .. } => ExprKind::Call,
            TypedExpr::Cast { .. } => ExprKind::Cast,
            TypedExpr::Concat { .. } => ExprKind::Concat,
            TypedExpr::Lambda { .. } => ExprKind::Lambda,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            TypedExpr::Constant(v) => v.data_type(),
            TypedExpr::FieldAccess { data_type, .. }
            | TypedExpr::Dereference { data_type, .. }
            | TypedExpr::Input { data_type }
            | TypedExpr::Call { data_type, .. }
            | TypedExpr::Cast { data_type, .. }
            | TypedExpr::Concat { data_type, .. }
            | TypedExpr::Lambda { data_type, .. } => data_type.clone(),
        }
    }

    /// Direct children in argument order.
    pub fn inputs(&self) -> Vec<&TypedExpr> {
        match self {
            TypedExpr::FieldAccess { .. } | TypedExpr::Input { .. } | TypedExpr::Constant(_) => {
                vec![]
            }
            TypedExpr::Dereference { input, .. } | TypedExpr::Cast { input, .. } => {
                vec![input.as_ref()]
            }
            TypedExpr::Call { args, .. } | TypedExpr::Concat { args, .. } => args.iter().collect(),
            TypedExpr::Lambda { body, .. } => vec![body.as_ref()],
        }
    }

    /// Name the host resolves this expression to when it is a function-like node.
    ///
    /// Casts are special forms named `cast` / `try_cast`.
    pub fn call_name(&self) -> Option<&str> {
        match self {
            TypedExpr::Call { name, .. } => Some(name),
            TypedExpr::Cast { is_try: false, .. } => Some("cast"),
            TypedExpr::Cast { is_try: true, .. } => Some("try_cast"),
            _ => None,
        }
    }
}

impl fmt::Display for TypedExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedExpr::FieldAccess { name, .. } => f.write_str(name),
            TypedExpr::Dereference { input, field, .. } => write!(f, "{input}.{field}"),
            TypedExpr::Input { .. } => f.write_str("ROW"),
            TypedExpr::Constant(v) => write!(f, "{v}"),
            TypedExpr::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            TypedExpr::Cast {
                input,
                data_type,
                is_try,
            } => {
                let name = if *is_try { "try_cast" } else { "cast" };
                write!(f, "{name}({input} as {data_type})")
            }
            TypedExpr::Concat { args, .. } => {
                f.write_str("concat(")?;
                write_args(f, args)?;
                f.write_str(")")
            }
            TypedExpr::Lambda { params, body, .. } => {
                write!(f, "({}) -> {body}", params.join(", "))
            }
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[TypedExpr]) -> fmt::Result {
    for (i, a) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{a}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_nested_calls() {
        let e = TypedExpr::call(
            "gt",
            vec![
                TypedExpr::call(
                    "f",
                    vec![TypedExpr::col("x", DataType::Int64)],
                    DataType::Int64,
                ),
                TypedExpr::lit(LiteralValue::Int64(5)),
            ],
            DataType::Boolean,
        );
        assert_eq!(e.to_string(), "gt(f(x), 5)");
        assert_eq!(e.kind(), ExprKind::Call);
        assert_eq!(e.inputs().len(), 2);
    }

    #[test]
    fn casts_resolve_to_special_form_names() {
        let c = TypedExpr::cast(TypedExpr::col("a", DataType::Int32), DataType::Int64);
        assert_eq!(c.call_name(), Some("cast"));
        assert_eq!(c.data_type(), DataType::Int64);
        let t = TypedExpr::Cast {
            input: Box::new(TypedExpr::col("a", DataType::Utf8)),
            data_type: DataType::Int64,
            is_try: true,
        };
        assert_eq!(t.call_name(), Some("try_cast"));
        assert_eq!(t.to_string(), "try_cast(a as Int64)");
    }

    #[test]
    fn literal_integral_view() {
        assert_eq!(LiteralValue::Int32(3).as_i64(), Some(3));
        assert_eq!(LiteralValue::Utf8("x".into()).as_i64(), None);
        assert_eq!(LiteralValue::Utf8("x".into()).to_string(), "'x'");
    }
}
