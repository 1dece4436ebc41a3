//! Handles to accelerator memory and accelerator-resident values.
//!
//! Columns are Arrow arrays; a [`ColumnOrView`] either owns a freshly produced column or
//! borrows one from the batch being evaluated. Scalars are one-element arrays so they can
//! be handed to comparison and arithmetic kernels as `Datum`s.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use accelq_common::{AccelError, Result};
use accelq_planner::LiteralValue;
use arrow::array::{
    new_null_array, Array, ArrayRef, BooleanArray, Date32Array, Float64Array, Int32Array,
    Int64Array, Scalar, StringArray, UInt32Array,
};
use arrow::compute::{can_cast_types, cast, take};
use arrow_schema::DataType;

/// Device memory resource allocation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryResourceMode {
    Cuda,
    Pool,
    Async,
    Arena,
    Managed,
    ManagedPool,
}

impl FromStr for MemoryResourceMode {
    type Err = AccelError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cuda" => Ok(Self::Cuda),
            "pool" => Ok(Self::Pool),
            "async" => Ok(Self::Async),
            "arena" => Ok(Self::Arena),
            "managed" => Ok(Self::Managed),
            "managed_pool" => Ok(Self::ManagedPool),
            other => Err(AccelError::InvalidConfig(format!(
                "unknown memory resource mode: {other}"
            ))),
        }
    }
}

/// Process handle to the accelerator's memory resource.
///
/// Allocation itself belongs to the accelerator runtime; this handle records the mode and
/// budget it was created with and accounts bytes of columns produced through it.
#[derive(Debug)]
pub struct DeviceMemoryResource {
    mode: MemoryResourceMode,
    memory_percent: i32,
    allocated: AtomicU64,
}

impl DeviceMemoryResource {
    pub fn new(mode: MemoryResourceMode, memory_percent: i32) -> Self {
        Self {
            mode,
            memory_percent,
            allocated: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> MemoryResourceMode {
        self.mode
    }

    pub fn memory_percent(&self) -> i32 {
        self.memory_percent
    }

    pub fn record_allocation(&self, bytes: usize) {
        self.allocated.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.allocated.load(Ordering::Relaxed)
    }
}

/// Build a memory resource from the configured mode string and budget.
pub fn create_memory_resource(mode: &str, memory_percent: i32) -> Result<Arc<DeviceMemoryResource>> {
    let mode = mode.parse::<MemoryResourceMode>()?;
    Ok(Arc::new(DeviceMemoryResource::new(mode, memory_percent)))
}

/// Ordered execution queue on the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStream(pub u64);

impl DeviceStream {
    pub fn default_stream() -> Self {
        Self(0)
    }
}

/// Stream and memory resource that per-batch evaluation runs against.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    pub stream: DeviceStream,
    pub mr: Arc<DeviceMemoryResource>,
}

impl DeviceContext {
    pub fn new(stream: DeviceStream, mr: Arc<DeviceMemoryResource>) -> Self {
        Self { stream, mr }
    }
}

/// An owned accelerator column or a view of a column that outlives `'a`.
#[derive(Debug, Clone)]
pub enum ColumnOrView<'a> {
    Column(ArrayRef),
    View(&'a ArrayRef),
}

impl<'a> ColumnOrView<'a> {
    pub fn as_array(&self) -> &ArrayRef {
        match self {
            ColumnOrView::Column(c) => c,
            ColumnOrView::View(v) => v,
        }
    }

    /// Turn into an owned column; a view shares the referenced buffers.
    pub fn into_column(self) -> ArrayRef {
        match self {
            ColumnOrView::Column(c) => c,
            ColumnOrView::View(v) => Arc::clone(v),
        }
    }

    pub fn data_type(&self) -> &DataType {
        self.as_array().data_type()
    }

    pub fn len(&self) -> usize {
        self.as_array().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_view(&self) -> bool {
        matches!(self, ColumnOrView::View(_))
    }
}

/// Accelerator-resident scalar, materialized once at function construction.
#[derive(Clone)]
pub struct DeviceScalar {
    value: ArrayRef,
}

impl fmt::Debug for DeviceScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceScalar")
            .field("data_type", self.value.data_type())
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl DeviceScalar {
    /// Materialize a literal, cast to `target` when given.
    pub fn from_literal(value: &LiteralValue, target: Option<&DataType>) -> Result<Self> {
        let array: ArrayRef = match value {
            LiteralValue::Boolean(v) => Arc::new(BooleanArray::from(vec![*v])),
            LiteralValue::Int32(v) => Arc::new(Int32Array::from(vec![*v])),
            LiteralValue::Int64(v) => Arc::new(Int64Array::from(vec![*v])),
            LiteralValue::Float64(v) => Arc::new(Float64Array::from(vec![*v])),
            LiteralValue::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str()])),
            LiteralValue::Date32(v) => Arc::new(Date32Array::from(vec![*v])),
            LiteralValue::Null => new_null_array(target.unwrap_or(&DataType::Null), 1),
        };
        match target {
            Some(t) if t != array.data_type() => {
                if !can_cast_types(array.data_type(), t) {
                    return Err(AccelError::MalformedExpression(format!(
                        "constant {value} cannot be represented as {t}"
                    )));
                }
                let value = cast(&array, t)
                    .map_err(|e| AccelError::MalformedExpression(format!("constant cast failed: {e}")))?;
                Ok(Self { value })
            }
            _ => Ok(Self { value: array }),
        }
    }

    pub fn from_i32(v: i32) -> Self {
        Self {
            value: Arc::new(Int32Array::from(vec![v])),
        }
    }

    pub fn from_str_value(v: &str) -> Self {
        Self {
            value: Arc::new(StringArray::from(vec![v])),
        }
    }

    /// Explicitly unset scalar of `data_type`.
    pub fn null(data_type: &DataType) -> Self {
        Self {
            value: new_null_array(data_type, 1),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.value.is_valid(0)
    }

    pub fn data_type(&self) -> &DataType {
        self.value.data_type()
    }

    /// Backing one-element array.
    pub fn value(&self) -> &ArrayRef {
        &self.value
    }

    /// String value, `None` when unset or not a Utf8 scalar.
    pub fn as_str(&self) -> Option<&str> {
        if !self.is_valid() {
            return None;
        }
        self.value
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| a.value(0))
    }

    /// Integral value, `None` when unset or not an Int32/Int64 scalar.
    pub fn as_i64(&self) -> Option<i64> {
        if !self.is_valid() {
            return None;
        }
        if let Some(a) = self.value.as_any().downcast_ref::<Int32Array>() {
            return Some(i64::from(a.value(0)));
        }
        self.value
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(0))
    }

    /// Kernel argument form.
    pub fn datum(&self) -> Scalar<ArrayRef> {
        Scalar::new(Arc::clone(&self.value))
    }

    /// Repeat the scalar into a column of `len` rows.
    pub fn broadcast(&self, len: usize) -> Result<ArrayRef> {
        let indices = UInt32Array::from(vec![0u32; len]);
        take(self.value.as_ref(), &indices, None)
            .map_err(|e| AccelError::Execution(format!("broadcast failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_parse_case_insensitively() {
        let mode = "Managed_Pool".parse::<MemoryResourceMode>().expect("mode");
        assert_eq!(mode, MemoryResourceMode::ManagedPool);
        assert!(matches!(
            "gpu".parse::<MemoryResourceMode>(),
            Err(AccelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn scalar_null_is_unset() {
        let s = DeviceScalar::null(&DataType::Int32);
        assert!(!s.is_valid());
        assert_eq!(s.as_i64(), None);
        assert_eq!(s.data_type(), &DataType::Int32);
    }

    #[test]
    fn scalar_from_literal_casts_to_target() {
        let s = DeviceScalar::from_literal(&LiteralValue::Int64(7), Some(&DataType::Int32))
            .expect("scalar");
        assert_eq!(s.data_type(), &DataType::Int32);
        assert_eq!(s.as_i64(), Some(7));
        let col = s.broadcast(3).expect("broadcast");
        assert_eq!(col.len(), 3);
    }

    #[test]
    fn memory_resource_accounts_allocations() {
        let mr = create_memory_resource("pool", 40).expect("mr");
        mr.record_allocation(128);
        mr.record_allocation(64);
        assert_eq!(mr.allocated_bytes(), 192);
        assert_eq!(mr.memory_percent(), 40);
    }
}
