//! Built-in accelerator Functions.
//!
//! Constructors validate arity and the constant-ness of specific children and cache every
//! constant-derived value as a [`DeviceScalar`] (or plain value) so `eval` never re-derives
//! it. Constant children are skipped by the caller, so `eval` receives only the remaining
//! columns, in argument order.

use std::sync::Arc;

use accelq_common::{AccelError, Result};
use accelq_execution::{ColumnOrView, DeviceContext, DeviceScalar, HostExpr};
use accelq_planner::LiteralValue;
use arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Datum, Float64Array, Int32Array, Int64Array,
    ListBuilder, Scalar, StringArray, StringBuilder,
};
use arrow::compute::kernels::comparison::like;
use arrow::compute::kernels::length::length;
use arrow::compute::kernels::substring::substring_by_char;
use arrow::compute::kernels::temporal::{DatePart, date_part};
use arrow::compute::kernels::zip::zip;
use arrow::compute::kernels::{cmp, numeric};
use arrow::compute::{CastOptions, can_cast_types, cast_with_options};
use arrow::datatypes::{Date32Type, Float64Type, Int32Type, Int64Type};
use arrow::error::ArrowError;
use arrow_schema::DataType;

use super::{Function, FunctionFactory, FunctionRegistry};

/// Register every built-in Function.
///
/// `prefix` is prepended to every name, the special forms included.
pub fn register_builtin_functions(registry: &FunctionRegistry, prefix: &str) -> bool {
    let p = |name: &str| format!("{prefix}{name}");

    registry.register(&p("split"), factory(|_, e| SplitFunction::new(e)), true);
    registry.register(&p("cardinality"), factory(|_, e| CardinalityFunction::new(e)), true);
    registry.register_aliases(
        &[p("substr"), p("substring")],
        factory(|_, e| SubstrFunction::new(e)),
        true,
    );
    registry.register(&p("hash_with_seed"), factory(|_, e| HashFunction::new(e)), true);
    registry.register(&p("round"), factory(|_, e| RoundFunction::new(e)), true);
    registry.register(&p("year"), factory(|_, e| YearFunction::new(e)), true);
    registry.register(&p("length"), factory(|_, e| LengthFunction::new(e)), true);
    registry.register(&p("lower"), factory(|_, e| LowerFunction::new(e)), true);
    registry.register(&p("like"), factory(|_, e| LikeFunction::new(e)), true);
    registry.register_aliases(
        &[p("greaterthan"), p("gt")],
        factory(|_, e| BinaryFunction::new(e, BinaryOp::Greater)),
        true,
    );
    registry.register(
        &p("divide"),
        factory(|_, e| BinaryFunction::new(e, BinaryOp::Divide)),
        true,
    );
    registry.register_aliases(
        &[p("switch"), p("if")],
        factory(|_, e| SwitchFunction::new(e)),
        true,
    );
    registry.register(&p("try_cast"), factory(|_, e| CastFunction::new(e, true)), true);
    registry.register(&p("cast"), factory(|_, e| CastFunction::new(e, false)), true);
    registry.register(&p("date_add"), factory(|_, e| DateAddFunction::new(e)), true);
    true
}

fn factory<F, T>(ctor: F) -> FunctionFactory
where
    F: Fn(&str, &Arc<HostExpr>) -> Result<T> + Send + Sync + 'static,
    T: Function + 'static,
{
    Arc::new(move |name: &str, expr: &Arc<HostExpr>| {
        Ok(Arc::new(ctor(name, expr)?) as Arc<dyn Function>)
    })
}

// ------------------ construction helpers ------------------

fn malformed(msg: impl Into<String>) -> AccelError {
    AccelError::MalformedExpression(msg.into())
}

fn expect_arity(expr: &HostExpr, min: usize, max: usize) -> Result<()> {
    let n = expr.inputs().len();
    if n < min || n > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {min}")
        } else {
            format!("{min} to {max}")
        };
        return Err(malformed(format!(
            "{} expects {expected} inputs, got {n}",
            expr.name()
        )));
    }
    Ok(())
}

fn constant_input<'e>(expr: &'e HostExpr, idx: usize, what: &str) -> Result<&'e LiteralValue> {
    expr.inputs()
        .get(idx)
        .and_then(|input| input.as_constant())
        .ok_or_else(|| malformed(format!("{what} must be a constant")))
}

fn integral_constant(expr: &HostExpr, idx: usize, what: &str) -> Result<i64> {
    constant_input(expr, idx, what)?
        .as_i64()
        .ok_or_else(|| malformed(format!("{what} must be an integer constant")))
}

fn to_i32(value: i64, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| malformed(format!("{what} {value} is out of range")))
}

/// Scalar for input `idx` when it is a constant, cast to `target` (or the input's type).
fn cached_scalar(expr: &HostExpr, idx: usize, target: Option<&DataType>) -> Result<Option<DeviceScalar>> {
    let input = &expr.inputs()[idx];
    match input.as_constant() {
        Some(v) => {
            let target = target.unwrap_or(input.data_type());
            DeviceScalar::from_literal(v, Some(target)).map(Some)
        }
        None => Ok(None),
    }
}

fn reject_constant(expr: &HostExpr, idx: usize, what: &str) -> Result<()> {
    if expr.inputs()[idx].is_constant() {
        return Err(malformed(format!("{what} must not be a constant")));
    }
    Ok(())
}

// ------------------ evaluation helpers ------------------

fn next_arg<'a>(args: &mut std::vec::IntoIter<ColumnOrView<'a>>, name: &str) -> Result<ColumnOrView<'a>> {
    args.next()
        .ok_or_else(|| AccelError::Execution(format!("{name}: missing input column")))
}

fn downcast<'b, T: 'static>(array: &'b ArrayRef, name: &str) -> Result<&'b T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        AccelError::Execution(format!(
            "{name}: unsupported input type {}",
            array.data_type()
        ))
    })
}

fn kernel(name: &'static str) -> impl Fn(ArrowError) -> AccelError {
    move |e| AccelError::Execution(format!("{name} kernel failed: {e}"))
}

fn owned<'a>(array: ArrayRef) -> ColumnOrView<'a> {
    ColumnOrView::Column(array)
}

// ------------------ functions ------------------

/// `split(string, delimiter[, limit])` producing a list of strings.
#[derive(Debug)]
pub struct SplitFunction {
    delimiter: DeviceScalar,
    max_split_count: i32,
}

impl SplitFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 2, 3)?;
        let delimiter = match constant_input(expr, 1, "split delimiter")? {
            LiteralValue::Utf8(s) => DeviceScalar::from_str_value(s),
            _ => return Err(malformed("split delimiter must be a string constant")),
        };
        // The limit caps the returned array size; the kernel counts split operations.
        let max_split_count = if expr.inputs().len() == 3 {
            to_i32(integral_constant(expr, 2, "split limit")?, "split limit")?.saturating_sub(1)
        } else {
            -1
        };
        Ok(Self {
            delimiter,
            max_split_count,
        })
    }

    /// Maximum number of split operations; negative means unlimited.
    pub fn max_split_count(&self) -> i32 {
        self.max_split_count
    }

    pub fn delimiter(&self) -> &DeviceScalar {
        &self.delimiter
    }
}

impl Function for SplitFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "split")?;
        let strings = downcast::<StringArray>(input.as_array(), "split")?;
        let delimiter = self.delimiter.as_str().unwrap_or_default();
        let mut builder = ListBuilder::new(StringBuilder::new());
        for value in strings.iter() {
            match value {
                Some(s) if self.max_split_count >= 0 => {
                    let parts = self.max_split_count as usize + 1;
                    for piece in s.splitn(parts, delimiter) {
                        builder.values().append_value(piece);
                    }
                    builder.append(true);
                }
                Some(s) => {
                    for piece in s.split(delimiter) {
                        builder.values().append_value(piece);
                    }
                    builder.append(true);
                }
                None => builder.append(false),
            }
        }
        Ok(owned(Arc::new(builder.finish())))
    }
}

/// `cast` / `try_cast` to the call's declared type.
#[derive(Debug)]
pub struct CastFunction {
    target: DataType,
    safe: bool,
}

impl CastFunction {
    pub fn new(expr: &Arc<HostExpr>, safe: bool) -> Result<Self> {
        expect_arity(expr, 1, 1)?;
        let source = expr.inputs()[0].data_type();
        let target = expr.data_type().clone();
        if !can_cast_types(source, &target) {
            return Err(malformed(format!(
                "cast from {source} to {target} is not supported"
            )));
        }
        Ok(Self { target, safe })
    }
}

impl Function for CastFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "cast")?;
        if input.data_type() == &self.target {
            return Ok(input);
        }
        let options = CastOptions {
            safe: self.safe,
            ..Default::default()
        };
        cast_with_options(input.as_array(), &self.target, &options)
            .map(owned)
            .map_err(kernel("cast"))
    }
}

/// `date_add(date, days)` with a constant day count.
#[derive(Debug)]
pub struct DateAddFunction {
    days: i32,
}

impl DateAddFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 2, 2)?;
        if expr.inputs()[0].data_type() != &DataType::Date32 {
            return Err(malformed("first argument to date_add must be a date"));
        }
        reject_constant(expr, 0, "date_add date argument")?;
        let days = to_i32(integral_constant(expr, 1, "date_add day count")?, "date_add day count")?;
        Ok(Self { days })
    }
}

impl Function for DateAddFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "date_add")?;
        let dates = downcast::<Date32Array>(input.as_array(), "date_add")?;
        let days = self.days;
        let out = dates.unary::<_, Date32Type>(|d| d.wrapping_add(days));
        Ok(owned(Arc::new(out)))
    }
}

/// Number of elements of each list.
#[derive(Debug)]
pub struct CardinalityFunction;

impl CardinalityFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 1, 1)?;
        Ok(Self)
    }
}

impl Function for CardinalityFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "cardinality")?;
        match input.data_type() {
            DataType::List(_) | DataType::LargeList(_) | DataType::FixedSizeList(_, _) => {
                length(input.as_array().as_ref())
                    .map(owned)
                    .map_err(kernel("cardinality"))
            }
            other => Err(AccelError::Execution(format!(
                "cardinality: unsupported input type {other}"
            ))),
        }
    }
}

/// `round(x[, scale])`, half-up with ties away from zero.
#[derive(Debug)]
pub struct RoundFunction {
    scale: i32,
}

impl RoundFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 1, 2)?;
        reject_constant(expr, 0, "round first argument")?;
        let scale = if expr.inputs().len() == 2 {
            to_i32(integral_constant(expr, 1, "round scale")?, "round scale")?
        } else {
            0
        };
        Ok(Self { scale })
    }

    pub fn scale(&self) -> i32 {
        self.scale
    }
}

fn round_f64(v: f64, scale: i32) -> f64 {
    let factor = 10f64.powi(scale);
    if factor == 0.0 {
        return 0.0;
    }
    let scaled = v * factor;
    if !factor.is_finite() || !scaled.is_finite() {
        return v;
    }
    scaled.round() / factor
}

fn round_i64(v: i64, scale: i32) -> i64 {
    if scale >= 0 {
        return v;
    }
    let Some(factor) = 10i64.checked_pow(scale.unsigned_abs()) else {
        return 0;
    };
    let rem = v % factor;
    let base = v - rem;
    if rem.unsigned_abs() * 2 >= factor.unsigned_abs() {
        base.saturating_add(v.signum() * factor)
    } else {
        base
    }
}

impl Function for RoundFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "round")?;
        let scale = self.scale;
        let out: ArrayRef = match input.data_type() {
            DataType::Float64 => {
                let a = downcast::<Float64Array>(input.as_array(), "round")?;
                Arc::new(a.unary::<_, Float64Type>(|v| round_f64(v, scale)))
            }
            DataType::Int64 => {
                let a = downcast::<Int64Array>(input.as_array(), "round")?;
                Arc::new(a.unary::<_, Int64Type>(|v| round_i64(v, scale)))
            }
            DataType::Int32 => {
                let a = downcast::<Int32Array>(input.as_array(), "round")?;
                Arc::new(a.unary::<_, Int32Type>(|v| {
                    let r = round_i64(i64::from(v), scale);
                    r.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
                }))
            }
            other => {
                return Err(AccelError::Execution(format!(
                    "round: unsupported input type {other}"
                )));
            }
        };
        Ok(owned(out))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Greater,
    Divide,
}

/// Binary operator with at most one constant operand.
#[derive(Debug)]
pub struct BinaryFunction {
    op: BinaryOp,
    left: Option<DeviceScalar>,
    right: Option<DeviceScalar>,
}

impl BinaryFunction {
    pub fn new(expr: &Arc<HostExpr>, op: BinaryOp) -> Result<Self> {
        expect_arity(expr, 2, 2)?;
        let left = cached_scalar(expr, 0, None)?;
        let right = cached_scalar(expr, 1, None)?;
        if left.is_some() && right.is_some() {
            return Err(malformed(format!(
                "{} does not support both operands being constants",
                expr.name()
            )));
        }
        Ok(Self { op, left, right })
    }

    fn apply(&self, l: &dyn Datum, r: &dyn Datum) -> Result<ArrayRef> {
        match self.op {
            BinaryOp::Greater => cmp::gt(l, r)
                .map(|a| Arc::new(a) as ArrayRef)
                .map_err(kernel("greaterthan")),
            BinaryOp::Divide => numeric::div(l, r).map_err(kernel("divide")),
        }
    }
}

impl Function for BinaryFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let out = match (&self.left, &self.right) {
            (None, None) => {
                let l = next_arg(&mut args, "binary")?;
                let r = next_arg(&mut args, "binary")?;
                self.apply(l.as_array(), r.as_array())?
            }
            (None, Some(right)) => {
                let l = next_arg(&mut args, "binary")?;
                self.apply(l.as_array(), &right.datum())?
            }
            (Some(left), None) => {
                let r = next_arg(&mut args, "binary")?;
                self.apply(&left.datum(), r.as_array())?
            }
            (Some(_), Some(_)) => {
                return Err(AccelError::Execution(
                    "binary function with two constant operands".to_string(),
                ));
            }
        };
        Ok(owned(out))
    }
}

/// `switch(condition, then, else)`; constant branches are cached.
#[derive(Debug)]
pub struct SwitchFunction {
    then_value: Option<DeviceScalar>,
    else_value: Option<DeviceScalar>,
}

impl SwitchFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 3, 3)?;
        if expr.inputs()[0].data_type() != &DataType::Boolean {
            return Err(malformed("switch condition must be boolean"));
        }
        reject_constant(expr, 0, "switch condition")?;
        let result_type = expr.data_type();
        Ok(Self {
            then_value: cached_scalar(expr, 1, Some(result_type))?,
            else_value: cached_scalar(expr, 2, Some(result_type))?,
        })
    }
}

fn branch<'x>(
    scalar: &'x Option<Scalar<ArrayRef>>,
    column: &'x Option<ColumnOrView<'_>>,
) -> Result<&'x dyn Datum> {
    match (scalar, column) {
        (Some(s), _) => Ok(s),
        (None, Some(c)) => Ok(c.as_array()),
        (None, None) => Err(AccelError::Execution(
            "switch: missing branch input".to_string(),
        )),
    }
}

impl Function for SwitchFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let condition = next_arg(&mut args, "switch")?;
        let then_column = match self.then_value {
            Some(_) => None,
            None => Some(next_arg(&mut args, "switch")?),
        };
        let else_column = match self.else_value {
            Some(_) => None,
            None => Some(next_arg(&mut args, "switch")?),
        };
        let then_scalar = self.then_value.as_ref().map(DeviceScalar::datum);
        let else_scalar = self.else_value.as_ref().map(DeviceScalar::datum);
        let mask = downcast::<BooleanArray>(condition.as_array(), "switch")?;
        zip(
            mask,
            branch(&then_scalar, &then_column)?,
            branch(&else_scalar, &else_column)?,
        )
        .map(owned)
        .map_err(kernel("switch"))
    }
}

/// `substr(string, start[, length])` with 1-based `start`.
#[derive(Debug)]
pub struct SubstrFunction {
    start: DeviceScalar,
    end: DeviceScalar,
    step: DeviceScalar,
}

impl SubstrFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 2, 3)?;
        let start = to_i32(integral_constant(expr, 1, "substr start")?, "substr start")?;
        // Positive positions are 1-based; zero and negative positions pass through.
        let adjusted_start = if start >= 1 { start - 1 } else { start };
        let end = if expr.inputs().len() == 3 {
            let length = to_i32(integral_constant(expr, 2, "substr length")?, "substr length")?;
            DeviceScalar::from_i32(adjusted_start.saturating_add(length))
        } else {
            DeviceScalar::null(&DataType::Int32)
        };
        Ok(Self {
            start: DeviceScalar::from_i32(adjusted_start),
            end,
            step: DeviceScalar::from_i32(1),
        })
    }

    /// Zero-based start position.
    pub fn start(&self) -> &DeviceScalar {
        &self.start
    }

    /// Exclusive end position; unset when no length was supplied.
    pub fn end(&self) -> &DeviceScalar {
        &self.end
    }

    pub fn step(&self) -> &DeviceScalar {
        &self.step
    }
}

impl Function for SubstrFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "substr")?;
        let strings = downcast::<StringArray>(input.as_array(), "substr")?;
        let start = self.start.as_i64().unwrap_or_default();
        let length = self.end.as_i64().map(|end| (end - start).max(0) as u64);
        substring_by_char(strings, start, length)
            .map(|a| owned(Arc::new(a)))
            .map_err(kernel("substr"))
    }
}

/// `hash_with_seed(seed, columns...)`: murmur3 x86_32 chained across columns.
#[derive(Debug)]
pub struct HashFunction {
    seed: u32,
}

impl HashFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 2, usize::MAX)?;
        let seed = integral_constant(expr, 0, "hash seed")?;
        if seed < 0 {
            return Err(malformed(format!("hash seed must be non-negative, got {seed}")));
        }
        // Seeds are 32-bit signed on the host side.
        let seed = i32::try_from(seed)
            .map_err(|_| malformed(format!("hash seed {seed} is out of range")))?;
        Ok(Self { seed: seed as u32 })
    }
}

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

fn fmix32(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

pub(crate) fn murmur3_x86_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let chunks = data.chunks_exact(4);
    let tail = chunks.remainder();
    for chunk in chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }
    if !tail.is_empty() {
        let k = tail
            .iter()
            .enumerate()
            .fold(0u32, |k, (i, b)| k | (u32::from(*b) << (8 * i)));
        h ^= mix_k(k);
    }
    fmix32(h ^ data.len() as u32)
}

fn hash_column(column: &ArrayRef, hashes: &mut [u32]) -> Result<()> {
    fn each<F: Fn(usize) -> Vec<u8>>(column: &ArrayRef, hashes: &mut [u32], bytes: F) {
        for (i, h) in hashes.iter_mut().enumerate() {
            if column.is_valid(i) {
                *h = murmur3_x86_32(&bytes(i), *h);
            }
        }
    }
    match column.data_type() {
        DataType::Boolean => {
            let a = downcast::<BooleanArray>(column, "hash_with_seed")?;
            each(column, hashes, |i| vec![u8::from(a.value(i))]);
        }
        DataType::Int32 => {
            let a = downcast::<Int32Array>(column, "hash_with_seed")?;
            each(column, hashes, |i| a.value(i).to_le_bytes().to_vec());
        }
        DataType::Date32 => {
            let a = downcast::<Date32Array>(column, "hash_with_seed")?;
            each(column, hashes, |i| a.value(i).to_le_bytes().to_vec());
        }
        DataType::Int64 => {
            let a = downcast::<Int64Array>(column, "hash_with_seed")?;
            each(column, hashes, |i| a.value(i).to_le_bytes().to_vec());
        }
        DataType::Float64 => {
            let a = downcast::<Float64Array>(column, "hash_with_seed")?;
            each(column, hashes, |i| a.value(i).to_le_bytes().to_vec());
        }
        DataType::Utf8 => {
            let a = downcast::<StringArray>(column, "hash_with_seed")?;
            each(column, hashes, |i| a.value(i).as_bytes().to_vec());
        }
        other => {
            return Err(AccelError::Execution(format!(
                "hash_with_seed: unsupported input type {other}"
            )));
        }
    }
    Ok(())
}

impl Function for HashFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        if args.is_empty() {
            return Err(AccelError::Execution(
                "hash_with_seed: no input columns".to_string(),
            ));
        }
        let mut hashes = vec![self.seed; num_rows];
        for column in &args {
            hash_column(column.as_array(), &mut hashes)?;
        }
        let out = Int32Array::from_iter_values(hashes.into_iter().map(|h| h as i32));
        Ok(owned(Arc::new(out)))
    }
}

/// Calendar year of a date or timestamp.
#[derive(Debug)]
pub struct YearFunction;

impl YearFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 1, 1)?;
        Ok(Self)
    }
}

impl Function for YearFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "year")?;
        date_part(input.as_array().as_ref(), DatePart::Year)
            .map(owned)
            .map_err(kernel("year"))
    }
}

/// Character count of a string.
#[derive(Debug)]
pub struct LengthFunction;

impl LengthFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 1, 1)?;
        Ok(Self)
    }
}

impl Function for LengthFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "length")?;
        let strings = downcast::<StringArray>(input.as_array(), "length")?;
        let out: Int32Array = strings
            .iter()
            .map(|v| v.map(|s| s.chars().count() as i32))
            .collect();
        Ok(owned(Arc::new(out)))
    }
}

#[derive(Debug)]
pub struct LowerFunction;

impl LowerFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 1, 1)?;
        Ok(Self)
    }
}

impl Function for LowerFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "lower")?;
        let strings = downcast::<StringArray>(input.as_array(), "lower")?;
        let out: StringArray = strings
            .iter()
            .map(|v| v.map(str::to_lowercase))
            .collect();
        Ok(owned(Arc::new(out)))
    }
}

/// `like(string, pattern)` with a constant pattern.
#[derive(Debug)]
pub struct LikeFunction {
    pattern: DeviceScalar,
}

impl LikeFunction {
    pub fn new(expr: &Arc<HostExpr>) -> Result<Self> {
        expect_arity(expr, 2, 2)?;
        let pattern = match constant_input(expr, 1, "like pattern")? {
            LiteralValue::Utf8(s) => DeviceScalar::from_str_value(s),
            _ => return Err(malformed("like pattern must be a string constant")),
        };
        Ok(Self { pattern })
    }
}

impl Function for LikeFunction {
    fn eval<'a>(
        &self,
        args: Vec<ColumnOrView<'a>>,
        _num_rows: usize,
        _ctx: &DeviceContext,
    ) -> Result<ColumnOrView<'a>> {
        let mut args = args.into_iter();
        let input = next_arg(&mut args, "like")?;
        like(input.as_array(), &self.pattern.datum())
            .map(|a| owned(Arc::new(a)))
            .map_err(kernel("like"))
    }
}
