//! A small predicate interpreter over a tagged expression tree.
//!
//! Expressions serve three purposes:
//!
//! 1. **Partition expressions.** Every fragment carries a conjunction such as
//!    `(year == 2024) and (region == "eu")` derived from its path.
//! 2. **Partition pruning.** [`Expression::simplify_with_guarantee`] substitutes
//!    the values a fragment is known to hold and folds constants; a filter that
//!    folds to `false` or `null` can never select a row from that fragment.
//! 3. **Row filtering.** [`Expression::evaluate`] runs vectorised over a
//!    [`RecordBatch`] using Arrow compute kernels, with SQL three-valued logic.
//!
//! Row-group statistics are consulted through [`Expression::might_match`].
//!
//! # Building expressions
//! ```
//! use strata::expression::{field, lit};
//!
//! let filter = field("a").equal(lit(1)).and(field("b").greater(lit(0.5)));
//! assert_eq!(filter.to_string(), "((a == 1) and (b > 0.5))");
//! ```

use crate::error::{Error, Result};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float64Array, Int64Array, NullArray, StringArray,
    new_null_array,
};
use arrow::compute::kernels::boolean::{and_kleene, is_null as is_null_kernel, not as not_kernel, or_kleene};
use arrow::compute::kernels::cmp;
use arrow::compute::{CastOptions, cast, cast_with_options};
use arrow::datatypes::{DataType, Schema};
use arrow::record_batch::RecordBatch;
use ordered_float::OrderedFloat;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
}

impl ScalarValue {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Arrow type this scalar materialises as.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Null => DataType::Null,
            Self::Boolean(_) => DataType::Boolean,
            Self::Int64(_) => DataType::Int64,
            Self::Float64(_) => DataType::Float64,
            Self::Utf8(_) => DataType::Utf8,
        }
    }

    /// Order two scalars when they are comparable.
    ///
    /// Integers and floats compare numerically with each other. Nulls and
    /// mismatched kinds are incomparable.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Boolean(a), Self::Boolean(b)) => Some(a.cmp(b)),
            (Self::Int64(a), Self::Int64(b)) => Some(a.cmp(b)),
            (Self::Float64(a), Self::Float64(b)) => Some(a.cmp(b)),
            #[allow(clippy::cast_precision_loss)]
            (Self::Int64(a), Self::Float64(b)) => OrderedFloat(*a as f64).partial_cmp(b),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float64(a), Self::Int64(b)) => a.partial_cmp(&OrderedFloat(*b as f64)),
            (Self::Utf8(a), Self::Utf8(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Repeat this value `len` times as an Arrow array.
    #[must_use]
    pub fn to_array(&self, len: usize) -> ArrayRef {
        match self {
            Self::Null => Arc::new(NullArray::new(len)),
            Self::Boolean(v) => Arc::new(BooleanArray::from(vec![*v; len])),
            Self::Int64(v) => Arc::new(Int64Array::from_value(*v, len)),
            Self::Float64(v) => Arc::new(Float64Array::from_value(v.0, len)),
            Self::Utf8(v) => Arc::new(StringArray::from_iter_values(
                std::iter::repeat_n(v.as_str(), len),
            )),
        }
    }

    /// Repeat this value `len` times as an array of `data_type`.
    ///
    /// # Errors
    /// [`Error::Invalid`] if the value cannot be represented in `data_type`.
    pub fn to_array_of_type(&self, data_type: &DataType, len: usize) -> Result<ArrayRef> {
        if self.is_null() {
            return Ok(new_null_array(data_type, len));
        }
        let array = self.to_array(len);
        if array.data_type() == data_type {
            return Ok(array);
        }
        let strict = CastOptions {
            safe: false,
            ..CastOptions::default()
        };
        cast_with_options(&array, data_type, &strict).map_err(|e| {
            Error::invalid(format!("cannot represent {self} as {data_type}: {e}"))
        })
    }

    /// Parse a raw path token as a value of `data_type`.
    ///
    /// # Errors
    /// [`Error::Invalid`] if the token does not parse or the type is unsupported.
    pub fn parse(raw: &str, data_type: &DataType) -> Result<Self> {
        let bad = |e: &dyn fmt::Display| {
            Error::invalid(format!("cannot parse '{raw}' as {data_type}: {e}"))
        };
        match data_type {
            DataType::Null => Ok(Self::Null),
            DataType::Boolean => raw.parse().map(Self::Boolean).map_err(|e| bad(&e)),
            dt if dt.is_integer() => raw.parse().map(Self::Int64).map_err(|e| bad(&e)),
            dt if dt.is_floating() => raw
                .parse()
                .map(|v| Self::Float64(OrderedFloat(v)))
                .map_err(|e| bad(&e)),
            DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => Ok(Self::Utf8(raw.into())),
            DataType::Dictionary(_, value) => Self::parse(raw, value),
            other => Err(Error::invalid(format!(
                "unsupported partition field type {other}"
            ))),
        }
    }

    /// Read every slot of `array` as a scalar.
    ///
    /// Integer columns come back as `Int64`, floats as `Float64`, and anything
    /// else that Arrow can cast to a string as `Utf8`.
    ///
    /// # Errors
    /// [`Error::Invalid`] if the column type has no scalar representation.
    pub fn from_array(array: &ArrayRef) -> Result<Vec<Self>> {
        let dt = array.data_type();
        let normalized = |target: &DataType| {
            cast(array, target).map_err(|e| {
                Error::invalid(format!("cannot read {dt} values as scalars: {e}"))
            })
        };
        if *dt == DataType::Null {
            return Ok(vec![Self::Null; array.len()]);
        }
        if *dt == DataType::Boolean {
            let values = array.as_boolean();
            return Ok(values.iter().map(|v| v.map_or(Self::Null, Self::Boolean)).collect());
        }
        if dt.is_integer() {
            let ints = normalized(&DataType::Int64)?;
            let ints = ints.as_primitive::<arrow::datatypes::Int64Type>();
            return Ok(ints.iter().map(|v| v.map_or(Self::Null, Self::Int64)).collect());
        }
        if dt.is_floating() {
            let floats = normalized(&DataType::Float64)?;
            let floats = floats.as_primitive::<arrow::datatypes::Float64Type>();
            return Ok(floats
                .iter()
                .map(|v| v.map_or(Self::Null, |f| Self::Float64(OrderedFloat(f))))
                .collect());
        }
        let strings = normalized(&DataType::Utf8)?;
        let strings = strings.as_string::<i32>();
        Ok(strings
            .iter()
            .map(|v| v.map_or(Self::Null, |s| Self::Utf8(s.to_string())))
            .collect())
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "\"{v}\""),
        }
    }
}

impl From<bool> for ScalarValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for ScalarValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<i32> for ScalarValue {
    fn from(v: i32) -> Self {
        Self::Int64(v.into())
    }
}

impl From<f64> for ScalarValue {
    fn from(v: f64) -> Self {
        Self::Float64(OrderedFloat(v))
    }
}

impl From<&str> for ScalarValue {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(v: String) -> Self {
        Self::Utf8(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for ScalarValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl CompareOp {
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }

    /// The operator with its operands swapped (`a < b` is `b > a`).
    #[must_use]
    pub const fn flip(self) -> Self {
        match self {
            Self::Eq => Self::Eq,
            Self::NotEq => Self::NotEq,
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
        }
    }

    const fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering.is_eq(),
            Self::NotEq => ordering.is_ne(),
            Self::Lt => ordering.is_lt(),
            Self::LtEq => ordering.is_le(),
            Self::Gt => ordering.is_gt(),
            Self::GtEq => ordering.is_ge(),
        }
    }

    fn kernel(self, left: &ArrayRef, right: &ArrayRef) -> Result<BooleanArray> {
        let out = match self {
            Self::Eq => cmp::eq(left, right),
            Self::NotEq => cmp::neq(left, right),
            Self::Lt => cmp::lt(left, right),
            Self::LtEq => cmp::lt_eq(left, right),
            Self::Gt => cmp::gt(left, right),
            Self::GtEq => cmp::gt_eq(left, right),
        };
        out.map_err(|e| Error::from_arrow(format!("evaluate {}", self.symbol()), e))
    }
}

/// Min/max/null statistics for one column of one row group.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ColumnStatistics {
    pub min: Option<ScalarValue>,
    pub max: Option<ScalarValue>,
    pub null_count: Option<u64>,
    pub row_count: u64,
}

/// A predicate or value expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    Literal(ScalarValue),
    Field(String),
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    IsNull(Box<Expression>),
}

/// Reference a column by name.
pub fn field(name: impl Into<String>) -> Expression {
    Expression::Field(name.into())
}

/// A literal value.
pub fn lit(value: impl Into<ScalarValue>) -> Expression {
    Expression::Literal(value.into())
}

/// Logical negation.
#[must_use]
pub fn not(expr: Expression) -> Expression {
    Expression::Not(Box::new(expr))
}

/// True where `expr` is null.
#[must_use]
pub fn is_null(expr: Expression) -> Expression {
    Expression::IsNull(Box::new(expr))
}

/// AND together every expression; an empty input is `true`.
pub fn conjunction(exprs: impl IntoIterator<Item = Expression>) -> Expression {
    exprs
        .into_iter()
        .reduce(Expression::and)
        .unwrap_or_else(|| Expression::literal(true))
}

impl Expression {
    pub fn literal(value: impl Into<ScalarValue>) -> Self {
        Self::Literal(value.into())
    }

    fn compare(self, op: CompareOp, rhs: Self) -> Self {
        Self::Compare {
            op,
            left: Box::new(self),
            right: Box::new(rhs),
        }
    }

    #[must_use]
    pub fn equal(self, rhs: Self) -> Self {
        self.compare(CompareOp::Eq, rhs)
    }

    #[must_use]
    pub fn not_equal(self, rhs: Self) -> Self {
        self.compare(CompareOp::NotEq, rhs)
    }

    #[must_use]
    pub fn less(self, rhs: Self) -> Self {
        self.compare(CompareOp::Lt, rhs)
    }

    #[must_use]
    pub fn less_equal(self, rhs: Self) -> Self {
        self.compare(CompareOp::LtEq, rhs)
    }

    #[must_use]
    pub fn greater(self, rhs: Self) -> Self {
        self.compare(CompareOp::Gt, rhs)
    }

    #[must_use]
    pub fn greater_equal(self, rhs: Self) -> Self {
        self.compare(CompareOp::GtEq, rhs)
    }

    #[must_use]
    pub fn and(self, rhs: Self) -> Self {
        Self::And(Box::new(self), Box::new(rhs))
    }

    #[must_use]
    pub fn or(self, rhs: Self) -> Self {
        Self::Or(Box::new(self), Box::new(rhs))
    }

    /// `true` for the always-true literal.
    #[must_use]
    pub fn is_literal_true(&self) -> bool {
        matches!(self, Self::Literal(ScalarValue::Boolean(true)))
    }

    /// `false` only when the expression is a literal `false` or `null`,
    /// i.e. it can never select a row.
    #[must_use]
    pub fn is_satisfiable(&self) -> bool {
        !matches!(
            self,
            Self::Literal(ScalarValue::Boolean(false) | ScalarValue::Null)
        )
    }

    /// Column names referenced anywhere in the tree, in first-seen order.
    #[must_use]
    pub fn fields_referenced(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Literal(_) => {}
            Self::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Self::Compare { left, right, .. } | Self::And(left, right) | Self::Or(left, right) => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Self::Not(inner) | Self::IsNull(inner) => inner.collect_fields(out),
        }
    }

    /// Check every referenced column exists in `schema`.
    ///
    /// # Errors
    /// [`Error::Invalid`] naming the first unknown column.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for name in self.fields_referenced() {
            if schema.field_with_name(name).is_err() {
                return Err(Error::invalid(format!(
                    "filter references unknown column '{name}'"
                )));
            }
        }
        Ok(())
    }

    /// Values pinned by a conjunction of `field == literal` / `is_null(field)` terms.
    #[must_use]
    pub fn known_values(&self) -> HashMap<String, ScalarValue> {
        let mut out = HashMap::new();
        self.collect_known(&mut out);
        out
    }

    fn collect_known(&self, out: &mut HashMap<String, ScalarValue>) {
        match self {
            Self::And(left, right) => {
                left.collect_known(out);
                right.collect_known(out);
            }
            Self::Compare {
                op: CompareOp::Eq,
                left,
                right,
            } => match (left.as_ref(), right.as_ref()) {
                (Self::Field(name), Self::Literal(value))
                | (Self::Literal(value), Self::Field(name)) => {
                    out.insert(name.clone(), value.clone());
                }
                _ => {}
            },
            Self::IsNull(inner) => {
                if let Self::Field(name) = inner.as_ref() {
                    out.insert(name.clone(), ScalarValue::Null);
                }
            }
            _ => {}
        }
    }

    /// Substitute the values `guarantee` pins and fold constants.
    ///
    /// The result is equivalent to `self` on every row that satisfies the
    /// guarantee. A result that is not [satisfiable](Self::is_satisfiable)
    /// proves no such row matches.
    #[must_use]
    pub fn simplify_with_guarantee(&self, guarantee: &Self) -> Self {
        let known = guarantee.known_values();
        if known.is_empty() {
            return self.fold_constants();
        }
        self.substitute(&known).fold_constants()
    }

    fn substitute(&self, known: &HashMap<String, ScalarValue>) -> Self {
        match self {
            Self::Field(name) => known
                .get(name)
                .map_or_else(|| self.clone(), |v| Self::Literal(v.clone())),
            Self::Literal(_) => self.clone(),
            Self::Compare { op, left, right } => Self::Compare {
                op: *op,
                left: Box::new(left.substitute(known)),
                right: Box::new(right.substitute(known)),
            },
            Self::And(l, r) => Self::And(Box::new(l.substitute(known)), Box::new(r.substitute(known))),
            Self::Or(l, r) => Self::Or(Box::new(l.substitute(known)), Box::new(r.substitute(known))),
            Self::Not(inner) => Self::Not(Box::new(inner.substitute(known))),
            Self::IsNull(inner) => Self::IsNull(Box::new(inner.substitute(known))),
        }
    }

    /// Evaluate every constant subtree with three-valued logic.
    #[must_use]
    pub fn fold_constants(&self) -> Self {
        use ScalarValue::{Boolean, Null};
        match self {
            Self::Literal(_) | Self::Field(_) => self.clone(),
            Self::Compare { op, left, right } => {
                let left = left.fold_constants();
                let right = right.fold_constants();
                if let (Self::Literal(a), Self::Literal(b)) = (&left, &right) {
                    if a.is_null() || b.is_null() {
                        return Self::Literal(Null);
                    }
                    if let Some(ordering) = a.compare(b) {
                        return Self::Literal(Boolean(op.holds(ordering)));
                    }
                }
                Self::Compare {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            Self::And(l, r) => match (l.fold_constants(), r.fold_constants()) {
                (Self::Literal(Boolean(false)), _) | (_, Self::Literal(Boolean(false))) => {
                    Self::Literal(Boolean(false))
                }
                (Self::Literal(Boolean(true)), other) | (other, Self::Literal(Boolean(true))) => other,
                (Self::Literal(Null), Self::Literal(Null)) => Self::Literal(Null),
                (l, r) => l.and(r),
            },
            Self::Or(l, r) => match (l.fold_constants(), r.fold_constants()) {
                (Self::Literal(Boolean(true)), _) | (_, Self::Literal(Boolean(true))) => {
                    Self::Literal(Boolean(true))
                }
                (Self::Literal(Boolean(false)), other) | (other, Self::Literal(Boolean(false))) => other,
                (Self::Literal(Null), Self::Literal(Null)) => Self::Literal(Null),
                (l, r) => l.or(r),
            },
            Self::Not(inner) => match inner.fold_constants() {
                Self::Literal(Boolean(v)) => Self::Literal(Boolean(!v)),
                Self::Literal(Null) => Self::Literal(Null),
                other => not(other),
            },
            Self::IsNull(inner) => match inner.fold_constants() {
                Self::Literal(v) => Self::Literal(Boolean(v.is_null())),
                other => is_null(other),
            },
        }
    }

    /// Evaluate a predicate over `batch`. Null results count as "not selected"
    /// when the mask is later applied with `filter_record_batch`.
    ///
    /// # Errors
    /// [`Error::Invalid`] for unknown columns or non-boolean predicates.
    pub fn evaluate(&self, batch: &RecordBatch) -> Result<BooleanArray> {
        let value = self.evaluate_array(batch)?;
        into_boolean(&value, self)
    }

    fn evaluate_array(&self, batch: &RecordBatch) -> Result<ArrayRef> {
        let rows = batch.num_rows();
        match self {
            Self::Literal(v) => Ok(v.to_array(rows)),
            Self::Field(name) => batch.column_by_name(name).cloned().ok_or_else(|| {
                Error::invalid(format!("filter references unknown column '{name}'"))
            }),
            Self::Compare { op, left, right } => {
                let l = left.evaluate_array(batch)?;
                let r = right.evaluate_array(batch)?;
                let (l, r) = coerce_pair(l, left.is_literal(), r, right.is_literal())?;
                Ok(Arc::new(op.kernel(&l, &r)?))
            }
            Self::And(l, r) => {
                let l = l.evaluate(batch)?;
                let r = r.evaluate(batch)?;
                let out = and_kleene(&l, &r).map_err(|e| Error::from_arrow("evaluate and", e))?;
                Ok(Arc::new(out))
            }
            Self::Or(l, r) => {
                let l = l.evaluate(batch)?;
                let r = r.evaluate(batch)?;
                let out = or_kleene(&l, &r).map_err(|e| Error::from_arrow("evaluate or", e))?;
                Ok(Arc::new(out))
            }
            Self::Not(inner) => {
                let v = inner.evaluate(batch)?;
                let out = not_kernel(&v).map_err(|e| Error::from_arrow("evaluate not", e))?;
                Ok(Arc::new(out))
            }
            Self::IsNull(inner) => {
                let v = inner.evaluate_array(batch)?;
                let out = is_null_kernel(&v).map_err(|e| Error::from_arrow("evaluate is_null", e))?;
                Ok(Arc::new(out))
            }
        }
    }

    const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Whether a row group described by `stats` could contain a matching row.
    ///
    /// Returns `false` only when the statistics prove the predicate false for
    /// every row; unknown columns, missing statistics and shapes the check does
    /// not understand all answer `true`.
    pub fn might_match(&self, stats: &dyn Fn(&str) -> Option<ColumnStatistics>) -> bool {
        match self {
            Self::Literal(_) => self.is_satisfiable(),
            Self::And(l, r) => l.might_match(stats) && r.might_match(stats),
            Self::Or(l, r) => l.might_match(stats) || r.might_match(stats),
            Self::IsNull(inner) => match inner.as_ref() {
                Self::Field(name) => stats(name).and_then(|s| s.null_count).is_none_or(|n| n > 0),
                _ => true,
            },
            Self::Compare { op, left, right } => match (left.as_ref(), right.as_ref()) {
                (Self::Field(name), Self::Literal(value)) => {
                    range_might_match(*op, value, stats(name).as_ref())
                }
                (Self::Literal(value), Self::Field(name)) => {
                    range_might_match(op.flip(), value, stats(name).as_ref())
                }
                _ => true,
            },
            Self::Field(_) | Self::Not(_) => true,
        }
    }
}

fn range_might_match(op: CompareOp, value: &ScalarValue, stats: Option<&ColumnStatistics>) -> bool {
    if value.is_null() {
        return false;
    }
    let Some(stats) = stats else {
        return true;
    };
    if stats.row_count > 0 && stats.null_count == Some(stats.row_count) {
        return false;
    }
    let (Some(min), Some(max)) = (&stats.min, &stats.max) else {
        return true;
    };
    let (Some(vs_min), Some(vs_max)) = (value.compare(min), value.compare(max)) else {
        return true;
    };
    match op {
        CompareOp::Eq => vs_min.is_ge() && vs_max.is_le(),
        CompareOp::NotEq => !(vs_min.is_eq() && vs_max.is_eq()),
        CompareOp::Lt => vs_min.is_gt(),
        CompareOp::LtEq => vs_min.is_ge(),
        CompareOp::Gt => vs_max.is_lt(),
        CompareOp::GtEq => vs_max.is_le(),
    }
}

/// Bring both comparison operands to one Arrow type.
///
/// Numbers compare as `Int64` or, if either side is floating, `Float64`.
/// Otherwise the literal side is cast to the column's type; values that do not
/// convert become null.
fn coerce_pair(
    left: ArrayRef,
    left_literal: bool,
    right: ArrayRef,
    right_literal: bool,
) -> Result<(ArrayRef, ArrayRef)> {
    let (lt, rt) = (left.data_type().clone(), right.data_type().clone());
    if lt == rt {
        return Ok((left, right));
    }
    let to = |array: &ArrayRef, target: &DataType| {
        cast(array, target).map_err(|e| {
            Error::invalid(format!(
                "cannot compare {} with {target}: {e}",
                array.data_type()
            ))
        })
    };
    let numeric = |dt: &DataType| dt.is_integer() || dt.is_floating();
    if numeric(&lt) && numeric(&rt) {
        let target = if lt.is_floating() || rt.is_floating() {
            DataType::Float64
        } else {
            DataType::Int64
        };
        return Ok((to(&left, &target)?, to(&right, &target)?));
    }
    if lt == DataType::Null || (left_literal && !right_literal) {
        return Ok((to(&left, &rt)?, right));
    }
    Ok((left, to(&right, &lt)?))
}

fn into_boolean(array: &ArrayRef, expr: &Expression) -> Result<BooleanArray> {
    match array.data_type() {
        DataType::Boolean => Ok(array.as_boolean().clone()),
        DataType::Null => Ok(BooleanArray::new_null(array.len())),
        other => Err(Error::invalid(format!(
            "expression {expr} yields {other}, expected a boolean predicate"
        ))),
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Field(name) => f.write_str(name),
            Self::Compare { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::And(l, r) => write!(f, "({l} and {r})"),
            Self::Or(l, r) => write!(f, "({l} or {r})"),
            Self::Not(inner) => write!(f, "not {inner}"),
            Self::IsNull(inner) => write!(f, "is_null({inner})"),
        }
    }
}

impl From<ScalarValue> for Expression {
    fn from(v: ScalarValue) -> Self {
        Self::Literal(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::Field;

    fn batch() -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, true),
            Field::new("s", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![Some(1), Some(2), None, Some(4)])),
                Arc::new(StringArray::from(vec![Some("x"), Some("y"), Some("x"), None])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn partition_guarantee_prunes_disjoint_values() {
        let filter = field("a").equal(lit(1));
        let guarantee = field("a").equal(lit(2));
        assert!(!filter.simplify_with_guarantee(&guarantee).is_satisfiable());

        let matching = field("a").equal(lit(1));
        assert!(filter.simplify_with_guarantee(&matching).is_literal_true());
    }

    #[test]
    fn unrelated_columns_survive_simplification() {
        let filter = field("a").equal(lit(1)).and(field("b").greater(lit(3)));
        let simplified = filter.simplify_with_guarantee(&field("a").equal(lit(1)));
        assert_eq!(simplified, field("b").greater(lit(3)));
    }

    #[test]
    fn null_partition_folds_to_null() {
        let filter = field("a").equal(lit(1));
        let simplified = filter.simplify_with_guarantee(&is_null(field("a")));
        assert_eq!(simplified, Expression::Literal(ScalarValue::Null));
        assert!(!simplified.is_satisfiable());
        assert!(is_null(field("a")).simplify_with_guarantee(&is_null(field("a"))).is_literal_true());
    }

    #[test]
    fn mismatched_kinds_are_left_for_row_evaluation() {
        let filter = field("a").equal(lit("1"));
        let simplified = filter.simplify_with_guarantee(&field("a").equal(lit(1)));
        assert!(simplified.is_satisfiable());
    }

    #[test]
    fn evaluates_with_three_valued_logic() {
        let b = batch();
        let mask = field("a").greater(lit(1)).evaluate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![Some(false), Some(true), None, Some(true)]));

        let mask = field("a")
            .greater(lit(1))
            .or(field("s").equal(lit("x")))
            .evaluate(&b)
            .unwrap();
        assert_eq!(mask, BooleanArray::from(vec![Some(true), Some(true), Some(true), Some(true)]));

        let mask = is_null(field("s")).evaluate(&b).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![false, false, false, true]));
    }

    #[test]
    fn float_literal_against_integer_column() {
        let mask = field("a").less(lit(1.5)).evaluate(&batch()).unwrap();
        assert_eq!(mask, BooleanArray::from(vec![Some(true), Some(false), None, Some(false)]));
    }

    #[test]
    fn unknown_column_is_invalid() {
        let err = field("zzz").equal(lit(1)).evaluate(&batch()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Invalid);
    }

    #[test]
    fn statistics_rule_out_row_groups() {
        let stats = |name: &str| {
            (name == "a").then(|| ColumnStatistics {
                min: Some(ScalarValue::Int64(10)),
                max: Some(ScalarValue::Int64(20)),
                null_count: Some(0),
                row_count: 100,
            })
        };
        assert!(!field("a").equal(lit(5)).might_match(&stats));
        assert!(field("a").equal(lit(15)).might_match(&stats));
        assert!(!field("a").greater(lit(20)).might_match(&stats));
        assert!(!lit(25).less_equal(field("a")).might_match(&stats));
        assert!(!is_null(field("a")).might_match(&stats));
        assert!(field("other").equal(lit(5)).might_match(&stats));
    }

    #[test]
    fn display_is_parenthesized() {
        let e = field("a").equal(lit(1)).and(not(is_null(field("b"))));
        assert_eq!(e.to_string(), "((a == 1) and not is_null(b))");
    }

    #[test]
    fn reads_scalars_back_from_columns() {
        let b = batch();
        let values = ScalarValue::from_array(b.column(1)).unwrap();
        assert_eq!(values[0], ScalarValue::Utf8("x".into()));
        assert_eq!(values[3], ScalarValue::Null);
    }
}
