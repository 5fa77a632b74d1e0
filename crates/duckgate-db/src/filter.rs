//! Filter and sort terms translated into parameterized SQL fragments.
//!
//! Caller values are always bound as positional parameters, never
//! interpolated into SQL text. Column identifiers appear verbatim in the
//! generated fragments; callers must validate them against the strict
//! allow-list before building terms (the engine does not parameterize
//! identifiers).

use duckdb::types::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The supported comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
}

impl FilterOp {
    fn as_sql(&self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Gte => ">=",
            FilterOp::Lt => "<",
            FilterOp::Lte => "<=",
            FilterOp::Like => "LIKE",
            FilterOp::In => "IN",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown operator '{0}' (supported: eq, ne, gt, gte, lt, lte, like, in)")]
    UnknownOperator(String),

    #[error("operator '{op}' on column '{column}' requires a scalar value")]
    ScalarOperatorWithList { op: String, column: String },
}

impl FromStr for FilterOp {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "ne" => Ok(FilterOp::Ne),
            "gt" => Ok(FilterOp::Gt),
            "gte" => Ok(FilterOp::Gte),
            "lt" => Ok(FilterOp::Lt),
            "lte" => Ok(FilterOp::Lte),
            "like" => Ok(FilterOp::Like),
            "in" => Ok(FilterOp::In),
            other => Err(FilterError::UnknownOperator(other.to_string())),
        }
    }
}

/// A bound value: one scalar, or a list for set-membership.
#[derive(Debug, Clone)]
pub enum FilterValue {
    Scalar(Value),
    List(Vec<Value>),
}

impl From<Value> for FilterValue {
    fn from(value: Value) -> Self {
        FilterValue::Scalar(value)
    }
}

impl From<Vec<Value>> for FilterValue {
    fn from(values: Vec<Value>) -> Self {
        FilterValue::List(values)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        FilterValue::Scalar(Value::BigInt(value))
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        FilterValue::Scalar(Value::Double(value))
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        FilterValue::Scalar(Value::Boolean(value))
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue::Scalar(Value::Text(value.to_string()))
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue::Scalar(Value::Text(value))
    }
}

/// One (column, operator, value) filter term.
#[derive(Debug, Clone)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: impl Into<FilterValue>) -> Self {
        Self {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// An `in` term over a list of values.
    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::In,
            value: FilterValue::List(values),
        }
    }

    /// Translate this term into a predicate fragment, appending its bound
    /// values to `params` in positional order.
    ///
    /// `like` binds its value as-is; wildcard semantics are the caller's
    /// responsibility. `in` expands to one placeholder per element, and an
    /// empty list becomes a constant-false predicate.
    pub fn to_sql(&self, params: &mut Vec<Value>) -> Result<String, FilterError> {
        match (&self.op, &self.value) {
            (FilterOp::In, FilterValue::List(values)) => {
                if values.is_empty() {
                    return Ok("1 = 0".to_string());
                }
                params.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(", ");
                Ok(format!("{} IN ({})", self.column, placeholders))
            }
            (FilterOp::In, FilterValue::Scalar(value)) => {
                params.push(value.clone());
                Ok(format!("{} IN (?)", self.column))
            }
            (op, FilterValue::Scalar(value)) => {
                params.push(value.clone());
                Ok(format!("{} {} ?", self.column, op.as_sql()))
            }
            (op, FilterValue::List(_)) => Err(FilterError::ScalarOperatorWithList {
                op: op.as_sql().to_string(),
                column: self.column.clone(),
            }),
        }
    }
}

/// Translate a conjunction of filter terms into a WHERE body (without the
/// keyword), appending bound values to `params`.
pub fn where_clause(filters: &[Filter], params: &mut Vec<Value>) -> Result<String, FilterError> {
    let mut clauses = Vec::with_capacity(filters.len());
    for filter in filters {
        clauses.push(filter.to_sql(params)?);
    }
    Ok(clauses.join(" AND "))
}

/// Sort direction, normalized case-insensitively and defaulting to
/// ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parse a direction string; anything other than "desc"
    /// (case-insensitive) is ascending.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        }
    }

    fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl fmt::Display for SortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One (column, direction) sort term.
#[derive(Debug, Clone)]
pub struct Sort {
    pub column: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn new(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            column: column.into(),
            direction,
        }
    }

    pub fn to_sql(&self) -> String {
        format!("{} {}", self.column, self.direction.as_sql())
    }
}

/// Translate sort terms into an ORDER BY body (without the keyword).
pub fn order_by_clause(sorts: &[Sort]) -> String {
    sorts
        .iter()
        .map(Sort::to_sql)
        .collect::<Vec<_>>()
        .join(", ")
}
