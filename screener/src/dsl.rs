//! Typed screening DSL document.
//!
//! These types represent a *validated* query. The untrusted wire shape is a
//! `serde_json::Value`; only the validator constructs the types below, which
//! is why none of them derive `Deserialize`. A node is exactly one variant
//! by construction, so the compiler never has to re-check shapes.

use serde::Serialize;

/// A validated screening query: the filter tree plus optional sort and limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenQuery {
    pub filter: FilterNode,
    pub sort: Vec<SortKey>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FilterNode {
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
    Condition(Condition),
}

/// Leaf condition: one catalog field compared against a value, optionally
/// collapsed over a trailing window of periodic facts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: FilterValue,
    pub timeframe: Option<Timeframe>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    Lt,
    Gt,
    Lte,
    Gte,
    Eq,
    Ne,
    Between,
    In,
    Exists,
}

impl Operator {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "<" => Some(Operator::Lt),
            ">" => Some(Operator::Gt),
            "<=" => Some(Operator::Lte),
            ">=" => Some(Operator::Gte),
            "=" => Some(Operator::Eq),
            "!=" => Some(Operator::Ne),
            "between" => Some(Operator::Between),
            "in" => Some(Operator::In),
            "exists" => Some(Operator::Exists),
            _ => None,
        }
    }

    /// SQL token for plain comparison operators.
    pub fn sql(&self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Lte => "<=",
            Operator::Gte => ">=",
            Operator::Eq => "=",
            Operator::Ne => "!=",
            // Range, membership and null checks emit their own fragments.
            Operator::Between => "BETWEEN",
            Operator::In => "IN",
            Operator::Exists => "IS",
        }
    }

    /// Ordering comparisons, the only operators the `all`/`any` timeframe
    /// aggregations can be rewritten through.
    pub fn is_ordering(&self) -> bool {
        matches!(
            self,
            Operator::Lt | Operator::Gt | Operator::Lte | Operator::Gte
        )
    }
}

/// Value attached to a condition. Shape is operator-dependent and checked by
/// the validator; no object values exist at any depth.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FilterValue {
    Number(f64),
    Text(String),
    NumberList(Vec<f64>),
    TextList(Vec<String>),
    Flag(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PeriodUnit {
    Quarters,
    Months,
    Years,
}

impl PeriodUnit {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "quarters" => Some(PeriodUnit::Quarters),
            "months" => Some(PeriodUnit::Months),
            "years" => Some(PeriodUnit::Years),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Aggregation {
    Latest,
    Avg,
    Sum,
    Min,
    Max,
    All,
    Any,
}

impl Aggregation {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "latest" => Some(Aggregation::Latest),
            "avg" => Some(Aggregation::Avg),
            "sum" => Some(Aggregation::Sum),
            "min" => Some(Aggregation::Min),
            "max" => Some(Aggregation::Max),
            "all" => Some(Aggregation::All),
            "any" => Some(Aggregation::Any),
            _ => None,
        }
    }
}

/// How to collapse a field's time series into a single comparable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Timeframe {
    pub unit: PeriodUnit,
    pub length: i64,
    pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}
