//! DSL validator: the mandatory checkpoint between translation and
//! compilation.
//!
//! Input is an untrusted `serde_json::Value` candidate (from either
//! translator strategy or a caller-supplied document). Output is either a
//! fully typed [`ScreenQuery`] or the complete list of reasons the document
//! was rejected. Validation never mutates semantics and never partially
//! accepts: one error anywhere rejects the whole document.
//!
//! Unrecognized keys fail closed at every level, so a translator cannot
//! smuggle in query capabilities the catalog and operator allowlist do not
//! know.

use crate::catalog::{FieldCatalog, FieldEntry, ValueKind};
use crate::dsl::{
    Aggregation, Condition, FilterNode, FilterValue, Operator, PeriodUnit, ScreenQuery,
    SortDirection, SortKey, Timeframe,
};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub const MAX_LIMIT: i64 = 1000;
pub const MAX_TIMEFRAME_PERIODS: i64 = 40;

const TOP_LEVEL_KEYS: &[&str] = &["filter", "sort", "limit"];
const CONDITION_KEYS: &[&str] = &["field", "operator", "value", "timeframe", "period"];
const SORT_KEYS: &[&str] = &["field", "direction"];

/// All reasons a candidate document was rejected, collected in one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    reasons: Vec<String>,
}

impl ValidationErrors {
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reasons.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

pub struct DslValidator {
    catalog: Arc<FieldCatalog>,
}

impl DslValidator {
    pub fn new(catalog: Arc<FieldCatalog>) -> Self {
        Self { catalog }
    }

    /// Validate a candidate document and construct the typed query.
    ///
    /// Errors are collected rather than short-circuited so the caller can
    /// report every problem at once.
    pub fn validate(&self, candidate: &Value) -> Result<ScreenQuery, ValidationErrors> {
        let mut errors = Vec::new();

        let Some(doc) = candidate.as_object() else {
            return Err(ValidationErrors {
                reasons: vec!["Query document must be a JSON object".to_string()],
            });
        };

        for key in doc.keys() {
            if !TOP_LEVEL_KEYS.contains(&key.as_str()) {
                errors.push(format!("Unknown top-level key: {key}"));
            }
        }

        let filter = match doc.get("filter") {
            Some(Value::Object(map)) if map.is_empty() => {
                // The translators' canonical "didn't understand" output.
                errors.push("Query has no recognizable conditions".to_string());
                None
            }
            Some(value) => self.filter_node(value, &mut errors),
            None => {
                errors.push("Query document must contain a filter block".to_string());
                None
            }
        };

        let sort = match doc.get("sort") {
            Some(value) => self.sort_keys(value, &mut errors),
            None => Vec::new(),
        };

        let limit = match doc.get("limit") {
            Some(value) => match value.as_i64() {
                Some(n) if (1..=MAX_LIMIT).contains(&n) => Some(n),
                _ => {
                    errors.push(format!(
                        "Limit must be an integer between 1 and {MAX_LIMIT}"
                    ));
                    None
                }
            },
            None => None,
        };

        match (errors.is_empty(), filter) {
            (true, Some(filter)) => Ok(ScreenQuery {
                filter,
                sort,
                limit,
            }),
            _ => Err(ValidationErrors { reasons: errors }),
        }
    }

    fn filter_node(&self, value: &Value, errors: &mut Vec<String>) -> Option<FilterNode> {
        let Some(node) = value.as_object() else {
            errors.push("Filter node must be an object".to_string());
            return None;
        };

        let logical: Vec<&str> = ["and", "or", "not"]
            .into_iter()
            .filter(|k| node.contains_key(*k))
            .collect();
        let is_condition = node.contains_key("field") || node.contains_key("operator");

        if logical.len() + usize::from(is_condition) != 1 {
            errors.push(
                "Filter node must contain exactly one of and/or/not or a field condition"
                    .to_string(),
            );
            return None;
        }

        if is_condition {
            return self.condition(node, errors).map(FilterNode::Condition);
        }

        let key = logical[0];
        for other in node.keys() {
            if other != key {
                errors.push(format!("Unknown key in filter node: {other}"));
            }
        }

        match key {
            "not" => {
                let child = node.get("not").unwrap();
                if !child.is_object() {
                    errors.push("'not' must contain a single condition or group".to_string());
                    return None;
                }
                self.filter_node(child, errors)
                    .map(|n| FilterNode::Not(Box::new(n)))
            }
            _ => {
                let Some(items) = node.get(key).unwrap().as_array() else {
                    errors.push(format!("'{key}' must contain an array"));
                    return None;
                };
                if items.is_empty() {
                    errors.push(format!("'{key}' array cannot be empty"));
                    return None;
                }
                let children: Vec<Option<FilterNode>> = items
                    .iter()
                    .map(|item| self.filter_node(item, errors))
                    .collect();
                let children: Option<Vec<FilterNode>> = children.into_iter().collect();
                children.map(|c| match key {
                    "and" => FilterNode::And(c),
                    _ => FilterNode::Or(c),
                })
            }
        }
    }

    fn condition(&self, node: &Map<String, Value>, errors: &mut Vec<String>) -> Option<Condition> {
        for key in node.keys() {
            if !CONDITION_KEYS.contains(&key.as_str()) {
                errors.push(format!("Unknown key in condition: {key}"));
            }
        }

        let field = match node.get("field").and_then(Value::as_str) {
            Some(f) => f,
            None => {
                errors.push("Condition must have a field".to_string());
                return None;
            }
        };

        let entry = self.catalog.lookup(field);
        if entry.is_none() {
            errors.push(format!("Invalid field: {field}"));
        }

        let operator = match node.get("operator").and_then(Value::as_str) {
            Some(op) => match Operator::parse(op) {
                Some(op) => Some(op),
                None => {
                    errors.push(format!("Invalid operator: {op}"));
                    None
                }
            },
            None => {
                errors.push("Condition must have an operator".to_string());
                None
            }
        };

        let value = match (operator, entry) {
            (Some(op), Some(entry)) => self.condition_value(field, op, entry, node, errors),
            _ => None,
        };

        let timeframe = self.timeframe(field, operator, entry, node, errors);

        match (operator, value) {
            (Some(operator), Some(value)) if errors.is_empty() => Some(Condition {
                field: field.to_string(),
                operator,
                value,
                timeframe,
            }),
            _ => None,
        }
    }

    /// Check the operator-specific value contract and convert to the typed
    /// representation. This is the single place value shapes are enforced;
    /// the compiler never re-derives them.
    fn condition_value(
        &self,
        field: &str,
        operator: Operator,
        entry: &FieldEntry,
        node: &Map<String, Value>,
        errors: &mut Vec<String>,
    ) -> Option<FilterValue> {
        let raw = node.get("value");

        if operator == Operator::Exists {
            return match raw.and_then(Value::as_bool) {
                Some(flag) => Some(FilterValue::Flag(flag)),
                None => {
                    errors.push(format!(
                        "Exists operator requires a boolean value for field {field}"
                    ));
                    None
                }
            };
        }

        let Some(raw) = raw else {
            errors.push(format!("Missing value for field: {field}"));
            return None;
        };

        match operator {
            Operator::Between => {
                let bounds = raw.as_array().and_then(|items| {
                    let nums: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                    nums.filter(|n| n.len() == 2)
                });
                match bounds {
                    Some(b) if b[0] < b[1] => {
                        if entry.kind != ValueKind::Numeric {
                            errors.push(format!("Field {field} is not numeric"));
                            return None;
                        }
                        Some(FilterValue::NumberList(b))
                    }
                    Some(_) => {
                        errors.push(format!(
                            "Between bounds for {field} must satisfy min < max"
                        ));
                        None
                    }
                    None => {
                        errors.push(format!(
                            "Between operator requires a [min, max] pair of numbers for field {field}"
                        ));
                        None
                    }
                }
            }
            Operator::In => {
                let Some(items) = raw.as_array().filter(|items| !items.is_empty()) else {
                    errors.push(format!(
                        "In operator requires a non-empty array for field {field}"
                    ));
                    return None;
                };
                match entry.kind {
                    ValueKind::Numeric => {
                        let nums: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                        match nums {
                            Some(nums) => Some(FilterValue::NumberList(nums)),
                            None => {
                                errors.push(format!(
                                    "In values for numeric field {field} must all be numbers"
                                ));
                                None
                            }
                        }
                    }
                    ValueKind::Text => {
                        let texts: Option<Vec<String>> = items
                            .iter()
                            .map(|v| v.as_str().map(str::to_string))
                            .collect();
                        match texts {
                            Some(texts) => Some(FilterValue::TextList(texts)),
                            None => {
                                errors.push(format!(
                                    "In values for field {field} must all be strings"
                                ));
                                None
                            }
                        }
                    }
                }
            }
            Operator::Eq | Operator::Ne => match entry.kind {
                ValueKind::Numeric => match raw.as_f64() {
                    Some(n) => Some(FilterValue::Number(n)),
                    None => {
                        errors.push(format!("Field {field} requires a numeric value"));
                        None
                    }
                },
                ValueKind::Text => match raw.as_str() {
                    Some(s) => Some(FilterValue::Text(s.to_string())),
                    None => {
                        errors.push(format!("Field {field} requires a string value"));
                        None
                    }
                },
            },
            // Ordering comparisons are numeric-only.
            _ => {
                if entry.kind != ValueKind::Numeric {
                    errors.push(format!("Field {field} is not numeric"));
                    return None;
                }
                match raw.as_f64() {
                    Some(n) => Some(FilterValue::Number(n)),
                    None => {
                        errors.push(format!("Field {field} requires a numeric value"));
                        None
                    }
                }
            }
        }
    }

    /// Validate the optional timeframe/period sub-object.
    ///
    /// Two spellings are accepted, matching the wire formats in circulation:
    /// `timeframe: {type, period, aggregation}` and `period: {unit, last,
    /// aggregation}`. Aggregation defaults to `latest` when absent.
    fn timeframe(
        &self,
        field: &str,
        operator: Option<Operator>,
        entry: Option<&FieldEntry>,
        node: &Map<String, Value>,
        errors: &mut Vec<String>,
    ) -> Option<Timeframe> {
        let (raw, unit_key, length_key) = match (node.get("timeframe"), node.get("period")) {
            (Some(_), Some(_)) => {
                errors.push(format!(
                    "Condition on {field} cannot carry both timeframe and period"
                ));
                return None;
            }
            (Some(tf), None) => (tf, "type", "period"),
            (None, Some(p)) => (p, "unit", "last"),
            (None, None) => return None,
        };

        let Some(obj) = raw.as_object() else {
            errors.push(format!("Timeframe for {field} must be an object"));
            return None;
        };

        for key in obj.keys() {
            if key != unit_key && key != length_key && key != "aggregation" {
                errors.push(format!("Unknown key in timeframe: {key}"));
            }
        }

        let unit = match obj.get(unit_key).and_then(Value::as_str) {
            Some(u) => match PeriodUnit::parse(u) {
                Some(u) => Some(u),
                None => {
                    errors.push(format!("Invalid timeframe unit: {u}"));
                    None
                }
            },
            None => {
                errors.push(format!("Timeframe for {field} must declare a unit"));
                None
            }
        };

        let length = match obj.get(length_key).and_then(Value::as_i64) {
            Some(n) if (1..=MAX_TIMEFRAME_PERIODS).contains(&n) => Some(n),
            _ => {
                errors.push(format!(
                    "Timeframe window for {field} must be an integer between 1 and {MAX_TIMEFRAME_PERIODS}"
                ));
                None
            }
        };

        let aggregation = match obj.get("aggregation") {
            Some(value) => match value.as_str().and_then(Aggregation::parse) {
                Some(agg) => Some(agg),
                None => {
                    errors.push(format!("Invalid timeframe aggregation for {field}"));
                    None
                }
            },
            None => Some(Aggregation::Latest),
        };

        if let Some(entry) = entry {
            if !entry.periodic() {
                errors.push(format!("Field {field} does not carry a time series"));
            }
        }

        if let (Some(agg @ (Aggregation::All | Aggregation::Any)), Some(op)) =
            (aggregation, operator)
        {
            if !op.is_ordering() {
                errors.push(format!(
                    "Timeframe aggregation {agg:?} on {field} requires an ordering operator"
                ));
            }
        }

        match (unit, length, aggregation) {
            (Some(unit), Some(length), Some(aggregation)) => Some(Timeframe {
                unit,
                length,
                aggregation,
            }),
            _ => None,
        }
    }

    fn sort_keys(&self, value: &Value, errors: &mut Vec<String>) -> Vec<SortKey> {
        let Some(items) = value.as_array() else {
            errors.push("Sort must be an array".to_string());
            return Vec::new();
        };

        let mut keys = Vec::with_capacity(items.len());
        for item in items {
            let Some(entry) = item.as_object() else {
                errors.push("Sort entry must be an object".to_string());
                continue;
            };
            for key in entry.keys() {
                if !SORT_KEYS.contains(&key.as_str()) {
                    errors.push(format!("Unknown key in sort entry: {key}"));
                }
            }
            let Some(field) = entry.get("field").and_then(Value::as_str) else {
                errors.push("Sort entry must have a field".to_string());
                continue;
            };
            if self.catalog.lookup(field).is_none() {
                errors.push(format!("Invalid sort field: {field}"));
                continue;
            }
            let direction = match entry.get("direction").and_then(Value::as_str) {
                Some(d) if d.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                Some(d) if d.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                Some(d) => {
                    errors.push(format!("Invalid sort direction: {d}"));
                    continue;
                }
                None => SortDirection::Asc,
            };
            keys.push(SortKey {
                field: field.to_string(),
                direction,
            });
        }
        keys
    }
}
