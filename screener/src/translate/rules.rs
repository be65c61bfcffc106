//! Deterministic pattern-matching translator.
//!
//! Normalizes the query, splits top-level on "or", splits each branch on
//! "and", then parses each atomic clause with a single pattern capturing
//! `<metric phrase> <operator phrase> <number> [in last <n> <unit>]`.
//! Clauses whose metric phrase has no synonym are dropped rather than
//! failing the whole query: partial understanding beats total failure, and
//! the validator still gets the final say.

use super::{empty_candidate, QueryTranslator};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

static CLAUSE_REGEX: OnceLock<Regex> = OnceLock::new();
static PREAMBLE_REGEX: OnceLock<Regex> = OnceLock::new();
static OR_SPLIT_REGEX: OnceLock<Regex> = OnceLock::new();
static AND_SPLIT_REGEX: OnceLock<Regex> = OnceLock::new();

/// Metric phrase → catalog field. Resolution is exact-then-substring over
/// this list in order; first match wins, no scoring.
const METRIC_SYNONYMS: &[(&str, &str)] = &[
    ("pe ratio", "pe_ratio"),
    ("p/e", "pe_ratio"),
    ("pe", "pe_ratio"),
    ("pb ratio", "pb_ratio"),
    ("p/b", "pb_ratio"),
    ("pb", "pb_ratio"),
    ("roe", "roe"),
    ("return on equity", "roe"),
    ("roa", "roa"),
    ("return on assets", "roa"),
    ("revenue", "revenue"),
    ("net income", "net_income"),
    ("net profit", "net_income"),
    ("eps", "eps"),
    ("earnings per share", "eps"),
    ("operating margin", "operating_margin"),
    ("debt to equity", "debt_to_equity"),
    ("debt equity", "debt_to_equity"),
    ("market cap", "market_cap"),
    ("short term debt", "short_term_debt"),
    ("long term debt", "long_term_debt"),
    ("capex", "capex"),
    ("operating cash flow", "cfo"),
    ("cfo", "cfo"),
    ("volume", "volume"),
    ("price target", "price_target_avg"),
];

/// Operator phrase → DSL operator. Multi-word phrases sit before their
/// prefixes so the regex alternation prefers the longest match.
const OPERATOR_PHRASES: &[(&str, &str)] = &[
    ("less than or equal to", "<="),
    ("greater than or equal to", ">="),
    ("not equal to", "!="),
    ("less than", "<"),
    ("greater than", ">"),
    ("equal to", "="),
    ("at least", ">="),
    ("at most", "<="),
    ("below", "<"),
    ("under", "<"),
    ("above", ">"),
    ("over", ">"),
    ("<=", "<="),
    (">=", ">="),
    ("!=", "!="),
    ("<", "<"),
    (">", ">"),
    ("=", "="),
];

fn clause_regex() -> &'static Regex {
    CLAUSE_REGEX.get_or_init(|| {
        let phrases: Vec<String> = OPERATOR_PHRASES
            .iter()
            .map(|(phrase, _)| regex::escape(phrase))
            .collect();
        Regex::new(&format!(
            r"^(?P<metric>.+?)\s*(?P<op>{})\s*(?P<value>-?\d+(?:\.\d+)?)(?:\s+in\s+last\s+(?P<n>\d+)\s+(?P<unit>quarters?|months?|years?))?\s*$",
            phrases.join("|")
        ))
        .unwrap()
    })
}

fn preamble_regex() -> &'static Regex {
    PREAMBLE_REGEX.get_or_init(|| {
        Regex::new(r"^(?:(?:show|find|get|list|display)\s+)?(?:stocks?|companies?)\s+(?:with|where|having)\s+")
            .unwrap()
    })
}

fn or_split_regex() -> &'static Regex {
    OR_SPLIT_REGEX.get_or_init(|| Regex::new(r"\s+or\s+").unwrap())
}

fn and_split_regex() -> &'static Regex {
    AND_SPLIT_REGEX.get_or_init(|| Regex::new(r"\s+and\s+").unwrap())
}

pub struct RuleTranslator;

impl RuleTranslator {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RuleTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryTranslator for RuleTranslator {
    async fn translate(&self, text: &str) -> Result<Value> {
        Ok(translate_rules(text))
    }

    fn name(&self) -> &'static str {
        "rules"
    }
}

fn translate_rules(text: &str) -> Value {
    let normalized = text.to_lowercase();
    let normalized = normalized.trim();
    if normalized.is_empty() {
        return empty_candidate();
    }

    let branches: Vec<Value> = or_split_regex()
        .split(normalized)
        .filter_map(parse_branch)
        .collect();

    match branches.len() {
        0 => empty_candidate(),
        1 => json!({ "filter": branches.into_iter().next().unwrap() }),
        _ => json!({ "filter": { "or": branches } }),
    }
}

/// Parse one or-branch: conjoined clauses become an `and` group; a branch
/// with a single clause still gets and-wrapped so the document shape is
/// uniform.
fn parse_branch(branch: &str) -> Option<Value> {
    let conditions: Vec<Value> = and_split_regex()
        .split(branch)
        .filter_map(parse_clause)
        .collect();
    if conditions.is_empty() {
        None
    } else {
        Some(json!({ "and": conditions }))
    }
}

fn parse_clause(clause: &str) -> Option<Value> {
    let clause = preamble_regex().replace(clause.trim(), "");
    let captures = clause_regex().captures(clause.trim())?;

    let field = resolve_metric(captures.name("metric")?.as_str())?;
    let operator = resolve_operator(captures.name("op")?.as_str())?;
    let value: f64 = captures.name("value")?.as_str().parse().ok()?;

    let mut condition = json!({
        "field": field,
        "operator": operator,
        "value": number_value(value),
    });

    if let (Some(n), Some(unit)) = (captures.name("n"), captures.name("unit")) {
        let length: i64 = n.as_str().parse().ok()?;
        let unit = match unit.as_str().trim_end_matches('s') {
            "quarter" => "quarters",
            "month" => "months",
            _ => "years",
        };
        condition["timeframe"] = json!({
            "type": unit,
            "period": length,
            "aggregation": "latest",
        });
    }

    Some(condition)
}

/// Exact match first, then substring containment either way; first synonym
/// wins. A miss drops the clause.
fn resolve_metric(phrase: &str) -> Option<&'static str> {
    let phrase = phrase.trim();
    if phrase.is_empty() {
        return None;
    }
    for (synonym, field) in METRIC_SYNONYMS {
        if phrase == *synonym {
            return Some(field);
        }
    }
    for (synonym, field) in METRIC_SYNONYMS {
        if phrase.contains(synonym) || synonym.contains(phrase) {
            return Some(field);
        }
    }
    None
}

fn resolve_operator(phrase: &str) -> Option<&'static str> {
    let phrase = phrase.trim();
    OPERATOR_PHRASES
        .iter()
        .find(|(synonym, _)| phrase == *synonym)
        .map(|(_, op)| *op)
}

/// Keep whole numbers as JSON integers so candidates read like the wire
/// format examples.
fn number_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        json!(value as i64)
    } else {
        json!(value)
    }
}

#[cfg(test)]
pub(super) fn translate_for_tests(text: &str) -> Value {
    translate_rules(text)
}
