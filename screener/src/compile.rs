//! Query compiler: validated DSL → parameterized SQL.
//!
//! The compiler performs no security checks of its own. Its precondition is
//! that the input already passed the validator, which the pipeline
//! guarantees structurally: [`ScreenQuery`](crate::dsl::ScreenQuery) values
//! can only be produced there. Emitted SQL text contains catalog-derived
//! identifiers and `$n` placeholders only; every user value travels through
//! the ordered parameter list.

use crate::catalog::{FieldCatalog, FieldEntry, TableAlias};
use crate::dsl::{
    Aggregation, Condition, FilterNode, FilterValue, Operator, PeriodUnit, ScreenQuery, SortKey,
    Timeframe,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

pub const DEFAULT_LIMIT: i64 = 100;

/// Company summary columns returned for every screen.
const SELECT_COLUMNS: &str = "c.ticker, c.name, c.sector, c.exchange, c.market_cap";

/// Compilation failures are internal-logic faults: validation should make
/// every one of these unreachable, so the pipeline logs them loudly instead
/// of attempting partial execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
}

impl CompileError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compile error: {}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// Bind values in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SqlParam {
    Number(f64),
    Int(i64),
    Text(String),
}

/// A fully compiled screen, built fresh per request and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlParam>,
    pub tables: BTreeSet<TableAlias>,
}

pub struct QueryCompiler {
    catalog: Arc<FieldCatalog>,
}

impl QueryCompiler {
    pub fn new(catalog: Arc<FieldCatalog>) -> Self {
        Self { catalog }
    }

    pub fn compile(&self, query: &ScreenQuery) -> Result<CompiledQuery, CompileError> {
        let mut params = Vec::new();
        let mut tables = BTreeSet::from([TableAlias::Companies]);

        let where_sql = self.filter_sql(&query.filter, &mut params, &mut tables)?;
        let order_sql = self.order_by(&query.sort, &mut tables)?;

        params.push(SqlParam::Int(query.limit.unwrap_or(DEFAULT_LIMIT)));
        let limit_placeholder = params.len();

        let mut from = String::from("companies c");
        for table in &tables {
            if *table == TableAlias::Companies {
                continue;
            }
            from.push_str(&format!(
                "\n  LEFT JOIN {} {} ON c.ticker = {}.ticker",
                table.table_name(),
                table.alias(),
                table.alias()
            ));
        }

        let sql = format!(
            "SELECT {SELECT_COLUMNS}\nFROM {from}\nWHERE {where_sql}\n{order_sql}\nLIMIT ${limit_placeholder}"
        );

        Ok(CompiledQuery {
            sql,
            params,
            tables,
        })
    }

    fn filter_sql(
        &self,
        node: &FilterNode,
        params: &mut Vec<SqlParam>,
        tables: &mut BTreeSet<TableAlias>,
    ) -> Result<String, CompileError> {
        match node {
            FilterNode::And(children) => self.group_sql(children, " AND ", params, tables),
            FilterNode::Or(children) => self.group_sql(children, " OR ", params, tables),
            FilterNode::Not(child) => {
                let inner = self.filter_sql(child, params, tables)?;
                // Groups arrive parenthesized already; leaves need wrapping.
                if matches!(child.as_ref(), FilterNode::Condition(_)) {
                    Ok(format!("NOT ({inner})"))
                } else {
                    Ok(format!("NOT {inner}"))
                }
            }
            FilterNode::Condition(condition) => self.condition_sql(condition, params, tables),
        }
    }

    fn group_sql(
        &self,
        children: &[FilterNode],
        joiner: &str,
        params: &mut Vec<SqlParam>,
        tables: &mut BTreeSet<TableAlias>,
    ) -> Result<String, CompileError> {
        if children.is_empty() {
            return Err(CompileError::new("empty logical group reached the compiler"));
        }
        let parts: Result<Vec<String>, CompileError> = children
            .iter()
            .map(|child| self.filter_sql(child, params, tables))
            .collect();
        Ok(format!("({})", parts?.join(joiner)))
    }

    fn condition_sql(
        &self,
        condition: &Condition,
        params: &mut Vec<SqlParam>,
        tables: &mut BTreeSet<TableAlias>,
    ) -> Result<String, CompileError> {
        let entry = self.catalog.lookup(&condition.field).ok_or_else(|| {
            CompileError::new(format!(
                "unvalidated field reached the compiler: {}",
                condition.field
            ))
        })?;
        tables.insert(entry.table);

        let column = match &condition.timeframe {
            Some(timeframe) => self.windowed_expr(entry, timeframe, condition.operator, params)?,
            None => entry.column_ref(),
        };

        match condition.operator {
            Operator::Lt
            | Operator::Gt
            | Operator::Lte
            | Operator::Gte
            | Operator::Eq
            | Operator::Ne => {
                push_scalar(&condition.value, params)?;
                Ok(format!(
                    "{column} {} ${}",
                    condition.operator.sql(),
                    params.len()
                ))
            }
            Operator::Between => match &condition.value {
                FilterValue::NumberList(bounds) if bounds.len() == 2 => {
                    params.push(SqlParam::Number(bounds[0]));
                    params.push(SqlParam::Number(bounds[1]));
                    let high = params.len();
                    Ok(format!("{column} BETWEEN ${} AND ${high}", high - 1))
                }
                _ => Err(CompileError::new(format!(
                    "between condition on {} lost its bounds",
                    condition.field
                ))),
            },
            Operator::In => {
                let placeholders = match &condition.value {
                    FilterValue::NumberList(items) if !items.is_empty() => {
                        items.iter().map(|n| SqlParam::Number(*n)).collect()
                    }
                    FilterValue::TextList(items) if !items.is_empty() => {
                        items.iter().map(|s| SqlParam::Text(s.clone())).collect()
                    }
                    _ => Vec::new(),
                };
                if placeholders.is_empty() {
                    return Err(CompileError::new(format!(
                        "in condition on {} lost its members",
                        condition.field
                    )));
                }
                let mut refs = Vec::with_capacity(placeholders.len());
                for param in placeholders {
                    params.push(param);
                    refs.push(format!("${}", params.len()));
                }
                Ok(format!("{column} IN ({})", refs.join(", ")))
            }
            Operator::Exists => match condition.value {
                FilterValue::Flag(true) => Ok(format!("{column} IS NOT NULL")),
                FilterValue::Flag(false) => Ok(format!("{column} IS NULL")),
                _ => Err(CompileError::new(format!(
                    "exists condition on {} lost its flag",
                    condition.field
                ))),
            },
        }
    }

    /// Rewrite a timeframed field as a scalar subquery over the trailing
    /// window of the field's periodic table.
    ///
    /// `all`/`any` compile through the min/max duality: "col < v in every
    /// period" holds iff the window maximum does, and dually for the other
    /// direction. The validator restricts those aggregations to ordering
    /// operators for exactly this reason.
    fn windowed_expr(
        &self,
        entry: &FieldEntry,
        timeframe: &Timeframe,
        operator: Operator,
        params: &mut Vec<SqlParam>,
    ) -> Result<String, CompileError> {
        let period_column = entry.table.period_column().ok_or_else(|| {
            CompileError::new(format!(
                "timeframe on non-periodic column {}",
                entry.column
            ))
        })?;
        let table = entry.table.table_name();
        let column = entry.column;

        if timeframe.aggregation == Aggregation::Latest {
            return Ok(format!(
                "(SELECT s.{column} FROM {table} s WHERE s.ticker = c.ticker ORDER BY s.{period_column} DESC LIMIT 1)"
            ));
        }

        let func = match timeframe.aggregation {
            Aggregation::Avg => "AVG",
            Aggregation::Sum => "SUM",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
            Aggregation::All => match operator {
                Operator::Lt | Operator::Lte => "MAX",
                Operator::Gt | Operator::Gte => "MIN",
                _ => {
                    return Err(CompileError::new(
                        "all aggregation with a non-ordering operator reached the compiler",
                    ))
                }
            },
            Aggregation::Any => match operator {
                Operator::Lt | Operator::Lte => "MIN",
                Operator::Gt | Operator::Gte => "MAX",
                _ => {
                    return Err(CompileError::new(
                        "any aggregation with a non-ordering operator reached the compiler",
                    ))
                }
            },
            Aggregation::Latest => unreachable!(),
        };

        params.push(SqlParam::Int(window_rows(entry.table, timeframe)));
        let window = params.len();
        Ok(format!(
            "(SELECT {func}(s.{column}) FROM (SELECT {column} FROM {table} WHERE ticker = c.ticker ORDER BY {period_column} DESC LIMIT ${window}) s)"
        ))
    }

    fn order_by(
        &self,
        sort: &[SortKey],
        tables: &mut BTreeSet<TableAlias>,
    ) -> Result<String, CompileError> {
        if sort.is_empty() {
            return Ok("ORDER BY c.ticker".to_string());
        }
        let mut parts = Vec::with_capacity(sort.len());
        for key in sort {
            // Unresolvable sort fields must fail loudly, not be dropped.
            let entry = self.catalog.lookup(&key.field).ok_or_else(|| {
                CompileError::new(format!("unknown sort field: {}", key.field))
            })?;
            tables.insert(entry.table);
            parts.push(format!("{} {}", entry.column_ref(), key.direction.sql()));
        }
        Ok(format!("ORDER BY {}", parts.join(", ")))
    }
}

fn push_scalar(value: &FilterValue, params: &mut Vec<SqlParam>) -> Result<(), CompileError> {
    match value {
        FilterValue::Number(n) => params.push(SqlParam::Number(*n)),
        FilterValue::Text(s) => params.push(SqlParam::Text(s.clone())),
        other => {
            return Err(CompileError::new(format!(
                "comparison condition lost its scalar value: {other:?}"
            )))
        }
    }
    Ok(())
}

/// Convert a timeframe into a row window for the backing table: quarterly
/// tables hold one row per quarter, price history one row per trading day
/// (21/63/252 rows per month/quarter/year).
fn window_rows(table: TableAlias, timeframe: &Timeframe) -> i64 {
    let n = timeframe.length;
    if table.quarterly() {
        match timeframe.unit {
            PeriodUnit::Quarters => n,
            PeriodUnit::Months => (n + 2) / 3,
            PeriodUnit::Years => n * 4,
        }
    } else {
        match timeframe.unit {
            PeriodUnit::Months => n * 21,
            PeriodUnit::Quarters => n * 63,
            PeriodUnit::Years => n * 252,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::SortDirection;

    fn compiler() -> QueryCompiler {
        QueryCompiler::new(Arc::new(FieldCatalog::load()))
    }

    fn condition(field: &str, operator: Operator, value: FilterValue) -> FilterNode {
        FilterNode::Condition(Condition {
            field: field.to_string(),
            operator,
            value,
            timeframe: None,
        })
    }

    fn query(filter: FilterNode) -> ScreenQuery {
        ScreenQuery {
            filter,
            sort: Vec::new(),
            limit: None,
        }
    }

    #[test]
    fn compiles_single_condition() {
        let compiled = compiler()
            .compile(&query(FilterNode::And(vec![condition(
                "pe_ratio",
                Operator::Lt,
                FilterValue::Number(15.0),
            )])))
            .unwrap();

        assert!(compiled.sql.contains("fq.pe_ratio < $1"));
        assert!(compiled.sql.contains("LEFT JOIN fundamentals_quarterly fq ON c.ticker = fq.ticker"));
        assert_eq!(compiled.params[0], SqlParam::Number(15.0));
        // Default limit rides as the last parameter.
        assert_eq!(compiled.params.last(), Some(&SqlParam::Int(DEFAULT_LIMIT)));
        assert!(!compiled.sql.contains("15"));
    }

    #[test]
    fn compiles_two_conditions_single_join() {
        let compiled = compiler()
            .compile(&query(FilterNode::And(vec![
                condition("pe_ratio", Operator::Lt, FilterValue::Number(15.0)),
                condition("roe", Operator::Gt, FilterValue::Number(20.0)),
            ])))
            .unwrap();

        assert!(compiled.sql.contains("(fq.pe_ratio < $1 AND fq.roe > $2)"));
        assert_eq!(
            &compiled.params[..2],
            &[SqlParam::Number(15.0), SqlParam::Number(20.0)]
        );
        assert_eq!(compiled.sql.matches("fundamentals_quarterly").count(), 1);
    }

    #[test]
    fn join_set_is_minimal() {
        let compiled = compiler()
            .compile(&query(FilterNode::And(vec![
                condition("pe_ratio", Operator::Lt, FilterValue::Number(15.0)),
                condition("debt_to_equity", Operator::Lt, FilterValue::Number(1.0)),
            ])))
            .unwrap();

        assert_eq!(
            compiled.tables,
            BTreeSet::from([
                TableAlias::Companies,
                TableAlias::Fundamentals,
                TableAlias::DebtProfile
            ])
        );
        assert!(!compiled.sql.contains("cashflow_statements"));
        assert!(!compiled.sql.contains("analyst_estimates"));
        assert!(!compiled.sql.contains("price_history"));
    }

    #[test]
    fn sort_fields_extend_the_join_set() {
        let mut q = query(condition("sector", Operator::Eq, FilterValue::Text("Energy".into())));
        q.sort = vec![SortKey {
            field: "pe_ratio".to_string(),
            direction: SortDirection::Asc,
        }];
        let compiled = compiler().compile(&q).unwrap();
        assert!(compiled.tables.contains(&TableAlias::Fundamentals));
        assert!(compiled.sql.contains("ORDER BY fq.pe_ratio ASC"));
    }

    #[test]
    fn compiles_or_not_nesting() {
        let compiled = compiler()
            .compile(&query(FilterNode::Or(vec![
                FilterNode::And(vec![
                    condition("pe_ratio", Operator::Lt, FilterValue::Number(15.0)),
                    condition("roe", Operator::Gt, FilterValue::Number(20.0)),
                ]),
                FilterNode::Not(Box::new(condition(
                    "sector",
                    Operator::Eq,
                    FilterValue::Text("Financials".to_string()),
                ))),
            ])))
            .unwrap();

        assert!(compiled
            .sql
            .contains("((fq.pe_ratio < $1 AND fq.roe > $2) OR NOT (c.sector = $3))"));
        assert_eq!(compiled.params[2], SqlParam::Text("Financials".to_string()));
    }

    #[test]
    fn compiles_between_in_exists_fragments() {
        let compiled = compiler()
            .compile(&query(FilterNode::And(vec![
                condition(
                    "pe_ratio",
                    Operator::Between,
                    FilterValue::NumberList(vec![10.0, 20.0]),
                ),
                condition(
                    "sector",
                    Operator::In,
                    FilterValue::TextList(vec!["Energy".into(), "Utilities".into()]),
                ),
                condition("eps", Operator::Exists, FilterValue::Flag(true)),
                condition("capex", Operator::Exists, FilterValue::Flag(false)),
            ])))
            .unwrap();

        assert!(compiled.sql.contains("fq.pe_ratio BETWEEN $1 AND $2"));
        assert!(compiled.sql.contains("c.sector IN ($3, $4)"));
        assert!(compiled.sql.contains("fq.eps IS NOT NULL"));
        assert!(compiled.sql.contains("cf.capex IS NULL"));
        // exists contributes no parameters: bounds + members + limit only.
        assert_eq!(compiled.params.len(), 5);
    }

    #[test]
    fn explicit_limit_is_parameterized() {
        let mut q = query(condition("pe_ratio", Operator::Lt, FilterValue::Number(15.0)));
        q.limit = Some(50);
        let compiled = compiler().compile(&q).unwrap();
        assert!(compiled.sql.ends_with("LIMIT $2"));
        assert_eq!(compiled.params[1], SqlParam::Int(50));
        assert!(!compiled.sql.contains("50"));
    }

    #[test]
    fn compilation_is_idempotent() {
        let q = ScreenQuery {
            filter: FilterNode::And(vec![
                condition("pe_ratio", Operator::Lt, FilterValue::Number(15.0)),
                condition("cfo", Operator::Gt, FilterValue::Number(0.0)),
            ]),
            sort: vec![SortKey {
                field: "market_cap".to_string(),
                direction: SortDirection::Desc,
            }],
            limit: Some(25),
        };
        let compiler = compiler();
        let first = compiler.compile(&q).unwrap();
        let second = compiler.compile(&q).unwrap();
        assert_eq!(first.sql, second.sql);
        assert_eq!(first.params, second.params);
    }

    #[test]
    fn no_user_literal_reaches_sql_text() {
        let compiled = compiler()
            .compile(&query(FilterNode::And(vec![
                condition("sector", Operator::Eq, FilterValue::Text("'; DROP TABLE companies; --".into())),
                condition("pe_ratio", Operator::Lt, FilterValue::Number(13.37)),
            ])))
            .unwrap();
        assert!(!compiled.sql.contains("DROP TABLE"));
        assert!(!compiled.sql.contains("13.37"));
        assert_eq!(
            compiled.params[0],
            SqlParam::Text("'; DROP TABLE companies; --".to_string())
        );
    }

    #[test]
    fn unknown_field_fails_loudly() {
        let err = compiler()
            .compile(&query(condition(
                "totally_unknown",
                Operator::Lt,
                FilterValue::Number(1.0),
            )))
            .unwrap_err();
        assert!(err.message.contains("unvalidated field"));
    }

    #[test]
    fn timeframe_latest_uses_window_of_one() {
        let compiled = compiler()
            .compile(&query(FilterNode::Condition(Condition {
                field: "eps".to_string(),
                operator: Operator::Gt,
                value: FilterValue::Number(1.0),
                timeframe: Some(Timeframe {
                    unit: PeriodUnit::Quarters,
                    length: 1,
                    aggregation: Aggregation::Latest,
                }),
            })))
            .unwrap();

        assert!(compiled.sql.contains(
            "(SELECT s.eps FROM fundamentals_quarterly s WHERE s.ticker = c.ticker ORDER BY s.period_end DESC LIMIT 1) > $1"
        ));
    }

    #[test]
    fn timeframe_avg_parameterizes_the_window() {
        let compiled = compiler()
            .compile(&query(FilterNode::Condition(Condition {
                field: "revenue".to_string(),
                operator: Operator::Gt,
                value: FilterValue::Number(1_000_000.0),
                timeframe: Some(Timeframe {
                    unit: PeriodUnit::Years,
                    length: 2,
                    aggregation: Aggregation::Avg,
                }),
            })))
            .unwrap();

        // Two years of quarterly facts = 8 rows; window rides before the
        // comparison value in the parameter order.
        assert!(compiled.sql.contains("AVG(s.revenue)"));
        assert!(compiled.sql.contains("LIMIT $1"));
        assert_eq!(compiled.params[0], SqlParam::Int(8));
        assert_eq!(compiled.params[1], SqlParam::Number(1_000_000.0));
        assert!(compiled.sql.contains("> $2"));
    }

    #[test]
    fn timeframe_all_compiles_through_duality() {
        let compiled = compiler()
            .compile(&query(FilterNode::Condition(Condition {
                field: "eps".to_string(),
                operator: Operator::Gt,
                value: FilterValue::Number(0.0),
                timeframe: Some(Timeframe {
                    unit: PeriodUnit::Quarters,
                    length: 4,
                    aggregation: Aggregation::All,
                }),
            })))
            .unwrap();

        // Every quarter above zero iff the window minimum is.
        assert!(compiled.sql.contains("MIN(s.eps)"));
        assert_eq!(compiled.params[0], SqlParam::Int(4));
    }
}
