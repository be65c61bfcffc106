//! Field catalog: the allowlist of queryable screening metrics.
//!
//! Every logical field name the DSL may reference is mapped here to one
//! physical table/column pair. Anything not in this map is categorically
//! unqueryable; the validator and the compiler both resolve fields through
//! the same catalog, so adding a metric means adding one entry here and
//! nothing else.

use serde::Serialize;
use std::collections::HashMap;

/// Physical tables backing the catalog, identified by their SQL alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TableAlias {
    Companies,
    Fundamentals,
    DebtProfile,
    Cashflow,
    AnalystEstimates,
    PriceHistory,
}

impl TableAlias {
    pub fn alias(&self) -> &'static str {
        match self {
            TableAlias::Companies => "c",
            TableAlias::Fundamentals => "fq",
            TableAlias::DebtProfile => "dp",
            TableAlias::Cashflow => "cf",
            TableAlias::AnalystEstimates => "ae",
            TableAlias::PriceHistory => "ph",
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            TableAlias::Companies => "companies",
            TableAlias::Fundamentals => "fundamentals_quarterly",
            TableAlias::DebtProfile => "debt_profile",
            TableAlias::Cashflow => "cashflow_statements",
            TableAlias::AnalystEstimates => "analyst_estimates",
            TableAlias::PriceHistory => "price_history",
        }
    }

    /// Column that orders the table's periodic facts, for tables that carry
    /// a time series. `None` means the table holds one row per ticker.
    pub fn period_column(&self) -> Option<&'static str> {
        match self {
            TableAlias::Fundamentals | TableAlias::Cashflow => Some("period_end"),
            TableAlias::PriceHistory => Some("trade_date"),
            _ => None,
        }
    }

    /// Whether the table's period column advances quarterly (as opposed to
    /// daily price rows).
    pub fn quarterly(&self) -> bool {
        matches!(self, TableAlias::Fundamentals | TableAlias::Cashflow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone)]
pub struct FieldEntry {
    pub table: TableAlias,
    pub column: &'static str,
    pub kind: ValueKind,
}

impl FieldEntry {
    fn new(table: TableAlias, column: &'static str, kind: ValueKind) -> Self {
        Self {
            table,
            column,
            kind,
        }
    }

    /// Qualified `alias.column` reference for SQL generation.
    pub fn column_ref(&self) -> String {
        format!("{}.{}", self.table.alias(), self.column)
    }

    /// Whether the field is backed by a time series and accepts a timeframe.
    pub fn periodic(&self) -> bool {
        self.table.period_column().is_some()
    }
}

/// Immutable logical-name → physical-location map, loaded once at startup
/// and shared read-only.
pub struct FieldCatalog {
    entries: HashMap<&'static str, FieldEntry>,
}

impl FieldCatalog {
    pub fn load() -> Self {
        use TableAlias::*;
        use ValueKind::*;

        let mut entries = HashMap::new();

        // Companies table
        entries.insert("market_cap", FieldEntry::new(Companies, "market_cap", Numeric));
        entries.insert("sector", FieldEntry::new(Companies, "sector", Text));
        entries.insert("industry", FieldEntry::new(Companies, "industry", Text));
        entries.insert("exchange", FieldEntry::new(Companies, "exchange", Text));

        // Quarterly fundamentals
        entries.insert("revenue", FieldEntry::new(Fundamentals, "revenue", Numeric));
        entries.insert("net_income", FieldEntry::new(Fundamentals, "net_income", Numeric));
        entries.insert("eps", FieldEntry::new(Fundamentals, "eps", Numeric));
        entries.insert(
            "operating_margin",
            FieldEntry::new(Fundamentals, "operating_margin", Numeric),
        );
        entries.insert("roe", FieldEntry::new(Fundamentals, "roe", Numeric));
        entries.insert("roa", FieldEntry::new(Fundamentals, "roa", Numeric));
        entries.insert("pe_ratio", FieldEntry::new(Fundamentals, "pe_ratio", Numeric));
        entries.insert("pb_ratio", FieldEntry::new(Fundamentals, "pb_ratio", Numeric));

        // Debt profile
        entries.insert(
            "short_term_debt",
            FieldEntry::new(DebtProfile, "short_term_debt", Numeric),
        );
        entries.insert(
            "long_term_debt",
            FieldEntry::new(DebtProfile, "long_term_debt", Numeric),
        );
        entries.insert(
            "debt_to_equity",
            FieldEntry::new(DebtProfile, "debt_to_equity", Numeric),
        );

        // Cashflow statements
        entries.insert("cfo", FieldEntry::new(Cashflow, "cfo", Numeric));
        entries.insert("cfi", FieldEntry::new(Cashflow, "cfi", Numeric));
        entries.insert("cff", FieldEntry::new(Cashflow, "cff", Numeric));
        entries.insert("capex", FieldEntry::new(Cashflow, "capex", Numeric));

        // Analyst estimates
        entries.insert(
            "eps_estimate",
            FieldEntry::new(AnalystEstimates, "eps_estimate", Numeric),
        );
        entries.insert(
            "revenue_estimate",
            FieldEntry::new(AnalystEstimates, "revenue_estimate", Numeric),
        );
        entries.insert(
            "price_target_low",
            FieldEntry::new(AnalystEstimates, "price_target_low", Numeric),
        );
        entries.insert(
            "price_target_avg",
            FieldEntry::new(AnalystEstimates, "price_target_avg", Numeric),
        );
        entries.insert(
            "price_target_high",
            FieldEntry::new(AnalystEstimates, "price_target_high", Numeric),
        );

        // Price history
        entries.insert("open", FieldEntry::new(PriceHistory, "open", Numeric));
        entries.insert("high", FieldEntry::new(PriceHistory, "high", Numeric));
        entries.insert("low", FieldEntry::new(PriceHistory, "low", Numeric));
        entries.insert("close", FieldEntry::new(PriceHistory, "close", Numeric));
        entries.insert("volume", FieldEntry::new(PriceHistory, "volume", Numeric));

        Self { entries }
    }

    pub fn lookup(&self, logical_name: &str) -> Option<&FieldEntry> {
        self.entries.get(logical_name)
    }

    /// Sorted logical names, used to enumerate the allowlist (e.g. in the
    /// model translator's system prompt).
    pub fn logical_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_field() {
        let catalog = FieldCatalog::load();
        let entry = catalog.lookup("pe_ratio").unwrap();
        assert_eq!(entry.table, TableAlias::Fundamentals);
        assert_eq!(entry.column_ref(), "fq.pe_ratio");
        assert_eq!(entry.kind, ValueKind::Numeric);
        assert!(entry.periodic());
    }

    #[test]
    fn lookup_unknown_field() {
        let catalog = FieldCatalog::load();
        assert!(catalog.lookup("password_hash").is_none());
        assert!(catalog.lookup("").is_none());
    }

    #[test]
    fn categorical_fields_are_text() {
        let catalog = FieldCatalog::load();
        for name in ["sector", "industry", "exchange"] {
            let entry = catalog.lookup(name).unwrap();
            assert_eq!(entry.kind, ValueKind::Text);
            assert_eq!(entry.table, TableAlias::Companies);
            assert!(!entry.periodic());
        }
    }

    #[test]
    fn periodic_tables() {
        let catalog = FieldCatalog::load();
        assert!(catalog.lookup("cfo").unwrap().periodic());
        assert!(catalog.lookup("close").unwrap().periodic());
        assert!(!catalog.lookup("debt_to_equity").unwrap().periodic());
        assert!(!catalog.lookup("price_target_avg").unwrap().periodic());
    }

    #[test]
    fn logical_names_sorted_and_complete() {
        let catalog = FieldCatalog::load();
        let names = catalog.logical_names();
        assert!(names.windows(2).all(|w| w[0] < w[1]));
        assert!(names.contains(&"pe_ratio"));
        assert!(names.contains(&"volume"));
    }
}
