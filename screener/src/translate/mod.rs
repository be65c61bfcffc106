//! Natural-language → DSL-candidate translation.
//!
//! Both strategies implement the same contract and both are *untrusted*:
//! whatever they emit is a candidate `serde_json::Value` that only the
//! validator may bless. Translation is total over the input space: a query
//! that matches nothing yields the canonical empty filter, so "bad query"
//! is always diagnosed by the validator, in one place.

mod model;
mod rules;

pub use model::ModelTranslator;
pub use rules::RuleTranslator;

use crate::catalog::FieldCatalog;
use crate::config::{Settings, TranslatorKind};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Longest query accepted after sanitization.
pub const MAX_QUERY_CHARS: usize = 1000;

#[async_trait]
pub trait QueryTranslator: Send + Sync {
    /// Convert free text into a DSL candidate. Total: unrecognized input
    /// yields the empty filter, not an error.
    async fn translate(&self, text: &str) -> Result<Value>;

    fn name(&self) -> &'static str;
}

/// The canonical "didn't understand" candidate.
pub fn empty_candidate() -> Value {
    json!({ "filter": {} })
}

/// Trim, strip angle brackets (defense against downstream rendering) and cap
/// the length before the text goes anywhere near a translator or a log line.
pub fn sanitize_query(text: &str) -> String {
    text.trim()
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .take(MAX_QUERY_CHARS)
        .collect()
}

/// Pick the configured strategy. This is the single selection point; no
/// other runtime polymorphism exists between the strategies.
pub fn from_settings(
    settings: &Settings,
    catalog: &FieldCatalog,
) -> Result<Arc<dyn QueryTranslator>> {
    match settings.translator {
        TranslatorKind::Rules => Ok(Arc::new(RuleTranslator::new())),
        TranslatorKind::Model => {
            let model = settings
                .model
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("model translator selected without model settings"))?;
            Ok(Arc::new(ModelTranslator::new(model, catalog)))
        }
    }
}

#[cfg(test)]
mod tests;
