//! Environment-derived settings. `.env` files are honored by the binary
//! before this is read; everything has a development default except the
//! model API key, which is only required when the model translator is
//! selected.

use anyhow::{bail, Context, Result};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorKind {
    Rules,
    Model,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub statement_timeout_ms: u64,
    pub translator: TranslatorKind,
    pub model: Option<ModelSettings>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/screener".to_string());

        let max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "20".to_string())
            .parse::<u32>()
            .unwrap_or(20);

        let acquire_timeout_secs = env::var("DB_ACQUIRE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u64>()
            .unwrap_or(5);

        let statement_timeout_ms = env::var("STATEMENT_TIMEOUT_MS")
            .unwrap_or_else(|_| "30000".to_string())
            .parse::<u64>()
            .unwrap_or(30_000);

        let translator = match env::var("SCREENER_TRANSLATOR")
            .unwrap_or_else(|_| "rules".to_string())
            .as_str()
        {
            "rules" => TranslatorKind::Rules,
            "model" => TranslatorKind::Model,
            other => bail!("Unknown SCREENER_TRANSLATOR value: {other}"),
        };

        let model = match translator {
            TranslatorKind::Model => Some(ModelSettings {
                api_url: env::var("MODEL_API_URL")
                    .unwrap_or_else(|_| "https://api.groq.com/openai/v1".to_string()),
                api_key: env::var("MODEL_API_KEY")
                    .context("MODEL_API_KEY required when SCREENER_TRANSLATOR=model")?,
                model: env::var("MODEL_NAME")
                    .unwrap_or_else(|_| "llama-3.3-70b-versatile".to_string()),
            }),
            TranslatorKind::Rules => None,
        };

        Ok(Self {
            database_url,
            max_connections,
            acquire_timeout_secs,
            statement_timeout_ms,
            translator,
            model,
        })
    }
}
