//! Query runner: executes compiled screens against Postgres.
//!
//! Owns the bounded connection pool. Every execution acquires a connection,
//! applies the statement timeout, runs the parameterized query and lets the
//! pool reclaim the connection on every exit path. Failures are classified
//! into a small taxonomy; raw driver errors are logged server-side and never
//! reach the caller's message.

use crate::compile::{CompiledQuery, SqlParam};
use crate::config::Settings;
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecErrorKind {
    Timeout,
    Schema,
    Connectivity,
    Query,
}

impl ExecErrorKind {
    /// Stable tag for programmatic handling by callers.
    pub fn tag(&self) -> &'static str {
        match self {
            ExecErrorKind::Timeout => "TIMEOUT",
            ExecErrorKind::Schema => "SCHEMA_ERROR",
            ExecErrorKind::Connectivity => "CONNECTION_ERROR",
            ExecErrorKind::Query => "QUERY_ERROR",
        }
    }

    fn user_message(&self) -> &'static str {
        match self {
            ExecErrorKind::Timeout => "Query timed out - please try a more specific filter",
            ExecErrorKind::Schema => "Database schema error",
            ExecErrorKind::Connectivity => "Unable to reach the database",
            ExecErrorKind::Query => "Failed to execute screening query",
        }
    }
}

/// Classified execution failure carrying only a safe, generic message.
#[derive(Debug)]
pub struct ExecError {
    pub kind: ExecErrorKind,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.user_message())
    }
}

impl std::error::Error for ExecError {}

/// One result row: the fixed company summary columns every screen selects.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ScreenRow {
    pub ticker: String,
    pub name: Option<String>,
    pub sector: Option<String>,
    pub exchange: Option<String>,
    pub market_cap: Option<f64>,
}

pub struct ScreenRunner {
    pool: PgPool,
    statement_timeout_ms: u64,
}

impl ScreenRunner {
    /// Connect eagerly, validating the store is reachable at startup.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let pool = Self::pool_options(settings)
            .connect(&settings.database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self {
            pool,
            statement_timeout_ms: settings.statement_timeout_ms,
        })
    }

    /// Build the pool without touching the network; connections are opened
    /// on first use. Used where execution may never happen (explain paths,
    /// tests).
    pub fn connect_lazy(settings: &Settings) -> Result<Self> {
        let pool = Self::pool_options(settings)
            .connect_lazy(&settings.database_url)
            .context("Invalid database URL")?;
        Ok(Self {
            pool,
            statement_timeout_ms: settings.statement_timeout_ms,
        })
    }

    fn pool_options(settings: &Settings) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.acquire_timeout_secs))
    }

    pub async fn execute(&self, compiled: &CompiledQuery) -> Result<Vec<ScreenRow>, ExecError> {
        let mut conn = self.pool.acquire().await.map_err(|e| self.fail(e))?;

        // Hard per-statement ceiling, independent of caller cancellation.
        // The value comes from config, never from user input.
        sqlx::query(&format!(
            "SET statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut *conn)
        .await
        .map_err(|e| self.fail(e))?;

        let mut query = sqlx::query_as::<_, ScreenRow>(&compiled.sql);
        for param in &compiled.params {
            query = match param {
                SqlParam::Number(n) => query.bind(*n),
                SqlParam::Int(i) => query.bind(*i),
                SqlParam::Text(s) => query.bind(s.as_str()),
            };
        }

        let rows = query
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| self.fail(e))?;

        tracing::debug!(rows = rows.len(), "screen query executed");
        Ok(rows)
    }

    /// Log the raw driver error server-side, return only the classification.
    fn fail(&self, error: sqlx::Error) -> ExecError {
        let kind = classify(&error);
        tracing::error!(kind = kind.tag(), error = %error, "screen query failed");
        ExecError { kind }
    }

    pub async fn ping(&self) -> Result<(), ExecError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| self.fail(e))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn classify(error: &sqlx::Error) -> ExecErrorKind {
    match error {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(code) => classify_sqlstate(code),
            None => ExecErrorKind::Query,
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => ExecErrorKind::Connectivity,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => ExecErrorKind::Connectivity,
        _ => ExecErrorKind::Query,
    }
}

/// SQLSTATE → taxonomy. 57014 is Postgres' statement_timeout cancellation;
/// class 42 is syntax/undefined-object; class 08 and 53300 are connection
/// faults.
fn classify_sqlstate(code: &str) -> ExecErrorKind {
    if code == "57014" {
        ExecErrorKind::Timeout
    } else if code.starts_with("42") {
        ExecErrorKind::Schema
    } else if code.starts_with("08") || code == "53300" {
        ExecErrorKind::Connectivity
    } else {
        ExecErrorKind::Query
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statement_timeout() {
        assert_eq!(classify_sqlstate("57014"), ExecErrorKind::Timeout);
    }

    #[test]
    fn classifies_schema_faults() {
        assert_eq!(classify_sqlstate("42P01"), ExecErrorKind::Schema);
        assert_eq!(classify_sqlstate("42703"), ExecErrorKind::Schema);
    }

    #[test]
    fn classifies_connection_faults() {
        assert_eq!(classify_sqlstate("53300"), ExecErrorKind::Connectivity);
        assert_eq!(classify_sqlstate("08006"), ExecErrorKind::Connectivity);
        assert_eq!(classify_sqlstate("08001"), ExecErrorKind::Connectivity);
    }

    #[test]
    fn everything_else_is_generic() {
        assert_eq!(classify_sqlstate("23505"), ExecErrorKind::Query);
        assert_eq!(classify_sqlstate("22012"), ExecErrorKind::Query);
    }

    #[test]
    fn user_messages_never_echo_driver_detail() {
        for kind in [
            ExecErrorKind::Timeout,
            ExecErrorKind::Schema,
            ExecErrorKind::Connectivity,
            ExecErrorKind::Query,
        ] {
            let message = ExecError { kind }.to_string();
            assert!(!message.contains("sqlx"));
            assert!(!message.contains("SQLSTATE"));
        }
    }
}
