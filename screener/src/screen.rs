//! Pipeline entry point: text or DSL document in, rows out.
//!
//! The stages run strictly in order (translate, validate, compile, execute)
//! and the validator is the mandatory checkpoint: the compiler only ever
//! sees documents the validator constructed. Translation and validation
//! failures are client-input problems; compile failures are internal logic
//! faults; execution failures carry only their classification.

use crate::compile::{CompiledQuery, QueryCompiler};
use crate::run::{ExecError, ScreenRow, ScreenRunner};
use crate::translate::{sanitize_query, QueryTranslator};
use crate::validate::{DslValidator, ValidationErrors};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Incoming screen: free text (routed through the translator) or a
/// pre-formed DSL document (straight to the validator).
#[derive(Debug, Clone)]
pub enum ScreenRequest {
    Text(String),
    Document(Value),
}

#[derive(Debug, Serialize)]
pub struct ScreenOutcome {
    pub results: Vec<ScreenRow>,
    pub count: usize,
    pub elapsed_ms: u64,
    pub correlation_id: Uuid,
}

#[derive(Debug)]
pub enum ScreenError {
    /// Structural or allowlist violation; carries every reason at once.
    InvalidQuery(ValidationErrors),
    /// Internal logic fault (compile errors, translator transport bugs).
    Internal(anyhow::Error),
    /// Classified execution failure with a safe message.
    Execution(ExecError),
}

impl fmt::Display for ScreenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenError::InvalidQuery(errors) => write!(f, "invalid query: {errors}"),
            ScreenError::Internal(_) => write!(f, "internal screener error"),
            ScreenError::Execution(error) => write!(f, "{error}"),
        }
    }
}

impl std::error::Error for ScreenError {}

impl From<ValidationErrors> for ScreenError {
    fn from(errors: ValidationErrors) -> Self {
        ScreenError::InvalidQuery(errors)
    }
}

impl From<ExecError> for ScreenError {
    fn from(error: ExecError) -> Self {
        ScreenError::Execution(error)
    }
}

pub struct ScreenerService {
    translator: Arc<dyn QueryTranslator>,
    validator: DslValidator,
    compiler: QueryCompiler,
    runner: ScreenRunner,
}

impl ScreenerService {
    pub fn new(
        translator: Arc<dyn QueryTranslator>,
        validator: DslValidator,
        compiler: QueryCompiler,
        runner: ScreenRunner,
    ) -> Self {
        Self {
            translator,
            validator,
            compiler,
            runner,
        }
    }

    /// Run the full pipeline for one request.
    pub async fn run_screen(&self, request: ScreenRequest) -> Result<ScreenOutcome, ScreenError> {
        let correlation_id = Uuid::new_v4();
        let started = Instant::now();

        let compiled = self.compile_request(request, correlation_id).await?;
        let results = self.runner.execute(&compiled).await.map_err(|error| {
            tracing::error!(%correlation_id, kind = error.kind.tag(), "screen execution failed");
            ScreenError::from(error)
        })?;

        let outcome = ScreenOutcome {
            count: results.len(),
            results,
            elapsed_ms: started.elapsed().as_millis() as u64,
            correlation_id,
        };
        tracing::info!(
            %correlation_id,
            count = outcome.count,
            elapsed_ms = outcome.elapsed_ms,
            "screen completed"
        );
        Ok(outcome)
    }

    /// Translate, validate and compile without executing. The CLI uses this
    /// to show the SQL a query would run; tests use it to exercise the pure
    /// stages end to end.
    pub async fn explain(&self, request: ScreenRequest) -> Result<CompiledQuery, ScreenError> {
        self.compile_request(request, Uuid::new_v4()).await
    }

    async fn compile_request(
        &self,
        request: ScreenRequest,
        correlation_id: Uuid,
    ) -> Result<CompiledQuery, ScreenError> {
        let candidate = match request {
            ScreenRequest::Text(text) => {
                let query = sanitize_query(&text);
                tracing::debug!(%correlation_id, query = %query, translator = self.translator.name(), "translating query");
                let candidate = self
                    .translator
                    .translate(&query)
                    .await
                    .map_err(ScreenError::Internal)?;
                tracing::debug!(%correlation_id, candidate = %candidate, "translation produced candidate");
                candidate
            }
            ScreenRequest::Document(value) => value,
        };

        let validated = self.validator.validate(&candidate).map_err(|errors| {
            tracing::info!(%correlation_id, reasons = %errors, "query rejected by validator");
            ScreenError::from(errors)
        })?;

        self.compiler.compile(&validated).map_err(|error| {
            // Unreachable if validation held; worth a loud record if not.
            tracing::error!(%correlation_id, error = %error, "compile failed on validated query");
            ScreenError::Internal(anyhow::Error::new(error))
        })
    }

    pub async fn ping(&self) -> Result<(), ExecError> {
        self.runner.ping().await
    }

    pub async fn shutdown(&self) {
        self.runner.close().await;
    }
}
