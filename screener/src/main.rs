use anyhow::Result;
use clap::{Parser, Subcommand};
use screener::catalog::FieldCatalog;
use screener::compile::QueryCompiler;
use screener::config::Settings;
use screener::run::ScreenRunner;
use screener::screen::{ScreenError, ScreenRequest, ScreenerService};
use screener::translate;
use screener::validate::DslValidator;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "screener-cli")]
#[command(about = "Stock screener query pipeline CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a screen from free text or an inline JSON DSL document
    Screen {
        /// The query, e.g. "PE less than 15 and ROE greater than 20"
        query: Vec<String>,
    },
    /// Compile a query and print the SQL and parameters without executing
    Explain {
        query: Vec<String>,
    },
    /// Check database connectivity
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load .env file if it exists
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    match cli.command {
        Commands::Screen { query } => {
            let service = build_service(&settings, false).await?;
            let request = parse_request(&query.join(" "))?;
            match service.run_screen(request).await {
                Ok(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                Err(error) => {
                    report_error(&error);
                    service.shutdown().await;
                    std::process::exit(1);
                }
            }
            service.shutdown().await;
        }
        Commands::Explain { query } => {
            let service = build_service(&settings, true).await?;
            let request = parse_request(&query.join(" "))?;
            match service.explain(request).await {
                Ok(compiled) => {
                    println!("{}", serde_json::to_string_pretty(&compiled)?);
                }
                Err(error) => {
                    report_error(&error);
                    std::process::exit(1);
                }
            }
        }
        Commands::Check => {
            let service = build_service(&settings, false).await?;
            service.ping().await?;
            println!("database connection OK");
            service.shutdown().await;
        }
    }

    Ok(())
}

async fn build_service(settings: &Settings, lazy: bool) -> Result<ScreenerService> {
    let catalog = Arc::new(FieldCatalog::load());
    let translator = translate::from_settings(settings, &catalog)?;
    let runner = if lazy {
        ScreenRunner::connect_lazy(settings)?
    } else {
        ScreenRunner::connect(settings).await?
    };
    Ok(ScreenerService::new(
        translator,
        DslValidator::new(catalog.clone()),
        QueryCompiler::new(catalog),
        runner,
    ))
}

/// An argument that parses as a JSON object is a pre-formed DSL document;
/// everything else is treated as free text.
fn parse_request(raw: &str) -> Result<ScreenRequest> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("query cannot be empty");
    }
    if trimmed.starts_with('{') {
        let document = serde_json::from_str(trimmed)?;
        Ok(ScreenRequest::Document(document))
    } else {
        Ok(ScreenRequest::Text(trimmed.to_string()))
    }
}

fn report_error(error: &ScreenError) {
    let payload = match error {
        ScreenError::InvalidQuery(errors) => json!({
            "error": "invalid_query",
            "reasons": errors.reasons(),
        }),
        ScreenError::Internal(_) => json!({
            "error": "internal",
            "message": "internal screener error",
        }),
        ScreenError::Execution(exec) => json!({
            "error": "execution",
            "kind": exec.kind.tag(),
            "message": exec.to_string(),
        }),
    };
    eprintln!("{payload}");
}
