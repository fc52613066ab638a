//! pg-mcp CLI Entry Point
//!
//! Subcommands:
//! - `serve` - MCP server over stdio (for AI agent integration)
//! - `query` - Answer one natural-language question and exit
//! - `validate` - Check SQL against the configured policy, offline
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pg_mcp::config::{self, AppConfig};
use pg_mcp::engine::millis;
use pg_mcp::output::{
    answer_envelope, ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope, ValidationReport,
};
use pg_mcp::{
    OpenAiClient, PoolRegistry, PostgresDriver, QueryOrchestrator, QueryRequest, SqlGenerator,
    SqlValidator,
};

const ENGINE: &str = "postgres";
const LOG_ENV: &str = "PG_MCP_LOG";

type Orchestrator = QueryOrchestrator<PostgresDriver, OpenAiClient>;

/// pg-mcp - Natural-language queries over validated, pooled PostgreSQL connections
#[derive(Parser)]
#[command(name = "pg-mcp")]
#[command(about = "Natural-language to SQL MCP server with validated, pooled PostgreSQL execution")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to .pg-mcp/config.json, then the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server on stdio
    Serve,

    /// Answer a natural-language question
    Query {
        /// Registered database name
        #[arg(long)]
        database: String,

        /// The question
        question: String,
    },

    /// Validate SQL against a database's policy without running it
    Validate {
        /// Database whose policy applies
        #[arg(long)]
        database: String,

        /// SQL to validate
        sql: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            let info = ErrorInfo::new("INTERNAL_ERROR", e.to_string());
            print_json(&ErrorEnvelope::new(ENGINE, "serve", info));
            ExitCode::FAILURE
        }
    }
}

/// Structured logs on stderr, filtered by `PG_MCP_LOG` (default `info`)
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Commands::Serve => serve(cli.config).await,
        Commands::Query { database, question } => query(cli.config, database, question).await,
        Commands::Validate { database, sql } => Ok(validate(cli.config, &database, &sql)),
    }
}

async fn serve(config_path: Option<PathBuf>) -> Result<ExitCode> {
    let config = match config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => return Ok(fail("serve", e.error_code(), &e.to_string())),
    };
    let orchestrator = match build_orchestrator(&config, "serve").await {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(code) => return Ok(code),
    };
    let registry = Arc::clone(orchestrator.registry());

    let served = tokio::select! {
        result = pg_mcp::mcp::serve(orchestrator) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    };

    registry.close_all().await;
    served.map(|()| ExitCode::SUCCESS)
}

async fn query(
    config_path: Option<PathBuf>,
    database: String,
    question: String,
) -> Result<ExitCode> {
    let config = match config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => return Ok(fail("query", e.error_code(), &e.to_string())),
    };
    let orchestrator = match build_orchestrator(&config, "query").await {
        Ok(orchestrator) => orchestrator,
        Err(code) => return Ok(code),
    };

    let token = CancellationToken::new();
    let interrupt = token.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let outcome = orchestrator.run_cancellable(QueryRequest::new(question, database), token).await;
    watcher.abort();
    orchestrator.registry().close_all().await;

    Ok(match outcome {
        Ok(answer) => {
            print_json(&answer_envelope(ENGINE, "query", answer));
            ExitCode::SUCCESS
        }
        Err(e) => {
            print_json(&ErrorEnvelope::from_error(ENGINE, "query", &e));
            ExitCode::FAILURE
        }
    })
}

/// Offline validation; a missing configuration falls back to the default policy
fn validate(config_path: Option<PathBuf>, database: &str, sql: &str) -> ExitCode {
    let config = match config_path {
        Some(path) => config::load(Some(&path)),
        None => match config::resolve_config_path(None) {
            Ok((_, path)) => config::load_config(&path),
            Err(_) => {
                tracing::debug!("No configuration found, using the default read-only policy");
                Ok(AppConfig::default())
            }
        },
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => return fail("validate", e.error_code(), &e.to_string()),
    };

    let policy = config.database_policies().remove(database).unwrap_or(config.policy);

    let start = Instant::now();
    let report = ValidationReport::from(SqlValidator::standard().validate(sql, &policy));
    let meta = Metadata::new(millis(start.elapsed()));
    print_json(&SuccessEnvelope::new(ENGINE, "validate", report, meta));
    ExitCode::SUCCESS
}

/// Wire the registry, generator and validator from configuration
///
/// On failure the error envelope is already printed and every pool created
/// so far is closed.
async fn build_orchestrator(
    config: &AppConfig,
    command: &str,
) -> std::result::Result<Orchestrator, ExitCode> {
    let databases = config
        .resolve_databases()
        .map_err(|e| fail(command, e.error_code(), &e.to_string()))?;

    let client = OpenAiClient::from_config(config.completion.clone())
        .map_err(|e| fail(command, "CONFIG_ERROR", &e.to_string()))?;

    if databases.is_empty() {
        tracing::warn!("No databases configured");
    }

    let registry = Arc::new(PoolRegistry::new(PostgresDriver));
    if let Err(e) = registry.create_pools(databases).await {
        registry.close_all().await;
        return Err(fail(command, e.error_code(), &e.to_string()));
    }

    let generator = SqlGenerator::new(client, config.orchestrator.generation_timeout());
    let mut orchestrator = QueryOrchestrator::new(
        registry,
        generator,
        SqlValidator::standard(),
        config.policy.clone(),
        config.orchestrator.clone(),
    );
    for (database, policy) in config.database_policies() {
        orchestrator = orchestrator.with_database_policy(database, policy);
    }

    Ok(orchestrator)
}

fn fail(command: &str, code: &str, message: &str) -> ExitCode {
    print_json(&ErrorEnvelope::new(ENGINE, command, ErrorInfo::new(code, message)));
    ExitCode::FAILURE
}

fn print_json(value: &impl Serialize) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::error!(error = %e, "Failed to serialize output"),
    }
}
