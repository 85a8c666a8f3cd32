//! Fluxez developer CLI
//!
//! Applies a local schema file to the tenant database.
//!
//! ```text
//! fluxez migrate schema.json [--sync] [--dry-run] [--force]
//! fluxez status
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fluxez::schema::{MigrateOptions, MigrationResult, SchemaDefinition};
use fluxez::{ClientConfig, FluxezClient};

#[derive(Parser, Debug)]
#[command(name = "fluxez", about = "Fluxez developer CLI")]
struct Cli {
    #[arg(long, env = "FLUXEZ_API_KEY", hide_env_values = true)]
    api_key: String,

    #[arg(long, env = "FLUXEZ_BASE_URL", default_value = fluxez::config::DEFAULT_BASE_URL)]
    base_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply a JSON schema definition
    Migrate {
        /// Path to the schema JSON file
        schema: PathBuf,
        /// Replace the live schema instead of diffing against it
        #[arg(long)]
        sync: bool,
        /// Show the planned changes without applying them
        #[arg(long, conflicts_with = "sync")]
        dry_run: bool,
        /// Allow destructive changes
        #[arg(long)]
        force: bool,
    },
    /// Check that the API key is accepted
    Status,
}

fn load_schema(path: &Path) -> Result<SchemaDefinition, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid schema in {}: {}", path.display(), e))
}

fn print_result(result: &MigrationResult) {
    if result.dry_run {
        println!("Dry run, nothing applied.");
    }
    if result.changes.is_empty() {
        println!("Schema is up to date.");
    }
    for change in &result.changes {
        println!("  {}", change);
    }
    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }
    if let Some(id) = &result.migration_id {
        println!("Migration: {}", id);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = ClientConfig::new(cli.api_key).with_base_url(cli.base_url);
    let client = FluxezClient::new(config).map_err(|e| e.to_string())?;

    match cli.command {
        Command::Migrate {
            schema,
            sync,
            dry_run,
            force,
        } => {
            let definition = load_schema(&schema)?;
            let result = if sync {
                client.schema().sync_schema(&definition).await
            } else {
                client
                    .schema()
                    .migrate(&definition, MigrateOptions { dry_run, force })
                    .await
            }
            .map_err(|e| e.to_string())?;
            print_result(&result);
            Ok(())
        }
        Command::Status => {
            if client.auth().validate_api_key().await {
                println!("API key is valid ({})", client.config().base_url);
                Ok(())
            } else {
                Err("API key was rejected".to_string())
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
