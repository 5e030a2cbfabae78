//! Tandem CLI - inspect and edit synchronized resources
//!
//! Works directly against the local libSQL database used by the sync engine.

mod cli;
mod commands;
mod error;


use clap::Parser;
use tandem_core::config::ConfigError;
use tandem_core::{EngineConfig, ResourceKey};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::apply::run_apply;
use crate::commands::common::resolve_db_path;
use crate::commands::history::run_history;
use crate::commands::init::run_init;
use crate::commands::show::{run_show, run_version};
use crate::commands::verify::run_verify;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(error.exit_code());
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let directive = "tandem=info"
        .parse::<Directive>()
        .map_err(|error| ConfigError::Invalid(format!("log directive: {error}")))?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::from_env()?;
    let db_path = resolve_db_path(cli.db_path, &config);
    tracing::debug!("Using database {}", db_path.display());

    match cli.command {
        Commands::Init {
            resource_type,
            id,
            data,
            user,
        } => {
            run_init(
                resource_type.into(),
                &id,
                data.as_deref(),
                &user,
                &db_path,
                &config,
            )
            .await?;
        }
        Commands::Apply {
            operation,
            file,
            client,
            json,
        } => {
            run_apply(
                operation.as_deref(),
                file.as_deref(),
                &client,
                json,
                &db_path,
                &config,
            )
            .await?;
        }
        Commands::Show { resource_type, id } => {
            run_show(&ResourceKey::new(resource_type.into(), id), &db_path, &config).await?;
        }
        Commands::Version { resource_type, id } => {
            run_version(&ResourceKey::new(resource_type.into(), id), &db_path, &config).await?;
        }
        Commands::History {
            resource_type,
            id,
            limit,
            json,
        } => {
            let key = ResourceKey::new(resource_type.into(), id);
            run_history(&key, limit, json, &db_path, &config).await?;
        }
        Commands::Verify { resource_type, id } => {
            run_verify(&ResourceKey::new(resource_type.into(), id), &db_path, &config).await?;
        }
    }

    Ok(())
}
