//! stripevault — erasure-coded distributed file storage.
//!
//! Files split into stripes, each stripe Reed-Solomon-codes into n chunks,
//! and chunks spread across storage nodes by weighted hash-slot placement
//! kept on a directory ledger. Run `stripevault --help` for usage.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod admin;
mod cli;
mod config;
mod fetch;
mod serve;
mod store;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load config (except for `init` which doesn't need it)
    let config = match &cli.command {
        Commands::Init => None,
        _ => {
            if !cli.config.exists() {
                std::fs::write(&cli.config, b"")?;
                eprintln!(
                    "Created '{}' with localhost defaults — edit it for a real cluster.",
                    cli.config.display()
                );
            }
            Some(config::ClusterConfig::load(&cli.config)?)
        }
    };

    match cli.command {
        Commands::Init => {
            let example = config::ClusterConfig::default_example();
            print!("{}", toml::to_string_pretty(&example)?);
        }
        Commands::LedgerNode => {
            serve::run_ledger_node(config.as_ref().unwrap()).await?;
        }
        Commands::ChunkNode => {
            serve::run_chunk_node(config.as_ref().unwrap()).await?;
        }
        Commands::PartitionNode => {
            serve::run_partition_node(config.as_ref().unwrap()).await?;
        }
        Commands::StoreFile { addr, file } => {
            store::run(config.as_ref().unwrap(), addr, &file).await?;
        }
        Commands::RequestFile { addr, hash, out } => {
            fetch::run(config.as_ref().unwrap(), addr, &hash, &out).await?;
        }
        Commands::UpdateWeight { id, weight } => {
            admin::update_weight(config.as_ref().unwrap(), &id, weight).await?;
        }
        Commands::BuildTable => {
            admin::build_table(config.as_ref().unwrap()).await?;
        }
        Commands::Locate { hash } => {
            admin::locate(config.as_ref().unwrap(), &hash).await?;
        }
    }

    Ok(())
}
