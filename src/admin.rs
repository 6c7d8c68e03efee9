//! Ledger administration: weights, table rebuilds, lookups.

use anyhow::{Context, Result};
use stripe_store::LedgerClient;

use crate::config::ClusterConfig;

async fn connect(config: &ClusterConfig) -> Result<LedgerClient> {
    LedgerClient::connect(&config.ledger.addr)
        .await
        .with_context(|| format!("failed to reach ledger at {}", config.ledger.addr))
}

pub async fn update_weight(config: &ClusterConfig, id: &str, weight: u64) -> Result<()> {
    connect(config).await?.update_weight(id, weight).await?;
    eprintln!("weight[{id}] = {weight}  (run `stripevault build-table` to apply)");
    Ok(())
}

pub async fn build_table(config: &ClusterConfig) -> Result<()> {
    let table = connect(config).await?.build_hash_slot_table().await?;
    println!("{}", serde_json::to_string_pretty(&table)?);
    Ok(())
}

pub async fn locate(config: &ClusterConfig, hash: &str) -> Result<()> {
    let node = connect(config).await?.locate(hash).await?;
    println!("{node}");
    Ok(())
}
