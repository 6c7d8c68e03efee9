//! `stripevault store-file` — send a file to the partition service.

use std::path::Path;

use anyhow::{Context, Result};
use stripe_store::rpc;

use crate::config::ClusterConfig;

pub async fn run(config: &ClusterConfig, addr: Option<String>, file: &Path) -> Result<()> {
    let addr = addr.unwrap_or_else(|| config.partition.listen.clone());

    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;

    let client = rpc::connect_partition(&addr)
        .await
        .with_context(|| format!("failed to reach partition service at {addr}"))?;

    let file_hash = client
        .partition_file(rpc::rpc_context(rpc::SUBMIT_DEADLINE), data)
        .await
        .context("partition rpc failed")?
        .context("partitioning failed")?;

    println!("{file_hash}");
    Ok(())
}
