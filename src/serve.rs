//! Daemon runners for the three cluster roles.

use std::time::Duration;

use anyhow::{Context, Result};
use stripe_store::chunk_node::{self, ChunkNode, ChunkStore};
use stripe_store::ledger::{self, DirectoryStore, LedgerClient, LedgerNode};
use stripe_store::metrics::spawn_snapshot_logger;
use stripe_store::partition::{self, PartitionNode, Partitioner};

use crate::config::ClusterConfig;

const METRICS_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_ledger_node(config: &ClusterConfig) -> Result<()> {
    let store = DirectoryStore::open_path(&config.ledger.data_dir)
        .with_context(|| format!("failed to open ledger state in {}", config.ledger.data_dir))?;
    let addr = config
        .ledger
        .addr
        .parse()
        .with_context(|| format!("bad ledger addr {:?}", config.ledger.addr))?;

    let (bound, handle) = ledger::spawn_server(addr, LedgerNode::new(store)).await?;
    tracing::info!(%bound, data_dir = %config.ledger.data_dir, "ledger node listening");
    handle.await?;
    Ok(())
}

pub async fn run_chunk_node(config: &ClusterConfig) -> Result<()> {
    let store = ChunkStore::open(&config.chunk_node.data_dir).with_context(|| {
        format!("failed to open chunk store in {}", config.chunk_node.data_dir)
    })?;
    let node = ChunkNode::new(store);
    let metrics = node.metrics();
    let addr = config
        .chunk_node
        .listen
        .parse()
        .with_context(|| format!("bad chunk node addr {:?}", config.chunk_node.listen))?;

    let (bound, handle) = chunk_node::spawn_server(addr, node).await?;
    tracing::info!(%bound, data_dir = %config.chunk_node.data_dir, "chunk node listening");
    eprintln!(
        "chunk node on {bound} — register it with: stripevault update-weight --id {bound} --weight 1"
    );
    spawn_snapshot_logger("chunk-node", METRICS_INTERVAL, move || metrics.snapshot());
    handle.await?;
    Ok(())
}

pub async fn run_partition_node(config: &ClusterConfig) -> Result<()> {
    let ledger = LedgerClient::connect(&config.ledger.addr)
        .await
        .with_context(|| format!("failed to reach ledger at {}", config.ledger.addr))?;
    let partitioner = Partitioner::new(&config.partition_config(), ledger)?;
    let metrics = partitioner.metrics();
    let addr = config
        .partition
        .listen
        .parse()
        .with_context(|| format!("bad partition addr {:?}", config.partition.listen))?;

    let (bound, handle) = partition::spawn_server(addr, PartitionNode::new(partitioner)).await?;
    tracing::info!(%bound, ledger = %config.ledger.addr, "partition service listening");
    spawn_snapshot_logger("partition", METRICS_INTERVAL, move || metrics.snapshot());
    handle.await?;
    Ok(())
}
