//! File partitioning pipeline.
//!
//! A file becomes stripes of `k * shard_size` bytes (the last one
//! zero-padded), each stripe erasure-codes into n chunks, and every chunk is
//! placed on the node its hash selects — then rebalanced so no node carries
//! more than its share of a stripe. Chunks moved off their hash-selected
//! node leave a forwarding link behind, which keeps reads routable through
//! the slot table alone.
//!
//! The manifest is submitted only after every chunk in the file has been
//! acknowledged; until then the chunks are unreferenced content-addressed
//! files, so a failed upload leaves no reachable partial state.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;

use futures::{future, StreamExt};
use tarpc::context;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Bincode;

use crate::codec::{StripeCodec, DEFAULT_SHARD_SIZE};
use crate::content::content_id;
use crate::directory::HashSlotTable;
use crate::ledger::{LedgerClient, LedgerError};
use crate::manifest::{ChunkRef, FileTree, StripeManifest};
use crate::metrics::PartitionMetrics;
use crate::rpc::{self, FilePartition, NodePool, PartitionError, STATUS_SUCCESS};

const MAX_CHANNELS: usize = 64;

#[derive(Debug, Clone)]
pub struct PartitionConfig {
    /// Total shards per stripe (n).
    pub total_shards: usize,
    /// Data shards per stripe (k).
    pub data_shards: usize,
    /// Payload bytes per shard; a stripe is `data_shards * shard_size`.
    pub shard_size: usize,
    /// Balancing divisor L in `desired = n / L`. Defaults to the node count
    /// of the fetched hash slot table.
    pub fanout_divisor: Option<usize>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            total_shards: crate::codec::DEFAULT_TOTAL_SHARDS,
            data_shards: crate::codec::DEFAULT_DATA_SHARDS,
            shard_size: DEFAULT_SHARD_SIZE,
            fanout_divisor: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Balancing
// ---------------------------------------------------------------------------

/// Even out one stripe's chunk assignments.
///
/// `desired = n / divisor` chunks per node. Nodes iterate in the slot
/// table's id order (deterministic); an over-assigned node sheds its
/// highest-index chunk to the first node still below `desired`, until no
/// node exceeds the target or nobody is below it.
fn balance_assignments(nodes: &[&str], assignments: &mut [String], divisor: usize) {
    if divisor == 0 {
        return;
    }
    let desired = assignments.len() / divisor;

    let mut counts: HashMap<&str, usize> = nodes.iter().map(|n| (*n, 0)).collect();
    for node in assignments.iter() {
        // Assignments always come from the same table as `nodes`.
        if let Some(c) = counts.get_mut(node.as_str()) {
            *c += 1;
        }
    }

    for &over in nodes {
        while counts.get(over).is_some_and(|&c| c > desired) {
            let Some(&under) = nodes
                .iter()
                .find(|n| counts.get(**n).is_some_and(|&c| c < desired))
            else {
                return;
            };
            let moved = assignments
                .iter()
                .rposition(|a| a == over)
                .expect("count says node has an assignment");
            assignments[moved] = under.to_string();
            *counts.get_mut(over).expect("counted") -= 1;
            *counts.get_mut(under).expect("counted") += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Partitioner
// ---------------------------------------------------------------------------

pub struct Partitioner {
    codec: StripeCodec,
    shard_size: usize,
    fanout_divisor: Option<usize>,
    ledger: LedgerClient,
    pool: Arc<NodePool>,
    metrics: Arc<PartitionMetrics>,
}

impl Partitioner {
    pub fn new(config: &PartitionConfig, ledger: LedgerClient) -> Result<Self, PartitionError> {
        let codec = StripeCodec::new(config.total_shards, config.data_shards)
            .map_err(|e| PartitionError::Codec(e.to_string()))?;
        if config.shard_size == 0 {
            return Err(PartitionError::Codec("shard_size must be non-zero".into()));
        }
        Ok(Self {
            codec,
            shard_size: config.shard_size,
            fanout_divisor: config.fanout_divisor,
            ledger,
            pool: Arc::new(NodePool::new()),
            metrics: PartitionMetrics::new(),
        })
    }

    pub fn metrics(&self) -> Arc<PartitionMetrics> {
        self.metrics.clone()
    }

    /// Run the whole pipeline for one file and return its manifest. The
    /// manifest has already been submitted to the ledger on return.
    pub async fn partition(&self, data: &[u8]) -> Result<FileTree, PartitionError> {
        let file_hash = content_id(data);
        let table = self.ledger.hash_slot_table().await.map_err(ledger_err)?;
        let stripe_size = self.codec.stripe_size(self.shard_size);

        tracing::info!(
            file = %file_hash,
            bytes = data.len(),
            stripes = data.len().div_ceil(stripe_size),
            "partitioning file"
        );

        let mut stripes = Vec::with_capacity(data.len() / stripe_size + 1);
        for raw in data.chunks(stripe_size) {
            stripes.push(self.dispatch_stripe(&table, raw, stripe_size).await?);
        }

        let tree = FileTree {
            hash: file_hash,
            length: data.len() as u64,
            stripes,
        };
        // Every chunk is acknowledged by now; only then may the manifest
        // become visible to readers.
        self.ledger.store_file_tree(&tree).await.map_err(ledger_err)?;

        self.metrics.files_partitioned.fetch_add(1, Relaxed);
        self.metrics.bytes_partitioned.fetch_add(data.len() as u64, Relaxed);
        Ok(tree)
    }

    /// Encode one stripe, place its chunks, and dispatch them concurrently.
    async fn dispatch_stripe(
        &self,
        table: &HashSlotTable,
        raw: &[u8],
        stripe_size: usize,
    ) -> Result<StripeManifest, PartitionError> {
        // The stripe hash identifies the logical (pre-padding) stripe;
        // padding is a codec concern.
        let stripe_hash = content_id(raw);
        let mut padded;
        let stripe_bytes = if raw.len() < stripe_size {
            padded = raw.to_vec();
            padded.resize(stripe_size, 0);
            &padded[..]
        } else {
            raw
        };

        let shards = self
            .codec
            .encode_stripe(stripe_bytes)
            .map_err(|e| PartitionError::Codec(e.to_string()))?;
        self.metrics.stripes_encoded.fetch_add(1, Relaxed);

        let chunk_hashes: Vec<String> = shards.iter().map(|s| content_id(s)).collect();
        let theoretical: Vec<String> = chunk_hashes
            .iter()
            .map(|h| table.locate(h).map(str::to_string))
            .collect::<Result<_, _>>()?;

        let nodes: Vec<&str> = table.node_ids().collect();
        let divisor = self.fanout_divisor.unwrap_or(nodes.len());
        let mut actual = theoretical.clone();
        balance_assignments(&nodes, &mut actual, divisor);

        let dispatches = shards.into_iter().enumerate().map(|(i, shard)| {
            let hash = chunk_hashes[i].clone();
            let theoretical = theoretical[i].clone();
            let actual = actual[i].clone();
            let pool = self.pool.clone();
            let metrics = self.metrics.clone();
            async move {
                store_remote_chunk(&pool, &actual, shard).await?;
                metrics.chunks_dispatched.fetch_add(1, Relaxed);
                if actual != theoretical {
                    store_remote_link(&pool, &theoretical, &hash, &actual).await?;
                    metrics.links_recorded.fetch_add(1, Relaxed);
                }
                tracing::debug!(chunk = %hash, node = %actual, "chunk dispatched");
                Ok::<(), PartitionError>(())
            }
        });
        // Any dispatch failure is fatal to the file; no partial commit.
        future::try_join_all(dispatches).await?;

        Ok(StripeManifest {
            hash: stripe_hash,
            length: raw.len() as u64,
            chunks: chunk_hashes.into_iter().map(|hash| ChunkRef { hash }).collect(),
        })
    }
}

async fn store_remote_chunk(
    pool: &NodePool,
    node: &str,
    shard: Vec<u8>,
) -> Result<(), PartitionError> {
    let dispatch = |reason: String| PartitionError::Dispatch {
        node: node.to_string(),
        reason,
    };
    let client = pool
        .chunk_client(node)
        .await
        .map_err(|e| dispatch(e.to_string()))?;
    let status = match client
        .store_chunk(rpc::rpc_context(rpc::RPC_DEADLINE), shard)
        .await
    {
        Ok(result) => result.map_err(|e| dispatch(e.to_string()))?,
        Err(e) => {
            pool.evict(node);
            return Err(dispatch(e.to_string()));
        }
    };
    if status != STATUS_SUCCESS {
        return Err(dispatch(format!("unexpected status {status:?}")));
    }
    Ok(())
}

async fn store_remote_link(
    pool: &NodePool,
    node: &str,
    hash: &str,
    target: &str,
) -> Result<(), PartitionError> {
    let dispatch = |reason: String| PartitionError::Dispatch {
        node: node.to_string(),
        reason,
    };
    let client = pool
        .chunk_client(node)
        .await
        .map_err(|e| dispatch(e.to_string()))?;
    match client
        .store_link(
            rpc::rpc_context(rpc::RPC_DEADLINE),
            hash.to_string(),
            target.to_string(),
        )
        .await
    {
        Ok(result) => {
            result.map_err(|e| dispatch(e.to_string()))?;
            Ok(())
        }
        Err(e) => {
            pool.evict(node);
            Err(dispatch(e.to_string()))
        }
    }
}

fn ledger_err(e: LedgerError) -> PartitionError {
    match e {
        LedgerError::Directory(e) => PartitionError::Directory(e),
        LedgerError::TransportTimeout => PartitionError::LedgerTimeout,
        other => PartitionError::LedgerUnavailable(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// RPC server
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PartitionNode {
    partitioner: Arc<Partitioner>,
}

impl PartitionNode {
    pub fn new(partitioner: Partitioner) -> Self {
        Self { partitioner: Arc::new(partitioner) }
    }
}

impl FilePartition for PartitionNode {
    async fn partition_file(
        self,
        _: context::Context,
        data: Vec<u8>,
    ) -> Result<String, PartitionError> {
        let tree = self.partitioner.partition(&data).await?;
        Ok(tree.hash)
    }
}

pub async fn spawn_server(
    addr: SocketAddr,
    node: PartitionNode,
) -> io::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let mut listener = tarpc::serde_transport::tcp::listen(addr, Bincode::default).await?;
    listener.config_mut().max_frame_length(rpc::MAX_FRAME_BYTES);
    let local_addr = listener.local_addr();

    let handle = tokio::spawn(async move {
        listener
            .filter_map(|conn| future::ready(conn.ok()))
            .map(BaseChannel::with_defaults)
            .map(|channel| {
                let node = node.clone();
                channel.execute(node.serve()).for_each(|response| async {
                    tokio::spawn(response);
                })
            })
            .buffer_unordered(MAX_CHANNELS)
            .for_each(|_| async {})
            .await;
    });

    Ok((local_addr, handle))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn counts<'a>(assignments: &'a [String]) -> HashMap<&'a str, usize> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for a in assignments {
            *counts.entry(a.as_str()).or_default() += 1;
        }
        counts
    }

    #[test]
    fn test_balance_spreads_concentrated_placement() {
        let nodes = ["a", "b", "c", "d", "e", "f"];
        // All six chunks hash-select node a.
        let mut assignments: Vec<String> = vec!["a".into(); 6];
        balance_assignments(&nodes, &mut assignments, 6);
        let counts = counts(&assignments);
        for node in nodes {
            assert_eq!(counts.get(node), Some(&1), "node {node}");
        }
    }

    #[test]
    fn test_balance_is_deterministic_and_moves_highest_index() {
        let nodes = ["a", "b", "c"];
        let mut one: Vec<String> = vec!["a".into(), "a".into(), "a".into()];
        let mut two = one.clone();
        balance_assignments(&nodes, &mut one, 3);
        balance_assignments(&nodes, &mut two, 3);
        assert_eq!(one, two);
        // a sheds its highest indices first: index 2 goes to b, then index 1
        // to c.
        assert_eq!(one, vec!["a".to_string(), "c".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_balance_leaves_even_placement_alone() {
        let nodes = ["a", "b", "c"];
        let original: Vec<String> = vec!["b".into(), "c".into(), "a".into()];
        let mut assignments = original.clone();
        balance_assignments(&nodes, &mut assignments, 3);
        assert_eq!(assignments, original);
    }

    #[test]
    fn test_balance_stops_without_underassigned_node() {
        // desired = 6 / 12 = 0: every node exceeds it, nobody is below it.
        let nodes = ["a", "b"];
        let original: Vec<String> =
            vec!["a".into(), "a".into(), "a".into(), "b".into(), "b".into(), "b".into()];
        let mut assignments = original.clone();
        balance_assignments(&nodes, &mut assignments, 12);
        assert_eq!(assignments, original);
    }

    #[test]
    fn test_balance_partial_excess() {
        let nodes = ["a", "b", "c"];
        let mut assignments: Vec<String> =
            vec!["a".into(), "a".into(), "a".into(), "a".into(), "b".into(), "b".into()];
        balance_assignments(&nodes, &mut assignments, 3);
        let counts = counts(&assignments);
        // desired = 2; a sheds two chunks to c.
        assert_eq!(counts["a"], 2);
        assert_eq!(counts["b"], 2);
        assert_eq!(counts["c"], 2);
    }

    #[test]
    fn test_balance_zero_divisor_is_noop() {
        let nodes = ["a", "b"];
        let original: Vec<String> = vec!["a".into(), "a".into()];
        let mut assignments = original.clone();
        balance_assignments(&nodes, &mut assignments, 0);
        assert_eq!(assignments, original);
    }
}
