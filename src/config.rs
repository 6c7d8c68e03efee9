//! `cluster.toml` configuration for stripevault.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level cluster configuration. Every section has workable defaults so
/// an empty file means "single machine on localhost ports".
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub chunk_node: ChunkNodeConfig,
    #[serde(default)]
    pub partition: PartitionServiceConfig,
}

/// (n, k) erasure-coding geometry. Both the partition service and the
/// reconstruction client read this; they must agree.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CodecConfig {
    /// Total shards per stripe (n)
    #[serde(default = "CodecConfig::default_total_shards")]
    pub total_shards: usize,
    /// Data shards per stripe (k); the cluster tolerates n - k lost chunks
    #[serde(default = "CodecConfig::default_data_shards")]
    pub data_shards: usize,
    /// Payload bytes per shard; a stripe is data_shards * shard_size bytes
    #[serde(default = "CodecConfig::default_shard_size")]
    pub shard_size: usize,
}

impl CodecConfig {
    fn default_total_shards() -> usize { 6 }
    fn default_data_shards() -> usize { 3 }
    fn default_shard_size() -> usize { 4096 }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            total_shards: Self::default_total_shards(),
            data_shards: Self::default_data_shards(),
            shard_size: Self::default_shard_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    /// Directory ledger RPC address
    #[serde(default = "LedgerConfig::default_addr")]
    pub addr: String,
    /// Where the ledger daemon keeps its sled database
    #[serde(default = "LedgerConfig::default_data_dir")]
    pub data_dir: String,
}

impl LedgerConfig {
    fn default_addr() -> String { "127.0.0.1:4400".into() }
    fn default_data_dir() -> String { "ledger-data".into() }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            addr: Self::default_addr(),
            data_dir: Self::default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkNodeConfig {
    /// Chunk RPC listen address; also this node's id in the weight table
    #[serde(default = "ChunkNodeConfig::default_listen")]
    pub listen: String,
    /// Where chunk buckets live on disk
    #[serde(default = "ChunkNodeConfig::default_data_dir")]
    pub data_dir: String,
}

impl ChunkNodeConfig {
    fn default_listen() -> String { "127.0.0.1:4500".into() }
    fn default_data_dir() -> String { "chunk-data".into() }
}

impl Default for ChunkNodeConfig {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            data_dir: Self::default_data_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartitionServiceConfig {
    /// Partition service RPC listen address
    #[serde(default = "PartitionServiceConfig::default_listen")]
    pub listen: String,
    /// Balancing divisor L in `desired = n / L` chunks per node.
    /// Omit to use the node count of the current hash slot table.
    #[serde(default)]
    pub fanout_divisor: Option<usize>,
}

impl PartitionServiceConfig {
    fn default_listen() -> String { "127.0.0.1:4600".into() }
}

impl Default for PartitionServiceConfig {
    fn default() -> Self {
        Self {
            listen: Self::default_listen(),
            fanout_divisor: None,
        }
    }
}

impl ClusterConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let cfg: Self = toml::from_str(&text)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        Ok(cfg)
    }

    /// The library-side partition settings this config selects.
    pub fn partition_config(&self) -> stripe_store::PartitionConfig {
        stripe_store::PartitionConfig {
            total_shards: self.codec.total_shards,
            data_shards: self.codec.data_shards,
            shard_size: self.codec.shard_size,
            fanout_divisor: self.partition.fanout_divisor,
        }
    }

    /// Returns a default config matching a single-machine localhost cluster.
    pub fn default_example() -> Self {
        Self::default()
    }
}
