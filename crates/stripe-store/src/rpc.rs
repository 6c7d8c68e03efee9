//! RPC surface shared by every daemon and client.
//!
//! All three services run over tarpc's length-prefixed TCP transport with
//! bincode framing. Requests carry deadlines through [`tarpc::context`];
//! dropping an in-flight call cancels it, which is what lets reconstruction
//! abandon the slow fetches once quorum is reached.

use std::io;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tarpc::client::RpcError;
use tarpc::context;
use tarpc::tokio_serde::formats::Bincode;
use thiserror::Error;

use crate::directory::{DirectoryError, HashSlotTable};

/// Status literal returned by accepting chunk-node and link writes.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Max inbound frame: a whole file upload or a shard of a very large stripe.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024 * 1024;

/// Deadline headroom for chunk transfer and ledger read RPCs.
pub const RPC_DEADLINE: Duration = Duration::from_secs(30);
/// Deadline headroom for ledger submits (one consensus round) and whole-file
/// uploads.
pub const SUBMIT_DEADLINE: Duration = Duration::from_secs(60);

/// Fresh request context with `headroom` added on top of the transport's
/// base deadline.
pub fn rpc_context(headroom: Duration) -> context::Context {
    let mut ctx = context::current();
    ctx.deadline += headroom;
    ctx
}

/// True when a client-side RPC failure was the deadline expiring rather than
/// a transport fault.
pub fn is_timeout(err: &RpcError) -> bool {
    matches!(err, RpcError::DeadlineExceeded)
}

// ---------------------------------------------------------------------------
// Wire errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ChunkError {
    #[error("no chunk stored under {0} and no forwarding link")]
    NotFound(String),
    #[error("invalid chunk hash {0:?}")]
    InvalidHash(String),
    #[error("chunk store i/o failure: {0}")]
    Io(String),
    #[error("forwarding to {target} failed: {reason}")]
    Forward { target: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PartitionError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("chunk dispatch to {node} failed: {reason}")]
    Dispatch { node: String, reason: String },
    #[error("erasure coding failed: {0}")]
    Codec(String),
    #[error("ledger call timed out")]
    LedgerTimeout,
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Chunk storage node: content-addressed store/get plus forwarding links.
#[tarpc::service]
pub trait ChunkStorage {
    /// Hash the payload, bucket it by slot, persist it. Returns
    /// [`STATUS_SUCCESS`]; identical overwrites are permitted and idempotent.
    async fn store_chunk(data: Vec<u8>) -> Result<String, ChunkError>;

    /// Read a chunk, following at most one forwarding link.
    async fn get_chunk(hash: String) -> Result<Vec<u8>, ChunkError>;

    /// Read a chunk from the local buckets only. Forwarded [`get_chunk`]
    /// calls land here, which bounds link traversal to a single hop.
    async fn get_chunk_direct(hash: String) -> Result<Vec<u8>, ChunkError>;

    /// Record that `hash` actually lives on `target`. Overwrites any
    /// previous link for the same hash.
    async fn store_link(hash: String, target: String) -> Result<String, ChunkError>;
}

/// Partition service: whole file in, file hash out.
#[tarpc::service]
pub trait FilePartition {
    /// Stripe, encode, place and dispatch a file, then submit its manifest.
    /// The returned status is the file hash.
    async fn partition_file(data: Vec<u8>) -> Result<String, PartitionError>;
}

/// Directory ledger: the replicated KV hosting the placement directory and
/// the file-tree manifests. Integer arguments travel as native integers;
/// manifests travel as JSON strings, matching what the ledger persists.
#[tarpc::service]
pub trait DirectoryLedger {
    /// Idempotent weight upsert. Does not rebuild the slot table; batch
    /// weight changes first, then call [`build_hash_slot_table`] once.
    async fn update_weight(id: String, weight: u64) -> Result<(), DirectoryError>;

    /// Derive a fresh hash slot table from the current weights and persist
    /// it, atomically replacing the previous table.
    async fn build_hash_slot_table() -> Result<HashSlotTable, DirectoryError>;

    async fn get_hash_slot_table() -> Result<HashSlotTable, DirectoryError>;

    /// Resolve a content id to the node owning its slot.
    async fn locate(content_id: String) -> Result<String, DirectoryError>;

    async fn store_file_tree(file_hash: String, tree_json: String) -> Result<(), DirectoryError>;

    async fn get_file_tree(file_hash: String) -> Result<String, DirectoryError>;
}

// ---------------------------------------------------------------------------
// Client construction
// ---------------------------------------------------------------------------

pub async fn connect_chunk(addr: &str) -> io::Result<ChunkStorageClient> {
    let mut transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default);
    transport.config_mut().max_frame_length(MAX_FRAME_BYTES);
    Ok(ChunkStorageClient::new(tarpc::client::Config::default(), transport.await?).spawn())
}

pub async fn connect_partition(addr: &str) -> io::Result<FilePartitionClient> {
    let mut transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default);
    transport.config_mut().max_frame_length(MAX_FRAME_BYTES);
    Ok(FilePartitionClient::new(tarpc::client::Config::default(), transport.await?).spawn())
}

pub async fn connect_ledger(addr: &str) -> io::Result<DirectoryLedgerClient> {
    let mut transport = tarpc::serde_transport::tcp::connect(addr, Bincode::default);
    transport.config_mut().max_frame_length(MAX_FRAME_BYTES);
    Ok(DirectoryLedgerClient::new(tarpc::client::Config::default(), transport.await?).spawn())
}

/// One cached chunk-node client per node id (`host:port`).
///
/// Both the partition dispatcher and a chunk node's own forwarding path dial
/// peers through a pool, so repeated chunks reuse one connection. A failed
/// call must [`NodePool::evict`] its client so the next call redials.
#[derive(Default)]
pub struct NodePool {
    clients: DashMap<String, ChunkStorageClient>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn chunk_client(&self, node: &str) -> io::Result<ChunkStorageClient> {
        if let Some(client) = self.clients.get(node) {
            return Ok(client.clone());
        }
        let client = connect_chunk(node).await?;
        self.clients.insert(node.to_string(), client.clone());
        Ok(client)
    }

    pub fn evict(&self, node: &str) {
        self.clients.remove(node);
    }
}
