//! Chunk storage node.
//!
//! Content-addressed local storage with two-bucket slot affinity and an
//! in-memory forwarding-link table for chunks the partition balancer placed
//! on a different node than their hash selects.
//!
//! The two buckets are a directory-size hint for filesystems with large flat
//! directories, not a correctness invariant. Links are not persisted; a node
//! restart loses them.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;

use dashmap::DashMap;
use futures::{future, StreamExt};
use tarpc::context;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Bincode;

use crate::content::{slot_of, SLOT_COUNT};
use crate::metrics::ChunkNodeMetrics;
use crate::rpc::{self, ChunkError, ChunkStorage, NodePool, STATUS_SUCCESS};

pub const BUCKET_A: &str = "bucket_a";
pub const BUCKET_B: &str = "bucket_b";

/// Concurrent tarpc channels one node serves before backpressuring accepts.
const MAX_CHANNELS: usize = 64;

/// `bucket_a` covers the lower half of the ring, `bucket_b` the rest.
fn bucket_for_slot(slot: u32) -> &'static str {
    if slot < SLOT_COUNT / 2 + 1 {
        BUCKET_A
    } else {
        BUCKET_B
    }
}

// ---------------------------------------------------------------------------
// On-disk store
// ---------------------------------------------------------------------------

/// Flat content-addressed chunk files under `root/bucket_{a,b}/<hex hash>`.
#[derive(Debug)]
pub struct ChunkStore {
    root: PathBuf,
    /// Distinguishes concurrent temp files for the same hash.
    write_seq: AtomicU64,
}

impl ChunkStore {
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join(BUCKET_A))?;
        std::fs::create_dir_all(root.join(BUCKET_B))?;
        Ok(Self { root, write_seq: AtomicU64::new(0) })
    }

    /// Bucketed path for a hash. Rejects anything that is not pure hex so a
    /// crafted hash can never escape the bucket directories.
    pub fn chunk_path(&self, hash: &str) -> Result<PathBuf, ChunkError> {
        let slot = slot_of(hash).map_err(|_| ChunkError::InvalidHash(hash.to_string()))?;
        Ok(self.root.join(bucket_for_slot(slot)).join(hash))
    }

    /// Write a chunk atomically: temp file in the same bucket, then rename,
    /// so concurrent readers never observe a torn file. Re-writing the same
    /// content-addressed chunk is idempotent.
    pub async fn write_chunk(&self, hash: &str, data: &[u8]) -> Result<(), ChunkError> {
        let path = self.chunk_path(hash)?;
        let seq = self.write_seq.fetch_add(1, Relaxed);
        let tmp = path.with_extension(format!("tmp.{}.{seq}", std::process::id()));

        let io_err = |e: io::Error| ChunkError::Io(e.to_string());
        tokio::fs::write(&tmp, data).await.map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644))
                .await
                .map_err(io_err)?;
        }
        tokio::fs::rename(&tmp, &path).await.map_err(io_err)
    }

    pub async fn read_chunk(&self, hash: &str) -> Result<Vec<u8>, ChunkError> {
        let path = self.chunk_path(hash)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ChunkError::NotFound(hash.to_string()))
            }
            Err(e) => Err(ChunkError::Io(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// RPC server
// ---------------------------------------------------------------------------

/// Per-connection handler. State lives behind `Arc`s so the node is an
/// explicit capability handed to each channel, not process-global.
#[derive(Clone)]
pub struct ChunkNode {
    store: Arc<ChunkStore>,
    links: Arc<DashMap<String, String>>,
    pool: Arc<NodePool>,
    metrics: Arc<ChunkNodeMetrics>,
}

impl ChunkNode {
    pub fn new(store: ChunkStore) -> Self {
        Self {
            store: Arc::new(store),
            links: Arc::new(DashMap::new()),
            pool: Arc::new(NodePool::new()),
            metrics: ChunkNodeMetrics::new(),
        }
    }

    pub fn metrics(&self) -> Arc<ChunkNodeMetrics> {
        self.metrics.clone()
    }

    /// Forwarding target currently recorded for a hash, if any.
    pub fn link_target(&self, hash: &str) -> Option<String> {
        self.links.get(hash).map(|t| t.value().clone())
    }

    async fn forward_get(&self, hash: &str, target: &str) -> Result<Vec<u8>, ChunkError> {
        let client = self.pool.chunk_client(target).await.map_err(|e| ChunkError::Forward {
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        // The inherited context keeps the original caller's deadline.
        // `get_chunk_direct` never follows the target's own links, so a
        // forwarding chain dead-ends after one hop with `NotFound`.
        match client.get_chunk_direct(context::current(), hash.to_string()).await {
            Ok(result) => result,
            Err(e) => {
                self.pool.evict(target);
                Err(ChunkError::Forward {
                    target: target.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl ChunkStorage for ChunkNode {
    async fn store_chunk(self, _: context::Context, data: Vec<u8>) -> Result<String, ChunkError> {
        let hash = crate::content::content_id(&data);
        self.store.write_chunk(&hash, &data).await?;
        self.metrics.chunks_stored.fetch_add(1, Relaxed);
        self.metrics.bytes_stored.fetch_add(data.len() as u64, Relaxed);
        tracing::debug!(chunk = %hash, bytes = data.len(), "chunk stored");
        Ok(STATUS_SUCCESS.to_string())
    }

    async fn get_chunk(self, _: context::Context, hash: String) -> Result<Vec<u8>, ChunkError> {
        if let Some(target) = self.link_target(&hash) {
            self.metrics.forward_hits.fetch_add(1, Relaxed);
            return self.forward_get(&hash, &target).await;
        }
        match self.store.read_chunk(&hash).await {
            Ok(data) => {
                self.metrics.chunks_served.fetch_add(1, Relaxed);
                Ok(data)
            }
            Err(e) => {
                if matches!(e, ChunkError::NotFound(_)) {
                    self.metrics.not_found.fetch_add(1, Relaxed);
                }
                Err(e)
            }
        }
    }

    async fn get_chunk_direct(
        self,
        _: context::Context,
        hash: String,
    ) -> Result<Vec<u8>, ChunkError> {
        let data = self.store.read_chunk(&hash).await?;
        self.metrics.chunks_served.fetch_add(1, Relaxed);
        Ok(data)
    }

    async fn store_link(
        self,
        _: context::Context,
        hash: String,
        target: String,
    ) -> Result<String, ChunkError> {
        if slot_of(&hash).is_err() {
            return Err(ChunkError::InvalidHash(hash));
        }
        tracing::debug!(chunk = %hash, target = %target, "forwarding link stored");
        self.links.insert(hash, target);
        self.metrics.links_stored.fetch_add(1, Relaxed);
        Ok(STATUS_SUCCESS.to_string())
    }
}

/// Bind the RPC listener and spawn the accept loop. Returns the bound
/// address (useful with port 0) and the loop's task handle.
pub async fn spawn_server(
    addr: SocketAddr,
    node: ChunkNode,
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
