//! Atomic per-daemon counters.
//!
//! All writes use Relaxed ordering — these are sampling metrics, not
//! synchronisation. Daemons log a JSON snapshot on an interval so operators
//! can watch throughput without attaching anything.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ChunkNodeMetrics {
    pub chunks_stored: AtomicU64,
    pub bytes_stored: AtomicU64,
    pub chunks_served: AtomicU64,
    pub links_stored: AtomicU64,
    /// `get_chunk` calls answered by following a forwarding link.
    pub forward_hits: AtomicU64,
    pub not_found: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkNodeSnapshot {
    pub chunks_stored: u64,
    pub bytes_stored: u64,
    pub chunks_served: u64,
    pub links_stored: u64,
    pub forward_hits: u64,
    pub not_found: u64,
}

impl ChunkNodeMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> ChunkNodeSnapshot {
        ChunkNodeSnapshot {
            chunks_stored: self.chunks_stored.load(Relaxed),
            bytes_stored: self.bytes_stored.load(Relaxed),
            chunks_served: self.chunks_served.load(Relaxed),
            links_stored: self.links_stored.load(Relaxed),
            forward_hits: self.forward_hits.load(Relaxed),
            not_found: self.not_found.load(Relaxed),
        }
    }
}

#[derive(Debug, Default)]
pub struct PartitionMetrics {
    pub files_partitioned: AtomicU64,
    pub bytes_partitioned: AtomicU64,
    pub stripes_encoded: AtomicU64,
    pub chunks_dispatched: AtomicU64,
    /// Chunks the balancer moved off their hash-selected node.
    pub links_recorded: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartitionSnapshot {
    pub files_partitioned: u64,
    pub bytes_partitioned: u64,
    pub stripes_encoded: u64,
    pub chunks_dispatched: u64,
    pub links_recorded: u64,
}

impl PartitionMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> PartitionSnapshot {
        PartitionSnapshot {
            files_partitioned: self.files_partitioned.load(Relaxed),
            bytes_partitioned: self.bytes_partitioned.load(Relaxed),
            stripes_encoded: self.stripes_encoded.load(Relaxed),
            chunks_dispatched: self.chunks_dispatched.load(Relaxed),
            links_recorded: self.links_recorded.load(Relaxed),
        }
    }
}

/// Log a serialized snapshot every `interval` until the daemon exits.
pub fn spawn_snapshot_logger<S, F>(
    name: &'static str,
    interval: Duration,
    snapshot: F,
) -> tokio::task::JoinHandle<()>
where
    S: Serialize,
    F: Fn() -> S + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            match serde_json::to_string(&snapshot()) {
                Ok(line) => tracing::info!(target: "stripevault::metrics", "{name} {line}"),
                Err(e) => tracing::warn!("failed to serialize {name} metrics: {e}"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_node_snapshot() {
        let m = ChunkNodeMetrics::new();
        m.chunks_stored.fetch_add(3, Relaxed);
        m.bytes_stored.fetch_add(4096, Relaxed);
        m.forward_hits.fetch_add(1, Relaxed);
        let snap = m.snapshot();
        assert_eq!(snap.chunks_stored, 3);
        assert_eq!(snap.bytes_stored, 4096);
        assert_eq!(snap.forward_hits, 1);
        assert_eq!(snap.not_found, 0);
    }

    #[test]
    fn test_partition_snapshot_serializes() {
        let m = PartitionMetrics::new();
        m.files_partitioned.fetch_add(1, Relaxed);
        let json = serde_json::to_value(m.snapshot()).unwrap();
        assert_eq!(json["files_partitioned"], 1);
    }
}
