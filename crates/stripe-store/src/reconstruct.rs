//! Quorum-based file reconstruction.
//!
//! For each stripe, n fetch workers race their chunks back through a bounded
//! channel; the moment k distinct shard indices are filled the remaining
//! in-flight fetches are aborted (dropping a tarpc call cancels it and frees
//! its connection slot). Failed or hash-mismatched payloads only count
//! against quorum — the other workers can still satisfy it.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::codec::{CodecError, StripeCodec};
use crate::content::content_id;
use crate::directory::{DirectoryError, HashSlotTable};
use crate::ledger::{LedgerClient, LedgerError};
use crate::manifest::{FileTree, StripeManifest};
use crate::rpc::{self, NodePool};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unknown file {0}")]
    UnknownFile(String),
    #[error("recovered {recovered} of {needed} shards; failed chunks: {failed:?}")]
    InsufficientShards {
        recovered: usize,
        needed: usize,
        failed: Vec<String>,
    },
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("ledger call timed out")]
    LedgerTimeout,
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("malformed manifest: {0}")]
    Manifest(String),
}

fn ledger_err(e: LedgerError) -> FetchError {
    match e {
        LedgerError::Directory(DirectoryError::UnknownFile(hash)) => FetchError::UnknownFile(hash),
        LedgerError::Directory(e) => FetchError::Directory(e),
        LedgerError::TransportTimeout => FetchError::LedgerTimeout,
        LedgerError::Manifest(e) => FetchError::Manifest(e),
        other => FetchError::LedgerUnavailable(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Reconstructor
// ---------------------------------------------------------------------------

pub struct Reconstructor {
    codec: StripeCodec,
    ledger: LedgerClient,
    pool: Arc<NodePool>,
}

impl Reconstructor {
    pub fn new(codec: StripeCodec, ledger: LedgerClient) -> Self {
        Self {
            codec,
            ledger,
            pool: Arc::new(NodePool::new()),
        }
    }

    /// Fetch and reassemble a whole file by its hash.
    pub async fn fetch_file(&self, file_hash: &str) -> Result<Vec<u8>, FetchError> {
        let tree = self.ledger.file_tree(file_hash).await.map_err(ledger_err)?;
        let table = self.ledger.hash_slot_table().await.map_err(ledger_err)?;

        tracing::info!(
            file = %file_hash,
            bytes = tree.length,
            stripes = tree.stripes.len(),
            "reconstructing file"
        );

        let mut out = Vec::with_capacity(tree.length as usize);
        for stripe in &tree.stripes {
            let data = self.fetch_stripe(&table, stripe).await?;
            out.extend_from_slice(&data);
        }
        // Stripe lengths already sum to the file length; the final truncate
        // is belt for manifests written without that guarantee.
        out.truncate(tree.length as usize);
        Ok(out)
    }

    /// The manifest a fetch would use, exposed for callers that only need
    /// placement information.
    pub async fn file_tree(&self, file_hash: &str) -> Result<FileTree, FetchError> {
        self.ledger.file_tree(file_hash).await.map_err(ledger_err)
    }

    async fn fetch_stripe(
        &self,
        table: &HashSlotTable,
        stripe: &StripeManifest,
    ) -> Result<Vec<u8>, FetchError> {
        let n = self.codec.total_shards();
        let k = self.codec.data_shards();
        if stripe.chunks.len() != n {
            return Err(FetchError::Manifest(format!(
                "stripe {} has {} chunks, codec expects {n}",
                stripe.hash,
                stripe.chunks.len()
            )));
        }

        // A payload fills every shard index sharing its hash — identical
        // shards (all-zero padding, say) are fetched once but placed
        // everywhere they belong.
        let mut indices_of: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, chunk) in stripe.chunks.iter().enumerate() {
            indices_of.entry(chunk.hash.as_str()).or_default().push(i);
        }

        let (tx, mut rx) = mpsc::channel::<(String, Result<Vec<u8>, String>)>(n);
        let mut workers = JoinSet::new();
        for chunk in &stripe.chunks {
            let hash = chunk.hash.clone();
            let node = table.locate(&hash)?.to_string();
            let pool = self.pool.clone();
            let tx = tx.clone();
            workers.spawn(async move {
                let result = fetch_chunk(&pool, &node, &hash).await;
                let _ = tx.send((hash, result)).await;
            });
        }
        drop(tx);

        let mut shards: Vec<Option<Vec<u8>>> = vec![None; n];
        let mut filled = 0usize;
        let mut failed: Vec<String> = Vec::new();
        while let Some((hash, result)) = rx.recv().await {
            match result {
                Ok(payload) => {
                    if content_id(&payload) != hash {
                        tracing::warn!(chunk = %hash, "payload hash mismatch, counting as failed");
                        failed.push(hash);
                        continue;
                    }
                    for &idx in &indices_of[hash.as_str()] {
                        if shards[idx].is_none() {
                            shards[idx] = Some(payload.clone());
                            filled += 1;
                        }
                    }
                    if filled >= k {
                        break;
                    }
                }
                Err(reason) => {
                    tracing::warn!(chunk = %hash, %reason, "chunk fetch failed");
                    failed.push(hash);
                }
            }
        }
        // Quorum reached or every worker has terminated; either way the
        // stragglers are cancelled.
        workers.abort_all();

        if filled < k {
            failed.sort();
            failed.dedup();
            return Err(FetchError::InsufficientShards {
                recovered: filled,
                needed: k,
                failed,
            });
        }

        self.codec.reconstruct(&mut shards)?;
        Ok(self.codec.join(&shards, stripe.length as usize)?)
    }
}

async fn fetch_chunk(pool: &NodePool, node: &str, hash: &str) -> Result<Vec<u8>, String> {
    let client = pool
        .chunk_client(node)
        .await
        .map_err(|e| format!("{node}: {e}"))?;
    match client
        .get_chunk(rpc::rpc_context(rpc::RPC_DEADLINE), hash.to_string())
        .await
    {
        Ok(result) => result.map_err(|e| format!("{node}: {e}")),
        Err(e) => {
            pool.evict(node);
            Err(format!("{node}: {e}"))
        }
    }
}
