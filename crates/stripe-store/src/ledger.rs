//! Directory ledger node and its typed client.
//!
//! The ledger exclusively owns the weight table, the hash slot table, and
//! every file tree. This module hosts the directory contract over an
//! embedded sled tree — single-key writes serialize through sled
//! transactions — and exposes it as the [`DirectoryLedger`] RPC service. A
//! replicated ledger would plug in at the same service boundary.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{future, StreamExt};
use tarpc::client::RpcError;
use tarpc::context;
use tarpc::server::{BaseChannel, Channel};
use tarpc::tokio_serde::formats::Bincode;
use thiserror::Error;

use crate::directory::{build_hash_slot_table, DirectoryError, HashSlotTable, WeightTable};
use crate::manifest::FileTree;
use crate::rpc::{self, DirectoryLedger, DirectoryLedgerClient};

const WEIGHT_TABLE_KEY: &str = "wt";
const SLOT_TABLE_KEY: &str = "slt";

const MAX_CHANNELS: usize = 64;

// ---------------------------------------------------------------------------
// Contract state
// ---------------------------------------------------------------------------

/// The directory contract executing against local sled trees.
pub struct DirectoryStore {
    db: sled::Db,
    /// Weight table and hash slot table under fixed keys.
    directory: sled::Tree,
    /// File trees keyed by file hash, stored as manifest JSON.
    manifests: sled::Tree,
}

impl DirectoryStore {
    /// Open the contract state, seeding an empty weight table on first run.
    pub fn open(db: sled::Db) -> Result<Self, DirectoryError> {
        let directory = db.open_tree("directory").map_err(storage_err)?;
        let manifests = db.open_tree("manifests").map_err(storage_err)?;
        if directory.get(WEIGHT_TABLE_KEY).map_err(storage_err)?.is_none() {
            let empty = encode(&WeightTable::default())?;
            directory
                .insert(WEIGHT_TABLE_KEY, empty)
                .map_err(storage_err)?;
        }
        Ok(Self { db, directory, manifests })
    }

    pub fn open_path(path: impl AsRef<std::path::Path>) -> Result<Self, DirectoryError> {
        Self::open(sled::open(path).map_err(storage_err)?)
    }

    pub fn flush(&self) -> Result<(), DirectoryError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    pub fn weight_table(&self) -> Result<WeightTable, DirectoryError> {
        match self.directory.get(WEIGHT_TABLE_KEY).map_err(storage_err)? {
            Some(raw) => decode(&raw),
            None => Ok(WeightTable::default()),
        }
    }

    /// Idempotent weight upsert. Read-modify-write inside one transaction so
    /// concurrent updates serialize; does not rebuild the slot table.
    pub fn update_weight(&self, id: &str, weight: u64) -> Result<(), DirectoryError> {
        self.directory
            .transaction(|tx| {
                let mut table: WeightTable = match tx.get(WEIGHT_TABLE_KEY)? {
                    Some(raw) => decode(&raw).map_err(abort)?,
                    None => WeightTable::default(),
                };
                table.set(id, weight);
                tx.insert(WEIGHT_TABLE_KEY, encode(&table).map_err(abort)?)?;
                Ok(())
            })
            .map_err(txn_err)
    }

    /// Derive a fresh slot table from the current weights and persist it,
    /// atomically replacing any previous version.
    pub fn build_hash_slot_table(&self) -> Result<HashSlotTable, DirectoryError> {
        self.directory
            .transaction(|tx| {
                let weights: WeightTable = match tx.get(WEIGHT_TABLE_KEY)? {
                    Some(raw) => decode(&raw).map_err(abort)?,
                    None => WeightTable::default(),
                };
                let table = build_hash_slot_table(&weights).map_err(abort)?;
                tx.insert(SLOT_TABLE_KEY, encode(&table).map_err(abort)?)?;
                Ok(table)
            })
            .map_err(txn_err)
    }

    pub fn hash_slot_table(&self) -> Result<HashSlotTable, DirectoryError> {
        match self.directory.get(SLOT_TABLE_KEY).map_err(storage_err)? {
            Some(raw) => decode(&raw),
            None => Err(DirectoryError::TableMissing),
        }
    }

    pub fn locate(&self, content_id: &str) -> Result<String, DirectoryError> {
        Ok(self.hash_slot_table()?.locate(content_id)?.to_string())
    }

    /// Persist a manifest under its file hash. The JSON must parse as a
    /// file tree; garbage is refused before it reaches the ledger.
    pub fn store_file_tree(&self, file_hash: &str, tree_json: &str) -> Result<(), DirectoryError> {
        FileTree::from_json(tree_json)
            .map_err(|e| DirectoryError::Corrupt(e.to_string()))?;
        self.manifests
            .insert(file_hash, tree_json.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn file_tree(&self, file_hash: &str) -> Result<String, DirectoryError> {
        match self.manifests.get(file_hash).map_err(storage_err)? {
            Some(raw) => String::from_utf8(raw.to_vec())
                .map_err(|e| DirectoryError::Corrupt(e.to_string())),
            None => Err(DirectoryError::UnknownFile(file_hash.to_string())),
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, DirectoryError> {
    serde_json::to_vec(value).map_err(|e| DirectoryError::Corrupt(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T, DirectoryError> {
    serde_json::from_slice(raw).map_err(|e| DirectoryError::Corrupt(e.to_string()))
}

fn storage_err(e: sled::Error) -> DirectoryError {
    DirectoryError::Storage(e.to_string())
}

fn abort(e: DirectoryError) -> sled::transaction::ConflictableTransactionError<DirectoryError> {
    sled::transaction::ConflictableTransactionError::Abort(e)
}

fn txn_err(e: sled::transaction::TransactionError<DirectoryError>) -> DirectoryError {
    match e {
        sled::transaction::TransactionError::Abort(e) => e,
        sled::transaction::TransactionError::Storage(e) => storage_err(e),
    }
}

// ---------------------------------------------------------------------------
// RPC server
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LedgerNode {
    store: Arc<DirectoryStore>,
}

impl LedgerNode {
    pub fn new(store: DirectoryStore) -> Self {
        Self { store: Arc::new(store) }
    }
}

impl DirectoryLedger for LedgerNode {
    async fn update_weight(
        self,
        _: context::Context,
        id: String,
        weight: u64,
    ) -> Result<(), DirectoryError> {
        tracing::info!(node = %id, weight, "weight updated");
        self.store.update_weight(&id, weight)
    }

    async fn build_hash_slot_table(
        self,
        _: context::Context,
    ) -> Result<HashSlotTable, DirectoryError> {
        let table = self.store.build_hash_slot_table()?;
        tracing::info!(nodes = table.node_count(), "hash slot table rebuilt");
        Ok(table)
    }

    async fn get_hash_slot_table(
        self,
        _: context::Context,
    ) -> Result<HashSlotTable, DirectoryError> {
        self.store.hash_slot_table()
    }

    async fn locate(self, _: context::Context, content_id: String) -> Result<String, DirectoryError> {
        self.store.locate(&content_id)
    }

    async fn store_file_tree(
        self,
        _: context::Context,
        file_hash: String,
        tree_json: String,
    ) -> Result<(), DirectoryError> {
        tracing::info!(file = %file_hash, bytes = tree_json.len(), "file tree stored");
        self.store.store_file_tree(&file_hash, &tree_json)
    }

    async fn get_file_tree(
        self,
        _: context::Context,
        file_hash: String,
    ) -> Result<String, DirectoryError> {
        self.store.file_tree(&file_hash)
    }
}

pub async fn spawn_server(
    addr: SocketAddr,
    node: LedgerNode,
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
// Typed client
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger rpc timed out")]
    TransportTimeout,
    #[error("ledger unavailable: {0}")]
    TransportUnavailable(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("malformed file tree from ledger: {0}")]
    Manifest(String),
}

fn rpc_err(e: RpcError) -> LedgerError {
    if rpc::is_timeout(&e) {
        LedgerError::TransportTimeout
    } else {
        LedgerError::TransportUnavailable(e.to_string())
    }
}

/// Typed wrapper over the ledger RPC. Read calls carry the standard
/// deadline; submits (weight updates, table builds, manifest stores) get the
/// longer consensus-round deadline.
#[derive(Clone)]
pub struct LedgerClient {
    inner: DirectoryLedgerClient,
}

impl LedgerClient {
    pub async fn connect(addr: &str) -> io::Result<Self> {
        Ok(Self { inner: rpc::connect_ledger(addr).await? })
    }

    pub fn from_client(inner: DirectoryLedgerClient) -> Self {
        Self { inner }
    }

    pub async fn update_weight(&self, id: &str, weight: u64) -> Result<(), LedgerError> {
        self.inner
            .update_weight(rpc::rpc_context(rpc::SUBMIT_DEADLINE), id.to_string(), weight)
            .await
            .map_err(rpc_err)??;
        Ok(())
    }

    pub async fn build_hash_slot_table(&self) -> Result<HashSlotTable, LedgerError> {
        Ok(self
            .inner
            .build_hash_slot_table(rpc::rpc_context(rpc::SUBMIT_DEADLINE))
            .await
            .map_err(rpc_err)??)
    }

    pub async fn hash_slot_table(&self) -> Result<HashSlotTable, LedgerError> {
        Ok(self
            .inner
            .get_hash_slot_table(rpc::rpc_context(rpc::RPC_DEADLINE))
            .await
            .map_err(rpc_err)??)
    }

    pub async fn locate(&self, content_id: &str) -> Result<String, LedgerError> {
        Ok(self
            .inner
            .locate(rpc::rpc_context(rpc::RPC_DEADLINE), content_id.to_string())
            .await
            .map_err(rpc_err)??)
    }

    pub async fn store_file_tree(&self, tree: &FileTree) -> Result<(), LedgerError> {
        let json = tree.to_json().map_err(|e| LedgerError::Manifest(e.to_string()))?;
        self.inner
            .store_file_tree(
                rpc::rpc_context(rpc::SUBMIT_DEADLINE),
                tree.hash.clone(),
                json,
            )
            .await
            .map_err(rpc_err)??;
        Ok(())
    }

    pub async fn file_tree(&self, file_hash: &str) -> Result<FileTree, LedgerError> {
        let json = self
            .inner
            .get_file_tree(rpc::rpc_context(rpc::RPC_DEADLINE), file_hash.to_string())
            .await
            .map_err(rpc_err)??;
        FileTree::from_json(&json).map_err(|e| LedgerError::Manifest(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ChunkRef, StripeManifest};

    fn open_store() -> (tempfile::TempDir, DirectoryStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::open_path(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_seeds_empty_weight_table() {
        let (_dir, store) = open_store();
        assert!(store.weight_table().unwrap().weights.is_empty());
        assert_eq!(
            store.hash_slot_table().unwrap_err(),
            DirectoryError::TableMissing
        );
    }

    #[test]
    fn test_update_weight_is_idempotent_upsert() {
        let (_dir, store) = open_store();
        store.update_weight("n1", 2).unwrap();
        store.update_weight("n1", 2).unwrap();
        store.update_weight("n1", 5).unwrap();
        store.update_weight("n2", 1).unwrap();
        let wt = store.weight_table().unwrap();
        assert_eq!(wt.weights["n1"], 5);
        assert_eq!(wt.weights["n2"], 1);
    }

    #[test]
    fn test_weight_update_does_not_rebuild_table() {
        let (_dir, store) = open_store();
        store.update_weight("n1", 1).unwrap();
        assert_eq!(
            store.hash_slot_table().unwrap_err(),
            DirectoryError::TableMissing
        );

        let built = store.build_hash_slot_table().unwrap();
        assert_eq!(store.hash_slot_table().unwrap(), built);

        // A later weight change leaves the persisted table untouched until
        // the next explicit build.
        store.update_weight("n2", 1).unwrap();
        assert_eq!(store.hash_slot_table().unwrap(), built);
        let rebuilt = store.build_hash_slot_table().unwrap();
        assert_eq!(rebuilt.node_count(), 2);
    }

    #[test]
    fn test_build_empty_weights_fails() {
        let (_dir, store) = open_store();
        assert_eq!(
            store.build_hash_slot_table().unwrap_err(),
            DirectoryError::EmptyWeightTable
        );
    }

    #[test]
    fn test_locate_through_store() {
        let (_dir, store) = open_store();
        store.update_weight("x", 1).unwrap();
        store.update_weight("y", 1).unwrap();
        store.update_weight("z", 1).unwrap();
        store.build_hash_slot_table().unwrap();
        // Slot 10923 (0x2aab) is y's closing boundary; 10924 opens z.
        assert_eq!(store.locate("2aab").unwrap(), "y");
        assert_eq!(store.locate("2aac").unwrap(), "z");
    }

    #[test]
    fn test_file_tree_round_trip() {
        let (_dir, store) = open_store();
        let tree = FileTree {
            hash: "aa".repeat(32),
            length: 3,
            stripes: vec![StripeManifest {
                hash: "bb".repeat(32),
                length: 3,
                chunks: vec![ChunkRef { hash: "cc".repeat(32) }],
            }],
        };
        store
            .store_file_tree(&tree.hash, &tree.to_json().unwrap())
            .unwrap();
        let loaded = FileTree::from_json(&store.file_tree(&tree.hash).unwrap()).unwrap();
        assert_eq!(loaded, tree);
    }

    #[test]
    fn test_missing_file_tree() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.file_tree("deadbeef"),
            Err(DirectoryError::UnknownFile(_))
        ));
    }

    #[test]
    fn test_garbage_manifest_refused() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.store_file_tree("aa", "{not json"),
            Err(DirectoryError::Corrupt(_))
        ));
    }

    #[test]
    fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DirectoryStore::open_path(dir.path()).unwrap();
            store.update_weight("n1", 3).unwrap();
            store.build_hash_slot_table().unwrap();
            store.flush().unwrap();
        }
        let store = DirectoryStore::open_path(dir.path()).unwrap();
        assert_eq!(store.weight_table().unwrap().weights["n1"], 3);
        assert_eq!(store.hash_slot_table().unwrap().node_count(), 1);
    }
}
