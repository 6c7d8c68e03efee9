//! CLI definitions for stripevault.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(
    name = "stripevault",
    version,
    about = "Erasure-coded distributed file storage\n\nFiles split into stripes, stripes into Reed-Solomon chunks, and chunks spread across weighted hash slots on a cluster of storage nodes.",
    long_about = None
)]
pub struct Cli {
    /// Path to cluster.toml config file
    #[clap(long, short, default_value = "cluster.toml")]
    pub config: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the directory ledger daemon
    LedgerNode,

    /// Run a chunk storage daemon
    ChunkNode,

    /// Run the partition service daemon
    PartitionNode,

    /// Erasure-code a file into the cluster and print its file hash
    StoreFile {
        /// Partition service address (default: [partition].listen from config)
        #[clap(long)]
        addr: Option<String>,

        /// File to store
        #[clap(long)]
        file: PathBuf,
    },

    /// Reconstruct a stored file by its hash
    RequestFile {
        /// Ledger address (default: [ledger].addr from config)
        #[clap(long)]
        addr: Option<String>,

        /// Content hash of the requested file
        #[clap(long)]
        hash: String,

        /// Where to write the reconstructed bytes
        #[clap(long)]
        out: PathBuf,
    },

    /// Upsert a storage node's placement weight on the ledger
    UpdateWeight {
        /// Node id, the `host:port` of its chunk RPC listener
        #[clap(long)]
        id: String,

        /// Non-negative weight; 0 stops new placement on the node
        #[clap(long)]
        weight: u64,
    },

    /// Rebuild the hash slot table from the current weights and print it
    BuildTable,

    /// Resolve a content hash to the node owning its slot
    Locate {
        #[clap(long)]
        hash: String,
    },

    /// Print an example cluster.toml to stdout
    Init,
}
