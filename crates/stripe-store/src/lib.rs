pub mod chunk_node;
pub mod codec;
pub mod content;
pub mod directory;
pub mod ledger;
pub mod manifest;
pub mod metrics;
pub mod partition;
pub mod reconstruct;
pub mod rpc;

pub use chunk_node::{ChunkNode, ChunkStore};
pub use codec::{CodecError, StripeCodec};
pub use content::{content_id, slot_of, SLOT_COUNT};
pub use directory::{build_hash_slot_table, DirectoryError, HashSlotTable, SlotRange, WeightTable};
pub use ledger::{DirectoryStore, LedgerClient, LedgerError, LedgerNode};
pub use manifest::{ChunkRef, FileTree, StripeManifest};
pub use metrics::{ChunkNodeMetrics, PartitionMetrics};
pub use partition::{PartitionConfig, PartitionNode, Partitioner};
pub use reconstruct::{FetchError, Reconstructor};
pub use rpc::{ChunkError, NodePool, PartitionError, STATUS_SUCCESS};
