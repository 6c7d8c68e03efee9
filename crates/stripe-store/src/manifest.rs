//! File-tree manifests.
//!
//! A manifest records everything needed to reconstruct one stored file: the
//! file hash, its original length, and the ordered stripes with their ordered
//! chunk hashes. Chunk order within a stripe is the codec's shard index and
//! must survive the round trip through the ledger.
//!
//! The JSON field names (`fileHash`, `stripeHashes`, `stripeHash`,
//! `chunkHashes`, `chunkHash`) are the cross-implementation contract; unknown
//! fields are ignored on read, missing ones fail parsing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("malformed file tree: {0}")]
    Parse(String),
    #[error("file tree serialization failed: {0}")]
    Serialize(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    #[serde(rename = "chunkHash")]
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StripeManifest {
    #[serde(rename = "stripeHash")]
    pub hash: String,
    /// Pre-padding byte length of the stripe; reconstruction truncates the
    /// joined data shards to this.
    #[serde(rename = "stripeLength")]
    pub length: u64,
    #[serde(rename = "chunkHashes")]
    pub chunks: Vec<ChunkRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTree {
    #[serde(rename = "fileHash")]
    pub hash: String,
    /// Byte length of the original file.
    #[serde(rename = "fileLength")]
    pub length: u64,
    #[serde(rename = "stripeHashes")]
    pub stripes: Vec<StripeManifest>,
}

impl FileTree {
    pub fn to_json(&self) -> Result<String, ManifestError> {
        serde_json::to_string(self).map_err(|e| ManifestError::Serialize(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, ManifestError> {
        serde_json::from_str(json).map_err(|e| ManifestError::Parse(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> FileTree {
        FileTree {
            hash: "f0".repeat(32),
            length: 11,
            stripes: vec![StripeManifest {
                hash: "ab".repeat(32),
                length: 11,
                chunks: vec![
                    ChunkRef { hash: "01".repeat(32) },
                    ChunkRef { hash: "02".repeat(32) },
                ],
            }],
        }
    }

    #[test]
    fn test_round_trip_preserves_chunk_order() {
        let tree = sample_tree();
        let parsed = FileTree::from_json(&tree.to_json().unwrap()).unwrap();
        assert_eq!(parsed, tree);
        assert_eq!(parsed.stripes[0].chunks[0].hash, "01".repeat(32));
        assert_eq!(parsed.stripes[0].chunks[1].hash, "02".repeat(32));
    }

    #[test]
    fn test_wire_field_names() {
        let json: serde_json::Value =
            serde_json::from_str(&sample_tree().to_json().unwrap()).unwrap();
        assert!(json.get("fileHash").is_some());
        assert!(json.get("fileLength").is_some());
        let stripe = &json["stripeHashes"][0];
        assert!(stripe.get("stripeHash").is_some());
        assert!(stripe.get("stripeLength").is_some());
        assert!(stripe["chunkHashes"][0].get("chunkHash").is_some());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "fileHash": "aa",
            "fileLength": 4,
            "futureField": {"nested": true},
            "stripeHashes": [
                {"stripeHash": "bb", "stripeLength": 4, "chunkHashes": [
                    {"chunkHash": "cc", "replicaHint": 2}
                ], "extra": 1}
            ]
        }"#;
        let tree = FileTree::from_json(json).unwrap();
        assert_eq!(tree.hash, "aa");
        assert_eq!(tree.stripes[0].chunks[0].hash, "cc");
    }

    #[test]
    fn test_missing_required_field_fails() {
        let json = r#"{"fileHash": "aa", "fileLength": 4}"#;
        assert!(FileTree::from_json(json).is_err());
        let json = r#"{"fileLength": 4, "stripeHashes": []}"#;
        assert!(FileTree::from_json(json).is_err());
    }

    #[test]
    fn test_empty_file_tree() {
        let tree = FileTree { hash: "e3".repeat(32), length: 0, stripes: vec![] };
        let parsed = FileTree::from_json(&tree.to_json().unwrap()).unwrap();
        assert!(parsed.stripes.is_empty());
        assert_eq!(parsed.length, 0);
    }
}
