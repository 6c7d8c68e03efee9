//! Weighted hash-slot placement directory.
//!
//! The weight table assigns every storage node an integer weight; the hash
//! slot table derives from it, carving the ring `[0, SLOT_COUNT]` into one
//! contiguous range per node, proportional to weight. The tables serialize
//! with the ledger's canonical field names (`orgWeightTable`,
//! `hashSlotTable`, `startSlot`, `endSlot`) so state written by other
//! implementations of the directory contract stays readable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::{slot_of, SLOT_COUNT};

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DirectoryError {
    #[error("hash slot table has not been built")]
    TableMissing,
    #[error("weight table is empty or has zero total weight")]
    EmptyWeightTable,
    #[error("no node owns slot {0}")]
    NoNodeForSlot(u32),
    #[error("invalid content id: {0}")]
    InvalidContentId(String),
    #[error("no file tree stored under {0}")]
    UnknownFile(String),
    #[error("ledger rejected a conflicting write: {0}")]
    LedgerConflict(String),
    #[error("ledger storage failure: {0}")]
    Storage(String),
    #[error("malformed ledger state: {0}")]
    Corrupt(String),
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Inclusive slot range `[start, end]` owned by one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRange {
    #[serde(rename = "startSlot")]
    pub start: u32,
    #[serde(rename = "endSlot")]
    pub end: u32,
}

impl SlotRange {
    pub fn contains(&self, slot: u32) -> bool {
        self.start <= slot && slot <= self.end
    }
}

/// Node id → weight. Weight 0 keeps a node registered but effectively
/// ineligible for new placement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightTable {
    #[serde(rename = "orgWeightTable")]
    pub weights: BTreeMap<String, u64>,
}

impl WeightTable {
    /// Idempotent upsert. Does not touch any derived slot table.
    pub fn set(&mut self, id: impl Into<String>, weight: u64) {
        self.weights.insert(id.into(), weight);
    }

    pub fn total(&self) -> u64 {
        self.weights.values().sum()
    }
}

/// Node id → slot range, derived from a weight table by
/// [`build_hash_slot_table`]. Never mutated in place; rebuilds replace it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSlotTable {
    #[serde(rename = "hashSlotTable")]
    pub ranges: BTreeMap<String, SlotRange>,
}

impl HashSlotTable {
    pub fn node_count(&self) -> usize {
        self.ranges.len()
    }

    /// Node ids in lexicographic order — also ascending range order, since
    /// ranges are assigned by walking the ids in this order.
    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.ranges.keys().map(String::as_str)
    }

    /// Resolve a slot to the unique node whose range contains it.
    pub fn node_for_slot(&self, slot: u32) -> Result<&str, DirectoryError> {
        // Ids sort lexicographically and ranges are assigned in that order,
        // so the map iterates in ascending start order; binary search on it.
        let ranges: Vec<(&String, &SlotRange)> = self.ranges.iter().collect();
        let idx = ranges.partition_point(|(_, range)| range.start <= slot);
        if idx == 0 {
            return Err(DirectoryError::NoNodeForSlot(slot));
        }
        let (id, range) = ranges[idx - 1];
        if range.contains(slot) {
            Ok(id)
        } else {
            Err(DirectoryError::NoNodeForSlot(slot))
        }
    }

    /// Resolve a content identifier to the node owning its hash slot.
    pub fn locate(&self, content_id: &str) -> Result<&str, DirectoryError> {
        let slot =
            slot_of(content_id).map_err(|e| DirectoryError::InvalidContentId(e.to_string()))?;
        self.node_for_slot(slot)
    }
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

/// Derive a hash slot table from a weight table.
///
/// Walks the node ids in lexicographic order, giving each a range of
/// `floor(weight * SLOT_COUNT / total)` slots starting one past the previous
/// range's end. The last node's end is forced to `SLOT_COUNT`, absorbing the
/// rounding remainder so the ranges always cover `[0, SLOT_COUNT]` exactly.
pub fn build_hash_slot_table(weights: &WeightTable) -> Result<HashSlotTable, DirectoryError> {
    let total = weights.total();
    if weights.weights.is_empty() || total == 0 {
        return Err(DirectoryError::EmptyWeightTable);
    }

    let mut ranges = BTreeMap::new();
    let mut cursor: u32 = 0;
    let last_idx = weights.weights.len() - 1;
    for (i, (id, weight)) in weights.weights.iter().enumerate() {
        let share = (*weight as u128 * SLOT_COUNT as u128 / total as u128) as u32;
        let end = if i == last_idx { SLOT_COUNT } else { cursor + share };
        ranges.insert(id.clone(), SlotRange { start: cursor, end });
        cursor = end + 1;
    }

    Ok(HashSlotTable { ranges })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn table(entries: &[(&str, u64)]) -> WeightTable {
        let mut wt = WeightTable::default();
        for (id, w) in entries {
            wt.set(*id, *w);
        }
        wt
    }

    fn range(start: u32, end: u32) -> SlotRange {
        SlotRange { start, end }
    }

    #[test]
    fn test_build_weighted() {
        // a and b each get floor(1 * 16384 / 4) = 4096 slots past their
        // cursor; c absorbs the remainder up to 16384.
        let hst = build_hash_slot_table(&table(&[("a", 1), ("b", 1), ("c", 2)])).unwrap();
        assert_eq!(hst.ranges["a"], range(0, 4096));
        assert_eq!(hst.ranges["b"], range(4097, 8193));
        assert_eq!(hst.ranges["c"], range(8194, 16384));
    }

    #[test]
    fn test_build_rounding_absorbed_by_last() {
        let hst = build_hash_slot_table(&table(&[("x", 1), ("y", 1), ("z", 1)])).unwrap();
        assert_eq!(hst.ranges["x"], range(0, 5461));
        assert_eq!(hst.ranges["y"], range(5462, 10923));
        assert_eq!(hst.ranges["z"], range(10924, 16384));
    }

    #[test]
    fn test_build_rejects_empty_and_zero_total() {
        assert_eq!(
            build_hash_slot_table(&WeightTable::default()),
            Err(DirectoryError::EmptyWeightTable)
        );
        assert_eq!(
            build_hash_slot_table(&table(&[("a", 0), ("b", 0)])),
            Err(DirectoryError::EmptyWeightTable)
        );
    }

    #[test]
    fn test_build_single_node_owns_whole_ring() {
        let hst = build_hash_slot_table(&table(&[("solo", 7)])).unwrap();
        assert_eq!(hst.ranges["solo"], range(0, SLOT_COUNT));
    }

    #[test]
    fn test_full_coverage_no_overlap() {
        for weights in [
            table(&[("a", 1), ("b", 1), ("c", 2)]),
            table(&[("a", 3), ("b", 5), ("c", 7), ("d", 11), ("e", 13)]),
            table(&[("a", 0), ("b", 1)]),
            table(&[("only", 1)]),
        ] {
            let hst = build_hash_slot_table(&weights).unwrap();
            let mut cursor = 0u32;
            for (id, range) in &hst.ranges {
                assert_eq!(range.start, cursor, "gap or overlap before {id}");
                assert!(range.end >= range.start, "inverted range for {id}");
                cursor = range.end + 1;
            }
            assert_eq!(cursor, SLOT_COUNT + 1, "ring not fully covered");
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let weights = table(&[("b", 2), ("a", 1), ("c", 3)]);
        let one = build_hash_slot_table(&weights).unwrap();
        let two = build_hash_slot_table(&weights).unwrap();
        assert_eq!(one, two);
        assert_eq!(
            serde_json::to_string(&one).unwrap(),
            serde_json::to_string(&two).unwrap()
        );
    }

    #[test]
    fn test_last_node_end_is_ring_max() {
        let hst = build_hash_slot_table(&table(&[("a", 9), ("z", 1)])).unwrap();
        assert_eq!(hst.ranges["z"].end, SLOT_COUNT);
    }

    #[test]
    fn test_lookup_boundaries() {
        let hst = build_hash_slot_table(&table(&[("x", 1), ("y", 1), ("z", 1)])).unwrap();
        // 0x2aaa = 10922, 0x2aab = 10923, 0x2aac = 10924 — y's closing
        // boundary and z's opening one.
        assert_eq!(hst.locate("2aaa").unwrap(), "y");
        assert_eq!(hst.locate("2aab").unwrap(), "y");
        assert_eq!(hst.locate("2aac").unwrap(), "z");
        assert_eq!(hst.node_for_slot(0).unwrap(), "x");
        assert_eq!(hst.node_for_slot(SLOT_COUNT).unwrap(), "z");
    }

    #[test]
    fn test_lookup_rejects_bad_content_id() {
        let hst = build_hash_slot_table(&table(&[("a", 1)])).unwrap();
        assert!(matches!(
            hst.locate("not-hex"),
            Err(DirectoryError::InvalidContentId(_))
        ));
    }

    #[test]
    fn test_lookup_malformed_table() {
        // A hand-built table with a hole: nothing owns slots 101..=199.
        let mut hst = HashSlotTable::default();
        hst.ranges.insert("a".into(), range(0, 100));
        hst.ranges.insert("b".into(), range(200, SLOT_COUNT));
        assert_eq!(hst.node_for_slot(50).unwrap(), "a");
        assert_eq!(
            hst.node_for_slot(150),
            Err(DirectoryError::NoNodeForSlot(150))
        );
    }

    #[test]
    fn test_ledger_field_names() {
        let hst = build_hash_slot_table(&table(&[("a", 1)])).unwrap();
        let json = serde_json::to_value(&hst).unwrap();
        assert_eq!(json["hashSlotTable"]["a"]["startSlot"], 0);
        assert_eq!(json["hashSlotTable"]["a"]["endSlot"], 16384);

        let wt = table(&[("a", 3)]);
        let json = serde_json::to_value(&wt).unwrap();
        assert_eq!(json["orgWeightTable"]["a"], 3);
    }
}
