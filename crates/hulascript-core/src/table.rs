//! Tables: the sole aggregate data structure in HulaScript.

use indexmap::IndexMap;

/// A half-open slice `[start, start+capacity)` of the heap owned by one table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcBlock {
    pub start: usize,
    pub capacity: usize,
}

impl GcBlock {
    pub fn end(&self) -> usize {
        self.start + self.capacity
    }
}

/// `{ block, count, key_hashes }` per the data model: elements live at
/// `heap[block.start + slot]`, keyed by hash only (collisions are treated as
/// equality -- a documented trade-off, not a bug). `count` is the
/// insertion-order watermark used for array-style iteration.
#[derive(Clone, Debug)]
pub struct Table {
    pub block: GcBlock,
    pub count: usize,
    /// hash -> slot index, insertion-ordered so `"@length"`/array iteration
    /// and `key_hashes.len() == count` both hold as declared invariants.
    pub key_hashes: IndexMap<u64, usize>,
}

impl Table {
    pub fn new(block: GcBlock) -> Self {
        Self {
            block,
            count: 0,
            key_hashes: IndexMap::new(),
        }
    }

    pub fn get_slot(&self, key_hash: u64) -> Option<usize> {
        self.key_hashes.get(&key_hash).copied()
    }

    pub fn is_array_index_available(&self) -> bool {
        self.count < self.block.capacity
    }
}
