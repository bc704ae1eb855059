//! The block allocator backing the table heap.
//!
//! Grounded directly on the collector's own allocator: a free-block index
//! keyed by capacity, searched for the smallest block that's big enough
//! (taken as-is, never split -- fragmentation is bounded by periodic
//! compaction, not by splitting on allocate). Growing a table moves it into
//! a fresh block and frees the old one; shrinking carves the unused tail off
//! into the free list instead of moving anything.

use hulascript_util::error::RunResult;

use crate::ids::{TableId, MAX_ID};
use crate::instance::Instance;
use crate::table::{GcBlock, Table};
use crate::value::Value;

/// Triggers a GC pass before growing the heap if the new length would be a
/// large multiple of the current one; kept simple and conservative rather
/// than tuned, since there's no workload here to tune against.
const GROWTH_COLLECT_THRESHOLD: usize = 4096;

impl Instance {
    pub fn allocate_table(&mut self, capacity: usize) -> RunResult<TableId> {
        let block = self.allocate_block(capacity, true)?;
        let table = Table::new(block);
        let id = if let Some(id) = self.table_free_list.pop() {
            self.tables[id] = Some(table);
            id
        } else {
            let id = self.tables.push(Some(table));
            assert!(id.0 <= MAX_ID, "table id space exhausted");
            id
        };
        Ok(id)
    }

    pub(crate) fn allocate_block(&mut self, capacity: usize, allow_collect: bool) -> RunResult<GcBlock> {
        let found = self
            .free_blocks
            .range(capacity..)
            .next()
            .map(|(&cap, starts)| (cap, starts.first().copied()));
        if let Some((cap, Some(start))) = found {
            let list = self.free_blocks.get_mut(&cap).unwrap();
            list.remove(0);
            if list.is_empty() {
                self.free_blocks.remove(&cap);
            }
            return Ok(GcBlock { start, capacity: cap });
        }

        if allow_collect && self.heap.len() + capacity > GROWTH_COLLECT_THRESHOLD {
            self.garbage_collect(false);
            // After compaction there may now be a fitting free block.
            if let Some((&cap, starts)) = self.free_blocks.range(capacity..).next() {
                if let Some(&start) = starts.first() {
                    let list = self.free_blocks.get_mut(&cap).unwrap();
                    list.remove(0);
                    if list.is_empty() {
                        self.free_blocks.remove(&cap);
                    }
                    return Ok(GcBlock { start, capacity: cap });
                }
            }
        }

        let start = self.heap.len();
        self.heap.resize(start + capacity, Value::Nil);
        Ok(GcBlock { start, capacity })
    }

    pub(crate) fn reallocate_table(&mut self, id: TableId, new_capacity: usize) -> RunResult<()> {
        let old_block = self.tables[id].as_ref().unwrap().block;
        if new_capacity <= old_block.capacity {
            // Shrink: carve the tail off into the free list.
            let freed_capacity = old_block.capacity - new_capacity;
            if freed_capacity > 0 {
                self.free_blocks
                    .entry(freed_capacity)
                    .or_default()
                    .push(old_block.start + new_capacity);
            }
            self.tables[id].as_mut().unwrap().block.capacity = new_capacity;
            return Ok(());
        }

        let new_block = self.allocate_block(new_capacity, true)?;
        let count = self.tables[id].as_ref().unwrap().count;
        for i in 0..count {
            self.heap[new_block.start + i] = self.heap[old_block.start + i];
        }
        self.tables[id].as_mut().unwrap().block = new_block;
        self.free_blocks
            .entry(old_block.capacity)
            .or_default()
            .push(old_block.start);
        Ok(())
    }

    pub fn temp_gc_protect(&mut self, value: Value) {
        self.temp_gc_exempt.push(value);
    }

    pub fn temp_gc_unprotect(&mut self) {
        self.temp_gc_exempt.pop();
    }
}
