//! Mark-and-sweep collection with optional heap and instruction compaction.

use rustc_hash::FxHashSet;

use crate::function::FunctionEntry;
use crate::ids::{ConstantId, ForeignObjectId, FunctionId, StringId, TableId};
use crate::instance::{FunctionSlot, Instance};
use crate::value::Value;

impl Instance {
    pub fn garbage_collect(&mut self, compact_instructions: bool) {
        let (marked_tables, marked_strings, marked_foreign_objects, marked_functions, marked_constants) =
            self.mark();
        self.sweep(&marked_tables, &marked_strings, &marked_foreign_objects, &marked_functions, &marked_constants);
        self.compact_heap();
        if compact_instructions {
            self.compact_instruction_stream(&marked_functions);
        }
    }

    fn mark(
        &self,
    ) -> (
        FxHashSet<TableId>,
        FxHashSet<StringId>,
        FxHashSet<ForeignObjectId>,
        FxHashSet<FunctionId>,
        FxHashSet<ConstantId>,
    ) {
        let mut marked_tables = FxHashSet::default();
        let mut marked_strings = FxHashSet::default();
        let mut marked_foreign_objects = FxHashSet::default();
        let mut marked_functions = FxHashSet::default();
        let mut marked_constants = FxHashSet::default();

        let mut value_queue: Vec<Value> = Vec::new();
        let mut function_queue: Vec<FunctionId> = Vec::new();

        value_queue.extend(self.eval_stack.iter().copied());
        value_queue.extend(self.locals.iter().copied());
        value_queue.extend(self.globals.iter().copied());
        value_queue.extend(self.temp_gc_exempt.iter().copied());
        for cid in &self.repl_used_constants {
            if marked_constants.insert(*cid) {
                if let Some(v) = self.constants.get(*cid).and_then(|c| *c) {
                    value_queue.push(v);
                }
            }
        }
        function_queue.extend(self.repl_used_functions.iter().copied());

        loop {
            if let Some(v) = value_queue.pop() {
                self.trace_value(v, &mut marked_tables, &mut marked_strings, &mut marked_foreign_objects, &mut value_queue, &mut function_queue);
                continue;
            }
            if let Some(fid) = function_queue.pop() {
                if marked_functions.insert(fid) {
                    if let Some(FunctionSlot::Script(entry)) = self.functions.get(fid).and_then(|f| f.as_ref()) {
                        self.trace_function(entry, &mut function_queue, &mut value_queue, &mut marked_constants);
                    }
                }
                continue;
            }
            break;
        }

        (marked_tables, marked_strings, marked_foreign_objects, marked_functions, marked_constants)
    }

    fn trace_value(
        &self,
        v: Value,
        marked_tables: &mut FxHashSet<TableId>,
        marked_strings: &mut FxHashSet<StringId>,
        marked_foreign_objects: &mut FxHashSet<ForeignObjectId>,
        value_queue: &mut Vec<Value>,
        function_queue: &mut Vec<FunctionId>,
    ) {
        match v {
            Value::String(sid) => {
                marked_strings.insert(sid);
            }
            Value::Table { id, .. } | Value::InternalTableGetIterator(id) => {
                self.trace_table(id, marked_tables, value_queue);
            }
            Value::Closure { func, capture_table } => {
                function_queue.push(func);
                if let Some(cap) = capture_table {
                    self.trace_table(cap, marked_tables, value_queue);
                }
            }
            Value::ForeignObject(oid) | Value::ForeignObjectMethod { object: oid, .. } => {
                if marked_foreign_objects.insert(oid) {
                    if let Some(obj) = self.foreign_objects.get(oid).and_then(|o| o.as_ref()) {
                        let mut out = Vec::new();
                        obj.trace(&mut out);
                        value_queue.extend(out);
                    }
                }
            }
            Value::ForeignFunction(fid) => function_queue.push(fid),
            Value::Nil | Value::Number(_) | Value::Boolean(_) | Value::InternalStrHash(_) => {}
        }
    }

    fn trace_table(&self, id: TableId, marked_tables: &mut FxHashSet<TableId>, value_queue: &mut Vec<Value>) {
        if !marked_tables.insert(id) {
            return;
        }
        if let Some(t) = self.tables.get(id).and_then(|t| t.as_ref()) {
            for i in 0..t.count {
                value_queue.push(self.heap[t.block.start + i]);
            }
        }
    }

    fn trace_function(
        &self,
        entry: &FunctionEntry,
        function_queue: &mut Vec<FunctionId>,
        value_queue: &mut Vec<Value>,
        marked_constants: &mut FxHashSet<ConstantId>,
    ) {
        function_queue.extend(entry.referenced_functions.iter().copied());
        for cid in &entry.referenced_constants {
            if marked_constants.insert(*cid) {
                if let Some(v) = self.constants.get(*cid).and_then(|c| *c) {
                    value_queue.push(v);
                }
            }
        }
    }

    fn sweep(
        &mut self,
        marked_tables: &FxHashSet<TableId>,
        marked_strings: &FxHashSet<StringId>,
        marked_foreign_objects: &FxHashSet<ForeignObjectId>,
        marked_functions: &FxHashSet<FunctionId>,
        marked_constants: &FxHashSet<ConstantId>,
    ) {
        for id in self.tables.indices() {
            if self.tables[id].is_some() && !marked_tables.contains(&id) {
                let block = self.tables[id].take().unwrap().block;
                self.free_blocks.entry(block.capacity).or_default().push(block.start);
                self.table_free_list.push(id);
            }
        }

        for id in self.strings.indices() {
            if self.strings[id].is_some() && !marked_strings.contains(&id) {
                self.strings[id] = None;
                self.string_free_list.push(id);
            }
        }
        self.string_dedup.retain(|_, id| self.strings[*id].is_some());

        for id in self.foreign_objects.indices() {
            if self.foreign_objects[id].is_some() && !marked_foreign_objects.contains(&id) {
                self.foreign_objects[id] = None;
                self.foreign_object_free_list.push(id);
            }
        }

        for id in self.functions.indices() {
            let is_live = marked_functions.contains(&id);
            if self.functions[id].is_some() && !is_live {
                if let Some(FunctionSlot::Script(entry)) = &self.functions[id] {
                    let start = entry.start_address;
                    let end = entry.end_address();
                    let keys: Vec<usize> = self
                        .ip_src_map
                        .range(start..end)
                        .map(|(k, _)| *k)
                        .collect();
                    for k in keys {
                        self.ip_src_map.remove(&k);
                    }
                }
                self.functions[id] = None;
                self.function_free_list.push(id);
            }
        }

        for id in self.constants.indices() {
            if self.constants[id].is_some() && !marked_constants.contains(&id) {
                self.constants[id] = None;
                self.constant_free_list.push(id);
            }
        }
        self.constant_dedup.retain(|_, id| self.constants[*id].is_some());
    }

    fn compact_heap(&mut self) {
        let mut ids: Vec<TableId> = self.tables.indices().filter(|id| self.tables[*id].is_some()).collect();
        ids.sort_by_key(|id| self.tables[*id].as_ref().unwrap().block.start);

        let mut cursor = 0usize;
        for id in ids {
            let (old_start, count) = {
                let t = self.tables[id].as_ref().unwrap();
                (t.block.start, t.count)
            };
            if old_start != cursor {
                for i in 0..count {
                    self.heap[cursor + i] = self.heap[old_start + i];
                }
                let t = self.tables[id].as_mut().unwrap();
                for (_, slot) in t.key_hashes.iter_mut() {
                    // slots are relative to block.start and don't move.
                    let _ = slot;
                }
            }
            let t = self.tables[id].as_mut().unwrap();
            t.block.start = cursor;
            t.block.capacity = count;
            cursor += count;
        }
        self.heap.truncate(cursor);
        self.free_blocks.clear();
    }

    fn compact_instruction_stream(&mut self, marked_functions: &FxHashSet<FunctionId>) {
        let mut ids: Vec<FunctionId> = self
            .functions
            .indices()
            .filter(|id| matches!(self.functions[*id], Some(FunctionSlot::Script(_))) && marked_functions.contains(id))
            .collect();
        ids.sort_by_key(|id| match self.functions[*id].as_ref().unwrap() {
            FunctionSlot::Script(e) => e.start_address,
            FunctionSlot::Native(_) => unreachable!(),
        });

        let mut new_instructions = Vec::with_capacity(self.instructions.len());
        let mut new_src_map = std::collections::BTreeMap::new();

        for id in ids {
            let (old_start, length) = match self.functions[id].as_ref().unwrap() {
                FunctionSlot::Script(e) => (e.start_address, e.length),
                FunctionSlot::Native(_) => unreachable!(),
            };
            let new_start = new_instructions.len();
            new_instructions.extend_from_slice(&self.instructions[old_start..old_start + length]);

            for (&ip, loc) in self.ip_src_map.range(old_start..old_start + length) {
                new_src_map.insert(new_start + (ip - old_start), loc.clone());
            }

            if let Some(FunctionSlot::Script(e)) = self.functions[id].as_mut() {
                e.start_address = new_start;
            }
        }

        self.instructions = new_instructions;
        self.ip_src_map = new_src_map;
    }
}
