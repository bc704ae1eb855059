//! The embedder-facing `Instance`: the single owner of the heap, the
//! bytecode, and every registry the compiler and interpreter share. This is
//! deliberately one big struct rather than several cooperating services --
//! the GC has to walk all of it in one pass, and splitting ownership across
//! types would mean passing the same handful of `&mut` borrows everywhere
//! anyway.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use hulascript_util::error::{CompilationError, CompilerWarning, RunResult, RuntimeError};
use hulascript_util::hash::dj2b_str;
use hulascript_util::index_vec::IndexVec;
use hulascript_util::SourceLoc;

use crate::foreign::{ForeignObject, NativeFn, TableHelper};
use crate::function::FunctionEntry;
use crate::ids::{ConstantId, ForeignObjectId, FunctionId, StringId, TableId, MAX_ID};
use crate::opcode::Instruction;
use crate::table::{GcBlock, Table};
use crate::value::{TableFlags, Value};

pub(crate) enum FunctionSlot {
    Script(FunctionEntry),
    Native(NativeFn),
}

#[derive(Debug)]
pub enum RunOutcome {
    Value(Value),
    Warnings(Vec<CompilerWarning>),
    Empty,
}

pub struct Instance {
    pub(crate) heap: Vec<Value>,
    /// Free blocks, keyed by capacity, per the "smallest block with
    /// `capacity' >= capacity`" allocation policy.
    pub(crate) free_blocks: BTreeMap<usize, Vec<usize>>,
    pub(crate) tables: IndexVec<TableId, Option<Table>>,
    pub(crate) table_free_list: Vec<TableId>,

    pub(crate) strings: IndexVec<StringId, Option<String>>,
    pub(crate) string_free_list: Vec<StringId>,
    pub(crate) string_dedup: FxHashMap<u64, StringId>,

    pub(crate) functions: IndexVec<FunctionId, Option<FunctionSlot>>,
    pub(crate) function_free_list: Vec<FunctionId>,

    pub(crate) constants: IndexVec<ConstantId, Option<Value>>,
    pub(crate) constant_free_list: Vec<ConstantId>,
    pub(crate) constant_dedup: FxHashMap<u64, ConstantId>,

    pub(crate) foreign_objects: IndexVec<ForeignObjectId, Option<Box<dyn ForeignObject>>>,
    pub(crate) foreign_object_free_list: Vec<ForeignObjectId>,

    pub(crate) instructions: Vec<Instruction>,
    pub(crate) ip_src_map: BTreeMap<usize, SourceLoc>,

    pub(crate) eval_stack: Vec<Value>,
    pub(crate) locals: Vec<Value>,
    /// Call-site `ip`s of the still-active call chain, used only to
    /// reconstruct a panic's call stack -- control flow itself is native
    /// Rust recursion through `execute`, not a resumption off this stack.
    pub(crate) return_stack: Vec<usize>,
    pub(crate) extended_offsets: Vec<usize>,
    pub(crate) local_offset: usize,
    /// The instruction the interpreter loop is currently dispatching;
    /// tracked so a panic raised from deep inside a helper (e.g. a table
    /// store) can still be attributed to a source location.
    pub(crate) current_ip: usize,

    pub(crate) globals: Vec<Value>,
    pub(crate) global_names: FxHashMap<u64, usize>,

    pub(crate) temp_gc_exempt: Vec<Value>,

    pub(crate) repl_used_functions: Vec<FunctionId>,
    pub(crate) repl_used_constants: Vec<ConstantId>,
    pub(crate) declared_top_level_locals: usize,
    /// Top-level variable bindings (name hash -> local slot), persisted
    /// across `run` calls so a REPL session can keep assigning into
    /// locals it declared on an earlier line.
    pub(crate) top_level_vars: FxHashMap<u64, u8>,

    /// Set by `compile` once a top-level unit is ready; consumed by
    /// `run_loaded` after the host has acknowledged any warnings.
    pub(crate) pending_entry_ip: Option<usize>,

    /// Last runtime error swallowed by `run`; `run_checked` surfaces this
    /// directly instead of stashing it here.
    pub last_runtime_error: Option<RuntimeError>,
}

pub const MAX_GLOBALS: usize = 256;
pub const MAX_LOCALS_PER_FRAME: usize = 256;

impl Instance {
    pub fn new() -> Self {
        Self {
            heap: Vec::new(),
            free_blocks: BTreeMap::new(),
            tables: IndexVec::new(),
            table_free_list: Vec::new(),
            strings: IndexVec::new(),
            string_free_list: Vec::new(),
            string_dedup: FxHashMap::default(),
            functions: IndexVec::new(),
            function_free_list: Vec::new(),
            constants: IndexVec::new(),
            constant_free_list: Vec::new(),
            constant_dedup: FxHashMap::default(),
            foreign_objects: IndexVec::new(),
            foreign_object_free_list: Vec::new(),
            instructions: Vec::new(),
            ip_src_map: BTreeMap::new(),
            eval_stack: Vec::new(),
            locals: Vec::new(),
            return_stack: Vec::new(),
            extended_offsets: Vec::new(),
            local_offset: 0,
            current_ip: 0,
            globals: Vec::new(),
            global_names: FxHashMap::default(),
            temp_gc_exempt: Vec::new(),
            repl_used_functions: Vec::new(),
            repl_used_constants: Vec::new(),
            declared_top_level_locals: 0,
            top_level_vars: FxHashMap::default(),
            pending_entry_ip: None,
            last_runtime_error: None,
        }
    }

    // ---- compile + run -------------------------------------------------

    /// Compile `source` and, unless it produced warnings the host hasn't
    /// acknowledged, execute it immediately.
    pub fn run(
        &mut self,
        source: &str,
        file_name: Option<String>,
        repl_mode: bool,
        ignore_warnings: bool,
    ) -> Result<RunOutcome, CompilationError> {
        let unit = self.compile(source, file_name, repl_mode)?;
        self.pending_entry_ip = Some(unit.entry_ip);
        if !unit.warnings.is_empty() && !ignore_warnings {
            return Ok(RunOutcome::Warnings(unit.warnings));
        }
        match self.run_loaded() {
            Ok(Some(v)) => Ok(RunOutcome::Value(v)),
            Ok(None) => Ok(RunOutcome::Empty),
            Err(e) => {
                // Runtime errors unwind to the host boundary; surface them as
                // an empty result after rollback/GC has already happened in
                // `run_loaded`. Embedders that want the message use
                // `run_checked` below.
                self.last_runtime_error = Some(e);
                Ok(RunOutcome::Empty)
            }
        }
    }

    /// Like `run`, but surfaces a runtime error instead of swallowing it.
    pub fn run_checked(
        &mut self,
        source: &str,
        file_name: Option<String>,
        repl_mode: bool,
    ) -> anyhow::Result<Value> {
        let unit = self.compile(source, file_name, repl_mode)?;
        self.pending_entry_ip = Some(unit.entry_ip);
        if !unit.warnings.is_empty() {
            for w in &unit.warnings {
                tracing::warn!("{}", w.message);
            }
        }
        Ok(self.run_loaded()?.unwrap_or(Value::Nil))
    }

    pub fn run_loaded(&mut self) -> RunResult<Option<Value>> {
        let entry_ip = match self.pending_entry_ip.take() {
            Some(ip) => ip,
            None => return Ok(None),
        };
        let top_level_locals_before = self.declared_top_level_locals;
        let globals_before = self.globals.len();
        let result = self.execute(entry_ip);
        match &result {
            Ok(_) => {
                self.finalize();
            }
            Err(_) => {
                self.eval_stack.clear();
                self.return_stack.clear();
                self.extended_offsets.clear();
                self.local_offset = 0;
                self.locals.truncate(top_level_locals_before);
                self.globals.truncate(globals_before);
                self.declared_top_level_locals = top_level_locals_before;
                self.garbage_collect(true);
            }
        }
        result.map(Some)
    }

    /// Runs GC and, if there are no pending compiled-but-unexecuted
    /// instructions, compacts the instruction stream too.
    fn finalize(&mut self) {
        self.garbage_collect(self.pending_entry_ip.is_none());
    }

    // ---- globals --------------------------------------------------------

    pub fn declare_global(&mut self, name: &str, value: Value) -> bool {
        if self.globals.len() >= MAX_GLOBALS {
            return false;
        }
        let hash = dj2b_str(name);
        let offset = self.globals.len();
        self.globals.push(value);
        self.global_names.insert(hash, offset);
        true
    }

    // ---- value constructors ----------------------------------------------

    pub fn make_string(&mut self, s: &str) -> Value {
        Value::String(self.intern_string(s))
    }

    pub(crate) fn intern_string(&mut self, s: &str) -> StringId {
        let hash = dj2b_str(s);
        if let Some(id) = self.string_dedup.get(&hash) {
            if self.strings[*id].as_deref() == Some(s) {
                return *id;
            }
        }
        let id = if let Some(id) = self.string_free_list.pop() {
            self.strings[id] = Some(s.to_string());
            id
        } else {
            self.strings.push(Some(s.to_string()))
        };
        self.string_dedup.insert(hash, id);
        id
    }

    pub fn get_string(&self, id: StringId) -> &str {
        self.strings[id].as_deref().unwrap_or("")
    }

    /// Interns a compile-time constant, deduping on a hash of the value
    /// with an equality check against the cached slot (a hash collision
    /// only costs a missed reuse, never a wrong value).
    pub(crate) fn intern_constant(&mut self, v: Value) -> ConstantId {
        let key = self.constant_key(v);
        if let Some(id) = self.constant_dedup.get(&key) {
            if self.constants[*id] == Some(v) {
                return *id;
            }
        }
        let id = if let Some(id) = self.constant_free_list.pop() {
            self.constants[id] = Some(v);
            id
        } else {
            self.constants.push(Some(v))
        };
        self.constant_dedup.insert(key, id);
        id
    }

    fn constant_key(&self, v: Value) -> u64 {
        use hulascript_util::hash::combine;
        match v {
            Value::Nil => 0,
            Value::Boolean(b) => combine(1, b as u64),
            Value::Number(n) => combine(2, n.to_bits()),
            Value::String(sid) => combine(3, dj2b_str(self.get_string(sid))),
            Value::InternalStrHash(h) => combine(4, h),
            _ => combine(5, 0),
        }
    }

    pub fn make_foreign_function(&mut self, f: NativeFn) -> Value {
        let id = self.alloc_function_slot(FunctionSlot::Native(f));
        Value::ForeignFunction(id)
    }

    pub fn add_foreign_object(&mut self, obj: Box<dyn ForeignObject>) -> Value {
        let id = if let Some(id) = self.foreign_object_free_list.pop() {
            self.foreign_objects[id] = Some(obj);
            id
        } else {
            self.foreign_objects.push(Some(obj))
        };
        Value::ForeignObject(id)
    }

    pub(crate) fn alloc_function_slot(&mut self, slot: FunctionSlot) -> FunctionId {
        if let Some(id) = self.function_free_list.pop() {
            self.functions[id] = Some(slot);
            id
        } else {
            let id = self.functions.push(Some(slot));
            assert!(id.0 <= MAX_ID, "function id space exhausted");
            id
        }
    }

    pub fn make_table_obj(&mut self, pairs: &[(String, Value)], is_final: bool) -> RunResult<Value> {
        let id = self.allocate_table(pairs.len().max(1))?;
        for (key, value) in pairs {
            let hash = dj2b_str(key);
            self.table_emplace(id, hash, *value)?;
        }
        let mut flags = TableFlags::NONE;
        if is_final {
            flags = flags.with(TableFlags::IS_FINAL, true);
        }
        Ok(Value::Table { id, flags })
    }

    pub fn make_array(&mut self, elems: &[Value], is_final: bool) -> RunResult<Value> {
        let id = self.allocate_table(elems.len().max(1))?;
        for v in elems {
            self.table_append(id, *v)?;
        }
        let mut flags = TableFlags::NONE.with(TableFlags::ARRAY_ITERATE, true);
        if is_final {
            flags = flags.with(TableFlags::IS_FINAL, true);
        }
        Ok(Value::Table { id, flags })
    }

    // ---- table primitives (also used by TableHelper) ---------------------

    pub fn table_helper(&mut self, table: TableId) -> TableHelper<'_> {
        TableHelper {
            instance: self,
            table,
        }
    }

    pub(crate) fn table_count(&self, id: TableId) -> RunResult<usize> {
        Ok(self.tables[id].as_ref().ok_or_else(|| self.runtime_error("use of freed table"))?.count)
    }

    pub(crate) fn table_flags_raw(&self, id: TableId) -> Option<&Table> {
        self.tables[id].as_ref()
    }

    pub fn table_flags(&self, _id: TableId) -> Option<TableFlags> {
        // Flags live on the Value reference, not the Table object itself;
        // callers that only have a TableId (e.g. TableHelper) can't recover
        // them. Exposed for symmetry; returns None.
        None
    }

    pub(crate) fn table_index(&self, id: TableId, index: usize) -> RunResult<Value> {
        let table = self.tables[id].as_ref().ok_or_else(|| self.runtime_error("use of freed table"))?;
        if index >= table.count {
            return Err(self.runtime_error("table index out of range"));
        }
        Ok(self.heap[table.block.start + index])
    }

    pub(crate) fn table_swap_index(&mut self, id: TableId, a: usize, b: usize) -> RunResult<()> {
        let start = {
            let table = self.tables[id].as_ref().ok_or_else(|| self.runtime_error("use of freed table"))?;
            if a >= table.count || b >= table.count {
                return Err(self.runtime_error("table index out of range"));
            }
            table.block.start
        };
        self.heap.swap(start + a, start + b);
        Ok(())
    }

    pub(crate) fn table_get(&self, id: TableId, key_hash: u64) -> Option<Value> {
        let table = self.tables[id].as_ref()?;
        let slot = table.get_slot(key_hash)?;
        Some(self.heap[table.block.start + slot])
    }

    pub(crate) fn table_reserve(&mut self, id: TableId, additional: usize) -> RunResult<()> {
        let (count, capacity) = {
            let t = self.tables[id].as_ref().ok_or_else(|| self.runtime_error("use of freed table"))?;
            (t.count, t.block.capacity)
        };
        if count + additional > capacity {
            self.reallocate_table(id, (count + additional).max(capacity * 2).max(4))?;
        }
        Ok(())
    }

    pub(crate) fn table_append(&mut self, id: TableId, value: Value) -> RunResult<()> {
        self.table_reserve(id, 1)?;
        let table = self.tables[id].as_mut().unwrap();
        let slot = table.count;
        let start = table.block.start;
        let key_hash = slot as u64;
        table.key_hashes.insert(key_hash, slot);
        table.count += 1;
        self.heap[start + slot] = value;
        Ok(())
    }

    pub(crate) fn table_emplace(&mut self, id: TableId, key_hash: u64, value: Value) -> RunResult<()> {
        {
            let table = self.tables[id].as_ref().ok_or_else(|| self.runtime_error("use of freed table"))?;
            if let Some(slot) = table.get_slot(key_hash) {
                let start = table.block.start;
                self.heap[start + slot] = value;
                return Ok(());
            }
        }
        self.table_reserve(id, 1)?;
        let table = self.tables[id].as_mut().unwrap();
        let slot = table.count;
        let start = table.block.start;
        table.key_hashes.insert(key_hash, slot);
        table.count += 1;
        self.heap[start + slot] = value;
        Ok(())
    }

    // ---- invocation --------------------------------------------------

    pub fn invoke_value(&mut self, callee: Value, args: &[Value]) -> RunResult<Value> {
        for a in args {
            self.eval_stack.push(*a);
        }
        self.call_value(callee, args.len() as u8)
    }

    pub fn invoke_method(&mut self, obj: Value, name: &str, args: &[Value]) -> RunResult<Value> {
        let hash = dj2b_str(name);
        let method = self.load_table_property(obj, hash)?;
        self.invoke_value(method, args)
    }

    // ---- errors --------------------------------------------------------

    pub fn runtime_error(&self, message: impl Into<String>) -> RuntimeError {
        self.build_runtime_error(message.into())
    }

    /// Snapshots `return_stack` plus the currently dispatching instruction,
    /// maps each through `ip_src_map`, and collapses consecutive repeats --
    /// the shape described for panics.
    pub(crate) fn build_runtime_error(&self, message: String) -> RuntimeError {
        let mut err = RuntimeError::new(message, Vec::new());
        for &ip in &self.return_stack {
            err.push_frame(self.ip_src_map.get(&ip).cloned());
        }
        err.push_frame(self.ip_src_map.get(&self.current_ip).cloned());
        err
    }

    pub(crate) fn type_error_unsupported_op(&self, op: &str, repr: String) -> RuntimeError {
        self.runtime_error(format!("cannot {} on {}", op, repr))
    }

    pub fn panic(&self, msg: impl Into<String>) -> RuntimeError {
        self.runtime_error(msg)
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) struct CompiledUnit {
    pub entry_ip: usize,
    pub warnings: Vec<CompilerWarning>,
}
