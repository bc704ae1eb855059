//! The foreign-object and foreign-function interface: the boundary across
//! which host (embedding) code participates in script evaluation.

use hulascript_util::error::RunResult;

use crate::instance::Instance;
use crate::value::Value;

/// Capability set a host type implements to be exposed into scripts as a
/// value. Every arithmetic hook defaults to a type error so implementers
/// only override the operators they actually support (a matrix type
/// overrides `add`/`multiply`; most foreign objects override none).
pub trait ForeignObject {
    fn load_property(&self, name_hash: u64) -> Option<Value>;

    /// Resolves a property name to a bound-method id, if `name_hash` names
    /// one of this object's methods. The instance wraps the result in a
    /// `Value::ForeignObjectMethod` carrying the object's id, since the
    /// object itself doesn't know its own id.
    fn method_id_for(&self, _name_hash: u64) -> Option<u32> {
        None
    }

    fn call_method(
        &mut self,
        method_id: u32,
        args: &[Value],
        instance: &mut Instance,
    ) -> RunResult<Value>;

    fn add(&self, _other: Value, instance: &Instance) -> RunResult<Value> {
        Err(instance.type_error_unsupported_op("add", self.to_string_repr()))
    }
    fn subtract(&self, _other: Value, instance: &Instance) -> RunResult<Value> {
        Err(instance.type_error_unsupported_op("subtract", self.to_string_repr()))
    }
    fn multiply(&self, _other: Value, instance: &Instance) -> RunResult<Value> {
        Err(instance.type_error_unsupported_op("multiply", self.to_string_repr()))
    }
    fn divide(&self, _other: Value, instance: &Instance) -> RunResult<Value> {
        Err(instance.type_error_unsupported_op("divide", self.to_string_repr()))
    }
    fn modulo(&self, _other: Value, instance: &Instance) -> RunResult<Value> {
        Err(instance.type_error_unsupported_op("modulo", self.to_string_repr()))
    }
    fn exponentiate(&self, _other: Value, instance: &Instance) -> RunResult<Value> {
        Err(instance.type_error_unsupported_op("exponentiate", self.to_string_repr()))
    }

    /// Contribute additional GC roots reachable only through this object
    /// (e.g. values captured in a host closure).
    fn trace(&self, out: &mut Vec<Value>) {
        let _ = out;
    }

    fn to_string_repr(&self) -> String;
}

/// A host closure invocable from scripts, e.g. a standard-library function.
pub type NativeFn = Box<dyn FnMut(&[Value], &mut Instance) -> RunResult<Value>>;

/// The built-in iterator protocol: `load_property("iterator")` on an
/// array-iterate table yields a callable producing one of these, which
/// scripts drive through `hasNext()`/`next()`.
pub struct ArrayIterator {
    pub table: crate::ids::TableId,
    pub position: usize,
}

pub const METHOD_HAS_NEXT: u32 = 0;
pub const METHOD_NEXT: u32 = 1;

impl ForeignObject for ArrayIterator {
    fn load_property(&self, _name_hash: u64) -> Option<Value> {
        None
    }

    fn method_id_for(&self, name_hash: u64) -> Option<u32> {
        use hulascript_util::hash::dj2b_str;
        if name_hash == dj2b_str("hasNext") {
            Some(METHOD_HAS_NEXT)
        } else if name_hash == dj2b_str("next") {
            Some(METHOD_NEXT)
        } else {
            None
        }
    }

    fn call_method(
        &mut self,
        method_id: u32,
        _args: &[Value],
        instance: &mut Instance,
    ) -> RunResult<Value> {
        match method_id {
            METHOD_HAS_NEXT => {
                let count = instance.table_count(self.table)?;
                Ok(Value::Boolean(self.position < count))
            }
            METHOD_NEXT => {
                let v = instance.table_index(self.table, self.position)?;
                self.position += 1;
                Ok(v)
            }
            _ => Err(instance.runtime_error("unknown iterator method")),
        }
    }

    fn to_string_repr(&self) -> String {
        "<array iterator>".to_string()
    }
}

/// Host-facing helper for manipulating a table without going through
/// bytecode. Growth past capacity is the only operation that can trigger a
/// GC; the value being appended is pushed to `temp_gc_exempt` for the
/// duration of that window so a collection mid-append can't reclaim it.
pub struct TableHelper<'a> {
    pub(crate) instance: &'a mut Instance,
    pub(crate) table: crate::ids::TableId,
}

impl<'a> TableHelper<'a> {
    pub fn size(&self) -> usize {
        self.instance.table_count(self.table).unwrap_or(0)
    }

    pub fn is_array(&self) -> bool {
        self.instance.table_flags(self.table).map(|f| f.array_iterate()).unwrap_or(false)
    }

    pub fn at_index(&self, index: usize) -> RunResult<Value> {
        self.instance.table_index(self.table, index)
    }

    pub fn swap_index(&mut self, a: usize, b: usize) -> RunResult<()> {
        self.instance.table_swap_index(self.table, a, b)
    }

    pub fn reserve(&mut self, additional: usize) -> RunResult<()> {
        self.instance.table_reserve(self.table, additional)
    }

    pub fn append(&mut self, value: Value) -> RunResult<()> {
        self.instance.temp_gc_protect(value);
        let result = self.instance.table_append(self.table, value);
        self.instance.temp_gc_unprotect();
        result
    }

    pub fn get(&self, key_hash: u64) -> Option<Value> {
        self.instance.table_get(self.table, key_hash)
    }

    pub fn emplace(&mut self, key_hash: u64, value: Value) -> RunResult<()> {
        self.instance.table_emplace(self.table, key_hash, value)
    }
}
