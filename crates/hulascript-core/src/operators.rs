//! Operator dispatch and call/property-lookup primitives.
//!
//! Populated as a `[op][a-type][b-type]` table per the source's dispatch
//! design, but expressed as a match rather than a literal 3-D array --
//! `Value`'s cases aren't dense integers, so a match compiles to the same
//! thing without a type->index mapping layer.

use hulascript_util::error::RunResult;
use hulascript_util::hash::dj2b_str;

use crate::foreign::ArrayIterator;
use crate::ids::FunctionId;
use crate::instance::{FunctionSlot, Instance};
use crate::value::{TableFlags, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Exponentiate,
}

impl BinOp {
    fn name(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Subtract => "subtract",
            BinOp::Multiply => "multiply",
            BinOp::Divide => "divide",
            BinOp::Modulo => "modulo",
            BinOp::Exponentiate => "exponentiate",
        }
    }
}

fn length_hash() -> u64 {
    dj2b_str("@length")
}

fn iterator_hash() -> u64 {
    dj2b_str("iterator")
}

impl Instance {
    pub fn apply_binary(&mut self, op: BinOp, a: Value, b: Value) -> RunResult<Value> {
        match (op, a, b) {
            (BinOp::Add, Value::Number(x), Value::Number(y)) => Ok(Value::Number(x + y)),
            (BinOp::Subtract, Value::Number(x), Value::Number(y)) => Ok(Value::Number(x - y)),
            (BinOp::Multiply, Value::Number(x), Value::Number(y)) => Ok(Value::Number(x * y)),
            (BinOp::Divide, Value::Number(x), Value::Number(y)) => Ok(Value::Number(x / y)),
            (BinOp::Modulo, Value::Number(x), Value::Number(y)) => Ok(Value::Number(x % y)),
            (BinOp::Exponentiate, Value::Number(x), Value::Number(y)) => Ok(Value::Number(x.powf(y))),

            (BinOp::Add, Value::String(x), Value::String(y)) => {
                let s = format!("{}{}", self.get_string(x), self.get_string(y));
                Ok(self.make_string(&s))
            }

            (BinOp::Add, Value::Table { id: a_id, flags: a_flags }, Value::Table { id: b_id, .. }) => {
                self.table_concat(a_id, b_id, a_flags)
            }

            (BinOp::Multiply, Value::Number(n), Value::Table { id, flags }) => self.table_repeat(id, flags, n),
            (BinOp::Multiply, Value::Table { id, flags }, Value::Number(n)) => self.table_repeat(id, flags, n),

            (op, Value::ForeignObject(oid), other) => self.dispatch_foreign(op, oid, other),
            (op, other, Value::ForeignObject(oid)) => self.dispatch_foreign(op, oid, other),

            (op, a, b) => Err(self.type_error_unsupported_op(
                op.name(),
                format!("{} and {}", a.type_name(), b.type_name()),
            )),
        }
    }

    fn dispatch_foreign(&mut self, op: BinOp, oid: crate::ids::ForeignObjectId, other: Value) -> RunResult<Value> {
        let mut obj = self
            .foreign_objects
            .get_mut(oid)
            .and_then(|o| o.take())
            .ok_or_else(|| self.runtime_error("use of freed foreign object"))?;
        let result = match op {
            BinOp::Add => obj.add(other, self),
            BinOp::Subtract => obj.subtract(other, self),
            BinOp::Multiply => obj.multiply(other, self),
            BinOp::Divide => obj.divide(other, self),
            BinOp::Modulo => obj.modulo(other, self),
            BinOp::Exponentiate => obj.exponentiate(other, self),
        };
        self.foreign_objects[oid] = Some(obj);
        result
    }

    fn table_concat(&mut self, a_id: crate::ids::TableId, b_id: crate::ids::TableId, a_flags: TableFlags) -> RunResult<Value> {
        let a_count = self.table_count(a_id)?;
        let b_count = self.table_count(b_id)?;
        let new_id = self.allocate_table((a_count + b_count).max(1))?;
        for i in 0..a_count {
            let v = self.table_index(a_id, i)?;
            self.table_append(new_id, v)?;
        }
        for i in 0..b_count {
            let v = self.table_index(b_id, i)?;
            self.table_append(new_id, v)?;
        }
        Ok(Value::Table {
            id: new_id,
            flags: a_flags,
        })
    }

    fn table_repeat(&mut self, id: crate::ids::TableId, flags: TableFlags, n: f64) -> RunResult<Value> {
        if n < 0.0 || !n.is_finite() {
            return Err(self.runtime_error("table repeat count must be a non-negative finite number"));
        }
        let times = n as usize;
        let count = self.table_count(id)?;
        let new_id = self.allocate_table((count * times).max(1))?;
        for _ in 0..times {
            for i in 0..count {
                let v = self.table_index(id, i)?;
                self.table_append(new_id, v)?;
            }
        }
        Ok(Value::Table {
            id: new_id,
            flags,
        })
    }

    pub fn values_equal(&self, a: Value, b: Value) -> bool {
        self.value_hash(a) == self.value_hash(b)
    }

    fn value_hash(&self, v: Value) -> u64 {
        use hulascript_util::hash::combine;
        match v {
            Value::Nil => 0,
            Value::Boolean(b) => combine(1, b as u64),
            Value::Number(n) => combine(2, n.to_bits()),
            Value::String(sid) => combine(3, dj2b_str(self.get_string(sid))),
            Value::Table { id, .. } => combine(4, id.0 as u64),
            Value::Closure { func, .. } => combine(5, func.0 as u64),
            Value::ForeignObject(oid) => combine(6, oid.0 as u64),
            Value::ForeignObjectMethod { object, method_id } => combine(7, combine(object.0 as u64, method_id as u64)),
            Value::ForeignFunction(fid) => combine(8, fid.0 as u64),
            Value::InternalStrHash(h) => combine(9, h),
            Value::InternalTableGetIterator(id) => combine(10, id.0 as u64),
        }
    }

    /// `LOAD_TABLE`: resolve `key` on `obj`, chasing the inheritance chain
    /// and recognizing the synthetic `"@length"`/`"iterator"` keys.
    pub fn load_table_property(&mut self, obj: Value, key_hash: u64) -> RunResult<Value> {
        match obj {
            Value::ForeignObject(oid) => {
                let o = self
                    .foreign_objects
                    .get(oid)
                    .and_then(|o| o.as_ref())
                    .ok_or_else(|| self.runtime_error("use of freed foreign object"))?;
                if let Some(v) = o.load_property(key_hash) {
                    return Ok(v);
                }
                if let Some(method_id) = o.method_id_for(key_hash) {
                    return Ok(Value::ForeignObjectMethod { object: oid, method_id });
                }
                Err(self.runtime_error("no such property on foreign object"))
            }
            Value::Table { id, flags } => self.load_table_property_chased(id, flags, key_hash),
            _ => Err(self.runtime_error(format!("cannot index into {}", obj.type_name()))),
        }
    }

    fn load_table_property_chased(&mut self, id: crate::ids::TableId, flags: TableFlags, key_hash: u64) -> RunResult<Value> {
        if key_hash == length_hash() {
            return Ok(Value::Number(self.table_count(id)? as f64));
        }
        if key_hash == iterator_hash() && flags.array_iterate() {
            return Ok(Value::InternalTableGetIterator(id));
        }
        if let Some(v) = self.table_get(id, key_hash) {
            return Ok(v);
        }
        if flags.inherits_parent() {
            if let Some(base) = self.table_get(id, dj2b_str("base")) {
                if let Value::Table { id: base_id, flags: base_flags } = base {
                    return self.load_table_property_chased(base_id, base_flags, key_hash);
                }
            }
        }
        Err(self.runtime_error("no such property on table"))
    }

    /// `STORE_TABLE`: `dot_store = true` chases the inherited-parent
    /// `"base"` chain on a miss (dot syntax); bracket syntax never chases.
    pub fn store_table_property(&mut self, obj: Value, key_hash: u64, value: Value, dot_store: bool) -> RunResult<()> {
        let (id, flags) = obj
            .as_table()
            .ok_or_else(|| self.runtime_error(format!("cannot store into {}", obj.type_name())))?;
        self.store_table_property_on(id, flags, key_hash, value, dot_store)
    }

    fn store_table_property_on(
        &mut self,
        id: crate::ids::TableId,
        flags: TableFlags,
        key_hash: u64,
        value: Value,
        dot_store: bool,
    ) -> RunResult<()> {
        if self.table_get(id, key_hash).is_some() {
            return self.table_emplace(id, key_hash, value);
        }
        if dot_store && flags.inherits_parent() {
            if let Some(base) = self.table_get(id, dj2b_str("base")) {
                if let Value::Table { id: base_id, flags: base_flags } = base {
                    if self.table_get(base_id, key_hash).is_some() || base_flags.inherits_parent() {
                        return self.store_table_property_on(base_id, base_flags, key_hash, value, dot_store);
                    }
                }
            }
        }
        if flags.is_final() {
            return Err(self.runtime_error("cannot add a new key to a final (immutable) table"));
        }
        self.table_emplace(id, key_hash, value)
    }

    /// `CALL n`: dispatches on the callee's tag. `args` have already been
    /// moved onto the locals stack by the interpreter; this only handles
    /// dispatch and, for foreign callees, collecting them back out.
    pub fn call_value(&mut self, callee: Value, argc: u8) -> RunResult<Value> {
        match callee {
            Value::Closure { func, capture_table } => self.call_closure(func, capture_table, argc),
            Value::ForeignFunction(fid) => self.call_foreign_function(fid, argc),
            Value::ForeignObjectMethod { object, method_id } => self.call_foreign_method(object, method_id, argc),
            Value::InternalTableGetIterator(table_id) => {
                if argc != 0 {
                    return Err(self.runtime_error("iterator construction takes no arguments"));
                }
                Ok(self.add_foreign_object(Box::new(ArrayIterator { table: table_id, position: 0 })))
            }
            _ => Err(self.runtime_error(format!("cannot call a value of type {}", callee.type_name()))),
        }
    }

    fn call_closure(&mut self, func: FunctionId, capture_table: Option<crate::ids::TableId>, argc: u8) -> RunResult<Value> {
        let entry = match self.functions.get(func).and_then(|f| f.as_ref()) {
            Some(FunctionSlot::Script(e)) => e.clone(),
            _ => return Err(self.runtime_error("invalid function reference")),
        };
        if entry.parameter_count != argc {
            return Err(self.runtime_error(format!(
                "{} expects {} argument(s), got {}",
                entry.name, entry.parameter_count, argc
            )));
        }

        let new_local_offset = self.locals.len() - argc as usize;
        self.extended_offsets.push(self.local_offset);
        self.local_offset = new_local_offset;
        // `return_stack` (the error-trace call stack) is pushed/popped by
        // the interpreter loop around the `CALL` dispatch, not here -- this
        // function only owns the locals-frame bookkeeping that `RETURN`
        // unwinds.

        // The capture table, when present, is bound as the implicit local
        // immediately after the parameters -- matching how the compiler
        // numbers `LOAD_LOCAL` slots for captured-variable lookups.
        if let Some(cap) = capture_table {
            self.locals.push(Value::Table {
                id: cap,
                flags: TableFlags::NONE,
            });
        }

        // The interpreter drives actual execution of `entry.start_address`;
        // this hook only sets up the frame. Callers that need a *value* out
        // of a nested call site (e.g. for-loop protocol, embedder
        // `invoke_value`) use `run_function_to_completion`.
        self.run_function_to_completion(entry.start_address)
    }

    fn call_foreign_function(&mut self, fid: FunctionId, argc: u8) -> RunResult<Value> {
        let args: Vec<Value> = self.locals.split_off(self.locals.len() - argc as usize);
        let mut slot = self
            .functions
            .get_mut(fid)
            .and_then(|f| f.take())
            .ok_or_else(|| self.runtime_error("invalid foreign function reference"))?;
        let result = match &mut slot {
            FunctionSlot::Native(f) => f(&args, self),
            FunctionSlot::Script(_) => Err(self.runtime_error("invalid foreign function reference")),
        };
        self.functions[fid] = Some(slot);
        result
    }

    fn call_foreign_method(&mut self, object: crate::ids::ForeignObjectId, method_id: u32, argc: u8) -> RunResult<Value> {
        let args: Vec<Value> = self.locals.split_off(self.locals.len() - argc as usize);
        let mut obj = self
            .foreign_objects
            .get_mut(object)
            .and_then(|o| o.take())
            .ok_or_else(|| self.runtime_error("use of freed foreign object"))?;
        let result = obj.call_method(method_id, &args, self);
        self.foreign_objects[object] = Some(obj);
        result
    }

    /// Executes a nested call and returns its value, used by embedder entry
    /// points (`invoke_value`/`invoke_method`) and the for-loop protocol,
    /// both of which need a value back rather than resuming the bytecode
    /// loop at a jump target.
    pub(crate) fn run_function_to_completion(&mut self, entry_ip: usize) -> RunResult<Value> {
        self.execute(entry_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Instance {
        Instance::new()
    }

    #[test]
    fn number_add() {
        let mut inst = fresh();
        let r = inst.apply_binary(BinOp::Add, Value::Number(2.0), Value::Number(3.0)).unwrap();
        assert_eq!(r, Value::Number(5.0));
    }

    #[test]
    fn number_divide_is_true_division() {
        let mut inst = fresh();
        let r = inst.apply_binary(BinOp::Divide, Value::Number(7.0), Value::Number(2.0)).unwrap();
        assert_eq!(r, Value::Number(3.5));
    }

    #[test]
    fn string_concat() {
        let mut inst = fresh();
        let a = inst.make_string("foo");
        let b = inst.make_string("bar");
        let r = inst.apply_binary(BinOp::Add, a, b).unwrap();
        match r {
            Value::String(id) => assert_eq!(inst.get_string(id), "foobar"),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn table_subtract_is_type_error() {
        let mut inst = fresh();
        let a = inst.make_array(&[Value::Number(1.0)], true).unwrap();
        let b = inst.make_array(&[Value::Number(2.0)], true).unwrap();
        assert!(inst.apply_binary(BinOp::Subtract, a, b).is_err());
    }

    #[test]
    fn table_add_concatenates() {
        let mut inst = fresh();
        let a = inst.make_array(&[Value::Number(1.0)], false).unwrap();
        let b = inst.make_array(&[Value::Number(2.0)], false).unwrap();
        let r = inst.apply_binary(BinOp::Add, a, b).unwrap();
        let (id, _) = r.as_table().unwrap();
        assert_eq!(inst.table_count(id).unwrap(), 2);
    }
}
