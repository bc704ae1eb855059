//! The fetch-decode-dispatch loop.
//!
//! `execute` recurses through Rust's own call stack for nested script
//! calls (see `operators::call_value`); `return_stack` only tracks call
//! sites for panic reporting, it does not drive resumption.

use hulascript_util::error::RunResult;

use crate::ids::ConstantId;
use crate::opcode::{decode_wide_id, Opcode};
use crate::operators::BinOp;
use crate::value::{TableFlags, Value};
use crate::instance::Instance;

/// Opcodes whose immediate spans two instruction slots.
fn is_wide(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::LoadConstant | Opcode::CallLabel | Opcode::CaptureFuncptr | Opcode::CaptureClosure
    )
}

impl Instance {
    /// Runs from `entry_ip` until a `RETURN` at the top of this call and
    /// returns its value. Called both for the top-level unit (by
    /// `run_loaded`) and for nested script calls (by `call_value`).
    pub fn execute(&mut self, entry_ip: usize) -> RunResult<Value> {
        let mut ip = entry_ip;
        loop {
            self.current_ip = ip;
            let instr = self.instructions[ip];
            let opcode = Opcode::from_u8(instr.opcode)
                .ok_or_else(|| self.runtime_error("invalid opcode"))?;

            let wide_id: Option<u32> = if is_wide(opcode) {
                let continuation = self.instructions[ip + 1];
                Some(decode_wide_id(instr, continuation))
            } else {
                None
            };
            let next_ip = ip + if wide_id.is_some() { 2 } else { 1 };

            match opcode {
                Opcode::PushNil => self.eval_stack.push(Value::Nil),
                Opcode::PushTrue => self.eval_stack.push(Value::Boolean(true)),
                Opcode::PushFalse => self.eval_stack.push(Value::Boolean(false)),

                Opcode::LoadConstantFast => {
                    let id = ConstantId(instr.operand as u32);
                    let v = self.constants.get(id).and_then(|c| *c).unwrap_or(Value::Nil);
                    self.eval_stack.push(v);
                }
                Opcode::LoadConstant => {
                    let id = ConstantId(wide_id.unwrap());
                    let v = self.constants.get(id).and_then(|c| *c).unwrap_or(Value::Nil);
                    self.eval_stack.push(v);
                }

                Opcode::DeclLocal => {
                    let v = self.pop_eval()?;
                    self.locals.push(v);
                }
                Opcode::DeclToplvlLocal => {
                    let v = self.pop_eval()?;
                    self.locals.push(v);
                    self.declared_top_level_locals += 1;
                }
                Opcode::ProbeLocals => {
                    self.locals.reserve(instr.operand as usize);
                }
                Opcode::UnwindLocals => {
                    let n = instr.operand as usize;
                    let new_len = self.locals.len().saturating_sub(n);
                    self.locals.truncate(new_len);
                }
                Opcode::LoadLocal => {
                    let idx = self.local_offset + instr.operand as usize;
                    let v = *self
                        .locals
                        .get(idx)
                        .ok_or_else(|| self.runtime_error("local index out of range"))?;
                    self.eval_stack.push(v);
                }
                Opcode::StoreLocal => {
                    let v = self.pop_eval()?;
                    let idx = self.local_offset + instr.operand as usize;
                    if idx >= self.locals.len() {
                        return Err(self.runtime_error("local index out of range"));
                    }
                    self.locals[idx] = v;
                }
                Opcode::LoadGlobal => {
                    let idx = instr.operand as usize;
                    let v = *self
                        .globals
                        .get(idx)
                        .ok_or_else(|| self.runtime_error("global index out of range"))?;
                    self.eval_stack.push(v);
                }
                Opcode::StoreGlobal => {
                    let v = self.pop_eval()?;
                    let idx = instr.operand as usize;
                    if idx >= self.globals.len() {
                        return Err(self.runtime_error("global index out of range"));
                    }
                    self.globals[idx] = v;
                }

                Opcode::LoadTable => {
                    let key = self.pop_eval()?;
                    let obj = self.pop_eval()?;
                    let hash = self.value_as_key_hash(key)?;
                    let v = self.load_table_property(obj, hash)?;
                    self.eval_stack.push(v);
                }
                Opcode::StoreTable => {
                    let value = self.pop_eval()?;
                    let key = self.pop_eval()?;
                    let obj = self.pop_eval()?;
                    let hash = self.value_as_key_hash(key)?;
                    self.store_table_property(obj, hash, value, instr.operand == 1)?;
                    self.eval_stack.push(value);
                }

                Opcode::AllocateTableLiteral => {
                    let n = instr.operand as usize;
                    let id = self.allocate_table(n.max(1))?;
                    self.eval_stack.push(Value::Table {
                        id,
                        flags: TableFlags::NONE,
                    });
                }
                Opcode::AllocateArrayLiteral => {
                    let n = instr.operand as usize;
                    let id = self.allocate_table(n.max(1))?;
                    self.eval_stack.push(Value::Table {
                        id,
                        flags: TableFlags::NONE.with(TableFlags::ARRAY_ITERATE, true),
                    });
                }
                Opcode::AllocateClass => {
                    let n = instr.operand as usize;
                    let id = self.allocate_table(n.max(1))?;
                    self.eval_stack.push(Value::Table {
                        id,
                        flags: TableFlags::NONE,
                    });
                }
                Opcode::AllocateInheritedClass => {
                    let n = instr.operand as usize + 1; // +1 for the "base" slot
                    let id = self.allocate_table(n)?;
                    self.eval_stack.push(Value::Table {
                        id,
                        flags: TableFlags::NONE.with(TableFlags::INHERITS_PARENT, true),
                    });
                }
                Opcode::FinalizeTable => {
                    let top = self.pop_eval()?;
                    let (id, mut flags) = top
                        .as_table()
                        .ok_or_else(|| self.runtime_error("FINALIZE_TABLE on a non-table"))?;
                    flags = flags.with(TableFlags::IS_FINAL, true);
                    self.eval_stack.push(Value::Table { id, flags });
                }

                Opcode::Call => {
                    let argc = instr.operand;
                    let callee = self.pop_callee(argc)?;
                    self.return_stack.push(ip);
                    let result = self.call_value(callee, argc);
                    self.return_stack.pop();
                    self.eval_stack.push(result?);
                }
                Opcode::CallLabel => {
                    let fid = crate::ids::FunctionId(wide_id.unwrap());
                    let argc = instr.operand;
                    self.return_stack.push(ip);
                    let result = self.call_value(
                        Value::Closure {
                            func: fid,
                            capture_table: None,
                        },
                        argc,
                    );
                    self.return_stack.pop();
                    self.eval_stack.push(result?);
                }
                Opcode::Return => {
                    let v = self.eval_stack.pop().unwrap_or(Value::Nil);
                    self.locals.truncate(self.local_offset);
                    if let Some(prev) = self.extended_offsets.pop() {
                        self.local_offset = prev;
                    }
                    return Ok(v);
                }

                Opcode::CaptureFuncptr => {
                    let fid = crate::ids::FunctionId(wide_id.unwrap());
                    self.eval_stack.push(Value::Closure {
                        func: fid,
                        capture_table: None,
                    });
                }
                Opcode::CaptureClosure => {
                    let fid = crate::ids::FunctionId(wide_id.unwrap());
                    let cap = self.pop_eval()?;
                    let (cap_id, _) = cap
                        .as_table()
                        .ok_or_else(|| self.runtime_error("capture table operand is not a table"))?;
                    self.eval_stack.push(Value::Closure {
                        func: fid,
                        capture_table: Some(cap_id),
                    });
                }

                Opcode::BringToTop => {
                    let depth = instr.operand as usize;
                    let len = self.eval_stack.len();
                    if depth >= len {
                        return Err(self.runtime_error("BRING_TO_TOP depth out of range"));
                    }
                    let v = self.eval_stack.remove(len - 1 - depth);
                    self.eval_stack.push(v);
                }
                Opcode::DuplicateTop => {
                    let v = *self
                        .eval_stack
                        .last()
                        .ok_or_else(|| self.runtime_error("DUPLICATE_TOP on empty stack"))?;
                    self.eval_stack.push(v);
                }
                Opcode::DiscardTop => {
                    self.pop_eval()?;
                }

                Opcode::JumpAhead => {
                    ip = next_ip + instr.operand as usize;
                    continue;
                }
                Opcode::JumpBack => {
                    ip = next_ip
                        .checked_sub(instr.operand as usize)
                        .ok_or_else(|| self.runtime_error("JUMP_BACK underflow"))?;
                    continue;
                }
                Opcode::IfFalseJumpAhead => {
                    let cond = self.pop_eval()?;
                    ip = if !cond.is_truthy() {
                        next_ip + instr.operand as usize
                    } else {
                        next_ip
                    };
                    continue;
                }
                Opcode::IfFalseJumpBack => {
                    let cond = self.pop_eval()?;
                    ip = if !cond.is_truthy() {
                        next_ip
                            .checked_sub(instr.operand as usize)
                            .ok_or_else(|| self.runtime_error("IF_FALSE_JUMP_BACK underflow"))?
                    } else {
                        next_ip
                    };
                    continue;
                }
                Opcode::IfntNilJumpAhead => {
                    let top = *self
                        .eval_stack
                        .last()
                        .ok_or_else(|| self.runtime_error("IFNT_NIL_JUMP_AHEAD on empty stack"))?;
                    ip = if !top.is_nil() {
                        next_ip + instr.operand as usize
                    } else {
                        self.pop_eval()?;
                        next_ip
                    };
                    continue;
                }

                Opcode::Add | Opcode::Subtract | Opcode::Multiply | Opcode::Divide | Opcode::Modulo
                | Opcode::Exponentiate => {
                    let b = self.pop_eval()?;
                    let a = self.pop_eval()?;
                    let op = match opcode {
                        Opcode::Add => BinOp::Add,
                        Opcode::Subtract => BinOp::Subtract,
                        Opcode::Multiply => BinOp::Multiply,
                        Opcode::Divide => BinOp::Divide,
                        Opcode::Modulo => BinOp::Modulo,
                        Opcode::Exponentiate => BinOp::Exponentiate,
                        _ => unreachable!(),
                    };
                    let v = self.apply_binary(op, a, b)?;
                    self.eval_stack.push(v);
                }
                Opcode::Negate => {
                    let a = self.pop_eval()?;
                    let v = self.apply_binary(BinOp::Subtract, Value::Number(0.0), a)?;
                    self.eval_stack.push(v);
                }
                Opcode::LogicalNot => {
                    let a = self.pop_eval()?;
                    self.eval_stack.push(Value::Boolean(!a.is_truthy()));
                }

                Opcode::Less | Opcode::More | Opcode::LessEqual | Opcode::MoreEqual => {
                    let b = self.pop_eval()?;
                    let a = self.pop_eval()?;
                    let (x, y) = (
                        a.as_number().ok_or_else(|| self.type_error_unsupported_op("compare", a.type_name().to_string()))?,
                        b.as_number().ok_or_else(|| self.type_error_unsupported_op("compare", b.type_name().to_string()))?,
                    );
                    let result = match opcode {
                        Opcode::Less => x < y,
                        Opcode::More => x > y,
                        Opcode::LessEqual => x <= y,
                        Opcode::MoreEqual => x >= y,
                        _ => unreachable!(),
                    };
                    self.eval_stack.push(Value::Boolean(result));
                }
                Opcode::Equals => {
                    let b = self.pop_eval()?;
                    let a = self.pop_eval()?;
                    self.eval_stack.push(Value::Boolean(self.values_equal(a, b)));
                }
                Opcode::NotEqual => {
                    let b = self.pop_eval()?;
                    let a = self.pop_eval()?;
                    self.eval_stack.push(Value::Boolean(!self.values_equal(a, b)));
                }
            }

            ip = next_ip;
        }
    }

    fn pop_eval(&mut self) -> RunResult<Value> {
        self.eval_stack
            .pop()
            .ok_or_else(|| self.runtime_error("evaluation stack underflow"))
    }

    /// `CALL n` pops the `n` just-evaluated arguments onto the locals stack
    /// (in source order) before popping the callee out from under them.
    fn pop_callee(&mut self, argc: u8) -> RunResult<Value> {
        let argc = argc as usize;
        let len = self.eval_stack.len();
        if len < argc + 1 {
            return Err(self.runtime_error("evaluation stack underflow at call"));
        }
        let args: Vec<Value> = self.eval_stack.drain(len - argc..).collect();
        let callee = self.pop_eval()?;
        self.locals.extend(args);
        Ok(callee)
    }

    fn value_as_key_hash(&mut self, key: Value) -> RunResult<u64> {
        match key {
            Value::InternalStrHash(h) => Ok(h),
            Value::Number(n) => Ok(n as u64),
            Value::String(sid) => Ok(hulascript_util::hash::dj2b_str(self.get_string(sid))),
            _ => Err(self.runtime_error(format!("cannot use a {} as a table key", key.type_name()))),
        }
    }
}
