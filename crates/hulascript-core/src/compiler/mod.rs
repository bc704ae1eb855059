//! Single-pass recursive-descent compiler.
//!
//! Holds no reference to the `Instance` it compiles into -- every method
//! threads `instance: &mut Instance` through explicitly, since the
//! compiler and the structure it's populating (constants, functions,
//! ip_src_map) are owned by the same object the top-level `compile` entry
//! point is itself a method on, and Rust won't let that method also hold a
//! second live `&mut` to `self`.

mod class;
mod expr;
mod scope;
mod stmt;

use hulascript_lex::{Lexer, Token, TokenKind};
use hulascript_util::error::{CompilationError, CompileResult, CompilerWarning};
use hulascript_util::hash::dj2b_str;
use hulascript_util::SourceLoc;
use rustc_hash::FxHashMap;

use crate::instance::{CompiledUnit, FunctionSlot, Instance};
use crate::opcode::{encode_wide_id, Instruction, Opcode};
use crate::value::Value;

use scope::{FuncCtx, Scope, VarRecord};

struct FunctionBuffer {
    instructions: Vec<Instruction>,
    locs: Vec<(usize, SourceLoc)>,
}

impl FunctionBuffer {
    fn new() -> Self {
        Self {
            instructions: Vec::new(),
            locs: Vec::new(),
        }
    }

    fn ip(&self) -> usize {
        self.instructions.len()
    }
}

pub(crate) struct Compiler<'a> {
    lexer: Lexer<'a>,
    current: Token,
    repl_mode: bool,

    code_stack: Vec<FunctionBuffer>,
    funcs: Vec<FuncCtx>,
    /// `scopes.len()` at the moment each entry of `funcs` was pushed --
    /// break/continue resolution never looks below its own function's
    /// boundary.
    func_scope_floor: Vec<usize>,
    scopes: Vec<Scope>,

    vars: FxHashMap<u64, VarRecord>,
    warnings: Vec<CompilerWarning>,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str, file_name: Option<String>, repl_mode: bool) -> CompileResult<Self> {
        let mut lexer = Lexer::new(source, file_name);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            repl_mode,
            code_stack: vec![FunctionBuffer::new()],
            funcs: vec![FuncCtx::new("<main>".to_string(), true, false, 0)],
            func_scope_floor: vec![0],
            scopes: Vec::new(),
            vars: FxHashMap::default(),
            warnings: Vec::new(),
        })
    }

    // ---- token stream helpers -------------------------------------------

    fn loc(&self) -> SourceLoc {
        self.current.loc.clone()
    }

    fn error(&self, msg: impl Into<String>) -> CompilationError {
        CompilationError::new(msg, self.loc())
    }

    fn advance(&mut self) -> CompileResult<Token> {
        let next = self.lexer.next_token()?;
        Ok(std::mem::replace(&mut self.current, next))
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> CompileResult<()> {
        if self.current.kind == kind {
            self.advance()?;
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", kind, self.current.kind)))
        }
    }

    fn eat_identifier(&mut self) -> CompileResult<String> {
        match self.current.kind.clone() {
            TokenKind::Identifier(s) => {
                self.advance()?;
                Ok(s)
            }
            other => Err(self.error(format!("expected identifier, found {:?}", other))),
        }
    }

    // ---- emission --------------------------------------------------------

    fn buf(&mut self) -> &mut FunctionBuffer {
        self.code_stack.last_mut().expect("code buffer underflow")
    }

    fn emit(&mut self, opcode: Opcode, operand: u8) -> usize {
        let loc = self.loc();
        let buf = self.buf();
        let ip = buf.ip();
        buf.instructions.push(Instruction::new(opcode, operand));
        buf.locs.push((ip, loc));
        ip
    }

    fn emit_wide(&mut self, opcode: Opcode, id: u32) -> usize {
        let loc = self.loc();
        let buf = self.buf();
        let ip = buf.ip();
        for instr in encode_wide_id(opcode, id) {
            buf.instructions.push(instr);
        }
        buf.locs.push((ip, loc));
        ip
    }

    /// Patches a forward jump emitted at `ip` so it lands at the buffer's
    /// current end.
    fn patch_jump_ahead(&mut self, ip: usize) -> CompileResult<()> {
        let target = self.buf().ip();
        let offset = target - (ip + 1);
        if offset > u8::MAX as usize {
            return Err(self.error("jump target too far (max 255 instructions)"));
        }
        self.buf().instructions[ip].operand = offset as u8;
        Ok(())
    }

    /// Emits a backward jump from the current position to `target_ip`.
    fn emit_jump_back(&mut self, opcode: Opcode, target_ip: usize) -> CompileResult<usize> {
        let ip = self.buf().ip();
        let offset = (ip + 1) - target_ip;
        if offset > u8::MAX as usize {
            return Err(self.error("jump target too far (max 255 instructions)"));
        }
        Ok(self.emit(opcode, offset as u8))
    }

    // ---- constants ---------------------------------------------------

    fn load_number(&mut self, instance: &mut Instance, n: f64) {
        self.load_constant_value(instance, Value::Number(n));
    }

    fn load_constant_value(&mut self, instance: &mut Instance, v: Value) {
        let id = instance.intern_constant(v);
        if let Some(ctx) = self.funcs.last_mut() {
            ctx.referenced_constants.insert(id);
        }
        if id.0 <= u8::MAX as u32 {
            self.emit(Opcode::LoadConstantFast, id.0 as u8);
        } else {
            self.emit_wide(Opcode::LoadConstant, id.0);
        }
    }

    fn load_string(&mut self, instance: &mut Instance, s: &str) {
        let v = instance.make_string(s);
        self.load_constant_value(instance, v);
    }

    fn name_hash_key(&mut self, instance: &mut Instance, name: &str) {
        let h = dj2b_str(name);
        self.load_constant_value(instance, Value::InternalStrHash(h));
    }

    // ---- variable resolution -------------------------------------------

    fn current_func_depth(&self) -> usize {
        self.funcs.len() - 1
    }

    /// Declares `name` as a new local in the innermost scope of the
    /// current function, or as a top-level local at depth 0.
    fn declare_local(&mut self, name: &str, top_level: bool) -> CompileResult<()> {
        let hash = dj2b_str(name);
        let depth = self.current_func_depth();
        let ctx = self.funcs.last_mut().unwrap();
        if ctx.next_local == u8::MAX {
            return Err(self.error("too many locals in one function (max 256)"));
        }
        let offset = ctx.next_local;
        ctx.next_local += 1;
        self.vars.insert(
            hash,
            VarRecord {
                is_global: false,
                offset,
                func_depth: depth,
            },
        );
        if let Some(scope) = self.scopes.last_mut() {
            scope.declared_hashes.push(hash);
            scope.declared_count += 1;
        }
        self.emit(if top_level { Opcode::DeclToplvlLocal } else { Opcode::DeclLocal }, offset);
        Ok(())
    }

    fn declare_global(&mut self, instance: &mut Instance, name: &str, value_emitted: bool) -> CompileResult<()> {
        if !value_emitted {
            self.emit(Opcode::PushNil, 0);
        }
        let hash = dj2b_str(name);
        let offset = instance.globals.len();
        if offset >= crate::instance::MAX_GLOBALS {
            return Err(self.error("too many globals (max 256)"));
        }
        instance.globals.push(Value::Nil);
        instance.global_names.insert(hash, offset as usize);
        self.vars.insert(
            hash,
            VarRecord {
                is_global: true,
                offset: offset as u8,
                func_depth: 0,
            },
        );
        self.emit(Opcode::StoreGlobal, offset as u8);
        Ok(())
    }

    /// Emits code to load `name`'s current value, resolving local vs.
    /// global vs. captured-from-an-outer-function.
    fn load_variable(&mut self, instance: &mut Instance, name: &str) -> CompileResult<()> {
        let hash = dj2b_str(name);
        let record = *self
            .vars
            .get(&hash)
            .ok_or_else(|| self.error(format!("undefined variable `{}`", name)))?;
        if record.is_global {
            self.emit(Opcode::LoadGlobal, record.offset);
        } else if record.func_depth == self.current_func_depth() {
            self.emit(Opcode::LoadLocal, record.offset);
        } else {
            self.load_captured(instance, name, hash)?;
        }
        Ok(())
    }

    fn load_captured(&mut self, instance: &mut Instance, name: &str, hash: u64) -> CompileResult<()> {
        let cap_local = self.register_capture(name, hash)?;
        self.emit(Opcode::LoadLocal, cap_local);
        self.name_hash_key(instance, name);
        self.emit(Opcode::LoadTable, 0);
        Ok(())
    }

    fn register_capture(&mut self, name: &str, hash: u64) -> CompileResult<u8> {
        {
            let ctx = self.funcs.last().unwrap();
            if ctx.no_capture {
                return Err(self.error(format!(
                    "`{}` is captured from an outer function, but this function is `no_capture`",
                    name
                )));
            }
            if ctx.is_class_method {
                return Err(self.error(format!(
                    "`{}` is captured from an outer function, which is not allowed inside class methods",
                    name
                )));
            }
        }
        let ctx = self.funcs.last_mut().unwrap();
        ctx.captured.entry(hash).or_insert_with(|| name.to_string());
        let cap_local = ctx.capture_local;
        match cap_local {
            Some(slot) => Ok(slot),
            None => Err(self.error("internal: capture-table local not reserved")),
        }
    }

    /// Reserves the implicit `capture_table_<id>` local right after
    /// parameters are bound -- unconditionally, so that a call through
    /// `CAPTURE_CLOSURE` (which always pushes a capture table, even an
    /// empty one, for any non-`no_capture` non-method function) lands on
    /// a slot number fixed at compile time.
    fn maybe_reserve_capture_local(&mut self) {
        let ctx = self.funcs.last_mut().unwrap();
        if !ctx.no_capture && !ctx.is_class_method {
            let slot = ctx.next_local;
            ctx.next_local += 1;
            ctx.capture_local = Some(slot);
        }
    }

    /// Emits code to store the top-of-eval-stack value into `name`,
    /// declaring it as a fresh local if it isn't bound anywhere visible.
    fn store_variable(&mut self, instance: &mut Instance, name: &str) -> CompileResult<()> {
        let hash = dj2b_str(name);
        if let Some(record) = self.vars.get(&hash).copied() {
            if record.is_global {
                self.emit(Opcode::StoreGlobal, record.offset);
                return Ok(());
            }
            if record.func_depth == self.current_func_depth() {
                self.emit(Opcode::StoreLocal, record.offset);
                return Ok(());
            }
            // Assigning into a captured name from an outer function is
            // not supported by this variable-resolution model: captures
            // are snapshot-by-value into a capture table at closure
            // creation, not a live alias.
            return Err(self.error(format!(
                "cannot assign to `{}`: it is captured from an outer function",
                name
            )));
        }
        self.declare_local(name, self.funcs.len() == 1)
    }

    // ---- scopes ----------------------------------------------------------

    fn push_scope(&mut self, is_loop: bool) {
        self.scopes.push(Scope::new(is_loop));
    }

    fn pop_scope(&mut self) -> Scope {
        let scope = self.scopes.pop().expect("scope underflow");
        for hash in &scope.declared_hashes {
            self.vars.remove(hash);
        }
        scope
    }

    fn func_scope_floor(&self) -> usize {
        *self.func_scope_floor.last().unwrap()
    }

    /// Locals declared from the innermost scope down through (and
    /// including) the nearest enclosing loop scope -- the count
    /// `break`/`continue` must unwind.
    fn unwind_count_to_nearest_loop(&self) -> Option<u8> {
        let floor = self.func_scope_floor();
        let mut total = 0u8;
        for scope in self.scopes[floor..].iter().rev() {
            total += scope.declared_count;
            if scope.is_loop {
                return Some(total);
            }
        }
        None
    }

    // ---- function finalization -------------------------------------------

    fn finalize_function(&mut self, instance: &mut Instance) -> Option<FuncCtx> {
        let mut ctx = self.funcs.pop()?;
        self.func_scope_floor.pop();
        let buf = self.code_stack.pop().unwrap();

        let start_address = instance.instructions.len();
        ctx.start_address = start_address;
        instance.instructions.extend(buf.instructions);
        for (local_ip, loc) in buf.locs {
            instance.ip_src_map.insert(start_address + local_ip, loc);
        }

        if let Some(id) = ctx.id {
            let entry = crate::function::FunctionEntry {
                name: ctx.name.clone(),
                start_address,
                length: instance.instructions.len() - start_address,
                parameter_count: ctx.param_count,
                referenced_functions: ctx.referenced_functions.clone(),
                referenced_constants: ctx.referenced_constants.clone(),
            };
            instance.functions[id] = Some(FunctionSlot::Script(entry));
        }

        Some(ctx)
    }

    // ---- function literals -------------------------------------------

    /// Parses `(params) BLOCK end` (the `function`/`no_capture function`
    /// keywords have already been consumed) into a freshly finalized
    /// function, returning its context so the caller can emit the
    /// call-site capture sequence.
    pub(super) fn compile_function_body(
        &mut self,
        instance: &mut Instance,
        name: String,
        no_capture: bool,
        is_class_method: bool,
    ) -> CompileResult<FuncCtx> {
        self.eat(TokenKind::OpenParen)?;
        let mut param_names = Vec::new();
        // Class methods never declare `self` in their own parameter list --
        // it's bound implicitly as parameter 0 by the caller's method-call
        // sugar (`obj.method(args)` passes `obj` as the first argument).
        if is_class_method {
            param_names.push("self".to_string());
        }
        if !self.check(&TokenKind::CloseParen) {
            loop {
                param_names.push(self.eat_identifier()?);
                if self.check(&TokenKind::Comma) {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::CloseParen)?;

        let placeholder = crate::function::FunctionEntry {
            name: name.clone(),
            start_address: 0,
            length: 0,
            parameter_count: param_names.len() as u8,
            referenced_functions: Default::default(),
            referenced_constants: Default::default(),
        };
        let fid = instance.alloc_function_slot(FunctionSlot::Script(placeholder));

        self.code_stack.push(FunctionBuffer::new());
        let mut ctx = FuncCtx::new(name, no_capture, is_class_method, 0);
        ctx.id = Some(fid);
        self.funcs.push(ctx);
        self.func_scope_floor.push(self.scopes.len());
        self.push_scope(false);

        let depth = self.current_func_depth();
        for pname in &param_names {
            let hash = dj2b_str(pname);
            let ctx = self.funcs.last_mut().unwrap();
            let offset = ctx.next_local;
            ctx.next_local += 1;
            ctx.param_count += 1;
            self.vars.insert(
                hash,
                VarRecord {
                    is_global: false,
                    offset,
                    func_depth: depth,
                },
            );
            self.scopes.last_mut().unwrap().declared_hashes.push(hash);
        }
        self.maybe_reserve_capture_local();

        while !self.check(&TokenKind::End) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error("unexpected end of input inside function body"));
            }
            self.statement(instance)?;
        }
        self.advance()?; // `end`

        let body_returns = self.scopes.last().unwrap().all_code_paths_return;
        self.pop_scope();
        if !body_returns {
            self.emit(Opcode::PushNil, 0);
            self.emit(Opcode::Return, 0);
        }

        Ok(self.finalize_function(instance).unwrap())
    }

    /// Emits the call-site sequence for a just-finalized function value:
    /// `CAPTURE_FUNCPTR` for `no_capture`/class-method functions (nothing
    /// to snapshot), otherwise a fresh capture table followed by
    /// `CAPTURE_CLOSURE` -- built even when `captured` is empty, since the
    /// callee already reserved a fixed local slot for it.
    pub(super) fn emit_function_value(&mut self, instance: &mut Instance, ctx: &FuncCtx) -> CompileResult<()> {
        let fid = ctx.id.unwrap();
        if let Some(caller) = self.funcs.last_mut() {
            caller.referenced_functions.insert(fid);
        }
        if ctx.no_capture || ctx.is_class_method {
            self.emit_wide(Opcode::CaptureFuncptr, fid.0);
            return Ok(());
        }
        let captured: Vec<(u64, String)> = ctx.captured.iter().map(|(h, n)| (*h, n.clone())).collect();
        if captured.len() > u8::MAX as usize {
            return Err(self.error("function captures more than 255 variables"));
        }
        self.emit(Opcode::AllocateTableLiteral, captured.len() as u8);
        for (hash, name) in &captured {
            self.emit(Opcode::DuplicateTop, 0);
            self.load_constant_value(instance, Value::InternalStrHash(*hash));
            self.load_variable(instance, name)?;
            self.emit(Opcode::StoreTable, 0);
            self.emit(Opcode::DiscardTop, 0);
        }
        self.emit_wide(Opcode::CaptureClosure, fid.0);
        Ok(())
    }

    // ---- top-level entry point -------------------------------------------

    fn compile_unit(&mut self, instance: &mut Instance) -> CompileResult<CompiledUnit> {
        if self.repl_mode {
            self.vars.extend(instance.top_level_vars.iter().map(|(&hash, &offset)| {
                (
                    hash,
                    VarRecord {
                        is_global: false,
                        offset,
                        func_depth: 0,
                    },
                )
            }));
            self.funcs[0].next_local = instance.declared_top_level_locals as u8;
        }
        for (&hash, &offset) in &instance.global_names {
            self.vars.insert(
                hash,
                VarRecord {
                    is_global: true,
                    offset: offset as u8,
                    func_depth: 0,
                },
            );
        }

        self.push_scope(false);
        let mut tail_value = false;
        while !self.check(&TokenKind::Eof) {
            tail_value = self.top_level_statement(instance)?;
        }
        let top_scope = self.pop_scope();
        let all_return = top_scope.all_code_paths_return;

        if !all_return {
            if !tail_value {
                self.emit(Opcode::PushNil, 0);
            }
            self.emit(Opcode::Return, 0);
        }

        if self.repl_mode {
            for (&hash, record) in self.vars.iter() {
                if !record.is_global && record.func_depth == 0 {
                    instance.top_level_vars.insert(hash, record.offset);
                }
            }
        }

        let ctx = self.finalize_function(instance).unwrap();
        let entry_ip = ctx.start_address;

        Ok(CompiledUnit {
            entry_ip,
            warnings: std::mem::take(&mut self.warnings),
        })
    }
}

impl Instance {
    pub(crate) fn compile(
        &mut self,
        source: &str,
        file_name: Option<String>,
        repl_mode: bool,
    ) -> CompileResult<CompiledUnit> {
        let mut compiler = Compiler::new(source, file_name, repl_mode)?;
        compiler.compile_unit(self)
    }
}
