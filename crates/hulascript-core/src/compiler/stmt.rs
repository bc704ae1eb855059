//! Statement compilation: control flow, declarations, and the
//! expression-statement fallback.

use hulascript_lex::TokenKind;
use hulascript_util::error::{CompileResult, CompilerWarning};
use hulascript_util::hash::dj2b_str;

use crate::instance::Instance;
use crate::opcode::Opcode;

use super::scope::VarRecord;
use super::Compiler;

impl<'a> Compiler<'a> {
    pub(super) fn statement(&mut self, instance: &mut Instance) -> CompileResult<()> {
        match self.current.kind {
            TokenKind::While => self.while_stmt(instance),
            TokenKind::Do => self.do_while_stmt(instance),
            TokenKind::If => self.if_stmt(instance),
            TokenKind::For => self.for_stmt(instance),
            TokenKind::Return => self.return_stmt(instance),
            TokenKind::Break => self.break_stmt(),
            TokenKind::Continue => self.continue_stmt(),
            TokenKind::Global => self.global_stmt(instance),
            TokenKind::Function => self.function_decl_stmt(instance),
            TokenKind::NoCapture => self.no_capture_decl_stmt(instance),
            TokenKind::Class => self.class_decl_stmt(instance),
            _ => self.expression_stmt(instance),
        }
    }

    /// Like [`statement`](Self::statement), but used only for the top-level
    /// unit's statement list, where there's no enclosing `return` to make a
    /// trailing expression's value explicit. Whichever statement turns out
    /// to be the last one in the source has its value kept on the stack
    /// rather than discarded -- a bare `for` there compiles via the
    /// value-producing form rather than the discarding one, since there's
    /// no way to tell in advance which one a program's last line will be.
    /// Returns whether a value was left on the stack.
    pub(super) fn top_level_statement(&mut self, instance: &mut Instance) -> CompileResult<bool> {
        match self.current.kind {
            TokenKind::While
            | TokenKind::Do
            | TokenKind::If
            | TokenKind::Return
            | TokenKind::Break
            | TokenKind::Continue
            | TokenKind::Global
            | TokenKind::Function
            | TokenKind::NoCapture
            | TokenKind::Class => {
                self.statement(instance)?;
                Ok(false)
            }
            TokenKind::For => {
                self.for_expr(instance)?;
                if self.check(&TokenKind::Eof) {
                    Ok(true)
                } else {
                    self.emit(Opcode::DiscardTop, 0);
                    Ok(false)
                }
            }
            _ => {
                self.expression(instance)?;
                if self.check(&TokenKind::Eof) {
                    Ok(true)
                } else {
                    self.emit(Opcode::DiscardTop, 0);
                    Ok(false)
                }
            }
        }
    }

    /// Compiles statements until the current token matches one of
    /// `terminators`, without consuming it.
    fn block_until(&mut self, instance: &mut Instance, terminators: &[TokenKind]) -> CompileResult<()> {
        while !terminators.iter().any(|t| &self.current.kind == t) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error("unexpected end of input"));
            }
            self.statement(instance)?;
        }
        Ok(())
    }

    fn expression_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.expression(instance)?;
        self.emit(Opcode::DiscardTop, 0);
        Ok(())
    }

    // ---- while / do-while --------------------------------------------------

    fn while_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `while`
        self.push_scope(true);

        let cond_ip = self.buf().ip();
        self.expression(instance)?;
        let exit_patch = self.emit(Opcode::IfFalseJumpAhead, 0);
        self.eat(TokenKind::Do)?;
        self.block_until(instance, &[TokenKind::End])?;
        self.eat(TokenKind::End)?;

        let declared = self.scopes.last().unwrap().declared_count;
        if declared > 0 {
            self.emit(Opcode::UnwindLocals, declared);
        }
        let continue_target = self.buf().ip();
        self.emit_jump_back(Opcode::JumpBack, cond_ip)?;
        self.patch_jump_ahead(exit_patch)?;

        self.finish_loop(continue_target)
    }

    /// `do BLOCK while COND` compiles to a body that always runs once,
    /// followed by the condition and a conditional jump back to the body's
    /// start -- there is no "jump back if true" opcode, so this negates the
    /// condition and reuses `IF_FALSE_JUMP_BACK`.
    fn do_while_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `do`
        self.push_scope(true);

        let body_start = self.buf().ip();
        self.block_until(instance, &[TokenKind::While])?;
        self.eat(TokenKind::While)?;

        let declared = self.scopes.last().unwrap().declared_count;
        if declared > 0 {
            self.emit(Opcode::UnwindLocals, declared);
        }
        let continue_target = self.buf().ip();
        self.expression(instance)?;
        self.emit(Opcode::LogicalNot, 0);
        self.emit_jump_back(Opcode::IfFalseJumpBack, body_start)?;

        self.finish_loop(continue_target)
    }

    /// Shared tail for `while`/`do-while`: pops the loop scope and patches
    /// its `break`/`continue` sites now that both the back-edge (for
    /// `continue`) and the loop's exit point (for `break`) are known.
    fn finish_loop(&mut self, continue_target: usize) -> CompileResult<()> {
        let scope = self.pop_scope();
        for ip in scope.continue_patches {
            self.patch_jump_to(ip, continue_target)?;
        }
        let after = self.buf().ip();
        for ip in scope.break_patches {
            self.patch_jump_to(ip, after)?;
        }
        Ok(())
    }

    fn patch_jump_to(&mut self, ip: usize, target: usize) -> CompileResult<()> {
        let offset = target - (ip + 1);
        if offset > u8::MAX as usize {
            return Err(self.error("jump target too far (max 255 instructions)"));
        }
        self.buf().instructions[ip].operand = offset as u8;
        Ok(())
    }

    // ---- if / elif / else ---------------------------------------------------

    fn if_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `if`
        let mut end_jumps = Vec::new();
        let mut all_return = true;
        let mut had_else = false;

        self.expression(instance)?;
        self.eat(TokenKind::Then)?;
        let mut branch_patch = self.emit(Opcode::IfFalseJumpAhead, 0);
        all_return &= self.if_branch(instance)?;
        end_jumps.push(self.emit(Opcode::JumpAhead, 0));
        self.patch_jump_ahead(branch_patch)?;

        loop {
            match self.current.kind.clone() {
                TokenKind::Elif => {
                    self.advance()?;
                    self.expression(instance)?;
                    self.eat(TokenKind::Then)?;
                    branch_patch = self.emit(Opcode::IfFalseJumpAhead, 0);
                    all_return &= self.if_branch(instance)?;
                    end_jumps.push(self.emit(Opcode::JumpAhead, 0));
                    self.patch_jump_ahead(branch_patch)?;
                }
                TokenKind::Else => {
                    had_else = true;
                    self.advance()?;
                    self.push_scope(false);
                    self.block_until(instance, &[TokenKind::End])?;
                    all_return &= self.pop_scope().all_code_paths_return;
                    break;
                }
                TokenKind::End => break,
                other => return Err(self.error(format!("expected `elif`, `else`, or `end`, found {:?}", other))),
            }
        }
        self.eat(TokenKind::End)?;
        for ip in end_jumps {
            self.patch_jump_ahead(ip)?;
        }

        if had_else && all_return {
            if let Some(scope) = self.scopes.last_mut() {
                scope.all_code_paths_return = true;
            }
        }
        Ok(())
    }

    fn if_branch(&mut self, instance: &mut Instance) -> CompileResult<bool> {
        self.push_scope(false);
        self.block_until(instance, &[TokenKind::Elif, TokenKind::Else, TokenKind::End])?;
        Ok(self.pop_scope().all_code_paths_return)
    }

    // ---- for ------------------------------------------------------------

    /// `for x in E do BLOCK [else BLOCK] end`. `E.iterator()` is called
    /// once to build the driving iterator; the loop then alternates
    /// `hasNext()`/`next()` calls. The trailing `else` runs only when the
    /// loop runs out of elements on its own -- `break` jumps past it.
    fn for_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `for`
        let var_name = self.eat_identifier()?;
        self.eat(TokenKind::In)?;

        self.expression(instance)?;
        self.name_hash_key(instance, "iterator");
        self.emit(Opcode::LoadTable, 0);
        self.emit(Opcode::Call, 0);

        self.push_scope(true);
        self.scopes.last_mut().unwrap().extra_break_unwind = 1;
        let depth = self.current_func_depth();

        let iter_slot = self.reserve_local_slot();
        self.emit(Opcode::DeclLocal, iter_slot);
        // Named after the loop variable (`@iterator_x`) so nested for-loops
        // over distinct loop variables don't collide in `vars`.
        let iter_hash = dj2b_str(&format!("@iterator_{}", var_name));
        self.vars.insert(
            iter_hash,
            VarRecord { is_global: false, offset: iter_slot, func_depth: depth },
        );

        self.eat(TokenKind::Do)?;

        let loop_start = self.buf().ip();
        self.emit(Opcode::LoadLocal, iter_slot);
        self.name_hash_key(instance, "hasNext");
        self.emit(Opcode::LoadTable, 0);
        self.emit(Opcode::Call, 0);
        let exit_patch = self.emit(Opcode::IfFalseJumpAhead, 0);

        self.emit(Opcode::LoadLocal, iter_slot);
        self.name_hash_key(instance, "next");
        self.emit(Opcode::LoadTable, 0);
        self.emit(Opcode::Call, 0);

        let var_hash = dj2b_str(&var_name);
        let var_slot = self.reserve_local_slot();
        self.emit(Opcode::DeclLocal, var_slot);
        self.vars.insert(
            var_hash,
            VarRecord { is_global: false, offset: var_slot, func_depth: depth },
        );
        self.scopes.last_mut().unwrap().declared_hashes.push(var_hash);
        self.scopes.last_mut().unwrap().declared_count += 1;

        self.block_until(instance, &[TokenKind::End, TokenKind::Else])?;

        self.vars.remove(&var_hash);
        self.emit(Opcode::UnwindLocals, 1);
        let continue_target = self.buf().ip();
        self.emit_jump_back(Opcode::JumpBack, loop_start)?;
        self.patch_jump_ahead(exit_patch)?;

        let skip_else_patch = if self.check(&TokenKind::Else) {
            let patch = self.emit(Opcode::JumpAhead, 0);
            self.advance()?;
            self.push_scope(false);
            self.block_until(instance, &[TokenKind::End])?;
            self.pop_scope();
            Some(patch)
        } else {
            None
        };
        self.eat(TokenKind::End)?;

        self.vars.remove(&iter_hash);
        self.emit(Opcode::UnwindLocals, 1);

        if let Some(patch) = skip_else_patch {
            self.patch_jump_ahead(patch)?;
        }

        let scope = self.pop_scope();
        for ip in scope.continue_patches {
            self.patch_jump_to(ip, continue_target)?;
        }
        let after = self.buf().ip();
        for ip in scope.break_patches {
            self.patch_jump_to(ip, after)?;
        }
        Ok(())
    }

    /// `for x in E do EXPR end`, used in expression position: same iterator
    /// protocol as the statement form, but with no `else` and a single
    /// expression body whose value is appended, each iteration, to an
    /// accumulator array that becomes the whole construct's result.
    ///
    /// The accumulator lives in a local (not threaded through the eval
    /// stack) since `STORE_TABLE` consumes its target table value and only
    /// leaves the stored element behind -- a local holding the table's id
    /// survives across the store because that id, not the eval-stack value,
    /// is what identifies the table.
    pub(super) fn for_expr(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `for`
        let var_name = self.eat_identifier()?;
        self.eat(TokenKind::In)?;

        self.expression(instance)?;
        self.name_hash_key(instance, "iterator");
        self.emit(Opcode::LoadTable, 0);
        self.emit(Opcode::Call, 0);

        self.push_scope(true);
        self.scopes.last_mut().unwrap().extra_break_unwind = 1;
        let depth = self.current_func_depth();

        let iter_slot = self.reserve_local_slot();
        self.emit(Opcode::DeclLocal, iter_slot);
        let iter_hash = dj2b_str(&format!("@iterator_{}", var_name));
        self.vars.insert(
            iter_hash,
            VarRecord { is_global: false, offset: iter_slot, func_depth: depth },
        );

        let acc_slot = self.reserve_local_slot();
        self.emit(Opcode::AllocateArrayLiteral, 0);
        self.emit(Opcode::DeclLocal, acc_slot);

        self.eat(TokenKind::Do)?;

        let loop_start = self.buf().ip();
        self.emit(Opcode::LoadLocal, iter_slot);
        self.name_hash_key(instance, "hasNext");
        self.emit(Opcode::LoadTable, 0);
        self.emit(Opcode::Call, 0);
        let exit_patch = self.emit(Opcode::IfFalseJumpAhead, 0);

        self.emit(Opcode::LoadLocal, iter_slot);
        self.name_hash_key(instance, "next");
        self.emit(Opcode::LoadTable, 0);
        self.emit(Opcode::Call, 0);

        let var_hash = dj2b_str(&var_name);
        let var_slot = self.reserve_local_slot();
        self.emit(Opcode::DeclLocal, var_slot);
        self.vars.insert(
            var_hash,
            VarRecord { is_global: false, offset: var_slot, func_depth: depth },
        );
        self.scopes.last_mut().unwrap().declared_hashes.push(var_hash);
        self.scopes.last_mut().unwrap().declared_count += 1;

        self.emit(Opcode::LoadLocal, acc_slot);
        self.emit(Opcode::DuplicateTop, 0);
        self.name_hash_key(instance, "@length");
        self.emit(Opcode::LoadTable, 0);
        self.expression(instance)?;
        self.emit(Opcode::StoreTable, 0);
        self.emit(Opcode::DiscardTop, 0);

        self.vars.remove(&var_hash);
        self.emit(Opcode::UnwindLocals, 1);
        let continue_target = self.buf().ip();
        self.emit_jump_back(Opcode::JumpBack, loop_start)?;
        self.patch_jump_ahead(exit_patch)?;
        self.eat(TokenKind::End)?;

        self.vars.remove(&iter_hash);
        self.emit(Opcode::LoadLocal, acc_slot);
        self.emit(Opcode::UnwindLocals, 2);

        let scope = self.pop_scope();
        for ip in scope.continue_patches {
            self.patch_jump_to(ip, continue_target)?;
        }
        let after = self.buf().ip();
        for ip in scope.break_patches {
            self.patch_jump_to(ip, after)?;
        }
        Ok(())
    }

    fn reserve_local_slot(&mut self) -> u8 {
        let ctx = self.funcs.last_mut().unwrap();
        let slot = ctx.next_local;
        ctx.next_local += 1;
        slot
    }

    // ---- return / break / continue ---------------------------------------

    fn return_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `return`
        let bare = matches!(self.current.kind, TokenKind::End | TokenKind::Elif | TokenKind::Else | TokenKind::Eof);
        if bare {
            self.emit(Opcode::PushNil, 0);
        } else {
            self.expression(instance)?;
        }
        self.emit(Opcode::Return, 0);
        if let Some(scope) = self.scopes.last_mut() {
            scope.all_code_paths_return = true;
        }
        Ok(())
    }

    fn break_stmt(&mut self) -> CompileResult<()> {
        self.advance()?; // `break`
        let idx = self.nearest_loop_scope_index().ok_or_else(|| self.error("`break` outside a loop"))?;
        let n = self.unwind_count_to_nearest_loop().unwrap() + self.scopes[idx].extra_break_unwind;
        if n > 0 {
            self.emit(Opcode::UnwindLocals, n);
        }
        let ip = self.emit(Opcode::JumpAhead, 0);
        self.scopes[idx].break_patches.push(ip);
        Ok(())
    }

    fn continue_stmt(&mut self) -> CompileResult<()> {
        self.advance()?; // `continue`
        let idx = self.nearest_loop_scope_index().ok_or_else(|| self.error("`continue` outside a loop"))?;
        let n = self.unwind_count_to_nearest_loop().unwrap();
        if n > 0 {
            self.emit(Opcode::UnwindLocals, n);
        }
        let ip = self.emit(Opcode::JumpAhead, 0);
        self.scopes[idx].continue_patches.push(ip);
        Ok(())
    }

    fn nearest_loop_scope_index(&self) -> Option<usize> {
        let floor = self.func_scope_floor();
        (floor..self.scopes.len()).rev().find(|&i| self.scopes[i].is_loop)
    }

    // ---- declarations -----------------------------------------------------

    fn global_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `global`
        let name = self.eat_identifier()?;
        self.eat(TokenKind::Set)?;
        self.expression(instance)?;
        self.declare_global(instance, &name, true)
    }

    fn function_decl_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `function`
        let name = self.eat_identifier()?;
        self.named_function_decl(instance, name, false)
    }

    fn no_capture_decl_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `no_capture`
        self.eat(TokenKind::Function)?;
        let name = self.eat_identifier()?;
        self.named_function_decl(instance, name, true)
    }

    /// `[no_capture] function NAME (...) BLOCK end` sugar: compile the
    /// function, bind its value to `NAME`, and warn when a function that
    /// could have been declared `no_capture` never captured anything.
    fn named_function_decl(&mut self, instance: &mut Instance, name: String, no_capture: bool) -> CompileResult<()> {
        let ctx = self.compile_function_body(instance, name.clone(), no_capture, false)?;
        if !no_capture && ctx.captured.is_empty() {
            self.warnings.push(CompilerWarning::new(
                format!("function `{}` never captures anything; consider declaring it `no_capture`", name),
                self.loc(),
            ));
        }
        self.emit_function_value(instance, &ctx)?;
        self.store_variable(instance, &name)?;
        Ok(())
    }
}
