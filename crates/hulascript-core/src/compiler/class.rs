//! Class compilation. A class compiles to a zero-parameter function that
//! allocates a table, populates its fields and methods, and returns it --
//! the class name is bound to that function exactly like any other
//! function-valued declaration, and "constructing an instance" is just
//! calling it.

use hulascript_lex::TokenKind;
use hulascript_util::error::CompileResult;

use crate::instance::{FunctionSlot, Instance};
use crate::opcode::Opcode;

use super::scope::FuncCtx;
use super::{Compiler, FunctionBuffer};

impl<'a> Compiler<'a> {
    pub(super) fn class_decl_stmt(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.advance()?; // `class`
        let name = self.eat_identifier()?;
        let ctx = self.compile_class_body(instance, name.clone())?;
        self.emit_function_value(instance, &ctx)?;
        self.store_variable(instance, &name)
    }

    /// `class NAME [(SUPER_EXPR)] MEMBERS end`, where each member is a
    /// `name = expr` default field or a `function name (...) BLOCK end`
    /// method. A method named `construct` isn't stored as a field -- it
    /// runs once, immediately after the table's other fields are set and
    /// finalized, with the new table bound as its implicit `self`.
    ///
    /// `construct` never takes user-supplied parameters here: this
    /// grammar's class header carries no parameter clause to forward them
    /// through, and this language's own two worked class examples both
    /// construct with zero arguments. Give an instance its initial data
    /// through field defaults or a mutator call after construction.
    fn compile_class_body(&mut self, instance: &mut Instance, name: String) -> CompileResult<FuncCtx> {
        let placeholder = crate::function::FunctionEntry {
            name: name.clone(),
            start_address: 0,
            length: 0,
            parameter_count: 0,
            referenced_functions: Default::default(),
            referenced_constants: Default::default(),
        };
        let fid = instance.alloc_function_slot(FunctionSlot::Script(placeholder));

        self.code_stack.push(FunctionBuffer::new());
        let mut ctx = FuncCtx::new(name, false, false, 0);
        ctx.id = Some(fid);
        self.funcs.push(ctx);
        self.func_scope_floor.push(self.scopes.len());
        self.push_scope(false);
        self.maybe_reserve_capture_local();

        let has_super = self.check(&TokenKind::OpenParen);
        let alloc_ip = self.emit(
            if has_super { Opcode::AllocateInheritedClass } else { Opcode::AllocateClass },
            0,
        );

        if has_super {
            self.advance()?; // `(`
            self.emit(Opcode::DuplicateTop, 0);
            self.name_hash_key(instance, "base");
            self.expression(instance)?;
            self.eat(TokenKind::CloseParen)?;
            self.emit(Opcode::StoreTable, 0);
            self.emit(Opcode::DiscardTop, 0);
        }

        let mut member_count: u32 = 0;
        let mut construct: Option<FuncCtx> = None;

        while !self.check(&TokenKind::End) {
            if self.check(&TokenKind::Eof) {
                return Err(self.error("unexpected end of input inside class body"));
            }
            if member_count >= u8::MAX as u32 {
                return Err(self.error("class has more than 255 members"));
            }
            if self.check(&TokenKind::Function) {
                self.advance()?; // `function`
                let method_name = self.eat_identifier()?;
                let method_ctx = self.compile_function_body(instance, method_name.clone(), false, true)?;
                if method_name == "construct" {
                    construct = Some(method_ctx);
                } else {
                    self.emit(Opcode::DuplicateTop, 0);
                    self.name_hash_key(instance, &method_name);
                    self.emit_function_value(instance, &method_ctx)?;
                    self.emit(Opcode::StoreTable, 0);
                    self.emit(Opcode::DiscardTop, 0);
                    member_count += 1;
                }
            } else {
                let field_name = self.eat_identifier()?;
                self.eat(TokenKind::Set)?;
                self.emit(Opcode::DuplicateTop, 0);
                self.name_hash_key(instance, &field_name);
                self.expression(instance)?;
                self.emit(Opcode::StoreTable, 0);
                self.emit(Opcode::DiscardTop, 0);
                member_count += 1;
            }
        }
        self.advance()?; // `end`

        self.buf().instructions[alloc_ip].operand = member_count as u8;
        self.emit(Opcode::FinalizeTable, 0);

        if let Some(ctor_ctx) = construct {
            self.emit(Opcode::DuplicateTop, 0); // second copy becomes `self`
            self.emit_function_value(instance, &ctor_ctx)?;
            self.emit(Opcode::BringToTop, 1);
            self.emit(Opcode::Call, 1);
            self.emit(Opcode::DiscardTop, 0); // construct's return value is unused
        }

        self.emit(Opcode::Return, 0);
        self.pop_scope();

        Ok(self.finalize_function(instance).unwrap())
    }
}
