//! Pratt expression parser.

use hulascript_lex::TokenKind;
use hulascript_util::error::CompileResult;

use crate::instance::Instance;
use crate::opcode::Opcode;

use super::Compiler;

/// Binding power of each binary operator token, per the fixed precedence
/// table (`||`/`&&` = 1, comparisons/`??` = 3, `+ -` = 5, `* / %` = 6,
/// `^` = 7). Gaps (2, 4) are deliberate -- they mirror the table as given
/// rather than renumbering it densely.
fn binding_power(kind: &TokenKind) -> Option<u8> {
    use TokenKind::*;
    Some(match kind {
        Or | And => 1,
        Less | More | LessEqual | MoreEqual | Equals | NotEqual | NilCoalescing => 3,
        Plus | Minus => 5,
        Asterisk | Slash | Percent => 6,
        Caret => 7,
        _ => return None,
    })
}

/// `^` is conventionally right-associative; every other binary operator
/// here is left-associative.
fn right_associative(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Caret)
}

impl<'a> Compiler<'a> {
    pub(super) fn expression(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.expression_bp(instance, 0)
    }

    fn expression_bp(&mut self, instance: &mut Instance, min_bp: u8) -> CompileResult<()> {
        self.unary(instance)?;

        loop {
            let kind = self.current.kind.clone();
            let bp = match binding_power(&kind) {
                Some(bp) if bp >= min_bp => bp,
                _ => break,
            };
            self.advance()?;
            let next_min = if right_associative(&kind) { bp } else { bp + 1 };

            match kind {
                TokenKind::And => self.compile_and(instance, next_min)?,
                TokenKind::Or => self.compile_or(instance, next_min)?,
                TokenKind::NilCoalescing => self.compile_nil_coalesce(instance, next_min)?,
                _ => {
                    self.expression_bp(instance, next_min)?;
                    let op = match kind {
                        TokenKind::Plus => Opcode::Add,
                        TokenKind::Minus => Opcode::Subtract,
                        TokenKind::Asterisk => Opcode::Multiply,
                        TokenKind::Slash => Opcode::Divide,
                        TokenKind::Percent => Opcode::Modulo,
                        TokenKind::Caret => Opcode::Exponentiate,
                        TokenKind::Less => Opcode::Less,
                        TokenKind::More => Opcode::More,
                        TokenKind::LessEqual => Opcode::LessEqual,
                        TokenKind::MoreEqual => Opcode::MoreEqual,
                        TokenKind::Equals => Opcode::Equals,
                        TokenKind::NotEqual => Opcode::NotEqual,
                        _ => unreachable!(),
                    };
                    self.emit(op, 0);
                }
            }
        }
        Ok(())
    }

    fn compile_and(&mut self, instance: &mut Instance, next_min: u8) -> CompileResult<()> {
        self.emit(Opcode::DuplicateTop, 0);
        let to_end = self.emit(Opcode::IfFalseJumpAhead, 0);
        self.emit(Opcode::DiscardTop, 0);
        self.expression_bp(instance, next_min)?;
        self.patch_jump_ahead(to_end)?;
        Ok(())
    }

    fn compile_or(&mut self, instance: &mut Instance, next_min: u8) -> CompileResult<()> {
        self.emit(Opcode::DuplicateTop, 0);
        let to_eval_b = self.emit(Opcode::IfFalseJumpAhead, 0);
        let to_end = self.emit(Opcode::JumpAhead, 0);
        self.patch_jump_ahead(to_eval_b)?;
        self.emit(Opcode::DiscardTop, 0);
        self.expression_bp(instance, next_min)?;
        self.patch_jump_ahead(to_end)?;
        Ok(())
    }

    fn compile_nil_coalesce(&mut self, instance: &mut Instance, next_min: u8) -> CompileResult<()> {
        let to_end = self.emit(Opcode::IfntNilJumpAhead, 0);
        self.expression_bp(instance, next_min)?;
        self.patch_jump_ahead(to_end)?;
        Ok(())
    }

    fn unary(&mut self, instance: &mut Instance) -> CompileResult<()> {
        match self.current.kind {
            TokenKind::Minus => {
                self.advance()?;
                self.load_number(instance, 0.0);
                self.unary(instance)?;
                self.emit(Opcode::Subtract, 0);
                Ok(())
            }
            TokenKind::Not => {
                self.advance()?;
                self.unary(instance)?;
                self.emit(Opcode::LogicalNot, 0);
                Ok(())
            }
            _ => self.postfix(instance),
        }
    }

    fn postfix(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.primary(instance)?;
        loop {
            match self.current.kind.clone() {
                TokenKind::Period => {
                    self.advance()?;
                    let name = self.eat_identifier()?;
                    if self.check(&TokenKind::Set) {
                        self.advance()?;
                        self.name_hash_key(instance, &name);
                        self.expression(instance)?;
                        self.emit(Opcode::StoreTable, 1);
                    } else if self.check(&TokenKind::OpenParen) {
                        // Method-call sugar: `obj.method(args)` loads the
                        // method off a duplicated receiver, then reorders
                        // the stack so the receiver becomes the call's
                        // first (implicit `self`) argument.
                        self.emit(Opcode::DuplicateTop, 0);
                        self.name_hash_key(instance, &name);
                        self.emit(Opcode::LoadTable, 0);
                        self.emit(Opcode::BringToTop, 1);
                        self.advance()?; // `(`
                        let argc = self.call_arguments(instance)?;
                        if argc == u8::MAX {
                            return Err(self.error("too many arguments (max 255)"));
                        }
                        self.emit(Opcode::Call, argc + 1);
                    } else {
                        self.name_hash_key(instance, &name);
                        self.emit(Opcode::LoadTable, 0);
                    }
                }
                TokenKind::OpenBracket => {
                    self.advance()?;
                    self.expression(instance)?;
                    self.eat(TokenKind::CloseBracket)?;
                    if self.check(&TokenKind::Set) {
                        self.advance()?;
                        self.expression(instance)?;
                        self.emit(Opcode::StoreTable, 0);
                    } else {
                        self.emit(Opcode::LoadTable, 0);
                    }
                }
                TokenKind::OpenParen => {
                    self.advance()?;
                    let argc = self.call_arguments(instance)?;
                    self.emit(Opcode::Call, argc);
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Parses a parenthesized, comma-separated argument list (the opening
    /// paren has already been consumed) and emits each argument's code in
    /// order, leaving them on the eval stack for the following `CALL`.
    fn call_arguments(&mut self, instance: &mut Instance) -> CompileResult<u8> {
        let mut argc: u16 = 0;
        if !self.check(&TokenKind::CloseParen) {
            loop {
                self.expression(instance)?;
                argc += 1;
                if self.check(&TokenKind::Comma) {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::CloseParen)?;
        if argc > u8::MAX as u16 {
            return Err(self.error("too many arguments (max 255)"));
        }
        Ok(argc as u8)
    }

    fn primary(&mut self, instance: &mut Instance) -> CompileResult<()> {
        match self.current.kind.clone() {
            TokenKind::Number(n) => {
                self.advance()?;
                self.load_number(instance, n);
                Ok(())
            }
            TokenKind::StringLiteral(s) => {
                self.advance()?;
                self.load_string(instance, &s);
                Ok(())
            }
            TokenKind::True => {
                self.advance()?;
                self.emit(Opcode::PushTrue, 0);
                Ok(())
            }
            TokenKind::False => {
                self.advance()?;
                self.emit(Opcode::PushFalse, 0);
                Ok(())
            }
            TokenKind::Nil => {
                self.advance()?;
                self.emit(Opcode::PushNil, 0);
                Ok(())
            }
            TokenKind::Identifier(name) => {
                self.advance()?;
                if self.check(&TokenKind::Set) {
                    self.advance()?;
                    self.expression(instance)?;
                    self.emit(Opcode::DuplicateTop, 0);
                    self.store_variable(instance, &name)?;
                } else {
                    self.load_variable(instance, &name)?;
                }
                Ok(())
            }
            TokenKind::OpenParen => {
                self.advance()?;
                self.expression(instance)?;
                self.eat(TokenKind::CloseParen)?;
                Ok(())
            }
            TokenKind::OpenBracket => self.array_literal(instance),
            TokenKind::OpenBrace => self.table_literal(instance),
            TokenKind::For => self.for_expr(instance),
            TokenKind::Function => self.function_literal(instance, false),
            TokenKind::NoCapture => {
                self.advance()?;
                self.eat(TokenKind::Function)?;
                self.function_literal_body(instance, true, false, None)
            }
            other => Err(self.error(format!("unexpected token in expression: {:?}", other))),
        }
    }

    /// `ALLOCATE_ARRAY_LITERAL n` reserves capacity `n`, but correctness
    /// never depends on that number being exact -- `STORE_TABLE` grows the
    /// table on demand -- so elements are compiled directly in one forward
    /// pass and the count is patched into the allocation instruction
    /// afterward.
    fn array_literal(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.eat(TokenKind::OpenBracket)?;
        let alloc_ip = self.emit(Opcode::AllocateArrayLiteral, 0);
        let mut count: u32 = 0;
        if !self.check(&TokenKind::CloseBracket) {
            loop {
                if count >= u8::MAX as u32 {
                    return Err(self.error("array literal has more than 255 elements"));
                }
                self.emit(Opcode::DuplicateTop, 0);
                self.load_number(instance, count as f64);
                self.expression(instance)?;
                self.emit(Opcode::StoreTable, 0);
                self.emit(Opcode::DiscardTop, 0);
                count += 1;
                if self.check(&TokenKind::Comma) {
                    self.advance()?;
                    if self.check(&TokenKind::CloseBracket) {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::CloseBracket)?;
        self.buf().instructions[alloc_ip].operand = count as u8;
        Ok(())
    }

    /// `{ .name = v, ... }` keys by property-name hash; `{ {k, v}, ... }`
    /// keys by an arbitrary runtime key expression. Both forms can appear
    /// in the same literal.
    fn table_literal(&mut self, instance: &mut Instance) -> CompileResult<()> {
        self.eat(TokenKind::OpenBrace)?;
        let alloc_ip = self.emit(Opcode::AllocateTableLiteral, 0);
        let mut count: u32 = 0;
        if !self.check(&TokenKind::CloseBrace) {
            loop {
                if count >= u8::MAX as u32 {
                    return Err(self.error("table literal has more than 255 elements"));
                }
                self.emit(Opcode::DuplicateTop, 0);
                match self.current.kind.clone() {
                    TokenKind::Period => {
                        self.advance()?;
                        let name = self.eat_identifier()?;
                        self.eat(TokenKind::Set)?;
                        self.name_hash_key(instance, &name);
                        self.expression(instance)?;
                    }
                    TokenKind::OpenBrace => {
                        self.advance()?;
                        self.expression(instance)?;
                        self.eat(TokenKind::Comma)?;
                        self.expression(instance)?;
                        self.eat(TokenKind::CloseBrace)?;
                    }
                    other => {
                        return Err(self.error(format!(
                            "expected `.name = value` or `{{key, value}}` in table literal, found {:?}",
                            other
                        )))
                    }
                }
                self.emit(Opcode::StoreTable, 0);
                self.emit(Opcode::DiscardTop, 0);
                count += 1;
                if self.check(&TokenKind::Comma) {
                    self.advance()?;
                    if self.check(&TokenKind::CloseBrace) {
                        break;
                    }
                } else {
                    break;
                }
            }
        }
        self.eat(TokenKind::CloseBrace)?;
        self.buf().instructions[alloc_ip].operand = count as u8;
        // Object-literal tables default to final: `{.a=1}.b = 2` is a
        // runtime error, not a silent new-key insert.
        self.emit(Opcode::FinalizeTable, 0);
        Ok(())
    }

    pub(super) fn function_literal(&mut self, instance: &mut Instance, is_class_method: bool) -> CompileResult<()> {
        self.eat(TokenKind::Function)?;
        self.function_literal_body(instance, false, is_class_method, None)
    }

    pub(super) fn function_literal_body(
        &mut self,
        instance: &mut Instance,
        no_capture: bool,
        is_class_method: bool,
        name: Option<String>,
    ) -> CompileResult<()> {
        let name = name.unwrap_or_else(|| "<anonymous>".to_string());
        let ctx = self.compile_function_body(instance, name, no_capture, is_class_method)?;
        self.emit_function_value(instance, &ctx)
    }
}
