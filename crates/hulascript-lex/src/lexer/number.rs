//! Numeric literal scanning.
//!
//! A literal is a run of digits and `.` characters, optionally followed by a
//! single `n` or `f` suffix (accepted and discarded -- HulaScript has no
//! distinct integer/float numeric types, so the suffix carries no semantic
//! weight once the literal reaches the compiler).

use hulascript_util::error::CompileResult;

use super::core::Lexer;
use crate::TokenKind;

impl<'a> Lexer<'a> {
    pub(super) fn scan_number(&mut self) -> CompileResult<TokenKind> {
        let mut buf = String::new();
        {
            let cursor = self.cursor();
            loop {
                let c = cursor.current();
                if c.is_ascii_digit() || c == b'.' {
                    buf.push(c as char);
                    cursor.advance();
                } else {
                    break;
                }
            }
            if cursor.current() == b'n' || cursor.current() == b'f' {
                cursor.advance();
            }
        }

        buf.parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error(format!("cannot parse numerical literal \"{}\"", buf)))
    }
}
