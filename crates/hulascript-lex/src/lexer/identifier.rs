//! Identifier and keyword scanning.
//!
//! Keywords are recognized by hashing the scanned identifier with the same
//! djb2 variant used for table keys, then matching against the hash of each
//! keyword -- exactly how a switch-on-hash keyword scanner works, just
//! without needing the source string to outlive the match.

use hulascript_util::error::CompileResult;
use hulascript_util::hash::dj2b_str;

use super::core::Lexer;
use crate::TokenKind;

fn keyword_hash(s: &str) -> TokenKind {
    let h = dj2b_str(s);
    if h == dj2b_str("true") {
        TokenKind::True
    } else if h == dj2b_str("false") {
        TokenKind::False
    } else if h == dj2b_str("nil") {
        TokenKind::Nil
    } else if h == dj2b_str("function") {
        TokenKind::Function
    } else if h == dj2b_str("array") || h == dj2b_str("table") {
        TokenKind::Table
    } else if h == dj2b_str("class") {
        TokenKind::Class
    } else if h == dj2b_str("no_capture") {
        TokenKind::NoCapture
    } else if h == dj2b_str("if") {
        TokenKind::If
    } else if h == dj2b_str("elif") {
        TokenKind::Elif
    } else if h == dj2b_str("else") {
        TokenKind::Else
    } else if h == dj2b_str("while") {
        TokenKind::While
    } else if h == dj2b_str("for") {
        TokenKind::For
    } else if h == dj2b_str("in") {
        TokenKind::In
    } else if h == dj2b_str("do") {
        TokenKind::Do
    } else if h == dj2b_str("return") {
        TokenKind::Return
    } else if h == dj2b_str("break") {
        TokenKind::Break
    } else if h == dj2b_str("continue") {
        TokenKind::Continue
    } else if h == dj2b_str("then") {
        TokenKind::Then
    } else if h == dj2b_str("end") {
        TokenKind::End
    } else if h == dj2b_str("global") {
        TokenKind::Global
    } else {
        TokenKind::Identifier(s.to_string())
    }
}

impl<'a> Lexer<'a> {
    pub(super) fn scan_identifier_or_keyword(&mut self) -> CompileResult<TokenKind> {
        let mut buf = String::new();
        let cursor = self.cursor();
        if cursor.current() == b'@' {
            buf.push('@');
            cursor.advance();
        }
        loop {
            let c = cursor.current();
            if c.is_ascii_alphanumeric() || c == b'_' {
                buf.push(c as char);
                cursor.advance();
            } else {
                break;
            }
        }
        Ok(keyword_hash(&buf))
    }
}
