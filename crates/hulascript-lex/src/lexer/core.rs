//! Main lexer dispatch loop.

use hulascript_util::error::{CompilationError, CompileResult};
use hulascript_util::SourceLoc;

use crate::cursor::{Cursor, EOF};
use crate::{Token, TokenKind};

/// Tokenizer over a HulaScript source string.
///
/// Unlike a conventional two-phase "produce a Vec<Token> then parse it"
/// design, this scanner is meant to be driven token-by-token by the compiler
/// (`next_token` is pull-based, not push), since the compiler is single-pass
/// and never needs more than the current token plus the one-character
/// lookahead the cursor already carries.
pub struct Lexer<'a> {
    cursor: Cursor<'a>,
    file_name: Option<String>,
    /// Stack of function names currently being compiled, innermost last;
    /// used to label error locations with "in function `f`".
    functions: Vec<String>,
    last_tok_row: u32,
    last_tok_col: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, file_name: Option<String>) -> Self {
        Self {
            cursor: Cursor::new(source),
            file_name,
            functions: Vec::new(),
            last_tok_row: 1,
            last_tok_col: 0,
        }
    }

    pub fn enter_function(&mut self, name: String) {
        self.functions.push(name);
    }

    pub fn exit_function(&mut self) {
        self.functions.pop();
    }

    /// The location of the token most recently returned by `next_token`.
    pub fn last_token_loc(&self) -> SourceLoc {
        let mut loc = SourceLoc::new(self.last_tok_row, self.last_tok_col);
        if let Some(file) = &self.file_name {
            loc = loc.with_file(file.clone());
        }
        if let Some(func) = self.functions.last() {
            loc = loc.with_function(func.clone());
        }
        loc
    }

    pub(crate) fn error(&self, msg: impl Into<String>) -> CompilationError {
        CompilationError::new(msg, self.last_token_loc())
    }

    pub(crate) fn cursor(&mut self) -> &mut Cursor<'a> {
        &mut self.cursor
    }

    /// Scan and return the next token, advancing past it.
    pub fn next_token(&mut self) -> CompileResult<Token> {
        while self.cursor.current().is_ascii_whitespace() {
            self.cursor.advance();
        }

        self.last_tok_row = self.cursor.row();
        self.last_tok_col = self.cursor.col();

        let c = self.cursor.current();
        let kind = if c.is_ascii_alphabetic() || c == b'@' {
            self.scan_identifier_or_keyword()?
        } else if c == b'"' {
            self.scan_string_literal()?
        } else if c.is_ascii_digit() {
            self.scan_number()?
        } else if c == EOF {
            TokenKind::Eof
        } else {
            self.scan_operator()?
        };

        Ok(Token::new(kind, self.last_token_loc()))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = CompileResult<Token>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(tok) if tok.kind == TokenKind::Eof => None,
            other => Some(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src, None)
            .map(|t| t.unwrap().kind)
            .collect()
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        assert_eq!(
            kinds("function foo no_capture array"),
            vec![
                TokenKind::Function,
                TokenKind::Identifier("foo".to_string()),
                TokenKind::NoCapture,
                TokenKind::Table,
            ]
        );
    }

    #[test]
    fn scans_numbers_with_and_without_suffix() {
        assert_eq!(
            kinds("42 3.5n 10f"),
            vec![
                TokenKind::Number(42.0),
                TokenKind::Number(3.5),
                TokenKind::Number(10.0),
            ]
        );
    }

    #[test]
    fn scans_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\x41""#),
            vec![TokenKind::StringLiteral("a\nbA".to_string())]
        );
    }

    #[test]
    fn scans_multi_char_operators() {
        assert_eq!(
            kinds("== != <= >= && || ??"),
            vec![
                TokenKind::Equals,
                TokenKind::NotEqual,
                TokenKind::LessEqual,
                TokenKind::MoreEqual,
                TokenKind::And,
                TokenKind::Or,
                TokenKind::NilCoalescing,
            ]
        );
    }

    #[test]
    fn lone_ampersand_is_an_error() {
        let mut lexer = Lexer::new("&x", None);
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn tracks_row_and_col_across_newlines() {
        let mut lexer = Lexer::new("a\nb", None);
        let first = lexer.next_token().unwrap();
        assert_eq!(first.loc.row, 1);
        let second = lexer.next_token().unwrap();
        assert_eq!(second.loc.row, 2);
    }
}
