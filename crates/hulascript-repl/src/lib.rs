//! Tracks whether a snippet typed into a REPL is a complete construct yet,
//! so a host can keep reading lines until the user has closed every paren,
//! brace, bracket, and block keyword they opened.
//!
//! Works by re-tokenizing the whole accumulated source on every call and
//! walking a stack of "still expected" tokens: each opening token (`(`,
//! `{`, `[`, or a block keyword like `while`) pushes the token(s) that
//! must eventually close it, and each token that matches the top of the
//! stack pops it. The construct is complete once the stack runs dry.
//! Re-tokenizing from scratch each call is simpler than maintaining
//! incremental lexer state across lines, and REPL input is never large
//! enough for that to matter.

use hulascript_lex::{Lexer, TokenKind};

/// Accumulates multi-line REPL input and reports when it forms a
/// complete, parseable construct.
#[derive(Default)]
pub struct ReplCompleter {
    source: String,
    expected: Vec<TokenKind>,
}

impl ReplCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether no partial construct is pending -- a host can use this to
    /// choose between a primary and a continuation prompt string.
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Clears accumulated input, as if starting a fresh prompt.
    pub fn reset(&mut self) {
        self.source.clear();
        self.expected.clear();
    }

    /// Appends one line of input and re-scans the whole accumulated
    /// source. Returns `Some(source)` (the full snippet so far, ready to
    /// hand to the compiler) once every opened construct has been closed;
    /// returns `None` if more lines are still expected.
    ///
    /// A lex error (e.g. an unterminated string split across lines) is
    /// treated the same as "not complete yet" -- the host should keep
    /// prompting for more input rather than surfacing the error, since the
    /// error may simply disappear once the rest of the literal arrives.
    pub fn write_input(&mut self, line: &str) -> Option<&str> {
        self.source.push_str(line);
        self.source.push('\n');

        self.expected.clear();
        for tok in Lexer::new(&self.source, None) {
            let kind = match tok {
                Ok(t) => t.kind,
                Err(_) => return None,
            };

            if self.expected.last() == Some(&kind) {
                self.expected.pop();
                continue;
            }

            match kind {
                TokenKind::OpenParen => self.expected.push(TokenKind::CloseParen),
                TokenKind::OpenBrace => self.expected.push(TokenKind::CloseBrace),
                TokenKind::OpenBracket => self.expected.push(TokenKind::CloseBracket),
                TokenKind::While => {
                    self.expected.push(TokenKind::End);
                    self.expected.push(TokenKind::Do);
                }
                TokenKind::If => {
                    self.expected.push(TokenKind::End);
                    self.expected.push(TokenKind::Then);
                }
                TokenKind::Elif => self.expected.push(TokenKind::Then),
                TokenKind::Do => self.expected.push(TokenKind::While),
                TokenKind::Class | TokenKind::Function => self.expected.push(TokenKind::End),
                TokenKind::For => {
                    self.expected.push(TokenKind::End);
                    self.expected.push(TokenKind::Do);
                    self.expected.push(TokenKind::In);
                }
                _ => {}
            }
        }

        if self.expected.is_empty() {
            Some(&self.source)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_expression_completes_immediately() {
        let mut completer = ReplCompleter::new();
        assert!(completer.write_input("1 + 2").is_some());
    }

    #[test]
    fn open_paren_waits_for_close() {
        let mut completer = ReplCompleter::new();
        assert!(completer.write_input("foo(1,").is_none());
        assert!(completer.write_input("2)").is_some());
    }

    #[test]
    fn while_block_waits_for_do_then_end() {
        let mut completer = ReplCompleter::new();
        assert!(completer.write_input("while x < 10").is_none());
        assert!(completer.write_input("do x = x + 1").is_none());
        assert!(completer.write_input("end").is_some());
    }

    #[test]
    fn nested_function_inside_class_tracks_both_ends() {
        let mut completer = ReplCompleter::new();
        assert!(completer.write_input("class Foo").is_none());
        assert!(completer.write_input("function bar()").is_none());
        assert!(completer.write_input("return 1").is_none());
        assert!(completer.write_input("end").is_none());
        assert!(completer.write_input("end").is_some());
    }

    #[test]
    fn reset_clears_accumulated_state() {
        let mut completer = ReplCompleter::new();
        assert!(completer.write_input("while true").is_none());
        completer.reset();
        assert!(completer.write_input("1").is_some());
    }
}
