//! Single-character-lookahead source cursor.
//!
//! The tokenizer only ever needs to see one character ahead of the one it
//! just consumed (`scan_char` advances and returns the *new* current
//! character), which keeps escape-sequence scanning and multi-char operator
//! lookahead (`==`, `&&`, `??`, ...) simple. Row/col tracking happens lazily:
//! advancing past a `'\n'` bumps the row and resets the column on the
//! following call, mirroring how the line a token started on is recorded.
pub struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    row: u32,
    col: u32,
    current: u8,
}

/// Sentinel returned once the source is exhausted; HulaScript source is valid
/// ASCII/UTF-8 text and never legitimately contains a NUL byte.
pub const EOF: u8 = 0;

impl<'a> Cursor<'a> {
    pub fn new(source: &'a str) -> Self {
        let mut cursor = Self {
            bytes: source.as_bytes(),
            pos: 0,
            row: 1,
            col: 0,
            current: EOF,
        };
        cursor.advance();
        cursor
    }

    #[inline]
    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn col(&self) -> u32 {
        self.col
    }

    /// Consume the current character and load the next one, returning it.
    pub fn advance(&mut self) -> u8 {
        if self.current == b'\n' {
            self.row += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }

        if self.pos == self.bytes.len() {
            self.current = EOF;
            return EOF;
        }

        self.current = self.bytes[self.pos];
        self.pos += 1;
        self.current
    }
}
