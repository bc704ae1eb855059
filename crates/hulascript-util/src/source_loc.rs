//! Source locations attached to tokens, AST nodes and bytecode instructions.
//!
//! A [`SourceLoc`] is deliberately small and `Copy`: every instruction emitted
//! by the compiler carries one (see `hulascript-core`'s `ip_src_map`), so the
//! representation has to stay cheap to clone and store by the thousands.

use std::fmt;

/// A single position in a source file, with enough context to reconstruct a
/// human-readable error location even once the original file has gone away
/// (e.g. source typed into a REPL).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SourceLoc {
    pub row: u32,
    pub col: u32,
    /// Name of the function being compiled when this location was recorded,
    /// if any (`None` at the top level).
    pub function_name: Option<String>,
    /// Name of the file being compiled, if any (`None` for REPL input).
    pub file_name: Option<String>,
}

impl SourceLoc {
    pub fn new(row: u32, col: u32) -> Self {
        Self {
            row,
            col,
            function_name: None,
            file_name: None,
        }
    }

    pub fn with_function(mut self, name: impl Into<String>) -> Self {
        self.function_name = Some(name.into());
        self
    }

    pub fn with_file(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file_name, &self.function_name) {
            (Some(file), Some(func)) => {
                write!(f, "{}:{}:{} (in {})", file, self.row, self.col, func)
            }
            (Some(file), None) => write!(f, "{}:{}:{}", file, self.row, self.col),
            (None, Some(func)) => write!(f, "line {}, col {} (in {})", self.row, self.col, func),
            (None, None) => write!(f, "line {}, col {}", self.row, self.col),
        }
    }
}
