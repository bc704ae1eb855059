//! Error and warning types shared by the compiler and interpreter.
//!
//! The compiler reports [`CompilationError`] (a message plus the single
//! location it failed at) and [`CompilerWarning`] (advisory, never fatal).
//! The interpreter reports [`RuntimeError`], which carries a *collapsed* call
//! stack: consecutive frames at the same location are folded into a
//! `(location, repeat_count)` pair instead of being repeated, since a runaway
//! recursive panic would otherwise produce an unreadable trace.

use crate::source_loc::SourceLoc;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message} at {loc}")]
pub struct CompilationError {
    pub message: String,
    pub loc: SourceLoc,
}

impl CompilationError {
    pub fn new(message: impl Into<String>, loc: SourceLoc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilerWarning {
    pub message: String,
    pub loc: SourceLoc,
}

impl CompilerWarning {
    pub fn new(message: impl Into<String>, loc: SourceLoc) -> Self {
        Self {
            message: message.into(),
            loc,
        }
    }
}

/// One entry in a collapsed runtime call stack: the location a frame panicked
/// at (or returned to), and how many consecutive frames shared it.
pub type StackFrame = (Option<SourceLoc>, usize);

#[derive(Debug, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    pub call_stack: Vec<StackFrame>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, call_stack: Vec<StackFrame>) -> Self {
        Self {
            message: message.into(),
            call_stack,
        }
    }

    /// Push a frame onto the collapsed stack, merging with the top frame if
    /// it shares the same location.
    pub fn push_frame(&mut self, loc: Option<SourceLoc>) {
        if let Some((top_loc, count)) = self.call_stack.last_mut() {
            if *top_loc == loc {
                *count += 1;
                return;
            }
        }
        self.call_stack.push((loc, 1));
    }

    pub fn to_print_string(&self) -> String {
        let mut out = format!("runtime error: {}\n", self.message);
        for (loc, count) in &self.call_stack {
            let where_ = match loc {
                Some(loc) => loc.to_string(),
                None => "<native>".to_string(),
            };
            if *count > 1 {
                out.push_str(&format!("  at {} (x{})\n", where_, count));
            } else {
                out.push_str(&format!("  at {}\n", where_));
            }
        }
        out
    }
}

pub type CompileResult<T> = std::result::Result<T, CompilationError>;
pub type RunResult<T> = std::result::Result<T, RuntimeError>;
