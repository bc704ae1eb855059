//! hulascript-util - foundation types shared by the lexer, compiler and
//! runtime crates.
//!
//! This crate has no knowledge of HulaScript syntax or bytecode; it only
//! provides the small, dependency-free building blocks that the rest of the
//! workspace builds on:
//!
//! - [`source_loc`]: source positions attached to tokens/instructions.
//! - [`hash`]: the djb2 variant used for string and table-key hashing.
//! - [`error`]: compiler/runtime error and warning types.
//! - [`index_vec`]: typed-index vectors (`ConstantId`, `FunctionId`, ...).

pub mod error;
pub mod hash;
pub mod index_vec;
pub mod source_loc;

pub use error::{CompilationError, CompileResult, CompilerWarning, RunResult, RuntimeError};
pub use index_vec::{Idx, IndexVec};
pub use source_loc::SourceLoc;
