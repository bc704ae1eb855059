//! Compile-time bookkeeping: the lexical-scope stack and the
//! function-declaration stack.

use indexmap::IndexMap;
use rustc_hash::FxHashSet;

use crate::ids::{ConstantId, FunctionId};

/// One block-level scope (function body, loop body, if/else branch). Only
/// loop scopes ever get a `break`/`continue` patched against them, but
/// every scope tracks what it declared so its bindings go out of visibility
/// when the block closes.
pub(super) struct Scope {
    pub declared_hashes: Vec<u64>,
    pub declared_count: u8,
    pub is_loop: bool,
    pub break_patches: Vec<usize>,
    pub continue_patches: Vec<usize>,
    pub all_code_paths_return: bool,
    /// Locals a `break` must additionally unwind beyond this scope's own
    /// `declared_count` -- the for-loop's iterator local, which lives
    /// outside the per-iteration scope and is normally reclaimed only by
    /// the loop's natural exit path, a path `break` skips.
    pub extra_break_unwind: u8,
}

impl Scope {
    pub fn new(is_loop: bool) -> Self {
        Self {
            declared_hashes: Vec::new(),
            declared_count: 0,
            is_loop,
            break_patches: Vec::new(),
            continue_patches: Vec::new(),
            all_code_paths_return: false,
            extra_break_unwind: 0,
        }
    }
}

/// One function currently being compiled (innermost last). Top-level code
/// is compiled as a function-shaped context too (`no_capture = true`, no
/// id registered), so the same machinery handles both.
pub(super) struct FuncCtx {
    pub id: Option<FunctionId>,
    pub name: String,
    pub param_count: u8,
    pub no_capture: bool,
    pub is_class_method: bool,
    pub next_local: u8,
    /// Capture-table local slot, bound right after parameters, present
    /// only when the function actually captures something and isn't
    /// `no_capture`/a class method.
    pub capture_local: Option<u8>,
    /// name hash -> source name, insertion ordered so the capture table's
    /// construction at the call site enumerates them deterministically.
    pub captured: IndexMap<u64, String>,
    pub referenced_functions: FxHashSet<FunctionId>,
    pub referenced_constants: FxHashSet<ConstantId>,
    pub start_address: usize,
}

impl FuncCtx {
    pub fn new(name: String, no_capture: bool, is_class_method: bool, start_address: usize) -> Self {
        Self {
            id: None,
            name,
            param_count: 0,
            no_capture,
            is_class_method,
            next_local: 0,
            capture_local: None,
            captured: IndexMap::new(),
            referenced_functions: FxHashSet::default(),
            referenced_constants: FxHashSet::default(),
            start_address,
        }
    }
}

#[derive(Clone, Copy)]
pub(super) struct VarRecord {
    pub is_global: bool,
    pub offset: u8,
    pub func_depth: usize,
}
