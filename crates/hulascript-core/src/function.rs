//! Function registry entries.

use rustc_hash::FxHashSet;

use crate::ids::{ConstantId, FunctionId};

#[derive(Clone, Debug)]
pub struct FunctionEntry {
    pub name: String,
    pub start_address: usize,
    pub length: usize,
    pub parameter_count: u8,
    pub referenced_functions: FxHashSet<FunctionId>,
    pub referenced_constants: FxHashSet<ConstantId>,
}

impl FunctionEntry {
    pub fn end_address(&self) -> usize {
        self.start_address + self.length
    }
}
