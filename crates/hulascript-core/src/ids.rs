//! Typed identifiers for the heap's separately-registered object kinds.
//!
//! Each is a 24-bit id per the wire format (constant/function ids are
//! encoded across two operand bytes in the instruction stream), stored here
//! as `u32` for convenience; [`MAX_ID`] is enforced wherever one is minted.

use hulascript_util::define_idx;

pub const MAX_ID: u32 = (1 << 24) - 1;

define_idx!(TableId);
define_idx!(StringId);
define_idx!(FunctionId);
define_idx!(ConstantId);
define_idx!(ForeignObjectId);
