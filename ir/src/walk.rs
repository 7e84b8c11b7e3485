//! Ancestor-chain utilities.
//!
//! Several rewrites need to look outward from an operation: recovering the
//! tile coordinate of a DMA from its enclosing loops, or checking that a
//! value is available at an insertion point. They all share the same walk up
//! the region tree, parameterized by a predicate.

use crate::module::{Module, OpId, ValueDef, ValueId};

/// Iterator over the operations enclosing `op`, innermost first.
pub struct Ancestors<'m> {
    module: &'m Module,
    next: Option<OpId>,
}

impl Iterator for Ancestors<'_> {
    type Item = OpId;

    fn next(&mut self) -> Option<OpId> {
        let cur = self.next?;
        self.next = self.module.parent_op(cur);
        Some(cur)
    }
}

/// Enclosing operations of `op`, innermost first. `op` itself is not
/// yielded.
pub fn ancestors(module: &Module, op: OpId) -> Ancestors<'_> {
    Ancestors { module, next: module.parent_op(op) }
}

/// Innermost enclosing operation satisfying `pred`.
pub fn find_ancestor(
    module: &Module,
    op: OpId,
    pred: impl Fn(&Module, OpId) -> bool,
) -> Option<OpId> {
    ancestors(module, op).find(|&a| pred(module, a))
}

/// True if `def` executes strictly before `op`: either earlier in the same
/// block, or earlier in a block that encloses `op`.
pub fn properly_dominates(module: &Module, def: OpId, op: OpId) -> bool {
    let Some(def_block) = module.parent_block(def) else {
        return false;
    };
    let Some(def_pos) = module.op_index_in_block(def) else {
        return false;
    };
    if def == op {
        return false;
    }

    // climb until we land in the defining block, then compare positions
    let mut cur = op;
    loop {
        match module.parent_block(cur) {
            Some(block) if block == def_block => {
                return match module.op_index_in_block(cur) {
                    Some(pos) => def_pos < pos,
                    None => false,
                };
            }
            Some(_) => match module.parent_op(cur) {
                Some(parent) => cur = parent,
                None => return false,
            },
            None => return false,
        }
    }
}

/// True if `value` is available right before `op`: its defining op properly
/// dominates `op`, or it is an argument of a block enclosing `op`.
pub fn value_dominates(module: &Module, value: ValueId, op: OpId) -> bool {
    match module.value(value).def {
        ValueDef::OpResult { op: def, .. } => {
            !module.op(def).is_erased() && properly_dominates(module, def, op)
        }
        ValueDef::BlockArg { block, .. } => {
            if module.parent_block(op) == Some(block) {
                return true;
            }
            ancestors(module, op).any(|a| module.parent_block(a) == Some(block))
        }
    }
}
