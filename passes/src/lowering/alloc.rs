//! Intermediate-tier allocation lowering.
//!
//! On the hardware path, L2 buffers are managed by the runtime: alloc and
//! dealloc move one-to-one onto the runtime allocator. Other tiers are left
//! alone.

use air_ir::prelude::*;
use tracing::debug;

pub(crate) fn alloc_patterns() -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(OpCode::Alloc, "l2-alloc-to-runtime", |op, m, _| lower_alloc(m, op));
    set.add(OpCode::Dealloc, "l2-dealloc-to-runtime", |op, m, _| lower_dealloc(m, op));
    set
}

fn lower_alloc(m: &mut Module, op: OpId) -> RewriteResult {
    let Some(result) = m.op(op).results.first().copied() else {
        return RewriteResult::NoMatch;
    };
    let ty = match m.value_type(result) {
        Type::MemRef(ty) if ty.space == MemorySpace::L2 => ty.clone(),
        _ => return RewriteResult::NoMatch,
    };

    let Some(mut b) = OpBuilder::before(m, op) else {
        return RewriteResult::NoMatch;
    };
    let buffer = b.rt_alloc(ty);
    m.replace_all_uses(result, buffer);
    m.erase_op(op);
    debug!("moved L2 allocation to the runtime");
    RewriteResult::Rewritten
}

fn lower_dealloc(m: &mut Module, op: OpId) -> RewriteResult {
    let Some(buffer) = m.op(op).operands.first().copied() else {
        return RewriteResult::NoMatch;
    };
    if m.value_type(buffer).space() != Some(MemorySpace::L2) {
        return RewriteResult::NoMatch;
    }

    let Some(mut b) = OpBuilder::before(m, op) else {
        return RewriteResult::NoMatch;
    };
    b.rt_dealloc(buffer);
    m.erase_op(op);
    debug!("moved L2 deallocation to the runtime");
    RewriteResult::Rewritten
}
