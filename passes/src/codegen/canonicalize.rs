//! Loop and index canonicalizations run between pipeline stages.

use air_ir::prelude::*;
use smallvec::SmallVec;
use tracing::debug;

pub(crate) fn loop_patterns() -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(OpCode::For, "canonicalize-for", |op, m, _| canonicalize_for(m, op));
    set.add(OpCode::Parallel, "canonicalize-parallel", |op, m, _| {
        canonicalize_parallel(m, op)
    });
    set.add(OpCode::AddIndex, "fold-const-add", |op, m, _| fold_const_add(m, op));
    set.add(OpCode::Subview, "fold-const-offsets", |op, m, _| fold_const_offsets(m, op));
    set
}

/// Erases zero-trip loops and inlines single-iteration ones.
fn canonicalize_for(m: &mut Module, op: OpId) -> RewriteResult {
    let (lb, ub, step) = match m.op(op).kind {
        OpKind::For { lb, ub, step } => (lb, ub, step),
        _ => return RewriteResult::NoMatch,
    };
    if ub <= lb {
        m.erase_op(op);
        debug!("erased zero-trip loop");
        return RewriteResult::Rewritten;
    }
    if ub - lb > step {
        return RewriteResult::NoMatch;
    }
    let Some(body) = m.op_entry_block(op) else {
        return RewriteResult::NoMatch;
    };
    let Some(&iv) = m.block(body).args.first() else {
        return RewriteResult::NoMatch;
    };
    let Some(block) = m.parent_block(op) else {
        return RewriteResult::NoMatch;
    };
    let Some(at) = m.op_index_in_block(op) else {
        return RewriteResult::NoMatch;
    };

    let lower = {
        let mut b = OpBuilder::at(m, block, at);
        b.const_index(lb)
    };
    m.replace_all_uses(iv, lower);
    m.splice_block_except_terminator(body, block, at + 1);
    m.erase_op(op);

    debug!("inlined single-iteration loop");
    RewriteResult::Rewritten
}

fn canonicalize_parallel(m: &mut Module, op: OpId) -> RewriteResult {
    let (lbs, ubs, steps) = match &m.op(op).kind {
        OpKind::Parallel { lbs, ubs, steps } => (lbs.clone(), ubs.clone(), steps.clone()),
        _ => return RewriteResult::NoMatch,
    };
    if lbs.iter().zip(ubs.iter()).any(|(lb, ub)| ub <= lb) {
        m.erase_op(op);
        debug!("erased zero-trip parallel loop");
        return RewriteResult::Rewritten;
    }
    let single = (0..lbs.len()).all(|d| ubs[d] - lbs[d] <= steps[d]);
    if !single {
        return RewriteResult::NoMatch;
    }
    let Some(body) = m.op_entry_block(op) else {
        return RewriteResult::NoMatch;
    };
    let ivs = m.block(body).args.clone();
    if ivs.len() != lbs.len() {
        return RewriteResult::NoMatch;
    }
    let Some(block) = m.parent_block(op) else {
        return RewriteResult::NoMatch;
    };
    let Some(at) = m.op_index_in_block(op) else {
        return RewriteResult::NoMatch;
    };

    let lowers: Vec<ValueId> = {
        let mut b = OpBuilder::at(m, block, at);
        lbs.iter().map(|&lb| b.const_index(lb)).collect()
    };
    for (&iv, &lower) in ivs.iter().zip(lowers.iter()) {
        m.replace_all_uses(iv, lower);
    }
    m.splice_block_except_terminator(body, block, at + lbs.len());
    m.erase_op(op);

    debug!(rank = lbs.len(), "inlined single-iteration parallel loop");
    RewriteResult::Rewritten
}

fn fold_const_add(m: &mut Module, op: OpId) -> RewriteResult {
    let [lhs, rhs] = m.op(op).operands.as_slice() else {
        return RewriteResult::NoMatch;
    };
    let (Some(a), Some(b)) = (m.const_index_value(*lhs), m.const_index_value(*rhs)) else {
        return RewriteResult::NoMatch;
    };
    let folded = {
        let Some(mut builder) = OpBuilder::before(m, op) else {
            return RewriteResult::NoMatch;
        };
        builder.const_index(a + b)
    };
    let old = m.result(op, 0);
    m.replace_all_uses(old, folded);
    m.erase_op(op);
    RewriteResult::Rewritten
}

/// Turns dynamic sub-view offsets whose value is a known constant back into
/// static offsets.
fn fold_const_offsets(m: &mut Module, op: OpId) -> RewriteResult {
    let (offsets, sizes, strides) = match &m.op(op).kind {
        OpKind::Subview { offsets, sizes, strides } => {
            (offsets.clone(), sizes.clone(), strides.clone())
        }
        _ => return RewriteResult::NoMatch,
    };
    let operands = m.op(op).operands.clone();
    let Some(&source) = operands.first() else {
        return RewriteResult::NoMatch;
    };
    let dyn_values = &operands[1..];
    let dynamic = offsets.iter().filter(|o| matches!(o, SubviewOffset::Dynamic)).count();
    if dynamic != dyn_values.len() {
        return RewriteResult::NoMatch;
    }

    let mut changed = false;
    let mut folded: SmallVec<[SubviewOffset; 4]> = SmallVec::new();
    let mut kept: SmallVec<[ValueId; 4]> = SmallVec::new();
    let mut cursor = 0usize;
    for offset in &offsets {
        match offset {
            SubviewOffset::Static(s) => folded.push(SubviewOffset::Static(*s)),
            SubviewOffset::Dynamic => {
                let value = dyn_values[cursor];
                cursor += 1;
                match m.const_index_value(value) {
                    Some(c) => {
                        folded.push(SubviewOffset::Static(c));
                        changed = true;
                    }
                    None => {
                        folded.push(SubviewOffset::Dynamic);
                        kept.push(value);
                    }
                }
            }
        }
    }
    if !changed {
        return RewriteResult::NoMatch;
    }

    m.op_mut(op).kind = OpKind::Subview { offsets: folded, sizes, strides };
    m.op_mut(op).operands = std::iter::once(source).chain(kept).collect();
    debug!("folded constant sub-view offsets");
    RewriteResult::Rewritten
}
