//! Sub-view cleanup rewrites.
//!
//! Three families close out a tiling pipeline:
//!
//! * folding merges chained sub-views into one rooted at the outer source,
//! * the fast-tier rewrite turns a sub-view of a viewed staging allocation
//!   into a direct tile-sized allocation in the given memory space,
//! * the allocation pre-pass drops staging buffers a producing pass left
//!   behind when the consumer never reads the copied data.
//!
//! The fast-tier rewrite must be tried before folding: it redirects the
//! chained sub-views to the new allocation, which takes them out of
//! folding's reach and keeps data movement intact.

use air_ir::prelude::*;
use smallvec::SmallVec;
use tracing::debug;

pub(crate) fn fold_subview_patterns() -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(OpCode::Subview, "fold-chained-subviews", |op, m, _| fold_chained(m, op));
    set
}

pub(crate) fn remove_subview_patterns(fast: MemorySpace) -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(OpCode::Subview, "subview-to-tile-alloc", move |op, m, _| {
        rewrite_to_tile_alloc(m, op, fast)
    });
    set
}

pub(crate) fn cleanup_alloc_patterns() -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(OpCode::Alloc, "drop-unread-staging-alloc", |op, m, _| {
        drop_unread_staging(m, op)
    });
    set
}

/// Merges a sub-view of a sub-view into a single sub-view of the outer
/// source. Static offsets add up; dynamic ones combine through index
/// additions emitted right before the consumer.
fn fold_chained(m: &mut Module, op: OpId) -> RewriteResult {
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
    let Some(producer) = m.defining_op(source) else {
        return RewriteResult::NoMatch;
    };
    let producer_offsets = match &m.op(producer).kind {
        OpKind::Subview { offsets, .. } => offsets.clone(),
        _ => return RewriteResult::NoMatch,
    };
    if producer_offsets.len() != offsets.len() {
        return RewriteResult::NoMatch;
    }
    let producer_operands = m.op(producer).operands.clone();
    let Some(&outer) = producer_operands.first() else {
        return RewriteResult::NoMatch;
    };
    let Some(ty) = m.value_type(m.result(op, 0)).as_memref().cloned() else {
        return RewriteResult::NoMatch;
    };

    let dynamic = |offs: &[SubviewOffset]| {
        offs.iter().filter(|o| matches!(o, SubviewOffset::Dynamic)).count()
    };
    let consumer_dyn = &operands[1..];
    let producer_dyn = &producer_operands[1..];
    if dynamic(&offsets) != consumer_dyn.len() || dynamic(&producer_offsets) != producer_dyn.len()
    {
        return RewriteResult::NoMatch;
    }

    let Some(mut b) = OpBuilder::before(m, op) else {
        return RewriteResult::NoMatch;
    };
    let mut merged: SmallVec<[SubviewOffset; 4]> = SmallVec::new();
    let mut merged_dyn: SmallVec<[ValueId; 4]> = SmallVec::new();
    let (mut ci, mut pi) = (0usize, 0usize);
    for (consumer, producer) in offsets.iter().zip(producer_offsets.iter()) {
        match (consumer, producer) {
            (SubviewOffset::Static(a), SubviewOffset::Static(p)) => {
                merged.push(SubviewOffset::Static(a + p));
            }
            (SubviewOffset::Dynamic, SubviewOffset::Static(p)) => {
                let v = consumer_dyn[ci];
                ci += 1;
                merged.push(SubviewOffset::Dynamic);
                merged_dyn.push(if *p == 0 {
                    v
                } else {
                    let c = b.const_index(*p);
                    b.add_index(v, c)
                });
            }
            (SubviewOffset::Static(a), SubviewOffset::Dynamic) => {
                let v = producer_dyn[pi];
                pi += 1;
                merged.push(SubviewOffset::Dynamic);
                merged_dyn.push(if *a == 0 {
                    v
                } else {
                    let c = b.const_index(*a);
                    b.add_index(v, c)
                });
            }
            (SubviewOffset::Dynamic, SubviewOffset::Dynamic) => {
                let p = producer_dyn[pi];
                pi += 1;
                let c = consumer_dyn[ci];
                ci += 1;
                merged.push(SubviewOffset::Dynamic);
                merged_dyn.push(b.add_index(p, c));
            }
        }
    }
    let folded = b.subview(outer, &merged, &merged_dyn, &sizes, &strides, ty.elem, ty.space);
    let old = m.result(op, 0);
    m.replace_all_uses(old, folded);
    m.erase_op(op);

    debug!("folded chained sub-views");
    RewriteResult::Rewritten
}

/// Rewrites `subview(view(alloc))` into a tile-sized allocation in the fast
/// memory space. All uses of the sub-view and of the staging allocation move
/// to the new buffer, which leaves the view and the staging allocation dead.
fn rewrite_to_tile_alloc(m: &mut Module, op: OpId, fast: MemorySpace) -> RewriteResult {
    let sizes = match &m.op(op).kind {
        OpKind::Subview { sizes, .. } => sizes.clone(),
        _ => return RewriteResult::NoMatch,
    };
    let Some(&source) = m.op(op).operands.first() else {
        return RewriteResult::NoMatch;
    };
    let Some(view) = m.defining_op(source) else {
        return RewriteResult::NoMatch;
    };
    if !matches!(m.op(view).kind, OpKind::View) {
        return RewriteResult::NoMatch;
    }
    let Some(&viewed) = m.op(view).operands.first() else {
        return RewriteResult::NoMatch;
    };
    let Some(staging) = m.defining_op(viewed) else {
        return RewriteResult::NoMatch;
    };
    if !matches!(m.op(staging).kind, OpKind::Alloc) {
        return RewriteResult::NoMatch;
    }
    let Some(elem) = m.value_type(m.result(op, 0)).as_memref().map(|t| t.elem) else {
        return RewriteResult::NoMatch;
    };

    // the tile buffer takes the staging allocation's position so it
    // dominates every rewritten use
    let Some(mut b) = OpBuilder::before(m, staging) else {
        return RewriteResult::NoMatch;
    };
    let tile = b.alloc(MemRefType::new(sizes.iter().copied(), elem, fast));
    let old_subview = m.result(op, 0);
    let old_staging = m.result(staging, 0);
    m.replace_all_uses(old_subview, tile);
    m.erase_op(op);
    m.replace_all_uses(old_staging, tile);

    debug!(space = %fast, "replaced sub-view with tile allocation");
    RewriteResult::Rewritten
}

/// Removes a staging allocation whose contents the consumer never reads.
///
/// Matches `alloc` -> `cast` -> copy into the cast, where the allocation
/// also feeds a compute operation that only writes it. The copy destination
/// then stands in for the allocation and the copy disappears.
fn drop_unread_staging(m: &mut Module, op: OpId) -> RewriteResult {
    let buffer = m.result(op, 0);
    let uses = m.uses(buffer);
    if uses.is_empty() {
        m.erase_op(op);
        debug!("erased unused staging allocation");
        return RewriteResult::Rewritten;
    }

    let mut cast = None;
    let mut compute = None;
    for &(user, index) in &uses {
        match &m.op(user).kind {
            OpKind::Cast if cast.is_none() => cast = Some(user),
            kind if kind.is_compute() => {
                let Some(inputs) = kind.compute_inputs() else {
                    return RewriteResult::NoMatch;
                };
                // a reading use pins the buffer
                if index < inputs || kind.reads_output() {
                    return RewriteResult::NoMatch;
                }
                compute = Some(user);
            }
            OpKind::Dealloc => {}
            _ => return RewriteResult::NoMatch,
        }
    }
    let (Some(cast), Some(_)) = (cast, compute) else {
        return RewriteResult::NoMatch;
    };

    let casted = m.result(cast, 0);
    let cast_uses = m.uses(casted);
    let [(copy, 1)] = cast_uses.as_slice() else {
        return RewriteResult::NoMatch;
    };
    let copy = *copy;
    if !matches!(m.op(copy).kind, OpKind::Copy) {
        return RewriteResult::NoMatch;
    }
    let Some(&copied) = m.op(copy).operands.first() else {
        return RewriteResult::NoMatch;
    };
    // the copied value must be available where the allocation sits
    if !value_dominates(m, copied, op) {
        return RewriteResult::NoMatch;
    }

    let Some(ty) = m.value_type(buffer).as_memref().cloned() else {
        return RewriteResult::NoMatch;
    };
    let replacement = {
        let Some(mut b) = OpBuilder::before(m, op) else {
            return RewriteResult::NoMatch;
        };
        b.cast(copied, ty)
    };
    m.erase_op(copy);
    m.erase_op(cast);
    m.replace_all_uses(buffer, replacement);
    m.erase_op(op);

    debug!("dropped unread staging allocation");
    RewriteResult::Rewritten
}
