//! DMA-copy lowering.
//!
//! Two mutually exclusive targets share the tile-coordinate recovery logic:
//! the CPU path rewrites each copy into a call of an emulation library
//! routine taking `(id, x, y, original operands...)`, and the hardware path
//! rewrites it into a runtime DMA op whose operand list drops the tile-side
//! buffer and its offsets, since the runtime addresses the tile implicitly
//! through `(x, y)`.

use air_ir::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, trace};

/// Total operand count of a DMA op with `dims` dimensions: two buffers,
/// per-dimension offsets on both sides, a length, and stride metadata for
/// the multi-dimensional forms.
pub(crate) fn dma_operand_count(dims: DmaDims) -> usize {
    let n = dims.count();
    2 + 2 * n + if n == 1 { 1 } else { 3 }
}

fn emulation_fn(dims: DmaDims) -> &'static str {
    match dims {
        DmaDims::D1 => "air_memcpy",
        DmaDims::D2 => "air_memcpy2d",
        DmaDims::D4 => "air_memcpy4d",
    }
}

/// Recover the `(x, y)` tile coordinate owning `op`.
///
/// Inside a not-yet-lowered herd launch the coordinate is the launch body's
/// leading argument pair. After herd lowering it is read off the enclosing
/// tagged loop nest: the nearest tagged loop must be the inner one, the
/// next the outer one. Untagged loops in between are skipped.
pub(crate) fn resolve_tile_coords(m: &Module, op: OpId) -> Option<(ValueId, ValueId)> {
    if let Some(launch) =
        find_ancestor(m, op, |m, a| matches!(m.op(a).kind, OpKind::HerdLaunch))
    {
        let body = m.op_entry_block(launch)?;
        let args = &m.block(body).args;
        return Some((*args.first()?, *args.get(1)?));
    }

    let inner = find_ancestor(m, op, |m, a| m.op(a).attrs.herd_loop().is_some())?;
    if m.op(inner).attrs.herd_loop() != Some(HerdLoopTag::Inner) {
        return None;
    }
    let outer = find_ancestor(m, inner, |m, a| m.op(a).attrs.herd_loop().is_some())?;
    if m.op(outer).attrs.herd_loop() != Some(HerdLoopTag::Outer) {
        return None;
    }
    Some((loop_iv(m, outer)?, loop_iv(m, inner)?))
}

fn loop_iv(m: &Module, op: OpId) -> Option<ValueId> {
    let body = m.op_entry_block(op)?;
    m.block(body).args.first().copied()
}

// ============================================================================
// CPU TARGET
// ============================================================================

pub(crate) fn cpu_patterns() -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(OpCode::DmaMemcpy, "dma-to-emulation-call", |op, m, _| lower_to_cpu_call(m, op));
    set
}

fn lower_to_cpu_call(m: &mut Module, op: OpId) -> RewriteResult {
    let dims = match &m.op(op).kind {
        OpKind::DmaMemcpy { dims } => *dims,
        _ => return RewriteResult::NoMatch,
    };
    let operands = m.op(op).operands.clone();
    if operands.len() != dma_operand_count(dims) {
        trace!(operands = operands.len(), "malformed DMA operand list");
        return RewriteResult::NoMatch;
    }
    let Some((x, y)) = resolve_tile_coords(m, op) else {
        trace!(op = m.op(op).kind.name(), "no tile coordinate in scope");
        return RewriteResult::NoMatch;
    };
    let id = m.op(op).attrs.id().unwrap_or(0);
    let callee = emulation_fn(dims);

    let mut args: SmallVec<[ValueId; 16]> = SmallVec::new();
    {
        let Some(mut b) = OpBuilder::before(m, op) else {
            return RewriteResult::NoMatch;
        };
        args.push(b.const_i32(id as i32));
        args.push(x);
        args.push(y);
        args.extend(operands.iter().copied());
    }

    if m.lookup_func(callee).is_none() {
        let params: Vec<Type> = args.iter().map(|&v| m.value_type(v).clone()).collect();
        m.declare_func(callee, params, []);
    }

    let Some(mut b) = OpBuilder::before(m, op) else {
        return RewriteResult::NoMatch;
    };
    b.call(callee, args.iter().copied(), []);
    m.erase_op(op);
    debug!(id, callee, "lowered DMA to emulation call");
    RewriteResult::Rewritten
}

// ============================================================================
// HARDWARE TARGET
// ============================================================================

pub(crate) fn runtime_patterns() -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(OpCode::DmaMemcpy, "dma-to-runtime-op", |op, m, _| lower_to_runtime(m, op));
    set
}

fn lower_to_runtime(m: &mut Module, op: OpId) -> RewriteResult {
    let dims = match &m.op(op).kind {
        OpKind::DmaMemcpy { dims } => *dims,
        _ => return RewriteResult::NoMatch,
    };
    let operands = m.op(op).operands.clone();
    if operands.len() != dma_operand_count(dims) {
        trace!(operands = operands.len(), "malformed DMA operand list");
        return RewriteResult::NoMatch;
    }

    // only transfers with the fast tier on exactly one side are supported
    let dst_space = m.value_type(operands[0]).space();
    let src_space = m.value_type(operands[1]).space();
    let from_tile = match (src_space, dst_space) {
        (Some(MemorySpace::L1), Some(MemorySpace::L3 | MemorySpace::L2)) => true,
        (Some(MemorySpace::L3 | MemorySpace::L2), Some(MemorySpace::L1)) => false,
        _ => {
            trace!(src = ?src_space, dst = ?dst_space, "unsupported memory-space pairing");
            return RewriteResult::NoMatch;
        }
    };
    let Some((x, y)) = resolve_tile_coords(m, op) else {
        trace!(op = m.op(op).kind.name(), "no tile coordinate in scope");
        return RewriteResult::NoMatch;
    };
    let id = m.op(op).attrs.id().unwrap_or(0);
    let n = dims.count();

    let Some(mut b) = OpBuilder::before(m, op) else {
        return RewriteResult::NoMatch;
    };
    let mut args: SmallVec<[ValueId; 16]> = SmallVec::new();
    args.push(b.const_i32(id as i32));
    args.push(x);
    args.push(y);
    args.extend(operands.iter().copied());

    // the runtime addresses the tile side through (x, y): drop that buffer
    // and its offsets
    if from_tile {
        args.remove(4);
        for _ in 0..n {
            args.remove(n + 4);
        }
    } else {
        args.remove(3);
        for _ in 0..n {
            args.remove(4);
        }
    }

    // the runtime ABI takes 64-bit integers where the dialect used indices
    for v in args.iter_mut() {
        if b.module().value_type(*v).is_index() {
            *v = b.index_cast_i64(*v);
        }
    }

    b.insert(OpKind::RtDmaMemcpy { dims }, args.iter().copied(), []);
    m.erase_op(op);
    debug!(id, from_tile, "lowered DMA to runtime op");
    RewriteResult::Rewritten
}
