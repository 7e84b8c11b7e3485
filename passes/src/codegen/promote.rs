//! Operand promotion into staging buffers.
//!
//! After tiling, the compute operation reads and writes sub-views of its
//! original operands. Promotion gives each selected sub-view a dedicated
//! buffer: a flat byte allocation viewed at the sub-view's shape, filled by
//! a copy before the operation and, for outputs, flushed back after it. The
//! buffers stay in the default tier here; the sub-view cleanup rewrites
//! them into the fast tier at the end of the pipeline.

use air_ir::prelude::*;
use smallvec::SmallVec;
use tracing::debug;

pub(crate) fn promotion_patterns(
    code: OpCode,
    from: TilingStage,
    to: TilingStage,
    operands: Option<Vec<usize>>,
) -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(code, "promote-tile-operands", move |op, m, _| {
        promote_op(m, op, from, to, operands.as_deref())
    });
    set
}

struct Target {
    index: usize,
    source: ValueId,
    shape: SmallVec<[i64; 4]>,
    elem: ElemType,
    bytes: i64,
}

fn promote_op(
    m: &mut Module,
    op: OpId,
    from: TilingStage,
    to: TilingStage,
    selected: Option<&[usize]>,
) -> RewriteResult {
    if m.op(op).attrs.stage() != Some(from) {
        return RewriteResult::NoMatch;
    }
    let Some(inputs) = m.op(op).kind.compute_inputs() else {
        return RewriteResult::NoMatch;
    };
    let operands = m.op(op).operands.clone();

    // only statically shaped sub-view operands can be promoted
    let mut targets: Vec<Target> = Vec::new();
    for (index, &operand) in operands.iter().enumerate() {
        if let Some(sel) = selected
            && !sel.contains(&index)
        {
            continue;
        }
        let Some(def) = m.defining_op(operand) else { continue };
        if !matches!(m.op(def).kind, OpKind::Subview { .. }) {
            continue;
        }
        let Some(ty) = m.value_type(operand).as_memref() else { continue };
        let (Some(shape), Some(bytes)) = (ty.static_shape(), ty.byte_size()) else {
            continue;
        };
        targets.push(Target { index, source: operand, shape, elem: ty.elem, bytes });
    }
    if targets.is_empty() {
        return RewriteResult::NoMatch;
    }

    struct Promoted {
        index: usize,
        source: ValueId,
        full: ValueId,
        buffer: ValueId,
    }
    let mut promoted: Vec<Promoted> = Vec::new();
    {
        let Some(mut b) = OpBuilder::before(m, op) else {
            return RewriteResult::NoMatch;
        };
        for target in &targets {
            let buffer = b.alloc(MemRefType::new([target.bytes], ElemType::I8, MemorySpace::L3));
            let shaped = MemRefType::new(target.shape.iter().copied(), target.elem, MemorySpace::L3);
            let view = b.view(buffer, shaped);
            let offsets: SmallVec<[SubviewOffset; 4]> =
                target.shape.iter().map(|_| SubviewOffset::Static(0)).collect();
            let strides = vec![1i64; target.shape.len()];
            let full = b.subview(view, &offsets, &[], &target.shape, &strides, target.elem, MemorySpace::L3);
            b.copy(target.source, full);
            promoted.push(Promoted { index: target.index, source: target.source, full, buffer });
        }
    }

    for p in &promoted {
        m.op_mut(op).operands[p.index] = p.full;
    }

    {
        let Some(mut b) = OpBuilder::after(m, op) else {
            return RewriteResult::NoMatch;
        };
        for p in &promoted {
            if p.index >= inputs {
                b.copy(p.full, p.source);
            }
        }
        for p in &promoted {
            b.dealloc(p.buffer);
        }
    }
    m.op_mut(op).attrs.set_stage(to);

    debug!(count = promoted.len(), stage = %to, "promoted tile operands");
    RewriteResult::Rewritten
}
