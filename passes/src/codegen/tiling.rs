//! Marker-gated tiling of compute operations.
//!
//! A [`TileSpec`] turns one compute operation into a loop nest over tiles,
//! with the operation itself re-created on sub-views inside the innermost
//! body. The `from`/`to` stage markers make the rewrite a one-shot step of a
//! staged pipeline: a freshly tiled operation carries `to` and no longer
//! matches a spec that requires `from`.

use air_ir::prelude::*;
use itertools::Itertools;
use smallvec::SmallVec;
use tracing::{debug, trace};

/// How the tile loops are materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopStyle {
    /// One counted loop per tiled dimension, nested in `interchange` order.
    Sequential,
    /// A single multi-dimensional parallel loop.
    Parallel,
}

/// One tiling rewrite.
#[derive(Debug, Clone)]
pub(crate) struct TileSpec {
    /// Requested tile size per iteration dimension. Zero or a size equal to
    /// the extent leaves the dimension untiled; missing entries count as
    /// zero.
    pub sizes: SmallVec<[i64; 8]>,
    /// Dimension order for the generated loops; empty means identity.
    pub interchange: SmallVec<[usize; 8]>,
    pub style: LoopStyle,
    /// Stage the operation must carry for the rewrite to fire.
    pub from: Option<TilingStage>,
    /// Stage stamped on the tiled operation.
    pub to: TilingStage,
}

pub(crate) fn tiling_patterns(code: OpCode, spec: TileSpec) -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(code, "tile-compute-op", move |op, m, _| tile_op(m, op, &spec));
    set
}

/// How one operand dimension is indexed by the iteration space.
#[derive(Clone, Copy)]
enum DimExpr {
    /// Indexed directly by one iteration dimension.
    Point(usize),
    /// Convolution window: a spatial dimension plus a kernel dimension.
    Window(usize, usize),
}

/// Static iteration space of a compute operation plus the per-operand
/// indexing maps used to carve sub-views.
struct Domain {
    extents: SmallVec<[i64; 8]>,
    maps: Vec<SmallVec<[DimExpr; 4]>>,
}

fn iteration_domain(m: &Module, op: OpId) -> Option<Domain> {
    let data = m.op(op);
    let shapes: Vec<SmallVec<[i64; 4]>> = data
        .operands
        .iter()
        .map(|&v| m.value_type(v).as_memref().and_then(|t| t.static_shape()))
        .collect::<Option<_>>()?;

    match data.kind {
        OpKind::Generic { .. } => {
            let first = shapes.first()?;
            if !shapes.iter().all_equal() {
                return None;
            }
            let maps = shapes
                .iter()
                .map(|_| (0..first.len()).map(DimExpr::Point).collect())
                .collect();
            Some(Domain { extents: first.clone().into_iter().collect(), maps })
        }
        OpKind::Matmul => {
            let ([m0, k0], [k1, n0], [m1, n1]) =
                (shapes.first()?.as_slice(), shapes.get(1)?.as_slice(), shapes.get(2)?.as_slice())
            else {
                return None;
            };
            if m0 != m1 || k0 != k1 || n0 != n1 {
                return None;
            }
            Some(Domain {
                extents: [*m0, *n0, *k0].into_iter().collect(),
                maps: vec![
                    [DimExpr::Point(0), DimExpr::Point(2)].into_iter().collect(),
                    [DimExpr::Point(2), DimExpr::Point(1)].into_iter().collect(),
                    [DimExpr::Point(0), DimExpr::Point(1)].into_iter().collect(),
                ],
            })
        }
        OpKind::Conv2d => {
            let ([n0, c0, _, _], [f0, c1, kh, kw], [n1, f1, oh, ow]) =
                (shapes.first()?.as_slice(), shapes.get(1)?.as_slice(), shapes.get(2)?.as_slice())
            else {
                return None;
            };
            if n0 != n1 || c0 != c1 || f0 != f1 {
                return None;
            }
            Some(Domain {
                extents: [*n0, *f0, *oh, *ow, *kh, *kw, *c0].into_iter().collect(),
                maps: vec![
                    [
                        DimExpr::Point(0),
                        DimExpr::Point(6),
                        DimExpr::Window(2, 4),
                        DimExpr::Window(3, 5),
                    ]
                    .into_iter()
                    .collect(),
                    [
                        DimExpr::Point(1),
                        DimExpr::Point(6),
                        DimExpr::Point(4),
                        DimExpr::Point(5),
                    ]
                    .into_iter()
                    .collect(),
                    [
                        DimExpr::Point(0),
                        DimExpr::Point(1),
                        DimExpr::Point(2),
                        DimExpr::Point(3),
                    ]
                    .into_iter()
                    .collect(),
                ],
            })
        }
        _ => None,
    }
}

fn tile_op(m: &mut Module, op: OpId, spec: &TileSpec) -> RewriteResult {
    if m.op(op).attrs.stage() != spec.from {
        return RewriteResult::NoMatch;
    }
    let Some(domain) = iteration_domain(m, op) else {
        trace!(op = m.op(op).kind.name(), "operand shapes not static, not tiling");
        return RewriteResult::NoMatch;
    };
    let rank = domain.extents.len();

    let mut tile: SmallVec<[i64; 8]> = SmallVec::from_elem(0, rank);
    for (slot, &size) in tile.iter_mut().zip(spec.sizes.iter()) {
        *slot = size;
    }
    let order: SmallVec<[usize; 8]> = if spec.interchange.len() == rank {
        spec.interchange.clone()
    } else {
        (0..rank).collect()
    };
    // a dimension gets a loop only when the tile is a proper divisor window
    let loop_dims: SmallVec<[usize; 8]> = order
        .iter()
        .copied()
        .filter(|&d| d < rank && tile[d] > 0 && tile[d] < domain.extents[d])
        .collect();
    for &d in &loop_dims {
        if domain.extents[d] % tile[d] != 0 {
            trace!(
                dim = d,
                extent = domain.extents[d],
                size = tile[d],
                "tile size does not divide extent, not tiling"
            );
            return RewriteResult::NoMatch;
        }
    }

    let operands = m.op(op).operands.clone();
    let kind = m.op(op).kind.clone();
    let attrs = m.op(op).attrs.clone();
    let Some(op_types) = operands
        .iter()
        .map(|&v| m.value_type(v).as_memref().map(|t| (t.elem, t.space)))
        .collect::<Option<Vec<_>>>()
    else {
        return RewriteResult::NoMatch;
    };
    let Some(block) = m.parent_block(op) else {
        return RewriteResult::NoMatch;
    };
    let Some(at) = m.op_index_in_block(op) else {
        return RewriteResult::NoMatch;
    };

    // loops are built outermost first, the cursor descends into each body
    let mut ivs: SmallVec<[Option<ValueId>; 8]> = SmallVec::from_elem(None, rank);
    let (body, ip) = match spec.style {
        LoopStyle::Sequential => {
            let mut cursor = (block, at);
            for &d in &loop_dims {
                let lp = {
                    let mut b = OpBuilder::at(m, cursor.0, cursor.1);
                    b.for_loop(0, domain.extents[d], tile[d])
                };
                ivs[d] = Some(lp.iv);
                cursor = (lp.body, 0);
            }
            cursor
        }
        LoopStyle::Parallel if !loop_dims.is_empty() => {
            let lbs = vec![0i64; loop_dims.len()];
            let ubs: Vec<i64> = loop_dims.iter().map(|&d| domain.extents[d]).collect();
            let steps: Vec<i64> = loop_dims.iter().map(|&d| tile[d]).collect();
            let par = {
                let mut b = OpBuilder::at(m, block, at);
                b.parallel(&lbs, &ubs, &steps)
            };
            for (iv, &d) in par.ivs.iter().zip(loop_dims.iter()) {
                ivs[d] = Some(*iv);
            }
            (par.body, 0)
        }
        LoopStyle::Parallel => (block, at),
    };

    // per dimension: tile size when looped, full extent otherwise
    let window: SmallVec<[i64; 8]> = (0..rank)
        .map(|d| if ivs[d].is_some() { tile[d] } else { domain.extents[d] })
        .collect();

    let mut b = OpBuilder::at(m, body, ip);
    let mut tiled_operands: SmallVec<[ValueId; 4]> = SmallVec::new();
    for (index, &operand) in operands.iter().enumerate() {
        let (elem, space) = op_types[index];
        let mut offsets: SmallVec<[SubviewOffset; 4]> = SmallVec::new();
        let mut dyn_offsets: SmallVec<[ValueId; 4]> = SmallVec::new();
        let mut sizes: SmallVec<[i64; 4]> = SmallVec::new();
        for expr in &domain.maps[index] {
            match *expr {
                DimExpr::Point(d) => {
                    match ivs[d] {
                        Some(iv) => {
                            offsets.push(SubviewOffset::Dynamic);
                            dyn_offsets.push(iv);
                        }
                        None => offsets.push(SubviewOffset::Static(0)),
                    }
                    sizes.push(window[d]);
                }
                DimExpr::Window(d, k) => {
                    match (ivs[d], ivs[k]) {
                        (Some(spatial), Some(kernel)) => {
                            let sum = b.add_index(spatial, kernel);
                            offsets.push(SubviewOffset::Dynamic);
                            dyn_offsets.push(sum);
                        }
                        (Some(iv), None) | (None, Some(iv)) => {
                            offsets.push(SubviewOffset::Dynamic);
                            dyn_offsets.push(iv);
                        }
                        (None, None) => offsets.push(SubviewOffset::Static(0)),
                    }
                    sizes.push(window[d] + window[k] - 1);
                }
            }
        }
        let strides = vec![1i64; sizes.len()];
        tiled_operands.push(b.subview(operand, &offsets, &dyn_offsets, &sizes, &strides, elem, space));
    }
    let tiled = b.insert(kind, tiled_operands, []);
    m.op_mut(tiled).attrs = attrs;
    m.op_mut(tiled).attrs.set_stage(spec.to);
    m.erase_op(op);

    debug!(loops = loop_dims.len(), stage = %spec.to, "tiled compute operation");
    RewriteResult::Rewritten
}
