//! Tiling code generation for structured compute operations.
//!
//! [`TilingCodegen`] rewrites matrix multiplies, 2-d convolutions and
//! element-wise generics into tiled loop nests with explicit data movement
//! through the memory tiers. Every operation goes through the same shape:
//! outline into a private function, run a staged pipeline of marker-gated
//! tiling and promotion rewrites there, clean up sub-views and loops, strip
//! the markers, inline the result back over the call.

pub(crate) mod canonicalize;
pub(crate) mod outline;
pub(crate) mod promote;
pub(crate) mod subview;
pub(crate) mod tiling;

use air_ir::prelude::*;
use smallvec::SmallVec;
use snafu::ResultExt;
use tracing::debug;

use crate::error::{Result, RewriteSnafu};
use crate::options::CodegenOptions;
use tiling::{LoopStyle, TileSpec};

/// Tile edge used for the innermost matmul and generic tiles.
const TILE_EDGE: i64 = 32;

#[derive(Debug, Clone, Default)]
pub struct TilingCodegen {
    options: CodegenOptions,
}

impl TilingCodegen {
    pub fn new(options: CodegenOptions) -> Self {
        Self { options }
    }

    /// Runs the pass over every function with a body.
    pub fn run(&self, module: &mut Module) -> Result<()> {
        let funcs: Vec<FuncId> = module.funcs().collect();
        for func in funcs {
            if module.func(func).is_declaration() {
                continue;
            }
            self.run_on_func(module, func)?;
        }
        Ok(())
    }

    pub fn run_on_func(&self, module: &mut Module, func: FuncId) -> Result<()> {
        let name = module.func(func).name.clone();
        debug!(
            func = %name,
            test_patterns = self.options.test_patterns,
            l1_cache_size = self.options.l1_cache_size,
            "tiling codegen"
        );

        // staging buffers left over from earlier passes
        apply(module, func, &subview::cleanup_alloc_patterns())?;

        if self.options.test_patterns {
            let patterns = subview::remove_subview_patterns(MemorySpace::L2)
                + subview::fold_subview_patterns();
            apply(module, func, &patterns)?;
            return Ok(());
        }

        self.run_matmul(module, func)?;
        self.run_conv2d(module, func)?;
        self.run_generic(module, func)?;
        Ok(())
    }

    /// Matmul: sequential loops over herd-sized macro tiles, a parallel loop
    /// over the per-core tiles, promotion of all three operands.
    fn run_matmul(&self, module: &mut Module, func: FuncId) -> Result<()> {
        let herd = self.options.herd_dims();
        for op in collect(module, func, OpCode::Matmul) {
            if module.op(op).is_erased() {
                continue;
            }
            let (call, callee) = outline::outline_op(module, op, "call_mmult")?;

            let macro_tile = [TILE_EDGE * herd[0], TILE_EDGE * herd[1], TILE_EDGE * herd[2]];
            let stage = tiling::tiling_patterns(
                OpCode::Matmul,
                TileSpec {
                    sizes: macro_tile.into_iter().collect(),
                    interchange: [2, 1, 0].into_iter().collect(),
                    style: LoopStyle::Sequential,
                    from: None,
                    to: TilingStage::L2,
                },
            );
            apply(module, callee, &stage)?;

            let stage = tiling::tiling_patterns(
                OpCode::Matmul,
                TileSpec {
                    sizes: [TILE_EDGE, TILE_EDGE, TILE_EDGE].into_iter().collect(),
                    interchange: SmallVec::new(),
                    style: LoopStyle::Parallel,
                    from: Some(TilingStage::L2),
                    to: TilingStage::L1,
                },
            ) + promote::promotion_patterns(
                OpCode::Matmul,
                TilingStage::L1,
                TilingStage::Promoted,
                None,
            );
            apply(module, callee, &stage)?;

            let stage = subview::remove_subview_patterns(MemorySpace::L1)
                + subview::fold_subview_patterns()
                + canonicalize::loop_patterns();
            apply(module, callee, &stage)?;

            strip_stage_markers(module, callee);
            outline::inline_call(module, call)?;
        }
        Ok(())
    }

    /// Convolution: two rounds of tile-then-promote, first over output rows
    /// for the intermediate tier, then over filter groups for the herd.
    fn run_conv2d(&self, module: &mut Module, func: FuncId) -> Result<()> {
        for op in collect(module, func, OpCode::Conv2d) {
            if module.op(op).is_erased() {
                continue;
            }
            // tile sizes come from the operand shapes, read before outlining
            let Some(shapes) = conv_shapes(module, op) else {
                debug!("conv operands lack static shapes, skipping");
                continue;
            };
            let (call, callee) = outline::outline_op(module, op, "call_conv_2d_nchw")?;

            let row_tile: SmallVec<[i64; 8]> = [
                1,
                shapes.filters,
                shapes.height / 4,
                shapes.width,
                shapes.kernel_h,
                shapes.kernel_w,
                shapes.channels,
            ]
            .into_iter()
            .collect();
            let herd_tile: SmallVec<[i64; 8]> = [
                1,
                shapes.filters / 4,
                shapes.height / 4,
                shapes.width,
                shapes.kernel_h,
                shapes.kernel_w,
                shapes.channels,
            ]
            .into_iter()
            .collect();

            let stage = tiling::tiling_patterns(
                OpCode::Conv2d,
                TileSpec {
                    sizes: row_tile,
                    interchange: [0, 2, 1, 3, 4, 5, 6].into_iter().collect(),
                    style: LoopStyle::Sequential,
                    from: None,
                    to: TilingStage::PromoteL2,
                },
            ) + promote::promotion_patterns(
                OpCode::Conv2d,
                TilingStage::PromoteL2,
                TilingStage::L2,
                Some(vec![0, 1, 2]),
            ) + tiling::tiling_patterns(
                OpCode::Conv2d,
                TileSpec {
                    sizes: herd_tile,
                    interchange: [1, 0, 2, 3, 4, 5, 6].into_iter().collect(),
                    style: LoopStyle::Sequential,
                    from: Some(TilingStage::L2),
                    to: TilingStage::PromoteHerd,
                },
            ) + promote::promotion_patterns(
                OpCode::Conv2d,
                TilingStage::PromoteHerd,
                TilingStage::Herd,
                Some(vec![0, 1, 2]),
            );
            apply(module, callee, &stage)?;

            apply(module, callee, &canonicalize::loop_patterns())?;

            let stage = subview::remove_subview_patterns(MemorySpace::L1)
                + subview::fold_subview_patterns();
            apply(module, callee, &stage)?;

            strip_stage_markers(module, callee);
            outline::inline_call(module, call)?;
        }
        Ok(())
    }

    /// Element-wise generic: a sequential macro tile, a parallel herd tile,
    /// promotion of every operand.
    fn run_generic(&self, module: &mut Module, func: FuncId) -> Result<()> {
        for op in collect(module, func, OpCode::Generic) {
            if module.op(op).is_erased() {
                continue;
            }
            let (call, callee) = outline::outline_op(module, op, "call_linalg_generic")?;

            let stage = tiling::tiling_patterns(
                OpCode::Generic,
                TileSpec {
                    sizes: [4 * TILE_EDGE, 4 * TILE_EDGE].into_iter().collect(),
                    interchange: SmallVec::new(),
                    style: LoopStyle::Sequential,
                    from: None,
                    to: TilingStage::L1,
                },
            ) + tiling::tiling_patterns(
                OpCode::Generic,
                TileSpec {
                    sizes: [TILE_EDGE, TILE_EDGE].into_iter().collect(),
                    interchange: SmallVec::new(),
                    style: LoopStyle::Parallel,
                    from: Some(TilingStage::L1),
                    to: TilingStage::Herd,
                },
            ) + promote::promotion_patterns(
                OpCode::Generic,
                TilingStage::Herd,
                TilingStage::Promoted,
                None,
            );
            apply(module, callee, &stage)?;

            apply(module, callee, &canonicalize::loop_patterns())?;

            let stage = subview::remove_subview_patterns(MemorySpace::L1)
                + subview::fold_subview_patterns();
            apply(module, callee, &stage)?;

            strip_stage_markers(module, callee);
            outline::inline_call(module, call)?;
        }
        Ok(())
    }
}

fn apply(module: &mut Module, func: FuncId, patterns: &PatternSet<()>) -> Result<usize> {
    let name = module.func(func).name.clone();
    apply_greedily(module, func, patterns, &mut ()).context(RewriteSnafu { func: name })
}

fn collect(module: &Module, func: FuncId, code: OpCode) -> Vec<OpId> {
    module
        .walk_func(func)
        .into_iter()
        .filter(|&op| module.op(op).kind.code() == code)
        .collect()
}

struct ConvShapes {
    filters: i64,
    channels: i64,
    height: i64,
    width: i64,
    kernel_h: i64,
    kernel_w: i64,
}

fn conv_shapes(module: &Module, op: OpId) -> Option<ConvShapes> {
    let operand = |i: usize| {
        let v = *module.op(op).operands.get(i)?;
        module.value_type(v).as_memref()?.static_shape()
    };
    let input = operand(0)?;
    let [_, channels, height, width] = input.as_slice() else {
        return None;
    };
    let weight = operand(1)?;
    let [filters, _, kernel_h, kernel_w] = weight.as_slice() else {
        return None;
    };
    Some(ConvShapes {
        filters: *filters,
        channels: *channels,
        height: *height,
        width: *width,
        kernel_h: *kernel_h,
        kernel_w: *kernel_w,
    })
}

fn strip_stage_markers(module: &mut Module, func: FuncId) {
    let mut stripped = 0usize;
    for op in module.walk_func(func) {
        if module.op_mut(op).attrs.clear_stage() {
            stripped += 1;
        }
    }
    if stripped > 0 {
        debug!(stripped, "cleared tiling stage markers");
    }
}
