//! Operation kinds.
//!
//! [`OpKind`] defines every operation in the dialect, with variant payloads
//! for the static parts (loop bounds, callee names, sub-view geometry) and
//! operand/result conventions documented per variant. [`OpCode`] is the
//! payload-free discriminant used to index rewrite patterns.

use smallvec::SmallVec;

/// Dimensionality of a DMA transfer.
///
/// The runtime calling convention only has one-, two- and four-dimensional
/// transfers; a three-dimensional transfer cannot be written down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaDims {
    D1,
    D2,
    D4,
}

impl DmaDims {
    pub fn count(self) -> usize {
        match self {
            Self::D1 => 1,
            Self::D2 => 2,
            Self::D4 => 4,
        }
    }
}

/// One sub-view offset: a static constant, or a placeholder consuming the
/// next dynamic-offset operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubviewOffset {
    Static(i64),
    Dynamic,
}

/// Operation kind.
///
/// Operand and result conventions:
/// - `For`/`Parallel` bodies are single blocks whose arguments are the
///   induction variables; loop bodies carry no terminator.
/// - `HerdLaunch` takes `[size_x, size_y, kernel operands...]`; its body
///   block arguments are `[tile_x, tile_y, size_x, size_y, kernel args...]`
///   and the body ends in `HerdTerminator`.
/// - `DmaMemcpy` takes `[dst, src, dst offsets (highest dim first), src
///   offsets, length]` plus `[stride, elems_per_stride]` for 2-D and 4-D
///   transfers: 5, 9 or 13 operands.
/// - `Subview` takes the source buffer first; the k-th `Dynamic` offset
///   consumes operand `1 + k`. Sizes and strides are always static.
/// - Compute ops have no results; their outputs are the trailing operands.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    // ===== arith =====
    /// Index-typed constant. One result.
    ConstIndex(i64),
    /// 32-bit integer constant. One result.
    ConstI32(i32),
    /// Index addition. Two operands, one result.
    AddIndex,
    /// Widen an index value to i64. One operand, one result.
    IndexCast,

    // ===== structure =====
    /// Counted loop with static bounds.
    For { lb: i64, ub: i64, step: i64 },
    /// Multi-dimensional parallel loop with static bounds.
    Parallel {
        lbs: SmallVec<[i64; 4]>,
        ubs: SmallVec<[i64; 4]>,
        steps: SmallVec<[i64; 4]>,
    },
    /// Call of a module-level function by name.
    Call { callee: String },
    /// Function terminator.
    Return,

    // ===== air =====
    /// Launch of a compute herd over a 2-D tile grid.
    HerdLaunch,
    /// Terminator of a herd-launch body.
    HerdTerminator,
    /// DMA copy between memory tiers.
    DmaMemcpy { dims: DmaDims },

    // ===== runtime =====
    /// Load a named herd image onto the device. One i32 result.
    RtHerdLoad { herd: String },
    /// Runtime DMA operation. No results.
    RtDmaMemcpy { dims: DmaDims },
    /// Runtime allocation in the intermediate tier. One buffer result.
    RtAlloc,
    /// Runtime deallocation. One buffer operand.
    RtDealloc,

    // ===== memref =====
    /// Buffer allocation. One buffer result.
    Alloc,
    /// Buffer deallocation. One buffer operand.
    Dealloc,
    /// Space/shape-compatible recast of a buffer. One operand, one result.
    Cast,
    /// Reinterpret a flat byte buffer as a shaped buffer. One operand, one
    /// result.
    View,
    /// Strided sub-view of a buffer. One result.
    Subview {
        offsets: SmallVec<[SubviewOffset; 4]>,
        sizes: SmallVec<[i64; 4]>,
        strides: SmallVec<[i64; 4]>,
    },
    /// Buffer copy. Operands `[src, dst]`.
    Copy,

    // ===== compute =====
    /// Elementwise structured op: `num_inputs` input buffers followed by
    /// output buffers. Outputs are written but never read.
    Generic { num_inputs: u32 },
    /// Matrix multiply `[a, b, c]`, accumulating into `c`.
    Matmul,
    /// 2-D NCHW/FCHW convolution `[input, weight, output]`, accumulating
    /// into `output`.
    Conv2d,
}

/// Payload-free operation code for pattern dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    ConstIndex,
    ConstI32,
    AddIndex,
    IndexCast,
    For,
    Parallel,
    Call,
    Return,
    HerdLaunch,
    HerdTerminator,
    DmaMemcpy,
    RtHerdLoad,
    RtDmaMemcpy,
    RtAlloc,
    RtDealloc,
    Alloc,
    Dealloc,
    Cast,
    View,
    Subview,
    Copy,
    Generic,
    Matmul,
    Conv2d,
}

impl OpKind {
    pub fn code(&self) -> OpCode {
        match self {
            Self::ConstIndex(_) => OpCode::ConstIndex,
            Self::ConstI32(_) => OpCode::ConstI32,
            Self::AddIndex => OpCode::AddIndex,
            Self::IndexCast => OpCode::IndexCast,
            Self::For { .. } => OpCode::For,
            Self::Parallel { .. } => OpCode::Parallel,
            Self::Call { .. } => OpCode::Call,
            Self::Return => OpCode::Return,
            Self::HerdLaunch => OpCode::HerdLaunch,
            Self::HerdTerminator => OpCode::HerdTerminator,
            Self::DmaMemcpy { .. } => OpCode::DmaMemcpy,
            Self::RtHerdLoad { .. } => OpCode::RtHerdLoad,
            Self::RtDmaMemcpy { .. } => OpCode::RtDmaMemcpy,
            Self::RtAlloc => OpCode::RtAlloc,
            Self::RtDealloc => OpCode::RtDealloc,
            Self::Alloc => OpCode::Alloc,
            Self::Dealloc => OpCode::Dealloc,
            Self::Cast => OpCode::Cast,
            Self::View => OpCode::View,
            Self::Subview { .. } => OpCode::Subview,
            Self::Copy => OpCode::Copy,
            Self::Generic { .. } => OpCode::Generic,
            Self::Matmul => OpCode::Matmul,
            Self::Conv2d => OpCode::Conv2d,
        }
    }

    /// Dialect-qualified name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConstIndex(_) | Self::ConstI32(_) => "arith.constant",
            Self::AddIndex => "arith.addi",
            Self::IndexCast => "arith.index_cast",
            Self::For { .. } => "affine.for",
            Self::Parallel { .. } => "scf.parallel",
            Self::Call { .. } => "func.call",
            Self::Return => "func.return",
            Self::HerdLaunch => "air.herd_launch",
            Self::HerdTerminator => "air.herd_terminator",
            Self::DmaMemcpy { dims } => match dims {
                DmaDims::D1 => "air.dma_memcpy",
                DmaDims::D2 => "air.dma_memcpy_2d",
                DmaDims::D4 => "air.dma_memcpy_4d",
            },
            Self::RtHerdLoad { .. } => "airrt.herd_load",
            Self::RtDmaMemcpy { dims } => match dims {
                DmaDims::D1 => "airrt.dma_memcpy",
                DmaDims::D2 => "airrt.dma_memcpy_2d",
                DmaDims::D4 => "airrt.dma_memcpy_4d",
            },
            Self::RtAlloc => "airrt.alloc",
            Self::RtDealloc => "airrt.dealloc",
            Self::Alloc => "memref.alloc",
            Self::Dealloc => "memref.dealloc",
            Self::Cast => "memref.cast",
            Self::View => "memref.view",
            Self::Subview { .. } => "memref.subview",
            Self::Copy => "memref.copy",
            Self::Generic { .. } => "linalg.generic",
            Self::Matmul => "linalg.matmul",
            Self::Conv2d => "linalg.conv_2d_nchw_fchw",
        }
    }

    /// True for ops that may be erased once all their results are unused.
    ///
    /// Deallocations, copies, calls and runtime ops have effects beyond
    /// their results and are never in this set.
    pub fn is_erasable_when_unused(&self) -> bool {
        matches!(
            self,
            Self::ConstIndex(_)
                | Self::ConstI32(_)
                | Self::AddIndex
                | Self::IndexCast
                | Self::Cast
                | Self::View
                | Self::Subview { .. }
                | Self::Alloc
                | Self::RtAlloc
        )
    }

    pub fn is_compute(&self) -> bool {
        matches!(self, Self::Generic { .. } | Self::Matmul | Self::Conv2d)
    }

    /// Number of input (read-only) operands of a compute op.
    pub fn compute_inputs(&self) -> Option<usize> {
        match self {
            Self::Generic { num_inputs } => Some(*num_inputs as usize),
            Self::Matmul | Self::Conv2d => Some(2),
            _ => None,
        }
    }

    /// True if the op reads its output buffers before writing them.
    pub fn reads_output(&self) -> bool {
        matches!(self, Self::Matmul | Self::Conv2d)
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Return | Self::HerdTerminator)
    }
}
