//! Positional operation builder.
//!
//! [`OpBuilder`] pins an insertion point inside a block and advances it as
//! operations are created, so a rewrite emits its replacement code in source
//! order without juggling indices.

use crate::module::{BlockId, Module, OpId, ValueId};
use crate::op::{OpKind, SubviewOffset};
use crate::types::{ElemType, MemRefType, MemorySpace, Type};

/// A freshly built counted loop.
pub struct ForLoop {
    pub op: OpId,
    pub body: BlockId,
    /// Induction variable (the body block argument).
    pub iv: ValueId,
}

/// A freshly built parallel loop.
pub struct ParallelLoop {
    pub op: OpId,
    pub body: BlockId,
    /// Per-dimension induction variables.
    pub ivs: Vec<ValueId>,
}

pub struct OpBuilder<'m> {
    module: &'m mut Module,
    block: BlockId,
    ip: usize,
}

impl<'m> OpBuilder<'m> {
    pub fn at(module: &'m mut Module, block: BlockId, ip: usize) -> Self {
        Self { module, block, ip }
    }

    pub fn at_block_begin(module: &'m mut Module, block: BlockId) -> Self {
        Self { module, block, ip: 0 }
    }

    pub fn at_block_end(module: &'m mut Module, block: BlockId) -> Self {
        let ip = module.block(block).ops.len();
        Self { module, block, ip }
    }

    /// Builder positioned immediately before `op`. `None` if the op is
    /// detached.
    pub fn before(module: &'m mut Module, op: OpId) -> Option<Self> {
        let block = module.parent_block(op)?;
        let ip = module.op_index_in_block(op)?;
        Some(Self { module, block, ip })
    }

    /// Builder positioned immediately after `op`. `None` if the op is
    /// detached.
    pub fn after(module: &'m mut Module, op: OpId) -> Option<Self> {
        let block = module.parent_block(op)?;
        let ip = module.op_index_in_block(op)? + 1;
        Some(Self { module, block, ip })
    }

    pub fn module(&self) -> &Module {
        self.module
    }

    /// Create an op at the insertion point and advance past it.
    pub fn insert(
        &mut self,
        kind: OpKind,
        operands: impl IntoIterator<Item = ValueId>,
        result_tys: impl IntoIterator<Item = Type>,
    ) -> OpId {
        let op = self.module.create_op(kind, operands, result_tys);
        self.module.insert_op(op, self.block, self.ip);
        self.ip += 1;
        op
    }

    // ===== arith =====

    pub fn const_index(&mut self, value: i64) -> ValueId {
        let op = self.insert(OpKind::ConstIndex(value), [], [Type::Index]);
        self.module.result(op, 0)
    }

    pub fn const_i32(&mut self, value: i32) -> ValueId {
        let op = self.insert(OpKind::ConstI32(value), [], [Type::I32]);
        self.module.result(op, 0)
    }

    pub fn add_index(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let op = self.insert(OpKind::AddIndex, [lhs, rhs], [Type::Index]);
        self.module.result(op, 0)
    }

    pub fn index_cast_i64(&mut self, value: ValueId) -> ValueId {
        let op = self.insert(OpKind::IndexCast, [value], [Type::I64]);
        self.module.result(op, 0)
    }

    // ===== structure =====

    pub fn for_loop(&mut self, lb: i64, ub: i64, step: i64) -> ForLoop {
        let op = self.insert(OpKind::For { lb, ub, step }, [], []);
        let region = self.module.add_region(op);
        let body = self.module.add_block(region, [Type::Index]);
        let iv = self.module.block(body).args[0];
        ForLoop { op, body, iv }
    }

    pub fn parallel(&mut self, lbs: &[i64], ubs: &[i64], steps: &[i64]) -> ParallelLoop {
        let rank = lbs.len();
        debug_assert!(ubs.len() == rank && steps.len() == rank);
        let op = self.insert(
            OpKind::Parallel {
                lbs: lbs.iter().copied().collect(),
                ubs: ubs.iter().copied().collect(),
                steps: steps.iter().copied().collect(),
            },
            [],
            [],
        );
        let region = self.module.add_region(op);
        let body = self.module.add_block(region, vec![Type::Index; rank]);
        let ivs = self.module.block(body).args.to_vec();
        ParallelLoop { op, body, ivs }
    }

    pub fn call(
        &mut self,
        callee: impl Into<String>,
        args: impl IntoIterator<Item = ValueId>,
        result_tys: impl IntoIterator<Item = Type>,
    ) -> OpId {
        self.insert(OpKind::Call { callee: callee.into() }, args, result_tys)
    }

    pub fn ret(&mut self) -> OpId {
        self.insert(OpKind::Return, [], [])
    }

    // ===== runtime =====

    pub fn rt_herd_load(&mut self, herd: impl Into<String>) -> ValueId {
        let op = self.insert(OpKind::RtHerdLoad { herd: herd.into() }, [], [Type::I32]);
        self.module.result(op, 0)
    }

    pub fn rt_alloc(&mut self, ty: MemRefType) -> ValueId {
        let op = self.insert(OpKind::RtAlloc, [], [Type::MemRef(ty)]);
        self.module.result(op, 0)
    }

    pub fn rt_dealloc(&mut self, buffer: ValueId) -> OpId {
        self.insert(OpKind::RtDealloc, [buffer], [])
    }

    // ===== memref =====

    pub fn alloc(&mut self, ty: MemRefType) -> ValueId {
        let op = self.insert(OpKind::Alloc, [], [Type::MemRef(ty)]);
        self.module.result(op, 0)
    }

    pub fn dealloc(&mut self, buffer: ValueId) -> OpId {
        self.insert(OpKind::Dealloc, [buffer], [])
    }

    pub fn cast(&mut self, source: ValueId, ty: MemRefType) -> ValueId {
        let op = self.insert(OpKind::Cast, [source], [Type::MemRef(ty)]);
        self.module.result(op, 0)
    }

    pub fn view(&mut self, source: ValueId, ty: MemRefType) -> ValueId {
        let op = self.insert(OpKind::View, [source], [Type::MemRef(ty)]);
        self.module.result(op, 0)
    }

    pub fn copy(&mut self, src: ValueId, dst: ValueId) -> OpId {
        self.insert(OpKind::Copy, [src, dst], [])
    }

    /// Strided sub-view. `dyn_offsets` supplies one value per `Dynamic`
    /// offset, in dimension order; the result type has `sizes` as its shape.
    pub fn subview(
        &mut self,
        source: ValueId,
        offsets: &[SubviewOffset],
        dyn_offsets: &[ValueId],
        sizes: &[i64],
        strides: &[i64],
        elem: ElemType,
        space: MemorySpace,
    ) -> ValueId {
        debug_assert_eq!(
            offsets.iter().filter(|o| matches!(o, SubviewOffset::Dynamic)).count(),
            dyn_offsets.len()
        );
        let mut operands = Vec::with_capacity(1 + dyn_offsets.len());
        operands.push(source);
        operands.extend_from_slice(dyn_offsets);
        let ty = MemRefType::new(sizes.iter().copied(), elem, space);
        let op = self.insert(
            OpKind::Subview {
                offsets: offsets.iter().copied().collect(),
                sizes: sizes.iter().copied().collect(),
                strides: strides.iter().copied().collect(),
            },
            operands,
            [Type::MemRef(ty)],
        );
        self.module.result(op, 0)
    }
}
