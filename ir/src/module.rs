//! Arena-backed module.
//!
//! Functions, regions, blocks, operations and values all live in flat
//! arenas owned by [`Module`] and are addressed through copyable index
//! handles. Erasing keeps the slot as a tombstone so outstanding handles
//! stay valid; replacing a value rewires use edges in place. Structural
//! mutation never invalidates ids, which is what lets rewrite drivers walk
//! a snapshot while patterns edit the graph underneath.

use smallvec::SmallVec;
use snafu::ensure;

use crate::attr::AttrSet;
use crate::error::{
    DominanceViolationSnafu, ErasedAttachedSnafu, MisplacedTerminatorSnafu, Result,
    StaleOperandSnafu,
};
use crate::op::OpKind;
use crate::types::Type;

// ============================================================================
// HANDLES
// ============================================================================

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $name {
            pub(crate) fn new(index: usize) -> Self {
                Self(index as u32)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.0)
            }
        }
    };
}

arena_id!(
    /// Handle to an operation.
    OpId
);
arena_id!(
    /// Handle to an SSA value (op result or block argument).
    ValueId
);
arena_id!(
    /// Handle to a block.
    BlockId
);
arena_id!(
    /// Handle to a region.
    RegionId
);
arena_id!(
    /// Handle to a function.
    FuncId
);

// ============================================================================
// NODE DATA
// ============================================================================

/// Where a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueDef {
    OpResult { op: OpId, index: u32 },
    BlockArg { block: BlockId, index: u32 },
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: Type,
    pub def: ValueDef,
}

#[derive(Debug, Clone)]
pub struct OpData {
    pub kind: OpKind,
    pub operands: SmallVec<[ValueId; 4]>,
    pub results: SmallVec<[ValueId; 2]>,
    pub attrs: AttrSet,
    pub regions: SmallVec<[RegionId; 1]>,
    pub(crate) parent: Option<BlockId>,
    pub(crate) erased: bool,
}

impl OpData {
    pub fn is_erased(&self) -> bool {
        self.erased
    }
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub(crate) region: RegionId,
    pub args: SmallVec<[ValueId; 4]>,
    pub ops: Vec<OpId>,
}

/// What a region hangs off of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOwner {
    Op(OpId),
    Func(FuncId),
}

#[derive(Debug, Clone)]
pub struct RegionData {
    pub(crate) owner: RegionOwner,
    pub blocks: SmallVec<[BlockId; 1]>,
}

#[derive(Debug, Clone)]
pub struct FuncData {
    pub name: String,
    pub params: SmallVec<[Type; 4]>,
    pub results: SmallVec<[Type; 1]>,
    pub(crate) body: Option<RegionId>,
    pub(crate) removed: bool,
}

impl FuncData {
    /// True for external declarations without a body.
    pub fn is_declaration(&self) -> bool {
        self.body.is_none()
    }
}

// ============================================================================
// MODULE
// ============================================================================

/// Top-level IR container.
#[derive(Debug, Clone, Default)]
pub struct Module {
    ops: Vec<OpData>,
    values: Vec<ValueData>,
    blocks: Vec<BlockData>,
    regions: Vec<RegionData>,
    funcs: Vec<FuncData>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== accessors =====

    pub fn op(&self, op: OpId) -> &OpData {
        &self.ops[op.index()]
    }

    pub fn op_mut(&mut self, op: OpId) -> &mut OpData {
        &mut self.ops[op.index()]
    }

    pub fn value(&self, value: ValueId) -> &ValueData {
        &self.values[value.index()]
    }

    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.values[value.index()].ty
    }

    pub fn block(&self, block: BlockId) -> &BlockData {
        &self.blocks[block.index()]
    }

    pub fn region(&self, region: RegionId) -> &RegionData {
        &self.regions[region.index()]
    }

    pub fn func(&self, func: FuncId) -> &FuncData {
        &self.funcs[func.index()]
    }

    /// The `index`-th result of `op`. The index must be in range.
    pub fn result(&self, op: OpId, index: usize) -> ValueId {
        self.ops[op.index()].results[index]
    }

    /// Defining operation of a value, `None` for block arguments and for
    /// results of erased operations.
    pub fn defining_op(&self, value: ValueId) -> Option<OpId> {
        match self.values[value.index()].def {
            ValueDef::OpResult { op, .. } => (!self.ops[op.index()].erased).then_some(op),
            ValueDef::BlockArg { .. } => None,
        }
    }

    /// Constant behind an index-typed value, if its definition is a live
    /// index constant.
    pub fn const_index_value(&self, value: ValueId) -> Option<i64> {
        let op = self.defining_op(value)?;
        match &self.ops[op.index()].kind {
            OpKind::ConstIndex(c) => Some(*c),
            _ => None,
        }
    }

    // ===== functions =====

    /// Create a function with a body whose entry-block arguments mirror the
    /// parameters. Returns the function and its entry block.
    pub fn add_func(
        &mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Type>,
        results: impl IntoIterator<Item = Type>,
    ) -> (FuncId, BlockId) {
        let params: SmallVec<[Type; 4]> = params.into_iter().collect();
        let func = FuncId::new(self.funcs.len());
        self.funcs.push(FuncData {
            name: name.into(),
            params: params.clone(),
            results: results.into_iter().collect(),
            body: None,
            removed: false,
        });
        let region = RegionId::new(self.regions.len());
        self.regions.push(RegionData { owner: RegionOwner::Func(func), blocks: SmallVec::new() });
        let block = self.add_block(region, params);
        self.funcs[func.index()].body = Some(region);
        (func, block)
    }

    /// Declare an external function without a body.
    pub fn declare_func(
        &mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Type>,
        results: impl IntoIterator<Item = Type>,
    ) -> FuncId {
        let func = FuncId::new(self.funcs.len());
        self.funcs.push(FuncData {
            name: name.into(),
            params: params.into_iter().collect(),
            results: results.into_iter().collect(),
            body: None,
            removed: false,
        });
        func
    }

    pub fn lookup_func(&self, name: &str) -> Option<FuncId> {
        self.funcs
            .iter()
            .position(|f| !f.removed && f.name == name)
            .map(FuncId::new)
    }

    /// Live functions in creation order.
    pub fn funcs(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.funcs
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.removed)
            .map(|(i, _)| FuncId::new(i))
    }

    pub fn entry_block(&self, func: FuncId) -> Option<BlockId> {
        let region = self.funcs[func.index()].body?;
        self.regions[region.index()].blocks.first().copied()
    }

    /// Tombstone a function, erasing whatever is left of its body.
    pub fn remove_func(&mut self, func: FuncId) {
        if let Some(region) = self.funcs[func.index()].body {
            let blocks = self.regions[region.index()].blocks.clone();
            for block in blocks {
                let ops = std::mem::take(&mut self.blocks[block.index()].ops);
                for op in ops {
                    self.erase_subtree(op);
                }
            }
        }
        self.funcs[func.index()].removed = true;
    }

    // ===== structure =====

    /// Create a region attached to `op`.
    pub fn add_region(&mut self, op: OpId) -> RegionId {
        let id = RegionId::new(self.regions.len());
        self.regions.push(RegionData { owner: RegionOwner::Op(op), blocks: SmallVec::new() });
        self.ops[op.index()].regions.push(id);
        id
    }

    pub fn add_block(
        &mut self,
        region: RegionId,
        arg_tys: impl IntoIterator<Item = Type>,
    ) -> BlockId {
        let id = BlockId::new(self.blocks.len());
        self.blocks.push(BlockData { region, args: SmallVec::new(), ops: Vec::new() });
        self.regions[region.index()].blocks.push(id);
        for (i, ty) in arg_tys.into_iter().enumerate() {
            let v = ValueId::new(self.values.len());
            self.values
                .push(ValueData { ty, def: ValueDef::BlockArg { block: id, index: i as u32 } });
            self.blocks[id.index()].args.push(v);
        }
        id
    }

    /// Entry block of the op's first region.
    pub fn op_entry_block(&self, op: OpId) -> Option<BlockId> {
        let region = *self.ops[op.index()].regions.first()?;
        self.regions[region.index()].blocks.first().copied()
    }

    // ===== operations =====

    /// Create a detached operation and its result values.
    pub fn create_op(
        &mut self,
        kind: OpKind,
        operands: impl IntoIterator<Item = ValueId>,
        result_tys: impl IntoIterator<Item = Type>,
    ) -> OpId {
        let id = OpId::new(self.ops.len());
        let mut results = SmallVec::new();
        for (i, ty) in result_tys.into_iter().enumerate() {
            let v = ValueId::new(self.values.len());
            self.values
                .push(ValueData { ty, def: ValueDef::OpResult { op: id, index: i as u32 } });
            results.push(v);
        }
        self.ops.push(OpData {
            kind,
            operands: operands.into_iter().collect(),
            results,
            attrs: AttrSet::new(),
            regions: SmallVec::new(),
            parent: None,
            erased: false,
        });
        id
    }

    /// Insert a detached op into `block` at `index`.
    pub fn insert_op(&mut self, op: OpId, block: BlockId, index: usize) {
        debug_assert!(self.ops[op.index()].parent.is_none());
        self.blocks[block.index()].ops.insert(index, op);
        self.ops[op.index()].parent = Some(block);
    }

    pub fn push_op(&mut self, op: OpId, block: BlockId) {
        let at = self.blocks[block.index()].ops.len();
        self.insert_op(op, block, at);
    }

    pub fn parent_block(&self, op: OpId) -> Option<BlockId> {
        self.ops[op.index()].parent
    }

    /// Position of `op` in its parent block.
    pub fn op_index_in_block(&self, op: OpId) -> Option<usize> {
        let block = self.ops[op.index()].parent?;
        self.blocks[block.index()].ops.iter().position(|&o| o == op)
    }

    /// Operation owning the block that contains `op`.
    pub fn parent_op(&self, op: OpId) -> Option<OpId> {
        let block = self.ops[op.index()].parent?;
        match self.regions[self.blocks[block.index()].region.index()].owner {
            RegionOwner::Op(owner) => Some(owner),
            RegionOwner::Func(_) => None,
        }
    }

    /// Function whose body transitively contains `op`.
    pub fn parent_func(&self, op: OpId) -> Option<FuncId> {
        let mut cur = op;
        loop {
            let block = self.ops[cur.index()].parent?;
            match self.regions[self.blocks[block.index()].region.index()].owner {
                RegionOwner::Op(owner) => cur = owner,
                RegionOwner::Func(func) => return Some(func),
            }
        }
    }

    // ===== uses =====

    /// All `(user, operand index)` pairs reading `value` across live ops.
    pub fn uses(&self, value: ValueId) -> Vec<(OpId, usize)> {
        let mut out = Vec::new();
        for (i, op) in self.ops.iter().enumerate() {
            if op.erased {
                continue;
            }
            for (j, &operand) in op.operands.iter().enumerate() {
                if operand == value {
                    out.push((OpId::new(i), j));
                }
            }
        }
        out
    }

    pub fn has_uses(&self, value: ValueId) -> bool {
        self.ops
            .iter()
            .any(|op| !op.erased && op.operands.contains(&value))
    }

    pub fn use_count(&self, value: ValueId) -> usize {
        self.uses(value).len()
    }

    /// Redirect every use edge of `from` to `to`. Returns the edge count.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) -> usize {
        if from == to {
            return 0;
        }
        let mut n = 0;
        for op in self.ops.iter_mut() {
            if op.erased {
                continue;
            }
            for operand in op.operands.iter_mut() {
                if *operand == from {
                    *operand = to;
                    n += 1;
                }
            }
        }
        n
    }

    // ===== erase / move =====

    /// Tombstone `op` and everything nested in its regions. Operand lists
    /// of erased ops are cleared so use scans no longer see them.
    pub fn erase_op(&mut self, op: OpId) {
        if let Some(block) = self.ops[op.index()].parent
            && let Some(pos) = self.blocks[block.index()].ops.iter().position(|&o| o == op)
        {
            self.blocks[block.index()].ops.remove(pos);
        }
        self.erase_subtree(op);
    }

    fn erase_subtree(&mut self, op: OpId) {
        let regions = self.ops[op.index()].regions.clone();
        for region in regions {
            let blocks = self.regions[region.index()].blocks.clone();
            for block in blocks {
                let ops = std::mem::take(&mut self.blocks[block.index()].ops);
                for nested in ops {
                    self.erase_subtree(nested);
                }
            }
        }
        let data = &mut self.ops[op.index()];
        data.erased = true;
        data.parent = None;
        data.operands.clear();
    }

    /// Detach `op` from its current block and insert it into `block` at
    /// `index`. Nested regions move with it.
    pub fn move_op(&mut self, op: OpId, block: BlockId, index: usize) {
        if let Some(old) = self.ops[op.index()].parent
            && let Some(pos) = self.blocks[old.index()].ops.iter().position(|&o| o == op)
        {
            self.blocks[old.index()].ops.remove(pos);
        }
        self.blocks[block.index()].ops.insert(index, op);
        self.ops[op.index()].parent = Some(block);
    }

    /// Move every non-terminator op of `src` into `dst` starting at `at`,
    /// preserving order.
    pub fn splice_block_except_terminator(&mut self, src: BlockId, dst: BlockId, at: usize) {
        let moved: Vec<OpId> = self.blocks[src.index()]
            .ops
            .iter()
            .copied()
            .filter(|&op| !self.ops[op.index()].kind.is_terminator())
            .collect();
        for (i, op) in moved.into_iter().enumerate() {
            self.move_op(op, dst, at + i);
        }
    }

    // ===== walking =====

    /// Pre-order walk of all live ops in a function body.
    pub fn walk_func(&self, func: FuncId) -> Vec<OpId> {
        let mut out = Vec::new();
        if let Some(region) = self.funcs[func.index()].body {
            self.walk_region(region, &mut out);
        }
        out
    }

    pub fn walk_region(&self, region: RegionId, out: &mut Vec<OpId>) {
        for &block in &self.regions[region.index()].blocks {
            for &op in &self.blocks[block.index()].ops {
                out.push(op);
                for &nested in &self.ops[op.index()].regions {
                    self.walk_region(nested, out);
                }
            }
        }
    }

    // ===== verification =====

    /// Structural check over every live function.
    pub fn verify(&self) -> Result<()> {
        for func in self.funcs().collect::<Vec<_>>() {
            self.verify_func(func)?;
        }
        Ok(())
    }

    /// Check SSA dominance, operand liveness and terminator placement in
    /// one function body.
    pub fn verify_func(&self, func: FuncId) -> Result<()> {
        let Some(body) = self.funcs[func.index()].body else {
            return Ok(());
        };
        let mut defined = vec![false; self.values.len()];
        for &block in &self.regions[body.index()].blocks {
            self.verify_block(block, &mut defined)?;
        }
        Ok(())
    }

    fn verify_block(&self, block: BlockId, defined: &mut Vec<bool>) -> Result<()> {
        let args = self.blocks[block.index()].args.clone();
        let mut scope: Vec<ValueId> = args.to_vec();
        for &arg in &args {
            defined[arg.index()] = true;
        }

        let ops = self.blocks[block.index()].ops.clone();
        let last = ops.len().checked_sub(1);
        for (i, &op) in ops.iter().enumerate() {
            let data = &self.ops[op.index()];
            ensure!(!data.erased, ErasedAttachedSnafu { op: data.kind.name() });
            for &operand in &data.operands {
                if let ValueDef::OpResult { op: def, .. } = self.values[operand.index()].def {
                    ensure!(
                        !self.ops[def.index()].erased,
                        StaleOperandSnafu { op: data.kind.name() }
                    );
                }
                ensure!(
                    defined[operand.index()],
                    DominanceViolationSnafu { op: data.kind.name() }
                );
            }
            if data.kind.is_terminator() {
                ensure!(Some(i) == last, MisplacedTerminatorSnafu { op: data.kind.name() });
            }
            for &result in &data.results {
                defined[result.index()] = true;
                scope.push(result);
            }
            for &region in &self.ops[op.index()].regions.clone() {
                for &nested in &self.regions[region.index()].blocks.clone() {
                    self.verify_block(nested, defined)?;
                }
            }
        }

        // definitions do not escape their block
        for v in scope {
            defined[v.index()] = false;
        }
        Ok(())
    }
}
