//! Common imports for working with the IR.
//!
//! This module provides a convenient way to import the most commonly used
//! types when building or rewriting modules:
//!
//! ```rust,ignore
//! use air_ir::prelude::*;
//! ```

// Arena and handles
pub use crate::module::{
    BlockId, FuncId, Module, OpData, OpId, RegionId, RegionOwner, ValueDef, ValueId,
};

// Operations and attributes
pub use crate::attr::{Attr, AttrSet, HerdLoopTag, TilingStage};
pub use crate::op::{DmaDims, OpCode, OpKind, SubviewOffset};

// Types
pub use crate::types::{Dim, ElemType, MemRefType, MemorySpace, Type};

// Building and rewriting
pub use crate::builder::{ForLoop, OpBuilder, ParallelLoop};
pub use crate::pattern::{
    PatternSet, RewriteResult, apply_greedily, apply_partial_conversion, erase_trivially_dead,
};
pub use crate::walk::{ancestors, find_ancestor, properly_dominates, value_dominates};

// Errors
pub use crate::error::{Error, Result};
