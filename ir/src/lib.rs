//! Intermediate representation for the AIR compilation passes.
//!
//! This crate defines the arena-backed module structure, the operation set
//! of the dialect, and the pattern-rewrite infrastructure the passes are
//! built on.
//!
//! # Module Organization
//!
//! - [`types`] - Value and buffer types, memory-space tags
//! - [`attr`] - Typed operation attributes (DMA ids, loop tags, tiling stages)
//! - [`op`] - Operation kinds and their operand conventions
//! - [`module`] - Arena-backed module, blocks, values and structural mutation
//! - [`builder`] - Positional operation builder
//! - [`walk`] - Ancestor walks and dominance queries
//! - [`pattern`] - Rewrite patterns, greedy and conversion drivers
//! - [`error`] - Error types and result handling

// Module declarations
pub mod attr;
pub mod builder;
pub mod error;
pub mod module;
pub mod op;
pub mod pattern;
pub mod prelude;
pub mod types;
pub mod walk;

// All core types remain accessible at the crate root
pub use attr::{Attr, AttrSet, HerdLoopTag, TilingStage};
pub use builder::{ForLoop, OpBuilder, ParallelLoop};
pub use error::{Error, Result};
pub use module::{BlockId, FuncId, Module, OpData, OpId, RegionId, ValueDef, ValueId};
pub use op::{DmaDims, OpCode, OpKind, SubviewOffset};
pub use types::{Dim, ElemType, MemRefType, MemorySpace, Type};

// Re-export the rewrite infrastructure
pub use pattern::{
    PatternSet, RewriteResult, apply_greedily, apply_partial_conversion, erase_trivially_dead,
};
pub use walk::{ancestors, find_ancestor, properly_dominates, value_dominates};
