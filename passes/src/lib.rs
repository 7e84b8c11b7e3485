//! Compiler passes for the AIR tile accelerator.
//!
//! This crate implements the two code-generation passes that bridge the
//! structured dialect in `air_ir` and the runtime:
//!
//! # Module Organization
//!
//! - [`lowering`] - AIR dialect lowering (herd launches to tagged loop
//!   nests, DMA copies to emulation calls or runtime ops, intermediate-tier
//!   allocations to the runtime allocator)
//! - [`codegen`] - Tiling code generation (outline, staged tile/promote
//!   pipelines per compute class, sub-view cleanup, inline)
//! - [`options`] - Pass configuration, buildable in code or from the
//!   environment
//!
//! Both passes run function-by-function over an [`air_ir::Module`] and
//! report failures through this crate's [`Error`].

pub mod codegen;
pub mod error;
pub mod lowering;
pub mod options;

#[cfg(test)]
pub mod test;

// Re-export main types
pub use codegen::TilingCodegen;
pub use error::{Error, Result};
pub use lowering::AirLowering;
pub use options::{CodegenOptions, LoweringOptions};
