//! AIR dialect lowering.
//!
//! Converts herd launches into tagged loop nests and DMA copies into either
//! CPU-emulation library calls or hardware runtime operations, depending on
//! the configured target. Intermediate-tier allocations move to the runtime
//! allocator on the hardware path. The conversion is partial: patterns may
//! decline individual ops, but any dialect op still present once rewriting
//! settles fails the pass.

mod alloc;
mod dma;
mod herd;

use air_ir::prelude::*;
use snafu::ResultExt;
use tracing::debug;

use crate::error::{Result, RewriteSnafu};
use crate::options::LoweringOptions;

pub(crate) use dma::resolve_tile_coords;

/// The AIR lowering pass.
#[derive(Debug, Clone, Default)]
pub struct AirLowering {
    options: LoweringOptions,
}

impl AirLowering {
    pub fn new(options: LoweringOptions) -> Self {
        Self { options }
    }

    /// Run the conversion over every function body in the module.
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
        debug!(func = %name, lower_to_cpu = self.options.lower_to_cpu, "running AIR lowering");

        let mut patterns = herd::herd_patterns();
        if self.options.lower_to_cpu {
            patterns = patterns + dma::cpu_patterns();
        } else {
            patterns = patterns + dma::runtime_patterns() + alloc::alloc_patterns();
        }

        let rewrites = apply_partial_conversion(module, func, &patterns, &mut (), is_legal)
            .context(RewriteSnafu { func: name })?;
        debug!(rewrites, "AIR lowering settled");
        Ok(())
    }
}

/// Conversion target: dialect ops must be gone, and alloc/dealloc must not
/// touch the intermediate tier on either path.
fn is_legal(module: &Module, op: OpId) -> bool {
    match &module.op(op).kind {
        OpKind::HerdLaunch | OpKind::HerdTerminator | OpKind::DmaMemcpy { .. } => false,
        OpKind::Alloc => {
            let space = module.op(op).results.first().and_then(|&r| module.value_type(r).space());
            space != Some(MemorySpace::L2)
        }
        OpKind::Dealloc => {
            let space = module.op(op).operands.first().and_then(|&v| module.value_type(v).space());
            space != Some(MemorySpace::L2)
        }
        _ => true,
    }
}
