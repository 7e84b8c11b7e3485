//! Outlining of compute operations into private functions.
//!
//! The tiling pipeline rewrites one compute operation at a time. To keep the
//! greedy driver from seeing half-tiled siblings, each operation is first
//! moved into a fresh function of its own, transformed there, and spliced
//! back over the call once its pipeline is done.

use air_ir::prelude::*;
use itertools::Itertools;
use snafu::{OptionExt, ensure};
use tracing::debug;

use crate::error::{
    CalleeIsDeclarationSnafu, DetachedOpSnafu, InlineArityMismatchSnafu, MissingCalleeSnafu,
    NotACallSnafu, Result,
};

/// Moves `op` into a new function and replaces it with a call.
///
/// The deduplicated operands of `op` become the parameters of the callee.
/// Returns the call operation together with the outlined function.
pub(crate) fn outline_op(m: &mut Module, op: OpId, hint: &str) -> Result<(OpId, FuncId)> {
    let op_name = m.op(op).kind.name();
    let block = m.parent_block(op).context(DetachedOpSnafu { op: op_name })?;
    let at = m.op_index_in_block(op).context(DetachedOpSnafu { op: op_name })?;

    let operands = m.op(op).operands.clone();
    let unique: Vec<ValueId> = operands.iter().copied().unique().collect();
    let params: Vec<Type> = unique.iter().map(|&v| m.value_type(v).clone()).collect();

    let name = unique_name(m, hint);
    let (callee, entry) = m.add_func(name.clone(), params, []);
    let args = m.block(entry).args.clone();

    let kind = m.op(op).kind.clone();
    let attrs = m.op(op).attrs.clone();
    let remapped: Vec<ValueId> = operands
        .iter()
        .map(|v| {
            unique
                .iter()
                .zip(&args)
                .find(|(u, _)| *u == v)
                .map(|(_, &arg)| arg)
                .unwrap_or(*v)
        })
        .collect();

    let cloned = {
        let mut b = OpBuilder::at_block_end(m, entry);
        let cloned = b.insert(kind, remapped, []);
        b.ret();
        cloned
    };
    m.op_mut(cloned).attrs = attrs;

    let call = {
        let mut b = OpBuilder::at(m, block, at);
        b.call(&name, unique.iter().copied(), [])
    };
    m.erase_op(op);

    debug!(callee = %name, op = op_name, "outlined compute operation");
    Ok((call, callee))
}

/// Splices the callee's body over `call` and removes the callee.
///
/// Callee parameters are substituted by the call arguments. Fails when the
/// callee is missing, is a declaration, or the argument count differs from
/// the parameter count.
pub(crate) fn inline_call(m: &mut Module, call: OpId) -> Result<()> {
    let name = match &m.op(call).kind {
        OpKind::Call { callee } => callee.clone(),
        other => return NotACallSnafu { op: other.name() }.fail(),
    };
    let func = m
        .lookup_func(&name)
        .context(MissingCalleeSnafu { name: name.clone() })?;
    let entry = m
        .entry_block(func)
        .context(CalleeIsDeclarationSnafu { name: name.clone() })?;

    let params = m.block(entry).args.clone();
    let args = m.op(call).operands.clone();
    ensure!(
        params.len() == args.len(),
        InlineArityMismatchSnafu {
            name: name.clone(),
            args: args.len(),
            params: params.len(),
        }
    );
    for (&param, &arg) in params.iter().zip(args.iter()) {
        m.replace_all_uses(param, arg);
    }

    let block = m.parent_block(call).context(DetachedOpSnafu { op: "func.call" })?;
    let at = m
        .op_index_in_block(call)
        .context(DetachedOpSnafu { op: "func.call" })?;
    m.splice_block_except_terminator(entry, block, at);
    m.erase_op(call);
    m.remove_func(func);

    debug!(callee = %name, "inlined outlined function");
    Ok(())
}

fn unique_name(m: &Module, hint: &str) -> String {
    if m.lookup_func(hint).is_none() {
        return hint.to_string();
    }
    let mut suffix = 0usize;
    loop {
        let candidate = format!("{hint}_{suffix}");
        if m.lookup_func(&candidate).is_none() {
            return candidate;
        }
        suffix += 1;
    }
}
