//! Herd-launch lowering.
//!
//! A launch over an `x` by `y` tile grid becomes two nested counted loops
//! tagged `outer`/`inner`, with the body spliced into the innermost loop.
//! Launch-body arguments are substituted in place: tile ids become the loop
//! induction variables, size arguments become the launch size operands, and
//! kernel arguments become the kernel operands. A named launch additionally
//! emits a runtime herd-load in front of the nest.

use air_ir::prelude::*;
use tracing::{debug, trace};

pub(crate) fn herd_patterns() -> PatternSet<()> {
    let mut set = PatternSet::new();
    set.add(OpCode::HerdLaunch, "herd-launch-to-loops", |op, m, _| lower_herd_launch(m, op));
    set
}

fn lower_herd_launch(m: &mut Module, op: OpId) -> RewriteResult {
    let operands = m.op(op).operands.clone();
    let [size_x, size_y, kernel @ ..] = operands.as_slice() else {
        return RewriteResult::NoMatch;
    };
    let (size_x, size_y) = (*size_x, *size_y);

    // grid extents must be compile-time constants
    let (Some(x), Some(y)) = (m.const_index_value(size_x), m.const_index_value(size_y)) else {
        trace!("herd extents are not constant, leaving launch in place");
        return RewriteResult::NoMatch;
    };

    let Some(body) = m.op_entry_block(op) else {
        return RewriteResult::NoMatch;
    };
    let args = m.block(body).args.clone();
    if args.len() != operands.len() + 2 {
        trace!(args = args.len(), operands = operands.len(), "malformed launch body");
        return RewriteResult::NoMatch;
    }

    let herd_name = m.op(op).attrs.sym_name().map(str::to_string);

    let outer = {
        let Some(mut b) = OpBuilder::before(m, op) else {
            return RewriteResult::NoMatch;
        };
        if let Some(name) = herd_name {
            b.rt_herd_load(name);
        }
        b.for_loop(0, x, 1)
    };
    m.op_mut(outer.op).attrs.set_herd_loop(HerdLoopTag::Outer);

    let inner = {
        let mut b = OpBuilder::at_block_begin(m, outer.body);
        b.for_loop(0, y, 1)
    };
    m.op_mut(inner.op).attrs.set_herd_loop(HerdLoopTag::Inner);

    // tile ids -> induction variables, sizes -> size operands,
    // kernel args -> kernel operands
    m.replace_all_uses(args[0], outer.iv);
    m.replace_all_uses(args[1], inner.iv);
    m.replace_all_uses(args[2], size_x);
    m.replace_all_uses(args[3], size_y);
    for (&arg, &operand) in args[4..].iter().zip(kernel) {
        m.replace_all_uses(arg, operand);
    }

    m.splice_block_except_terminator(body, inner.body, 0);
    m.erase_op(op);
    debug!(x, y, "lowered herd launch to loop nest");
    RewriteResult::Rewritten
}
