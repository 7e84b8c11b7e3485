//! Tests for DMA lowering on both targets.

use air_ir::prelude::*;
use test_case::test_case;

use crate::error::Error;
use crate::lowering::{AirLowering, resolve_tile_coords};
use crate::options::LoweringOptions;
use crate::test::helpers;

fn cpu_lowering() -> AirLowering {
    AirLowering::new(LoweringOptions::builder().lower_to_cpu(true).build())
}

fn hw_lowering() -> AirLowering {
    AirLowering::new(LoweringOptions::default())
}

// ============================================================================
// CPU TARGET
// ============================================================================

#[test]
fn emulation_call_leads_with_id_and_coords() {
    let (mut m, func) = helpers::herd_launch_module(2, 2, None);
    cpu_lowering().run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::DmaMemcpy), 0);
    let calls = helpers::find_ops(&m, OpCode::Call);
    assert_eq!(calls.len(), 1);
    let OpKind::Call { callee } = &m.op(calls[0]).kind else {
        panic!("not a call");
    };
    assert_eq!(callee, "air_memcpy");

    // (id, x, y) prefix plus the five original operands
    let args = m.op(calls[0]).operands.clone();
    assert_eq!(args.len(), 8);
    let id = m.defining_op(args[0]).unwrap();
    assert_eq!(m.op(id).kind, OpKind::ConstI32(5));

    let loops = helpers::find_ops(&m, OpCode::For);
    let outer_iv = loops
        .iter()
        .copied()
        .find(|&l| m.op(l).attrs.herd_loop() == Some(HerdLoopTag::Outer))
        .and_then(|l| m.op_entry_block(l))
        .map(|b| m.block(b).args[0])
        .unwrap();
    let inner_iv = loops
        .iter()
        .copied()
        .find(|&l| m.op(l).attrs.herd_loop() == Some(HerdLoopTag::Inner))
        .and_then(|l| m.op_entry_block(l))
        .map(|b| m.block(b).args[0])
        .unwrap();
    assert_eq!(args[1], outer_iv);
    assert_eq!(args[2], inner_iv);
    // the source offset was the tile's x coordinate in the launch body
    assert_eq!(args[6], outer_iv);

    // the emulation routine is declared, not defined
    let decl = m.lookup_func("air_memcpy").unwrap();
    assert!(m.func(decl).is_declaration());
    assert!(m.verify_func(func).is_ok());
}

#[test]
fn emulation_declaration_is_shared() {
    let (mut m, _) = helpers::herd_launch_module(2, 2, None);
    let dma = helpers::find_ops(&m, OpCode::DmaMemcpy)[0];
    let kind = m.op(dma).kind.clone();
    let operands = m.op(dma).operands.clone();
    {
        let mut b = OpBuilder::before(&mut m, dma).unwrap();
        b.insert(kind, operands, []);
    }

    cpu_lowering().run(&mut m).unwrap();
    assert_eq!(helpers::count_ops(&m, OpCode::Call), 2);
    let decls = m.funcs().filter(|&f| m.func(f).name == "air_memcpy").count();
    assert_eq!(decls, 1);
}

#[test]
fn call_lowering_handles_lowered_nests() {
    // coordinate recovery from tagged loops instead of a launch body
    let (mut m, _) = helpers::dma_between(DmaDims::D2, MemorySpace::L3, MemorySpace::L1);
    cpu_lowering().run(&mut m).unwrap();

    let calls = helpers::find_ops(&m, OpCode::Call);
    assert_eq!(calls.len(), 1);
    let OpKind::Call { callee } = &m.op(calls[0]).kind else {
        panic!("not a call");
    };
    assert_eq!(callee, "air_memcpy2d");
    assert_eq!(m.op(calls[0]).operands.len(), 3 + 9);
}

// ============================================================================
// HARDWARE TARGET
// ============================================================================

#[test_case(DmaDims::D1, MemorySpace::L3, MemorySpace::L1, 6; "d1_into_tile")]
#[test_case(DmaDims::D1, MemorySpace::L1, MemorySpace::L3, 6; "d1_out_of_tile")]
#[test_case(DmaDims::D2, MemorySpace::L2, MemorySpace::L1, 9; "d2_into_tile")]
#[test_case(DmaDims::D2, MemorySpace::L1, MemorySpace::L2, 9; "d2_out_of_tile")]
#[test_case(DmaDims::D4, MemorySpace::L3, MemorySpace::L1, 11; "d4_into_tile")]
#[test_case(DmaDims::D4, MemorySpace::L1, MemorySpace::L3, 11; "d4_out_of_tile")]
fn runtime_op_drops_tile_side(dims: DmaDims, src: MemorySpace, dst: MemorySpace, expect: usize) {
    let (mut m, func) = helpers::dma_between(dims, src, dst);
    hw_lowering().run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::DmaMemcpy), 0);
    let ops = helpers::find_ops(&m, OpCode::RtDmaMemcpy);
    assert_eq!(ops.len(), 1);
    assert_eq!(m.op(ops[0]).operands.len(), expect);
    assert!(m.verify_func(func).is_ok());
}

#[test]
fn runtime_op_keeps_remote_buffer_only() {
    let (mut m, _) = helpers::dma_between(DmaDims::D1, MemorySpace::L3, MemorySpace::L1);
    hw_lowering().run(&mut m).unwrap();

    let rt = helpers::find_ops(&m, OpCode::RtDmaMemcpy)[0];
    let buffers = m
        .op(rt)
        .operands
        .iter()
        .filter(|&&v| m.value_type(v).as_memref().is_some())
        .count();
    assert_eq!(buffers, 1);
    let remote = m
        .op(rt)
        .operands
        .iter()
        .copied()
        .find(|&v| m.value_type(v).as_memref().is_some())
        .unwrap();
    assert_eq!(m.value_type(remote).space(), Some(MemorySpace::L3));
}

#[test]
fn runtime_op_widens_indices() {
    let (mut m, _) = helpers::dma_between(DmaDims::D2, MemorySpace::L1, MemorySpace::L3);
    hw_lowering().run(&mut m).unwrap();

    let rt = helpers::find_ops(&m, OpCode::RtDmaMemcpy)[0];
    for &operand in &m.op(rt).operands {
        assert!(!m.value_type(operand).is_index());
    }
    assert!(helpers::count_ops(&m, OpCode::IndexCast) > 0);
}

/// Like [`helpers::dma_between`], but with distinguishable offsets: the
/// destination offset is 7, the source offset 9.
fn tagged_dma_with_offsets(src: MemorySpace, dst: MemorySpace) -> (Module, FuncId) {
    let mut m = Module::new();
    let (func, entry) = m.add_func(
        "copier",
        [
            Type::memref([8], ElemType::I32, dst),
            Type::memref([8], ElemType::I32, src),
        ],
        [],
    );
    let params = m.block(entry).args.clone();

    let outer = {
        let mut b = OpBuilder::at_block_end(&mut m, entry);
        let outer = b.for_loop(0, 2, 1);
        b.ret();
        outer
    };
    m.op_mut(outer.op).attrs.set_herd_loop(HerdLoopTag::Outer);
    let inner = {
        let mut b = OpBuilder::at_block_begin(&mut m, outer.body);
        b.for_loop(0, 2, 1)
    };
    m.op_mut(inner.op).attrs.set_herd_loop(HerdLoopTag::Inner);

    {
        let mut b = OpBuilder::at_block_begin(&mut m, inner.body);
        let dst_off = b.const_index(7);
        let src_off = b.const_index(9);
        let len = b.const_index(8);
        b.insert(
            OpKind::DmaMemcpy { dims: DmaDims::D1 },
            [params[0], params[1], dst_off, src_off, len],
            [],
        );
    }
    (m, func)
}

/// Constant behind a value, looking through the i64 widening cast.
fn traced_const(m: &Module, v: ValueId) -> Option<i64> {
    let op = m.defining_op(v)?;
    match m.op(op).kind {
        OpKind::IndexCast => traced_const(m, m.op(op).operands[0]),
        OpKind::ConstIndex(c) => Some(c),
        _ => None,
    }
}

#[test_case(MemorySpace::L3, MemorySpace::L1, 9; "into_tile_keeps_source_offset")]
#[test_case(MemorySpace::L1, MemorySpace::L3, 7; "out_of_tile_keeps_destination_offset")]
fn runtime_op_keeps_remote_offsets(src: MemorySpace, dst: MemorySpace, kept: i64) {
    let (mut m, func) = tagged_dma_with_offsets(src, dst);
    hw_lowering().run(&mut m).unwrap();

    let rt = helpers::find_ops(&m, OpCode::RtDmaMemcpy)[0];
    let operands = m.op(rt).operands.clone();
    assert_eq!(operands.len(), 6);
    // [id, x, y, remote buffer, remote offset, length]
    assert!(m.value_type(operands[3]).as_memref().is_some());
    assert_eq!(traced_const(&m, operands[4]), Some(kept));
    assert_eq!(traced_const(&m, operands[5]), Some(8));

    let dropped = if kept == 9 { 7 } else { 9 };
    assert!(operands.iter().all(|&v| traced_const(&m, v) != Some(dropped)));
    assert!(m.verify_func(func).is_ok());
}

#[test]
fn transfers_between_remote_tiers_fail() {
    let (mut m, _) = helpers::dma_between(DmaDims::D1, MemorySpace::L3, MemorySpace::L3);
    let err = hw_lowering().run(&mut m).unwrap_err();
    assert!(matches!(
        err,
        Error::Rewrite { source: air_ir::Error::ConversionIncomplete { .. }, .. }
    ));
}

#[test]
fn hardware_lowering_is_idempotent() {
    let (mut m, _) = helpers::dma_between(DmaDims::D1, MemorySpace::L3, MemorySpace::L1);
    let pass = hw_lowering();
    pass.run(&mut m).unwrap();
    let before = helpers::count_ops(&m, OpCode::RtDmaMemcpy);
    pass.run(&mut m).unwrap();
    assert_eq!(helpers::count_ops(&m, OpCode::RtDmaMemcpy), before);
}

// ============================================================================
// COORDINATE RECOVERY
// ============================================================================

#[test]
fn coords_resolve_from_tagged_nest() {
    let (m, _) = helpers::dma_between(DmaDims::D1, MemorySpace::L3, MemorySpace::L1);
    let dma = helpers::find_ops(&m, OpCode::DmaMemcpy)[0];
    let (x, y) = resolve_tile_coords(&m, dma).unwrap();

    let loops = helpers::find_ops(&m, OpCode::For);
    let iv_of = |tag| {
        loops
            .iter()
            .copied()
            .find(|&l| m.op(l).attrs.herd_loop() == Some(tag))
            .and_then(|l| m.op_entry_block(l))
            .map(|b| m.block(b).args[0])
            .unwrap()
    };
    assert_eq!(x, iv_of(HerdLoopTag::Outer));
    assert_eq!(y, iv_of(HerdLoopTag::Inner));
}

#[test]
fn coords_resolve_inside_launch_body() {
    let (m, _) = helpers::herd_launch_module(2, 2, None);
    let dma = helpers::find_ops(&m, OpCode::DmaMemcpy)[0];
    let (x, y) = resolve_tile_coords(&m, dma).unwrap();

    let launch = helpers::find_ops(&m, OpCode::HerdLaunch)[0];
    let body = m.op_entry_block(launch).unwrap();
    assert_eq!(x, m.block(body).args[0]);
    assert_eq!(y, m.block(body).args[1]);
}

#[test]
fn coords_require_inner_before_outer() {
    // swap the tags: nearest tagged loop claims to be the outer one
    let (mut m, _) = helpers::dma_between(DmaDims::D1, MemorySpace::L3, MemorySpace::L1);
    let loops = helpers::find_ops(&m, OpCode::For);
    for &l in &loops {
        let tag = match m.op(l).attrs.herd_loop() {
            Some(HerdLoopTag::Outer) => HerdLoopTag::Inner,
            _ => HerdLoopTag::Outer,
        };
        m.op_mut(l).attrs.set_herd_loop(tag);
    }
    let dma = helpers::find_ops(&m, OpCode::DmaMemcpy)[0];
    assert!(resolve_tile_coords(&m, dma).is_none());
}

#[test]
fn coords_skip_untagged_loops() {
    let (mut m, func) = helpers::dma_between(DmaDims::D1, MemorySpace::L3, MemorySpace::L1);
    let dma = helpers::find_ops(&m, OpCode::DmaMemcpy)[0];
    let inner_body = helpers::find_ops(&m, OpCode::For)
        .into_iter()
        .find(|&l| m.op(l).attrs.herd_loop() == Some(HerdLoopTag::Inner))
        .and_then(|l| m.op_entry_block(l))
        .unwrap();

    // wedge two plain loops between the tagged nest and the copy
    let middle = {
        let mut b = OpBuilder::at_block_end(&mut m, inner_body);
        b.for_loop(0, 4, 1)
    };
    let innermost = {
        let mut b = OpBuilder::at_block_begin(&mut m, middle.body);
        b.for_loop(0, 4, 1)
    };
    m.move_op(dma, innermost.body, 0);

    let (x, y) = resolve_tile_coords(&m, dma).unwrap();
    let iv_of = |tag| {
        helpers::find_ops(&m, OpCode::For)
            .into_iter()
            .find(|&l| m.op(l).attrs.herd_loop() == Some(tag))
            .and_then(|l| m.op_entry_block(l))
            .map(|b| m.block(b).args[0])
            .unwrap()
    };
    assert_eq!(x, iv_of(HerdLoopTag::Outer));
    assert_eq!(y, iv_of(HerdLoopTag::Inner));

    // the whole pass still goes through
    hw_lowering().run(&mut m).unwrap();
    assert_eq!(helpers::count_ops(&m, OpCode::RtDmaMemcpy), 1);
    assert!(m.verify_func(func).is_ok());
}

fn flat_dma_module() -> Module {
    let mut m = Module::new();
    let (_, entry) = m.add_func(
        "flat",
        [
            Type::memref([8], ElemType::I32, MemorySpace::L1),
            Type::memref([8], ElemType::I32, MemorySpace::L3),
        ],
        [],
    );
    let params = m.block(entry).args.clone();
    {
        let mut b = OpBuilder::at_block_end(&mut m, entry);
        let zero = b.const_index(0);
        let zero2 = b.const_index(0);
        let len = b.const_index(8);
        b.insert(
            OpKind::DmaMemcpy { dims: DmaDims::D1 },
            [params[0], params[1], zero, zero2, len],
            [],
        );
        b.ret();
    }
    m
}

#[test]
fn coords_missing_outside_any_nest() {
    let m = flat_dma_module();
    let dma = helpers::find_ops(&m, OpCode::DmaMemcpy)[0];
    assert!(resolve_tile_coords(&m, dma).is_none());
}

#[test_case(true; "cpu_target")]
#[test_case(false; "hardware_target")]
fn unresolvable_coords_fail_the_pass(cpu: bool) {
    let mut m = flat_dma_module();
    let pass = if cpu { cpu_lowering() } else { hw_lowering() };
    let err = pass.run(&mut m).unwrap_err();
    assert!(matches!(
        err,
        Error::Rewrite { source: air_ir::Error::ConversionIncomplete { .. }, .. }
    ));
    // the copy is left in place for the caller to inspect
    assert_eq!(helpers::count_ops(&m, OpCode::DmaMemcpy), 1);
}
