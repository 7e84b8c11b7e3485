//! Tests for the cleanup pre-pass and the pattern-test mode.

use air_ir::prelude::*;

use crate::codegen::TilingCodegen;
use crate::options::CodegenOptions;
use crate::test::helpers;

fn pattern_mode() -> TilingCodegen {
    TilingCodegen::new(CodegenOptions::builder().test_patterns(true).build())
}

#[test]
fn pattern_mode_targets_the_intermediate_tier() {
    let (mut m, func) = helpers::staged_subview_module(MemorySpace::L3);
    pattern_mode().run(&mut m).unwrap();

    let allocs = helpers::find_ops(&m, OpCode::Alloc);
    assert_eq!(allocs.len(), 1);
    let ty = m.value_type(m.result(allocs[0], 0)).as_memref().cloned().unwrap();
    assert_eq!(ty.space, MemorySpace::L2);
    assert_eq!(ty.static_shape().unwrap().as_slice(), &[16, 16]);

    assert_eq!(helpers::count_ops(&m, OpCode::View), 0);
    assert_eq!(helpers::count_ops(&m, OpCode::Subview), 0);
    assert_eq!(helpers::count_ops(&m, OpCode::Copy), 1);
    assert!(m.verify_func(func).is_ok());
}

#[test]
fn pattern_mode_skips_the_pipelines() {
    let (mut m, _) = helpers::matmul_module(128, 128, 128);
    pattern_mode().run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::Matmul), 1);
    assert_eq!(helpers::count_ops(&m, OpCode::For), 0);
    assert_eq!(helpers::count_ops(&m, OpCode::Parallel), 0);
    assert_eq!(m.funcs().count(), 1);
}

/// Staging allocation filled by a copy and only ever written by compute.
fn unread_staging_module(compute: OpKind) -> (Module, FuncId) {
    let ty = Type::memref([16, 16], ElemType::F32, MemorySpace::L3);
    let mut m = Module::new();
    let (func, entry) = m.add_func("staging", [ty.clone(), ty.clone(), ty], []);
    let params = m.block(entry).args.clone();
    {
        let mut b = OpBuilder::at_block_end(&mut m, entry);
        let staging = b.alloc(MemRefType::new([16, 16], ElemType::F32, MemorySpace::L3));
        let casted = b.cast(staging, MemRefType::new([16, 16], ElemType::F32, MemorySpace::L3));
        b.copy(params[0], casted);
        b.insert(compute, [params[1], staging], []);
        b.dealloc(staging);
        b.ret();
    }
    (m, func)
}

#[test]
fn unread_staging_buffer_is_dropped() {
    let (mut m, func) = unread_staging_module(OpKind::Generic { num_inputs: 1 });
    pattern_mode().run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::Alloc), 0);
    assert_eq!(helpers::count_ops(&m, OpCode::Copy), 0);
    // the copy source stands in for the buffer through one cast
    assert_eq!(helpers::count_ops(&m, OpCode::Cast), 1);
    let generic = helpers::find_ops(&m, OpCode::Generic)[0];
    let output = m.op(generic).operands[1];
    let def = m.defining_op(output).unwrap();
    assert!(matches!(m.op(def).kind, OpKind::Cast));
    assert!(m.verify_func(func).is_ok());
}

#[test]
fn accumulating_consumers_keep_their_staging() {
    // matmul reads its output, so the copied data is live
    let ty = Type::memref([16, 16], ElemType::F32, MemorySpace::L3);
    let mut m = Module::new();
    let (_, entry) = m.add_func("staging", [ty.clone(), ty.clone(), ty], []);
    let params = m.block(entry).args.clone();
    {
        let mut b = OpBuilder::at_block_end(&mut m, entry);
        let staging = b.alloc(MemRefType::new([16, 16], ElemType::F32, MemorySpace::L3));
        let casted = b.cast(staging, MemRefType::new([16, 16], ElemType::F32, MemorySpace::L3));
        b.copy(params[0], casted);
        b.insert(OpKind::Matmul, [params[1], params[2], staging], []);
        b.dealloc(staging);
        b.ret();
    }
    pattern_mode().run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::Alloc), 1);
    assert_eq!(helpers::count_ops(&m, OpCode::Copy), 1);
}

#[test]
fn unused_staging_allocation_is_erased() {
    let mut m = Module::new();
    let (_, entry) = m.add_func("staging", [], []);
    {
        let mut b = OpBuilder::at_block_end(&mut m, entry);
        b.alloc(MemRefType::new([64], ElemType::I8, MemorySpace::L3));
        b.ret();
    }
    pattern_mode().run(&mut m).unwrap();
    assert_eq!(helpers::count_ops(&m, OpCode::Alloc), 0);
}

#[test]
fn input_position_reads_block_the_cleanup() {
    // the buffer feeds the compute op as an input
    let ty = Type::memref([16, 16], ElemType::F32, MemorySpace::L3);
    let mut m = Module::new();
    let (_, entry) = m.add_func("staging", [ty.clone(), ty], []);
    let params = m.block(entry).args.clone();
    {
        let mut b = OpBuilder::at_block_end(&mut m, entry);
        let staging = b.alloc(MemRefType::new([16, 16], ElemType::F32, MemorySpace::L3));
        let casted = b.cast(staging, MemRefType::new([16, 16], ElemType::F32, MemorySpace::L3));
        b.copy(params[0], casted);
        b.insert(OpKind::Generic { num_inputs: 1 }, [staging, params[1]], []);
        b.dealloc(staging);
        b.ret();
    }
    pattern_mode().run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::Alloc), 1);
    assert_eq!(helpers::count_ops(&m, OpCode::Copy), 1);
}
