//! End-to-end tests for the elementwise tiling pipeline.

use air_ir::prelude::*;

use crate::codegen::TilingCodegen;
use crate::options::CodegenOptions;
use crate::test::helpers;

#[test]
fn sequential_then_parallel_tiling() {
    let (mut m, _) = helpers::generic_module(256, 256);
    TilingCodegen::new(CodegenOptions::default()).run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::Generic), 1);

    let loops = helpers::find_ops(&m, OpCode::For);
    assert_eq!(loops.len(), 2);
    for &l in &loops {
        assert_eq!(helpers::for_bounds(&m, l), (0, 256, 128));
    }

    let pars = helpers::find_ops(&m, OpCode::Parallel);
    assert_eq!(pars.len(), 1);
    let OpKind::Parallel { ubs, steps, .. } = &m.op(pars[0]).kind else {
        panic!("not a parallel loop");
    };
    assert_eq!(ubs.as_slice(), &[128, 128]);
    assert_eq!(steps.as_slice(), &[32, 32]);

    // input and output each get a tile buffer; only the output flushes back
    let allocs = helpers::find_ops(&m, OpCode::Alloc);
    assert_eq!(allocs.len(), 2);
    for &a in &allocs {
        let ty = m.value_type(m.result(a, 0)).as_memref().cloned().unwrap();
        assert_eq!(ty.space, MemorySpace::L1);
        assert_eq!(ty.static_shape().unwrap().as_slice(), &[32, 32]);
    }
    assert_eq!(helpers::count_ops(&m, OpCode::Copy), 3);
    assert_eq!(helpers::count_ops(&m, OpCode::Dealloc), 2);

    assert_eq!(m.funcs().count(), 1);
    assert!(m.verify().is_ok());
}

#[test]
fn tile_sized_generic_needs_no_loops() {
    let (mut m, _) = helpers::generic_module(32, 32);
    TilingCodegen::new(CodegenOptions::default()).run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::For), 0);
    assert_eq!(helpers::count_ops(&m, OpCode::Parallel), 0);
    assert_eq!(helpers::count_ops(&m, OpCode::Generic), 1);
    assert_eq!(helpers::count_ops(&m, OpCode::Alloc), 2);
    assert_eq!(helpers::count_ops(&m, OpCode::Copy), 3);
}

#[test]
fn mixed_module_tiles_every_class() {
    // one matmul and one generic in the same function
    let mut m = Module::new();
    let (_, entry) = m.add_func(
        "mixed",
        [
            Type::memref([64, 64], ElemType::F32, MemorySpace::L3),
            Type::memref([64, 64], ElemType::F32, MemorySpace::L3),
            Type::memref([64, 64], ElemType::F32, MemorySpace::L3),
        ],
        [],
    );
    let args = m.block(entry).args.clone();
    {
        let mut b = OpBuilder::at_block_end(&mut m, entry);
        let ops: Vec<ValueId> = args.to_vec();
        b.insert(OpKind::Matmul, ops.clone(), []);
        b.insert(OpKind::Generic { num_inputs: 1 }, [ops[0], ops[1]], []);
        b.ret();
    }

    TilingCodegen::new(CodegenOptions::default()).run(&mut m).unwrap();

    assert_eq!(helpers::count_ops(&m, OpCode::Matmul), 1);
    assert_eq!(helpers::count_ops(&m, OpCode::Generic), 1);
    // 64^3 matmul: parallel herd level only; 64x64 generic: one parallel level
    assert!(helpers::count_ops(&m, OpCode::Parallel) >= 1);
    assert_eq!(m.funcs().count(), 1);
    assert!(m.verify().is_ok());
}
