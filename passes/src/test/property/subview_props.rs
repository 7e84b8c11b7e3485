//! Property tests for sub-view folding.
//!
//! Folding a chain of sub-views must not depend on the order the links are
//! merged in: left-first and right-first folds of the same chain land on the
//! same final offsets, sizes and source.

use air_ir::prelude::*;
use proptest::prelude::*;

use crate::codegen::subview::fold_subview_patterns;
use crate::test::helpers;

// ============================================================================
// Generators
// ============================================================================

/// One per-dimension offset of a chain link, static or routed through an
/// index constant. The magnitude is the same either way, so the evaluated
/// total is independent of which form the generator picked.
#[derive(Debug, Clone, Copy)]
enum LinkOffset {
    Static(i64),
    Dynamic(i64),
}

impl LinkOffset {
    fn magnitude(self) -> i64 {
        match self {
            Self::Static(v) | Self::Dynamic(v) => v,
        }
    }
}

fn arb_link_offset() -> impl Strategy<Value = LinkOffset> {
    prop_oneof![
        (0i64..=64).prop_map(LinkOffset::Static),
        (0i64..=64).prop_map(LinkOffset::Dynamic),
    ]
}

/// A three-link chain over a rank-2 source: `links[k][d]` is link `k`'s
/// offset along dimension `d`.
fn arb_chain() -> impl Strategy<Value = [[LinkOffset; 2]; 3]> {
    prop::array::uniform3(prop::array::uniform2(arb_link_offset()))
}

/// All-static chains of depth 2 to 4 for the greedy-driver property.
fn arb_static_chain() -> impl Strategy<Value = Vec<[i64; 2]>> {
    prop::collection::vec(prop::array::uniform2(0i64..=64), 2..=4)
}

// ============================================================================
// Fixture
// ============================================================================

/// Sizes per chain depth; folding keeps the innermost link's sizes, so the
/// innermost sub-view is identifiable at every step.
const LINK_SIZES: [[i64; 2]; 4] = [[64, 64], [32, 32], [16, 16], [8, 8]];

/// Builds `f(root: memref<256x256xf32>)` holding the chain, innermost last.
fn chain_module(links: &[[LinkOffset; 2]]) -> (Module, FuncId, ValueId) {
    let mut m = Module::new();
    let (func, entry) = m.add_func(
        "chain",
        [Type::memref([256, 256], ElemType::F32, MemorySpace::L3)],
        [],
    );
    let root = m.block(entry).args[0];

    let mut b = OpBuilder::at_block_end(&mut m, entry);
    let mut source = root;
    for (link, sizes) in links.iter().zip(LINK_SIZES) {
        let mut offsets = Vec::new();
        let mut dynamics = Vec::new();
        for offset in link {
            match *offset {
                LinkOffset::Static(v) => offsets.push(SubviewOffset::Static(v)),
                LinkOffset::Dynamic(v) => {
                    offsets.push(SubviewOffset::Dynamic);
                    dynamics.push(b.const_index(v));
                }
            }
        }
        source = b.subview(
            source,
            &offsets,
            &dynamics,
            &sizes,
            &[1, 1],
            ElemType::F32,
            MemorySpace::L3,
        );
    }
    b.ret();
    (m, func, root)
}

/// The live sub-view with the given result sizes. Panics unless exactly one
/// exists, which every fold step of the fixture guarantees.
fn subview_with_sizes(m: &Module, wanted: &[i64]) -> OpId {
    let found: Vec<OpId> = helpers::find_ops(m, OpCode::Subview)
        .into_iter()
        .filter(|&op| {
            matches!(&m.op(op).kind, OpKind::Subview { sizes, .. } if sizes.as_slice() == wanted)
        })
        .collect();
    assert_eq!(found.len(), 1, "expected one sub-view sized {wanted:?}");
    found[0]
}

/// Evaluates an index value made of constants and additions.
fn eval_index(m: &Module, value: ValueId) -> Option<i64> {
    let op = m.defining_op(value)?;
    match &m.op(op).kind {
        OpKind::ConstIndex(c) => Some(*c),
        OpKind::AddIndex => {
            let operands = m.op(op).operands.clone();
            Some(eval_index(m, operands[0])? + eval_index(m, operands[1])?)
        }
        _ => None,
    }
}

/// Final shape of a fully folded chain: per-dimension offset form and
/// evaluated total, plus the source value and sizes.
#[derive(Debug, PartialEq, Eq)]
struct Folded {
    forms: Vec<SubviewOffset>,
    totals: Vec<i64>,
    sizes: Vec<i64>,
    source: ValueId,
}

fn folded_shape(m: &Module, op: OpId) -> Folded {
    let OpKind::Subview { offsets, sizes, .. } = &m.op(op).kind else {
        panic!("not a sub-view");
    };
    let operands = &m.op(op).operands;
    let mut dynamics = operands[1..].iter();
    let totals = offsets
        .iter()
        .map(|offset| match offset {
            SubviewOffset::Static(v) => *v,
            SubviewOffset::Dynamic => {
                eval_index(m, *dynamics.next().expect("dynamic operand"))
                    .expect("constant-evaluable offset")
            }
        })
        .collect();
    Folded {
        forms: offsets.to_vec(),
        totals,
        sizes: sizes.to_vec(),
        source: operands[0],
    }
}

fn fold_at(m: &mut Module, op: OpId) -> bool {
    fold_subview_patterns().rewrite(op, m, &mut ()).is_rewritten()
}

// ============================================================================
// Associativity
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Folding `c(b(a(root)))` middle-first or innermost-first produces the
    /// same final sub-view: same offset forms, same evaluated totals, same
    /// sizes, rooted at the same source.
    #[test]
    fn fold_order_does_not_matter(links in arb_chain()) {
        let innermost = LINK_SIZES[links.len() - 1];

        // left-first: merge the middle link down, then the innermost
        let (mut left, func, root) = chain_module(&links);
        let mid = subview_with_sizes(&left, &LINK_SIZES[1]);
        prop_assert!(fold_at(&mut left, mid), "middle link should fold");
        let last = subview_with_sizes(&left, &innermost);
        prop_assert!(fold_at(&mut left, last), "innermost link should fold");
        erase_trivially_dead(&mut left, func);
        prop_assert!(left.verify_func(func).is_ok());

        // right-first: merge the innermost link twice
        let (mut right, func, _) = chain_module(&links);
        let last = subview_with_sizes(&right, &innermost);
        prop_assert!(fold_at(&mut right, last), "innermost link should fold");
        let last = subview_with_sizes(&right, &innermost);
        prop_assert!(fold_at(&mut right, last), "folded link should fold again");
        erase_trivially_dead(&mut right, func);
        prop_assert!(right.verify_func(func).is_ok());

        prop_assert_eq!(helpers::count_ops(&left, OpCode::Subview), 1);
        prop_assert_eq!(helpers::count_ops(&right, OpCode::Subview), 1);

        let left = folded_shape(&left, subview_with_sizes(&left, &innermost));
        let right = folded_shape(&right, subview_with_sizes(&right, &innermost));
        prop_assert_eq!(&left, &right);

        // both match the chain evaluated by hand
        prop_assert_eq!(left.source, root);
        prop_assert_eq!(&left.sizes, &innermost);
        for d in 0..2 {
            let total: i64 = links.iter().map(|link| link[d].magnitude()).sum();
            prop_assert_eq!(left.totals[d], total, "dimension {} total", d);
            let all_static = links
                .iter()
                .all(|link| matches!(link[d], LinkOffset::Static(_)));
            prop_assert_eq!(
                matches!(left.forms[d], SubviewOffset::Static(_)),
                all_static,
                "dimension {} stays static exactly when every link is",
                d
            );
        }
    }
}

// ============================================================================
// Greedy driver
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// The greedy driver collapses an all-static chain of any depth into a
    /// single sub-view whose offsets are the per-dimension sums.
    #[test]
    fn greedy_fold_sums_static_chains(chain in arb_static_chain()) {
        let links: Vec<[LinkOffset; 2]> = chain
            .iter()
            .map(|link| [LinkOffset::Static(link[0]), LinkOffset::Static(link[1])])
            .collect();
        let (mut m, func, root) = chain_module(&links);

        apply_greedily(&mut m, func, &fold_subview_patterns(), &mut ())
            .expect("folding reaches a fixed point");
        prop_assert!(m.verify_func(func).is_ok());
        prop_assert_eq!(helpers::count_ops(&m, OpCode::Subview), 1);

        let folded = folded_shape(&m, subview_with_sizes(&m, &LINK_SIZES[chain.len() - 1]));
        prop_assert_eq!(folded.source, root);
        for d in 0..2 {
            let total: i64 = chain.iter().map(|link| link[d]).sum();
            prop_assert_eq!(folded.forms[d], SubviewOffset::Static(total));
        }
    }
}
