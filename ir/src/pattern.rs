//! Rewrite patterns and the drivers that apply them.
//!
//! A pattern is a closure that inspects one operation and either rewrites
//! the graph or declines without touching it; there is no partial
//! application. [`PatternSet`] indexes patterns by [`OpCode`] for O(1)
//! dispatch and composes with `+`. Two drivers run the sets: a greedy
//! fixed-point driver that interleaves trivial dead-code elimination, and a
//! conversion driver that additionally enforces a legality predicate once
//! rewriting settles.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::error::{ConversionIncompleteSnafu, NoFixedPointSnafu, Result};
use crate::module::{FuncId, Module, OpId};
use crate::op::OpCode;

/// Outcome of one rewrite attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteResult {
    /// The pattern declined; the graph is untouched.
    NoMatch,
    /// The pattern applied its rewrite in full.
    Rewritten,
}

impl RewriteResult {
    pub fn is_rewritten(self) -> bool {
        matches!(self, Self::Rewritten)
    }
}

/// Boxed rewrite closure over a context `C`.
pub type PatternFn<C> = Box<dyn Fn(OpId, &mut Module, &mut C) -> RewriteResult + Send + Sync>;

struct PatternEntry<C> {
    name: &'static str,
    run: PatternFn<C>,
}

/// A set of rewrite patterns indexed by op code.
#[derive(derive_more::Debug)]
pub struct PatternSet<C = ()> {
    #[debug(skip)]
    indexed: HashMap<OpCode, Vec<PatternEntry<C>>>,
    #[debug(skip)]
    wildcards: Vec<PatternEntry<C>>,
}

impl<C> Default for PatternSet<C> {
    fn default() -> Self {
        Self { indexed: HashMap::new(), wildcards: Vec::new() }
    }
}

impl<C> PatternSet<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pattern for one op code.
    pub fn add(
        &mut self,
        code: OpCode,
        name: &'static str,
        run: impl Fn(OpId, &mut Module, &mut C) -> RewriteResult + Send + Sync + 'static,
    ) {
        self.indexed
            .entry(code)
            .or_default()
            .push(PatternEntry { name, run: Box::new(run) });
    }

    /// Register a pattern tried against every op code.
    pub fn add_wildcard(
        &mut self,
        name: &'static str,
        run: impl Fn(OpId, &mut Module, &mut C) -> RewriteResult + Send + Sync + 'static,
    ) {
        self.wildcards.push(PatternEntry { name, run: Box::new(run) });
    }

    pub fn len(&self) -> usize {
        self.indexed.values().map(Vec::len).sum::<usize>() + self.wildcards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Try the patterns registered for this op's code, then the wildcards.
    /// The first rewrite wins.
    pub fn rewrite(&self, op: OpId, module: &mut Module, ctx: &mut C) -> RewriteResult {
        let code = module.op(op).kind.code();
        let entries = self.indexed.get(&code).map(Vec::as_slice).unwrap_or(&[]);
        for entry in entries.iter().chain(&self.wildcards) {
            if (entry.run)(op, module, ctx).is_rewritten() {
                trace!(pattern = entry.name, "pattern applied");
                return RewriteResult::Rewritten;
            }
        }
        RewriteResult::NoMatch
    }
}

/// Merge two sets; patterns registered first are tried first.
impl<C> std::ops::Add for PatternSet<C> {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        for (code, entries) in rhs.indexed {
            self.indexed.entry(code).or_default().extend(entries);
        }
        self.wildcards.extend(rhs.wildcards);
        self
    }
}

// ============================================================================
// DRIVERS
// ============================================================================

/// Sweep limit for the greedy driver.
pub const MAX_SWEEPS: usize = 100;

/// Apply `set` over `func` until neither a pattern nor dead-code
/// elimination changes anything. Returns the number of rewrites.
pub fn apply_greedily<C>(
    module: &mut Module,
    func: FuncId,
    set: &PatternSet<C>,
    ctx: &mut C,
) -> Result<usize> {
    let mut total = 0;
    for sweep in 0..MAX_SWEEPS {
        let mut changed = 0;
        for op in module.walk_func(func) {
            if module.op(op).is_erased() {
                continue;
            }
            if set.rewrite(op, module, ctx).is_rewritten() {
                changed += 1;
            }
        }
        let erased = erase_trivially_dead(module, func);
        total += changed;
        if changed == 0 && erased == 0 {
            debug!(sweeps = sweep + 1, rewrites = total, "greedy rewriting settled");
            return Ok(total);
        }
    }
    NoFixedPointSnafu { sweeps: MAX_SWEEPS }.fail()
}

/// Erase side-effect-free ops whose results are all unused, repeating until
/// stable so whole dead chains go at once. Returns the erased count.
pub fn erase_trivially_dead(module: &mut Module, func: FuncId) -> usize {
    let mut erased = 0;
    loop {
        let mut round = 0;
        for op in module.walk_func(func) {
            let data = module.op(op);
            if data.is_erased() || !data.kind.is_erasable_when_unused() {
                continue;
            }
            let results = data.results.clone();
            if results.iter().all(|&r| !module.has_uses(r)) {
                module.erase_op(op);
                round += 1;
            }
        }
        if round == 0 {
            break;
        }
        erased += round;
    }
    if erased > 0 {
        trace!(erased, "dead ops removed");
    }
    erased
}

/// Greedy rewriting followed by a legality check: every op left in `func`
/// must satisfy `is_legal`, otherwise the conversion fails terminally.
pub fn apply_partial_conversion<C>(
    module: &mut Module,
    func: FuncId,
    set: &PatternSet<C>,
    ctx: &mut C,
    is_legal: impl Fn(&Module, OpId) -> bool,
) -> Result<usize> {
    let rewrites = apply_greedily(module, func, set, ctx)?;

    let mut count: usize = 0;
    let mut first = None;
    for op in module.walk_func(func) {
        if !module.op(op).is_erased() && !is_legal(module, op) {
            count += 1;
            first.get_or_insert_with(|| module.op(op).kind.name().to_string());
        }
    }
    if count > 0 {
        return ConversionIncompleteSnafu { count, first: first.unwrap_or_default() }.fail();
    }
    Ok(rewrites)
}
