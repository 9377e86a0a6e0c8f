//! Guard strengthening over affine bounds.
//!
//! After unrolling, each body copy carries its own bounds check against the
//! same limit (`i < n`, `i+8 < n`, ...). This pass groups condition guards
//! whose comparison is between two affine index expressions by the variable
//! they bound, and keeps only the dominating check: an implied guard is
//! dropped, and when the stronger check sits later in the trace its
//! condition replaces the weaker one in place — inheriting the weaker
//! guard's fail-args and resume descriptor so the deopt state stays valid
//! at that position. Failure is monotonic: the strengthened trace fails at
//! or before every point the original would have failed, never later.
//!
//! `transitive_imply` goes one step further and fuses two guards whose
//! bounds are not directly comparable (different coefficients on the same
//! variable, both against constants) into a single combined guard inserted
//! once before the loop body. A guard is only ever removed when implication
//! is provably total; every ambiguous case keeps both guards.

use crate::trace::{
    CmpOp, GuardKind, OpKind, Operation, ResultKind, Trace, ValueId,
};
use crate::vectorize::index::{AffineContext, IndexVar};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

// =============================================================================
// Normalized Bound
// =============================================================================

/// One condition guard normalized to `lhs cmp rhs` with the bounded
/// variable on the left and guard_false folded into the comparison.
#[derive(Debug, Clone)]
struct BoundGuard {
    /// Position of the guard operation.
    guard_at: usize,
    /// Normalized comparison kind.
    cmp: CmpOp,
    /// Left side; always carries the group variable.
    lhs: IndexVar,
    /// Right side.
    rhs: IndexVar,
}

impl BoundGuard {
    /// Non-strict left form: `x < C` becomes `x <= C-1`, `x > C` becomes
    /// `x >= C+1`.
    fn relaxed_rhs(&self) -> IndexVar {
        match self.cmp {
            CmpOp::Lt => self.rhs.sub_const(1),
            CmpOp::Gt => self.rhs.add_const(1),
            _ => self.rhs,
        }
    }

    fn is_upper(&self) -> bool {
        self.cmp.is_upper_bound()
    }

    fn is_lower(&self) -> bool {
        self.cmp.is_lower_bound()
    }

    /// Whether passing this guard guarantees passing `other`.
    fn implies(&self, other: &BoundGuard) -> bool {
        if self.is_upper() != other.is_upper() || self.is_lower() != other.is_lower() {
            return false;
        }
        if !self.is_upper() && !self.is_lower() {
            return false; // equality guards carry no bound to compare
        }
        let Some(lhs_diff) = self.lhs.compare(&other.lhs) else {
            return false;
        };
        let Some(rhs_diff) = self.relaxed_rhs().compare(&other.relaxed_rhs()) else {
            return false;
        };
        if self.is_upper() {
            lhs_diff >= rhs_diff
        } else {
            lhs_diff <= rhs_diff
        }
    }

    /// Largest value of the group variable this guard admits, when the
    /// bound is fully constant. Only meaningful for upper bounds.
    fn constant_upper_bound(&self) -> Option<i64> {
        if !self.is_upper() || !self.relaxed_rhs().is_constant() {
            return None;
        }
        // lhs = x*mul/div + c <= B  =>  x <= floor((B - c) * div / mul)
        let bound = self.relaxed_rhs().constant - self.lhs.constant;
        let mul = self.lhs.mul;
        let div = self.lhs.div;
        if mul <= 0 || div <= 0 {
            return None;
        }
        Some((bound * div).div_euclid(mul))
    }
}

// =============================================================================
// Strengthening Actions
// =============================================================================

#[derive(Debug, Default)]
struct Actions {
    /// Guard positions that must not be emitted.
    drop: FxHashSet<usize>,
    /// Guard position -> position of the guard whose condition replaces it.
    replace: FxHashMap<usize, usize>,
    /// Combined guards to insert right after the label:
    /// (variable, comparison, constant bound, payload source position).
    synthesize: Vec<(ValueId, CmpOp, i64, usize)>,
}

// =============================================================================
// Guard Strengthener
// =============================================================================

/// The guard strengthening pass.
pub struct GuardStrengthener;

impl GuardStrengthener {
    /// Strengthen the guards of a trace in place.
    ///
    /// Returns the number of guard operations eliminated.
    pub fn run(trace: &mut Trace) -> usize {
        let (bounds, def_positions) = Self::collect(trace);
        let groups = Self::group(&bounds);
        let actions = Self::decide(trace, &bounds, &groups, &def_positions);
        let eliminated = actions.drop.len();
        if eliminated == 0 && actions.synthesize.is_empty() {
            return 0;
        }
        Self::rewrite(trace, &actions, &def_positions);
        eliminated
    }

    /// Extract normalized bound guards and the defining position of every
    /// value.
    fn collect(trace: &Trace) -> (Vec<BoundGuard>, FxHashMap<ValueId, usize>) {
        let mut affine = AffineContext::new();
        let mut def_positions: FxHashMap<ValueId, usize> = FxHashMap::default();
        for &live_in in trace.live_ins() {
            def_positions.insert(live_in, 0);
        }

        let mut bounds = Vec::new();
        for (index, op) in trace.ops().iter().enumerate() {
            affine.record(op);
            if op.result.is_valid() {
                def_positions.insert(op.result, index);
            }

            let inverted = match op.kind {
                OpKind::Guard(GuardKind::True) => false,
                OpKind::Guard(GuardKind::False) => true,
                _ => continue,
            };
            let Some(&cmp_at) = def_positions.get(&op.args[0]) else {
                continue;
            };
            let OpKind::IntCmp(raw_cmp) = trace.ops()[cmp_at].kind else {
                continue;
            };
            let cmp_op = &trace.ops()[cmp_at];
            let cmp = if inverted { raw_cmp.inverted() } else { raw_cmp };
            let mut lhs = affine.index_var(cmp_op.args[0]);
            let mut rhs = affine.index_var(cmp_op.args[1]);
            let mut cmp = cmp;
            if lhs.is_constant() {
                // Keep the bounded variable on the left.
                std::mem::swap(&mut lhs, &mut rhs);
                cmp = cmp.swapped();
            }
            if lhs.is_constant() {
                continue; // constant-folded comparison, nothing to group
            }
            bounds.push(BoundGuard {
                guard_at: index,
                cmp,
                lhs,
                rhs,
            });
        }
        (bounds, def_positions)
    }

    /// Group bound indices by the identity of the bounded variable.
    fn group(bounds: &[BoundGuard]) -> FxHashMap<ValueId, Vec<usize>> {
        let mut groups: FxHashMap<ValueId, Vec<usize>> = FxHashMap::default();
        for (index, bound) in bounds.iter().enumerate() {
            let var = bound.lhs.var.expect("grouped bounds keep a variable");
            groups.entry(var).or_default().push(index);
        }
        groups
    }

    fn decide(
        trace: &Trace,
        bounds: &[BoundGuard],
        groups: &FxHashMap<ValueId, Vec<usize>>,
        def_positions: &FxHashMap<ValueId, usize>,
    ) -> Actions {
        let mut actions = Actions::default();

        for (&var, members) in groups {
            for (i, &a_idx) in members.iter().enumerate() {
                for &b_idx in &members[i + 1..] {
                    let earlier = &bounds[a_idx];
                    let later = &bounds[b_idx];
                    if actions.drop.contains(&earlier.guard_at)
                        || actions.drop.contains(&later.guard_at)
                    {
                        continue;
                    }

                    if earlier.implies(later) {
                        actions.drop.insert(later.guard_at);
                    } else if later.implies(earlier) {
                        // The stronger check takes the weaker one's
                        // position and deopt state; its own occurrence
                        // disappears. Only possible when the stronger
                        // condition can be computed that early.
                        let condition = trace.ops()[later.guard_at].args[0];
                        if hoistable_chain(trace, def_positions, condition, earlier.guard_at)
                            .is_some()
                        {
                            actions.replace.insert(earlier.guard_at, later.guard_at);
                            actions.drop.insert(later.guard_at);
                        }
                    } else {
                        Self::try_transitive(trace, var, earlier, later, def_positions, &mut actions);
                    }
                }
            }
        }
        actions
    }

    /// Fuse two incomparable constant bounds on the same variable into one
    /// combined guard placed before the loop body.
    fn try_transitive(
        trace: &Trace,
        var: ValueId,
        earlier: &BoundGuard,
        later: &BoundGuard,
        def_positions: &FxHashMap<ValueId, usize>,
        actions: &mut Actions,
    ) {
        if !earlier.lhs.is_identity() && !later.lhs.is_identity() {
            return;
        }
        let (Some(bound_a), Some(bound_b)) =
            (earlier.constant_upper_bound(), later.constant_upper_bound())
        else {
            return;
        };
        // The combined guard must be checkable before the body.
        if def_positions.get(&var) != Some(&0) {
            return;
        }
        let payload_at = earlier.guard_at;
        let payload_ok = trace.ops()[payload_at]
            .guard_payload()
            .fail_args
            .iter()
            .all(|arg| def_positions.get(arg) == Some(&0));
        if !payload_ok {
            return;
        }

        actions
            .synthesize
            .push((var, CmpOp::Le, bound_a.min(bound_b), payload_at));
        actions.drop.insert(earlier.guard_at);
        actions.drop.insert(later.guard_at);
    }

    /// Rebuild the operation list, applying drops, in-place replacements
    /// and synthesized combined guards. Comparisons orphaned by dropped
    /// guards are left in place; the trailing dependency-only reschedule
    /// sweeps them out.
    fn rewrite(trace: &mut Trace, actions: &Actions, def_positions: &FxHashMap<ValueId, usize>) {
        let ops: Vec<Operation> = trace.ops().to_vec();
        let mut out: Vec<Operation> = Vec::with_capacity(ops.len());
        let mut hoisted: FxHashSet<usize> = FxHashSet::default();

        out.push(ops[0].clone());
        for &(var, cmp, bound, payload_at) in &actions.synthesize {
            let limit = trace.fresh_value(ResultKind::Int);
            out.push(Operation::new(OpKind::ConstInt(bound), limit, ResultKind::Int, &[]));
            let condition = trace.fresh_value(ResultKind::Int);
            out.push(Operation::new(
                OpKind::IntCmp(cmp),
                condition,
                ResultKind::Int,
                &[var, limit],
            ));
            let mut guard = Operation::new(
                OpKind::Guard(GuardKind::True),
                ValueId::INVALID,
                ResultKind::Void,
                &[condition],
            );
            guard.guard = ops[payload_at].guard.clone();
            out.push(guard);
        }

        for (index, op) in ops.iter().enumerate().skip(1) {
            if hoisted.contains(&index) {
                continue;
            }
            if let Some(&source) = actions.replace.get(&index) {
                let condition = ops[source].args[0];
                let chain = hoistable_chain(trace, def_positions, condition, index)
                    .expect("replacement was validated");
                for position in chain {
                    if hoisted.insert(position) {
                        out.push(ops[position].clone());
                    }
                }
                let mut guard = op.clone();
                guard.kind = ops[source].kind;
                guard.args = ops[source].args.clone();
                out.push(guard);
                continue;
            }
            if actions.drop.contains(&index) {
                continue;
            }
            out.push(op.clone());
        }
        trace.replace_ops(out);
    }
}

/// Pure operations after `before` that must move for `value` to be
/// available there, in emission order. `None` when the chain reaches a
/// non-pure operation or a value with no definition.
fn hoistable_chain(
    trace: &Trace,
    def_positions: &FxHashMap<ValueId, usize>,
    value: ValueId,
    before: usize,
) -> Option<Vec<usize>> {
    let mut chain: Vec<usize> = Vec::new();
    let mut seen: FxHashSet<usize> = FxHashSet::default();
    let mut stack: SmallVec<[ValueId; 8]> = SmallVec::new();
    stack.push(value);

    while let Some(current) = stack.pop() {
        let &position = def_positions.get(&current)?;
        if position < before || !seen.insert(position) {
            continue;
        }
        let op = &trace.ops()[position];
        if !op.is_pure() {
            return None;
        }
        chain.push(position);
        for &arg in &op.args {
            stack.push(arg);
        }
    }
    chain.sort_unstable();
    Some(chain)
}

// =============================================================================
// Tests
// =============================================================================
