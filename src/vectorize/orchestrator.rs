//! Pass sequencing for one vectorization attempt.
//!
//! Drives the pipeline: find the smallest primitive element size, hoist
//! pure loop-entry guards next to the label, unroll the body to fill a
//! vector register, build the dependency graph, discover packs, schedule
//! them as vector operations, check profitability, strengthen guards, and
//! finally reschedule once more with dependencies only to sweep out dead
//! scalar leftovers.
//!
//! Every step reports failure through `VectorizeBail`; the caller keeps
//! its scalar trace and compiles on. Nothing here is fatal except real
//! consistency violations, which panic inside the scheduler.

use crate::machine::MachineDescriptor;
use crate::trace::{OpKind, Operation, Trace, ValueId};
use crate::vectorize::cost::SavingsCounter;
use crate::vectorize::dependency::DependencyGraph;
use crate::vectorize::guard::GuardStrengthener;
use crate::vectorize::packset::PackSet;
use crate::vectorize::schedule::Scheduler;
use crate::vectorize::unroll::unroll_trace;
use crate::vectorize::{StructuralReason, VectorizeBail, VectorizeConfig, VectorizeStats};
use rustc_hash::{FxHashMap, FxHashSet};

// =============================================================================
// Output
// =============================================================================

/// A successfully vectorized trace.
#[derive(Debug)]
pub struct VectorizedTrace {
    /// Invariant operations (constant vector expansions and loop-invariant
    /// broadcasts) to place once before the label.
    pub prefix: Vec<Operation>,
    /// The rewritten trace.
    pub trace: Trace,
    /// Counters describing the attempt.
    pub stats: VectorizeStats,
}

// =============================================================================
// Vectorizer
// =============================================================================

/// The auto-vectorization pass.
pub struct Vectorizer<'m> {
    machine: &'m MachineDescriptor,
    config: VectorizeConfig,
}

impl<'m> Vectorizer<'m> {
    /// Create a vectorizer for a target machine.
    pub fn new(machine: &'m MachineDescriptor, config: VectorizeConfig) -> Self {
        Vectorizer { machine, config }
    }

    /// Attempt to vectorize one trace.
    ///
    /// On `Err` the caller falls back to the scalar trace it already has;
    /// both bail-outs are ordinary, expected outcomes.
    pub fn optimize(&self, trace: &Trace) -> Result<VectorizedTrace, VectorizeBail> {
        let vec_reg_bytes = self.machine.vec_reg_bytes();
        if vec_reg_bytes == 0 {
            return Err(VectorizeBail::structural(StructuralReason::ZeroVectorWidth));
        }
        let element_size = smallest_element_size(trace)
            .ok_or(VectorizeBail::structural(StructuralReason::NoPrimitiveArray))?;

        let hoisted = hoist_entry_guards(trace)?;

        let factor = (vec_reg_bytes / element_size).max(1) as usize;
        let unrolled = unroll_trace(&hoisted, factor);
        log::debug!(
            "vectorize: element_size={} unroll_factor={} ops={}",
            element_size,
            factor,
            unrolled.len()
        );

        let mut stats = VectorizeStats {
            unroll_factor: factor,
            ..VectorizeStats::default()
        };

        let mut graph = DependencyGraph::build(&unrolled);
        let mut packs = PackSet::build(&mut graph, self.machine)?;
        let mut counter =
            SavingsCounter::with_threshold(self.config.cost_table, self.config.savings_threshold);

        let mut scheduled = Scheduler::vector(&mut graph, &mut packs, &mut counter).run();
        stats.packs_formed = packs.packs().iter().filter(|pack| pack.lanes() > 0).count();
        stats.ops_vectorized = scheduled.ops_vectorized;
        stats.savings = counter.savings();

        if !counter.profitable() {
            log::debug!("vectorize: rejected, savings={}", counter.savings());
            return Err(VectorizeBail::Unprofitable {
                savings: counter.savings(),
            });
        }

        let prefix = std::mem::take(&mut scheduled.prefix);
        let mut rewritten = scheduled.into_trace(&unrolled);

        stats.guards_strengthened = GuardStrengthener::run(&mut rewritten);

        // Dependency-only reschedule: drops the scalar leftovers that the
        // vector rewrite and guard strengthening orphaned.
        let mut final_graph = DependencyGraph::build(&rewritten);
        let cleaned = Scheduler::scalar(&mut final_graph).run();
        let final_trace = cleaned.into_trace(&rewritten);

        log::debug!(
            "vectorize: accepted, packs={} ops_vectorized={} savings={}",
            stats.packs_formed,
            stats.ops_vectorized,
            stats.savings
        );

        Ok(VectorizedTrace {
            prefix,
            trace: final_trace,
            stats,
        })
    }
}

// =============================================================================
// Smallest Element Size
// =============================================================================

/// Smallest element size among primitive array accesses, or `None` when
/// the trace touches no primitive array at all.
fn smallest_element_size(trace: &Trace) -> Option<u8> {
    trace
        .ops()
        .iter()
        .filter(|op| matches!(op.kind, OpKind::Load(_) | OpKind::Store(_)))
        .filter_map(|op| op.descr)
        .filter(|descr| descr.is_primitive && descr.element_size > 0)
        .map(|descr| descr.element_size)
        .min()
}

// =============================================================================
// Guard Hoisting
// =============================================================================

/// Move guards whose condition is a pure function of the live-ins, and
/// whose fail-args are live-ins, next to the label. Hoisted guards fail
/// before the iteration has done anything, so their deopt state stays
/// valid; moving a guard earlier can only make failure earlier.
fn hoist_entry_guards(trace: &Trace) -> Result<Trace, VectorizeBail> {
    let mut def_positions: FxHashMap<ValueId, usize> = FxHashMap::default();
    for &live_in in trace.live_ins() {
        def_positions.insert(live_in, 0);
    }
    for (index, op) in trace.ops().iter().enumerate() {
        if op.result.is_valid() {
            def_positions.insert(op.result, index);
        }
    }

    let mut hoist: Vec<usize> = Vec::new();
    let mut hoisted_positions: FxHashSet<usize> = FxHashSet::default();
    for (index, op) in trace.ops().iter().enumerate() {
        if !matches!(op.kind, OpKind::Guard(kind) if kind.is_condition_guard()) {
            continue;
        }
        let payload_entry_only = op
            .guard_payload()
            .fail_args
            .iter()
            .all(|arg| def_positions.get(arg) == Some(&0));
        if !payload_entry_only {
            continue;
        }
        match pure_input_chain(trace, &def_positions, op.args[0])? {
            Some(chain) => {
                for position in chain {
                    if hoisted_positions.insert(position) {
                        hoist.push(position);
                    }
                }
                hoisted_positions.insert(index);
                hoist.push(index);
            }
            None => continue,
        }
    }
    if hoist.is_empty() {
        return Ok(trace.clone());
    }

    let ops = trace.ops();
    let mut reordered: Vec<Operation> = Vec::with_capacity(ops.len());
    reordered.push(ops[0].clone());
    for &position in &hoist {
        reordered.push(ops[position].clone());
    }
    for (index, op) in ops.iter().enumerate().skip(1) {
        if !hoisted_positions.contains(&index) {
            reordered.push(op.clone());
        }
    }

    let mut hoisted_trace = trace.clone();
    hoisted_trace.replace_ops(reordered);
    Ok(hoisted_trace)
}

/// The positions of the pure operations computing `value` from live-ins,
/// in emission order. `Ok(None)` when the chain touches a non-pure
/// operation; an operand cycle is a malformed trace and bails.
fn pure_input_chain(
    trace: &Trace,
    def_positions: &FxHashMap<ValueId, usize>,
    value: ValueId,
) -> Result<Option<Vec<usize>>, VectorizeBail> {
    let mut chain: Vec<usize> = Vec::new();
    let mut done: FxHashSet<usize> = FxHashSet::default();
    let mut on_stack: FxHashSet<usize> = FxHashSet::default();

    fn visit(
        trace: &Trace,
        def_positions: &FxHashMap<ValueId, usize>,
        value: ValueId,
        chain: &mut Vec<usize>,
        done: &mut FxHashSet<usize>,
        on_stack: &mut FxHashSet<usize>,
    ) -> Result<bool, VectorizeBail> {
        let Some(&position) = def_positions.get(&value) else {
            return Ok(false);
        };
        if position == 0 || done.contains(&position) {
            return Ok(true);
        }
        if !on_stack.insert(position) {
            return Err(VectorizeBail::structural(StructuralReason::CyclicGuardHoist));
        }
        let op = &trace.ops()[position];
        if !op.is_pure() {
            on_stack.remove(&position);
            return Ok(false);
        }
        for i in 0..op.args.len() {
            if !visit(trace, def_positions, op.args[i], chain, done, on_stack)? {
                on_stack.remove(&position);
                return Ok(false);
            }
        }
        on_stack.remove(&position);
        done.insert(position);
        chain.push(position);
        Ok(true)
    }

    if visit(trace, def_positions, value, &mut chain, &mut done, &mut on_stack)? {
        Ok(Some(chain))
    } else {
        Ok(None)
    }
}

// =============================================================================
// Tests
// =============================================================================
