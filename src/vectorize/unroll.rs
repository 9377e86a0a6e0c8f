//! Trace unrolling.
//!
//! Duplicates the loop body so one trace iteration carries enough scalar
//! work to fill a vector register. Each copy renames its operands through
//! the previous copy's jump arguments, mints fresh result values, and gets
//! fresh resume descriptors for its guards.

use crate::trace::{Operation, Renamer, Trace, ValueId};
use smallvec::SmallVec;

/// Unroll a trace to `factor` total body copies.
///
/// A factor of one returns the trace unchanged. Loop-carried values flow
/// exclusively through the jump arguments: copy `k` sees the label's
/// live-ins renamed to copy `k-1`'s live-outs.
pub fn unroll_trace(trace: &Trace, factor: usize) -> Trace {
    let mut result = trace.clone();
    if factor <= 1 {
        return result;
    }

    let mut ops: Vec<Operation> = result.ops().to_vec();
    let jump = ops.pop().expect("trace ends in a jump");
    let label_args: Vec<ValueId> = ops[0].args.to_vec();
    let body: Vec<Operation> = ops[1..].to_vec();
    let mut carried: Vec<ValueId> = jump.args.to_vec();

    for _ in 1..factor {
        let mut renamer = Renamer::new();
        for (&live_in, &value) in label_args.iter().zip(&carried) {
            renamer.rename(live_in, value);
        }

        for op in &body {
            let mut copy = op.clone();
            renamer.apply(&mut copy);
            if copy.result.is_valid() {
                let fresh = result.fresh_value(copy.result_kind);
                renamer.rename(op.result, fresh);
                copy.result = fresh;
            }
            if let Some(guard) = copy.guard.as_deref_mut() {
                guard.resume = result.fresh_resume();
            }
            ops.push(copy);
        }

        carried = jump.args.iter().map(|&value| renamer.get(value)).collect();
    }

    let mut final_jump = jump;
    final_jump.args = SmallVec::from_vec(carried);
    ops.push(final_jump);
    result.replace_ops(ops);
    result
}

// =============================================================================
// Tests
// =============================================================================
