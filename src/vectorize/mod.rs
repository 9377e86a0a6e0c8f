//! Trace auto-vectorization pass.
//!
//! Given the linear recording of one hot-loop iteration, this pass unrolls
//! the body to fill a vector register, groups isomorphic scalar operations
//! into packs, schedules the packs as SIMD operations when the cost model
//! approves, strengthens the surviving guards, and hands back the rewritten
//! trace. If anything rules the transformation out the pass bails with one
//! of exactly two recoverable signals and the caller keeps its scalar trace.
//!
//! # Pipeline
//!
//! 1. **Affine index model** (`index`): `var*mul/div + const` forms
//! 2. **Dependency graph** (`dependency`): true/anti/output/guard edges
//! 3. **PackSet** (`packset`): seed, extend, combine, split
//! 4. **Scheduler** (`schedule`): priority-ordered emission, lane bookkeeping
//! 5. **Cost model** (`cost`): running savings counter
//! 6. **Guard strengthening** (`guard`): drop or merge implied bounds checks
//! 7. **Orchestrator** (`orchestrator`): sequencing, unrolling, bail-outs

pub mod cost;
pub mod dependency;
pub mod guard;
pub mod index;
pub mod orchestrator;
pub mod packset;
pub mod schedule;
pub mod unroll;

pub use cost::{CostTable, SavingsCounter};
pub use dependency::{DepEdge, DepNode, DependencyGraph, NodeFlags, NodeId};
pub use guard::GuardStrengthener;
pub use index::{AffineContext, IndexVar, MemoryRef};
pub use orchestrator::{VectorizedTrace, Vectorizer};
pub use packset::{Pack, PackKind, PackSet};
pub use schedule::{ScheduleResult, Scheduler};
pub use unroll::unroll_trace;

use thiserror::Error;

// =============================================================================
// Bail-Outs
// =============================================================================

/// Why the trace shape rules vectorization out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StructuralReason {
    /// No array access with a primitive element descriptor exists.
    #[error("no primitive array access in the trace")]
    NoPrimitiveArray,
    /// The machine has no vector registers.
    #[error("target vector width is zero")]
    ZeroVectorWidth,
    /// No packs survived pair discovery and combining.
    #[error("no operation packs could be formed")]
    EmptyPackSet,
    /// A merge would join reductions at different operand positions.
    #[error("pack spans incompatible reduction positions")]
    MixedReductionPositions,
    /// A pack contains an opcode with no vector counterpart.
    #[error("pack contains an unsupported opcode")]
    UnsupportedOpcode,
    /// Guard hoisting found a cycle in the value graph.
    #[error("cyclic dependency while hoisting guards")]
    CyclicGuardHoist,
}

/// The only two failures that cross the pass boundary.
///
/// Both are ordinary control flow: the caller falls back to the scalar
/// trace. Internal consistency violations (a scheduler deadlock) panic
/// instead — they indicate a dependency-construction defect and must never
/// be absorbed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VectorizeBail {
    /// The trace cannot be vectorized at all.
    #[error("vectorization not applicable: {0}")]
    Structural(StructuralReason),
    /// Vectorization is possible but would not pay off.
    #[error("vectorization not profitable: estimated savings {savings}")]
    Unprofitable {
        /// Final value of the savings counter.
        savings: i64,
    },
}

impl VectorizeBail {
    /// Shorthand for a structural bail.
    #[inline]
    pub const fn structural(reason: StructuralReason) -> Self {
        VectorizeBail::Structural(reason)
    }

    /// Whether this is the structural bail.
    #[inline]
    pub const fn is_structural(&self) -> bool {
        matches!(self, VectorizeBail::Structural(_))
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Tuning knobs for one vectorization attempt.
#[derive(Debug, Clone)]
pub struct VectorizeConfig {
    /// Savings the transformation must reach before it is kept. The counter
    /// starts at the negated threshold, so zero accepts any non-losing
    /// rewrite.
    pub savings_threshold: i64,
    /// Cost constants for the target.
    pub cost_table: CostTable,
}

impl Default for VectorizeConfig {
    fn default() -> Self {
        VectorizeConfig {
            savings_threshold: 0,
            cost_table: CostTable::default(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Counters describing one vectorization attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VectorizeStats {
    /// Unroll factor applied to the trace body.
    pub unroll_factor: usize,
    /// Packs that survived combining and splitting.
    pub packs_formed: usize,
    /// Scalar operations folded into vector operations.
    pub ops_vectorized: usize,
    /// Guards removed or merged by strengthening.
    pub guards_strengthened: usize,
    /// Final value of the savings counter.
    pub savings: i64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bail_display() {
        let bail = VectorizeBail::structural(StructuralReason::NoPrimitiveArray);
        assert!(bail.is_structural());
        assert_eq!(
            bail.to_string(),
            "vectorization not applicable: no primitive array access in the trace"
        );

        let bail = VectorizeBail::Unprofitable { savings: -3 };
        assert!(!bail.is_structural());
        assert_eq!(bail.to_string(), "vectorization not profitable: estimated savings -3");
    }

    #[test]
    fn test_config_default() {
        let config = VectorizeConfig::default();
        assert_eq!(config.savings_threshold, 0);
    }
}
