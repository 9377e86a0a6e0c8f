//! Profitability accounting for one vectorization attempt.
//!
//! A single integer savings counter gates the whole transformation: packs
//! add benefit, every lane-assembly operation the scheduler has to insert
//! (pack/unpack/expand/cast) subtracts cost, and the final trace is kept
//! only if the counter ends non-negative.
//!
//! The constants are empirically tuned for one reference instruction set;
//! only the sign of the total is semantically load-bearing. They live in a
//! per-target table instead of inline literals so retuning stays a data
//! change.

use crate::trace::{CastKind, OpKind, ResultKind};

// =============================================================================
// Cost Table
// =============================================================================

/// Per-target cost constants, in abstract issue-slot units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostTable {
    /// Benefit per scalar operation folded away by a pack.
    pub pack_benefit_per_lane: i64,
    /// Cost per lane inserted when gathering scattered values.
    pub insert_lane_cost: i64,
    /// Cost per lane extracted out of a vector.
    pub extract_lane_cost: i64,
    /// Cost of broadcasting one scalar into a register.
    pub expand_cost: i64,
    /// Cost of a cheap (size-ratio two) vector cast.
    pub cast_cheap_cost: i64,
    /// Cost per lane of any other vector cast.
    pub cast_lane_cost: i64,
}

impl CostTable {
    /// Constants for 128-bit SSE-class targets.
    pub const fn sse() -> Self {
        CostTable {
            pack_benefit_per_lane: 1,
            insert_lane_cost: 1,
            extract_lane_cost: 1,
            expand_cost: 1,
            cast_cheap_cost: 1,
            cast_lane_cost: 2,
        }
    }

    /// Constants for 256-bit AVX-class targets, where cross-half lane
    /// moves are pricier.
    pub const fn avx() -> Self {
        CostTable {
            pack_benefit_per_lane: 1,
            insert_lane_cost: 2,
            extract_lane_cost: 2,
            expand_cost: 1,
            cast_cheap_cost: 1,
            cast_lane_cost: 2,
        }
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self::sse()
    }
}

// =============================================================================
// Savings Counter
// =============================================================================

/// Running savings of the transformation.
///
/// Seeded with the caller's threshold negated, so `profitable()` demands
/// the packs earn the threshold back before the rewrite is kept.
#[derive(Debug, Clone)]
pub struct SavingsCounter {
    table: CostTable,
    savings: i64,
}

impl SavingsCounter {
    /// Create a counter with the given table and required threshold.
    pub fn with_threshold(table: CostTable, threshold: i64) -> Self {
        SavingsCounter {
            table,
            savings: -threshold,
        }
    }

    /// Current savings.
    #[inline]
    pub fn savings(&self) -> i64 {
        self.savings
    }

    /// Whether the transformation pays off.
    #[inline]
    pub fn profitable(&self) -> bool {
        self.savings >= 0
    }

    /// Account for one completed pack of `lanes` scalar operations.
    ///
    /// A pack built around a narrowing cast whose size ratio is not two
    /// needs per-lane shuffling on real hardware, so it earns nothing.
    pub fn record_pack(&mut self, kind: OpKind, lanes: usize) {
        if let OpKind::Cast(cast) = kind {
            if cast.is_narrowing() && cast.size_ratio() != 2 {
                return;
            }
        }
        self.savings += self.table.pack_benefit_per_lane * (lanes as i64 - 1);
    }

    /// Account for inserting `count` scalar lanes into a vector.
    pub fn record_insert(&mut self, count: usize) {
        self.savings -= self.table.insert_lane_cost * count as i64;
    }

    /// Account for extracting `count` lanes starting at `offset`.
    ///
    /// Extracting the first float lane is a register move and costs
    /// nothing; everything else pays per lane.
    pub fn record_extract(&mut self, kind: ResultKind, offset: usize, count: usize) {
        if kind == ResultKind::Float && offset == 0 && count == 1 {
            return;
        }
        self.savings -= self.table.extract_lane_cost * count as i64;
    }

    /// Account for a scalar-to-vector broadcast.
    pub fn record_expand(&mut self) {
        self.savings -= self.table.expand_cost;
    }

    /// Account for a vector cast over `lanes` lanes.
    pub fn record_cast(&mut self, cast: CastKind, lanes: usize) {
        if cast.size_ratio() == 2 {
            self.savings -= self.table.cast_cheap_cost;
        } else {
            self.savings -= self.table.cast_lane_cost * lanes as i64;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
