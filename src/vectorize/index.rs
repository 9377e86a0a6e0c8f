//! Affine index model for memory access reasoning.
//!
//! Integer index expressions are tracked symbolically as `var*mul/div + const`
//! so adjacency and aliasing of array accesses can be decided without full
//! symbolic execution. A single forward pass over the trace folds integer
//! add/sub/mul into these forms; everything it cannot express becomes an
//! opaque variable, which only ever makes the analysis more conservative.

use crate::trace::{AccessKind, ArrayDescriptor, IntBinOp, OpKind, Operation, ValueId};
use rustc_hash::FxHashMap;

// =============================================================================
// IndexVar
// =============================================================================

/// Affine form of an integer expression: `var * mul / div + constant`.
///
/// Updates clone the form; an `IndexVar` is never mutated in place once
/// recorded, so two accesses sharing a base expression can never observe
/// each other's arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexVar {
    /// Base variable; `None` for pure constants.
    pub var: Option<ValueId>,
    /// Numerator of the coefficient.
    pub mul: i64,
    /// Denominator of the coefficient (always positive).
    pub div: i64,
    /// Additive constant.
    pub constant: i64,
}

impl IndexVar {
    /// A pure constant.
    #[inline]
    pub const fn constant(value: i64) -> Self {
        IndexVar {
            var: None,
            mul: 1,
            div: 1,
            constant: value,
        }
    }

    /// The identity form of a variable: `v*1/1 + 0`.
    #[inline]
    pub const fn variable(var: ValueId) -> Self {
        IndexVar {
            var: Some(var),
            mul: 1,
            div: 1,
            constant: 0,
        }
    }

    /// Whether this is a pure constant.
    #[inline]
    pub const fn is_constant(&self) -> bool {
        self.var.is_none()
    }

    /// Whether this is a plain variable with no arithmetic applied.
    #[inline]
    pub const fn is_identity(&self) -> bool {
        self.var.is_some() && self.mul == 1 && self.div == 1 && self.constant == 0
    }

    /// Clone with `value` added.
    #[inline]
    pub fn add_const(&self, value: i64) -> Self {
        let mut next = *self;
        next.constant += value;
        next
    }

    /// Clone with `value` subtracted.
    #[inline]
    pub fn sub_const(&self, value: i64) -> Self {
        self.add_const(-value)
    }

    /// Clone multiplied by `value`.
    #[inline]
    pub fn mul_const(&self, value: i64) -> Self {
        let mut next = *self;
        next.mul *= value;
        next.constant *= value;
        next
    }

    /// Clone with the coefficient negated.
    #[inline]
    pub fn negated(&self) -> Self {
        let mut next = *self;
        next.mul = -next.mul;
        next.constant = -next.constant;
        next
    }

    /// Whether the reduced coefficients of two forms match.
    ///
    /// Cross-multiplied so `2/4` and `1/2` compare equal.
    #[inline]
    pub fn same_coefficient(&self, other: &IndexVar) -> bool {
        self.mul * other.div == other.mul * self.div
    }

    /// Signed difference `self - other`, when the two forms are comparable.
    ///
    /// Comparable means both constant, or same base variable with matching
    /// reduced coefficient. Anything else returns `None` and callers must
    /// stay conservative.
    pub fn compare(&self, other: &IndexVar) -> Option<i64> {
        match (self.var, other.var) {
            (None, None) => Some(self.constant - other.constant),
            (Some(a), Some(b)) if a == b && self.same_coefficient(other) => {
                Some(self.constant - other.constant)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for IndexVar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.var {
            None => write!(f, "{}", self.constant),
            Some(v) => {
                write!(f, "{}", v)?;
                if self.mul != 1 {
                    write!(f, "*{}", self.mul)?;
                }
                if self.div != 1 {
                    write!(f, "/{}", self.div)?;
                }
                if self.constant != 0 {
                    write!(f, "{:+}", self.constant)?;
                }
                Ok(())
            }
        }
    }
}

// =============================================================================
// MemoryRef
// =============================================================================

/// One array access: the array value, its layout, and the affine index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRef {
    /// The accessed array value.
    pub array: ValueId,
    /// Element layout.
    pub descr: ArrayDescriptor,
    /// Affine index expression.
    pub index: IndexVar,
    /// Typed element indexing vs raw byte addressing.
    pub access: AccessKind,
}

impl MemoryRef {
    /// Index-space distance between consecutive elements: one for typed
    /// accesses, the element byte size for raw pointer accesses.
    #[inline]
    pub fn stride(&self) -> i64 {
        match self.access {
            AccessKind::Typed => 1,
            AccessKind::Raw => self.descr.element_size as i64,
        }
    }

    fn same_location_class(&self, other: &MemoryRef) -> bool {
        self.array == other.array && self.descr == other.descr && self.access == other.access
    }

    /// Whether `other` reads/writes the element immediately after this one.
    pub fn is_adjacent_after(&self, other: &MemoryRef) -> bool {
        if !self.same_location_class(other) {
            return false;
        }
        match other.index.compare(&self.index) {
            Some(diff) => diff == self.stride(),
            None => false,
        }
    }

    /// Whether the two accesses touch neighboring elements in either order.
    pub fn is_adjacent_to(&self, other: &MemoryRef) -> bool {
        self.is_adjacent_after(other) || other.is_adjacent_after(self)
    }

    /// Whether the two accesses provably touch the same cell.
    pub fn is_same_cell(&self, other: &MemoryRef) -> bool {
        self.same_location_class(other) && self.index.compare(&other.index) == Some(0)
    }

    /// Conservative aliasing predicate.
    ///
    /// Two accesses to the same array alias unless their indexes are
    /// comparable and at least one stride apart. Distinct array values
    /// with descriptors are distinct objects and never alias; reasoning
    /// about arrays without descriptor metadata is out of scope and such
    /// accesses never reach this predicate.
    pub fn alias(&self, other: &MemoryRef) -> bool {
        if !self.same_location_class(other) {
            return false;
        }
        match self.index.compare(&other.index) {
            Some(diff) => diff.abs() < self.stride(),
            None => true,
        }
    }
}

// =============================================================================
// Affine Context
// =============================================================================

/// Forward-pass evaluator assigning an `IndexVar` to every integer value.
///
/// Fed operations in trace order; unanalyzable results fall back to the
/// identity form of their own value.
#[derive(Debug, Default)]
pub struct AffineContext {
    forms: FxHashMap<ValueId, IndexVar>,
}

impl AffineContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The affine form of a value, defaulting to its identity.
    pub fn index_var(&self, value: ValueId) -> IndexVar {
        self.forms
            .get(&value)
            .copied()
            .unwrap_or(IndexVar::variable(value))
    }

    /// Fold one operation into the context. Must be called in trace order.
    pub fn record(&mut self, op: &Operation) {
        let folded = match op.kind {
            OpKind::ConstInt(value) => Some(IndexVar::constant(value)),
            OpKind::IntOp(bin) | OpKind::IntOpOvf(bin) => {
                let lhs = self.index_var(op.args[0]);
                let rhs = self.index_var(op.args[1]);
                self.fold(bin, lhs, rhs)
            }
            _ => None,
        };
        if let Some(form) = folded {
            if op.result.is_valid() {
                self.forms.insert(op.result, form);
            }
        }
    }

    fn fold(&self, bin: IntBinOp, lhs: IndexVar, rhs: IndexVar) -> Option<IndexVar> {
        match bin {
            IntBinOp::Add => match (lhs.is_constant(), rhs.is_constant()) {
                (true, true) => Some(IndexVar::constant(lhs.constant + rhs.constant)),
                (false, true) => Some(lhs.add_const(rhs.constant)),
                (true, false) => Some(rhs.add_const(lhs.constant)),
                (false, false) => None,
            },
            IntBinOp::Sub => match (lhs.is_constant(), rhs.is_constant()) {
                (true, true) => Some(IndexVar::constant(lhs.constant - rhs.constant)),
                (false, true) => Some(lhs.sub_const(rhs.constant)),
                (true, false) => Some(rhs.negated().add_const(lhs.constant)),
                // Same base with same coefficient folds to a constant.
                (false, false) => lhs.compare(&rhs).map(IndexVar::constant),
            },
            IntBinOp::Mul => match (lhs.is_constant(), rhs.is_constant()) {
                (true, true) => Some(IndexVar::constant(lhs.constant * rhs.constant)),
                (false, true) => Some(lhs.mul_const(rhs.constant)),
                (true, false) => Some(rhs.mul_const(lhs.constant)),
                (false, false) => None,
            },
            // Bit operations leave the affine domain.
            IntBinOp::And | IntBinOp::Or | IntBinOp::Xor => None,
        }
    }

    /// Build the memory reference of an array access operation, if it is one.
    pub fn memory_ref(&self, op: &Operation) -> Option<MemoryRef> {
        let access = match op.kind {
            OpKind::Load(access) | OpKind::Store(access) => access,
            _ => return None,
        };
        let descr = op.descr?;
        Some(MemoryRef {
            array: op.args[0],
            descr,
            index: self.index_var(op.args[1]),
            access,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{ResultKind, TraceBuilder};

    fn var(n: u32) -> ValueId {
        ValueId::new(n)
    }

    #[test]
    fn test_index_var_clone_on_update() {
        let base = IndexVar::variable(var(1));
        let shifted = base.add_const(8);
        assert_eq!(base.constant, 0);
        assert_eq!(shifted.constant, 8);
        assert!(base.is_identity());
        assert!(!shifted.is_identity());
    }

    #[test]
    fn test_index_var_mul_scales_constant() {
        let form = IndexVar::variable(var(1)).add_const(3).mul_const(4);
        assert_eq!(form.mul, 4);
        assert_eq!(form.constant, 12);
    }

    #[test]
    fn test_compare_same_base() {
        let a = IndexVar::variable(var(1)).add_const(8);
        let b = IndexVar::variable(var(1));
        assert_eq!(a.compare(&b), Some(8));
        assert_eq!(b.compare(&a), Some(-8));
    }

    #[test]
    fn test_compare_mismatched() {
        let a = IndexVar::variable(var(1));
        let b = IndexVar::variable(var(2));
        assert_eq!(a.compare(&b), None);
        assert_eq!(a.mul_const(2).compare(&IndexVar::variable(var(1))), None);
    }

    #[test]
    fn test_same_coefficient_reduced() {
        let mut a = IndexVar::variable(var(1));
        a.mul = 2;
        a.div = 4;
        let mut b = IndexVar::variable(var(1));
        b.mul = 1;
        b.div = 2;
        assert!(a.same_coefficient(&b));
        assert_eq!(a.compare(&b), Some(0));
    }

    fn raw_ref(array: ValueId, index: IndexVar, size: u8) -> MemoryRef {
        MemoryRef {
            array,
            descr: ArrayDescriptor::primitive(size),
            index,
            access: AccessKind::Raw,
        }
    }

    #[test]
    fn test_adjacency_raw_stride() {
        let base = IndexVar::variable(var(2));
        let a = raw_ref(var(1), base, 8);
        let b = raw_ref(var(1), base.add_const(8), 8);
        assert!(a.is_adjacent_after(&b));
        assert!(!b.is_adjacent_after(&a));
        assert!(a.is_adjacent_to(&b));
        assert!(b.is_adjacent_to(&a));
    }

    #[test]
    fn test_adjacency_typed_stride() {
        let base = IndexVar::variable(var(2));
        let a = MemoryRef {
            array: var(1),
            descr: ArrayDescriptor::primitive(8),
            index: base,
            access: AccessKind::Typed,
        };
        let b = MemoryRef {
            index: base.add_const(1),
            ..a.clone()
        };
        assert!(a.is_adjacent_after(&b));
    }

    #[test]
    fn test_alias_conservative_for_unknown() {
        let a = raw_ref(var(1), IndexVar::variable(var(2)), 8);
        let b = raw_ref(var(1), IndexVar::variable(var(3)), 8);
        assert!(a.alias(&b));
        // Distinct described arrays are distinct objects.
        let c = raw_ref(var(9), IndexVar::variable(var(2)), 8);
        assert!(!a.alias(&c));
    }

    #[test]
    fn test_alias_disproved_by_distance() {
        let base = IndexVar::variable(var(2));
        let a = raw_ref(var(1), base, 8);
        let near = raw_ref(var(1), base.add_const(4), 8);
        let far = raw_ref(var(1), base.add_const(8), 8);
        assert!(a.alias(&near)); // partial overlap possible
        assert!(!a.alias(&far));
        assert!(a.alias(&a));
        assert!(a.is_same_cell(&a));
    }

    #[test]
    fn test_affine_context_forward_pass() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let eight = b.const_int(8);
        let i8v = b.int_op(IntBinOp::Add, i, eight);
        let two = b.const_int(2);
        let scaled = b.int_op(IntBinOp::Mul, i8v, two);
        let trace = b.finish(&[p, i]);

        let mut ctx = AffineContext::new();
        for op in trace.ops() {
            ctx.record(op);
        }

        assert_eq!(ctx.index_var(i), IndexVar::variable(i));
        assert_eq!(ctx.index_var(i8v), IndexVar::variable(i).add_const(8));
        let scaled_form = ctx.index_var(scaled);
        assert_eq!(scaled_form.mul, 2);
        assert_eq!(scaled_form.constant, 16);
    }

    #[test]
    fn test_affine_context_var_minus_var() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        let one = b.const_int(1);
        let j = b.int_op(IntBinOp::Add, i, one);
        let diff = b.int_op(IntBinOp::Sub, j, i);
        let trace = b.finish(&[i]);

        let mut ctx = AffineContext::new();
        for op in trace.ops() {
            ctx.record(op);
        }
        assert_eq!(ctx.index_var(diff), IndexVar::constant(1));
    }

    #[test]
    fn test_memory_ref_extraction() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let trace = b.finish(&[p, i]);
        let _ = x;

        let mut ctx = AffineContext::new();
        for op in trace.ops() {
            ctx.record(op);
        }
        let load = &trace.body()[0];
        let mref = ctx.memory_ref(load).expect("load has a memory ref");
        assert_eq!(mref.array, p);
        assert_eq!(mref.index, IndexVar::variable(i));
        assert_eq!(mref.stride(), 8);
        assert_eq!(ctx.memory_ref(&trace.ops()[0]), None);
    }
}
