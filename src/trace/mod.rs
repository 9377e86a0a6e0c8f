//! Linear trace IR.
//!
//! A trace is the recording of one hot-loop iteration: a label carrying the
//! live-in values, a straight-line body, and a terminal jump whose arguments
//! (the live-outs) match the label's arity. Operations refer to values by
//! identity; values are minted by a counter owned by the trace, so cloned
//! or unrolled operations can be renamed without hidden shared state.

pub mod arena;
pub mod operators;

use smallvec::SmallVec;

pub use arena::{Arena, Id};
pub use operators::{
    AccessKind, CastKind, CmpOp, FloatBinOp, GuardKind, IntBinOp, OpKind, ResultKind, VecOpKind,
    VecShape,
};

use rustc_hash::FxHashMap;

// =============================================================================
// Values
// =============================================================================

/// Marker type for value identifiers.
pub struct Value;

/// Identity of an SSA-like trace value.
pub type ValueId = Id<Value>;

// =============================================================================
// Descriptors
// =============================================================================

/// Layout metadata for an array accessed by a trace operation.
///
/// Accesses without a primitive descriptor (reference-typed arrays) are
/// outside what the vectorizer will reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayDescriptor {
    /// Byte size of one element.
    pub element_size: u8,
    /// Whether elements are primitive (ints/floats, not references).
    pub is_primitive: bool,
}

impl ArrayDescriptor {
    /// Descriptor for a primitive array with the given element size.
    #[inline]
    pub const fn primitive(element_size: u8) -> Self {
        ArrayDescriptor {
            element_size,
            is_primitive: true,
        }
    }

    /// Descriptor for a reference-typed array.
    #[inline]
    pub const fn of_refs() -> Self {
        ArrayDescriptor {
            element_size: 8,
            is_primitive: false,
        }
    }
}

/// Identifies the interpreter state snapshot a failing guard resumes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumeDescriptor(pub u32);

/// Deoptimization payload attached to guard operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardPayload {
    /// Values the interpreter needs to reconstruct its state on failure.
    pub fail_args: SmallVec<[ValueId; 4]>,
    /// Snapshot the failure resumes into.
    pub resume: ResumeDescriptor,
}

// =============================================================================
// Operation
// =============================================================================

/// One trace operation: opcode tag, result kind, operands by identity, and
/// the optional payloads (array descriptor, guard deopt state).
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// What the operation does.
    pub kind: OpKind,
    /// The value this operation defines (`INVALID` for void results).
    pub result: ValueId,
    /// Kind of the defined value.
    pub result_kind: ResultKind,
    /// Operands, by value identity.
    pub args: SmallVec<[ValueId; 3]>,
    /// Array layout for memory accesses.
    pub descr: Option<ArrayDescriptor>,
    /// Deopt state for guards.
    pub guard: Option<Box<GuardPayload>>,
}

impl Operation {
    /// Create an operation with no descriptor or guard payload.
    pub fn new(kind: OpKind, result: ValueId, result_kind: ResultKind, args: &[ValueId]) -> Self {
        Operation {
            kind,
            result,
            result_kind,
            args: SmallVec::from_slice(args),
            descr: None,
            guard: None,
        }
    }

    /// Whether the operation has no side effects.
    #[inline]
    pub fn is_pure(&self) -> bool {
        self.kind.is_pure()
    }

    /// Whether the operation is a guard.
    #[inline]
    pub fn is_guard(&self) -> bool {
        self.kind.is_guard()
    }

    /// Whether the operation reads or writes array memory.
    #[inline]
    pub fn is_memory(&self) -> bool {
        self.kind.is_memory()
    }

    /// Element byte size this operation works on, when packing it.
    ///
    /// Memory accesses take it from their descriptor, casts from their
    /// destination, everything else uses the machine word.
    pub fn pack_element_size(&self) -> u8 {
        if let Some(descr) = self.descr {
            return descr.element_size;
        }
        if let OpKind::Cast(cast) = self.kind {
            return cast.to_bytes();
        }
        self.result_kind.byte_size().max(8)
    }

    /// The guard payload, panicking if this is not a guard.
    pub fn guard_payload(&self) -> &GuardPayload {
        self.guard
            .as_deref()
            .unwrap_or_else(|| panic!("{} has no guard payload", self.kind))
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.result.is_valid() {
            write!(f, "{} = ", self.result)?;
        }
        write!(f, "{}(", self.kind)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

// =============================================================================
// Trace
// =============================================================================

/// A linear trace: label, body, terminal jump.
#[derive(Debug, Clone)]
pub struct Trace {
    ops: Vec<Operation>,
    /// Result kind of every value minted so far, indexed by `ValueId`.
    value_kinds: Vec<ResultKind>,
    /// Next unused resume descriptor id.
    next_resume: u32,
}

impl Trace {
    /// All operations, label first, jump last.
    #[inline]
    pub fn ops(&self) -> &[Operation] {
        &self.ops
    }

    /// Mutable access to the operations.
    #[inline]
    pub fn ops_mut(&mut self) -> &mut [Operation] {
        &mut self.ops
    }

    /// Number of operations including label and jump.
    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the trace has an empty body.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.len() <= 2
    }

    /// The label's live-in values.
    #[inline]
    pub fn live_ins(&self) -> &[ValueId] {
        &self.ops[0].args
    }

    /// The jump's live-out values.
    #[inline]
    pub fn live_outs(&self) -> &[ValueId] {
        &self.ops[self.ops.len() - 1].args
    }

    /// Body operations, label and jump excluded.
    #[inline]
    pub fn body(&self) -> &[Operation] {
        &self.ops[1..self.ops.len() - 1]
    }

    /// Kind of a value.
    #[inline]
    pub fn kind_of(&self, value: ValueId) -> ResultKind {
        self.value_kinds[value.as_usize()]
    }

    /// Total number of values minted.
    #[inline]
    pub fn value_count(&self) -> usize {
        self.value_kinds.len()
    }

    /// Mint a fresh value of the given kind.
    pub fn fresh_value(&mut self, kind: ResultKind) -> ValueId {
        let id = ValueId::new(self.value_kinds.len() as u32);
        self.value_kinds.push(kind);
        id
    }

    /// Mint a fresh resume descriptor.
    pub fn fresh_resume(&mut self) -> ResumeDescriptor {
        let id = self.next_resume;
        self.next_resume += 1;
        ResumeDescriptor(id)
    }

    /// Replace the whole operation list (label/jump invariants must hold).
    pub fn replace_ops(&mut self, ops: Vec<Operation>) {
        debug_assert!(matches!(ops.first().map(|op| op.kind), Some(OpKind::Label)));
        debug_assert!(matches!(ops.last().map(|op| op.kind), Some(OpKind::Jump)));
        self.ops = ops;
    }

    /// Assemble a trace from rewritten parts, carrying the value table over.
    pub(crate) fn from_parts(
        ops: Vec<Operation>,
        value_kinds: Vec<ResultKind>,
        next_resume: u32,
    ) -> Trace {
        debug_assert!(matches!(ops.first().map(|op| op.kind), Some(OpKind::Label)));
        debug_assert!(matches!(ops.last().map(|op| op.kind), Some(OpKind::Jump)));
        Trace {
            ops,
            value_kinds,
            next_resume,
        }
    }

    /// The value kind table.
    #[inline]
    pub(crate) fn value_kinds(&self) -> &[ResultKind] {
        &self.value_kinds
    }

    /// Next unused resume descriptor id.
    #[inline]
    pub(crate) fn next_resume(&self) -> u32 {
        self.next_resume
    }
}

impl std::fmt::Display for Trace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for op in &self.ops {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}

// =============================================================================
// Renamer
// =============================================================================

/// Single-writer value substitution map.
///
/// Used by the unroller and the schedulers; unmapped values rename to
/// themselves. Passed explicitly to every helper that rewrites operands —
/// no shared global map.
#[derive(Debug, Default)]
pub struct Renamer {
    map: FxHashMap<ValueId, ValueId>,
}

impl Renamer {
    /// Create an empty renamer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `old -> new`.
    #[inline]
    pub fn rename(&mut self, old: ValueId, new: ValueId) {
        self.map.insert(old, new);
    }

    /// Resolve a value, following at most one mapping step.
    #[inline]
    pub fn get(&self, value: ValueId) -> ValueId {
        self.map.get(&value).copied().unwrap_or(value)
    }

    /// Rewrite all operands (and fail-args) of an operation in place.
    pub fn apply(&self, op: &mut Operation) {
        for arg in op.args.iter_mut() {
            *arg = self.get(*arg);
        }
        if let Some(guard) = op.guard.as_deref_mut() {
            for arg in guard.fail_args.iter_mut() {
                *arg = self.get(*arg);
            }
        }
    }
}

// =============================================================================
// Trace Builder
// =============================================================================

/// Convenience builder assembling a well-formed trace.
///
/// Live-ins are declared first; body operations append in order; `finish`
/// closes the trace with the terminal jump.
pub struct TraceBuilder {
    live_ins: Vec<ValueId>,
    body: Vec<Operation>,
    value_kinds: Vec<ResultKind>,
    next_resume: u32,
}

impl TraceBuilder {
    /// Start an empty trace.
    pub fn new() -> Self {
        TraceBuilder {
            live_ins: Vec::new(),
            body: Vec::new(),
            value_kinds: Vec::new(),
            next_resume: 0,
        }
    }

    fn fresh(&mut self, kind: ResultKind) -> ValueId {
        let id = ValueId::new(self.value_kinds.len() as u32);
        self.value_kinds.push(kind);
        id
    }

    /// Declare a live-in value carried by the label.
    pub fn live_in(&mut self, kind: ResultKind) -> ValueId {
        debug_assert!(self.body.is_empty(), "live-ins must precede body ops");
        let id = self.fresh(kind);
        self.live_ins.push(id);
        id
    }

    /// Append an already-assembled operation.
    pub fn push(&mut self, op: Operation) -> ValueId {
        let result = op.result;
        self.body.push(op);
        result
    }

    /// Integer constant.
    pub fn const_int(&mut self, value: i64) -> ValueId {
        let result = self.fresh(ResultKind::Int);
        self.push(Operation::new(OpKind::ConstInt(value), result, ResultKind::Int, &[]))
    }

    /// Float constant.
    pub fn const_float(&mut self, value: f64) -> ValueId {
        let result = self.fresh(ResultKind::Float);
        self.push(Operation::new(
            OpKind::ConstFloat(value.to_bits()),
            result,
            ResultKind::Float,
            &[],
        ))
    }

    /// Pure integer arithmetic.
    pub fn int_op(&mut self, op: IntBinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let result = self.fresh(ResultKind::Int);
        self.push(Operation::new(OpKind::IntOp(op), result, ResultKind::Int, &[lhs, rhs]))
    }

    /// Overflow-checked integer arithmetic.
    pub fn int_op_ovf(&mut self, op: IntBinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let result = self.fresh(ResultKind::Int);
        self.push(Operation::new(
            OpKind::IntOpOvf(op),
            result,
            ResultKind::Int,
            &[lhs, rhs],
        ))
    }

    /// Pure float arithmetic.
    pub fn float_op(&mut self, op: FloatBinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let result = self.fresh(ResultKind::Float);
        self.push(Operation::new(
            OpKind::FloatOp(op),
            result,
            ResultKind::Float,
            &[lhs, rhs],
        ))
    }

    /// Integer comparison.
    pub fn int_cmp(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let result = self.fresh(ResultKind::Int);
        self.push(Operation::new(OpKind::IntCmp(op), result, ResultKind::Int, &[lhs, rhs]))
    }

    /// Scalar cast.
    pub fn cast(&mut self, kind: CastKind, value: ValueId) -> ValueId {
        let result_kind = match kind {
            CastKind::IntToFloat => ResultKind::Float,
            _ => ResultKind::Int,
        };
        let result = self.fresh(result_kind);
        self.push(Operation::new(OpKind::Cast(kind), result, result_kind, &[value]))
    }

    /// Array element load.
    pub fn load(
        &mut self,
        access: AccessKind,
        result_kind: ResultKind,
        array: ValueId,
        index: ValueId,
        descr: ArrayDescriptor,
    ) -> ValueId {
        let result = self.fresh(result_kind);
        let mut op = Operation::new(OpKind::Load(access), result, result_kind, &[array, index]);
        op.descr = Some(descr);
        self.push(op)
    }

    /// Array element store.
    pub fn store(
        &mut self,
        access: AccessKind,
        array: ValueId,
        index: ValueId,
        value: ValueId,
        descr: ArrayDescriptor,
    ) {
        let mut op = Operation::new(
            OpKind::Store(access),
            ValueId::INVALID,
            ResultKind::Void,
            &[array, index, value],
        );
        op.descr = Some(descr);
        self.push(op);
    }

    /// Guard with explicit condition operands and fail-args.
    pub fn guard(&mut self, kind: GuardKind, args: &[ValueId], fail_args: &[ValueId]) {
        let mut op = Operation::new(OpKind::Guard(kind), ValueId::INVALID, ResultKind::Void, args);
        op.guard = Some(Box::new(GuardPayload {
            fail_args: SmallVec::from_slice(fail_args),
            resume: ResumeDescriptor(self.next_resume),
        }));
        self.next_resume += 1;
        self.push(op);
    }

    /// Close the trace with the terminal jump.
    ///
    /// The jump arity must match the label's.
    pub fn finish(self, live_outs: &[ValueId]) -> Trace {
        assert_eq!(
            live_outs.len(),
            self.live_ins.len(),
            "jump arity must match label arity"
        );
        let mut ops = Vec::with_capacity(self.body.len() + 2);
        ops.push(Operation {
            kind: OpKind::Label,
            result: ValueId::INVALID,
            result_kind: ResultKind::Void,
            args: SmallVec::from_slice(&self.live_ins),
            descr: None,
            guard: None,
        });
        ops.extend(self.body);
        ops.push(Operation {
            kind: OpKind::Jump,
            result: ValueId::INVALID,
            result_kind: ResultKind::Void,
            args: SmallVec::from_slice(live_outs),
            descr: None,
            guard: None,
        });
        Trace {
            ops,
            value_kinds: self.value_kinds,
            next_resume: self.next_resume,
        }
    }
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_label_jump_arity() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let trace = b.finish(&[p, i]);

        assert_eq!(trace.live_ins(), &[p, i]);
        assert_eq!(trace.live_outs(), &[p, i]);
        assert!(trace.is_empty());
        assert_eq!(trace.kind_of(p), ResultKind::Ref);
        assert_eq!(trace.kind_of(i), ResultKind::Int);
    }

    #[test]
    #[should_panic(expected = "arity")]
    fn test_builder_arity_mismatch_panics() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        b.live_in(ResultKind::Int);
        b.finish(&[p]);
    }

    #[test]
    fn test_builder_body() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let one = b.const_int(1);
        let y = b.int_op(IntBinOp::Add, x, one);
        b.store(AccessKind::Raw, p, i, y, descr);
        let trace = b.finish(&[p, i]);

        assert_eq!(trace.body().len(), 4);
        assert_eq!(trace.body()[0].kind, OpKind::Load(AccessKind::Raw));
        assert_eq!(trace.body()[0].descr, Some(descr));
        assert!(trace.body()[3].kind.is_store());
    }

    #[test]
    fn test_guard_payload_and_resume_numbering() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        let n = b.const_int(10);
        let cond = b.int_cmp(CmpOp::Lt, i, n);
        b.guard(GuardKind::True, &[cond], &[i]);
        b.guard(GuardKind::EarlyExit, &[], &[i]);
        let trace = b.finish(&[i]);

        let guards: Vec<_> = trace.body().iter().filter(|op| op.is_guard()).collect();
        assert_eq!(guards.len(), 2);
        assert_eq!(guards[0].guard_payload().resume, ResumeDescriptor(0));
        assert_eq!(guards[1].guard_payload().resume, ResumeDescriptor(1));
        assert_eq!(guards[0].guard_payload().fail_args.as_slice(), &[i]);
    }

    #[test]
    fn test_renamer_identity_and_apply() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        let one = b.const_int(1);
        let sum = b.int_op(IntBinOp::Add, i, one);
        let mut trace = b.finish(&[sum]);

        let fresh = trace.fresh_value(ResultKind::Int);
        let mut renamer = Renamer::new();
        renamer.rename(sum, fresh);

        let last = trace.ops_mut().last_mut().unwrap();
        renamer.apply(last);
        assert_eq!(last.args.as_slice(), &[fresh]);
        assert_eq!(renamer.get(one), one);
    }

    #[test]
    fn test_pack_element_size() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let x = b.load(AccessKind::Raw, ResultKind::Int, p, i, ArrayDescriptor::primitive(2));
        let w = b.cast(CastKind::SignExtend { from: 2, to: 8 }, x);
        let trace = b.finish(&[p, i]);
        let _ = w;

        assert_eq!(trace.body()[0].pack_element_size(), 2);
        assert_eq!(trace.body()[1].pack_element_size(), 8);
    }
}
