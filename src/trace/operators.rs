//! Operation tags for trace operations.
//!
//! The trace IR is a closed set of opcodes: scalar integer/float arithmetic,
//! comparisons, casts, array accesses, guards, and their vector
//! counterparts. Each variant carries only the payload relevant to it —
//! dispatch is by `match`, never by numeric opcode ranges.

// =============================================================================
// Result Kind
// =============================================================================

/// Kind of value an operation produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    /// Machine-word integer.
    Int,
    /// Double-precision float.
    Float,
    /// Heap reference.
    Ref,
    /// No result (stores, guards, label, jump).
    Void,
}

impl ResultKind {
    /// Byte size of a scalar value of this kind (machine word for refs).
    #[inline]
    pub const fn byte_size(self) -> u8 {
        match self {
            ResultKind::Int | ResultKind::Float | ResultKind::Ref => 8,
            ResultKind::Void => 0,
        }
    }
}

// =============================================================================
// Scalar Operation Payloads
// =============================================================================

/// Binary integer arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntBinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

/// Binary float arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatBinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Integer comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CmpOp {
    /// Logical negation: `a < b` fails exactly when `a >= b` holds.
    #[inline]
    pub const fn inverted(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Ge => CmpOp::Lt,
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
        }
    }

    /// Argument swap: `a < b` iff `b > a`.
    #[inline]
    pub const fn swapped(self) -> CmpOp {
        match self {
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::Le => CmpOp::Ge,
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::Ge => CmpOp::Le,
            CmpOp::Eq => CmpOp::Eq,
            CmpOp::Ne => CmpOp::Ne,
        }
    }

    /// Whether this comparison expresses an upper bound on its left side.
    #[inline]
    pub const fn is_upper_bound(self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::Le)
    }

    /// Whether this comparison expresses a lower bound on its left side.
    #[inline]
    pub const fn is_lower_bound(self) -> bool {
        matches!(self, CmpOp::Gt | CmpOp::Ge)
    }

    /// Whether the comparison is strict (`<` or `>`).
    #[inline]
    pub const fn is_strict(self) -> bool {
        matches!(self, CmpOp::Lt | CmpOp::Gt)
    }
}

/// Scalar conversion between integer widths or between int and float.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastKind {
    /// Sign-extend a narrow integer to a wider one.
    SignExtend { from: u8, to: u8 },
    /// Truncate a wide integer to a narrower one.
    Truncate { from: u8, to: u8 },
    /// Convert a machine-word integer to a double.
    IntToFloat,
    /// Convert a double to a machine-word integer.
    FloatToInt,
}

impl CastKind {
    /// Source byte size.
    #[inline]
    pub const fn from_bytes(self) -> u8 {
        match self {
            CastKind::SignExtend { from, .. } | CastKind::Truncate { from, .. } => from,
            CastKind::IntToFloat | CastKind::FloatToInt => 8,
        }
    }

    /// Destination byte size.
    #[inline]
    pub const fn to_bytes(self) -> u8 {
        match self {
            CastKind::SignExtend { to, .. } | CastKind::Truncate { to, .. } => to,
            CastKind::IntToFloat | CastKind::FloatToInt => 8,
        }
    }

    /// Size ratio between the wider and the narrower side.
    #[inline]
    pub const fn size_ratio(self) -> u8 {
        let from = self.from_bytes();
        let to = self.to_bytes();
        if from > to {
            from / to
        } else {
            to / from
        }
    }

    /// Whether the cast shrinks the value.
    #[inline]
    pub const fn is_narrowing(self) -> bool {
        self.to_bytes() < self.from_bytes()
    }
}

/// How an array access addresses memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Typed array element access; the index counts elements.
    Typed,
    /// Raw pointer access; the index counts bytes.
    Raw,
}

/// Deoptimization checkpoint kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GuardKind {
    /// Fail if the operand is false.
    True,
    /// Fail if the operand is true.
    False,
    /// Fail if the protected reference is null. Redefines the reference:
    /// later dereferences are ordered after this guard.
    NonNull,
    /// Fail if the nearest preceding overflow-capable operation overflowed.
    NoOverflow,
    /// Imaginary early-exit checkpoint at the head of the loop body.
    EarlyExit,
}

impl GuardKind {
    /// Whether the guard checks a boolean condition operand.
    #[inline]
    pub const fn is_condition_guard(self) -> bool {
        matches!(self, GuardKind::True | GuardKind::False)
    }
}

// =============================================================================
// Vector Operation Payloads
// =============================================================================

/// Lane layout of a vector value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VecShape {
    /// Byte size of one lane.
    pub element_size: u8,
    /// Number of lanes.
    pub lanes: u8,
}

impl VecShape {
    /// Create a new shape.
    #[inline]
    pub const fn new(element_size: u8, lanes: u8) -> Self {
        VecShape {
            element_size,
            lanes,
        }
    }

    /// Total byte size of the vector.
    #[inline]
    pub const fn bytes(self) -> u16 {
        self.element_size as u16 * self.lanes as u16
    }
}

/// Vector operation tags.
///
/// Mirrors the scalar opcodes lane-wise, plus the lane-assembly family
/// (`pack`/`unpack`/`expand`) the scheduler inserts while fusing packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VecOpKind {
    /// Contiguous vector load.
    Load(AccessKind, VecShape),
    /// Contiguous vector store.
    Store(AccessKind, VecShape),
    /// Lane-wise integer arithmetic.
    Int(IntBinOp, VecShape),
    /// Lane-wise float arithmetic.
    Float(FloatBinOp, VecShape),
    /// Lane-wise integer comparison producing a mask.
    Cmp(CmpOp, VecShape),
    /// Insert `count` lanes of the second operand into the first at `offset`.
    Pack {
        shape: VecShape,
        offset: u8,
        count: u8,
    },
    /// Extract `count` lanes starting at `offset`; `count == 1` yields a scalar.
    Unpack {
        shape: VecShape,
        offset: u8,
        count: u8,
    },
    /// Broadcast a scalar into every lane.
    Expand(VecShape),
    /// Lane-wise cast.
    Cast(CastKind, VecShape),
    /// Fail unless every mask lane is true.
    GuardTrue(VecShape),
    /// Fail unless every mask lane is false.
    GuardFalse(VecShape),
    /// Horizontal integer sum collapsing all lanes into a scalar.
    HorizontalAdd(VecShape),
}

impl VecOpKind {
    /// Lane layout of the operation's vector operand/result.
    #[inline]
    pub const fn shape(self) -> VecShape {
        match self {
            VecOpKind::Load(_, s)
            | VecOpKind::Store(_, s)
            | VecOpKind::Int(_, s)
            | VecOpKind::Float(_, s)
            | VecOpKind::Cmp(_, s)
            | VecOpKind::Pack { shape: s, .. }
            | VecOpKind::Unpack { shape: s, .. }
            | VecOpKind::Expand(s)
            | VecOpKind::Cast(_, s)
            | VecOpKind::GuardTrue(s)
            | VecOpKind::GuardFalse(s)
            | VecOpKind::HorizontalAdd(s) => s,
        }
    }
}

// =============================================================================
// OpKind
// =============================================================================

/// The closed set of trace opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Loop header carrying the live-in values.
    Label,
    /// Terminal back-jump carrying the live-out values.
    Jump,
    /// Integer constant.
    ConstInt(i64),
    /// Float constant (stored as bits so the op stays `Eq`/`Hash`).
    ConstFloat(u64),
    /// Pure integer arithmetic.
    IntOp(IntBinOp),
    /// Integer arithmetic that may overflow; must be followed by a
    /// `Guard(NoOverflow)` somewhere downstream.
    IntOpOvf(IntBinOp),
    /// Pure float arithmetic.
    FloatOp(FloatBinOp),
    /// Integer comparison producing a boolean integer.
    IntCmp(CmpOp),
    /// Scalar cast.
    Cast(CastKind),
    /// Array element load.
    Load(AccessKind),
    /// Array element store.
    Store(AccessKind),
    /// Deoptimization checkpoint.
    Guard(GuardKind),
    /// Vector operation.
    Vec(VecOpKind),
}

impl OpKind {
    /// Whether the operation has no side effects and touches no memory.
    #[inline]
    pub const fn is_pure(self) -> bool {
        matches!(
            self,
            OpKind::ConstInt(_)
                | OpKind::ConstFloat(_)
                | OpKind::IntOp(_)
                | OpKind::IntOpOvf(_)
                | OpKind::FloatOp(_)
                | OpKind::IntCmp(_)
                | OpKind::Cast(_)
        )
    }

    /// Whether the operation reads or writes array memory.
    #[inline]
    pub const fn is_memory(self) -> bool {
        matches!(
            self,
            OpKind::Load(_) | OpKind::Store(_) | OpKind::Vec(VecOpKind::Load(..) | VecOpKind::Store(..))
        )
    }

    /// Whether the operation writes memory.
    #[inline]
    pub const fn is_store(self) -> bool {
        matches!(self, OpKind::Store(_) | OpKind::Vec(VecOpKind::Store(..)))
    }

    /// Whether the operation is a guard.
    #[inline]
    pub const fn is_guard(self) -> bool {
        matches!(
            self,
            OpKind::Guard(_) | OpKind::Vec(VecOpKind::GuardTrue(_) | VecOpKind::GuardFalse(_))
        )
    }

    /// Whether the operation is a constant.
    #[inline]
    pub const fn is_constant(self) -> bool {
        matches!(self, OpKind::ConstInt(_) | OpKind::ConstFloat(_))
    }

    /// Whether the operation can raise an overflow condition.
    #[inline]
    pub const fn can_overflow(self) -> bool {
        matches!(self, OpKind::IntOpOvf(_))
    }

    /// Whether the operation is already a vector operation.
    #[inline]
    pub const fn is_vector(self) -> bool {
        matches!(self, OpKind::Vec(_))
    }

    /// The vector counterpart of this scalar opcode with the given shape,
    /// or `None` for opcodes that cannot be packed.
    pub fn vector_variant(self, shape: VecShape) -> Option<VecOpKind> {
        match self {
            OpKind::Load(access) => Some(VecOpKind::Load(access, shape)),
            OpKind::Store(access) => Some(VecOpKind::Store(access, shape)),
            OpKind::IntOp(op) => Some(VecOpKind::Int(op, shape)),
            OpKind::FloatOp(op) => Some(VecOpKind::Float(op, shape)),
            OpKind::IntCmp(op) => Some(VecOpKind::Cmp(op, shape)),
            OpKind::Cast(kind) => Some(VecOpKind::Cast(kind, shape)),
            OpKind::Guard(GuardKind::True) => Some(VecOpKind::GuardTrue(shape)),
            OpKind::Guard(GuardKind::False) => Some(VecOpKind::GuardFalse(shape)),
            // Overflow-checked arithmetic, constants, control and the
            // remaining guard kinds stay scalar.
            _ => None,
        }
    }

    /// Short mnemonic for display and logs.
    pub fn mnemonic(self) -> &'static str {
        match self {
            OpKind::Label => "label",
            OpKind::Jump => "jump",
            OpKind::ConstInt(_) => "const_int",
            OpKind::ConstFloat(_) => "const_float",
            OpKind::IntOp(IntBinOp::Add) => "int_add",
            OpKind::IntOp(IntBinOp::Sub) => "int_sub",
            OpKind::IntOp(IntBinOp::Mul) => "int_mul",
            OpKind::IntOp(IntBinOp::And) => "int_and",
            OpKind::IntOp(IntBinOp::Or) => "int_or",
            OpKind::IntOp(IntBinOp::Xor) => "int_xor",
            OpKind::IntOpOvf(IntBinOp::Add) => "int_add_ovf",
            OpKind::IntOpOvf(IntBinOp::Sub) => "int_sub_ovf",
            OpKind::IntOpOvf(IntBinOp::Mul) => "int_mul_ovf",
            OpKind::IntOpOvf(_) => "int_ovf",
            OpKind::FloatOp(FloatBinOp::Add) => "float_add",
            OpKind::FloatOp(FloatBinOp::Sub) => "float_sub",
            OpKind::FloatOp(FloatBinOp::Mul) => "float_mul",
            OpKind::FloatOp(FloatBinOp::Div) => "float_div",
            OpKind::IntCmp(CmpOp::Lt) => "int_lt",
            OpKind::IntCmp(CmpOp::Le) => "int_le",
            OpKind::IntCmp(CmpOp::Gt) => "int_gt",
            OpKind::IntCmp(CmpOp::Ge) => "int_ge",
            OpKind::IntCmp(CmpOp::Eq) => "int_eq",
            OpKind::IntCmp(CmpOp::Ne) => "int_ne",
            OpKind::Cast(CastKind::SignExtend { .. }) => "int_signext",
            OpKind::Cast(CastKind::Truncate { .. }) => "int_trunc",
            OpKind::Cast(CastKind::IntToFloat) => "cast_int_to_float",
            OpKind::Cast(CastKind::FloatToInt) => "cast_float_to_int",
            OpKind::Load(AccessKind::Typed) => "load",
            OpKind::Load(AccessKind::Raw) => "raw_load",
            OpKind::Store(AccessKind::Typed) => "store",
            OpKind::Store(AccessKind::Raw) => "raw_store",
            OpKind::Guard(GuardKind::True) => "guard_true",
            OpKind::Guard(GuardKind::False) => "guard_false",
            OpKind::Guard(GuardKind::NonNull) => "guard_nonnull",
            OpKind::Guard(GuardKind::NoOverflow) => "guard_no_overflow",
            OpKind::Guard(GuardKind::EarlyExit) => "guard_early_exit",
            OpKind::Vec(VecOpKind::Load(..)) => "vec_load",
            OpKind::Vec(VecOpKind::Store(..)) => "vec_store",
            OpKind::Vec(VecOpKind::Int(IntBinOp::Add, _)) => "vec_int_add",
            OpKind::Vec(VecOpKind::Int(IntBinOp::Sub, _)) => "vec_int_sub",
            OpKind::Vec(VecOpKind::Int(IntBinOp::Mul, _)) => "vec_int_mul",
            OpKind::Vec(VecOpKind::Int(..)) => "vec_int_bitop",
            OpKind::Vec(VecOpKind::Float(FloatBinOp::Add, _)) => "vec_float_add",
            OpKind::Vec(VecOpKind::Float(FloatBinOp::Sub, _)) => "vec_float_sub",
            OpKind::Vec(VecOpKind::Float(FloatBinOp::Mul, _)) => "vec_float_mul",
            OpKind::Vec(VecOpKind::Float(FloatBinOp::Div, _)) => "vec_float_div",
            OpKind::Vec(VecOpKind::Cmp(..)) => "vec_int_cmp",
            OpKind::Vec(VecOpKind::Pack { .. }) => "vec_pack",
            OpKind::Vec(VecOpKind::Unpack { .. }) => "vec_unpack",
            OpKind::Vec(VecOpKind::Expand(_)) => "vec_expand",
            OpKind::Vec(VecOpKind::Cast(..)) => "vec_cast",
            OpKind::Vec(VecOpKind::GuardTrue(_)) => "vec_guard_true",
            OpKind::Vec(VecOpKind::GuardFalse(_)) => "vec_guard_false",
            OpKind::Vec(VecOpKind::HorizontalAdd(_)) => "vec_hadd",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_inverted() {
        assert_eq!(CmpOp::Lt.inverted(), CmpOp::Ge);
        assert_eq!(CmpOp::Ge.inverted(), CmpOp::Lt);
        assert_eq!(CmpOp::Eq.inverted(), CmpOp::Ne);
        for cmp in [CmpOp::Lt, CmpOp::Le, CmpOp::Gt, CmpOp::Ge, CmpOp::Eq, CmpOp::Ne] {
            assert_eq!(cmp.inverted().inverted(), cmp);
        }
    }

    #[test]
    fn test_cmp_bound_direction() {
        assert!(CmpOp::Lt.is_upper_bound());
        assert!(CmpOp::Le.is_upper_bound());
        assert!(CmpOp::Gt.is_lower_bound());
        assert!(!CmpOp::Eq.is_upper_bound());
        assert!(!CmpOp::Eq.is_lower_bound());
    }

    #[test]
    fn test_cast_sizes() {
        let widen = CastKind::SignExtend { from: 2, to: 8 };
        assert_eq!(widen.size_ratio(), 4);
        assert!(!widen.is_narrowing());

        let narrow = CastKind::Truncate { from: 8, to: 2 };
        assert_eq!(narrow.size_ratio(), 4);
        assert!(narrow.is_narrowing());

        assert_eq!(CastKind::IntToFloat.size_ratio(), 1);
    }

    #[test]
    fn test_vec_shape_bytes() {
        assert_eq!(VecShape::new(8, 2).bytes(), 16);
        assert_eq!(VecShape::new(2, 8).bytes(), 16);
    }

    #[test]
    fn test_purity() {
        assert!(OpKind::IntOp(IntBinOp::Add).is_pure());
        assert!(OpKind::Cast(CastKind::IntToFloat).is_pure());
        assert!(!OpKind::Load(AccessKind::Typed).is_pure());
        assert!(!OpKind::Guard(GuardKind::True).is_pure());
        assert!(!OpKind::Jump.is_pure());
    }

    #[test]
    fn test_vector_variant() {
        let shape = VecShape::new(8, 2);
        assert_eq!(
            OpKind::IntOp(IntBinOp::Add).vector_variant(shape),
            Some(VecOpKind::Int(IntBinOp::Add, shape))
        );
        assert_eq!(
            OpKind::Guard(GuardKind::True).vector_variant(shape),
            Some(VecOpKind::GuardTrue(shape))
        );
        assert_eq!(OpKind::IntOpOvf(IntBinOp::Add).vector_variant(shape), None);
        assert_eq!(OpKind::Guard(GuardKind::NoOverflow).vector_variant(shape), None);
        assert_eq!(OpKind::Jump.vector_variant(shape), None);
    }

    #[test]
    fn test_vector_ops_not_repackable() {
        let shape = VecShape::new(8, 2);
        let vec_op = OpKind::Vec(VecOpKind::Int(IntBinOp::Add, shape));
        assert!(vec_op.is_vector());
        assert_eq!(vec_op.vector_variant(shape), None);
    }

    #[test]
    fn test_mnemonics() {
        assert_eq!(OpKind::Load(AccessKind::Raw).mnemonic(), "raw_load");
        assert_eq!(
            OpKind::Vec(VecOpKind::Load(AccessKind::Raw, VecShape::new(8, 2))).mnemonic(),
            "vec_load"
        );
        assert_eq!(format!("{}", OpKind::Guard(GuardKind::NoOverflow)), "guard_no_overflow");
    }
}
