//! Target machine description for vectorization.
//!
//! The vectorizer only needs two facts about the target: how wide its vector
//! registers are, and which opcodes carry lane-count or element-width
//! restrictions. Everything else (encodings, register files) belongs to the
//! backend.

use crate::trace::{IntBinOp, OpKind};
use rustc_hash::FxHashMap;

// =============================================================================
// Per-Opcode Restriction
// =============================================================================

/// Restriction an instruction set places on one vector opcode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpRestrict {
    /// Upper bound on lane count, if the target cannot fill a register.
    pub max_lanes: Option<u8>,
    /// Largest element byte size the opcode supports; wider elements would
    /// need a pre-cast the pack builder refuses to synthesize.
    pub max_element_size: Option<u8>,
}

impl OpRestrict {
    /// Restriction capping only the lane count.
    pub const fn lanes(max_lanes: u8) -> Self {
        OpRestrict {
            max_lanes: Some(max_lanes),
            max_element_size: None,
        }
    }

    /// Restriction capping only the element width.
    pub const fn element_size(max_element_size: u8) -> Self {
        OpRestrict {
            max_lanes: None,
            max_element_size: Some(max_element_size),
        }
    }

    /// Whether a pack of `lanes` lanes of `element_size` bytes is allowed.
    pub fn allows(&self, lanes: u8, element_size: u8) -> bool {
        if let Some(max) = self.max_lanes {
            if lanes > max {
                return false;
            }
        }
        if let Some(max) = self.max_element_size {
            if element_size > max {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Machine Descriptor
// =============================================================================

/// Vector capabilities of the compilation target.
#[derive(Debug, Clone)]
pub struct MachineDescriptor {
    /// Vector register width in bytes. Zero disables vectorization.
    vec_reg_bytes: u8,
    /// Opcode-specific restrictions.
    restrictions: FxHashMap<OpKind, OpRestrict>,
}

impl MachineDescriptor {
    /// Create a descriptor with no opcode restrictions.
    pub fn new(vec_reg_bytes: u8) -> Self {
        MachineDescriptor {
            vec_reg_bytes,
            restrictions: FxHashMap::default(),
        }
    }

    /// 128-bit SSE-class target.
    ///
    /// 64-bit lane multiplies are not available, so packed multiplies are
    /// limited to 32-bit elements.
    pub fn sse128() -> Self {
        let mut machine = Self::new(16);
        machine.restrict(OpKind::IntOp(IntBinOp::Mul), OpRestrict::element_size(4));
        machine
    }

    /// 256-bit AVX2-class target.
    pub fn avx256() -> Self {
        let mut machine = Self::new(32);
        machine.restrict(OpKind::IntOp(IntBinOp::Mul), OpRestrict::element_size(4));
        machine
    }

    /// Register width in bytes.
    #[inline]
    pub fn vec_reg_bytes(&self) -> u8 {
        self.vec_reg_bytes
    }

    /// Register a restriction for an opcode.
    pub fn restrict(&mut self, kind: OpKind, restrict: OpRestrict) {
        self.restrictions.insert(kind, restrict);
    }

    /// Restriction for an opcode, if any.
    #[inline]
    pub fn restriction(&self, kind: OpKind) -> Option<&OpRestrict> {
        self.restrictions.get(&kind)
    }

    /// Whether a pack of `lanes` × `element_size` of the given opcode is
    /// expressible on this target.
    pub fn allows_pack(&self, kind: OpKind, lanes: u8, element_size: u8) -> bool {
        match self.restrictions.get(&kind) {
            Some(restrict) => restrict.allows(lanes, element_size),
            None => true,
        }
    }

    /// Lane cap for an opcode given its element size (register width by
    /// default, tightened by any restriction).
    pub fn max_lanes(&self, kind: OpKind, element_size: u8) -> u8 {
        if element_size == 0 || self.vec_reg_bytes == 0 {
            return 0;
        }
        let natural = self.vec_reg_bytes / element_size;
        match self.restrictions.get(&kind).and_then(|r| r.max_lanes) {
            Some(max) => natural.min(max),
            None => natural,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
