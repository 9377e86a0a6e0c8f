//! Pack discovery: grouping isomorphic, independent operations.
//!
//! Packs start as pairs of adjacent memory accesses, grow along matching
//! operand positions of def-use and use-def chains, merge where one pack's
//! rightmost node is another's leftmost, and finally get sliced to the
//! vector register width. Under-full remainders are discarded and their
//! members demoted to low scalar scheduling priority.
//!
//! A pair may share a node with another pair (as its other end); the
//! left/right ends themselves are unique per node, which is what makes the
//! combine step converge to disjoint packs.

use crate::machine::MachineDescriptor;
use crate::trace::{IntBinOp, OpKind, Operation, ResultKind, ValueId, VecShape};
use crate::vectorize::dependency::{DependencyGraph, NodeId};
use crate::vectorize::{StructuralReason, VectorizeBail};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

// =============================================================================
// Pack
// =============================================================================

/// What a pack computes besides plain lane-parallel work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackKind {
    /// Lanes are mutually independent.
    Plain,
    /// Lanes form a loop-carried accumulation chain: each member feeds the
    /// next through the operand at `position`.
    Accum { op: IntBinOp, position: usize },
}

/// An ordered group of isomorphic operations fused into one vector op.
#[derive(Debug, Clone)]
pub struct Pack {
    nodes: SmallVec<[NodeId; 8]>,
    kind: PackKind,
}

impl Pack {
    /// Create a two-element pack.
    pub fn pair(left: NodeId, right: NodeId, kind: PackKind) -> Self {
        let mut nodes = SmallVec::new();
        nodes.push(left);
        nodes.push(right);
        Pack { nodes, kind }
    }

    /// Members in lane order.
    #[inline]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Number of lanes.
    #[inline]
    pub fn lanes(&self) -> usize {
        self.nodes.len()
    }

    /// What the pack computes.
    #[inline]
    pub fn kind(&self) -> PackKind {
        self.kind
    }

    /// First member.
    #[inline]
    pub fn leftmost(&self) -> NodeId {
        self.nodes[0]
    }

    /// Last member.
    #[inline]
    pub fn rightmost(&self) -> NodeId {
        self.nodes[self.nodes.len() - 1]
    }

    /// The operation of the first member; all members share its opcode.
    pub fn op<'t>(&self, graph: &DependencyGraph<'t>) -> &'t Operation {
        graph
            .op_of(self.leftmost())
            .expect("pack members wrap real operations")
    }

    /// Element byte size the pack operates on.
    pub fn element_size(&self, graph: &DependencyGraph<'_>) -> u8 {
        self.op(graph).pack_element_size()
    }

    /// Byte load relative to the vector register: `lanes * element_size -
    /// register width`. Positive packs must split, negative ones are
    /// under-full.
    pub fn load_bytes(&self, graph: &DependencyGraph<'_>, vec_reg_bytes: u8) -> i32 {
        self.lanes() as i32 * self.element_size(graph) as i32 - vec_reg_bytes as i32
    }

    /// Lane layout of the vector operation this pack becomes.
    pub fn shape(&self, graph: &DependencyGraph<'_>) -> VecShape {
        VecShape::new(self.element_size(graph), self.lanes() as u8)
    }

    fn split_off(&mut self, keep: usize) -> Pack {
        let rest = self.nodes.drain(keep..).collect();
        Pack {
            nodes: rest,
            kind: self.kind,
        }
    }
}

// =============================================================================
// Pack Slot
// =============================================================================

/// Position of a node inside the pack set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackSlot {
    /// Index of the pack.
    pub pack: usize,
    /// Lane within the pack.
    pub lane: usize,
}

// =============================================================================
// PackSet
// =============================================================================

/// All packs of one vectorization attempt, plus the register width they
/// were built for.
pub struct PackSet {
    packs: Vec<Pack>,
    node_to_pack: FxHashMap<NodeId, PackSlot>,
    vec_reg_bytes: u8,
}

impl PackSet {
    /// Discover packs for a dependency graph.
    ///
    /// Runs seed → extend → combine → split. Fails with the structural
    /// bail when no packs survive combining, when a merge would span
    /// incompatible reduction positions, or when a pack holds an opcode
    /// with no vector counterpart.
    pub fn build(
        graph: &mut DependencyGraph<'_>,
        machine: &MachineDescriptor,
    ) -> Result<Self, VectorizeBail> {
        let mut builder = PackSetBuilder::new(graph, machine);
        builder.seed();
        builder.extend();
        let packs = builder.combine()?;
        if packs.is_empty() {
            return Err(VectorizeBail::structural(StructuralReason::EmptyPackSet));
        }

        let mut set = PackSet {
            packs,
            node_to_pack: FxHashMap::default(),
            vec_reg_bytes: machine.vec_reg_bytes(),
        };
        set.split(graph, machine)?;
        if set.packs.is_empty() {
            return Err(VectorizeBail::structural(StructuralReason::EmptyPackSet));
        }
        set.index_members();
        Ok(set)
    }

    /// Slice oversized packs and discard under-full remainders.
    fn split(
        &mut self,
        graph: &mut DependencyGraph<'_>,
        machine: &MachineDescriptor,
    ) -> Result<(), VectorizeBail> {
        let mut kept = Vec::with_capacity(self.packs.len());
        let mut work: Vec<Pack> = std::mem::take(&mut self.packs);

        while let Some(mut pack) = work.pop() {
            let op = pack.op(graph);
            let element_size = pack.element_size(graph);
            if op.kind.vector_variant(VecShape::new(element_size, 2)).is_none() {
                return Err(VectorizeBail::structural(StructuralReason::UnsupportedOpcode));
            }
            let cap = machine.max_lanes(op.kind, element_size) as usize;

            if cap < 2 || pack.lanes() < cap {
                // Cannot fill a register: members fall back to scalar
                // scheduling at reduced priority.
                for &node in pack.nodes() {
                    graph.node_mut(node).priority = -1;
                }
                continue;
            }
            if pack.lanes() > cap {
                let rest = pack.split_off(cap);
                work.push(rest);
            }
            debug_assert!(pack.load_bytes(graph, self.vec_reg_bytes) <= 0);
            kept.push(pack);
        }

        // Restore deterministic order after the worklist shuffle.
        kept.sort_by_key(|pack| pack.leftmost());
        self.packs = kept;
        Ok(())
    }

    fn index_members(&mut self) {
        for (pack_index, pack) in self.packs.iter().enumerate() {
            for (lane, &node) in pack.nodes().iter().enumerate() {
                let previous = self.node_to_pack.insert(
                    node,
                    PackSlot {
                        pack: pack_index,
                        lane,
                    },
                );
                debug_assert!(previous.is_none(), "node {:?} landed in two packs", node);
            }
        }
    }

    /// Register width the packs were built for.
    #[inline]
    pub fn vec_reg_bytes(&self) -> u8 {
        self.vec_reg_bytes
    }

    /// All packs.
    #[inline]
    pub fn packs(&self) -> &[Pack] {
        &self.packs
    }

    /// Number of packs.
    #[inline]
    pub fn len(&self) -> usize {
        self.packs.len()
    }

    /// Whether no packs exist.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.packs.is_empty()
    }

    /// Pack and lane of a node.
    #[inline]
    pub fn slot_of(&self, node: NodeId) -> Option<PackSlot> {
        self.node_to_pack.get(&node).copied()
    }

    /// The pack containing a node.
    pub fn pack_of(&self, node: NodeId) -> Option<&Pack> {
        self.slot_of(node).map(|slot| &self.packs[slot.pack])
    }

    /// Dissolve a pack, returning its members to scalar scheduling.
    ///
    /// Used by the scheduler when a pack turns out to be unschedulable.
    pub fn invalidate(&mut self, pack_index: usize, graph: &mut DependencyGraph<'_>) {
        let pack = std::mem::replace(
            &mut self.packs[pack_index],
            Pack {
                nodes: SmallVec::new(),
                kind: PackKind::Plain,
            },
        );
        for &node in pack.nodes() {
            self.node_to_pack.remove(&node);
            graph.node_mut(node).priority = -1;
        }
    }
}

impl std::fmt::Debug for PackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackSet")
            .field("packs", &self.packs.len())
            .field("vec_reg_bytes", &self.vec_reg_bytes)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

struct PackSetBuilder<'g, 't, 'm> {
    graph: &'g DependencyGraph<'t>,
    machine: &'m MachineDescriptor,
    /// Current definition node of every value.
    defs: FxHashMap<ValueId, NodeId>,
    /// Users of every value with the operand position used.
    uses: FxHashMap<ValueId, SmallVec<[(NodeId, usize); 4]>>,
    pairs: Vec<Pack>,
    /// Nodes already serving as a pair's left / right end.
    as_left: FxHashMap<NodeId, usize>,
    as_right: FxHashMap<NodeId, usize>,
}

impl<'g, 't, 'm> PackSetBuilder<'g, 't, 'm> {
    fn new(graph: &'g DependencyGraph<'t>, machine: &'m MachineDescriptor) -> Self {
        let mut defs = FxHashMap::default();
        let mut uses: FxHashMap<ValueId, SmallVec<[(NodeId, usize); 4]>> = FxHashMap::default();

        for id in graph.node_ids() {
            let Some(op) = graph.op_of(id) else { continue };
            if op.result.is_valid() {
                defs.insert(op.result, id);
            }
            if matches!(op.kind, OpKind::Label | OpKind::Jump) {
                continue;
            }
            for (position, &arg) in op.args.iter().enumerate() {
                uses.entry(arg).or_default().push((id, position));
            }
        }

        PackSetBuilder {
            graph,
            machine,
            defs,
            uses,
            pairs: Vec::new(),
            as_left: FxHashMap::default(),
            as_right: FxHashMap::default(),
        }
    }

    /// Seed pairs from adjacent memory references.
    fn seed(&mut self) {
        let memory_nodes: Vec<NodeId> = self
            .graph
            .node_ids()
            .filter(|&id| self.graph.memory_ref(id).is_some())
            .collect();

        for (i, &a) in memory_nodes.iter().enumerate() {
            for &b in &memory_nodes[i + 1..] {
                let (mem_a, mem_b) = (
                    self.graph.memory_ref(a).unwrap(),
                    self.graph.memory_ref(b).unwrap(),
                );
                // Lane order follows memory order, not trace order.
                if mem_a.is_adjacent_after(mem_b) {
                    self.try_pair(a, b);
                } else if mem_b.is_adjacent_after(mem_a) {
                    self.try_pair(b, a);
                }
            }
        }
    }

    /// Grow the pair set along operand chains until nothing new appears.
    fn extend(&mut self) {
        let mut cursor = 0;
        while cursor < self.pairs.len() {
            let left = self.pairs[cursor].leftmost();
            let right = self.pairs[cursor].rightmost();
            self.follow_use_defs(left, right);
            self.follow_def_uses(left, right);
            cursor += 1;
        }
    }

    /// Pack the defining operations of matching operand positions.
    fn follow_use_defs(&mut self, left: NodeId, right: NodeId) {
        let left_op = self.graph.op_of(left).expect("pack member");
        let right_op = self.graph.op_of(right).expect("pack member");
        for position in 0..left_op.args.len().min(right_op.args.len()) {
            let Some(&left_def) = self.defs.get(&left_op.args[position]) else {
                continue;
            };
            let Some(&right_def) = self.defs.get(&right_op.args[position]) else {
                continue;
            };
            self.try_pair(left_def, right_def);
        }
    }

    /// Pack users consuming the pair's results at the same position.
    fn follow_def_uses(&mut self, left: NodeId, right: NodeId) {
        let left_result = self.graph.op_of(left).expect("pack member").result;
        let right_result = self.graph.op_of(right).expect("pack member").result;
        if !left_result.is_valid() || !right_result.is_valid() {
            return;
        }
        let left_uses = self.uses.get(&left_result).cloned().unwrap_or_default();
        let right_uses = self.uses.get(&right_result).cloned().unwrap_or_default();
        for &(left_user, left_pos) in &left_uses {
            for &(right_user, right_pos) in &right_uses {
                if left_pos == right_pos {
                    self.try_pair(left_user, right_user);
                }
            }
        }
    }

    /// Create the pair `(left, right)` if every packing rule allows it.
    fn try_pair(&mut self, left: NodeId, right: NodeId) {
        if left == right {
            return;
        }
        if self.as_left.contains_key(&left) || self.as_right.contains_key(&right) {
            return;
        }
        let Some(left_op) = self.graph.op_of(left) else { return };
        let Some(right_op) = self.graph.op_of(right) else { return };
        if !isomorphic(left_op, right_op) {
            return;
        }
        if let Some(descr) = left_op.descr {
            // Pointer-typed arrays are outside the affine model.
            if !descr.is_primitive {
                return;
            }
        }
        let element_size = left_op.pack_element_size();
        if left_op.kind.vector_variant(VecShape::new(element_size, 2)).is_none() {
            return;
        }
        if !self.machine.allows_pack(left_op.kind, 2, element_size) {
            return;
        }

        // Guard order alone does not keep two guards apart; the fused
        // guard fails at the earlier position.
        let independent = if left_op.is_guard() {
            self.graph.independent_ignoring_guard_order(left, right)
        } else {
            self.graph.independent(left, right)
        };
        let kind = if independent {
            PackKind::Plain
        } else if let Some(position) = self.accumulates(left, right) {
            PackKind::Accum {
                op: accum_operator(left_op.kind).expect("checked by accumulates"),
                position,
            }
        } else {
            return;
        };

        let index = self.pairs.len();
        self.pairs.push(Pack::pair(left, right, kind));
        self.as_left.insert(left, index);
        self.as_right.insert(right, index);
    }

    /// Whether `(left, right)` is a packable accumulation link: integer
    /// addition on machine words, `right` consuming `left`'s result at some
    /// operand position, and that consumption being the only use of the
    /// value. Floating-point chains stay scalar: reassociating them would
    /// change rounding.
    fn accumulates(&self, left: NodeId, right: NodeId) -> Option<usize> {
        let left_op = self.graph.op_of(left)?;
        let right_op = self.graph.op_of(right)?;
        accum_operator(left_op.kind)?;
        if left_op.result_kind != ResultKind::Int || left_op.pack_element_size() != 8 {
            return None;
        }
        let position = right_op
            .args
            .iter()
            .position(|&arg| arg == left_op.result)?;
        // Intermediate partial sums are rewritten lane-wise, so nothing but
        // the chain itself may observe them.
        let sole_consumer = self
            .graph
            .node(left)
            .forward
            .iter()
            .filter(|edge| edge.cause == left_op.result)
            .all(|edge| edge.to == right);
        if !sole_consumer {
            return None;
        }
        Some(position)
    }

    /// Merge chained pairs until stable.
    fn combine(mut self) -> Result<Vec<Pack>, VectorizeBail> {
        let mut packs = std::mem::take(&mut self.pairs);
        loop {
            let mut merged_at = None;
            'scan: for i in 0..packs.len() {
                for j in 0..packs.len() {
                    if i != j && packs[i].rightmost() == packs[j].leftmost() {
                        merged_at = Some((i, j));
                        break 'scan;
                    }
                }
            }
            let Some((i, j)) = merged_at else { break };

            let kind = merge_kinds(packs[i].kind(), packs[j].kind())?;
            let tail: SmallVec<[NodeId; 8]> = packs[j].nodes()[1..].iter().copied().collect();
            packs[i].nodes.extend(tail);
            packs[i].kind = kind;
            packs.swap_remove(j);
        }
        packs.sort_by_key(|pack| pack.leftmost());
        Ok(packs)
    }
}

/// Whether two operations may share a pack lane-wise.
fn isomorphic(a: &Operation, b: &Operation) -> bool {
    a.kind == b.kind
        && a.result_kind == b.result_kind
        && a.descr == b.descr
        && a.args.len() == b.args.len()
}

/// The reduction operator of an opcode, when reduction supports it.
fn accum_operator(kind: OpKind) -> Option<IntBinOp> {
    match kind {
        OpKind::IntOp(IntBinOp::Add) => Some(IntBinOp::Add),
        _ => None,
    }
}

fn merge_kinds(a: PackKind, b: PackKind) -> Result<PackKind, VectorizeBail> {
    match (a, b) {
        (PackKind::Plain, PackKind::Plain) => Ok(PackKind::Plain),
        (
            PackKind::Accum {
                op: op_a,
                position: pos_a,
            },
            PackKind::Accum {
                op: op_b,
                position: pos_b,
            },
        ) if op_a == op_b && pos_a == pos_b => Ok(a),
        _ => Err(VectorizeBail::structural(
            StructuralReason::MixedReductionPositions,
        )),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{AccessKind, ArrayDescriptor, IntBinOp, ResultKind, Trace, TraceBuilder};

    /// `count` adjacent raw loads of `element_size` bytes each.
    fn adjacent_loads(count: usize, element_size: u8) -> Trace {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(element_size);
        let mut index = i;
        for step in 0..count {
            b.load(AccessKind::Raw, ResultKind::Int, p, index, descr);
            if step + 1 < count {
                let stride = b.const_int(element_size as i64);
                index = b.int_op(IntBinOp::Add, index, stride);
            }
        }
        b.finish(&[p, i])
    }

    fn build(trace: &Trace, machine: &MachineDescriptor) -> Result<PackSet, VectorizeBail> {
        let mut graph = DependencyGraph::build(trace);
        PackSet::build(&mut graph, machine)
    }

    #[test]
    fn test_pair_of_adjacent_word_loads() {
        let trace = adjacent_loads(2, 8);
        let set = build(&trace, &MachineDescriptor::sse128()).expect("packable");
        assert_eq!(set.len(), 1);
        let pack = &set.packs()[0];
        assert_eq!(pack.lanes(), 2);
        assert_eq!(pack.kind(), PackKind::Plain);
    }

    #[test]
    fn test_chain_combines_and_splits() {
        // Scenario: 9 two-byte loads against a 16-byte register. Pairs
        // (1,2)..(8,9) chain-combine into one 9-wide pack, which splits
        // into a full 8-wide pack plus a discarded 1-wide leftover.
        let trace = adjacent_loads(9, 2);
        let mut graph = DependencyGraph::build(&trace);
        let set = PackSet::build(&mut graph, &MachineDescriptor::sse128()).expect("packable");

        assert_eq!(set.len(), 1);
        let pack = &set.packs()[0];
        assert_eq!(pack.lanes(), 8);
        assert_eq!(pack.load_bytes(&graph, 16), 0);

        // The leftover load was demoted for scalar scheduling.
        let demoted: Vec<_> = graph
            .node_ids()
            .filter(|&id| graph.node(id).priority < 0)
            .collect();
        assert_eq!(demoted.len(), 1);
        assert!(set.slot_of(demoted[0]).is_none());
    }

    #[test]
    fn test_no_memory_refs_is_structural_bail() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        let one = b.const_int(1);
        let j = b.int_op(IntBinOp::Add, i, one);
        let trace = b.finish(&[j]);
        let err = build(&trace, &MachineDescriptor::sse128()).unwrap_err();
        assert_eq!(
            err,
            VectorizeBail::structural(StructuralReason::EmptyPackSet)
        );
    }

    #[test]
    fn test_extension_packs_arithmetic_users() {
        // Two adjacent loads each feeding an add with the same constant:
        // the adds pack via def-use extension.
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x0 = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let eight = b.const_int(8);
        let i1 = b.int_op(IntBinOp::Add, i, eight);
        let x1 = b.load(AccessKind::Raw, ResultKind::Int, p, i1, descr);
        let k = b.const_int(3);
        let y0 = b.int_op(IntBinOp::Mul, x0, k);
        let y1 = b.int_op(IntBinOp::Mul, x1, k);
        let _ = (y0, y1);
        let trace = b.finish(&[p, i]);

        let set = build(&trace, &MachineDescriptor::new(16)).expect("packable");
        let kinds: Vec<OpKind> = {
            let graph = DependencyGraph::build(&trace);
            set.packs().iter().map(|p| p.op(&graph).kind).collect()
        };
        assert!(kinds.contains(&OpKind::Load(AccessKind::Raw)));
        assert!(kinds.contains(&OpKind::IntOp(IntBinOp::Mul)));
    }

    #[test]
    fn test_machine_restriction_rejects_wide_mul() {
        // 8-byte lane multiplies are not expressible on the SSE-class
        // machine, so only the load pair packs.
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x0 = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let eight = b.const_int(8);
        let i1 = b.int_op(IntBinOp::Add, i, eight);
        let x1 = b.load(AccessKind::Raw, ResultKind::Int, p, i1, descr);
        let three = b.const_int(3);
        let _y0 = b.int_op(IntBinOp::Mul, x0, three);
        let _y1 = b.int_op(IntBinOp::Mul, x1, three);
        let trace = b.finish(&[p, i]);

        let set = build(&trace, &MachineDescriptor::sse128()).expect("loads still pack");
        let graph = DependencyGraph::build(&trace);
        for pack in set.packs() {
            assert_eq!(pack.op(&graph).kind, OpKind::Load(AccessKind::Raw));
        }
    }

    #[test]
    fn test_accumulation_pair() {
        // acc1 = acc0 + x0; acc2 = acc1 + x1 — a reduction chain at
        // operand position 0.
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let acc0 = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x0 = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let eight = b.const_int(8);
        let i1 = b.int_op(IntBinOp::Add, i, eight);
        let x1 = b.load(AccessKind::Raw, ResultKind::Int, p, i1, descr);
        let acc1 = b.int_op(IntBinOp::Add, acc0, x0);
        let acc2 = b.int_op(IntBinOp::Add, acc1, x1);
        let trace = b.finish(&[p, i, acc2]);

        let set = build(&trace, &MachineDescriptor::sse128()).expect("packable");
        let graph = DependencyGraph::build(&trace);
        let accum = set
            .packs()
            .iter()
            .find(|pack| matches!(pack.kind(), PackKind::Accum { .. }))
            .expect("reduction pack");
        assert_eq!(
            accum.kind(),
            PackKind::Accum {
                op: IntBinOp::Add,
                position: 0
            }
        );
        assert_eq!(accum.op(&graph).kind, OpKind::IntOp(IntBinOp::Add));
    }

    #[test]
    fn test_float_reduction_stays_scalar() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let acc0 = b.live_in(ResultKind::Float);
        let descr = ArrayDescriptor::primitive(8);
        let x0 = b.load(AccessKind::Raw, ResultKind::Float, p, i, descr);
        let eight = b.const_int(8);
        let i1 = b.int_op(IntBinOp::Add, i, eight);
        let x1 = b.load(AccessKind::Raw, ResultKind::Float, p, i1, descr);
        let acc1 = b.float_op(crate::trace::FloatBinOp::Add, acc0, x0);
        let acc2 = b.float_op(crate::trace::FloatBinOp::Add, acc1, x1);
        let trace = b.finish(&[p, i, acc2]);

        let set = build(&trace, &MachineDescriptor::sse128()).expect("loads pack");
        let graph = DependencyGraph::build(&trace);
        for pack in set.packs() {
            assert_eq!(pack.kind(), PackKind::Plain);
            assert!(pack.op(&graph).kind.is_memory());
        }
    }

    #[test]
    fn test_invalidate_returns_members_to_scalar() {
        let trace = adjacent_loads(2, 8);
        let mut graph = DependencyGraph::build(&trace);
        let mut set = PackSet::build(&mut graph, &MachineDescriptor::sse128()).expect("packable");
        let members: Vec<NodeId> = set.packs()[0].nodes().to_vec();

        set.invalidate(0, &mut graph);
        for node in members {
            assert!(set.slot_of(node).is_none());
            assert!(graph.node(node).priority < 0);
        }
    }
}
