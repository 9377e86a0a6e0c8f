//! Dependency-respecting emission with lane bookkeeping.
//!
//! The scheduler walks the dependency graph in priority order and rebuilds
//! the operation list. In vector mode, a node belonging to a complete pack
//! triggers atomic emission of the whole pack as one vector operation:
//! operand vectors are reused at the right lane offset, cropped, gathered
//! from scattered values, or synthesized by a memoized scalar expansion.
//! Pure operations that may be dead after vectorization are parked on a
//! delay list and materialized lazily when a consumer needs them — or
//! never, which is how dead scalar leftovers disappear.
//!
//! A non-empty worklist with no ready node and no pack left to invalidate
//! is a dependency-construction defect and panics.

use crate::trace::{
    OpKind, Operation, ResultKind, Trace, ValueId, VecOpKind, VecShape,
};
use crate::vectorize::cost::SavingsCounter;
use crate::vectorize::dependency::{DependencyGraph, NodeFlags, NodeId};
use crate::vectorize::packset::{Pack, PackKind, PackSet};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

// =============================================================================
// Result
// =============================================================================

/// Output of one scheduling run.
#[derive(Debug)]
pub struct ScheduleResult {
    /// Invariant operations to place once before the label.
    pub prefix: Vec<Operation>,
    /// The rescheduled operation list, label first, jump last.
    pub ops: Vec<Operation>,
    /// Kinds of the values minted during scheduling, appended to the
    /// trace's value table.
    pub new_value_kinds: Vec<ResultKind>,
    /// Scalar operations folded into vector operations.
    pub ops_vectorized: usize,
}

impl ScheduleResult {
    /// Assemble the scheduled body into a trace, extending the value table.
    pub fn into_trace(self, original: &Trace) -> Trace {
        let mut kinds = original.value_kinds().to_vec();
        kinds.extend(self.new_value_kinds);
        Trace::from_parts(self.ops, kinds, original.next_resume())
    }
}

// =============================================================================
// Rename Slots
// =============================================================================

/// Where a scheduled value now lives.
#[derive(Debug, Clone, Copy)]
enum Slot {
    /// Replaced by another scalar value.
    Scalar(ValueId),
    /// Lane of a vector value.
    Lane {
        vec: ValueId,
        lane: u8,
        shape: VecShape,
    },
}

// =============================================================================
// Scheduler
// =============================================================================

/// Priority classes: guards first, then their comparison inputs, then pure
/// arithmetic, then everything else. Demoted pack leftovers stay below all
/// of them. Ties break by original position.
const PRIORITY_GUARD: i32 = 10;
const PRIORITY_GUARD_INPUT: i32 = 7;
const PRIORITY_PURE: i32 = 5;

/// One scheduling run over a dependency graph.
pub struct Scheduler<'a, 't> {
    graph: &'a mut DependencyGraph<'t>,
    packs: Option<&'a mut PackSet>,
    counter: Option<&'a mut SavingsCounter>,
    /// Defining node of every value.
    defs: FxHashMap<ValueId, NodeId>,
    /// Values produced by constant operations.
    constants: FxHashSet<ValueId>,
    renames: FxHashMap<ValueId, Slot>,
    /// Memoized lane extractions, keyed by vector value and lane.
    extracts: FxHashMap<(ValueId, u8), ValueId>,
    /// Memoized scalar-to-vector expansions.
    expands: FxHashMap<(ValueId, VecShape), ValueId>,
    /// Pending horizontal reductions: (chain tail, vector, shape).
    accum_flushes: Vec<(ValueId, ValueId, VecShape)>,
    prefix: Vec<Operation>,
    out: Vec<Operation>,
    next_value: u32,
    new_kinds: Vec<ResultKind>,
    ops_vectorized: usize,
}

impl<'a, 't> Scheduler<'a, 't> {
    /// Scheduler that turns complete packs into vector operations.
    pub fn vector(
        graph: &'a mut DependencyGraph<'t>,
        packs: &'a mut PackSet,
        counter: &'a mut SavingsCounter,
    ) -> Self {
        Self::new(graph, Some(packs), Some(counter))
    }

    /// Dependency-only scheduler: reorders nothing semantically, but drops
    /// pure operations nobody consumes.
    pub fn scalar(graph: &'a mut DependencyGraph<'t>) -> Self {
        Self::new(graph, None, None)
    }

    fn new(
        graph: &'a mut DependencyGraph<'t>,
        packs: Option<&'a mut PackSet>,
        counter: Option<&'a mut SavingsCounter>,
    ) -> Self {
        let next_value = graph.trace().value_count() as u32;
        let mut defs = FxHashMap::default();
        let mut constants = FxHashSet::default();

        let label = NodeId::new(0);
        for &live_in in graph.trace().live_ins() {
            defs.insert(live_in, label);
        }
        for id in graph.node_ids() {
            if let Some(op) = graph.op_of(id) {
                if op.result.is_valid() {
                    defs.insert(op.result, id);
                    if op.kind.is_constant() {
                        constants.insert(op.result);
                    }
                }
            }
        }

        Scheduler {
            graph,
            packs,
            counter,
            defs,
            constants,
            renames: FxHashMap::default(),
            extracts: FxHashMap::default(),
            expands: FxHashMap::default(),
            accum_flushes: Vec::new(),
            prefix: Vec::new(),
            out: Vec::new(),
            next_value,
            new_kinds: Vec::new(),
            ops_vectorized: 0,
        }
    }

    /// Run to completion and return the rebuilt operation list.
    pub fn run(mut self) -> ScheduleResult {
        self.assign_priorities();

        let label = NodeId::new(0);
        let jump = NodeId::new(self.graph.trace().len() as u32 - 1);
        self.out.push(self.graph.trace().ops()[0].clone());
        self.graph.node_mut(label).flags.insert(NodeFlags::EMITTED);
        let early_exit = self.graph.early_exit();
        self.graph.node_mut(early_exit).flags.insert(NodeFlags::EMITTED);

        let mut skipped: FxHashSet<NodeId> = FxHashSet::default();
        while !self.all_settled(jump) {
            match self.pick_ready(&skipped, jump) {
                Some(node) => {
                    let slot = self.packs.as_ref().and_then(|p| p.slot_of(node));
                    match slot {
                        Some(slot) if self.pack_ready(slot.pack) => {
                            self.emit_pack(slot.pack);
                            skipped.clear();
                        }
                        Some(slot) => {
                            // Pack not jointly ready yet; let other nodes
                            // make progress first.
                            let _ = slot;
                            skipped.insert(node);
                        }
                        None => {
                            self.emit_scalar(node);
                            skipped.clear();
                        }
                    }
                }
                None => {
                    let stuck = skipped
                        .iter()
                        .find_map(|&node| self.packs.as_ref().and_then(|p| p.slot_of(node)));
                    match stuck {
                        Some(slot) => {
                            let packs = self.packs.as_deref_mut().expect("vector mode");
                            packs.invalidate(slot.pack, &mut *self.graph);
                            skipped.clear();
                        }
                        None => panic!(
                            "scheduler deadlock: unemitted operations remain but none is ready"
                        ),
                    }
                }
            }
        }

        self.flush_accumulators();
        self.emit_jump(jump);

        ScheduleResult {
            prefix: self.prefix,
            ops: self.out,
            new_value_kinds: self.new_kinds,
            ops_vectorized: self.ops_vectorized,
        }
    }

    // =========================================================================
    // Readiness
    // =========================================================================

    fn assign_priorities(&mut self) {
        let guard_ids: Vec<NodeId> = self.graph.guards().to_vec();
        for id in self.graph.node_ids().collect::<Vec<_>>() {
            let Some(op) = self.graph.op_of(id) else { continue };
            if self.graph.node(id).priority < 0 {
                continue; // demoted pack leftovers stay low
            }
            let priority = if op.is_guard() {
                PRIORITY_GUARD
            } else if op.is_pure() {
                PRIORITY_PURE
            } else {
                0
            };
            self.graph.node_mut(id).priority = priority;
        }
        // Comparison inputs of guards cluster right below the guards so
        // deopt checks land next to the label after reordering.
        for guard in guard_ids {
            let inputs: Vec<NodeId> = self
                .graph
                .node(guard)
                .backward
                .iter()
                .filter(|edge| edge.cause.is_valid() && !edge.failarg_only)
                .map(|edge| edge.to)
                .collect();
            for input in inputs {
                let node = self.graph.node_mut(input);
                if node.priority >= 0 && node.priority < PRIORITY_GUARD_INPUT {
                    node.priority = PRIORITY_GUARD_INPUT;
                }
            }
        }
    }

    fn settled(&self, id: NodeId) -> bool {
        self.graph
            .node(id)
            .flags
            .intersects(NodeFlags::EMITTED | NodeFlags::DELAYED)
    }

    fn all_settled(&self, jump: NodeId) -> bool {
        self.graph
            .node_ids()
            .all(|id| id == jump || !self.graph.node(id).is_real() || self.settled(id))
    }

    fn is_ready(&self, id: NodeId) -> bool {
        self.graph
            .node(id)
            .backward
            .iter()
            .all(|edge| self.settled(edge.to))
    }

    fn pick_ready(&self, skipped: &FxHashSet<NodeId>, jump: NodeId) -> Option<NodeId> {
        let mut best: Option<(i32, NodeId)> = None;
        for id in self.graph.node_ids() {
            if id == jump
                || !self.graph.node(id).is_real()
                || self.settled(id)
                || skipped.contains(&id)
                || !self.is_ready(id)
            {
                continue;
            }
            let priority = self.graph.node(id).priority;
            let better = match best {
                None => true,
                Some((best_priority, best_id)) => {
                    priority > best_priority || (priority == best_priority && id < best_id)
                }
            };
            if better {
                best = Some((priority, id));
            }
        }
        best.map(|(_, id)| id)
    }

    /// Whether every member's out-of-pack dependencies are settled.
    fn pack_ready(&self, pack_index: usize) -> bool {
        let packs = self.packs.as_ref().expect("vector mode");
        let pack = &packs.packs()[pack_index];
        pack.nodes().iter().all(|&member| {
            self.graph.node(member).backward.iter().all(|edge| {
                pack.nodes().contains(&edge.to) || self.settled(edge.to)
            })
        })
    }

    // =========================================================================
    // Scalar Emission
    // =========================================================================

    fn emit_scalar(&mut self, node: NodeId) {
        let op = self.graph.op_of(node).expect("real node");
        if op.is_pure() {
            // Possibly dead after vectorization; resolve lazily.
            self.graph.node_mut(node).flags.insert(NodeFlags::DELAYED);
            return;
        }
        self.materialize(node);
    }

    /// Emit a scalar operation now, pulling in delayed producers first.
    fn materialize(&mut self, node: NodeId) {
        let flags = &mut self.graph.node_mut(node).flags;
        flags.remove(NodeFlags::DELAYED);
        flags.insert(NodeFlags::EMITTED);

        let mut copy = self.graph.op_of(node).expect("real node").clone();
        for i in 0..copy.args.len() {
            copy.args[i] = self.resolve_scalar(copy.args[i]);
        }
        if let Some(guard) = copy.guard.as_deref_mut() {
            let mut fail_args = std::mem::take(&mut guard.fail_args);
            for arg in fail_args.iter_mut() {
                *arg = self.resolve_fail_arg(*arg);
            }
            guard.fail_args = fail_args;
        }
        self.out.push(copy);
    }

    /// Force a delayed producer of `value` into the output.
    fn ensure_emitted(&mut self, value: ValueId) {
        if let Some(&node) = self.defs.get(&value) {
            if self.graph.node(node).flags.contains(NodeFlags::DELAYED) {
                self.materialize(node);
            }
        }
    }

    fn resolve_scalar(&mut self, value: ValueId) -> ValueId {
        self.ensure_emitted(value);
        match self.renames.get(&value).copied() {
            None => value,
            Some(Slot::Scalar(scalar)) => scalar,
            Some(Slot::Lane { vec, lane, shape }) => {
                let kind = self.value_kind(value);
                self.extract_lane(vec, lane, shape, kind)
            }
        }
    }

    /// Fail-args reconstruct interpreter state: a lane-resident value is
    /// extracted right before the guard, but a rename is never allowed to
    /// substitute a compile-time constant for the recorded value.
    fn resolve_fail_arg(&mut self, value: ValueId) -> ValueId {
        self.ensure_emitted(value);
        match self.renames.get(&value).copied() {
            None => value,
            Some(Slot::Scalar(scalar)) => {
                if self.constants.contains(&scalar) {
                    value
                } else {
                    scalar
                }
            }
            Some(Slot::Lane { vec, lane, shape }) => {
                let kind = self.value_kind(value);
                self.extract_lane(vec, lane, shape, kind)
            }
        }
    }

    fn extract_lane(&mut self, vec: ValueId, lane: u8, shape: VecShape, kind: ResultKind) -> ValueId {
        if let Some(&scalar) = self.extracts.get(&(vec, lane)) {
            return scalar;
        }
        let scalar = self.alloc(kind);
        self.out.push(Operation::new(
            OpKind::Vec(VecOpKind::Unpack {
                shape,
                offset: lane,
                count: 1,
            }),
            scalar,
            kind,
            &[vec],
        ));
        if let Some(counter) = self.counter.as_deref_mut() {
            counter.record_extract(kind, lane as usize, 1);
        }
        self.extracts.insert((vec, lane), scalar);
        scalar
    }

    // =========================================================================
    // Pack Emission
    // =========================================================================

    fn emit_pack(&mut self, pack_index: usize) {
        let pack: Pack = self.packs.as_ref().expect("vector mode").packs()[pack_index].clone();
        let op0 = self
            .graph
            .op_of(pack.leftmost())
            .expect("pack member")
            .clone();
        let shape = pack.shape(self.graph);

        for &member in pack.nodes() {
            self.graph.node_mut(member).flags.insert(NodeFlags::EMITTED);
        }

        match pack.kind() {
            PackKind::Plain => self.emit_plain_pack(&pack, &op0, shape),
            PackKind::Accum { op, position } => {
                self.emit_accum_pack(&pack, &op0, shape, op, position)
            }
        }

        if let Some(counter) = self.counter.as_deref_mut() {
            counter.record_pack(op0.kind, pack.lanes());
        }
        self.ops_vectorized += pack.lanes();
    }

    fn emit_plain_pack(&mut self, pack: &Pack, op0: &Operation, shape: VecShape) {
        let vector_kind = op0
            .kind
            .vector_variant(shape)
            .expect("pack opcodes were validated during splitting");

        match op0.kind {
            OpKind::Load(_) => {
                let array = self.resolve_scalar(op0.args[0]);
                let index = self.resolve_scalar(op0.args[1]);
                let result = self.alloc(op0.result_kind);
                let mut op = Operation::new(
                    OpKind::Vec(vector_kind),
                    result,
                    op0.result_kind,
                    &[array, index],
                );
                op.descr = op0.descr;
                self.out.push(op);
                self.map_lanes(pack, result, shape);
            }
            OpKind::Store(_) => {
                let vector = self.gather_operand(pack, 2, shape.element_size);
                let array = self.resolve_scalar(op0.args[0]);
                let index = self.resolve_scalar(op0.args[1]);
                let mut op = Operation::new(
                    OpKind::Vec(vector_kind),
                    ValueId::INVALID,
                    ResultKind::Void,
                    &[array, index, vector],
                );
                op.descr = op0.descr;
                self.out.push(op);
            }
            OpKind::Guard(_) => {
                let mask = self.gather_operand(pack, 0, shape.element_size);
                let mut op = Operation::new(
                    OpKind::Vec(vector_kind),
                    ValueId::INVALID,
                    ResultKind::Void,
                    &[mask],
                );
                let mut payload = op0.guard.clone().expect("guard payload");
                let mut fail_args = std::mem::take(&mut payload.fail_args);
                for arg in fail_args.iter_mut() {
                    *arg = self.resolve_fail_arg(*arg);
                }
                payload.fail_args = fail_args;
                op.guard = Some(payload);
                self.out.push(op);
            }
            OpKind::Cast(cast) => {
                let input = self.gather_operand(pack, 0, cast.from_bytes());
                let result = self.alloc(op0.result_kind);
                self.out.push(Operation::new(
                    OpKind::Vec(vector_kind),
                    result,
                    op0.result_kind,
                    &[input],
                ));
                if let Some(counter) = self.counter.as_deref_mut() {
                    counter.record_cast(cast, pack.lanes());
                }
                self.map_lanes(pack, result, shape);
            }
            _ => {
                // Lane-wise arithmetic and comparisons.
                let arity = op0.args.len();
                let mut args: SmallVec<[ValueId; 3]> = SmallVec::new();
                for position in 0..arity {
                    args.push(self.gather_operand(pack, position, shape.element_size));
                }
                let result = self.alloc(op0.result_kind);
                let mut op =
                    Operation::new(OpKind::Vec(vector_kind), result, op0.result_kind, &[]);
                op.args = args;
                self.out.push(op);
                self.map_lanes(pack, result, shape);
            }
        }
    }

    /// Lane-parallel partial sums: the chain input lands in lane zero of an
    /// otherwise-identity vector, the loop body becomes one lane-wise add,
    /// and the horizontal collapse is deferred until just before the jump.
    fn emit_accum_pack(
        &mut self,
        pack: &Pack,
        op0: &Operation,
        shape: VecShape,
        op: crate::trace::IntBinOp,
        position: usize,
    ) {
        let incoming = self.resolve_scalar(op0.args[position]);
        let element_position = 1 - position;
        let vx = self.gather_operand(pack, element_position, shape.element_size);

        let zero = self.alloc(ResultKind::Int);
        self.out
            .push(Operation::new(OpKind::ConstInt(0), zero, ResultKind::Int, &[]));
        let spread = self.alloc(ResultKind::Int);
        self.out.push(Operation::new(
            OpKind::Vec(VecOpKind::Expand(shape)),
            spread,
            ResultKind::Int,
            &[zero],
        ));
        let seeded = self.alloc(ResultKind::Int);
        self.out.push(Operation::new(
            OpKind::Vec(VecOpKind::Pack {
                shape,
                offset: 0,
                count: 1,
            }),
            seeded,
            ResultKind::Int,
            &[spread, incoming],
        ));
        if let Some(counter) = self.counter.as_deref_mut() {
            counter.record_expand();
            counter.record_insert(1);
        }

        let result = self.alloc(ResultKind::Int);
        let args: [ValueId; 2] = if position == 0 {
            [seeded, vx]
        } else {
            [vx, seeded]
        };
        self.out.push(Operation::new(
            OpKind::Vec(VecOpKind::Int(op, shape)),
            result,
            ResultKind::Int,
            &args,
        ));

        let tail = self
            .graph
            .op_of(pack.rightmost())
            .expect("pack member")
            .result;
        self.accum_flushes.push((tail, result, shape));
    }

    fn map_lanes(&mut self, pack: &Pack, vec: ValueId, shape: VecShape) {
        for (lane, &member) in pack.nodes().iter().enumerate() {
            let result = self.graph.op_of(member).expect("pack member").result;
            if result.is_valid() {
                self.renames.insert(
                    result,
                    Slot::Lane {
                        vec,
                        lane: lane as u8,
                        shape,
                    },
                );
            }
        }
    }

    // =========================================================================
    // Operand Gathering
    // =========================================================================

    /// Build the vector operand for one position of a pack.
    fn gather_operand(&mut self, pack: &Pack, position: usize, element_size: u8) -> ValueId {
        let shape = VecShape::new(element_size, pack.lanes() as u8);
        let values: SmallVec<[ValueId; 8]> = pack
            .nodes()
            .iter()
            .map(|&member| self.graph.op_of(member).expect("pack member").args[position])
            .collect();

        // All lanes read the same scalar: a (memoized) broadcast. Unrolled
        // copies mint fresh constant operations with equal literals, so
        // constants compare by their literal, not by value identity.
        let uniform = values.iter().all(|&v| v == values[0])
            && !matches!(self.renames.get(&values[0]), Some(Slot::Lane { .. }));
        let uniform_constant = !uniform
            && self
                .constant_literal(values[0])
                .map(|literal| {
                    values[1..]
                        .iter()
                        .all(|&v| self.constant_literal(v) == Some(literal))
                })
                .unwrap_or(false);
        if uniform || uniform_constant {
            return self.expand_value(values[0], shape);
        }

        // Contiguous lanes of one existing vector.
        if let Some(vector) = self.reuse_vector(&values, shape) {
            return vector;
        }

        // Scattered values: expand the first lane and insert the rest.
        let first = self.resolve_scalar(values[0]);
        let mut current = self.alloc(self.value_kind(values[0]));
        self.out.push(Operation::new(
            OpKind::Vec(VecOpKind::Expand(shape)),
            current,
            self.value_kind(values[0]),
            &[first],
        ));
        if let Some(counter) = self.counter.as_deref_mut() {
            counter.record_expand();
            counter.record_insert(values.len() - 1);
        }
        for (lane, &value) in values.iter().enumerate().skip(1) {
            let scalar = self.resolve_scalar(value);
            let next = self.alloc(self.value_kind(value));
            self.out.push(Operation::new(
                OpKind::Vec(VecOpKind::Pack {
                    shape,
                    offset: lane as u8,
                    count: 1,
                }),
                next,
                self.value_kind(value),
                &[current, scalar],
            ));
            current = next;
        }
        current
    }

    /// Reuse (or crop) an existing vector whose lanes already hold the
    /// requested values in order.
    fn reuse_vector(&mut self, values: &[ValueId], shape: VecShape) -> Option<ValueId> {
        let mut source: Option<ValueId> = None;
        let mut source_shape = shape;
        let mut lanes: SmallVec<[u8; 8]> = SmallVec::new();
        for &value in values {
            match self.renames.get(&value).copied() {
                Some(Slot::Lane {
                    vec,
                    lane,
                    shape: lane_shape,
                }) => {
                    if lane_shape.element_size != shape.element_size {
                        return None;
                    }
                    match source {
                        None => {
                            source = Some(vec);
                            source_shape = lane_shape;
                        }
                        Some(existing) if existing == vec => {}
                        Some(_) => return None,
                    }
                    lanes.push(lane);
                }
                _ => return None,
            }
        }
        let source = source?;
        let offset = lanes[0];
        if !lanes.iter().enumerate().all(|(i, &l)| l == offset + i as u8) {
            return None;
        }
        if offset == 0 && source_shape.lanes == values.len() as u8 {
            return Some(source);
        }
        // Sub-range: crop into a fresh, narrower vector.
        let kind = self.value_kind(values[0]);
        let cropped = self.alloc(kind);
        self.out.push(Operation::new(
            OpKind::Vec(VecOpKind::Unpack {
                shape: source_shape,
                offset,
                count: values.len() as u8,
            }),
            cropped,
            kind,
            &[source],
        ));
        if let Some(counter) = self.counter.as_deref_mut() {
            counter.record_extract(kind, offset as usize, values.len());
        }
        Some(cropped)
    }

    /// Broadcast a scalar, hoisting loop-invariant expansions into the
    /// prefix emitted once before the label.
    fn expand_value(&mut self, value: ValueId, shape: VecShape) -> ValueId {
        if let Some(&expanded) = self.expands.get(&(value, shape)) {
            return expanded;
        }
        let kind = self.value_kind(value);
        let defining = self.defs.get(&value).copied();
        let is_constant = self.constants.contains(&value);
        let is_live_in = defining == Some(NodeId::new(0));

        let expanded = self.alloc(kind);
        if is_constant {
            // Rebuild the constant in the prefix so the expansion is
            // self-contained there.
            let op = self
                .graph
                .op_of(defining.expect("constants are defined"))
                .expect("constant node")
                .clone();
            let scalar = self.alloc(kind);
            self.prefix
                .push(Operation::new(op.kind, scalar, kind, &[]));
            self.prefix.push(Operation::new(
                OpKind::Vec(VecOpKind::Expand(shape)),
                expanded,
                kind,
                &[scalar],
            ));
        } else if is_live_in {
            self.prefix.push(Operation::new(
                OpKind::Vec(VecOpKind::Expand(shape)),
                expanded,
                kind,
                &[value],
            ));
        } else {
            let scalar = self.resolve_scalar(value);
            self.out.push(Operation::new(
                OpKind::Vec(VecOpKind::Expand(shape)),
                expanded,
                kind,
                &[scalar],
            ));
        }
        if let Some(counter) = self.counter.as_deref_mut() {
            counter.record_expand();
        }
        self.expands.insert((value, shape), expanded);
        expanded
    }

    // =========================================================================
    // Loop Exit
    // =========================================================================

    /// Collapse accumulation vectors into their scalar sums.
    fn flush_accumulators(&mut self) {
        let flushes = std::mem::take(&mut self.accum_flushes);
        for (tail, vector, shape) in flushes {
            let sum = self.alloc(ResultKind::Int);
            self.out.push(Operation::new(
                OpKind::Vec(VecOpKind::HorizontalAdd(shape)),
                sum,
                ResultKind::Int,
                &[vector],
            ));
            self.renames.insert(tail, Slot::Scalar(sum));
        }
    }

    fn emit_jump(&mut self, jump: NodeId) {
        let mut copy = self.graph.op_of(jump).expect("jump").clone();
        for i in 0..copy.args.len() {
            copy.args[i] = self.resolve_scalar(copy.args[i]);
        }
        self.graph.node_mut(jump).flags.insert(NodeFlags::EMITTED);
        self.out.push(copy);
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// The constant opcode behind a value, when it is constant-defined.
    fn constant_literal(&self, value: ValueId) -> Option<OpKind> {
        if !self.constants.contains(&value) {
            return None;
        }
        let node = self.defs.get(&value)?;
        self.graph.op_of(*node).map(|op| op.kind)
    }

    fn alloc(&mut self, kind: ResultKind) -> ValueId {
        let id = ValueId::new(self.next_value);
        self.next_value += 1;
        self.new_kinds.push(kind);
        id
    }

    fn value_kind(&self, value: ValueId) -> ResultKind {
        let base = self.graph.trace().value_count();
        if value.as_usize() < base {
            self.graph.trace().kind_of(value)
        } else {
            self.new_kinds[value.as_usize() - base]
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::MachineDescriptor;
    use crate::trace::{
        AccessKind, ArrayDescriptor, CmpOp, GuardKind, IntBinOp, ResultKind, Trace, TraceBuilder,
    };
    use crate::vectorize::cost::CostTable;

    fn run_vector(trace: &Trace, machine: &MachineDescriptor) -> (ScheduleResult, i64) {
        let mut graph = DependencyGraph::build(trace);
        let mut packs = PackSet::build(&mut graph, machine).expect("packable");
        let mut counter = SavingsCounter::with_threshold(CostTable::default(), 0);
        let result = Scheduler::vector(&mut graph, &mut packs, &mut counter).run();
        (result, counter.savings())
    }

    fn mnemonics(ops: &[Operation]) -> Vec<&'static str> {
        ops.iter().map(|op| op.kind.mnemonic()).collect()
    }

    #[test]
    fn test_two_loads_become_one_vec_load() {
        // Scenario: loads of [i] and [i+8] fuse into a 2-lane vec_load and
        // the jump arguments survive untouched.
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let _x0 = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let eight = b.const_int(8);
        let i1 = b.int_op(IntBinOp::Add, i, eight);
        let _x1 = b.load(AccessKind::Raw, ResultKind::Int, p, i1, descr);
        let trace = b.finish(&[p, i]);

        let (result, savings) = run_vector(&trace, &MachineDescriptor::sse128());
        let names = mnemonics(&result.ops);
        assert_eq!(names.iter().filter(|&&n| n == "vec_load").count(), 1);
        assert!(!names.contains(&"raw_load"));
        assert!(savings > 0);
        assert_eq!(result.ops_vectorized, 2);

        // Jump args unchanged.
        let jump = result.ops.last().unwrap();
        assert_eq!(jump.args.as_slice(), &[p, i]);
        // The vec_load indexes the leftmost lane.
        let vec_load = result.ops.iter().find(|op| op.kind.mnemonic() == "vec_load").unwrap();
        assert_eq!(vec_load.args[1], i);
        assert_eq!(vec_load.descr, Some(descr));
    }

    #[test]
    fn test_dead_index_arithmetic_elided() {
        // The i+8 used only to address the second load dies with the pack.
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let _x0 = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let eight = b.const_int(8);
        let i1 = b.int_op(IntBinOp::Add, i, eight);
        let _x1 = b.load(AccessKind::Raw, ResultKind::Int, p, i1, descr);
        let trace = b.finish(&[p, i]);

        let (result, _) = run_vector(&trace, &MachineDescriptor::sse128());
        let names = mnemonics(&result.ops);
        assert!(!names.contains(&"int_add"), "dead index chain must disappear");
        assert!(!names.contains(&"const_int"));
    }

    #[test]
    fn test_load_add_store_pipeline() {
        // a[i] = b[i] + k over two unrolled lanes: loads, adds and stores
        // all vectorize; the add's constant operand becomes an invariant
        // prefix expansion.
        let mut b = TraceBuilder::new();
        let src = b.live_in(ResultKind::Ref);
        let dst = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let k = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x0 = b.load(AccessKind::Raw, ResultKind::Int, src, i, descr);
        let y0 = b.int_op(IntBinOp::Add, x0, k);
        b.store(AccessKind::Raw, dst, i, y0, descr);
        let eight = b.const_int(8);
        let i1 = b.int_op(IntBinOp::Add, i, eight);
        let x1 = b.load(AccessKind::Raw, ResultKind::Int, src, i1, descr);
        let y1 = b.int_op(IntBinOp::Add, x1, k);
        b.store(AccessKind::Raw, dst, i1, y1, descr);
        let trace = b.finish(&[src, dst, i, k]);

        let (result, _) = run_vector(&trace, &MachineDescriptor::sse128());
        let names = mnemonics(&result.ops);
        assert_eq!(names.iter().filter(|&&n| n == "vec_load").count(), 1);
        assert_eq!(names.iter().filter(|&&n| n == "vec_int_add").count(), 1);
        assert_eq!(names.iter().filter(|&&n| n == "vec_store").count(), 1);

        // k is loop-invariant: its expansion sits in the prefix.
        let prefix_names = mnemonics(&result.prefix);
        assert_eq!(prefix_names, vec!["vec_expand"]);
        assert_eq!(result.prefix[0].args[0], k);
    }

    #[test]
    fn test_guard_pack_extracts_fail_args() {
        // Two value checks on already-loaded lanes fuse into one vec guard
        // whose fail-arg now lives in a vector lane and is extracted right
        // before it.
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let n = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x0 = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let eight = b.const_int(8);
        let i1 = b.int_op(IntBinOp::Add, i, eight);
        let x1 = b.load(AccessKind::Raw, ResultKind::Int, p, i1, descr);
        let c0 = b.int_cmp(CmpOp::Lt, x0, n);
        b.guard(GuardKind::True, &[c0], &[x0]);
        let c1 = b.int_cmp(CmpOp::Lt, x1, n);
        b.guard(GuardKind::True, &[c1], &[x1]);
        let trace = b.finish(&[p, i, n]);

        let (result, _) = run_vector(&trace, &MachineDescriptor::sse128());
        let names = mnemonics(&result.ops);
        assert_eq!(names.iter().filter(|&&n| n == "vec_guard_true").count(), 1);
        assert_eq!(names.iter().filter(|&&n| n == "vec_int_cmp").count(), 1);

        let guard_at = names.iter().position(|&n| n == "vec_guard_true").unwrap();
        let guard = &result.ops[guard_at];
        let fail = guard.guard.as_deref().unwrap().fail_args[0];
        // The fail-arg was rewritten to a fresh extraction, emitted
        // immediately before the guard.
        assert!(fail.as_usize() >= trace.value_count());
        let before = &result.ops[guard_at - 1];
        assert_eq!(before.kind.mnemonic(), "vec_unpack");
        assert_eq!(before.result, fail);
    }

    #[test]
    fn test_accumulator_flush() {
        // acc = acc + a[i] twice: one lane-wise add plus a horizontal sum
        // before the jump, whose live-out is rewired to the scalar total.
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

        let (result, _) = run_vector(&trace, &MachineDescriptor::sse128());
        let names = mnemonics(&result.ops);
        assert_eq!(names.iter().filter(|&&n| n == "vec_int_add").count(), 1);
        assert_eq!(names.iter().filter(|&&n| n == "vec_hadd").count(), 1);
        assert!(!names.contains(&"int_add"), "scalar chain replaced");

        let hadd_at = names.iter().position(|&n| n == "vec_hadd").unwrap();
        let jump = result.ops.last().unwrap();
        assert_eq!(jump.args[2], result.ops[hadd_at].result);
    }

    #[test]
    fn test_scalar_mode_drops_dead_pure_ops() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        let one = b.const_int(1);
        let used = b.int_op(IntBinOp::Add, i, one);
        let two = b.const_int(2);
        let _dead = b.int_op(IntBinOp::Mul, i, two);
        let trace = b.finish(&[used]);

        let mut graph = DependencyGraph::build(&trace);
        let result = Scheduler::scalar(&mut graph).run();
        let names = mnemonics(&result.ops);
        assert!(names.contains(&"int_add"));
        assert!(!names.contains(&"int_mul"), "unconsumed pure op dropped");
        // Only the constant feeding the live add survives.
        assert_eq!(names.iter().filter(|&&n| n == "const_int").count(), 1);
    }

    #[test]
    fn test_scalar_mode_keeps_guards_and_order() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let n = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let cond = b.int_cmp(CmpOp::Lt, i, n);
        b.guard(GuardKind::True, &[cond], &[i]);
        let x = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        b.store(AccessKind::Raw, p, i, x, descr);
        let trace = b.finish(&[p, i, n]);

        let mut graph = DependencyGraph::build(&trace);
        let result = Scheduler::scalar(&mut graph).run();
        let names = mnemonics(&result.ops);
        let guard_at = names.iter().position(|&n| n == "guard_true").unwrap();
        let load_at = names.iter().position(|&n| n == "raw_load").unwrap();
        let store_at = names.iter().position(|&n| n == "raw_store").unwrap();
        assert!(guard_at < load_at && load_at < store_at);
    }

    #[test]
    fn test_schedule_result_into_trace() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        let one = b.const_int(1);
        let j = b.int_op(IntBinOp::Add, i, one);
        let trace = b.finish(&[j]);

        let mut graph = DependencyGraph::build(&trace);
        let result = Scheduler::scalar(&mut graph).run();
        let rebuilt = result.into_trace(&trace);
        assert_eq!(rebuilt.live_ins().len(), 1);
        assert_eq!(rebuilt.live_outs().len(), 1);
    }
}
