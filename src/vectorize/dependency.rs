//! Dependency graph over one unrolled trace.
//!
//! Turns the flat operation list into a graph of true/anti/output and
//! guard-ordering edges. Each array access node carries its `MemoryRef`.
//! The graph is the sole owner of its nodes; edges are `(target, reason)`
//! entries in per-node adjacency lists, kept symmetric between the forward
//! and backward directions.
//!
//! Construction never fails on strange input: anything the analysis cannot
//! prove independent gets a conservative edge. The only hard failure is a
//! malformed trace (an overflow guard with no overflow-capable producer,
//! or an operand with no definition), which panics — that is a soundness
//! bug in the front-end, not a recoverable condition.

use crate::trace::{Arena, GuardKind, Id, OpKind, Operation, Trace, ValueId};
use crate::vectorize::index::{AffineContext, MemoryRef};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

// =============================================================================
// Node Flags
// =============================================================================

bitflags::bitflags! {
    /// Scheduling state of a node.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct NodeFlags: u8 {
        /// Node has been emitted by the scheduler.
        const EMITTED = 0b0000_0001;
        /// Pure node parked on the delay list.
        const DELAYED = 0b0000_0010;
    }
}

// =============================================================================
// Edges
// =============================================================================

/// One dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepEdge {
    /// The other endpoint.
    pub to: NodeId,
    /// Operand that caused the edge (`INVALID` for ordering edges).
    pub cause: ValueId,
    /// The value is needed only to reconstruct deopt state, not to compute.
    pub failarg_only: bool,
}

// =============================================================================
// Node
// =============================================================================

/// A trace operation inside the dependency graph.
#[derive(Debug)]
pub struct DepNode {
    /// Index of the wrapped operation, `None` for the imaginary
    /// early-exit node.
    pub op: Option<u32>,
    /// Nodes that must run after this one.
    pub forward: SmallVec<[DepEdge; 4]>,
    /// Nodes this one must run after.
    pub backward: SmallVec<[DepEdge; 4]>,
    /// Memory reference for array accesses.
    pub mem: Option<MemoryRef>,
    /// Scheduling priority; larger runs earlier among ready nodes.
    pub priority: i32,
    /// Scheduling state.
    pub flags: NodeFlags,
}

/// Identity of a dependency graph node.
pub type NodeId = Id<DepNode>;

impl DepNode {
    fn new(op: Option<u32>) -> Self {
        DepNode {
            op,
            forward: SmallVec::new(),
            backward: SmallVec::new(),
            mem: None,
            priority: 0,
            flags: NodeFlags::empty(),
        }
    }

    /// Whether this node stands for a real trace operation.
    #[inline]
    pub fn is_real(&self) -> bool {
        self.op.is_some()
    }
}

// =============================================================================
// Dependency Graph
// =============================================================================

/// The dependency graph of one optimization attempt.
pub struct DependencyGraph<'t> {
    trace: &'t Trace,
    nodes: Arena<DepNode>,
    /// Imaginary node ordering everything after the label's checkpoint.
    early_exit: NodeId,
    /// Guard nodes in trace order.
    guards: Vec<NodeId>,
    affine: AffineContext,
}

impl<'t> DependencyGraph<'t> {
    /// Build the graph for a trace.
    pub fn build(trace: &'t Trace) -> Self {
        let mut nodes = Arena::with_capacity(trace.len() + 1);
        for i in 0..trace.len() {
            nodes.alloc(DepNode::new(Some(i as u32)));
        }
        let early_exit = nodes.alloc(DepNode::new(None));

        let mut graph = DependencyGraph {
            trace,
            nodes,
            early_exit,
            guards: Vec::new(),
            affine: AffineContext::new(),
        };
        graph.construct();
        graph
    }

    fn construct(&mut self) {
        let label = NodeId::new(0);
        let jump = NodeId::new(self.trace.len() as u32 - 1);

        // The early-exit checkpoint sits right behind the label.
        self.add_edge(label, self.early_exit, ValueId::INVALID, false);

        let mut defs: FxHashMap<ValueId, NodeId> = FxHashMap::default();
        for &live_in in self.trace.live_ins() {
            defs.insert(live_in, label);
        }

        let mut last_guard = self.early_exit;
        let mut heap_ops: Vec<NodeId> = Vec::new();

        for index in 1..self.trace.len() {
            let node = NodeId::new(index as u32);
            let op = &self.trace.ops()[index];
            self.affine.record(op);

            if node == jump {
                self.connect_jump(node, op, &defs, last_guard, &heap_ops);
                break;
            }

            match op.kind {
                _ if op.is_guard() => {
                    let kind = match op.kind {
                        OpKind::Guard(kind) => Some(kind),
                        _ => None, // vector guards carry no special protection
                    };
                    self.connect_guard(node, op, kind, &mut defs, last_guard);
                    last_guard = node;
                }
                _ if op.is_memory() => {
                    self.connect_heap_op(node, op, &defs, last_guard, &heap_ops);
                    heap_ops.push(node);
                    if op.result.is_valid() {
                        defs.insert(op.result, node);
                    }
                }
                _ => {
                    // Pure operation: depends only on the current
                    // definitions of its operands.
                    self.connect_args(node, op, &defs);
                    if op.result.is_valid() {
                        defs.insert(op.result, node);
                    }
                }
            }
        }
    }

    fn def_of(&self, defs: &FxHashMap<ValueId, NodeId>, value: ValueId) -> NodeId {
        *defs
            .get(&value)
            .unwrap_or_else(|| panic!("operand {} has no definition in the trace", value))
    }

    fn connect_args(&mut self, node: NodeId, op: &Operation, defs: &FxHashMap<ValueId, NodeId>) {
        for i in 0..op.args.len() {
            let arg = op.args[i];
            let def = self.def_of(defs, arg);
            self.add_edge(def, node, arg, false);
        }
    }

    fn connect_guard(
        &mut self,
        node: NodeId,
        op: &Operation,
        kind: Option<GuardKind>,
        defs: &mut FxHashMap<ValueId, NodeId>,
        last_guard: NodeId,
    ) {
        self.connect_args(node, op, defs);
        for i in 0..op.guard_payload().fail_args.len() {
            let arg = op.guard_payload().fail_args[i];
            let def = self.def_of(defs, arg);
            self.add_edge(def, node, arg, true);
        }
        // Guards never reorder among themselves.
        self.add_edge(last_guard, node, ValueId::INVALID, false);

        match kind {
            Some(GuardKind::NonNull) => {
                // Argument protection: the guard redefines the reference it
                // checks, ordering later dereferences after the check.
                defs.insert(op.args[0], node);
            }
            Some(GuardKind::NoOverflow) => {
                let producer = self.find_overflow_producer(node);
                let cause = self.trace.ops()[producer.as_usize()].result;
                self.add_edge(producer, node, cause, false);
            }
            Some(GuardKind::EarlyExit) => {
                self.add_edge(self.early_exit, node, ValueId::INVALID, false);
            }
            Some(GuardKind::True) | Some(GuardKind::False) | None => {}
        }

        self.guards.push(node);
    }

    /// Nearest preceding operation able to raise the overflow condition.
    fn find_overflow_producer(&self, guard: NodeId) -> NodeId {
        let mut index = guard.as_usize();
        while index > 0 {
            index -= 1;
            if self.trace.ops()[index].kind.can_overflow() {
                return NodeId::new(index as u32);
            }
        }
        panic!("guard_no_overflow with no preceding overflow-capable operation");
    }

    fn connect_heap_op(
        &mut self,
        node: NodeId,
        op: &Operation,
        defs: &FxHashMap<ValueId, NodeId>,
        last_guard: NodeId,
        heap_ops: &[NodeId],
    ) {
        self.connect_args(node, op, defs);
        // No load or store floats above the latest guard.
        self.add_edge(last_guard, node, ValueId::INVALID, false);

        let mem = self.affine.memory_ref(op);
        let is_store = op.kind.is_store();

        for &prev in heap_ops {
            let prev_op = self.op_of(prev).expect("heap node wraps an operation");
            let prev_is_store = prev_op.kind.is_store();
            if !is_store && !prev_is_store {
                continue; // two reads never conflict
            }
            let ordered = match (&mem, &self.nodes[prev].mem) {
                (Some(a), Some(b)) => a.alias(b),
                // Without both access shapes we cannot prove anything:
                // order after every preceding heap operation.
                _ => true,
            };
            if ordered {
                self.add_edge(prev, node, op.args[0], false);
            }
        }

        self.nodes[node].mem = mem;
    }

    fn connect_jump(
        &mut self,
        node: NodeId,
        op: &Operation,
        defs: &FxHashMap<ValueId, NodeId>,
        last_guard: NodeId,
        heap_ops: &[NodeId],
    ) {
        self.connect_args(node, op, defs);
        self.add_edge(last_guard, node, ValueId::INVALID, false);
        for &guard in &self.guards.clone() {
            self.add_edge(guard, node, ValueId::INVALID, false);
        }
        for &heap in heap_ops {
            if self.op_of(heap).map(|op| op.kind.is_store()).unwrap_or(false) {
                self.add_edge(heap, node, ValueId::INVALID, false);
            }
        }
    }

    /// Insert a symmetric edge; duplicate targets merge instead of stacking.
    fn add_edge(&mut self, from: NodeId, to: NodeId, cause: ValueId, failarg_only: bool) {
        if from == to {
            return;
        }
        if let Some(existing) = self.nodes[from].forward.iter_mut().find(|e| e.to == to) {
            existing.failarg_only &= failarg_only;
            if !existing.cause.is_valid() {
                existing.cause = cause;
            }
            let back = self.nodes[to]
                .backward
                .iter_mut()
                .find(|e| e.to == from)
                .expect("adjacency lists must stay symmetric");
            back.failarg_only &= failarg_only;
            if !back.cause.is_valid() {
                back.cause = cause;
            }
            return;
        }
        self.nodes[from].forward.push(DepEdge {
            to,
            cause,
            failarg_only,
        });
        self.nodes[to].backward.push(DepEdge {
            to: from,
            cause,
            failarg_only,
        });
    }

    // =========================================================================
    // Query API
    // =========================================================================

    /// The trace this graph was built for.
    #[inline]
    pub fn trace(&self) -> &'t Trace {
        self.trace
    }

    /// Number of nodes including the imaginary early-exit node.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in allocation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId::new)
    }

    /// A node by id.
    #[inline]
    pub fn node(&self, id: NodeId) -> &DepNode {
        &self.nodes[id]
    }

    /// A node by id, mutable.
    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut DepNode {
        &mut self.nodes[id]
    }

    /// The operation a node wraps, if it is a real node.
    pub fn op_of(&self, id: NodeId) -> Option<&'t Operation> {
        self.nodes[id].op.map(|i| &self.trace.ops()[i as usize])
    }

    /// The imaginary early-exit node.
    #[inline]
    pub fn early_exit(&self) -> NodeId {
        self.early_exit
    }

    /// Guard nodes in trace order.
    #[inline]
    pub fn guards(&self) -> &[NodeId] {
        &self.guards
    }

    /// The affine context built during construction.
    #[inline]
    pub fn affine(&self) -> &AffineContext {
        &self.affine
    }

    /// Memory reference of a node, if it is an array access.
    #[inline]
    pub fn memory_ref(&self, id: NodeId) -> Option<&MemoryRef> {
        self.nodes[id].mem.as_ref()
    }

    /// Whether a direct edge `from -> to` exists.
    pub fn edge_to(&self, from: NodeId, to: NodeId) -> bool {
        self.nodes[from].forward.iter().any(|e| e.to == to)
    }

    /// Whether no dependency path connects `a` and `b` in either direction.
    ///
    /// Implemented as a worklist search from each endpoint, bounded by the
    /// visited set. A node is never independent of itself.
    pub fn independent(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return false;
        }
        !self.path_exists(a, b, false) && !self.path_exists(b, a, false)
    }

    /// Like `independent`, but blind to the pure ordering edges between
    /// guards. Two guards chained only by guard order may fuse into one
    /// vector guard: the fused check keeps the earlier position, so it can
    /// only fail earlier, never later.
    pub fn independent_ignoring_guard_order(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return false;
        }
        !self.path_exists(a, b, true) && !self.path_exists(b, a, true)
    }

    fn is_guard_node(&self, id: NodeId) -> bool {
        self.op_of(id).map(|op| op.is_guard()).unwrap_or(false)
    }

    fn path_exists(&self, from: NodeId, to: NodeId, ignore_guard_order: bool) -> bool {
        let mut worklist: SmallVec<[NodeId; 16]> = SmallVec::new();
        let mut seen = vec![false; self.nodes.len()];
        worklist.push(from);
        seen[from.as_usize()] = true;
        while let Some(node) = worklist.pop() {
            let node_is_guard = ignore_guard_order && self.is_guard_node(node);
            for edge in &self.nodes[node].forward {
                if node_is_guard && !edge.cause.is_valid() && self.is_guard_node(edge.to) {
                    continue;
                }
                if edge.to == to {
                    return true;
                }
                if !seen[edge.to.as_usize()] {
                    seen[edge.to.as_usize()] = true;
                    worklist.push(edge.to);
                }
            }
        }
        false
    }
}

impl std::fmt::Debug for DependencyGraph<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("nodes", &self.nodes.len())
            .field("guards", &self.guards.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{
        AccessKind, ArrayDescriptor, CmpOp, IntBinOp, ResultKind, TraceBuilder,
    };

    fn simple_loop() -> Trace {
        // p0, i0 live-ins; x = load(p0, i0); y = x + 1; store(p0, i0, y)
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let one = b.const_int(1);
        let y = b.int_op(IntBinOp::Add, x, one);
        b.store(AccessKind::Raw, p, i, y, descr);
        b.finish(&[p, i])
    }

    #[test]
    fn test_symmetric_adjacency() {
        let trace = simple_loop();
        let graph = DependencyGraph::build(&trace);
        for id in graph.node_ids() {
            for edge in &graph.node(id).forward {
                assert!(
                    graph.node(edge.to).backward.iter().any(|back| back.to == id),
                    "forward edge {:?} -> {:?} missing its backward twin",
                    id,
                    edge.to
                );
            }
            for edge in &graph.node(id).backward {
                assert!(graph.node(edge.to).forward.iter().any(|fwd| fwd.to == id));
            }
        }
    }

    #[test]
    fn test_true_dependencies() {
        let trace = simple_loop();
        let graph = DependencyGraph::build(&trace);
        let load = NodeId::new(1);
        let add = NodeId::new(3);
        let store = NodeId::new(4);
        assert!(graph.edge_to(load, add));
        assert!(graph.edge_to(add, store));
        // The store writes the cell the load read: output ordering.
        assert!(graph.edge_to(load, store));
    }

    #[test]
    fn test_independent_is_symmetric_and_consistent() {
        let trace = simple_loop();
        let graph = DependencyGraph::build(&trace);
        for a in graph.node_ids() {
            for b in graph.node_ids() {
                assert_eq!(graph.independent(a, b), graph.independent(b, a));
                if graph.edge_to(a, b) {
                    assert!(!graph.independent(a, b));
                }
            }
        }
        assert!(!graph.independent(NodeId::new(1), NodeId::new(1)));
    }

    #[test]
    fn test_disjoint_loads_independent() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let _a = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let eight = b.const_int(8);
        let j = b.int_op(IntBinOp::Add, i, eight);
        let _c = b.load(AccessKind::Raw, ResultKind::Int, p, j, descr);
        let trace = b.finish(&[p, i]);
        let graph = DependencyGraph::build(&trace);

        let load_a = NodeId::new(1);
        let load_c = NodeId::new(4);
        assert!(graph.memory_ref(load_a).is_some());
        assert!(graph.memory_ref(load_c).is_some());
        assert!(graph.independent(load_a, load_c));
    }

    #[test]
    fn test_store_orders_aliasing_accesses() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let j = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let x = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        // Unknown index j: may alias i.
        b.store(AccessKind::Raw, p, j, x, descr);
        let _y = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let trace = b.finish(&[p, i, j]);
        let graph = DependencyGraph::build(&trace);

        let first_load = NodeId::new(1);
        let store = NodeId::new(2);
        let second_load = NodeId::new(3);
        assert!(graph.edge_to(first_load, store)); // anti
        assert!(graph.edge_to(store, second_load)); // true
        assert!(!graph.independent(first_load, second_load));
    }

    #[test]
    fn test_guard_is_memory_barrier() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let n = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        let cond = b.int_cmp(CmpOp::Lt, i, n);
        b.guard(crate::trace::GuardKind::True, &[cond], &[i]);
        let _x = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let trace = b.finish(&[p, i, n]);
        let graph = DependencyGraph::build(&trace);

        let guard = NodeId::new(2);
        let load = NodeId::new(3);
        assert!(graph.edge_to(guard, load));
        assert_eq!(graph.guards(), &[guard]);
    }

    #[test]
    fn test_nonnull_guard_protects_reference() {
        let mut b = TraceBuilder::new();
        let p = b.live_in(ResultKind::Ref);
        let i = b.live_in(ResultKind::Int);
        let descr = ArrayDescriptor::primitive(8);
        b.guard(crate::trace::GuardKind::NonNull, &[p], &[p, i]);
        let _x = b.load(AccessKind::Raw, ResultKind::Int, p, i, descr);
        let trace = b.finish(&[p, i]);
        let graph = DependencyGraph::build(&trace);

        let guard = NodeId::new(1);
        let load = NodeId::new(2);
        // The dereference is ordered after the null check through the
        // redefinition of p, with p as the causing operand.
        let edge = graph
            .node(guard)
            .forward
            .iter()
            .find(|e| e.to == load)
            .expect("protection edge");
        assert_eq!(edge.cause, p);
        assert!(!edge.failarg_only);
    }

    #[test]
    fn test_overflow_guard_binds_to_producer() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        let one = b.const_int(1);
        let sum = b.int_op_ovf(IntBinOp::Add, i, one);
        b.guard(crate::trace::GuardKind::NoOverflow, &[], &[i]);
        let trace = b.finish(&[sum]);
        let graph = DependencyGraph::build(&trace);

        let ovf = NodeId::new(2);
        let guard = NodeId::new(3);
        assert!(graph.edge_to(ovf, guard));
    }

    #[test]
    #[should_panic(expected = "overflow-capable")]
    fn test_overflow_guard_without_producer_panics() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        b.guard(crate::trace::GuardKind::NoOverflow, &[], &[i]);
        let trace = b.finish(&[i]);
        DependencyGraph::build(&trace);
    }

    #[test]
    fn test_failarg_edges_flagged() {
        let mut b = TraceBuilder::new();
        let i = b.live_in(ResultKind::Int);
        let n = b.live_in(ResultKind::Int);
        let one = b.const_int(1);
        let j = b.int_op(IntBinOp::Add, i, one);
        let cond = b.int_cmp(CmpOp::Lt, i, n);
        // j is only needed for deopt state reconstruction.
        b.guard(crate::trace::GuardKind::True, &[cond], &[j]);
        let trace = b.finish(&[i, n]);
        let graph = DependencyGraph::build(&trace);

        let add = NodeId::new(2);
        let guard = NodeId::new(4);
        let edge = graph
            .node(add)
            .forward
            .iter()
            .find(|e| e.to == guard)
            .expect("failarg edge");
        assert!(edge.failarg_only);
    }

    #[test]
    fn test_jump_anchors_side_effects() {
        let trace = simple_loop();
        let graph = DependencyGraph::build(&trace);
        let store = NodeId::new(4);
        let jump = NodeId::new(trace.len() as u32 - 1);
        assert!(graph.edge_to(store, jump));
    }
}
