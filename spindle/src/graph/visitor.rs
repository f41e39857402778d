//! Work-list traversal of operator graphs
//!
//! An [`OpVisitor`] is built from two strategies:
//! - A [`Selector`] picks the next op to visit from the pending list, and
//!   removes it from that list.
//! - An [`Updater`] runs after each op is visited.  It marks the op as visited
//!   and pushes any ops which are now eligible onto the pending list.
//!
//! Mixing and matching strategies produces different traversal orders:
//!
//! | Constructor                      | Selector   | Updater          |
//! |----------------------------------|------------|------------------|
//! | [`OpVisitor::dfs`]               | [`PopBack`]| [`PushConsumers`]|
//! | [`OpVisitor::bfs`]               | [`Dequeue`]| [`PushConsumers`]|
//! | [`OpVisitor::dfs_topology_sort`] | [`PopBack`]| [`DagUpdater`]   |
//! | [`OpVisitor::post_order`]        | [`PopBack`]| [`DagPostUpdater`]|
use crate::{
    Error,
    graph::{Graph, OpId},
};
use bit_set::BitSet;
use std::collections::VecDeque;

/// Default sizing hint for the topological visitors
pub const DEFAULT_NODES_HINT: usize = 30;

/// Mutable state shared between a visitor and its strategies
#[derive(Clone, Debug, Default)]
pub struct VisitState {
    /// Ops which may be visited next; selectors pop from either end
    pub pending: VecDeque<OpId>,

    /// Bitmap of visited ops, indexed by op id.  Bits are never cleared
    /// during a traversal.
    visited: BitSet,

    /// Size of the op id space
    size: usize,
}

impl VisitState {
    fn new(size: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            visited: BitSet::with_capacity(size),
            size,
        }
    }

    /// Extends the id space, e.g. after ops are appended to the graph
    fn grow(&mut self, size: usize) {
        self.size = self.size.max(size);
    }

    /// Marks an op as visited, returning `true` if it was not already
    ///
    /// # Panics
    /// If the op is out of range for the graph being visited
    pub fn set_visited(&mut self, op: OpId) -> bool {
        assert!(
            op.get() < self.size,
            "op {op} is out of range for a graph with {} ops",
            self.size
        );
        self.visited.insert(op.get())
    }

    /// Checks whether an op has been visited
    ///
    /// # Panics
    /// If the op is out of range for the graph being visited
    pub fn has_visited(&self, op: OpId) -> bool {
        assert!(
            op.get() < self.size,
            "op {op} is out of range for a graph with {} ops",
            self.size
        );
        self.visited.contains(op.get())
    }
}

/// Strategy which picks the next op from the pending list
pub trait Selector {
    /// Removes and returns the next candidate from `state.pending`
    ///
    /// Returning `None` asks the visitor to try again; this is how selectors
    /// skip over candidates that have already been visited.  The visitor
    /// only calls this function when the pending list is not empty.
    fn select_next(&mut self, state: &mut VisitState) -> Option<OpId>;
}

/// Strategy which updates the pending list after each visit
pub trait Updater {
    /// Resets internal state and pushes the first ops to visit
    fn seed(&mut self, graph: &Graph, state: &mut VisitState);

    /// Marks `op` as visited and pushes any ops which are now eligible
    fn update_after_visit(
        &mut self,
        graph: &Graph,
        state: &mut VisitState,
        op: OpId,
    );
}

/// Selector which pops from the back of the pending list (stack order)
#[derive(Copy, Clone, Debug, Default)]
pub struct PopBack;

impl Selector for PopBack {
    fn select_next(&mut self, state: &mut VisitState) -> Option<OpId> {
        let op = state.pending.pop_back()?;
        (!state.has_visited(op)).then_some(op)
    }
}

/// Selector which pops from the front of the pending list (queue order)
#[derive(Copy, Clone, Debug, Default)]
pub struct Dequeue;

impl Selector for Dequeue {
    fn select_next(&mut self, state: &mut VisitState) -> Option<OpId> {
        let op = state.pending.pop_front()?;
        (!state.has_visited(op)).then_some(op)
    }
}

/// Updater which pushes every consumer of the visited op
///
/// An op may be pushed more than once; selectors skip the duplicates.
#[derive(Copy, Clone, Debug, Default)]
pub struct PushConsumers;

impl Updater for PushConsumers {
    fn seed(&mut self, graph: &Graph, state: &mut VisitState) {
        state.pending.extend(graph.sources());
    }

    fn update_after_visit(
        &mut self,
        graph: &Graph,
        state: &mut VisitState,
        op: OpId,
    ) {
        state.set_visited(op);
        state.pending.extend(graph.consumers(op));
    }
}

/// Updater which pushes an op once every one of its producers is visited
///
/// This produces a topological order, and pushes each op at most once.
#[derive(Clone, Debug)]
pub struct DagUpdater {
    /// Number of input edges (from other ops) which are not yet visited, or
    /// `None` if we haven't seen the op yet
    remaining: Vec<Option<usize>>,
}

impl DagUpdater {
    /// Builds a new updater, pre-sizing its counters
    pub fn new(total_nodes_hint: usize) -> Self {
        Self {
            remaining: Vec::with_capacity(total_nodes_hint),
        }
    }
}

impl Updater for DagUpdater {
    fn seed(&mut self, graph: &Graph, state: &mut VisitState) {
        self.remaining.clear();
        self.remaining.resize(graph.len(), None);
        state.pending.extend(graph.sources());
    }

    fn update_after_visit(
        &mut self,
        graph: &Graph,
        state: &mut VisitState,
        op: OpId,
    ) {
        state.set_visited(op);
        if self.remaining.len() < graph.len() {
            self.remaining.resize(graph.len(), None);
        }
        for &t in graph.op(op).outputs() {
            for u in graph.tensor(t).uses() {
                if state.has_visited(u.op) {
                    continue;
                }
                let r = self.remaining[u.op.get()]
                    .get_or_insert_with(|| graph.produced_input_count(u.op));
                // Edges retargeted mid-traversal may outnumber the count
                let Some(n) = r.checked_sub(1) else {
                    continue;
                };
                *r = n;
                if n == 0 {
                    state.pending.push_back(u.op);
                }
            }
        }
    }
}

/// Updater which pushes an op once every one of its consumers is visited
///
/// Traversal starts from the graph's sinks and walks toward its inputs, so
/// every op is visited after all of its successors.
#[derive(Clone, Debug)]
pub struct DagPostUpdater {
    /// Number of output uses which are not yet visited, or `None` if we
    /// haven't seen the op yet
    remaining: Vec<Option<usize>>,
}

impl DagPostUpdater {
    /// Builds a new updater, pre-sizing its counters
    pub fn new(total_nodes_hint: usize) -> Self {
        Self {
            remaining: Vec::with_capacity(total_nodes_hint),
        }
    }
}

impl Updater for DagPostUpdater {
    fn seed(&mut self, graph: &Graph, state: &mut VisitState) {
        self.remaining.clear();
        self.remaining.resize(graph.len(), None);
        state.pending.extend(graph.sinks());
    }

    fn update_after_visit(
        &mut self,
        graph: &Graph,
        state: &mut VisitState,
        op: OpId,
    ) {
        state.set_visited(op);
        if self.remaining.len() < graph.len() {
            self.remaining.resize(graph.len(), None);
        }
        for &t in graph.op(op).inputs() {
            let Some(p) = graph.tensor(t).producer() else {
                continue;
            };
            if state.has_visited(p) {
                continue;
            }
            let r = self.remaining[p.get()]
                .get_or_insert_with(|| graph.output_use_count(p));
            let Some(n) = r.checked_sub(1) else {
                continue;
            };
            *r = n;
            if n == 0 {
                state.pending.push_back(p);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////

/// Graph traversal engine, parameterized by selection and update strategies
///
/// Each traversal owns its visitor; nested traversals of the same graph must
/// use independent instances.
#[derive(Clone, Debug)]
pub struct OpVisitor<S, U> {
    state: VisitState,
    selector: S,
    updater: U,
}

impl OpVisitor<PopBack, PushConsumers> {
    /// Depth-first traversal, following producer → consumer chains
    ///
    /// This does not respect dependencies: an op may be visited before some
    /// of its producers.
    pub fn dfs() -> Self {
        Self::new(PopBack, PushConsumers)
    }
}

impl OpVisitor<Dequeue, PushConsumers> {
    /// Breadth-first (level order) traversal
    pub fn bfs() -> Self {
        Self::new(Dequeue, PushConsumers)
    }
}

impl OpVisitor<PopBack, DagUpdater> {
    /// Topological traversal in depth-first flavor
    ///
    /// `total_nodes_hint` pre-sizes internal counters; it has no effect on
    /// the traversal order.
    pub fn dfs_topology_sort(total_nodes_hint: usize) -> Self {
        Self::new(PopBack, DagUpdater::new(total_nodes_hint))
    }
}

impl OpVisitor<PopBack, DagPostUpdater> {
    /// Reverse topological traversal, from graph outputs toward inputs
    pub fn post_order(total_nodes_hint: usize) -> Self {
        Self::new(PopBack, DagPostUpdater::new(total_nodes_hint))
    }
}

impl<S: Selector, U: Updater> OpVisitor<S, U> {
    /// Builds a visitor from an arbitrary pair of strategies
    pub fn new(selector: S, updater: U) -> Self {
        Self {
            state: VisitState::default(),
            selector,
            updater,
        }
    }

    /// Returns the traversal state
    pub fn state(&self) -> &VisitState {
        &self.state
    }

    /// Marks an op as visited without running the updater
    pub fn set_visited(&mut self, op: OpId) {
        self.state.set_visited(op);
    }

    /// Checks whether an op has been visited
    pub fn has_visited(&self, op: OpId) -> bool {
        self.state.has_visited(op)
    }

    /// Runs the updater for `op`, unless it has already been visited
    ///
    /// This is used when a new op replaces an old one mid-traversal: the new
    /// op's slot is marked as handled and its followers become eligible.
    pub fn update_state_for_visited(&mut self, graph: &Graph, op: OpId) {
        self.state.grow(graph.len());
        if !self.state.has_visited(op) {
            self.updater
                .update_after_visit(graph, &mut self.state, op);
        }
    }

    fn reset(&mut self, graph: &Graph) {
        self.state = VisitState::new(graph.len());
        self.updater.seed(graph, &mut self.state);
    }

    /// Returns the next unvisited op, or `None` when the work list is empty
    fn next(&mut self) -> Option<OpId> {
        while !self.state.pending.is_empty() {
            if let Some(op) = self.selector.select_next(&mut self.state) {
                if !self.state.has_visited(op) {
                    return Some(op);
                }
            }
        }
        None
    }

    fn check_complete(&self, graph: &Graph) -> Result<(), Error> {
        let total = graph.live_ops();
        let visited = graph.ops().filter(|op| self.has_visited(*op)).count();
        if visited == total {
            Ok(())
        } else {
            Err(Error::Stalled { visited, total })
        }
    }

    /// Calls `f` on every live op of the graph exactly once
    ///
    /// Returns [`Error::Stalled`] if the work list runs dry before every op
    /// is visited, which happens when the graph contains a cycle.
    pub fn visit_graph<F>(
        &mut self,
        graph: &Graph,
        mut f: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&Graph, OpId),
    {
        self.reset(graph);
        while let Some(op) = self.next() {
            f(graph, op);
            self.updater.update_after_visit(graph, &mut self.state, op);
        }
        self.check_complete(graph)
    }

    /// Calls `f` on every op of the graph, allowing `f` to edit the graph
    ///
    /// Ops appended by `f` are treated as replacements for the op being
    /// visited: they are marked as visited with
    /// [`update_state_for_visited`](Self::update_state_for_visited) rather
    /// than passed to `f`.  If `f` removes the op it was given, that op's
    /// followers must have been moved onto a replacement.
    pub fn visit_graph_mut<F>(
        &mut self,
        graph: &mut Graph,
        mut f: F,
    ) -> Result<(), Error>
    where
        F: FnMut(&mut Graph, OpId) -> Result<(), Error>,
    {
        self.reset(graph);
        while let Some(op) = self.next() {
            let prev_len = graph.len();
            f(graph, op)?;
            self.state.grow(graph.len());
            if graph.op(op).is_removed() {
                self.state.set_visited(op);
            } else {
                self.updater.update_after_visit(graph, &mut self.state, op);
            }
            for new_op in (prev_len..graph.len()).map(OpId::from) {
                self.update_state_for_visited(graph, new_op);
            }
        }
        self.check_complete(graph)
    }

    /// Returns every live op, in traversal order
    pub fn sequence(&mut self, graph: &Graph) -> Result<Vec<OpId>, Error> {
        let mut out = Vec::with_capacity(graph.len());
        self.visit_graph(graph, |_, op| out.push(op))?;
        Ok(out)
    }
}
