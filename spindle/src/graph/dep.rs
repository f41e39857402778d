//! Pairwise dependency relation between ops
use crate::{
    Error,
    graph::{Graph, OpId, visitor::OpVisitor},
};

/// Relation between a pair of ops `(i, j)`
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[repr(i8)]
pub enum Dependency {
    /// `j` depends on `i`, directly or transitively
    Downstream = 1,
    /// `i` depends on `j`, directly or transitively
    Upstream = -1,
    /// Neither op depends on the other
    #[default]
    Unrelated = 0,
}

impl std::ops::Neg for Dependency {
    type Output = Self;
    fn neg(self) -> Self {
        match self {
            Dependency::Downstream => Dependency::Upstream,
            Dependency::Upstream => Dependency::Downstream,
            Dependency::Unrelated => Dependency::Unrelated,
        }
    }
}

impl From<Dependency> for i8 {
    fn from(d: Dependency) -> i8 {
        d as i8
    }
}

impl TryFrom<i8> for Dependency {
    type Error = i8;
    fn try_from(v: i8) -> Result<Self, i8> {
        match v {
            1 => Ok(Dependency::Downstream),
            -1 => Ok(Dependency::Upstream),
            0 => Ok(Dependency::Unrelated),
            v => Err(v),
        }
    }
}

/// Dense `N × N` dependency matrix over op ids
///
/// The matrix is the transitive closure of the producer → consumer relation,
/// so any pair can be checked in constant time.  It's used to validate
/// reorderings of an op sequence.
///
/// Entries are antisymmetric: `lookup(i, j) == -lookup(j, i)` for every pair.
#[derive(Clone, Debug, Default)]
pub struct OpDepMatrix {
    size: usize,
    data: Vec<Dependency>,
}

static_assertions::assert_impl_all!(OpDepMatrix: Send, Sync);

impl OpDepMatrix {
    /// Builds an all-`Unrelated` matrix for `n` ops
    pub fn with_size(n: usize) -> Self {
        Self {
            size: n,
            data: vec![Dependency::Unrelated; n * n],
        }
    }

    /// Builds the full matrix for a graph, with one topological traversal
    ///
    /// Returns [`Error::Stalled`] if the graph contains a cycle.
    pub fn new(graph: &Graph) -> Result<Self, Error> {
        let mut out = Self::with_size(graph.len());
        OpVisitor::dfs_topology_sort(graph.len())
            .visit_graph(graph, |g, op| out.update(g, op))?;
        Ok(out)
    }

    /// Returns the number of rows (and columns) in the matrix
    pub fn size(&self) -> usize {
        self.size
    }

    fn grow(&mut self, n: usize) {
        let mut data = vec![Dependency::Unrelated; n * n];
        for i in 0..self.size {
            data[i * n..i * n + self.size].copy_from_slice(
                &self.data[i * self.size..(i + 1) * self.size],
            );
        }
        self.data = data;
        self.size = n;
    }

    fn set(&mut self, i: usize, j: usize, d: Dependency) {
        self.data[i * self.size + j] = d;
        self.data[j * self.size + i] = -d;
    }

    /// Adds the dependencies of `op` to the matrix
    ///
    /// Each producer of `op` must already be present, i.e. ops are added in a
    /// topological order.  `op` picks up the union of its producers' upstream
    /// sets; the matrix grows if `op` is past its current size.
    pub fn update(&mut self, graph: &Graph, op: OpId) {
        let j = op.get();
        if j >= self.size {
            self.grow(graph.len().max(j + 1));
        }
        for p in graph.producers(op) {
            let p = p.get();
            self.set(p, j, Dependency::Downstream);
            for k in 0..self.size {
                if self.data[k * self.size + p] == Dependency::Downstream {
                    self.set(k, j, Dependency::Downstream);
                }
            }
        }
    }

    /// Looks up the relation between `i` and `j`
    ///
    /// # Panics
    /// If either op is out of range for the matrix
    pub fn lookup(&self, i: OpId, j: OpId) -> Dependency {
        let (i, j) = (i.get(), j.get());
        assert!(
            i < self.size && j < self.size,
            "lookup of ({i}, {j}) is out of range for a {0}×{0} matrix",
            self.size
        );
        self.data[i * self.size + j]
    }

    /// Checks whether `a` depends (directly or transitively) on `b`
    pub fn depends_on(&self, a: OpId, b: OpId) -> bool {
        self.lookup(b, a) == Dependency::Downstream
    }
}
