//! Module containing the universal error type
use thiserror::Error;

/// Universal error type for `spindle`
#[derive(Error, Debug)]
pub enum Error {
    /// Op is not present in this `Graph`
    #[error("op {0} is not present in this `Graph`")]
    BadOp(usize),

    /// Logical tensor is not present in this `Graph`
    #[error("tensor {0} is not present in this `Graph`")]
    BadTensor(usize),

    /// Logical tensor already has a producer
    #[error("tensor {0} already has a producer op")]
    TensorHasProducer(usize),

    /// Traversal ran out of work before visiting every op
    ///
    /// Under a topological visitor, this means that the graph contains a cycle
    /// (no op in the cycle ever has all of its predecessors visited).
    #[error("traversal stalled after visiting {visited} of {total} ops")]
    Stalled {
        /// Number of ops visited before the traversal stalled
        visited: usize,
        /// Number of live ops in the graph
        total: usize,
    },

    /// A sorting rule placed an op before one of its producers
    #[error("sorting rule placed op {before} before its producer op {after}")]
    RuleViolation {
        /// Consumer which was moved too early
        before: usize,
        /// Producer which now comes after its consumer
        after: usize,
    },

    /// A sorting rule added, dropped, or duplicated ops
    #[error("sorting rule did not return a permutation of its input")]
    NotAPermutation,

    /// Unknown sorting rule name
    #[error("unknown sorting rule {0}")]
    UnknownSortRule(String),

    /// Tensor has not been flattened to a single dimension
    #[error("tensor {0} is not flattened to one dimension")]
    NotFlattened(String),

    /// IR tensor is not present in this `Func`
    #[error("tensor {0} is not present in this `Func`")]
    BadIrTensor(usize),

    /// Invalid tensor definition
    #[error("invalid definition of tensor {0}")]
    BadDefine(String),

    /// Unknown numeric buffer scheduler mode
    #[error("unknown buffer scheduler mode {0}")]
    BadSchedulerMode(u8),
}
