//! Rule-based reordering of op sequences
//!
//! Sorting starts from a topological sequence, then applies heuristic rules
//! which move ops around to improve downstream fusion.  Each rule is a
//! function which permutes the sequence in place, consulting an
//! [`OpDepMatrix`] so that no op is moved past one of its producers or
//! consumers.
//!
//! Rule results are checked after every application; a rule which breaks the
//! partial order is reported as [`Error::RuleViolation`].
//!
//! ```
//! use spindle::graph::{Graph, OpKind, sort::{OpSortingVisitor, SortRule}};
//!
//! let mut g = Graph::new();
//! let (x, x_out) = g.add_op("x", OpKind::Input, &[], 1)?;
//! let (add, _) = g.add_op("add", OpKind::Elementwise, &x_out, 1)?;
//! let (sum, _) = g.add_op("sum", OpKind::Reduce, &x_out, 1)?;
//! let (mul, _) = g.add_op("mul", OpKind::Elementwise, &x_out, 1)?;
//!
//! let v = OpSortingVisitor::default();
//! assert_eq!(v.sort_by_rules(&g, &[])?, [x, mul, sum, add]);
//! assert_eq!(v.sort_by_rules(&g, &[SortRule::SameKind])?, [x, mul, add, sum]);
//! # Ok::<(), spindle::Error>(())
//! ```
use crate::{
    Error,
    graph::{
        Graph, OpId, OpNode,
        dep::OpDepMatrix,
        visitor::{DEFAULT_NODES_HINT, OpVisitor},
    },
};
use bit_set::BitSet;
use log::{debug, trace};
use serde::{Deserialize, Serialize};

/// Signature of a sorting rule
///
/// The rule receives the graph, the sequence to permute in place, and the
/// dependency matrix of the graph.
pub type RuleFn = dyn Fn(&Graph, &mut Vec<OpId>, &OpDepMatrix);

/// Predefined sorting rules
///
/// Rules are applied in declaration order, regardless of the order in which
/// they are requested.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SortRule {
    /// Pull ops of the same [`OpKind`](crate::graph::OpKind) together
    SameKind,
    /// Pull ops sharing a fusion anchor together
    FusionAnchor,
    /// Move pre-op-fusable ops to just before their compute-heavy consumer
    PreopFusion,
}

impl SortRule {
    /// Applies this rule to a sequence
    pub fn apply(&self, graph: &Graph, seq: &mut Vec<OpId>, dep: &OpDepMatrix) {
        match self {
            SortRule::SameKind => same_kind_rule(graph, seq, dep),
            SortRule::FusionAnchor => fusion_anchor_rule(graph, seq, dep),
            SortRule::PreopFusion => preop_fusion_rule(graph, seq, dep),
        }
    }

    /// Parses a comma-separated list of rule names
    ///
    /// Whitespace around names is ignored, as are empty entries.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, Error> {
        s.split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(|r| {
                r.parse::<SortRule>()
                    .map_err(|_| Error::UnknownSortRule(r.to_owned()))
            })
            .collect()
    }
}

/// Pulls each op back to sit right after the nearest earlier op with the same
/// key, unless that would move it before one of its producers
fn group_by_key<K, F>(
    graph: &Graph,
    seq: &mut [OpId],
    dep: &OpDepMatrix,
    key: F,
) where
    K: Eq,
    F: Fn(&OpNode) -> Option<K>,
{
    for i in 1..seq.len() {
        let op = seq[i];
        let Some(k) = key(graph.op(op)) else {
            continue;
        };
        let mut target = None;
        for j in (0..i).rev() {
            if key(graph.op(seq[j])).as_ref() == Some(&k) {
                target = Some(j);
                break;
            } else if dep.depends_on(op, seq[j]) {
                break;
            }
        }
        if let Some(j) = target {
            if j + 1 < i {
                trace!("moving {} from {i} to {}", graph.op(op).name(), j + 1);
                seq[j + 1..=i].rotate_right(1);
            }
        }
    }
}

/// Groups ops of the same kind, to reduce the variety of loop nests
pub fn same_kind_rule(graph: &Graph, seq: &mut Vec<OpId>, dep: &OpDepMatrix) {
    group_by_key(graph, seq, dep, |op| {
        op.kind().is_groupable().then_some(op.kind())
    })
}

/// Groups ops which belong to the same fusion anchor
pub fn fusion_anchor_rule(
    graph: &Graph,
    seq: &mut Vec<OpId>,
    dep: &OpDepMatrix,
) {
    group_by_key(graph, seq, dep, |op| op.traits().fusion_anchor)
}

/// Moves pre-op-fusable ops later, toward their compute-heavy consumer
///
/// The op stops right before the first op which depends on it; when nothing
/// else is in the way, that's the fusion target itself.
pub fn preop_fusion_rule(
    graph: &Graph,
    seq: &mut Vec<OpId>,
    dep: &OpDepMatrix,
) {
    for i in (0..seq.len()).rev() {
        let op = seq[i];
        if !graph.op(op).traits().preop_fusable
            || !graph
                .consumers(op)
                .iter()
                .any(|c| graph.op(*c).kind().is_compute_heavy())
        {
            continue;
        }
        let mut dest = i;
        for (k, next) in seq.iter().enumerate().skip(i + 1) {
            if dep.depends_on(*next, op) {
                break;
            }
            dest = k;
        }
        if dest > i {
            trace!("moving {} from {i} to {dest}", graph.op(op).name());
            seq[i..=dest].rotate_left(1);
        }
    }
}

/// Checks that `seq` is a permutation of `baseline` which respects `dep`
pub fn validate_order(
    baseline: &[OpId],
    seq: &[OpId],
    dep: &OpDepMatrix,
) -> Result<(), Error> {
    if baseline.len() != seq.len() {
        return Err(Error::NotAPermutation);
    }
    let expected: BitSet = baseline.iter().map(|op| op.get()).collect();
    let mut seen = BitSet::with_capacity(dep.size());
    for op in seq {
        if !expected.contains(op.get()) || !seen.insert(op.get()) {
            return Err(Error::NotAPermutation);
        }
    }
    for (i, &a) in seq.iter().enumerate() {
        for &b in &seq[i + 1..] {
            if dep.depends_on(a, b) {
                return Err(Error::RuleViolation {
                    before: a.get(),
                    after: b.get(),
                });
            }
        }
    }
    Ok(())
}

/// Visitor which produces an op sequence reordered by sorting rules
#[derive(Copy, Clone, Debug)]
pub struct OpSortingVisitor {
    total_nodes_hint: usize,
}

impl Default for OpSortingVisitor {
    fn default() -> Self {
        Self::new(DEFAULT_NODES_HINT)
    }
}

impl OpSortingVisitor {
    /// Builds a new sorting visitor
    ///
    /// `total_nodes_hint` is passed to the underlying topological visitor.
    pub fn new(total_nodes_hint: usize) -> Self {
        Self { total_nodes_hint }
    }

    /// Returns a topological baseline and the matching dependency matrix
    fn baseline(
        &self,
        graph: &Graph,
    ) -> Result<(Vec<OpId>, OpDepMatrix), Error> {
        let seq = OpVisitor::dfs_topology_sort(self.total_nodes_hint)
            .sequence(graph)?;
        let mut dep = OpDepMatrix::with_size(graph.len());
        for &op in &seq {
            dep.update(graph, op);
        }
        Ok((seq, dep))
    }

    /// Sorts the graph's ops with a set of predefined rules
    ///
    /// Rules are applied in priority order; duplicates are ignored.
    pub fn sort_by_rules(
        &self,
        graph: &Graph,
        rules: &[SortRule],
    ) -> Result<Vec<OpId>, Error> {
        let mut rules = rules.to_vec();
        rules.sort();
        rules.dedup();

        let (baseline, dep) = self.baseline(graph)?;
        let mut seq = baseline.clone();
        for r in &rules {
            r.apply(graph, &mut seq, &dep);
            validate_order(&baseline, &seq, &dep)?;
            debug!("applied sorting rule {r}");
        }
        Ok(seq)
    }

    /// Sorts the graph's ops with a user-supplied rule
    pub fn sort_by_rule_fn(
        &self,
        graph: &Graph,
        rule: &RuleFn,
    ) -> Result<Vec<OpId>, Error> {
        let (baseline, dep) = self.baseline(graph)?;
        let mut seq = baseline.clone();
        rule(graph, &mut seq, &dep);
        validate_order(&baseline, &seq, &dep)?;
        Ok(seq)
    }

    /// Calls `f` on every op, in the order produced by a set of rules
    pub fn visit_by_rules<F>(
        &self,
        graph: &Graph,
        mut f: F,
        rules: &[SortRule],
    ) -> Result<(), Error>
    where
        F: FnMut(&Graph, OpId),
    {
        for op in self.sort_by_rules(graph, rules)? {
            f(graph, op);
        }
        Ok(())
    }

    /// Calls `f` on every op, in the order produced by a user-supplied rule
    pub fn visit_by_rule_fn<F>(
        &self,
        graph: &Graph,
        mut f: F,
        rule: &RuleFn,
    ) -> Result<(), Error>
    where
        F: FnMut(&Graph, OpId),
    {
        for op in self.sort_by_rule_fn(graph, rule)? {
            f(graph, op);
        }
        Ok(())
    }
}
