//! Operator graphs, stored as an arena of ops and logical tensors
//!
//! Ops never point at each other directly: each op lists the logical tensors
//! that it reads and writes, and each tensor records its producer and uses.
//! Everything is addressed by dense integer ids ([`OpId`], [`TensorId`]),
//! which lets the visitors and the dependency matrix use plain bitmaps and
//! arrays indexed by id.
//!
//! ```
//! use spindle::graph::{Graph, OpKind, visitor::OpVisitor};
//!
//! let mut g = Graph::new();
//! let (a, a_out) = g.add_op("a", OpKind::Input, &[], 1)?;
//! let (b, b_out) = g.add_op("b", OpKind::Elementwise, &a_out, 1)?;
//! let (c, _) = g.add_op("c", OpKind::Output, &b_out, 0)?;
//!
//! let order = OpVisitor::dfs_topology_sort(g.len()).sequence(&g)?;
//! assert_eq!(order, vec![a, b, c]);
//! # Ok::<(), spindle::Error>(())
//! ```
use crate::{
    Error,
    indexed::{IndexVec, define_index},
};

mod op;
pub use op::{AnchorId, OpKind, OpTraits};

pub mod dep;
pub mod sort;
pub mod visitor;

define_index!(OpId, "An index in the `Graph::ops` array");
define_index!(TensorId, "An index in the `Graph::tensors` array");

/// A single use of a logical tensor, as input `slot` of op `op`
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Use {
    /// Consumer op
    pub op: OpId,
    /// Input slot of the consumer
    pub slot: usize,
}

/// A logical tensor is an edge in the graph, connecting one producer to any
/// number of consumers.
#[derive(Clone, Debug, Default)]
pub struct LogicalTensor {
    producer: Option<OpId>,
    uses: Vec<Use>,
    bytes: usize,
}

impl LogicalTensor {
    /// Returns the op which writes this tensor
    ///
    /// This is `None` for tensors fed in from outside the graph.
    pub fn producer(&self) -> Option<OpId> {
        self.producer
    }
    /// Returns every use of this tensor, in insertion order
    pub fn uses(&self) -> &[Use] {
        &self.uses
    }
    /// Returns the size hint (in bytes) given at construction
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// A single operator in the graph
#[derive(Clone, Debug)]
pub struct OpNode {
    name: String,
    kind: OpKind,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    traits: OpTraits,
    removed: bool,
}

#[allow(missing_docs)]
impl OpNode {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> OpKind {
        self.kind
    }
    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }
    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }
    pub fn traits(&self) -> &OpTraits {
        &self.traits
    }
    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

/// Arena holding every op and logical tensor of a graph
///
/// Op ids are assigned in insertion order and are never reused; removing an
/// op leaves a tombstone behind, so ids stay dense and stable.
#[derive(Clone, Debug, Default)]
pub struct Graph {
    ops: IndexVec<OpNode, OpId>,
    tensors: IndexVec<LogicalTensor, TensorId>,
}

impl Graph {
    /// Builds a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a new empty graph, reserving room for `total_nodes_hint` ops
    pub fn with_capacity(total_nodes_hint: usize) -> Self {
        Self {
            ops: IndexVec::with_capacity(total_nodes_hint),
            tensors: IndexVec::with_capacity(total_nodes_hint),
        }
    }

    /// Returns the size of the op id space, including removed ops
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Checks whether the graph has no ops (live or removed)
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Returns the number of ops which have not been removed
    pub fn live_ops(&self) -> usize {
        self.ops.iter().filter(|op| !op.removed).count()
    }

    /// Returns the number of logical tensors
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    fn check_tensor(&self, t: TensorId) -> Result<(), Error> {
        self.tensors.get(t).map(|_| ()).ok_or(Error::BadTensor(t.get()))
    }

    fn check_op(&self, op: OpId) -> Result<&OpNode, Error> {
        match self.ops.get(op) {
            Some(n) if !n.removed => Ok(n),
            _ => Err(Error::BadOp(op.get())),
        }
    }

    /// Adds a logical tensor with no producer (e.g. a graph input)
    pub fn add_tensor(&mut self, bytes: usize) -> TensorId {
        self.tensors.push(LogicalTensor {
            producer: None,
            uses: vec![],
            bytes,
        })
    }

    /// Adds an op which reads `inputs` and writes `n_outputs` new tensors
    ///
    /// Returns the new op and its output tensors.
    pub fn add_op(
        &mut self,
        name: &str,
        kind: OpKind,
        inputs: &[TensorId],
        n_outputs: usize,
    ) -> Result<(OpId, Vec<TensorId>), Error> {
        for &t in inputs {
            self.check_tensor(t)?;
        }
        let outputs: Vec<TensorId> =
            (0..n_outputs).map(|_| self.add_tensor(0)).collect();
        let op = self.insert(name, kind, inputs, &outputs);
        Ok((op, outputs))
    }

    /// Adds an op which writes existing tensors
    ///
    /// Each output must not already have a producer.
    pub fn add_op_with_outputs(
        &mut self,
        name: &str,
        kind: OpKind,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<OpId, Error> {
        for &t in inputs.iter().chain(outputs) {
            self.check_tensor(t)?;
        }
        for (i, &t) in outputs.iter().enumerate() {
            if self.tensors[t].producer.is_some() || outputs[..i].contains(&t)
            {
                return Err(Error::TensorHasProducer(t.get()));
            }
        }
        Ok(self.insert(name, kind, inputs, outputs))
    }

    fn insert(
        &mut self,
        name: &str,
        kind: OpKind,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> OpId {
        let op = self.ops.push(OpNode {
            name: name.to_owned(),
            kind,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            traits: OpTraits::default(),
            removed: false,
        });
        for (slot, &t) in inputs.iter().enumerate() {
            self.tensors[t].uses.push(Use { op, slot });
        }
        for &t in outputs {
            self.tensors[t].producer = Some(op);
        }
        op
    }

    /// Replaces the capability set of the given op
    pub fn set_traits(
        &mut self,
        op: OpId,
        traits: OpTraits,
    ) -> Result<(), Error> {
        self.check_op(op)?;
        self.ops[op].traits = traits;
        Ok(())
    }

    /// Looks up an op by id
    ///
    /// # Panics
    /// If the id is out of range for this graph
    pub fn op(&self, op: OpId) -> &OpNode {
        &self.ops[op]
    }

    /// Looks up an op by id, returning `None` if it's out of range
    pub fn get_op(&self, op: OpId) -> Option<&OpNode> {
        self.ops.get(op)
    }

    /// Looks up a logical tensor by id
    ///
    /// # Panics
    /// If the id is out of range for this graph
    pub fn tensor(&self, t: TensorId) -> &LogicalTensor {
        &self.tensors[t]
    }

    /// Iterates over every live op, in id order
    pub fn ops(&self) -> impl Iterator<Item = OpId> + '_ {
        self.ops
            .enumerate()
            .filter(|(_, op)| !op.removed)
            .map(|(i, _)| i)
    }

    /// Returns the distinct ops which produce inputs of `op`, in input order
    pub fn producers(&self, op: OpId) -> Vec<OpId> {
        let mut out = vec![];
        for &t in &self.ops[op].inputs {
            if let Some(p) = self.tensors[t].producer {
                if !out.contains(&p) {
                    out.push(p);
                }
            }
        }
        out
    }

    /// Returns the distinct ops which consume outputs of `op`, in use order
    pub fn consumers(&self, op: OpId) -> Vec<OpId> {
        let mut out = vec![];
        for &t in &self.ops[op].outputs {
            for u in &self.tensors[t].uses {
                if !out.contains(&u.op) {
                    out.push(u.op);
                }
            }
        }
        out
    }

    /// Returns the number of input edges of `op` which come from another op
    pub(crate) fn produced_input_count(&self, op: OpId) -> usize {
        self.ops[op]
            .inputs
            .iter()
            .filter(|t| self.tensors[**t].producer.is_some())
            .count()
    }

    /// Returns the number of uses of every output of `op`
    pub(crate) fn output_use_count(&self, op: OpId) -> usize {
        self.ops[op]
            .outputs
            .iter()
            .map(|t| self.tensors[*t].uses.len())
            .sum()
    }

    /// Returns live ops with no producer predecessors, in id order
    pub fn sources(&self) -> Vec<OpId> {
        self.ops()
            .filter(|op| self.produced_input_count(*op) == 0)
            .collect()
    }

    /// Returns live ops whose outputs are never used, in id order
    pub fn sinks(&self) -> Vec<OpId> {
        self.ops()
            .filter(|op| self.output_use_count(*op) == 0)
            .collect()
    }

    /// Removes an op from the graph
    ///
    /// The op's id stays reserved.  Its uses are detached from its input
    /// tensors, and its output tensors lose their producer; any remaining
    /// consumers of those outputs then read a graph-external tensor.
    pub fn remove_op(&mut self, op: OpId) -> Result<(), Error> {
        self.check_op(op)?;
        let node = &mut self.ops[op];
        node.removed = true;
        let inputs = std::mem::take(&mut node.inputs);
        let outputs = std::mem::take(&mut node.outputs);
        for t in inputs {
            self.tensors[t].uses.retain(|u| u.op != op);
        }
        for t in outputs {
            self.tensors[t].producer = None;
        }
        Ok(())
    }

    /// Retargets every use of tensor `old` to tensor `new`
    ///
    /// This is used by passes which replace an op with a new one: after
    /// building the replacement, its outputs take over the old op's uses.
    pub fn replace_uses(
        &mut self,
        old: TensorId,
        new: TensorId,
    ) -> Result<(), Error> {
        self.check_tensor(old)?;
        self.check_tensor(new)?;
        if old == new {
            return Ok(());
        }
        let uses = std::mem::take(&mut self.tensors[old].uses);
        for u in &uses {
            self.ops[u.op].inputs[u.slot] = new;
        }
        self.tensors[new].uses.extend(uses);
        Ok(())
    }
}
