use serde::{Deserialize, Serialize};

/// Coarse operator category, used as a grouping tag when sorting
///
/// Ops of the same kind tend to lower to loop nests with the same structure,
/// which is what makes grouping them worthwhile.
#[allow(missing_docs)]
#[derive(
    Copy,
    Clone,
    Debug,
    Hash,
    Eq,
    PartialEq,
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
pub enum OpKind {
    Input,
    Output,
    Constant,
    Elementwise,
    Broadcast,
    Reduce,
    Reorder,
    TensorView,
    Matmul,
    Conv,
    Other,
}

impl OpKind {
    /// Checks whether this is a compute-heavy op, which other ops may be fused
    /// into as a pre-op
    pub fn is_compute_heavy(&self) -> bool {
        matches!(self, OpKind::Matmul | OpKind::Conv)
    }

    /// Checks whether ops of this kind may be moved by grouping rules
    ///
    /// Graph inputs, outputs, and constants don't generate loops, so there's
    /// nothing to gain by grouping them.
    pub fn is_groupable(&self) -> bool {
        !matches!(self, OpKind::Input | OpKind::Output | OpKind::Constant)
    }
}

/// Identifier for a fusion anchor
///
/// Ops which share an anchor will be fused into the same loop nest downstream,
/// so it pays to keep them adjacent.
#[derive(
    Copy,
    Clone,
    Debug,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct AnchorId(pub u32);

/// Optional capabilities of an op
///
/// Every capability may be absent; that's a valid state rather than an error,
/// and is the default.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpTraits {
    /// Index of the input which may be broadcast, if any
    pub broadcast_input: Option<usize>,
    /// The op can be rebuilt from its inputs, outputs, and attributes
    pub copyable: bool,
    /// The op has a quantized implementation
    pub quantizable: bool,
    /// The op may be fused into a following compute-heavy op
    pub preop_fusable: bool,
    /// Fusion anchor that this op belongs to
    pub fusion_anchor: Option<AnchorId>,
}

impl OpTraits {
    /// Checks whether the op may broadcast one of its inputs
    pub fn may_broadcast(&self) -> bool {
        self.broadcast_input.is_some()
    }
}
