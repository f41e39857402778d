//! Greedy assignment of local tensors to shared storage
use super::{
    Reuse,
    ticks::{Intervals, TensorInfo},
};
use crate::{
    config::SchedulerMode,
    indexed::IndexVec,
    ir::{Func, IrTensorId, Stmt},
};
use bit_set::BitSet;
use log::trace;
use std::cmp::Reverse;

/// Working state while matching tensors
struct Planner<'a> {
    func: &'a Func,

    /// Intervals before any matching; argument donors are checked against
    /// their own first access
    orig: &'a Intervals,

    /// Intervals of every tensor, extended as receivers are merged in
    infos: IndexVec<Option<TensorInfo>, IrTensorId>,

    /// Current size of each tensor's storage, which grows as donors absorb
    /// larger receivers
    bytes: IndexVec<usize, IrTensorId>,
}

impl Planner<'_> {
    /// Checks whether `cur` may be placed into `cand`'s storage
    fn is_valid(&self, cur: IrTensorId, cand: IrTensorId) -> bool {
        let (Some(u), Some(c)) = (&self.infos[cur], &self.infos[cand]) else {
            return false;
        };
        let Some(first) = u.first_access else {
            return false;
        };
        let last = u.last_access().unwrap_or(first);
        if self.bytes[cand] == 0
            || c.last_read.is_some_and(|r| first <= r)
            || first < c.creation
            || u.deletion > c.deletion
            || c.written_in(first, last)
        {
            return false;
        }
        if self.func.tensors[cand].is_arg() {
            // The caller owns the argument's storage, so it can't grow, and
            // we must be done with it before the function touches it.  An
            // argument which is never touched must keep the caller's data.
            let Some(own_first) =
                self.orig.get(cand).and_then(|i| i.first_access)
            else {
                return false;
            };
            let clobbers = u.last_write().is_some_and(|w| w >= own_first);
            if clobbers || self.bytes[cand] < self.bytes[cur] {
                return false;
            }
        }
        true
    }

    fn growth(&self, cur: IrTensorId, cand: IrTensorId) -> usize {
        self.bytes[cur].saturating_sub(self.bytes[cand])
    }

    fn pick(
        &self,
        mode: SchedulerMode,
        cur: IrTensorId,
        candidates: &[IrTensorId],
    ) -> Option<IrTensorId> {
        let mut valid = candidates
            .iter()
            .copied()
            .filter(|c| self.is_valid(cur, *c));
        match mode {
            SchedulerMode::None => None,
            SchedulerMode::WholeBuffer => valid.next(),
            SchedulerMode::MinimizeSize => valid
                .min_by_key(|c| (self.growth(cur, *c), self.bytes[*c])),
            SchedulerMode::HotMemoryFirst => valid.min_by_key(|c| {
                let last =
                    self.infos[*c].as_ref().and_then(|i| i.last_access());
                (Reverse(last), self.growth(cur, *c))
            }),
        }
    }

    fn merge(&mut self, cur: IrTensorId, donor: IrTensorId) {
        if let Some(u) = self.infos[cur].clone() {
            if let Some(d) = self.infos[donor].as_mut() {
                d.absorb(&u);
            }
        }
        self.bytes[donor] = self.bytes[donor].max(self.bytes[cur]);
    }
}

/// Matches locals of `f` against earlier locals and arguments, then rewrites
/// `f` so that each matched local uses its donor's storage
pub(crate) fn run(
    f: &mut Func,
    iv: &Intervals,
    mode: SchedulerMode,
) -> Vec<Reuse> {
    let reuse = plan(f, iv, mode);
    if !reuse.is_empty() {
        apply(f, &reuse);
    }
    reuse
}

fn plan(f: &Func, iv: &Intervals, mode: SchedulerMode) -> Vec<Reuse> {
    let mut p = Planner {
        func: f,
        orig: iv,
        infos: iv.infos.clone(),
        bytes: f.tensors.iter().map(|t| t.bytes()).collect(),
    };
    // Locals which kept their own storage, in creation order, followed by
    // the arguments
    let mut candidates: Vec<IrTensorId> = f
        .params
        .iter()
        .copied()
        .filter(|t| !f.tensors[*t].dont_schedule)
        .collect();
    let mut owners = 0;

    let mut out = vec![];
    for cur in f.defined_locals() {
        if f.tensors[cur].dont_schedule
            || iv.get(cur).is_none_or(|i| i.first_access.is_none())
        {
            continue;
        }
        match p.pick(mode, cur, &candidates) {
            Some(donor) => {
                trace!(
                    "placing {} into {}",
                    f.tensors[cur].name,
                    f.tensors[donor].name
                );
                p.merge(cur, donor);
                out.push(Reuse { tensor: cur, donor });
            }
            None => {
                candidates.insert(owners, cur);
                owners += 1;
            }
        }
    }
    out
}

fn apply(f: &mut Func, reuse: &[Reuse]) {
    let mut remap: IndexVec<IrTensorId, IrTensorId> =
        f.tensors.keys().collect();
    let mut moved = BitSet::with_capacity(f.tensors.len());
    let mut need = IndexVec::<usize, IrTensorId>::new();
    need.resize(f.tensors.len(), 0);
    for r in reuse {
        remap[r.tensor] = r.donor;
        moved.insert(r.tensor.get());
        need[r.donor] = need[r.donor].max(f.tensors[r.tensor].bytes());
    }

    f.body.retain(&mut |s| {
        !matches!(s, Stmt::Define(t) if moved.contains(t.get()))
    });
    f.body.for_each_tensor_mut(&mut |t| *t = remap[*t]);

    for (i, t) in f.tensors.iter_mut().enumerate() {
        let n = need[IrTensorId::from(i)];
        if n > t.bytes() && t.elem_bytes > 0 {
            t.dims[0] = n.div_ceil(t.elem_bytes);
        }
    }
}
