//! Tick assignment and live-interval collection
//!
//! Ticks are assigned by a single pre-order walk of the function body.  Tick 0
//! is function entry, where arguments are created; every leaf statement,
//! block end, and loop or conditional header gets its own tick after that.
use crate::{
    Error,
    indexed::IndexVec,
    ir::{Expr, Func, IrTensorId, Stmt, TensorKind},
};
use std::collections::BTreeSet;

/// Position in the linearized function body
pub type Tick = usize;

/// Live interval of a single tensor
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TensorInfo {
    /// Tick at which the tensor is allocated
    pub creation: Tick,
    /// Tick at which the tensor goes out of scope
    pub deletion: Tick,
    /// First read or write, if any
    pub first_access: Option<Tick>,
    /// Last read, if any
    pub last_read: Option<Tick>,
    /// Every tick at which the tensor is written
    pub writes: BTreeSet<Tick>,
    /// Loops which write the tensor, as `(start, end)` ticks
    ///
    /// Writes inside such a loop are recorded at its end tick, but happen on
    /// every iteration, so the whole span counts as written.
    pub loop_writes: BTreeSet<(Tick, Tick)>,
}

impl TensorInfo {
    fn new(creation: Tick) -> Self {
        Self {
            creation,
            deletion: creation,
            ..Self::default()
        }
    }

    /// Returns the last write, if any
    pub fn last_write(&self) -> Option<Tick> {
        self.writes.last().copied()
    }

    /// Returns the last read or write, if any
    pub fn last_access(&self) -> Option<Tick> {
        self.last_read.max(self.last_write())
    }

    /// Checks whether the tensor may be written anywhere in `[lo, hi]`
    pub fn written_in(&self, lo: Tick, hi: Tick) -> bool {
        self.writes.range(lo..=hi).next().is_some()
            || self.loop_writes.iter().any(|&(s, e)| s <= hi && lo <= e)
    }

    fn access(&mut self, tick: Tick, read: bool, write: bool) {
        self.first_access =
            Some(self.first_access.map_or(tick, |t| t.min(tick)));
        if read {
            self.last_read = self.last_read.max(Some(tick));
        }
        if write {
            self.writes.insert(tick);
        }
    }

    /// Extends this interval to cover another tensor's accesses
    ///
    /// This is used when the other tensor is moved into this one's storage.
    pub(crate) fn absorb(&mut self, other: &TensorInfo) {
        self.first_access = match (self.first_access, other.first_access) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_read = self.last_read.max(other.last_read);
        self.writes.extend(other.writes.iter().copied());
        self.loop_writes.extend(other.loop_writes.iter().copied());
    }
}

/// Live intervals for every tensor in a function
#[derive(Clone, Debug)]
pub struct Intervals {
    /// Per-tensor interval, or `None` for locals which are never defined
    pub infos: IndexVec<Option<TensorInfo>, IrTensorId>,
    /// Effective tick of every `Store`, in pre-order
    pub store_ticks: Vec<Tick>,
    /// Final tick, at which arguments are deleted
    pub end: Tick,
}

impl Intervals {
    /// Looks up the interval of a tensor
    pub fn get(&self, t: IrTensorId) -> Option<&TensorInfo> {
        self.infos.get(t).and_then(Option::as_ref)
    }
}

/// Access waiting for the end of a loop
struct Pending {
    tensor: IrTensorId,
    read: bool,
    write: bool,
    store: Option<usize>,
}

#[derive(Copy, Clone)]
struct Span {
    start: Tick,
    end: Tick,
}

struct LoopFrame {
    start: Tick,
    pending: Vec<Pending>,
}

struct Collector<'a> {
    func: &'a Func,
    tick: Tick,
    infos: IndexVec<Option<TensorInfo>, IrTensorId>,
    store_ticks: Vec<Tick>,

    /// Enclosing loops, outermost first
    loops: Vec<LoopFrame>,

    /// Locals defined in each enclosing block, outermost first
    scopes: Vec<Vec<IrTensorId>>,
}

impl Collector<'_> {
    fn next_tick(&mut self) -> Tick {
        self.tick += 1;
        self.tick
    }

    fn bad_define(&self, t: IrTensorId) -> Error {
        Error::BadDefine(self.func.tensors[t].name.clone())
    }

    /// Records an access at `tick`, or at the end of a loop span
    fn record(&mut self, p: Pending, tick: Tick, span: Option<Span>) {
        let tensor = &self.func.tensors[p.tensor];
        if let Some(info) = self.infos[p.tensor].as_mut() {
            info.access(tick, p.read, p.write);
            if let (true, Some(s)) = (p.write, span) {
                info.loop_writes.insert((s.start, s.end));
            }
            if let Some(h) = tensor.hint_first_access {
                let t = tick.saturating_add_signed(h).max(info.creation);
                info.first_access = info.first_access.map(|f| f.min(t));
            }
            if let Some(h) = tensor.hint_last_access {
                let t = tick.saturating_add_signed(h);
                info.last_read = info.last_read.max(Some(t));
            }
        }
        if let Some(i) = p.store {
            self.store_ticks[i] = tick;
        }
    }

    /// Records an access at the current tick
    ///
    /// If the tensor was created outside of an enclosing loop, the access is
    /// deferred to the end of the outermost such loop, since it happens on
    /// every iteration.
    fn access(
        &mut self,
        tensor: IrTensorId,
        read: bool,
        write: bool,
        store: Option<usize>,
    ) -> Result<(), Error> {
        self.func.tensor(tensor)?;
        let Some(creation) = self.infos[tensor].as_ref().map(|i| i.creation)
        else {
            return Err(self.bad_define(tensor));
        };
        let p = Pending {
            tensor,
            read,
            write,
            store,
        };
        match self.loops.iter().position(|l| l.start > creation) {
            Some(i) => self.loops[i].pending.push(p),
            None => self.record(p, self.tick, None),
        }
        Ok(())
    }

    fn expr(&mut self, e: &Expr) -> Result<(), Error> {
        match e {
            Expr::Const(..) | Expr::Var(..) => Ok(()),
            Expr::Load { tensor, index } => {
                self.access(*tensor, true, false, None)?;
                self.expr(index)
            }
            Expr::Tensor(t) => self.access(*t, true, true, None),
            Expr::TensorPtr { tensor, offset } => {
                self.access(*tensor, true, true, None)?;
                self.expr(offset)
            }
            Expr::Binary(_, a, b) => {
                self.expr(a)?;
                self.expr(b)
            }
            Expr::Call { callee, args } => {
                let annotated = callee.params.len() == args.len();
                for (i, a) in args.iter().enumerate() {
                    let acc = if annotated { callee.params[i] } else { None };
                    let read = acc.is_none_or(|a| a.reads());
                    let write = acc.is_none_or(|a| a.writes());
                    match a {
                        Expr::Tensor(t) => self.access(*t, read, write, None)?,
                        Expr::TensorPtr { tensor, offset } => {
                            self.access(*tensor, read, write, None)?;
                            self.expr(offset)?;
                        }
                        a => self.expr(a)?,
                    }
                }
                Ok(())
            }
        }
    }

    fn stmt(&mut self, s: &Stmt) -> Result<(), Error> {
        match s {
            Stmt::Block(v) => {
                self.scopes.push(vec![]);
                for s in v {
                    self.stmt(s)?;
                }
                let end = self.next_tick();
                self.close_scope(end);
            }
            Stmt::Define(t) => {
                let tick = self.next_tick();
                let tensor = self.func.tensor(*t)?;
                let defined = self.infos[*t].is_some();
                if tensor.kind != TensorKind::Local || defined {
                    return Err(self.bad_define(*t));
                }
                self.infos[*t] = Some(TensorInfo::new(tick));
                if let Some(scope) = self.scopes.last_mut() {
                    scope.push(*t);
                }
            }
            Stmt::Store {
                tensor,
                index,
                value,
            } => {
                self.next_tick();
                self.expr(index)?;
                self.expr(value)?;
                let i = self.store_ticks.len();
                self.store_ticks.push(self.tick);
                self.access(*tensor, false, true, Some(i))?;
            }
            Stmt::Eval(e) | Stmt::Return(Some(e)) => {
                self.next_tick();
                self.expr(e)?;
            }
            Stmt::Return(None) => {
                self.next_tick();
            }
            Stmt::For {
                begin,
                end,
                step,
                body,
                ..
            } => {
                let start = self.next_tick();
                self.loops.push(LoopFrame {
                    start,
                    pending: vec![],
                });
                self.expr(begin)?;
                self.expr(end)?;
                self.expr(step)?;
                self.stmt(body)?;
                let end = self.next_tick();
                if let Some(frame) = self.loops.pop() {
                    let span = Span { start, end };
                    for p in frame.pending {
                        self.record(p, end, Some(span));
                    }
                }
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                self.next_tick();
                self.expr(cond)?;
                self.stmt(then)?;
                if let Some(e) = otherwise {
                    self.stmt(e)?;
                }
            }
        }
        Ok(())
    }

    fn close_scope(&mut self, end: Tick) {
        for t in self.scopes.pop().unwrap_or_default() {
            if let Some(info) = self.infos[t].as_mut() {
                info.deletion = end;
            }
        }
    }
}

/// Assigns ticks to the body of `f` and collects every tensor's interval
pub fn collect_ticks(f: &Func) -> Result<Intervals, Error> {
    let mut c = Collector {
        func: f,
        tick: 0,
        infos: IndexVec::new(),
        store_ticks: vec![],
        loops: vec![],
        scopes: vec![vec![]],
    };
    c.infos.resize(f.tensors.len(), None);
    for &p in &f.params {
        if f.tensor(p)?.kind != TensorKind::Arg || c.infos[p].is_some() {
            return Err(c.bad_define(p));
        }
        c.infos[p] = Some(TensorInfo::new(0));
    }
    c.stmt(&f.body)?;

    // Locals defined outside of any block, then arguments, live until the end
    let end = c.next_tick();
    c.close_scope(end);
    for &p in &f.params {
        if let Some(info) = c.infos[p].as_mut() {
            info.deletion = end;
        }
    }
    Ok(Intervals {
        infos: c.infos,
        store_ticks: c.store_ticks,
        end,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::{ArgAccess, FuncDecl};
    use std::sync::Arc;

    fn load(t: IrTensorId, i: Expr) -> Expr {
        Expr::load(t, i)
    }

    #[test]
    fn test_straight_line() {
        let mut f = Func::new("f");
        let a = f.add_arg("a", 4, 4);
        let x = f.add_local("x", 4, 4);
        let zero = || Expr::Const(0);
        f.body = Stmt::Block(vec![
            Stmt::Define(x),                          // 1
            Stmt::store(x, zero(), load(a, zero())), // 2
            Stmt::store(a, zero(), load(x, zero())), // 3
        ]); // block end: 4, function end: 5
        let iv = collect_ticks(&f).unwrap();
        assert_eq!(iv.end, 5);

        let xi = iv.get(x).unwrap();
        assert_eq!((xi.creation, xi.deletion), (1, 4));
        assert_eq!(xi.first_access, Some(2));
        assert_eq!(xi.last_read, Some(3));
        assert_eq!(xi.writes, BTreeSet::from([2]));
        assert!(xi.loop_writes.is_empty());

        let ai = iv.get(a).unwrap();
        assert_eq!((ai.creation, ai.deletion), (0, 5));
        assert_eq!(ai.first_access, Some(2));
        assert_eq!(ai.last_read, Some(2));
        assert_eq!(ai.last_write(), Some(3));
        assert_eq!(iv.store_ticks, [2, 3]);
    }

    #[test]
    fn test_loop_folding() {
        let mut f = Func::new("f");
        let a = f.add_arg("a", 4, 4);
        let t = f.add_local("t", 4, 4);
        let u = f.add_local("u", 1, 4);
        let (i, zero) = (|| Expr::var("i"), || Expr::Const(0));
        f.body = Stmt::Block(vec![
            Stmt::Define(t), // 1
            Stmt::for_range(
                // header: 2
                "i",
                0,
                4,
                vec![
                    Stmt::Define(u),                    // 3
                    Stmt::store(u, zero(), load(a, i())), // 4
                    Stmt::store(t, i(), load(u, zero())), // 5
                ], // inner block end: 6
            ), // loop end: 7
            Stmt::Return(Some(load(t, zero()))), // 8
        ]);
        let iv = collect_ticks(&f).unwrap();

        // `t` and `a` are created outside the loop, so accesses fold to 7
        let ti = iv.get(t).unwrap();
        assert_eq!(ti.first_access, Some(7));
        assert_eq!(ti.writes, BTreeSet::from([7]));
        assert_eq!(ti.last_read, Some(8));
        assert_eq!(iv.get(a).unwrap().last_read, Some(7));

        // ...but the loop writes `t` on every iteration
        assert_eq!(ti.loop_writes, BTreeSet::from([(2, 7)]));
        assert!(ti.written_in(4, 5));
        assert!(!ti.written_in(0, 1));
        assert!(iv.get(a).unwrap().loop_writes.is_empty());

        // `u` lives inside the loop, so it keeps its own ticks
        let ui = iv.get(u).unwrap();
        assert_eq!((ui.creation, ui.deletion), (3, 6));
        assert_eq!(ui.first_access, Some(4));
        assert_eq!(ui.last_read, Some(5));
        assert!(ui.loop_writes.is_empty());

        assert_eq!(iv.store_ticks, [4, 7]);
    }

    #[test]
    fn test_nested_loop_span() {
        let mut f = Func::new("f");
        let o = f.add_arg("o", 4, 4);
        let body = Stmt::for_range(
            // header: 2
            "j",
            0,
            2,
            vec![Stmt::store(o, Expr::var("j"), Expr::var("i"))], // 3
        ); // inner block end: 4, loop end: 5
        f.body = Stmt::Block(vec![Stmt::for_range("i", 0, 2, vec![body])]);
        // outer header: 1, outer block end: 6, loop end: 7

        let iv = collect_ticks(&f).unwrap();
        let oi = iv.get(o).unwrap();
        assert_eq!(oi.writes, BTreeSet::from([7]));
        assert_eq!(oi.loop_writes, BTreeSet::from([(1, 7)]));
        assert_eq!(iv.store_ticks, [7]);
    }

    #[test]
    fn test_tick_hints() {
        let mut f = Func::new("f");
        let a = f.add_arg("a", 4, 4);
        let x = f.add_local("x", 4, 4);
        let y = f.add_local("y", 4, 4);
        let zero = || Expr::Const(0);
        f.body = Stmt::Block(vec![
            Stmt::Define(x),                          // 1
            Stmt::Define(y),                          // 2
            Stmt::Eval(zero()),                       // 3
            Stmt::store(x, zero(), load(a, zero())), // 4
            Stmt::store(y, zero(), load(x, zero())), // 5
            Stmt::store(a, zero(), load(y, zero())), // 6
        ]); // block end: 7, function end: 8

        f.tensors[x].hint_first_access = Some(-2);
        f.tensors[x].hint_last_access = Some(3);
        let iv = collect_ticks(&f).unwrap();
        let xi = iv.get(x).unwrap();
        assert_eq!(xi.first_access, Some(2));
        assert_eq!(xi.last_read, Some(8));
        assert_eq!(xi.last_access(), Some(8));
        assert_eq!(xi.writes, BTreeSet::from([4]));

        // Hints never move the first access before the tensor's creation
        f.tensors[y].hint_first_access = Some(-100);
        let iv = collect_ticks(&f).unwrap();
        assert_eq!(iv.get(y).unwrap().first_access, Some(2));

        // Without hints, the computed ticks are used as-is
        f.tensors[x].hint_first_access = None;
        f.tensors[x].hint_last_access = None;
        let iv = collect_ticks(&f).unwrap();
        let xi = iv.get(x).unwrap();
        assert_eq!((xi.first_access, xi.last_read), (Some(4), Some(5)));
    }

    #[test]
    fn test_call_annotations() {
        let mut f = Func::new("f");
        let a = f.add_arg("a", 4, 4);
        let b = f.add_arg("b", 4, 4);
        let c = f.add_arg("c", 4, 4);
        let copy = Arc::new(FuncDecl {
            name: "copy".to_owned(),
            params: vec![Some(ArgAccess::Write), Some(ArgAccess::Read)],
        });
        let opaque = Arc::new(FuncDecl {
            name: "opaque".to_owned(),
            params: vec![],
        });
        let ab = vec![Expr::Tensor(a), Expr::Tensor(b)];
        f.body = Stmt::Block(vec![
            Stmt::Eval(Expr::call(&copy, ab)),
            Stmt::Eval(Expr::call(&opaque, vec![Expr::Tensor(c)])),
        ]);
        let iv = collect_ticks(&f).unwrap();
        let get = |t| iv.get(t).unwrap();
        assert_eq!(get(a).last_read, None);
        assert_eq!(get(a).last_write(), Some(1));
        assert_eq!(get(b).last_read, Some(1));
        assert_eq!(get(b).last_write(), None);
        assert_eq!(get(c).last_read, Some(2));
        assert_eq!(get(c).last_write(), Some(2));
    }

    #[test]
    fn test_bad_refs() {
        let mut f = Func::new("f");
        let a = f.add_arg("a", 4, 4);
        let x = f.add_local("x", 4, 4);
        let bad_define = |f: &Func, name: &str| {
            matches!(collect_ticks(f), Err(Error::BadDefine(n)) if n == name)
        };

        // Local used without a definition
        let store = Stmt::store(x, Expr::Const(0), Expr::Const(0));
        f.body = Stmt::Block(vec![store]);
        assert!(bad_define(&f, "x"));

        // Argument defined as a local
        f.body = Stmt::Block(vec![Stmt::Define(a)]);
        assert!(bad_define(&f, "a"));

        // Local defined twice
        f.body = Stmt::Block(vec![Stmt::Define(x), Stmt::Define(x)]);
        assert!(bad_define(&f, "x"));

        // Unknown tensor
        let bad = Expr::Tensor(IrTensorId::from(9));
        f.body = Stmt::Block(vec![Stmt::Eval(bad)]);
        assert!(matches!(collect_ticks(&f), Err(Error::BadIrTensor(9))));
    }
}
