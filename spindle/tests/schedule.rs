use rand::{Rng, SeedableRng, rngs::StdRng};
use spindle::{
    config::{PassConfig, SchedulerMode},
    ir::{BinOp, Expr, Func, IrTensorId, Stmt},
    passes::buffer_schedule::BufferScheduler,
};
use std::collections::HashMap;
use strum::IntoEnumIterator;

const OUT_LEN: i64 = 16;

/// Minimal interpreter, used to check that scheduling preserves behavior
struct Machine<'a> {
    func: &'a Func,
    vars: HashMap<String, i64>,
    mem: Vec<Option<Vec<i64>>>,
}

impl<'a> Machine<'a> {
    fn new(func: &'a Func, args: &[Vec<i64>]) -> Self {
        let mut mem = vec![None; func.tensors.len()];
        for (p, a) in func.params.iter().zip(args) {
            let mut buf = a.clone();
            buf.resize(func.tensors[*p].bytes(), 0);
            mem[p.get()] = Some(buf);
        }
        Self {
            func,
            vars: HashMap::new(),
            mem,
        }
    }

    fn buf(&mut self, t: IrTensorId) -> &mut Vec<i64> {
        let name = &self.func.tensors[t].name;
        self.mem[t.get()]
            .as_mut()
            .unwrap_or_else(|| panic!("{name} accessed before definition"))
    }

    fn eval(&mut self, e: &Expr) -> i64 {
        match e {
            Expr::Const(c) => *c,
            Expr::Var(v) => self.vars[v],
            Expr::Load { tensor, index } => {
                let i = self.eval(index) as usize;
                self.buf(*tensor)[i]
            }
            Expr::Binary(op, a, b) => {
                let (a, b) = (self.eval(a), self.eval(b));
                match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::Div => a.checked_div(b).unwrap_or(0),
                    BinOp::Rem => a.checked_rem(b).unwrap_or(0),
                    BinOp::Min => a.min(b),
                    BinOp::Max => a.max(b),
                    BinOp::Lt => (a < b) as i64,
                    BinOp::Le => (a <= b) as i64,
                    BinOp::Eq => (a == b) as i64,
                    BinOp::Ne => (a != b) as i64,
                }
            }
            e => panic!("unsupported expression {e:?}"),
        }
    }

    fn exec(&mut self, s: &Stmt) {
        match s {
            Stmt::Block(b) => b.iter().for_each(|s| self.exec(s)),
            Stmt::Define(t) => {
                // One slot per byte, since a buffer may be shared by tensors
                // with different element sizes
                let len = self.func.tensors[*t].bytes();
                self.mem[t.get()] = Some(vec![0; len]);
            }
            Stmt::Store {
                tensor,
                index,
                value,
            } => {
                let i = self.eval(index) as usize;
                let v = self.eval(value);
                self.buf(*tensor)[i] = v;
            }
            Stmt::Eval(e) => {
                self.eval(e);
            }
            Stmt::For {
                var,
                begin,
                end,
                step,
                body,
            } => {
                let (begin, end) = (self.eval(begin), self.eval(end));
                let step = self.eval(step).max(1);
                let mut i = begin;
                while i < end {
                    self.vars.insert(var.clone(), i);
                    self.exec(body);
                    i += step;
                }
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond) != 0 {
                    self.exec(then);
                } else if let Some(o) = otherwise {
                    self.exec(o);
                }
            }
            Stmt::Return(_) => panic!("early return is unsupported"),
        }
    }
}

/// Runs `f` and returns the final contents of its arguments
fn run(f: &Func, args: &[Vec<i64>]) -> Vec<Vec<i64>> {
    let mut m = Machine::new(f, args);
    m.exec(&f.body);
    f.params
        .iter()
        .map(|p| {
            let mut buf = m.mem[p.get()].clone().unwrap();
            buf.truncate(f.tensors[*p].dims[0]);
            buf
        })
        .collect()
}

fn load_wrapped(t: IrTensorId, len: usize) -> Expr {
    Expr::load(t, Expr::var("i") % Expr::Const(len as i64))
}

fn fill_loop(t: IrTensorId, len: usize, value: Expr) -> Stmt {
    let store = Stmt::store(t, Expr::var("i"), value);
    Stmt::for_range("i", 0, len as i64, vec![store])
}

/// Adds `t` (wrapping around at `len`) into every element of `o`
fn accumulate(o: IrTensorId, t: IrTensorId, len: usize) -> Stmt {
    let v = Expr::load(o, Expr::var("i")) + load_wrapped(t, len);
    fill_loop(o, OUT_LEN as usize, v)
}

/// Builds a temporary which lives in a nested scope (a loop body, a plain
/// block, or a branch of a conditional) and is folded into `o`
fn scoped_temp(
    rng: &mut StdRng,
    f: &mut Func,
    name: &str,
    src: (IrTensorId, usize),
    o: IrTensorId,
) -> Stmt {
    let (src, src_len) = src;
    let elem = [1, 2, 4, 8][rng.gen_range(0..4)];
    let kind = rng.gen_range(0..4);
    let len = if kind == 0 { 1 } else { rng.gen_range(1..8) };
    let t = f.add_local(name, len, elem);
    let value = Expr::var("i") * load_wrapped(src, src_len);
    let scope = vec![
        Stmt::Define(t),
        fill_loop(t, len, value),
        accumulate(o, t, len),
    ];
    match kind {
        0 => {
            // Defined on every iteration of a loop which also writes `o`
            let i = || Expr::var("i");
            let scaled = load_wrapped(src, src_len) * Expr::Const(2);
            let sum = Expr::load(o, i()) + Expr::load(t, Expr::Const(0));
            let body = vec![
                Stmt::Define(t),
                Stmt::store(t, Expr::Const(0), scaled),
                Stmt::store(o, i(), sum),
            ];
            Stmt::for_range("i", 0, OUT_LEN, body)
        }
        1 => Stmt::for_range("j", 0, 2, scope),
        2 => Stmt::Block(scope),
        _ => {
            let cond = Expr::binary(
                BinOp::Lt,
                Expr::load(src, Expr::Const(0)),
                Expr::Const(0),
            );
            let other = Stmt::store(o, Expr::Const(1), Expr::Const(2));
            Stmt::If {
                cond,
                then: Box::new(Stmt::Block(scope)),
                otherwise: Some(Box::new(other)),
            }
        }
    }
}

/// Builds a random function over an input `a`, an output `o`, and an
/// argument `k` which the body never touches
///
/// Every local is fully written right after its definition, and `o` is fully
/// written at the end, so the results never depend on stale buffer contents.
fn random_func(rng: &mut StdRng) -> Func {
    let ops = [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Min, BinOp::Max];
    let mut f = Func::new("random");
    let a_len = rng.gen_range(4..16);
    let a = f.add_arg("a", a_len, 4);
    let o = f.add_arg("o", OUT_LEN as usize, 4);
    f.add_arg("k", rng.gen_range(1..16), 4);

    let mut body = vec![];
    let mut live: Vec<(IrTensorId, usize)> = vec![(a, a_len)];
    for k in 0..rng.gen_range(1..8) {
        let len = rng.gen_range(1..16);
        let elem = [1, 2, 4, 8][rng.gen_range(0..4)];
        let t = f.add_local(&format!("t{k}"), len, elem);

        let mut value = Expr::var("i");
        for _ in 0..rng.gen_range(1..=2) {
            let (src, src_len) = live[rng.gen_range(0..live.len())];
            let op = ops[rng.gen_range(0..ops.len())];
            value = Expr::binary(op, value, load_wrapped(src, src_len));
        }
        body.push(Stmt::Define(t));
        body.push(fill_loop(t, len, value));

        if rng.gen_bool(0.3) {
            // Possibly dead, depending on later reads
            body.push(Stmt::store(t, Expr::Const(0), Expr::Const(7)));
        }
        if rng.gen_bool(0.3) {
            body.push(accumulate(o, t, len));
        }
        if rng.gen_bool(0.2) {
            let cond = Expr::binary(
                BinOp::Lt,
                Expr::load(t, Expr::Const(0)),
                Expr::Const(0),
            );
            body.push(Stmt::If {
                cond,
                then: Box::new(Stmt::store(o, Expr::Const(0), Expr::Const(1))),
                otherwise: None,
            });
        }

        live.push((t, len));
        if rng.gen_bool(0.4) {
            let src = live[rng.gen_range(0..live.len())];
            body.push(scoped_temp(rng, &mut f, &format!("s{k}"), src, o));
        }
        if live.len() > 2 && rng.gen_bool(0.5) {
            live.remove(rng.gen_range(1..live.len()));
        }
    }

    let mut value = load_wrapped(a, a_len);
    for &(t, len) in &live[1..] {
        value = value + load_wrapped(t, len);
    }
    body.push(fill_loop(o, OUT_LEN as usize, value));
    f.body = Stmt::Block(body);
    f
}

fn random_args(rng: &mut StdRng, f: &Func) -> Vec<Vec<i64>> {
    f.params
        .iter()
        .map(|p| {
            (0..f.tensors[*p].dims[0])
                .map(|_| rng.gen_range(-100..100))
                .collect()
        })
        .collect()
}

fn configs() -> impl Iterator<Item = PassConfig> {
    SchedulerMode::iter().flat_map(|mode| {
        [true, false].map(|eliminate_dead_writes| PassConfig {
            buffer_scheduler_mode: mode,
            eliminate_dead_writes,
            ..PassConfig::default()
        })
    })
}

#[test]
fn random_schedule_preserves_results() {
    for seed in 0..200 {
        let mut rng = StdRng::seed_from_u64(seed);
        let f = random_func(&mut rng);
        let args = random_args(&mut rng, &f);
        let expected = run(&f, &args);

        for cfg in configs() {
            let before = f.clone();
            let (g, plan) = BufferScheduler::new(&cfg).schedule(&f).unwrap();
            assert_eq!(f, before, "input was modified");
            assert_eq!(
                run(&g, &args),
                expected,
                "seed {seed}, {cfg:?}:\n{f}\n=>\n{g}"
            );
            assert!(plan.bytes_after <= plan.bytes_before);
            assert_eq!(plan.bytes_before, f.local_bytes());
            assert_eq!(plan.bytes_after, g.local_bytes());

            let defined = g.defined_locals();
            for r in &plan.reuse {
                assert!(!defined.contains(&r.tensor));
                assert!(
                    g.tensors[r.donor].bytes() >= f.tensors[r.tensor].bytes()
                );
            }
            if cfg.buffer_scheduler_mode == SchedulerMode::None {
                assert!(plan.reuse.is_empty());
            }
            if !cfg.eliminate_dead_writes {
                assert_eq!(plan.removed_writes, 0);
            }
        }
    }
}

#[test]
fn random_dead_writes_idempotent() {
    let cfg = PassConfig {
        buffer_scheduler_mode: SchedulerMode::None,
        ..PassConfig::default()
    };
    let sched = BufferScheduler::new(&cfg);
    for seed in 0..200 {
        let mut rng = StdRng::seed_from_u64(seed);
        let f = random_func(&mut rng);
        let (g, _) = sched.schedule(&f).unwrap();
        let (h, plan) = sched.schedule(&g).unwrap();
        assert_eq!(plan.removed_writes, 0);
        assert_eq!(g, h);
    }
}

#[test]
fn disabled_scheduler_is_identity() {
    let cfg = PassConfig {
        buffer_scheduler_mode: SchedulerMode::None,
        eliminate_dead_writes: false,
        ..PassConfig::default()
    };
    for seed in 0..20 {
        let mut rng = StdRng::seed_from_u64(seed);
        let f = random_func(&mut rng);
        let (g, plan) = BufferScheduler::new(&cfg).schedule(&f).unwrap();
        assert_eq!(f, g);
        assert_eq!(plan.bytes_before, plan.bytes_after);
    }
}

#[test]
fn json_round_trip() {
    let mut rng = StdRng::seed_from_u64(0);
    let f = random_func(&mut rng);
    let s = serde_json::to_string(&f).unwrap();
    let g: Func = serde_json::from_str(&s).unwrap();
    assert_eq!(f, g);
}

#[test]
fn loop_local_temporary_keeps_results() {
    // for i in 0..4 { tensor t[1]; t[0] = a[i] * 2; o[i] = t[0] + 1 }
    let mut f = Func::new("loop_local");
    let a = f.add_arg("a", 4, 4);
    let o = f.add_arg("o", 4, 4);
    let t = f.add_local("t", 1, 4);
    let i = || Expr::var("i");
    let body = vec![
        Stmt::Define(t),
        Stmt::store(t, Expr::Const(0), Expr::load(a, i()) * Expr::Const(2)),
        Stmt::store(o, i(), Expr::load(t, Expr::Const(0)) + Expr::Const(1)),
    ];
    f.body = Stmt::Block(vec![Stmt::for_range("i", 0, 4, body)]);

    let args = [vec![1, 2, 3, 4], vec![0; 4]];
    assert_eq!(run(&f, &args)[1], [3, 5, 7, 9]);
    for cfg in configs() {
        let (g, _) = BufferScheduler::new(&cfg).schedule(&f).unwrap();
        assert_eq!(run(&g, &args)[1], [3, 5, 7, 9], "{cfg:?}:\n{g}");
    }
}

#[test]
fn untouched_argument_keeps_caller_data() {
    let mut f = Func::new("untouched");
    let o = f.add_arg("o", 1, 4);
    f.add_arg("keep", 4, 4);
    let t = f.add_local("t", 4, 4);
    f.body = Stmt::Block(vec![
        Stmt::Define(t),
        Stmt::store(t, Expr::Const(0), Expr::Const(99)),
        Stmt::store(o, Expr::Const(0), Expr::load(t, Expr::Const(0))),
    ]);

    let args = [vec![0], vec![5, 6, 7, 8]];
    for cfg in configs() {
        let (g, _) = BufferScheduler::new(&cfg).schedule(&f).unwrap();
        assert_eq!(run(&g, &args), [vec![99], vec![5, 6, 7, 8]], "{cfg:?}");
    }
}
