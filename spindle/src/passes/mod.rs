//! Passes over IR functions
//!
//! Passes follow a copy-then-mutate contract: each pass borrows its input and
//! returns a freshly built function, so a failing pass can never leave its
//! input half-rewritten.
use crate::{Error, ir::Func};

pub mod buffer_schedule;

/// A transformation from one function to another
pub trait FunctionPass {
    /// Returns a short name for the pass, used in logging
    fn name(&self) -> &'static str;

    /// Runs the pass, returning a new function
    fn run(&mut self, f: &Func) -> Result<Func, Error>;
}

/// Runs a sequence of passes, feeding each one the output of the previous
pub fn run_passes(
    f: &Func,
    passes: &mut [&mut dyn FunctionPass],
) -> Result<Func, Error> {
    let mut out = f.clone();
    for p in passes.iter_mut() {
        log::debug!("running pass {}", p.name());
        out = p.run(&out)?;
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::PassConfig,
        ir::{Expr, Stmt},
        passes::buffer_schedule::BufferScheduler,
    };

    /// Renames the function, to check that passes are chained
    struct Rename;
    impl FunctionPass for Rename {
        fn name(&self) -> &'static str {
            "rename"
        }
        fn run(&mut self, f: &Func) -> Result<Func, Error> {
            let mut out = f.clone();
            out.name.push_str("_renamed");
            Ok(out)
        }
    }

    #[test]
    fn test_run_passes() {
        let mut f = Func::new("f");
        let a = f.add_arg("a", 4, 4);
        let x = f.add_local("x", 4, 4);
        f.body = Stmt::Block(vec![
            Stmt::Define(x),
            Stmt::store(x, Expr::Const(0), Expr::Const(1)),
            Stmt::store(a, Expr::Const(0), Expr::Const(2)),
        ]);
        let mut sched = BufferScheduler::new(&PassConfig::default());
        let mut rename = Rename;
        let mut passes: [&mut dyn FunctionPass; 2] = [&mut rename, &mut sched];
        let out = run_passes(&f, &mut passes).unwrap();
        assert_eq!(out.name, "f_renamed");
        assert!(out.defined_locals().is_empty());
        assert_eq!(f.defined_locals(), [x]);
    }
}
