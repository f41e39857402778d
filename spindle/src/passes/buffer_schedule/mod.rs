//! Static reuse of local tensor storage
//!
//! The scheduler works on a [`Func`] whose tensors are all flattened to a
//! single dimension.  It runs in three steps:
//!
//! - Every statement is assigned a tick, and every tensor gets a live
//!   interval ([`ticks`]).
//! - Optionally, stores which can never be observed are removed.
//! - Locals are visited in creation order, and each one is placed into the
//!   storage of an earlier local or argument whose interval doesn't overlap.
//!   The [`SchedulerMode`] picks between valid donors.
//!
//! ```
//! use spindle::{
//!     config::PassConfig,
//!     ir::{Expr, Func, Stmt},
//!     passes::buffer_schedule::BufferScheduler,
//! };
//!
//! let mut f = Func::new("f");
//! let a = f.add_arg("a", 4, 4);
//! let out = f.add_arg("out", 4, 4);
//! let x = f.add_local("x", 4, 4);
//! let y = f.add_local("y", 4, 4);
//! f.body = Stmt::Block(vec![
//!     Stmt::Define(x),
//!     Stmt::store(x, Expr::Const(0), Expr::load(a, Expr::Const(0))),
//!     Stmt::store(out, Expr::Const(0), Expr::load(x, Expr::Const(0))),
//!     Stmt::Define(y),
//!     Stmt::store(y, Expr::Const(0), Expr::load(a, Expr::Const(1))),
//!     Stmt::store(out, Expr::Const(1), Expr::load(y, Expr::Const(0))),
//! ]);
//!
//! let (g, plan) = BufferScheduler::new(&PassConfig::default()).schedule(&f)?;
//! assert_eq!(plan.bytes_before, 32);
//! assert_eq!(plan.bytes_after, 16);
//! assert_eq!(g.defined_locals(), [x]);
//! # Ok::<(), spindle::Error>(())
//! ```
use crate::{
    Error,
    config::{PassConfig, SchedulerMode},
    ir::{Func, IrTensorId},
    passes::FunctionPass,
};
use log::debug;

mod dead_writes;
mod planner;
pub mod ticks;

/// A local tensor placed into another tensor's storage
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Reuse {
    /// Receiver, which no longer has storage of its own
    pub tensor: IrTensorId,
    /// Tensor whose storage is reused
    pub donor: IrTensorId,
}

/// Summary of a scheduling run
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BufferPlan {
    /// Every tensor placed into another's storage, in creation order
    pub reuse: Vec<Reuse>,
    /// Bytes allocated by locals before scheduling
    pub bytes_before: usize,
    /// Bytes allocated by locals after scheduling
    pub bytes_after: usize,
    /// Number of dead stores removed
    pub removed_writes: usize,
}

/// Buffer scheduling pass
#[derive(Copy, Clone, Debug)]
pub struct BufferScheduler {
    mode: SchedulerMode,
    eliminate_dead_writes: bool,
}

impl BufferScheduler {
    /// Builds a scheduler from the relevant configuration options
    pub fn new(config: &PassConfig) -> Self {
        Self {
            mode: config.buffer_scheduler_mode,
            eliminate_dead_writes: config.eliminate_dead_writes,
        }
    }

    fn check(f: &Func) -> Result<(), Error> {
        for t in f.tensors.iter() {
            if t.dims.len() != 1 {
                return Err(Error::NotFlattened(t.name.clone()));
            }
        }
        Ok(())
    }

    /// Schedules a copy of `f`, returning the new function and a summary
    ///
    /// `f` itself is never modified.
    pub fn schedule(&self, f: &Func) -> Result<(Func, BufferPlan), Error> {
        Self::check(f)?;
        let mut out = f.clone();
        let removed_writes = if self.eliminate_dead_writes {
            dead_writes::run(&mut out)?
        } else {
            0
        };
        let reuse = match self.mode {
            SchedulerMode::None => vec![],
            mode => {
                let iv = ticks::collect_ticks(&out)?;
                planner::run(&mut out, &iv, mode)
            }
        };
        let plan = BufferPlan {
            reuse,
            bytes_before: f.local_bytes(),
            bytes_after: out.local_bytes(),
            removed_writes,
        };
        debug!(
            "scheduled {}: {} reuses, {} dead writes, {} -> {} bytes",
            f.name,
            plan.reuse.len(),
            plan.removed_writes,
            plan.bytes_before,
            plan.bytes_after
        );
        Ok((out, plan))
    }
}

impl FunctionPass for BufferScheduler {
    fn name(&self) -> &'static str {
        "buffer_schedule"
    }

    fn run(&mut self, f: &Func) -> Result<Func, Error> {
        self.schedule(f).map(|(f, _plan)| f)
    }
}
