//! Dead-write elimination
//!
//! A store to a local tensor which happens after the tensor's last read can
//! never be observed, so it's removed.  Removing a store also removes the
//! reads in its index and value, which may expose more dead stores, so we
//! iterate until nothing changes.  Locals which end up with no accesses at all
//! lose their `Define`.
use super::ticks::{Intervals, collect_ticks};
use crate::{
    Error,
    ir::{Func, Stmt},
};
use log::trace;

/// Removes dead stores from `f`, returning the number removed
pub(crate) fn run(f: &mut Func) -> Result<usize, Error> {
    let mut removed = 0;
    loop {
        let iv = collect_ticks(f)?;
        let n = remove_dead_stores(f, &iv);
        if n == 0 {
            break;
        }
        removed += n;
    }

    let iv = collect_ticks(f)?;
    let tensors = &f.tensors;
    f.body.retain(&mut |s| match s {
        Stmt::Define(t) => {
            let unused = !tensors[*t].dont_schedule
                && iv.get(*t).is_some_and(|i| i.first_access.is_none());
            if unused {
                trace!("removing unused tensor {}", tensors[*t].name);
            }
            !unused
        }
        _ => true,
    });
    Ok(removed)
}

fn remove_dead_stores(f: &mut Func, iv: &Intervals) -> usize {
    let tensors = &f.tensors;
    let mut index = 0;
    let mut removed = 0;
    f.body.retain(&mut |s| {
        let Stmt::Store {
            tensor,
            index: i,
            value,
        } = s
        else {
            return true;
        };
        let tick = iv.store_ticks[index];
        index += 1;

        let t = &tensors[*tensor];
        let dead = !t.is_arg()
            && !t.dont_schedule
            && !i.has_call()
            && !value.has_call()
            && iv
                .get(*tensor)
                .is_some_and(|info| info.last_read.is_none_or(|r| tick > r));
        if dead {
            trace!("removing dead store to {} at tick {tick}", t.name);
            removed += 1;
        }
        !dead
    });
    removed
}
