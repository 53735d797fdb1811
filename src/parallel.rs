//! Nesting control for the data-parallel loops.
//!
//! Parallel loops mark their bodies as a parallel region. Loops started from
//! inside a region run sequentially, so at most one level of a nested loop
//! structure is spread over the thread pool.

use std::cell::Cell;

thread_local! {
    static IN_REGION: Cell<bool> = const { Cell::new(false) };
}

/// Restores the previous region state when dropped, also during unwinding.
struct RegionGuard(bool);

impl Drop for RegionGuard {
    fn drop(&mut self) {
        IN_REGION.with(|r| r.set(self.0));
    }
}

/// True while the current thread runs the body of a parallel loop.
pub(crate) fn in_parallel_region() -> bool {
    IN_REGION.with(Cell::get)
}

/// Run `f` as (part of) the body of a parallel loop.
pub(crate) fn region<R>(f: impl FnOnce() -> R) -> R {
    let _guard = RegionGuard(IN_REGION.with(|r| r.replace(true)));
    f()
}

/// Whether a loop of `n` iterations should run in parallel: not already inside
/// a parallel region and enough iterations to occupy the thread pool.
pub(crate) fn should_parallelize(n: usize) -> bool {
    !in_parallel_region() && n >= rayon::current_num_threads()
}
