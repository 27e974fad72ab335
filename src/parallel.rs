//! Deterministic fan-out over index ranges.
//!
//! The work-parallelism seam for batch search, batch add, and chunked
//! encoding. Work is split into contiguous shards, one per worker, and shard
//! results are concatenated in shard order, so the output is identical for
//! any thread count. Callers that reduce across items must therefore reduce
//! in item order, which every proxima search path does.

use std::thread;

/// Number of workers to use when the caller does not pin one.
#[must_use]
pub fn default_threads() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

/// Map `f` over `0..n` with up to `threads` workers.
///
/// Results come back in index order. `threads <= 1` (or a tiny `n`) runs
/// serially on the caller's thread.
pub fn parallel_map<T, F>(n: usize, threads: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let workers = threads.clamp(1, n.max(1));
    if n == 0 || workers == 1 {
        return (0..n).map(f).collect();
    }

    let chunk = n.div_ceil(workers);
    let mut shards: Vec<Vec<T>> = Vec::with_capacity(workers);
    thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        for w in 0..workers {
            let start = w * chunk;
            let end = ((w + 1) * chunk).min(n);
            let f = &f;
            handles.push(scope.spawn(move || (start..end).map(f).collect::<Vec<T>>()));
        }
        for h in handles {
            shards.push(h.join().expect("parallel worker panicked"));
        }
    });
    shards.into_iter().flatten().collect()
}
