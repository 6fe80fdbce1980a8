//! Bounded worker fan-out.
//!
//! Runs M jobs over N workers with at most N in flight; each job gets
//! exclusive use of one worker for its whole duration. Used for HEAD
//! characterization and reusable for any batch stage that consumes a worker
//! per job.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;

/// A unit of work that borrows one worker exclusively.
pub type Job<W, R> = Box<dyn FnOnce(&mut W) -> R + Send + 'static>;

/// Run every job with at most `workers.len()` in flight.
///
/// Results land positionally: slot `i` holds job `i`'s output, or `None` if
/// that job panicked. A panicking job never swallows its worker, so the
/// remaining jobs always make progress. Workers come back (in arbitrary
/// order) alongside the results.
///
/// Panics if called with jobs but no workers; the caller is expected to have
/// rejected an empty pool up front.
pub fn consume_jobs<W, R>(workers: Vec<W>, jobs: Vec<Job<W, R>>) -> (Vec<W>, Vec<Option<R>>)
where
    W: Send + 'static,
    R: Send + 'static,
{
    let worker_count = workers.len();
    let job_count = jobs.len();
    if job_count == 0 {
        return (workers, Vec::new());
    }
    assert!(worker_count > 0, "consume_jobs requires at least one worker");

    let (worker_tx, worker_rx) = mpsc::channel::<W>();
    for worker in workers {
        worker_tx.send(worker).unwrap();
    }

    let (done_tx, done_rx) = mpsc::channel::<(usize, Option<R>)>();
    let mut handles = Vec::with_capacity(job_count);
    for (index, job) in jobs.into_iter().enumerate() {
        let mut worker = worker_rx.recv().unwrap();
        let worker_tx = worker_tx.clone();
        let done_tx = done_tx.clone();
        handles.push(thread::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| job(&mut worker)));
            worker_tx.send(worker).unwrap();
            let _ = done_tx.send((index, result.ok()));
        }));
    }

    let mut results: Vec<Option<R>> = Vec::with_capacity(job_count);
    results.resize_with(job_count, || None);
    for _ in 0..job_count {
        let (index, result) = done_rx.recv().expect("job thread dropped its result");
        results[index] = result;
    }
    for handle in handles {
        let _ = handle.join();
    }

    let mut recovered = Vec::with_capacity(worker_count);
    while let Ok(worker) = worker_rx.try_recv() {
        recovered.push(worker);
    }
    (recovered, results)
}
