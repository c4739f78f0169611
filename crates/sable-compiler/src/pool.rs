//! Fork/join worker pool.
//!
//! Jobs are pushed to a global injector queue and drained by scoped worker
//! threads, each with a local deque that others can steal from. The caller
//! blocks on a wait group until every job has finished, then the scope
//! joins the threads. Results come back in job order whatever order the
//! workers finished in.

use std::thread;

use crossbeam_deque::{Injector, Steal, Stealer, Worker as Deque};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::error::CompileError;

/// Counts outstanding jobs; `wait` returns once it reaches zero.
struct WaitGroup {
    pending: Mutex<usize>,
    done: Condvar,
}

impl WaitGroup {
    fn new(count: usize) -> Self {
        Self {
            pending: Mutex::new(count),
            done: Condvar::new(),
        }
    }

    fn finish_one(&self) {
        let mut pending = self.pending.lock();
        *pending -= 1;
        if *pending == 0 {
            self.done.notify_all();
        }
    }

    fn wait(&self) {
        let mut pending = self.pending.lock();
        while *pending > 0 {
            self.done.wait(&mut pending);
        }
    }
}

/// Marks a job finished even when it panics, so the barrier never hangs.
struct JobGuard<'a>(&'a WaitGroup);

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        self.0.finish_one();
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    threads: usize,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Self {
        Self { threads: threads.max(1) }
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Run `work` on every job and wait for all of them.
    pub fn join_all<J, R, F>(&self, jobs: Vec<J>, work: F) -> Result<Vec<R>, CompileError>
    where
        J: Send,
        R: Send,
        F: Fn(J) -> R + Sync,
    {
        let count = jobs.len();
        let threads = self.threads.min(count);
        if threads <= 1 {
            return Ok(jobs.into_iter().map(work).collect());
        }
        debug!(jobs = count, threads, "fork");

        let injector = Injector::new();
        for job in jobs.into_iter().enumerate() {
            injector.push(job);
        }
        let results: Mutex<Vec<Option<R>>> = Mutex::new((0..count).map(|_| None).collect());
        let barrier = WaitGroup::new(count);
        let deques: Vec<Deque<(usize, J)>> = (0..threads).map(|_| Deque::new_fifo()).collect();
        let stealers: Vec<Stealer<(usize, J)>> = deques.iter().map(Deque::stealer).collect();

        thread::scope(|scope| -> Result<(), CompileError> {
            for (index, local) in deques.into_iter().enumerate() {
                let (injector, stealers, results, barrier, work) = (&injector, &stealers, &results, &barrier, &work);
                thread::Builder::new()
                    .name(format!("sable-worker-{}", index))
                    .spawn_scoped(scope, move || {
                        while let Some((slot, job)) = find_job(&local, injector, stealers) {
                            let _guard = JobGuard(barrier);
                            trace!(worker = index, job = slot, "run job");
                            let result = work(job);
                            results.lock()[slot] = Some(result);
                        }
                    })?;
            }
            barrier.wait();
            Ok(())
        })?;
        debug!(jobs = count, "join");

        Ok(results
            .into_inner()
            .into_iter()
            .map(|result| result.unwrap_or_else(|| unreachable!("job finished without a result")))
            .collect())
    }
}

fn find_job<T>(local: &Deque<T>, injector: &Injector<T>, stealers: &[Stealer<T>]) -> Option<T> {
    if let Some(job) = local.pop() {
        return Some(job);
    }
    loop {
        match injector.steal_batch_and_pop(local) {
            Steal::Success(job) => return Some(job),
            Steal::Empty => break,
            Steal::Retry => continue,
        }
    }
    for stealer in stealers {
        loop {
            match stealer.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_results_in_job_order() {
        let pool = WorkerPool::new(4);
        let jobs: Vec<u64> = (0..100).collect();
        let results = pool.join_all(jobs, |n| n * n).unwrap();
        assert_eq!(results, (0..100).map(|n| n * n).collect::<Vec<_>>());
    }

    #[test]
    fn test_every_job_runs_once() {
        let pool = WorkerPool::new(3);
        let runs = AtomicUsize::new(0);
        let names = pool
            .join_all((0..50).collect(), |_: usize| {
                runs.fetch_add(1, Ordering::Relaxed);
                thread::current().name().map(str::to_string)
            })
            .unwrap();
        assert_eq!(runs.load(Ordering::Relaxed), 50);
        let workers: HashSet<_> = names.into_iter().flatten().collect();
        assert!(workers.iter().all(|name| name.starts_with("sable-worker-")));
    }

    #[test]
    fn test_single_thread_runs_inline() {
        let pool = WorkerPool::new(1);
        let caller = thread::current().id();
        let ids = pool.join_all(vec![1, 2, 3], |_| thread::current().id()).unwrap();
        assert!(ids.iter().all(|&id| id == caller));
    }

    #[test]
    fn test_no_jobs() {
        let pool = WorkerPool::new(8);
        let results: Vec<i32> = pool.join_all(Vec::<i32>::new(), |n| n).unwrap();
        assert!(results.is_empty());
        assert_eq!(WorkerPool::new(0).threads(), 1);
    }
}
