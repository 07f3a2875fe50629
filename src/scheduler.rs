//! Bounded fan-out of tile jobs over short-lived worker threads.
//!
//! Workers exist for one operation only. Jobs are dealt round-robin in
//! enumeration order (`job % worker_count`), each worker runs its jobs one
//! after another, and the caller blocks until every worker has finished.
//! A failed job never stops its siblings; every outcome is handed back.

use crate::error::{Result, VolumeError};
use crate::utils::parallelism_hint;
use std::thread::{self, Scope, ScopedJoinHandle};
use tracing::debug;

/// Outcome of one job, tagged with its position in the submitted list
#[derive(Debug)]
pub struct JobResult<J, T> {
    pub seq: usize,
    pub job: J,
    pub result: Result<T>,
}

/// A worker's share of the jobs of one operation
#[derive(Debug)]
pub struct Worker<J> {
    id: usize,
    jobs: Vec<(usize, J)>,
}

impl<J> Worker<J> {
    fn new(id: usize) -> Self {
        Self {
            id,
            jobs: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Sequence numbers of the jobs assigned to this worker
    pub fn job_seqs(&self) -> Vec<usize> {
        self.jobs.iter().map(|(seq, _)| *seq).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

/// Runs tile jobs on at most `worker_count` threads
#[derive(Debug, Clone, Copy)]
pub struct ParallelIoScheduler {
    worker_count: usize,
}

impl ParallelIoScheduler {
    pub fn new(worker_count: usize) -> Self {
        Self {
            worker_count: worker_count.max(1),
        }
    }

    /// `directory_count` times the per-directory worker count, which defaults
    /// to the platform's available parallelism
    pub fn for_directories(directory_count: usize, per_directory: Option<usize>) -> Self {
        let per_directory = per_directory.unwrap_or_else(parallelism_hint);
        Self::new(directory_count.saturating_mul(per_directory))
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Deal jobs round-robin. Never creates a worker without jobs.
    pub fn distribute<J>(&self, jobs: impl IntoIterator<Item = J>) -> Vec<Worker<J>> {
        let jobs: Vec<J> = jobs.into_iter().collect();
        let count = self.worker_count.min(jobs.len());
        let mut workers: Vec<Worker<J>> = (0..count).map(Worker::new).collect();
        for (seq, job) in jobs.into_iter().enumerate() {
            workers[seq % count].jobs.push((seq, job));
        }
        workers
    }

    /// Run `op` on every job and wait for all of them.
    ///
    /// The returned outcomes are in submission order. Only a failure to start a
    /// worker thread makes this return `Err`; job failures are reported per job.
    pub fn execute<J, T, F>(&self, jobs: Vec<J>, op: F) -> Result<Vec<JobResult<J, T>>>
    where
        J: Send,
        T: Send,
        F: Fn(&J) -> Result<T> + Sync,
    {
        let workers = self.distribute(jobs);
        debug!(workers = workers.len(), "dispatching tile jobs");

        let mut results = thread::scope(|scope| -> Result<Vec<JobResult<J, T>>> {
            let handles = run_all(scope, workers, &op)?;
            Ok(join_all(handles))
        })?;

        results.sort_by_key(|r| r.seq);
        Ok(results)
    }
}

/// Start a thread for every worker
pub fn run_all<'scope, 'env, J, T, F>(
    scope: &'scope Scope<'scope, 'env>,
    workers: Vec<Worker<J>>,
    op: &'env F,
) -> Result<Vec<ScopedJoinHandle<'scope, Vec<JobResult<J, T>>>>>
where
    J: Send + 'env,
    T: Send + 'env,
    F: Fn(&J) -> Result<T> + Sync,
{
    let mut handles = Vec::with_capacity(workers.len());
    for worker in workers {
        let id = worker.id;
        let handle = thread::Builder::new()
            .name(format!("tile-worker-{}", id))
            .spawn_scoped(scope, move || run_worker(worker, op))
            .map_err(VolumeError::Io)?;
        handles.push(handle);
    }
    Ok(handles)
}

/// Wait for every worker. No timeout.
///
/// If a worker panicked, the panic is resumed on the caller once all the
/// other workers have been joined.
pub fn join_all<J, T>(
    handles: Vec<ScopedJoinHandle<'_, Vec<JobResult<J, T>>>>,
) -> Vec<JobResult<J, T>> {
    let mut results = Vec::new();
    let mut panic = None;
    for handle in handles {
        match handle.join() {
            Ok(outcomes) => results.extend(outcomes),
            Err(payload) => {
                panic.get_or_insert(payload);
            }
        }
    }
    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }
    results
}

fn run_worker<J, T, F>(worker: Worker<J>, op: &F) -> Vec<JobResult<J, T>>
where
    F: Fn(&J) -> Result<T>,
{
    let id = worker.id;
    let mut outcomes = Vec::with_capacity(worker.jobs.len());
    for (seq, job) in worker.jobs {
        let result = op(&job);
        if let Err(e) = &result {
            debug!(worker = id, job = seq, error = %e, "tile job failed");
        }
        outcomes.push(JobResult { seq, job, result });
    }
    outcomes
}
