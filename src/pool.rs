use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

pub const DEFAULT_WORKERS: usize = 16;
pub const DEFAULT_QUEUE_CAPACITY: usize = 23333;

#[derive(Debug, PartialEq, Eq)]
pub enum Rejected<J> {
    Full(J),
    Closed(J),
}

impl<J> Rejected<J> {
    pub fn into_inner(self) -> J {
        match self {
            Rejected::Full(job) | Rejected::Closed(job) => job,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool needs at least one thread and a non-zero queue")]
    InvalidSize,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

struct Queue<J> {
    jobs: VecDeque<J>,
    closed: bool,
}

struct Shared<J> {
    queue: Mutex<Queue<J>>,
    ready: Condvar,
    capacity: usize,
}

impl<J> Shared<J> {
    fn lock(&self) -> MutexGuard<'_, Queue<J>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// Fixed set of threads draining a bounded job queue.
// `submit` never blocks. Shutdown closes the queue, wakes every idle worker, lets queued
// and running jobs finish and joins all threads; dropping the pool does the same.
pub struct WorkerPool<J: Send + 'static> {
    shared: Arc<Shared<J>>,
    workers: Vec<JoinHandle<()>>,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub fn new<F>(threads: usize, capacity: usize, handler: F) -> Result<Self, PoolError>
    where
        F: Fn(J) + Send + Sync + 'static,
    {
        if threads == 0 || capacity == 0 {
            return Err(PoolError::InvalidSize);
        }
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                jobs: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
            capacity,
        });
        let handler = Arc::new(handler);

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(threads),
        };
        for index in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || work(&shared, handler.as_ref()));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                // Dropping the partial pool joins the threads already started.
                Err(err) => return Err(PoolError::Spawn(err)),
            }
        }
        debug!(threads, capacity, "worker pool started");
        Ok(pool)
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    // Intent: enqueue a job without ever blocking the caller.
    // Result: the job comes back when the queue is at capacity or already closed.
    pub fn submit(&self, job: J) -> Result<(), Rejected<J>> {
        let mut queue = self.shared.lock();
        if queue.closed {
            return Err(Rejected::Closed(job));
        }
        if queue.jobs.len() >= self.shared.capacity {
            return Err(Rejected::Full(job));
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.shared.ready.notify_one();
        Ok(())
    }

    pub fn shutdown(&mut self) {
        self.shared.lock().closed = true;
        self.shared.ready.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                debug!("worker thread panicked");
            }
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work<J>(shared: &Shared<J>, handler: &(dyn Fn(J) + Send + Sync)) {
    loop {
        let job = {
            let mut queue = shared.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break Some(job);
                }
                if queue.closed {
                    break None;
                }
                queue = shared
                    .ready
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        match job {
            Some(job) => handler(job),
            None => break,
        }
    }
    trace!("worker exiting");
}
