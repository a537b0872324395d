//! Bounded worker pool for long-running jobs (compositing, transforms,
//! pyramid rebuilds).
//!
//! At most `threads` jobs run at once; the rest wait in a FIFO queue where
//! they can still be withdrawn. Running jobs see a [`CancellationToken`] they
//! are expected to poll. The pool is an ordinary value: construct it once and
//! pass it to whatever needs it.

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};

// ============================================================================
// CANCELLATION
// ============================================================================

/// Shared cancel flag. Cloning yields a handle to the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ============================================================================
// JOBS
// ============================================================================

/// How a submitted job ended.
#[derive(Debug)]
pub enum JobOutcome<T> {
    Completed(T),
    /// The job ran to its end but the token was raised while it ran.
    Cancelled(T),
    /// Removed from the queue before it started.
    Withdrawn,
    Panicked(String),
}

impl<T> JobOutcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            JobOutcome::Completed(v) | JobOutcome::Cancelled(v) => Some(v),
            JobOutcome::Withdrawn | JobOutcome::Panicked(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, JobOutcome::Completed(_))
    }
}

struct QueuedJob {
    id: u64,
    token: CancellationToken,
    run: Box<dyn FnOnce() + Send>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<QueuedJob>,
    running: HashMap<u64, CancellationToken>,
    next_id: u64,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    work_available: Condvar,
    idle: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Remove job `id` from the queue. False once it has started.
    fn withdraw(&self, id: u64) -> bool {
        let mut state = self.lock();
        match state.queue.iter().position(|j| j.id == id) {
            Some(pos) => {
                state.queue.remove(pos);
                drop(state);
                self.idle.notify_all();
                log::debug!("job {} withdrawn", id);
                true
            }
            None => false,
        }
    }
}

/// Handle to one submitted job.
pub struct JobHandle<T> {
    id: u64,
    token: CancellationToken,
    shared: Arc<Shared>,
    receiver: mpsc::Receiver<JobOutcome<T>>,
}

impl<T> JobHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Remove the job from the queue if it has not started.
    pub fn withdraw(&self) -> bool {
        self.shared.withdraw(self.id)
    }

    /// Withdraw a queued job, or raise the token of a running one.
    pub fn cancel(&self) {
        if !self.withdraw() {
            self.token.cancel();
        }
    }

    /// Block until the job ends.
    pub fn wait(self) -> JobOutcome<T> {
        // The sender only disappears without a message when the job was
        // dropped from the queue.
        self.receiver.recv().unwrap_or(JobOutcome::Withdrawn)
    }

    /// Non-blocking poll.
    pub fn try_outcome(&self) -> Option<JobOutcome<T>> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(JobOutcome::Withdrawn),
        }
    }
}

// ============================================================================
// POOL
// ============================================================================

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        if threads == 0 {
            return Err(CoreError::Pool("a worker pool needs at least one thread".into()));
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work_available: Condvar::new(),
            idle: Condvar::new(),
        });
        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("paintfe-worker-{}", i))
                .spawn(move || worker_loop(shared))
                .map_err(|e| CoreError::Pool(format!("failed to spawn worker: {}", e)))?;
            workers.push(handle);
        }
        log::info!("worker pool started with {} threads", threads);
        Ok(Self { shared, workers })
    }

    pub fn from_config(config: &CoreConfig) -> Result<Self> {
        Self::new(config.worker_threads)
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue `job`. It receives the token that [`JobHandle::cancel`] raises.
    pub fn submit<T, F>(&self, job: F) -> JobHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&CancellationToken) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let token = CancellationToken::new();
        let job_token = token.clone();

        let run: Box<dyn FnOnce() + Send> = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(|| job(&job_token)));
            let outcome = match result {
                Ok(value) if job_token.is_cancelled() => JobOutcome::Cancelled(value),
                Ok(value) => JobOutcome::Completed(value),
                Err(panic) => {
                    let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                        s.to_string()
                    } else if let Some(s) = panic.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "unknown panic".to_string()
                    };
                    log::error!("worker job panicked: {}", msg);
                    JobOutcome::Panicked(msg)
                }
            };
            let _ = tx.send(outcome);
        });

        let mut state = self.shared.lock();
        let id = state.next_id;
        state.next_id += 1;
        if state.shutting_down {
            // Dropping `run` disconnects the channel; the handle reports Withdrawn.
            log::warn!("job {} submitted after shutdown", id);
        } else {
            state.queue.push_back(QueuedJob {
                id,
                token: token.clone(),
                run,
            });
            self.shared.work_available.notify_one();
        }
        drop(state);

        JobHandle {
            id,
            token,
            shared: Arc::clone(&self.shared),
            receiver: rx,
        }
    }

    pub fn queued_count(&self) -> usize {
        self.shared.lock().queue.len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.lock().running.len()
    }

    /// Block until no job is queued or running.
    pub fn wait_idle(&self) {
        let mut state = self.shared.lock();
        while !state.queue.is_empty() || !state.running.is_empty() {
            state = match self.shared.idle.wait(state) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Withdraw queued jobs, cancel running ones and join every worker.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        {
            let mut state = self.shared.lock();
            state.shutting_down = true;
            let withdrawn = state.queue.len();
            state.queue.clear();
            for token in state.running.values() {
                token.cancel();
            }
            if withdrawn > 0 {
                log::info!("shutdown withdrew {} queued jobs", withdrawn);
            }
        }
        self.shared.work_available.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread terminated abnormally");
            }
        }
        log::info!("worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let job = {
            let mut state = shared.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.running.insert(job.id, job.token.clone());
                    break job;
                }
                if state.shutting_down {
                    return;
                }
                state = match shared.work_available.wait(state) {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
            }
        };

        let id = job.id;
        (job.run)();

        let mut state = shared.lock();
        state.running.remove(&id);
        drop(state);
        shared.idle.notify_all();
    }
}
