//! A thread pool with bounded parallelism and recursive work stealing.
//!
//! A [`ThreadPool`] is created with a *concurrency level* `N` and spawns
//! `N - 1` persistent worker threads; the thread calling
//! [`wait_all`](ThreadPool::wait_all) counts as the `N`th because the wait
//! routines service pending tasks while they wait. Pending tasks are popped
//! in LIFO order, which keeps the effective recursion depth bounded when
//! tasks submit and await sub-tasks of their own.
//!
//! A process-wide registry maps worker threads to their owning pool, so a
//! worker of pool A that waits on a task of pool B drains A's stack, not
//! B's, while it waits.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::error;

/// Errors raised by [`ThreadPool`] operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ThreadPoolError {
    /// The requested concurrency level was zero.
    #[error("unable to initialize a thread pool with a concurrency level of 0")]
    ZeroConcurrencyLevel,
    /// A worker thread could not be spawned.
    #[error("error initializing thread pool of concurrency level {concurrency_level}: {reason}")]
    WorkerSpawn {
        /// The requested concurrency level.
        concurrency_level: usize,
        /// The underlying spawn failure.
        reason: String,
    },
    /// A task was awaited through an invalid handle, e.g. one returned by a
    /// submission to a terminated pool.
    #[error("waiting on an invalid task")]
    InvalidTask,
    /// The task panicked while executing.
    #[error("task panicked")]
    TaskPanicked,
}

type QueuedTask = Box<dyn FnOnce() + Send + 'static>;

struct TaskQueue {
    /// Pending tasks; popped from the back (LIFO).
    stack: Vec<QueuedTask>,
    should_terminate: bool,
}

struct PoolShared {
    queue: Mutex<TaskQueue>,
    queue_cv: Condvar,
}

impl PoolShared {
    /// Pops one pending task, most recently submitted first.
    fn try_pop(&self) -> Option<QueuedTask> {
        self.queue.lock().stack.pop()
    }
}

struct TaskSlot<R> {
    result: Mutex<Option<std::thread::Result<R>>>,
    done_cv: Condvar,
}

/// A handle to a unit of work submitted to a [`ThreadPool`].
///
/// A task is *invalid* if it was returned by a submission the pool refused
/// (see [`ThreadPool::execute`]); awaiting an invalid task yields
/// [`ThreadPoolError::InvalidTask`].
pub struct Task<R>(Option<Arc<TaskSlot<R>>>);

impl<R> Task<R> {
    fn invalid() -> Self {
        Self(None)
    }

    /// Returns true unless this is an invalid task.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.0.is_some()
    }

    /// Returns true if the task has finished executing.
    #[must_use]
    pub fn done(&self) -> bool {
        self.0
            .as_ref()
            .is_some_and(|slot| slot.result.lock().is_some())
    }

    /// Blocks until the task completes and returns its result.
    fn wait(self) -> Result<R, ThreadPoolError> {
        let slot = self.0.ok_or(ThreadPoolError::InvalidTask)?;
        let mut result = slot.result.lock();
        loop {
            if let Some(outcome) = result.take() {
                return outcome.map_err(|_| ThreadPoolError::TaskPanicked);
            }
            slot.done_cv.wait(&mut result);
        }
    }
}

/// The process-wide thread → pool index, guarded by its own lock.
///
/// Entries are inserted when a pool spawns its workers and removed on
/// termination. Lookup never nests under a pool's queue lock.
fn tp_index() -> &'static Mutex<HashMap<ThreadId, Arc<PoolShared>>> {
    static TP_INDEX: OnceLock<Mutex<HashMap<ThreadId, Arc<PoolShared>>>> = OnceLock::new();
    TP_INDEX.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Returns the pool the current thread belongs to, or `fallback` if it is
/// not a worker of any live pool.
fn lookup_pool(fallback: &Arc<PoolShared>) -> Arc<PoolShared> {
    let index = tp_index().lock();
    index
        .get(&std::thread::current().id())
        .cloned()
        .unwrap_or_else(|| Arc::clone(fallback))
}

/// A bounded-parallelism task executor.
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    concurrency_level: usize,
}

impl ThreadPool {
    /// Create a thread pool with the given concurrency level.
    ///
    /// Spawns `concurrency_level - 1` worker threads; the waiting thread
    /// services tasks concurrently with the workers.
    ///
    /// # Errors
    /// Returns [`ThreadPoolError::ZeroConcurrencyLevel`] if
    /// `concurrency_level` is zero and [`ThreadPoolError::WorkerSpawn`] if a
    /// worker thread cannot be spawned (any already-spawned workers are
    /// joined before returning).
    pub fn new(concurrency_level: usize) -> Result<Self, ThreadPoolError> {
        if concurrency_level == 0 {
            return Err(ThreadPoolError::ZeroConcurrencyLevel);
        }

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(TaskQueue {
                stack: Vec::new(),
                should_terminate: false,
            }),
            queue_cv: Condvar::new(),
        });

        let pool = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(concurrency_level - 1)),
            concurrency_level,
        };

        for i in 0..concurrency_level - 1 {
            let shared = Arc::clone(&pool.shared);
            let spawned = std::thread::Builder::new()
                .name(format!("tilestore-worker-{i}"))
                .spawn(move || worker(&shared));
            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(err) => {
                    let err = ThreadPoolError::WorkerSpawn {
                        concurrency_level,
                        reason: err.to_string(),
                    };
                    error!("{err}");
                    pool.terminate();
                    return Err(err);
                }
            }
        }

        {
            let mut index = tp_index().lock();
            for handle in pool.workers.lock().iter() {
                index.insert(handle.thread().id(), Arc::clone(&pool.shared));
            }
        }

        Ok(pool)
    }

    /// The pool's concurrency level.
    #[must_use]
    pub fn concurrency_level(&self) -> usize {
        self.concurrency_level
    }

    /// Submit a unit of work.
    ///
    /// With a concurrency level of 1 there are no worker threads and `f`
    /// executes synchronously on the calling thread. If the pool is
    /// terminating, `f` is dropped and an invalid [`Task`] is returned.
    pub fn execute<R, F>(&self, f: F) -> Task<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let slot = Arc::new(TaskSlot {
            result: Mutex::new(None),
            done_cv: Condvar::new(),
        });
        let task_slot = Arc::clone(&slot);
        let run = move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            *task_slot.result.lock() = Some(outcome);
            task_slot.done_cv.notify_all();
        };

        {
            let mut queue = self.shared.queue.lock();
            if queue.should_terminate {
                error!("cannot execute task; thread pool has terminated");
                return Task::invalid();
            }
            if self.concurrency_level > 1 {
                queue.stack.push(Box::new(run));
                self.shared.queue_cv.notify_one();
                return Task(Some(slot));
            }
        }

        // No worker threads; execute on this thread.
        run();
        Task(Some(slot))
    }

    /// Wait for a single task, servicing pending work while it is not done.
    ///
    /// # Errors
    /// Returns [`ThreadPoolError::InvalidTask`] for an invalid task and
    /// [`ThreadPoolError::TaskPanicked`] if the task panicked.
    pub fn wait<R>(&self, task: Task<R>) -> Result<R, ThreadPoolError> {
        if !task.valid() {
            error!("waiting on an invalid task");
            return Err(ThreadPoolError::InvalidTask);
        }

        loop {
            if task.done() {
                break;
            }

            // Drain the pool that the current thread belongs to, which is
            // not necessarily the pool the awaited task was submitted to.
            let pool = lookup_pool(&self.shared);
            let Some(pending) = pool.try_pop() else {
                break;
            };
            pending();
        }

        task.wait()
    }

    /// Wait for every task, returning the first failure.
    ///
    /// # Errors
    /// Returns the first task error encountered; remaining tasks continue
    /// executing but are no longer awaited.
    pub fn wait_all<E>(&self, tasks: Vec<Task<Result<(), E>>>) -> Result<(), E>
    where
        E: From<ThreadPoolError>,
    {
        for task in tasks {
            match self.wait(task) {
                Ok(status) => status?,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Wait for every task and return each task's status, in submission
    /// order.
    pub fn wait_all_status<E>(&self, tasks: Vec<Task<Result<(), E>>>) -> Vec<Result<(), E>>
    where
        E: From<ThreadPoolError>,
    {
        tasks
            .into_iter()
            .map(|task| match self.wait(task) {
                Ok(status) => status,
                Err(err) => {
                    error!("{err}");
                    Err(err.into())
                }
            })
            .collect()
    }

    /// Terminate the pool: currently-running tasks finish, workers are
    /// joined, and the pool is removed from the thread → pool index.
    ///
    /// Subsequent submissions return invalid tasks. Must not be called from
    /// within a task of this pool.
    pub fn terminate(&self) {
        {
            let mut queue = self.shared.queue.lock();
            queue.should_terminate = true;
            self.shared.queue_cv.notify_all();
        }

        let workers = std::mem::take(&mut *self.workers.lock());

        {
            let mut index = tp_index().lock();
            for handle in &workers {
                index.remove(&handle.thread().id());
            }
        }

        for handle in workers {
            let _ = handle.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("concurrency_level", &self.concurrency_level)
            .finish_non_exhaustive()
    }
}

fn worker(shared: &PoolShared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            shared
                .queue_cv
                .wait_while(&mut queue, |q| !q.should_terminate && q.stack.is_empty());
            queue.stack.pop()
        };

        if let Some(task) = task {
            task();
        }

        if shared.queue.lock().should_terminate {
            break;
        }
    }
}
