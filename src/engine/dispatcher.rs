use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Unit of work executed on a dispatcher's worker thread
pub type Task = Box<dyn FnOnce(&CancellableTimer) + Send + 'static>;

enum Job {
    Run { ticket: u64, task: Task },
    Exit,
}

#[derive(Default)]
struct Queue {
    /// Ticket of the most recently enqueued task
    enqueued: u64,
    /// Ticket of the most recent task that ran or was discarded
    retired: u64,
    /// Queued tasks the worker must discard before running the next one
    overflow: u64,
    /// A task is executing on the worker right now
    running: bool,
}

struct Shared {
    name: String,
    capacity: Option<usize>,
    active: AtomicBool,
    queue: Mutex<Queue>,
    retired_cv: Condvar,
    /// Bumped to wake every sleeping task early
    wake_epoch: Mutex<u64>,
    wake_cv: Condvar,
    worker_id: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wake_sleepers(&self) {
        let mut epoch = self.wake_epoch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *epoch = epoch.wrapping_add(1);
        self.wake_cv.notify_all();
    }

    fn on_worker_thread(&self) -> bool {
        let worker = self.worker_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *worker == Some(thread::current().id())
    }
}

/// Cancellation token handed to every task
///
/// Cancellation is cooperative: a task polls [`is_cancelled`] or sleeps
/// through [`try_sleep`], which returns early once the dispatcher stops or
/// is interrupted.
///
/// [`is_cancelled`]: CancellableTimer::is_cancelled
/// [`try_sleep`]: CancellableTimer::try_sleep
#[derive(Clone)]
pub struct CancellableTimer {
    shared: Arc<Shared>,
}

impl CancellableTimer {
    /// Sleep for `duration`; returns false if woken early
    pub fn try_sleep(&self, duration: Duration) -> bool {
        if !self.shared.active.load(Ordering::Acquire) {
            return false;
        }
        let deadline = Instant::now() + duration;
        let mut epoch = self.shared.wake_epoch.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let start_epoch = *epoch;
        loop {
            if *epoch != start_epoch || !self.shared.active.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            epoch = self
                .shared
                .wake_cv
                .wait_timeout(epoch, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .0;
        }
    }

    pub fn is_cancelled(&self) -> bool {
        !self.shared.active.load(Ordering::Acquire)
    }
}

/// FIFO task queue served by one dedicated worker thread
///
/// With a capacity of `n`, at most `n` tasks wait behind the one running;
/// the oldest waiting task is discarded when another arrives, so delivery
/// favours freshness over completeness.
pub struct Dispatcher {
    shared: Arc<Shared>,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Bounded dispatcher
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self::build(name.into(), Some(capacity.max(1)))
    }

    /// Dispatcher that never discards tasks
    pub fn unbounded(name: impl Into<String>) -> Self {
        Self::build(name.into(), None)
    }

    fn build(name: String, capacity: Option<usize>) -> Self {
        let (tx, rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                name,
                capacity,
                active: AtomicBool::new(false),
                queue: Mutex::new(Queue::default()),
                retired_cv: Condvar::new(),
                wake_epoch: Mutex::new(0),
                wake_cv: Condvar::new(),
                worker_id: Mutex::new(None),
            }),
            tx,
            rx,
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawn the worker thread; no-op while already running
    pub fn start(&self) -> std::io::Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if worker.is_some() {
            return Ok(());
        }

        let shared = self.shared.clone();
        let rx = self.rx.clone();
        let handle = thread::Builder::new()
            .name(format!("replay-{}", self.shared.name))
            .spawn(move || run_worker(shared, rx))?;

        *self.shared.worker_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
            Some(handle.thread().id());
        *worker = Some(handle);
        let _queue = self.shared.queue();
        self.shared.active.store(true, Ordering::Release);
        debug!(dispatcher = %self.shared.name, "dispatcher started");
        Ok(())
    }

    /// Discard queued tasks, let the in-flight task finish and join the worker
    ///
    /// Idempotent. Must not be called from a task running on this
    /// dispatcher; if it is, the worker is detached instead of joined.
    pub fn stop(&self) {
        let handle = {
            let mut worker = self.worker.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match worker.take() {
                Some(handle) => handle,
                None => return,
            }
        };

        // Under the queue lock, so no invoke can slip a task in behind Exit.
        {
            let _queue = self.shared.queue();
            self.shared.active.store(false, Ordering::Release);
        }
        self.shared.wake_sleepers();
        if self.tx.send(Job::Exit).is_err() {
            warn!(dispatcher = %self.shared.name, "worker channel closed before stop");
        }

        let detached = self.shared.on_worker_thread();
        if detached {
            error!(dispatcher = %self.shared.name, "stop() called from its own worker; detaching");
        } else if handle.join().is_err() {
            error!(dispatcher = %self.shared.name, "worker thread panicked");
        }

        *self.shared.worker_id.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
        let mut queue = self.shared.queue();
        let leftover = self.rx.try_iter().filter(|job| matches!(job, Job::Run { .. })).count();
        if leftover > 0 {
            debug!(dispatcher = %self.shared.name, leftover, "discarded tasks left behind by the worker");
        }
        if detached {
            // the drain above may have taken the Exit meant for the detached worker
            let _ = self.tx.send(Job::Exit);
        }
        queue.retired = queue.enqueued;
        queue.overflow = 0;
        self.shared.retired_cv.notify_all();
        debug!(dispatcher = %self.shared.name, "dispatcher stopped");
    }

    /// Enqueue a task; returns false if the dispatcher is not running
    pub fn invoke<F>(&self, task: F) -> bool
    where
        F: FnOnce(&CancellableTimer) + Send + 'static,
    {
        let mut queue = self.shared.queue();
        if !self.shared.active.load(Ordering::Acquire) {
            debug!(dispatcher = %self.shared.name, "task ignored, dispatcher is stopped");
            return false;
        }

        queue.enqueued += 1;
        let ticket = queue.enqueued;
        if let Some(capacity) = self.shared.capacity {
            // the in-flight task does not take a queue slot
            let waiting = queue.enqueued - queue.retired - queue.overflow - u64::from(queue.running);
            if waiting > capacity as u64 {
                queue.overflow += 1;
                debug!(dispatcher = %self.shared.name, "queue full, dropping oldest task");
            }
        }
        if self.tx.send(Job::Run { ticket, task: Box::new(task) }).is_err() {
            // The receiver lives in `self`, so this only happens during teardown.
            queue.retired = ticket;
            self.shared.retired_cv.notify_all();
            return false;
        }
        true
    }

    /// Block until every task enqueued before this call has run or been
    /// discarded; false on timeout or when called from the worker itself
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.shared.on_worker_thread() {
            error!(dispatcher = %self.shared.name, "flush() called from its own worker");
            return false;
        }
        let queue = self.shared.queue();
        let target = queue.enqueued;
        let (_queue, result) = self
            .shared
            .retired_cv
            .wait_timeout_while(queue, timeout, |q| q.retired < target)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !result.timed_out()
    }

    /// Wake any task currently sleeping in [`CancellableTimer::try_sleep`]
    pub fn interrupt(&self) {
        self.shared.wake_sleepers();
    }

    /// Tasks queued or running
    pub fn pending(&self) -> u64 {
        let queue = self.shared.queue();
        queue.enqueued - queue.retired
    }

    pub fn is_running(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// True when the caller is this dispatcher's worker thread
    pub fn is_current_thread(&self) -> bool {
        self.shared.on_worker_thread()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: Arc<Shared>, rx: Receiver<Job>) {
    let timer = CancellableTimer {
        shared: shared.clone(),
    };

    while let Ok(job) = rx.recv() {
        let (ticket, task) = match job {
            Job::Exit => break,
            Job::Run { ticket, task } => (ticket, task),
        };

        let run = {
            let mut queue = shared.queue();
            if queue.overflow > 0 {
                queue.overflow -= 1;
                false
            } else {
                queue.running = shared.active.load(Ordering::Acquire);
                queue.running
            }
        };

        if run {
            if panic::catch_unwind(AssertUnwindSafe(|| task(&timer))).is_err() {
                error!(dispatcher = %shared.name, "task panicked");
            }
        } else {
            drop(task);
        }

        let mut queue = shared.queue();
        queue.running = false;
        // stop() may already have retired everything
        queue.retired = queue.retired.max(ticket);
        shared.retired_cv.notify_all();
    }
}
