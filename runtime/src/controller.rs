//! Long-running loop controller.
//!
//! [`LoopController`] owns one background task that repeats an
//! [`Iteration`] while its [`RunState`] says the loop is running:
//!
//! ```text
//!          start()                     stop()
//!   Idle ───────────▶ Running ──────────────────▶ Idle
//!     ▲   (spawns one task)   (flag flip only; the
//!     │                        task leaves at the top
//!     └──── start()/stop()      of its next iteration)
//!           are no-ops when
//!           already there
//! ```
//!
//! # Stop semantics
//!
//! The running flag is read at the top of each iteration, never inside one.
//! A `stop()` issued while an iteration is blocked (in an accept, a broker
//! read, a slow subscriber) does not interrupt it; the loop exits only after
//! that iteration returns. Use [`LoopController::wait_stopped`] to observe the
//! exit and [`LoopController::abort`] to force it.
//!
//! # Restart safety
//!
//! [`RunState`] is a single atomic epoch rather than a boolean. Each start
//! gets a new epoch and a loop only keeps going while the epoch it was
//! started with is current, so `stop(); start();` while the old loop is still
//! mid-iteration leaves exactly one loop iterating.

use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Idle/Running state of one loop, as a single atomic word.
///
/// The epoch is even while idle and odd while running. Every transition
/// increments it.
#[derive(Debug, Default)]
pub struct RunState {
    epoch: AtomicU64,
}

impl RunState {
    /// A new, idle state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            epoch: AtomicU64::new(0),
        }
    }

    /// Move from Idle to Running.
    ///
    /// Returns the epoch of the new run, or `None` if already running.
    pub fn try_start(&self) -> Option<u64> {
        let mut current = self.epoch.load(Ordering::Acquire);
        loop {
            if current & 1 == 1 {
                return None;
            }
            match self.epoch.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Move from Running to Idle.
    ///
    /// Returns `false` if already idle.
    pub fn stop(&self) -> bool {
        let mut current = self.epoch.load(Ordering::Acquire);
        loop {
            if current & 1 == 0 {
                return false;
            }
            match self.epoch.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// End the run started at `epoch`, if it is still the current one.
    fn release(&self, epoch: u64) -> bool {
        self.epoch
            .compare_exchange(epoch, epoch + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether a run is in progress.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.epoch.load(Ordering::Acquire) & 1 == 1
    }

    /// Whether the run started at `epoch` is still the current one.
    #[must_use]
    pub fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::Acquire) == epoch
    }
}

/// One unit of work repeated by a [`LoopController`].
///
/// `run_once` should perform one blocking step (one accept-and-serve, one
/// read-and-broadcast) and handle its own errors: the controller has no
/// notion of failure, only of whether to go round again.
#[async_trait]
pub trait Iteration: Send + 'static {
    /// Perform one iteration.
    async fn run_once(&mut self);
}

/// Idempotent start/stop controller for one background loop.
pub struct LoopController {
    name: String,
    state: Arc<RunState>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Epoch of the latest run that has left its loop
    exited: Arc<watch::Sender<u64>>,
    /// Epoch of the latest run that was started
    latest: AtomicU64,
    runs: AtomicU64,
    iterations: Arc<AtomicU64>,
}

impl LoopController {
    /// Create an idle controller. `name` is used in log fields.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (exited, _) = watch::channel(0);
        Self {
            name: name.into(),
            state: Arc::new(RunState::new()),
            task: Mutex::new(None),
            exited: Arc::new(exited),
            latest: AtomicU64::new(0),
            runs: AtomicU64::new(0),
            iterations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the loop if it is idle.
    ///
    /// `make` is only called when a new background task is actually
    /// launched. Returns whether that happened.
    pub fn start<I, F>(&self, make: F) -> bool
    where
        I: Iteration,
        F: FnOnce() -> I,
    {
        let Some(epoch) = self.state.try_start() else {
            trace!(loop_name = %self.name, "Loop already running, start ignored");
            return false;
        };

        let mut iteration = make();
        self.latest.store(epoch, Ordering::Release);
        self.runs.fetch_add(1, Ordering::Relaxed);

        let guard = ExitGuard {
            name: self.name.clone(),
            epoch,
            state: Arc::clone(&self.state),
            exited: Arc::clone(&self.exited),
        };
        let iterations = Arc::clone(&self.iterations);

        let handle = tokio::spawn(async move {
            debug!(loop_name = %guard.name, epoch, "Loop started");
            while guard.state.is_current(epoch) {
                iteration.run_once().await;
                iterations.fetch_add(1, Ordering::Relaxed);
            }
            debug!(loop_name = %guard.name, epoch, "Loop stopped");
        });

        // A replaced handle belongs to a stale run; it leaves at its next check.
        let _previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        true
    }

    /// Ask the loop to stop after its current iteration.
    ///
    /// Does not wait. Returns `false` if the loop was already idle.
    pub fn stop(&self) -> bool {
        let stopped = self.state.stop();
        if stopped {
            debug!(loop_name = %self.name, "Loop stop requested");
        }
        stopped
    }

    /// Whether the loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    /// A future that resolves once the most recently started run has left
    /// its loop. Resolves immediately if nothing was ever started.
    pub fn wait_stopped(&self) -> impl Future<Output = ()> + Send + 'static {
        let target = self.latest.load(Ordering::Acquire);
        let mut exited = self.exited.subscribe();
        async move {
            let _ = exited.wait_for(|last| *last >= target).await;
        }
    }

    /// Abort the background task without waiting for its iteration to end.
    ///
    /// Also moves the state to Idle.
    pub fn abort(&self) {
        self.state.stop();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            debug!(loop_name = %self.name, "Aborting loop task");
            handle.abort();
        }
    }

    /// Take the handle of the latest background task, if any.
    pub fn take_handle(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Number of background tasks launched so far.
    #[must_use]
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Number of completed iterations across all runs.
    #[must_use]
    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Controller name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for LoopController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopController")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("runs", &self.runs())
            .field("iterations", &self.iterations())
            .finish()
    }
}

/// Records a run's exit however its task ends: loop exit, panic or abort.
struct ExitGuard {
    name: String,
    epoch: u64,
    state: Arc<RunState>,
    exited: Arc<watch::Sender<u64>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        // Still current means the task ended without a stop: panic or abort.
        if self.state.release(self.epoch) {
            if std::thread::panicking() {
                error!(
                    loop_name = %self.name,
                    epoch = self.epoch,
                    "Loop iteration panicked, loop is now idle"
                );
            } else {
                debug!(
                    loop_name = %self.name,
                    epoch = self.epoch,
                    "Loop task ended while running"
                );
            }
        }
        let epoch = self.epoch;
        self.exited.send_modify(|last| *last = (*last).max(epoch));
    }
}
