//! # Job Handles
//!
//! Completion tracking for background work, such as deferred disposal of a
//! pair stream once the jobs reading it have finished.
//!
//! ```text
//! dependencies ──► [wait all] ──► work ──► signal ──► waiters wake
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{PairStreamError, PairStreamResult};

/// Signal for job completion.
struct CompletionSignal {
    done: AtomicBool,
    condvar: Condvar,
    mutex: Mutex<()>,
}

impl CompletionSignal {
    fn new(done: bool) -> Self {
        Self {
            done: AtomicBool::new(done),
            condvar: Condvar::new(),
            mutex: Mutex::new(()),
        }
    }

    fn signal(&self) {
        let _guard = self.mutex.lock();
        self.done.store(true, Ordering::Release);
        self.condvar.notify_all();
    }

    fn wait(&self) {
        if self.done.load(Ordering::Acquire) {
            return;
        }
        let mut guard = self.mutex.lock();
        while !self.done.load(Ordering::Acquire) {
            self.condvar.wait(&mut guard);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        let mut guard = self.mutex.lock();
        if !self.done.load(Ordering::Acquire) {
            self.condvar.wait_for(&mut guard, timeout);
        }
        self.done.load(Ordering::Acquire)
    }
}

/// Handle for tracking completion of a job. Cheap to clone.
#[derive(Clone)]
pub struct JobHandle {
    signal: Arc<CompletionSignal>,
}

impl JobHandle {
    /// A handle that is already complete.
    #[must_use]
    pub fn completed() -> Self {
        Self {
            signal: Arc::new(CompletionSignal::new(true)),
        }
    }

    /// A handle completed by hand through the returned [`JobCompletion`].
    #[must_use]
    pub fn pending() -> (Self, JobCompletion) {
        let signal = Arc::new(CompletionSignal::new(false));
        (
            Self {
                signal: Arc::clone(&signal),
            },
            JobCompletion { signal },
        )
    }

    /// Runs `work` on a new thread.
    ///
    /// # Errors
    ///
    /// Returns [`PairStreamError::JobSpawn`] if the thread cannot be started.
    pub fn spawn<F>(work: F) -> PairStreamResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::spawn_after(&[], work)
    }

    /// Runs `work` on a new thread once every dependency has completed.
    ///
    /// The handle completes even if `work` panics.
    ///
    /// # Errors
    ///
    /// Returns [`PairStreamError::JobSpawn`] if the thread cannot be started.
    pub fn spawn_after<F>(dependencies: &[Self], work: F) -> PairStreamResult<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (handle, completion) = Self::pending();
        let dependencies = dependencies.to_vec();
        thread::Builder::new()
            .name("pairstream-job".to_owned())
            .spawn(move || {
                let _completion = completion;
                for dependency in &dependencies {
                    dependency.wait();
                }
                work();
            })
            .map_err(|e| PairStreamError::JobSpawn(e.to_string()))?;
        Ok(handle)
    }

    /// A handle that completes once every handle in `dependencies` has.
    ///
    /// # Errors
    ///
    /// Returns [`PairStreamError::JobSpawn`] if a waiter thread is needed and
    /// cannot be started.
    pub fn combine(dependencies: &[Self]) -> PairStreamResult<Self> {
        if dependencies.iter().all(Self::is_done) {
            return Ok(Self::completed());
        }
        Self::spawn_after(dependencies, || {})
    }

    /// Blocks until the job has completed.
    pub fn wait(&self) {
        self.signal.wait();
    }

    /// Waits with timeout. Returns true if completed.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.signal.wait_timeout(timeout)
    }

    /// Returns true if already completed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.signal.done.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("done", &self.is_done())
            .finish()
    }
}

/// Completes its [`JobHandle`] when consumed or dropped.
pub struct JobCompletion {
    signal: Arc<CompletionSignal>,
}

impl JobCompletion {
    /// Marks the job complete.
    pub fn complete(self) {
        drop(self);
    }
}

impl Drop for JobCompletion {
    fn drop(&mut self) {
        self.signal.signal();
    }
}

impl std::fmt::Debug for JobCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCompletion").finish_non_exhaustive()
    }
}
