//! The process-wide interruption flag.
//!
//! Signal handlers cannot take parameters, so cancellation is the one piece
//! of global state the core allows itself. Long-running loops call
//! [`checkpoint`] at their defined suspension points; the fetcher and solver
//! receive the [`flag`] directly.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, OnceLock,
};

use thiserror::Error;

static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// The error returned from [`checkpoint`] once the flag has been raised.
#[derive(Debug, Clone, Copy, Error)]
#[error("the operation was cancelled")]
pub struct Cancelled;

/// The shared interruption flag, for handing to components that poll it
/// themselves (solver, downloader).
pub fn flag() -> Arc<AtomicBool> {
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false))).clone()
}

/// Raises the interruption flag.
pub fn interrupt() {
    flag().store(true, Ordering::Relaxed);
}

/// Returns true once the flag has been raised.
pub fn is_interrupted() -> bool {
    flag().load(Ordering::Relaxed)
}

/// Clears the flag. Meant for tests and interactive shells that survive a
/// cancelled operation.
pub fn reset() {
    flag().store(false, Ordering::Relaxed);
}

/// Returns `Err(Cancelled)` once the flag has been raised. Loops call this
/// between steps.
pub fn checkpoint() -> Result<(), Cancelled> {
    if is_interrupted() {
        Err(Cancelled)
    } else {
        Ok(())
    }
}

/// Spawns a task that raises the flag on Ctrl-C. Must run inside a tokio
/// runtime; call once near process start.
pub fn register_ctrl_c_handler() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, finishing the current step");
            interrupt();
        }
    });
}

/// Runs a cleanup closure exactly once when the guard is dropped while the
/// flag is raised (or when [`InterruptionGuard::run_now`] is called). A
/// second cancellation while cleanup runs is absorbed because the closure is
/// consumed on first use.
pub struct InterruptionGuard {
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl InterruptionGuard {
    /// Creates a guard owning the cleanup closure.
    pub fn new(cleanup: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cleanup: Some(Box::new(cleanup)),
        }
    }

    /// Runs the cleanup immediately (at most once).
    pub fn run_now(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }

    /// Drops the guard without ever running the cleanup.
    pub fn disarm(&mut self) {
        self.cleanup = None;
    }
}

impl Drop for InterruptionGuard {
    fn drop(&mut self) {
        if is_interrupted() {
            self.run_now();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // A single test because the flag is process-global state.
    #[test]
    fn test_flag_checkpoint_and_guard() {
        reset();
        assert!(checkpoint().is_ok());
        interrupt();
        assert!(checkpoint().is_err());
        reset();
        assert!(checkpoint().is_ok());

        // The guard runs its cleanup exactly once, even when dropped while
        // the flag is still raised.
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = runs.clone();
            let mut guard = InterruptionGuard::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            interrupt();
            guard.run_now();
            guard.run_now();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        reset();

        // A disarmed guard never runs.
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = runs.clone();
            let mut guard = InterruptionGuard::new(move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            guard.disarm();
            interrupt();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        reset();
    }
}
