use std::{
    process,
    sync::{
        Condvar, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use nix::{
    sys::signal::{SigSet, Signal, kill},
    unistd::Pid,
};
use tracing::{debug, info, warn};

use crate::{
    error::{BerthError, Result},
    lock::HeldLocks,
};

/// Signals that end the process after releasing held locks.
const TERMINATION_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// How long a foreground command gets to exit after a forwarded signal
/// before it is killed.
const CHILD_GRACE: Duration = Duration::from_secs(5);

/// Set while a foreground command owns the terminal's interrupts.
static INTERRUPTS_DEFERRED: AtomicBool = AtomicBool::new(false);

/// Set once the watcher has started shutting the process down.
static TERMINATING: AtomicBool = AtomicBool::new(false);

/// The command currently running inside a locked workspace.
static FOREGROUND: Foreground = Foreground::new();

/// Slot holding the pid of a running child, cleared once it has been reaped.
struct Foreground {
    /// Pid of the running child.
    pid: Mutex<Option<u32>>,
    /// Signalled whenever the slot changes.
    changed: Condvar,
}

impl Foreground {
    /// An empty slot.
    const fn new() -> Self {
        Self {
            pid: Mutex::new(None),
            changed: Condvar::new(),
        }
    }

    /// Record `pid` as running, or clear the slot.
    fn set(&self, pid: Option<u32>) {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner) = pid;
        self.changed.notify_all();
    }

    /// Pid of the running child.
    fn current(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait up to `timeout` for the slot to clear. Returns whether it did.
    fn wait_clear(&self, timeout: Duration) -> bool {
        let guard = self.pid.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |pid| pid.is_some())
            .unwrap_or_else(PoisonError::into_inner);
        guard.is_none()
    }
}

/// Release every lock in `held` when a termination signal arrives, then exit
/// with `128 + signal`.
///
/// A command registered with [`track_foreground`] receives the signal first
/// and is waited for, so nothing keeps writing to a workspace after its lock
/// is gone.
///
/// Must be called before any other thread is spawned: the signals are
/// blocked in the calling thread and received by a dedicated watcher thread.
/// Child processes start with an empty signal mask and still see the signals.
pub fn release_on_termination(held: HeldLocks) -> Result<()> {
    let mut mask = SigSet::empty();
    for signal in TERMINATION_SIGNALS {
        mask.add(signal);
    }
    mask.thread_block()
        .map_err(|e| BerthError::Context(format!("Failed to block termination signals: {e}")))?;

    thread::Builder::new()
        .name("berth-signals".to_string())
        .spawn(move || watch(mask, &held))
        .map_err(|e| BerthError::Context(format!("Failed to start signal watcher: {e}")))?;
    Ok(())
}

/// Wait for a signal in `mask` and terminate.
fn watch(mask: SigSet, held: &HeldLocks) {
    loop {
        match mask.wait() {
            Ok(Signal::SIGINT) if INTERRUPTS_DEFERRED.load(Ordering::SeqCst) => {
                debug!("interrupt left to the foreground command");
            }
            Ok(signal) => {
                TERMINATING.store(true, Ordering::SeqCst);
                stop_foreground(&FOREGROUND, signal, CHILD_GRACE);
                let released = held.release_all();
                info!(%signal, released, "terminating on signal");
                process::exit(128 + signal as i32);
            }
            Err(err) => {
                warn!(error = %err, "waiting for termination signals failed");
                return;
            }
        }
    }
}

/// Forward `signal` to the child in `slot` and wait for it to be reaped,
/// killing it if it outlives `grace`.
fn stop_foreground(slot: &Foreground, signal: Signal, grace: Duration) {
    let Some(pid) = slot.current() else {
        return;
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let target = Pid::from_raw(raw);

    debug!(pid, %signal, "forwarding signal to foreground command");
    if let Err(err) = kill(target, signal) {
        warn!(pid, error = %err, "failed to signal foreground command");
    }
    if slot.wait_clear(grace) {
        return;
    }

    warn!(pid, "foreground command is still running; killing it");
    if let Err(err) = kill(target, Signal::SIGKILL) {
        warn!(pid, error = %err, "failed to kill foreground command");
    }
    if !slot.wait_clear(grace) {
        warn!(pid, "foreground command was not reaped");
    }
}

/// Marks a child process as running in a locked workspace until dropped.
///
/// Drop the guard only after the child has been waited for. If termination
/// is under way, dropping it hands the process over to the signal watcher,
/// which releases the locks and exits.
#[derive(Debug)]
pub struct ForegroundChild {
    /// Prevents construction outside [`track_foreground`].
    _private: (),
}

/// Register the child `pid` as the command a termination signal must stop
/// before locks are released.
pub fn track_foreground(pid: u32) -> ForegroundChild {
    FOREGROUND.set(Some(pid));
    if TERMINATING.load(Ordering::SeqCst)
        && let Ok(raw) = i32::try_from(pid)
    {
        // Started after the watcher looked; it must not outlive the locks.
        #[allow(clippy::let_underscore_must_use)]
        let _ = kill(Pid::from_raw(raw), Signal::SIGKILL);
    }
    ForegroundChild { _private: () }
}

impl Drop for ForegroundChild {
    fn drop(&mut self) {
        FOREGROUND.set(None);
        if TERMINATING.load(Ordering::SeqCst) {
            // The watcher is releasing locks and exits the process.
            loop {
                thread::park();
            }
        }
    }
}

/// While alive, SIGINT is left to a foreground child command instead of
/// terminating this process.
#[derive(Debug)]
pub struct InterruptDeferral {
    /// Prevents construction outside [`defer_interrupts`].
    _private: (),
}

/// Leave terminal interrupts to a foreground child until the guard drops.
pub fn defer_interrupts() -> InterruptDeferral {
    INTERRUPTS_DEFERRED.store(true, Ordering::SeqCst);
    InterruptDeferral { _private: () }
}

impl Drop for InterruptDeferral {
    fn drop(&mut self) {
        INTERRUPTS_DEFERRED.store(false, Ordering::SeqCst);
    }
}
