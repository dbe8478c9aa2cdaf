//! Bounded-blocking bridge over engine futures.
//!
//! A [`OneShot`] is a single-assignment outcome slot paired with a gate that
//! opens once. The calling thread parks on the gate until the outcome
//! arrives, the timeout elapses, or an [`Interrupter`] fires; the three cases
//! stay distinguishable.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;

/// Unit of a lifecycle timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Convert `value` of this unit into a duration, saturating on overflow.
    pub fn to_duration(self, value: u64) -> Duration {
        match self {
            TimeUnit::Nanoseconds => Duration::from_nanos(value),
            TimeUnit::Microseconds => Duration::from_micros(value),
            TimeUnit::Milliseconds => Duration::from_millis(value),
            TimeUnit::Seconds => Duration::from_secs(value),
            TimeUnit::Minutes => Duration::from_secs(value.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(value.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(value.saturating_mul(86_400)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TimeUnit::Nanoseconds => "nanoseconds",
            TimeUnit::Microseconds => "microseconds",
            TimeUnit::Milliseconds => "milliseconds",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::Days => "days",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A timeout as the caller expressed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub value: u64,
    pub unit: TimeUnit,
}

impl Timeout {
    pub const fn new(value: u64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn as_duration(&self) -> Duration {
        self.unit.to_duration(self.value)
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

/// Timeout used by `start_sync` and `shutdown_sync`.
pub const DEFAULT_TIMEOUT: Timeout = Timeout::new(10, TimeUnit::Seconds);

/// Cause attached to interruption errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("wait interrupted")]
pub struct Interrupted;

/// How a bounded wait ended.
#[derive(Debug)]
pub(crate) enum Wait<T> {
    Completed(T),
    TimedOut,
    Interrupted,
}

struct Slot<T> {
    value: Option<T>,
    open: bool,
    interrupted: bool,
}

/// Single-assignment outcome slot with a one-shot gate.
pub(crate) struct OneShot<T> {
    slot: Mutex<Slot<T>>,
    gate: Condvar,
}

impl<T> OneShot<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                value: None,
                open: false,
                interrupted: false,
            }),
            gate: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the outcome and open the gate. Only the first call has effect.
    pub(crate) fn complete(&self, value: T) -> bool {
        let mut slot = self.lock();
        if slot.open {
            return false;
        }
        slot.value = Some(value);
        slot.open = true;
        self.gate.notify_all();
        true
    }

    fn interrupt(&self) {
        let mut slot = self.lock();
        slot.interrupted = true;
        self.gate.notify_all();
    }

    /// Park until the gate opens, `timeout` elapses, or the wait is
    /// interrupted. Interruption wins over a completed outcome.
    pub(crate) fn wait(&self, timeout: Duration) -> Wait<T> {
        let deadline = Instant::now().checked_add(timeout);
        let mut slot = self.lock();
        loop {
            if slot.interrupted {
                return Wait::Interrupted;
            }
            if slot.open {
                return match slot.value.take() {
                    Some(value) => Wait::Completed(value),
                    None => Wait::TimedOut,
                };
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::from_secs(u64::MAX),
            };
            if remaining.is_zero() {
                return Wait::TimedOut;
            }
            slot = self
                .gate
                .wait_timeout(slot, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

trait Interruptible: Send + Sync {
    fn interrupt(&self);
}

impl<T: Send> Interruptible for OneShot<T> {
    fn interrupt(&self) {
        OneShot::interrupt(self);
    }
}

#[derive(Default)]
struct InterruptState {
    flag: AtomicBool,
    waiting: Mutex<Vec<Weak<dyn Interruptible>>>,
}

/// Interrupts bounded-blocking waits.
///
/// The flag is sticky: once [`interrupt`](Interrupter::interrupt) is called,
/// every current and future wait through this handle fails with
/// [`Interrupted`] until [`clear`](Interrupter::clear) is called.
#[derive(Clone, Default)]
pub struct Interrupter {
    state: Arc<InterruptState>,
}

impl Interrupter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and wake every thread currently waiting.
    pub fn interrupt(&self) {
        self.state.flag.store(true, Ordering::SeqCst);
        let waiting = self.waiting();
        for gate in waiting.iter().filter_map(Weak::upgrade) {
            gate.interrupt();
        }
    }

    pub fn is_interrupted(&self) -> bool {
        self.state.flag.load(Ordering::SeqCst)
    }

    /// Reset the flag, returning whether it was set.
    pub fn clear(&self) -> bool {
        self.state.flag.swap(false, Ordering::SeqCst)
    }

    fn waiting(&self) -> MutexGuard<'_, Vec<Weak<dyn Interruptible>>> {
        self.state
            .waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register<T: Send + 'static>(&self, gate: &Arc<OneShot<T>>) {
        let gate: Arc<dyn Interruptible> = Arc::clone(gate) as Arc<dyn Interruptible>;
        {
            let mut waiting = self.waiting();
            waiting.retain(|weak| weak.strong_count() > 0);
            waiting.push(Arc::downgrade(&gate));
        }
        if self.is_interrupted() {
            gate.interrupt();
        }
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Run `operation` on `handle` and park the calling thread on its outcome.
///
/// The operation is never cancelled: a timed-out or interrupted wait leaves
/// it running to completion unobserved.
pub(crate) fn wait_for<T, F>(
    handle: &Handle,
    operation: F,
    timeout: Duration,
    interrupter: &Interrupter,
) -> Wait<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let gate = Arc::new(OneShot::new());
    interrupter.register(&gate);

    let completion = Arc::clone(&gate);
    handle.spawn(async move {
        completion.complete(operation.await);
    });

    gate.wait(timeout)
}
