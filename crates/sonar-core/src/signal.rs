//! Suspend/resume plumbing between a measurement and the edge handler.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use core::fmt;
use parking_lot::{Condvar, Mutex};

/// Why a wait on a [`WaitChannel`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    /// The awaited condition became true.
    Ready,
    /// The deadline passed with the condition still false.
    TimedOut,
    /// The shutdown signal was raised first.
    Interrupted,
}

/// A condition-variable channel a measurement blocks on.
///
/// Signalling takes the channel lock only across the notify so a condition
/// published just before the waiter parks is never lost.
pub(crate) struct WaitChannel {
    lock: Mutex<()>,
    cond: Condvar,
    signals: AtomicU64,
}

impl WaitChannel {
    pub(crate) fn new() -> Self {
        WaitChannel {
            lock: Mutex::new(()),
            cond: Condvar::new(),
            signals: AtomicU64::new(0),
        }
    }

    /// Wake the waiter after publishing its condition.
    pub(crate) fn signal(&self) {
        self.signals.fetch_add(1, Ordering::Relaxed);
        self.nudge();
    }

    /// Number of times [`signal`](Self::signal) has been called.
    pub(crate) fn signal_count(&self) -> u64 {
        self.signals.load(Ordering::Relaxed)
    }

    fn nudge(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    /// Block until `ready` holds, `deadline` passes, or `shutdown` is raised.
    ///
    /// `ready` is re-evaluated under the channel lock after every wake-up,
    /// including a timed-out one. A `None` deadline waits indefinitely.
    pub(crate) fn wait_until<F>(
        &self,
        deadline: Option<Instant>,
        shutdown: &ShutdownSignal,
        ready: F,
    ) -> Wake
    where
        F: Fn() -> bool,
    {
        let mut guard = self.lock.lock();
        loop {
            if ready() {
                return Wake::Ready;
            }
            if shutdown.is_raised() {
                return Wake::Interrupted;
            }
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut guard, deadline).timed_out() {
                        return if ready() { Wake::Ready } else { Wake::TimedOut };
                    }
                }
                None => self.cond.wait(&mut guard),
            }
        }
    }
}

/// Process-wide cancellation for blocked measurements.
///
/// Raising the signal wakes every sensor currently waiting for an echo; their
/// measurements end with [`MeasureError::Interrupted`](crate::MeasureError::Interrupted).
/// The signal latches: once raised, every later wait is interrupted too.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<ShutdownInner>,
}

#[derive(Default)]
struct ShutdownInner {
    raised: AtomicBool,
    waiters: Mutex<Vec<Weak<WaitChannel>>>,
}

impl ShutdownSignal {
    /// A signal that has not been raised.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every subscribed channel.
    pub fn raise(&self) {
        if self.inner.raised.swap(true, Ordering::AcqRel) {
            return;
        }
        let waiters = self.inner.waiters.lock();
        for channel in waiters.iter().filter_map(Weak::upgrade) {
            channel.nudge();
        }
    }

    /// Whether [`raise`](Self::raise) has been called.
    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe(&self, channel: &Arc<WaitChannel>) {
        let mut waiters = self.inner.waiters.lock();
        waiters.retain(|w| w.strong_count() > 0);
        waiters.push(Arc::downgrade(channel));
    }
}

impl fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("raised", &self.is_raised())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_ready_condition_short_circuits() {
        let channel = WaitChannel::new();
        let shutdown = ShutdownSignal::new();
        let deadline = Some(Instant::now() + Duration::from_secs(5));
        let started = Instant::now();
        assert_eq!(channel.wait_until(deadline, &shutdown, || true), Wake::Ready);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wait_times_out_at_deadline() {
        let channel = WaitChannel::new();
        let shutdown = ShutdownSignal::new();
        let started = Instant::now();
        let deadline = Some(started + Duration::from_millis(30));
        assert_eq!(channel.wait_until(deadline, &shutdown, || false), Wake::TimedOut);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_signal_wakes_waiter() {
        let channel = Arc::new(WaitChannel::new());
        let shutdown = ShutdownSignal::new();
        let flag = Arc::new(AtomicBool::new(false));

        let signaller = {
            let channel = Arc::clone(&channel);
            let flag = Arc::clone(&flag);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                flag.store(true, Ordering::Release);
                channel.signal();
            })
        };

        let deadline = Some(Instant::now() + Duration::from_secs(5));
        let wake = channel.wait_until(deadline, &shutdown, || flag.load(Ordering::Acquire));
        signaller.join().unwrap();
        assert_eq!(wake, Wake::Ready);
        assert_eq!(channel.signal_count(), 1);
    }

    #[test]
    fn test_raise_interrupts_subscribed_waiter() {
        let channel = Arc::new(WaitChannel::new());
        let shutdown = ShutdownSignal::new();
        shutdown.subscribe(&channel);

        let raiser = {
            let shutdown = shutdown.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                shutdown.raise();
            })
        };

        let started = Instant::now();
        assert_eq!(channel.wait_until(None, &shutdown, || false), Wake::Interrupted);
        raiser.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(shutdown.is_raised());
    }

    #[test]
    fn test_raised_signal_latches() {
        let channel = WaitChannel::new();
        let shutdown = ShutdownSignal::new();
        shutdown.raise();
        shutdown.raise();
        let deadline = Some(Instant::now() + Duration::from_secs(5));
        assert_eq!(channel.wait_until(deadline, &shutdown, || false), Wake::Interrupted);
    }
}
