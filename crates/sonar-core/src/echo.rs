//! Edge capture shared between a sensor's measurement and its interrupt.
//!
//! The measurement context writes `triggered` and reads everything else after
//! waking; the edge handler reads `triggered` and writes the timestamps and
//! `echo_observed`. `echo_observed` is stored with `Release` after the echo
//! timestamp, and the waiter loads it with `Acquire` before reading either
//! timestamp.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::pins::Level;
use crate::signal::WaitChannel;

pub(crate) struct EchoState {
    epoch: Instant,
    triggered: AtomicBool,
    echo_observed: AtomicBool,
    /// Nanoseconds since `epoch` of the rising edge.
    time_triggered: AtomicU64,
    /// Nanoseconds since `epoch` of the falling edge.
    time_echoed: AtomicU64,
    channel: Arc<WaitChannel>,
}

impl EchoState {
    pub(crate) fn new() -> Self {
        EchoState {
            epoch: Instant::now(),
            triggered: AtomicBool::new(false),
            echo_observed: AtomicBool::new(false),
            time_triggered: AtomicU64::new(0),
            time_echoed: AtomicU64::new(0),
            channel: Arc::new(WaitChannel::new()),
        }
    }

    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Edge interrupt entry point.
    ///
    /// Never blocks beyond the wait channel's notify; edges outside an armed
    /// window or after the echo was captured are dropped.
    pub(crate) fn on_edge<F>(&self, read_level: F)
    where
        F: FnOnce() -> Level,
    {
        let now = self.now_ns();

        if !self.triggered.load(Ordering::Acquire) {
            return;
        }
        if self.echo_observed.load(Ordering::Acquire) {
            return;
        }

        match read_level() {
            Level::High => self.time_triggered.store(now, Ordering::Relaxed),
            Level::Low => {
                self.time_echoed.store(now, Ordering::Relaxed);
                self.echo_observed.store(true, Ordering::Release);
                self.channel.signal();
            }
        }
    }

    /// Clear both flags ahead of a new trigger pulse.
    pub(crate) fn arm(&self) {
        self.echo_observed.store(false, Ordering::Release);
        self.triggered.store(false, Ordering::Release);
    }

    /// Open the capture window once the trigger pulse has ended.
    pub(crate) fn open_window(&self) {
        self.triggered.store(true, Ordering::Release);
    }

    /// Close the capture window so straggling edges are ignored.
    pub(crate) fn close_window(&self) {
        self.triggered.store(false, Ordering::Release);
    }

    pub(crate) fn echo_observed(&self) -> bool {
        self.echo_observed.load(Ordering::Acquire)
    }

    /// Echo pulse width in whole microseconds.
    ///
    /// Only meaningful after [`echo_observed`](Self::echo_observed) returned
    /// `true` in the current measurement.
    pub(crate) fn elapsed_micros(&self) -> u64 {
        let rising = self.time_triggered.load(Ordering::Relaxed);
        let falling = self.time_echoed.load(Ordering::Relaxed);
        let width = Duration::from_nanos(falling.saturating_sub(rising));
        u64::try_from(width.as_micros()).unwrap_or(u64::MAX)
    }

    pub(crate) fn channel(&self) -> &Arc<WaitChannel> {
        &self.channel
    }

    #[cfg(test)]
    fn time_echoed(&self) -> u64 {
        self.time_echoed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_edges_ignored_until_window_opens() {
        let echo = EchoState::new();
        echo.arm();
        echo.on_edge(|| Level::High);
        echo.on_edge(|| Level::Low);
        assert!(!echo.echo_observed());
        assert_eq!(echo.time_echoed(), 0);
        assert_eq!(echo.channel().signal_count(), 0);
    }

    #[test]
    fn test_rising_then_falling_captures_pulse_width() {
        let echo = EchoState::new();
        echo.arm();
        echo.open_window();

        echo.on_edge(|| Level::High);
        thread::sleep(Duration::from_millis(2));
        echo.on_edge(|| Level::Low);

        assert!(echo.echo_observed());
        assert!(echo.elapsed_micros() >= 2_000);
        assert_eq!(echo.channel().signal_count(), 1);
    }

    #[test]
    fn test_second_falling_edge_is_dropped() {
        let echo = EchoState::new();
        echo.arm();
        echo.open_window();

        echo.on_edge(|| Level::High);
        echo.on_edge(|| Level::Low);
        let first_echo = echo.time_echoed();
        let first_width = echo.elapsed_micros();

        thread::sleep(Duration::from_millis(1));
        echo.on_edge(|| Level::Low);

        assert_eq!(echo.time_echoed(), first_echo);
        assert_eq!(echo.elapsed_micros(), first_width);
        assert_eq!(echo.channel().signal_count(), 1);
    }

    #[test]
    fn test_level_not_sampled_outside_window() {
        let echo = EchoState::new();
        echo.on_edge(|| panic!("level read while disarmed"));

        echo.arm();
        echo.open_window();
        echo.on_edge(|| Level::High);
        echo.on_edge(|| Level::Low);
        echo.on_edge(|| panic!("level read after echo captured"));
    }

    #[test]
    fn test_closed_window_ignores_stragglers() {
        let echo = EchoState::new();
        echo.arm();
        echo.open_window();
        echo.on_edge(|| Level::High);
        echo.close_window();
        echo.on_edge(|| Level::Low);
        assert!(!echo.echo_observed());

        echo.arm();
        assert!(!echo.echo_observed());
    }
}
