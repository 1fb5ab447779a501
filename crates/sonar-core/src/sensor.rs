//! One ultrasonic ranging device and its measurement state machine.
//!
//! A measurement moves `IDLE → ARMED → WAITING → {COMPLETED | TIMED_OUT} → IDLE`:
//!
//! 1. try the measurement lock, failing with [`MeasureError::Busy`] if held;
//! 2. sleep the settling delay so echoes from the previous pulse die out;
//! 3. clear the echo flags (ARMED);
//! 4. emit the trigger pulse and open the capture window (WAITING);
//! 5. block until the edge handler signals the falling edge, the timeout
//!    expires, or the shutdown signal is raised.
//!
//! The capture window is closed and the lock released on every exit path.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use spin_sleep::SpinSleeper;
use tracing::{debug, error, info};

use crate::echo::EchoState;
use crate::error::{AddError, MeasureError};
use crate::pins::{EdgeCallback, EdgeHandle, Level, PinController};
use crate::registry::SensorKey;
use crate::signal::{ShutdownSignal, Wake};

/// Pause between successive measurements on one sensor.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(60);

/// High time of the trigger pulse.
pub const DEFAULT_PULSE_WIDTH: Duration = Duration::from_micros(10);

/// Pulses shorter than this are busy-waited end to end.
const PULSE_SPIN_ACCURACY_NS: u32 = 1_000_000;

/// Fixed delays of the measurement cycle.
///
/// The defaults match the HC-SR04: a 10 µs trigger pulse and a 60 ms
/// measurement cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pause before every trigger pulse.
    pub settle: Duration,
    /// High time of the trigger pulse.
    pub pulse_width: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            settle: DEFAULT_SETTLE,
            pulse_width: DEFAULT_PULSE_WIDTH,
        }
    }
}

/// Outcome counters for one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SensorStats {
    /// Measurements that captured an echo.
    pub completed: u64,
    /// Measurements that ended with [`MeasureError::TimedOut`].
    pub timed_out: u64,
    /// Measurements that ended with [`MeasureError::Interrupted`].
    pub interrupted: u64,
    /// Requests rejected with [`MeasureError::Busy`].
    pub busy: u64,
    /// Wake-ups delivered by the edge handler.
    pub echo_signals: u64,
}

#[derive(Default)]
struct Counters {
    completed: AtomicU64,
    timed_out: AtomicU64,
    interrupted: AtomicU64,
    busy: AtomicU64,
}

impl Counters {
    fn record(&self, outcome: &Result<u64, MeasureError>) {
        let counter = match outcome {
            Ok(_) => &self.completed,
            Err(MeasureError::TimedOut) => &self.timed_out,
            Err(MeasureError::Interrupted) => &self.interrupted,
            Err(MeasureError::Busy) => &self.busy,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// A configured trigger/echo pin pair.
///
/// Sensors are created and destroyed by the
/// [`Registry`](crate::registry::Registry), which owns them.
pub struct Sensor<P: PinController + ?Sized> {
    key: SensorKey,
    timeout: Duration,
    timing: Timing,
    pins: Arc<P>,
    shutdown: ShutdownSignal,
    echo: Arc<EchoState>,
    measurement_lock: Mutex<()>,
    edge: Mutex<Option<EdgeHandle>>,
    counters: Counters,
}

impl<P: PinController + ?Sized> Sensor<P> {
    /// Claim both pins and hook the echo pin's edge interrupt.
    ///
    /// Every failure undoes the claims made before it.
    pub(crate) fn attach(
        pins: Arc<P>,
        key: SensorKey,
        timeout: Duration,
        timing: Timing,
        shutdown: ShutdownSignal,
    ) -> Result<Self, AddError> {
        let SensorKey { trigger, echo } = key;

        if let Some(pin) = [trigger, echo].into_iter().find(|&pin| !pins.is_valid(pin)) {
            error!(trigger, echo, "failed validation of gpios");
            return Err(AddError::InvalidPin(pin));
        }

        pins.claim_output(trigger, Level::Low).map_err(|err| {
            error!(pin = trigger, %err, "trigger gpio request failed");
            AddError::from(err)
        })?;
        if let Err(err) = pins.claim_input(echo) {
            error!(pin = echo, %err, "echo gpio request failed");
            pins.release(trigger);
            return Err(err.into());
        }
        info!(trigger, echo, "acquired gpio");

        let state = Arc::new(EchoState::new());
        shutdown.subscribe(state.channel());

        let callback: EdgeCallback = {
            let state = Arc::clone(&state);
            let pins = Arc::clone(&pins);
            Box::new(move || state.on_edge(|| pins.read_input(echo)))
        };
        let handle = match pins.register_edge_callback(echo, callback) {
            Ok(handle) => handle,
            Err(err) => {
                error!(pin = echo, %err, "edge interrupt registration failed");
                pins.release(echo);
                pins.release(trigger);
                return Err(AddError::InterruptRegistrationFailed {
                    pin: echo,
                    reason: err.to_string(),
                });
            }
        };
        debug!(trigger, echo, id = handle.id, "edge interrupt registered");

        Ok(Sensor {
            key,
            timeout,
            timing,
            pins,
            shutdown,
            echo: state,
            measurement_lock: Mutex::new(()),
            edge: Mutex::new(Some(handle)),
            counters: Counters::default(),
        })
    }

    /// Unhook the edge interrupt and release both pins.
    ///
    /// The caller must hold the guard from [`drain`](Self::drain). Calling it
    /// twice is a no-op.
    pub(crate) fn detach(&self, _drained: &MutexGuard<'_, ()>) {
        let Some(handle) = self.edge.lock().take() else {
            return;
        };
        self.pins.unregister_edge_callback(handle);
        self.pins.release(self.key.echo);
        self.pins.release(self.key.trigger);
        debug!(trigger = self.key.trigger, echo = self.key.echo, "released gpio");
    }

    /// Block until no measurement is in flight and keep it that way.
    pub(crate) fn drain(&self) -> MutexGuard<'_, ()> {
        self.measurement_lock.lock()
    }

    /// The trigger/echo pair identifying this sensor.
    pub fn key(&self) -> SensorKey {
        self.key
    }

    /// Maximum wait for an echo.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fixed delays used by every measurement.
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Whether a measurement currently holds the measurement lock.
    pub fn is_measuring(&self) -> bool {
        self.measurement_lock.is_locked()
    }

    /// Snapshot of the outcome counters.
    pub fn stats(&self) -> SensorStats {
        SensorStats {
            completed: self.counters.completed.load(Ordering::Relaxed),
            timed_out: self.counters.timed_out.load(Ordering::Relaxed),
            interrupted: self.counters.interrupted.load(Ordering::Relaxed),
            busy: self.counters.busy.load(Ordering::Relaxed),
            echo_signals: self.echo.channel().signal_count(),
        }
    }

    /// Take one measurement and return the echo pulse width in microseconds.
    ///
    /// # Errors
    ///
    /// * [`MeasureError::Busy`] if another measurement is in progress.
    /// * [`MeasureError::TimedOut`] if no falling edge arrived within the timeout.
    /// * [`MeasureError::Interrupted`] if the shutdown signal was raised.
    pub fn measure(&self) -> Result<u64, MeasureError> {
        self.measure_releasing(())
    }

    /// Like [`measure`](Self::measure), dropping `lookup` as soon as the
    /// measurement lock has been tried.
    pub(crate) fn measure_releasing<L>(&self, lookup: L) -> Result<u64, MeasureError> {
        let attempt = self.measurement_lock.try_lock();
        drop(lookup);

        let outcome = match attempt {
            Some(_measuring) => self.run_cycle(),
            None => Err(MeasureError::Busy),
        };
        self.counters.record(&outcome);
        match &outcome {
            Ok(usecs) => debug!(sensor = %self.key, usecs, "measurement completed"),
            Err(err) => debug!(sensor = %self.key, %err, "measurement failed"),
        }
        outcome
    }

    /// One armed cycle; the caller holds the measurement lock.
    fn run_cycle(&self) -> Result<u64, MeasureError> {
        let SensorKey { trigger, .. } = self.key;

        thread::sleep(self.timing.settle);

        self.echo.arm();
        self.pins.set_output(trigger, Level::High);
        SpinSleeper::new(PULSE_SPIN_ACCURACY_NS).sleep(self.timing.pulse_width);
        self.pins.set_output(trigger, Level::Low);
        self.echo.open_window();

        let deadline = Instant::now().checked_add(self.timeout);
        let wake = self
            .echo
            .channel()
            .wait_until(deadline, &self.shutdown, || self.echo.echo_observed());
        self.echo.close_window();

        match wake {
            Wake::Ready => Ok(self.echo.elapsed_micros()),
            Wake::TimedOut => Err(MeasureError::TimedOut),
            Wake::Interrupted => Err(MeasureError::Interrupted),
        }
    }
}
