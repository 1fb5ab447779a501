//! A software pin controller with scripted echoes.
//!
//! [`SimulatedPins`] tracks claims and levels in memory. When a trigger pin
//! with an [`EchoScript`] falls from high to low, a background thread raises
//! and lowers the scripted echo pin at the requested offsets and delivers the
//! edges to registered callbacks, the way a real GPIO interrupt would.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use spin_sleep::SpinSleeper;
use tracing::{debug, warn};

use crate::error::PinError;
use crate::pins::{EdgeCallback, EdgeHandle, Level, PinController, PinId};

/// Highest pin number accepted by [`SimulatedPins::new`].
pub const DEFAULT_MAX_PIN: PinId = 53;

/// Spin for the final stretch of every scripted delay.
const SIM_SPIN_ACCURACY_NS: u32 = 200_000;

/// Echo produced in response to a trigger pulse.
///
/// Offsets are measured from the moment the trigger pin returns low.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EchoScript {
    /// Pin the echo appears on.
    pub echo: PinId,
    /// Delay until the echo pin rises.
    pub rise_after: Duration,
    /// Delay until the echo pin falls.
    pub fall_after: Duration,
    /// Optional spurious falling edge delivered after the real one.
    pub stray_fall_after: Option<Duration>,
}

impl EchoScript {
    /// An echo pulse on `echo` spanning `rise_after..fall_after`.
    pub const fn pulse(echo: PinId, rise_after: Duration, fall_after: Duration) -> Self {
        EchoScript {
            echo,
            rise_after,
            fall_after,
            stray_fall_after: None,
        }
    }

    /// Add a spurious falling-edge interrupt `after` the trigger.
    pub const fn with_stray_fall(mut self, after: Duration) -> Self {
        self.stray_fall_after = Some(after);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

#[derive(Default)]
struct SimState {
    claims: HashMap<PinId, Direction>,
    levels: HashMap<PinId, Level>,
    scripts: HashMap<PinId, EchoScript>,
    refused: HashSet<PinId>,
    pulses: HashMap<PinId, u64>,
    raised_at: HashMap<PinId, Instant>,
    last_pulse_width: HashMap<PinId, Duration>,
}

struct Registration {
    pin: PinId,
    callback: EdgeCallback,
}

struct SimInner {
    max_pin: PinId,
    state: Mutex<SimState>,
    callbacks: RwLock<HashMap<u64, Registration>>,
    next_id: AtomicU64,
}

impl SimInner {
    /// Change a pin level and deliver the edge if it actually changed.
    fn drive(&self, pin: PinId, level: Level) {
        let changed = {
            let mut state = self.state.lock();
            let previous = state.levels.insert(pin, level).unwrap_or_default();
            previous != level
        };
        if changed {
            self.fire(pin);
        }
    }

    fn fire(&self, pin: PinId) {
        let callbacks = self.callbacks.read();
        for registration in callbacks.values().filter(|r| r.pin == pin) {
            (registration.callback)();
        }
    }

    fn play(&self, script: EchoScript, start: Instant) {
        let sleeper = SpinSleeper::new(SIM_SPIN_ACCURACY_NS);
        let sleep_until = |offset: Duration| {
            let target = start + offset;
            sleeper.sleep(target.saturating_duration_since(Instant::now()));
        };

        sleep_until(script.rise_after);
        self.drive(script.echo, Level::High);
        sleep_until(script.fall_after);
        self.drive(script.echo, Level::Low);

        if let Some(stray) = script.stray_fall_after {
            sleep_until(stray);
            self.fire(script.echo);
        }
    }
}

/// In-memory [`PinController`] for tests and hardware-free runs.
#[derive(Clone)]
pub struct SimulatedPins {
    inner: Arc<SimInner>,
}

impl Default for SimulatedPins {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPins {
    /// Controller accepting pins `0..=DEFAULT_MAX_PIN`.
    pub fn new() -> Self {
        Self::with_max_pin(DEFAULT_MAX_PIN)
    }

    /// Controller accepting pins `0..=max_pin`.
    pub fn with_max_pin(max_pin: PinId) -> Self {
        SimulatedPins {
            inner: Arc::new(SimInner {
                max_pin,
                state: Mutex::new(SimState::default()),
                callbacks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Answer every pulse on `trigger` with `script`.
    pub fn script_echo(&self, trigger: PinId, script: EchoScript) {
        self.inner.state.lock().scripts.insert(trigger, script);
    }

    /// Stop answering pulses on `trigger`.
    pub fn clear_echo(&self, trigger: PinId) {
        self.inner.state.lock().scripts.remove(&trigger);
    }

    /// Make edge-callback registration on `pin` fail.
    pub fn refuse_edge_callbacks(&self, pin: PinId) {
        self.inner.state.lock().refused.insert(pin);
    }

    /// Set `pin` to `level` and deliver the edge to its callbacks.
    pub fn inject_edge(&self, pin: PinId, level: Level) {
        self.inner.drive(pin, level);
    }

    /// Whether `pin` is currently claimed.
    pub fn is_claimed(&self, pin: PinId) -> bool {
        self.inner.state.lock().claims.contains_key(&pin)
    }

    /// Number of edge callbacks currently attached to `pin`.
    pub fn edge_callbacks(&self, pin: PinId) -> usize {
        self.inner
            .callbacks
            .read()
            .values()
            .filter(|r| r.pin == pin)
            .count()
    }

    /// Current level of `pin`.
    pub fn level(&self, pin: PinId) -> Level {
        self.inner
            .state
            .lock()
            .levels
            .get(&pin)
            .copied()
            .unwrap_or_default()
    }

    /// Number of completed high-then-low pulses on an output pin.
    pub fn pulse_count(&self, pin: PinId) -> u64 {
        self.inner.state.lock().pulses.get(&pin).copied().unwrap_or(0)
    }

    /// High time of the most recent pulse on an output pin.
    pub fn last_pulse_width(&self, pin: PinId) -> Option<Duration> {
        self.inner.state.lock().last_pulse_width.get(&pin).copied()
    }

    fn claim(&self, pin: PinId, direction: Direction) -> Result<(), PinError> {
        if !self.is_valid(pin) {
            return Err(PinError::Invalid(pin));
        }
        let mut state = self.inner.state.lock();
        if state.claims.contains_key(&pin) {
            return Err(PinError::InUse(pin));
        }
        state.claims.insert(pin, direction);
        Ok(())
    }
}

impl PinController for SimulatedPins {
    fn is_valid(&self, pin: PinId) -> bool {
        pin <= self.inner.max_pin
    }

    fn claim_output(&self, pin: PinId, initial: Level) -> Result<(), PinError> {
        self.claim(pin, Direction::Output)?;
        self.inner.state.lock().levels.insert(pin, initial);
        Ok(())
    }

    fn claim_input(&self, pin: PinId) -> Result<(), PinError> {
        self.claim(pin, Direction::Input)
    }

    fn release(&self, pin: PinId) {
        let mut state = self.inner.state.lock();
        if state.claims.remove(&pin).is_none() {
            warn!(pin, "release of unclaimed simulated pin");
        }
        state.raised_at.remove(&pin);
    }

    fn set_output(&self, pin: PinId, level: Level) {
        let now = Instant::now();
        let script = {
            let mut state = self.inner.state.lock();
            if state.claims.get(&pin) != Some(&Direction::Output) {
                warn!(pin, %level, "write to simulated pin not claimed as output");
                return;
            }
            let previous = state.levels.insert(pin, level).unwrap_or_default();
            match (previous, level) {
                (Level::Low, Level::High) => {
                    state.raised_at.insert(pin, now);
                    None
                }
                (Level::High, Level::Low) => {
                    *state.pulses.entry(pin).or_insert(0) += 1;
                    if let Some(raised) = state.raised_at.remove(&pin) {
                        state.last_pulse_width.insert(pin, now - raised);
                    }
                    state.scripts.get(&pin).copied()
                }
                _ => None,
            }
        };

        if let Some(script) = script {
            debug!(trigger = pin, echo = script.echo, "playing simulated echo");
            let inner = Arc::clone(&self.inner);
            thread::spawn(move || inner.play(script, now));
        }
    }

    fn read_input(&self, pin: PinId) -> Level {
        self.level(pin)
    }

    fn register_edge_callback(
        &self,
        pin: PinId,
        callback: EdgeCallback,
    ) -> Result<EdgeHandle, PinError> {
        {
            let state = self.inner.state.lock();
            if state.claims.get(&pin) != Some(&Direction::Input) {
                return Err(PinError::NotClaimed(pin));
            }
            if state.refused.contains(&pin) {
                return Err(PinError::Interrupt {
                    pin,
                    reason: "refused by simulation".into(),
                });
            }
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .write()
            .insert(id, Registration { pin, callback });
        Ok(EdgeHandle { pin, id })
    }

    fn unregister_edge_callback(&self, handle: EdgeHandle) {
        if self.inner.callbacks.write().remove(&handle.id).is_none() {
            warn!(pin = handle.pin, id = handle.id, "unknown edge callback");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_claims_are_exclusive() {
        let pins = SimulatedPins::with_max_pin(10);
        assert_eq!(pins.claim_output(11, Level::Low), Err(PinError::Invalid(11)));
        pins.claim_output(3, Level::Low).unwrap();
        assert_eq!(pins.claim_input(3), Err(PinError::InUse(3)));
        pins.release(3);
        pins.claim_input(3).unwrap();
        assert!(pins.is_claimed(3));
    }

    #[test]
    fn test_edges_reach_callbacks_only_on_change() {
        let pins = SimulatedPins::new();
        pins.claim_input(5).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let handle = {
            let hits = Arc::clone(&hits);
            pins.register_edge_callback(
                5,
                Box::new(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap()
        };

        pins.inject_edge(5, Level::High);
        pins.inject_edge(5, Level::High);
        pins.inject_edge(5, Level::Low);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        pins.unregister_edge_callback(handle);
        pins.inject_edge(5, Level::High);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(pins.edge_callbacks(5), 0);
    }

    #[test]
    fn test_refused_registration() {
        let pins = SimulatedPins::new();
        pins.claim_input(7).unwrap();
        pins.refuse_edge_callbacks(7);
        let result = pins.register_edge_callback(7, Box::new(|| {}));
        assert!(matches!(result, Err(PinError::Interrupt { pin: 7, .. })));
    }

    #[test]
    fn test_pulse_plays_script() {
        let pins = SimulatedPins::new();
        pins.claim_output(1, Level::Low).unwrap();
        pins.claim_input(2).unwrap();
        pins.script_echo(
            1,
            EchoScript::pulse(2, Duration::from_millis(1), Duration::from_millis(2)),
        );

        pins.set_output(1, Level::High);
        pins.set_output(1, Level::Low);
        assert_eq!(pins.pulse_count(1), 1);
        assert!(pins.last_pulse_width(1).is_some());

        thread::sleep(Duration::from_millis(50));
        assert_eq!(pins.level(2), Level::Low);
        assert_eq!(pins.pulse_count(1), 1);
    }
}
