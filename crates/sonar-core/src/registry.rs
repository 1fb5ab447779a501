//! The set of live sensors, keyed by trigger/echo pin pair.
//!
//! Locking follows two levels: one registry-wide mutex serializing add,
//! remove and lookup, and the per-sensor measurement lock. The registry lock
//! is held while blocking on a sensor's lock only inside [`Registry::remove`],
//! which must wait for an in-flight measurement to drain. Measurements only
//! ever *try* the sensor lock while holding the registry lock and drop the
//! registry lock straight after.

use std::collections::HashMap;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use core::fmt;
use parking_lot::{Mutex, MutexGuard};
use tracing::{info, warn};

use crate::error::{AddError, Error, InvalidDeviceName, MeasureError, RemoveError};
use crate::pins::{PinController, PinId};
use crate::sensor::{Sensor, Timing};
use crate::signal::ShutdownSignal;

const DEVICE_PREFIX: &str = "distance_";

/// Unique identity of a sensor: its trigger and echo pins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorKey {
    /// Output pin emitting the ranging pulse.
    pub trigger: PinId,
    /// Input pin carrying the echo.
    pub echo: PinId,
}

impl SensorKey {
    /// Construct a key.
    pub const fn new(trigger: PinId, echo: PinId) -> Self {
        SensorKey { trigger, echo }
    }

    /// Device name of the form `distance_<trigger>_<echo>`.
    pub fn device_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for SensorKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DEVICE_PREFIX}{}_{}", self.trigger, self.echo)
    }
}

impl FromStr for SensorKey {
    type Err = InvalidDeviceName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidDeviceName(s.to_string());
        let pins = s.strip_prefix(DEVICE_PREFIX).ok_or_else(invalid)?;
        let (trigger, echo) = pins.split_once('_').ok_or_else(invalid)?;
        Ok(SensorKey {
            trigger: trigger.parse().map_err(|_| invalid())?,
            echo: echo.parse().map_err(|_| invalid())?,
        })
    }
}

type SensorMap<P> = HashMap<SensorKey, Arc<Sensor<P>>>;

/// Owner of every configured [`Sensor`].
///
/// Dropping the registry tears every sensor down.
pub struct Registry<P: PinController + ?Sized = dyn PinController> {
    pins: Arc<P>,
    timing: Timing,
    shutdown: ShutdownSignal,
    sensors: Mutex<SensorMap<P>>,
}

impl<P: PinController + ?Sized> Registry<P> {
    /// Registry using the default [`Timing`].
    pub fn new(pins: Arc<P>) -> Self {
        Self::with_timing(pins, Timing::default())
    }

    /// Registry whose sensors use `timing`.
    pub fn with_timing(pins: Arc<P>, timing: Timing) -> Self {
        Registry {
            pins,
            timing,
            shutdown: ShutdownSignal::new(),
            sensors: Mutex::new(HashMap::new()),
        }
    }

    /// The signal that interrupts every measurement of this registry.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Timing applied to newly added sensors.
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Configure a sensor on `trigger`/`echo` with an echo `timeout`.
    ///
    /// # Errors
    ///
    /// * [`AddError::DuplicateKey`] if the pair is already registered.
    /// * [`AddError::InvalidPin`], [`AddError::PinUnavailable`] or
    ///   [`AddError::InterruptRegistrationFailed`] from pin setup, after any
    ///   partial setup has been undone.
    pub fn add(&self, trigger: PinId, echo: PinId, timeout: Duration) -> Result<(), AddError> {
        let key = SensorKey::new(trigger, echo);
        let mut sensors = self.sensors.lock();
        if sensors.contains_key(&key) {
            return Err(AddError::DuplicateKey(key));
        }

        let sensor = Sensor::attach(
            Arc::clone(&self.pins),
            key,
            timeout,
            self.timing,
            self.shutdown.clone(),
        )?;
        sensors.insert(key, Arc::new(sensor));
        info!(trigger, echo, ?timeout, "added device");
        Ok(())
    }

    /// Tear down the sensor on `trigger`/`echo`.
    ///
    /// Blocks until a measurement in flight on that sensor has finished. The
    /// registry lock is held throughout so the key cannot be reused before
    /// the pins are released.
    ///
    /// # Errors
    ///
    /// [`RemoveError::NotFound`] if no such sensor exists.
    pub fn remove(&self, trigger: PinId, echo: PinId) -> Result<(), RemoveError> {
        let key = SensorKey::new(trigger, echo);
        let mut sensors = self.sensors.lock();
        Self::remove_locked(&mut sensors, key)?;
        info!(trigger, echo, "removed device");
        Ok(())
    }

    fn remove_locked(sensors: &mut SensorMap<P>, key: SensorKey) -> Result<(), RemoveError> {
        let sensor = sensors
            .get(&key)
            .cloned()
            .ok_or(RemoveError::NotFound(key))?;

        let drained = sensor.drain();
        sensor.detach(&drained);
        sensors.remove(&key);
        drop(drained);
        Ok(())
    }

    /// Look a sensor up, keeping the registry locked while the reference lives.
    ///
    /// Add and remove on any sensor block until the returned [`SensorRef`] is
    /// dropped or consumed by [`SensorRef::measure`].
    pub fn lookup(&self, trigger: PinId, echo: PinId) -> Option<SensorRef<'_, P>> {
        let sensors = self.sensors.lock();
        let sensor = sensors.get(&SensorKey::new(trigger, echo)).cloned()?;
        Some(SensorRef {
            _sensors: sensors,
            sensor,
        })
    }

    /// Look up and measure in one step.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] if no such sensor exists, otherwise the
    /// [`MeasureError`] of the measurement.
    pub fn measure(&self, trigger: PinId, echo: PinId) -> Result<u64, Error> {
        let sensor = self
            .lookup(trigger, echo)
            .ok_or(Error::NotFound(SensorKey::new(trigger, echo)))?;
        Ok(sensor.measure()?)
    }

    /// Keys of every registered sensor, sorted.
    pub fn keys(&self) -> Vec<SensorKey> {
        let mut keys: Vec<_> = self.sensors.lock().keys().copied().collect();
        keys.sort_unstable();
        keys
    }

    /// Number of registered sensors.
    pub fn len(&self) -> usize {
        self.sensors.lock().len()
    }

    /// Whether no sensor is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every sensor, logging and skipping individual failures.
    pub fn teardown_all(&self) {
        let mut sensors = self.sensors.lock();
        let keys: Vec<_> = sensors.keys().copied().collect();
        for key in keys {
            match Self::remove_locked(&mut sensors, key) {
                Ok(()) => info!(trigger = key.trigger, echo = key.echo, "removed device"),
                Err(err) => warn!(%err, "ignoring failed removal during teardown"),
            }
        }
    }
}

impl<P: PinController + ?Sized> Drop for Registry<P> {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

/// A sensor reference that holds the registry lock.
pub struct SensorRef<'a, P: PinController + ?Sized> {
    _sensors: MutexGuard<'a, SensorMap<P>>,
    sensor: Arc<Sensor<P>>,
}

impl<P: PinController + ?Sized> SensorRef<'_, P> {
    /// Measure, releasing the registry lock as soon as the sensor's own
    /// measurement lock has been tried.
    ///
    /// # Errors
    ///
    /// See [`Sensor::measure`].
    pub fn measure(self) -> Result<u64, MeasureError> {
        let SensorRef { _sensors, sensor } = self;
        sensor.measure_releasing(_sensors)
    }
}

impl<P: PinController + ?Sized> Deref for SensorRef<'_, P> {
    type Target = Sensor<P>;

    fn deref(&self) -> &Self::Target {
        &self.sensor
    }
}
