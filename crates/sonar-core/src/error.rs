//! Error types for the ranging core.
//!
//! Configuration errors ([`AddError`], [`RemoveError`]) are reported without
//! leaving partial state behind. Measurement errors ([`MeasureError`]) always
//! leave the sensor idle with its lock released.

use thiserror::Error;

use crate::pins::PinId;
use crate::registry::SensorKey;

/// Errors reported by a [`PinController`](crate::pins::PinController).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    /// The pin number does not exist on this controller.
    #[error("gpio {0} is not a valid pin")]
    Invalid(PinId),
    /// The pin is already claimed by another user.
    #[error("gpio {0} is already in use")]
    InUse(PinId),
    /// The pin was used without being claimed first.
    #[error("gpio {0} has not been claimed")]
    NotClaimed(PinId),
    /// The controller refused to attach an edge callback.
    #[error("edge interrupt on gpio {pin} unavailable: {reason}")]
    Interrupt {
        /// Pin the callback was requested for.
        pin: PinId,
        /// Controller-specific reason.
        reason: String,
    },
}

/// Errors from [`Registry::add`](crate::registry::Registry::add).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddError {
    /// One of the requested pins does not exist.
    #[error("invalid gpio {0}")]
    InvalidPin(PinId),
    /// One of the requested pins is held by someone else.
    #[error("gpio {0} is unavailable")]
    PinUnavailable(PinId),
    /// A sensor with the same trigger/echo pair is already registered.
    #[error("sensor {0} already exists")]
    DuplicateKey(SensorKey),
    /// The echo pin's edge callback could not be registered.
    #[error("failed to register edge interrupt on gpio {pin}: {reason}")]
    InterruptRegistrationFailed {
        /// The echo pin.
        pin: PinId,
        /// Controller-specific reason.
        reason: String,
    },
}

impl From<PinError> for AddError {
    fn from(err: PinError) -> Self {
        match err {
            PinError::Invalid(pin) => AddError::InvalidPin(pin),
            PinError::InUse(pin) | PinError::NotClaimed(pin) => AddError::PinUnavailable(pin),
            PinError::Interrupt { pin, reason } => {
                AddError::InterruptRegistrationFailed { pin, reason }
            }
        }
    }
}

/// Errors from [`Registry::remove`](crate::registry::Registry::remove).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoveError {
    /// No sensor with this trigger/echo pair is registered.
    #[error("sensor {0} not found")]
    NotFound(SensorKey),
}

/// Errors from a single measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MeasureError {
    /// Another measurement is already in progress on this sensor.
    #[error("measurement already in progress")]
    Busy,
    /// The echo did not complete within the sensor's timeout.
    #[error("timed out waiting for echo")]
    TimedOut,
    /// The wait was cancelled by the shutdown signal.
    #[error("measurement interrupted")]
    Interrupted,
}

/// A string that is not a `distance_<trigger>_<echo>` device name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid device name {0:?}")]
pub struct InvalidDeviceName(pub String);

/// Umbrella error for registry calls that combine lookup and measurement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Adding a sensor failed.
    #[error(transparent)]
    Add(#[from] AddError),
    /// Removing a sensor failed.
    #[error(transparent)]
    Remove(#[from] RemoveError),
    /// The measurement itself failed.
    #[error(transparent)]
    Measure(#[from] MeasureError),
    /// No sensor with this trigger/echo pair is registered.
    #[error("sensor {0} not found")]
    NotFound(SensorKey),
}
