#![warn(missing_docs)]
#![doc = "Interrupt-timed ultrasonic echo ranging."]
#![doc = ""]
#![doc = "This crate drives HC-SR04 style sensors: it emits a trigger pulse, timestamps the"]
#![doc = "echo pin's rising and falling edges from an edge interrupt, and reports the echo"]
#![doc = "pulse width in microseconds. Sensors live in a [`Registry`] keyed by their"]
#![doc = "trigger/echo pin pair and can be added and removed while measurements run."]
#![doc = ""]
#![doc = "To convert a reading to centimeters, multiply by 17150 and divide by 1e6."]

mod echo;
pub mod error;
pub mod pins;
pub mod registry;
pub mod sensor;
mod signal;
pub mod sim;

pub use error::{AddError, Error, InvalidDeviceName, MeasureError, PinError, RemoveError};
pub use pins::{EdgeCallback, EdgeHandle, Level, PinController, PinId};
pub use registry::{Registry, SensorKey, SensorRef};
pub use sensor::{Sensor, SensorStats, Timing};
pub use signal::ShutdownSignal;
