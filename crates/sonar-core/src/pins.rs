//! The pin abstraction the ranging core drives.
//!
//! A [`PinController`] hands out exclusive claims on numbered pins, drives and
//! samples their levels, and delivers edge interrupts on input pins through
//! registered callbacks.

use core::fmt;

use crate::error::PinError;

/// Controller-specific pin number.
pub type PinId = u32;

/// Logic level of a digital pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Level {
    /// Logic low.
    #[default]
    Low,
    /// Logic high.
    High,
}

impl Level {
    /// Returns `true` for [`Level::High`].
    pub const fn is_high(self) -> bool {
        matches!(self, Level::High)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => write!(f, "low"),
            Level::High => write!(f, "high"),
        }
    }
}

/// Callback invoked on every edge (rising and falling) of an input pin.
///
/// Runs in the controller's interrupt context: it must not block or sleep.
pub type EdgeCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Identifies one edge callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeHandle {
    /// Pin the callback is attached to.
    pub pin: PinId,
    /// Controller-assigned registration id.
    pub id: u64,
}

/// Capability set the ranging core needs from the platform's GPIO layer.
///
/// Implementations must uphold two guarantees for edge callbacks:
///
/// * callbacks registered on one pin are never run concurrently with each
///   other, so a rising edge's handler has returned before the falling edge's
///   handler starts;
/// * [`unregister_edge_callback`](PinController::unregister_edge_callback)
///   does not return while the callback is still executing, and the callback
///   is never invoked afterwards.
pub trait PinController: Send + Sync + 'static {
    /// Whether `pin` names a pin that exists on this controller.
    fn is_valid(&self, pin: PinId) -> bool;

    /// Claim `pin` exclusively and configure it as an output at `initial`.
    fn claim_output(&self, pin: PinId, initial: Level) -> Result<(), PinError>;

    /// Claim `pin` exclusively and configure it as an input.
    fn claim_input(&self, pin: PinId) -> Result<(), PinError>;

    /// Give up a claim made with `claim_output` or `claim_input`.
    fn release(&self, pin: PinId);

    /// Drive a claimed output pin.
    fn set_output(&self, pin: PinId, level: Level);

    /// Sample a claimed input pin.
    fn read_input(&self, pin: PinId) -> Level;

    /// Attach `callback` to both edges of the input `pin`.
    fn register_edge_callback(
        &self,
        pin: PinId,
        callback: EdgeCallback,
    ) -> Result<EdgeHandle, PinError>;

    /// Detach a callback, waiting for any invocation in progress to return.
    fn unregister_edge_callback(&self, handle: EdgeHandle);
}
