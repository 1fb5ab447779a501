//! Raspberry Pi GPIO backend for `sonar-core`.
//!
//! Pins are claimed through `rppal`. Edge callbacks run on `rppal`'s
//! asynchronous interrupt thread, which is joined when the callback is
//! unregistered.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use rppal::gpio::{self, Gpio, InputPin, OutputPin, Trigger};
use sonar_core::{EdgeCallback, EdgeHandle, Level, PinController, PinError, PinId};
use tracing::{debug, warn};

/// BCM numbering tops out at GPIO 53.
pub const MAX_PIN: PinId = 53;

fn to_rppal(level: Level) -> gpio::Level {
    match level {
        Level::Low => gpio::Level::Low,
        Level::High => gpio::Level::High,
    }
}

fn from_rppal(level: gpio::Level) -> Level {
    match level {
        gpio::Level::Low => Level::Low,
        gpio::Level::High => Level::High,
    }
}

struct InputSlot {
    pin: Mutex<InputPin>,
    /// Level reported by the most recent interrupt.
    mirror: Arc<AtomicBool>,
    /// While set, reads come from `mirror` so the interrupt thread never
    /// contends for `pin` with a caller joining it.
    armed: AtomicBool,
    edge: Mutex<Option<u64>>,
}

/// [`PinController`] over the Raspberry Pi's GPIO header.
pub struct RpiPins {
    gpio: Gpio,
    outputs: Mutex<HashMap<PinId, OutputPin>>,
    inputs: Mutex<HashMap<PinId, Arc<InputSlot>>>,
    next_id: AtomicU64,
}

impl RpiPins {
    /// Open the GPIO peripheral.
    pub fn new() -> Result<Self, gpio::Error> {
        Ok(RpiPins {
            gpio: Gpio::new()?,
            outputs: Mutex::new(HashMap::new()),
            inputs: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn is_claimed(&self, pin: PinId) -> bool {
        self.outputs.lock().contains_key(&pin) || self.inputs.lock().contains_key(&pin)
    }

    fn take(&self, pin: PinId) -> Result<gpio::Pin, PinError> {
        if !self.is_valid(pin) {
            return Err(PinError::Invalid(pin));
        }
        if self.is_claimed(pin) {
            return Err(PinError::InUse(pin));
        }
        let bcm = u8::try_from(pin).map_err(|_| PinError::Invalid(pin))?;
        self.gpio.get(bcm).map_err(|err| {
            warn!(pin, %err, "gpio request failed");
            PinError::InUse(pin)
        })
    }

    fn slot(&self, pin: PinId) -> Option<Arc<InputSlot>> {
        self.inputs.lock().get(&pin).cloned()
    }
}

impl PinController for RpiPins {
    fn is_valid(&self, pin: PinId) -> bool {
        pin <= MAX_PIN
    }

    fn claim_output(&self, pin: PinId, initial: Level) -> Result<(), PinError> {
        let mut output = self.take(pin)?.into_output();
        output.write(to_rppal(initial));
        self.outputs.lock().insert(pin, output);
        Ok(())
    }

    fn claim_input(&self, pin: PinId) -> Result<(), PinError> {
        let input = self.take(pin)?.into_input();
        let mirror = Arc::new(AtomicBool::new(input.is_high()));
        let slot = InputSlot {
            pin: Mutex::new(input),
            mirror,
            armed: AtomicBool::new(false),
            edge: Mutex::new(None),
        };
        self.inputs.lock().insert(pin, Arc::new(slot));
        Ok(())
    }

    fn release(&self, pin: PinId) {
        // Dropping the rppal pin resets it to its previous mode.
        if self.outputs.lock().remove(&pin).is_some() {
            return;
        }
        match self.inputs.lock().remove(&pin) {
            Some(slot) if slot.edge.lock().is_some() => {
                warn!(pin, "released gpio with an edge callback still attached")
            }
            Some(_) => {}
            None => warn!(pin, "release of unclaimed gpio"),
        }
    }

    fn set_output(&self, pin: PinId, level: Level) {
        match self.outputs.lock().get_mut(&pin) {
            Some(output) => output.write(to_rppal(level)),
            None => warn!(pin, %level, "write to gpio not claimed as output"),
        }
    }

    fn read_input(&self, pin: PinId) -> Level {
        let Some(slot) = self.slot(pin) else {
            warn!(pin, "read from gpio not claimed as input");
            return Level::Low;
        };
        if slot.armed.load(Ordering::Acquire) {
            return if slot.mirror.load(Ordering::Acquire) {
                Level::High
            } else {
                Level::Low
            };
        }
        from_rppal(slot.pin.lock().read())
    }

    fn register_edge_callback(
        &self,
        pin: PinId,
        callback: EdgeCallback,
    ) -> Result<EdgeHandle, PinError> {
        let slot = self.slot(pin).ok_or(PinError::NotClaimed(pin))?;
        let mut input = slot.pin.lock();

        slot.mirror.store(input.is_high(), Ordering::Release);
        slot.armed.store(true, Ordering::Release);

        let mirror = Arc::clone(&slot.mirror);
        let result = input.set_async_interrupt(Trigger::Both, move |level| {
            mirror.store(level == gpio::Level::High, Ordering::Release);
            callback();
        });
        if let Err(err) = result {
            slot.armed.store(false, Ordering::Release);
            return Err(PinError::Interrupt {
                pin,
                reason: err.to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *slot.edge.lock() = Some(id);
        debug!(pin, id, "async interrupt attached");
        Ok(EdgeHandle { pin, id })
    }

    fn unregister_edge_callback(&self, handle: EdgeHandle) {
        let Some(slot) = self.slot(handle.pin) else {
            warn!(pin = handle.pin, "edge callback on unclaimed gpio");
            return;
        };
        if *slot.edge.lock() != Some(handle.id) {
            warn!(pin = handle.pin, id = handle.id, "unknown edge callback");
            return;
        }

        if let Err(err) = slot.pin.lock().clear_async_interrupt() {
            warn!(pin = handle.pin, %err, "clearing async interrupt failed");
        }
        slot.armed.store(false, Ordering::Release);
        *slot.edge.lock() = None;
        debug!(pin = handle.pin, id = handle.id, "async interrupt detached");
    }
}
