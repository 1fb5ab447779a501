use std::sync::Arc;

use sonar_core::PinController;
use sonar_core::sim::SimulatedPins;
use tracing::info;

use crate::settings::{BackendKind, Settings, SimSettings};

/// Open the pin controller selected in `settings`.
pub fn open(settings: &Settings) -> anyhow::Result<Arc<dyn PinController>> {
    match settings.backend.kind {
        BackendKind::Sim => Ok(Arc::new(simulated(&settings.sim))),
        BackendKind::Rpi => open_rpi(),
    }
}

fn simulated(sim: &SimSettings) -> SimulatedPins {
    let pins = SimulatedPins::with_max_pin(sim.max_pin);
    for echo in &sim.echo {
        pins.script_echo(echo.trigger, echo.to_script());
    }
    info!(max_pin = sim.max_pin, scripted = sim.echo.len(), "using simulated gpio");
    pins
}

#[cfg(feature = "rpi")]
fn open_rpi() -> anyhow::Result<Arc<dyn PinController>> {
    use anyhow::Context;

    let pins = sonar_rpi::RpiPins::new().context("opening raspberry pi gpio")?;
    info!("using raspberry pi gpio");
    Ok(Arc::new(pins))
}

#[cfg(not(feature = "rpi"))]
fn open_rpi() -> anyhow::Result<Arc<dyn PinController>> {
    anyhow::bail!("backend \"rpi\" requires building with the `rpi` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_backend_applies_pin_range() {
        let settings = Settings {
            sim: SimSettings {
                max_pin: 10,
                echo: Vec::new(),
            },
            ..Settings::default()
        };
        let pins = open(&settings).unwrap();
        assert!(pins.is_valid(10));
        assert!(!pins.is_valid(11));
    }
}
