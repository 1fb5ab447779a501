mod backend;
mod configure;
mod console;
mod measure;
mod settings;

use std::sync::Arc;

use anyhow::Context;
use sonar_core::Registry;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use settings::SensorSettings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("sonard starting");

    let settings = settings::load_settings().context("loading configuration")?;
    let pins = backend::open(&settings)?;
    let registry: Arc<Registry> = Arc::new(Registry::with_timing(pins, settings.timing.to_timing()));

    add_configured(&registry, &settings.sensors);

    console::run(Arc::clone(&registry)).await?;

    info!("tearing down sensors");
    tokio::task::spawn_blocking(move || registry.teardown_all())
        .await
        .context("sensor teardown")?;

    info!("sonard stopped");
    Ok(())
}

fn add_configured(registry: &Registry, sensors: &[SensorSettings]) {
    for sensor in sensors {
        if let Err(err) = registry.add(sensor.trigger, sensor.echo, sensor.timeout()) {
            warn!(
                trigger = sensor.trigger,
                echo = sensor.echo,
                %err,
                "skipping configured sensor"
            );
        }
    }
}
