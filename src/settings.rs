use std::time::Duration;

use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use sonar_core::Timing;
use sonar_core::sim::{DEFAULT_MAX_PIN, EchoScript};
use tracing::{error, info};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
const CONFIG_PATH_ENV: &str = "SONAR_CONFIG";
const ENV_PREFIX: &str = "SONAR";

/// Which pin controller drives the sensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sim,
    Rpi,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub kind: BackendKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    pub settle_ms: u64,
    pub pulse_width_us: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        let timing = Timing::default();
        TimingSettings {
            settle_ms: timing.settle.as_millis() as u64,
            pulse_width_us: timing.pulse_width.as_micros() as u64,
        }
    }
}

impl TimingSettings {
    pub fn to_timing(&self) -> Timing {
        Timing {
            settle: Duration::from_millis(self.settle_ms),
            pulse_width: Duration::from_micros(self.pulse_width_us),
        }
    }
}

/// A scripted echo for the simulated backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EchoSettings {
    pub trigger: u32,
    pub echo: u32,
    pub rise_after_us: u64,
    pub fall_after_us: u64,
}

impl EchoSettings {
    pub fn to_script(&self) -> EchoScript {
        EchoScript::pulse(
            self.echo,
            Duration::from_micros(self.rise_after_us),
            Duration::from_micros(self.fall_after_us),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SimSettings {
    pub max_pin: u32,
    pub echo: Vec<EchoSettings>,
}

impl Default for SimSettings {
    fn default() -> Self {
        SimSettings {
            max_pin: DEFAULT_MAX_PIN,
            echo: Vec::new(),
        }
    }
}

/// A sensor added at startup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SensorSettings {
    pub trigger: u32,
    pub echo: u32,
    pub timeout_ms: u64,
}

impl SensorSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub timing: TimingSettings,
    pub sim: SimSettings,
    pub sensors: Vec<SensorSettings>,
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<Settings, ConfigError> {
    builder
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()
}

/// Load `config/default.toml`, the file named by `SONAR_CONFIG`, then
/// `SONAR__*` environment overrides.
pub fn load_settings() -> Result<Settings, ConfigError> {
    info!("Attempting to load configuration from {}", DEFAULT_CONFIG_PATH);

    let mut builder = Config::builder()
        .add_source(File::new(DEFAULT_CONFIG_PATH, FileFormat::Toml).required(false));
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        info!("Layering configuration from {}", path);
        builder = builder.add_source(File::new(&path, FileFormat::Toml).required(true));
    }

    match finish(builder) {
        Ok(settings) => {
            info!("Successfully loaded configuration: {:?}", settings);
            Ok(settings)
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
fn parse_settings(toml: &str) -> Result<Settings, ConfigError> {
    Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()?
        .try_deserialize()
}
