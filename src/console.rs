//! Line-oriented front end on stdin/stdout.
//!
//! Commands:
//!
//! * `configure <request>`: add or remove a sensor (see [`crate::configure`])
//! * `measure <trigger> <echo>` or `measure distance_<trigger>_<echo>`
//! * `stats <trigger> <echo>`
//! * `list`
//! * `quit`
//!
//! Every command runs on a blocking worker, so measurements on different
//! sensors overlap and a slow echo never stalls the prompt.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use sonar_core::{Registry, SensorKey};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::configure::{self, ParseError, Request};
use crate::measure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Configure(Request),
    Measure(SensorKey),
    Stats(SensorKey),
    List,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}")]
    Unknown(String),
    #[error("expected a device name or a trigger/echo pair")]
    Device,
    #[error(transparent)]
    Configure(#[from] ParseError),
}

fn device(args: &str) -> Result<SensorKey, CommandError> {
    let fields: Vec<&str> = args.split_whitespace().collect();
    match fields.as_slice() {
        [name] => name.parse().map_err(|_| CommandError::Device),
        [trigger, echo] => Ok(SensorKey::new(
            trigger.parse().map_err(|_| CommandError::Device)?,
            echo.parse().map_err(|_| CommandError::Device)?,
        )),
        _ => Err(CommandError::Device),
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (verb, args) = s.split_once(char::is_whitespace).unwrap_or((s, ""));
        match verb {
            "configure" => Ok(Command::Configure(args.parse()?)),
            "measure" => Ok(Command::Measure(device(args)?)),
            "stats" => Ok(Command::Stats(device(args)?)),
            "list" => Ok(Command::List),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

/// Run one command to completion and render its reply.
pub fn execute(registry: &Registry, command: Command) -> String {
    match command {
        Command::Configure(request) => match configure::apply(registry, request) {
            Ok(()) => "ok\n".to_string(),
            Err(err) => format!("error: {err}\n"),
        },
        Command::Measure(key) => measure::read(registry, key),
        Command::Stats(key) => match registry.lookup(key.trigger, key.echo) {
            Some(sensor) => measure::render_stats(key, sensor.stats()),
            None => format!("error: sensor {key} not found\n"),
        },
        Command::List => registry
            .keys()
            .iter()
            .map(|key| format!("{key}\n"))
            .collect(),
        Command::Quit => String::new(),
    }
}

/// Serve commands until `quit`, end of input, or Ctrl-C.
///
/// On exit the registry's shutdown signal is raised so pending measurements
/// return promptly, and their replies are flushed.
pub async fn run(registry: Arc<Registry>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut workers = JoinSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    info!("end of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => {
                        let registry = Arc::clone(&registry);
                        workers.spawn_blocking(move || execute(&registry, command));
                    }
                    Err(err) => {
                        warn!(%err, line = line.trim(), "rejected command");
                        println!("error: {err}");
                    }
                }
            }
            Some(done) = workers.join_next() => match done {
                Ok(reply) => print!("{reply}"),
                Err(err) => error!(%err, "command worker failed"),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for ctrl-c")?;
                info!("interrupt received");
                break;
            }
        }
    }

    registry.shutdown_signal().raise();
    while let Some(done) = workers.join_next().await {
        match done {
            Ok(reply) => print!("{reply}"),
            Err(err) => error!(%err, "command worker failed"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::PinController;
    use sonar_core::sim::{EchoScript, SimulatedPins};
    use std::time::Duration;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            "measure 23 24".parse(),
            Ok(Command::Measure(SensorKey::new(23, 24)))
        );
        assert_eq!(
            "measure distance_23_24".parse(),
            Ok(Command::Measure(SensorKey::new(23, 24)))
        );
        assert_eq!(
            "stats 1 2".parse(),
            Ok(Command::Stats(SensorKey::new(1, 2)))
        );
        assert_eq!("list".parse(), Ok(Command::List));
        assert_eq!(" quit ".parse(), Ok(Command::Quit));
        assert_eq!(
            "configure -23 24".parse(),
            Ok(Command::Configure(Request::Remove {
                trigger: 23,
                echo: 24
            }))
        );
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(
            "ping".parse::<Command>(),
            Err(CommandError::Unknown("ping".into()))
        );
        assert_eq!("measure".parse::<Command>(), Err(CommandError::Device));
        assert_eq!("measure 1 2 3".parse::<Command>(), Err(CommandError::Device));
        assert_eq!(
            "configure 1 2".parse::<Command>(),
            Err(CommandError::Configure(ParseError::FieldCount {
                expected: 3,
                found: 2
            }))
        );
    }

    #[test]
    fn test_execute_session() {
        let sim = SimulatedPins::new();
        sim.script_echo(
            23,
            EchoScript::pulse(24, Duration::from_micros(1_000), Duration::from_micros(2_000)),
        );
        let pins: Arc<dyn PinController> = Arc::new(sim);
        let registry: Registry = Registry::new(pins);

        let run = |line: &str| execute(&registry, line.parse().unwrap());

        assert_eq!(run("configure 23 24 1000"), "ok\n");
        assert_eq!(run("configure 5 6 50"), "ok\n");
        assert_eq!(run("list"), "distance_5_6\ndistance_23_24\n");

        let reading: u64 = run("measure distance_23_24").trim().parse().unwrap();
        assert!((900..2_500).contains(&reading), "echo width {reading} µs");
        assert_eq!(run("measure 5 6"), "error: timed out waiting for echo\n");
        assert_eq!(run("measure 7 8"), "error: sensor distance_7_8 not found\n");
        assert!(run("stats 23 24").starts_with("distance_23_24: completed=1 "));

        assert_eq!(run("configure -5 6"), "ok\n");
        assert_eq!(run("configure -5 6"), "error: sensor distance_5_6 not found\n");
        assert_eq!(run("list"), "distance_23_24\n");
    }
}
