//! Textual add/remove requests.
//!
//! `"23 24 1000"` or `"+23 24 1000"` adds a sensor with trigger 23, echo 24
//! and a 1000 ms timeout; `"-23 24"` removes it.

use std::str::FromStr;
use std::time::Duration;

use sonar_core::{Error, PinId, Registry};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Add {
        trigger: PinId,
        echo: PinId,
        timeout: Duration,
    },
    Remove {
        trigger: PinId,
        echo: PinId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty request")]
    Empty,
    #[error("expected {expected} fields, got {found}")]
    FieldCount { expected: usize, found: usize },
    #[error("invalid number {0:?}")]
    Number(String),
}

fn number<T: FromStr>(field: &str) -> Result<T, ParseError> {
    field.parse().map_err(|_| ParseError::Number(field.to_string()))
}

impl FromStr for Request {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (add, body) = match s.chars().next() {
            None => return Err(ParseError::Empty),
            Some('-') => (false, &s[1..]),
            Some('+') => (true, &s[1..]),
            Some(_) => (true, s),
        };

        let fields: Vec<&str> = body.split_whitespace().collect();
        let expected = if add { 3 } else { 2 };
        if fields.len() != expected {
            return Err(ParseError::FieldCount {
                expected,
                found: fields.len(),
            });
        }

        let trigger = number(fields[0])?;
        let echo = number(fields[1])?;
        if add {
            let timeout_ms: u64 = number(fields[2])?;
            Ok(Request::Add {
                trigger,
                echo,
                timeout: Duration::from_millis(timeout_ms),
            })
        } else {
            Ok(Request::Remove { trigger, echo })
        }
    }
}

pub fn apply(registry: &Registry, request: Request) -> Result<(), Error> {
    match request {
        Request::Add {
            trigger,
            echo,
            timeout,
        } => registry.add(trigger, echo, timeout)?,
        Request::Remove { trigger, echo } => registry.remove(trigger, echo)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::sim::SimulatedPins;
    use sonar_core::{AddError, PinController, RemoveError, SensorKey};
    use std::sync::Arc;

    #[test]
    fn test_parse_add() {
        let add = Request::Add {
            trigger: 23,
            echo: 24,
            timeout: Duration::from_millis(1000),
        };
        assert_eq!("23 24 1000".parse(), Ok(add));
        assert_eq!("+23 24 1000\n".parse(), Ok(add));
    }

    #[test]
    fn test_parse_remove() {
        assert_eq!(
            "-23 24".parse(),
            Ok(Request::Remove {
                trigger: 23,
                echo: 24
            })
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Request>(), Err(ParseError::Empty));
        assert_eq!(
            "23 24".parse::<Request>(),
            Err(ParseError::FieldCount {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            "-23 24 1000".parse::<Request>(),
            Err(ParseError::FieldCount {
                expected: 2,
                found: 3
            })
        );
        assert_eq!(
            "23 x 1000".parse::<Request>(),
            Err(ParseError::Number("x".into()))
        );
        assert_eq!(
            "23 24 -5".parse::<Request>(),
            Err(ParseError::Number("-5".into()))
        );
    }

    #[test]
    fn test_apply_adds_and_removes() {
        let pins: Arc<dyn PinController> = Arc::new(SimulatedPins::new());
        let registry: Registry = Registry::new(pins);
        apply(&registry, "23 24 1000".parse().unwrap()).unwrap();
        assert_eq!(registry.keys(), vec![SensorKey::new(23, 24)]);

        assert_eq!(
            apply(&registry, "23 24 500".parse().unwrap()),
            Err(Error::Add(AddError::DuplicateKey(SensorKey::new(23, 24))))
        );

        apply(&registry, "-23 24".parse().unwrap()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(
            apply(&registry, "-23 24".parse().unwrap()),
            Err(Error::Remove(RemoveError::NotFound(SensorKey::new(23, 24))))
        );
    }
}
