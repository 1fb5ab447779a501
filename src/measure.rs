//! Rendering of measurement results for the console.

use sonar_core::{Error, Registry, SensorKey, SensorStats};

/// Measure `key` and render the reading as `"<usecs>\n"`.
pub fn read(registry: &Registry, key: SensorKey) -> String {
    render(registry.measure(key.trigger, key.echo))
}

pub fn render(result: Result<u64, Error>) -> String {
    match result {
        Ok(usecs) => format!("{usecs}\n"),
        Err(err) => format!("error: {err}\n"),
    }
}

pub fn render_stats(key: SensorKey, stats: SensorStats) -> String {
    format!(
        "{key}: completed={} timed_out={} interrupted={} busy={} echo_signals={}\n",
        stats.completed, stats.timed_out, stats.interrupted, stats.busy, stats.echo_signals
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sonar_core::MeasureError;

    #[test]
    fn test_render() {
        assert_eq!(render(Ok(1234)), "1234\n");
        assert_eq!(
            render(Err(MeasureError::Busy.into())),
            "error: measurement already in progress\n"
        );
        assert_eq!(
            render(Err(Error::NotFound(SensorKey::new(1, 2)))),
            "error: sensor distance_1_2 not found\n"
        );
    }

    #[test]
    fn test_render_stats() {
        let stats = SensorStats {
            completed: 3,
            timed_out: 1,
            ..SensorStats::default()
        };
        assert_eq!(
            render_stats(SensorKey::new(23, 24), stats),
            "distance_23_24: completed=3 timed_out=1 interrupted=0 busy=0 echo_signals=0\n"
        );
    }
}
