//! Named interval stopwatch
//!
//! Each pipeline stage is measured as a named interval. `stop_all` closes
//! every open interval and runs on every exit path of the orchestrator, so
//! a failed run still reports the time it spent.

use std::time::{Duration, Instant};

use indexmap::IndexMap;
use serde::Serialize;

#[derive(Debug, Clone)]
struct Interval {
    started: Instant,
    duration: Option<Duration>,
}

/// One row of the duration report
#[derive(Debug, Clone, Serialize)]
pub struct TimingEntry {
    pub name: String,
    pub millis: u128,
}

/// Stopwatch over named intervals, in start order
#[derive(Debug, Default)]
pub struct Timings {
    intervals: IndexMap<String, Interval>,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) a named interval.
    pub fn start_measure(&mut self, name: &str) {
        self.intervals.insert(
            name.to_string(),
            Interval {
                started: Instant::now(),
                duration: None,
            },
        );
    }

    /// Stop a named interval; stopping twice keeps the first duration.
    pub fn stop_measure(&mut self, name: &str) {
        if let Some(interval) = self.intervals.get_mut(name) {
            if interval.duration.is_none() {
                interval.duration = Some(interval.started.elapsed());
            }
        }
    }

    /// Close every interval still running.
    pub fn stop_all(&mut self) {
        for interval in self.intervals.values_mut() {
            if interval.duration.is_none() {
                interval.duration = Some(interval.started.elapsed());
            }
        }
    }

    pub fn duration_of(&self, name: &str) -> Option<Duration> {
        self.intervals.get(name).and_then(|interval| interval.duration)
    }

    /// Report of closed intervals, in start order.
    pub fn report(&self) -> Vec<TimingEntry> {
        self.intervals
            .iter()
            .filter_map(|(name, interval)| {
                interval.duration.map(|duration| TimingEntry {
                    name: name.clone(),
                    millis: duration.as_millis(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_records_duration() {
        let mut timings = Timings::new();
        timings.start_measure("total");
        timings.stop_measure("total");
        assert!(timings.duration_of("total").is_some());
    }

    #[test]
    fn test_stop_all_closes_open_intervals() {
        let mut timings = Timings::new();
        timings.start_measure("total");
        timings.start_measure("request");
        timings.stop_measure("request");
        timings.stop_all();
        assert!(timings.duration_of("total").is_some());
        assert!(timings.duration_of("request").is_some());
    }

    #[test]
    fn test_double_stop_keeps_first_duration() {
        let mut timings = Timings::new();
        timings.start_measure("x");
        timings.stop_measure("x");
        let first = timings.duration_of("x").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        timings.stop_measure("x");
        assert_eq!(timings.duration_of("x").unwrap(), first);
    }

    #[test]
    fn test_report_preserves_start_order() {
        let mut timings = Timings::new();
        timings.start_measure("total");
        timings.start_measure("request");
        timings.stop_all();
        let report = timings.report();
        assert_eq!(report[0].name, "total");
        assert_eq!(report[1].name, "request");
    }

    #[test]
    fn test_unstopped_interval_excluded_from_report() {
        let mut timings = Timings::new();
        timings.start_measure("open");
        assert!(timings.report().is_empty());
    }
}
