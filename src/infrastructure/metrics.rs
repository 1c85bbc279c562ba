//! Compile counters and phase timings for a session

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Events counted over the life of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Counter {
    Parses,
    DumpHits,
    DumpWrites,
    Recompiles,
    CacheSkips,
    ChildProcesses,
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Counter::Parses => "parses",
            Counter::DumpHits => "dump_hits",
            Counter::DumpWrites => "dump_writes",
            Counter::Recompiles => "recompiles",
            Counter::CacheSkips => "cache_skips",
            Counter::ChildProcesses => "child_processes",
        };
        write!(f, "{}", name)
    }
}

/// Timed phases of the compile pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Parse,
    LoadDump,
    Resolve,
    Check,
    Persist,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Parse => "parse",
            Phase::LoadDump => "load_dump",
            Phase::Resolve => "resolve",
            Phase::Check => "check",
            Phase::Persist => "persist",
        };
        write!(f, "{}", name)
    }
}

/// Metrics collector shared by a session and its environment
///
/// Children run in forked processes, so whatever they count stays in the
/// child's copy.
pub struct SessionMetrics {
    timings: RwLock<BTreeMap<Phase, Vec<Duration>>>,
    counters: RwLock<BTreeMap<Counter, u64>>,
    start_time: Instant,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self {
            timings: RwLock::new(BTreeMap::new()),
            counters: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_timing(&self, phase: Phase, duration: Duration) {
        self.timings.write().entry(phase).or_default().push(duration);
    }

    pub fn increment(&self, counter: Counter) {
        *self.counters.write().entry(counter).or_default() += 1;
    }

    pub fn get_counter(&self, counter: Counter) -> u64 {
        self.counters.read().get(&counter).copied().unwrap_or(0)
    }

    pub fn get_timing_stats(&self, phase: Phase) -> Option<TimingStats> {
        self.timings
            .read()
            .get(&phase)
            .map(|durations| TimingStats::from_durations(durations))
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn reset(&self) {
        self.timings.write().clear();
        self.counters.write().clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        let timings = self
            .timings
            .read()
            .iter()
            .map(|(phase, durations)| (*phase, TimingStats::from_durations(durations)))
            .collect();

        MetricsSummary {
            uptime: self.uptime(),
            timings,
            counters: self.counters.read().clone(),
        }
    }

    /// Start timing a phase; recorded when the timer drops
    pub fn time(&self, phase: Phase) -> Timer<'_> {
        Timer { metrics: self, phase, start: Instant::now() }
    }
}

impl Default for SessionMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct TimingStats {
    pub count: usize,
    pub total: Duration,
    pub mean: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl TimingStats {
    fn from_durations(durations: &[Duration]) -> Self {
        let count = durations.len();
        let total: Duration = durations.iter().sum();
        Self {
            count,
            total,
            mean: if count == 0 { Duration::ZERO } else { total / count as u32 },
            min: durations.iter().min().copied().unwrap_or(Duration::ZERO),
            max: durations.iter().max().copied().unwrap_or(Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub uptime: Duration,
    pub timings: BTreeMap<Phase, TimingStats>,
    pub counters: BTreeMap<Counter, u64>,
}

impl MetricsSummary {
    /// Format as human-readable report
    pub fn report(&self) -> String {
        let mut lines = vec![format!("uptime: {:.2?}", self.uptime)];

        for (phase, stats) in &self.timings {
            lines.push(format!(
                "{}: {} run{}, total {:.2?}, mean {:.2?}, max {:.2?}",
                phase,
                stats.count,
                if stats.count == 1 { "" } else { "s" },
                stats.total,
                stats.mean,
                stats.max
            ));
        }
        for (counter, value) in &self.counters {
            lines.push(format!("{}: {}", counter, value));
        }

        lines.join("\n")
    }
}

/// RAII timer for a pipeline phase
pub struct Timer<'a> {
    metrics: &'a SessionMetrics,
    phase: Phase,
    start: Instant,
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.metrics.record_timing(self.phase, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timing() {
        let metrics = SessionMetrics::new();

        metrics.record_timing(Phase::Parse, Duration::from_millis(100));
        metrics.record_timing(Phase::Parse, Duration::from_millis(200));
        metrics.record_timing(Phase::Parse, Duration::from_millis(150));

        let stats = metrics.get_timing_stats(Phase::Parse).unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, Duration::from_millis(100));
        assert_eq!(stats.max, Duration::from_millis(200));
        assert_eq!(stats.mean, Duration::from_millis(150));
    }

    #[test]
    fn test_counter() {
        let metrics = SessionMetrics::new();

        metrics.increment(Counter::Parses);
        metrics.increment(Counter::Parses);
        metrics.increment(Counter::DumpHits);

        assert_eq!(metrics.get_counter(Counter::Parses), 2);
        assert_eq!(metrics.get_counter(Counter::DumpHits), 1);
        assert_eq!(metrics.get_counter(Counter::DumpWrites), 0);
    }

    #[test]
    fn test_timer() {
        let metrics = SessionMetrics::new();

        {
            let _timer = metrics.time(Phase::Check);
            thread::sleep(Duration::from_millis(10));
        }

        let stats = metrics.get_timing_stats(Phase::Check).unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.total >= Duration::from_millis(10));
    }

    #[test]
    fn test_summary() {
        let metrics = SessionMetrics::new();

        metrics.record_timing(Phase::Parse, Duration::from_millis(50));
        metrics.increment(Counter::Recompiles);

        let report = metrics.summary().report();
        assert!(report.contains("parse: 1 run"));
        assert!(report.contains("recompiles: 1"));
    }
}
