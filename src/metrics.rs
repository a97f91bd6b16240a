//! Derived performance figures for one engine run.

use std::time::Duration;

/// Raw counters collected by one engine run on one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatistics {
    /// Bytes credited to successful iterations only.
    pub bytes_transferred: u64,
    /// Wall-clock span of the measurement window.
    pub elapsed: Duration,
    /// Iterations that completed with a non-success status.
    pub error_count: usize,
    /// Iterations requested (and always completed).
    pub iterations: usize,
}

impl RunStatistics {
    /// The statistics of a rank that sat out a phase.
    pub fn idle() -> Self {
        Self {
            bytes_transferred: 0,
            elapsed: Duration::ZERO,
            error_count: 0,
            iterations: 0,
        }
    }

    /// Fold another run into this one; used to accumulate the phases of a
    /// continuous run for periodic reporting.
    pub fn absorb(&mut self, other: &RunStatistics) {
        self.bytes_transferred += other.bytes_transferred;
        self.elapsed += other.elapsed;
        self.error_count += other.error_count;
        self.iterations += other.iterations;
    }
}

/// Throughput and latency derived from one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputSummary {
    /// Average round-trip time per iteration, in seconds.
    pub avg_rtt_secs: f64,
    /// Average throughput in megabits per second.
    pub avg_throughput_mbit: f64,
}

/// Reduce raw counters to the two reported figures.
///
/// RTT divides the window evenly across all iterations, failed ones
/// included; throughput only credits the bytes of successful iterations.
/// A run with no iterations or an empty window reports zeros rather than
/// dividing by zero.
pub fn calculate_throughput(stats: &RunStatistics) -> ThroughputSummary {
    let elapsed_secs = stats.elapsed.as_secs_f64();
    if stats.iterations == 0 || elapsed_secs == 0.0 {
        return ThroughputSummary {
            avg_rtt_secs: 0.0,
            avg_throughput_mbit: 0.0,
        };
    }
    ThroughputSummary {
        avg_rtt_secs: elapsed_secs / stats.iterations as f64,
        avg_throughput_mbit: (stats.bytes_transferred * 8) as f64 / (elapsed_secs * 1e6),
    }
}
