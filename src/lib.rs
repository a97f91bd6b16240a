//! # Point-to-Point Messaging Benchmark Library
//!
//! A distributed benchmark for measuring round-trip latency and throughput
//! of point-to-point message passing between producer and consumer ranks,
//! modeled on the traffic of an event-builder readout network.
//!
//! ## Communication Patterns
//!
//! - **scan**: two ranks walk message sizes `2^0 .. 2^max_power` and print
//!   a latency/throughput table
//! - **fixed-blocking** / **fixed-nonblocking**: continuous exchange of
//!   fixed-size messages, with blocking or batched non-blocking primitives
//! - **variable-blocking**: continuous exchange of pool-drawn sizes, each
//!   message preceded by a size header
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `buffer`: circular transfer buffers and wraparound fragmentation
//! - `engine`: the measured round-trip communication core
//! - `transport`: the rank-to-rank messaging abstraction (TCP, in-process)
//! - `topology`: producer/consumer unit mapping and phase pairings
//! - `benchmark`: run orchestration, warmup, scan and continuous modes
//! - `metrics` / `results`: throughput derivation and CSV reporting
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use p2p_benchmark::benchmark::{BenchmarkConfig, BenchmarkRunner};
//! use p2p_benchmark::cli::Args;
//! use p2p_benchmark::transport::MemoryTransport;
//!
//! fn main() -> anyhow::Result<()> {
//!     let args = Args::parse_from(["p2p-benchmark", "--pattern", "scan", "--max-power", "10"]);
//!     let config = BenchmarkConfig::from_args(&args)?;
//!
//!     let (a, b) = MemoryTransport::pair();
//!     let peer_config = config.clone();
//!     let peer = std::thread::spawn(move || {
//!         BenchmarkRunner::new(peer_config, b)?.run()
//!     });
//!     BenchmarkRunner::new(config, a)?.run()?;
//!     peer.join().expect("peer rank panicked")?;
//!     Ok(())
//! }
//! ```

pub mod benchmark;
pub mod buffer;
pub mod cli;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod results;
pub mod timing;
pub mod topology;
pub mod transport;

/// The current version of the benchmark, for result provenance.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Chosen to match the traffic shape the benchmark models: messages in the
/// hundred-kilobyte range streamed through ten-megabyte buffers.
pub mod defaults {
    /// Default message size in bytes for fixed-size patterns.
    pub const MESSAGE_SIZE: usize = 100_000;

    /// Default round-trip iterations per engine run.
    ///
    /// 100,000 iterations keep the per-iteration timing noise well below
    /// the effects being measured.
    pub const ITERATIONS: usize = 100_000;

    /// Default engine runs per phase of a continuous run.
    pub const MESSAGES_PER_PHASE: usize = 10;

    /// Default send buffer capacity in bytes.
    pub const SEND_BUFFER_BYTES: usize = 10_000_000;

    /// Default receive buffer capacity in bytes.
    pub const RECV_BUFFER_BYTES: usize = 10_000_000;

    /// Default warmup passes before measurement.
    pub const WARMUP_ITERATIONS: usize = 100;

    /// Default iterations per sync window of non-blocking patterns.
    pub const SYNC_ITERATIONS: usize = 100;

    /// Default largest scanned size exponent (scan reaches 4 MiB).
    pub const MAX_POWER: u32 = 22;

    /// Default scan buffer capacity, in messages of the largest size.
    pub const BUFFER_MESSAGES: usize = 10;

    /// Default smallest drawable size for variable patterns.
    pub const MIN_MESSAGE_SIZE: usize = 10_000;

    /// Default number of pre-sampled sizes in the variable-size pool.
    pub const SIZE_POOL_LEN: usize = 100;
}
