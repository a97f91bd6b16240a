use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Point-to-Point Messaging Benchmark - round-trip latency and throughput
/// between producer and consumer ranks
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Communication pattern to benchmark
    #[clap(short = 'p', long, value_enum, default_value_t = CommPattern::FixedBlocking, help_heading = "Core Options")]
    pub pattern: CommPattern,

    /// Message size in bytes (fixed-size patterns)
    #[clap(short = 'm', long, default_value_t = crate::defaults::MESSAGE_SIZE)]
    pub message_size: usize,

    /// Number of round-trip iterations per engine run
    #[clap(short = 'i', long, default_value_t = crate::defaults::ITERATIONS)]
    pub iterations: usize,

    /// Number of engine runs per phase of a continuous run
    #[clap(long, default_value_t = crate::defaults::MESSAGES_PER_PHASE)]
    pub messages_per_phase: usize,

    /// Send buffer capacity in bytes
    #[clap(short = 'b', long, default_value_t = crate::defaults::SEND_BUFFER_BYTES)]
    pub send_buffer: usize,

    /// Receive buffer capacity in bytes
    #[clap(short = 'r', long, default_value_t = crate::defaults::RECV_BUFFER_BYTES)]
    pub recv_buffer: usize,

    /// Number of warmup passes before measurement
    #[clap(short = 'w', long, default_value_t = crate::defaults::WARMUP_ITERATIONS)]
    pub warmup_iterations: usize,

    /// Iterations per sync window of non-blocking patterns
    #[clap(long, default_value_t = crate::defaults::SYNC_ITERATIONS)]
    pub sync_iterations: usize,

    /// Largest power-of-two message size in a scan (2^0 .. 2^max-power)
    #[clap(long, default_value_t = crate::defaults::MAX_POWER, help_heading = "Scan Options")]
    pub max_power: u32,

    /// Scan buffer capacity, in messages of the largest scanned size
    #[clap(long, default_value_t = crate::defaults::BUFFER_MESSAGES, help_heading = "Scan Options")]
    pub buffer_messages: usize,

    /// Smallest drawable size for variable patterns
    #[clap(long, default_value_t = crate::defaults::MIN_MESSAGE_SIZE, help_heading = "Variable-Size Options")]
    pub min_message_size: usize,

    /// Number of pre-sampled sizes in the pool of variable patterns
    #[clap(long, default_value_t = crate::defaults::SIZE_POOL_LEN, help_heading = "Variable-Size Options")]
    pub size_pool: usize,

    /// CSV file for per-phase results
    #[clap(long, help_heading = "Output Options")]
    pub phase_log: Option<PathBuf>,

    /// CSV file for periodic throughput samples
    #[clap(long, help_heading = "Output Options")]
    pub throughput_log: Option<PathBuf>,

    /// Seconds between periodic throughput samples
    #[clap(long, value_parser = parse_secs, default_value = "60")]
    pub throughput_interval: Duration,

    /// Number of in-process ranks (single-host runs)
    #[clap(long, default_value_t = 2, help_heading = "Transport Options")]
    pub ranks: usize,

    /// This process's rank (multi-process TCP runs; requires --topology)
    #[clap(long, requires = "topology", help_heading = "Transport Options")]
    pub rank: Option<usize>,

    /// JSON topology file mapping ranks to host:port endpoints
    #[clap(long, requires = "rank", help_heading = "Transport Options")]
    pub topology: Option<PathBuf>,

    /// Socket send/receive buffer size in bytes (TCP transport)
    #[clap(long, help_heading = "Transport Options")]
    pub socket_buffer: Option<usize>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

fn parse_secs(value: &str) -> Result<Duration, String> {
    value
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("invalid interval '{}': {}", value, e))
}

/// Available communication patterns
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum CommPattern {
    /// Scan power-of-two sizes with fixed blocking exchanges
    #[clap(name = "scan")]
    Scan,

    /// Fixed-size messages, blocking primitives
    #[clap(name = "fixed-blocking")]
    FixedBlocking,

    /// Fixed-size messages, batched non-blocking primitives
    #[clap(name = "fixed-nonblocking")]
    FixedNonBlocking,

    /// Pool-drawn sizes with a size header, blocking primitives
    #[clap(name = "variable-blocking")]
    VariableBlocking,

    /// Unsupported; rejected at startup with an explanation
    #[clap(name = "variable-nonblocking")]
    VariableNonBlocking,
}

impl std::fmt::Display for CommPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommPattern::Scan => write!(f, "scan"),
            CommPattern::FixedBlocking => write!(f, "fixed-blocking"),
            CommPattern::FixedNonBlocking => write!(f, "fixed-nonblocking"),
            CommPattern::VariableBlocking => write!(f, "variable-blocking"),
            CommPattern::VariableNonBlocking => write!(f, "variable-nonblocking"),
        }
    }
}

impl CommPattern {
    pub fn is_variable(&self) -> bool {
        matches!(
            self,
            CommPattern::VariableBlocking | CommPattern::VariableNonBlocking
        )
    }

    pub fn is_nonblocking(&self) -> bool {
        matches!(
            self,
            CommPattern::FixedNonBlocking | CommPattern::VariableNonBlocking
        )
    }
}
