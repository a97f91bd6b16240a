//! # Point-to-Point Messaging Benchmark - Main Entry Point
//!
//! Every rank runs the same binary. The transport is selected by the
//! arguments:
//!
//! - `--rank N --topology nodes.json` joins a multi-process TCP run, one
//!   process per rank, placed by the topology file;
//! - otherwise `--ranks N` runs all ranks inside this process on threads
//!   connected by channels.
//!
//! Configuration problems, transport setup failures, and buffer
//! allocation failures are fatal and abort the run with a message and a
//! non-zero exit status. Per-iteration transfer failures are not: they
//! are counted and reported in the results.

use anyhow::{Context, Result};
use clap::Parser;
use p2p_benchmark::{
    benchmark::{BenchmarkConfig, BenchmarkRunner},
    cli::Args,
    logging,
    transport::{tcp, MemoryTransport, TcpTransport},
};
use tracing::info;

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let config = BenchmarkConfig::from_args(&args)?;
    info!(
        "p2p-benchmark {}: pattern {}, {} iterations",
        p2p_benchmark::VERSION,
        config.pattern,
        config.iterations
    );

    match (args.rank, args.topology.as_deref()) {
        (Some(rank), Some(topology)) => {
            let nodes = tcp::load_topology(topology)
                .with_context(|| format!("failed to load topology {:?}", topology))?;
            let transport = TcpTransport::connect(rank, &nodes, args.socket_buffer)
                .context("transport setup failed")?;
            BenchmarkRunner::new(config, transport)?.run()
        }
        _ => run_in_process(config, args.ranks),
    }
}

/// Run all ranks inside this process, one thread per rank.
fn run_in_process(config: BenchmarkConfig, num_ranks: usize) -> Result<()> {
    let mut handles = Vec::with_capacity(num_ranks);
    for (rank, transport) in MemoryTransport::cluster(num_ranks).into_iter().enumerate() {
        let config = config.clone();
        let handle = std::thread::Builder::new()
            .name(format!("rank-{}", rank))
            .spawn(move || BenchmarkRunner::new(config, transport)?.run())
            .with_context(|| format!("failed to spawn the thread for rank {}", rank))?;
        handles.push((rank, handle));
    }

    let mut first_error = None;
    for (rank, handle) in handles {
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                first_error.get_or_insert(err.context(format!("rank {} failed", rank)));
            }
            Err(_) => {
                first_error.get_or_insert(anyhow::anyhow!("rank {} panicked", rank));
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
