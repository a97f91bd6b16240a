//! Benchmark orchestration: configuration, warmup, and the two run modes.
//!
//! A run is either a **scan** (exactly two ranks walk message sizes
//! `2^0 .. 2^max_power` and print a latency/throughput table) or a
//! **continuous** run (an even number of ranks rotates producer/consumer
//! pairings phase by phase, with per-phase CSV records on the consumer
//! side and periodic throughput samples).
//!
//! Every rank executes the same driver; phases are fenced with transport
//! barriers so cursor state and pairings stay aligned across ranks.

use crate::cli::{Args, CommPattern};
use crate::engine::{Channel, CommEngine, CommMode, Role, SizePool};
use crate::metrics::{calculate_throughput, RunStatistics};
use crate::results::{PhaseRecord, ResultsWriter};
use crate::topology::Topology;
use crate::transport::Transport;
use anyhow::{bail, ensure, Context, Result};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Validated run configuration, shared by every rank.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub pattern: CommPattern,
    pub message_size: usize,
    pub iterations: usize,
    pub messages_per_phase: usize,
    pub send_buffer: usize,
    pub recv_buffer: usize,
    pub warmup_iterations: usize,
    pub sync_iterations: usize,
    pub max_power: u32,
    pub min_message_size: usize,
    pub size_pool_len: usize,
    pub phase_log: Option<PathBuf>,
    pub throughput_log: Option<PathBuf>,
    pub throughput_interval: Duration,
}

impl BenchmarkConfig {
    /// Validate command-line arguments into a runnable configuration.
    ///
    /// Configuration problems are fatal: they abort the whole run with a
    /// message rather than producing misleading numbers.
    pub fn from_args(args: &Args) -> Result<Self> {
        if args.pattern == CommPattern::VariableNonBlocking {
            bail!(
                "the variable-nonblocking pattern is not supported: \
                 batched completion cannot be reconciled with per-iteration size headers"
            );
        }
        ensure!(args.iterations >= 1, "iterations must be at least 1");
        ensure!(
            args.messages_per_phase >= 1,
            "messages-per-phase must be at least 1"
        );
        ensure!(
            args.sync_iterations >= 1,
            "sync-iterations must be at least 1"
        );
        ensure!(
            args.max_power <= 30,
            "max-power {} is out of range (scanned sizes reach 2^max-power bytes)",
            args.max_power
        );
        ensure!(args.buffer_messages >= 1, "buffer-messages must be at least 1");

        let (send_buffer, recv_buffer) = if args.pattern == CommPattern::Scan {
            // The scan sizes its own buffers so the largest scanned message
            // always fits a whole number of times.
            let capacity = args.buffer_messages << args.max_power;
            (capacity, capacity)
        } else {
            (args.send_buffer, args.recv_buffer)
        };
        let capacity = send_buffer.min(recv_buffer);

        if args.pattern.is_variable() {
            ensure!(
                args.min_message_size >= 1,
                "min-message-size must be at least 1"
            );
            ensure!(
                args.min_message_size <= capacity,
                "min-message-size {} exceeds buffer capacity {}",
                args.min_message_size,
                capacity
            );
            ensure!(args.size_pool >= 1, "size-pool must hold at least one entry");
        } else {
            ensure!(args.message_size >= 1, "message size must be at least 1");
            ensure!(
                args.message_size <= capacity,
                "message size {} exceeds buffer capacity {}",
                args.message_size,
                capacity
            );
        }

        Ok(Self {
            pattern: args.pattern,
            message_size: args.message_size,
            iterations: args.iterations,
            messages_per_phase: args.messages_per_phase,
            send_buffer,
            recv_buffer,
            warmup_iterations: args.warmup_iterations,
            sync_iterations: args.sync_iterations,
            max_power: args.max_power,
            min_message_size: args.min_message_size,
            size_pool_len: args.size_pool,
            phase_log: args.phase_log.clone(),
            throughput_log: args.throughput_log.clone(),
            throughput_interval: args.throughput_interval,
        })
    }

    fn mode(&self) -> CommMode {
        if self.pattern.is_nonblocking() {
            CommMode::NonBlocking {
                sync_iterations: self.sync_iterations,
            }
        } else {
            CommMode::Blocking
        }
    }

    fn size_label(&self) -> String {
        if self.pattern.is_variable() {
            "VARIABLE".to_string()
        } else {
            self.message_size.to_string()
        }
    }
}

/// Drives one rank through a complete benchmark run.
pub struct BenchmarkRunner<T: Transport> {
    config: BenchmarkConfig,
    engine: CommEngine<T>,
    results: ResultsWriter,
}

impl<T: Transport> BenchmarkRunner<T> {
    pub fn new(config: BenchmarkConfig, transport: T) -> Result<Self> {
        let results = ResultsWriter::new(config.phase_log.as_deref(), config.throughput_log.as_deref());
        let engine = CommEngine::new(transport, config.send_buffer, config.recv_buffer)
            .context("benchmark setup failed")?;
        Ok(Self {
            config,
            engine,
            results,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        match self.config.pattern {
            CommPattern::Scan => self.run_scan(),
            _ => self.run_continuous(),
        }
    }

    /// Warm the channel: a throughput probe, the overlapping access
    /// pattern, then a second probe to show the effect.
    fn warmup(&mut self, channel: Channel) -> Result<()> {
        if self.config.warmup_iterations == 0 || channel.role == Role::Idle {
            return Ok(());
        }
        let probe_size = (self.config.send_buffer.min(self.config.recv_buffer) / 10).max(1);

        let before = self.probe(channel, probe_size)?;
        for _ in 0..self.config.warmup_iterations {
            self.engine.warmup_pattern(channel)?;
        }
        let after = self.probe(channel, probe_size)?;

        if channel.role == Role::Producer {
            debug!(
                "warmup probe: {:.3} Mbit/s before, {:.3} Mbit/s after",
                before, after
            );
        }
        Ok(())
    }

    fn probe(&mut self, channel: Channel, probe_size: usize) -> Result<f64> {
        let stats = self.engine.run_fixed(
            channel,
            probe_size,
            self.config.warmup_iterations,
            CommMode::Blocking,
        )?;
        self.engine.rewind();
        Ok(calculate_throughput(&stats).avg_throughput_mbit)
    }

    /// Two ranks, power-of-two sizes, one table row per size.
    fn run_scan(&mut self) -> Result<()> {
        ensure!(
            self.engine.transport().num_ranks() == 2,
            "a scan run needs exactly 2 ranks, got {}",
            self.engine.transport().num_ranks()
        );
        let rank = self.engine.transport().self_rank();
        let channel = if rank == 0 {
            Channel {
                role: Role::Producer,
                peer: 1,
            }
        } else {
            Channel {
                role: Role::Consumer,
                peer: 0,
            }
        };

        self.warmup(channel)?;

        if rank == 0 {
            info!(
                "{:>12}  {:>16}  {:>16}",
                "bytes", "avg rtt [s]", "throughput [Mbit/s]"
            );
        }

        let mut failed_iterations = 0usize;
        for power in 0..=self.config.max_power {
            let message_size = 1usize << power;
            self.engine.transport().barrier()?;
            self.engine.rewind();

            let stats = self.engine.run_fixed(
                channel,
                message_size,
                self.config.iterations,
                CommMode::Blocking,
            )?;
            failed_iterations += stats.error_count;

            if rank == 0 {
                let summary = calculate_throughput(&stats);
                info!(
                    "{:>12}  {:>16.9}  {:>16.3}",
                    message_size, summary.avg_rtt_secs, summary.avg_throughput_mbit
                );
            }
        }

        if rank == 0 {
            info!("Number of non-success statuses: {}", failed_iterations);
        }
        Ok(())
    }

    /// Rotating producer/consumer pairings, one phase per pairing.
    fn run_continuous(&mut self) -> Result<()> {
        let topology = Topology::new(self.engine.transport().num_ranks())?;
        let rank = self.engine.transport().self_rank();
        let mode = self.config.mode();
        let pattern = self.config.pattern.to_string();
        let size_label = self.config.size_label();

        let pool = if self.config.pattern.is_variable() {
            let largest = self.config.send_buffer.min(self.config.recv_buffer);
            Some(SizePool::generate(
                self.config.min_message_size,
                largest,
                self.config.size_pool_len,
            )?)
        } else {
            None
        };

        self.warmup(Channel {
            role: topology.role_of(rank),
            peer: topology.assignment(rank, 0)?.peer,
        })?;

        let mut interval_stats = RunStatistics::idle();
        let mut last_sample = Instant::now();

        for phase in 0..topology.num_phases() {
            self.engine.transport().barrier()?;
            let assignment = topology.assignment(rank, phase)?;
            let channel = Channel {
                role: assignment.role,
                peer: assignment.peer,
            };
            self.engine.rewind();
            debug!(
                "phase {}: pairing {} -> {} (peer rank {})",
                phase, assignment.producer_id, assignment.consumer_id, assignment.peer
            );

            let mut phase_stats = RunStatistics::idle();
            for _ in 0..self.config.messages_per_phase {
                let stats = match &pool {
                    Some(pool) => self.engine.run_variable(
                        channel,
                        pool,
                        self.config.iterations,
                        mode,
                    )?,
                    None => self.engine.run_fixed(
                        channel,
                        self.config.message_size,
                        self.config.iterations,
                        mode,
                    )?,
                };
                phase_stats.absorb(&stats);
                interval_stats.absorb(&stats);

                if channel.role == Role::Consumer
                    && last_sample.elapsed() >= self.config.throughput_interval
                {
                    let summary = calculate_throughput(&interval_stats);
                    self.results.record_throughput(
                        &pattern,
                        &size_label,
                        summary.avg_throughput_mbit,
                    )?;
                    interval_stats = RunStatistics::idle();
                    last_sample = Instant::now();
                }
            }

            if channel.role == Role::Consumer {
                self.results.record_phase(&PhaseRecord {
                    pattern: pattern.clone(),
                    message_size: size_label.clone(),
                    phase,
                    producer_id: assignment.producer_id,
                    consumer_id: assignment.consumer_id,
                    summary: calculate_throughput(&phase_stats),
                    error_count: phase_stats.error_count,
                })?;
            }
        }

        self.engine.transport().barrier()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args_from(argv: &[&str]) -> Args {
        Args::parse_from(std::iter::once("p2p-benchmark").chain(argv.iter().copied()))
    }

    #[test]
    fn variable_nonblocking_is_rejected_at_startup() {
        let args = args_from(&["--pattern", "variable-nonblocking"]);
        let err = BenchmarkConfig::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn scan_buffers_fit_the_largest_size() {
        let args = args_from(&["--pattern", "scan", "--max-power", "10", "--buffer-messages", "4"]);
        let config = BenchmarkConfig::from_args(&args).unwrap();
        assert_eq!(config.send_buffer, 4 << 10);
        assert_eq!(config.recv_buffer, 4 << 10);
    }

    #[test]
    fn oversized_fixed_message_is_rejected() {
        let args = args_from(&["-m", "200", "-b", "100", "-r", "100"]);
        let err = BenchmarkConfig::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("exceeds buffer capacity"));
    }

    #[test]
    fn variable_bounds_are_checked() {
        let args = args_from(&[
            "--pattern",
            "variable-blocking",
            "--min-message-size",
            "2000000000",
        ]);
        assert!(BenchmarkConfig::from_args(&args).is_err());

        let args = args_from(&["--pattern", "variable-blocking", "--size-pool", "0"]);
        assert!(BenchmarkConfig::from_args(&args).is_err());
    }

    #[test]
    fn mode_follows_pattern() {
        let args = args_from(&["--pattern", "fixed-nonblocking", "--sync-iterations", "7"]);
        let config = BenchmarkConfig::from_args(&args).unwrap();
        assert_eq!(
            config.mode(),
            CommMode::NonBlocking { sync_iterations: 7 }
        );
        assert_eq!(config.size_label(), config.message_size.to_string());

        let args = args_from(&["--pattern", "variable-blocking"]);
        let config = BenchmarkConfig::from_args(&args).unwrap();
        assert_eq!(config.mode(), CommMode::Blocking);
        assert_eq!(config.size_label(), "VARIABLE");
    }
}
