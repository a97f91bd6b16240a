use anyhow::Result;
use clap::Parser;
use p2p_benchmark::benchmark::{BenchmarkConfig, BenchmarkRunner};
use p2p_benchmark::cli::Args;
use p2p_benchmark::transport::tcp::{self, NodeAddr};
use p2p_benchmark::transport::TcpTransport;
use std::net::TcpListener;
use std::thread;

fn parse_args(argv: &[&str]) -> Args {
    Args::parse_from(std::iter::once("p2p-benchmark").chain(argv.iter().copied()))
}

/// Reserve a distinct loopback port per rank.
fn loopback_topology(num_ranks: usize) -> Vec<NodeAddr> {
    (0..num_ranks)
        .map(|rank| {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
            let port = listener.local_addr().expect("local addr").port();
            drop(listener);
            NodeAddr {
                rank,
                host: "127.0.0.1".to_string(),
                port,
            }
        })
        .collect()
}

fn run_tcp_cluster(config: &BenchmarkConfig, num_ranks: usize) -> Result<()> {
    let nodes = loopback_topology(num_ranks);
    let handles: Vec<_> = (0..num_ranks)
        .map(|rank| {
            let config = config.clone();
            let nodes = nodes.clone();
            thread::spawn(move || -> Result<()> {
                let transport = TcpTransport::connect(rank, &nodes, None)?;
                BenchmarkRunner::new(config, transport)?.run()
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("rank thread panicked")?;
    }
    Ok(())
}

#[test]
fn fixed_blocking_over_loopback() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let phase_log = dir.path().join("phases.csv");

    let args = parse_args(&[
        "--pattern",
        "fixed-blocking",
        "-m",
        "700",
        "-i",
        "15",
        "--messages-per-phase",
        "2",
        "-b",
        "1000",
        "-r",
        "1000",
        "-w",
        "1",
        "--phase-log",
        phase_log.to_str().unwrap(),
    ]);
    let config = BenchmarkConfig::from_args(&args)?;
    run_tcp_cluster(&config, 2)?;

    // message 700 in a 1000-byte buffer exercises the wraparound split on
    // a real stream every other iteration.
    let contents = std::fs::read_to_string(&phase_log)?;
    let row = contents.lines().nth(1).expect("one phase row");
    assert!(row.contains(",fixed-blocking,700,0,0,A,"));
    assert!(row.ends_with(",0"));
    Ok(())
}

#[test]
fn fixed_nonblocking_over_loopback() -> Result<()> {
    let args = parse_args(&[
        "--pattern",
        "fixed-nonblocking",
        "-m",
        "256",
        "-i",
        "12",
        "--messages-per-phase",
        "1",
        "--sync-iterations",
        "3",
        "-b",
        "1024",
        "-r",
        "1024",
        "-w",
        "0",
    ]);
    let config = BenchmarkConfig::from_args(&args)?;
    run_tcp_cluster(&config, 2)
}

#[test]
fn variable_blocking_over_loopback() -> Result<()> {
    let args = parse_args(&[
        "--pattern",
        "variable-blocking",
        "-i",
        "20",
        "--messages-per-phase",
        "1",
        "-b",
        "4096",
        "-r",
        "4096",
        "--min-message-size",
        "32",
        "--size-pool",
        "8",
        "-w",
        "0",
    ]);
    let config = BenchmarkConfig::from_args(&args)?;
    run_tcp_cluster(&config, 2)
}

#[test]
fn topology_file_round_trip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("nodes.json");
    let nodes = loopback_topology(4);
    std::fs::write(&path, serde_json::to_string_pretty(&nodes)?)?;

    let loaded = tcp::load_topology(&path)?;
    assert_eq!(loaded.len(), 4);
    for (expected, node) in loaded.iter().enumerate() {
        assert_eq!(node.rank, expected);
        assert_eq!(node.host, "127.0.0.1");
    }
    Ok(())
}
