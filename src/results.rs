//! Result reporting: append-only CSV logs and the console table.
//!
//! Two CSV streams are produced, both append-only so repeated runs
//! accumulate in the same files:
//!
//! - the **phase log**, one row per completed phase on the consumer side
//!   (`timestamp,pattern,message_size,phase,producer,consumer,avg_rtt,throughput,errors`),
//! - the **periodic throughput log**, one row per reporting interval
//!   (`timestamp,pattern,message_size,throughput`).
//!
//! Headers are written only when a file is empty. Timestamps are UTC in
//! RFC 3339 form.

use crate::metrics::ThroughputSummary;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const PHASE_HEADER: &str =
    "timestamp,pattern,message_size,phase,producer,consumer,avg_rtt,throughput,errors";
const THROUGHPUT_HEADER: &str = "timestamp,pattern,message_size,throughput";

/// One phase-log row, assembled by the consumer after a phase completes.
#[derive(Debug, Clone)]
pub struct PhaseRecord {
    pub pattern: String,
    /// Byte size for fixed patterns, `"VARIABLE"` for variable ones.
    pub message_size: String,
    pub phase: usize,
    pub producer_id: String,
    pub consumer_id: String,
    pub summary: ThroughputSummary,
    pub error_count: usize,
}

/// Writer for the two CSV streams of one rank.
pub struct ResultsWriter {
    phase_log: Option<PathBuf>,
    throughput_log: Option<PathBuf>,
}

impl ResultsWriter {
    pub fn new(phase_log: Option<&Path>, throughput_log: Option<&Path>) -> Self {
        Self {
            phase_log: phase_log.map(Path::to_path_buf),
            throughput_log: throughput_log.map(Path::to_path_buf),
        }
    }

    /// Append one row to the phase log and echo it to the console.
    pub fn record_phase(&self, record: &PhaseRecord) -> Result<()> {
        info!(
            "phase {:>3}  {} -> {}  size {:>10}  rtt {:.9} s  throughput {:.3} Mbit/s  errors {}",
            record.phase,
            record.producer_id,
            record.consumer_id,
            record.message_size,
            record.summary.avg_rtt_secs,
            record.summary.avg_throughput_mbit,
            record.error_count,
        );

        let Some(ref path) = self.phase_log else {
            return Ok(());
        };
        let row = format!(
            "{},{},{},{},{},{},{:.9},{:.6},{}",
            chrono::Utc::now().to_rfc3339(),
            record.pattern,
            record.message_size,
            record.phase,
            record.producer_id,
            record.consumer_id,
            record.summary.avg_rtt_secs,
            record.summary.avg_throughput_mbit,
            record.error_count,
        );
        append_row(path, PHASE_HEADER, &row)
            .with_context(|| format!("failed to write phase log {:?}", path))
    }

    /// Append one row to the periodic throughput log.
    pub fn record_throughput(
        &self,
        pattern: &str,
        message_size: &str,
        throughput_mbit: f64,
    ) -> Result<()> {
        let Some(ref path) = self.throughput_log else {
            return Ok(());
        };
        debug!(
            pattern,
            message_size, throughput_mbit, "periodic throughput sample"
        );
        let row = format!(
            "{},{},{},{:.6}",
            chrono::Utc::now().to_rfc3339(),
            pattern,
            message_size,
            throughput_mbit,
        );
        append_row(path, THROUGHPUT_HEADER, &row)
            .with_context(|| format!("failed to write throughput log {:?}", path))
    }
}

// Serializes appends across in-process ranks so the header is written once
// and rows never interleave.
static LOG_LOCK: Mutex<()> = Mutex::new(());

fn append_row(path: &Path, header: &str, row: &str) -> Result<()> {
    let _guard = LOG_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = String::with_capacity(header.len() + row.len() + 2);
    if file.metadata()?.len() == 0 {
        line.push_str(header);
        line.push('\n');
    }
    line.push_str(row);
    line.push('\n');
    file.write_all(line.as_bytes())?;
    Ok(())
}
