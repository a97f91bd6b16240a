//! Rank-to-rank message-passing transports.
//!
//! The engine is written against the [`Transport`] trait, which models the
//! primitives the benchmark needs from a message-passing layer:
//!
//! - blocking `send`/`recv` that return once the transport has accepted or
//!   delivered the bytes,
//! - non-blocking `send_nonblocking`/`recv_nonblocking` that return a
//!   completion handle, with completions awaited in batches by the engine,
//! - a rank-0-coordinated `barrier` used between benchmark phases.
//!
//! Two implementations are provided: a TCP transport for multi-process runs
//! ([`tcp::TcpTransport`]) and an in-process channel transport that wires
//! N ranks inside one process ([`memory::MemoryTransport`]), used for
//! single-host runs and for the test suite.
//!
//! Transports guarantee FIFO ordering per directed channel. The engine
//! relies on this for the wraparound case (tail fragment before wrapped
//! head) and for the variable-size header-before-body sequencing.

use std::sync::mpsc;
use thiserror::Error;

pub mod memory;
pub mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpTransport;

/// One participant process in the distributed computation.
pub type Rank = usize;

/// A transport-level completion status for a single physical transfer.
///
/// These are steady-state errors: the engine records them into the outcome
/// set and keeps going. They are never retried and never escalated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("i/o failure (os error {0})")]
    Io(i32),
    #[error("peer disconnected")]
    Disconnected,
    #[error("transport worker unavailable")]
    WorkerGone,
}

impl TransferError {
    /// Transport-defined numeric code, surfaced in iteration outcomes.
    pub fn code(&self) -> i32 {
        match self {
            TransferError::Io(code) => *code,
            TransferError::Disconnected => -1,
            TransferError::WorkerGone => -2,
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::ConnectionReset => {
                TransferError::Disconnected
            }
            _ => TransferError::Io(err.raw_os_error().unwrap_or(-1)),
        }
    }
}

pub type TransferResult = Result<(), TransferError>;

/// Completion handle for a non-blocking send.
///
/// The handle owns its payload copy for the lifetime of the transfer, so an
/// in-flight region can never be clobbered by a later iteration reusing the
/// same buffer slot.
pub struct SendHandle {
    rx: mpsc::Receiver<TransferResult>,
}

impl SendHandle {
    /// Create a handle together with the resolver side.
    pub fn pending() -> (Self, mpsc::Sender<TransferResult>) {
        let (tx, rx) = mpsc::channel();
        (Self { rx }, tx)
    }

    /// Create an already-completed handle.
    pub fn ready(result: TransferResult) -> Self {
        let (handle, tx) = Self::pending();
        // The receiver is held by `handle`, so the send cannot fail.
        let _ = tx.send(result);
        handle
    }

    /// Block until the transfer completes.
    pub fn wait(self) -> TransferResult {
        self.rx
            .recv()
            .unwrap_or(Err(TransferError::WorkerGone))
            .and(Ok(()))
    }
}

/// Completion handle for a non-blocking receive of a known byte length.
pub struct RecvHandle {
    rx: mpsc::Receiver<Result<Vec<u8>, TransferError>>,
}

impl RecvHandle {
    pub fn pending() -> (Self, mpsc::Sender<Result<Vec<u8>, TransferError>>) {
        let (tx, rx) = mpsc::channel();
        (Self { rx }, tx)
    }

    pub fn ready(result: Result<Vec<u8>, TransferError>) -> Self {
        let (handle, tx) = Self::pending();
        let _ = tx.send(result);
        handle
    }

    /// Block until the bytes arrive.
    pub fn wait(self) -> Result<Vec<u8>, TransferError> {
        self.rx.recv().unwrap_or(Err(TransferError::WorkerGone))
    }
}

/// A point-to-point message-passing layer between ranks.
///
/// FIFO ordering per directed channel is part of the contract. The blocking
/// operations have default implementations on top of the non-blocking ones;
/// implementations may override them when a copy can be avoided.
pub trait Transport: Send {
    fn self_rank(&self) -> Rank;

    fn num_ranks(&self) -> usize;

    /// Issue an asynchronous send of an owned payload.
    fn send_nonblocking(&mut self, peer: Rank, data: Vec<u8>) -> SendHandle;

    /// Issue an asynchronous receive of exactly `len` bytes.
    fn recv_nonblocking(&mut self, peer: Rank, len: usize) -> RecvHandle;

    /// Send `data` to `peer`, blocking until the transport accepts it.
    fn send(&mut self, peer: Rank, data: &[u8]) -> TransferResult {
        self.send_nonblocking(peer, data.to_vec()).wait()
    }

    /// Receive exactly `dest.len()` bytes from `peer` into `dest`.
    fn recv(&mut self, peer: Rank, dest: &mut [u8]) -> TransferResult {
        let bytes = self.recv_nonblocking(peer, dest.len()).wait()?;
        dest.copy_from_slice(&bytes);
        Ok(())
    }

    /// Synchronize all ranks.
    ///
    /// Rank 0 collects one token from every other rank, then releases them
    /// all; the token exchange rides the ordinary point-to-point channel.
    fn barrier(&mut self) -> TransferResult {
        let token = [0u8; 1];
        if self.self_rank() == 0 {
            for peer in 1..self.num_ranks() {
                let mut buf = [0u8; 1];
                self.recv(peer, &mut buf)?;
            }
            for peer in 1..self.num_ranks() {
                self.send(peer, &token)?;
            }
        } else {
            self.send(0, &token)?;
            let mut buf = [0u8; 1];
            self.recv(0, &mut buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_send_handle_resolves() {
        assert_eq!(SendHandle::ready(Ok(())).wait(), Ok(()));
        assert_eq!(
            SendHandle::ready(Err(TransferError::Disconnected)).wait(),
            Err(TransferError::Disconnected)
        );
    }

    #[test]
    fn dropped_resolver_reports_worker_gone() {
        let (handle, tx) = SendHandle::pending();
        drop(tx);
        assert_eq!(handle.wait(), Err(TransferError::WorkerGone));
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(TransferError::Io(32).code(), 32);
        assert_eq!(TransferError::Disconnected.code(), -1);
        assert_eq!(TransferError::WorkerGone.code(), -2);
    }
}
