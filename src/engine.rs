//! The buffered round-trip communication engine.
//!
//! This is the measured core of the benchmark. One engine instance per rank
//! owns a send and a receive [`CircularBuffer`] and drives N iterations of
//! message exchange against a peer rank, in one of four modes:
//!
//! - **Fixed-Blocking** / **Fixed-NonBlocking**: every iteration moves the
//!   same number of bytes; non-blocking operations are drained in batches
//!   every sync-stride iterations plus a final drain.
//! - **Variable-Blocking**: every iteration first carries a fixed-width
//!   size header, drawn from an immutable [`SizePool`], then the body.
//! - **Variable-NonBlocking**: explicitly unsupported; requesting it is a
//!   configuration error, never a silent zero result.
//!
//! Transport-level failures are steady-state: they are merged into one
//! [`IterationOutcome`] per iteration (first error wins across fragments),
//! the loop always completes all iterations, and the failure count is only
//! surfaced statistically in the returned [`RunStatistics`].
//!
//! Each side computes fragment plans and cursor advances against its own
//! buffer's capacity only. Producer and consumer capacities may differ, in
//! which case the two cursors legitimately drift out of phase.

use crate::buffer::{CircularBuffer, Fragment, FragmentPlan};
use crate::metrics::RunStatistics;
use crate::timing::{elapsed_between, Timestamp};
use crate::transport::{Rank, RecvHandle, SendHandle, Transport, TransferResult};
use anyhow::{bail, ensure, Context, Result};
use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use tracing::debug;

/// Width of the on-wire size header in variable-size mode.
pub const SIZE_HEADER_BYTES: usize = 8;

/// Number of regions in the warmup access pattern.
const WARMUP_REGIONS: usize = 5;
/// Fraction of the buffer covered by each warmup region.
const WARMUP_REGION_RATIO: f64 = 0.32;
/// Fraction of the buffer shared between consecutive warmup regions.
const WARMUP_OVERLAP_RATIO: f64 = 0.15;

/// The role a rank plays on one logical channel during one phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Consumer,
    /// Not involved in this phase; every engine call is a no-op.
    Idle,
}

/// Blocking or batched non-blocking primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommMode {
    Blocking,
    NonBlocking { sync_iterations: usize },
}

/// One logical channel: this rank's role and the peer on the other end.
#[derive(Debug, Clone, Copy)]
pub struct Channel {
    pub role: Role,
    pub peer: Rank,
}

/// The completion status of one logical message exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    pub succeeded: bool,
    pub error_code: i32,
}

impl IterationOutcome {
    fn success() -> Self {
        Self {
            succeeded: true,
            error_code: 0,
        }
    }
}

/// Per-iteration outcomes for one engine run.
///
/// Invariant: the set always holds exactly one outcome per requested
/// iteration, no matter how many physical fragments each iteration was
/// split into. The first non-success status of an iteration wins.
#[derive(Debug)]
pub struct OutcomeSet {
    outcomes: Vec<IterationOutcome>,
}

impl OutcomeSet {
    pub fn new(iterations: usize) -> Self {
        Self {
            outcomes: vec![IterationOutcome::success(); iterations],
        }
    }

    /// Merge the status of one physical transfer into iteration `index`.
    pub fn merge(&mut self, index: usize, status: &TransferResult) {
        if let Err(err) = status {
            let outcome = &mut self.outcomes[index];
            if outcome.succeeded {
                outcome.succeeded = false;
                outcome.error_code = err.code();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded).count()
    }

    pub fn get(&self, index: usize) -> Option<&IterationOutcome> {
        self.outcomes.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IterationOutcome> {
        self.outcomes.iter()
    }
}

/// Immutable pool of candidate message sizes for variable-size mode.
///
/// Generated once at setup by uniform sampling in `[min_size, max_size]`;
/// one entry is drawn uniformly at random per iteration at send time.
#[derive(Debug, Clone)]
pub struct SizePool {
    sizes: Vec<usize>,
}

impl SizePool {
    pub fn generate(min_size: usize, max_size: usize, count: usize) -> Result<Self> {
        ensure!(count > 0, "size pool must hold at least one entry");
        ensure!(min_size >= 1, "message sizes must be at least 1 byte");
        ensure!(
            min_size <= max_size,
            "size pool upper bound {} is below lower bound {}",
            max_size,
            min_size
        );

        let distribution = Uniform::new_inclusive(min_size, max_size);
        let mut rng = rand::thread_rng();
        let sizes = (0..count).map(|_| distribution.sample(&mut rng)).collect();
        Ok(Self { sizes })
    }

    pub fn draw<R: Rng>(&self, rng: &mut R) -> usize {
        self.sizes[rng.gen_range(0..self.sizes.len())]
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.sizes
    }
}

/// The overlapping access pattern used to prime transport and caches.
///
/// Five regions of `ceil(0.32 * capacity)` bytes, consecutive regions
/// sharing `ceil(0.15 * capacity)` bytes. The shape is a convention kept
/// for comparability with prior results; regions are clamped to the buffer
/// end and empty ones dropped.
pub fn warmup_regions(capacity: usize) -> Vec<Fragment> {
    let region = (WARMUP_REGION_RATIO * capacity as f64).ceil() as usize;
    let shared = (WARMUP_OVERLAP_RATIO * capacity as f64).ceil() as usize;
    let stride = region.saturating_sub(shared).max(1);

    (0..WARMUP_REGIONS)
        .map(|i| {
            let start = (i * stride).min(capacity);
            let end = (start + region).min(capacity);
            Fragment {
                offset: start,
                len: end - start,
            }
        })
        .filter(|f| f.len > 0)
        .collect()
}

/// Clamp the sync stride so one sync window never holds more in-flight
/// messages than fit in the buffer, closing the overwrite window the
/// original batching left open when the stride exceeded the slot count.
pub fn effective_sync_stride(sync_iterations: usize, capacity: usize, message_size: usize) -> usize {
    sync_iterations.min((capacity / message_size).max(1))
}

/// The buffered round-trip communication engine for one rank.
pub struct CommEngine<T: Transport> {
    transport: T,
    send_buffer: CircularBuffer,
    recv_buffer: CircularBuffer,
}

impl<T: Transport> CommEngine<T> {
    /// Allocate the send/receive buffer pair and wrap the transport.
    ///
    /// Allocation failure propagates as a setup error; the caller treats it
    /// as fatal.
    pub fn new(transport: T, send_capacity: usize, recv_capacity: usize) -> Result<Self> {
        let send_buffer =
            CircularBuffer::allocate(send_capacity).context("send buffer allocation failed")?;
        let recv_buffer =
            CircularBuffer::allocate(recv_capacity).context("receive buffer allocation failed")?;
        Ok(Self {
            transport,
            send_buffer,
            recv_buffer,
        })
    }

    pub fn transport(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn send_capacity(&self) -> usize {
        self.send_buffer.capacity()
    }

    pub fn recv_capacity(&self) -> usize {
        self.recv_buffer.capacity()
    }

    /// Reset both cursors, so independent runs start from a clean state.
    pub fn rewind(&mut self) {
        self.send_buffer.rewind();
        self.recv_buffer.rewind();
    }

    fn validate_fixed(&self, message_size: usize, iterations: usize, mode: CommMode) -> Result<()> {
        ensure!(message_size >= 1, "message size must be at least 1 byte");
        ensure!(iterations >= 1, "iteration count must be at least 1");
        let capacity = self.send_buffer.capacity().min(self.recv_buffer.capacity());
        ensure!(
            message_size <= capacity,
            "message size {} exceeds buffer capacity {}",
            message_size,
            capacity
        );
        if let CommMode::NonBlocking { sync_iterations } = mode {
            ensure!(sync_iterations >= 1, "sync stride must be at least 1");
        }
        Ok(())
    }

    /// Run `iterations` fixed-size exchanges on `channel`.
    ///
    /// Produces exactly one outcome per iteration; failed iterations debit
    /// their full message size from the byte total.
    pub fn run_fixed(
        &mut self,
        channel: Channel,
        message_size: usize,
        iterations: usize,
        mode: CommMode,
    ) -> Result<RunStatistics> {
        if channel.role == Role::Idle {
            return Ok(RunStatistics::idle());
        }
        self.validate_fixed(message_size, iterations, mode)?;

        let start = Timestamp::now()?;
        let outcomes = match (channel.role, mode) {
            (Role::Producer, CommMode::Blocking) => {
                self.produce_blocking(channel.peer, message_size, iterations)
            }
            (Role::Consumer, CommMode::Blocking) => {
                self.consume_blocking(channel.peer, message_size, iterations)
            }
            (Role::Producer, CommMode::NonBlocking { sync_iterations }) => {
                self.produce_nonblocking(channel.peer, message_size, iterations, sync_iterations)
            }
            (Role::Consumer, CommMode::NonBlocking { sync_iterations }) => {
                self.consume_nonblocking(channel.peer, message_size, iterations, sync_iterations)
            }
            (Role::Idle, _) => unreachable!("idle channels return before dispatch"),
        };
        let end = Timestamp::now()?;

        let error_count = outcomes.error_count();
        let bytes = (message_size * (iterations - error_count)) as u64;
        Ok(RunStatistics {
            bytes_transferred: bytes,
            elapsed: elapsed_between(start, end).to_duration(),
            error_count,
            iterations,
        })
    }

    fn produce_blocking(
        &mut self,
        peer: Rank,
        message_size: usize,
        iterations: usize,
    ) -> OutcomeSet {
        let mut outcomes = OutcomeSet::new(iterations);
        for i in 0..iterations {
            let plan = FragmentPlan::new(
                self.send_buffer.offset(),
                self.send_buffer.capacity(),
                message_size,
            );
            for fragment in plan.iter() {
                let status = self.transport.send(peer, self.send_buffer.region(fragment));
                outcomes.merge(i, &status);
            }
            let next = self.send_buffer.advance(message_size);
            self.send_buffer.commit(next);
        }
        outcomes
    }

    fn consume_blocking(
        &mut self,
        peer: Rank,
        message_size: usize,
        iterations: usize,
    ) -> OutcomeSet {
        let mut outcomes = OutcomeSet::new(iterations);
        for i in 0..iterations {
            let plan = FragmentPlan::new(
                self.recv_buffer.offset(),
                self.recv_buffer.capacity(),
                message_size,
            );
            for fragment in plan.iter() {
                let status = self
                    .transport
                    .recv(peer, self.recv_buffer.region_mut(fragment));
                outcomes.merge(i, &status);
            }
            let next = self.recv_buffer.advance(message_size);
            self.recv_buffer.commit(next);
        }
        outcomes
    }

    fn produce_nonblocking(
        &mut self,
        peer: Rank,
        message_size: usize,
        iterations: usize,
        sync_iterations: usize,
    ) -> OutcomeSet {
        let stride =
            effective_sync_stride(sync_iterations, self.send_buffer.capacity(), message_size);
        if stride < sync_iterations {
            debug!(
                requested = sync_iterations,
                effective = stride,
                "sync stride clamped to the buffer slot count"
            );
        }

        let mut outcomes = OutcomeSet::new(iterations);
        let mut pending: Vec<(usize, SendHandle)> = Vec::with_capacity(2 * stride);

        for i in 0..iterations {
            let plan = FragmentPlan::new(
                self.send_buffer.offset(),
                self.send_buffer.capacity(),
                message_size,
            );
            for fragment in plan.iter() {
                let handle = self
                    .transport
                    .send_nonblocking(peer, self.send_buffer.region(fragment).to_vec());
                pending.push((i, handle));
            }
            let next = self.send_buffer.advance(message_size);
            self.send_buffer.commit(next);

            if (i + 1) % stride == 0 {
                Self::drain_sends(&mut pending, &mut outcomes);
            }
        }
        // Final drain for the remainder of the last sync window.
        Self::drain_sends(&mut pending, &mut outcomes);
        outcomes
    }

    fn consume_nonblocking(
        &mut self,
        peer: Rank,
        message_size: usize,
        iterations: usize,
        sync_iterations: usize,
    ) -> OutcomeSet {
        let stride =
            effective_sync_stride(sync_iterations, self.recv_buffer.capacity(), message_size);

        let mut outcomes = OutcomeSet::new(iterations);
        let mut pending: Vec<(usize, Fragment, RecvHandle)> = Vec::with_capacity(2 * stride);

        for i in 0..iterations {
            let plan = FragmentPlan::new(
                self.recv_buffer.offset(),
                self.recv_buffer.capacity(),
                message_size,
            );
            for fragment in plan.iter() {
                let handle = self.transport.recv_nonblocking(peer, fragment.len);
                pending.push((i, fragment, handle));
            }
            let next = self.recv_buffer.advance(message_size);
            self.recv_buffer.commit(next);

            if (i + 1) % stride == 0 {
                self.drain_recvs(&mut pending, &mut outcomes);
            }
        }
        self.drain_recvs(&mut pending, &mut outcomes);
        outcomes
    }

    fn drain_sends(pending: &mut Vec<(usize, SendHandle)>, outcomes: &mut OutcomeSet) {
        for (iteration, handle) in pending.drain(..) {
            outcomes.merge(iteration, &handle.wait());
        }
    }

    fn drain_recvs(
        &mut self,
        pending: &mut Vec<(usize, Fragment, RecvHandle)>,
        outcomes: &mut OutcomeSet,
    ) {
        for (iteration, fragment, handle) in pending.drain(..) {
            match handle.wait() {
                Ok(bytes) => {
                    self.recv_buffer.region_mut(fragment).copy_from_slice(&bytes);
                }
                Err(err) => outcomes.merge(iteration, &Err(err)),
            }
        }
    }

    /// Run `iterations` variable-size exchanges on `channel`.
    ///
    /// Each iteration carries a fixed-width size header before its body;
    /// headers and bodies for different iterations are never reordered
    /// (per-channel FIFO). The byte total credits the drawn size of each
    /// successful iteration.
    pub fn run_variable(
        &mut self,
        channel: Channel,
        pool: &SizePool,
        iterations: usize,
        mode: CommMode,
    ) -> Result<RunStatistics> {
        if let CommMode::NonBlocking { .. } = mode {
            bail!("non-blocking variable-size communication is not supported");
        }
        if channel.role == Role::Idle {
            return Ok(RunStatistics::idle());
        }
        ensure!(iterations >= 1, "iteration count must be at least 1");
        ensure!(!pool.is_empty(), "size pool must hold at least one entry");
        let capacity = self.send_buffer.capacity().min(self.recv_buffer.capacity());
        if let Some(&largest) = pool.as_slice().iter().max() {
            ensure!(
                largest <= capacity,
                "size pool entry {} exceeds buffer capacity {}",
                largest,
                capacity
            );
        }

        let start = Timestamp::now()?;
        let (outcomes, bytes) = match channel.role {
            Role::Producer => self.produce_variable(channel.peer, pool, iterations),
            Role::Consumer => self.consume_variable(channel.peer, iterations)?,
            Role::Idle => unreachable!("idle channels return before dispatch"),
        };
        let end = Timestamp::now()?;

        Ok(RunStatistics {
            bytes_transferred: bytes,
            elapsed: elapsed_between(start, end).to_duration(),
            error_count: outcomes.error_count(),
            iterations,
        })
    }

    fn produce_variable(
        &mut self,
        peer: Rank,
        pool: &SizePool,
        iterations: usize,
    ) -> (OutcomeSet, u64) {
        let mut rng = rand::thread_rng();
        let mut outcomes = OutcomeSet::new(iterations);
        let mut bytes = 0u64;

        for i in 0..iterations {
            let message_size = pool.draw(&mut rng);

            // The peer cannot otherwise know how many bytes to expect, so
            // the size travels ahead of the body on the same channel.
            let header = (message_size as u64).to_le_bytes();
            let status = self.transport.send(peer, &header);
            outcomes.merge(i, &status);

            let plan = FragmentPlan::new(
                self.send_buffer.offset(),
                self.send_buffer.capacity(),
                message_size,
            );
            for fragment in plan.iter() {
                let status = self.transport.send(peer, self.send_buffer.region(fragment));
                outcomes.merge(i, &status);
            }
            let next = self.send_buffer.advance(message_size);
            self.send_buffer.commit(next);

            if outcomes.get(i).map_or(false, |o| o.succeeded) {
                bytes += message_size as u64;
            }
        }
        (outcomes, bytes)
    }

    fn consume_variable(
        &mut self,
        peer: Rank,
        iterations: usize,
    ) -> Result<(OutcomeSet, u64)> {
        let mut outcomes = OutcomeSet::new(iterations);
        let mut bytes = 0u64;

        for i in 0..iterations {
            let mut header = [0u8; SIZE_HEADER_BYTES];
            let status = self.transport.recv(peer, &mut header);
            outcomes.merge(i, &status);
            if status.is_err() {
                // Without the header the body length is unknown; the
                // channel cannot be resynchronized, so this is fatal.
                bail!("lost the size header on iteration {}", i);
            }

            let message_size = u64::from_le_bytes(header) as usize;
            ensure!(
                message_size >= 1 && message_size <= self.recv_buffer.capacity(),
                "peer announced message size {} outside buffer capacity {}",
                message_size,
                self.recv_buffer.capacity()
            );

            let plan = FragmentPlan::new(
                self.recv_buffer.offset(),
                self.recv_buffer.capacity(),
                message_size,
            );
            for fragment in plan.iter() {
                let status = self
                    .transport
                    .recv(peer, self.recv_buffer.region_mut(fragment));
                outcomes.merge(i, &status);
            }
            let next = self.recv_buffer.advance(message_size);
            self.recv_buffer.commit(next);

            if outcomes.get(i).map_or(false, |o| o.succeeded) {
                bytes += message_size as u64;
            }
        }
        Ok((outcomes, bytes))
    }

    /// One pass of the overlapping warmup access pattern: the producer
    /// sends each region, the consumer receives into the matching region of
    /// its own buffer.
    ///
    /// Both sides plan the regions over the smaller of the two capacities,
    /// so the transfer lengths agree even when the buffers differ in size.
    pub fn warmup_pattern(&mut self, channel: Channel) -> Result<()> {
        let capacity = self.send_buffer.capacity().min(self.recv_buffer.capacity());
        match channel.role {
            Role::Producer => {
                for region in warmup_regions(capacity) {
                    self.transport
                        .send(channel.peer, self.send_buffer.region(region))
                        .context("warmup send failed")?;
                }
            }
            Role::Consumer => {
                for region in warmup_regions(capacity) {
                    self.transport
                        .recv(channel.peer, self.recv_buffer.region_mut(region))
                        .context("warmup receive failed")?;
                }
            }
            Role::Idle => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::thread;

    fn engine_pair(
        send_capacity: usize,
        recv_capacity: usize,
    ) -> (CommEngine<MemoryTransport>, CommEngine<MemoryTransport>) {
        let (a, b) = MemoryTransport::pair();
        let producer = CommEngine::new(a, send_capacity, recv_capacity).unwrap();
        let consumer = CommEngine::new(b, send_capacity, recv_capacity).unwrap();
        (producer, consumer)
    }

    fn run_fixed_pair(
        message_size: usize,
        iterations: usize,
        mode: CommMode,
        send_capacity: usize,
        recv_capacity: usize,
    ) -> (RunStatistics, RunStatistics) {
        let (mut producer, mut consumer) = engine_pair(send_capacity, recv_capacity);

        let producer_thread = thread::spawn(move || {
            producer
                .run_fixed(
                    Channel {
                        role: Role::Producer,
                        peer: 1,
                    },
                    message_size,
                    iterations,
                    mode,
                )
                .unwrap()
        });
        let consumer_stats = consumer
            .run_fixed(
                Channel {
                    role: Role::Consumer,
                    peer: 0,
                },
                message_size,
                iterations,
                mode,
            )
            .unwrap();
        (producer_thread.join().unwrap(), consumer_stats)
    }

    #[test]
    fn blocking_fixed_outcome_and_byte_accounting() {
        let (producer, consumer) = run_fixed_pair(700, 5, CommMode::Blocking, 1000, 1000);

        // messageSize * iterations == transferred + messageSize * errors
        assert_eq!(consumer.iterations, 5);
        assert_eq!(
            consumer.bytes_transferred + (700 * consumer.error_count) as u64,
            700 * 5
        );
        assert_eq!(consumer.error_count, 0);
        assert_eq!(producer.bytes_transferred, 700 * 5);
    }

    #[test]
    fn blocking_fixed_with_differing_capacities() {
        // Cursors drift out of phase when capacities differ; the exchange
        // must still deliver every byte.
        let (producer, consumer) = run_fixed_pair(300, 17, CommMode::Blocking, 1000, 700);
        assert_eq!(producer.error_count, 0);
        assert_eq!(consumer.error_count, 0);
        assert_eq!(consumer.bytes_transferred, 300 * 17);
    }

    #[test]
    fn nonblocking_fixed_round_trip() {
        let mode = CommMode::NonBlocking { sync_iterations: 4 };
        let (producer, consumer) = run_fixed_pair(256, 10, mode, 1024, 1024);
        assert_eq!(producer.error_count, 0);
        assert_eq!(consumer.error_count, 0);
        assert_eq!(consumer.bytes_transferred, 256 * 10);
        assert_eq!(consumer.iterations, 10);
    }

    #[test]
    fn nonblocking_stride_wider_than_buffer_is_clamped() {
        // Only 2 messages fit per buffer; a stride of 100 must not leave
        // more than 2 iterations in flight.
        assert_eq!(effective_sync_stride(100, 2048, 1024), 2);
        assert_eq!(effective_sync_stride(3, 2048, 1024), 2);
        assert_eq!(effective_sync_stride(1, 2048, 1024), 1);
        assert_eq!(effective_sync_stride(8, 1024, 1024), 1);

        let mode = CommMode::NonBlocking {
            sync_iterations: 100,
        };
        let (producer, consumer) = run_fixed_pair(1024, 6, mode, 2048, 2048);
        assert_eq!(producer.error_count, 0);
        assert_eq!(consumer.bytes_transferred, 1024 * 6);
    }

    #[test]
    fn idle_rank_is_a_no_op() {
        let (mut engine, _other) = engine_pair(64, 64);
        let stats = engine
            .run_fixed(
                Channel {
                    role: Role::Idle,
                    peer: 1,
                },
                32,
                4,
                CommMode::Blocking,
            )
            .unwrap();
        assert_eq!(stats.bytes_transferred, 0);
        assert_eq!(stats.error_count, 0);
    }

    #[test]
    fn oversized_message_is_a_setup_error() {
        let (mut engine, _other) = engine_pair(64, 64);
        let err = engine
            .run_fixed(
                Channel {
                    role: Role::Producer,
                    peer: 1,
                },
                65,
                1,
                CommMode::Blocking,
            )
            .unwrap_err();
        assert!(err.to_string().contains("exceeds buffer capacity"));
    }

    #[test]
    fn disconnected_peer_is_counted_not_fatal() {
        let (a, b) = MemoryTransport::pair();
        drop(b);
        let mut engine = CommEngine::new(a, 64, 64).unwrap();
        let stats = engine
            .run_fixed(
                Channel {
                    role: Role::Producer,
                    peer: 1,
                },
                16,
                3,
                CommMode::Blocking,
            )
            .unwrap();
        // All iterations completed, all recorded as failed, bytes debited.
        assert_eq!(stats.iterations, 3);
        assert_eq!(stats.error_count, 3);
        assert_eq!(stats.bytes_transferred, 0);
    }

    #[test]
    fn variable_blocking_sizes_stay_paired() {
        let pool = SizePool::generate(1, 500, 32).unwrap();
        let pool_b = pool.clone();
        let (mut producer, mut consumer) = engine_pair(1000, 1000);
        let iterations = 50;

        let producer_thread = thread::spawn(move || {
            producer
                .run_variable(
                    Channel {
                        role: Role::Producer,
                        peer: 1,
                    },
                    &pool,
                    iterations,
                    CommMode::Blocking,
                )
                .unwrap()
        });
        let consumer_stats = consumer
            .run_variable(
                Channel {
                    role: Role::Consumer,
                    peer: 0,
                },
                &pool_b,
                iterations,
                CommMode::Blocking,
            )
            .unwrap();
        let producer_stats = producer_thread.join().unwrap();

        // If a header were ever paired with the wrong body the byte counts
        // would disagree (or the consumer would desynchronize and fail).
        assert_eq!(producer_stats.error_count, 0);
        assert_eq!(consumer_stats.error_count, 0);
        assert_eq!(
            producer_stats.bytes_transferred,
            consumer_stats.bytes_transferred
        );
        assert_eq!(consumer_stats.iterations, iterations);
    }

    #[test]
    fn variable_nonblocking_is_rejected() {
        let pool = SizePool::generate(1, 16, 4).unwrap();
        let (mut engine, _other) = engine_pair(64, 64);
        let err = engine
            .run_variable(
                Channel {
                    role: Role::Producer,
                    peer: 1,
                },
                &pool,
                1,
                CommMode::NonBlocking { sync_iterations: 8 },
            )
            .unwrap_err();
        assert!(err.to_string().contains("not supported"));
    }

    #[test]
    fn size_pool_bounds() {
        let pool = SizePool::generate(10, 20, 100).unwrap();
        assert_eq!(pool.len(), 100);
        assert!(pool.as_slice().iter().all(|&s| (10..=20).contains(&s)));

        assert!(SizePool::generate(20, 10, 100).is_err());
        assert!(SizePool::generate(0, 10, 100).is_err());
        assert!(SizePool::generate(1, 10, 0).is_err());
    }

    #[test]
    fn warmup_region_shape() {
        let regions = warmup_regions(1000);
        assert_eq!(regions.len(), 5);
        assert_eq!(regions[0], Fragment { offset: 0, len: 320 });
        // Consecutive regions overlap by the shared amount.
        assert_eq!(regions[1].offset, 320 - 150);
        // The last region is clamped to the buffer end.
        let last = regions[4];
        assert!(last.offset + last.len <= 1000);
    }

    #[test]
    fn warmup_pattern_exchanges_all_regions() {
        let (mut producer, mut consumer) = engine_pair(1000, 1000);
        let producer_thread = thread::spawn(move || {
            producer
                .warmup_pattern(Channel {
                    role: Role::Producer,
                    peer: 1,
                })
                .unwrap()
        });
        consumer
            .warmup_pattern(Channel {
                role: Role::Consumer,
                peer: 0,
            })
            .unwrap();
        producer_thread.join().unwrap();
    }

    #[test]
    fn outcome_set_first_error_wins() {
        let mut outcomes = OutcomeSet::new(2);
        outcomes.merge(0, &Ok(()));
        outcomes.merge(1, &Err(crate::transport::TransferError::Io(5)));
        outcomes.merge(1, &Err(crate::transport::TransferError::Io(9)));

        let all: Vec<_> = outcomes.iter().copied().collect();
        assert!(all[0].succeeded);
        assert!(!all[1].succeeded);
        assert_eq!(all[1].error_code, 5);
        assert_eq!(outcomes.error_count(), 1);
    }
}
