//! TCP transport for multi-process runs.
//!
//! Each rank holds one TCP stream per peer. A stream is serviced by a
//! dedicated writer thread and a dedicated reader thread; non-blocking
//! operations hand an owned job to the matching thread and return a
//! completion handle, blocking operations simply wait on that handle. A
//! single stream per directed channel gives the FIFO ordering the engine
//! depends on.
//!
//! Connection establishment is rank-ordered to avoid crossed dials: every
//! rank connects to all lower-ranked peers (with retry, since the peer may
//! not be listening yet) and accepts from all higher-ranked peers,
//! identifying inbound connections through an 8-byte rank handshake.

use super::{Rank, RecvHandle, SendHandle, Transport, TransferError, TransferResult};
use anyhow::{bail, ensure, Context, Result};
use serde::{Deserialize, Serialize};
use socket2::SockRef;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::mpsc::{channel, Sender};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(50);

/// One rank's listen address in the topology file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAddr {
    pub rank: Rank,
    pub host: String,
    pub port: u16,
}

impl NodeAddr {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Load and validate a JSON topology file: an array of `NodeAddr` entries
/// covering ranks `0..n` exactly once.
pub fn load_topology(path: &Path) -> Result<Vec<NodeAddr>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read topology file {}", path.display()))?;
    let mut nodes: Vec<NodeAddr> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse topology file {}", path.display()))?;

    nodes.sort_by_key(|n| n.rank);
    ensure!(!nodes.is_empty(), "topology file lists no ranks");
    for (expected, node) in nodes.iter().enumerate() {
        ensure!(
            node.rank == expected,
            "topology file must cover ranks 0..{} exactly once (missing or duplicate rank {})",
            nodes.len(),
            expected
        );
    }
    Ok(nodes)
}

struct WriteJob {
    data: Vec<u8>,
    done: Sender<TransferResult>,
}

struct ReadJob {
    len: usize,
    done: Sender<Result<Vec<u8>, TransferError>>,
}

/// Writer/reader thread pair servicing one peer stream.
struct Link {
    write_tx: Option<Sender<WriteJob>>,
    read_tx: Option<Sender<ReadJob>>,
    writer: Option<thread::JoinHandle<()>>,
    reader: Option<thread::JoinHandle<()>>,
}

impl Link {
    fn spawn(peer: Rank, stream: TcpStream) -> Result<Self> {
        let (write_tx, write_rx) = channel::<WriteJob>();
        let (read_tx, read_rx) = channel::<ReadJob>();

        let mut write_stream = stream
            .try_clone()
            .context("failed to clone peer stream for the writer thread")?;
        let mut read_stream = stream;

        let writer = thread::Builder::new()
            .name(format!("p2p-writer-{}", peer))
            .spawn(move || {
                for job in write_rx {
                    let result = write_stream
                        .write_all(&job.data)
                        .map_err(TransferError::from);
                    let _ = job.done.send(result);
                }
            })
            .context("failed to spawn writer thread")?;

        let reader = thread::Builder::new()
            .name(format!("p2p-reader-{}", peer))
            .spawn(move || {
                for job in read_rx {
                    let mut buf = vec![0u8; job.len];
                    let result = read_stream
                        .read_exact(&mut buf)
                        .map(|_| buf)
                        .map_err(TransferError::from);
                    let _ = job.done.send(result);
                }
            })
            .context("failed to spawn reader thread")?;

        Ok(Self {
            write_tx: Some(write_tx),
            read_tx: Some(read_tx),
            writer: Some(writer),
            reader: Some(reader),
        })
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        // Closing the job channels lets both threads run off the end of
        // their receive loops.
        self.write_tx.take();
        self.read_tx.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

/// A fully-connected TCP mesh endpoint for one rank.
pub struct TcpTransport {
    rank: Rank,
    num_ranks: usize,
    links: HashMap<Rank, Link>,
}

impl TcpTransport {
    /// Establish connections to every other rank in `nodes`.
    ///
    /// `socket_buffer_bytes`, when set, is applied to both the kernel send
    /// and receive buffers of every peer stream; `TCP_NODELAY` is always
    /// enabled so small header transfers are not coalesced.
    pub fn connect(
        self_rank: Rank,
        nodes: &[NodeAddr],
        socket_buffer_bytes: Option<usize>,
    ) -> Result<Self> {
        ensure!(
            self_rank < nodes.len(),
            "rank {} is not covered by the {}-rank topology",
            self_rank,
            nodes.len()
        );
        let num_ranks = nodes.len();
        let mut links = HashMap::new();

        let listener = TcpListener::bind(nodes[self_rank].endpoint()).with_context(|| {
            format!(
                "rank {} failed to listen on {}",
                self_rank,
                nodes[self_rank].endpoint()
            )
        })?;

        // Dial all lower-ranked peers, retrying while they come up.
        for node in nodes.iter().filter(|n| n.rank < self_rank) {
            let mut stream = Self::dial(node)?;
            Self::tune(&stream, socket_buffer_bytes)?;
            stream
                .write_all(&(self_rank as u64).to_le_bytes())
                .with_context(|| format!("handshake with rank {} failed", node.rank))?;
            debug!(peer = node.rank, "connected to lower-ranked peer");
            links.insert(node.rank, Link::spawn(node.rank, stream)?);
        }

        // Accept from all higher-ranked peers.
        let expected = num_ranks - self_rank - 1;
        for _ in 0..expected {
            let (mut stream, addr) = listener
                .accept()
                .with_context(|| format!("rank {} failed to accept a peer", self_rank))?;
            Self::tune(&stream, socket_buffer_bytes)?;

            let mut rank_buf = [0u8; 8];
            stream
                .read_exact(&mut rank_buf)
                .with_context(|| format!("handshake from {} failed", addr))?;
            let peer = u64::from_le_bytes(rank_buf) as Rank;
            ensure!(
                peer > self_rank && peer < num_ranks && !links.contains_key(&peer),
                "unexpected handshake rank {} from {}",
                peer,
                addr
            );
            debug!(peer, "accepted higher-ranked peer");
            links.insert(peer, Link::spawn(peer, stream)?);
        }

        Ok(Self {
            rank: self_rank,
            num_ranks,
            links,
        })
    }

    fn dial(node: &NodeAddr) -> Result<TcpStream> {
        let deadline = Instant::now() + CONNECT_TIMEOUT;
        loop {
            match TcpStream::connect(node.endpoint()) {
                Ok(stream) => return Ok(stream),
                Err(err) if Instant::now() < deadline => {
                    debug!(peer = node.rank, error = %err, "peer not ready, retrying");
                    thread::sleep(CONNECT_RETRY_DELAY);
                }
                Err(err) => {
                    bail!(
                        "could not connect to rank {} at {} within {:?}: {}",
                        node.rank,
                        node.endpoint(),
                        CONNECT_TIMEOUT,
                        err
                    );
                }
            }
        }
    }

    fn tune(stream: &TcpStream, socket_buffer_bytes: Option<usize>) -> Result<()> {
        let sock = SockRef::from(stream);
        sock.set_nodelay(true)
            .context("failed to set TCP_NODELAY")?;
        if let Some(bytes) = socket_buffer_bytes {
            sock.set_send_buffer_size(bytes)
                .context("failed to set the socket send buffer size")?;
            sock.set_recv_buffer_size(bytes)
                .context("failed to set the socket receive buffer size")?;
        }
        Ok(())
    }
}

impl Transport for TcpTransport {
    fn self_rank(&self) -> Rank {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    fn send_nonblocking(&mut self, peer: Rank, data: Vec<u8>) -> SendHandle {
        let (handle, done) = SendHandle::pending();
        match self.links.get(&peer).and_then(|l| l.write_tx.as_ref()) {
            // If the worker is gone the job (and its resolver) is dropped,
            // which resolves the handle to WorkerGone.
            Some(tx) => {
                let _ = tx.send(WriteJob { data, done });
            }
            None => drop(done),
        }
        handle
    }

    fn recv_nonblocking(&mut self, peer: Rank, len: usize) -> RecvHandle {
        let (handle, done) = RecvHandle::pending();
        match self.links.get(&peer).and_then(|l| l.read_tx.as_ref()) {
            Some(tx) => {
                let _ = tx.send(ReadJob { len, done });
            }
            None => drop(done),
        }
        handle
    }
}
