//! In-process transport connecting N ranks over standard channels.
//!
//! Every rank runs on its own thread inside one process; each directed rank
//! pair gets an unbounded channel, so sends complete immediately and FIFO
//! ordering per channel is inherited from the channel itself. This is the
//! default transport for single-host runs and the workhorse of the test
//! suite.

use super::{Rank, RecvHandle, SendHandle, Transport, TransferError, TransferResult};
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{channel, Receiver, Sender};

/// One rank's endpoint of an in-process cluster.
pub struct MemoryTransport {
    rank: Rank,
    num_ranks: usize,
    outgoing: HashMap<Rank, Sender<Vec<u8>>>,
    incoming: HashMap<Rank, Receiver<Vec<u8>>>,
    /// Bytes already pulled off a channel but not yet consumed by a receive.
    stash: HashMap<Rank, VecDeque<u8>>,
}

impl MemoryTransport {
    /// Wire up a fully-connected cluster of `num_ranks` endpoints.
    ///
    /// The returned vector is indexed by rank; each endpoint is handed to
    /// its rank's thread.
    pub fn cluster(num_ranks: usize) -> Vec<MemoryTransport> {
        let mut senders: Vec<HashMap<Rank, Sender<Vec<u8>>>> =
            (0..num_ranks).map(|_| HashMap::new()).collect();
        let mut receivers: Vec<HashMap<Rank, Receiver<Vec<u8>>>> =
            (0..num_ranks).map(|_| HashMap::new()).collect();

        for from in 0..num_ranks {
            for to in 0..num_ranks {
                if from == to {
                    continue;
                }
                let (tx, rx) = channel();
                senders[from].insert(to, tx);
                receivers[to].insert(from, rx);
            }
        }

        senders
            .into_iter()
            .zip(receivers)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| MemoryTransport {
                rank,
                num_ranks,
                stash: outgoing.keys().map(|&peer| (peer, VecDeque::new())).collect(),
                outgoing,
                incoming,
            })
            .collect()
    }

    /// Wire up exactly two endpoints, the common benchmark topology.
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let mut cluster = Self::cluster(2);
        let b = cluster.pop().expect("cluster(2) yields two endpoints");
        let a = cluster.pop().expect("cluster(2) yields two endpoints");
        (a, b)
    }

    fn pull_exact(&mut self, peer: Rank, len: usize) -> Result<Vec<u8>, TransferError> {
        let rx = self
            .incoming
            .get(&peer)
            .ok_or(TransferError::Disconnected)?;
        let stash = self.stash.entry(peer).or_default();

        while stash.len() < len {
            let chunk = rx.recv().map_err(|_| TransferError::Disconnected)?;
            stash.extend(chunk);
        }
        Ok(stash.drain(..len).collect())
    }
}

impl Transport for MemoryTransport {
    fn self_rank(&self) -> Rank {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    fn send_nonblocking(&mut self, peer: Rank, data: Vec<u8>) -> SendHandle {
        let result = match self.outgoing.get(&peer) {
            Some(tx) => tx.send(data).map_err(|_| TransferError::Disconnected),
            None => Err(TransferError::Disconnected),
        };
        SendHandle::ready(result)
    }

    fn recv_nonblocking(&mut self, peer: Rank, len: usize) -> RecvHandle {
        RecvHandle::ready(self.pull_exact(peer, len))
    }

    fn recv(&mut self, peer: Rank, dest: &mut [u8]) -> TransferResult {
        let bytes = self.pull_exact(peer, dest.len())?;
        dest.copy_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn round_trip_between_two_ranks() {
        let (mut a, mut b) = MemoryTransport::pair();

        let producer = thread::spawn(move || {
            a.send(1, &[1, 2, 3, 4]).unwrap();
            a.send(1, &[5, 6]).unwrap();
        });

        // One receive spanning both sends exercises the byte stash.
        let mut buf = [0u8; 6];
        b.recv(0, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);
        producer.join().unwrap();
    }

    #[test]
    fn fifo_order_is_preserved() {
        let (mut a, mut b) = MemoryTransport::pair();
        for i in 0..10u8 {
            a.send(1, &[i]).unwrap();
        }
        for i in 0..10u8 {
            let mut buf = [0u8; 1];
            b.recv(0, &mut buf).unwrap();
            assert_eq!(buf[0], i);
        }
    }

    #[test]
    fn disconnected_peer_is_reported() {
        let (a, mut b) = MemoryTransport::pair();
        drop(a);
        let mut buf = [0u8; 1];
        assert_eq!(b.recv(0, &mut buf), Err(TransferError::Disconnected));
    }

    #[test]
    fn barrier_releases_all_ranks() {
        let cluster = MemoryTransport::cluster(4);
        let handles: Vec<_> = cluster
            .into_iter()
            .map(|mut t| thread::spawn(move || t.barrier()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Ok(()));
        }
    }
}
