//! Rank-to-unit mapping and per-phase pairing.
//!
//! The benchmark models an event-builder topology: even ranks act as
//! producer units, odd ranks as consumer units. A run with `2N` ranks has
//! `N` producers, `N` consumers, and `N` phases; in phase `p` producer `i`
//! is paired with consumer `(i + p) mod N`, so over a full run every
//! producer exchanges traffic with every consumer exactly once.
//!
//! Units carry human-readable identifiers for the result logs: producers
//! are numbered `"0"`, `"1"`, ... and consumers are lettered `"A"`, `"B"`,
//! ... with a rollover past `"Z"` (`"ZA"`, `"ZB"`, ...).

use crate::engine::Role;
use crate::transport::Rank;
use anyhow::{ensure, Result};

/// One rank's pairing for one phase of a continuous run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseAssignment {
    pub role: Role,
    pub peer: Rank,
    /// Identifier of the producer unit on this pairing.
    pub producer_id: String,
    /// Identifier of the consumer unit on this pairing.
    pub consumer_id: String,
}

/// The static unit layout of a run.
#[derive(Debug, Clone)]
pub struct Topology {
    num_ranks: usize,
    producer_ids: Vec<String>,
    consumer_ids: Vec<String>,
}

impl Topology {
    pub fn new(num_ranks: usize) -> Result<Self> {
        ensure!(
            num_ranks >= 2 && num_ranks % 2 == 0,
            "the unit topology needs an even rank count of at least 2, got {}",
            num_ranks
        );
        let units = num_ranks / 2;

        let producer_ids = (0..units).map(|i| i.to_string()).collect();
        let mut consumer_ids = Vec::with_capacity(units);
        let mut id = String::new();
        for _ in 0..units {
            id = next_unit_id(&id);
            consumer_ids.push(id.clone());
        }

        Ok(Self {
            num_ranks,
            producer_ids,
            consumer_ids,
        })
    }

    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// Number of producer/consumer pairs, which is also the phase count.
    pub fn num_phases(&self) -> usize {
        self.num_ranks / 2
    }

    pub fn role_of(&self, rank: Rank) -> Role {
        if rank % 2 == 0 {
            Role::Producer
        } else {
            Role::Consumer
        }
    }

    /// Resolve `rank`'s pairing for phase `phase`.
    pub fn assignment(&self, rank: Rank, phase: usize) -> Result<PhaseAssignment> {
        ensure!(rank < self.num_ranks, "rank {} out of range", rank);
        ensure!(phase < self.num_phases(), "phase {} out of range", phase);

        let units = self.num_phases();
        let index = rank / 2;
        let (role, producer_index, consumer_index) = match self.role_of(rank) {
            Role::Producer => (Role::Producer, index, (index + phase) % units),
            Role::Consumer => (
                Role::Consumer,
                (index + units - phase % units) % units,
                index,
            ),
            Role::Idle => unreachable!("every rank in an even topology has a unit role"),
        };
        let peer = match role {
            Role::Producer => 2 * consumer_index + 1,
            _ => 2 * producer_index,
        };

        Ok(PhaseAssignment {
            role,
            peer,
            producer_id: self.producer_ids[producer_index].clone(),
            consumer_id: self.consumer_ids[consumer_index].clone(),
        })
    }
}

/// Successor in the consumer identifier sequence: `A`..`Z`, then `ZA`..`ZZ`,
/// then `ZZA`, and so on.
fn next_unit_id(current: &str) -> String {
    match current.chars().last() {
        None | Some('Z') => {
            let mut next = current.to_string();
            next.push('A');
            next
        }
        Some(last) => {
            let mut next = current[..current.len() - 1].to_string();
            next.push((last as u8 + 1) as char);
            next
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_follow_rank_parity() {
        let topo = Topology::new(4).unwrap();
        assert_eq!(topo.role_of(0), Role::Producer);
        assert_eq!(topo.role_of(1), Role::Consumer);
        assert_eq!(topo.role_of(2), Role::Producer);
        assert_eq!(topo.role_of(3), Role::Consumer);
    }

    #[test]
    fn odd_or_tiny_rank_counts_are_rejected() {
        assert!(Topology::new(0).is_err());
        assert!(Topology::new(1).is_err());
        assert!(Topology::new(3).is_err());
        assert!(Topology::new(2).is_ok());
    }

    #[test]
    fn rotation_visits_every_consumer_once() {
        let topo = Topology::new(6).unwrap();
        assert_eq!(topo.num_phases(), 3);

        let mut peers = Vec::new();
        for phase in 0..topo.num_phases() {
            let assignment = topo.assignment(2, phase).unwrap();
            assert_eq!(assignment.role, Role::Producer);
            peers.push(assignment.peer);
        }
        peers.sort_unstable();
        assert_eq!(peers, vec![1, 3, 5]);
    }

    #[test]
    fn pairings_are_mutual() {
        let topo = Topology::new(8).unwrap();
        for phase in 0..topo.num_phases() {
            for rank in 0..topo.num_ranks() {
                let mine = topo.assignment(rank, phase).unwrap();
                let theirs = topo.assignment(mine.peer, phase).unwrap();
                assert_eq!(theirs.peer, rank);
                assert_eq!(mine.producer_id, theirs.producer_id);
                assert_eq!(mine.consumer_id, theirs.consumer_id);
            }
        }
    }

    #[test]
    fn unit_identifier_sequences() {
        let topo = Topology::new(8).unwrap();
        assert_eq!(topo.producer_ids, vec!["0", "1", "2", "3"]);
        assert_eq!(topo.consumer_ids, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn consumer_identifiers_roll_over_past_z() {
        let mut id = String::new();
        let mut seen = Vec::new();
        for _ in 0..28 {
            id = next_unit_id(&id);
            seen.push(id.clone());
        }
        assert_eq!(seen[0], "A");
        assert_eq!(seen[25], "Z");
        assert_eq!(seen[26], "ZA");
        assert_eq!(seen[27], "ZB");
    }
}
