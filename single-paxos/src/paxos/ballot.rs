use std::fmt;

use serde::{Deserialize, Serialize};

use crate::paxos::NodeId;

/// A ballot number. Ordered by round first, then by the id of the node that
/// generated it, so two nodes can never produce the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProposalNumber {
    pub round: u64,
    pub node_id: NodeId,
}

impl ProposalNumber {
    pub fn new(round: u64, node_id: NodeId) -> Self {
        ProposalNumber { round, node_id }
    }

    /// The number every acceptor starts from before anything was promised.
    pub fn seed(node_id: NodeId) -> Self {
        ProposalNumber { round: 0, node_id }
    }

    pub fn is_seed(&self) -> bool {
        self.round == 0
    }
}

impl fmt::Display for ProposalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.round, self.node_id)
    }
}

/// Hands out this node's proposal numbers.
#[derive(Debug)]
pub struct ProposalNumberGenerator {
    node_id: NodeId,
    round: u64,
}

impl ProposalNumberGenerator {
    pub fn new(node_id: NodeId) -> Self {
        ProposalNumberGenerator { node_id, round: 0 }
    }

    /// Returns a number above everything returned or observed so far.
    pub fn next(&mut self) -> ProposalNumber {
        self.round += 1;
        ProposalNumber::new(self.round, self.node_id)
    }

    /// Records a number seen elsewhere so the next round leapfrogs it.
    pub fn observe(&mut self, number: ProposalNumber) {
        if number.round > self.round {
            self.round = number.round;
        }
    }
}
