use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::paxos::NodeId;

/// The two ballot phases a proposer can run out of attempts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Prepare,
    Accept,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Prepare => write!(f, "prepare"),
            Phase::Accept => write!(f, "accept"),
        }
    }
}

#[derive(Debug, Error)]
pub enum PaxosError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("request to node {node_id} timed out after {timeout:?}")]
    Timeout { node_id: NodeId, timeout: Duration },

    #[error("node {0} is unreachable")]
    Unreachable(NodeId),

    #[error("node {node_id} closed the connection without replying")]
    ConnectionClosed { node_id: NodeId },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("unexpected response to {request}: {response}")]
    UnexpectedResponse {
        request: &'static str,
        response: String,
    },

    #[error("corrupt ballot log: {0}")]
    CorruptLog(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error("{phase} phase did not reach quorum after {attempts} attempts")]
    QuorumNotReached { phase: Phase, attempts: u32 },
}
