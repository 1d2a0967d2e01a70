pub mod config;
pub mod error;
pub mod logger;
pub mod network;
pub mod node;
pub mod paxos;
pub mod run;
pub mod storage;

pub use error::PaxosError;
pub use node::{Committed, Node, ProposalState};
pub use paxos::value::Value;
pub use paxos::{NodeId, PeerDescriptor};
