pub mod acceptor;
pub mod ballot;
pub mod proposer;
pub mod quorum;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PaxosError;
use crate::network::messages::{Request, Response};
use acceptor::{AcceptReply, Promise};
use ballot::ProposalNumber;
use value::Value;

pub type NodeId = u64;

/// One member of the static cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub node_id: NodeId,
    pub host: String,
    pub port: u16,
}

impl PeerDescriptor {
    pub fn new(node_id: NodeId, host: impl Into<String>, port: u16) -> Self {
        PeerDescriptor {
            node_id,
            host: host.into(),
            port,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} @{}:{}", self.node_id, self.host, self.port)
    }
}

/// How a proposer reaches a remote acceptor. Implementations only move a
/// request to the peer and bring its response back; the typed helpers map
/// responses onto the acceptor operations.
#[async_trait]
pub trait AcceptorClient: Send + Sync {
    async fn call(&self, request: Request) -> Result<Response, PaxosError>;

    async fn prepare(
        &self,
        number: ProposalNumber,
        decided: Option<Value>,
    ) -> Result<Promise, PaxosError> {
        match self.call(Request::Prepare { number, decided }).await? {
            Response::Promise(promise) => Ok(promise),
            other => Err(other.into_error("prepare")),
        }
    }

    async fn accept(
        &self,
        number: ProposalNumber,
        value: Value,
    ) -> Result<AcceptReply, PaxosError> {
        match self.call(Request::Accept { number, value }).await? {
            Response::Accepted(reply) => Ok(reply),
            other => Err(other.into_error("accept")),
        }
    }

    async fn commit_notify(&self, value: Value) -> Result<(), PaxosError> {
        match self.call(Request::CommitNotify { value }).await? {
            Response::Ack => Ok(()),
            other => Err(other.into_error("commit_notify")),
        }
    }
}

/// A remote member together with the client used to reach it.
#[derive(Clone)]
pub struct Peer {
    pub descriptor: PeerDescriptor,
    pub client: Arc<dyn AcceptorClient>,
}

impl Peer {
    pub fn new(descriptor: PeerDescriptor, client: Arc<dyn AcceptorClient>) -> Self {
        Peer { descriptor, client }
    }

    pub fn node_id(&self) -> NodeId {
        self.descriptor.node_id
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}
