use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::error::PaxosError;
use crate::network::messages::{Request, Response};
use crate::node::Node;
use crate::paxos::{AcceptorClient, NodeId, Peer, PeerDescriptor};

/// In-process network. Requests are handed straight to the target node
/// after a random delay; isolated nodes neither send nor receive.
pub struct SimNetwork {
    nodes: RwLock<HashMap<NodeId, Weak<Node>>>,
    down: RwLock<HashSet<NodeId>>,
    delay_ms: RangeInclusive<u64>,
}

impl SimNetwork {
    pub fn new(delay_ms: RangeInclusive<u64>) -> Arc<Self> {
        Arc::new(SimNetwork {
            nodes: RwLock::new(HashMap::new()),
            down: RwLock::new(HashSet::new()),
            delay_ms,
        })
    }

    pub fn register(&self, node: &Arc<Node>) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node.id(), Arc::downgrade(node));
    }

    /// Cuts `node_id` off from everybody, as if it had crashed.
    pub fn isolate(&self, node_id: NodeId) {
        info!("Simulation: isolating node {}", node_id);
        self.down
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_id);
    }

    pub fn heal(&self, node_id: NodeId) {
        info!("Simulation: healing node {}", node_id);
        self.down
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&node_id);
    }

    pub fn is_isolated(&self, node_id: NodeId) -> bool {
        self.down
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&node_id)
    }

    pub fn client(self: &Arc<Self>, from: NodeId, target: NodeId) -> SimClient {
        SimClient {
            network: Arc::clone(self),
            from,
            target,
        }
    }

    /// Peers of `this` among `members`, all reached through this network.
    pub fn peers_for(self: &Arc<Self>, this: NodeId, members: &[PeerDescriptor]) -> Vec<Peer> {
        members
            .iter()
            .filter(|m| m.node_id != this)
            .map(|m| Peer::new(m.clone(), Arc::new(self.client(this, m.node_id))))
            .collect()
    }

    /// Opens every member under `config.data_dir` and registers it.
    pub fn start_nodes(
        self: &Arc<Self>,
        members: &[PeerDescriptor],
        config: &RunConfig,
    ) -> Result<Vec<Arc<Node>>, PaxosError> {
        members
            .iter()
            .map(|member| {
                let peers = self.peers_for(member.node_id, members);
                let node = Arc::new(Node::open(member.clone(), config, peers)?);
                self.register(&node);
                Ok(node)
            })
            .collect()
    }

    fn lookup(&self, node_id: NodeId) -> Option<Arc<Node>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node_id)
            .and_then(Weak::upgrade)
    }

    async fn delay(&self) {
        let ms = rand::rng().random_range(self.delay_ms.clone());
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }
}

pub struct SimClient {
    network: Arc<SimNetwork>,
    from: NodeId,
    target: NodeId,
}

#[async_trait]
impl AcceptorClient for SimClient {
    async fn call(&self, request: Request) -> Result<Response, PaxosError> {
        self.network.delay().await;
        if self.network.is_isolated(self.from) || self.network.is_isolated(self.target) {
            debug!(
                "Simulation: dropping {} from node {} to node {}",
                request.name(),
                self.from,
                self.target
            );
            return Err(PaxosError::Unreachable(self.target));
        }
        let node = self
            .network
            .lookup(self.target)
            .ok_or(PaxosError::Unreachable(self.target))?;
        let response = node.handle(request).await;
        self.network.delay().await;
        Ok(response)
    }
}
