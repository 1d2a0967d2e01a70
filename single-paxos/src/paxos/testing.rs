//! Scripted acceptor clients for exercising the proposer without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::PaxosError;
use crate::network::messages::{Request, Response};
use crate::paxos::acceptor::{AcceptReply, Promise};
use crate::paxos::ballot::ProposalNumber;
use crate::paxos::proposer::ProposerSettings;
use crate::paxos::value::Value;
use crate::paxos::{AcceptorClient, NodeId, Peer, PeerDescriptor};

enum Script {
    /// Promise and accept everything, reporting this previously accepted
    /// proposal in every promise.
    Promising(Option<(ProposalNumber, Value)>),
    /// Reject everything as if `promised` had already been promised.
    Rejecting(ProposalNumber),
    /// Promise every prepare but reject every accept, as if a competitor
    /// with `promised` slipped in between the two phases.
    Fickle(ProposalNumber),
    Unreachable(NodeId),
}

pub(crate) struct ScriptedClient {
    script: Script,
    delay: Duration,
    prepares: AtomicUsize,
    accepts: AtomicUsize,
    committed: Mutex<Vec<Value>>,
}

impl ScriptedClient {
    fn with_script(script: Script) -> Self {
        ScriptedClient {
            script,
            delay: Duration::ZERO,
            prepares: AtomicUsize::new(0),
            accepts: AtomicUsize::new(0),
            committed: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn promising(accepted: Option<(ProposalNumber, Value)>) -> Self {
        Self::with_script(Script::Promising(accepted))
    }

    pub(crate) fn rejecting(promised: ProposalNumber) -> Self {
        Self::with_script(Script::Rejecting(promised))
    }

    pub(crate) fn fickle(promised: ProposalNumber) -> Self {
        Self::with_script(Script::Fickle(promised))
    }

    pub(crate) fn unreachable(node_id: NodeId) -> Self {
        Self::with_script(Script::Unreachable(node_id))
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn prepare_calls(&self) -> usize {
        self.prepares.load(Ordering::SeqCst)
    }

    pub(crate) fn accept_calls(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }

    pub(crate) fn committed(&self) -> Vec<Value> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AcceptorClient for ScriptedClient {
    async fn call(&self, request: Request) -> Result<Response, PaxosError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Script::Unreachable(node_id) = self.script {
            return Err(PaxosError::Unreachable(node_id));
        }

        let response = match request {
            Request::Prepare { number, .. } => {
                self.prepares.fetch_add(1, Ordering::SeqCst);
                Response::Promise(match &self.script {
                    Script::Fickle(_) => Promise {
                        promised: true,
                        promised_number: number,
                        accepted_number: ProposalNumber::seed(2),
                        accepted_value: None,
                    },
                    Script::Promising(accepted) => Promise {
                        promised: true,
                        promised_number: number,
                        accepted_number: accepted
                            .as_ref()
                            .map_or(ProposalNumber::seed(2), |(n, _)| *n),
                        accepted_value: accepted.as_ref().map(|(_, v)| v.clone()),
                    },
                    Script::Rejecting(promised) => Promise {
                        promised: false,
                        promised_number: *promised,
                        accepted_number: ProposalNumber::seed(2),
                        accepted_value: None,
                    },
                    Script::Unreachable(_) => unreachable!(),
                })
            }
            Request::Accept { number, .. } => {
                self.accepts.fetch_add(1, Ordering::SeqCst);
                Response::Accepted(match &self.script {
                    Script::Rejecting(promised) | Script::Fickle(promised) => AcceptReply {
                        accepted: false,
                        promised_number: *promised,
                    },
                    _ => AcceptReply {
                        accepted: true,
                        promised_number: number,
                    },
                })
            }
            Request::CommitNotify { value } => {
                self.committed.lock().unwrap().push(value);
                Response::Ack
            }
            other => Response::Error {
                message: format!("scripted client cannot answer {}", other.name()),
            },
        };
        Ok(response)
    }
}

/// Wraps clients as peers 2, 3, ... of node 1.
pub(crate) fn peers_with(clients: &[Arc<ScriptedClient>]) -> Vec<Peer> {
    clients
        .iter()
        .enumerate()
        .map(|(i, client)| {
            let node_id = i as NodeId + 2;
            Peer::new(
                PeerDescriptor::new(node_id, "localhost", 8000 + node_id as u16),
                client.clone(),
            )
        })
        .collect()
}

pub(crate) fn settings() -> ProposerSettings {
    ProposerSettings {
        rpc_timeout: Duration::from_millis(100),
        max_propose_attempts: 3,
        max_accept_attempts: 2,
        retry_backoff: Duration::from_millis(1),
    }
}
