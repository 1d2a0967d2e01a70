use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use tracing::debug;

use crate::error::{PaxosError, Phase};
use crate::logger::NodeLogger;
use crate::paxos::acceptor::{Acceptor, Promise};
use crate::paxos::ballot::{ProposalNumber, ProposalNumberGenerator};
use crate::paxos::quorum::Quorum;
use crate::paxos::value::Value;
use crate::paxos::{NodeId, Peer};

#[derive(Debug, Clone)]
pub struct ProposerSettings {
    /// Upper bound on a single call to one peer. A peer that does not answer
    /// in time is counted as a rejection.
    pub rpc_timeout: Duration,
    pub max_propose_attempts: u32,
    pub max_accept_attempts: u32,
    /// Base of the randomized pause between attempts.
    pub retry_backoff: Duration,
}

impl Default for ProposerSettings {
    fn default() -> Self {
        ProposerSettings {
            rpc_timeout: Duration::from_secs(2),
            max_propose_attempts: 10,
            max_accept_attempts: 5,
            retry_backoff: Duration::from_millis(50),
        }
    }
}

/// The value a proposer is pushing. Starts as the client's value and is
/// replaced whenever a prepare reply reveals a value accepted under a higher
/// number than anything seen so far.
#[derive(Debug, Clone)]
pub struct Candidate {
    value: Value,
    adopted_from: Option<ProposalNumber>,
}

impl Candidate {
    pub fn new(value: Value) -> Self {
        Candidate {
            value,
            adopted_from: None,
        }
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Number of the accepted proposal whose value was adopted, if any.
    pub fn adopted_from(&self) -> Option<ProposalNumber> {
        self.adopted_from
    }

    fn consider(&mut self, promise: &Promise) -> bool {
        let Some(value) = &promise.accepted_value else {
            return false;
        };
        if self
            .adopted_from
            .is_some_and(|seen| seen >= promise.accepted_number)
        {
            return false;
        }
        self.value = value.clone();
        self.adopted_from = Some(promise.accepted_number);
        true
    }
}

/// Drives prepare, accept and the commit broadcast against the peers. The
/// local acceptor votes for this node; each peer votes through its client.
pub struct Proposer {
    node_id: NodeId,
    peers: Vec<Peer>,
    quorum: Quorum,
    settings: ProposerSettings,
    events: NodeLogger,
}

impl Proposer {
    pub fn new(
        node_id: NodeId,
        peers: Vec<Peer>,
        settings: ProposerSettings,
        events: NodeLogger,
    ) -> Self {
        Proposer {
            node_id,
            quorum: Quorum::for_peers(peers.len()),
            peers,
            settings,
            events,
        }
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn settings(&self) -> &ProposerSettings {
        &self.settings
    }

    /// Phase 1. Returns the number a quorum promised, after folding every
    /// previously accepted value seen in the replies into `candidate`.
    pub async fn propose(
        &self,
        local: &Acceptor,
        generator: &mut ProposalNumberGenerator,
        candidate: &mut Candidate,
        decided: Option<&Value>,
    ) -> Result<ProposalNumber, PaxosError> {
        let max_attempts = self.settings.max_propose_attempts;
        for attempt in 1..=max_attempts {
            generator.observe(local.state().promised);
            let number = generator.next();

            let own = local.prepare(number)?;
            let mut votes = usize::from(own.promised);
            let mut highest_promised = own.promised_number;
            candidate.consider(&own);

            let replies = self
                .fan_out(|peer| peer.client.prepare(number, decided.cloned()))
                .await;
            for (peer, reply) in replies {
                match reply {
                    Ok(promise) => {
                        if promise.promised {
                            votes += 1;
                        }
                        highest_promised = highest_promised.max(promise.promised_number);
                        if candidate.consider(&promise) {
                            self.events.info(format!(
                                "Adopting value accepted under {} reported by node {}",
                                promise.accepted_number,
                                peer.node_id()
                            ));
                        }
                    }
                    Err(e) => self.events.warn(format!(
                        "Prepare {} to node {} failed: {}",
                        number,
                        peer.node_id(),
                        e
                    )),
                }
            }

            if self.quorum.reached(votes) {
                self.events.info(format!(
                    "Prepare {} promised by {}/{} nodes. Prepare-phase success! Trying accept-phase...",
                    number,
                    votes,
                    self.peers.len() + 1
                ));
                return Ok(number);
            }

            generator.observe(highest_promised);
            self.events.warn(format!(
                "Prepare {} got {} of {} required promises (attempt {}/{}). Trying to propose again...",
                number,
                votes,
                self.quorum.size(),
                attempt,
                max_attempts
            ));
            if attempt < max_attempts {
                self.backoff(attempt).await;
            }
        }
        Err(PaxosError::QuorumNotReached {
            phase: Phase::Prepare,
            attempts: max_attempts,
        })
    }

    /// Phase 2. `Ok(true)` when a quorum accepted `value` under `number`.
    pub async fn request_accept(
        &self,
        local: &Acceptor,
        generator: &mut ProposalNumberGenerator,
        number: ProposalNumber,
        value: &Value,
    ) -> Result<bool, PaxosError> {
        let own = local.accept(number, value.clone())?;
        let mut votes = usize::from(own.accepted);
        generator.observe(own.promised_number);

        let replies = self
            .fan_out(|peer| peer.client.accept(number, value.clone()))
            .await;
        for (peer, reply) in replies {
            match reply {
                Ok(reply) if reply.accepted => votes += 1,
                Ok(reply) => {
                    generator.observe(reply.promised_number);
                    debug!(
                        "Node {}: accept {} rejected by node {} (promised {})",
                        self.node_id,
                        number,
                        peer.node_id(),
                        reply.promised_number
                    );
                }
                Err(e) => self.events.warn(format!(
                    "Accept {} to node {} failed: {}",
                    number,
                    peer.node_id(),
                    e
                )),
            }
        }

        let reached = self.quorum.reached(votes);
        if reached {
            self.events.info(format!(
                "Accept {} acknowledged by {}/{} nodes",
                number,
                votes,
                self.peers.len() + 1
            ));
        } else {
            self.events.warn(format!(
                "Accept {} got {} of {} required votes",
                number,
                votes,
                self.quorum.size()
            ));
        }
        Ok(reached)
    }

    /// Phase 3, best effort. Returns how many peers acknowledged; the rest
    /// are logged and left to catch up on a later prepare.
    pub async fn broadcast_commit(&self, value: &Value) -> usize {
        let replies = self
            .fan_out(|peer| peer.client.commit_notify(value.clone()))
            .await;
        let mut acked = 0;
        for (peer, reply) in replies {
            match reply {
                Ok(()) => acked += 1,
                Err(e) => self.events.error(format!(
                    "Node{} exception occurred during commit: {}",
                    peer.node_id(),
                    e
                )),
            }
        }
        acked
    }

    /// Issues one call per peer concurrently. Each call is bounded by the
    /// RPC timeout, so the slowest responding peer bounds the whole phase.
    async fn fan_out<'a, T, F, Fut>(&'a self, call: F) -> Vec<(&'a Peer, Result<T, PaxosError>)>
    where
        F: Fn(&'a Peer) -> Fut,
        Fut: Future<Output = Result<T, PaxosError>> + 'a,
    {
        let timeout = self.settings.rpc_timeout;
        let calls = self.peers.iter().map(|peer| {
            let request = call(peer);
            async move {
                let result = match tokio::time::timeout(timeout, request).await {
                    Ok(result) => result,
                    Err(_) => Err(PaxosError::Timeout {
                        node_id: peer.node_id(),
                        timeout,
                    }),
                };
                (peer, result)
            }
        });
        join_all(calls).await
    }

    async fn backoff(&self, attempt: u32) {
        let max_ms = self.settings.retry_backoff.as_millis() as u64 * u64::from(attempt);
        if max_ms == 0 {
            return;
        }
        let delay = rand::rng().random_range(0..=max_ms);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}
