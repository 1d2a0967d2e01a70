use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::debug;

use crate::config::RunConfig;
use crate::error::{PaxosError, Phase};
use crate::logger::NodeLogger;
use crate::network::messages::{Request, Response, UpdateStatus};
use crate::paxos::acceptor::{Acceptor, BallotState};
use crate::paxos::ballot::{ProposalNumber, ProposalNumberGenerator};
use crate::paxos::proposer::{Candidate, Proposer, ProposerSettings};
use crate::paxos::value::Value;
use crate::paxos::{NodeId, Peer, PeerDescriptor};
use crate::storage::{NodeDir, ValueStore};

/// Where the node's proposer role is in its current (or last) update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProposalState {
    Idle,
    Proposing,
    Accepting,
    Committed,
    Failed,
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProposalState::Idle => "Idle",
            ProposalState::Proposing => "Proposing",
            ProposalState::Accepting => "Accepting",
            ProposalState::Committed => "Committed",
            ProposalState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful `update_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed {
    pub number: ProposalNumber,
    /// The agreed value. Differs from the requested one when an earlier
    /// accepted value had to be adopted.
    pub value: Value,
    pub adopted_from: Option<ProposalNumber>,
    /// Peers that acknowledged the commit broadcast.
    pub acknowledged_by: usize,
}

/// A cluster member: acceptor, proposer and the durable value file.
pub struct Node {
    descriptor: PeerDescriptor,
    acceptor: Acceptor,
    proposer: Proposer,
    store: ValueStore,
    events: NodeLogger,
    // Held for a whole update_value, so one node runs one proposal at a time.
    generator: tokio::sync::Mutex<ProposalNumberGenerator>,
    state: Mutex<ProposalState>,
}

impl Node {
    /// Opens (or creates) the node's directory under `config.data_dir`.
    pub fn open(
        descriptor: PeerDescriptor,
        config: &RunConfig,
        peers: Vec<Peer>,
    ) -> Result<Self, PaxosError> {
        let node_id = descriptor.node_id;
        let dir = NodeDir::create(&config.data_dir, node_id)?;
        let events = NodeLogger::open(node_id, &dir.event_log_path())?;
        let acceptor = if config.persistent_ballots {
            Acceptor::open(node_id, dir.ballot_log_path())?
        } else {
            Acceptor::in_memory(node_id)
        };
        let store = ValueStore::new(dir.value_path());
        events.info(format!(
            "Node {} starting at {}:{} with {} peers",
            node_id,
            descriptor.host,
            descriptor.port,
            peers.len()
        ));
        Ok(Self::from_parts(
            descriptor,
            acceptor,
            store,
            peers,
            config.proposer_settings(),
            events,
        ))
    }

    pub fn from_parts(
        descriptor: PeerDescriptor,
        acceptor: Acceptor,
        store: ValueStore,
        peers: Vec<Peer>,
        settings: ProposerSettings,
        events: NodeLogger,
    ) -> Self {
        let node_id = descriptor.node_id;
        Node {
            proposer: Proposer::new(node_id, peers, settings, events.clone()),
            generator: tokio::sync::Mutex::new(ProposalNumberGenerator::new(node_id)),
            state: Mutex::new(ProposalState::Idle),
            descriptor,
            acceptor,
            store,
            events,
        }
    }

    pub fn id(&self) -> NodeId {
        self.descriptor.node_id
    }

    pub fn ballot_state(&self) -> BallotState {
        self.acceptor.state()
    }

    pub fn proposal_state(&self) -> ProposalState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The durable value, `None` until something has been committed here.
    pub fn read_value(&self) -> Result<Option<Value>, PaxosError> {
        self.store.read()
    }

    /// Runs prepare, accept and commit until `value` (or a value that was
    /// already accepted somewhere) is chosen, or the attempts run out.
    pub async fn update_value(&self, value: Value) -> Result<Committed, PaxosError> {
        let mut generator = self.generator.lock().await;
        self.events.info(format!("Received update_value('{}')", value));

        let result = self.run_rounds(&mut generator, value).await;
        if let Err(e) = &result {
            self.transition(ProposalState::Failed);
            self.events.error(format!(
                "Failed to update value after maximum attempts. ({})",
                e
            ));
        }
        result
    }

    async fn run_rounds(
        &self,
        generator: &mut ProposalNumberGenerator,
        value: Value,
    ) -> Result<Committed, PaxosError> {
        let mut candidate = Candidate::new(value);
        let decided = match self.store.read() {
            Ok(decided) => decided,
            Err(e) => {
                self.events
                    .warn(format!("Could not read value file, proposing without it: {}", e));
                None
            }
        };

        self.transition(ProposalState::Proposing);
        let mut number = self
            .proposer
            .propose(&self.acceptor, generator, &mut candidate, decided.as_ref())
            .await?;

        let max_attempts = self.proposer.settings().max_accept_attempts;
        for attempt in 1..=max_attempts {
            self.transition(ProposalState::Accepting);
            if self
                .proposer
                .request_accept(&self.acceptor, generator, number, candidate.value())
                .await?
            {
                return Ok(self.commit(number, &candidate).await);
            }
            if attempt == max_attempts {
                break;
            }

            self.events.warn(format!(
                "Accept-phase failed (attempt {}/{}). Trying to propose again...",
                attempt, max_attempts
            ));
            self.transition(ProposalState::Proposing);
            number = self
                .proposer
                .propose(&self.acceptor, generator, &mut candidate, decided.as_ref())
                .await?;
        }
        Err(PaxosError::QuorumNotReached {
            phase: Phase::Accept,
            attempts: max_attempts,
        })
    }

    async fn commit(&self, number: ProposalNumber, candidate: &Candidate) -> Committed {
        let value = candidate.value().clone();
        // A failed write leaves the durable copy stale; peers still learn it.
        if let Err(e) = self.store.write(&value) {
            self.events.error(format!(
                "Failed to write value file {}: {}",
                self.store.path().display(),
                e
            ));
        }
        let acknowledged_by = self.proposer.broadcast_commit(&value).await;
        self.transition(ProposalState::Committed);
        self.events.info(format!(
            "Value '{}' committed under {} ({}/{} peers acknowledged)",
            value,
            number,
            acknowledged_by,
            self.proposer.peers().len()
        ));
        Committed {
            number,
            value,
            adopted_from: candidate.adopted_from(),
            acknowledged_by,
        }
    }

    /// Stores a value chosen by another node's proposer.
    pub fn commit_notify(&self, value: &Value) -> Result<(), PaxosError> {
        self.store.write(value)?;
        self.events
            .info(format!("Received commit of value '{}'", value));
        Ok(())
    }

    /// Writes a value piggybacked on a prepare, unless one is already stored.
    fn catch_up(&self, decided: &Value) {
        match self.store.read() {
            Ok(None) => match self.store.write(decided) {
                Ok(()) => self
                    .events
                    .info(format!("Caught up on decided value '{}'", decided)),
                Err(e) => self
                    .events
                    .error(format!("Failed to store decided value: {}", e)),
            },
            Ok(Some(current)) if &current != decided => self.events.error(format!(
                "Stored value '{}' disagrees with decided value '{}'",
                current, decided
            )),
            Ok(Some(_)) => {}
            Err(e) => self
                .events
                .error(format!("Could not read value file during catch-up: {}", e)),
        }
    }

    /// Answers one request from a peer or a client.
    pub async fn handle(&self, request: Request) -> Response {
        debug!("Node {}: handling {}", self.id(), request.name());
        match request {
            Request::Prepare { number, decided } => {
                if let Some(decided) = decided {
                    self.catch_up(&decided);
                }
                match self.acceptor.prepare(number) {
                    Ok(promise) => Response::Promise(promise),
                    Err(e) => self.failure("prepare", e),
                }
            }
            Request::Accept { number, value } => match self.acceptor.accept(number, value) {
                Ok(reply) => Response::Accepted(reply),
                Err(e) => self.failure("accept", e),
            },
            Request::CommitNotify { value } => match self.commit_notify(&value) {
                Ok(()) => Response::Ack,
                Err(e) => self.failure("commit_notify", e),
            },
            Request::UpdateValue { value } => {
                let status = match self.update_value(value).await {
                    Ok(_) => UpdateStatus::Success,
                    Err(_) => UpdateStatus::Failed,
                };
                Response::Updated { status }
            }
            Request::ReadValue => match self.read_value() {
                Ok(value) => Response::Value { value },
                Err(e) => self.failure("read_value", e),
            },
        }
    }

    fn failure(&self, request: &str, error: PaxosError) -> Response {
        self.events
            .error(format!("Handling {} failed: {}", request, error));
        Response::Error {
            message: error.to_string(),
        }
    }

    fn transition(&self, next: ProposalState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            self.events.info(format!("State {} -> {}", *state, next));
            *state = next;
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("descriptor", &self.descriptor)
            .field("state", &self.proposal_state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::testing::{ScriptedClient, peers_with, settings};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn number(round: u64, node_id: NodeId) -> ProposalNumber {
        ProposalNumber::new(round, node_id)
    }

    fn node_with(acceptor: Acceptor, clients: &[Arc<ScriptedClient>]) -> (Node, TempDir) {
        let dir = TempDir::new().unwrap();
        let node = Node::from_parts(
            PeerDescriptor::new(1, "localhost", 8001),
            acceptor,
            ValueStore::new(dir.path().join("value")),
            peers_with(clients),
            settings(),
            NodeLogger::console(1),
        );
        (node, dir)
    }

    #[tokio::test]
    async fn update_value_without_previous_data() {
        let client = Arc::new(ScriptedClient::promising(None));
        let (node, _dir) = node_with(Acceptor::in_memory(1), &[client.clone(), client.clone()]);
        assert_eq!(node.proposal_state(), ProposalState::Idle);

        let committed = node.update_value(Value::from("UpdatedData")).await.unwrap();

        assert_eq!(committed.value, Value::from("UpdatedData"));
        assert_eq!(committed.number, number(1, 1));
        assert_eq!(committed.adopted_from, None);
        assert_eq!(committed.acknowledged_by, 2);
        assert_eq!(node.proposal_state(), ProposalState::Committed);
        assert_eq!(node.read_value().unwrap(), Some(Value::from("UpdatedData")));

        let ballots = node.ballot_state();
        assert_eq!(ballots.promised, number(1, 1));
        assert_eq!(ballots.accepted, number(1, 1));
        assert_eq!(client.committed().len(), 2);
    }

    #[tokio::test]
    async fn update_value_keeps_previously_accepted_data() {
        let earlier = BallotState {
            promised: number(3, 2),
            accepted: number(3, 2),
            accepted_value: Some(Value::from("AcceptedData")),
        };
        let client = Arc::new(ScriptedClient::promising(None));
        let (node, _dir) = node_with(Acceptor::with_state(1, earlier), &[client.clone(), client]);

        let committed = node.update_value(Value::from("UpdatedData")).await.unwrap();

        assert_eq!(committed.value, Value::from("AcceptedData"));
        assert_eq!(committed.adopted_from, Some(number(3, 2)));
        assert_eq!(committed.number, number(4, 1), "must outbid the earlier promise");
        assert_eq!(node.read_value().unwrap(), Some(Value::from("AcceptedData")));
    }

    #[tokio::test]
    async fn update_value_fails_when_peers_are_down() {
        let down = [
            Arc::new(ScriptedClient::unreachable(2)),
            Arc::new(ScriptedClient::unreachable(3)),
        ];
        let (node, _dir) = node_with(Acceptor::in_memory(1), &down);

        let result = node.update_value(Value::from("v")).await;

        assert!(matches!(
            result,
            Err(PaxosError::QuorumNotReached {
                phase: Phase::Prepare,
                attempts: 3
            })
        ));
        assert_eq!(node.proposal_state(), ProposalState::Failed);
        assert_eq!(node.read_value().unwrap(), None, "nothing was committed");
    }

    #[tokio::test]
    async fn accept_phase_exhaustion_reports_accept() {
        let fickle = Arc::new(ScriptedClient::fickle(number(50, 3)));
        let (node, _dir) = node_with(Acceptor::in_memory(1), &[fickle.clone(), fickle.clone()]);

        let result = node.update_value(Value::from("v")).await;

        assert!(matches!(
            result,
            Err(PaxosError::QuorumNotReached {
                phase: Phase::Accept,
                attempts: 2
            })
        ));
        // One prepare per accept attempt, on both peers.
        assert_eq!(fickle.prepare_calls(), 4);
        assert_eq!(fickle.accept_calls(), 4);
        assert!(fickle.committed().is_empty());
    }

    #[tokio::test]
    async fn concurrent_updates_on_one_node_agree() {
        let client = Arc::new(ScriptedClient::promising(None));
        let (node, _dir) = node_with(Acceptor::in_memory(1), &[client.clone(), client]);

        let (a, b) = tokio::join!(
            node.update_value(Value::from("first")),
            node.update_value(Value::from("second"))
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.value, b.value, "the second update adopts the first");
        assert_ne!(a.number, b.number);
    }

    #[tokio::test]
    async fn prepare_with_decided_value_catches_up() {
        let (node, _dir) = node_with(Acceptor::in_memory(1), &[]);

        let response = node
            .handle(Request::Prepare {
                number: number(1, 2),
                decided: Some(Value::from("agreed")),
            })
            .await;

        assert!(matches!(response, Response::Promise(ref p) if p.promised));
        assert_eq!(node.read_value().unwrap(), Some(Value::from("agreed")));

        // An already stored value is left alone.
        node.handle(Request::Prepare {
            number: number(2, 3),
            decided: Some(Value::from("other")),
        })
        .await;
        assert_eq!(node.read_value().unwrap(), Some(Value::from("agreed")));
    }

    #[tokio::test]
    async fn handle_dispatches_every_request() {
        let client = Arc::new(ScriptedClient::promising(None));
        let (node, _dir) = node_with(Acceptor::in_memory(1), &[client.clone(), client]);

        assert_eq!(
            node.handle(Request::ReadValue).await,
            Response::Value { value: None }
        );
        assert_eq!(
            node.handle(Request::CommitNotify {
                value: Value::from("message_a")
            })
            .await,
            Response::Ack
        );
        assert_eq!(
            node.handle(Request::ReadValue).await,
            Response::Value {
                value: Some(Value::from("message_a"))
            }
        );

        let accepted = node
            .handle(Request::Accept {
                number: number(1, 2),
                value: Value::from("message_a"),
            })
            .await;
        assert!(matches!(accepted, Response::Accepted(ref r) if r.accepted));

        assert_eq!(
            node.handle(Request::UpdateValue {
                value: Value::from("message_b")
            })
            .await,
            Response::Updated {
                status: UpdateStatus::Success
            }
        );
        assert_eq!(
            node.read_value().unwrap(),
            Some(Value::from("message_a")),
            "accepted value must win over the new request"
        );
    }

    #[tokio::test]
    async fn open_lays_out_node_directory() {
        let data = TempDir::new().unwrap();
        let config = RunConfig {
            data_dir: data.path().to_path_buf(),
            ..RunConfig::default()
        };

        let descriptor = PeerDescriptor::new(4, "localhost", 8004);
        let node = Node::open(descriptor.clone(), &config, Vec::new()).unwrap();
        node.handle(Request::Prepare {
            number: number(7, 5),
            decided: None,
        })
        .await;
        drop(node);

        let root = data.path().join("node4");
        assert!(root.join("ballots.log").exists());
        assert!(root.join("node4.log").exists());

        let reopened = Node::open(descriptor, &config, Vec::new()).unwrap();
        assert_eq!(reopened.ballot_state().promised, number(7, 5));
    }
}
