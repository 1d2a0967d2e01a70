use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::PaxosError;
use crate::paxos::NodeId;
use crate::paxos::ballot::ProposalNumber;
use crate::paxos::value::Value;
use crate::storage::BallotLog;

/// What an acceptor remembers. `accepted <= promised` always holds, and
/// `accepted_value` is `None` exactly while `accepted` is still the seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BallotState {
    pub promised: ProposalNumber,
    pub accepted: ProposalNumber,
    pub accepted_value: Option<Value>,
}

impl BallotState {
    pub fn seed(node_id: NodeId) -> Self {
        BallotState {
            promised: ProposalNumber::seed(node_id),
            accepted: ProposalNumber::seed(node_id),
            accepted_value: None,
        }
    }
}

/// Reply to a prepare request. `accepted_number` and `accepted_value` are
/// the acceptor's state from before the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promise {
    pub promised: bool,
    pub promised_number: ProposalNumber,
    pub accepted_number: ProposalNumber,
    pub accepted_value: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptReply {
    pub accepted: bool,
    pub promised_number: ProposalNumber,
}

struct AcceptorInner {
    state: BallotState,
    log: Option<BallotLog>,
}

impl AcceptorInner {
    /// Write-ahead: the new state reaches the log before it is applied, so a
    /// failed append leaves the acceptor exactly as it was.
    fn commit(&mut self, next: BallotState) -> Result<(), PaxosError> {
        if let Some(log) = self.log.as_mut() {
            log.append(&next)?;
        }
        self.state = next;
        Ok(())
    }
}

/// The acceptor half of a node. All reads and writes of the ballot state go
/// through one mutex, which is never held across an await point.
pub struct Acceptor {
    node_id: NodeId,
    inner: Mutex<AcceptorInner>,
}

impl Acceptor {
    /// Ballot state that lives only as long as the process.
    pub fn in_memory(node_id: NodeId) -> Self {
        Self::with_state(node_id, BallotState::seed(node_id))
    }

    /// Ballot state backed by a write-ahead log, replayed on open.
    pub fn open(node_id: NodeId, log_path: PathBuf) -> Result<Self, PaxosError> {
        let (log, replayed) = BallotLog::open(log_path)?;
        let state = match replayed {
            Some(state) => {
                info!(
                    "Node {}: restored ballot state promised={} accepted={}",
                    node_id, state.promised, state.accepted
                );
                state
            }
            None => BallotState::seed(node_id),
        };
        Ok(Self::with_log(node_id, state, log))
    }

    pub fn with_state(node_id: NodeId, state: BallotState) -> Self {
        Acceptor {
            node_id,
            inner: Mutex::new(AcceptorInner { state, log: None }),
        }
    }

    pub(crate) fn with_log(node_id: NodeId, state: BallotState, log: BallotLog) -> Self {
        Acceptor {
            node_id,
            inner: Mutex::new(AcceptorInner {
                state,
                log: Some(log),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AcceptorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BallotState {
        self.lock().state.clone()
    }

    /// Promises not to accept anything numbered below `number`, if `number`
    /// is strictly above every earlier promise. Seed numbers are never
    /// promised.
    pub fn prepare(&self, number: ProposalNumber) -> Result<Promise, PaxosError> {
        let mut inner = self.lock();
        let current = inner.state.clone();

        if !number.is_seed() && number > current.promised {
            inner.commit(BallotState {
                promised: number,
                ..current.clone()
            })?;
            debug!("Node {}: promised {}", self.node_id, number);
            Ok(Promise {
                promised: true,
                promised_number: number,
                accepted_number: current.accepted,
                accepted_value: current.accepted_value,
            })
        } else {
            debug!(
                "Node {}: rejected prepare {} (already promised {})",
                self.node_id, number, current.promised
            );
            Ok(Promise {
                promised: false,
                promised_number: current.promised,
                accepted_number: current.accepted,
                accepted_value: current.accepted_value,
            })
        }
    }

    /// Accepts `value` under `number` unless a higher number was promised.
    /// Equal numbers pass so a proposer can accept with the number it just
    /// won prepare with.
    pub fn accept(&self, number: ProposalNumber, value: Value) -> Result<AcceptReply, PaxosError> {
        let mut inner = self.lock();
        let promised = inner.state.promised;

        if !number.is_seed() && number >= promised {
            inner.commit(BallotState {
                promised: number,
                accepted: number,
                accepted_value: Some(value),
            })?;
            debug!("Node {}: accepted {}", self.node_id, number);
            Ok(AcceptReply {
                accepted: true,
                promised_number: number,
            })
        } else {
            debug!(
                "Node {}: rejected accept {} (promised {})",
                self.node_id, number, promised
            );
            Ok(AcceptReply {
                accepted: false,
                promised_number: promised,
            })
        }
    }
}
