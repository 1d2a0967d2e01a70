use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PaxosError;
use crate::paxos::acceptor::{AcceptReply, Promise};
use crate::paxos::ballot::ProposalNumber;
use crate::paxos::value::Value;

/// Everything a node can be asked, one JSON object per line on the wire.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // Phase 1. `decided` carries the proposer's committed value, if any,
    // so an acceptor that missed the commit broadcast can catch up.
    Prepare {
        number: ProposalNumber,
        #[serde(default)]
        decided: Option<Value>,
    },
    // Phase 2.
    Accept {
        number: ProposalNumber,
        value: Value,
    },
    // Phase 3: the agreed value, to be written to the peer's value file.
    CommitNotify {
        value: Value,
    },
    // Client-facing.
    UpdateValue {
        value: Value,
    },
    ReadValue,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Prepare { .. } => "prepare",
            Request::Accept { .. } => "accept",
            Request::CommitNotify { .. } => "commit_notify",
            Request::UpdateValue { .. } => "update_value",
            Request::ReadValue => "read_value",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Promise(Promise),
    Accepted(AcceptReply),
    Ack,
    Updated { status: UpdateStatus },
    Value { value: Option<Value> },
    Error { message: String },
}

impl Response {
    /// Turns a response that does not answer `request` into an error.
    pub fn into_error(self, request: &'static str) -> PaxosError {
        match self {
            Response::Error { message } => PaxosError::Remote(message),
            other => PaxosError::UnexpectedResponse {
                request,
                response: format!("{:?}", other),
            },
        }
    }
}

/// What `update_value` reports to a client.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Success,
    Failed,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::Success => write!(f, "Success"),
            UpdateStatus::Failed => write!(f, "Failed"),
        }
    }
}
