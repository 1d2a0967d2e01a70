use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use yaml_rust::{Yaml, YamlLoader};

use crate::error::PaxosError;
use crate::paxos::proposer::ProposerSettings;
use crate::paxos::{NodeId, PeerDescriptor};

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub rpc_timeout_ms: u64,
    pub max_propose_attempts: u32,
    pub max_accept_attempts: u32,
    pub retry_backoff_ms: u64,
    /// When false, ballot state lives only in memory and is lost on restart.
    pub persistent_ballots: bool,
    pub data_dir: PathBuf,
    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            rpc_timeout_ms: 2000,
            max_propose_attempts: 10,
            max_accept_attempts: 5,
            retry_backoff_ms: 50,
            persistent_ballots: true,
            data_dir: PathBuf::from("state"),
            log_level: "info".to_string(),
        }
    }
}

impl RunConfig {
    pub fn proposer_settings(&self) -> ProposerSettings {
        ProposerSettings {
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            max_propose_attempts: self.max_propose_attempts,
            max_accept_attempts: self.max_accept_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    /// Upper bound on one `update_value`: every accept attempt may need a
    /// full prepare phase with backoff, and the commit broadcast follows.
    pub fn update_deadline(&self) -> Duration {
        let rpc = self.rpc_timeout_ms;
        let prepares = u64::from(self.max_propose_attempts);
        let accepts = u64::from(self.max_accept_attempts);
        let backoff = self.retry_backoff_ms.saturating_mul(prepares * (prepares + 1) / 2);
        let prepare_phase = prepares.saturating_mul(rpc).saturating_add(backoff);
        let rounds = accepts.saturating_mul(prepare_phase.saturating_add(rpc));
        Duration::from_millis(rounds.saturating_add(rpc))
    }
}

/// The whole cluster as described by the config file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    pub nodes: Vec<PeerDescriptor>,
    pub run_config: RunConfig,
}

/// One node's view: itself and everybody else.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub node: PeerDescriptor,
    pub remote_nodes: Vec<PeerDescriptor>,
    pub run_config: RunConfig,
}

impl ClusterConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PaxosError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| PaxosError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, PaxosError> {
        let docs =
            YamlLoader::load_from_str(text).map_err(|e| PaxosError::Config(e.to_string()))?;
        let doc = docs
            .first()
            .ok_or_else(|| PaxosError::Config("empty config".to_string()))?;

        let raw = doc["nodes"]
            .as_vec()
            .ok_or_else(|| PaxosError::Config("`nodes` must be a list".to_string()))?;

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(raw.len());
        for entry in raw {
            let node_id = entry["node_id"]
                .as_i64()
                .filter(|id| *id > 0)
                .ok_or_else(|| {
                    PaxosError::Config("`node_id` must be a positive integer".to_string())
                })? as NodeId;
            let host = entry["host"]
                .as_str()
                .ok_or_else(|| PaxosError::Config(format!("node {} has no `host`", node_id)))?
                .to_string();
            let port = entry["port"]
                .as_i64()
                .and_then(|port| u16::try_from(port).ok())
                .ok_or_else(|| {
                    PaxosError::Config(format!("node {} has no valid `port`", node_id))
                })?;
            if !seen.insert(node_id) {
                return Err(PaxosError::Config(format!("duplicate node_id {}", node_id)));
            }
            nodes.push(PeerDescriptor::new(node_id, host, port));
        }
        if nodes.is_empty() {
            return Err(PaxosError::Config("`nodes` is empty".to_string()));
        }

        let run_config = parse_run_config(&doc["run_config"])?;
        Ok(ClusterConfig { nodes, run_config })
    }

    /// Splits the cluster into `this_id` and its peers.
    pub fn for_node(&self, this_id: NodeId) -> Result<Config, PaxosError> {
        let node = self
            .nodes
            .iter()
            .find(|n| n.node_id == this_id)
            .ok_or_else(|| PaxosError::Config(format!("node_id {} missing", this_id)))?
            .clone();
        let remote_nodes = self
            .nodes
            .iter()
            .filter(|n| n.node_id != this_id)
            .cloned()
            .collect();
        Ok(Config {
            node,
            remote_nodes,
            run_config: self.run_config.clone(),
        })
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P, this_id: NodeId) -> Result<Self, PaxosError> {
        ClusterConfig::load(path)?.for_node(this_id)
    }
}

fn parse_run_config(r: &Yaml) -> Result<RunConfig, PaxosError> {
    let mut config = RunConfig::default();
    if r.is_badvalue() || r.is_null() {
        return Ok(config);
    }

    if let Some(v) = int_field(r, "rpc_timeout_ms")? {
        config.rpc_timeout_ms = v;
    }
    if let Some(v) = int_field(r, "max_propose_attempts")? {
        config.max_propose_attempts = attempts(v, "max_propose_attempts")?;
    }
    if let Some(v) = int_field(r, "max_accept_attempts")? {
        config.max_accept_attempts = attempts(v, "max_accept_attempts")?;
    }
    if let Some(v) = int_field(r, "retry_backoff_ms")? {
        config.retry_backoff_ms = v;
    }
    match &r["persistent_ballots"] {
        Yaml::BadValue => {}
        Yaml::Boolean(b) => config.persistent_ballots = *b,
        _ => {
            return Err(PaxosError::Config(
                "`persistent_ballots` must be a boolean".to_string(),
            ));
        }
    }
    if let Some(dir) = r["data_dir"].as_str() {
        config.data_dir = PathBuf::from(dir);
    }
    if let Some(level) = r["log_level"].as_str() {
        config.log_level = level.to_string();
    }
    Ok(config)
}

fn int_field(r: &Yaml, key: &str) -> Result<Option<u64>, PaxosError> {
    match &r[key] {
        Yaml::BadValue => Ok(None),
        Yaml::Integer(i) if *i >= 0 => Ok(Some(*i as u64)),
        _ => Err(PaxosError::Config(format!(
            "`{}` must be a non-negative integer",
            key
        ))),
    }
}

fn attempts(v: u64, key: &str) -> Result<u32, PaxosError> {
    u32::try_from(v)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| PaxosError::Config(format!("`{}` must be at least 1", key)))
}
