use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::{ClusterConfig, Config, RunConfig};
use crate::logger;
use crate::network::client::{TcpAcceptorClient, send_request};
use crate::network::messages::{Request, Response, UpdateStatus};
use crate::network::server::serve;
use crate::network::simulation::SimNetwork;
use crate::node::Node;
use crate::paxos::value::Value;
use crate::paxos::{NodeId, Peer, PeerDescriptor};

fn tcp_peers(remote_nodes: &[PeerDescriptor], run_config: &RunConfig) -> Vec<Peer> {
    remote_nodes
        .iter()
        .map(|remote| {
            let client = TcpAcceptorClient::new(remote.clone(), run_config.rpc_timeout());
            Peer::new(remote.clone(), Arc::new(client))
        })
        .collect()
}

async fn start_node(config: Config) -> anyhow::Result<(Arc<Node>, TcpListener)> {
    let peers = tcp_peers(&config.remote_nodes, &config.run_config);
    let node = Node::open(config.node.clone(), &config.run_config, peers)
        .with_context(|| format!("opening state of node {}", config.node.node_id))?;
    let listener = TcpListener::bind(config.node.address())
        .await
        .with_context(|| format!("binding {}", config.node.address()))?;
    Ok((Arc::new(node), listener))
}

/// Runs one node until Ctrl-C.
pub async fn run_node(node_id: NodeId, config_path: &Path) -> anyhow::Result<()> {
    let config = Config::load(config_path, node_id)?;
    logger::init_tracing_with(&config.run_config.log_level);
    info!(
        "Node {} @{} with peers [{}]",
        config.node.node_id,
        config.node.address(),
        config
            .remote_nodes
            .iter()
            .map(|n| n.address())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let (node, listener) = start_node(config).await?;
    tokio::select! {
        result = serve(listener, node) => result?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Node {} shutting down", node_id);
        }
    }
    Ok(())
}

/// Runs every configured node in this process until Ctrl-C.
pub async fn run_cluster(config_path: &Path) -> anyhow::Result<()> {
    let cluster = ClusterConfig::load(config_path)?;
    logger::init_tracing_with(&cluster.run_config.log_level);

    for member in &cluster.nodes {
        let config = cluster.for_node(member.node_id)?;
        let (node, listener) = start_node(config).await?;
        let node_id = member.node_id;
        tokio::spawn(async move {
            if let Err(e) = serve(listener, node).await {
                error!("Node {} stopped serving: {}", node_id, e);
            }
        });
    }
    info!("Cluster of {} nodes running, Ctrl-C to stop", cluster.nodes.len());

    tokio::signal::ctrl_c().await?;
    Ok(())
}

/// How long `propose` waits for a reply: the cluster's own worst case for
/// `update_value` plus one second, using the defaults when `config_path`
/// cannot be read.
pub fn propose_deadline(config_path: &Path) -> Duration {
    let run_config = match ClusterConfig::load(config_path) {
        Ok(cluster) => cluster.run_config,
        Err(e) => {
            debug!("Using default run config for the client deadline: {}", e);
            RunConfig::default()
        }
    };
    run_config.update_deadline() + Duration::from_secs(1)
}

/// Asks the node at `target` to run `update_value`.
pub async fn propose(
    target: &str,
    value: Value,
    timeout: Duration,
) -> anyhow::Result<UpdateStatus> {
    match send_request(target, &Request::UpdateValue { value }, timeout).await? {
        Response::Updated { status } => Ok(status),
        other => bail!(other.into_error("update_value")),
    }
}

/// Reads the durable value of the node at `target`.
pub async fn read(target: &str, timeout: Duration) -> anyhow::Result<Option<Value>> {
    match send_request(target, &Request::ReadValue, timeout).await? {
        Response::Value { value } => Ok(value),
        other => bail!(other.into_error("read_value")),
    }
}

#[derive(Debug)]
pub struct SimulationReport {
    /// Each proposer's requested value and whether its update succeeded.
    pub proposals: Vec<(NodeId, Value, UpdateStatus)>,
    /// Every node's durable value after the run.
    pub stored: Vec<(NodeId, Option<Value>)>,
}

/// Three nodes over the in-process network, with node `i + 1` proposing
/// `values[i]` concurrently.
pub async fn simulate(values: Vec<Value>, data_dir: PathBuf) -> anyhow::Result<SimulationReport> {
    let members: Vec<PeerDescriptor> = (1..=3)
        .map(|id| PeerDescriptor::new(id, "sim", 8000 + id as u16))
        .collect();
    if values.len() > members.len() {
        bail!("at most {} contending values are supported", members.len());
    }

    let run_config = RunConfig {
        data_dir,
        persistent_ballots: false,
        rpc_timeout_ms: 500,
        ..RunConfig::default()
    };
    let network = SimNetwork::new(1..=20);
    let nodes = network.start_nodes(&members, &run_config)?;

    let proposals = values.into_iter().zip(nodes.iter()).map(|(value, node)| {
        let node = Arc::clone(node);
        tokio::spawn(async move {
            let status = match node.update_value(value.clone()).await {
                Ok(_) => UpdateStatus::Success,
                Err(_) => UpdateStatus::Failed,
            };
            (node.id(), value, status)
        })
    });
    let mut report = SimulationReport {
        proposals: Vec::new(),
        stored: Vec::new(),
    };
    for joined in futures::future::join_all(proposals).await {
        report.proposals.push(joined?);
    }
    for node in &nodes {
        report.stored.push((node.id(), node.read_value()?));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn propose_deadline_follows_run_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            b"nodes:\n  - {node_id: 1, host: a, port: 1}\nrun_config:\n  max_accept_attempts: 1\n",
        )
        .unwrap();
        let config = RunConfig {
            max_accept_attempts: 1,
            ..RunConfig::default()
        };
        assert_eq!(
            propose_deadline(file.path()),
            config.update_deadline() + Duration::from_secs(1)
        );

        let missing = Path::new("/nonexistent/config.yaml");
        assert_eq!(
            propose_deadline(missing),
            RunConfig::default().update_deadline() + Duration::from_secs(1)
        );
    }
}
