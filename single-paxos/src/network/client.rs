use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::PaxosError;
use crate::network::messages::{Request, Response};
use crate::paxos::{AcceptorClient, PeerDescriptor};

/// Reaches a peer over TCP, one connection per request.
#[derive(Debug, Clone)]
pub struct TcpAcceptorClient {
    peer: PeerDescriptor,
    timeout: Duration,
}

impl TcpAcceptorClient {
    pub fn new(peer: PeerDescriptor, timeout: Duration) -> Self {
        TcpAcceptorClient { peer, timeout }
    }
}

#[async_trait]
impl AcceptorClient for TcpAcceptorClient {
    async fn call(&self, request: Request) -> Result<Response, PaxosError> {
        let node_id = self.peer.node_id;
        let address = self.peer.address();
        debug!("Sending {} to node {} at {}", request.name(), node_id, address);

        let exchange = async {
            let stream = TcpStream::connect(&address)
                .await
                .map_err(|_| PaxosError::Unreachable(node_id))?;
            exchange(stream, &request).await
        };
        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(Some(response))) => Ok(response),
            Ok(Ok(None)) => Err(PaxosError::ConnectionClosed { node_id }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(PaxosError::Timeout {
                node_id,
                timeout: self.timeout,
            }),
        }
    }
}

/// Sends one request to `address` and waits for the reply. Used by the
/// command line client, which knows an address but no node id.
pub async fn send_request(
    address: &str,
    request: &Request,
    timeout: Duration,
) -> Result<Response, PaxosError> {
    let exchange = async {
        let stream = TcpStream::connect(address).await?;
        exchange(stream, request).await
    };
    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(Some(response))) => Ok(response),
        Ok(Ok(None)) => Err(PaxosError::Remote(format!(
            "{} closed the connection without replying",
            address
        ))),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(PaxosError::Remote(format!(
            "{} did not answer within {:?}",
            address, timeout
        ))),
    }
}

/// Writes `request` as one JSON line and reads one line back. `None` when
/// the peer hung up first.
async fn exchange(stream: TcpStream, request: &Request) -> Result<Option<Response>, PaxosError> {
    let (read_half, mut write_half) = stream.into_split();

    let mut line = serde_json::to_string(request)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;
    write_half.flush().await?;

    let mut reader = BufReader::new(read_half);
    let mut reply = String::new();
    if reader.read_line(&mut reply).await? == 0 {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(reply.trim_end())?))
}
