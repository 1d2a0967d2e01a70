use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::error::PaxosError;
use crate::network::messages::{Request, Response};
use crate::node::Node;

/// Accepts connections until the listener fails, one task per connection.
pub async fn serve(listener: TcpListener, node: Arc<Node>) -> Result<(), PaxosError> {
    info!(
        "Node {} listening on {}",
        node.id(),
        listener.local_addr()?
    );
    loop {
        let (stream, remote) = listener.accept().await?;
        debug!("Node {}: connection from {}", node.id(), remote);
        let node = Arc::clone(&node);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, &node).await {
                warn!("Node {}: error handling connection from {}: {}", node.id(), remote, e);
            }
        });
    }
}

/// Answers every request line on the connection until the peer hangs up.
async fn handle_connection(stream: TcpStream, node: &Node) -> Result<(), PaxosError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => node.handle(request).await,
            Err(e) => {
                warn!("Node {}: malformed request {:?}: {}", node.id(), line, e);
                Response::Error {
                    message: format!("malformed request: {}", e),
                }
            }
        };
        let mut reply = serde_json::to_string(&response)?;
        reply.push('\n');
        write_half.write_all(reply.as_bytes()).await?;
        write_half.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NodeLogger;
    use crate::paxos::PeerDescriptor;
    use crate::paxos::acceptor::Acceptor;
    use crate::paxos::proposer::ProposerSettings;
    use crate::storage::ValueStore;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn malformed_request_gets_error_response() {
        let dir = TempDir::new().unwrap();
        let node = Arc::new(Node::from_parts(
            PeerDescriptor::new(1, "127.0.0.1", 0),
            Acceptor::in_memory(1),
            ValueStore::new(dir.path().join("value")),
            Vec::new(),
            ProposerSettings::default(),
            NodeLogger::console(1),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, node));

        let mut stream = TcpStream::connect(address).await.unwrap();
        stream
            .write_all(b"PROPOSE hello\n{\"type\":\"read_value\"}\n")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        let replies: Vec<Response> = raw
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0], Response::Error { .. }));
        assert_eq!(replies[1], Response::Value { value: None });
    }
}
