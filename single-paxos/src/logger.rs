use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{Level, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::PaxosError;
use crate::paxos::NodeId;

/// Installs the global subscriber. `RUST_LOG` wins over the configured
/// level. Safe to call more than once; later calls are ignored.
pub fn init_tracing_with(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// Per-node event log. Every entry goes to tracing, tagged with the node id,
/// and is appended to the node's own log file as
/// `MM/DD/YYYY HH:MM:SS: message`.
#[derive(Clone)]
pub struct NodeLogger {
    node_id: NodeId,
    file: Option<Arc<Mutex<File>>>,
}

impl NodeLogger {
    /// Opens `path` for appending; earlier runs' entries are kept.
    pub fn open(node_id: NodeId, path: &Path) -> Result<Self, PaxosError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(NodeLogger {
            node_id,
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// Tracing only, no file.
    pub fn console(node_id: NodeId) -> Self {
        NodeLogger {
            node_id,
            file: None,
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.log(Level::INFO, msg.as_ref());
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.log(Level::WARN, msg.as_ref());
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.log(Level::ERROR, msg.as_ref());
    }

    fn log(&self, level: Level, msg: &str) {
        if level == Level::ERROR {
            error!(node_id = self.node_id, "{}", msg);
        } else if level == Level::WARN {
            warn!(node_id = self.node_id, "{}", msg);
        } else {
            info!(node_id = self.node_id, "{}", msg);
        }

        if let Some(file) = &self.file {
            let line = format!(
                "{}: {}\n",
                chrono::Local::now().format("%m/%d/%Y %H:%M:%S"),
                msg
            );
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            // The event log is an observable side effect, never a reason to fail.
            let _ = file.write_all(line.as_bytes());
        }
    }
}
