use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, warn};

use crate::error::PaxosError;
use crate::paxos::NodeId;
use crate::paxos::acceptor::BallotState;
use crate::paxos::value::Value;

/// Files owned by one node, all under `<data_dir>/node<id>/`.
#[derive(Debug, Clone)]
pub struct NodeDir {
    root: PathBuf,
    node_id: NodeId,
}

impl NodeDir {
    pub fn create(data_dir: &Path, node_id: NodeId) -> Result<Self, PaxosError> {
        let root = data_dir.join(format!("node{}", node_id));
        fs::create_dir_all(&root)?;
        Ok(NodeDir { root, node_id })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn value_path(&self) -> PathBuf {
        self.root.join("value")
    }

    pub fn ballot_log_path(&self) -> PathBuf {
        self.root.join("ballots.log")
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.root.join(format!("node{}.log", self.node_id))
    }
}

/// The node's durable copy of the agreed value.
#[derive(Debug)]
pub struct ValueStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ValueStore {
    pub fn new(path: PathBuf) -> Self {
        ValueStore {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `None` until something has been committed.
    pub fn read(&self) -> Result<Option<Value>, PaxosError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(Value::new(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces the value atomically: temp file, fsync, rename.
    pub fn write(&self, value: &Value) -> Result<(), PaxosError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(
            "wrote {} bytes to {}",
            value.as_bytes().len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Append-only log of ballot state. Every record is a full `BallotState`,
/// so replay only needs the last complete one.
#[derive(Debug)]
pub struct BallotLog {
    path: PathBuf,
    file: File,
    /// End of the last record known to be complete on disk.
    len: u64,
    /// Set while a record may be partially written past `len`.
    torn: bool,
}

impl BallotLog {
    /// Opens (or creates) the log, returning the last recorded state. The
    /// file is compacted down to that single record.
    pub fn open(path: PathBuf) -> Result<(Self, Option<BallotState>), PaxosError> {
        let last = match fs::read(&path) {
            Ok(bytes) => decode_records(&bytes, &path)?.pop(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let tmp = path.with_extension("compact");
        {
            let mut file = File::create(&tmp)?;
            if let Some(state) = &last {
                file.write_all(&encode_record(state)?)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        let file = OpenOptions::new().append(true).open(&path)?;
        Ok((Self::from_file(path, file)?, last))
    }

    fn from_file(path: PathBuf, file: File) -> Result<Self, PaxosError> {
        let len = file.metadata()?.len();
        Ok(BallotLog {
            path,
            file,
            len,
            torn: false,
        })
    }

    /// Appends and syncs one record. Only returns once the data is on disk.
    /// A failed append is cut off again, so the next record starts right
    /// after the last complete one.
    pub fn append(&mut self, state: &BallotState) -> Result<(), PaxosError> {
        let record = encode_record(state)?;
        self.truncate_torn_tail()?;

        self.torn = true;
        if let Err(e) = self.write_record(&record) {
            if let Err(truncate) = self.truncate_torn_tail() {
                warn!(
                    "{}: cannot cut off failed record: {}",
                    self.path.display(),
                    truncate
                );
            }
            return Err(e);
        }
        self.torn = false;
        self.len += record.len() as u64;
        Ok(())
    }

    fn write_record(&mut self, record: &[u8]) -> Result<(), PaxosError> {
        self.file.write_all(record)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn truncate_torn_tail(&mut self) -> Result<(), PaxosError> {
        if self.torn {
            self.file.set_len(self.len)?;
            self.file.sync_data()?;
            self.torn = false;
        }
        Ok(())
    }
}

/// A log whose every write fails with `ENOSPC`.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn full_disk_log() -> BallotLog {
    let file = OpenOptions::new()
        .append(true)
        .open("/dev/full")
        .expect("/dev/full is writable");
    BallotLog {
        path: PathBuf::from("/dev/full"),
        file,
        len: 0,
        torn: false,
    }
}

fn encode_record(state: &BallotState) -> Result<Vec<u8>, PaxosError> {
    let body = serde_json::to_vec(state)?;
    let mut record = Vec::with_capacity(body.len() + 4);
    record.write_u32::<BigEndian>(body.len() as u32)?;
    record.extend_from_slice(&body);
    Ok(record)
}

fn decode_records(bytes: &[u8], path: &Path) -> Result<Vec<BallotState>, PaxosError> {
    let mut cursor = Cursor::new(bytes);
    let mut states = Vec::new();
    loop {
        let offset = cursor.position();
        let len = match cursor.read_u32::<BigEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                if offset < bytes.len() as u64 {
                    warn!("{}: dropping torn length at offset {}", path.display(), offset);
                }
                break;
            }
            Err(e) => return Err(e.into()),
        };
        let remaining = bytes.len() - cursor.position() as usize;
        let mut body = vec![0u8; len.min(remaining)];
        if len > remaining || cursor.read_exact(&mut body).is_err() {
            warn!(
                "{}: dropping torn record of {} bytes at offset {}",
                path.display(),
                len,
                offset
            );
            break;
        }
        let state = serde_json::from_slice(&body).map_err(|e| {
            PaxosError::CorruptLog(format!("{} at offset {}: {}", path.display(), offset, e))
        })?;
        states.push(state);
    }
    Ok(states)
}
