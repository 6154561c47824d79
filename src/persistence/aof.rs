//! Append-Only File
//!
//! The file is a plain sequence of RESP-encoded commands, so it can be
//! replayed through the normal command path. A rewrite emits one command per
//! live key:
//!
//! ```text
//! *3\r\n$3\r\nSET\r\n$4\r\nname\r\n$4\r\nAriz\r\n
//! *5\r\n$3\r\nSET\r\n$7\r\nsession\r\n$3\r\nabc\r\n$4\r\nPXAT\r\n$13\r\n1700000000000\r\n
//! ```
//!
//! Expiring keys carry their absolute deadline (`PXAT`), so time spent while
//! the server is down still counts against their TTL.

use crate::commands::{Command, CommandHandler};
use crate::persistence::{PersistenceError, SnapshotSink};
use crate::protocol::{RespParser, RespValue};
use crate::storage::{Object, Snapshot};
use bytes::{Bytes, BytesMut};
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Rewrites an append-only file in place.
///
/// Each rewrite goes to a sibling temporary file that is flushed, synced and
/// then renamed over the target. Readers therefore see either the old file or
/// the complete new one.
#[derive(Debug, Clone)]
pub struct AofFile {
    path: PathBuf,
}

impl AofFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "appendonly.aof".into());
        name.push(".rewrite.tmp");
        self.path.with_file_name(name)
    }

    fn write_to(&self, tmp: &Path, snapshot: &Snapshot) -> Result<u64, PersistenceError> {
        let mut writer = BufWriter::new(File::create(tmp)?);
        let mut buf = BytesMut::with_capacity(4096);
        let mut written = 0u64;

        for (key, object) in &snapshot.entries {
            buf.clear();
            rewrite_command(key, object).encode(&mut buf);
            writer.write_all(&buf)?;
            written += buf.len() as u64;
        }

        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(written)
    }
}

impl SnapshotSink for AofFile {
    fn write_snapshot(&self, snapshot: &Snapshot) -> Result<u64, PersistenceError> {
        let tmp = self.temp_path();

        let result = self
            .write_to(&tmp, snapshot)
            .and_then(|bytes| fs::rename(&tmp, &self.path).map(|_| bytes).map_err(Into::into));

        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}

/// The command that recreates `object` under `key`.
fn rewrite_command(key: &Bytes, object: &Object) -> RespValue {
    let mut parts = vec![
        Bytes::from_static(b"SET"),
        key.clone(),
        object.value.as_bytes().clone(),
    ];
    if let Some(at) = object.expires_at {
        parts.push(Bytes::from_static(b"PXAT"));
        parts.push(Bytes::from(at.to_string()));
    }
    RespValue::command(parts)
}

/// Replays the file at `path` through `handler`.
///
/// A missing file is an empty keyspace, not an error. Returns the number of
/// commands applied.
pub fn load_aof(path: &Path, handler: &CommandHandler) -> Result<usize, PersistenceError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "No append only file to load");
            return Ok(0);
        }
        Err(e) => return Err(e.into()),
    };

    let mut parser = RespParser::new();
    let mut offset = 0;
    let mut applied = 0;

    while offset < data.len() {
        let corrupt = |reason: String| PersistenceError::Corrupt { offset, reason };

        let (value, consumed) = parser
            .parse(&data[offset..])
            .map_err(|e| corrupt(e.to_string()))?
            .ok_or_else(|| corrupt("truncated command".to_string()))?;

        let command = Command::from_resp(value).map_err(|e| corrupt(e.to_string()))?;
        let reply = handler.execute(&command);
        if let RespValue::Error(msg) = reply {
            return Err(corrupt(format!("{} rejected: {}", command.name, msg)));
        }

        offset += consumed;
        applied += 1;
    }

    info!(path = %path.display(), commands = applied, "Append only file loaded");
    Ok(applied)
}
