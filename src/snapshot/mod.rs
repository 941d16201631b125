//! MRDB snapshot persistence.
//!
//! A snapshot is a point-in-time serialization of every live key to a file,
//! restored later by LOAD. The format is private to this implementation;
//! the only promises are that it round-trips keys, kinds, exact value bytes
//! and expiration deadlines, and that SAVE replaces the target atomically.
//!
//! ## Format
//!
//! ```text
//! "MRDB\0"  version:u8  record*  0xFF
//!
//! record  = kind:u8 (0x01 string, 0x02 list)
//!           key_len:u32le  key bytes
//!           ttl_flag:u8  [expires_at:i64le when flag = 1]
//!           payload
//! payload = len:u32le bytes                      (string)
//!         | count:u32le (len:u32le bytes)*       (list)
//! ```
//!
//! Deadlines are absolute unix milliseconds, so remaining TTLs survive the
//! round-trip exactly.
//!
//! ## Atomicity
//!
//! SAVE writes a sibling `.tmp` file, syncs it, then renames it over the
//! target; a failure anywhere before the rename leaves the target
//! untouched. LOAD stages the whole file into a fresh keyspace and only
//! swaps it in after the last record parsed.

use crate::storage::{Entry, StorageEngine, Value};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Where SAVE and LOAD go when the client names no path, relative to the
/// server's working directory.
pub const DEFAULT_SNAPSHOT_PATH: &str = "dump.mrdb";

const MAGIC: &[u8; 5] = b"MRDB\x00";
const VERSION: u8 = 1;

const KIND_STRING: u8 = 0x01;
const KIND_LIST: u8 = 0x02;
const KIND_END: u8 = 0xFF;

/// Upper bound on any length field; larger values can only come from a
/// corrupt or foreign file.
const MAX_FIELD_LEN: u32 = 512 * 1024 * 1024;

/// Snapshot failures. The `Display` text becomes the detail of the
/// `ERR save failed: ...` / `ERR load failed: ...` replies.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("cannot open file '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Io(#[from] io::Error),

    #[error("not a snapshot file (bad magic)")]
    BadMagic,

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),

    #[error("corrupt snapshot: unknown record kind {0:#04x}")]
    UnknownRecordKind(u8),

    #[error("corrupt snapshot: oversized field")]
    OversizedField,

    #[error("corrupt snapshot: truncated")]
    Truncated,
}

/// Serializes every live key to `path`, replacing it atomically.
pub fn save(engine: &StorageEngine, path: &Path) -> Result<(), SnapshotError> {
    let tmp = sibling_tmp(path);
    let file = File::create(&tmp).map_err(|source| SnapshotError::Open {
        path: tmp.display().to_string(),
        source,
    })?;
    let mut writer = BufWriter::new(file);

    let result = write_snapshot(engine, &mut writer)
        .and_then(|()| writer.flush().map_err(SnapshotError::Io))
        .and_then(|()| writer.get_ref().sync_all().map_err(SnapshotError::Io))
        .and_then(|()| fs::rename(&tmp, path).map_err(SnapshotError::Io));

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Replaces the entire keyspace with the contents of `path`.
///
/// The file is parsed fully into a staging keyspace first; on any error the
/// current keyspace is left untouched.
pub fn load(engine: &StorageEngine, path: &Path) -> Result<(), SnapshotError> {
    let file = File::open(path).map_err(|source| SnapshotError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let staged = read_snapshot(&mut BufReader::new(file))?;
    engine.replace_all(staged);
    Ok(())
}

fn write_snapshot<W: Write>(engine: &StorageEngine, w: &mut W) -> Result<(), SnapshotError> {
    w.write_all(MAGIC)?;
    w.write_u8(VERSION)?;

    // for_each_live holds the keyspace read lock across the whole scan, so
    // the records form one consistent view.
    let mut failure = None;
    engine.for_each_live(|key, entry| {
        if failure.is_none() {
            if let Err(e) = write_record(w, key, entry) {
                failure = Some(e);
            }
        }
    });
    if let Some(e) = failure {
        return Err(SnapshotError::Io(e));
    }

    w.write_u8(KIND_END)?;
    Ok(())
}

fn write_record<W: Write>(w: &mut W, key: &[u8], entry: &Entry) -> io::Result<()> {
    let kind = match &entry.value {
        Value::Str(_) => KIND_STRING,
        Value::List(_) => KIND_LIST,
    };
    w.write_u8(kind)?;
    write_field(w, key)?;

    match entry.expires_at {
        Some(at) => {
            w.write_u8(1)?;
            w.write_i64::<LittleEndian>(at)?;
        }
        None => w.write_u8(0)?,
    }

    match &entry.value {
        Value::Str(data) => write_field(w, data)?,
        Value::List(items) => {
            w.write_u32::<LittleEndian>(items.len() as u32)?;
            for item in items {
                write_field(w, item)?;
            }
        }
    }
    Ok(())
}

fn write_field<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(data.len() as u32)?;
    w.write_all(data)
}

fn read_snapshot<R: Read>(r: &mut R) -> Result<HashMap<Bytes, Entry>, SnapshotError> {
    let mut magic = [0u8; 5];
    r.read_exact(&mut magic).map_err(read_err)?;
    if &magic != MAGIC {
        return Err(SnapshotError::BadMagic);
    }

    let version = r.read_u8().map_err(read_err)?;
    if version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let mut staged = HashMap::new();
    loop {
        let kind = r.read_u8().map_err(read_err)?;
        if kind == KIND_END {
            break;
        }

        let key = read_field(r)?;
        let expires_at = match r.read_u8().map_err(read_err)? {
            0 => None,
            _ => Some(r.read_i64::<LittleEndian>().map_err(read_err)?),
        };

        let value = match kind {
            KIND_STRING => Value::Str(read_field(r)?),
            KIND_LIST => {
                let count = r.read_u32::<LittleEndian>().map_err(read_err)?;
                if count > MAX_FIELD_LEN {
                    return Err(SnapshotError::OversizedField);
                }
                let mut items = VecDeque::with_capacity(count.min(1024) as usize);
                for _ in 0..count {
                    items.push_back(read_field(r)?);
                }
                Value::List(items)
            }
            other => return Err(SnapshotError::UnknownRecordKind(other)),
        };

        // a list entry is never empty; an empty record can only come from a
        // foreign writer, so drop it rather than violate the invariant
        if let Value::List(items) = &value {
            if items.is_empty() {
                continue;
            }
        }
        staged.insert(key, Entry { value, expires_at });
    }

    Ok(staged)
}

fn read_field<R: Read>(r: &mut R) -> Result<Bytes, SnapshotError> {
    let len = r.read_u32::<LittleEndian>().map_err(read_err)?;
    if len > MAX_FIELD_LEN {
        return Err(SnapshotError::OversizedField);
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).map_err(read_err)?;
    Ok(Bytes::from(buf))
}

fn read_err(e: io::Error) -> SnapshotError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SnapshotError::Truncated
    } else {
        SnapshotError::Io(e)
    }
}

fn sibling_tmp(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}
