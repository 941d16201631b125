//! The keyspace engine.
//!
//! One map owns every key. Each entry carries its value kind (string or
//! list) and an optional absolute expiration in unix milliseconds. All
//! semantic rules live here: lazy expiration, WRONGTYPE checks, strict
//! integer parsing, the SET option matrix, the EXPIRE condition matrix and
//! the list operations.
//!
//! ## Concurrency
//!
//! The whole keyspace sits behind a single `RwLock`, so every command is
//! atomic against every other and the snapshot engine can serialize a
//! consistent view under the read lock. Read-only commands take the read
//! lock and only upgrade to the write lock when they find an expired entry
//! to purge.
//!
//! ## Expiration
//!
//! An entry with `expires_at <= now` is logically absent: every accessor
//! treats it as missing and purges it before answering. The background
//! sweeper ([`crate::storage::expiry`]) reclaims entries nobody touches;
//! correctness never depends on it.

use crate::clock;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use thiserror::Error;

/// Semantic errors surfaced by keyspace operations.
///
/// The `Display` text is the full wire reply, prefix included, so handlers
/// can turn any of these into an error frame verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR no such key")]
    NoSuchKey,

    #[error("ERR index out of range")]
    IndexOutOfRange,
}

/// The payload of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
}

/// A stored value with its optional expiration deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: Value,
    /// Absolute deadline in unix milliseconds; `None` means the key never
    /// expires.
    pub expires_at: Option<i64>,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    #[inline]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }

    fn as_str(&self) -> Result<&Bytes, StoreError> {
        match &self.value {
            Value::Str(data) => Ok(data),
            Value::List(_) => Err(StoreError::WrongType),
        }
    }

    fn as_list(&self) -> Result<&VecDeque<Bytes>, StoreError> {
        match &self.value {
            Value::List(items) => Ok(items),
            Value::Str(_) => Err(StoreError::WrongType),
        }
    }

    fn as_list_mut(&mut self) -> Result<&mut VecDeque<Bytes>, StoreError> {
        match &mut self.value {
            Value::List(items) => Ok(items),
            Value::Str(_) => Err(StoreError::WrongType),
        }
    }
}

/// Existence precondition for SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// NX: only set the key if it does not already exist.
    NotExists,
    /// XX: only set the key if it already exists.
    Exists,
}

/// Parsed SET options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    pub condition: Option<SetCondition>,
    /// GET: report the previous string value.
    pub get: bool,
    /// KEEPTTL: retain the existing deadline instead of clearing it.
    pub keep_ttl: bool,
    /// New absolute deadline, already converted to unix milliseconds.
    pub expires_at: Option<i64>,
}

/// What a SET did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOutcome {
    /// Whether the write happened (NX/XX may suppress it).
    pub applied: bool,
    /// Previous string value; only populated when `get` was requested.
    pub previous: Option<Bytes>,
}

/// Precondition for the EXPIRE family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpireCondition {
    /// NX: only when the key has no deadline.
    NoTtl,
    /// XX: only when the key already has a deadline.
    HasTtl,
    /// GT: only when the new deadline is later than the current one. A key
    /// without a deadline never satisfies this: no deadline already means
    /// "never expires".
    GreaterThan,
    /// LT: only when the new deadline is earlier than the current one. A key
    /// without a deadline always satisfies this: any deadline is earlier
    /// than never.
    LessThan,
}

/// The keyspace. Shared across connections behind an `Arc`; every operation
/// is atomic with respect to every other.
#[derive(Debug, Default)]
pub struct StorageEngine {
    entries: RwLock<HashMap<Bytes, Entry>>,
}

/// Removes `key` if its entry has expired.
fn purge_if_expired(entries: &mut HashMap<Bytes, Entry>, key: &[u8], now: i64) {
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.remove(key);
    }
}

/// Purges `key` if expired and returns the surviving entry, if any.
fn live_mut<'a>(
    entries: &'a mut HashMap<Bytes, Entry>,
    key: &[u8],
    now: i64,
) -> Option<&'a mut Entry> {
    purge_if_expired(entries, key, now);
    entries.get_mut(key)
}

impl StorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-path access to one live entry.
    ///
    /// Takes the read lock first; only when the entry turns out to be
    /// expired does it retake the write lock to purge, then reports the key
    /// as absent.
    fn with_live_entry<T>(&self, key: &[u8], f: impl FnOnce(Option<&Entry>, i64) -> T) -> T {
        let now = clock::now_ms();
        {
            let entries = self.entries.read().unwrap();
            match entries.get(key) {
                Some(entry) if entry.is_expired(now) => {}
                found => return f(found, now),
            }
        }

        let mut entries = self.entries.write().unwrap();
        purge_if_expired(&mut entries, key, now);
        f(None, now)
    }

    // ------------------------------------------------------------------
    // String operations
    // ------------------------------------------------------------------

    /// GET: the string value of `key`, or `None` when absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        self.with_live_entry(key, |entry, _| match entry {
            None => Ok(None),
            Some(entry) => Ok(Some(entry.as_str()?.clone())),
        })
    }

    /// SET with the full option matrix.
    ///
    /// GET inspects the previous value independently of whether NX/XX let
    /// the write happen, and refuses (without modifying anything) when the
    /// key holds a list. A plain SET clears any deadline; KEEPTTL retains
    /// it; a deadline already in the past deletes the key outright.
    pub fn set(
        &self,
        key: Bytes,
        value: Bytes,
        opts: SetOptions,
    ) -> Result<SetOutcome, StoreError> {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();
        purge_if_expired(&mut entries, &key, now);

        let mut previous = None;
        let mut current_deadline = None;
        let exists = match entries.get(&key[..]) {
            Some(entry) => {
                if opts.get {
                    previous = Some(entry.as_str()?.clone());
                }
                current_deadline = entry.expires_at;
                true
            }
            None => false,
        };

        let applied = match opts.condition {
            Some(SetCondition::NotExists) => !exists,
            Some(SetCondition::Exists) => exists,
            None => true,
        };

        if applied {
            let expires_at = if opts.keep_ttl {
                current_deadline
            } else {
                opts.expires_at
            };

            if expires_at.is_some_and(|at| at <= now) {
                entries.remove(&key[..]);
            } else {
                entries.insert(
                    key,
                    Entry {
                        value: Value::Str(value),
                        expires_at,
                    },
                );
            }
        }

        Ok(SetOutcome { applied, previous })
    }

    /// INCRBY/DECRBY core: missing keys count as 0, the deadline survives.
    pub fn incr_by(&self, key: Bytes, delta: i64) -> Result<i64, StoreError> {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();

        match live_mut(&mut entries, &key, now) {
            Some(entry) => {
                let current = parse_int(entry.as_str()?).ok_or(StoreError::NotAnInteger)?;
                let next = current.checked_add(delta).ok_or(StoreError::Overflow)?;
                entry.value = Value::Str(Bytes::from(next.to_string()));
                Ok(next)
            }
            None => {
                entries.insert(key, Entry::new(Value::Str(Bytes::from(delta.to_string()))));
                Ok(delta)
            }
        }
    }

    // ------------------------------------------------------------------
    // Generic keyspace operations
    // ------------------------------------------------------------------

    /// DEL: removes the given keys, returning how many were actually
    /// present. Already-expired keys do not count.
    pub fn del(&self, keys: &[Bytes]) -> usize {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();

        let mut removed = 0;
        for key in keys {
            purge_if_expired(&mut entries, key, now);
            if entries.remove(&key[..]).is_some() {
                removed += 1;
            }
        }
        removed
    }

    /// EXISTS: how many of the given keys are present (a repeated key
    /// counts every time).
    pub fn exists(&self, keys: &[Bytes]) -> usize {
        let now = clock::now_ms();
        let entries = self.entries.read().unwrap();
        keys.iter()
            .filter(|key| {
                entries
                    .get(&key[..])
                    .is_some_and(|entry| !entry.is_expired(now))
            })
            .count()
    }

    /// TYPE: `"string"`, `"list"` or `"none"`.
    pub fn kind_of(&self, key: &[u8]) -> &'static str {
        self.with_live_entry(key, |entry, _| match entry {
            None => "none",
            Some(entry) => match entry.value {
                Value::Str(_) => "string",
                Value::List(_) => "list",
            },
        })
    }

    /// Sets an absolute deadline subject to an optional precondition.
    /// Returns whether the deadline was applied (the 1/0 wire reply). A
    /// deadline at or before now deletes the key and still counts as
    /// applied.
    pub fn expire_at(&self, key: &[u8], at_ms: i64, condition: Option<ExpireCondition>) -> bool {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();

        let current = match live_mut(&mut entries, key, now) {
            Some(entry) => entry.expires_at,
            None => return false,
        };

        let apply = match condition {
            None => true,
            Some(ExpireCondition::NoTtl) => current.is_none(),
            Some(ExpireCondition::HasTtl) => current.is_some(),
            Some(ExpireCondition::GreaterThan) => current.is_some_and(|cur| at_ms > cur),
            Some(ExpireCondition::LessThan) => current.map_or(true, |cur| at_ms < cur),
        };
        if !apply {
            return false;
        }

        if at_ms <= now {
            entries.remove(key);
        } else if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(at_ms);
        }
        true
    }

    /// PERSIST: drops the deadline. True only if there was one to drop.
    pub fn persist(&self, key: &[u8]) -> bool {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();

        match live_mut(&mut entries, key, now) {
            Some(entry) if entry.expires_at.is_some() => {
                entry.expires_at = None;
                true
            }
            _ => false,
        }
    }

    /// PTTL: -2 when absent, -1 when the key has no deadline, otherwise the
    /// remaining milliseconds (never below 0).
    pub fn pttl(&self, key: &[u8]) -> i64 {
        self.with_live_entry(key, |entry, now| match entry {
            None => -2,
            Some(entry) => match entry.expires_at {
                None => -1,
                Some(at) => (at - now).max(0),
            },
        })
    }

    /// TTL: like [`pttl`](Self::pttl) but in whole seconds, rounded toward
    /// zero.
    pub fn ttl(&self, key: &[u8]) -> i64 {
        match self.pttl(key) {
            status @ (-2 | -1) => status,
            remaining_ms => remaining_ms / 1000,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = clock::now_ms();
        let entries = self.entries.read().unwrap();
        entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry. Called by the background sweeper; returns
    /// how many entries were reclaimed.
    pub fn cleanup_expired(&self) -> usize {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    // ------------------------------------------------------------------
    // List operations
    // ------------------------------------------------------------------

    /// LPUSH: prepends values one by one, so the last argument ends up at
    /// the head. Creates the list when absent. Returns the new length.
    pub fn lpush(&self, key: Bytes, values: Vec<Bytes>) -> Result<usize, StoreError> {
        self.push(key, values, true)
    }

    /// RPUSH: appends values in argument order. Creates the list when
    /// absent. Returns the new length.
    pub fn rpush(&self, key: Bytes, values: Vec<Bytes>) -> Result<usize, StoreError> {
        self.push(key, values, false)
    }

    fn push(&self, key: Bytes, values: Vec<Bytes>, front: bool) -> Result<usize, StoreError> {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();
        purge_if_expired(&mut entries, &key, now);

        let entry = entries
            .entry(key)
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
        let list = entry.as_list_mut()?;

        for value in values {
            if front {
                list.push_front(value);
            } else {
                list.push_back(value);
            }
        }
        Ok(list.len())
    }

    /// LPOP: removes up to `count` elements from the head, in pop order.
    /// An empty result means the key was absent; a list that empties out is
    /// deleted.
    pub fn lpop(&self, key: &[u8], count: usize) -> Result<Vec<Bytes>, StoreError> {
        self.pop(key, count, true)
    }

    /// RPOP: like [`lpop`](Self::lpop) from the tail.
    pub fn rpop(&self, key: &[u8], count: usize) -> Result<Vec<Bytes>, StoreError> {
        self.pop(key, count, false)
    }

    fn pop(&self, key: &[u8], count: usize, front: bool) -> Result<Vec<Bytes>, StoreError> {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();

        let Some(entry) = live_mut(&mut entries, key, now) else {
            return Ok(Vec::new());
        };

        let (popped, emptied) = {
            let list = entry.as_list_mut()?;
            let mut popped = Vec::with_capacity(count.min(list.len()));
            for _ in 0..count {
                let item = if front {
                    list.pop_front()
                } else {
                    list.pop_back()
                };
                match item {
                    Some(value) => popped.push(value),
                    None => break,
                }
            }
            (popped, list.is_empty())
        };

        if emptied {
            entries.remove(key);
        }
        Ok(popped)
    }

    /// LLEN: 0 when the key is absent.
    pub fn llen(&self, key: &[u8]) -> Result<usize, StoreError> {
        self.with_live_entry(key, |entry, _| match entry {
            None => Ok(0),
            Some(entry) => Ok(entry.as_list()?.len()),
        })
    }

    /// LINDEX: negative indexes count from the tail (-1 is the last
    /// element). `None` when the key is absent or the index out of range.
    pub fn lindex(&self, key: &[u8], index: i64) -> Result<Option<Bytes>, StoreError> {
        self.with_live_entry(key, |entry, _| match entry {
            None => Ok(None),
            Some(entry) => {
                let list = entry.as_list()?;
                Ok(normalize_index(index, list.len()).and_then(|idx| list.get(idx).cloned()))
            }
        })
    }

    /// LRANGE: inclusive slice with negative-index normalization and
    /// clamping.
    pub fn lrange(&self, key: &[u8], start: i64, stop: i64) -> Result<Vec<Bytes>, StoreError> {
        self.with_live_entry(key, |entry, _| match entry {
            None => Ok(Vec::new()),
            Some(entry) => {
                let list = entry.as_list()?;
                let len = list.len() as i64;

                let mut start = if start < 0 { len + start } else { start };
                let mut stop = if stop < 0 { len + stop } else { stop };
                if start < 0 {
                    start = 0;
                }
                if stop >= len {
                    stop = len - 1;
                }
                if start > stop || start >= len {
                    return Ok(Vec::new());
                }

                Ok(list
                    .iter()
                    .skip(start as usize)
                    .take((stop - start + 1) as usize)
                    .cloned()
                    .collect())
            }
        })
    }

    /// LSET: replaces the element at `index`.
    pub fn lset(&self, key: &[u8], index: i64, value: Bytes) -> Result<(), StoreError> {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();

        let Some(entry) = live_mut(&mut entries, key, now) else {
            return Err(StoreError::NoSuchKey);
        };
        let list = entry.as_list_mut()?;
        let idx = normalize_index(index, list.len()).ok_or(StoreError::IndexOutOfRange)?;
        list[idx] = value;
        Ok(())
    }

    /// LREM: removes elements equal to `value`.
    ///
    /// - count > 0: the first `count` matches, head to tail
    /// - count < 0: the last `|count|` matches, tail to head
    /// - count = 0: every match
    ///
    /// Returns the number removed; a list that empties out is deleted.
    pub fn lrem(&self, key: &[u8], count: i64, value: &[u8]) -> Result<usize, StoreError> {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();

        let Some(entry) = live_mut(&mut entries, key, now) else {
            return Ok(0);
        };

        let (removed, emptied) = {
            let list = entry.as_list_mut()?;
            let limit = if count == 0 {
                usize::MAX
            } else {
                count.unsigned_abs() as usize
            };
            let mut removed = 0;

            if count >= 0 {
                let mut i = 0;
                while i < list.len() && removed < limit {
                    if &list[i][..] == value {
                        list.remove(i);
                        removed += 1;
                    } else {
                        i += 1;
                    }
                }
            } else {
                let mut i = list.len();
                while i > 0 && removed < limit {
                    i -= 1;
                    if &list[i][..] == value {
                        list.remove(i);
                        removed += 1;
                    }
                }
            }
            (removed, list.is_empty())
        };

        if emptied {
            entries.remove(key);
        }
        Ok(removed)
    }

    /// LINSERT: inserts `value` next to the first occurrence of `pivot`,
    /// scanning head to tail. Returns the new length, -1 when the pivot is
    /// missing, 0 when the key is absent (LINSERT never creates).
    pub fn linsert(
        &self,
        key: &[u8],
        before: bool,
        pivot: &[u8],
        value: Bytes,
    ) -> Result<i64, StoreError> {
        let now = clock::now_ms();
        let mut entries = self.entries.write().unwrap();

        let Some(entry) = live_mut(&mut entries, key, now) else {
            return Ok(0);
        };
        let list = entry.as_list_mut()?;

        match list.iter().position(|item| &item[..] == pivot) {
            Some(pos) => {
                let at = if before { pos } else { pos + 1 };
                list.insert(at, value);
                Ok(list.len() as i64)
            }
            None => Ok(-1),
        }
    }

    // ------------------------------------------------------------------
    // Snapshot support
    // ------------------------------------------------------------------

    /// Visits every live entry under the read lock. Writers are held off
    /// for the duration, so the snapshot engine sees one consistent
    /// keyspace.
    pub(crate) fn for_each_live(&self, mut f: impl FnMut(&Bytes, &Entry)) {
        let now = clock::now_ms();
        let entries = self.entries.read().unwrap();
        for (key, entry) in entries.iter() {
            if !entry.is_expired(now) {
                f(key, entry);
            }
        }
    }

    /// Swaps in a fully-staged keyspace, discarding the current one.
    pub(crate) fn replace_all(&self, staged: HashMap<Bytes, Entry>) {
        *self.entries.write().unwrap() = staged;
    }
}

/// Maps a possibly-negative list index into `0..len`.
fn normalize_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

/// Strict base-10 signed 64-bit parser shared by stored values (INCR
/// family) and integer command arguments.
///
/// Accepts an optional leading `-` followed by ASCII digits with no
/// redundant leading zero; `"0"` is the only form of zero. Rejects empty
/// input, `+`, whitespace, `"-0"` and anything overflowing i64.
pub(crate) fn parse_int(bytes: &[u8]) -> Option<i64> {
    if bytes == b"0" {
        return Some(0);
    }

    let (negative, digits) = match bytes.split_first()? {
        (b'-', rest) => (true, rest),
        _ => (false, bytes),
    };
    if digits.is_empty() || digits[0] == b'0' {
        return None;
    }

    let mut magnitude: u64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return None;
        }
        magnitude = magnitude
            .checked_mul(10)?
            .checked_add(u64::from(b - b'0'))?;
    }

    if negative {
        if magnitude > i64::MAX as u64 + 1 {
            return None;
        }
        Some((magnitude as i64).wrapping_neg())
    } else {
        if magnitude > i64::MAX as u64 {
            return None;
        }
        Some(magnitude as i64)
    }
}
