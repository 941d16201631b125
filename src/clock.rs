//! Wall-clock time source for expirations.
//!
//! Expiration deadlines are absolute unix-millisecond timestamps so that
//! EXPIREAT/PEXPIREAT work directly and deadlines survive a snapshot
//! round-trip. Everything that needs "now" goes through [`now_ms`] so the
//! engine, the sweeper and the snapshot writer agree on a single source.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as milliseconds since the unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
