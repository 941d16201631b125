//! Command execution.
//!
//! [`CommandHandler`] owns the shared keyspace handle and turns a validated
//! argument vector into a reply frame. Dispatch resolves the command
//! through the registry, enforces arity, then hands `argv[1..]` to the
//! per-command method. Every recoverable failure becomes an error frame;
//! nothing in here panics the server.

use crate::clock;
use crate::protocol::Frame;
use crate::snapshot::{self, DEFAULT_SNAPSHOT_PATH};
use crate::storage::engine::parse_int;
use crate::storage::{ExpireCondition, SetCondition, SetOptions, StorageEngine, StoreError};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, trace};

fn syntax_error() -> Frame {
    Frame::error("ERR syntax error")
}

fn not_an_integer() -> Frame {
    Frame::error("ERR value is not an integer or out of range")
}

fn store_error(err: StoreError) -> Frame {
    Frame::Error(err.to_string())
}

/// Uppercases an option or command token for case-insensitive matching.
fn token_upper(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_uppercase()
}

/// Converts one EX/PX/EXAT/PXAT argument into an absolute unix-ms deadline.
/// The relative forms must be strictly positive; absolute forms may lie in
/// the past. `None` covers unparseable values and overflow alike.
fn set_expiry_deadline(token: &str, raw: &[u8]) -> Option<i64> {
    let n = parse_int(raw)?;
    match token {
        "EX" => {
            if n <= 0 {
                return None;
            }
            clock::now_ms().checked_add(n.checked_mul(1000)?)
        }
        "PX" => {
            if n <= 0 {
                return None;
            }
            clock::now_ms().checked_add(n)
        }
        "EXAT" => n.checked_mul(1000),
        "PXAT" => Some(n),
        _ => None,
    }
}

/// Executes commands against a shared [`StorageEngine`].
#[derive(Clone)]
pub struct CommandHandler {
    engine: Arc<StorageEngine>,
    default_dump_path: PathBuf,
}

impl CommandHandler {
    pub fn new(engine: Arc<StorageEngine>) -> Self {
        Self {
            engine,
            default_dump_path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
        }
    }

    /// Resolves and runs one request. `argv[0]` is the command name; names
    /// match case-insensitively, argument bytes are taken verbatim.
    pub fn dispatch(&self, argv: &[Bytes]) -> Frame {
        let Some(first) = argv.first() else {
            return Frame::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(first);

        let Some(spec) = super::registry::lookup(&name.to_ascii_uppercase()) else {
            debug!(command = %name, "unknown command");
            return Frame::error(format!("ERR unknown command '{name}'"));
        };

        let args = &argv[1..];
        if !spec.arity_ok(args.len()) {
            return Frame::error(format!(
                "ERR wrong number of arguments for '{}' command",
                spec.name.to_ascii_lowercase()
            ));
        }

        trace!(command = spec.name, argc = args.len(), "executing");
        (spec.run)(self, args)
    }

    // ------------------------------------------------------------------
    // Connection commands
    // ------------------------------------------------------------------

    /// PING [message]
    pub(crate) fn cmd_ping(&self, args: &[Bytes]) -> Frame {
        match args {
            [] => Frame::simple("PONG"),
            [message] => Frame::Bulk(message.clone()),
            _ => unreachable!("arity checked by dispatch"),
        }
    }

    /// ECHO message
    pub(crate) fn cmd_echo(&self, args: &[Bytes]) -> Frame {
        Frame::Bulk(args[0].clone())
    }

    // ------------------------------------------------------------------
    // Generic keyspace commands
    // ------------------------------------------------------------------

    /// DEL key [key ...]
    pub(crate) fn cmd_del(&self, args: &[Bytes]) -> Frame {
        Frame::Integer(self.engine.del(args) as i64)
    }

    /// EXISTS key [key ...]
    pub(crate) fn cmd_exists(&self, args: &[Bytes]) -> Frame {
        Frame::Integer(self.engine.exists(args) as i64)
    }

    /// TYPE key
    pub(crate) fn cmd_type(&self, args: &[Bytes]) -> Frame {
        Frame::simple(self.engine.kind_of(&args[0]))
    }

    /// EXPIRE key seconds [NX|XX|GT|LT]
    pub(crate) fn cmd_expire(&self, args: &[Bytes]) -> Frame {
        self.set_deadline(args, 1000, true)
    }

    /// PEXPIRE key milliseconds [NX|XX|GT|LT]
    pub(crate) fn cmd_pexpire(&self, args: &[Bytes]) -> Frame {
        self.set_deadline(args, 1, true)
    }

    /// EXPIREAT key unix-seconds [NX|XX|GT|LT]
    pub(crate) fn cmd_expireat(&self, args: &[Bytes]) -> Frame {
        self.set_deadline(args, 1000, false)
    }

    /// PEXPIREAT key unix-milliseconds [NX|XX|GT|LT]
    pub(crate) fn cmd_pexpireat(&self, args: &[Bytes]) -> Frame {
        self.set_deadline(args, 1, false)
    }

    /// Shared EXPIRE-family core: scale the timeout to milliseconds, make
    /// it absolute when `relative`, and apply it under the optional
    /// condition.
    fn set_deadline(&self, args: &[Bytes], unit_ms: i64, relative: bool) -> Frame {
        let Some(timeout) = parse_int(&args[1]) else {
            return not_an_integer();
        };

        let condition = match args.get(2) {
            None => None,
            Some(raw) => match token_upper(raw).as_str() {
                "NX" => Some(ExpireCondition::NoTtl),
                "XX" => Some(ExpireCondition::HasTtl),
                "GT" => Some(ExpireCondition::GreaterThan),
                "LT" => Some(ExpireCondition::LessThan),
                _ => return syntax_error(),
            },
        };

        let Some(scaled) = timeout.checked_mul(unit_ms) else {
            return not_an_integer();
        };
        let deadline = if relative {
            match clock::now_ms().checked_add(scaled) {
                Some(at) => at,
                None => return not_an_integer(),
            }
        } else {
            scaled
        };

        Frame::Integer(self.engine.expire_at(&args[0], deadline, condition) as i64)
    }

    /// TTL key
    pub(crate) fn cmd_ttl(&self, args: &[Bytes]) -> Frame {
        Frame::Integer(self.engine.ttl(&args[0]))
    }

    /// PTTL key
    pub(crate) fn cmd_pttl(&self, args: &[Bytes]) -> Frame {
        Frame::Integer(self.engine.pttl(&args[0]))
    }

    /// PERSIST key
    pub(crate) fn cmd_persist(&self, args: &[Bytes]) -> Frame {
        Frame::Integer(self.engine.persist(&args[0]) as i64)
    }

    /// DBSIZE
    pub(crate) fn cmd_dbsize(&self, _args: &[Bytes]) -> Frame {
        Frame::Integer(self.engine.len() as i64)
    }

    // ------------------------------------------------------------------
    // String commands
    // ------------------------------------------------------------------

    /// SET key value [NX|XX] [GET] [KEEPTTL] [EX s|PX ms|EXAT s|PXAT ms]
    pub(crate) fn cmd_set(&self, args: &[Bytes]) -> Frame {
        let mut opts = SetOptions::default();

        let mut i = 2;
        while i < args.len() {
            let token = token_upper(&args[i]);
            match token.as_str() {
                "NX" => {
                    if opts.condition == Some(SetCondition::Exists) {
                        return syntax_error();
                    }
                    opts.condition = Some(SetCondition::NotExists);
                }
                "XX" => {
                    if opts.condition == Some(SetCondition::NotExists) {
                        return syntax_error();
                    }
                    opts.condition = Some(SetCondition::Exists);
                }
                "GET" => opts.get = true,
                "KEEPTTL" => {
                    if opts.expires_at.is_some() {
                        return syntax_error();
                    }
                    opts.keep_ttl = true;
                }
                "EX" | "PX" | "EXAT" | "PXAT" => {
                    if opts.expires_at.is_some() || opts.keep_ttl {
                        return syntax_error();
                    }
                    i += 1;
                    let Some(raw) = args.get(i) else {
                        return syntax_error();
                    };
                    let Some(deadline) = set_expiry_deadline(&token, raw) else {
                        return not_an_integer();
                    };
                    opts.expires_at = Some(deadline);
                }
                _ => return syntax_error(),
            }
            i += 1;
        }

        match self.engine.set(args[0].clone(), args[1].clone(), opts) {
            Ok(outcome) => {
                if opts.get {
                    outcome.previous.map(Frame::Bulk).unwrap_or(Frame::Null)
                } else if outcome.applied {
                    Frame::ok()
                } else {
                    Frame::Null
                }
            }
            Err(err) => store_error(err),
        }
    }

    /// GET key
    pub(crate) fn cmd_get(&self, args: &[Bytes]) -> Frame {
        match self.engine.get(&args[0]) {
            Ok(Some(value)) => Frame::Bulk(value),
            Ok(None) => Frame::Null,
            Err(err) => store_error(err),
        }
    }

    /// INCR key
    pub(crate) fn cmd_incr(&self, args: &[Bytes]) -> Frame {
        self.apply_delta(&args[0], 1)
    }

    /// DECR key
    pub(crate) fn cmd_decr(&self, args: &[Bytes]) -> Frame {
        self.apply_delta(&args[0], -1)
    }

    /// INCRBY key increment
    pub(crate) fn cmd_incrby(&self, args: &[Bytes]) -> Frame {
        let Some(delta) = parse_int(&args[1]) else {
            return not_an_integer();
        };
        self.apply_delta(&args[0], delta)
    }

    /// DECRBY key decrement
    pub(crate) fn cmd_decrby(&self, args: &[Bytes]) -> Frame {
        let Some(delta) = parse_int(&args[1]) else {
            return not_an_integer();
        };
        // negating i64::MIN is itself an overflow
        let Some(negated) = delta.checked_neg() else {
            return store_error(StoreError::Overflow);
        };
        self.apply_delta(&args[0], negated)
    }

    fn apply_delta(&self, key: &Bytes, delta: i64) -> Frame {
        match self.engine.incr_by(key.clone(), delta) {
            Ok(value) => Frame::Integer(value),
            Err(err) => store_error(err),
        }
    }

    // ------------------------------------------------------------------
    // List commands
    // ------------------------------------------------------------------

    /// LPUSH key value [value ...]
    pub(crate) fn cmd_lpush(&self, args: &[Bytes]) -> Frame {
        match self.engine.lpush(args[0].clone(), args[1..].to_vec()) {
            Ok(len) => Frame::Integer(len as i64),
            Err(err) => store_error(err),
        }
    }

    /// RPUSH key value [value ...]
    pub(crate) fn cmd_rpush(&self, args: &[Bytes]) -> Frame {
        match self.engine.rpush(args[0].clone(), args[1..].to_vec()) {
            Ok(len) => Frame::Integer(len as i64),
            Err(err) => store_error(err),
        }
    }

    /// LLEN key
    pub(crate) fn cmd_llen(&self, args: &[Bytes]) -> Frame {
        match self.engine.llen(&args[0]) {
            Ok(len) => Frame::Integer(len as i64),
            Err(err) => store_error(err),
        }
    }

    /// LINDEX key index
    pub(crate) fn cmd_lindex(&self, args: &[Bytes]) -> Frame {
        let Some(index) = parse_int(&args[1]) else {
            return not_an_integer();
        };
        match self.engine.lindex(&args[0], index) {
            Ok(Some(value)) => Frame::Bulk(value),
            Ok(None) => Frame::Null,
            Err(err) => store_error(err),
        }
    }

    /// LRANGE key start stop
    pub(crate) fn cmd_lrange(&self, args: &[Bytes]) -> Frame {
        let (Some(start), Some(stop)) = (parse_int(&args[1]), parse_int(&args[2])) else {
            return not_an_integer();
        };
        match self.engine.lrange(&args[0], start, stop) {
            Ok(items) => Frame::Array(items.into_iter().map(Frame::Bulk).collect()),
            Err(err) => store_error(err),
        }
    }

    /// LSET key index value
    pub(crate) fn cmd_lset(&self, args: &[Bytes]) -> Frame {
        let Some(index) = parse_int(&args[1]) else {
            return not_an_integer();
        };
        match self.engine.lset(&args[0], index, args[2].clone()) {
            Ok(()) => Frame::ok(),
            Err(err) => store_error(err),
        }
    }

    /// LREM key count value
    pub(crate) fn cmd_lrem(&self, args: &[Bytes]) -> Frame {
        let Some(count) = parse_int(&args[1]) else {
            return not_an_integer();
        };
        match self.engine.lrem(&args[0], count, &args[2]) {
            Ok(removed) => Frame::Integer(removed as i64),
            Err(err) => store_error(err),
        }
    }

    /// LINSERT key BEFORE|AFTER pivot value
    pub(crate) fn cmd_linsert(&self, args: &[Bytes]) -> Frame {
        let before = match token_upper(&args[1]).as_str() {
            "BEFORE" => true,
            "AFTER" => false,
            _ => return syntax_error(),
        };
        match self.engine.linsert(&args[0], before, &args[2], args[3].clone()) {
            Ok(reply) => Frame::Integer(reply),
            Err(err) => store_error(err),
        }
    }

    /// LPOP key [count]
    pub(crate) fn cmd_lpop(&self, args: &[Bytes]) -> Frame {
        self.pop_end(args, true)
    }

    /// RPOP key [count]
    pub(crate) fn cmd_rpop(&self, args: &[Bytes]) -> Frame {
        self.pop_end(args, false)
    }

    /// Without COUNT the reply is a single bulk (or null bulk); with COUNT
    /// it is an array of up to COUNT popped values, or a null array when
    /// the key is absent.
    fn pop_end(&self, args: &[Bytes], front: bool) -> Frame {
        let key = &args[0];
        let pop = |count| {
            if front {
                self.engine.lpop(key, count)
            } else {
                self.engine.rpop(key, count)
            }
        };

        match args.get(1) {
            None => match pop(1) {
                Ok(popped) => popped.into_iter().next().map(Frame::Bulk).unwrap_or(Frame::Null),
                Err(err) => store_error(err),
            },
            Some(raw) => {
                let count = match parse_int(raw) {
                    Some(count) if count > 0 => count as usize,
                    Some(_) => {
                        return Frame::error("ERR value is out of range, must be positive")
                    }
                    None => return not_an_integer(),
                };
                match pop(count) {
                    Ok(popped) if popped.is_empty() => Frame::NullArray,
                    Ok(popped) => Frame::Array(popped.into_iter().map(Frame::Bulk).collect()),
                    Err(err) => store_error(err),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Snapshot commands
    // ------------------------------------------------------------------

    /// SAVE [TO path]
    pub(crate) fn cmd_save(&self, args: &[Bytes]) -> Frame {
        let path = match self.snapshot_path(args, "TO") {
            Ok(path) => path,
            Err(reply) => return reply,
        };
        debug!(path = %path.display(), "saving snapshot");
        match snapshot::save(&self.engine, &path) {
            Ok(()) => Frame::ok(),
            Err(err) => Frame::error(format!("ERR save failed: {err}")),
        }
    }

    /// LOAD [FROM path]
    pub(crate) fn cmd_load(&self, args: &[Bytes]) -> Frame {
        let path = match self.snapshot_path(args, "FROM") {
            Ok(path) => path,
            Err(reply) => return reply,
        };
        debug!(path = %path.display(), "loading snapshot");
        match snapshot::load(&self.engine, &path) {
            Ok(()) => Frame::ok(),
            Err(err) => Frame::error(format!("ERR load failed: {err}")),
        }
    }

    /// SAVE and LOAD take either no arguments or exactly `<option> <path>`;
    /// every other shape is a syntax error, arity included.
    fn snapshot_path(&self, args: &[Bytes], option: &str) -> Result<PathBuf, Frame> {
        match args {
            [] => Ok(self.default_dump_path.clone()),
            [token, path] if token_upper(token) == option => {
                Ok(PathBuf::from(String::from_utf8_lossy(path).into_owned()))
            }
            _ => Err(syntax_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> CommandHandler {
        CommandHandler::new(Arc::new(StorageEngine::new()))
    }

    fn run(handler: &CommandHandler, parts: &[&str]) -> Frame {
        let argv: Vec<Bytes> = parts
            .iter()
            .map(|part| Bytes::copy_from_slice(part.as_bytes()))
            .collect();
        handler.dispatch(&argv)
    }

    fn assert_error_contains(frame: &Frame, keyword: &str) {
        match frame {
            Frame::Error(message) => assert!(
                message.to_lowercase().contains(&keyword.to_lowercase()),
                "expected `{keyword}` in `{message}`"
            ),
            other => panic!("expected error containing `{keyword}`, got {other:?}"),
        }
    }

    #[test]
    fn ping_forms() {
        let h = handler();
        assert_eq!(run(&h, &["PING"]), Frame::simple("PONG"));
        assert_eq!(run(&h, &["ping"]), Frame::simple("PONG"));
        assert_eq!(run(&h, &["PING", "hello"]), Frame::bulk(Bytes::from("hello")));
        assert_error_contains(&run(&h, &["PING", "a", "b"]), "wrong number of arguments");
    }

    #[test]
    fn echo_round_trips() {
        let h = handler();
        assert_eq!(run(&h, &["ECHO", "hi"]), Frame::bulk(Bytes::from("hi")));
    }

    #[test]
    fn unknown_command_echoes_the_name() {
        let h = handler();
        let reply = run(&h, &["NO_SUCH_COMMAND"]);
        assert_error_contains(&reply, "unknown command");
        assert_error_contains(&reply, "NO_SUCH_COMMAND");
    }

    #[test]
    fn set_get_del_flow() {
        let h = handler();
        assert_eq!(run(&h, &["SET", "k", "v"]), Frame::ok());
        assert_eq!(run(&h, &["GET", "k"]), Frame::bulk(Bytes::from("v")));
        assert_eq!(run(&h, &["DEL", "k", "other"]), Frame::Integer(1));
        assert_eq!(run(&h, &["GET", "k"]), Frame::Null);
    }

    #[test]
    fn set_nx_xx_replies() {
        let h = handler();
        assert_eq!(run(&h, &["SET", "k", "a", "NX"]), Frame::ok());
        assert_eq!(run(&h, &["SET", "k", "b", "NX"]), Frame::Null);
        assert_eq!(run(&h, &["SET", "k", "c", "XX"]), Frame::ok());
        assert_eq!(run(&h, &["SET", "missing", "v", "xx"]), Frame::Null);
        assert_eq!(run(&h, &["GET", "k"]), Frame::bulk(Bytes::from("c")));
    }

    #[test]
    fn set_get_option_reports_old_value() {
        let h = handler();
        assert_eq!(run(&h, &["SET", "k", "v", "GET"]), Frame::Null);
        assert_eq!(
            run(&h, &["SET", "k", "w", "GET"]),
            Frame::bulk(Bytes::from("v"))
        );
        // NX skips the write but GET still answers
        assert_eq!(
            run(&h, &["SET", "k", "x", "NX", "GET"]),
            Frame::bulk(Bytes::from("w"))
        );
        assert_eq!(run(&h, &["GET", "k"]), Frame::bulk(Bytes::from("w")));
    }

    #[test]
    fn set_get_on_list_is_wrongtype() {
        let h = handler();
        run(&h, &["RPUSH", "L", "a"]);
        assert_error_contains(&run(&h, &["SET", "L", "v", "GET"]), "wrongtype");
        assert_eq!(run(&h, &["LLEN", "L"]), Frame::Integer(1));
    }

    #[test]
    fn set_option_conflicts_are_syntax_errors() {
        let h = handler();
        assert_error_contains(&run(&h, &["SET", "k", "v", "NX", "XX"]), "syntax error");
        assert_error_contains(
            &run(&h, &["SET", "k", "v", "KEEPTTL", "EXAT", "99999999999"]),
            "syntax error",
        );
        assert_error_contains(
            &run(&h, &["SET", "k", "v", "EX", "10", "PX", "100"]),
            "syntax error",
        );
        assert_error_contains(&run(&h, &["SET", "k", "v", "EX"]), "syntax error");
        assert_error_contains(&run(&h, &["SET", "k", "v", "BOGUS"]), "syntax error");
    }

    #[test]
    fn set_rejects_non_positive_relative_expiry() {
        let h = handler();
        assert_error_contains(
            &run(&h, &["SET", "k", "v", "EX", "0"]),
            "not an integer or out of range",
        );
        assert_error_contains(
            &run(&h, &["SET", "k", "v", "PX", "-5"]),
            "not an integer or out of range",
        );
        assert_error_contains(
            &run(&h, &["SET", "k", "v", "EX", "abc"]),
            "not an integer or out of range",
        );
    }

    #[test]
    fn set_with_past_absolute_expiry_is_legal() {
        let h = handler();
        assert_eq!(run(&h, &["SET", "k", "v", "EXAT", "1"]), Frame::ok());
        assert_eq!(run(&h, &["GET", "k"]), Frame::Null);
    }

    #[test]
    fn set_px_and_keepttl_preserve_deadline() {
        let h = handler();
        assert_eq!(run(&h, &["SET", "k", "v", "PX", "2000"]), Frame::ok());
        let Frame::Integer(before) = run(&h, &["PTTL", "k"]) else {
            panic!("PTTL must reply with an integer");
        };
        assert!((1..=2000).contains(&before));

        assert_eq!(run(&h, &["SET", "k", "w", "KEEPTTL"]), Frame::ok());
        let Frame::Integer(after) = run(&h, &["PTTL", "k"]) else {
            panic!("PTTL must reply with an integer");
        };
        assert!((1..=2000).contains(&after));
        assert_eq!(run(&h, &["GET", "k"]), Frame::bulk(Bytes::from("w")));
    }

    #[test]
    fn incr_family_flow() {
        let h = handler();
        assert_eq!(run(&h, &["INCR", "n"]), Frame::Integer(1));
        assert_eq!(run(&h, &["INCRBY", "n", "9"]), Frame::Integer(10));
        assert_eq!(run(&h, &["DECR", "n"]), Frame::Integer(9));
        assert_eq!(run(&h, &["DECRBY", "n", "4"]), Frame::Integer(5));
        assert_eq!(run(&h, &["GET", "n"]), Frame::bulk(Bytes::from("5")));
    }

    #[test]
    fn incr_family_errors() {
        let h = handler();
        run(&h, &["SET", "s", "abc"]);
        assert_error_contains(&run(&h, &["INCR", "s"]), "not an integer or out of range");
        assert_error_contains(
            &run(&h, &["INCRBY", "s", "nope"]),
            "not an integer or out of range",
        );

        run(&h, &["SET", "max", "9223372036854775807"]);
        assert_error_contains(&run(&h, &["INCR", "max"]), "would overflow");
        run(&h, &["SET", "min", "-9223372036854775808"]);
        assert_error_contains(&run(&h, &["DECR", "min"]), "would overflow");
        assert_error_contains(
            &run(&h, &["DECRBY", "k", "-9223372036854775808"]),
            "would overflow",
        );
    }

    #[test]
    fn expire_family_conditions_over_the_wire() {
        let h = handler();
        run(&h, &["SET", "k", "v"]);
        assert_eq!(run(&h, &["PEXPIRE", "k", "200", "NX"]), Frame::Integer(1));
        assert_eq!(run(&h, &["PEXPIRE", "k", "300", "NX"]), Frame::Integer(0));
        assert_eq!(run(&h, &["PEXPIRE", "k", "300", "XX"]), Frame::Integer(1));
        assert_eq!(run(&h, &["PEXPIRE", "k", "100", "GT"]), Frame::Integer(0));
        assert_eq!(run(&h, &["PEXPIRE", "k", "50", "LT"]), Frame::Integer(1));

        run(&h, &["SET", "no-ttl", "v"]);
        assert_eq!(run(&h, &["PEXPIRE", "no-ttl", "100", "LT"]), Frame::Integer(1));
    }

    #[test]
    fn expire_family_errors() {
        let h = handler();
        run(&h, &["SET", "k", "v"]);
        assert_error_contains(
            &run(&h, &["EXPIRE", "k", "not-int"]),
            "not an integer or out of range",
        );
        assert_error_contains(&run(&h, &["EXPIRE", "k", "5", "BAD"]), "syntax error");
        assert_error_contains(&run(&h, &["EXPIRE", "k"]), "wrong number of arguments");
        assert_eq!(run(&h, &["EXPIRE", "missing", "5"]), Frame::Integer(0));
    }

    #[test]
    fn expireat_in_the_past_deletes() {
        let h = handler();
        run(&h, &["SET", "k", "v"]);
        assert_eq!(run(&h, &["EXPIREAT", "k", "1"]), Frame::Integer(1));
        assert_eq!(run(&h, &["GET", "k"]), Frame::Null);
        assert_eq!(run(&h, &["TTL", "k"]), Frame::Integer(-2));
    }

    #[test]
    fn ttl_states_over_the_wire() {
        let h = handler();
        assert_eq!(run(&h, &["TTL", "missing"]), Frame::Integer(-2));
        run(&h, &["SET", "k", "v"]);
        assert_eq!(run(&h, &["TTL", "k"]), Frame::Integer(-1));
        assert_eq!(run(&h, &["PTTL", "k"]), Frame::Integer(-1));
    }

    #[test]
    fn list_flow_and_replies() {
        let h = handler();
        assert_eq!(run(&h, &["RPUSH", "L", "a", "b", "c", "d"]), Frame::Integer(4));
        assert_eq!(
            run(&h, &["LRANGE", "L", "1", "2"]),
            Frame::Array(vec![
                Frame::bulk(Bytes::from("b")),
                Frame::bulk(Bytes::from("c")),
            ])
        );
        assert_eq!(
            run(&h, &["LRANGE", "L", "-3", "-2"]),
            Frame::Array(vec![
                Frame::bulk(Bytes::from("b")),
                Frame::bulk(Bytes::from("c")),
            ])
        );
        assert_eq!(run(&h, &["LLEN", "L"]), Frame::Integer(4));
        assert_eq!(run(&h, &["LINDEX", "L", "-1"]), Frame::bulk(Bytes::from("d")));
        assert_eq!(run(&h, &["LINDEX", "L", "99"]), Frame::Null);
        assert_eq!(run(&h, &["LSET", "L", "1", "x"]), Frame::ok());
        assert_eq!(run(&h, &["LREM", "L", "0", "x"]), Frame::Integer(1));
    }

    #[test]
    fn lset_error_replies() {
        let h = handler();
        assert_error_contains(&run(&h, &["LSET", "missing", "0", "x"]), "no such key");
        run(&h, &["RPUSH", "L", "a"]);
        assert_error_contains(&run(&h, &["LSET", "L", "5", "x"]), "index out of range");
    }

    #[test]
    fn linsert_direction_and_boundaries() {
        let h = handler();
        run(&h, &["RPUSH", "L", "a", "b"]);
        assert_eq!(run(&h, &["LINSERT", "L", "before", "b", "x"]), Frame::Integer(3));
        assert_eq!(run(&h, &["LINSERT", "L", "AFTER", "b", "y"]), Frame::Integer(4));
        assert_eq!(run(&h, &["LINSERT", "L", "BEFORE", "nope", "z"]), Frame::Integer(-1));
        assert_eq!(run(&h, &["LINSERT", "missing", "BEFORE", "p", "q"]), Frame::Integer(0));
        assert_error_contains(&run(&h, &["LINSERT", "L", "MIDDLE", "a", "x"]), "syntax error");
    }

    #[test]
    fn pop_replies_with_and_without_count() {
        let h = handler();
        run(&h, &["RPUSH", "L", "a", "b", "c"]);
        assert_eq!(run(&h, &["LPOP", "L"]), Frame::bulk(Bytes::from("a")));
        assert_eq!(
            run(&h, &["LPOP", "L", "5"]),
            Frame::Array(vec![
                Frame::bulk(Bytes::from("b")),
                Frame::bulk(Bytes::from("c")),
            ])
        );
        assert_eq!(run(&h, &["LPOP", "L"]), Frame::Null);
        assert_eq!(run(&h, &["LPOP", "missing", "2"]), Frame::NullArray);

        run(&h, &["RPUSH", "R", "a", "b", "c", "d"]);
        assert_eq!(run(&h, &["RPOP", "R"]), Frame::bulk(Bytes::from("d")));
        assert_eq!(
            run(&h, &["RPOP", "R", "2"]),
            Frame::Array(vec![
                Frame::bulk(Bytes::from("c")),
                Frame::bulk(Bytes::from("b")),
            ])
        );
    }

    #[test]
    fn pop_count_must_be_positive() {
        let h = handler();
        run(&h, &["RPUSH", "L", "x"]);
        assert_error_contains(&run(&h, &["LPOP", "L", "0"]), "must be positive");
        assert_error_contains(&run(&h, &["RPOP", "L", "-1"]), "must be positive");
    }

    #[test]
    fn list_commands_reject_string_keys() {
        let h = handler();
        run(&h, &["SET", "k", "v"]);
        for parts in [
            vec!["LLEN", "k"],
            vec!["LINDEX", "k", "0"],
            vec!["LRANGE", "k", "0", "-1"],
            vec!["LSET", "k", "0", "x"],
            vec!["LREM", "k", "0", "x"],
            vec!["LINSERT", "k", "BEFORE", "x", "y"],
            vec!["LPUSH", "k", "x"],
            vec!["RPUSH", "k", "x"],
            vec!["LPOP", "k"],
            vec!["RPOP", "k"],
        ] {
            assert_error_contains(&run(&h, &parts), "wrongtype");
        }
    }

    #[test]
    fn type_exists_dbsize_persist() {
        let h = handler();
        run(&h, &["SET", "s", "v"]);
        run(&h, &["RPUSH", "L", "a"]);

        assert_eq!(run(&h, &["TYPE", "s"]), Frame::simple("string"));
        assert_eq!(run(&h, &["TYPE", "L"]), Frame::simple("list"));
        assert_eq!(run(&h, &["TYPE", "missing"]), Frame::simple("none"));
        assert_eq!(run(&h, &["EXISTS", "s", "L", "missing"]), Frame::Integer(2));
        assert_eq!(run(&h, &["DBSIZE"]), Frame::Integer(2));

        assert_eq!(run(&h, &["PERSIST", "s"]), Frame::Integer(0));
        run(&h, &["EXPIRE", "s", "100"]);
        assert_eq!(run(&h, &["PERSIST", "s"]), Frame::Integer(1));
    }

    #[test]
    fn save_and_load_validate_their_shape() {
        let h = handler();
        for parts in [
            vec!["SAVE", "FROM", "/tmp/x"],
            vec!["SAVE", "TO"],
            vec!["SAVE", "TO", "path", "extra"],
            vec!["LOAD", "TO", "/tmp/x"],
            vec!["LOAD", "FROM"],
            vec!["LOAD", "FROM", "path", "extra"],
        ] {
            assert_error_contains(&run(&h, &parts), "syntax error");
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snap.mrdb");
        let path = path.to_str().unwrap();

        let h = handler();
        run(&h, &["SET", "k", "before"]);
        assert_eq!(run(&h, &["SAVE", "TO", path]), Frame::ok());

        run(&h, &["SET", "k", "after"]);
        assert_eq!(run(&h, &["LOAD", "FROM", path]), Frame::ok());
        assert_eq!(run(&h, &["GET", "k"]), Frame::bulk(Bytes::from("before")));
    }

    #[test]
    fn load_missing_file_error_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.mrdb");

        let h = handler();
        assert_error_contains(
            &run(&h, &["LOAD", "FROM", path.to_str().unwrap()]),
            "load failed: cannot open file",
        );
    }

    #[test]
    fn argument_bytes_are_binary_safe() {
        let h = handler();
        let key = Bytes::from_static(b"bin\x00key");
        let value = Bytes::from_static(b"\x01\x02\x00\x03");
        assert_eq!(
            h.dispatch(&[Bytes::from_static(b"SET"), key.clone(), value.clone()]),
            Frame::ok()
        );
        assert_eq!(
            h.dispatch(&[Bytes::from_static(b"GET"), key]),
            Frame::Bulk(value)
        );
    }
}
