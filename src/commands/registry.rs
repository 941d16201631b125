//! The command table.
//!
//! Each entry pairs a command name with its arity bounds and handler.
//! Lookup is by uppercased name; the bounds apply to the arguments after
//! the name (`argv[1..]`). `max_args: None` means unbounded - either a
//! variadic command (DEL, LPUSH) or one that reports its own shape errors
//! as `syntax error` rather than an arity error (SAVE, LOAD).

use crate::commands::handler::CommandHandler;
use crate::protocol::Frame;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::OnceLock;

pub type HandlerFn = fn(&CommandHandler, &[Bytes]) -> Frame;

pub struct CommandSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub run: HandlerFn,
}

const fn cmd(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    run: HandlerFn,
) -> CommandSpec {
    CommandSpec {
        name,
        min_args,
        max_args,
        run,
    }
}

pub static COMMANDS: &[CommandSpec] = &[
    // connection
    cmd("PING", 0, Some(1), CommandHandler::cmd_ping),
    cmd("ECHO", 1, Some(1), CommandHandler::cmd_echo),
    // generic keyspace
    cmd("DEL", 1, None, CommandHandler::cmd_del),
    cmd("EXISTS", 1, None, CommandHandler::cmd_exists),
    cmd("TYPE", 1, Some(1), CommandHandler::cmd_type),
    cmd("EXPIRE", 2, Some(3), CommandHandler::cmd_expire),
    cmd("PEXPIRE", 2, Some(3), CommandHandler::cmd_pexpire),
    cmd("EXPIREAT", 2, Some(3), CommandHandler::cmd_expireat),
    cmd("PEXPIREAT", 2, Some(3), CommandHandler::cmd_pexpireat),
    cmd("TTL", 1, Some(1), CommandHandler::cmd_ttl),
    cmd("PTTL", 1, Some(1), CommandHandler::cmd_pttl),
    cmd("PERSIST", 1, Some(1), CommandHandler::cmd_persist),
    cmd("DBSIZE", 0, Some(0), CommandHandler::cmd_dbsize),
    // strings
    cmd("SET", 2, None, CommandHandler::cmd_set),
    cmd("GET", 1, Some(1), CommandHandler::cmd_get),
    cmd("INCR", 1, Some(1), CommandHandler::cmd_incr),
    cmd("DECR", 1, Some(1), CommandHandler::cmd_decr),
    cmd("INCRBY", 2, Some(2), CommandHandler::cmd_incrby),
    cmd("DECRBY", 2, Some(2), CommandHandler::cmd_decrby),
    // lists
    cmd("LPUSH", 2, None, CommandHandler::cmd_lpush),
    cmd("RPUSH", 2, None, CommandHandler::cmd_rpush),
    cmd("LLEN", 1, Some(1), CommandHandler::cmd_llen),
    cmd("LINDEX", 2, Some(2), CommandHandler::cmd_lindex),
    cmd("LRANGE", 3, Some(3), CommandHandler::cmd_lrange),
    cmd("LSET", 3, Some(3), CommandHandler::cmd_lset),
    cmd("LREM", 3, Some(3), CommandHandler::cmd_lrem),
    cmd("LINSERT", 4, Some(4), CommandHandler::cmd_linsert),
    cmd("LPOP", 1, Some(2), CommandHandler::cmd_lpop),
    cmd("RPOP", 1, Some(2), CommandHandler::cmd_rpop),
    // snapshots
    cmd("SAVE", 0, None, CommandHandler::cmd_save),
    cmd("LOAD", 0, None, CommandHandler::cmd_load),
];

/// Looks up a command by its uppercased name.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    static INDEX: OnceLock<HashMap<&'static str, &'static CommandSpec>> = OnceLock::new();
    INDEX
        .get_or_init(|| COMMANDS.iter().map(|spec| (spec.name, spec)).collect())
        .get(name)
        .copied()
}

impl CommandSpec {
    /// Whether `argc` arguments (after the name) satisfy this command.
    pub fn arity_ok(&self, argc: usize) -> bool {
        argc >= self.min_args && self.max_args.is_none_or(|max| argc <= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_uppercase_keyed() {
        assert!(lookup("GET").is_some());
        assert!(lookup("get").is_none());
        assert!(lookup("NO_SUCH_COMMAND").is_none());
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = COMMANDS.iter().map(|spec| spec.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), COMMANDS.len());
    }

    #[test]
    fn arity_bounds() {
        let ping = lookup("PING").unwrap();
        assert!(ping.arity_ok(0));
        assert!(ping.arity_ok(1));
        assert!(!ping.arity_ok(2));

        let del = lookup("DEL").unwrap();
        assert!(!del.arity_ok(0));
        assert!(del.arity_ok(100));
    }
}
