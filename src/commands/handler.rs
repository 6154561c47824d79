//! Command Evaluator
//!
//! Validates each command's arguments, applies it to the keyspace and turns
//! the outcome into a reply.
//!
//! ## Supported Commands
//!
//! - `PING [message]`
//! - `SET key value [EX seconds | PX milliseconds | EXAT unix-seconds | PXAT unix-ms]`
//! - `GET key`
//! - `TTL key`
//! - `DEL key [key ...]`
//! - `EXPIRE key seconds`
//! - `BGREWRITEAOF`
//!
//! ## Batches
//!
//! ```text
//! [SET a 1] [SET a 2] [GET a] [FLY]
//!     │         │        │      │
//!     ▼         ▼        ▼      ▼
//!   +OK       +OK     $1\r\n2  -ERR unknown command 'FLY'
//!     └─────────┴────────┴──────┴──> one buffer, input order
//! ```
//!
//! Commands in a batch run strictly one after another, so a later command
//! always observes the writes of an earlier one. A failing command produces
//! an error reply and evaluation moves on to the next.

use crate::commands::command::Command;
use crate::commands::error::CommandError;
use crate::persistence::Persistence;
use crate::protocol::RespValue;
use crate::storage::{Object, StorageEngine};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tracing::{debug, trace};

type CommandResult = Result<RespValue, CommandError>;

/// Expiry modifiers accepted by SET.
#[derive(Debug, Clone, Copy)]
enum ExpiryOption {
    Seconds,
    Millis,
    UnixSeconds,
    UnixMillis,
}

impl ExpiryOption {
    fn parse(token: &[u8]) -> Option<Self> {
        match token.to_ascii_uppercase().as_slice() {
            b"EX" => Some(Self::Seconds),
            b"PX" => Some(Self::Millis),
            b"EXAT" => Some(Self::UnixSeconds),
            b"PXAT" => Some(Self::UnixMillis),
            _ => None,
        }
    }

    /// Absolute expiry in ms, or `None` if it does not fit a `u64`.
    ///
    /// Non-positive relative amounts and deadlines before the epoch clamp to
    /// 0, which is already in the past.
    fn resolve(self, amount: i64, now_ms: u64) -> Option<u64> {
        let amount = i128::from(amount);
        let now_ms = i128::from(now_ms);
        let at = match self {
            Self::Seconds => now_ms + amount * 1000,
            Self::Millis => now_ms + amount,
            Self::UnixSeconds => amount * 1000,
            Self::UnixMillis => amount,
        };
        u64::try_from(at.max(0)).ok()
    }
}

fn parse_integer(raw: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

/// Evaluates commands against a shared keyspace.
///
/// Cheap to clone; every connection gets its own handle.
#[derive(Debug, Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
    persistence: Arc<Persistence>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>, persistence: Arc<Persistence>) -> Self {
        Self {
            storage,
            persistence,
        }
    }

    pub fn storage(&self) -> &Arc<StorageEngine> {
        &self.storage
    }

    /// Runs one command and returns its reply. Errors become error replies.
    pub fn execute(&self, command: &Command) -> RespValue {
        match self.dispatch(command) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(command = %command.name, error = %e, "Command rejected");
                e.into()
            }
        }
    }

    /// Runs `commands` in order, appending one encoded reply per command to
    /// `out`.
    pub fn execute_batch(&self, commands: &[Command], out: &mut BytesMut) {
        for command in commands {
            self.execute(command).encode(out);
        }
        trace!(commands = commands.len(), bytes = out.len(), "Batch evaluated");
    }

    fn dispatch(&self, command: &Command) -> CommandResult {
        let args = &command.args[..];
        match command.name.to_ascii_uppercase().as_str() {
            "PING" => self.cmd_ping(args),
            "SET" => self.cmd_set(args),
            "GET" => self.cmd_get(args),
            "TTL" => self.cmd_ttl(args),
            "DEL" => self.cmd_del(args),
            "EXPIRE" => self.cmd_expire(args),
            "BGREWRITEAOF" => self.cmd_bgrewriteaof(args),
            _ => Err(CommandError::UnknownCommand(command.name.clone())),
        }
    }

    /// PING [message]
    fn cmd_ping(&self, args: &[Bytes]) -> CommandResult {
        match args {
            [] => Ok(RespValue::pong()),
            [message] => Ok(RespValue::bulk_string(message.clone())),
            _ => Err(CommandError::WrongArity("ping")),
        }
    }

    /// SET key value [EX s | PX ms | EXAT ts | PXAT ts-ms]
    ///
    /// Always replaces the whole object: without a modifier the key loses any
    /// expiry it had. Options are validated before anything is written. A
    /// deadline that is not in the future stores a key that is already gone.
    fn cmd_set(&self, args: &[Bytes]) -> CommandResult {
        let [key, value, options @ ..] = args else {
            return Err(CommandError::WrongArity("set"));
        };

        let now = self.storage.now_ms();
        let mut expires_at = None;

        let mut i = 0;
        while i < options.len() {
            let option = ExpiryOption::parse(&options[i]).ok_or(CommandError::Syntax)?;
            let amount = options.get(i + 1).ok_or(CommandError::Syntax)?;
            let amount = parse_integer(amount)?;

            expires_at = Some(
                option
                    .resolve(amount, now)
                    .ok_or(CommandError::InvalidExpireTime("set"))?,
            );
            i += 2;
        }

        let object = match expires_at {
            Some(at) => Object::expiring(value.clone(), at),
            None => Object::new(value.clone()),
        };
        self.storage.put(key.clone(), object);

        Ok(RespValue::ok())
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("get"));
        };

        Ok(match self.storage.get(key) {
            Some(obj) => RespValue::bulk_string(obj.value.as_bytes().clone()),
            None => RespValue::null(),
        })
    }

    /// TTL key: seconds left, -1 without expiry, -2 when absent.
    fn cmd_ttl(&self, args: &[Bytes]) -> CommandResult {
        let [key] = args else {
            return Err(CommandError::WrongArity("ttl"));
        };

        Ok(RespValue::integer(self.storage.ttl(key).unwrap_or(-2)))
    }

    /// DEL key [key ...]
    fn cmd_del(&self, args: &[Bytes]) -> CommandResult {
        if args.is_empty() {
            return Err(CommandError::WrongArity("del"));
        }

        Ok(RespValue::integer(self.storage.del_many(args) as i64))
    }

    /// EXPIRE key seconds
    ///
    /// A non-positive timeout expires the key immediately.
    fn cmd_expire(&self, args: &[Bytes]) -> CommandResult {
        let (key, seconds) = match args {
            [key, seconds] => (key, seconds),
            [_, _, ..] => return Err(CommandError::Syntax),
            _ => return Err(CommandError::WrongArity("expire")),
        };
        let seconds = parse_integer(seconds)?;

        if seconds <= 0 {
            return Ok(RespValue::integer(self.storage.del(key) as i64));
        }

        let at = ExpiryOption::Seconds
            .resolve(seconds, self.storage.now_ms())
            .ok_or(CommandError::InvalidExpireTime("expire"))?;

        Ok(RespValue::integer(self.storage.expire_at(key, at) as i64))
    }

    /// BGREWRITEAOF
    ///
    /// Runs the rewrite to completion before replying, so `+OK` means the
    /// file is durable.
    fn cmd_bgrewriteaof(&self, args: &[Bytes]) -> CommandResult {
        if !args.is_empty() {
            return Err(CommandError::WrongArity("bgrewriteaof"));
        }

        self.persistence.rewrite()?;
        Ok(RespValue::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::testing::MemorySink;
    use crate::persistence::SnapshotSink;
    use crate::storage::{Clock, ManualClock};
    use std::time::Duration;

    struct Fixture {
        handler: CommandHandler,
        clock: Arc<ManualClock>,
        sink: Arc<MemorySink>,
    }

    fn fixture_with(sink: MemorySink) -> Fixture {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let storage = Arc::new(StorageEngine::with_clock(clock.clone()));
        let sink = Arc::new(sink);
        let persistence = Arc::new(Persistence::new(Arc::clone(&storage), Arc::clone(&sink)));
        Fixture {
            handler: CommandHandler::new(storage, persistence),
            clock,
            sink,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemorySink::default())
    }

    fn cmd(parts: &[&str]) -> Command {
        Command::new(
            parts[0],
            parts[1..].iter().map(|s| Bytes::copy_from_slice(s.as_bytes())),
        )
    }

    impl Fixture {
        fn run(&self, parts: &[&str]) -> RespValue {
            self.handler.execute(&cmd(parts))
        }
    }

    fn bulk(s: &str) -> RespValue {
        RespValue::bulk_string(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn err(e: CommandError) -> RespValue {
        e.into()
    }

    #[test]
    fn test_ping() {
        let f = fixture();
        assert_eq!(f.run(&["PING"]), RespValue::pong());
        assert_eq!(f.run(&["PING", "hello"]), bulk("hello"));
        assert_eq!(
            f.run(&["PING", "a", "b"]),
            err(CommandError::WrongArity("ping"))
        );
    }

    #[test]
    fn test_set_get() {
        let f = fixture();
        assert_eq!(f.run(&["SET", "key", "value"]), RespValue::ok());
        assert_eq!(f.run(&["GET", "key"]), bulk("value"));
        assert_eq!(f.run(&["TTL", "key"]), RespValue::integer(-1));
        assert_eq!(f.run(&["GET", "missing"]), RespValue::null());
    }

    #[test]
    fn test_command_names_are_case_insensitive() {
        let f = fixture();
        assert_eq!(f.run(&["set", "k", "v"]), RespValue::ok());
        assert_eq!(f.run(&["Get", "k"]), bulk("v"));
    }

    #[test]
    fn test_set_arity_and_options() {
        let f = fixture();
        assert_eq!(f.run(&["SET", "k"]), err(CommandError::WrongArity("set")));
        assert_eq!(
            f.run(&["SET", "k", "v", "EX"]),
            err(CommandError::Syntax)
        );
        assert_eq!(
            f.run(&["SET", "k", "v", "NOPE", "1"]),
            err(CommandError::Syntax)
        );
        assert_eq!(
            f.run(&["SET", "k", "v", "EX", "ten"]),
            err(CommandError::NotInteger)
        );
        assert_eq!(
            f.run(&["SET", "k", "v", "EX", "9223372036854775807"]),
            err(CommandError::InvalidExpireTime("set"))
        );

        // None of the rejected SETs wrote anything.
        assert_eq!(f.run(&["GET", "k"]), RespValue::null());
    }

    #[test]
    fn test_set_non_positive_expiry_stores_absent_key() {
        let f = fixture();
        f.run(&["SET", "k", "old"]);

        assert_eq!(f.run(&["SET", "k", "v", "EX", "0"]), RespValue::ok());
        assert_eq!(f.run(&["GET", "k"]), RespValue::null());

        f.run(&["SET", "k", "old"]);
        assert_eq!(f.run(&["SET", "k", "v", "EX", "-1"]), RespValue::ok());
        assert_eq!(f.run(&["GET", "k"]), RespValue::null());
        assert_eq!(f.run(&["TTL", "k"]), RespValue::integer(-2));

        f.run(&["SET", "k", "old"]);
        assert_eq!(f.run(&["SET", "k", "v", "PX", "-9223372036854775808"]), RespValue::ok());
        assert_eq!(f.run(&["DEL", "k"]), RespValue::integer(0));
    }

    #[test]
    fn test_set_ex_reads_the_token_after_ex() {
        let f = fixture();
        // The seconds value is not at a fixed position.
        assert_eq!(
            f.run(&["SET", "k", "v", "PX", "500", "ex", "30"]),
            RespValue::ok()
        );
        assert_eq!(f.run(&["TTL", "k"]), RespValue::integer(30));
    }

    #[test]
    fn test_set_with_expiry_then_expired() {
        let f = fixture();
        assert_eq!(f.run(&["SET", "x", "v", "EX", "1"]), RespValue::ok());
        assert_eq!(f.run(&["TTL", "x"]), RespValue::integer(1));

        f.clock.advance(Duration::from_millis(1_001));
        assert_eq!(f.run(&["GET", "x"]), RespValue::null());
        assert_eq!(f.run(&["TTL", "x"]), RespValue::integer(-2));
        assert_eq!(f.run(&["DEL", "x"]), RespValue::integer(0));
    }

    #[test]
    fn test_ttl_within_bounds() {
        let f = fixture();
        f.run(&["SET", "k", "v", "EX", "10"]);
        f.clock.advance(Duration::from_millis(2_500));

        // 7.5s left, rounded down.
        assert_eq!(f.run(&["TTL", "k"]), RespValue::integer(7));
    }

    #[test]
    fn test_set_without_expiry_clears_ttl() {
        let f = fixture();
        f.run(&["SET", "k", "v1", "EX", "100"]);
        f.run(&["SET", "k", "v2"]);
        assert_eq!(f.run(&["TTL", "k"]), RespValue::integer(-1));
        assert_eq!(f.run(&["GET", "k"]), bulk("v2"));
    }

    #[test]
    fn test_set_absolute_expiry() {
        let f = fixture();
        let now = f.clock.now_ms();

        let at_ms = (now + 5_000).to_string();
        f.run(&["SET", "a", "v", "PXAT", &at_ms]);
        assert_eq!(f.run(&["TTL", "a"]), RespValue::integer(5));

        let at_secs = (now / 1000 + 60).to_string();
        f.run(&["SET", "b", "v", "EXAT", &at_secs]);
        assert_eq!(f.run(&["TTL", "b"]), RespValue::integer(60));

        // A deadline in the past stores an already absent key.
        f.run(&["SET", "c", "v", "PXAT", "1"]);
        assert_eq!(f.run(&["GET", "c"]), RespValue::null());
    }

    #[test]
    fn test_get_and_ttl_arity() {
        let f = fixture();
        assert_eq!(f.run(&["GET"]), err(CommandError::WrongArity("get")));
        assert_eq!(f.run(&["GET", "a", "b"]), err(CommandError::WrongArity("get")));
        assert_eq!(f.run(&["TTL"]), err(CommandError::WrongArity("ttl")));
        assert_eq!(f.run(&["TTL", "a", "b"]), err(CommandError::WrongArity("ttl")));
    }

    #[test]
    fn test_repeated_get_is_stable() {
        let f = fixture();
        f.run(&["SET", "k", "v", "EX", "100"]);
        let first = f.run(&["GET", "k"]);
        for _ in 0..5 {
            assert_eq!(f.run(&["GET", "k"]), first);
        }
    }

    #[test]
    fn test_del() {
        let f = fixture();
        f.run(&["SET", "key1", "value1"]);
        f.run(&["SET", "key2", "value2"]);

        assert_eq!(
            f.run(&["DEL", "key1", "key2", "key3"]),
            RespValue::integer(2)
        );
        assert_eq!(
            f.run(&["DEL", "key1", "key2", "key3"]),
            RespValue::integer(0)
        );
        assert_eq!(f.run(&["DEL"]), err(CommandError::WrongArity("del")));
    }

    #[test]
    fn test_del_counts_duplicate_key_once() {
        let f = fixture();
        f.run(&["SET", "k", "v"]);
        assert_eq!(f.run(&["DEL", "k", "k"]), RespValue::integer(1));
    }

    #[test]
    fn test_expire() {
        let f = fixture();
        assert_eq!(f.run(&["EXPIRE", "missing", "10"]), RespValue::integer(0));
        assert_eq!(f.run(&["GET", "missing"]), RespValue::null());

        f.run(&["SET", "k", "v"]);
        assert_eq!(f.run(&["EXPIRE", "k", "10"]), RespValue::integer(1));
        assert_eq!(f.run(&["TTL", "k"]), RespValue::integer(10));
        assert_eq!(f.run(&["GET", "k"]), bulk("v"));

        // A later EXPIRE overrides the earlier one, shorter or longer.
        assert_eq!(f.run(&["EXPIRE", "k", "3"]), RespValue::integer(1));
        assert_eq!(f.run(&["TTL", "k"]), RespValue::integer(3));

        f.clock.advance(Duration::from_secs(3));
        assert_eq!(f.run(&["EXPIRE", "k", "10"]), RespValue::integer(0));
        assert_eq!(f.run(&["TTL", "k"]), RespValue::integer(-2));
    }

    #[test]
    fn test_expire_errors() {
        let f = fixture();
        f.run(&["SET", "k", "v"]);

        assert_eq!(f.run(&["EXPIRE", "k"]), err(CommandError::WrongArity("expire")));
        assert_eq!(f.run(&["EXPIRE", "k", "soon"]), err(CommandError::NotInteger));
        assert_eq!(f.run(&["EXPIRE", "k", "1", "NX"]), err(CommandError::Syntax));
        assert_eq!(
            f.run(&["EXPIRE", "k", "9223372036854775807"]),
            err(CommandError::InvalidExpireTime("expire"))
        );

        // The key survived every rejected EXPIRE untouched.
        assert_eq!(f.run(&["TTL", "k"]), RespValue::integer(-1));
    }

    #[test]
    fn test_expire_non_positive_deletes() {
        let f = fixture();
        f.run(&["SET", "k", "v"]);
        assert_eq!(f.run(&["EXPIRE", "k", "-5"]), RespValue::integer(1));
        assert_eq!(f.run(&["GET", "k"]), RespValue::null());
        assert_eq!(f.run(&["EXPIRE", "k", "0"]), RespValue::integer(0));
    }

    #[test]
    fn test_unknown_command() {
        let f = fixture();
        assert_eq!(
            f.run(&["FLY", "away"]),
            err(CommandError::UnknownCommand("FLY".to_string()))
        );
    }

    #[test]
    fn test_bgrewriteaof() {
        let f = fixture();
        f.run(&["SET", "a", "1"]);
        f.run(&["SET", "b", "2", "EX", "1"]);
        f.clock.advance(Duration::from_secs(2));

        assert_eq!(f.run(&["BGREWRITEAOF"]), RespValue::ok());

        let snapshots = f.sink.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].entries.len(), 1);
        assert_eq!(snapshots[0].entries[0].0, Bytes::from("a"));
    }

    #[test]
    fn test_bgrewriteaof_failure_is_reported() {
        let f = fixture_with(MemorySink::failing());
        f.run(&["SET", "a", "1"]);

        match f.run(&["BGREWRITEAOF"]) {
            RespValue::Error(msg) => assert!(msg.contains("disk full"), "{}", msg),
            other => panic!("expected an error, got {:?}", other),
        }
        assert_eq!(f.run(&["GET", "a"]), bulk("1"));
        assert_eq!(
            f.run(&["BGREWRITEAOF", "now"]),
            err(CommandError::WrongArity("bgrewriteaof"))
        );
    }

    #[test]
    fn test_batch_last_write_wins_and_errors_stay_local() {
        let f = fixture();
        let batch = vec![
            cmd(&["SET", "a", "1"]),
            cmd(&["GET"]),
            cmd(&["SET", "a", "2"]),
            cmd(&["FLY"]),
            cmd(&["GET", "a"]),
        ];

        let mut out = BytesMut::new();
        f.handler.execute_batch(&batch, &mut out);

        let expected = b"+OK\r\n\
            -ERR wrong number of arguments for 'get' command\r\n\
            +OK\r\n\
            -ERR unknown command 'FLY'\r\n\
            $1\r\n2\r\n";
        assert_eq!(&out[..], &expected[..]);
    }

    #[test]
    fn test_batch_expire_missing() {
        let f = fixture();
        let mut out = BytesMut::new();
        f.handler
            .execute_batch(&[cmd(&["EXPIRE", "missing", "10"])], &mut out);
        assert_eq!(&out[..], b":0\r\n");
    }

    #[test]
    fn test_snapshot_sink_sees_consistent_set() {
        let f = fixture();
        f.run(&["SET", "k", "old"]);
        f.run(&["SET", "k", "new", "EX", "60"]);
        f.sink.write_snapshot(&f.handler.storage().snapshot()).unwrap();

        let snapshots = f.sink.snapshots.lock().unwrap();
        let (_, obj) = &snapshots[0].entries[0];
        assert_eq!(obj.value.as_bytes(), &Bytes::from("new"));
        assert_eq!(obj.expires_at, Some(f.clock.now_ms() + 60_000));
    }
}
