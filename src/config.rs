//! Server configuration, parsed from the command line.

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "cinderkv")]
#[command(version)]
#[command(about = "CinderKV - an in-memory key-value server with TTLs and AOF snapshots")]
#[command(
    after_help = "Connect with any Redis client:\n    $ redis-cli -p 6379\n    127.0.0.1:6379> SET session abc EX 60\n    OK"
)]
pub struct Config {
    /// Host to bind to
    #[arg(long, default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Append only file written by BGREWRITEAOF and loaded at startup
    #[arg(long, default_value = "appendonly.aof")]
    pub aof_file: PathBuf,

    /// Start with an empty keyspace instead of loading the append only file
    #[arg(long)]
    pub no_load: bool,

    /// Run the background sweeper that reclaims expired keys
    #[arg(long)]
    pub active_expiry: bool,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["cinderkv"]);
        assert_eq!(config.bind_address(), "127.0.0.1:6379");
        assert_eq!(config.aof_file, PathBuf::from("appendonly.aof"));
        assert!(!config.no_load);
        assert!(!config.active_expiry);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse_from([
            "cinderkv",
            "--host",
            "0.0.0.0",
            "-p",
            "6380",
            "--aof-file",
            "/tmp/data.aof",
            "--no-load",
            "--active-expiry",
        ]);
        assert_eq!(config.bind_address(), "0.0.0.0:6380");
        assert_eq!(config.aof_file, PathBuf::from("/tmp/data.aof"));
        assert!(config.no_load);
        assert!(config.active_expiry);
    }

    #[test]
    fn test_rejects_bad_port() {
        assert!(Config::try_parse_from(["cinderkv", "--port", "nope"]).is_err());
    }
}
