//! CLI and file configuration surface (spec §6, expanded). Flags are
//! parsed with `clap`'s derive API, mirroring the binary entry points used
//! throughout the retrieval pack; an optional `--config` TOML file
//! (`FileConfig`, via `serde`) supplies the same fields for deployments
//! that prefer a checked-in file, with CLI flags taking precedence.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "kestrel-server", about = "kestrel-rt sample server")]
pub struct Args {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: SocketAddr,

    /// Number of I/O threads; defaults to the machine's parallelism.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Upstream address to proxy requests to. Enables forwarding mode.
    #[arg(long)]
    pub forward: Option<SocketAddr>,

    /// Size of the CPU offload thread pool.
    #[arg(long, default_value_t = 2)]
    pub cpu_threads: usize,

    /// Per-connection read deadline, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub read_timeout_ms: u64,

    /// Log verbosity passed through to `env_logger`.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Optional TOML file supplying defaults for any flag left unset.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Parses CLI flags, then fills in anything left at its clap default
    /// from `--config`'s file, if given. CLI values win on conflict.
    pub fn load() -> Result<ResolvedConfig, ConfigError> {
        let args = Args::parse();
        let file = match &args.config {
            Some(path) => Some(FileConfig::load(path)?),
            None => None,
        };

        let threads = args
            .threads
            .or_else(|| file.as_ref().and_then(|f| f.threads))
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));

        let forward = args.forward.or_else(|| file.as_ref().and_then(|f| f.forward));

        Ok(ResolvedConfig {
            addr: args.addr,
            threads,
            forward,
            cpu_threads: args.cpu_threads,
            read_timeout_ms: args.read_timeout_ms,
            log_level: args.log_level,
        })
    }
}

/// Flattened configuration actually consumed by `bin/kestrel-server.rs`,
/// after CLI/file precedence has been resolved.
pub struct ResolvedConfig {
    pub addr: SocketAddr,
    pub threads: usize,
    pub forward: Option<SocketAddr>,
    pub cpu_threads: usize,
    pub read_timeout_ms: u64,
    pub log_level: String,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    threads: Option<usize>,
    forward: Option<SocketAddr>,
}

impl FileConfig {
    fn load(path: &PathBuf) -> Result<FileConfig, ConfigError> {
        let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&text).map_err(ConfigError::Toml)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Toml(#[source] toml::de::Error),
}
