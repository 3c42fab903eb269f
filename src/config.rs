//! TOML configuration for the upload client and the receiving daemon.
//!
//! Both structs are built once at startup and handed to the components that
//! need them; nothing reads configuration from global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::protocol::{chunk, timeouts};

/// One watched local tree and the remote directory it lands in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPair {
    pub local: PathBuf,
    pub remote: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Upload daemon address (host:port)
    pub remote_addr: String,
    /// Optional HTTP diff API address (host:port)
    pub remote_api_addr: Option<String>,
    /// Prepended to every remote directory
    pub remote_path_prefix: String,
    pub paths: Vec<PathPair>,
    /// Concurrent transfer tasks
    pub workers: usize,
    /// Pooled idle connections kept per address
    pub max_idle_conns: usize,
    pub dial_timeout_ms: u64,
    pub io_timeout_ms: u64,
    pub conn_idle_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub submit_backoff_ms: u64,
    pub chunk_size: usize,
    pub precompressed_chunk_size: usize,
    pub compress_floor: usize,
    pub precompressed_suffixes: Vec<String>,
    /// Transfer journal file
    pub journal: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_addr: String::new(),
            remote_api_addr: None,
            remote_path_prefix: String::new(),
            paths: Vec::new(),
            workers: 50,
            max_idle_conns: 20,
            dial_timeout_ms: timeouts::CONNECT_MS,
            io_timeout_ms: timeouts::IO_MS,
            conn_idle_timeout_secs: timeouts::CONN_IDLE_SECS,
            retry_delay_ms: timeouts::RETRY_DELAY_MS,
            submit_backoff_ms: timeouts::SUBMIT_BACKOFF_MS,
            chunk_size: chunk::COMMON_READ_SIZE,
            precompressed_chunk_size: chunk::PRECOMPRESSED_READ_SIZE,
            compress_floor: chunk::COMPRESS_FLOOR,
            precompressed_suffixes: chunk::PRECOMPRESSED_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            journal: None,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.remote_addr.is_empty() {
            bail!("remote_addr is not set");
        }
        if self.paths.is_empty() {
            bail!("no local/remote path pairs configured");
        }
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.chunk_size == 0 || self.precompressed_chunk_size == 0 {
            bail!("chunk sizes must be non-zero");
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn conn_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_idle_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn submit_backoff(&self) -> Duration {
        Duration::from_millis(self.submit_backoff_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Destination root; every received path lands under it
    pub root: PathBuf,
    /// Upload listener (host:port)
    pub bind: String,
    /// Optional HTTP diff API listener (host:port)
    pub api_bind: Option<String>,
    /// Concurrent connection handlers
    pub workers: usize,
    pub handle_idle_timeout_secs: u64,
    pub io_timeout_ms: u64,
    pub accept_backoff_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            bind: "0.0.0.0:9100".to_string(),
            api_bind: None,
            workers: 10_000,
            handle_idle_timeout_secs: timeouts::HANDLE_IDLE_SECS,
            io_timeout_ms: timeouts::IO_MS,
            accept_backoff_ms: timeouts::SUBMIT_BACKOFF_MS,
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_toml(path)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        Ok(())
    }

    pub fn handle_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.handle_idle_timeout_secs)
    }

    pub fn accept_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_backoff_ms)
    }
}

fn load_toml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&data).with_context(|| format!("Failed to parse config file: {}", path.display()))
}
