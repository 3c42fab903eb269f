//! Shared CLI helpers and the Clap option sets of both binaries

use anyhow::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ClientConfig, PathPair, ServerConfig};

/// Watch local directories and upload every change to a tidesyncd server
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct ClientOpts {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Upload server address (host:port), overrides the config file
    #[arg(long)]
    pub remote: Option<String>,

    /// Listing API address (host:port) used for the startup diff
    #[arg(long)]
    pub api: Option<String>,

    /// Extra LOCAL=REMOTE pair to watch, may be repeated
    #[arg(long = "path", value_parser = parse_path_pair)]
    pub paths: Vec<PathPair>,

    /// Concurrent transfers
    #[arg(long)]
    pub workers: Option<usize>,

    /// Append transfer events to this file
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl ClientOpts {
    /// Load the config file (if any) and apply command-line overrides.
    pub fn into_config(self) -> Result<ClientConfig> {
        let mut cfg = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        if let Some(remote) = self.remote {
            cfg.remote_addr = remote;
        }
        if let Some(api) = self.api {
            cfg.remote_api_addr = Some(api);
        }
        cfg.paths.extend(self.paths);
        if let Some(workers) = self.workers {
            cfg.workers = workers;
        }
        if let Some(journal) = self.journal {
            cfg.journal = Some(journal);
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Receive uploads from tidesync clients
#[derive(Clone, Debug, Parser)]
#[command(author, version, about)]
pub struct DaemonOpts {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Bind address (host:port)
    #[arg(long)]
    pub bind: Option<String>,

    /// Listing API bind address (host:port)
    #[arg(long)]
    pub api_bind: Option<String>,

    /// Destination root directory
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Concurrent connections
    #[arg(long)]
    pub workers: Option<usize>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl DaemonOpts {
    pub fn into_config(self) -> Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(bind) = self.bind {
            cfg.bind = bind;
        }
        if let Some(api_bind) = self.api_bind {
            cfg.api_bind = Some(api_bind);
        }
        if let Some(root) = self.root {
            cfg.root = root;
        }
        if let Some(workers) = self.workers {
            cfg.workers = workers;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_path_pair(s: &str) -> Result<PathPair, String> {
    let (local, remote) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LOCAL=REMOTE, got {s:?}"))?;
    if local.is_empty() || remote.is_empty() {
        return Err(format!("expected LOCAL=REMOTE, got {s:?}"));
    }
    Ok(PathPair {
        local: PathBuf::from(local),
        remote: remote.to_string(),
    })
}

/// `RUST_LOG` wins; otherwise the verbosity count picks the level.
pub fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Cancel `token` on Ctrl-C or SIGTERM.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C"),
        _ = terminate => info!("received SIGTERM"),
    }
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_flags_override_defaults() {
        let opts = ClientOpts::try_parse_from([
            "tidesync",
            "--remote",
            "10.0.0.2:9100",
            "--path",
            "/var/log/app=/app",
            "--workers",
            "8",
            "-vv",
        ])
        .unwrap();
        assert_eq!(opts.verbose, 2);
        let cfg = opts.into_config().unwrap();
        assert_eq!(cfg.remote_addr, "10.0.0.2:9100");
        assert_eq!(cfg.workers, 8);
        assert_eq!(
            cfg.paths,
            vec![PathPair {
                local: PathBuf::from("/var/log/app"),
                remote: "/app".into()
            }]
        );
    }

    #[test]
    fn bad_path_pair_is_rejected() {
        assert!(ClientOpts::try_parse_from(["tidesync", "--path", "/nope"]).is_err());
        assert!(ClientOpts::try_parse_from(["tidesync", "--path", "=/x"]).is_err());
    }

    #[test]
    fn client_without_remote_fails_validation() {
        let opts = ClientOpts::try_parse_from(["tidesync", "--path", "/a=/b"]).unwrap();
        assert!(opts.into_config().is_err());
    }

    #[test]
    fn daemon_flags_override_defaults() {
        let opts = DaemonOpts::try_parse_from([
            "tidesyncd",
            "--root",
            "/srv/in",
            "--bind",
            "127.0.0.1:9200",
            "--api-bind",
            "127.0.0.1:9201",
        ])
        .unwrap();
        let cfg = opts.into_config().unwrap();
        assert_eq!(cfg.root, PathBuf::from("/srv/in"));
        assert_eq!(cfg.bind, "127.0.0.1:9200");
        assert_eq!(cfg.api_bind.as_deref(), Some("127.0.0.1:9201"));
        assert_eq!(cfg.workers, 10_000);
    }
}
