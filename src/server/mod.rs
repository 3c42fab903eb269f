//! Receiving daemon: accepts upload connections and writes frames under a
//! destination root.

pub mod arbiter;
pub mod conn;
pub mod dispatch;
pub mod webapi;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::protocol::timeouts;
use crate::worker::WorkerPool;

use arbiter::HandleArbiter;
use conn::{serve_connection, ConnEnd};
use dispatch::Dispatcher;
use webapi::ListingServer;

pub struct Server {
    cfg: ServerConfig,
    root: PathBuf,
    listener: TcpListener,
    listing: Option<ListingServer>,
    arbiter: Arc<HandleArbiter>,
}

impl Server {
    /// Create the root and bind every listener.
    pub async fn bind(cfg: ServerConfig) -> Result<Self> {
        cfg.validate()?;
        std::fs::create_dir_all(&cfg.root)
            .with_context(|| format!("Failed to create root {}", cfg.root.display()))?;
        let root = cfg
            .root
            .canonicalize()
            .with_context(|| format!("Failed to canonicalize root path: {}", cfg.root.display()))?;

        let listener = TcpListener::bind(&cfg.bind)
            .await
            .with_context(|| format!("Failed to bind {}", cfg.bind))?;
        let listing = match &cfg.api_bind {
            Some(addr) => Some(ListingServer::bind(addr, root.clone()).await?),
            None => None,
        };
        Ok(Self {
            cfg,
            root,
            listener,
            listing,
            arbiter: Arc::new(HandleArbiter::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.listing.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let Server {
            cfg,
            root,
            listener,
            listing,
            arbiter,
        } = self;

        let sweeper = arbiter.spawn_sweeper(
            Duration::from_millis(timeouts::SWEEP_INTERVAL_MS),
            cfg.handle_idle_timeout(),
            shutdown.clone(),
        );
        let api = listing.map(|l| tokio::spawn(l.run(shutdown.clone())));

        let dispatcher = Dispatcher::new(root.clone(), arbiter);
        let workers = WorkerPool::new("connection", cfg.workers);
        info!(
            bind = %listener.local_addr()?,
            root = %root.display(),
            workers = workers.capacity(),
            "tidesyncd listening"
        );

        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(cfg.accept_backoff()).await;
                        continue;
                    }
                },
            };
            let _ = stream.set_nodelay(true);

            let d = dispatcher.clone();
            let io_timeout_ms = cfg.io_timeout_ms;
            let submitted = workers.try_submit(async move {
                debug!(peer = %peer, "connection opened");
                match serve_connection(stream, d, io_timeout_ms).await {
                    ConnEnd::Closed => debug!(peer = %peer, "connection closed"),
                    ConnEnd::Malformed(e) => warn!(peer = %peer, error = %e, "malformed frame, closing"),
                    ConnEnd::Io(e) => debug!(peer = %peer, error = %e, "connection dropped"),
                }
            });
            if let Err(e) = submitted {
                // The rejected task owned the stream, so the socket is already closed
                warn!(peer = %peer, error = %e, "connection refused");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(cfg.accept_backoff()) => {}
                }
            }
        }

        info!("tidesyncd stopping");
        let _ = sweeper.await;
        if let Some(api) = api {
            api.await.context("listing API task panicked")??;
        }
        Ok(())
    }
}
