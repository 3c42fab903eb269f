//! Upload client: watches local trees and streams changed files to a
//! `tidesyncd` server.

pub mod mapping;
pub mod pending;
pub mod pool;
pub mod scheduler;
pub mod startup;
pub mod state;
pub mod transfer;
pub mod watcher;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ClientConfig;
use crate::logger::{NoopLogger, TextLogger, TransferLogger};
use crate::protocol::timeouts;
use crate::worker::WorkerPool;

use mapping::RemoteMapper;
use pending::PendingSet;
use pool::ConnPool;
use scheduler::Scheduler;
use state::TransferTable;
use transfer::{ChunkPolicy, Uploader};
use watcher::ChangeFeeder;

/// Everything the client runs, wired from one [`ClientConfig`].
pub struct Client {
    cfg: ClientConfig,
    mapper: Arc<RemoteMapper>,
    pending: Arc<PendingSet>,
    table: Arc<TransferTable>,
    pool: Arc<ConnPool>,
    journal: Arc<dyn TransferLogger>,
}

impl Client {
    pub fn new(cfg: ClientConfig) -> Result<Self> {
        cfg.validate()?;
        let mapper = Arc::new(RemoteMapper::new(&cfg.remote_path_prefix, &cfg.paths)?);
        let journal: Arc<dyn TransferLogger> = match &cfg.journal {
            Some(path) => Arc::new(
                TextLogger::new(path)
                    .with_context(|| format!("Failed to open journal {}", path.display()))?,
            ),
            None => Arc::new(NoopLogger),
        };
        let pool = Arc::new(ConnPool::new(
            cfg.dial_timeout(),
            cfg.io_timeout_ms,
            cfg.max_idle_conns,
        ));
        Ok(Self {
            cfg,
            mapper,
            pending: Arc::new(PendingSet::new()),
            table: Arc::new(TransferTable::new()),
            pool,
            journal,
        })
    }

    pub fn table(&self) -> &Arc<TransferTable> {
        &self.table
    }

    pub fn pending(&self) -> &Arc<PendingSet> {
        &self.pending
    }

    /// Watch, prime from the startup diff, then schedule uploads until
    /// `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        // Watch first so nothing written during the startup pass is missed
        let _feeder = ChangeFeeder::start(Arc::clone(&self.mapper), Arc::clone(&self.pending))?;

        let sweeper = self.pool.spawn_sweeper(
            Duration::from_millis(timeouts::SWEEP_INTERVAL_MS),
            self.cfg.conn_idle_timeout(),
            shutdown.clone(),
        );

        startup::prime(
            self.cfg.remote_api_addr.as_deref(),
            &self.mapper,
            &self.table,
            &self.pending,
            &shutdown,
        )
        .await?;

        let uploader = Arc::new(Uploader::new(
            self.cfg.remote_addr.clone(),
            ChunkPolicy::from_config(&self.cfg),
            self.cfg.retry_delay(),
            Arc::clone(&self.pool),
            Arc::clone(&self.table),
            Arc::clone(&self.pending),
            Arc::clone(&self.mapper),
            Arc::clone(&self.journal),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&self.pending),
            Arc::clone(&self.table),
            uploader,
            WorkerPool::new("upload", self.cfg.workers),
            self.cfg.submit_backoff(),
            Arc::clone(&self.journal),
        );

        info!(
            remote = %self.cfg.remote_addr,
            roots = self.mapper.mappings().len(),
            "client running"
        );
        scheduler.run(shutdown.clone()).await;

        shutdown.cancel();
        let _ = sweeper.await;
        Ok(())
    }
}
