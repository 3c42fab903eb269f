use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tidesync::cli::{init_tracing, shutdown_signal, DaemonOpts};
use tidesync::server::Server;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();
    init_tracing(opts.verbose);
    let cfg = opts.into_config()?;

    if cfg.bind.starts_with("0.0.0.0") {
        // Plain TCP with no authentication
        warn!(bind = %cfg.bind, "listening on all interfaces; only use on trusted networks");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let server = Server::bind(cfg).await?;
        info!(root = %server.root().display(), "starting tidesyncd");
        if let Some(api) = server.api_addr() {
            info!(addr = %api, "listing API enabled");
        }

        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_signal(shutdown.clone()));

        let result = server.run(shutdown).await;
        if let Err(e) = &result {
            error!(error = %e, "tidesyncd exiting with error");
        }
        result
    })
}
